use crate::error::{ChalkError, ChalkResult};
use crate::utils::cache::Replacer;
use std::collections::{HashMap, VecDeque};

/// LRU-K replacement policy. A frame's backward k-distance is the age of its
/// k-th most recent access; frames with fewer than k accesses have infinite
/// distance and are evicted first, oldest access breaking ties.
#[derive(Debug)]
pub struct LRUKReplacer {
    k: usize,
    num_frames: usize,
    current_timestamp: u64,
    entries: HashMap<usize, LRUKEntry>,
    evictable_count: usize,
}

#[derive(Debug)]
struct LRUKEntry {
    history: VecDeque<u64>,
    evictable: bool,
}

impl LRUKReplacer {
    pub fn with_k(num_frames: usize, k: usize) -> Self {
        assert!(k > 0);
        Self {
            k,
            num_frames,
            current_timestamp: 0,
            entries: HashMap::with_capacity(num_frames),
            evictable_count: 0,
        }
    }

    fn check_frame(&self, frame_id: usize) -> ChalkResult<()> {
        if frame_id >= self.num_frames {
            return Err(ChalkError::Internal(format!(
                "Frame id {} out of replacer range {}",
                frame_id, self.num_frames
            )));
        }
        Ok(())
    }
}

impl Replacer for LRUKReplacer {
    fn record_access(&mut self, frame_id: usize) -> ChalkResult<()> {
        self.check_frame(frame_id)?;
        self.current_timestamp += 1;
        let ts = self.current_timestamp;
        let k = self.k;
        let entry = self.entries.entry(frame_id).or_insert_with(|| LRUKEntry {
            history: VecDeque::with_capacity(k),
            evictable: false,
        });
        if entry.history.len() == k {
            entry.history.pop_front();
        }
        entry.history.push_back(ts);
        Ok(())
    }

    fn set_evictable(&mut self, frame_id: usize, evictable: bool) -> ChalkResult<()> {
        self.check_frame(frame_id)?;
        let Some(entry) = self.entries.get_mut(&frame_id) else {
            return Err(ChalkError::Internal(format!(
                "Frame id {frame_id} not tracked by replacer"
            )));
        };
        if entry.evictable != evictable {
            entry.evictable = evictable;
            if evictable {
                self.evictable_count += 1;
            } else {
                self.evictable_count -= 1;
            }
        }
        Ok(())
    }

    fn evict(&mut self) -> Option<usize> {
        let mut victim: Option<(usize, bool, u64)> = None;
        for (&frame_id, entry) in self.entries.iter() {
            if !entry.evictable {
                continue;
            }
            let infinite = entry.history.len() < self.k;
            let oldest = *entry.history.front().unwrap_or(&0);
            let better = match &victim {
                None => true,
                Some((_, v_infinite, v_oldest)) => match (infinite, v_infinite) {
                    (true, false) => true,
                    (false, true) => false,
                    _ => oldest < *v_oldest,
                },
            };
            if better {
                victim = Some((frame_id, infinite, oldest));
            }
        }
        let (frame_id, _, _) = victim?;
        self.entries.remove(&frame_id);
        self.evictable_count -= 1;
        Some(frame_id)
    }

    fn remove(&mut self, frame_id: usize) {
        if let Some(entry) = self.entries.remove(&frame_id) {
            if entry.evictable {
                self.evictable_count -= 1;
            }
        }
    }

    fn size(&self) -> usize {
        self.evictable_count
    }
}

#[cfg(test)]
mod tests {
    use super::LRUKReplacer;
    use crate::utils::cache::Replacer;

    #[test]
    fn evicts_infinite_distance_first() {
        let mut replacer = LRUKReplacer::with_k(7, 2);
        for frame in [1, 2, 3, 4, 1, 2] {
            replacer.record_access(frame).unwrap();
        }
        for frame in 1..=4 {
            replacer.set_evictable(frame, true).unwrap();
        }
        assert_eq!(replacer.size(), 4);

        // 3 and 4 have fewer than k accesses; 3 was touched first.
        assert_eq!(replacer.evict(), Some(3));
        assert_eq!(replacer.evict(), Some(4));
        // Among full histories, frame 1's 2nd-last access is older.
        assert_eq!(replacer.evict(), Some(1));
        assert_eq!(replacer.evict(), Some(2));
        assert_eq!(replacer.evict(), None);
    }

    #[test]
    fn pinned_frames_are_skipped() {
        let mut replacer = LRUKReplacer::with_k(3, 2);
        replacer.record_access(0).unwrap();
        replacer.record_access(1).unwrap();
        replacer.set_evictable(0, true).unwrap();
        assert_eq!(replacer.size(), 1);
        replacer.set_evictable(0, false).unwrap();
        assert_eq!(replacer.evict(), None);
    }
}
