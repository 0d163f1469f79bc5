use crate::buffer::{PageReadLatch, PageRef, INVALID_PAGE_ID};
use crate::error::ChalkResult;
use crate::storage::codec::BPlusTreeLeafPageCodec;
use crate::storage::index::BPlusTreeIndex;
use crate::storage::page::{BPlusTreeLeafPage, RecordId};
use crate::storage::tuple::Tuple;
use std::ops::{Bound, RangeBounds};
use std::sync::Arc;

/// The held position: decoded leaf plus the read latch and pin keeping it
/// stable. Field order releases the latch before the pin.
struct IterPosition {
    leaf: BPlusTreeLeafPage,
    cursor: usize,
    _latch: PageReadLatch,
    _page: PageRef,
}

/// Ordered iteration over leaf entries. The current leaf stays read-latched;
/// crossing a boundary latches the successor before letting go of the
/// predecessor so a concurrent split cannot strand the scan.
pub struct TreeIndexIterator {
    index: Arc<BPlusTreeIndex>,
    start_bound: Bound<Tuple>,
    end_bound: Bound<Tuple>,
    position: Option<IterPosition>,
    started: bool,
}

impl std::fmt::Debug for TreeIndexIterator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TreeIndexIterator")
            .field("index", &self.index.index_name)
            .field("started", &self.started)
            .finish()
    }
}

impl TreeIndexIterator {
    pub fn new<R: RangeBounds<Tuple>>(index: Arc<BPlusTreeIndex>, range: R) -> Self {
        Self {
            index,
            start_bound: range.start_bound().cloned(),
            end_bound: range.end_bound().cloned(),
            position: None,
            started: false,
        }
    }

    pub fn next(&mut self) -> ChalkResult<Option<RecordId>> {
        if !self.started {
            self.started = true;
            self.seek_start()?;
        } else if let Some(position) = self.position.as_mut() {
            position.cursor += 1;
        }

        loop {
            let Some(position) = self.position.as_ref() else {
                return Ok(None);
            };
            if position.cursor < position.leaf.array.len() {
                break;
            }
            if !self.advance_leaf()? {
                return Ok(None);
            }
        }

        let (in_range, rid) = {
            let position = self.position.as_ref().unwrap();
            let (key, rid) = &position.leaf.array[position.cursor];
            let in_range = match self.end_bound.as_ref() {
                Bound::Included(end) => key <= end,
                Bound::Excluded(end) => key < end,
                Bound::Unbounded => true,
            };
            (in_range, *rid)
        };
        if !in_range {
            self.position = None;
            return Ok(None);
        }
        Ok(Some(rid))
    }

    fn seek_start(&mut self) -> ChalkResult<()> {
        let target = match self.start_bound.as_ref() {
            Bound::Included(start) | Bound::Excluded(start) => Some(start.clone()),
            Bound::Unbounded => None,
        };
        let Some((page, latch, leaf)) = self.index.find_leaf_read(target.as_ref())? else {
            return Ok(());
        };
        let cursor = match self.start_bound.as_ref() {
            Bound::Included(start) => leaf.next_closest(start, true),
            Bound::Excluded(start) => leaf.next_closest(start, false),
            Bound::Unbounded => Some(0),
        };
        // A missing cursor parks past the end so the scan rolls to the next
        // leaf.
        let cursor = cursor.unwrap_or(leaf.array.len());
        self.position = Some(IterPosition {
            leaf,
            cursor,
            _latch: latch,
            _page: page,
        });
        Ok(())
    }

    /// Latch-couple to the next leaf. False at the end of the chain.
    fn advance_leaf(&mut self) -> ChalkResult<bool> {
        let Some(position) = self.position.as_ref() else {
            return Ok(false);
        };
        let next_page_id = position.leaf.header.next_page_id;
        if next_page_id == INVALID_PAGE_ID {
            self.position = None;
            return Ok(false);
        }
        let next_page = self.index.buffer_pool.fetch_page(next_page_id)?;
        let next_latch = next_page.read_latch();
        let (next_leaf, _) =
            BPlusTreeLeafPageCodec::decode(next_latch.data(), self.index.key_schema.clone())?;
        // The old latch and pin drop here, after the successor is held.
        self.position = Some(IterPosition {
            leaf: next_leaf,
            cursor: 0,
            _latch: next_latch,
            _page: next_page,
        });
        Ok(true)
    }
}
