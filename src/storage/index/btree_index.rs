use log::debug;
use parking_lot::RwLock;
use std::sync::Arc;

use crate::buffer::{
    BufferPoolManager, PageId, PageReadLatch, PageRef, PageWriteLatch, INDEX_ROOTS_PAGE_ID,
    INVALID_PAGE_ID,
};
use crate::catalog::SchemaRef;
use crate::error::{ChalkError, ChalkResult};
use crate::storage::codec::{
    BPlusTreeInternalPageCodec, BPlusTreeLeafPageCodec, BPlusTreePageCodec, IndexRootsPageCodec,
};
use crate::storage::page::{
    BPlusTreeInternalPage, BPlusTreeLeafPage, BPlusTreePage, RecordId,
};
use crate::storage::tuple::Tuple;
use crate::utils::util::page_bytes_to_array;

/// One entry of the write-crabbing latch queue: the pin and the owned write
/// latch of a page on the descent path. Field order releases the latch
/// before the pin.
struct LatchedPage {
    guard: PageWriteLatch,
    page: PageRef,
}

impl LatchedPage {
    fn acquire(page: PageRef) -> Self {
        let guard = page.write_latch();
        Self { guard, page }
    }

    fn page_id(&self) -> PageId {
        self.page.page_id
    }
}

/// A persistent B+ tree mapping fixed-width key tuples to record ids.
///
/// Concurrency follows latch coupling: readers crab down with read latches,
/// writers descend under the root id latch with a FIFO queue of write
/// latches, releasing ancestors as soon as a child is safe for the pending
/// structural change.
#[derive(Debug)]
pub struct BPlusTreeIndex {
    pub index_name: String,
    pub key_schema: SchemaRef,
    pub buffer_pool: Arc<BufferPoolManager>,
    pub leaf_max_size: u32,
    pub internal_max_size: u32,
    root_id_latch: RwLock<PageId>,
}

impl BPlusTreeIndex {
    pub fn try_new(
        index_name: impl Into<String>,
        key_schema: SchemaRef,
        buffer_pool: Arc<BufferPoolManager>,
        leaf_max_size: u32,
        internal_max_size: u32,
    ) -> ChalkResult<Self> {
        assert!(leaf_max_size >= 2 && internal_max_size >= 3);
        let index_name = index_name.into();
        let root_page_id = {
            let roots_ref = buffer_pool.fetch_page(INDEX_ROOTS_PAGE_ID)?;
            let guard = roots_ref.read();
            let (roots, _) = IndexRootsPageCodec::decode(guard.data())?;
            roots.get_root_id(&index_name).unwrap_or(INVALID_PAGE_ID)
        };
        Ok(Self {
            index_name,
            key_schema,
            buffer_pool,
            leaf_max_size,
            internal_max_size,
            root_id_latch: RwLock::new(root_page_id),
        })
    }

    pub fn is_empty(&self) -> bool {
        *self.root_id_latch.read() == INVALID_PAGE_ID
    }

    pub fn root_page_id(&self) -> PageId {
        *self.root_id_latch.read()
    }

    /// Point query. Read-crabs from the root down to the leaf.
    pub fn get(&self, key: &Tuple) -> ChalkResult<Option<RecordId>> {
        let Some((_page, _latch, leaf)) = self.find_leaf_read(Some(key))? else {
            return Ok(None);
        };
        Ok(leaf.look_up(key))
    }

    /// Insert a unique key. Returns false when the key already exists.
    pub fn insert(&self, key: &Tuple, rid: RecordId) -> ChalkResult<bool> {
        let mut root_guard = Some(self.root_id_latch.write());
        let root_page_id = root_guard.as_ref().map(|g| **g).unwrap();

        if root_page_id == INVALID_PAGE_ID {
            let new_page_ref = self.buffer_pool.new_page()?;
            let new_page_id = new_page_ref.page_id;
            let mut leaf = BPlusTreeLeafPage::new(
                self.key_schema.clone(),
                self.leaf_max_size,
                new_page_id,
                INVALID_PAGE_ID,
            );
            leaf.insert(key.clone(), rid);
            new_page_ref
                .write()
                .set_data(page_bytes_to_array(&BPlusTreeLeafPageCodec::encode(&leaf)));
            **root_guard.as_mut().unwrap() = new_page_id;
            self.record_root(new_page_id)?;
            debug!("{}: started new tree at page {new_page_id}", self.index_name);
            return Ok(true);
        }

        // Pessimistic descent: keep every ancestor write latch until a child
        // that cannot split is reached.
        let mut latches: Vec<LatchedPage> = Vec::new();
        latches.push(LatchedPage::acquire(self.buffer_pool.fetch_page(root_page_id)?));

        loop {
            let top = latches.last().unwrap();
            let (tree_page, _) =
                BPlusTreePageCodec::decode(top.guard.data(), self.key_schema.clone())?;
            let internal = match tree_page {
                BPlusTreePage::Leaf(_) => break,
                BPlusTreePage::Internal(internal) => internal,
            };
            let child_id = internal.look_up(key);
            let child = LatchedPage::acquire(self.buffer_pool.fetch_page(child_id)?);
            let (child_page, _) =
                BPlusTreePageCodec::decode(child.guard.data(), self.key_schema.clone())?;
            if Self::insert_safe(&child_page) {
                latches.clear();
                root_guard = None;
            }
            latches.push(child);
        }

        let mut level = latches.len() - 1;
        // Separator and right sibling produced by a split one level below.
        let mut pending: Option<(Tuple, PageId)> = None;

        loop {
            let (mut tree_page, _) = BPlusTreePageCodec::decode(
                latches[level].guard.data(),
                self.key_schema.clone(),
            )?;
            match (&mut tree_page, &pending) {
                (BPlusTreePage::Leaf(leaf), None) => {
                    if leaf.look_up(key).is_some() {
                        return Ok(false);
                    }
                    leaf.insert(key.clone(), rid);
                }
                (BPlusTreePage::Internal(internal), Some((separator, right_id))) => {
                    internal.insert(separator.clone(), *right_id);
                }
                _ => {
                    return Err(ChalkError::Internal(
                        "Malformed b+ tree descent path".to_string(),
                    ))
                }
            }
            pending = None;

            if tree_page.is_full() {
                pending = Some(self.split(&mut tree_page, &mut latches)?);
            }
            latches[level]
                .guard
                .set_data(page_bytes_to_array(&BPlusTreePageCodec::encode(&tree_page)));

            let Some((separator, right_id)) = pending.clone() else {
                break;
            };
            if level == 0 {
                // The root itself split; grow the tree by one level.
                let old_root_id = latches[0].page_id();
                let new_root_ref = self.buffer_pool.new_page()?;
                let new_root_id = new_root_ref.page_id;
                let mut new_root = BPlusTreeInternalPage::new(
                    self.key_schema.clone(),
                    self.internal_max_size,
                    new_root_id,
                    INVALID_PAGE_ID,
                );
                new_root.populate_new_root(old_root_id, separator, right_id);
                new_root_ref.write().set_data(page_bytes_to_array(
                    &BPlusTreeInternalPageCodec::encode(&new_root),
                ));
                self.set_parent(old_root_id, new_root_id, &mut latches)?;
                self.set_parent(right_id, new_root_id, &mut latches)?;

                let Some(guard) = root_guard.as_mut() else {
                    return Err(ChalkError::Internal(
                        "Root split without holding the root id latch".to_string(),
                    ));
                };
                **guard = new_root_id;
                self.record_root(new_root_id)?;
                debug!("{}: new root page {new_root_id}", self.index_name);
                break;
            }
            level -= 1;
        }
        Ok(true)
    }

    /// Remove a key; absent keys are a no-op.
    pub fn remove(&self, key: &Tuple) -> ChalkResult<()> {
        let mut root_guard = Some(self.root_id_latch.write());
        let root_page_id = root_guard.as_ref().map(|g| **g).unwrap();
        if root_page_id == INVALID_PAGE_ID {
            return Ok(());
        }

        let mut latches: Vec<LatchedPage> = Vec::new();
        latches.push(LatchedPage::acquire(self.buffer_pool.fetch_page(root_page_id)?));

        loop {
            let top = latches.last().unwrap();
            let (tree_page, _) =
                BPlusTreePageCodec::decode(top.guard.data(), self.key_schema.clone())?;
            let internal = match tree_page {
                BPlusTreePage::Leaf(_) => break,
                BPlusTreePage::Internal(internal) => internal,
            };
            let child_id = internal.look_up(key);
            let child = LatchedPage::acquire(self.buffer_pool.fetch_page(child_id)?);
            let (child_page, _) =
                BPlusTreePageCodec::decode(child.guard.data(), self.key_schema.clone())?;
            // Descent children are never the root.
            if child_page.can_borrow() {
                latches.clear();
                root_guard = None;
            }
            latches.push(child);
        }

        let leaf_level = latches.len() - 1;
        let (leaf_page, _) = BPlusTreePageCodec::decode(
            latches[leaf_level].guard.data(),
            self.key_schema.clone(),
        )?;
        let BPlusTreePage::Leaf(mut leaf) = leaf_page else {
            return Err(ChalkError::Internal("Descent did not end at a leaf".to_string()));
        };
        if !leaf.delete(key) {
            return Ok(());
        }
        latches[leaf_level]
            .guard
            .set_data(page_bytes_to_array(&BPlusTreeLeafPageCodec::encode(&leaf)));

        // Pages emptied by coalescing are freed only after every latch and
        // pin is released.
        let mut deleted_pages: Vec<PageId> = Vec::new();
        let mut level = leaf_level;

        loop {
            let (node, _) = BPlusTreePageCodec::decode(
                latches[level].guard.data(),
                self.key_schema.clone(),
            )?;
            let is_root = level == 0 && root_guard.is_some();

            if is_root {
                self.adjust_root(&node, &mut root_guard, &mut latches, &mut deleted_pages)?;
                break;
            }
            if !node.is_underflow(false) {
                break;
            }
            self.coalesce_or_redistribute(node, level, &mut latches, &mut deleted_pages)?;
            level -= 1;
        }

        // FIFO release of the whole latch queue, then flush deferred frees.
        drop(latches);
        for page_id in deleted_pages {
            self.buffer_pool.delete_page(page_id)?;
        }
        Ok(())
    }

    fn insert_safe(page: &BPlusTreePage) -> bool {
        page.current_size() < page.max_size() - 1
    }

    /// Split an overflowing node, returning the separator key and the new
    /// right sibling's page id.
    fn split(
        &self,
        tree_page: &mut BPlusTreePage,
        latches: &mut Vec<LatchedPage>,
    ) -> ChalkResult<(Tuple, PageId)> {
        let new_page_ref = self.buffer_pool.new_page()?;
        let new_page_id = new_page_ref.page_id;

        match tree_page {
            BPlusTreePage::Leaf(leaf) => {
                let mut new_leaf = BPlusTreeLeafPage::new(
                    self.key_schema.clone(),
                    self.leaf_max_size,
                    new_page_id,
                    leaf.header.parent_page_id,
                );
                let moved = leaf.split_off(leaf.header.current_size as usize / 2);
                new_leaf.batch_insert(moved);
                new_leaf.header.next_page_id = leaf.header.next_page_id;
                leaf.header.next_page_id = new_page_id;

                let separator = new_leaf.key_at(0).clone();
                new_page_ref
                    .write()
                    .set_data(page_bytes_to_array(&BPlusTreeLeafPageCodec::encode(&new_leaf)));
                debug!(
                    "{}: split leaf {} -> {}",
                    self.index_name, leaf.header.page_id, new_page_id
                );
                Ok((separator, new_page_id))
            }
            BPlusTreePage::Internal(internal) => {
                let mid = internal.header.current_size as usize / 2;
                let mut moved = internal.split_off(mid);
                let separator = moved[0].0.clone();
                // The pushed-up key's child becomes the sentinel child of the
                // new right page.
                moved[0].0 = Tuple::empty(self.key_schema.clone());

                let mut new_internal = BPlusTreeInternalPage::new(
                    self.key_schema.clone(),
                    self.internal_max_size,
                    new_page_id,
                    internal.header.parent_page_id,
                );
                new_internal.batch_insert(moved);
                let moved_children: Vec<PageId> = new_internal.values();
                for child_id in moved_children {
                    self.set_parent(child_id, new_page_id, latches)?;
                }
                new_page_ref.write().set_data(page_bytes_to_array(
                    &BPlusTreeInternalPageCodec::encode(&new_internal),
                ));
                debug!(
                    "{}: split internal {} -> {}",
                    self.index_name, internal.header.page_id, new_page_id
                );
                Ok((separator, new_page_id))
            }
        }
    }

    /// Resolve an underflow at `level` by borrowing from a sibling or
    /// merging into one. The parent (at `level - 1`) is already latched.
    fn coalesce_or_redistribute(
        &self,
        node: BPlusTreePage,
        level: usize,
        latches: &mut Vec<LatchedPage>,
        deleted_pages: &mut Vec<PageId>,
    ) -> ChalkResult<()> {
        let node_id = latches[level].page_id();
        let (parent_page, _) = BPlusTreePageCodec::decode(
            latches[level - 1].guard.data(),
            self.key_schema.clone(),
        )?;
        let BPlusTreePage::Internal(mut parent) = parent_page else {
            return Err(ChalkError::Internal("Parent is not an internal page".to_string()));
        };
        let node_index = parent.value_index(node_id).ok_or_else(|| {
            ChalkError::Internal(format!("Page {node_id} missing from its parent"))
        })?;

        let mut node = node;

        // Left sibling first, for both borrowing and merging.
        let left = if node_index > 0 {
            let left_id = parent.value_at(node_index - 1);
            let latched = LatchedPage::acquire(self.buffer_pool.fetch_page(left_id)?);
            let (left_page, _) =
                BPlusTreePageCodec::decode(latched.guard.data(), self.key_schema.clone())?;
            Some((latched, left_page))
        } else {
            None
        };

        if let Some((mut left_latched, mut left_page)) = left {
            if left_page.can_borrow() {
                self.redistribute_from_left(
                    &mut parent,
                    &mut left_page,
                    &mut node,
                    node_index,
                    latches,
                )?;
                Self::write_back(&mut left_latched, &left_page);
                Self::write_back(&mut latches[level], &node);
                Self::write_back(&mut latches[level - 1], &BPlusTreePage::Internal(parent));
                return Ok(());
            }

            if node_index + 1 < parent.header.current_size as usize {
                let right_id = parent.value_at(node_index + 1);
                let mut right_latched =
                    LatchedPage::acquire(self.buffer_pool.fetch_page(right_id)?);
                let (mut right_page, _) =
                    BPlusTreePageCodec::decode(right_latched.guard.data(), self.key_schema.clone())?;
                if right_page.can_borrow() {
                    self.redistribute_from_right(
                        &mut parent,
                        &mut node,
                        &mut right_page,
                        node_index,
                        latches,
                    )?;
                    Self::write_back(&mut right_latched, &right_page);
                    Self::write_back(&mut latches[level], &node);
                    Self::write_back(&mut latches[level - 1], &BPlusTreePage::Internal(parent));
                    return Ok(());
                }
            }

            // Merge this node into its left sibling.
            let left_id = left_latched.page_id();
            self.merge(&mut parent, &mut left_page, left_id, node, node_index, latches)?;
            deleted_pages.push(node_id);
            debug!("{}: merged page {node_id} into left sibling", self.index_name);
            Self::write_back(&mut left_latched, &left_page);
            Self::write_back(&mut latches[level - 1], &BPlusTreePage::Internal(parent));
            return Ok(());
        }

        // No left sibling: borrow from or merge with the right one.
        let right_id = parent.value_at(node_index + 1);
        let mut right_latched = LatchedPage::acquire(self.buffer_pool.fetch_page(right_id)?);
        let (mut right_page, _) =
            BPlusTreePageCodec::decode(right_latched.guard.data(), self.key_schema.clone())?;

        if right_page.can_borrow() {
            self.redistribute_from_right(&mut parent, &mut node, &mut right_page, node_index, latches)?;
            Self::write_back(&mut right_latched, &right_page);
            Self::write_back(&mut latches[level], &node);
            Self::write_back(&mut latches[level - 1], &BPlusTreePage::Internal(parent));
            return Ok(());
        }

        self.merge(&mut parent, &mut node, node_id, right_page, node_index + 1, latches)?;
        deleted_pages.push(right_id);
        debug!("{}: merged right sibling {right_id} into page {node_id}", self.index_name);
        Self::write_back(&mut latches[level], &node);
        Self::write_back(&mut latches[level - 1], &BPlusTreePage::Internal(parent));
        Ok(())
    }

    /// Move the left sibling's last entry to the front of `node`.
    fn redistribute_from_left(
        &self,
        parent: &mut BPlusTreeInternalPage,
        left: &mut BPlusTreePage,
        node: &mut BPlusTreePage,
        node_index: usize,
        latches: &mut [LatchedPage],
    ) -> ChalkResult<()> {
        match (left, node) {
            (BPlusTreePage::Leaf(left), BPlusTreePage::Leaf(node)) => {
                let (key, rid) = left.split_off(left.header.current_size as usize - 1).remove(0);
                node.insert(key, rid);
                parent.set_key_at(node_index, node.key_at(0).clone());
            }
            (BPlusTreePage::Internal(left), BPlusTreePage::Internal(node)) => {
                let (key, child_id) =
                    left.split_off(left.header.current_size as usize - 1).remove(0);
                // The parent separator drops into the node; the borrowed key
                // replaces the separator.
                let separator = parent.key_at(node_index).clone();
                node.set_key_at(0, separator);
                node.array.insert(0, (Tuple::empty(self.key_schema.clone()), child_id));
                node.header.current_size += 1;
                parent.set_key_at(node_index, key);
                self.set_parent(child_id, node.header.page_id, latches)?;
            }
            _ => {
                return Err(ChalkError::Internal(
                    "Sibling page kind mismatch".to_string(),
                ))
            }
        }
        Ok(())
    }

    /// Move the right sibling's first entry to the tail of `node`.
    fn redistribute_from_right(
        &self,
        parent: &mut BPlusTreeInternalPage,
        node: &mut BPlusTreePage,
        right: &mut BPlusTreePage,
        node_index: usize,
        latches: &mut [LatchedPage],
    ) -> ChalkResult<()> {
        let right_index = node_index + 1;
        match (node, right) {
            (BPlusTreePage::Leaf(node), BPlusTreePage::Leaf(right)) => {
                let (key, rid) = right.remove_at(0);
                node.insert(key, rid);
                parent.set_key_at(right_index, right.key_at(0).clone());
            }
            (BPlusTreePage::Internal(node), BPlusTreePage::Internal(right)) => {
                let (_, child_id) = right.remove_at(0);
                let separator = parent.key_at(right_index).clone();
                node.insert(separator, child_id);
                // The right page's new first entry becomes its sentinel and
                // its old key moves up as the separator.
                let new_separator = right.key_at(0).clone();
                right.set_key_at(0, Tuple::empty(self.key_schema.clone()));
                parent.set_key_at(right_index, new_separator);
                self.set_parent(child_id, node.header.page_id, latches)?;
            }
            _ => {
                return Err(ChalkError::Internal(
                    "Sibling page kind mismatch".to_string(),
                ))
            }
        }
        Ok(())
    }

    /// Merge `right_page` into `left_page` and drop the separator from the
    /// parent. `right_index` is the parent slot of the removed page.
    fn merge(
        &self,
        parent: &mut BPlusTreeInternalPage,
        left_page: &mut BPlusTreePage,
        left_id: PageId,
        right_page: BPlusTreePage,
        right_index: usize,
        latches: &mut [LatchedPage],
    ) -> ChalkResult<()> {
        match (left_page, right_page) {
            (BPlusTreePage::Leaf(left), BPlusTreePage::Leaf(mut right)) => {
                let moved = right.split_off(0);
                left.batch_insert(moved);
                left.header.next_page_id = right.header.next_page_id;
            }
            (BPlusTreePage::Internal(left), BPlusTreePage::Internal(mut right)) => {
                let mut moved = right.split_off(0);
                // Pull the separator down in place of the right sentinel.
                moved[0].0 = parent.key_at(right_index).clone();
                for (_, child_id) in moved.iter() {
                    self.set_parent(*child_id, left_id, latches)?;
                }
                left.batch_insert(moved);
            }
            _ => {
                return Err(ChalkError::Internal(
                    "Sibling page kind mismatch".to_string(),
                ))
            }
        }
        parent.remove_at(right_index);
        Ok(())
    }

    /// Shrink the tree at the root: an internal root with a single child
    /// promotes it; an empty leaf root empties the tree.
    fn adjust_root(
        &self,
        root: &BPlusTreePage,
        root_guard: &mut Option<parking_lot::RwLockWriteGuard<'_, PageId>>,
        latches: &mut Vec<LatchedPage>,
        deleted_pages: &mut Vec<PageId>,
    ) -> ChalkResult<()> {
        match root {
            BPlusTreePage::Internal(internal) if internal.header.current_size == 1 => {
                let only_child = internal.value_at(0);
                self.set_parent(only_child, INVALID_PAGE_ID, latches)?;
                **root_guard.as_mut().unwrap() = only_child;
                self.record_root(only_child)?;
                deleted_pages.push(internal.header.page_id);
                debug!("{}: root collapsed to page {only_child}", self.index_name);
            }
            BPlusTreePage::Leaf(leaf) if leaf.header.current_size == 0 => {
                **root_guard.as_mut().unwrap() = INVALID_PAGE_ID;
                self.record_root(INVALID_PAGE_ID)?;
                deleted_pages.push(leaf.header.page_id);
                debug!("{}: tree is now empty", self.index_name);
            }
            _ => {}
        }
        Ok(())
    }

    /// Rewrite a child's parent pointer, through the held latch when the
    /// child sits on the crabbing path.
    fn set_parent(
        &self,
        child_id: PageId,
        parent_id: PageId,
        latches: &mut [LatchedPage],
    ) -> ChalkResult<()> {
        if let Some(latched) = latches.iter_mut().find(|lp| lp.page.page_id == child_id) {
            let (mut page, _) =
                BPlusTreePageCodec::decode(latched.guard.data(), self.key_schema.clone())?;
            page.set_parent_page_id(parent_id);
            latched
                .guard
                .set_data(page_bytes_to_array(&BPlusTreePageCodec::encode(&page)));
            return Ok(());
        }
        let page_ref = self.buffer_pool.fetch_page(child_id)?;
        let mut guard = page_ref.write();
        let (mut page, _) = BPlusTreePageCodec::decode(guard.data(), self.key_schema.clone())?;
        page.set_parent_page_id(parent_id);
        guard.set_data(page_bytes_to_array(&BPlusTreePageCodec::encode(&page)));
        Ok(())
    }

    fn write_back(latched: &mut LatchedPage, page: &BPlusTreePage) {
        latched
            .guard
            .set_data(page_bytes_to_array(&BPlusTreePageCodec::encode(page)));
    }

    /// Record the current root in the persistent roots directory.
    fn record_root(&self, root_page_id: PageId) -> ChalkResult<()> {
        let roots_ref = self.buffer_pool.fetch_page(INDEX_ROOTS_PAGE_ID)?;
        let mut guard = roots_ref.write();
        let (mut roots, _) = IndexRootsPageCodec::decode(guard.data())?;
        if roots.get_root_id(&self.index_name).is_some() {
            roots.update_record(&self.index_name, root_page_id)?;
        } else {
            roots.insert_record(&self.index_name, root_page_id)?;
        }
        guard.set_data(page_bytes_to_array(&IndexRootsPageCodec::encode(&roots)));
        Ok(())
    }

    /// Find the leaf holding `target` (or the leftmost leaf when `None`),
    /// read-crabbing downward. Returns the pin, the held read latch and the
    /// decoded leaf.
    pub(crate) fn find_leaf_read(
        &self,
        target: Option<&Tuple>,
    ) -> ChalkResult<Option<(PageRef, PageReadLatch, BPlusTreeLeafPage)>> {
        let root_guard = self.root_id_latch.read();
        let root_page_id = *root_guard;
        if root_page_id == INVALID_PAGE_ID {
            return Ok(None);
        }
        let root_ref = self.buffer_pool.fetch_page(root_page_id)?;
        let root_latch = root_ref.read_latch();
        drop(root_guard);
        // (latch, pin) pairs so reassignment releases the latch first.
        let mut current = (root_latch, root_ref);

        loop {
            let (tree_page, _) =
                BPlusTreePageCodec::decode(current.0.data(), self.key_schema.clone())?;
            match tree_page {
                BPlusTreePage::Internal(internal) => {
                    let child_id = match target {
                        Some(key) => internal.look_up(key),
                        None => internal.value_at(0),
                    };
                    let child_ref = self.buffer_pool.fetch_page(child_id)?;
                    let child_latch = child_ref.read_latch();
                    // Parent latch and pin drop here, after the child is held.
                    current = (child_latch, child_ref);
                }
                BPlusTreePage::Leaf(leaf) => {
                    let (latch, page) = current;
                    return Ok(Some((page, latch, leaf)));
                }
            }
        }
    }

    /// Walk the whole tree checking the structural invariants: equal leaf
    /// depth, strictly increasing keys, size bounds and parent pointers, and
    /// separator keys bounding their subtrees.
    pub fn validate_integrity(&self) -> ChalkResult<()> {
        let root_page_id = self.root_page_id();
        if root_page_id == INVALID_PAGE_ID {
            return Ok(());
        }
        self.validate_subtree(root_page_id, INVALID_PAGE_ID, true, (None, None))
            .map(|_| ())
    }

    /// Returns (min key, max key, leaf depth) of the subtree.
    fn validate_subtree(
        &self,
        page_id: PageId,
        expected_parent: PageId,
        is_root: bool,
        bounds: (Option<&Tuple>, Option<&Tuple>),
    ) -> ChalkResult<(Tuple, Tuple, usize)> {
        let (_, tree_page) = self
            .buffer_pool
            .fetch_tree_page(page_id, self.key_schema.clone())?;

        if tree_page.parent_page_id() != expected_parent {
            return Err(ChalkError::Internal(format!(
                "Page {page_id} parent pointer {} != {expected_parent}",
                tree_page.parent_page_id()
            )));
        }
        if tree_page.page_id() != page_id {
            return Err(ChalkError::Internal(format!(
                "Page {page_id} header records id {}",
                tree_page.page_id()
            )));
        }
        if !is_root && tree_page.is_underflow(false) {
            return Err(ChalkError::Internal(format!(
                "Page {page_id} underflows: {}/{}",
                tree_page.current_size(),
                tree_page.min_size()
            )));
        }
        if tree_page.current_size() > tree_page.max_size() {
            return Err(ChalkError::Internal(format!(
                "Page {page_id} overflows: {}/{}",
                tree_page.current_size(),
                tree_page.max_size()
            )));
        }

        match tree_page {
            BPlusTreePage::Leaf(leaf) => {
                if leaf.array.is_empty() {
                    return Err(ChalkError::Internal(format!("Leaf {page_id} is empty")));
                }
                for window in leaf.array.windows(2) {
                    if window[0].0 >= window[1].0 {
                        return Err(ChalkError::Internal(format!(
                            "Leaf {page_id} keys not strictly increasing"
                        )));
                    }
                }
                let min = leaf.array.first().unwrap().0.clone();
                let max = leaf.array.last().unwrap().0.clone();
                Self::check_bounds(page_id, &min, &max, bounds)?;
                Ok((min, max, 1))
            }
            BPlusTreePage::Internal(internal) => {
                if internal.array.len() < 2 {
                    return Err(ChalkError::Internal(format!(
                        "Internal {page_id} has fewer than two children"
                    )));
                }
                for window in internal.array[1..].windows(2) {
                    if window[0].0 >= window[1].0 {
                        return Err(ChalkError::Internal(format!(
                            "Internal {page_id} keys not strictly increasing"
                        )));
                    }
                }
                let mut subtree_depth = None;
                let mut min_key: Option<Tuple> = None;
                let mut max_key: Option<Tuple> = None;
                for (idx, (key, child_id)) in internal.array.iter().enumerate() {
                    let lower = if idx == 0 { None } else { Some(key) };
                    let upper = internal.array.get(idx + 1).map(|kv| &kv.0);
                    let (child_min, child_max, child_depth) = self.validate_subtree(
                        *child_id,
                        page_id,
                        false,
                        (lower, upper),
                    )?;
                    if let Some(depth) = subtree_depth {
                        if depth != child_depth {
                            return Err(ChalkError::Internal(format!(
                                "Internal {page_id} has leaves at unequal depth"
                            )));
                        }
                    } else {
                        subtree_depth = Some(child_depth);
                    }
                    if min_key.is_none() {
                        min_key = Some(child_min);
                    }
                    max_key = Some(child_max);
                }
                let min = min_key.unwrap();
                let max = max_key.unwrap();
                Self::check_bounds(page_id, &min, &max, bounds)?;
                Ok((min, max, subtree_depth.unwrap() + 1))
            }
        }
    }

    fn check_bounds(
        page_id: PageId,
        min: &Tuple,
        max: &Tuple,
        bounds: (Option<&Tuple>, Option<&Tuple>),
    ) -> ChalkResult<()> {
        let (lower, upper) = bounds;
        if let Some(lower) = lower {
            if min < lower {
                return Err(ChalkError::Internal(format!(
                    "Page {page_id} min key below its separator"
                )));
            }
        }
        if let Some(upper) = upper {
            if max >= upper {
                return Err(ChalkError::Internal(format!(
                    "Page {page_id} max key not below the next separator"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::BPlusTreeIndex;
    use crate::buffer::{BufferPoolManager, INVALID_PAGE_ID};
    use crate::catalog::{Column, DataType, Schema, SchemaRef};
    use crate::storage::disk_manager::DiskManager;
    use crate::storage::disk_scheduler::DiskScheduler;
    use crate::storage::index::TreeIndexIterator;
    use crate::storage::page::RecordId;
    use crate::storage::tuple::Tuple;
    use crate::utils::util::pretty_format_index_tree;
    use rand::seq::SliceRandom;
    use rand::Rng;
    use std::ops::Bound;
    use std::sync::{Arc, Barrier};
    use std::thread;
    use tempfile::TempDir;

    fn build_index(leaf_max: u32, internal_max: u32, pool_size: usize) -> (TempDir, Arc<BPlusTreeIndex>, SchemaRef) {
        let temp_dir = TempDir::new().unwrap();
        let disk_manager = Arc::new(DiskManager::try_new(temp_dir.path().join("test.db")).unwrap());
        let disk_scheduler = Arc::new(DiskScheduler::new(disk_manager));
        let buffer_pool = Arc::new(BufferPoolManager::new(pool_size, disk_scheduler));
        let key_schema = Arc::new(Schema::new(vec![Column::new("id", DataType::Int64, false)]));
        let index = Arc::new(
            BPlusTreeIndex::try_new("idx_test", key_schema.clone(), buffer_pool, leaf_max, internal_max)
                .unwrap(),
        );
        (temp_dir, index, key_schema)
    }

    fn key(schema: &SchemaRef, v: i64) -> Tuple {
        Tuple::new(schema.clone(), vec![v.into()])
    }

    fn rid(v: i64) -> RecordId {
        RecordId::new(v as u32, v as u32)
    }

    fn collect_all(index: &Arc<BPlusTreeIndex>) -> Vec<RecordId> {
        let mut iterator = TreeIndexIterator::new(index.clone(), ..);
        let mut out = vec![];
        while let Some(record) = iterator.next().unwrap() {
            out.push(record);
        }
        out
    }

    #[test]
    fn insert_and_get() {
        let (_temp_dir, index, schema) = build_index(4, 4, 100);

        for v in 1..=11i64 {
            assert!(index.insert(&key(&schema, v), rid(v)).unwrap());
        }
        index.validate_integrity().unwrap();

        for v in 1..=11i64 {
            assert_eq!(index.get(&key(&schema, v)).unwrap(), Some(rid(v)));
        }
        assert_eq!(index.get(&key(&schema, 99)).unwrap(), None);

        // Unique keys only.
        assert!(!index.insert(&key(&schema, 5), rid(50)).unwrap());
        assert_eq!(index.get(&key(&schema, 5)).unwrap(), Some(rid(5)));
    }

    #[test]
    fn split_cascade_keeps_order_and_depth() {
        let (_temp_dir, index, schema) = build_index(4, 4, 100);

        for v in 1..=20i64 {
            assert!(index.insert(&key(&schema, v), rid(v)).unwrap());
            index.validate_integrity().unwrap();
        }
        println!("{}", pretty_format_index_tree(&index).unwrap());

        let all = collect_all(&index);
        let expected: Vec<RecordId> = (1..=20).map(rid).collect();
        assert_eq!(all, expected);
    }

    #[test]
    fn coalesce_cascade_down_to_empty() {
        let (_temp_dir, index, schema) = build_index(4, 4, 100);

        for v in 1..=20i64 {
            index.insert(&key(&schema, v), rid(v)).unwrap();
        }
        for v in (1..=20i64).rev() {
            index.remove(&key(&schema, v)).unwrap();
            index.validate_integrity().unwrap();
            assert_eq!(index.get(&key(&schema, v)).unwrap(), None);
        }
        assert!(index.is_empty());
        assert_eq!(index.root_page_id(), INVALID_PAGE_ID);
    }

    #[test]
    fn insert_then_remove_leaves_empty_tree() {
        let (_temp_dir, index, schema) = build_index(4, 4, 100);

        assert!(index.insert(&key(&schema, 7), rid(7)).unwrap());
        index.remove(&key(&schema, 7)).unwrap();
        assert_eq!(index.get(&key(&schema, 7)).unwrap(), None);
        assert_eq!(index.root_page_id(), INVALID_PAGE_ID);

        // Removing from the empty tree is a no-op.
        index.remove(&key(&schema, 7)).unwrap();
        assert!(index.is_empty());
    }

    #[test]
    fn random_order_insert_delete() {
        let (_temp_dir, index, schema) = build_index(5, 5, 500);
        let mut rng = rand::rng();

        let mut keys: Vec<i64> = (0..300).collect();
        keys.shuffle(&mut rng);
        for &v in keys.iter() {
            index.insert(&key(&schema, v), rid(v)).unwrap();
        }
        index.validate_integrity().unwrap();
        assert_eq!(collect_all(&index).len(), 300);

        keys.shuffle(&mut rng);
        for &v in keys.iter() {
            index.remove(&key(&schema, v)).unwrap();
            index.validate_integrity().unwrap();
        }
        assert!(index.is_empty());
    }

    #[test]
    fn iterator_ranges() {
        let (_temp_dir, index, schema) = build_index(4, 4, 100);
        for v in 1..=11i64 {
            index.insert(&key(&schema, v), rid(v)).unwrap();
        }

        let mut iterator = TreeIndexIterator::new(index.clone(), ..key(&schema, 3));
        assert_eq!(iterator.next().unwrap(), Some(rid(1)));
        assert_eq!(iterator.next().unwrap(), Some(rid(2)));
        assert_eq!(iterator.next().unwrap(), None);

        let mut iterator =
            TreeIndexIterator::new(index.clone(), key(&schema, 3)..=key(&schema, 5));
        assert_eq!(iterator.next().unwrap(), Some(rid(3)));
        assert_eq!(iterator.next().unwrap(), Some(rid(4)));
        assert_eq!(iterator.next().unwrap(), Some(rid(5)));
        assert_eq!(iterator.next().unwrap(), None);

        let mut iterator = TreeIndexIterator::new(
            index.clone(),
            (
                Bound::Excluded(key(&schema, 6)),
                Bound::Excluded(key(&schema, 8)),
            ),
        );
        assert_eq!(iterator.next().unwrap(), Some(rid(7)));
        assert_eq!(iterator.next().unwrap(), None);

        let mut iterator = TreeIndexIterator::new(index.clone(), key(&schema, 9)..);
        assert_eq!(iterator.next().unwrap(), Some(rid(9)));
        assert_eq!(iterator.next().unwrap(), Some(rid(10)));
        assert_eq!(iterator.next().unwrap(), Some(rid(11)));
        assert_eq!(iterator.next().unwrap(), None);
        assert_eq!(iterator.next().unwrap(), None);
    }

    #[test]
    fn concurrent_insert_disjoint_ranges() {
        const NUM_THREADS: usize = 8;
        const KEYS_PER_THREAD: i64 = 1000;
        const TOTAL_KEYS: i64 = NUM_THREADS as i64 * KEYS_PER_THREAD;

        let (_temp_dir, index, schema) = build_index(10, 10, 4000);
        let barrier = Arc::new(Barrier::new(NUM_THREADS));

        let mut handles = vec![];
        for thread_index in 0..NUM_THREADS {
            let index = index.clone();
            let schema = schema.clone();
            let barrier = barrier.clone();
            handles.push(thread::spawn(move || {
                let start = thread_index as i64 * KEYS_PER_THREAD;
                barrier.wait();
                for v in start..start + KEYS_PER_THREAD {
                    assert!(index.insert(&key(&schema, v), rid(v)).unwrap());
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        index.validate_integrity().unwrap();
        for v in 0..TOTAL_KEYS {
            assert_eq!(index.get(&key(&schema, v)).unwrap(), Some(rid(v)));
        }
        let all = collect_all(&index);
        let expected: Vec<RecordId> = (0..TOTAL_KEYS).map(rid).collect();
        assert_eq!(all, expected);
    }

    #[test]
    fn concurrent_get_under_load() {
        let (_temp_dir, index, schema) = build_index(10, 10, 2000);
        for v in 0..1000i64 {
            index.insert(&key(&schema, v), rid(v)).unwrap();
        }

        let mut handles = vec![];
        for _ in 0..10 {
            let index = index.clone();
            let schema = schema.clone();
            handles.push(thread::spawn(move || {
                let mut rng = rand::rng();
                for _ in 0..1000 {
                    let v = rng.random_range(0..1000i64);
                    assert_eq!(index.get(&key(&schema, v)).unwrap(), Some(rid(v)));
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
    }

    #[test]
    fn concurrent_insert_then_delete_all() {
        const NUM_THREADS: usize = 4;
        const TOTAL_KEYS: i64 = 2000;

        let (_temp_dir, index, schema) = build_index(10, 10, 3000);

        let barrier = Arc::new(Barrier::new(NUM_THREADS));
        let mut handles = vec![];
        for thread_index in 0..NUM_THREADS {
            let index = index.clone();
            let schema = schema.clone();
            let barrier = barrier.clone();
            handles.push(thread::spawn(move || {
                let per_thread = TOTAL_KEYS / NUM_THREADS as i64;
                let start = thread_index as i64 * per_thread;
                barrier.wait();
                for v in start..start + per_thread {
                    index.insert(&key(&schema, v), rid(v)).unwrap();
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        index.validate_integrity().unwrap();

        let mut keys_to_delete: Vec<i64> = (0..TOTAL_KEYS).collect();
        keys_to_delete.shuffle(&mut rand::rng());
        let keys_to_delete = Arc::new(keys_to_delete);

        let barrier = Arc::new(Barrier::new(NUM_THREADS));
        let mut handles = vec![];
        for thread_index in 0..NUM_THREADS {
            let index = index.clone();
            let schema = schema.clone();
            let barrier = barrier.clone();
            let keys_to_delete = keys_to_delete.clone();
            handles.push(thread::spawn(move || {
                let per_thread = TOTAL_KEYS as usize / NUM_THREADS;
                let start = thread_index * per_thread;
                barrier.wait();
                for &v in &keys_to_delete[start..start + per_thread] {
                    index.remove(&key(&schema, v)).unwrap();
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        for v in 0..TOTAL_KEYS {
            assert_eq!(index.get(&key(&schema, v)).unwrap(), None);
        }
        assert!(index.is_empty());
    }

    #[test]
    fn root_survives_reopen_through_directory() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("test.db");
        let key_schema: SchemaRef =
            Arc::new(Schema::new(vec![Column::new("id", DataType::Int64, false)]));

        {
            let disk_manager = Arc::new(DiskManager::try_new(&path).unwrap());
            let disk_scheduler = Arc::new(DiskScheduler::new(disk_manager));
            let buffer_pool = Arc::new(BufferPoolManager::new(100, disk_scheduler));
            let index =
                BPlusTreeIndex::try_new("idx_persist", key_schema.clone(), buffer_pool.clone(), 4, 4)
                    .unwrap();
            for v in 1..=10i64 {
                index.insert(&key(&key_schema, v), rid(v)).unwrap();
            }
            buffer_pool.flush_all_pages().unwrap();
        }

        let disk_manager = Arc::new(DiskManager::try_new(&path).unwrap());
        let disk_scheduler = Arc::new(DiskScheduler::new(disk_manager));
        let buffer_pool = Arc::new(BufferPoolManager::new(100, disk_scheduler));
        let index =
            BPlusTreeIndex::try_new("idx_persist", key_schema.clone(), buffer_pool, 4, 4).unwrap();
        assert!(!index.is_empty());
        for v in 1..=10i64 {
            assert_eq!(index.get(&key(&key_schema, v)).unwrap(), Some(rid(v)));
        }
    }
}
