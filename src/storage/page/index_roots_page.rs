use crate::buffer::PageId;
use crate::error::{ChalkError, ChalkResult};

/// The persistent index-name -> root page id map living on the reserved
/// directory page. Every index records its root here and rewrites the record
/// whenever the root changes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexRootsPage {
    pub records: Vec<(String, PageId)>,
}

impl IndexRootsPage {
    pub fn insert_record(&mut self, name: &str, root_page_id: PageId) -> ChalkResult<()> {
        if self.records.iter().any(|(n, _)| n == name) {
            return Err(ChalkError::OutOfRange(format!(
                "Index {name} already registered"
            )));
        }
        self.records.push((name.to_string(), root_page_id));
        Ok(())
    }

    pub fn update_record(&mut self, name: &str, root_page_id: PageId) -> ChalkResult<()> {
        let record = self
            .records
            .iter_mut()
            .find(|(n, _)| n == name)
            .ok_or_else(|| ChalkError::NotFound(format!("Index {name} not registered")))?;
        record.1 = root_page_id;
        Ok(())
    }

    pub fn get_root_id(&self, name: &str) -> Option<PageId> {
        self.records
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, root)| *root)
    }
}

#[cfg(test)]
mod tests {
    use super::IndexRootsPage;

    #[test]
    fn insert_update_get() {
        let mut page = IndexRootsPage::default();
        page.insert_record("idx_a", 3).unwrap();
        page.insert_record("idx_b", 5).unwrap();
        assert!(page.insert_record("idx_a", 9).is_err());

        assert_eq!(page.get_root_id("idx_a"), Some(3));
        page.update_record("idx_a", 7).unwrap();
        assert_eq!(page.get_root_id("idx_a"), Some(7));
        assert!(page.update_record("missing", 1).is_err());
        assert_eq!(page.get_root_id("missing"), None);
    }
}
