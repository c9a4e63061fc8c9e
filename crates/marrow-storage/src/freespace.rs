//! In-memory free space map for heap files.

use std::collections::BTreeMap;

/// Tracks free bytes per heap page.
///
/// The map is never persisted: it is rebuilt by scanning the file on
/// open, so it cannot go stale across restarts. Entries are advisory;
/// the page itself is the source of truth and callers retry on a stale
/// hit.
#[derive(Debug, Default)]
pub struct FreeSpaceMap {
    /// Free bytes per page number. BTreeMap keeps lookups deterministic:
    /// first fit always picks the lowest-numbered page.
    free_bytes: BTreeMap<u32, usize>,
}

impl FreeSpaceMap {
    /// Creates an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the lowest-numbered page with at least `needed` free bytes.
    pub fn find_page_with_space(&self, needed: usize) -> Option<u32> {
        self.free_bytes
            .iter()
            .find(|(_, &free)| free >= needed)
            .map(|(&page_num, _)| page_num)
    }

    /// Records the free bytes for a page.
    pub fn update(&mut self, page_num: u32, free: usize) {
        self.free_bytes.insert(page_num, free);
    }

    /// Removes a page from the map.
    pub fn remove(&mut self, page_num: u32) {
        self.free_bytes.remove(&page_num);
    }

    /// Returns the tracked free bytes for a page.
    pub fn free_bytes(&self, page_num: u32) -> Option<usize> {
        self.free_bytes.get(&page_num).copied()
    }

    /// Drops all entries.
    pub fn clear(&mut self) {
        self.free_bytes.clear();
    }

    /// Number of tracked pages.
    pub fn len(&self) -> usize {
        self.free_bytes.len()
    }

    /// Returns true if no pages are tracked.
    pub fn is_empty(&self) -> bool {
        self.free_bytes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fsm_empty() {
        let fsm = FreeSpaceMap::new();
        assert!(fsm.is_empty());
        assert_eq!(fsm.find_page_with_space(1), None);
    }

    #[test]
    fn test_fsm_first_fit_lowest_page() {
        let mut fsm = FreeSpaceMap::new();
        fsm.update(3, 500);
        fsm.update(1, 500);
        fsm.update(2, 100);

        assert_eq!(fsm.find_page_with_space(200), Some(1));
        assert_eq!(fsm.find_page_with_space(50), Some(1));
    }

    #[test]
    fn test_fsm_skips_too_small() {
        let mut fsm = FreeSpaceMap::new();
        fsm.update(1, 100);
        fsm.update(2, 400);

        assert_eq!(fsm.find_page_with_space(300), Some(2));
        assert_eq!(fsm.find_page_with_space(500), None);
    }

    #[test]
    fn test_fsm_update_overwrites() {
        let mut fsm = FreeSpaceMap::new();
        fsm.update(1, 400);
        fsm.update(1, 10);

        assert_eq!(fsm.free_bytes(1), Some(10));
        assert_eq!(fsm.find_page_with_space(100), None);
    }

    #[test]
    fn test_fsm_remove() {
        let mut fsm = FreeSpaceMap::new();
        fsm.update(1, 400);
        fsm.remove(1);

        assert!(fsm.is_empty());
        assert_eq!(fsm.free_bytes(1), None);
    }

    #[test]
    fn test_fsm_clear() {
        let mut fsm = FreeSpaceMap::new();
        fsm.update(1, 100);
        fsm.update(2, 200);
        fsm.clear();
        assert_eq!(fsm.len(), 0);
    }
}
