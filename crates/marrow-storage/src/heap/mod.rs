//! Heap file storage: slotted pages with tombstone deletes and vacuum.

mod file;
mod page;

pub use file::{HeapFile, ScanAll, VacuumStats};
pub use page::{HeapPage, SlotState};
