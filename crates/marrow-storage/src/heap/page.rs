//! Slotted heap page.
//!
//! Layout within a PAGE_SIZE buffer:
//!
//! ```text
//! +--------+------------------+---------~~~---------+-------------+
//! | header | slot directory → |     free space      | ← tuple data|
//! +--------+------------------+---------~~~---------+-------------+
//! ```
//!
//! Header (8 bytes): slot_count u16 | tuple_data_start u16 |
//! dead_count u16 | reserved u16. Slot entries (6 bytes each):
//! offset u16 | len u16 | state u8 | pad u8. All little-endian.
//!
//! Slot numbers are stable for the lifetime of the page: delete marks a
//! slot tombstoned, in-page compaction reclaims its storage but keeps
//! the slot entry so rids pointing at other slots stay valid. Only
//! vacuum renumbers, by rebuilding pages from scratch.

use marrow_common::page::PAGE_SIZE;
use marrow_common::{MarrowError, Result};

const HEADER_SIZE: usize = 8;
const SLOT_SIZE: usize = 6;

/// Lifecycle state of a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SlotState {
    /// Storage reclaimed, slot entry reusable.
    Reclaimed = 0,
    /// Live tuple.
    Active = 1,
    /// Deleted, storage not yet reclaimed.
    Tombstoned = 2,
}

impl SlotState {
    fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(SlotState::Reclaimed),
            1 => Some(SlotState::Active),
            2 => Some(SlotState::Tombstoned),
            _ => None,
        }
    }
}

/// A slotted page holding variable-length tuples.
#[derive(Debug)]
pub struct HeapPage {
    data: Box<[u8; PAGE_SIZE]>,
}

impl HeapPage {
    /// Creates an empty page.
    pub fn new() -> Self {
        let mut page = Self {
            data: Box::new([0u8; PAGE_SIZE]),
        };
        page.set_slot_count(0);
        page.set_tuple_data_start(PAGE_SIZE as u16);
        page.set_dead_count(0);
        page
    }

    /// Largest tuple an empty page can hold.
    pub fn capacity() -> usize {
        PAGE_SIZE - HEADER_SIZE - SLOT_SIZE
    }

    /// Creates a page from raw bytes, validating the header and slot
    /// directory so corrupt on-disk pages surface as errors instead of
    /// arithmetic panics later. `page_num` identifies the page in the
    /// corruption report.
    pub fn from_bytes(page_num: u32, bytes: &[u8]) -> Result<Self> {
        let mut data = Box::new([0u8; PAGE_SIZE]);
        let len = bytes.len().min(PAGE_SIZE);
        data[..len].copy_from_slice(&bytes[..len]);
        let page = Self { data };

        let corrupt = |reason: String| MarrowError::PageCorrupted {
            page_id: page_num as u64,
            reason,
        };

        let dir_end = HEADER_SIZE + page.slot_count() as usize * SLOT_SIZE;
        if dir_end > PAGE_SIZE {
            return Err(corrupt(format!(
                "slot directory overruns page ({} slots)",
                page.slot_count()
            )));
        }
        let data_start = page.tuple_data_start() as usize;
        if data_start < dir_end || data_start > PAGE_SIZE {
            return Err(corrupt(format!(
                "tuple data start {} outside [{}, {}]",
                data_start, dir_end, PAGE_SIZE
            )));
        }

        let mut dead = 0u16;
        for slot in 0..page.slot_count() {
            let base = Self::slot_entry_offset(slot);
            let offset = page.read_u16(base) as usize;
            let tuple_len = page.read_u16(base + 2) as usize;
            let state = SlotState::from_byte(page.data[base + 4])
                .ok_or_else(|| corrupt(format!("bad state byte for slot {}", slot)))?;
            match state {
                SlotState::Reclaimed => {}
                SlotState::Active | SlotState::Tombstoned => {
                    if offset < data_start || offset + tuple_len > PAGE_SIZE {
                        return Err(corrupt(format!(
                            "slot {} points outside the data region",
                            slot
                        )));
                    }
                    if state == SlotState::Tombstoned {
                        dead += 1;
                    }
                }
            }
        }
        if dead != page.dead_count() {
            return Err(corrupt(format!(
                "dead count {} disagrees with {} tombstoned slots",
                page.dead_count(),
                dead
            )));
        }

        Ok(page)
    }

    /// Returns the raw page bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data[..]
    }

    fn read_u16(&self, offset: usize) -> u16 {
        u16::from_le_bytes([self.data[offset], self.data[offset + 1]])
    }

    fn write_u16(&mut self, offset: usize, value: u16) {
        self.data[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
    }

    /// Number of slots in the directory (including dead ones).
    pub fn slot_count(&self) -> u16 {
        self.read_u16(0)
    }

    fn set_slot_count(&mut self, count: u16) {
        self.write_u16(0, count);
    }

    fn tuple_data_start(&self) -> u16 {
        self.read_u16(2)
    }

    fn set_tuple_data_start(&mut self, offset: u16) {
        self.write_u16(2, offset);
    }

    /// Number of tombstoned slots.
    pub fn dead_count(&self) -> u16 {
        self.read_u16(4)
    }

    fn set_dead_count(&mut self, count: u16) {
        self.write_u16(4, count);
    }

    fn slot_entry_offset(slot: u16) -> usize {
        HEADER_SIZE + slot as usize * SLOT_SIZE
    }

    fn read_slot(&self, slot: u16) -> Option<(u16, u16, SlotState)> {
        if slot >= self.slot_count() {
            return None;
        }
        let base = Self::slot_entry_offset(slot);
        let offset = self.read_u16(base);
        let len = self.read_u16(base + 2);
        let state = SlotState::from_byte(self.data[base + 4])?;
        Some((offset, len, state))
    }

    fn write_slot(&mut self, slot: u16, offset: u16, len: u16, state: SlotState) {
        let base = Self::slot_entry_offset(slot);
        self.write_u16(base, offset);
        self.write_u16(base + 2, len);
        self.data[base + 4] = state as u8;
        self.data[base + 5] = 0;
    }

    /// Returns the state of a slot.
    pub fn slot_state(&self, slot: u16) -> Option<SlotState> {
        self.read_slot(slot).map(|(_, _, state)| state)
    }

    /// Bytes available for a new tuple, accounting for a fresh slot entry.
    pub fn free_space(&self) -> usize {
        let dir_end = HEADER_SIZE + self.slot_count() as usize * SLOT_SIZE;
        let free_region = self.tuple_data_start() as usize - dir_end;
        free_region.saturating_sub(SLOT_SIZE)
    }

    /// Bytes held by tombstoned tuples, recoverable by [`compact`].
    ///
    /// [`compact`]: HeapPage::compact
    pub fn dead_space(&self) -> usize {
        (0..self.slot_count())
            .filter_map(|slot| self.read_slot(slot))
            .filter(|(_, _, state)| *state == SlotState::Tombstoned)
            .map(|(_, len, _)| len as usize)
            .sum()
    }

    fn find_reclaimed_slot(&self) -> Option<u16> {
        (0..self.slot_count()).find(|&slot| self.slot_state(slot) == Some(SlotState::Reclaimed))
    }

    /// Inserts a tuple, returning its slot number.
    pub fn insert(&mut self, tuple: &[u8]) -> Result<u16> {
        let len = tuple.len();
        let dir_end = HEADER_SIZE + self.slot_count() as usize * SLOT_SIZE;
        let free_region = self.tuple_data_start() as usize - dir_end;

        let reuse = self.find_reclaimed_slot();
        let needed = if reuse.is_some() { len } else { len + SLOT_SIZE };
        if needed > free_region {
            return Err(MarrowError::PageFull);
        }

        let new_start = self.tuple_data_start() as usize - len;
        self.data[new_start..new_start + len].copy_from_slice(tuple);
        self.set_tuple_data_start(new_start as u16);

        let slot = match reuse {
            Some(slot) => slot,
            None => {
                let slot = self.slot_count();
                self.set_slot_count(slot + 1);
                slot
            }
        };
        self.write_slot(slot, new_start as u16, len as u16, SlotState::Active);
        Ok(slot)
    }

    /// Returns the tuple bytes for an active slot.
    pub fn get(&self, slot: u16) -> Option<&[u8]> {
        let (offset, len, state) = self.read_slot(slot)?;
        if state != SlotState::Active {
            return None;
        }
        let start = offset as usize;
        let end = start + len as usize;
        if end > PAGE_SIZE {
            return None;
        }
        Some(&self.data[start..end])
    }

    /// Marks an active slot as tombstoned.
    ///
    /// Returns false if the slot does not exist or is not active.
    pub fn tombstone(&mut self, slot: u16) -> bool {
        match self.read_slot(slot) {
            Some((offset, len, SlotState::Active)) => {
                self.write_slot(slot, offset, len, SlotState::Tombstoned);
                self.set_dead_count(self.dead_count() + 1);
                true
            }
            _ => false,
        }
    }

    /// Reclaims tombstoned storage by rewriting the data region.
    ///
    /// Slot numbers are preserved; tombstoned slots become reclaimed.
    /// Returns the number of slots reclaimed.
    pub fn compact(&mut self) -> usize {
        let slot_count = self.slot_count();
        let mut live: Vec<(u16, Vec<u8>)> = Vec::new();
        let mut reclaimed = 0;

        for slot in 0..slot_count {
            match self.read_slot(slot) {
                Some((_, _, SlotState::Active)) => {
                    if let Some(bytes) = self.get(slot) {
                        live.push((slot, bytes.to_vec()));
                    }
                }
                Some((_, _, SlotState::Tombstoned)) => {
                    self.write_slot(slot, 0, 0, SlotState::Reclaimed);
                    reclaimed += 1;
                }
                _ => {}
            }
        }

        let mut data_start = PAGE_SIZE;
        for (slot, bytes) in live {
            data_start -= bytes.len();
            self.data[data_start..data_start + bytes.len()].copy_from_slice(&bytes);
            self.write_slot(slot, data_start as u16, bytes.len() as u16, SlotState::Active);
        }
        self.set_tuple_data_start(data_start as u16);
        self.set_dead_count(0);
        reclaimed
    }

    /// Iterates over active slots as (slot, tuple bytes).
    pub fn iter_active(&self) -> impl Iterator<Item = (u16, &[u8])> {
        (0..self.slot_count()).filter_map(move |slot| self.get(slot).map(|bytes| (slot, bytes)))
    }
}

impl Default for HeapPage {
    fn default() -> Self {
        Self::new()
    }
}
