//! Page replacement policies for the buffer pool.

use crate::frame::FrameId;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};

/// Trait for page replacement algorithms.
pub trait Replacer: Send + Sync {
    /// Records that the given frame was accessed.
    fn record_access(&self, frame_id: FrameId);

    /// Marks a frame as evictable (unpinned) or not.
    fn set_evictable(&self, frame_id: FrameId, evictable: bool);

    /// Selects a victim frame for eviction.
    ///
    /// Returns None if no frames are evictable.
    fn evict(&self) -> Option<FrameId>;

    /// Removes a frame from the replacer.
    fn remove(&self, frame_id: FrameId);

    /// Returns the number of evictable frames.
    fn size(&self) -> usize;
}

/// Least-recently-used replacement.
///
/// Each access stamps the frame with a monotonically increasing counter;
/// eviction picks the evictable frame with the smallest stamp. A frame
/// that was never accessed counts as older than any accessed frame.
#[derive(Debug)]
pub struct LruReplacer {
    /// Internal state protected by mutex.
    inner: Mutex<LruReplacerInner>,
}

#[derive(Debug)]
struct LruReplacerInner {
    /// Total number of frames.
    num_frames: usize,
    /// Monotonic access counter.
    counter: u64,
    /// Last access stamp per frame.
    last_access: HashMap<FrameId, u64>,
    /// Set of evictable frame IDs.
    evictable: HashSet<FrameId>,
}

impl LruReplacer {
    /// Creates a new LRU replacer with the given number of frames.
    pub fn new(num_frames: usize) -> Self {
        Self {
            inner: Mutex::new(LruReplacerInner {
                num_frames,
                counter: 0,
                last_access: HashMap::new(),
                evictable: HashSet::new(),
            }),
        }
    }

    /// Returns the total capacity.
    pub fn capacity(&self) -> usize {
        self.inner.lock().num_frames
    }
}

impl Replacer for LruReplacer {
    fn record_access(&self, frame_id: FrameId) {
        let mut inner = self.inner.lock();
        if (frame_id.0 as usize) < inner.num_frames {
            inner.counter += 1;
            let stamp = inner.counter;
            inner.last_access.insert(frame_id, stamp);
        }
    }

    fn set_evictable(&self, frame_id: FrameId, evictable: bool) {
        let mut inner = self.inner.lock();
        if (frame_id.0 as usize) >= inner.num_frames {
            return;
        }

        if evictable {
            inner.evictable.insert(frame_id);
        } else {
            inner.evictable.remove(&frame_id);
        }
    }

    fn evict(&self) -> Option<FrameId> {
        let mut inner = self.inner.lock();

        let victim = inner
            .evictable
            .iter()
            .min_by_key(|fid| inner.last_access.get(fid).copied().unwrap_or(0))
            .copied()?;

        inner.evictable.remove(&victim);
        inner.last_access.remove(&victim);
        Some(victim)
    }

    fn remove(&self, frame_id: FrameId) {
        let mut inner = self.inner.lock();
        inner.evictable.remove(&frame_id);
        inner.last_access.remove(&frame_id);
    }

    fn size(&self) -> usize {
        self.inner.lock().evictable.len()
    }
}
