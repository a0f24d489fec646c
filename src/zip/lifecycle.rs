//! Resources owned by one open archive handle and their teardown.
//!
//! A handle owns a lease on a [`CentralDirectory`] (possibly shared with
//! other handles through an [`ArchiveRegistry`]), a pool of idle inflaters
//! and the set of streams it has handed out. Closing the handle, explicitly
//! or by dropping it, releases all three exactly once.

use flate2::Decompress;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::trace;

use crate::error::{Result, ZipError};

use super::index::CentralDirectory;
use super::registry::ArchiveRegistry;

/// A handle's claim on an index. Releasing it either hands the index back to
/// the registry it came from or closes it outright.
pub(crate) struct IndexLease {
    index: Arc<CentralDirectory>,
    registry: Option<Arc<ArchiveRegistry>>,
}

impl IndexLease {
    pub(crate) fn unshared(index: Arc<CentralDirectory>) -> Self {
        Self {
            index,
            registry: None,
        }
    }

    pub(crate) fn shared(index: Arc<CentralDirectory>, registry: Arc<ArchiveRegistry>) -> Self {
        Self {
            index,
            registry: Some(registry),
        }
    }

    fn release(&self) -> Result<()> {
        match &self.registry {
            Some(registry) => registry.release(&self.index),
            None => self.index.close(),
        }
    }
}

pub(crate) struct ResourceLifecycle {
    lease: IndexLease,
    closed: AtomicBool,
    /// Idle inflaters; `None` once the pool has been torn down.
    inflaters: Mutex<Option<Vec<Decompress>>>,
    streams: Mutex<HashMap<u64, Weak<StreamSlot>>>,
    next_stream: AtomicU64,
}

impl ResourceLifecycle {
    pub(crate) fn new(lease: IndexLease) -> Arc<Self> {
        Arc::new(Self {
            lease,
            closed: AtomicBool::new(false),
            inflaters: Mutex::new(Some(Vec::new())),
            streams: Mutex::new(HashMap::new()),
            next_stream: AtomicU64::new(0),
        })
    }

    pub(crate) fn index(&self) -> &Arc<CentralDirectory> {
        &self.lease.index
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// An idle inflater from the pool, or a fresh raw-deflate one.
    pub(crate) fn take_inflater(&self) -> Decompress {
        self.inflaters
            .lock()
            .as_mut()
            .and_then(Vec::pop)
            .unwrap_or_else(|| Decompress::new(false))
    }

    /// Return an inflater for reuse. After teardown it is simply dropped.
    fn release_inflater(&self, mut inflater: Decompress) {
        if let Some(pool) = self.inflaters.lock().as_mut() {
            inflater.reset(false);
            pool.push(inflater);
        }
    }

    /// Track a new stream, handing it `inflater` if it decompresses.
    pub(crate) fn register(
        self: &Arc<Self>,
        inflater: Option<Decompress>,
    ) -> Result<Arc<StreamSlot>> {
        let mut streams = self.streams.lock();
        // checked under the lock so teardown cannot miss the new stream
        if self.is_closed() {
            return Err(ZipError::Closed("zip file closed"));
        }
        let id = self.next_stream.fetch_add(1, Ordering::Relaxed);
        let slot = Arc::new(StreamSlot {
            id,
            closed: AtomicBool::new(false),
            inflater: Mutex::new(inflater),
            owner: Arc::clone(self),
        });
        streams.insert(id, Arc::downgrade(&slot));
        trace!(stream = id, open = streams.len(), "opened entry stream");
        Ok(slot)
    }

    #[cfg(test)]
    pub(crate) fn open_streams(&self) -> usize {
        self.streams.lock().len()
    }

    #[cfg(test)]
    pub(crate) fn idle_inflaters(&self) -> usize {
        self.inflaters.lock().as_ref().map_or(0, Vec::len)
    }

    /// Release everything, once. Later calls return `Ok(())`.
    pub(crate) fn close(&self) -> Result<()> {
        {
            // Mark closed while holding the stream lock so no stream can be
            // registered after the snapshot below.
            let _streams = self.streams.lock();
            if self.closed.swap(true, Ordering::AcqRel) {
                return Ok(());
            }
        }

        // End the pooled inflaters; streams that finish later drop theirs.
        let idle = self.inflaters.lock().take();
        drop(idle);

        let open: Vec<Arc<StreamSlot>> = self
            .streams
            .lock()
            .drain()
            .filter_map(|(_, slot)| slot.upgrade())
            .collect();
        for slot in open {
            slot.close();
        }

        let mut errors = Vec::new();
        if let Err(e) = self.lease.release() {
            errors.push(e);
        }
        ZipError::aggregate(errors)
    }
}

/// The shared half of an entry stream: what teardown needs to close it from
/// another thread.
pub(crate) struct StreamSlot {
    id: u64,
    closed: AtomicBool,
    inflater: Mutex<Option<Decompress>>,
    owner: Arc<ResourceLifecycle>,
}

impl StreamSlot {
    pub(crate) fn owner(&self) -> &Arc<ResourceLifecycle> {
        &self.owner
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn inflater(&self) -> &Mutex<Option<Decompress>> {
        &self.inflater
    }

    /// Close the stream, returning its inflater to the pool. Idempotent.
    pub(crate) fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(inflater) = self.inflater.lock().take() {
            self.owner.release_inflater(inflater);
        }
        self.owner.streams.lock().remove(&self.id);
        trace!(stream = self.id, "closed entry stream");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::MemorySource;
    use crate::zip::OpenOptions;

    fn lifecycle() -> Arc<ResourceLifecycle> {
        // a lone END record: an empty archive
        let mut end = vec![0u8; 22];
        end[..4].copy_from_slice(&0x0605_4b50u32.to_le_bytes());
        let index = CentralDirectory::from_source(
            Arc::new(MemorySource::new(end)),
            "empty.zip".to_string(),
            &OpenOptions::default(),
            None,
        )
        .unwrap();
        ResourceLifecycle::new(IndexLease::unshared(Arc::new(index)))
    }

    #[test]
    fn closing_a_stream_pools_its_inflater() {
        let lc = lifecycle();
        let slot = lc.register(Some(lc.take_inflater())).unwrap();
        assert_eq!(lc.open_streams(), 1);
        assert_eq!(lc.idle_inflaters(), 0);

        slot.close();
        slot.close();
        assert_eq!(lc.open_streams(), 0);
        assert_eq!(lc.idle_inflaters(), 1);

        // reused rather than allocated
        let _reused = lc.take_inflater();
        assert_eq!(lc.idle_inflaters(), 0);
    }

    #[test]
    fn teardown_closes_streams_and_empties_pool() {
        let lc = lifecycle();
        let idle = lc.register(Some(lc.take_inflater())).unwrap();
        idle.close();
        let live = lc.register(Some(lc.take_inflater())).unwrap();
        let stored = lc.register(None).unwrap();

        lc.close().unwrap();
        assert!(lc.is_closed());
        assert!(live.is_closed());
        assert!(stored.is_closed());
        assert!(live.inflater().lock().is_none());
        assert_eq!(lc.idle_inflaters(), 0);
        assert_eq!(lc.open_streams(), 0);

        // second close is a no-op
        lc.close().unwrap();
        assert!(matches!(lc.register(None), Err(ZipError::Closed(_))));
    }
}
