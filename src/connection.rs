//! Shared, lazily-built store connection.
//!
//! [`ConnectionManager`] owns at most one live [`Transport`]. `acquire`
//! builds it on first use (or after it was closed). After a
//! connection-level failure the caller hands back the transport that failed
//! to `discard`, which only tears it down if it is still the current one, so
//! a replacement another task already built survives. Construction and
//! teardown happen in a single critical section, so concurrent tool
//! invocations never build two clients.
//!
//! ```text
//! acquire: read slot ──live──▶ return
//!              │
//!            empty/closed
//!              ▼
//!          lock ─▶ re-check ─▶ factory.connect() ─▶ store ─▶ return
//!
//! discard: lock ─▶ slot is failed? ─yes─▶ take slot ─▶ close
//! reset:   lock ─▶ take slot ─▶ close
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use tokio::sync::Mutex;

use crate::error::StoreError;
use crate::transport::{Transport, TransportFactory};

pub struct ConnectionManager {
    factory: Arc<dyn TransportFactory>,
    /// Fast-path slot; the lock is never held across an await.
    current: RwLock<Option<Arc<dyn Transport>>>,
    /// Serializes construct and close-discard.
    critical: Mutex<()>,
    generation: AtomicU64,
}

impl ConnectionManager {
    pub fn new(factory: Arc<dyn TransportFactory>) -> Self {
        Self {
            factory,
            current: RwLock::new(None),
            critical: Mutex::new(()),
            generation: AtomicU64::new(0),
        }
    }

    /// Returns the shared transport, building it if absent or closed.
    pub async fn acquire(&self) -> Result<Arc<dyn Transport>, StoreError> {
        if let Some(live) = self.live() {
            return Ok(live);
        }

        let _guard = self.critical.lock().await;
        if let Some(live) = self.live() {
            return Ok(live);
        }

        let transport = self.factory.connect()?;
        *self.slot_mut() = Some(transport.clone());
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        tracing::debug!(generation, "document store client created");
        Ok(transport)
    }

    /// Closes and discards the current transport. Safe when none exists.
    pub async fn reset(&self) {
        let _guard = self.critical.lock().await;
        let previous = self.slot_mut().take();
        if let Some(transport) = previous {
            transport.close().await;
            tracing::debug!("document store client discarded");
        }
    }

    /// Closes and discards `failed` if it is still the current transport.
    /// Returns whether anything was discarded.
    pub async fn discard(&self, failed: &Arc<dyn Transport>) -> bool {
        let _guard = self.critical.lock().await;
        let previous = {
            let mut slot = self.slot_mut();
            match slot.as_ref() {
                Some(current) if Arc::ptr_eq(current, failed) => slot.take(),
                _ => None,
            }
        };
        match previous {
            Some(transport) => {
                transport.close().await;
                tracing::debug!("document store client discarded");
                true
            }
            None => false,
        }
    }

    /// Number of transports built so far.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    fn live(&self) -> Option<Arc<dyn Transport>> {
        let slot = match self.current.read() {
            Ok(slot) => slot,
            Err(poisoned) => poisoned.into_inner(),
        };
        slot.as_ref().filter(|t| !t.is_closed()).cloned()
    }

    fn slot_mut(&self) -> std::sync::RwLockWriteGuard<'_, Option<Arc<dyn Transport>>> {
        match self.current.write() {
            Ok(slot) => slot,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
