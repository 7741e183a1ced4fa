//! Shared model-execution device.
//!
//! Every separation stage and every voice conversion holds a permit
//! while it runs. With the default single permit the device is used by
//! exactly one model at a time.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// The gate was closed while a caller waited for a permit.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("device gate closed while waiting for {holder}")]
pub struct DeviceClosed {
    pub holder: String,
}

/// Callback run when a lease is released.
pub type ReleaseHook = Box<dyn FnOnce() + Send>;

/// Counting gate in front of the device.
#[derive(Debug, Clone)]
pub struct DeviceGate {
    semaphore: Arc<Semaphore>,
    permits: usize,
}

impl DeviceGate {
    pub fn new(permits: usize) -> Self {
        let permits = permits.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(permits)),
            permits,
        }
    }

    /// Total number of permits.
    pub fn permits(&self) -> usize {
        self.permits
    }

    /// Permits not currently leased.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Wait for a permit.
    pub async fn acquire(&self, holder: impl Into<String>) -> Result<DeviceLease, DeviceClosed> {
        let holder = holder.into();
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| DeviceClosed {
                holder: holder.clone(),
            })?;
        tracing::trace!("Device leased to {}", holder);
        Ok(DeviceLease {
            permit: Some(permit),
            holder,
            on_release: None,
        })
    }

    /// Refuse all further leases.
    pub fn close(&self) {
        self.semaphore.close();
    }
}

/// A held device permit. Released on drop, on every exit path.
pub struct DeviceLease {
    permit: Option<OwnedSemaphorePermit>,
    holder: String,
    on_release: Option<ReleaseHook>,
}

impl DeviceLease {
    /// Run `hook` right before the permit is returned.
    pub fn on_release(mut self, hook: impl FnOnce() + Send + 'static) -> Self {
        self.on_release = Some(Box::new(hook));
        self
    }
}

impl Drop for DeviceLease {
    fn drop(&mut self) {
        if let Some(hook) = self.on_release.take() {
            hook();
        }
        self.permit.take();
        tracing::trace!("Device released by {}", self.holder);
    }
}

impl std::fmt::Debug for DeviceLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceLease")
            .field("holder", &self.holder)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn lease_returns_permit_on_drop() {
        let gate = DeviceGate::new(1);
        let lease = gate.acquire("stage").await.unwrap();
        assert_eq!(gate.available(), 0);
        drop(lease);
        assert_eq!(gate.available(), 1);
    }

    #[tokio::test]
    async fn release_hook_runs_once() {
        let gate = DeviceGate::new(1);
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let lease = gate.acquire("stage").await.unwrap().on_release(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        drop(lease);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn closed_gate_refuses() {
        let gate = DeviceGate::new(1);
        gate.close();
        assert!(gate.acquire("late").await.is_err());
    }

    #[test]
    fn zero_permits_rounds_up() {
        assert_eq!(DeviceGate::new(0).permits(), 1);
    }
}
