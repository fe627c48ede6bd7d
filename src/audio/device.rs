//! Exclusive ownership of an audio device
//!
//! `cpal` streams are not `Send` on every platform, so each open stream lives on
//! its own thread. The guard stops that thread and waits for it, which makes
//! release synchronous: once `release` returns the device is closed. Async
//! callers use `release_async`, which does the wait on the blocking pool.

use std::sync::mpsc as std_mpsc;
use std::thread::JoinHandle;

use crate::{Error, Result};

/// Releases an audio device exactly once, on `release` or drop
pub struct DeviceGuard {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl DeviceGuard {
    /// Create a guard running `release` when the device is given up
    #[must_use]
    pub fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }

    /// Release the device; later calls are no-ops
    pub fn release(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }

    /// Release the device from async code without stalling a runtime worker
    pub async fn release_async(&mut self) {
        if let Some(release) = self.release.take()
            && tokio::task::spawn_blocking(release).await.is_err()
        {
            tracing::warn!("audio device release task panicked");
        }
    }

    /// Check if the device is still held
    #[must_use]
    pub const fn is_held(&self) -> bool {
        self.release.is_some()
    }
}

impl Drop for DeviceGuard {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for DeviceGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceGuard")
            .field("held", &self.is_held())
            .finish()
    }
}

/// Run `open` on a dedicated thread and keep its result alive until the guard drops
///
/// `open` returns the stream to keep alive plus a value reported back to the caller
/// (typically the negotiated sample rate).
///
/// # Errors
///
/// Returns the error from `open`, or an error if the thread cannot be spawned
pub fn spawn_device_thread<S, T, F>(name: &str, open: F) -> Result<(DeviceGuard, T)>
where
    F: FnOnce() -> Result<(S, T)> + Send + 'static,
    T: Send + 'static,
{
    let (ready_tx, ready_rx) = std_mpsc::channel::<Result<T>>();
    let (stop_tx, stop_rx) = std_mpsc::channel::<()>();

    let thread: JoinHandle<()> = std::thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            let stream = match open() {
                Ok((stream, value)) => {
                    let _ = ready_tx.send(Ok(value));
                    stream
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };

            // Blocks until the guard signals or is dropped
            let _ = stop_rx.recv();
            drop(stream);
        })?;

    let value = ready_rx
        .recv()
        .map_err(|_| Error::DeviceUnavailable(format!("{name} thread exited during open")))??;

    let thread_name = name.to_string();
    let guard = DeviceGuard::new(move || {
        let _ = stop_tx.send(());
        if thread.join().is_err() {
            tracing::warn!(thread = %thread_name, "audio device thread panicked");
        }
        tracing::debug!(thread = %thread_name, "audio device released");
    });

    Ok((guard, value))
}
