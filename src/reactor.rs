//! # NetworkReactor
//!
//! Owns the one OS thread that is allowed to read or write a raw socket.
//! Everything else posts work onto it via [`NetworkReactor::spawn`]: a
//! dedicated single-threaded Tokio runtime on its own OS thread, rather
//! than sharing whatever executor the caller happens to be running on.

use std::thread::JoinHandle as ThreadHandle;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Handle to the reactor's dedicated I/O thread.
pub struct NetworkReactor {
    handle: Handle,
    stop: Option<tokio::sync::oneshot::Sender<()>>,
    thread: Option<ThreadHandle<()>>,
}

impl NetworkReactor {
    /// Start the reactor thread. Fails with `Error::IoSetup` if the dedicated
    /// Tokio runtime cannot be created (e.g. the process is out of threads).
    pub fn start() -> Result<Self> {
        let (handle_tx, handle_rx) = std::sync::mpsc::channel::<Result<Handle>>();
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();

        let thread = std::thread::Builder::new()
            .name("qi-mesh-reactor".into())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
                    Ok(rt) => rt,
                    Err(err) => {
                        let _ = handle_tx.send(Err(Error::IoSetup(err.to_string())));
                        return;
                    }
                };
                let _ = handle_tx.send(Ok(runtime.handle().clone()));
                info!("reactor thread started");
                runtime.block_on(async move {
                    let _ = stop_rx.await;
                });
                debug!("reactor thread stopped");
            })
            .map_err(|err| Error::IoSetup(err.to_string()))?;

        let handle = handle_rx
            .recv()
            .map_err(|_| Error::IoSetup("reactor thread exited before signaling readiness".into()))??;

        Ok(Self {
            handle,
            stop: Some(stop_tx),
            thread: Some(thread),
        })
    }

    /// Hand the reactor an owned future to drive to completion on its thread.
    /// Returns a `JoinHandle` the caller can `.await` from any task. This
    /// never blocks the calling thread: `Handle::spawn` only enqueues the
    /// task onto the reactor's runtime.
    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: std::future::Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.handle.spawn(future)
    }

    /// A clone of the underlying runtime handle, for components (like a
    /// `TcpListener` accept loop) that need to `spawn` work of their own
    /// onto the same reactor from outside this struct.
    pub fn handle(&self) -> Handle {
        self.handle.clone()
    }

    pub fn stop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for NetworkReactor {
    fn drop(&mut self) {
        self.stop();
    }
}
