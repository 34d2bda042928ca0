use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{RecvTimeoutError, Sender, bounded};
use tracing::{debug, error, info};

use super::manager::FileLifecycleManager;
use crate::cancel::CancelToken;
use crate::error::{ErrorKind, Result};

/// Background expiry sweep on a fixed interval.
pub struct Sweeper;

impl Sweeper {
    pub fn spawn(manager: Arc<FileLifecycleManager>, interval: Duration) -> Result<SweeperHandle> {
        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);
        let cancel = CancelToken::new();
        let worker_cancel = cancel.clone();

        let thread = thread::Builder::new()
            .name("sis-sweeper".into())
            .spawn(move || {
                info!(every = ?interval, "file sweeper started");
                loop {
                    match shutdown_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {}
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                    match manager.sweep_expired(&worker_cancel) {
                        Ok(report) => debug!(deleted = report.deleted(), "sweep finished"),
                        Err(e) if e.kind() == ErrorKind::Cancelled => break,
                        Err(e) => error!(error = %e, "sweep failed"),
                    }
                }
                info!("file sweeper stopped");
            })?;

        Ok(SweeperHandle {
            shutdown: Some(shutdown_tx),
            cancel,
            thread: Some(thread),
        })
    }
}

/// Owns the sweeper thread; stopping or dropping it ends the thread.
pub struct SweeperHandle {
    shutdown: Option<Sender<()>>,
    cancel: CancelToken,
    thread: Option<JoinHandle<()>>,
}

impl SweeperHandle {
    pub fn stop(mut self) {
        self.shutdown_now();
    }

    fn shutdown_now(&mut self) {
        self.cancel.cancel();
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.try_send(());
        }
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                error!("file sweeper thread panicked");
            }
        }
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        self.shutdown_now();
    }
}
