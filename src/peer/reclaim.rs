//! Background reclamation thread
//!
//! Drains the unreachable-proxy queue on its own schedule. Application code
//! may only assume a dropped proxy is released eventually, never promptly.

use flume::RecvTimeoutError;
use std::io;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::{PeerTable, ReclaimMsg};
use crate::config::ReclaimConfig;
use crate::logging::{debug, error, info};

const IDLE_POLL: Duration = Duration::from_millis(250);

/// Handle to a running reclamation thread; shuts it down on drop
pub struct Reclaimer {
    table: Arc<PeerTable>,
    thread: Option<JoinHandle<usize>>,
}

impl Reclaimer {
    pub(super) fn spawn(table: Arc<PeerTable>, config: &ReclaimConfig) -> io::Result<Self> {
        if table.reclaimer_active.swap(true, Ordering::AcqRel) {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                "reclamation thread already running for this peer manager",
            ));
        }

        let worker_table = table.clone();
        let batch_size = config.batch_size.max(1);

        let thread = thread::Builder::new()
            .name(config.thread_name.clone())
            .spawn(move || run(worker_table, batch_size))
            .map_err(|err| {
                table.reclaimer_active.store(false, Ordering::Release);
                err
            })?;

        info!(
            target: "tak_interop::peer",
            thread = %config.thread_name,
            batch_size,
            "Reclamation thread started"
        );

        Ok(Self {
            table,
            thread: Some(thread),
        })
    }

    /// Stop the thread after it drains what is already queued.
    ///
    /// Returns the number of registrations it released over its lifetime.
    pub fn shutdown(mut self) -> usize {
        self.stop()
    }

    fn stop(&mut self) -> usize {
        let Some(thread) = self.thread.take() else {
            return 0;
        };
        let _ = self.table.reclaim_tx.send(ReclaimMsg::Shutdown);
        let released = match thread.join() {
            Ok(released) => released,
            Err(_) => {
                error!(target: "tak_interop::peer", "Reclamation thread panicked");
                0
            }
        };
        self.table.reclaimer_active.store(false, Ordering::Release);
        released
    }
}

impl Drop for Reclaimer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(table: Arc<PeerTable>, batch_size: usize) -> usize {
    let mut released = 0usize;

    loop {
        let first = match table.reclaim_rx.recv_timeout(IDLE_POLL) {
            Ok(msg) => msg,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };

        let mut batch = Vec::with_capacity(batch_size);
        batch.push(first);
        batch.extend(table.reclaim_rx.try_iter().take(batch_size - 1));

        let mut shutdown = false;
        for msg in batch {
            match msg {
                ReclaimMsg::Unreachable(id) => match table.reclaim(id) {
                    Ok(true) => released += 1,
                    Ok(false) => {}
                    // Already logged as an invariant violation; keep draining
                    Err(err) => error!(target: "tak_interop::peer", error = %err, "Reclamation failed"),
                },
                ReclaimMsg::Shutdown => shutdown = true,
            }
        }

        if shutdown {
            // Release whatever arrived before the shutdown request
            for msg in table.reclaim_rx.try_iter() {
                if let ReclaimMsg::Unreachable(id) = msg {
                    if let Ok(true) = table.reclaim(id) {
                        released += 1;
                    }
                }
            }
            break;
        }
    }

    debug!(target: "tak_interop::peer", released, "Reclamation thread exiting");
    released
}
