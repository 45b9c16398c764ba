//! Background reload listener.
//!
//! A [`ReloadTrigger`] queues reload requests without blocking. The listener
//! task drains every pending request, then runs one [`Directory::reload`] on
//! the blocking pool, so a burst of requests costs a single reload.

use std::sync::{Arc, Weak};

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::directory::Directory;
use crate::{Error, Result};

/// Cloneable handle that asks the listener for a reload.
#[derive(Debug, Clone)]
pub struct ReloadTrigger {
    tx: mpsc::UnboundedSender<()>,
    done: watch::Receiver<u64>,
}

impl ReloadTrigger {
    pub fn request(&self) -> Result<()> {
        self.tx.send(()).map_err(|_| Error::ReloadChannelClosed)
    }

    /// Number of reloads finished so far.
    pub fn generation(&self) -> u64 {
        *self.done.borrow()
    }

    /// Wait until a reload finishes that this handle has not yet seen.
    pub async fn reloaded(&mut self) -> Result<u64> {
        self.done
            .changed()
            .await
            .map_err(|_| Error::ReloadChannelClosed)?;
        Ok(*self.done.borrow_and_update())
    }
}

/// Start the listener and attach its trigger to `directory`.
///
/// The task holds only a weak reference and stops once the directory is
/// dropped or every trigger is gone.
pub fn spawn_reload_listener(directory: Arc<Directory>) -> (ReloadTrigger, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<()>();
    let (done_tx, done_rx) = watch::channel(0u64);
    let trigger = ReloadTrigger { tx, done: done_rx };
    directory.attach_trigger(trigger.clone());
    let weak: Weak<Directory> = Arc::downgrade(&directory);
    drop(directory);

    let handle = tokio::spawn(async move {
        let mut generation = 0u64;
        while rx.recv().await.is_some() {
            let mut coalesced = 0usize;
            while rx.try_recv().is_ok() {
                coalesced += 1;
            }
            let Some(directory) = weak.upgrade() else {
                break;
            };
            debug!(category = "reload", coalesced, "reloading directory");

            match tokio::task::spawn_blocking(move || directory.reload()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(category = "reload", error = %e, "reload failed"),
                Err(e) => error!(category = "reload", error = %e, "reload task panicked"),
            }
            generation += 1;
            // nobody waiting is fine
            let _ = done_tx.send(generation);
        }
        info!(category = "reload", "reload listener stopped");
    });

    (trigger, handle)
}
