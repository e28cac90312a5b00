//! Stop signalling for a traffic generation run.
//!
//! A generation run fans out into many tasks, one per simulated user plus a
//! metrics reporter, and every one of them must learn promptly that the run is
//! over. The mechanism here has two halves: a single `Broadcaster` held by
//! whoever owns the run and any number of `Watcher` instances held by the
//! tasks. The signal is one-shot. Once sent it cannot be retracted and a fresh
//! pair is required for the next run.
//!
//! Every `Watcher` is counted as a peer. The `Broadcaster` may wait, with a
//! deadline, for every peer to observe the signal or go away.

#![deny(clippy::all)]
#![deny(clippy::cargo)]
#![deny(clippy::pedantic)]
#![deny(clippy::print_stdout)]
#![deny(clippy::print_stderr)]
#![deny(clippy::dbg_macro)]
#![deny(clippy::unwrap_used)]
#![deny(unused_extern_crates)]
#![deny(unused_allocation)]
#![deny(unused_assignments)]
#![deny(unused_comparisons)]
#![deny(unreachable_pub)]
#![deny(missing_docs)]
#![deny(missing_copy_implementations)]
#![deny(missing_debug_implementations)]
#![allow(clippy::multiple_crate_versions)]

use std::{
    sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    },
    time::Duration,
};

use tokio::sync::{Notify, watch};
use tracing::{debug, info};

/// Construct a `Watcher` and `Broadcaster` pair.
///
/// The returned `Watcher` is registered. If the caller does not intend to wait
/// on it the instance must be dropped before `signal_and_wait` is called or
/// the wait will run to its deadline.
#[must_use]
pub fn signal() -> (Watcher, Broadcaster) {
    let (sender, receiver) = watch::channel(false);
    let peers = Arc::new(AtomicU32::new(1));
    let notify = Arc::new(Notify::new());

    let watcher = Watcher {
        peers: Arc::clone(&peers),
        receiver,
        notify: Arc::clone(&notify),
        peer_count_decreased: false,
    };
    let broadcaster = Broadcaster {
        peers,
        sender,
        notify,
    };

    (watcher, broadcaster)
}

/// Errors for `Broadcaster::signal_and_wait`.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Some registered peers neither observed the signal nor dropped before
    /// the deadline.
    #[error("{remaining} peers still live after {waited:?}")]
    Timeout {
        /// Peers that had not checked out when the deadline passed.
        remaining: u32,
        /// How long the broadcaster waited.
        waited: Duration,
    },
}

/// Errors for `Watcher::register`.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterError {
    /// The signal has been sent and yet `register` was called.
    #[error("signal has been received")]
    SignalReceived,
}

#[derive(Debug)]
/// Sends the stop signal to every `Watcher` derived from the same pair.
pub struct Broadcaster {
    /// Registered peers that have not yet checked out.
    peers: Arc<AtomicU32>,
    /// `true` once the signal is sent.
    sender: watch::Sender<bool>,
    /// Poked by watchers as they check out.
    notify: Arc<Notify>,
}

impl Broadcaster {
    /// Send the signal to all `Watcher` instances without waiting.
    pub fn signal(self) {
        self.sender.send_replace(true);
    }

    /// Send the signal and wait up to `deadline` for every registered peer to
    /// check out.
    ///
    /// # Errors
    ///
    /// Returns `Error::Timeout` if peers remain when `deadline` elapses. The
    /// signal has been sent regardless.
    pub async fn signal_and_wait(self, deadline: Duration) -> Result<(), Error> {
        self.sender.send_replace(true);

        let wait = async {
            // Register for notification before checking the count, otherwise a
            // peer checking out between the load and the await is missed.
            loop {
                let notified = self.notify.notified();
                let peers = self.peers.load(Ordering::SeqCst);
                if peers == 0 {
                    break;
                }
                debug!("Waiting for {peers} peers");
                notified.await;
            }
        };

        if tokio::time::timeout(deadline, wait).await.is_err() {
            let remaining = self.peers.load(Ordering::SeqCst);
            info!("{remaining} peers did not check out in {deadline:?}");
            return Err(Error::Timeout {
                remaining,
                waited: deadline,
            });
        }
        Ok(())
    }
}

#[derive(Debug)]
/// Waits for the stop signal.
pub struct Watcher {
    /// Registered peers that have not yet checked out.
    peers: Arc<AtomicU32>,
    /// Flips to `true` when the signal is sent.
    receiver: watch::Receiver<bool>,
    /// Poked when this instance checks out.
    notify: Arc<Notify>,
    /// Whether this instance has already checked out with the `Broadcaster`.
    peer_count_decreased: bool,
}

impl Watcher {
    fn check_out(&mut self) {
        if self.peer_count_decreased {
            return;
        }

        // fetch_sub would wrap at zero, never let the count become u32::MAX.
        let mut old = self.peers.load(Ordering::Relaxed);
        while old > 0 {
            match self.peers.compare_exchange_weak(
                old,
                old - 1,
                Ordering::SeqCst,
                Ordering::Relaxed,
            ) {
                Ok(_) => {
                    self.notify.notify_waiters();
                    break;
                }
                Err(current) => old = current,
            }
        }
        self.peer_count_decreased = true;
    }

    /// Wait for the stop signal.
    ///
    /// A dropped `Broadcaster` counts as a signal: nobody is left to send one
    /// and the run is over either way.
    pub async fn recv(mut self) {
        // An error means the sender is gone, treated the same as a signal.
        let _ = self.receiver.wait_for(|stopped| *stopped).await;
        self.check_out();
    }

    /// Register a new peer with the `Broadcaster`.
    ///
    /// # Errors
    ///
    /// Returns `RegisterError::SignalReceived` if the signal has already been
    /// sent.
    pub fn register(&self) -> Result<Self, RegisterError> {
        if *self.receiver.borrow() {
            return Err(RegisterError::SignalReceived);
        }

        self.peers.fetch_add(1, Ordering::SeqCst);

        Ok(Self {
            peers: Arc::clone(&self.peers),
            receiver: self.receiver.clone(),
            notify: Arc::clone(&self.notify),
            peer_count_decreased: false,
        })
    }
}

impl Drop for Watcher {
    fn drop(&mut self) {
        self.check_out();
    }
}
