//! Bounded event mailboxes
//!
//! Every actor owns one [`Mailbox`] and is the only task that reads it.
//! Other tasks hold a cloneable [`MailboxSender`] and choose per call site
//! between two delivery policies:
//!
//! - [`MailboxSender::send`] waits for capacity, but never longer than the
//!   sender's timeout; on timeout the event is dropped and logged.
//! - [`MailboxSender::try_send`] never waits; a full mailbox drops the event.
//!
//! Dropped events are dropped in place, so any socket they carry is closed.

use revtun_common::constants::{DEFAULT_NETWORK_TIMEOUT, MAILBOX_CAPACITY};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{SendTimeoutError, TrySendError};
use tracing::{debug, warn};

/// Create a mailbox with the default capacity and send timeout.
pub fn mailbox<E>(name: &'static str) -> (MailboxSender<E>, Mailbox<E>) {
    mailbox_with(name, MAILBOX_CAPACITY, DEFAULT_NETWORK_TIMEOUT)
}

pub fn mailbox_with<E>(
    name: &'static str,
    capacity: usize,
    send_timeout: Duration,
) -> (MailboxSender<E>, Mailbox<E>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        MailboxSender {
            tx,
            name,
            send_timeout,
        },
        Mailbox { rx, name },
    )
}

pub struct MailboxSender<E> {
    tx: mpsc::Sender<E>,
    name: &'static str,
    send_timeout: Duration,
}

impl<E> Clone for MailboxSender<E> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            name: self.name,
            send_timeout: self.send_timeout,
        }
    }
}

impl<E> std::fmt::Debug for MailboxSender<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MailboxSender")
            .field("name", &self.name)
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

impl<E> MailboxSender<E> {
    /// Back-pressured delivery. Returns `false` if the event was dropped
    /// because the mailbox stayed full past the timeout or is closed.
    pub async fn send(&self, event: E) -> bool {
        match self.tx.send_timeout(event, self.send_timeout).await {
            Ok(()) => true,
            Err(SendTimeoutError::Timeout(_)) => {
                warn!(
                    mailbox = self.name,
                    timeout = ?self.send_timeout,
                    "Mailbox full, dropping event"
                );
                false
            }
            Err(SendTimeoutError::Closed(_)) => {
                debug!(mailbox = self.name, "Mailbox closed, dropping event");
                false
            }
        }
    }

    /// Non-blocking delivery. Returns `false` if the event was dropped.
    pub fn try_send(&self, event: E) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(mailbox = self.name, "Mailbox full, dropping event");
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!(mailbox = self.name, "Mailbox closed, dropping event");
                false
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

pub struct Mailbox<E> {
    rx: mpsc::Receiver<E>,
    name: &'static str,
}

impl<E> Mailbox<E> {
    /// Next event in FIFO order. `None` once every sender is gone.
    pub async fn recv(&mut self) -> Option<E> {
        self.rx.recv().await
    }

    /// Close the mailbox and discard whatever is still queued, giving up
    /// after `deadline`. Late senders fail fast instead of blocking on a
    /// dead actor. Returns the number of discarded events.
    pub async fn drain(mut self, deadline: Duration) -> usize {
        self.rx.close();
        let mut dropped = 0usize;
        let drained = tokio::time::timeout(deadline, async {
            while self.rx.recv().await.is_some() {
                dropped += 1;
            }
        })
        .await;
        if drained.is_err() {
            warn!(mailbox = self.name, dropped, "Mailbox drain timed out");
        } else if dropped > 0 {
            debug!(mailbox = self.name, dropped, "Mailbox drained");
        }
        dropped
    }
}
