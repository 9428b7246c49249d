//! Gated component mailbox
//!
//! An [`Inbox`] is a bounded mpsc mailbox with two lanes: normal messages
//! and urgent ones. Normally both flow through in arrival order. While the
//! inbox's [`ExclusiveGate`] is held, only urgent messages are handed out;
//! normal messages are parked in a deferral queue and replayed, still in
//! arrival order, once the gate reopens.
//!
//! The gate is how a component serializes unrelated inbound work behind a
//! blocking wait: hold it for the duration of the wait and keep polling
//! `recv` in a select loop. Wakeups that progress the wait do not travel
//! through the mailbox at all, so they are never deferred.

use std::{collections::VecDeque, sync::Arc};
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::{Notify, mpsc};
use tracing::trace;

// ============================================================================
// Errors
// ============================================================================

/// Error when sending to a component's inbox.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SendError {
  #[error("Component has shut down")]
  ComponentGone,
}

// ============================================================================
// Exclusive gate
// ============================================================================

struct GateShared {
  holds: AtomicUsize,
  reopened: Notify,
}

/// Shared flag deferring a component's non-urgent inbound work.
///
/// Holds nest: the gate stays closed until every [`GateHold`] is dropped.
/// Cheap to clone; all clones refer to the same gate.
#[derive(Clone)]
pub struct ExclusiveGate {
  shared: Arc<GateShared>,
}

impl ExclusiveGate {
  pub fn new() -> Self {
    Self {
      shared: Arc::new(GateShared {
        holds: AtomicUsize::new(0),
        reopened: Notify::new(),
      }),
    }
  }

  /// Close the gate until the returned hold is dropped.
  pub fn hold(&self) -> GateHold {
    self.shared.holds.fetch_add(1, Ordering::SeqCst);
    GateHold {
      shared: Arc::clone(&self.shared),
    }
  }

  /// True while at least one hold is live.
  pub fn is_held(&self) -> bool {
    self.shared.holds.load(Ordering::SeqCst) > 0
  }

  /// Resolves once the gate is open. May resolve spuriously if the gate
  /// is re-held immediately; callers re-check `is_held` in a loop.
  pub(crate) async fn reopened(&self) {
    let notified = self.shared.reopened.notified();
    tokio::pin!(notified);
    notified.as_mut().enable();
    if !self.is_held() {
      return;
    }
    notified.await;
  }
}

impl Default for ExclusiveGate {
  fn default() -> Self {
    Self::new()
  }
}

impl std::fmt::Debug for ExclusiveGate {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ExclusiveGate").field("held", &self.is_held()).finish()
  }
}

/// Keeps an [`ExclusiveGate`] closed while alive.
#[must_use = "the gate reopens as soon as this hold is dropped"]
pub struct GateHold {
  shared: Arc<GateShared>,
}

impl Drop for GateHold {
  fn drop(&mut self) {
    if self.shared.holds.fetch_sub(1, Ordering::SeqCst) == 1 {
      self.shared.reopened.notify_waiters();
    }
  }
}

// ============================================================================
// Inbox
// ============================================================================

struct Envelope<M> {
  urgent: bool,
  message: M,
}

/// Sender half of a component inbox. Cheap to clone.
#[derive(Debug)]
pub struct InboxSender<M> {
  tx: mpsc::Sender<Envelope<M>>,
}

// Manual impl: `M` itself does not need to be Clone.
impl<M> Clone for InboxSender<M> {
  fn clone(&self) -> Self {
    Self { tx: self.tx.clone() }
  }
}

impl<M: Send> InboxSender<M> {
  /// Queue a normal message. Deferred while the receiver's gate is held.
  pub async fn send(&self, message: M) -> Result<(), SendError> {
    self
      .tx
      .send(Envelope { urgent: false, message })
      .await
      .map_err(|_| SendError::ComponentGone)
  }

  /// Queue an urgent message. Bypasses the exclusive gate.
  pub async fn send_urgent(&self, message: M) -> Result<(), SendError> {
    self
      .tx
      .send(Envelope { urgent: true, message })
      .await
      .map_err(|_| SendError::ComponentGone)
  }
}

/// Receiving half of a component inbox.
pub struct Inbox<M> {
  rx: mpsc::Receiver<Envelope<M>>,
  deferred: VecDeque<M>,
  gate: ExclusiveGate,
  closed: bool,
}

impl<M: Send> Inbox<M> {
  /// Create a bounded inbox, returning the sender and receiver halves.
  pub fn channel(capacity: usize) -> (InboxSender<M>, Inbox<M>) {
    let (tx, rx) = mpsc::channel(capacity);
    (
      InboxSender { tx },
      Inbox {
        rx,
        deferred: VecDeque::new(),
        gate: ExclusiveGate::new(),
        closed: false,
      },
    )
  }

  /// The gate deferring this inbox's non-urgent messages.
  pub fn gate(&self) -> ExclusiveGate {
    self.gate.clone()
  }

  /// Number of messages currently parked behind the gate.
  pub fn deferred_len(&self) -> usize {
    self.deferred.len()
  }

  /// Receive the next message this component should process.
  ///
  /// While the gate is held only urgent messages are returned; normal
  /// ones are parked. Once the gate reopens, parked messages drain first,
  /// in arrival order. Returns `None` when every sender is gone and
  /// nothing is parked.
  pub async fn recv(&mut self) -> Option<M> {
    loop {
      if !self.gate.is_held() {
        if let Some(message) = self.deferred.pop_front() {
          return Some(message);
        }
        if self.closed {
          return None;
        }
      } else if self.closed {
        // Nothing new can arrive; wait for the gate so parked messages
        // can drain.
        if self.deferred.is_empty() {
          return None;
        }
        self.gate.reopened().await;
        continue;
      }

      tokio::select! {
        envelope = self.rx.recv() => match envelope {
          Some(envelope) => {
            if envelope.urgent || !self.gate.is_held() {
              return Some(envelope.message);
            }
            trace!(deferred = self.deferred.len() + 1, "Deferring message behind exclusive gate");
            self.deferred.push_back(envelope.message);
          }
          None => self.closed = true,
        },
        _ = self.gate.reopened(), if self.gate.is_held() => {}
      }
    }
  }
}

impl<M> std::fmt::Debug for Inbox<M> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Inbox")
      .field("deferred", &self.deferred.len())
      .field("closed", &self.closed)
      .finish()
  }
}
