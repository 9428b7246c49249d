//! Component lifetimes: identity, liveness, and termination detection
//!
//! A [`Lifetime`] is a cheap cloneable handle naming one component. It
//! carries a human-readable label (used in diagnostics) and a
//! `CancellationToken` that flips exactly once, when the component
//! terminates. Observers use it to detect that a component they depend on
//! is gone; component tasks hold a [`TerminateOnDrop`] guard so abnormal
//! exits (panic, abort) are indistinguishable from explicit termination.

use std::sync::Arc;

use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::debug;

/// Identity and liveness of one component.
///
/// Clones share the same underlying token: terminating any clone
/// terminates them all. The label is fixed at creation and names the
/// component type for diagnostics (timeout messages, logs).
#[derive(Clone, Debug)]
pub struct Lifetime {
  label: Arc<str>,
  token: CancellationToken,
}

impl Lifetime {
  /// Create a live lifetime with the given diagnostic label.
  pub fn new(label: impl Into<String>) -> Self {
    Self {
      label: label.into().into(),
      token: CancellationToken::new(),
    }
  }

  /// Diagnostic label of the component this lifetime belongs to.
  pub fn label(&self) -> &str {
    &self.label
  }

  /// True until the component has terminated.
  pub fn is_alive(&self) -> bool {
    !self.token.is_cancelled()
  }

  /// Mark the component as terminated. Idempotent.
  pub fn terminate(&self) {
    if self.is_alive() {
      debug!(label = %self.label, "Component terminated");
    }
    self.token.cancel();
  }

  /// Resolves once the component has terminated (immediately if it
  /// already has).
  pub async fn terminated(&self) {
    self.token.cancelled().await;
  }

  /// Guard that terminates this lifetime when dropped.
  ///
  /// Held across a component's body so that every exit path, including
  /// panics and task aborts, flips the token.
  pub fn terminate_on_drop(&self) -> TerminateOnDrop {
    TerminateOnDrop {
      _guard: self.token.clone().drop_guard(),
    }
  }
}

/// Terminates the associated [`Lifetime`] when dropped.
#[must_use = "the lifetime terminates as soon as this guard is dropped"]
pub struct TerminateOnDrop {
  _guard: DropGuard,
}
