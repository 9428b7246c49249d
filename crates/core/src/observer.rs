//! Observer capability: await or subscribe to other components' state
//!
//! An [`Observer`] belongs to one component and is how that component
//! learns about state published elsewhere:
//!
//! - [`observe`](Observer::observe) / [`observe_for`](Observer::observe_for)
//!   block (suspend the task) until every target has a value, then return
//!   the value(s).
//! - [`subscribe`](Observer::subscribe) registers a callback invoked on
//!   every distinct ready-tuple change, with conflation under load.
//! - [`exclusive`](Observer::exclusive) defers the component's unrelated
//!   inbound work while a wait is outstanding.
//!
//! Waits are torn down on every exit path: success, timeout, owner
//! termination, or the observing task being cancelled mid-await.

use std::time::Duration;

use statewatch_runtime::{ExclusiveGate, Lifetime};
use tracing::{debug, warn};

use crate::bridge;
use crate::error::ObserveError;
use crate::set::{ObserveSet, WaitAttachment};
use crate::watch::Subscription;

/// Per-component observation capability.
///
/// Construct one per component from its [`Lifetime`]; pass the
/// component's inbox gate as well if [`exclusive`](Observer::exclusive)
/// should actually defer mailbox traffic.
pub struct Observer {
  lifetime: Lifetime,
  gate: ExclusiveGate,
}

impl Observer {
  /// Capability for `component`, with a standalone gate (exclusive mode
  /// will not affect any mailbox).
  pub fn new(component: &Lifetime) -> Self {
    Self {
      lifetime: component.clone(),
      gate: ExclusiveGate::new(),
    }
  }

  /// Capability for `component` wired to its inbox gate, so
  /// [`exclusive`](Observer::exclusive) defers the component's non-urgent
  /// messages.
  pub fn with_gate(component: &Lifetime, gate: ExclusiveGate) -> Self {
    Self {
      lifetime: component.clone(),
      gate,
    }
  }

  /// The component this capability belongs to.
  pub fn lifetime(&self) -> &Lifetime {
    &self.lifetime
  }

  /// Wait until every target has a value, then return the value(s).
  ///
  /// Returns immediately, without suspending, if every target is already
  /// set. A single source yields its bare value; a tuple of sources
  /// yields a tuple in argument order, where each slot carries the
  /// latest value at the moment the last slot became ready.
  ///
  /// Fails with [`ObserveError::Terminated`] if the owner of a still
  /// unset target terminates, and with [`ObserveError::InvalidTarget`]
  /// (before registering anywhere) if a target no longer exists.
  pub async fn observe<S: ObserveSet>(&self, targets: S) -> Result<S::Output, ObserveError> {
    let attachment = targets.attach_wait(&self.lifetime)?;
    wait(&attachment).await
  }

  /// Like [`observe`](Observer::observe), but bounded by a deadline.
  ///
  /// On expiry the watch detaches from every target before the error is
  /// returned, so no late update can resolve the abandoned wait. The
  /// error message names every target in argument order, `!`-marking the
  /// ones that were still unset.
  pub async fn observe_for<S: ObserveSet>(&self, targets: S, timeout: Duration) -> Result<S::Output, ObserveError> {
    let attachment = targets.attach_wait(&self.lifetime)?;
    match tokio::time::timeout(timeout, wait(&attachment)).await {
      Ok(result) => result,
      Err(_) => {
        let targets = attachment.descriptor();
        drop(attachment);
        warn!(observer = %self.lifetime.label(), %targets, "Observe timed out");
        Err(ObserveError::Timeout {
          seconds: timeout.as_secs_f64(),
          targets,
        })
      }
    }
  }

  /// Invoke `callback` with the current values once all targets are set,
  /// and again after every subsequent change.
  ///
  /// If every target is already set the callback fires once before this
  /// returns. Callbacks run on the updating component's task and must
  /// not block; updates arriving while a callback is in flight are
  /// conflated into one catch-up invocation with the latest values. The
  /// callback is never invoked with values older than ones it already
  /// received, though intermediate values may be skipped.
  ///
  /// The subscription lives until [`Subscription::cancel`] or this
  /// component terminates; dropping the returned handle does not end it.
  pub fn subscribe<S, F>(&self, targets: S, callback: F) -> Result<Subscription, ObserveError>
  where
    S: ObserveSet,
    F: FnMut(S::Output) + Send + 'static,
  {
    targets.attach_callback(&self.lifetime, Box::new(callback))
  }

  /// Run `fut` while deferring this component's non-urgent inbound work.
  ///
  /// Value deliveries do not travel through the mailbox, so a wait
  /// inside `fut` still progresses; everything else queued at the
  /// component replays, in order, once `fut` completes. Nesting is fine.
  pub async fn exclusive<F: Future>(&self, fut: F) -> F::Output {
    let _hold = self.gate.hold();
    fut.await
  }
}

impl std::fmt::Debug for Observer {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Observer").field("component", &self.lifetime.label()).finish()
  }
}

/// Wait until the attachment's watch is ready, racing owner termination.
async fn wait<Out: Send + 'static>(attachment: &WaitAttachment<Out>) -> Result<Out, ObserveError> {
  let watch = attachment.watch();
  loop {
    let notified = watch.notified();
    tokio::pin!(notified);
    notified.as_mut().enable();

    if attachment.ready() {
      if let Some(out) = attachment.collect() {
        return Ok(out);
      }
    }

    tokio::select! {
      _ = &mut notified => {}
      index = bridge::owner_lost(watch) => {
        // The final update may race the owner's death; only fail if the
        // slot is genuinely still unset.
        if !watch.slot_ready(index) && !watch.ready() {
          let target = watch.slot_label(index).to_string();
          debug!(%target, "Observed owner terminated mid-wait");
          return Err(ObserveError::Terminated { target });
        }
      }
    }
  }
}
