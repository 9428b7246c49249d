//! Observable values: owned state other components can watch
//!
//! An [`Observable`] holds the latest value (or nothing yet) for one piece
//! of a component's published state. The handle split enforces the
//! ownership rule: the owner keeps the `Observable` and is the only party
//! that can [`update`](Observable::update) or [`reset`](Observable::reset);
//! everyone else gets a [`Source`], which can only read snapshots and
//! register waiters.
//!
//! Versions increase monotonically with every update. Registration is
//! atomic with the snapshot it returns, so a registering observer can
//! never miss an update that races the registration.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use statewatch_runtime::Lifetime;
use tracing::trace;

use crate::error::ObserveError;

/// Identifies one registered waiter within one observable.
pub(crate) type WaiterId = u64;

/// Receives value snapshots for one watch slot.
///
/// Implementations must not block: delivery happens on the updating
/// component's task. A sink that reports itself detached is pruned from
/// the waiter list on the next update.
pub(crate) trait ValueSink<V>: Send + Sync {
  fn deliver(&self, value: &V, version: u64);
  fn is_detached(&self) -> bool;
}

struct ObservableState<V> {
  value: Option<V>,
  version: u64,
  next_waiter: WaiterId,
  waiters: Vec<(WaiterId, Arc<dyn ValueSink<V>>)>,
}

pub(crate) struct ObservableCore<V> {
  owner: Lifetime,
  state: Mutex<ObservableState<V>>,
}

impl<V: Clone + Send + 'static> ObservableCore<V> {
  /// Owner of the component publishing this observable.
  pub(crate) fn owner(&self) -> &Lifetime {
    &self.owner
  }

  /// Atomically add a waiter and return the current snapshot.
  ///
  /// Doing both under one lock removes the race between "check current
  /// value" and "subscribe for future updates": the caller either sees
  /// the value in the snapshot or is guaranteed a delivery for it.
  pub(crate) fn register(&self, sink: Arc<dyn ValueSink<V>>) -> (WaiterId, Option<(V, u64)>) {
    let mut state = self.state.lock();
    let id = state.next_waiter;
    state.next_waiter += 1;
    state.waiters.push((id, sink));
    let snapshot = state.value.clone().map(|v| (v, state.version));
    (id, snapshot)
  }

  /// Remove a waiter. No-op if it was already removed.
  pub(crate) fn unregister(&self, id: WaiterId) {
    self.state.lock().waiters.retain(|(wid, _)| *wid != id);
  }

  fn snapshot(&self) -> Option<(V, u64)> {
    let state = self.state.lock();
    state.value.clone().map(|v| (v, state.version))
  }

  #[cfg(test)]
  fn waiter_count(&self) -> usize {
    self.state.lock().waiters.len()
  }
}

/// Owner-side handle to one observable value.
///
/// Not cloneable: exactly one component owns the value. Hand out
/// [`Source`] handles (via [`source`](Observable::source)) to everyone
/// who needs to watch it. Dropping the `Observable` invalidates all of
/// its sources.
pub struct Observable<V> {
  core: Arc<ObservableCore<V>>,
}

impl<V: Clone + Send + 'static> Observable<V> {
  /// Create an unset observable owned by the component `owner`.
  ///
  /// The owner's label becomes the diagnostic name used in timeout
  /// messages.
  pub fn new(owner: &Lifetime) -> Self {
    Self {
      core: Arc::new(ObservableCore {
        owner: owner.clone(),
        state: Mutex::new(ObservableState {
          value: None,
          version: 0,
          next_waiter: 0,
          waiters: Vec::new(),
        }),
      }),
    }
  }

  /// Publish a new value and notify every registered waiter.
  ///
  /// Waiters are notified outside the state lock, in registration order,
  /// with the `(value, version)` snapshot this update produced. Detached
  /// waiters are pruned first.
  pub fn update(&self, value: V) {
    let (version, waiters) = {
      let mut state = self.core.state.lock();
      state.value = Some(value.clone());
      state.version += 1;
      state.waiters.retain(|(_, sink)| !sink.is_detached());
      let sinks: Vec<Arc<dyn ValueSink<V>>> = state.waiters.iter().map(|(_, s)| Arc::clone(s)).collect();
      (state.version, sinks)
    };

    trace!(owner = %self.core.owner.label(), version, waiters = waiters.len(), "Observable updated");
    for sink in waiters {
      sink.deliver(&value, version);
    }
  }

  /// Drop the value back to unset, without notifying anyone.
  ///
  /// Waits that already resolved keep the value they were delivered; only
  /// a registration made after the reset sees the unset state and waits
  /// for the next update.
  pub fn reset(&self) {
    let mut state = self.core.state.lock();
    state.value = None;
    trace!(owner = %self.core.owner.label(), "Observable reset");
  }

  /// Current value, if set.
  pub fn peek(&self) -> Option<V> {
    self.core.state.lock().value.clone()
  }

  /// Number of currently registered waiters, for leak assertions.
  #[cfg(test)]
  pub(crate) fn waiter_count(&self) -> usize {
    self.core.waiter_count()
  }

  /// Observer-side handle to this observable.
  pub fn source(&self) -> Source<V> {
    Source {
      core: Arc::downgrade(&self.core),
      label: self.core.owner.label().to_string().into(),
    }
  }
}

impl<V> std::fmt::Debug for Observable<V> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Observable").field("owner", &self.core.owner.label()).finish()
  }
}

/// Observer-side handle to an [`Observable`].
///
/// Cheap to clone and safe to hold across the owner's lifetime: once the
/// owner drops the observable, observation attempts fail with
/// [`ObserveError::InvalidTarget`] instead of dangling.
pub struct Source<V> {
  core: Weak<ObservableCore<V>>,
  label: Arc<str>,
}

impl<V> Clone for Source<V> {
  fn clone(&self) -> Self {
    Self {
      core: Weak::clone(&self.core),
      label: Arc::clone(&self.label),
    }
  }
}

impl<V: Clone + Send + 'static> Source<V> {
  /// Diagnostic label: the owning component's label.
  pub fn label(&self) -> &str {
    &self.label
  }

  /// Best-effort read of the current value. `None` if unset or if the
  /// observable no longer exists.
  pub fn peek(&self) -> Option<V> {
    self.core.upgrade().and_then(|core| core.snapshot().map(|(v, _)| v))
  }

  /// True if the observable exists and has had a value set.
  pub fn is_ready(&self) -> bool {
    self.core.upgrade().is_some_and(|core| core.snapshot().is_some())
  }

  pub(crate) fn label_arc(&self) -> Arc<str> {
    Arc::clone(&self.label)
  }

  pub(crate) fn upgrade(&self) -> Result<Arc<ObservableCore<V>>, ObserveError> {
    self.core.upgrade().ok_or_else(|| ObserveError::InvalidTarget {
      target: self.label.to_string(),
    })
  }
}

impl<V> std::fmt::Debug for Source<V> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Source")
      .field("owner", &self.label)
      .field("linked", &(self.core.strong_count() > 0))
      .finish()
  }
}
