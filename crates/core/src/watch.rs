//! Watch bookkeeping: readiness tracking and conflated delivery
//!
//! A watch is the per-call state behind one `observe` or `subscribe`:
//! one slot per observed source, in argument order. Slots latch the
//! latest `(value, version)` they have seen and only ever move forward,
//! so deliveries may arrive in any order (or re-entrantly) without
//! corrupting the result. Readiness never reverts: once every slot has
//! seen a value, the watch stays ready.
//!
//! Subscription watches add conflation: at most one callback invocation
//! is in flight, updates landing meanwhile are collapsed into a single
//! catch-up invocation with the latest tuple.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use statewatch_runtime::Lifetime;
use tokio::sync::Notify;
use tokio::sync::futures::Notified;
use tracing::{debug, trace};

use crate::observable::ValueSink;

/// Typed closure reading the latched tuple out of a watch's slots,
/// together with the slot versions it was assembled from. Returns `None`
/// until every slot has a value.
pub(crate) type Collect<Out> = Box<dyn Fn() -> Option<(Out, Vec<u64>)> + Send + Sync>;

/// Deferred unregistrations, one per slot, run on detach. The closures
/// only capture weak observable references and waiter ids, and the list
/// is held across `.await` inside spawned observe futures, so the boxes
/// must be `Sync` as well as `Send`.
pub(crate) type DetachList = Vec<Box<dyn FnOnce() + Send + Sync>>;

// ============================================================================
// Watch core
// ============================================================================

struct SlotMeta {
  label: Arc<str>,
  owner: Lifetime,
  seen: Option<u64>,
}

/// Shared, type-erased state of one watch: slot readiness, wakeup, and
/// the detached flag checked by every sink.
pub(crate) struct WatchCore {
  observer: Lifetime,
  slots: Mutex<Vec<SlotMeta>>,
  notify: Notify,
  detached: AtomicBool,
}

impl WatchCore {
  pub(crate) fn new(observer: Lifetime, slots: Vec<(Arc<str>, Lifetime)>) -> Arc<Self> {
    Arc::new(Self {
      observer,
      slots: Mutex::new(
        slots
          .into_iter()
          .map(|(label, owner)| SlotMeta { label, owner, seen: None })
          .collect(),
      ),
      notify: Notify::new(),
      detached: AtomicBool::new(false),
    })
  }

  /// Record that `slot` has seen `version`, keeping the newest, and wake
  /// the waiter.
  pub(crate) fn mark(&self, slot: usize, version: u64) {
    {
      let mut slots = self.slots.lock();
      let seen = &mut slots[slot].seen;
      if seen.is_none_or(|v| version > v) {
        *seen = Some(version);
      }
    }
    self.notify.notify_waiters();
  }

  /// True once every slot has seen a value.
  pub(crate) fn ready(&self) -> bool {
    self.slots.lock().iter().all(|slot| slot.seen.is_some())
  }

  pub(crate) fn slot_ready(&self, slot: usize) -> bool {
    self.slots.lock()[slot].seen.is_some()
  }

  pub(crate) fn slot_label(&self, slot: usize) -> Arc<str> {
    Arc::clone(&self.slots.lock()[slot].label)
  }

  /// Owners of slots that are still unset, with their slot indices.
  pub(crate) fn unready_owners(&self) -> Vec<(usize, Lifetime)> {
    self
      .slots
      .lock()
      .iter()
      .enumerate()
      .filter(|(_, slot)| slot.seen.is_none())
      .map(|(i, slot)| (i, slot.owner.clone()))
      .collect()
  }

  /// Comma-joined slot labels in argument order, `!`-prefixed while
  /// unset. This is the target list embedded in timeout messages.
  pub(crate) fn descriptor(&self) -> String {
    self
      .slots
      .lock()
      .iter()
      .map(|slot| {
        if slot.seen.is_some() {
          slot.label.to_string()
        } else {
          format!("!{}", slot.label)
        }
      })
      .collect::<Vec<_>>()
      .join(", ")
  }

  /// Stop accepting deliveries. Sinks left behind in waiter lists report
  /// themselves detached and are pruned on the next update.
  pub(crate) fn detach(&self) {
    self.detached.store(true, Ordering::SeqCst);
  }

  /// Detached either explicitly or because the observing component is
  /// gone (which is how subscriptions of dead observers get cleaned up).
  pub(crate) fn is_detached(&self) -> bool {
    self.detached.load(Ordering::SeqCst) || !self.observer.is_alive()
  }

  pub(crate) fn notified(&self) -> Notified<'_> {
    self.notify.notified()
  }
}

// ============================================================================
// Slots
// ============================================================================

/// Latched latest `(value, version)` for one slot.
pub(crate) struct SlotCell<V> {
  state: Mutex<Option<(V, u64)>>,
}

impl<V: Clone> SlotCell<V> {
  pub(crate) fn new() -> Self {
    Self { state: Mutex::new(None) }
  }

  /// Store if `version` is newer than what the cell holds. Returns
  /// whether the cell changed. Stale stores are rejected so concurrent
  /// snapshot fills and deliveries can land in any order.
  pub(crate) fn store(&self, value: &V, version: u64) -> bool {
    let mut state = self.state.lock();
    match &*state {
      Some((_, held)) if *held >= version => false,
      _ => {
        *state = Some((value.clone(), version));
        true
      }
    }
  }

  pub(crate) fn value(&self) -> Option<V> {
    self.state.lock().as_ref().map(|(v, _)| v.clone())
  }

  /// Value and the version it was stored under, read consistently.
  pub(crate) fn entry(&self) -> Option<(V, u64)> {
    self.state.lock().clone()
  }
}

/// The waiter registered with one observable on behalf of a watch.
pub(crate) struct SlotSink<V> {
  pub(crate) cell: Arc<SlotCell<V>>,
  pub(crate) watch: Arc<WatchCore>,
  pub(crate) index: usize,
  /// Present for subscription watches: poked after every accepted
  /// delivery to drive the callback.
  pub(crate) dispatch: Option<Arc<dyn Dispatch>>,
}

impl<V: Clone + Send + 'static> ValueSink<V> for SlotSink<V> {
  fn deliver(&self, value: &V, version: u64) {
    if self.watch.is_detached() {
      return;
    }
    if self.cell.store(value, version) {
      self.watch.mark(self.index, version);
      if let Some(dispatch) = &self.dispatch {
        dispatch.on_change();
      }
    }
  }

  fn is_detached(&self) -> bool {
    self.watch.is_detached()
  }
}

// ============================================================================
// Subscriptions
// ============================================================================

/// Drives a subscription's callback after a slot delivery.
pub(crate) trait Dispatch: Send + Sync {
  fn on_change(&self);
}

struct DispatchFlags {
  /// A callback invocation is in flight; further changes must conflate.
  pending: bool,
  /// The tuple changed since the in-flight invocation collected it.
  dirty: bool,
}

/// Persistent-watch state: callback, collect closure, conflation flags.
///
/// Kept alive by the sinks registered in each observable's waiter list,
/// not by the public [`Subscription`] handle, so dropping the handle does
/// not cancel the subscription.
pub(crate) struct SubscriptionCore<Out> {
  watch: Arc<WatchCore>,
  collect: Collect<Out>,
  callback: Mutex<Box<dyn FnMut(Out) + Send>>,
  flags: Mutex<DispatchFlags>,
  /// Slot versions of the last delivered tuple. Versions only grow, so
  /// an equal vector means the tuple is unchanged and the invocation is
  /// suppressed. This is the "once per distinct change" guarantee.
  last_sent: Mutex<Option<Vec<u64>>>,
  detach: Mutex<Option<DetachList>>,
}

impl<Out: Send + 'static> SubscriptionCore<Out> {
  /// Create the core in the pre-armed state: `pending` starts true, so
  /// deliveries racing the registration phase only set `dirty`. The
  /// caller runs [`finish_attach`](Self::finish_attach) once every slot
  /// is registered.
  pub(crate) fn new(watch: Arc<WatchCore>, collect: Collect<Out>, callback: Box<dyn FnMut(Out) + Send>) -> Arc<Self> {
    Arc::new(Self {
      watch,
      collect,
      callback: Mutex::new(callback),
      flags: Mutex::new(DispatchFlags { pending: true, dirty: false }),
      last_sent: Mutex::new(None),
      detach: Mutex::new(None),
    })
  }

  pub(crate) fn install_detach(&self, detach: DetachList) {
    *self.detach.lock() = Some(detach);
  }

  /// Complete registration: fire the immediate invocation if every slot
  /// was already set, then disarm `pending`.
  pub(crate) fn finish_attach(&self) {
    if self.watch.ready() {
      self.flags.lock().dirty = true;
    }
    self.drain();
  }

  /// Invoke the callback until the tuple stops changing.
  ///
  /// Exactly one task runs this loop at a time (`pending`); everyone
  /// else just marks `dirty`. Each iteration collects the latest tuple,
  /// so any number of intermediate updates collapse into one catch-up
  /// invocation, and slot versions only move forward, so a later
  /// invocation never carries an older tuple.
  fn drain(&self) {
    loop {
      {
        let mut flags = self.flags.lock();
        if !flags.dirty || self.watch.is_detached() {
          flags.pending = false;
          return;
        }
        flags.dirty = false;
      }
      if let Some((out, versions)) = (self.collect)() {
        let changed = {
          let mut last = self.last_sent.lock();
          if last.as_deref() == Some(&versions[..]) {
            false
          } else {
            *last = Some(versions);
            true
          }
        };
        if changed {
          trace!("Subscription callback invoked");
          (self.callback.lock())(out);
        }
      }
    }
  }

  fn cancel(&self) {
    self.watch.detach();
    let detach = self.detach.lock().take();
    if let Some(detach) = detach {
      debug!(targets = detach.len(), "Subscription cancelled");
      for unregister in detach {
        unregister();
      }
    }
  }
}

impl<Out: Send + 'static> Dispatch for SubscriptionCore<Out> {
  fn on_change(&self) {
    {
      let mut flags = self.flags.lock();
      flags.dirty = true;
      if flags.pending {
        return;
      }
      flags.pending = true;
    }
    self.drain();
  }
}

/// Type-erased control surface of a subscription.
pub(crate) trait SubscriptionCtl: Send + Sync {
  fn is_ready(&self) -> bool;
  fn cancel(&self);
}

impl<Out: Send + 'static> SubscriptionCtl for SubscriptionCore<Out> {
  fn is_ready(&self) -> bool {
    self.watch.ready()
  }

  fn cancel(&self) {
    SubscriptionCore::cancel(self);
  }
}

/// Handle to a persistent watch created by `subscribe`.
///
/// The subscription stays registered even if this handle is dropped; it
/// ends when [`cancel`](Subscription::cancel) is called or, lazily, once
/// the observing component terminates.
#[derive(Clone)]
pub struct Subscription {
  ctl: Arc<dyn SubscriptionCtl>,
}

impl Subscription {
  pub(crate) fn new(ctl: Arc<dyn SubscriptionCtl>) -> Self {
    Self { ctl }
  }

  /// True once every observed source has had a value.
  pub fn is_ready(&self) -> bool {
    self.ctl.is_ready()
  }

  /// Detach from every observed source. The callback will not be
  /// invoked again.
  pub fn cancel(&self) {
    self.ctl.cancel();
  }
}

impl std::fmt::Debug for Subscription {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Subscription").field("ready", &self.is_ready()).finish()
  }
}
