//! Target sets for joint observation
//!
//! [`ObserveSet`] is the sealed trait behind `observe`/`subscribe`
//! arguments: a single `&Source<V>` yields a bare `V`, a tuple of
//! sources (up to four) yields a tuple of values in argument order.
//!
//! Attachment is two-phase: every target is validated (upgraded) before
//! anything registers, so an invalid target fails the whole call without
//! partially registering. Registration itself writes each slot
//! independently through version-latched cells, so re-entrant updates
//! during registration are harmless.

use std::sync::Arc;

use statewatch_runtime::Lifetime;

use crate::error::ObserveError;
use crate::observable::ObservableCore;
use crate::watch::{Collect, DetachList, Dispatch, SlotCell, SlotSink, Subscription, SubscriptionCore, WatchCore};

mod sealed {
  pub trait Sealed {}
}

/// One or more observation targets and the shape of their result.
///
/// Implemented for `&Source<V>` and for tuples of sources up to arity
/// four. Not implementable outside this crate.
pub trait ObserveSet: sealed::Sealed {
  /// Bare value for a single source, value tuple otherwise.
  type Output: Send + 'static;

  #[doc(hidden)]
  fn attach_wait(self, observer: &Lifetime) -> Result<WaitAttachment<Self::Output>, ObserveError>;

  #[doc(hidden)]
  fn attach_callback(
    self,
    observer: &Lifetime,
    callback: Box<dyn FnMut(Self::Output) + Send>,
  ) -> Result<Subscription, ObserveError>;
}

// ============================================================================
// One-shot attachment
// ============================================================================

/// A one-shot watch registered with every target, plus the closure that
/// reads the result tuple. Detaches from every observable on drop, which
/// covers success, timeout, termination, and caller-task cancellation
/// alike.
#[doc(hidden)]
pub struct WaitAttachment<Out> {
  watch: Arc<WatchCore>,
  collect: Collect<Out>,
  detach: DetachList,
}

impl<Out: Send + 'static> WaitAttachment<Out> {
  fn new(watch: Arc<WatchCore>, collect: Collect<Out>, detach: DetachList) -> Self {
    Self { watch, collect, detach }
  }

  pub(crate) fn watch(&self) -> &Arc<WatchCore> {
    &self.watch
  }

  pub(crate) fn ready(&self) -> bool {
    self.watch.ready()
  }

  pub(crate) fn collect(&self) -> Option<Out> {
    (self.collect)().map(|(out, _)| out)
  }

  /// The `!`-marked target list for timeout diagnostics.
  pub(crate) fn descriptor(&self) -> String {
    self.watch.descriptor()
  }
}

impl<Out> Drop for WaitAttachment<Out> {
  fn drop(&mut self) {
    self.watch.detach();
    for unregister in self.detach.drain(..) {
      unregister();
    }
  }
}

// ============================================================================
// Slot plumbing shared by every impl
// ============================================================================

/// Register one slot's sink with its observable and latch the snapshot
/// returned by the registration.
///
/// The snapshot goes through the same version-latched path as live
/// deliveries, so it cannot clobber a newer value that raced in between.
/// No dispatch fires here; initial subscription readiness is handled
/// once, after every slot is registered.
fn register_slot<V: Clone + Send + 'static>(
  core: &Arc<ObservableCore<V>>,
  watch: &Arc<WatchCore>,
  index: usize,
  cell: Arc<SlotCell<V>>,
  dispatch: Option<Arc<dyn Dispatch>>,
  detach: &mut DetachList,
) {
  let sink = Arc::new(SlotSink {
    cell: Arc::clone(&cell),
    watch: Arc::clone(watch),
    index,
    dispatch,
  });
  let (id, snapshot) = core.register(sink);

  let weak = Arc::downgrade(core);
  detach.push(Box::new(move || {
    if let Some(core) = weak.upgrade() {
      core.unregister(id);
    }
  }));

  if let Some((value, version)) = snapshot {
    if cell.store(&value, version) {
      watch.mark(index, version);
    }
  }
}

// ============================================================================
// Single source
// ============================================================================

impl<V: Clone + Send + 'static> sealed::Sealed for &crate::Source<V> {}

impl<V: Clone + Send + 'static> ObserveSet for &crate::Source<V> {
  type Output = V;

  fn attach_wait(self, observer: &Lifetime) -> Result<WaitAttachment<V>, ObserveError> {
    let core = self.upgrade()?;
    let watch = WatchCore::new(observer.clone(), vec![(self.label_arc(), core.owner().clone())]);
    let cell = Arc::new(SlotCell::new());
    let collect: Collect<V> = {
      let cell = Arc::clone(&cell);
      Box::new(move || cell.entry().map(|(value, version)| (value, vec![version])))
    };
    let mut detach = DetachList::new();
    register_slot(&core, &watch, 0, cell, None, &mut detach);
    Ok(WaitAttachment::new(watch, collect, detach))
  }

  fn attach_callback(
    self,
    observer: &Lifetime,
    callback: Box<dyn FnMut(V) + Send>,
  ) -> Result<Subscription, ObserveError> {
    let core = self.upgrade()?;
    let watch = WatchCore::new(observer.clone(), vec![(self.label_arc(), core.owner().clone())]);
    let cell = Arc::new(SlotCell::new());
    let collect: Collect<V> = {
      let cell = Arc::clone(&cell);
      Box::new(move || cell.entry().map(|(value, version)| (value, vec![version])))
    };
    let sub = SubscriptionCore::new(Arc::clone(&watch), collect, callback);
    let dispatch: Arc<dyn Dispatch> = sub.clone();
    let mut detach = DetachList::new();
    register_slot(&core, &watch, 0, cell, Some(dispatch), &mut detach);
    sub.install_detach(detach);
    sub.finish_attach();
    Ok(Subscription::new(sub))
  }
}

// ============================================================================
// Tuples
// ============================================================================

// Each tuple element gets its own lifetime parameter: spawned futures
// borrow the sources with independent lifetimes, and the auto-trait
// check on those futures needs the impl to be that general.
macro_rules! impl_observe_set {
  ($(($lt:lifetime, $T:ident, $src:ident, $core:ident, $cell:ident, $idx:tt)),+) => {
    impl<$($lt,)+ $($T: Clone + Send + 'static),+> sealed::Sealed for ($(&$lt crate::Source<$T>,)+) {}

    impl<$($lt,)+ $($T: Clone + Send + 'static),+> ObserveSet for ($(&$lt crate::Source<$T>,)+) {
      type Output = ($($T,)+);

      fn attach_wait(self, observer: &Lifetime) -> Result<WaitAttachment<Self::Output>, ObserveError> {
        let ($($src,)+) = self;
        // Validate every target before registering with any of them.
        $(let $core = $src.upgrade()?;)+
        let watch = WatchCore::new(
          observer.clone(),
          vec![$(($src.label_arc(), $core.owner().clone())),+],
        );
        $(let $cell = Arc::new(SlotCell::new());)+
        let collect: Collect<Self::Output> = {
          $(let $cell = Arc::clone(&$cell);)+
          Box::new(move || {
            $(let $src = $cell.entry()?;)+
            Some((($($src.0,)+), vec![$($src.1),+]))
          })
        };
        let mut detach = DetachList::new();
        $(register_slot(&$core, &watch, $idx, Arc::clone(&$cell), None, &mut detach);)+
        Ok(WaitAttachment::new(watch, collect, detach))
      }

      fn attach_callback(
        self,
        observer: &Lifetime,
        callback: Box<dyn FnMut(Self::Output) + Send>,
      ) -> Result<Subscription, ObserveError> {
        let ($($src,)+) = self;
        $(let $core = $src.upgrade()?;)+
        let watch = WatchCore::new(
          observer.clone(),
          vec![$(($src.label_arc(), $core.owner().clone())),+],
        );
        $(let $cell = Arc::new(SlotCell::new());)+
        let collect: Collect<Self::Output> = {
          $(let $cell = Arc::clone(&$cell);)+
          Box::new(move || {
            $(let $src = $cell.entry()?;)+
            Some((($($src.0,)+), vec![$($src.1),+]))
          })
        };
        let sub = SubscriptionCore::new(Arc::clone(&watch), collect, callback);
        let dispatch: Arc<dyn Dispatch> = sub.clone();
        let mut detach = DetachList::new();
        $(register_slot(&$core, &watch, $idx, Arc::clone(&$cell), Some(Arc::clone(&dispatch)), &mut detach);)+
        sub.install_detach(detach);
        sub.finish_attach();
        Ok(Subscription::new(sub))
      }
    }
  };
}

impl_observe_set!(('a, A, src_a, core_a, cell_a, 0), ('b, B, src_b, core_b, cell_b, 1));
impl_observe_set!(
  ('a, A, src_a, core_a, cell_a, 0),
  ('b, B, src_b, core_b, cell_b, 1),
  ('c, C, src_c, core_c, cell_c, 2)
);
impl_observe_set!(
  ('a, A, src_a, core_a, cell_a, 0),
  ('b, B, src_b, core_b, cell_b, 1),
  ('c, C, src_c, core_c, cell_c, 2),
  ('d, D, src_d, core_d, cell_d, 3)
);
