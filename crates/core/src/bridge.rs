//! Crash/lifetime bridge: ties in-flight waits to the liveness of the
//! observed owners
//!
//! While a watch has unset slots, the owners of those slots are
//! monitored; if one terminates, the wait can never complete and must be
//! aborted. Slots that already have a value stop being monitored: their
//! owner dying no longer affects the wait.

use futures::future::{pending, select_all};
use statewatch_runtime::Lifetime;

use crate::watch::WatchCore;

/// Resolves with the index of an unset slot whose owner terminated.
///
/// Only the slots unset at call time are monitored; the wait loop calls
/// this again after every wakeup, naturally dropping slots that became
/// ready in the meantime. Never resolves if every slot is ready.
pub(crate) async fn owner_lost(watch: &WatchCore) -> usize {
  let unready: Vec<(usize, Lifetime)> = watch.unready_owners();
  if unready.is_empty() {
    return pending().await;
  }

  let terminations = unready.into_iter().map(|(index, owner)| {
    Box::pin(async move {
      owner.terminated().await;
      index
    })
  });
  let (index, _, _) = select_all(terminations).await;
  index
}
