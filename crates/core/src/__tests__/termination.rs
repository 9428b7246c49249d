//! Owner termination: pending waits fail, resolved waits are untouched.

use std::time::Duration;

use pretty_assertions::assert_eq;
use statewatch_runtime::{ComponentCtx, spawn};
use tokio::sync::oneshot;

use super::helpers::{observer, published};
use crate::{Observable, ObserveError, Source};

#[tokio::test(start_paused = true)]
async fn owner_termination_fails_a_pending_wait() {
  let (owner, observable, source) = published::<u32>("Worker");
  let obs = observer();

  let wait = tokio::spawn(async move { obs.observe(&source).await });
  tokio::time::sleep(Duration::from_millis(5)).await;
  owner.terminate();

  let err = wait.await.unwrap().unwrap_err();
  assert!(matches!(err, ObserveError::Terminated { ref target } if target == "Worker"));
  assert!(err.is_fatal());
  assert_eq!(observable.waiter_count(), 0);
}

#[tokio::test]
async fn observing_an_already_dead_owner_fails_fast() {
  let (owner, _observable, source) = published::<u32>("Worker");
  owner.terminate();

  let err = observer().observe(&source).await.unwrap_err();
  assert!(matches!(err, ObserveError::Terminated { ref target } if target == "Worker"));
}

#[tokio::test]
async fn termination_after_the_value_is_set_is_harmless() {
  let (owner, observable, source) = published::<u32>("Worker");
  observable.update(7);
  owner.terminate();

  assert_eq!(observer().observe(&source).await.unwrap(), 7);
}

#[tokio::test(start_paused = true)]
async fn death_of_a_ready_slots_owner_does_not_abort_the_wait() {
  let (oa, a, sa) = published::<u32>("A");
  let (_ob, b, sb) = published::<u32>("B");
  a.update(1);

  let obs = observer();
  let wait = tokio::spawn(async move { obs.observe((&sa, &sb)).await });
  tokio::time::sleep(Duration::from_millis(5)).await;

  // A already delivered; only B's owner is still being monitored.
  oa.terminate();
  tokio::time::sleep(Duration::from_millis(5)).await;
  b.update(2);

  assert_eq!(wait.await.unwrap().unwrap(), (1, 2));
}

#[tokio::test(start_paused = true)]
async fn death_of_any_unset_slots_owner_aborts_a_joint_wait() {
  let (_oa, a, sa) = published::<u32>("A");
  let (ob, _b, sb) = published::<u32>("B");
  a.update(1);

  let obs = observer();
  let wait = tokio::spawn(async move { obs.observe((&sa, &sb)).await });
  tokio::time::sleep(Duration::from_millis(5)).await;
  ob.terminate();

  let err = wait.await.unwrap().unwrap_err();
  assert!(matches!(err, ObserveError::Terminated { ref target } if target == "B"));
}

#[tokio::test(start_paused = true)]
async fn aborting_the_owning_component_fails_the_wait() {
  let (tx, rx) = oneshot::channel::<Source<u32>>();
  let handle = spawn("Stalled", 8, move |ctx: ComponentCtx<u32>| async move {
    let observable = Observable::<u32>::new(&ctx.lifetime);
    let _ = tx.send(observable.source());
    std::future::pending::<()>().await
  });

  let source = rx.await.unwrap();
  let obs = observer();
  let wait = tokio::spawn(async move { obs.observe(&source).await });
  tokio::time::sleep(Duration::from_millis(5)).await;

  handle.abort();
  let err = wait.await.unwrap().unwrap_err();
  assert!(matches!(err, ObserveError::Terminated { ref target } if target == "Stalled"));
}
