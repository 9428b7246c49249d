//! Blocking observes: immediate returns, suspension, joint waits, and
//! deadline behavior.

use std::time::Duration;

use futures::FutureExt;
use pretty_assertions::assert_eq;

use super::helpers::{observer, published};
use crate::ObserveError;

#[tokio::test]
async fn returns_immediately_when_the_value_is_set() {
  let (_owner, observable, source) = published::<u32>("T");
  observable.update(42);

  // Resolves on the first poll, without suspending.
  let result = observer().observe(&source).now_or_never();
  assert_eq!(result.unwrap().unwrap(), 42);
}

#[tokio::test(start_paused = true)]
async fn suspends_until_the_owner_publishes() {
  let (_owner, observable, source) = published::<u32>("T");
  let obs = observer();

  let wait = tokio::spawn(async move { obs.observe(&source).await });
  tokio::time::sleep(Duration::from_millis(5)).await;
  observable.update(7);

  assert_eq!(wait.await.unwrap().unwrap(), 7);
  assert_eq!(observable.waiter_count(), 0);
}

#[test]
fn observe_futures_are_send() {
  fn spawnable<F: Future + Send>(fut: F) -> F {
    fut
  }

  let (_owner, _observable, source) = published::<u32>("T");
  let obs = observer();
  drop(spawnable(async move { obs.observe(&source).await }));

  // Tuples borrow each source with its own lifetime inside the future.
  let (_oa, _a, sa) = published::<u32>("A");
  let (_ob, _b, sb) = published::<String>("B");
  let obs = observer();
  drop(spawnable(async move { obs.observe((&sa, &sb)).await }));
}

#[tokio::test]
async fn repeated_observes_see_the_latest_value() {
  let (_owner, observable, source) = published::<u32>("T");
  let obs = observer();

  observable.update(1);
  assert_eq!(obs.observe(&source).await.unwrap(), 1);

  observable.update(2);
  assert_eq!(obs.observe(&source).await.unwrap(), 2);
}

#[tokio::test]
async fn joint_observe_returns_immediately_when_all_are_set() {
  let (_oa, a, sa) = published::<u32>("A");
  let (_ob, b, sb) = published::<String>("B");
  a.update(1);
  b.update("up".to_string());

  let result = observer().observe((&sa, &sb)).now_or_never();
  assert_eq!(result.unwrap().unwrap(), (1, "up".to_string()));
}

#[tokio::test(start_paused = true)]
async fn joint_observe_carries_the_latest_values() {
  let (_oa, a, sa) = published::<u32>("A");
  let (_ob, b, sb) = published::<String>("B");
  a.update(1);

  let obs = observer();
  let wait = tokio::spawn(async move { obs.observe((&sa, &sb)).await });
  tokio::time::sleep(Duration::from_millis(5)).await;

  // A moves on before B becomes ready; the wait must report A's newest
  // value, not the one present when the wait started.
  a.update(2);
  b.update("up".to_string());

  assert_eq!(wait.await.unwrap().unwrap(), (2, "up".to_string()));
}

#[tokio::test(start_paused = true)]
async fn timeout_marks_the_unset_target() {
  let (_owner, _observable, source) = published::<u32>("T");

  let err = observer()
    .observe_for(&source, Duration::from_millis(10))
    .await
    .unwrap_err();
  assert_eq!(err.to_string(), "observe timeout 0.01s: !T");
  assert!(!err.is_fatal());
}

#[tokio::test(start_paused = true)]
async fn timeout_lists_targets_in_argument_order() {
  let (_o1, t1, s1) = published::<u32>("T1");
  let (_o2, _t2, s2) = published::<u32>("T2");
  t1.update(1);

  let err = observer()
    .observe_for((&s1, &s2), Duration::from_millis(100))
    .await
    .unwrap_err();
  assert_eq!(err.to_string(), "observe timeout 0.10s: T1, !T2");
}

#[tokio::test(start_paused = true)]
async fn timed_out_wait_detaches_from_every_target() {
  let (_o1, t1, s1) = published::<u32>("T1");
  let (_o2, t2, s2) = published::<u32>("T2");
  t1.update(1);

  let err = observer()
    .observe_for((&s1, &s2), Duration::from_millis(10))
    .await
    .unwrap_err();
  assert!(matches!(err, ObserveError::Timeout { .. }));
  assert_eq!(t1.waiter_count(), 0);
  assert_eq!(t2.waiter_count(), 0);

  // A late value cannot resolve the abandoned wait; it just sits in the
  // observable for the next observer.
  t2.update(9);
  assert_eq!(s2.peek(), Some(9));
}

#[tokio::test]
async fn observe_within_the_deadline_succeeds() {
  let (_owner, observable, source) = published::<u32>("T");
  observable.update(3);

  let value = observer()
    .observe_for(&source, Duration::from_secs(5))
    .await
    .unwrap();
  assert_eq!(value, 3);
}

#[tokio::test]
async fn dropped_observable_is_an_invalid_target() {
  let (_owner, observable, source) = published::<u32>("T");
  drop(observable);

  let err = observer().observe(&source).await.unwrap_err();
  assert!(matches!(err, ObserveError::InvalidTarget { ref target } if target == "T"));
  assert!(err.is_fatal());
}

#[tokio::test]
async fn invalid_target_fails_before_registering_anywhere() {
  let (_o1, t1, s1) = published::<u32>("T1");
  let (_o2, t2, s2) = published::<u32>("T2");
  drop(t2);

  let err = observer().observe((&s1, &s2)).await.unwrap_err();
  assert!(matches!(err, ObserveError::InvalidTarget { ref target } if target == "T2"));
  // The valid target was never touched.
  assert_eq!(t1.waiter_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn observe_after_reset_blocks_until_the_next_update() {
  let (_owner, observable, source) = published::<u32>("T");
  observable.update(1);
  assert_eq!(observer().observe(&source).await.unwrap(), 1);

  observable.reset();
  let obs = observer();
  let wait = tokio::spawn(async move { obs.observe(&source).await });
  tokio::time::sleep(Duration::from_millis(5)).await;
  assert!(!wait.is_finished());

  observable.update(2);
  assert_eq!(wait.await.unwrap().unwrap(), 2);
}

#[tokio::test(start_paused = true)]
async fn cancelling_the_waiting_task_detaches() {
  let (_owner, observable, source) = published::<u32>("T");
  let obs = observer();

  let wait = tokio::spawn(async move {
    let _ = obs.observe(&source).await;
  });
  tokio::time::sleep(Duration::from_millis(5)).await;
  assert_eq!(observable.waiter_count(), 1);

  wait.abort();
  let _ = wait.await;
  assert_eq!(observable.waiter_count(), 0);
}
