//! Exclusive mode: a component's unrelated inbound work parks behind an
//! outstanding wait and replays in order afterwards.

use std::time::Duration;

use pretty_assertions::assert_eq;
use statewatch_runtime::{ComponentCtx, spawn};

use super::helpers::{Log, observer, published};
use crate::Observer;

#[tokio::test(start_paused = true)]
async fn defers_normal_messages_until_the_wait_ends() {
  let (_oa, a, sa) = published::<u32>("A");
  let (_ob, _b, sb) = published::<u32>("B");
  a.update(1);

  let log: Log<String> = Log::new();
  let events = log.clone();
  let handle = spawn("Waiter", 8, move |mut ctx: ComponentCtx<u32>| async move {
    let obs = Observer::with_gate(&ctx.lifetime, ctx.inbox.gate());
    let wait = obs.exclusive(obs.observe_for((&sa, &sb), Duration::from_millis(100)));
    tokio::pin!(wait);

    loop {
      tokio::select! {
        biased;
        result = &mut wait => {
          match result {
            Ok(_) => events.push("result:ok".to_string()),
            Err(err) => events.push(format!("result:{err}")),
          }
          break;
        }
        message = ctx.inbox.recv() => match message {
          Some(m) => events.push(format!("msg:{m}")),
          None => return,
        },
      }
    }

    // The gate reopened with the wait; parked messages drain in order.
    while let Some(m) = ctx.inbox.recv().await {
      events.push(format!("msg:{m}"));
      if m == 0 {
        break;
      }
    }
  });

  let tx = handle.sender();
  tx.send(1).await.unwrap();
  tx.send(2).await.unwrap();
  tx.send_urgent(99).await.unwrap();
  tx.send(3).await.unwrap();
  tx.send(0).await.unwrap();

  // A churning while B stays silent must not disturb the timeout or its
  // target list.
  tokio::time::sleep(Duration::from_millis(10)).await;
  for n in 2..=20 {
    a.update(n);
  }
  handle.join().await;

  let entries = log.entries();
  assert_eq!(
    entries.iter().map(String::as_str).collect::<Vec<_>>(),
    vec![
      "msg:99",
      "result:observe timeout 0.10s: A, !B",
      "msg:1",
      "msg:2",
      "msg:3",
      "msg:0",
    ]
  );
}

#[tokio::test(start_paused = true)]
async fn wait_progresses_while_the_gate_is_held() {
  let (_owner, observable, source) = published::<u32>("T");

  let log: Log<String> = Log::new();
  let events = log.clone();
  let handle = spawn("Waiter", 8, move |mut ctx: ComponentCtx<u32>| async move {
    let obs = Observer::with_gate(&ctx.lifetime, ctx.inbox.gate());
    let wait = obs.exclusive(obs.observe(&source));
    tokio::pin!(wait);

    loop {
      tokio::select! {
        biased;
        result = &mut wait => {
          events.push(format!("value:{}", result.unwrap()));
          break;
        }
        message = ctx.inbox.recv() => match message {
          Some(m) => events.push(format!("msg:{m}")),
          None => return,
        },
      }
    }
    if let Some(m) = ctx.inbox.recv().await {
      events.push(format!("msg:{m}"));
    }
  });

  let tx = handle.sender();
  tx.send(5).await.unwrap();
  tokio::time::sleep(Duration::from_millis(5)).await;

  // The value delivery does not travel through the mailbox, so it lands
  // even though message 5 is parked.
  observable.update(42);
  handle.join().await;

  let entries = log.entries();
  assert_eq!(entries.iter().map(String::as_str).collect::<Vec<_>>(), vec!["value:42", "msg:5"]);
}

#[tokio::test]
async fn standalone_gate_never_defers_anything() {
  let (_owner, observable, source) = published::<u32>("T");
  observable.update(5);

  let obs = observer();
  let value = obs.exclusive(obs.observe(&source)).await.unwrap();
  assert_eq!(value, 5);
}
