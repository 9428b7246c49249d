//! Component spawning
//!
//! A component is a task that owns its state and processes inbound work
//! from an [`Inbox`], one message at a time. [`spawn`] wires up the
//! lifetime and mailbox and guarantees the lifetime terminates when the
//! body ends, no matter how.

use tokio::task::JoinHandle;
use tracing::debug;

use crate::{Inbox, InboxSender, Lifetime};

/// Everything a component body needs: its own lifetime and its mailbox.
pub struct ComponentCtx<M> {
  pub lifetime: Lifetime,
  pub inbox: Inbox<M>,
}

/// Handle to a spawned component.
pub struct ComponentHandle<M> {
  sender: InboxSender<M>,
  lifetime: Lifetime,
  join: JoinHandle<()>,
}

impl<M: Send + 'static> ComponentHandle<M> {
  /// Sender for this component's inbox.
  pub fn sender(&self) -> InboxSender<M> {
    self.sender.clone()
  }

  /// The component's lifetime, for liveness checks and termination.
  pub fn lifetime(&self) -> &Lifetime {
    &self.lifetime
  }

  /// Forcibly abort the component task. Its lifetime terminates via the
  /// drop guard held by the task.
  pub fn abort(&self) {
    self.join.abort();
  }

  /// Wait for the component task to finish.
  pub async fn join(self) {
    let _ = self.join.await;
  }
}

/// Spawn a component task.
///
/// The body receives a [`ComponentCtx`] and runs to completion; the
/// component's [`Lifetime`] is terminated when the body returns, panics,
/// or is aborted. The inbox is bounded at `capacity` messages.
pub fn spawn<M, F, Fut>(label: impl Into<String>, capacity: usize, body: F) -> ComponentHandle<M>
where
  M: Send + 'static,
  F: FnOnce(ComponentCtx<M>) -> Fut,
  Fut: Future<Output = ()> + Send + 'static,
{
  let lifetime = Lifetime::new(label);
  let (sender, inbox) = Inbox::channel(capacity);
  debug!(label = %lifetime.label(), "Spawning component");

  let fut = body(ComponentCtx {
    lifetime: lifetime.clone(),
    inbox,
  });
  // The guard must exist before the task is spawned: an abort that lands
  // before the first poll drops the future without ever running it, and
  // the lifetime still has to terminate.
  let guard = lifetime.terminate_on_drop();
  let join = tokio::spawn(async move {
    let _guard = guard;
    fut.await;
  });

  ComponentHandle { sender, lifetime, join }
}
