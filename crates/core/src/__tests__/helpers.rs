//! Shared fixtures for scenario tests.

use std::sync::Arc;

use parking_lot::Mutex;
use statewatch_runtime::Lifetime;

use crate::{Observable, Observer, Source};

/// An observable published by a component labeled `label`, plus the
/// pieces tests usually need: the owner lifetime (to terminate it) and a
/// source (to observe it).
pub fn published<V: Clone + Send + 'static>(label: &str) -> (Lifetime, Observable<V>, Source<V>) {
  let owner = Lifetime::new(label);
  let observable = Observable::new(&owner);
  let source = observable.source();
  (owner, observable, source)
}

/// An observer belonging to a throwaway component.
pub fn observer() -> Observer {
  Observer::new(&Lifetime::new("TestObserver"))
}

/// Thread-safe event log for asserting callback/delivery order.
#[derive(Clone)]
pub struct Log<T> {
  entries: Arc<Mutex<Vec<T>>>,
}

impl<T: Clone> Log<T> {
  pub fn new() -> Self {
    Self {
      entries: Arc::new(Mutex::new(Vec::new())),
    }
  }

  pub fn push(&self, entry: T) {
    self.entries.lock().push(entry);
  }

  pub fn entries(&self) -> Vec<T> {
    self.entries.lock().clone()
  }

  pub fn len(&self) -> usize {
    self.entries.lock().len()
  }
}
