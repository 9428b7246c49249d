//! statewatch
//!
//! Cross-component value observation for actor-style runtimes. One
//! component owns a piece of state as an [`Observable`]; any other
//! component can wait for it (with an optional deadline), join several
//! sources into one wait, or subscribe to every change, with no shared
//! memory, no polling, and in-order latest-value delivery.
//!
//! # Architecture
//!
//! - [`Observable`] / [`Source`]: owner-side and observer-side handles to
//!   one versioned value. Only the owner publishes; the type split
//!   enforces it.
//! - [`Observer`]: per-component capability offering `observe` (blocking
//!   with optional timeout), `subscribe` (callback per change, conflated
//!   under load), and `exclusive` (defer unrelated inbound work while a
//!   wait is outstanding).
//! - Watch (internal): per-call slot bookkeeping; readiness never
//!   reverts, slot versions only move forward.
//! - Bridge (internal): aborts a wait when the owner of a still unset
//!   target terminates.
//!
//! The host scheduler surface (lifetimes, gated mailboxes, spawning)
//! lives in the `statewatch-runtime` crate.
//!
//! # What this is not
//!
//! Not a pub/sub bus with persistence and not a delivery guarantee for
//! every intermediate value: observers see the latest value, in order,
//! without regression, and nothing more.

mod bridge;
mod error;
mod observable;
mod observer;
mod set;
mod watch;

#[cfg(test)]
mod __tests__;

pub use error::ObserveError;
pub use observable::{Observable, Source};
pub use observer::Observer;
pub use set::ObserveSet;
pub use watch::Subscription;
