//! Host-runtime scaffolding for statewatch components
//!
//! Components are long-lived tasks that process one unit of work at a time
//! and communicate via message passing. This crate provides the narrow
//! collaborator surface the observation core consumes:
//!
//! - [`Lifetime`]: component identity plus termination detection. Any
//!   party holding a clone can ask "is this component still alive?" or
//!   await its termination.
//! - [`Inbox`] / [`InboxSender`]: a bounded mailbox with an urgent lane
//!   and an [`ExclusiveGate`]. While the gate is held, only urgent
//!   messages pass; everything else is deferred and replayed in order.
//! - [`spawn`]: runs a component body as a task whose [`Lifetime`] is
//!   terminated when the body ends for any reason (return, panic, abort).
//!
//! The full scheduler story (dispatch policy, supervision, restart) is
//! deliberately not here; callers bring their own.

mod component;
mod inbox;
mod lifetime;

pub use component::{ComponentCtx, ComponentHandle, spawn};
pub use inbox::{ExclusiveGate, GateHold, Inbox, InboxSender, SendError};
pub use lifetime::{Lifetime, TerminateOnDrop};
