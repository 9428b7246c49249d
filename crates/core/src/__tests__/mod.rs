//! Scenario tests for the observation primitive.
//!
//! Unit coverage lives next to each module; these tests exercise the
//! pieces together: blocking observes, joint observation, subscriptions
//! under load, owner termination, and exclusive-mode deferral.

mod helpers;

mod exclusive;
mod observe;
mod termination;
