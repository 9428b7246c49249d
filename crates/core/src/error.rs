//! Error types for observation calls

/// Why an observation call failed.
///
/// Timeouts and terminations are always surfaced to the caller; nothing
/// is retried internally. After a `Terminated` error the caller decides
/// whether to re-observe, typically once a supervisor has restarted the
/// dependency.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ObserveError {
  /// The deadline elapsed before every target had a value.
  ///
  /// `targets` lists each target's owner label in argument order, with a
  /// `!` prefix on every target that was still unset when the deadline
  /// hit, e.g. `observe timeout 0.10s: T1, !T2`.
  #[error("observe timeout {seconds:.2}s: {targets}")]
  Timeout { seconds: f64, targets: String },

  /// The owner of a not-yet-ready target terminated, so the value can
  /// never arrive.
  #[error("owner of {target} terminated before publishing a value")]
  Terminated { target: String },

  /// A target's observable no longer exists (its owner dropped it).
  /// Raised before any registration happens; the call never partially
  /// registers.
  #[error("cannot observe {target}: the observable no longer exists")]
  InvalidTarget { target: String },
}

impl ObserveError {
  /// True if this error means the wait can never succeed without the
  /// dependency being recreated.
  pub fn is_fatal(&self) -> bool {
    matches!(self, Self::Terminated { .. } | Self::InvalidTarget { .. })
  }
}
