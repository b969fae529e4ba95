//! Error taxonomy for soft-body construction and stepping.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, SoftBodyError>;

/// Errors surfaced by the simulation core.
///
/// Construction-time errors (`InvalidTopology`, `ParameterOutOfRange`)
/// abort instance creation or reconfiguration and are never retried.
/// Runtime instability is reported per tick as
/// [`TickStatus::NumericDivergence`] after the context has rolled back to the
/// last good snapshot; `NumericDivergence` only appears as an error from the
/// raw solver entry point.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SoftBodyError {
    /// Malformed sizes or indices at construction.
    #[error("invalid topology: {0}")]
    InvalidTopology(#[from] TopologyIssue),

    /// A non-finite position was detected after a tick.
    #[error("numeric divergence: non-finite position at particle {particle}")]
    NumericDivergence {
        /// Index of the first offending particle.
        particle: usize,
    },

    /// A configuration value is outside its documented range.
    #[error("{name} must be in [{min}, {max}], got {value}")]
    ParameterOutOfRange {
        /// Name of the offending parameter.
        name: &'static str,
        /// Value that was supplied.
        value: f32,
        /// Lower bound, inclusive.
        min: f32,
        /// Upper bound, inclusive.
        max: f32,
    },

    /// An instance handle is stale or was never issued.
    #[error("unknown instance handle (index {index}, generation {generation})")]
    UnknownInstance {
        /// Slot index of the handle.
        index: u32,
        /// Generation of the handle.
        generation: u32,
    },
}

/// Specific topology defects behind [`SoftBodyError::InvalidTopology`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TopologyIssue {
    /// Parallel particle arrays disagree in length.
    #[error("{positions} positions but {inv_masses} inverse masses")]
    LengthMismatch {
        /// Number of initial positions supplied.
        positions: usize,
        /// Number of inverse masses supplied.
        inv_masses: usize,
    },

    /// A constraint or binding references a particle that does not exist.
    #[error("particle index {index} out of range (count: {count})")]
    IndexOutOfRange {
        /// The offending index.
        index: usize,
        /// Number of particles in the store.
        count: usize,
    },

    /// An inverse mass was negative or non-finite.
    #[error("inverse mass {value} at particle {index} (must be finite and >= 0)")]
    InvalidInverseMass {
        /// Particle index.
        index: usize,
        /// The offending value.
        value: f32,
    },

    /// The instance has no particles at all.
    #[error("particle count must be at least 1")]
    Empty,
}

/// Per-tick status code returned to the host.
///
/// A real-time stepping loop cannot unwind mid-frame, so tick failures are
/// recovered locally and reported as a status rather than an `Err`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickStatus {
    /// The tick completed and new state was committed.
    Ok,
    /// The tick produced non-finite positions; state was rolled back to the
    /// last good snapshot. The host may retry next frame, ideally with
    /// gentler parameters.
    NumericDivergence,
}

impl TickStatus {
    /// True when the tick committed new state.
    #[must_use]
    pub fn is_ok(self) -> bool {
        matches!(self, TickStatus::Ok)
    }
}
