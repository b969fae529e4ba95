//! The PBD stepping loop.
//!
//! Per tick the solver runs `substep_count` substeps, each walking the phase
//! sequence Predicting -> Projecting (iterated) -> Colliding -> Reconciling.
//! It keeps no state of its own between ticks beyond collision scratch; all
//! simulation state lives in the [`ParticleStore`], which makes a single
//! step testable in isolation.

use glam::Vec3;
use serde::{Deserialize, Serialize};
use tracing::{trace, warn};

use crate::collision::{Collider, CollisionResolver};
use crate::constraint::ConstraintSet;
use crate::error::{Result, SoftBodyError};
use crate::particles::ParticleStore;

/// Solver parameters recognized by the configuration surface.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SolverParams {
    /// Substeps per tick. Must be at least 1.
    pub substep_count: usize,
    /// Constraint projection passes per substep. Must be at least 1.
    pub iteration_count: usize,
    /// External acceleration applied to every free particle.
    pub gravity: Vec3,
    /// Velocity damping in [0, 1] applied during prediction. 0 keeps all
    /// velocity.
    pub global_damping: f32,
    /// Stiffness assigned to constraints built from a descriptor, in [0, 1].
    pub default_stiffness: f32,
    /// Tangential friction damping in [0, 1] applied on contact.
    pub friction: f32,
}

impl Default for SolverParams {
    fn default() -> Self {
        Self {
            substep_count: 4,
            iteration_count: 8,
            gravity: Vec3::new(0.0, -9.8, 0.0),
            global_damping: 0.01,
            default_stiffness: 1.0,
            friction: 0.2,
        }
    }
}

impl SolverParams {
    /// Strict validation: reject any value outside its documented range.
    ///
    /// # Errors
    /// [`SoftBodyError::ParameterOutOfRange`] naming the offending field.
    pub fn validate(&self) -> Result<()> {
        if self.substep_count < 1 {
            return Err(SoftBodyError::ParameterOutOfRange {
                name: "substep_count",
                value: 0.0,
                min: 1.0,
                max: f32::INFINITY,
            });
        }
        if self.iteration_count < 1 {
            return Err(SoftBodyError::ParameterOutOfRange {
                name: "iteration_count",
                value: 0.0,
                min: 1.0,
                max: f32::INFINITY,
            });
        }
        check_unit("global_damping", self.global_damping)?;
        check_unit("default_stiffness", self.default_stiffness)?;
        check_unit("friction", self.friction)?;
        if !self.gravity.is_finite() {
            return Err(SoftBodyError::ParameterOutOfRange {
                name: "gravity",
                value: f32::NAN,
                min: f32::NEG_INFINITY,
                max: f32::INFINITY,
            });
        }
        Ok(())
    }

    /// Lenient variant of [`SolverParams::validate`]: clamp every field into
    /// range, warning about each adjustment, and return the usable result.
    #[must_use]
    pub fn sanitized(&self) -> Self {
        let mut out = self.clone();
        if out.substep_count < 1 {
            warn!(substep_count = out.substep_count, "Clamping substep_count to 1");
            out.substep_count = 1;
        }
        if out.iteration_count < 1 {
            warn!(
                iteration_count = out.iteration_count,
                "Clamping iteration_count to 1"
            );
            out.iteration_count = 1;
        }
        out.global_damping = clamp_unit("global_damping", out.global_damping);
        out.default_stiffness = clamp_unit("default_stiffness", out.default_stiffness);
        out.friction = clamp_unit("friction", out.friction);
        if !out.gravity.is_finite() {
            warn!("Replacing non-finite gravity with zero");
            out.gravity = Vec3::ZERO;
        }
        out
    }
}

fn check_unit(name: &'static str, value: f32) -> Result<()> {
    if !(0.0..=1.0).contains(&value) || !value.is_finite() {
        return Err(SoftBodyError::ParameterOutOfRange {
            name,
            value,
            min: 0.0,
            max: 1.0,
        });
    }
    Ok(())
}

fn clamp_unit(name: &'static str, value: f32) -> f32 {
    if (0.0..=1.0).contains(&value) && value.is_finite() {
        value
    } else {
        let clamped = if value.is_finite() {
            value.clamp(0.0, 1.0)
        } else {
            0.0
        };
        warn!(field = name, value, clamped, "Clamping parameter into [0, 1]");
        clamped
    }
}

/// Phase the solver is in while a tick runs. Outside a tick it is `Idle`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SolverPhase {
    /// Between ticks.
    Idle,
    /// Integrating external forces into predicted positions.
    Predicting,
    /// Running constraint projection passes.
    Projecting,
    /// Resolving collider penetrations.
    Colliding,
    /// Deriving velocities and committing positions.
    Reconciling,
}

/// The time-stepping engine for one instance.
pub struct PbdSolver {
    phase: SolverPhase,
    resolver: CollisionResolver,
}

impl PbdSolver {
    /// Solver for an instance with `particle_count` particles.
    #[must_use]
    pub fn new(particle_count: usize) -> Self {
        Self {
            phase: SolverPhase::Idle,
            resolver: CollisionResolver::new(particle_count),
        }
    }

    /// Current phase. `Idle` whenever no tick is in flight.
    #[must_use]
    pub fn phase(&self) -> SolverPhase {
        self.phase
    }

    /// Particles that touched a collider during the last substep.
    #[must_use]
    pub fn contact_count(&self) -> usize {
        self.resolver.contact_count()
    }

    /// Advance the simulation by `dt`.
    ///
    /// Commits new particle state on success. On `Err` the store may hold
    /// non-finite data; the caller is expected to roll back to its last
    /// good snapshot.
    ///
    /// # Errors
    /// [`SoftBodyError::NumericDivergence`] when a non-finite position is
    /// detected after the last substep.
    pub fn step(
        &mut self,
        params: &SolverParams,
        particles: &mut ParticleStore,
        constraints: &ConstraintSet,
        colliders: &[Collider<'_>],
        dt: f32,
    ) -> Result<()> {
        let substeps = params.substep_count.max(1);
        let iterations = params.iteration_count.max(1);
        let sub_dt = dt / substeps as f32;
        let iteration_scale = 1.0 / iterations as f32;

        for substep in 0..substeps {
            trace!(substep, phase = ?SolverPhase::Predicting, "Substep");
            self.phase = SolverPhase::Predicting;
            particles.predict(sub_dt, params.gravity, params.global_damping);

            self.phase = SolverPhase::Projecting;
            for _ in 0..iterations {
                constraints.project(particles, iteration_scale);
            }

            self.phase = SolverPhase::Colliding;
            self.resolver.resolve(particles, colliders, params.friction);

            self.phase = SolverPhase::Reconciling;
            particles.reconcile(sub_dt);
        }
        self.phase = SolverPhase::Idle;

        if let Some(particle) = particles.first_non_finite() {
            warn!(particle, "Non-finite position after tick");
            return Err(SoftBodyError::NumericDivergence { particle });
        }
        Ok(())
    }
}
