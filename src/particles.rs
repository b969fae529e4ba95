//! Flat particle state storage.
//!
//! Positions, predicted positions, velocities and inverse masses live in
//! parallel arrays; a particle's index is its sole identity and stays stable
//! for the life of the simulation. An inverse mass of zero marks a pinned
//! particle, which never moves under prediction or projection.

use glam::Vec3;
use tracing::debug;

use crate::error::{Result, TopologyIssue};

/// Structure-of-arrays particle state owned by one simulation instance.
#[derive(Clone, Debug)]
pub struct ParticleStore {
    positions: Vec<Vec3>,
    predicted: Vec<Vec3>,
    velocities: Vec<Vec3>,
    inv_masses: Vec<f32>,
}

/// Copy of the committed state, used for divergence rollback.
#[derive(Clone, Debug)]
pub struct ParticleSnapshot {
    positions: Vec<Vec3>,
    velocities: Vec<Vec3>,
}

impl ParticleStore {
    /// Allocate and populate particle state.
    ///
    /// # Errors
    /// Returns [`TopologyIssue::LengthMismatch`] when the arrays disagree,
    /// [`TopologyIssue::Empty`] for zero particles, and
    /// [`TopologyIssue::InvalidInverseMass`] for a negative or non-finite
    /// inverse mass.
    pub fn new(positions: Vec<Vec3>, inv_masses: Vec<f32>) -> Result<Self> {
        if positions.len() != inv_masses.len() {
            return Err(TopologyIssue::LengthMismatch {
                positions: positions.len(),
                inv_masses: inv_masses.len(),
            }
            .into());
        }
        if positions.is_empty() {
            return Err(TopologyIssue::Empty.into());
        }
        for (index, &value) in inv_masses.iter().enumerate() {
            if !value.is_finite() || value < 0.0 {
                return Err(TopologyIssue::InvalidInverseMass { index, value }.into());
            }
        }

        debug!(
            particles = positions.len(),
            pinned = inv_masses.iter().filter(|&&w| w == 0.0).count(),
            "Particle store initialized"
        );

        Ok(Self {
            predicted: positions.clone(),
            velocities: vec![Vec3::ZERO; positions.len()],
            positions,
            inv_masses,
        })
    }

    /// Number of particles.
    #[must_use]
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    /// True when the store holds no particles. Construction rejects the
    /// empty state, so this is here for completeness.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Committed position of a particle.
    #[must_use]
    pub fn position(&self, index: usize) -> Vec3 {
        self.positions[index]
    }

    /// All committed positions.
    #[must_use]
    pub fn positions(&self) -> &[Vec3] {
        &self.positions
    }

    /// Predicted (in-flight) position of a particle.
    #[must_use]
    pub fn predicted(&self, index: usize) -> Vec3 {
        self.predicted[index]
    }

    /// Velocity of a particle.
    #[must_use]
    pub fn velocity(&self, index: usize) -> Vec3 {
        self.velocities[index]
    }

    /// Inverse mass of a particle. Zero means pinned.
    #[must_use]
    pub fn inv_mass(&self, index: usize) -> f32 {
        self.inv_masses[index]
    }

    /// True when the particle is immovable.
    #[must_use]
    pub fn is_pinned(&self, index: usize) -> bool {
        self.inv_masses[index] == 0.0
    }

    /// Move a predicted position by a correction delta. Pinned particles are
    /// left untouched.
    pub fn correct_predicted(&mut self, index: usize, delta: Vec3) {
        if self.inv_masses[index] > 0.0 {
            self.predicted[index] += delta;
        }
    }

    /// Overwrite a predicted position directly (collision projection).
    /// Pinned particles are left untouched.
    pub fn set_predicted(&mut self, index: usize, value: Vec3) {
        if self.inv_masses[index] > 0.0 {
            self.predicted[index] = value;
        }
    }

    /// Overwrite a committed position. Host-side teleport; velocity is kept.
    pub fn set_position(&mut self, index: usize, value: Vec3) {
        self.positions[index] = value;
        self.predicted[index] = value;
    }

    /// Integrate external acceleration into predicted positions.
    ///
    /// For every free particle: damp the velocity, apply gravity over `dt`
    /// and extrapolate the position. Pinned particles keep their committed
    /// position as the prediction.
    pub fn predict(&mut self, dt: f32, gravity: Vec3, damping: f32) {
        let keep = 1.0 - damping.clamp(0.0, 1.0);
        for i in 0..self.positions.len() {
            if self.inv_masses[i] == 0.0 {
                self.predicted[i] = self.positions[i];
                continue;
            }
            self.velocities[i] = (self.velocities[i] + gravity * dt) * keep;
            self.predicted[i] = self.positions[i] + self.velocities[i] * dt;
        }
    }

    /// Derive velocities from the positional change and commit predictions.
    pub fn reconcile(&mut self, dt: f32) {
        let inv_dt = 1.0 / dt;
        for i in 0..self.positions.len() {
            self.velocities[i] = (self.predicted[i] - self.positions[i]) * inv_dt;
            self.positions[i] = self.predicted[i];
        }
    }

    /// Index of the first particle with a non-finite committed position,
    /// if any.
    #[must_use]
    pub fn first_non_finite(&self) -> Option<usize> {
        self.positions.iter().position(|p| !p.is_finite())
    }

    /// Capture committed state for rollback.
    #[must_use]
    pub fn snapshot(&self) -> ParticleSnapshot {
        ParticleSnapshot {
            positions: self.positions.clone(),
            velocities: self.velocities.clone(),
        }
    }

    /// Restore committed state from a snapshot taken on this store.
    pub fn restore(&mut self, snapshot: &ParticleSnapshot) {
        self.positions.copy_from_slice(&snapshot.positions);
        self.predicted.copy_from_slice(&snapshot.positions);
        self.velocities.copy_from_slice(&snapshot.velocities);
    }
}
