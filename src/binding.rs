//! Mapping simulated particles back onto render-mesh vertices.
//!
//! A binding is fixed at construction and side-effect free afterwards:
//! sampling projects the current particle positions into vertex space without
//! touching simulation state. A coarse simulation mesh can drive a finer
//! render mesh through barycentric weights.

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TopologyIssue};
use crate::particles::ParticleStore;

/// How one render vertex follows the simulation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum VertexBinding {
    /// The vertex tracks a single particle.
    Direct(usize),
    /// The vertex is a weighted combination of three particles.
    Barycentric {
        /// The driving particles.
        particles: [usize; 3],
        /// Barycentric weights; conventionally summing to one.
        weights: [f32; 3],
    },
}

impl VertexBinding {
    fn validate(&self, particle_count: usize) -> Result<()> {
        let check = |index: usize| -> Result<()> {
            if index >= particle_count {
                return Err(TopologyIssue::IndexOutOfRange {
                    index,
                    count: particle_count,
                }
                .into());
            }
            Ok(())
        };
        match self {
            VertexBinding::Direct(index) => check(*index),
            VertexBinding::Barycentric { particles, .. } => {
                for &i in particles {
                    check(i)?;
                }
                Ok(())
            }
        }
    }

    fn sample(&self, particles: &ParticleStore) -> Vec3 {
        match self {
            VertexBinding::Direct(index) => particles.position(*index),
            VertexBinding::Barycentric {
                particles: ids,
                weights,
            } => {
                particles.position(ids[0]) * weights[0]
                    + particles.position(ids[1]) * weights[1]
                    + particles.position(ids[2]) * weights[2]
            }
        }
    }
}

/// Fixed vertex-to-particle mapping for one render mesh.
#[derive(Clone, Debug)]
pub struct MeshBinding {
    bindings: Vec<VertexBinding>,
}

impl MeshBinding {
    /// Build a binding, validating every referenced particle index.
    ///
    /// # Errors
    /// [`TopologyIssue::IndexOutOfRange`] for a vertex bound to a particle
    /// beyond `particle_count`.
    pub fn bind(bindings: Vec<VertexBinding>, particle_count: usize) -> Result<Self> {
        for binding in &bindings {
            binding.validate(particle_count)?;
        }
        Ok(Self { bindings })
    }

    /// One-to-one mapping: vertex `i` follows particle `i`.
    #[must_use]
    pub fn direct(particle_count: usize) -> Self {
        Self {
            bindings: (0..particle_count).map(VertexBinding::Direct).collect(),
        }
    }

    /// Number of render vertices this binding produces.
    #[must_use]
    pub fn vertex_count(&self) -> usize {
        self.bindings.len()
    }

    /// Current particle positions remapped into vertex space.
    #[must_use]
    pub fn sample(&self, particles: &ParticleStore) -> Vec<Vec3> {
        self.bindings
            .iter()
            .map(|binding| binding.sample(particles))
            .collect()
    }

    /// Sample into a caller-owned buffer, reusing its allocation.
    pub fn sample_into(&self, particles: &ParticleStore, out: &mut Vec<Vec3>) {
        out.clear();
        out.extend(self.bindings.iter().map(|binding| binding.sample(particles)));
    }

    /// Sampled positions blended against host-supplied target vertex
    /// positions (e.g. a skinned animation pose). `weight` 0 returns the
    /// targets untouched, 1 the pure simulation output. Targets beyond the
    /// binding's vertex count are ignored; missing targets fall back to the
    /// simulated position.
    #[must_use]
    pub fn sample_blended(
        &self,
        particles: &ParticleStore,
        targets: &[Vec3],
        weight: f32,
    ) -> Vec<Vec3> {
        let weight = weight.clamp(0.0, 1.0);
        self.bindings
            .iter()
            .enumerate()
            .map(|(i, binding)| {
                let simulated = binding.sample(particles);
                match targets.get(i) {
                    Some(&target) => target.lerp(simulated, weight),
                    None => simulated,
                }
            })
            .collect()
    }
}
