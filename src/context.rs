//! Per-instance lifecycle, configuration and the host-facing surface.
//!
//! A [`SimulationContext`] owns one particle store, one constraint set and
//! one mesh binding. Topology is frozen once the context reaches `Ready`;
//! only parameters, stiffness values and attachment anchors vary afterwards.
//! Independent contexts share no mutable state, so a host may step many of
//! them in parallel across worker threads.

use std::collections::HashSet;

use glam::Vec3;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::binding::{MeshBinding, VertexBinding};
use crate::collision::Collider;
use crate::constraint::ConstraintSet;
use crate::error::{Result, SoftBodyError, TickStatus};
use crate::particles::{ParticleSnapshot, ParticleStore};
use crate::solver::{PbdSolver, SolverParams};

/// Declarative description of one soft body, suitable for host persistence.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TopologyDescriptor {
    /// Initial particle positions.
    pub positions: Vec<Vec3>,
    /// Inverse masses, parallel to `positions`. Zero pins a particle.
    pub inv_masses: Vec<f32>,
    /// Constraints to build; rest values are measured from `positions`.
    pub constraints: Vec<ConstraintDescriptor>,
    /// Render-vertex mapping. `None` binds vertices one-to-one.
    pub bindings: Option<Vec<VertexBinding>>,
}

/// One constraint in a [`TopologyDescriptor`]. Stiffness defaults to the
/// instance's `default_stiffness` when absent.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum ConstraintDescriptor {
    /// Distance constraint between two particles.
    Distance {
        /// First particle.
        a: usize,
        /// Second particle.
        b: usize,
        /// Optional stiffness override.
        stiffness: Option<f32>,
    },
    /// Dihedral bending constraint.
    Bending {
        /// Shared edge particles.
        edge: [usize; 2],
        /// Apex particles of the adjacent triangles.
        wings: [usize; 2],
        /// Optional stiffness override.
        stiffness: Option<f32>,
    },
    /// Tetrahedron volume constraint.
    Volume {
        /// The four corners.
        indices: [usize; 4],
        /// Optional stiffness override.
        stiffness: Option<f32>,
    },
    /// Particle-to-anchor attachment.
    Attachment {
        /// The constrained particle.
        particle: usize,
        /// World-space anchor.
        target: Vec3,
        /// Optional stiffness override.
        stiffness: Option<f32>,
    },
}

impl ConstraintDescriptor {
    /// Key identifying structurally equal constraints, order-insensitive
    /// where the geometry is.
    fn dedup_key(&self) -> Option<(u8, [usize; 4])> {
        match *self {
            ConstraintDescriptor::Distance { a, b, .. } => {
                Some((0, [a.min(b), a.max(b), 0, 0]))
            }
            ConstraintDescriptor::Bending { edge, wings, .. } => {
                let e = [edge[0].min(edge[1]), edge[0].max(edge[1])];
                let w = [wings[0].min(wings[1]), wings[0].max(wings[1])];
                Some((1, [e[0], e[1], w[0], w[1]]))
            }
            ConstraintDescriptor::Volume { mut indices, .. } => {
                indices.sort_unstable();
                Some((2, indices))
            }
            // Attachments may legitimately stack multiple anchors on one
            // particle.
            ConstraintDescriptor::Attachment { .. } => None,
        }
    }
}

/// Lifecycle of one instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LifecycleState {
    /// Created but not yet populated.
    Uninitialized,
    /// Topology built and frozen; no tick has run yet.
    Ready,
    /// At least one tick has run.
    Simulating,
    /// Ticks are ignored until resumed.
    Paused,
}

/// One soft-body instance: state, constraints, solver and configuration.
pub struct SimulationContext {
    particles: ParticleStore,
    constraints: ConstraintSet,
    binding: MeshBinding,
    solver: PbdSolver,
    params: SolverParams,
    state: LifecycleState,
    last_good: ParticleSnapshot,
}

impl SimulationContext {
    /// Build an instance from a descriptor. The resulting context is
    /// `Ready`; its topology is frozen from here on.
    ///
    /// # Errors
    /// `InvalidTopology` for malformed particle arrays, indices or bindings;
    /// `ParameterOutOfRange` for invalid parameters or stiffness overrides.
    pub fn new(descriptor: &TopologyDescriptor, params: SolverParams) -> Result<Self> {
        params.validate()?;

        let particles =
            ParticleStore::new(descriptor.positions.clone(), descriptor.inv_masses.clone())?;

        let mut constraints = ConstraintSet::new();
        let mut seen = HashSet::new();
        let mut duplicates = 0usize;
        for entry in &descriptor.constraints {
            if let Some(key) = entry.dedup_key() {
                if !seen.insert(key) {
                    duplicates += 1;
                    continue;
                }
            }
            let stiffness = |value: Option<f32>| value.unwrap_or(params.default_stiffness);
            match *entry {
                ConstraintDescriptor::Distance { a, b, stiffness: k } => {
                    constraints.add_distance(a, b, stiffness(k), &particles)?;
                }
                ConstraintDescriptor::Bending {
                    edge,
                    wings,
                    stiffness: k,
                } => {
                    constraints.add_bending(edge, wings, stiffness(k), &particles)?;
                }
                ConstraintDescriptor::Volume {
                    indices,
                    stiffness: k,
                } => {
                    constraints.add_volume(indices, stiffness(k), &particles)?;
                }
                ConstraintDescriptor::Attachment {
                    particle,
                    target,
                    stiffness: k,
                } => {
                    constraints.add_attachment(particle, target, stiffness(k), &particles)?;
                }
            }
        }
        if duplicates > 0 {
            warn!(duplicates, "Dropped duplicate constraints from descriptor");
        }

        let binding = match &descriptor.bindings {
            Some(bindings) => MeshBinding::bind(bindings.clone(), particles.len())?,
            None => MeshBinding::direct(particles.len()),
        };

        info!(
            particles = particles.len(),
            constraints = constraints.len(),
            vertices = binding.vertex_count(),
            "Soft-body instance ready"
        );

        let last_good = particles.snapshot();
        Ok(Self {
            solver: PbdSolver::new(particles.len()),
            particles,
            constraints,
            binding,
            params,
            state: LifecycleState::Ready,
            last_good,
        })
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Solver parameters currently in effect.
    #[must_use]
    pub fn params(&self) -> &SolverParams {
        &self.params
    }

    /// Replace the solver parameters.
    ///
    /// # Errors
    /// `ParameterOutOfRange` when a field is outside its documented range;
    /// the previous parameters stay in effect.
    pub fn configure(&mut self, params: SolverParams) -> Result<()> {
        params.validate()?;
        self.params = params;
        Ok(())
    }

    /// The particle state, for host inspection.
    #[must_use]
    pub fn particles(&self) -> &ParticleStore {
        &self.particles
    }

    /// Teleport one particle. Kept for host-side interaction; structural
    /// topology stays frozen.
    ///
    /// # Errors
    /// `InvalidTopology` for an unknown particle index.
    pub fn set_particle_position(&mut self, index: usize, position: Vec3) -> Result<()> {
        if index >= self.particles.len() {
            return Err(crate::error::TopologyIssue::IndexOutOfRange {
                index,
                count: self.particles.len(),
            }
            .into());
        }
        self.particles.set_position(index, position);
        Ok(())
    }

    /// Tune one constraint's stiffness.
    ///
    /// # Errors
    /// Unknown constraint index or stiffness outside [0, 1].
    pub fn set_stiffness(&mut self, constraint: usize, stiffness: f32) -> Result<()> {
        self.constraints.set_stiffness(constraint, stiffness)
    }

    /// Move an attachment anchor (kinematic retargeting). Returns false when
    /// the index does not name an attachment constraint.
    pub fn retarget_attachment(&mut self, constraint: usize, target: Vec3) -> bool {
        match self.constraints.attachment_target_mut(constraint) {
            Some(anchor) => {
                *anchor = target;
                true
            }
            None => false,
        }
    }

    /// Suspend ticking. `simulate` becomes a no-op until `resume`.
    pub fn pause(&mut self) {
        if self.state == LifecycleState::Simulating || self.state == LifecycleState::Ready {
            self.state = LifecycleState::Paused;
        }
    }

    /// Resume ticking after a pause.
    pub fn resume(&mut self) {
        if self.state == LifecycleState::Paused {
            self.state = LifecycleState::Simulating;
        }
    }

    /// Advance the instance by `dt` against the tick's collider list.
    ///
    /// The tick is atomic from the caller's perspective: on success the new
    /// state is committed and snapshotted; on divergence the instance rolls
    /// back to the last good snapshot and reports the failure, and the next
    /// tick continues from that snapshot.
    pub fn simulate(&mut self, dt: f32, colliders: &[Collider<'_>]) -> TickStatus {
        if self.state == LifecycleState::Paused {
            return TickStatus::Ok;
        }
        if !dt.is_finite() || dt <= 0.0 {
            debug!(dt, "Skipping tick with non-positive delta time");
            return TickStatus::Ok;
        }
        self.state = LifecycleState::Simulating;

        match self.solver.step(
            &self.params,
            &mut self.particles,
            &self.constraints,
            colliders,
            dt,
        ) {
            Ok(()) => {
                self.last_good = self.particles.snapshot();
                TickStatus::Ok
            }
            Err(SoftBodyError::NumericDivergence { particle }) => {
                warn!(particle, "Tick diverged; rolling back to last good state");
                self.particles.restore(&self.last_good);
                TickStatus::NumericDivergence
            }
            // The solver only fails with NumericDivergence today; treat
            // anything else the same way rather than committing bad state.
            Err(_) => {
                self.particles.restore(&self.last_good);
                TickStatus::NumericDivergence
            }
        }
    }

    /// Render-mesh vertex positions for the current committed state.
    #[must_use]
    pub fn vertex_positions(&self) -> Vec<Vec3> {
        self.binding.sample(&self.particles)
    }

    /// Vertex positions blended against a host-supplied target pose.
    #[must_use]
    pub fn vertex_positions_blended(&self, targets: &[Vec3], weight: f32) -> Vec<Vec3> {
        self.binding.sample_blended(&self.particles, targets, weight)
    }
}

/// Handle to an instance owned by a [`SoftBodyWorld`]. Generational, so a
/// stale handle to a destroyed slot is detected rather than aliased.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct InstanceHandle {
    index: u32,
    generation: u32,
}

struct Slot {
    generation: u32,
    context: Option<SimulationContext>,
}

/// Owner of every soft-body instance the host created.
#[derive(Default)]
pub struct SoftBodyWorld {
    slots: Vec<Slot>,
}

impl SoftBodyWorld {
    /// Empty world.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live instances.
    #[must_use]
    pub fn instance_count(&self) -> usize {
        self.slots.iter().filter(|s| s.context.is_some()).count()
    }

    /// Create an instance from a descriptor.
    ///
    /// # Errors
    /// Propagates construction errors from [`SimulationContext::new`];
    /// nothing is allocated on failure.
    pub fn create_instance(
        &mut self,
        descriptor: &TopologyDescriptor,
        params: SolverParams,
    ) -> Result<InstanceHandle> {
        let context = SimulationContext::new(descriptor, params)?;
        let index = self.slots.iter().position(|s| s.context.is_none());
        let handle = match index {
            Some(index) => {
                let slot = &mut self.slots[index];
                slot.context = Some(context);
                InstanceHandle {
                    index: index as u32,
                    generation: slot.generation,
                }
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    context: Some(context),
                });
                InstanceHandle {
                    index: (self.slots.len() - 1) as u32,
                    generation: 0,
                }
            }
        };
        debug!(?handle, "Instance created");
        Ok(handle)
    }

    /// Destroy an instance. Returns true when the handle was live.
    pub fn destroy_instance(&mut self, handle: InstanceHandle) -> bool {
        let Some(slot) = self.slots.get_mut(handle.index as usize) else {
            return false;
        };
        if slot.generation != handle.generation || slot.context.is_none() {
            return false;
        }
        slot.context = None;
        slot.generation += 1;
        debug!(?handle, "Instance destroyed");
        true
    }

    /// Borrow an instance.
    #[must_use]
    pub fn get(&self, handle: InstanceHandle) -> Option<&SimulationContext> {
        self.slots
            .get(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.context.as_ref())
    }

    /// Mutably borrow an instance.
    pub fn get_mut(&mut self, handle: InstanceHandle) -> Option<&mut SimulationContext> {
        self.slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.context.as_mut())
    }

    /// Tick one instance.
    ///
    /// # Errors
    /// [`SoftBodyError::UnknownInstance`] for a stale or foreign handle.
    pub fn simulate(
        &mut self,
        handle: InstanceHandle,
        dt: f32,
        colliders: &[Collider<'_>],
    ) -> Result<TickStatus> {
        let context = self
            .get_mut(handle)
            .ok_or(SoftBodyError::UnknownInstance {
                index: handle.index,
                generation: handle.generation,
            })?;
        Ok(context.simulate(dt, colliders))
    }

    /// Vertex positions of one instance, for the host's render layer.
    ///
    /// # Errors
    /// [`SoftBodyError::UnknownInstance`] for a stale or foreign handle.
    pub fn vertex_positions(&self, handle: InstanceHandle) -> Result<Vec<Vec3>> {
        let context = self.get(handle).ok_or(SoftBodyError::UnknownInstance {
            index: handle.index,
            generation: handle.generation,
        })?;
        Ok(context.vertex_positions())
    }
}
