//! Position-Based Dynamics soft-body simulation core.
//!
//! Engine-agnostic: the host supplies delta time and collider state per tick
//! and reads back render-mesh vertex positions. Each [`SimulationContext`]
//! owns disjoint state, so independent instances can be stepped in parallel.

#![warn(clippy::pedantic)]
#![warn(missing_docs)]

pub mod binding;
pub mod collision;
pub mod constraint;
pub mod context;
pub mod error;
pub mod particles;
pub mod solver;

pub use binding::{MeshBinding, VertexBinding};
pub use collision::{Collider, CollisionResolver, SignedDistance};
pub use constraint::{Constraint, ConstraintSet};
pub use context::{
    ConstraintDescriptor, InstanceHandle, LifecycleState, SimulationContext, SoftBodyWorld,
    TopologyDescriptor,
};
pub use error::{Result, SoftBodyError, TickStatus, TopologyIssue};
pub use particles::{ParticleSnapshot, ParticleStore};
pub use solver::{PbdSolver, SolverParams, SolverPhase};
