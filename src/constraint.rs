//! Geometric constraints projected onto predicted particle positions.
//!
//! Four variants: distance, bending (dihedral angle), volume (signed
//! tetrahedron) and attachment (particle to world-space anchor). Each holds a
//! fixed tuple of particle indices, a rest value and a stiffness in [0, 1].
//! Indices are immutable after creation; stiffness (and attachment targets)
//! may be tuned at runtime.

use glam::Vec3;

use crate::error::{Result, SoftBodyError, TopologyIssue};
use crate::particles::ParticleStore;

/// Corrections below this magnitude are considered degenerate and skipped.
const GEOMETRY_EPSILON: f32 = 1e-9;

/// Keeps two particles at a fixed separation.
#[derive(Clone, Debug)]
pub struct DistanceConstraint {
    /// First particle.
    pub a: usize,
    /// Second particle.
    pub b: usize,
    /// Rest separation.
    pub rest_length: f32,
    /// Stiffness in [0, 1].
    pub stiffness: f32,
}

/// Keeps the dihedral angle across a shared edge at its rest value.
///
/// `edge` holds the two particles of the shared edge, `wings` the apex
/// particle of each adjacent triangle.
#[derive(Clone, Debug)]
pub struct BendingConstraint {
    /// Particles of the shared edge.
    pub edge: [usize; 2],
    /// Apex particles of the two triangles.
    pub wings: [usize; 2],
    /// Rest dihedral angle in radians.
    pub rest_angle: f32,
    /// Stiffness in [0, 1].
    pub stiffness: f32,
}

/// Keeps the signed volume of a tetrahedron at its rest value.
#[derive(Clone, Debug)]
pub struct VolumeConstraint {
    /// The four tetrahedron corners.
    pub indices: [usize; 4],
    /// Rest signed volume.
    pub rest_volume: f32,
    /// Stiffness in [0, 1].
    pub stiffness: f32,
}

/// Pulls one particle toward a world-space anchor.
///
/// The anchor may be retargeted every frame by the host to follow kinematic
/// geometry; that is a parameter change, not a structural one.
#[derive(Clone, Debug)]
pub struct AttachmentConstraint {
    /// The constrained particle.
    pub particle: usize,
    /// World-space anchor position.
    pub target: Vec3,
    /// Rest separation from the anchor (usually zero).
    pub rest_length: f32,
    /// Stiffness in [0, 1].
    pub stiffness: f32,
}

/// A constraint over particle indices. Variants only; the core has no
/// inheritance hierarchy.
#[derive(Clone, Debug)]
pub enum Constraint {
    /// Fixed-separation constraint between two particles.
    Distance(DistanceConstraint),
    /// Dihedral-angle constraint across a shared edge.
    Bending(BendingConstraint),
    /// Signed-tetrahedron-volume constraint.
    Volume(VolumeConstraint),
    /// Particle-to-anchor constraint.
    Attachment(AttachmentConstraint),
}

/// Signed volume of the tetrahedron spanned by four points.
#[must_use]
pub fn signed_volume(p0: Vec3, p1: Vec3, p2: Vec3, p3: Vec3) -> f32 {
    (p1 - p0).cross(p2 - p0).dot(p3 - p0) / 6.0
}

/// Dihedral angle between the triangles (e0, e1, w0) and (e0, e1, w1),
/// or `None` when either triangle is degenerate.
#[must_use]
pub fn dihedral_angle(e0: Vec3, e1: Vec3, w0: Vec3, w1: Vec3) -> Option<f32> {
    let edge = e1 - e0;
    let n1 = edge.cross(w0 - e0);
    let n2 = edge.cross(w1 - e0);
    if n1.length_squared() < GEOMETRY_EPSILON || n2.length_squared() < GEOMETRY_EPSILON {
        return None;
    }
    let d = n1.normalize().dot(n2.normalize()).clamp(-1.0, 1.0);
    Some(d.acos())
}

/// Stiffness actually applied per pass so that the observed stiffness is
/// independent of the solver's iteration count: `1 - (1 - k)^scale` with
/// `scale = 1 / iterations`.
#[must_use]
fn effective_stiffness(stiffness: f32, iteration_scale: f32) -> f32 {
    1.0 - (1.0 - stiffness.clamp(0.0, 1.0)).powf(iteration_scale)
}

impl DistanceConstraint {
    fn project(&self, store: &mut ParticleStore, k: f32) {
        let wa = store.inv_mass(self.a);
        let wb = store.inv_mass(self.b);
        let w_sum = wa + wb;
        if w_sum < GEOMETRY_EPSILON {
            return;
        }

        let delta = store.predicted(self.b) - store.predicted(self.a);
        let dist = delta.length();
        if dist < GEOMETRY_EPSILON {
            return;
        }

        let correction = delta / dist * ((dist - self.rest_length) * k);
        store.correct_predicted(self.a, correction * (wa / w_sum));
        store.correct_predicted(self.b, -correction * (wb / w_sum));
    }
}

impl AttachmentConstraint {
    fn project(&self, store: &mut ParticleStore, k: f32) {
        if store.inv_mass(self.particle) == 0.0 {
            return;
        }
        let delta = self.target - store.predicted(self.particle);
        let dist = delta.length();
        if dist < GEOMETRY_EPSILON {
            return;
        }
        // Correct along the connecting axis toward the rest separation.
        let correction = delta / dist * ((dist - self.rest_length) * k);
        store.correct_predicted(self.particle, correction);
    }
}

impl VolumeConstraint {
    fn project(&self, store: &mut ParticleStore, k: f32) {
        let [i0, i1, i2, i3] = self.indices;
        let p0 = store.predicted(i0);
        let p1 = store.predicted(i1);
        let p2 = store.predicted(i2);
        let p3 = store.predicted(i3);

        // Per-vertex contribution gradients of the signed volume.
        let grad0 = (p3 - p1).cross(p2 - p1) / 6.0;
        let grad1 = (p2 - p0).cross(p3 - p0) / 6.0;
        let grad2 = (p3 - p0).cross(p1 - p0) / 6.0;
        let grad3 = (p1 - p0).cross(p2 - p0) / 6.0;

        let w = [
            store.inv_mass(i0),
            store.inv_mass(i1),
            store.inv_mass(i2),
            store.inv_mass(i3),
        ];
        let denom = w[0] * grad0.length_squared()
            + w[1] * grad1.length_squared()
            + w[2] * grad2.length_squared()
            + w[3] * grad3.length_squared();
        if denom < GEOMETRY_EPSILON {
            return;
        }

        let lambda = (signed_volume(p0, p1, p2, p3) - self.rest_volume) / denom * k;
        store.correct_predicted(i0, grad0 * (-lambda * w[0]));
        store.correct_predicted(i1, grad1 * (-lambda * w[1]));
        store.correct_predicted(i2, grad2 * (-lambda * w[2]));
        store.correct_predicted(i3, grad3 * (-lambda * w[3]));
    }
}

impl BendingConstraint {
    fn project(&self, store: &mut ParticleStore, k: f32) {
        let [e0, e1] = self.edge;
        let [a0, a1] = self.wings;

        // Work relative to the first edge particle.
        let origin = store.predicted(e0);
        let p2 = store.predicted(e1) - origin;
        let p3 = store.predicted(a0) - origin;
        let p4 = store.predicted(a1) - origin;

        let c23 = p2.cross(p3);
        let c24 = p2.cross(p4);
        let len23 = c23.length();
        let len24 = c24.length();
        if len23 < GEOMETRY_EPSILON || len24 < GEOMETRY_EPSILON {
            return;
        }
        let n1 = c23 / len23;
        let n2 = c24 / len24;

        let d = n1.dot(n2).clamp(-1.0, 1.0);
        let sin_term = (1.0 - d * d).max(0.0).sqrt();
        if sin_term < GEOMETRY_EPSILON {
            // Gradient direction is undefined at the fold extremes.
            return;
        }

        let q3 = (p2.cross(n2) + n1.cross(p2) * d) / len23;
        let q4 = (p2.cross(n1) + n2.cross(p2) * d) / len24;
        let q2 = -(p3.cross(n2) + n1.cross(p3) * d) / len23
            - (p4.cross(n1) + n2.cross(p4) * d) / len24;
        let q1 = -q2 - q3 - q4;

        let w = [
            store.inv_mass(e0),
            store.inv_mass(e1),
            store.inv_mass(a0),
            store.inv_mass(a1),
        ];
        let denom = w[0] * q1.length_squared()
            + w[1] * q2.length_squared()
            + w[2] * q3.length_squared()
            + w[3] * q4.length_squared();
        if denom < GEOMETRY_EPSILON {
            return;
        }

        let scale = sin_term * (d.acos() - self.rest_angle) / denom * k;
        store.correct_predicted(e0, q1 * (-scale * w[0]));
        store.correct_predicted(e1, q2 * (-scale * w[1]));
        store.correct_predicted(a0, q3 * (-scale * w[2]));
        store.correct_predicted(a1, q4 * (-scale * w[3]));
    }
}

impl Constraint {
    /// Stiffness coefficient of the constraint.
    #[must_use]
    pub fn stiffness(&self) -> f32 {
        match self {
            Constraint::Distance(c) => c.stiffness,
            Constraint::Bending(c) => c.stiffness,
            Constraint::Volume(c) => c.stiffness,
            Constraint::Attachment(c) => c.stiffness,
        }
    }

    fn stiffness_mut(&mut self) -> &mut f32 {
        match self {
            Constraint::Distance(c) => &mut c.stiffness,
            Constraint::Bending(c) => &mut c.stiffness,
            Constraint::Volume(c) => &mut c.stiffness,
            Constraint::Attachment(c) => &mut c.stiffness,
        }
    }

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
            Constraint::Distance(c) => {
                check(c.a)?;
                check(c.b)?;
            }
            Constraint::Bending(c) => {
                for &i in c.edge.iter().chain(c.wings.iter()) {
                    check(i)?;
                }
            }
            Constraint::Volume(c) => {
                for &i in &c.indices {
                    check(i)?;
                }
            }
            Constraint::Attachment(c) => check(c.particle)?,
        }
        Ok(())
    }

    fn project(&self, store: &mut ParticleStore, iteration_scale: f32) {
        let k = effective_stiffness(self.stiffness(), iteration_scale);
        if k <= 0.0 {
            return;
        }
        match self {
            Constraint::Distance(c) => c.project(store, k),
            Constraint::Bending(c) => c.project(store, k),
            Constraint::Volume(c) => c.project(store, k),
            Constraint::Attachment(c) => c.project(store, k),
        }
    }
}

/// Ordered collection of constraints for one instance.
///
/// Projection order is creation order, which keeps results reproducible
/// under identical input sequences.
#[derive(Clone, Debug, Default)]
pub struct ConstraintSet {
    constraints: Vec<Constraint>,
}

impl ConstraintSet {
    /// Empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of constraints.
    #[must_use]
    pub fn len(&self) -> usize {
        self.constraints.len()
    }

    /// True when no constraints were added.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.constraints.is_empty()
    }

    /// Constraint by creation index.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Constraint> {
        self.constraints.get(index)
    }

    /// Add a constraint, validating its indices and stiffness.
    ///
    /// # Errors
    /// [`TopologyIssue::IndexOutOfRange`] for an index beyond
    /// `particle_count`, [`SoftBodyError::ParameterOutOfRange`] for a
    /// stiffness outside [0, 1].
    pub fn add(&mut self, constraint: Constraint, particle_count: usize) -> Result<usize> {
        constraint.validate(particle_count)?;
        check_stiffness(constraint.stiffness())?;
        self.constraints.push(constraint);
        Ok(self.constraints.len() - 1)
    }

    /// Add a distance constraint with the rest length measured from the
    /// current committed positions.
    ///
    /// # Errors
    /// Same as [`ConstraintSet::add`].
    pub fn add_distance(
        &mut self,
        a: usize,
        b: usize,
        stiffness: f32,
        store: &ParticleStore,
    ) -> Result<usize> {
        let constraint = Constraint::Distance(DistanceConstraint {
            a,
            b,
            rest_length: rest_distance(a, b, store),
            stiffness,
        });
        self.add(constraint, store.len())
    }

    /// Add a bending constraint with the rest angle measured from the
    /// current committed positions. A degenerate initial fold rests flat.
    ///
    /// # Errors
    /// Same as [`ConstraintSet::add`].
    pub fn add_bending(
        &mut self,
        edge: [usize; 2],
        wings: [usize; 2],
        stiffness: f32,
        store: &ParticleStore,
    ) -> Result<usize> {
        let rest_angle = if edge.iter().chain(wings.iter()).all(|&i| i < store.len()) {
            dihedral_angle(
                store.position(edge[0]),
                store.position(edge[1]),
                store.position(wings[0]),
                store.position(wings[1]),
            )
            .unwrap_or(0.0)
        } else {
            0.0
        };
        let constraint = Constraint::Bending(BendingConstraint {
            edge,
            wings,
            rest_angle,
            stiffness,
        });
        self.add(constraint, store.len())
    }

    /// Add a volume constraint with the rest volume measured from the
    /// current committed positions.
    ///
    /// # Errors
    /// Same as [`ConstraintSet::add`].
    pub fn add_volume(
        &mut self,
        indices: [usize; 4],
        stiffness: f32,
        store: &ParticleStore,
    ) -> Result<usize> {
        let rest_volume = if indices.iter().all(|&i| i < store.len()) {
            signed_volume(
                store.position(indices[0]),
                store.position(indices[1]),
                store.position(indices[2]),
                store.position(indices[3]),
            )
        } else {
            0.0
        };
        let constraint = Constraint::Volume(VolumeConstraint {
            indices,
            rest_volume,
            stiffness,
        });
        self.add(constraint, store.len())
    }

    /// Add an attachment constraint anchoring a particle to `target`.
    ///
    /// # Errors
    /// Same as [`ConstraintSet::add`].
    pub fn add_attachment(
        &mut self,
        particle: usize,
        target: Vec3,
        stiffness: f32,
        store: &ParticleStore,
    ) -> Result<usize> {
        let constraint = Constraint::Attachment(AttachmentConstraint {
            particle,
            target,
            rest_length: 0.0,
            stiffness,
        });
        self.add(constraint, store.len())
    }

    /// Tune a constraint's stiffness at runtime.
    ///
    /// # Errors
    /// [`TopologyIssue::IndexOutOfRange`] for an unknown constraint,
    /// [`SoftBodyError::ParameterOutOfRange`] for a stiffness outside [0, 1].
    pub fn set_stiffness(&mut self, index: usize, stiffness: f32) -> Result<()> {
        check_stiffness(stiffness)?;
        let count = self.constraints.len();
        let constraint = self
            .constraints
            .get_mut(index)
            .ok_or(TopologyIssue::IndexOutOfRange { index, count })?;
        *constraint.stiffness_mut() = stiffness;
        Ok(())
    }

    /// Mutable access to an attachment anchor, for per-frame retargeting.
    /// `None` when the index is unknown or not an attachment.
    pub fn attachment_target_mut(&mut self, index: usize) -> Option<&mut Vec3> {
        match self.constraints.get_mut(index) {
            Some(Constraint::Attachment(c)) => Some(&mut c.target),
            _ => None,
        }
    }

    /// Apply one positional correction pass over every constraint, in
    /// creation order. `iteration_scale` is `1 / iteration_count`.
    pub fn project(&self, store: &mut ParticleStore, iteration_scale: f32) {
        for constraint in &self.constraints {
            constraint.project(store, iteration_scale);
        }
    }
}

fn rest_distance(a: usize, b: usize, store: &ParticleStore) -> f32 {
    if a < store.len() && b < store.len() {
        store.position(a).distance(store.position(b))
    } else {
        0.0
    }
}

fn check_stiffness(stiffness: f32) -> Result<()> {
    if !(0.0..=1.0).contains(&stiffness) || !stiffness.is_finite() {
        return Err(SoftBodyError::ParameterOutOfRange {
            name: "stiffness",
            value: stiffness,
            min: 0.0,
            max: 1.0,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn store(positions: Vec<Vec3>) -> ParticleStore {
        let masses = vec![1.0; positions.len()];
        ParticleStore::new(positions, masses).unwrap()
    }

    #[test]
    fn add_rejects_out_of_range_index() {
        let store = store(vec![Vec3::ZERO, Vec3::X]);
        let mut set = ConstraintSet::new();
        let err = set.add_distance(0, 5, 1.0, &store).unwrap_err();
        assert!(matches!(
            err,
            SoftBodyError::InvalidTopology(TopologyIssue::IndexOutOfRange { index: 5, count: 2 })
        ));
    }

    #[test]
    fn add_rejects_invalid_stiffness() {
        let store = store(vec![Vec3::ZERO, Vec3::X]);
        let mut set = ConstraintSet::new();
        let err = set.add_distance(0, 1, 1.5, &store).unwrap_err();
        assert!(matches!(err, SoftBodyError::ParameterOutOfRange { .. }));
    }

    #[test]
    fn distance_projection_splits_by_inverse_mass() {
        let mut particles = ParticleStore::new(
            vec![Vec3::ZERO, Vec3::new(2.0, 0.0, 0.0)],
            vec![1.0, 3.0],
        )
        .unwrap();
        let mut set = ConstraintSet::new();
        set.add(
            Constraint::Distance(DistanceConstraint {
                a: 0,
                b: 1,
                rest_length: 1.0,
                stiffness: 1.0,
            }),
            particles.len(),
        )
        .unwrap();

        set.project(&mut particles, 1.0);

        // Error of 1.0 split 1:3 between the particles.
        assert_relative_eq!(particles.predicted(0).x, 0.25, epsilon = 1e-5);
        assert_relative_eq!(particles.predicted(1).x, 1.25, epsilon = 1e-5);
    }

    #[test]
    fn distance_projection_converges() {
        let mut particles = store(vec![Vec3::ZERO, Vec3::new(3.0, 0.0, 0.0)]);
        let mut set = ConstraintSet::new();
        set.add(
            Constraint::Distance(DistanceConstraint {
                a: 0,
                b: 1,
                rest_length: 1.0,
                stiffness: 0.5,
            }),
            particles.len(),
        )
        .unwrap();

        for _ in 0..200 {
            set.project(&mut particles, 1.0);
        }
        let separation = particles.predicted(0).distance(particles.predicted(1));
        assert_relative_eq!(separation, 1.0, epsilon = 1e-4);
    }

    #[test]
    fn volume_projection_restores_rest_volume() {
        let rest = vec![Vec3::ZERO, Vec3::X, Vec3::Y, Vec3::Z];
        let mut particles = store(rest.clone());
        let mut set = ConstraintSet::new();
        set.add_volume([0, 1, 2, 3], 1.0, &particles).unwrap();
        let rest_volume = signed_volume(rest[0], rest[1], rest[2], rest[3]);

        // Inflate the tetrahedron and let the constraint pull it back.
        for i in 0..4 {
            particles.set_position(i, particles.position(i) * 1.5);
        }
        for _ in 0..100 {
            set.project(&mut particles, 1.0);
        }

        let current = signed_volume(
            particles.predicted(0),
            particles.predicted(1),
            particles.predicted(2),
            particles.predicted(3),
        );
        assert_relative_eq!(current, rest_volume, epsilon = 1e-4);
    }

    #[test]
    fn bending_projection_reduces_angle_error() {
        // Two triangles folded 90 degrees around the shared x-axis edge,
        // rest pose flat (180 degrees apart means dihedral normals align).
        let mut particles = store(vec![
            Vec3::ZERO,
            Vec3::X,
            Vec3::new(0.5, 1.0, 0.0),
            Vec3::new(0.5, 0.0, 1.0),
        ]);
        let mut set = ConstraintSet::new();
        set.add(
            Constraint::Bending(BendingConstraint {
                edge: [0, 1],
                wings: [2, 3],
                rest_angle: 0.0,
                stiffness: 1.0,
            }),
            particles.len(),
        )
        .unwrap();

        let initial = dihedral_angle(
            particles.predicted(0),
            particles.predicted(1),
            particles.predicted(2),
            particles.predicted(3),
        )
        .unwrap();
        for _ in 0..50 {
            set.project(&mut particles, 1.0);
        }
        let settled = dihedral_angle(
            particles.predicted(0),
            particles.predicted(1),
            particles.predicted(2),
            particles.predicted(3),
        )
        .unwrap();

        assert!(settled < initial * 0.5, "angle {settled} vs {initial}");
    }

    #[test]
    fn attachment_pulls_particle_to_anchor() {
        let mut particles = store(vec![Vec3::new(2.0, 0.0, 0.0)]);
        let mut set = ConstraintSet::new();
        set.add_attachment(0, Vec3::ZERO, 1.0, &particles).unwrap();

        set.project(&mut particles, 1.0);
        assert_relative_eq!(particles.predicted(0).length(), 0.0, epsilon = 1e-5);
    }

    #[test]
    fn pinned_particles_never_move_under_projection() {
        let mut particles = ParticleStore::new(
            vec![Vec3::ZERO, Vec3::new(5.0, 0.0, 0.0)],
            vec![0.0, 1.0],
        )
        .unwrap();
        let mut set = ConstraintSet::new();
        set.add(
            Constraint::Distance(DistanceConstraint {
                a: 0,
                b: 1,
                rest_length: 1.0,
                stiffness: 1.0,
            }),
            particles.len(),
        )
        .unwrap();

        for _ in 0..10 {
            set.project(&mut particles, 1.0);
        }
        assert_eq!(particles.predicted(0), Vec3::ZERO);
        assert_relative_eq!(particles.predicted(1).x, 1.0, epsilon = 1e-4);
    }

    #[test]
    fn stiffness_is_tunable_after_creation() {
        let store = store(vec![Vec3::ZERO, Vec3::X]);
        let mut set = ConstraintSet::new();
        let index = set.add_distance(0, 1, 0.2, &store).unwrap();
        set.set_stiffness(index, 0.9).unwrap();
        assert_relative_eq!(set.get(index).unwrap().stiffness(), 0.9);
        assert!(set.set_stiffness(index, 2.0).is_err());
    }
}
