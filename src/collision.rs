//! Particle-versus-collider detection and response.
//!
//! Colliders are read-only descriptions of host geometry, borrowed for the
//! duration of a single tick and never retained. Resolution runs after
//! constraint projection each substep: a penetrating particle is projected to
//! the collider surface along the contact normal, and the tangential part of
//! its displacement is damped by friction. When several colliders overlap a
//! particle, the deepest correction wins; later substeps refine the result.

use bitvec::vec::BitVec;
use glam::Vec3;
use tracing::debug;

use crate::particles::ParticleStore;

/// Penetrations shallower than this are left alone.
const CONTACT_EPSILON: f32 = 1e-7;

/// Signed-distance proxy for host geometry the core has no analytic shape
/// for. Negative distance means inside.
pub trait SignedDistance {
    /// Signed distance from `point` to the surface.
    fn distance(&self, point: Vec3) -> f32;

    /// Outward surface direction at `point`. Need not be normalized.
    fn gradient(&self, point: Vec3) -> Vec3;
}

/// External collider geometry supplied by the host for one tick.
#[derive(Clone, Copy)]
pub enum Collider<'a> {
    /// Half-space: points with `normal . x < offset` are inside.
    Plane {
        /// Outward surface normal. A near-zero normal is degenerate.
        normal: Vec3,
        /// Distance of the surface from the origin along `normal`.
        offset: f32,
    },
    /// Solid sphere.
    Sphere {
        /// Center position.
        center: Vec3,
        /// Radius. Non-positive radii are degenerate.
        radius: f32,
    },
    /// Solid capsule between two segment endpoints.
    Capsule {
        /// Segment start.
        start: Vec3,
        /// Segment end.
        end: Vec3,
        /// Radius. Non-positive radii are degenerate.
        radius: f32,
    },
    /// Arbitrary host geometry behind a signed-distance proxy.
    Sdf(&'a dyn SignedDistance),
}

/// A detected penetration: push `depth` along `normal` to reach the surface.
#[derive(Clone, Copy, Debug)]
struct Contact {
    normal: Vec3,
    depth: f32,
}

impl Collider<'_> {
    /// Test a point against the collider. `None` when the point is outside
    /// or the collider is degenerate (zero-extent); degeneracy is a
    /// recoverable condition, not an error.
    fn penetration(&self, point: Vec3) -> Option<Contact> {
        match *self {
            Collider::Plane { normal, offset } => {
                let length = normal.length();
                if length < CONTACT_EPSILON {
                    debug!("Skipping plane collider with degenerate normal");
                    return None;
                }
                let unit = normal / length;
                let depth = offset - unit.dot(point);
                (depth > CONTACT_EPSILON).then_some(Contact { normal: unit, depth })
            }
            Collider::Sphere { center, radius } => {
                if radius <= CONTACT_EPSILON {
                    debug!("Skipping zero-extent sphere collider");
                    return None;
                }
                sphere_contact(point, center, radius)
            }
            Collider::Capsule { start, end, radius } => {
                if radius <= CONTACT_EPSILON {
                    debug!("Skipping zero-extent capsule collider");
                    return None;
                }
                let axis = end - start;
                let t = if axis.length_squared() < CONTACT_EPSILON {
                    0.0
                } else {
                    ((point - start).dot(axis) / axis.length_squared()).clamp(0.0, 1.0)
                };
                sphere_contact(point, start + axis * t, radius)
            }
            Collider::Sdf(proxy) => {
                let distance = proxy.distance(point);
                if distance >= -CONTACT_EPSILON {
                    return None;
                }
                let gradient = proxy.gradient(point);
                let length = gradient.length();
                if length < CONTACT_EPSILON {
                    debug!("Skipping SDF contact with degenerate gradient");
                    return None;
                }
                Some(Contact {
                    normal: gradient / length,
                    depth: -distance,
                })
            }
        }
    }
}

fn sphere_contact(point: Vec3, center: Vec3, radius: f32) -> Option<Contact> {
    let to_point = point - center;
    let distance = to_point.length();
    let depth = radius - distance;
    if depth <= CONTACT_EPSILON {
        return None;
    }
    // A particle exactly at the center has no meaningful normal; push up.
    let normal = if distance < CONTACT_EPSILON {
        Vec3::Y
    } else {
        to_point / distance
    };
    Some(Contact { normal, depth })
}

/// Resolves particle penetrations against the tick's collider list.
///
/// Holds only scratch state: a contact mask over particles, reused between
/// substeps for diagnostics.
#[derive(Clone, Debug)]
pub struct CollisionResolver {
    contacts: BitVec,
}

impl CollisionResolver {
    /// Resolver sized for `particle_count` particles.
    #[must_use]
    pub fn new(particle_count: usize) -> Self {
        Self {
            contacts: BitVec::repeat(false, particle_count),
        }
    }

    /// Particles flagged as touching a collider during the last
    /// [`CollisionResolver::resolve`] call.
    #[must_use]
    pub fn contact_count(&self) -> usize {
        self.contacts.count_ones()
    }

    /// True when the particle was corrected during the last resolve pass.
    #[must_use]
    pub fn in_contact(&self, index: usize) -> bool {
        self.contacts.get(index).is_some_and(|bit| *bit)
    }

    /// Project penetrating predicted positions to the nearest collider
    /// surface and damp the tangential displacement by `friction`.
    pub fn resolve(
        &mut self,
        particles: &mut ParticleStore,
        colliders: &[Collider<'_>],
        friction: f32,
    ) {
        self.contacts.fill(false);
        if colliders.is_empty() {
            return;
        }

        let friction = friction.clamp(0.0, 1.0);
        for i in 0..particles.len() {
            if particles.is_pinned(i) {
                continue;
            }
            let predicted = particles.predicted(i);

            // Greedy per particle: deepest correction wins.
            let mut deepest: Option<Contact> = None;
            for collider in colliders {
                if let Some(contact) = collider.penetration(predicted) {
                    if deepest.is_none_or(|best| contact.depth > best.depth) {
                        deepest = Some(contact);
                    }
                }
            }

            let Some(contact) = deepest else { continue };
            let surface = predicted + contact.normal * contact.depth;

            // Friction damps the displacement component sliding along the
            // surface; the normal component is fully corrected.
            let displacement = surface - particles.position(i);
            let tangential = displacement - contact.normal * displacement.dot(contact.normal);
            particles.set_predicted(i, surface - tangential * friction);
            self.contacts.set(i, true);
        }
    }
}
