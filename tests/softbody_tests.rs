//! End-to-end behavior of the simulation core through its public surface.

use glam::Vec3;
use pbdsoft::{
    Collider, ConstraintDescriptor, ConstraintSet, ParticleStore, SimulationContext,
    SoftBodyWorld, SolverParams, TickStatus, TopologyDescriptor,
};

const DT: f32 = 1.0 / 60.0;

fn quiet_params() -> SolverParams {
    SolverParams {
        gravity: Vec3::ZERO,
        global_damping: 0.0,
        friction: 0.0,
        ..SolverParams::default()
    }
}

/// A unit square with the first corner pinned, hanging diagonal-down,
/// braced by its two diagonals.
fn hanging_square() -> TopologyDescriptor {
    let half = std::f32::consts::FRAC_1_SQRT_2;
    let positions = vec![
        Vec3::new(0.0, 2.0, 0.0),
        Vec3::new(half, 2.0 - half, 0.0),
        Vec3::new(0.0, 2.0 - 2.0 * half, 0.0),
        Vec3::new(-half, 2.0 - half, 0.0),
    ];
    let edges = [(0, 1), (1, 2), (2, 3), (3, 0), (0, 2), (1, 3)];
    TopologyDescriptor {
        inv_masses: vec![0.0, 1.0, 1.0, 1.0],
        positions,
        constraints: edges
            .iter()
            .map(|&(a, b)| ConstraintDescriptor::Distance {
                a,
                b,
                stiffness: None,
            })
            .collect(),
        bindings: None,
    }
}

#[test]
fn pinned_particles_are_immovable_under_any_input() {
    let descriptor = TopologyDescriptor {
        positions: vec![Vec3::new(0.0, -0.5, 0.0), Vec3::new(1.0, 0.0, 0.0)],
        inv_masses: vec![0.0, 1.0],
        constraints: vec![ConstraintDescriptor::Distance {
            a: 0,
            b: 1,
            stiffness: Some(1.0),
        }],
        bindings: None,
    };
    // Pinned particle starts inside the ground plane; nothing may move it.
    let params = SolverParams {
        gravity: Vec3::new(50.0, -200.0, 30.0),
        ..SolverParams::default()
    };
    let mut context = SimulationContext::new(&descriptor, params).unwrap();
    let ground = Collider::Plane {
        normal: Vec3::Y,
        offset: 0.0,
    };

    for _ in 0..30 {
        assert_eq!(context.simulate(DT, &[ground]), TickStatus::Ok);
    }
    assert_eq!(context.particles().position(0), Vec3::new(0.0, -0.5, 0.0));
}

#[test]
fn distance_pair_converges_to_rest_length() {
    let descriptor = TopologyDescriptor {
        positions: vec![Vec3::ZERO, Vec3::new(3.0, 0.0, 0.0)],
        inv_masses: vec![1.0, 1.0],
        constraints: vec![ConstraintDescriptor::Distance {
            a: 0,
            b: 1,
            stiffness: Some(0.8),
        }],
        bindings: None,
    };
    let mut context = SimulationContext::new(&descriptor, quiet_params()).unwrap();

    // Stretch the pair well past its measured rest length of 3.
    context
        .set_particle_position(1, Vec3::new(5.0, 0.0, 0.0))
        .unwrap();
    for _ in 0..300 {
        context.simulate(DT, &[]);
    }
    let p = context.particles();
    assert!((p.position(0).distance(p.position(1)) - 3.0).abs() < 1e-3);
}

#[test]
fn equal_mass_pair_keeps_its_midpoint() {
    let descriptor = TopologyDescriptor {
        positions: vec![Vec3::new(-2.0, 0.0, 0.0), Vec3::new(2.0, 0.0, 0.0)],
        inv_masses: vec![1.0, 1.0],
        constraints: vec![ConstraintDescriptor::Distance {
            a: 0,
            b: 1,
            stiffness: Some(1.0),
        }],
        bindings: None,
    };
    let mut context = SimulationContext::new(&descriptor, quiet_params()).unwrap();

    // Stretch the pair so projection has work to do.
    context
        .set_particle_position(1, Vec3::new(5.0, 0.0, 0.0))
        .unwrap();
    let midpoint_before =
        (context.particles().position(0) + context.particles().position(1)) * 0.5;

    for _ in 0..10 {
        context.simulate(DT, &[]);
    }
    let midpoint_after =
        (context.particles().position(0) + context.particles().position(1)) * 0.5;
    assert!(midpoint_before.distance(midpoint_after) < 1e-4);
}

#[test]
fn no_particle_rests_inside_a_convex_collider() {
    // Particles dropped onto a sphere from above.
    let positions: Vec<Vec3> = (0..5)
        .map(|i| Vec3::new(0.2 * i as f32 - 0.4, 2.0, 0.0))
        .collect();
    let descriptor = TopologyDescriptor {
        inv_masses: vec![1.0; positions.len()],
        positions,
        constraints: vec![],
        bindings: None,
    };
    let mut context = SimulationContext::new(&descriptor, SolverParams::default()).unwrap();
    let sphere = Collider::Sphere {
        center: Vec3::ZERO,
        radius: 1.0,
    };

    for _ in 0..120 {
        context.simulate(DT, &[sphere]);
        for i in 0..context.particles().len() {
            assert!(
                context.particles().position(i).length() >= 1.0 - 1e-4,
                "particle {i} ended inside the sphere"
            );
        }
    }
}

#[test]
fn projection_is_idempotent_once_converged() {
    let mut particles = ParticleStore::new(
        vec![Vec3::ZERO, Vec3::new(2.0, 0.0, 0.0)],
        vec![1.0, 1.0],
    )
    .unwrap();
    let mut set = ConstraintSet::new();
    set.add_distance(0, 1, 1.0, &particles).unwrap();

    for _ in 0..200 {
        set.project(&mut particles, 1.0);
    }
    let before = [particles.predicted(0), particles.predicted(1)];
    set.project(&mut particles, 1.0);
    let after = [particles.predicted(0), particles.predicted(1)];

    assert!(before[0].distance(after[0]) < 1e-5);
    assert!(before[1].distance(after[1]) < 1e-5);
}

#[test]
fn divergence_reports_and_preserves_visible_state() {
    let mut world = SoftBodyWorld::new();
    let handle = world
        .create_instance(&hanging_square(), quiet_params())
        .unwrap();

    // One good tick establishes the snapshot.
    assert_eq!(world.simulate(handle, DT, &[]).unwrap(), TickStatus::Ok);
    let committed = world.vertex_positions(handle).unwrap();

    world
        .get_mut(handle)
        .unwrap()
        .set_particle_position(2, Vec3::new(f32::INFINITY, 0.0, 0.0))
        .unwrap();
    assert_eq!(
        world.simulate(handle, DT, &[]).unwrap(),
        TickStatus::NumericDivergence
    );
    assert_eq!(world.vertex_positions(handle).unwrap(), committed);

    // Simulation continues from the rolled-back state.
    assert_eq!(world.simulate(handle, DT, &[]).unwrap(), TickStatus::Ok);
}

#[test]
fn hanging_square_settles_and_holds_its_shape() {
    let descriptor = hanging_square();
    let params = SolverParams {
        substep_count: 4,
        iteration_count: 8,
        gravity: Vec3::new(0.0, -9.8, 0.0),
        global_damping: 0.1,
        default_stiffness: 1.0,
        friction: 0.0,
    };
    let mut context = SimulationContext::new(&descriptor, params).unwrap();

    let mut previous = context.vertex_positions();
    let mut last_delta = f32::MAX;
    for _ in 0..120 {
        assert_eq!(context.simulate(DT, &[]), TickStatus::Ok);
        let current = context.vertex_positions();
        last_delta = current
            .iter()
            .zip(previous.iter())
            .map(|(a, b)| a.distance(*b))
            .fold(0.0f32, f32::max);
        previous = current;
    }
    assert!(last_delta < 1e-4, "still moving by {last_delta} per tick");

    // Every distance constraint still holds within tolerance.
    let p = context.particles();
    let side = 1.0;
    let diagonal = 2.0 * std::f32::consts::FRAC_1_SQRT_2;
    for &(a, b, rest) in &[
        (0usize, 1usize, side),
        (1, 2, side),
        (2, 3, side),
        (3, 0, side),
        (0, 2, diagonal),
        (1, 3, diagonal),
    ] {
        let separation = p.position(a).distance(p.position(b));
        assert!(
            (separation - rest).abs() < 5e-3,
            "edge {a}-{b}: {separation} vs rest {rest}"
        );
    }

    // The pinned corner never moved.
    assert_eq!(p.position(0), Vec3::new(0.0, 2.0, 0.0));
}

#[test]
fn identical_inputs_produce_identical_trajectories() {
    let run = || {
        let mut context =
            SimulationContext::new(&hanging_square(), SolverParams::default()).unwrap();
        let ground = Collider::Plane {
            normal: Vec3::Y,
            offset: 0.0,
        };
        for _ in 0..60 {
            context.simulate(DT, &[ground]);
        }
        context.vertex_positions()
    };

    let first = run();
    let second = run();
    assert_eq!(first, second);
}
