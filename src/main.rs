use std::io::Write;

use clap::{Parser, Subcommand};
use glam::Vec3;
use tracing::{debug, error, info, instrument};

use pbdsoft::{
    Collider, ConstraintDescriptor, SoftBodyWorld, SolverParams, TickStatus, TopologyDescriptor,
};

#[derive(Parser)]
#[command(name = "pbdsoft")]
#[command(about = "Position-Based Dynamics soft-body simulation")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the built-in hanging-square demo headlessly
    Demo {
        /// Number of ticks to simulate
        #[arg(short, long, default_value_t = 300)]
        ticks: u32,
    },
    /// Export the demo topology to a binary descriptor file
    Export {
        /// Output binary file path
        #[arg(short, long)]
        output: String,
    },
    /// Simulate a topology loaded from a binary descriptor file
    Run {
        /// Input descriptor path
        input: String,
        /// Number of ticks to simulate
        #[arg(short, long, default_value_t = 300)]
        ticks: u32,
    },
}

const TICK_RATE: f32 = 60.0;

/// A unit square hanging from one pinned corner, diagonal vertical, braced
/// by its two diagonals.
fn demo_descriptor() -> TopologyDescriptor {
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

#[instrument(skip(descriptor))]
fn simulate(descriptor: &TopologyDescriptor, ticks: u32) -> Result<(), Box<dyn std::error::Error>> {
    let params = SolverParams {
        global_damping: 0.05,
        ..SolverParams::default()
    }
    .sanitized();

    let mut world = SoftBodyWorld::new();
    let handle = world.create_instance(descriptor, params)?;
    info!(
        particles = descriptor.positions.len(),
        constraints = descriptor.constraints.len(),
        ticks,
        "Simulation starting"
    );

    let ground = Collider::Plane {
        normal: Vec3::Y,
        offset: 0.0,
    };
    let dt = 1.0 / TICK_RATE;
    let mut previous = world.vertex_positions(handle)?;
    let mut diverged = 0u32;

    for tick in 0..ticks {
        if world.simulate(handle, dt, &[ground])? == TickStatus::NumericDivergence {
            diverged += 1;
            continue;
        }

        let current = world.vertex_positions(handle)?;
        let max_delta = current
            .iter()
            .zip(previous.iter())
            .map(|(a, b)| a.distance(*b))
            .fold(0.0f32, f32::max);
        previous = current;

        if tick % 60 == 0 {
            debug!(tick, max_delta, "Tick completed");
        }
        if max_delta < 1e-4 {
            info!(tick, max_delta, "Settled");
            break;
        }
    }

    let final_positions = world.vertex_positions(handle)?;
    for (i, p) in final_positions.iter().enumerate() {
        info!(vertex = i, x = p.x, y = p.y, z = p.z, "Final position");
    }
    if diverged > 0 {
        error!(diverged, "Ticks lost to numeric divergence");
    }

    world.destroy_instance(handle);
    Ok(())
}

#[instrument]
fn export_descriptor(output: &str) -> Result<(), Box<dyn std::error::Error>> {
    let descriptor = demo_descriptor();
    let encoded = bincode::serialize(&descriptor)?;

    let mut file = std::fs::File::create(output)?;
    file.write_all(&encoded)?;

    info!(
        output,
        size_bytes = encoded.len(),
        "Descriptor exported"
    );

    // Verify the file round-trips before declaring success.
    let _: TopologyDescriptor = bincode::deserialize(&encoded)?;
    Ok(())
}

#[instrument]
fn load_descriptor(input: &str) -> Result<TopologyDescriptor, Box<dyn std::error::Error>> {
    let data = std::fs::read(input)?;
    debug!(bytes = data.len(), "Deserializing descriptor");
    let descriptor: TopologyDescriptor = bincode::deserialize(&data)?;
    info!(
        particles = descriptor.positions.len(),
        constraints = descriptor.constraints.len(),
        "Descriptor loaded"
    );
    Ok(descriptor)
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Demo { ticks } => simulate(&demo_descriptor(), ticks),
        Commands::Export { output } => export_descriptor(&output),
        Commands::Run { input, ticks } => {
            load_descriptor(&input).and_then(|descriptor| simulate(&descriptor, ticks))
        }
    };

    if let Err(e) = result {
        error!(error = %e, "Command failed");
        std::process::exit(1);
    }
}
