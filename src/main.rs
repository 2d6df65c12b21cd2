//! Tidepool - headless dam break demo
//!
//! Runs the fluid plugin without a window and logs statistics. Pass a path to
//! a RON `FluidParams` file to simulate something else.

use bevy::log::LogPlugin;
use bevy::prelude::*;
use tidepool::prelude::*;

const FRAMES: u64 = 600;
const REPORT_EVERY: u64 = 60;

fn main() {
    let params = match std::env::args().nth(1) {
        Some(path) => match FluidParams::load(&path) {
            Ok(params) => params,
            Err(err) => {
                eprintln!("Cannot load {path}: {err}");
                std::process::exit(1);
            }
        },
        None => FluidParams::dam_break(),
    };

    let mut app = App::new();
    app.add_plugins(LogPlugin::default())
        .add_plugins(FluidPlugin::new(params))
        .add_systems(Update, report_progress);
    app.finish();
    app.cleanup();

    if !app.world().contains_resource::<FluidSimulation>() {
        std::process::exit(1);
    }

    for _ in 0..FRAMES {
        app.update();
    }

    let simulation = app.world().resource::<FluidSimulation>();
    let lowest = simulation
        .positions()
        .iter()
        .map(|p| p.y)
        .fold(f32::INFINITY, f32::min);
    info!(
        "Finished {} steps; lowest particle at y = {:.4}, {} truncated neighbor lists",
        simulation.stats().step,
        lowest,
        simulation.total_truncations()
    );
}

/// Logs statistics once per simulated second.
fn report_progress(state: Res<FluidState>, buffer: Res<FluidRenderBuffer>) {
    if !state.is_changed() || state.frame == 0 || state.frame % REPORT_EVERY != 0 {
        return;
    }
    info!(
        "Frame {}: {} particles, density error {:.2}%, {} bytes of instance data",
        state.frame,
        state.particle_count,
        state.avg_density_error * 100.0,
        buffer.as_bytes().len()
    );
}
