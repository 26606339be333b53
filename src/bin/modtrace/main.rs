//! modtrace - render a note scenario through a modulation chain and print
//! the resulting envelope trace as CSV.
//!
//! Run with: cargo run --bin modtrace -- --release-at 2000

mod scenario;

use std::path::PathBuf;

use clap::Parser;
use color_eyre::eyre::WrapErr;
use saavy_modulation::state::{StateTree, Stateful};

use scenario::Scenario;

#[derive(Debug, Parser)]
#[command(name = "modtrace")]
#[command(about = "Trace per-voice modulation values", long_about = None)]
struct Cli {
    /// Increase log output (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Sample rate in Hz
    #[arg(short, long, default_value = "44100")]
    sample_rate: f64,

    /// Block size in samples
    #[arg(short, long, default_value = "512")]
    block_size: usize,

    /// Attack time in ms
    #[arg(long, default_value = "10")]
    attack: f32,

    /// Hold time in ms
    #[arg(long, default_value = "0")]
    hold: f32,

    /// Decay time in ms
    #[arg(long, default_value = "100")]
    decay: f32,

    /// Sustain level (0..1, 0.501 is -6 dB)
    #[arg(long, default_value = "0.501")]
    sustain: f32,

    /// Release time in ms
    #[arg(long, default_value = "50")]
    release: f32,

    /// Use an exponential attack curve
    #[arg(long)]
    exponential_attack: bool,

    /// Sample at which the first note is released
    #[arg(long, default_value = "2000")]
    release_at: usize,

    /// Play a second, overlapping note starting at this sample
    #[arg(long)]
    second_note: Option<usize>,

    /// Share one envelope across voices
    #[arg(long)]
    mono: bool,

    /// In mono mode, glide into overlapping notes instead of retriggering
    #[arg(long)]
    legato: bool,

    /// Run the chain at control rate
    #[arg(long)]
    control_rate: bool,

    /// Total samples to render
    #[arg(short, long, default_value = "5000")]
    length: usize,

    /// Print every Nth sample
    #[arg(short, long, default_value = "100")]
    every: usize,

    /// Restore engine state from a JSON file before rendering
    #[arg(long)]
    restore: Option<PathBuf>,

    /// Print the engine state as JSON and exit
    #[arg(long)]
    dump_state: bool,
}

fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => log::Level::Warn,
        1 => log::Level::Debug,
        _ => log::Level::Trace,
    };
    simple_logger::init_with_level(level)?;

    let mut scenario = Scenario::from_cli(&cli);

    if let Some(path) = &cli.restore {
        let json = std::fs::read_to_string(path).wrap_err_with(|| format!("reading {}", path.display()))?;
        let tree: StateTree = serde_json::from_str(&json).wrap_err("parsing engine state")?;
        scenario.engine.restore_state(&tree);
    }

    if cli.dump_state {
        let json = serde_json::to_string_pretty(&scenario.engine.export_state())?;
        println!("{json}");
        return Ok(());
    }

    println!("sample,value,phase");
    for row in scenario.run() {
        println!("{},{:.6},{:?}", row.sample, row.value, row.phase);
    }

    Ok(())
}
