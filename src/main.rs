//! dram-emu: cycle-accurate DRAM subsystem simulator.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use dram_emu::config::Config;
use dram_emu::cpu::{Cpu, RandomCpu, StreamCpu, TraceCpu};
use dram_emu::system::build_memory_system;

#[derive(Parser)]
#[command(
    name = "dram-emu",
    about = "Cycle-accurate DRAM simulator",
    long_about = "Examples:\n  \
        dram-emu configs/ddr4_2400.toml -c 100000 -t sample.trace\n  \
        dram-emu configs/ddr4_2400.toml -s random -c 100000"
)]
struct Args {
    /// Device configuration file (TOML)
    config: PathBuf,

    /// Number of cycles to simulate
    #[arg(short = 'c', long = "cycles", default_value_t = 100_000)]
    cycles: u64,

    /// Output directory for stats files
    #[arg(short = 'o', long = "output-dir", default_value = ".")]
    output_dir: PathBuf,

    /// Address stream generator: random | stream
    #[arg(short = 's', long = "stream")]
    stream: Option<String>,

    /// Trace file; setting this ignores -s
    #[arg(short = 't', long = "trace")]
    trace: Option<PathBuf>,

    /// Seed for the synthetic address generators
    #[arg(long = "seed", default_value_t = 0)]
    seed: u64,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let config = Arc::new(
        Config::from_file(&args.config)
            .with_context(|| format!("loading config {}", args.config.display()))?,
    );
    std::fs::create_dir_all(&args.output_dir)
        .with_context(|| format!("creating output dir {}", args.output_dir.display()))?;

    // the host registers real callbacks; the CLI only runs for throughput
    // and stats, so completions are dropped on the floor
    let memory = build_memory_system(
        Arc::clone(&config),
        &args.output_dir,
        Box::new(|_| {}),
        Box::new(|_| {}),
    )?;

    let mut cpu: Box<dyn Cpu> = match &args.trace {
        Some(trace) => Box::new(TraceCpu::new(memory, trace)?),
        None => match args.stream.as_deref() {
            Some("stream") | Some("s") => Box::new(StreamCpu::new(memory, args.seed)),
            _ => Box::new(RandomCpu::new(memory, args.seed)),
        },
    };

    for _ in 0..args.cycles {
        cpu.clock_tick();
    }
    cpu.print_stats().context("writing stats")?;

    Ok(())
}
