//! Tempo CLI Library
//!
//! Driver binaries for the instrumentation library. Each subcommand runs
//! either peer of the channel: pass `0` to run as the Monitor, `1` to run
//! as the Application, with both processes pointed at the same `--channel`
//! URI.

mod demo;
mod stress;

use clap::{Parser, Subcommand, ValueEnum};

/// Which peer of the channel this process plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Role {
    /// Bind the channel and poll for samples.
    #[value(name = "0")]
    Monitor,
    /// Connect to the monitor and run the instrumented loop.
    #[value(name = "1")]
    Application,
}

#[derive(Parser, Debug)]
#[command(name = "tempo")]
#[command(author, version, about = "Loop instrumentation demo and stress drivers")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Channel URI shared by both peers (ipc://<path> or tcp://<host>:<port>)
    #[arg(long, global = true, default_value = "ipc:///tmp/tempo-demo.ipc")]
    pub channel: String,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Paced demo loop: fixed idle and compute phases per iteration
    Demo {
        /// 0 = run as Monitor, 1 = run as Application
        role: Role,

        /// Iterations on the application side
        #[arg(long, default_value = "30")]
        iterations: u64,
    },
    /// Measure begin/end pair overhead on a tight transcendental loop
    Stress {
        /// 0 = run as Monitor, 1 = run as Application
        role: Role,

        /// Total iterations, split across the worker threads
        #[arg(long, default_value = "1000000000")]
        iterations: u64,

        /// Number of instrumented worker threads
        #[arg(long, default_value = "2")]
        threads: usize,
    },
}

/// Run the tempo CLI. This is the entry point of the `tempo` binary.
pub fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "tempo=debug" } else { "tempo=info" };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Demo { role, iterations } => demo::run(&cli.channel, role, iterations),
        Commands::Stress {
            role,
            iterations,
            threads,
        } => stress::run(&cli.channel, role, iterations, threads),
    }
}
