// SPDX-License-Identifier: GPL-3.0-only

use clap::{Parser, Subcommand};
use frame_fanout::constants::DEFAULT_CAPTURE_QUALITY;
use std::path::PathBuf;

mod cli;

#[derive(Parser)]
#[command(name = "frame-fanout")]
#[command(about = "Distribute one video stream to many output surfaces")]
#[command(version)]
struct Cli {
    /// Engine configuration file (JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Graphics driver
    #[arg(long, value_enum, global = true, default_value = "software")]
    driver: cli::Driver,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Stream a synthetic pattern to in-memory windows
    Run {
        /// Number of destination windows
        #[arg(short, long, default_value = "4")]
        destinations: u32,

        /// Producer frame rate
        #[arg(short, long, default_value = "30")]
        fps: u32,

        /// Frame rate ceiling for every other destination (0 disables)
        #[arg(short, long, default_value = "10")]
        max_fps: u32,

        /// Streaming duration in seconds
        #[arg(short, long, default_value = "5")]
        seconds: u64,
    },

    /// Capture a still of a synthetic frame
    Capture {
        /// Output file path (default: ~/Pictures/frame-fanout/IMG_TIMESTAMP.jpg)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Compression quality, 1-99
        #[arg(short, long, default_value_t = i32::from(DEFAULT_CAPTURE_QUALITY))]
        quality: i32,
    },

    /// Print the effective configuration
    Config,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    // Set RUST_LOG environment variable to control log level
    // Examples: RUST_LOG=debug, RUST_LOG=frame_fanout=trace, RUST_LOG=info
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(true)
        .with_level(true)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            destinations,
            fps,
            max_fps,
            seconds,
        } => cli::run_demo(cli.config, cli.driver, destinations, fps, max_fps, seconds),
        Commands::Capture { output, quality } => {
            cli::capture_still(cli.config, cli.driver, output, quality)
        }
        Commands::Config => cli::print_config(cli.config),
    }
}
