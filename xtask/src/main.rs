//! Build automation tasks for binkp-rs
//!
//! Run with: cargo xtask <command>

use clap::{Parser, Subcommand};
use std::process::Command;

/// Fuzz targets defined in fuzz/Cargo.toml
const FUZZ_TARGETS: &[&str] = &[
    "fuzz_frame_decoder",
    "fuzz_command_parse",
    "fuzz_address_parse",
];

#[derive(Parser)]
#[command(name = "xtask")]
#[command(about = "binkp-rs build automation")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run all tests
    Test,

    /// Run clippy lints
    Lint,

    /// Check formatting
    Fmt,

    /// Run all CI checks
    Ci,

    /// Run the frame codec benchmarks
    Bench,

    /// Fuzz one target, or each target in turn (requires cargo-fuzz)
    Fuzz {
        /// Target name; all targets when omitted
        target: Option<String>,

        /// Seconds per target
        #[arg(long, default_value_t = 60)]
        seconds: u32,
    },

    /// Generate documentation
    Doc,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Test => {
            run_command("cargo", &["test", "--workspace"])?;
        }
        Commands::Lint => {
            run_command("cargo", &["clippy", "--workspace", "--all-targets", "--", "-D", "warnings"])?;
        }
        Commands::Fmt => {
            run_command("cargo", &["fmt", "--all", "--check"])?;
        }
        Commands::Ci => {
            println!("Running CI checks...");
            run_command("cargo", &["fmt", "--all", "--check"])?;
            run_command("cargo", &["clippy", "--workspace", "--all-targets", "--", "-D", "warnings"])?;
            run_command("cargo", &["test", "--workspace"])?;
            println!("All CI checks passed!");
        }
        Commands::Bench => {
            run_command("cargo", &["bench", "-p", "binkp-core"])?;
        }
        Commands::Fuzz { target, seconds } => {
            let targets: Vec<&str> = match &target {
                Some(name) => {
                    if !FUZZ_TARGETS.contains(&name.as_str()) {
                        anyhow::bail!(
                            "Unknown fuzz target '{}'; expected one of {}",
                            name,
                            FUZZ_TARGETS.join(", ")
                        );
                    }
                    vec![name.as_str()]
                }
                None => FUZZ_TARGETS.to_vec(),
            };
            let limit = format!("-max_total_time={seconds}");
            for target in targets {
                println!("Fuzzing {target} for {seconds}s...");
                run_command("cargo", &["+nightly", "fuzz", "run", target, "--", &limit])?;
            }
        }
        Commands::Doc => {
            run_command("cargo", &["doc", "--workspace", "--no-deps", "--open"])?;
        }
    }

    Ok(())
}

fn run_command(program: &str, args: &[&str]) -> anyhow::Result<()> {
    let status = Command::new(program)
        .args(args)
        .status()?;

    if !status.success() {
        anyhow::bail!("{} {:?} failed", program, args);
    }

    Ok(())
}
