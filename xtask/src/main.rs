use anyhow::{Result, bail};
use clap::{Parser, Subcommand};
use std::process::Command;

#[derive(Parser)]
#[command(name = "xtask", about = "Workspace automation for the puck arena")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run fmt, clippy, tests and doc in order
    Check,
    /// Run cargo fmt --check on all crates
    Fmt,
    /// Run clippy on all crates, warnings denied
    Clippy,
    /// Run all tests
    Test,
    /// Build rustdoc for the workspace
    Doc,
    /// Build the entire workspace
    Build,
    /// Run the delta broadcast bench in release mode
    Bench,
    /// Headless release-mode run of the simulator
    Soak {
        /// Physics steps to run
        #[arg(short, long, default_value = "36000")]
        steps: u64,
        /// Pucks to spawn
        #[arg(short, long, default_value = "100")]
        pucks: usize,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Check => {
            fmt()?;
            clippy()?;
            test()?;
            doc()?;
        }
        Commands::Fmt => fmt()?,
        Commands::Clippy => clippy()?,
        Commands::Test => test()?,
        Commands::Doc => doc()?,
        Commands::Build => cargo("build", &["build", "--workspace"])?,
        Commands::Bench => cargo(
            "bench",
            &["bench", "-p", "arena-stream", "--bench", "bench_delta"],
        )?,
        Commands::Soak { steps, pucks } => {
            let steps = steps.to_string();
            let pucks = pucks.to_string();
            cargo(
                "soak",
                &[
                    "run",
                    "--release",
                    "-p",
                    "arena-cli",
                    "--",
                    "simulate",
                    "--steps",
                    &steps,
                    "--pucks",
                    &pucks,
                    "--arch-gravity",
                    "1",
                ],
            )?
        }
    }

    Ok(())
}

fn fmt() -> Result<()> {
    cargo("fmt", &["fmt", "--all", "--", "--check"])
}

fn clippy() -> Result<()> {
    cargo(
        "clippy",
        &["clippy", "--workspace", "--all-targets", "--", "-D", "warnings"],
    )
}

fn test() -> Result<()> {
    cargo("test", &["test", "--workspace"])
}

fn doc() -> Result<()> {
    cargo("doc", &["doc", "--workspace", "--no-deps"])
}

fn cargo(step: &str, args: &[&str]) -> Result<()> {
    println!("==> {step}: cargo {}", args.join(" "));
    let status = Command::new(env_cargo()).args(args).status()?;
    if !status.success() {
        bail!("{step} failed ({status})");
    }
    Ok(())
}

/// The cargo that invoked us, so toolchain overrides carry through.
fn env_cargo() -> String {
    std::env::var("CARGO").unwrap_or_else(|_| "cargo".to_owned())
}
