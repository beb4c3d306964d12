use anyhow::Result;
use clap::{Parser, Subcommand};
use std::process::Command;

#[derive(Parser)]
#[command(name = "xtask", about = "Workspace automation for prism")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run fmt, clippy, tests and doc in order, stopping at the first failure
    Check,
    /// Run cargo fmt --check on all crates
    Fmt,
    /// Run clippy on all crates with warnings denied
    Clippy,
    /// Run tests, for the whole workspace or one crate
    Test {
        /// Package to test, e.g. prism-graph
        #[arg(short, long)]
        package: Option<String>,
    },
    /// Run the frame arena and image loader benchmarks
    Bench,
    /// Build rustdoc for the workspace
    Doc,
}

/// Benchmarks as (package, bench target).
const BENCHES: &[(&str, &str)] = &[
    ("prism-arena", "bench_frame_arena"),
    ("prism-stream", "bench_image_loader"),
];

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Check => {
            fmt()?;
            clippy()?;
            test(None)?;
            doc()?;
        }
        Commands::Fmt => fmt()?,
        Commands::Clippy => clippy()?,
        Commands::Test { package } => test(package.as_deref())?,
        Commands::Bench => bench()?,
        Commands::Doc => doc()?,
    }

    Ok(())
}

/// Run one cargo invocation and fail with `step` in the message.
fn cargo(step: &str, args: &[&str]) -> Result<()> {
    println!("==> cargo {}", args.join(" "));
    let status = Command::new("cargo").args(args).status()?;
    if !status.success() {
        anyhow::bail!("{step} failed ({status})");
    }
    Ok(())
}

fn fmt() -> Result<()> {
    cargo("fmt check", &["fmt", "--all", "--", "--check"])
}

fn clippy() -> Result<()> {
    cargo(
        "clippy",
        &[
            "clippy",
            "--workspace",
            "--all-targets",
            "--",
            "-D",
            "warnings",
        ],
    )
}

fn test(package: Option<&str>) -> Result<()> {
    match package {
        Some(package) => cargo("tests", &["test", "-p", package]),
        None => cargo("tests", &["test", "--workspace"]),
    }
}

fn bench() -> Result<()> {
    for (package, bench) in BENCHES {
        cargo(bench, &["bench", "-p", package, "--bench", bench])?;
    }
    Ok(())
}

fn doc() -> Result<()> {
    cargo("doc", &["doc", "--workspace", "--no-deps"])
}
