//! Build automation tasks for the adaptive-pool workspace.
//!
//! Run with `cargo xtask <command>`.
//!
//! ## Available Commands
//!
//! - `ci`: Run all CI checks (format, lint, test, docs)
//! - `fmt`: Check/apply code formatting
//! - `clippy`: Run clippy lints
//! - `test`: Run all tests
//! - `doc`: Generate documentation
//! - `bench`: Run benchmarks
//! - `example`: Run the read-replica walkthrough
//! - `coverage`: Run code coverage (requires cargo-llvm-cov)
//! - `clean`: Clean build artifacts

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use xshell::{Shell, cmd};

#[derive(Parser)]
#[command(name = "xtask", about = "Build automation for adaptive-pool")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run all checks (format, lint, test, docs)
    Ci,
    /// Run cargo fmt (--check by default, --fix to apply)
    Fmt {
        /// Apply formatting fixes
        #[arg(long)]
        fix: bool,
    },
    /// Run clippy on all targets
    Clippy {
        /// Apply clippy suggestions
        #[arg(long)]
        fix: bool,
    },
    /// Run all tests
    Test {
        /// Test a specific package
        #[arg(short, long)]
        package: Option<String>,
        /// Run a single integration test target (e.g. `manager`)
        #[arg(long)]
        test: Option<String>,
    },
    /// Generate documentation
    Doc {
        /// Open documentation in browser
        #[arg(long)]
        open: bool,
    },
    /// Run benchmarks
    Bench {
        /// Benchmark filter pattern
        filter: Option<String>,
    },
    /// Run the read-replica example against mock drivers
    Example,
    /// Run code coverage
    Coverage {
        /// Output format (html, lcov)
        #[arg(long, default_value = "html")]
        format: String,
    },
    /// Clean build artifacts
    Clean,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let sh = Shell::new()?;

    // Change to workspace root
    let workspace_root = workspace_root()?;
    sh.change_dir(&workspace_root);

    match cli.command {
        Command::Ci => {
            println!("Running CI checks...");
            fmt(&sh, false)?;
            clippy(&sh, false)?;
            test(&sh, None, None)?;
            doc(&sh, false)?;
            println!("\n✅ All CI checks passed!");
        }
        Command::Fmt { fix } => fmt(&sh, fix)?,
        Command::Clippy { fix } => clippy(&sh, fix)?,
        Command::Test { package, test: target } => {
            test(&sh, package.as_deref(), target.as_deref())?;
        }
        Command::Doc { open } => doc(&sh, open)?,
        Command::Bench { filter } => bench(&sh, filter.as_deref())?,
        Command::Example => example(&sh)?,
        Command::Coverage { format } => coverage(&sh, &format)?,
        Command::Clean => clean(&sh)?,
    }

    Ok(())
}

fn workspace_root() -> Result<PathBuf> {
    let output = std::process::Command::new("cargo")
        .args(["locate-project", "--workspace", "--message-format=plain"])
        .output()
        .context("failed to run cargo locate-project")?;

    let path = String::from_utf8(output.stdout)
        .context("invalid UTF-8 in cargo output")?
        .trim()
        .to_string();

    Ok(PathBuf::from(path)
        .parent()
        .context("failed to get workspace root")?
        .to_path_buf())
}

fn fmt(sh: &Shell, fix: bool) -> Result<()> {
    if fix {
        println!("Applying formatting...");
        cmd!(sh, "cargo fmt --all").run()?;
        println!("✅ Formatting applied.");
    } else {
        println!("Checking formatting...");
        cmd!(sh, "cargo fmt --all -- --check").run()?;
        println!("✅ Formatting check passed.");
    }
    Ok(())
}

fn clippy(sh: &Shell, fix: bool) -> Result<()> {
    if fix {
        println!("Applying clippy suggestions...");
        cmd!(sh, "cargo clippy --workspace --all-targets --fix --allow-dirty").run()?;
        println!("✅ Clippy suggestions applied.");
    } else {
        println!("Running clippy...");
        cmd!(sh, "cargo clippy --workspace --all-targets -- -D warnings").run()?;
        println!("✅ Clippy check passed.");
    }
    Ok(())
}

fn test(sh: &Shell, package: Option<&str>, target: Option<&str>) -> Result<()> {
    println!("Running tests...");

    let mut args = vec!["--workspace".to_string()];
    if let Some(pkg) = package {
        args = vec!["-p".to_string(), pkg.to_string()];
    }
    if let Some(target) = target {
        args.push("--test".to_string());
        args.push(target.to_string());
    }

    cmd!(sh, "cargo test {args...}").run()?;
    println!("✅ All tests passed.");
    Ok(())
}

fn doc(sh: &Shell, open: bool) -> Result<()> {
    println!("Generating documentation...");
    if open {
        cmd!(sh, "cargo doc --workspace --no-deps --open").run()?;
    } else {
        cmd!(sh, "cargo doc --workspace --no-deps").run()?;
    }
    println!("✅ Documentation generated.");
    Ok(())
}

fn bench(sh: &Shell, filter: Option<&str>) -> Result<()> {
    println!("Running benchmarks...");
    if let Some(f) = filter {
        cmd!(sh, "cargo bench -p adaptive-pool -- {f}").run()?;
    } else {
        cmd!(sh, "cargo bench -p adaptive-pool").run()?;
    }
    Ok(())
}

fn example(sh: &Shell) -> Result<()> {
    cmd!(sh, "cargo run -p adaptive-pool-testing --example read_replica").run()?;
    Ok(())
}

fn coverage(sh: &Shell, format: &str) -> Result<()> {
    println!("Running code coverage...");

    // Requires cargo-llvm-cov
    match format {
        "html" => {
            cmd!(sh, "cargo llvm-cov --workspace --html").run()?;
            println!("✅ Coverage report: target/llvm-cov/html/index.html");
        }
        "lcov" => {
            cmd!(
                sh,
                "cargo llvm-cov --workspace --lcov --output-path target/lcov.info"
            )
            .run()?;
            println!("✅ Coverage report: target/lcov.info");
        }
        _ => {
            bail!("Unknown coverage format: {}. Use html or lcov.", format);
        }
    }

    Ok(())
}

fn clean(sh: &Shell) -> Result<()> {
    println!("Cleaning build artifacts...");
    cmd!(sh, "cargo clean").run()?;
    println!("✅ Clean complete.");
    Ok(())
}
