//! `vcpu-verify`: Replays persisted execution traces and grades them.
//!
//! Accepts trace files and directories; directories are searched for
//! `cpu_<id>_execution.json` files.
//!
//! **Usage:**
//! ```
//! vcpu-verify <path>...
//! ```
//!
//! Exits non-zero if any trace fails verification.

#![deny(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    missing_docs,
    clippy::missing_errors_doc
)]

use std::path::PathBuf;
use std::process;

use anyhow::Result;
use clap::Parser;
use vcpu_engine::init_tracing;
use vcpu_verify::verify_paths;

/// Verify persisted vcpu execution traces.
#[derive(Parser)]
#[command(name = "vcpu-verify", about = "Replay and grade persisted execution traces")]
struct Args {
    /// Trace files or directories containing them.
    #[arg(required = true)]
    paths: Vec<PathBuf>,
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    let report = verify_paths(&args.paths);

    println!("vcpu Trace Verification Report");
    println!("==============================");
    println!();
    println!("{report}");

    let failed = report.failure_count();
    if failed > 0 {
        eprintln!("Verification FAILED: {failed} trace(s) did not pass.");
        process::exit(1);
    }

    println!("Verification PASSED.");
    Ok(())
}
