//! Shell entry point: open (or create) the database file named on the
//! command line and hand it to the REPL. Logging goes to stderr,
//! controlled by `RUST_LOG` (e.g. `RUST_LOG=lumadb=debug`).

use std::path::PathBuf;
use std::process::ExitCode;

use eyre::Result;
use tracing_subscriber::EnvFilter;

use lumadb::cli::Repl;
use lumadb::database::Database;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<()> {
    let path = std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("luma.db"));

    let db = Database::open(&path)?;
    Repl::new(db)?.run()
}
