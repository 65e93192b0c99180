//! sqlpeek - Query a debugged program's SQLite databases
//!
//! Entry point that parses the command line, sets up logging and starts
//! the interactive CLI.

use std::path::PathBuf;

use clap::Parser;

use sqlpeek::config::Config;

/// sqlpeek: run SQL inside a program under the debugger
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Native helper library loaded into the target
    #[arg(long, env = "SQLPEEK_HELPER")]
    helper: Option<PathBuf>,

    /// Column/row separator handed to the helper
    #[arg(short, long)]
    separator: Option<String>,

    /// Attach to a running process
    #[arg(short, long, conflicts_with = "program")]
    pid: Option<u32>,

    /// Program to launch, followed by its arguments
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    program: Vec<String>,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> anyhow::Result<()> {
    // 1. Parse command line arguments
    let args = Args::parse();

    // 2. Initialize logger with verbosity level
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(
        match args.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        },
    ))
    .init();

    // 3. Build the session configuration
    let mut config = Config::default();
    if let Some(helper) = args.helper {
        // The target resolves relative paths against its own working directory
        config.helper_path = helper.canonicalize().unwrap_or(helper);
    }
    config.separator = args.separator;

    log::info!("sqlpeek v{} initialized", env!("CARGO_PKG_VERSION"));
    log::debug!("Helper: {}", config.helper_path.display());
    log::debug!("Separator: {:?}", config.separator);
    if !config.helper_path.exists() {
        log::warn!("Helper library {} does not exist", config.helper_path.display());
    }

    run(&config, args.pid, args.program)
}

#[cfg(all(target_os = "linux", target_arch = "x86_64"))]
fn run(config: &Config, pid: Option<u32>, program: Vec<String>) -> anyhow::Result<()> {
    println!("[*] sqlpeek v{}", env!("CARGO_PKG_VERSION"));
    sqlpeek::ui::cli::run_cli(config, pid, program)
}

#[cfg(not(all(target_os = "linux", target_arch = "x86_64")))]
fn run(_config: &Config, _pid: Option<u32>, _program: Vec<String>) -> anyhow::Result<()> {
    anyhow::bail!("sqlpeek only supports Linux on x86_64")
}
