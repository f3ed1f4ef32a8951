mod commands;
mod terminal;

use clap::{Parser, Subcommand};
use commands::Context;
use flotilla_core::install_signal_handler;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "flotilla",
    version,
    about = "Bring up, tear down and inspect the machines of a project"
)]
struct Cli {
    /// Path to the project file.
    #[arg(short, long, default_value = flotilla_schema::CONFIG_FILE_NAME, global = true)]
    config: PathBuf,

    /// Store directory (default: `.flotilla` next to the project file).
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    /// Output results as structured JSON.
    #[arg(long, default_value_t = false, global = true)]
    json: bool,

    /// Enable verbose (debug) logging output.
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,

    /// Enable trace-level logging (more detailed than --verbose).
    #[arg(long, default_value_t = false, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Create and start machines.
    Up {
        /// Machines to act on (default: all).
        machines: Vec<String>,
    },
    /// Stop running machines.
    Halt {
        machines: Vec<String>,
    },
    /// Stop and delete machines with their networks and cached images.
    Destroy {
        machines: Vec<String>,
        /// Do not ask for confirmation.
        #[arg(short, long, default_value_t = false)]
        force: bool,
    },
    /// Halt then bring machines back up.
    Reload {
        machines: Vec<String>,
    },
    /// Build machine images without creating machines.
    Build {
        machines: Vec<String>,
    },
    /// Show the state of each machine.
    Status {
        machines: Vec<String>,
    },
}

fn main() -> ExitCode {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let msg = info.to_string();
        if msg.contains("Broken pipe")
            || msg.contains("broken pipe")
            || msg.contains("os error 32")
            || msg.contains("failed printing to stdout")
        {
            std::process::exit(0);
        }
        default_hook(info);
    }));

    let cli = Cli::parse();

    let default_level = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("FLOTILLA_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    install_signal_handler();

    let ctx = Context {
        config: cli.config,
        store: cli.store,
        json: cli.json,
    };

    let result = match cli.command {
        Commands::Up { machines } => commands::up::run(&ctx, &machines),
        Commands::Halt { machines } => commands::halt::run(&ctx, &machines),
        Commands::Destroy { machines, force } => commands::destroy::run(&ctx, &machines, force),
        Commands::Reload { machines } => commands::reload::run(&ctx, &machines),
        Commands::Build { machines } => commands::build::run(&ctx, &machines),
        Commands::Status { machines } => commands::status::run(&ctx, &machines),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(failure) => {
            eprintln!("error: {}", failure.message);
            ExitCode::from(failure.code)
        }
    }
}
