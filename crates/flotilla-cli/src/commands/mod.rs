pub mod build;
pub mod destroy;
pub mod halt;
pub mod reload;
pub mod status;
pub mod up;

use crate::terminal::{ConsoleUi, DialoguerPrompt};
use flotilla_core::{Command, CoreError, DefaultPrompt, Engine, EngineBuilder, MachineReport, Prompt};
use flotilla_schema::Project;
use flotilla_store::MachineState;
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{stdin, IsTerminal};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;

/// Global options shared by every subcommand.
#[derive(Debug, Clone)]
pub struct Context {
    pub config: PathBuf,
    pub store: Option<PathBuf>,
    pub json: bool,
}

/// A failed command: the message to print and the process exit code.
#[derive(Debug)]
pub struct Failure {
    pub code: u8,
    pub message: String,
}

impl Failure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: EXIT_FAILURE,
            message: message.into(),
        }
    }
}

impl From<CoreError> for Failure {
    fn from(e: CoreError) -> Self {
        Self {
            code: u8::try_from(e.exit_code()).unwrap_or(EXIT_FAILURE),
            message: e.to_string(),
        }
    }
}

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, Failure> {
    serde_json::to_string_pretty(value)
        .map_err(|e| Failure::new(format!("JSON serialization failed: {e}")))
}

pub fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    pb.set_message(msg.to_owned());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

fn plain_style() -> ProgressStyle {
    ProgressStyle::with_template("{msg}").unwrap_or_else(|_| ProgressStyle::default_spinner())
}

pub fn spin_ok(pb: &ProgressBar, msg: &str) {
    pb.set_style(plain_style());
    pb.finish_with_message(format!("✓ {msg}"));
}

pub fn spin_fail(pb: &ProgressBar, msg: &str) {
    pb.set_style(plain_style());
    pb.finish_with_message(format!("✗ {msg}"));
}

pub fn colorize_state(state: MachineState) -> String {
    use console::Style;
    let text = state.to_string();
    match state {
        MachineState::Running => Style::new().green().bold().apply_to(text).to_string(),
        MachineState::Stopped => Style::new().yellow().apply_to(text).to_string(),
        MachineState::Preparing => Style::new().cyan().apply_to(text).to_string(),
        MachineState::NotCreated => Style::new().dim().apply_to(text).to_string(),
        MachineState::Unknown => Style::new().red().apply_to(text).to_string(),
    }
}

/// Load the project and wire the engine to the terminal. Prompts fall back
/// to their defaults when stdin is not a terminal or output is JSON.
pub fn open_engine(ctx: &Context, pb: &ProgressBar) -> Result<Engine, Failure> {
    let project = Project::load(&ctx.config).map_err(CoreError::from)?;
    let prompt: Arc<dyn Prompt> = if stdin().is_terminal() && !ctx.json {
        Arc::new(DialoguerPrompt::new(pb.clone()))
    } else {
        Arc::new(DefaultPrompt)
    };
    let mut builder = EngineBuilder::new(project)
        .ui(Arc::new(ConsoleUi::new(pb.clone())))
        .prompt(prompt);
    if let Some(store) = &ctx.store {
        builder = builder.store_root(store);
    }
    Ok(builder.build()?)
}

/// Run a lifecycle command under a spinner and print the resulting states.
pub fn run_lifecycle(
    ctx: &Context,
    command: Command,
    machines: &[String],
    working: &str,
) -> Result<u8, Failure> {
    let pb = if ctx.json {
        ProgressBar::hidden()
    } else {
        spinner(working)
    };
    let engine = open_engine(ctx, &pb)?;
    let reports = match engine.run(command, machines) {
        Ok(reports) => {
            spin_ok(&pb, &format!("{command} finished"));
            reports
        }
        Err(e) => {
            spin_fail(&pb, &format!("{command} failed"));
            return Err(e.into());
        }
    };
    print_reports(&reports, ctx.json)?;
    Ok(EXIT_SUCCESS)
}

pub fn print_reports(reports: &[MachineReport], json: bool) -> Result<(), Failure> {
    if json {
        let payload: Vec<_> = reports
            .iter()
            .map(|r| {
                serde_json::json!({
                    "name": r.name,
                    "state": r.state,
                    "triggers_fired": r.before.fired() + r.after.fired(),
                })
            })
            .collect();
        println!("{}", json_pretty(&payload)?);
    } else {
        for report in reports {
            println!("{}: {}", report.name, colorize_state(report.state));
        }
    }
    Ok(())
}
