//! Terminal implementations of the core's `Ui` and `Prompt` seams.

use console::style;
use dialoguer::Input;
use flotilla_core::{CoreError, Prompt, Ui};
use indicatif::ProgressBar;
use tracing::debug;

/// Prints user-facing messages to stderr above the active spinner.
pub struct ConsoleUi {
    bar: ProgressBar,
}

impl ConsoleUi {
    pub fn new(bar: ProgressBar) -> Self {
        Self { bar }
    }

    fn print(&self, line: &str) {
        self.bar.suspend(|| eprintln!("{line}"));
    }
}

impl Ui for ConsoleUi {
    fn info(&self, message: &str) {
        self.print(&format!("{} {message}", style("==>").cyan().bold()));
    }

    fn warn(&self, message: &str) {
        self.print(&style(format!("warning: {message}")).yellow().to_string());
    }

    fn error(&self, message: &str) {
        self.print(&style(format!("error: {message}")).red().bold().to_string());
    }

    fn detail(&self, message: &str) {
        self.print(&format!("    {}", style(message).dim()));
    }
}

/// Asks on the terminal, with the spinner paused.
pub struct DialoguerPrompt {
    bar: ProgressBar,
}

impl DialoguerPrompt {
    pub fn new(bar: ProgressBar) -> Self {
        Self { bar }
    }
}

impl Prompt for DialoguerPrompt {
    fn ask(&self, question: &str, default: &str) -> Result<String, CoreError> {
        let answer = self.bar.suspend(|| {
            Input::<String>::new()
                .with_prompt(question)
                .default(default.to_owned())
                .interact_text()
        });
        let answer = answer.map_err(|e| CoreError::Prompt(e.to_string()))?;
        debug!("prompt '{question}' answered '{answer}'");
        Ok(answer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn console_ui_prints_with_hidden_bar() {
        let ui = ConsoleUi::new(ProgressBar::hidden());
        ui.info("starting");
        ui.warn("careful");
        ui.error("failed");
        ui.detail("output line");
    }
}
