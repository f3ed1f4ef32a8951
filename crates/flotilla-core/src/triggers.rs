use crate::lifecycle::Command;
use crate::machine::Machine;
use crate::ui::Ui;
use crate::CoreError;
use flotilla_runtime::{run_local, ExecOptions, OutputStream};
use flotilla_schema::{OnError, ScriptSource, ScriptSpec, Stage, Trigger, TriggerId};
use flotilla_store::MachineState;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerOutcome {
    Fired,
    /// Selected for the command but filtered out by `only_on`.
    Skipped,
    /// Failed under `on_error = "continue"`.
    Continued(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TriggerReport {
    pub entries: Vec<(TriggerId, String, TriggerOutcome)>,
}

impl TriggerReport {
    pub fn fired(&self) -> usize {
        self.entries
            .iter()
            .filter(|(_, _, o)| *o == TriggerOutcome::Fired)
            .count()
    }

    pub fn outcome(&self, label: &str) -> Option<&TriggerOutcome> {
        self.entries
            .iter()
            .find(|(_, l, _)| l == label)
            .map(|(_, _, o)| o)
    }
}

/// Fires a machine's triggers for one stage of a command, in declared order.
pub struct TriggerEngine {
    ui: Arc<dyn Ui>,
}

impl TriggerEngine {
    pub fn new(ui: Arc<dyn Ui>) -> Self {
        Self { ui }
    }

    pub fn fire(
        &self,
        stage: Stage,
        command: Command,
        machine: &Machine,
    ) -> Result<TriggerReport, CoreError> {
        let mut report = TriggerReport::default();
        let selected = machine
            .config
            .triggers
            .for_stage(stage)
            .iter()
            .filter(|t| t.applies_to(command.as_str()));

        for trigger in selected {
            let label = trigger.label().to_owned();
            if !trigger.matches_guest(&machine.name) {
                debug!("trigger '{label}' skipped for {}", machine.name);
                report
                    .entries
                    .push((trigger.id.clone(), label, TriggerOutcome::Skipped));
                continue;
            }

            info!("{stage} {command} trigger '{label}' firing for {}", machine.name);
            let outcome = match self.run_one(trigger, machine) {
                Ok(()) => TriggerOutcome::Fired,
                Err(e) => match trigger.on_error {
                    OnError::Halt => {
                        self.ui.error(&format!("{}: {e} (halting)", machine.name));
                        return Err(e);
                    }
                    OnError::Continue => {
                        self.ui
                            .error(&format!("{}: {e} (continuing)", machine.name));
                        TriggerOutcome::Continued(e.to_string())
                    }
                },
            };
            report.entries.push((trigger.id.clone(), label, outcome));
        }
        Ok(report)
    }

    fn run_one(&self, trigger: &Trigger, machine: &Machine) -> Result<(), CoreError> {
        if let Some(message) = &trigger.info {
            self.ui.info(&format!("{}: {message}", machine.name));
        }
        if let Some(message) = &trigger.warn {
            self.ui.warn(&format!("{}: {message}", machine.name));
        }
        if let Some(script) = &trigger.run {
            let ui = &self.ui;
            let code = run_local(script, &machine.project_root, &mut |stream, line| {
                relay(ui.as_ref(), stream, line);
            })
            .map_err(|e| script_failed(trigger, e.to_string()))?;
            check_exit(trigger, code)?;
        }
        if let Some(script) = &trigger.run_remote {
            self.run_remote(trigger, script, machine)?;
        }
        Ok(())
    }

    fn run_remote(
        &self,
        trigger: &Trigger,
        script: &ScriptSpec,
        machine: &Machine,
    ) -> Result<(), CoreError> {
        let unavailable = || CoreError::RemoteTriggerUnavailable {
            trigger: trigger.label().to_owned(),
            machine: machine.name.clone(),
        };
        if machine.state()? != MachineState::Running {
            return Err(unavailable());
        }
        let communicator = machine
            .communicator()?
            .filter(|c| c.ready())
            .ok_or_else(unavailable)?;

        let args = script
            .args
            .iter()
            .map(|a| shell_quote(a))
            .collect::<Vec<_>>()
            .join(" ");
        let command = match &script.source {
            ScriptSource::Inline(body) if args.is_empty() => body.clone(),
            ScriptSource::Inline(body) => format!("set -- {args}\n{body}"),
            ScriptSource::Path(path) => {
                let target = format!("/tmp/flotilla-trigger-{}", trigger.id);
                communicator
                    .upload(path, &target)
                    .map_err(|e| script_failed(trigger, e.to_string()))?;
                format!("chmod +x {target} && {target} {args}")
                    .trim_end()
                    .to_owned()
            }
        };

        let options = ExecOptions {
            sudo: false,
            env: script.env.clone(),
        };
        let ui = &self.ui;
        let code = communicator
            .execute(&command, &options, &mut |stream, line| {
                relay(ui.as_ref(), stream, line);
            })
            .map_err(|e| script_failed(trigger, e.to_string()))?;
        check_exit(trigger, code)
    }
}

fn relay(ui: &dyn Ui, stream: OutputStream, line: &str) {
    match stream {
        OutputStream::Stdout => ui.detail(line),
        OutputStream::Stderr => ui.detail(&format!("! {line}")),
    }
}

fn check_exit(trigger: &Trigger, code: i32) -> Result<(), CoreError> {
    if trigger.exit_codes.contains(&code) {
        Ok(())
    } else {
        Err(script_failed(trigger, format!("script exited with code {code}")))
    }
}

fn script_failed(trigger: &Trigger, message: String) -> CoreError {
    CoreError::TriggerScriptFailed {
        trigger: trigger.label().to_owned(),
        message,
    }
}

fn shell_quote(arg: &str) -> String {
    format!("'{}'", arg.replace('\'', r"'\''"))
}
