use super::{run_lifecycle, Context, Failure};
use dialoguer::Confirm;
use flotilla_core::Command;
use std::io::{stdin, IsTerminal};

fn confirm(machines: &[String], is_tty: bool) -> Result<bool, Failure> {
    if !is_tty {
        return Err(Failure::new(
            "refusing to destroy without confirmation (pass --force)",
        ));
    }
    let target = if machines.is_empty() {
        "all machines".to_owned()
    } else {
        machines.join(", ")
    };
    Confirm::new()
        .with_prompt(format!("destroy {target}?"))
        .default(false)
        .interact()
        .map_err(|e| Failure::new(format!("prompt failed: {e}")))
}

pub fn run(ctx: &Context, machines: &[String], force: bool) -> Result<u8, Failure> {
    if !force && !confirm(machines, stdin().is_terminal() && !ctx.json)? {
        return Err(Failure::new("destroy cancelled"));
    }
    run_lifecycle(ctx, Command::Destroy, machines, "destroying machines...")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_interactive_destroy_requires_force() {
        let err = confirm(&["web".to_owned()], false).unwrap_err();
        assert!(err.message.contains("--force"));
    }
}
