use super::{colorize_state, json_pretty, open_engine, Context, Failure, EXIT_SUCCESS};
use flotilla_core::Command;
use indicatif::ProgressBar;

pub fn run(ctx: &Context, machines: &[String]) -> Result<u8, Failure> {
    let engine = open_engine(ctx, &ProgressBar::hidden())?;
    let reports = engine.run(Command::Status, machines)?;
    let project = &engine.services().project;

    if ctx.json {
        let payload: Vec<_> = reports
            .iter()
            .map(|r| {
                serde_json::json!({
                    "name": r.name,
                    "state": r.state,
                    "provider": project.machine(&r.name).map(|m| m.provider.as_str()),
                })
            })
            .collect();
        println!("{}", json_pretty(&payload)?);
    } else if reports.is_empty() {
        println!("no machines defined");
    } else {
        println!("{:<20} {:<14} PROVIDER", "NAME", "STATE");
        for report in &reports {
            let provider = project
                .machine(&report.name)
                .map_or("", |m| m.provider.as_str());
            println!(
                "{:<20} {:<14} {provider}",
                report.name,
                colorize_state(report.state)
            );
        }
    }
    Ok(EXIT_SUCCESS)
}
