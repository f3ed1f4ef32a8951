use super::{json_pretty, open_engine, spin_fail, spin_ok, spinner, Context, Failure, EXIT_SUCCESS};
use flotilla_core::{Command, CoreError};
use flotilla_store::Marker;
use indicatif::ProgressBar;

pub fn run(ctx: &Context, machines: &[String]) -> Result<u8, Failure> {
    let pb = if ctx.json {
        ProgressBar::hidden()
    } else {
        spinner("building images...")
    };
    let engine = open_engine(ctx, &pb)?;
    let reports = match engine.run(Command::Build, machines) {
        Ok(r) => {
            spin_ok(&pb, "images ready");
            r
        }
        Err(e) => {
            spin_fail(&pb, "build failed");
            return Err(e.into());
        }
    };

    let mut images = Vec::with_capacity(reports.len());
    for report in &reports {
        let machine = engine.machine(&report.name)?;
        let built = machine.markers().read(Marker::Image).map_err(CoreError::from)?;
        images.push((report.name.clone(), built.or(machine.config.image.clone())));
    }

    if ctx.json {
        let payload: Vec<_> = images
            .iter()
            .map(|(name, image)| serde_json::json!({ "name": name, "image": image }))
            .collect();
        println!("{}", json_pretty(&payload)?);
    } else {
        for (name, image) in &images {
            println!("{name}: {}", image.as_deref().unwrap_or("(none)"));
        }
    }
    Ok(EXIT_SUCCESS)
}
