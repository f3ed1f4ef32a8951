use super::{run_lifecycle, Context, Failure};
use flotilla_core::Command;

pub fn run(ctx: &Context, machines: &[String]) -> Result<u8, Failure> {
    run_lifecycle(ctx, Command::Reload, machines, "reloading machines...")
}
