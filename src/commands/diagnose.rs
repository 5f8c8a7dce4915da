//! Collect diagnostics from every node into a local directory.

use anyhow::Result;

use crate::cli::DiagnoseArgs;
use crate::executor::{Executor, ExecutorOptions};
use crate::Context;

pub fn run(ctx: &Context, _args: &DiagnoseArgs) -> Result<()> {
    let plan = super::install::load_validated_plan(ctx)?;
    super::install::check_ssh_connectivity(&plan)?;
    let executor = Executor::new(ExecutorOptions {
        verbose: ctx.verbose > 0,
        ..Default::default()
    });
    executor.diagnose(&plan)
}
