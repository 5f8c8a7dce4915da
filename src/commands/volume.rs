//! Persistent storage volume management.

use anyhow::{anyhow, Result};
use dialoguer::Confirm;

use crate::cli::{VolumeAddArgs, VolumeDeleteArgs};
use crate::executor::{Executor, ExecutorOptions};
use crate::plan::{validate_storage_volume, StorageVolume};
use crate::util;
use crate::Context;

pub fn add(ctx: &Context, args: &VolumeAddArgs) -> Result<()> {
    let volume = StorageVolume {
        name: args.volume_name.clone(),
        size_gb: args.size_gb,
        replicate_count: args.replica_count,
        distribution_count: args.distribution_count,
        storage_class: args.storage_class.clone(),
        allow_addresses: args.allow_addresses.clone(),
        reclaim_policy: args.reclaim_policy.clone(),
        access_modes: args.access_modes.clone(),
    };
    if let Err(errors) = validate_storage_volume(&volume) {
        let out = &mut std::io::stdout();
        util::pretty_print_err(out, "Validating volume request");
        for error in &errors {
            println!("- {error}");
        }
        return Err(anyhow!("the volume request failed validation"));
    }

    let plan = super::install::load_validated_plan(ctx)?;
    executor(ctx).add_volume(&plan, &volume)
}

pub fn delete(ctx: &Context, args: &VolumeDeleteArgs) -> Result<()> {
    if !args.force {
        let confirmed = Confirm::new()
            .with_prompt(format!(
                "Are you sure you want to delete volume {:?}? This operation cannot be undone",
                args.volume_name
            ))
            .default(false)
            .interact()?;
        if !confirmed {
            println!("Aborted.");
            return Ok(());
        }
    }

    let plan = super::install::load_validated_plan(ctx)?;
    executor(ctx).delete_volume(&plan, &args.volume_name)
}

fn executor(ctx: &Context) -> Executor {
    Executor::new(ExecutorOptions {
        verbose: ctx.verbose > 0,
        ..Default::default()
    })
}
