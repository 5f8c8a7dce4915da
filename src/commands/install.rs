//! The install workflow: plan, validate, apply, add-node, step.

use anyhow::{anyhow, bail, Context as _, Result};
use colored::Colorize;
use dialoguer::Confirm;
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::time::Duration;

use crate::cli::{AddNodeArgs, ApplyArgs, PlanArgs, StepArgs, ValidateArgs};
use crate::executor::{Executor, ExecutorOptions};
use crate::plan::{
    generate_plan, read_plan_file, validate_plan, write_plan_file, Plan, PlanNode,
    PlanTemplateOptions,
};
use crate::ssh;
use crate::util;
use crate::Context;

const SSH_PROBE_TIMEOUT: Duration = Duration::from_secs(20);

pub fn plan(ctx: &Context, args: &PlanArgs) -> Result<()> {
    if ctx.plan_file.exists() {
        let overwrite = Confirm::new()
            .with_prompt(format!(
                "Plan file {} already exists. Overwrite it?",
                ctx.plan_file.display()
            ))
            .default(false)
            .interact()
            .context("error reading confirmation")?;
        if !overwrite {
            println!("Keeping the existing plan file.");
            return Ok(());
        }
    }

    println!(
        "Generating a plan file for a cluster with {} etcd, {} master, {} worker, {} ingress, and {} storage node(s).",
        args.etcd, args.master, args.worker, args.ingress, args.storage
    );

    let plan = generate_plan(
        &args.name,
        &PlanTemplateOptions {
            etcd_nodes: args.etcd,
            master_nodes: args.master,
            worker_nodes: args.worker,
            ingress_nodes: args.ingress,
            storage_nodes: args.storage,
        },
    );
    write_plan_file(&plan, &ctx.plan_file)?;

    util::pretty_print_ok(
        &mut std::io::stdout(),
        &format!("Generated plan file {}", ctx.plan_file.display()),
    );
    println!("Edit the plan file with the details of your infrastructure, then run \"bosun install validate\".");
    Ok(())
}

pub fn validate(ctx: &Context, args: &ValidateArgs) -> Result<()> {
    util::print_header(&mut std::io::stdout(), "Validating", '=');
    let plan = load_validated_plan(ctx)?;
    check_ssh_connectivity(&plan)?;

    if args.skip_preflight {
        return Ok(());
    }
    executor(ctx, false).run_preflight(&plan)
}

pub fn apply(ctx: &Context, args: &ApplyArgs) -> Result<()> {
    util::print_header(&mut std::io::stdout(), "Validating", '=');
    let plan = load_validated_plan(ctx)?;
    check_ssh_connectivity(&plan)?;

    let executor = Executor::new(ExecutorOptions {
        generated_assets_dir: args.generated_assets_dir.clone(),
        restart_services: args.restart_services,
        verbose: ctx.verbose > 0,
        ..Default::default()
    });

    if !args.skip_preflight {
        executor.run_preflight(&plan)?;
    }

    if let Err(err) = executor.install(&plan) {
        if args.diagnose_on_failure {
            // Best effort: the installation error is the one that matters
            if let Err(diag_err) = executor.diagnose(&plan) {
                log::warn!("error collecting diagnostics: {diag_err:#}");
            }
        }
        return Err(err);
    }

    if !args.skip_smoke_test {
        executor.run_smoke_test(&plan)?;
    }

    println!();
    println!("{}", "The cluster was installed successfully!".green());
    if !plan.master.load_balanced_fqdn.is_empty() {
        println!("To view the cluster dashboard, run \"bosun dashboard\".");
    }
    Ok(())
}

pub fn add_node(ctx: &Context, args: &AddNodeArgs) -> Result<()> {
    let plan = read_plan_file(&ctx.plan_file)?;
    let node = PlanNode {
        host: args.host.clone(),
        ip: args.ip.clone(),
        internalip: args.internal_ip.clone().unwrap_or_default(),
        labels: parse_labels(&args.labels)?,
    };

    if plan.unique_nodes().iter().any(|n| n.host == node.host) {
        bail!("node {:?} is already part of the cluster", node.host);
    }

    let executor = Executor::new(ExecutorOptions {
        restart_services: args.restart_services,
        verbose: ctx.verbose > 0,
        ..Default::default()
    });
    let updated = executor.add_node(&plan, node, &args.roles)?;

    // Record the new node so future operations see it
    write_plan_file(&updated, &ctx.plan_file)
        .context("the node was added, but the plan file could not be updated")?;
    util::pretty_print_ok(
        &mut std::io::stdout(),
        &format!("Added node {:?} to the cluster", args.host),
    );
    Ok(())
}

pub fn step(ctx: &Context, args: &StepArgs) -> Result<()> {
    let plan = load_validated_plan(ctx)?;
    executor(ctx, args.restart_services).run_play(&args.play, &plan)
}

/// Read the plan file and run the offline validation rules, printing
/// every rule that failed.
pub(super) fn load_validated_plan(ctx: &Context) -> Result<Plan> {
    if !ctx.plan_file.exists() {
        bail!(
            "plan file {} does not exist; run \"bosun install plan\" to generate it",
            ctx.plan_file.display()
        );
    }
    let plan = read_plan_file(&ctx.plan_file)?;
    let out = &mut std::io::stdout();
    match validate_plan(&plan) {
        Ok(()) => {
            util::pretty_print_ok(out, "Reading installation plan file");
            Ok(plan)
        }
        Err(errors) => {
            util::pretty_print_err(out, "Validating installation plan file");
            for error in &errors {
                println!("- {error}");
            }
            Err(anyhow!("the plan file failed validation"))
        }
    }
}

/// Verify every node accepts ssh connections before doing anything that
/// would leave the cluster half-configured.
pub(super) fn check_ssh_connectivity(plan: &Plan) -> Result<()> {
    let key = plan.ssh_key_path();
    let out = std::sync::Mutex::new(std::io::stdout());
    let unreachable: Vec<String> = plan
        .ssh_targets()
        .par_iter()
        .filter_map(|target| {
            let open = ssh::wait_until_ssh_open(
                &target.ip,
                &target.user,
                &key,
                SSH_PROBE_TIMEOUT,
            );
            if let Ok(mut stdout) = out.lock() {
                let line = format!("ssh connectivity to {}", target.host);
                if open {
                    util::pretty_print_ok(&mut *stdout, &line);
                } else {
                    util::pretty_print_err(&mut *stdout, &line);
                }
            }
            (!open).then(|| target.host.clone())
        })
        .collect();
    if !unreachable.is_empty() {
        bail!("could not connect to nodes via ssh: {}", unreachable.join(", "));
    }
    Ok(())
}

fn executor(ctx: &Context, restart_services: bool) -> Executor {
    Executor::new(ExecutorOptions {
        restart_services,
        verbose: ctx.verbose > 0,
        ..Default::default()
    })
}

fn parse_labels(raw: &[String]) -> Result<BTreeMap<String, String>> {
    let mut labels = BTreeMap::new();
    for pair in raw {
        let (key, value) = pair
            .split_once('=')
            .with_context(|| format!("label {pair:?} is not in key=value form"))?;
        if key.is_empty() {
            bail!("label {pair:?} has an empty key");
        }
        labels.insert(key.to_string(), value.to_string());
    }
    Ok(labels)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_parse_into_sorted_pairs() {
        let labels = parse_labels(&["env=prod".to_string(), "disk=ssd".to_string()]).unwrap();
        assert_eq!(
            labels.into_iter().collect::<Vec<_>>(),
            vec![
                ("disk".to_string(), "ssd".to_string()),
                ("env".to_string(), "prod".to_string()),
            ]
        );
    }

    #[test]
    fn malformed_labels_are_rejected() {
        assert!(parse_labels(&["no-equals".to_string()]).is_err());
        assert!(parse_labels(&["=value".to_string()]).is_err());
    }
}
