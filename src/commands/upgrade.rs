//! Cluster upgrade: preflight, node-by-node upgrade, then the shared
//! services and a smoke test.

use anyhow::Result;
use colored::Colorize;

use crate::cli::UpgradeArgs;
use crate::executor::{Executor, ExecutorOptions, ListableNode};
use crate::util;
use crate::Context;

pub fn run(ctx: &Context, args: &UpgradeArgs, online: bool) -> Result<()> {
    util::print_header(&mut std::io::stdout(), "Validating", '=');
    let plan = super::install::load_validated_plan(ctx)?;
    super::install::check_ssh_connectivity(&plan)?;

    let executor = Executor::new(ExecutorOptions {
        generated_assets_dir: args.generated_assets_dir.clone(),
        verbose: ctx.verbose > 0,
        ..Default::default()
    });

    if !args.skip_preflight {
        util::print_header(&mut std::io::stdout(), "Running Upgrade Preflight Checks", '=');
        executor.run_upgrade_preflight(&plan)?;
    }

    let nodes: Vec<ListableNode> = plan
        .unique_nodes()
        .into_iter()
        .map(|node| ListableNode {
            node: node.clone(),
            roles: plan
                .roles_of(&node.host)
                .into_iter()
                .map(ToString::to_string)
                .collect(),
        })
        .collect();
    executor.upgrade_nodes(&plan, &nodes, online)?;

    util::print_header(&mut std::io::stdout(), "Validating Control Plane", '=');
    executor.validate_control_plane(&plan)?;

    if !plan.docker_registry.server.is_empty() {
        util::print_header(&mut std::io::stdout(), "Upgrading Docker Registry", '=');
        executor.upgrade_docker_registry(&plan)?;
    }

    util::print_header(&mut std::io::stdout(), "Upgrading Cluster Services", '=');
    executor.upgrade_cluster_services(&plan)?;

    executor.run_smoke_test(&plan)?;

    println!();
    println!("{}", "The cluster was upgraded successfully!".green());
    Ok(())
}
