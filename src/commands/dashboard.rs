//! Open or display the cluster dashboard URL.

use anyhow::{bail, Context as _, Result};
use std::process::Command;
use std::time::Duration;

use crate::cli::DashboardArgs;
use crate::plan::{read_plan_file, Plan};
use crate::Context;

pub fn run(ctx: &Context, args: &DashboardArgs) -> Result<()> {
    let plan = read_plan_file(&ctx.plan_file)?;
    let url = dashboard_url(&plan)?;

    verify_reachable(&url).context("error verifying dashboard availability")?;

    if args.url {
        println!("{url}");
        return Ok(());
    }
    println!("Opening {url}");
    open_in_browser(&url)
}

fn dashboard_url(plan: &Plan) -> Result<String> {
    if plan.master.load_balanced_fqdn.is_empty() {
        bail!("the load balanced FQDN of the master nodes is not set in the plan file");
    }
    Ok(format!(
        "https://{}:6443/ui",
        plan.master.load_balanced_fqdn
    ))
}

// The API server fronts the dashboard with its self-signed certificate,
// so verification has to be skipped for the availability probe.
fn verify_reachable(url: &str) -> Result<()> {
    let config = ureq::Agent::config_builder()
        .tls_config(
            ureq::tls::TlsConfig::builder()
                .disable_verification(true)
                .build(),
        )
        .timeout_global(Some(Duration::from_secs(2)))
        .build();
    let agent = ureq::Agent::new_with_config(config);
    crate::retry::with_backoff(
        || {
            agent.get(url).call()?;
            Ok(())
        },
        2,
    )
    .with_context(|| format!("could not reach {url}"))
}

fn open_in_browser(url: &str) -> Result<()> {
    let opener = if cfg!(target_os = "macos") {
        "open"
    } else {
        "xdg-open"
    };
    let status = Command::new(opener)
        .arg(url)
        .status()
        .with_context(|| format!("error invoking {opener}"))?;
    if !status.success() {
        bail!("{opener} exited with {status}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{generate_plan, PlanTemplateOptions};

    fn test_plan() -> Plan {
        generate_plan(
            "test",
            &PlanTemplateOptions {
                etcd_nodes: 1,
                master_nodes: 1,
                worker_nodes: 1,
                ingress_nodes: 0,
                storage_nodes: 0,
            },
        )
    }

    #[test]
    fn url_targets_the_load_balanced_fqdn() {
        let mut plan = test_plan();
        plan.master.load_balanced_fqdn = "k8s.example.com".to_string();
        assert_eq!(
            dashboard_url(&plan).unwrap(),
            "https://k8s.example.com:6443/ui"
        );
    }

    #[test]
    fn missing_fqdn_is_an_error() {
        assert!(dashboard_url(&test_plan()).is_err());
    }
}
