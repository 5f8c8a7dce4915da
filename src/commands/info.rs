//! Display the nodes of the cluster, with the installed version fetched
//! from each node over ssh.

use anyhow::{bail, Context as _, Result};
use rayon::prelude::*;
use serde::Serialize;
use std::path::Path;
use std::process::Command;

use crate::cli::InfoArgs;
use crate::plan::{read_plan_file, Plan};
use crate::Context;

const VERSION_FILE: &str = "/etc/bosun-version";

#[derive(Debug, Serialize)]
struct NodeInfo {
    name: String,
    ip: String,
    roles: Vec<String>,
    version: String,
}

pub fn run(ctx: &Context, args: &InfoArgs) -> Result<()> {
    let plan = read_plan_file(&ctx.plan_file)?;
    let rows = gather(&plan);
    match args.output.as_str() {
        "simple" => print_table(&rows),
        "json" => {
            let rendered =
                serde_json::to_string_pretty(&rows).context("error marshaling node info")?;
            println!("{rendered}");
        }
        other => bail!("unsupported output format {other:?}; use simple or json"),
    }
    Ok(())
}

fn gather(plan: &Plan) -> Vec<NodeInfo> {
    let key = plan.ssh_key_path();
    let user = &plan.cluster.ssh.user;
    plan.unique_nodes()
        .par_iter()
        .map(|node| NodeInfo {
            name: node.host.clone(),
            ip: node.ip.clone(),
            roles: plan
                .roles_of(&node.host)
                .into_iter()
                .map(ToString::to_string)
                .collect(),
            version: probe_version(&node.ip, user, &key),
        })
        .collect()
}

// The version file is written by the install playbook; a node that
// cannot be reached or predates it reports N/A.
fn probe_version(ip: &str, user: &str, key: &Path) -> String {
    let output = Command::new("ssh")
        .arg("-i")
        .arg(key)
        .args(["-o", "ConnectTimeout=5"])
        .args(["-o", "BatchMode=yes"])
        .args(["-o", "StrictHostKeyChecking=no"])
        .arg(format!("{user}@{ip}"))
        .arg(format!("cat {VERSION_FILE}"))
        .output();
    match output {
        Ok(out) if out.status.success() => {
            let version = String::from_utf8_lossy(&out.stdout).trim().to_string();
            if version.is_empty() {
                "N/A".to_string()
            } else {
                version
            }
        }
        _ => "N/A".to_string(),
    }
}

fn print_table(rows: &[NodeInfo]) {
    let name_width = column_width("NAME", rows.iter().map(|r| r.name.len()));
    let ip_width = column_width("IP", rows.iter().map(|r| r.ip.len()));
    let roles: Vec<String> = rows.iter().map(|r| r.roles.join(",")).collect();
    let roles_width = column_width("ROLES", roles.iter().map(String::len));

    println!(
        "{:name_width$}  {:ip_width$}  {:roles_width$}  VERSION",
        "NAME", "IP", "ROLES"
    );
    for (row, roles) in rows.iter().zip(&roles) {
        println!(
            "{:name_width$}  {:ip_width$}  {:roles_width$}  {}",
            row.name, row.ip, roles, row.version
        );
    }
}

fn column_width(header: &str, cells: impl Iterator<Item = usize>) -> usize {
    cells.chain(std::iter::once(header.len())).max().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn column_width_covers_header_and_cells() {
        assert_eq!(column_width("NAME", [2, 9, 4].into_iter()), 9);
        assert_eq!(column_width("NAME", std::iter::empty()), 4);
    }

    #[test]
    fn node_info_serializes_with_role_list() {
        let info = NodeInfo {
            name: "worker01".into(),
            ip: "10.0.0.4".into(),
            roles: vec!["worker".into(), "storage".into()],
            version: "1.0.0".into(),
        };
        let rendered = serde_json::to_string(&info).unwrap();
        assert!(rendered.contains("\"roles\":[\"worker\",\"storage\"]"));
    }
}
