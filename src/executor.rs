//! The step executor: turns plan-level operations into playbook runs
//! with per-run artifact directories.
//!
//! Every operation follows the same shape: compile the inventory and
//! catalog from the plan, create `runs/<name>/<timestamp>/` holding a
//! copy of the plan and the engine log, start the playbook, and drain
//! the event stream through an explainer while waiting for the engine
//! to exit.

use anyhow::{bail, Context, Result};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::thread;

use crate::explain::{default_explainer, preflight_explainer, EventExplainer};
use crate::plan::{write_plan_file, Plan, PlanNode, StorageVolume};
use crate::playbook::catalog::{apply_storage_volume, catalog_from_plan};
use crate::playbook::inventory::inventory_from_plan;
use crate::playbook::{ClusterCatalog, PlaybookRunner};
use crate::util;

/// Configuration for the executor.
#[derive(Debug, Clone)]
pub struct ExecutorOptions {
    /// Where generated assets (certificates, kubeconfigs) live
    pub generated_assets_dir: PathBuf,
    /// Restart cluster services during the run
    pub restart_services: bool,
    /// Verbose event rendering
    pub verbose: bool,
    /// Where per-run artifacts are kept
    pub runs_dir: PathBuf,
    /// Playbook engine installation root
    pub ansible_dir: PathBuf,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            generated_assets_dir: PathBuf::from("generated"),
            restart_services: false,
            verbose: false,
            runs_dir: PathBuf::from("runs"),
            ansible_dir: PathBuf::from("ansible"),
        }
    }
}

/// A node paired with the roles it holds, used when diagnosing or
/// upgrading a subset of the cluster.
#[derive(Debug, Clone)]
pub struct ListableNode {
    pub node: PlanNode,
    pub roles: Vec<String>,
}

pub struct Executor {
    options: ExecutorOptions,
    version: String,
}

struct Task<'a> {
    name: &'a str,
    playbook: &'a str,
    plan: &'a Plan,
    catalog: ClusterCatalog,
    explainer: Box<dyn EventExplainer>,
    limit: Option<&'a str>,
}

impl Executor {
    pub fn new(options: ExecutorOptions) -> Self {
        Self {
            options,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    fn certs_dir(&self) -> PathBuf {
        self.options.generated_assets_dir.join("keys")
    }

    fn build_catalog(&self, plan: &Plan) -> Result<ClusterCatalog> {
        let tls_dir = absolute(&self.certs_dir())?;
        let mut catalog = catalog_from_plan(plan, &tls_dir, &self.version)?;
        catalog.local_kubeconfig_directory =
            absolute(&self.options.generated_assets_dir)?.display().to_string();
        if self.options.restart_services {
            catalog.enable_restart();
        }
        Ok(catalog)
    }

    fn create_run_directory(&self, run_name: &str) -> Result<PathBuf> {
        let stamp = chrono::Local::now().format("%Y-%m-%d-%H-%M-%S");
        let dir = self.options.runs_dir.join(run_name).join(stamp.to_string());
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("error creating directory {}", dir.display()))?;
        Ok(dir)
    }

    fn execute(&self, task: Task<'_>) -> Result<()> {
        let run_dir = self
            .create_run_directory(task.name)
            .with_context(|| format!("error creating working directory for {:?}", task.name))?;

        let plan_copy = run_dir.join("cluster.yaml");
        write_plan_file(task.plan, &plan_copy)
            .with_context(|| format!("error recording plan file to {}", plan_copy.display()))?;

        let log_path = run_dir.join("ansible.log");
        let log = File::create(&log_path)
            .with_context(|| format!("error creating log file {}", log_path.display()))?;

        let inventory = inventory_from_plan(task.plan);
        let mut runner = PlaybookRunner::new(&self.options.ansible_dir, &run_dir, log);

        // The engine blocks until the event stream is consumed, so the
        // explainer drains it on its own thread.
        let events = match task.limit {
            Some(node) => runner.start_on_node(task.playbook, &inventory, &task.catalog, node)?,
            None => runner.start(task.playbook, &inventory, &task.catalog)?,
        };
        let mut explainer = task.explainer;
        let drained = thread::spawn(move || {
            crate::explain::explain_stream(&events, explainer.as_mut());
        });

        let result = runner.wait();
        if drained.join().is_err() {
            log::warn!("event explainer thread panicked");
        }
        result
    }

    /// Install the cluster described by the plan.
    pub fn install(&self, plan: &Plan) -> Result<()> {
        let catalog = self.build_catalog(plan)?;
        util::print_header(&mut std::io::stdout(), "Installing Cluster", '=');
        self.execute(Task {
            name: "apply",
            playbook: "kubernetes.yaml",
            plan,
            catalog,
            explainer: default_explainer(self.options.verbose),
            limit: None,
        })
    }

    /// Verify that the cluster is functional end to end.
    pub fn run_smoke_test(&self, plan: &Plan) -> Result<()> {
        let catalog = self.build_catalog(plan)?;
        util::print_header(&mut std::io::stdout(), "Running Smoke Test", '=');
        self.execute(Task {
            name: "smoketest",
            playbook: "smoketest.yaml",
            plan,
            catalog,
            explainer: default_explainer(self.options.verbose),
            limit: None,
        })
    }

    /// Run preflight checks against every node in the plan.
    pub fn run_preflight(&self, plan: &Plan) -> Result<()> {
        let catalog = self.preflight_catalog(plan)?;
        self.execute(Task {
            name: "preflight",
            playbook: "preflight.yaml",
            plan,
            catalog,
            explainer: preflight_explainer(self.options.verbose),
            limit: None,
        })
    }

    /// Run the preflight checks that gate an upgrade.
    pub fn run_upgrade_preflight(&self, plan: &Plan) -> Result<()> {
        let catalog = self.preflight_catalog(plan)?;
        self.execute(Task {
            name: "upgrade-preflight",
            playbook: "upgrade-preflight.yaml",
            plan,
            catalog,
            explainer: preflight_explainer(self.options.verbose),
            limit: None,
        })
    }

    fn preflight_catalog(&self, plan: &Plan) -> Result<ClusterCatalog> {
        let mut catalog = self.build_catalog(plan)?;
        catalog.kismatic_preflight_checker = "inspector/linux/amd64/check-server".to_string();
        catalog.kismatic_preflight_checker_local = absolute(
            &self
                .options
                .ansible_dir
                .join("playbooks/inspector/check-server"),
        )?
        .display()
        .to_string();
        Ok(catalog)
    }

    /// Run a single named play against the whole inventory.
    pub fn run_play(&self, play: &str, plan: &Plan) -> Result<()> {
        let catalog = self.build_catalog(plan)?;
        util::print_header(&mut std::io::stdout(), "Running Task", '=');
        self.execute(Task {
            name: "step",
            playbook: play,
            plan,
            catalog,
            explainer: default_explainer(self.options.verbose),
            limit: None,
        })
    }

    /// Add a node to a running cluster under the given roles. Returns
    /// the updated plan on success so the caller can persist it.
    pub fn add_node(&self, plan: &Plan, node: PlanNode, roles: &[String]) -> Result<Plan> {
        let updated = add_node_to_plan(plan.clone(), node.clone(), roles)?;
        let catalog = self.build_catalog(&updated)?;

        if updated.cluster.networking.update_hosts_files {
            util::print_header(&mut std::io::stdout(), "Updating Hosts Files On All Nodes", '=');
            self.execute(Task {
                name: "add-node-update-hosts",
                playbook: "hosts.yaml",
                plan: &updated,
                catalog: catalog.clone(),
                explainer: default_explainer(self.options.verbose),
                limit: None,
            })
            .context("error updating hosts files on all nodes")?;
        }

        util::print_header(&mut std::io::stdout(), "Adding New Node to Cluster", '=');
        self.execute(Task {
            name: "add-node",
            playbook: "kubernetes-node.yaml",
            plan: &updated,
            catalog: catalog.clone(),
            explainer: default_explainer(self.options.verbose),
            limit: Some(&node.host),
        })?;

        util::print_header(&mut std::io::stdout(), "Running New Node Smoke Test", '=');
        let mut smoke_catalog = catalog.clone();
        smoke_catalog.new_node = node.host.clone();
        self.execute(Task {
            name: "add-node-smoke-test",
            playbook: "_node-smoke-test.yaml",
            plan: &updated,
            catalog: smoke_catalog,
            explainer: default_explainer(self.options.verbose),
            limit: Some(&node.host),
        })
        .context("error running node smoke test")?;

        // Existing volumes must start accepting traffic from the new node
        if !plan.storage.nodes.is_empty() {
            util::print_header(
                &mut std::io::stdout(),
                "Updating Allowed IPs On Storage Volumes",
                '=',
            );
            self.execute(Task {
                name: "add-node-update-volumes",
                playbook: "_volume-update-allowed.yaml",
                plan: &updated,
                catalog,
                explainer: default_explainer(self.options.verbose),
                limit: None,
            })
            .context("error adding new node to volume allow list")?;
        }

        Ok(updated)
    }

    /// Provision a persistent storage volume on the cluster.
    pub fn add_volume(&self, plan: &Plan, volume: &StorageVolume) -> Result<()> {
        let nodes_required = volume.replicate_count * volume.distribution_count;
        if nodes_required > plan.storage.nodes.len() {
            bail!(
                "the requested volume configuration requires {} storage nodes, but the cluster only has {}",
                nodes_required,
                plan.storage.nodes.len()
            );
        }
        let mut catalog = self.build_catalog(plan)?;
        apply_storage_volume(&mut catalog, plan, volume);
        util::print_header(&mut std::io::stdout(), "Add Persistent Storage Volume", '=');
        self.execute(Task {
            name: "add-volume",
            playbook: "volume-add.yaml",
            plan,
            catalog,
            explainer: default_explainer(self.options.verbose),
            limit: None,
        })
    }

    /// Remove a persistent storage volume from the cluster.
    pub fn delete_volume(&self, plan: &Plan, volume_name: &str) -> Result<()> {
        let mut catalog = self.build_catalog(plan)?;
        catalog.volume_name = volume_name.to_string();
        util::print_header(&mut std::io::stdout(), "Delete Persistent Storage Volume", '=');
        self.execute(Task {
            name: "delete-volume",
            playbook: "volume-delete.yaml",
            plan,
            catalog,
            explainer: default_explainer(self.options.verbose),
            limit: None,
        })
    }

    /// Upgrade nodes one at a time: etcd nodes first, then masters, then
    /// everything else. A node holding several roles is upgraded once,
    /// in its earliest phase.
    pub fn upgrade_nodes(
        &self,
        plan: &Plan,
        nodes: &[ListableNode],
        online_upgrade: bool,
    ) -> Result<()> {
        for listable in order_nodes_for_upgrade(nodes) {
            self.upgrade_node(plan, &listable.node, online_upgrade)
                .with_context(|| format!("error upgrading node {:?}", listable.node.host))?;
        }
        Ok(())
    }

    fn upgrade_node(&self, plan: &Plan, node: &PlanNode, online_upgrade: bool) -> Result<()> {
        let mut catalog = self.build_catalog(plan)?;
        catalog.online_upgrade = online_upgrade;
        util::print_header(
            &mut std::io::stdout(),
            &format!("Upgrade Node {:?}", node.host),
            '=',
        );
        self.execute(Task {
            name: "upgrade-nodes",
            playbook: "upgrade-nodes.yaml",
            plan,
            catalog,
            explainer: default_explainer(self.options.verbose),
            limit: Some(&node.host),
        })
    }

    /// Verify the control plane is healthy after upgrading its nodes.
    pub fn validate_control_plane(&self, plan: &Plan) -> Result<()> {
        let catalog = self.build_catalog(plan)?;
        self.execute(Task {
            name: "validate-control-plane",
            playbook: "validate-control-plane.yaml",
            plan,
            catalog,
            explainer: default_explainer(self.options.verbose),
            limit: None,
        })
    }

    /// Upgrade the internal docker registry, when one is configured.
    pub fn upgrade_docker_registry(&self, plan: &Plan) -> Result<()> {
        let catalog = self.build_catalog(plan)?;
        self.execute(Task {
            name: "upgrade-docker-registry",
            playbook: "upgrade-docker-registry.yaml",
            plan,
            catalog,
            explainer: default_explainer(self.options.verbose),
            limit: None,
        })
    }

    /// Upgrade the cluster services (networking, DNS, add-ons).
    pub fn upgrade_cluster_services(&self, plan: &Plan) -> Result<()> {
        let catalog = self.build_catalog(plan)?;
        self.execute(Task {
            name: "upgrade-cluster-services",
            playbook: "upgrade-cluster-services.yaml",
            plan,
            catalog,
            explainer: default_explainer(self.options.verbose),
            limit: None,
        })
    }

    /// Collect diagnostics from every node into a local directory.
    pub fn diagnose(&self, plan: &Plan) -> Result<()> {
        let mut catalog = self.build_catalog(plan)?;
        catalog.diagnostics_dir = absolute(Path::new("diagnostics"))?.display().to_string();
        catalog.diagnostics_date_time = chrono::Local::now()
            .format("%Y-%m-%d-%H-%M-%S")
            .to_string();
        util::print_header(&mut std::io::stdout(), "Collecting Cluster Diagnostics", '=');
        self.execute(Task {
            name: "diagnose",
            playbook: "diagnose.yaml",
            plan,
            catalog,
            explainer: default_explainer(self.options.verbose),
            limit: None,
        })
    }
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir().context("error getting working dir")?;
    Ok(cwd.join(path))
}

fn add_node_to_plan(mut plan: Plan, node: PlanNode, roles: &[String]) -> Result<Plan> {
    for role in roles {
        match role.as_str() {
            "worker" => {
                plan.worker.expected_count += 1;
                plan.worker.nodes.push(node.clone());
            }
            "ingress" => {
                plan.ingress.expected_count += 1;
                plan.ingress.nodes.push(node.clone());
            }
            "storage" => {
                plan.storage.expected_count += 1;
                plan.storage.nodes.push(node.clone());
            }
            other => bail!(
                "nodes can only be added with the worker, ingress, or storage roles; got {other:?}"
            ),
        }
    }
    Ok(plan)
}

/// Order nodes for an upgrade: etcd, then master, then the rest, with
/// each node appearing at most once (keyed by IP).
fn order_nodes_for_upgrade(nodes: &[ListableNode]) -> Vec<&ListableNode> {
    let mut upgraded = std::collections::HashSet::new();
    let mut ordered = Vec::new();

    for listable in nodes {
        if listable.roles.iter().any(|r| r == "etcd") && upgraded.insert(listable.node.ip.as_str())
        {
            ordered.push(listable);
        }
    }
    for listable in nodes {
        if listable.roles.iter().any(|r| r == "master")
            && upgraded.insert(listable.node.ip.as_str())
        {
            ordered.push(listable);
        }
    }
    for listable in nodes {
        if listable.roles.iter().any(|r| r != "etcd" && r != "master")
            && upgraded.insert(listable.node.ip.as_str())
        {
            ordered.push(listable);
        }
    }
    ordered
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listable(host: &str, ip: &str, roles: &[&str]) -> ListableNode {
        ListableNode {
            node: PlanNode {
                host: host.to_string(),
                ip: ip.to_string(),
                ..Default::default()
            },
            roles: roles.iter().map(ToString::to_string).collect(),
        }
    }

    #[test]
    fn upgrade_order_is_etcd_master_rest() {
        let nodes = vec![
            listable("worker01", "10.0.0.4", &["worker"]),
            listable("master01", "10.0.0.2", &["master"]),
            listable("etcd01", "10.0.0.1", &["etcd"]),
            listable("ingress01", "10.0.0.5", &["ingress"]),
        ];
        let ordered: Vec<&str> = order_nodes_for_upgrade(&nodes)
            .iter()
            .map(|n| n.node.host.as_str())
            .collect();
        assert_eq!(ordered, vec!["etcd01", "master01", "worker01", "ingress01"]);
    }

    #[test]
    fn node_with_many_roles_upgrades_once_in_earliest_phase() {
        let nodes = vec![
            listable("combo01", "10.0.0.1", &["etcd", "master", "worker"]),
            listable("worker01", "10.0.0.4", &["worker"]),
        ];
        let ordered: Vec<&str> = order_nodes_for_upgrade(&nodes)
            .iter()
            .map(|n| n.node.host.as_str())
            .collect();
        assert_eq!(ordered, vec!["combo01", "worker01"]);
    }

    #[test]
    fn adding_a_node_updates_each_requested_role() {
        let plan = crate::plan::generate_plan(
            "test",
            &crate::plan::PlanTemplateOptions {
                etcd_nodes: 1,
                master_nodes: 1,
                worker_nodes: 1,
                ingress_nodes: 0,
                storage_nodes: 0,
            },
        );
        let node = PlanNode {
            host: "worker02".to_string(),
            ip: "10.0.0.9".to_string(),
            ..Default::default()
        };
        let updated = add_node_to_plan(
            plan.clone(),
            node.clone(),
            &["worker".to_string(), "storage".to_string()],
        )
        .unwrap();
        assert_eq!(updated.worker.expected_count, 2);
        assert_eq!(updated.worker.nodes[1].host, "worker02");
        assert_eq!(updated.storage.expected_count, 1);
        assert_eq!(updated.storage.nodes[0].host, "worker02");

        let err = add_node_to_plan(plan, node, &["master".to_string()]).unwrap_err();
        assert!(err.to_string().contains("worker, ingress, or storage"));
    }

    #[test]
    fn add_volume_requires_enough_storage_nodes() {
        let plan = crate::plan::generate_plan(
            "test",
            &crate::plan::PlanTemplateOptions {
                etcd_nodes: 1,
                master_nodes: 1,
                worker_nodes: 1,
                ingress_nodes: 0,
                storage_nodes: 1,
            },
        );
        let executor = Executor::new(ExecutorOptions::default());
        let volume = StorageVolume {
            name: "storage01".into(),
            size_gb: 10,
            replicate_count: 2,
            distribution_count: 2,
            storage_class: "durable".into(),
            allow_addresses: vec![],
            reclaim_policy: "Retain".into(),
            access_modes: vec!["ReadWriteMany".into()],
        };
        let err = executor.add_volume(&plan, &volume).unwrap_err();
        assert!(err.to_string().contains("requires 4 storage nodes"));
    }

    #[test]
    fn run_directories_nest_name_then_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let executor = Executor::new(ExecutorOptions {
            runs_dir: dir.path().to_path_buf(),
            ..Default::default()
        });
        let run_dir = executor.create_run_directory("preflight").unwrap();
        assert!(run_dir.starts_with(dir.path().join("preflight")));
        assert!(run_dir.is_dir());
    }
}
