//! The plan document: the operator's declarative description of the
//! desired cluster.
//!
//! The plan is read once, validated, and projected into the inventory and
//! catalog consumed by the step executor. Unrecognized fields are a
//! validation failure, never silently dropped.

use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use crate::ssh::SshTarget;

const DEFAULT_CA_EXPIRY: &str = "17520h";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Plan {
    pub cluster: Cluster,
    #[serde(default)]
    pub docker: Docker,
    #[serde(default)]
    pub docker_registry: DockerRegistry,
    #[serde(default)]
    pub add_ons: AddOns,
    pub etcd: NodeGroup,
    pub master: MasterNodeGroup,
    pub worker: NodeGroup,
    #[serde(default)]
    pub ingress: NodeGroup,
    #[serde(default)]
    pub storage: NodeGroup,
    #[serde(default)]
    pub nfs: Nfs,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Cluster {
    pub name: String,
    pub admin_password: String,
    #[serde(default)]
    pub disable_package_installation: bool,
    #[serde(default)]
    pub disconnected_installation: bool,
    pub networking: NetworkConfig,
    #[serde(default)]
    pub certificates: CertsConfig,
    pub ssh: SshConfig,
    #[serde(default)]
    pub kube_apiserver: OptionOverrides,
    #[serde(default)]
    pub kube_controller_manager: OptionOverrides,
    #[serde(default)]
    pub kube_scheduler: OptionOverrides,
    #[serde(default)]
    pub kube_proxy: OptionOverrides,
    #[serde(default)]
    pub kubelet: OptionOverrides,
    #[serde(default)]
    pub cloud_provider: CloudProvider,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NetworkConfig {
    pub pod_cidr_block: String,
    pub service_cidr_block: String,
    #[serde(default)]
    pub update_hosts_files: bool,
    #[serde(default)]
    pub http_proxy: String,
    #[serde(default)]
    pub https_proxy: String,
    #[serde(default)]
    pub no_proxy: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct CertsConfig {
    pub expiry: String,
    pub ca_expiry: String,
}

impl Default for CertsConfig {
    fn default() -> Self {
        Self {
            expiry: DEFAULT_CA_EXPIRY.to_string(),
            ca_expiry: DEFAULT_CA_EXPIRY.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SshConfig {
    pub user: String,
    #[serde(rename = "ssh_key")]
    pub key: String,
    #[serde(rename = "ssh_port", default = "default_ssh_port")]
    pub port: u16,
}

fn default_ssh_port() -> u16 {
    22
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct OptionOverrides {
    pub option_overrides: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct CloudProvider {
    pub provider: String,
    pub config: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct Docker {
    pub disable: bool,
    pub storage: DockerStorage,
    pub logs: DockerLogs,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct DockerStorage {
    pub driver: String,
    pub direct_lvm_block_device: DirectLvmBlockDevice,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct DirectLvmBlockDevice {
    pub path: String,
    pub thinpool_percent: String,
    pub thinpool_metapercent: String,
    pub thinpool_autoextend_threshold: String,
    pub thinpool_autoextend_percent: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct DockerLogs {
    pub driver: String,
    pub opts: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct DockerRegistry {
    pub server: String,
    #[serde(rename = "CA")]
    pub ca: String,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct AddOns {
    pub cni: Cni,
    pub dns: Dns,
    pub heapster: Heapster,
    pub package_manager: PackageManagerAddOn,
    pub rescheduler: Rescheduler,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct Cni {
    pub disable: bool,
    pub provider: String,
    pub options: CniOptions,
}

impl Default for Cni {
    fn default() -> Self {
        Self {
            disable: false,
            provider: "calico".to_string(),
            options: CniOptions::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct CniOptions {
    pub calico: CalicoOptions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct CalicoOptions {
    pub mode: String,
    pub log_level: String,
    pub workload_mtu: u32,
    pub felix_input_mtu: u32,
    pub ip_autodetection_method: String,
}

impl Default for CalicoOptions {
    fn default() -> Self {
        Self {
            mode: "overlay".to_string(),
            log_level: "info".to_string(),
            workload_mtu: 1500,
            felix_input_mtu: 1440,
            ip_autodetection_method: "first-found".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct Dns {
    pub disable: bool,
    pub provider: String,
}

impl Default for Dns {
    fn default() -> Self {
        Self {
            disable: false,
            provider: "kubedns".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct Heapster {
    pub disable: bool,
    pub options: HeapsterOptions,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct HeapsterOptions {
    pub heapster: HeapsterSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct HeapsterSettings {
    pub replicas: u32,
    pub service_type: String,
    pub sink: String,
}

impl Default for HeapsterSettings {
    fn default() -> Self {
        Self {
            replicas: 2,
            service_type: "ClusterIP".to_string(),
            sink: "influxdb:http://heapster-influxdb.kube-system.svc:8086".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct PackageManagerAddOn {
    pub disable: bool,
    pub provider: String,
}

impl Default for PackageManagerAddOn {
    fn default() -> Self {
        Self {
            disable: false,
            provider: "helm".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct Rescheduler {
    pub disable: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct NodeGroup {
    pub expected_count: usize,
    pub nodes: Vec<PlanNode>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MasterNodeGroup {
    pub expected_count: usize,
    pub nodes: Vec<PlanNode>,
    pub load_balanced_fqdn: String,
    pub load_balanced_short_name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlanNode {
    pub host: String,
    #[serde(default)]
    pub ip: String,
    #[serde(default)]
    pub internalip: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

impl PlanNode {
    /// The address the cluster should use to reach this node.
    pub fn internal_address(&self) -> &str {
        if self.internalip.is_empty() {
            &self.ip
        } else {
            &self.internalip
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct Nfs {
    pub nfs_volume: Vec<NfsVolume>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NfsVolume {
    pub nfs_host: String,
    pub mount_path: String,
}

/// A persistent volume request handled by `volume add`.
#[derive(Debug, Clone)]
pub struct StorageVolume {
    pub name: String,
    pub size_gb: u64,
    pub replicate_count: usize,
    pub distribution_count: usize,
    pub storage_class: String,
    pub allow_addresses: Vec<String>,
    pub reclaim_policy: String,
    pub access_modes: Vec<String>,
}

impl Plan {
    /// All nodes in the plan, deduplicated by hostname. A node that holds
    /// multiple roles appears once.
    pub fn unique_nodes(&self) -> Vec<&PlanNode> {
        let mut seen = std::collections::HashSet::new();
        let mut nodes = Vec::new();
        for group in [
            &self.etcd.nodes,
            &self.master.nodes,
            &self.worker.nodes,
            &self.ingress.nodes,
            &self.storage.nodes,
        ] {
            for node in group {
                if seen.insert(node.host.as_str()) {
                    nodes.push(node);
                }
            }
        }
        nodes
    }

    /// The roles a given node holds, in compiler role order.
    pub fn roles_of(&self, host: &str) -> Vec<&'static str> {
        let mut roles = Vec::new();
        for (name, group) in [
            ("etcd", &self.etcd.nodes),
            ("master", &self.master.nodes),
            ("worker", &self.worker.nodes),
            ("ingress", &self.ingress.nodes),
            ("storage", &self.storage.nodes),
        ] {
            if group.iter().any(|n| n.host == host) {
                roles.push(name);
            }
        }
        roles
    }

    /// SSH key path with `~` expanded.
    pub fn ssh_key_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.cluster.ssh.key).as_ref())
    }

    /// Fanout targets for every unique node.
    pub fn ssh_targets(&self) -> Vec<SshTarget> {
        self.unique_nodes()
            .into_iter()
            .map(|n| SshTarget {
                host: n.host.clone(),
                ip: n.ip.clone(),
                user: self.cluster.ssh.user.clone(),
            })
            .collect()
    }

    /// The cluster DNS service address: the service CIDR base plus two.
    pub fn dns_service_ip(&self) -> Result<String> {
        ip_from_cidr(&self.cluster.networking.service_cidr_block, 2)
    }
}

/// Read and deserialize a plan file.
pub fn read_plan_file(path: &Path) -> Result<Plan> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("could not read plan file {}", path.display()))?;
    let plan: Plan = serde_yaml::from_str(&contents)
        .with_context(|| format!("failed to unmarshal plan file {}", path.display()))?;
    Ok(plan)
}

/// Serialize a plan to disk.
pub fn write_plan_file(plan: &Plan, path: &Path) -> Result<()> {
    let rendered = serde_yaml::to_string(plan).context("error marshalling plan to yaml")?;
    std::fs::write(path, rendered)
        .with_context(|| format!("error writing plan file {}", path.display()))?;
    Ok(())
}

/// Options for generating a plan file template.
#[derive(Debug, Clone)]
pub struct PlanTemplateOptions {
    pub etcd_nodes: usize,
    pub master_nodes: usize,
    pub worker_nodes: usize,
    pub ingress_nodes: usize,
    pub storage_nodes: usize,
}

/// Generate a skeleton plan the operator fills in before `install apply`.
pub fn generate_plan(cluster_name: &str, opts: &PlanTemplateOptions) -> Plan {
    let group = |count: usize, prefix: &str| NodeGroup {
        expected_count: count,
        nodes: (0..count)
            .map(|i| PlanNode {
                host: format!("{prefix}{:02}", i + 1),
                ..Default::default()
            })
            .collect(),
    };
    Plan {
        cluster: Cluster {
            name: cluster_name.to_string(),
            admin_password: String::new(),
            disable_package_installation: false,
            disconnected_installation: false,
            networking: NetworkConfig {
                pod_cidr_block: "172.16.0.0/16".to_string(),
                service_cidr_block: "172.20.0.0/16".to_string(),
                update_hosts_files: false,
                http_proxy: String::new(),
                https_proxy: String::new(),
                no_proxy: String::new(),
            },
            certificates: CertsConfig::default(),
            ssh: SshConfig {
                user: "bosunuser".to_string(),
                key: "bosunuser.key".to_string(),
                port: 22,
            },
            kube_apiserver: OptionOverrides::default(),
            kube_controller_manager: OptionOverrides::default(),
            kube_scheduler: OptionOverrides::default(),
            kube_proxy: OptionOverrides::default(),
            kubelet: OptionOverrides::default(),
            cloud_provider: CloudProvider::default(),
        },
        docker: Docker::default(),
        docker_registry: DockerRegistry::default(),
        add_ons: AddOns::default(),
        etcd: group(opts.etcd_nodes, "etcd"),
        master: MasterNodeGroup {
            expected_count: opts.master_nodes,
            nodes: (0..opts.master_nodes)
                .map(|i| PlanNode {
                    host: format!("master{:02}", i + 1),
                    ..Default::default()
                })
                .collect(),
            load_balanced_fqdn: String::new(),
            load_balanced_short_name: String::new(),
        },
        worker: group(opts.worker_nodes, "worker"),
        ingress: group(opts.ingress_nodes, "ingress"),
        storage: group(opts.storage_nodes, "storage"),
        nfs: Nfs::default(),
    }
}

/// Validate the plan, collecting every violation rather than stopping at
/// the first. Validation happens before any remote side effect.
pub fn validate_plan(plan: &Plan) -> std::result::Result<(), Vec<String>> {
    let mut errors = Vec::new();

    if plan.cluster.name.is_empty() {
        errors.push("cluster name cannot be empty".to_string());
    }
    if plan.cluster.admin_password.is_empty() {
        errors.push("admin password cannot be empty".to_string());
    }

    validate_cidr("pod CIDR block", &plan.cluster.networking.pod_cidr_block, &mut errors);
    validate_cidr(
        "service CIDR block",
        &plan.cluster.networking.service_cidr_block,
        &mut errors,
    );

    let ssh = &plan.cluster.ssh;
    if ssh.user.is_empty() {
        errors.push("SSH user field is required".to_string());
    }
    if ssh.key.is_empty() {
        errors.push("SSH key field is required".to_string());
    } else if !plan.ssh_key_path().exists() {
        errors.push(format!("SSH key file was not found at {:?}", ssh.key));
    }
    if ssh.port == 0 {
        errors.push("SSH port must be in the range 1-65535".to_string());
    }

    validate_node_group("etcd", &plan.etcd, true, &mut errors);
    validate_node_group(
        "master",
        &NodeGroup {
            expected_count: plan.master.expected_count,
            nodes: plan.master.nodes.clone(),
        },
        true,
        &mut errors,
    );
    validate_node_group("worker", &plan.worker, true, &mut errors);
    validate_node_group("ingress", &plan.ingress, false, &mut errors);
    validate_node_group("storage", &plan.storage, false, &mut errors);

    if plan.master.load_balanced_fqdn.is_empty() {
        errors.push("master load balanced FQDN is required".to_string());
    }
    if plan.master.load_balanced_short_name.is_empty() {
        errors.push("master load balanced short name is required".to_string());
    }

    let registry = &plan.docker_registry;
    if registry.server.is_empty() && !registry.ca.is_empty() {
        errors.push("docker registry server cannot be empty when a CA is provided".to_string());
    }
    if plan.cluster.disconnected_installation && registry.server.is_empty() {
        errors.push("a docker registry is required for a disconnected installation".to_string());
    }

    for (i, volume) in plan.nfs.nfs_volume.iter().enumerate() {
        if volume.nfs_host.is_empty() {
            errors.push(format!("NFS volume #{}: host is required", i + 1));
        }
        if !volume.mount_path.starts_with('/') {
            errors.push(format!("NFS volume #{}: mount path must be absolute", i + 1));
        }
    }

    if errors.is_empty() { Ok(()) } else { Err(errors) }
}

/// Validate a volume-add request.
pub fn validate_storage_volume(volume: &StorageVolume) -> std::result::Result<(), Vec<String>> {
    let mut errors = Vec::new();
    if volume.name.is_empty() || volume.name.contains(char::is_whitespace) {
        errors.push("volume name must be non-empty and cannot contain spaces".to_string());
    }
    if volume.replicate_count == 0 {
        errors.push("replica count must be greater than zero".to_string());
    }
    if volume.distribution_count == 0 {
        errors.push("distribution count must be greater than zero".to_string());
    }
    if !["Retain", "Recycle", "Delete"].contains(&volume.reclaim_policy.as_str()) {
        errors.push(format!(
            "invalid reclaim policy {:?}; must be Retain, Recycle, or Delete",
            volume.reclaim_policy
        ));
    }
    for mode in &volume.access_modes {
        if !["ReadWriteOnce", "ReadOnlyMany", "ReadWriteMany"].contains(&mode.as_str()) {
            errors.push(format!("invalid access mode {:?}", mode));
        }
    }
    for address in &volume.allow_addresses {
        if !valid_allowed_address(address) {
            errors.push(format!("invalid allowed address {:?}", address));
        }
    }
    if errors.is_empty() { Ok(()) } else { Err(errors) }
}

fn validate_node_group(role: &str, group: &NodeGroup, required: bool, errors: &mut Vec<String>) {
    if group.nodes.is_empty() && group.expected_count == 0 {
        if required {
            errors.push(format!("{role} nodes: at least one node is required"));
        }
        return;
    }
    if group.nodes.len() != group.expected_count {
        errors.push(format!(
            "{role} nodes: expected node count ({}) does not match the number of nodes provided ({})",
            group.expected_count,
            group.nodes.len()
        ));
    }
    let mut hostnames = std::collections::HashSet::new();
    for (i, node) in group.nodes.iter().enumerate() {
        validate_node(&format!("{role} node #{}", i + 1), node, errors);
        if !node.host.is_empty() && !hostnames.insert(node.host.as_str()) {
            errors.push(format!(
                "{role} node #{}: duplicate hostname {:?}",
                i + 1,
                node.host
            ));
        }
    }
}

fn validate_node(prefix: &str, node: &PlanNode, errors: &mut Vec<String>) {
    if !is_dns_label(&node.host) {
        errors.push(format!(
            "{prefix}: host {:?} must be a non-empty DNS label",
            node.host
        ));
    }
    if node.ip.is_empty() && node.internalip.is_empty() {
        errors.push(format!("{prefix}: at least one of IP or internal IP is required"));
    }
    if !node.ip.is_empty() && node.ip.parse::<std::net::IpAddr>().is_err() {
        errors.push(format!("{prefix}: invalid IP {:?}", node.ip));
    }
    if !node.internalip.is_empty() && node.internalip.parse::<std::net::IpAddr>().is_err() {
        errors.push(format!("{prefix}: invalid internal IP {:?}", node.internalip));
    }
}

fn is_dns_label(host: &str) -> bool {
    if host.is_empty() || host.len() > 63 {
        return false;
    }
    // Hostname labels: alphanumeric with interior hyphens
    let re = Regex::new(r"^[a-zA-Z0-9]([a-zA-Z0-9-]*[a-zA-Z0-9])?$");
    re.map(|r| r.is_match(host)).unwrap_or(false)
}

fn validate_cidr(what: &str, cidr: &str, errors: &mut Vec<String>) {
    if cidr.is_empty() {
        errors.push(format!("{what} cannot be empty"));
        return;
    }
    if parse_cidr(cidr).is_none() {
        errors.push(format!("invalid {what} provided: {cidr:?}"));
    }
}

fn parse_cidr(cidr: &str) -> Option<(Ipv4Addr, u8)> {
    let (addr, prefix) = cidr.split_once('/')?;
    let addr: Ipv4Addr = addr.parse().ok()?;
    let prefix: u8 = prefix.parse().ok()?;
    if prefix > 32 {
        return None;
    }
    Some((addr, prefix))
}

/// Compute the nth address of a CIDR block.
pub fn ip_from_cidr(cidr: &str, n: u32) -> Result<String> {
    let (addr, prefix) =
        parse_cidr(cidr).with_context(|| format!("error parsing CIDR {cidr:?}"))?;
    let mask = if prefix == 0 {
        0
    } else {
        u32::MAX << (32 - u32::from(prefix))
    };
    let base = u32::from(addr) & mask;
    let ip = base
        .checked_add(n)
        .with_context(|| format!("could not compute the n={n} IP address of CIDR {cidr:?}"))?;
    let size: u64 = 1 << (32 - u32::from(prefix));
    if u64::from(ip - base) >= size {
        anyhow::bail!("could not compute the n={n} IP address of CIDR {cidr:?}: out of range");
    }
    Ok(Ipv4Addr::from(ip).to_string())
}

// Allowed addresses for volumes accept wildcard octets, e.g. 10.10.*.*
fn valid_allowed_address(address: &str) -> bool {
    let octets: Vec<&str> = address.split('.').collect();
    if octets.len() != 4 {
        return false;
    }
    octets
        .iter()
        .all(|o| *o == "*" || o.parse::<u8>().is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    fn valid_plan(key_path: &str) -> Plan {
        let mut plan = generate_plan(
            "testcluster",
            &PlanTemplateOptions {
                etcd_nodes: 1,
                master_nodes: 1,
                worker_nodes: 1,
                ingress_nodes: 0,
                storage_nodes: 0,
            },
        );
        plan.cluster.admin_password = "s3cret".to_string();
        plan.cluster.ssh.key = key_path.to_string();
        plan.master.load_balanced_fqdn = "cluster.example.com".to_string();
        plan.master.load_balanced_short_name = "cluster".to_string();
        plan.etcd.nodes[0].ip = "10.0.0.1".to_string();
        plan.master.nodes[0].ip = "10.0.0.2".to_string();
        plan.worker.nodes[0].ip = "10.0.0.3".to_string();
        plan
    }

    fn ssh_key() -> tempfile::NamedTempFile {
        let mut key = tempfile::NamedTempFile::new().unwrap();
        writeln!(key, "not a real key").unwrap();
        key
    }

    #[test]
    fn valid_plan_passes_validation() {
        let key = ssh_key();
        let plan = valid_plan(key.path().to_str().unwrap());
        assert!(validate_plan(&plan).is_ok());
    }

    #[test]
    fn missing_required_groups_fail_validation() {
        let key = ssh_key();
        let mut plan = valid_plan(key.path().to_str().unwrap());
        plan.etcd = NodeGroup::default();
        let errors = validate_plan(&plan).unwrap_err();
        assert!(errors.iter().any(|e| e.contains("etcd")));
    }

    #[test]
    fn count_mismatch_fails_validation() {
        let key = ssh_key();
        let mut plan = valid_plan(key.path().to_str().unwrap());
        plan.worker.expected_count = 3;
        let errors = validate_plan(&plan).unwrap_err();
        assert!(errors.iter().any(|e| e.contains("does not match")));
    }

    #[test]
    fn bad_hostname_fails_validation() {
        let key = ssh_key();
        let mut plan = valid_plan(key.path().to_str().unwrap());
        plan.worker.nodes[0].host = "worker_01!".to_string();
        let errors = validate_plan(&plan).unwrap_err();
        assert!(errors.iter().any(|e| e.contains("DNS label")));
    }

    #[test]
    fn node_without_any_ip_fails_validation() {
        let key = ssh_key();
        let mut plan = valid_plan(key.path().to_str().unwrap());
        plan.worker.nodes[0].ip = String::new();
        let errors = validate_plan(&plan).unwrap_err();
        assert!(errors.iter().any(|e| e.contains("at least one of IP")));
    }

    #[test]
    fn unknown_plan_fields_are_rejected() {
        let yaml = "\
cluster:
  name: test
  admin_password: secret
  totally_unknown_field: true
  networking:
    pod_cidr_block: 172.16.0.0/16
    service_cidr_block: 172.20.0.0/16
  ssh:
    user: root
    ssh_key: /tmp/key
etcd: {expected_count: 0, nodes: []}
master: {expected_count: 0, nodes: [], load_balanced_fqdn: '', load_balanced_short_name: ''}
worker: {expected_count: 0, nodes: []}
";
        let result: std::result::Result<Plan, _> = serde_yaml::from_str(yaml);
        assert!(result.is_err());
    }

    #[test]
    fn dns_service_ip_is_cidr_base_plus_two() {
        let key = ssh_key();
        let plan = valid_plan(key.path().to_str().unwrap());
        assert_eq!(plan.dns_service_ip().unwrap(), "172.20.0.2");
    }

    #[test]
    fn ip_from_cidr_rejects_out_of_range() {
        assert!(ip_from_cidr("10.0.0.0/30", 7).is_err());
        assert_eq!(ip_from_cidr("10.0.0.0/24", 10).unwrap(), "10.0.0.10");
    }

    #[test]
    fn unique_nodes_deduplicates_shared_roles() {
        let key = ssh_key();
        let mut plan = valid_plan(key.path().to_str().unwrap());
        // The worker host also carries the storage role
        plan.storage.expected_count = 1;
        plan.storage.nodes = vec![plan.worker.nodes[0].clone()];
        assert_eq!(plan.unique_nodes().len(), 3);
        assert_eq!(plan.roles_of(&plan.worker.nodes[0].host), vec!["worker", "storage"]);
    }

    #[test]
    fn internal_address_falls_back_to_public() {
        let node = PlanNode {
            host: "etcd01".into(),
            ip: "10.0.0.1".into(),
            ..Default::default()
        };
        assert_eq!(node.internal_address(), "10.0.0.1");
    }

    #[test]
    fn storage_volume_validation() {
        let volume = StorageVolume {
            name: "storage01".into(),
            size_gb: 10,
            replicate_count: 2,
            distribution_count: 1,
            storage_class: "durable".into(),
            allow_addresses: vec!["10.10.*.*".into()],
            reclaim_policy: "Retain".into(),
            access_modes: vec!["ReadWriteMany".into()],
        };
        assert!(validate_storage_volume(&volume).is_ok());

        let mut bad = volume;
        bad.reclaim_policy = "KeepForever".into();
        bad.allow_addresses = vec!["10.10.10".into()];
        let errors = validate_storage_volume(&bad).unwrap_err();
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn plan_round_trips_through_yaml() {
        let key = ssh_key();
        let plan = valid_plan(key.path().to_str().unwrap());
        let rendered = serde_yaml::to_string(&plan).unwrap();
        let reread: Plan = serde_yaml::from_str(&rendered).unwrap();
        assert_eq!(reread.cluster.name, "testcluster");
        assert_eq!(reread.master.nodes[0].ip, "10.0.0.2");
    }
}
