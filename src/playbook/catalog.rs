//! The catalog compiler: flattens the plan into the variable record the
//! step playbooks consume. Every field is a scalar, a list of scalars,
//! or a map of string to string.

use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

use crate::plan::Plan;

pub const INTERNAL_REGISTRY_PORT: u16 = 8443;

#[derive(Debug, Clone, Default, Serialize)]
pub struct ClusterCatalog {
    pub kubernetes_cluster_name: String,
    pub kubernetes_admin_password: String,
    pub tls_directory: String,
    pub kubernetes_services_cidr: String,
    pub kubernetes_pods_cidr: String,
    pub kubernetes_dns_service_ip: String,
    pub modify_hosts_file: bool,
    pub allow_package_installation: bool,
    pub disconnected_installation: bool,
    pub kuberang_path: String,
    pub kubernetes_load_balanced_fqdn: String,

    pub kubernetes_api_server_option_overrides: BTreeMap<String, String>,
    pub kube_controller_manager_option_overrides: BTreeMap<String, String>,
    pub kube_scheduler_option_overrides: BTreeMap<String, String>,
    pub kube_proxy_option_overrides: BTreeMap<String, String>,
    pub kubelet_overrides: BTreeMap<String, String>,
    pub kubelet_node_overrides: BTreeMap<String, String>,
    pub node_labels: BTreeMap<String, String>,

    pub configure_docker_with_private_registry: bool,
    pub docker_certificates_ca_path: String,
    pub docker_registry_full_url: String,
    pub docker_registry_username: String,
    pub docker_registry_password: String,

    pub force_etcd_restart: bool,
    pub force_apiserver_restart: bool,
    pub force_controller_manager_restart: bool,
    pub force_scheduler_restart: bool,
    pub force_proxy_restart: bool,
    pub force_kubelet_restart: bool,
    pub force_calico_node_restart: bool,
    pub force_docker_restart: bool,

    pub configure_ingress: bool,
    pub configure_storage: bool,
    pub kismatic_preflight_checker: String,
    pub kismatic_preflight_checker_local: String,
    pub new_node: String,
    pub nfs_volumes: Vec<NfsVolumeVar>,

    pub calico_network_type: String,
    pub calico_log_level: String,
    pub calico_workload_mtu: u32,
    pub calico_felix_input_mtu: u32,
    pub calico_ip_autodetection_method: String,
    pub cni_provider: String,
    pub disable_cni: bool,

    pub dns_provider: String,
    pub disable_dns: bool,
    pub heapster_replicas: u32,
    pub heapster_service_type: String,
    pub heapster_sink: String,
    pub disable_heapster: bool,
    pub package_manager_provider: String,
    pub disable_package_manager: bool,
    pub disable_rescheduler: bool,

    pub insecure_networking_etcd: bool,
    pub http_proxy: String,
    pub https_proxy: String,
    pub no_proxy: String,

    pub cloud_provider: String,
    pub cloud_config_local: String,

    // volume add vars
    pub volume_name: String,
    pub volume_replica_count: usize,
    pub volume_distribution_count: usize,
    pub volume_storage_class: String,
    pub volume_quota_gb: u64,
    pub volume_quota_bytes: u64,
    pub volume_mount: String,
    pub volume_allow_ips: String,
    pub volume_reclaim_policy: String,
    pub volume_access_modes: Vec<String>,

    pub kismatic_short_version: String,
    pub online_upgrade: bool,
    pub diagnostics_dir: String,
    pub diagnostics_date_time: String,
    pub local_kubeconfig_directory: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct NfsVolumeVar {
    pub host: String,
    pub path: String,
}

impl ClusterCatalog {
    /// Force a rolling restart of every cluster service.
    pub fn enable_restart(&mut self) {
        self.force_etcd_restart = true;
        self.force_apiserver_restart = true;
        self.force_controller_manager_restart = true;
        self.force_scheduler_restart = true;
        self.force_proxy_restart = true;
        self.force_kubelet_restart = true;
        self.force_calico_node_restart = true;
        self.force_docker_restart = true;
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).context("error marshalling catalog to yaml")
    }
}

/// Compile the plan into the catalog for a run. `tls_directory` must be
/// absolute; the step playbooks resolve certificate paths against it.
pub fn catalog_from_plan(plan: &Plan, tls_directory: &Path, version: &str) -> Result<ClusterCatalog> {
    let dns_ip = plan
        .dns_service_ip()
        .context("error getting DNS service IP")?;

    let mut catalog = ClusterCatalog {
        kubernetes_cluster_name: plan.cluster.name.clone(),
        kubernetes_admin_password: plan.cluster.admin_password.clone(),
        tls_directory: tls_directory.display().to_string(),
        kubernetes_services_cidr: plan.cluster.networking.service_cidr_block.clone(),
        kubernetes_pods_cidr: plan.cluster.networking.pod_cidr_block.clone(),
        kubernetes_dns_service_ip: dns_ip,
        modify_hosts_file: plan.cluster.networking.update_hosts_files,
        allow_package_installation: !plan.cluster.disable_package_installation,
        disconnected_installation: plan.cluster.disconnected_installation,
        kuberang_path: "kuberang/linux/amd64/kuberang".to_string(),
        kubernetes_load_balanced_fqdn: plan.master.load_balanced_fqdn.clone(),
        kubernetes_api_server_option_overrides: plan.cluster.kube_apiserver.option_overrides.clone(),
        kube_controller_manager_option_overrides: plan
            .cluster
            .kube_controller_manager
            .option_overrides
            .clone(),
        kube_scheduler_option_overrides: plan.cluster.kube_scheduler.option_overrides.clone(),
        kube_proxy_option_overrides: plan.cluster.kube_proxy.option_overrides.clone(),
        kubelet_overrides: plan.cluster.kubelet.option_overrides.clone(),
        http_proxy: plan.cluster.networking.http_proxy.clone(),
        https_proxy: plan.cluster.networking.https_proxy.clone(),
        no_proxy: plan.cluster.networking.no_proxy.clone(),
        cloud_provider: plan.cluster.cloud_provider.provider.clone(),
        cloud_config_local: plan.cluster.cloud_provider.config.clone(),
        cni_provider: plan.add_ons.cni.provider.clone(),
        disable_cni: plan.add_ons.cni.disable,
        calico_network_type: plan.add_ons.cni.options.calico.mode.clone(),
        calico_log_level: plan.add_ons.cni.options.calico.log_level.clone(),
        calico_workload_mtu: plan.add_ons.cni.options.calico.workload_mtu,
        calico_felix_input_mtu: plan.add_ons.cni.options.calico.felix_input_mtu,
        calico_ip_autodetection_method: plan
            .add_ons
            .cni
            .options
            .calico
            .ip_autodetection_method
            .clone(),
        dns_provider: plan.add_ons.dns.provider.clone(),
        disable_dns: plan.add_ons.dns.disable,
        heapster_replicas: plan.add_ons.heapster.options.heapster.replicas,
        heapster_service_type: plan.add_ons.heapster.options.heapster.service_type.clone(),
        heapster_sink: plan.add_ons.heapster.options.heapster.sink.clone(),
        disable_heapster: plan.add_ons.heapster.disable,
        package_manager_provider: plan.add_ons.package_manager.provider.clone(),
        disable_package_manager: plan.add_ons.package_manager.disable,
        disable_rescheduler: plan.add_ons.rescheduler.disable,
        kismatic_short_version: version.to_string(),
        volume_mount: "/".to_string(),
        ..Default::default()
    };

    if !plan.docker_registry.server.is_empty() {
        catalog.configure_docker_with_private_registry = true;
        catalog.docker_registry_full_url = plan.docker_registry.server.clone();
        catalog.docker_certificates_ca_path = plan.docker_registry.ca.clone();
        catalog.docker_registry_username = plan.docker_registry.username.clone();
        catalog.docker_registry_password = plan.docker_registry.password.clone();
    }

    catalog.configure_ingress = !plan.ingress.nodes.is_empty();
    catalog.configure_storage = !plan.storage.nodes.is_empty();

    for volume in &plan.nfs.nfs_volume {
        catalog.nfs_volumes.push(NfsVolumeVar {
            host: volume.nfs_host.clone(),
            path: volume.mount_path.clone(),
        });
    }

    for node in plan.unique_nodes() {
        if !node.labels.is_empty() {
            let mut labels: Vec<String> = node
                .labels
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect();
            labels.sort();
            catalog.node_labels.insert(node.host.clone(), labels.join(","));
        }
    }

    Ok(catalog)
}

/// Fill in the volume-add variables for a storage volume request.
pub fn apply_storage_volume(
    catalog: &mut ClusterCatalog,
    plan: &Plan,
    volume: &crate::plan::StorageVolume,
) {
    catalog.volume_name = volume.name.clone();
    catalog.volume_replica_count = volume.replicate_count;
    catalog.volume_distribution_count = volume.distribution_count;
    catalog.volume_storage_class = volume.storage_class.clone();
    catalog.volume_quota_gb = volume.size_gb;
    catalog.volume_quota_bytes = volume.size_gb << 30;
    catalog.volume_reclaim_policy = volume.reclaim_policy.clone();
    catalog.volume_access_modes = volume.access_modes.clone();

    // Access list: explicit allowances, the pod network, and every node
    // address, preferring internal addresses where declared.
    let mut allowed = volume.allow_addresses.clone();
    allowed.push(plan.cluster.networking.pod_cidr_block.clone());
    for node in plan
        .master
        .nodes
        .iter()
        .chain(&plan.worker.nodes)
        .chain(&plan.ingress.nodes)
        .chain(&plan.storage.nodes)
    {
        let address = node.internal_address().to_string();
        if !address.is_empty() && !allowed.contains(&address) {
            allowed.push(address);
        }
    }
    catalog.volume_allow_ips = allowed.join(",");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{generate_plan, PlanTemplateOptions, StorageVolume};

    fn sample_plan() -> Plan {
        let mut plan = generate_plan(
            "kubernetes",
            &PlanTemplateOptions {
                etcd_nodes: 1,
                master_nodes: 1,
                worker_nodes: 2,
                ingress_nodes: 1,
                storage_nodes: 0,
            },
        );
        plan.cluster.admin_password = "s3cret".to_string();
        plan.master.load_balanced_fqdn = "cluster.example.com".to_string();
        plan.master.nodes[0].ip = "10.0.0.2".to_string();
        plan.worker.nodes[0].ip = "10.0.0.3".to_string();
        plan.worker.nodes[1].ip = "10.0.0.4".to_string();
        plan.worker.nodes[1].internalip = "192.168.0.4".to_string();
        plan.ingress.nodes[0].ip = "10.0.0.5".to_string();
        plan
    }

    #[test]
    fn compiles_core_plan_fields() {
        let plan = sample_plan();
        let catalog = catalog_from_plan(&plan, Path::new("/tmp/certs"), "1.5.0").unwrap();
        assert_eq!(catalog.kubernetes_cluster_name, "kubernetes");
        assert_eq!(catalog.kubernetes_dns_service_ip, "172.20.0.2");
        assert!(catalog.allow_package_installation);
        assert!(catalog.configure_ingress);
        assert!(!catalog.configure_storage);
        assert_eq!(catalog.kismatic_short_version, "1.5.0");
        assert!(!catalog.configure_docker_with_private_registry);
    }

    #[test]
    fn registry_variables_follow_the_plan() {
        let mut plan = sample_plan();
        plan.docker_registry.server = "registry.example.com:5000".to_string();
        plan.docker_registry.ca = "/etc/registry/ca.pem".to_string();
        plan.docker_registry.username = "pusher".to_string();
        let catalog = catalog_from_plan(&plan, Path::new("/tmp/certs"), "1.5.0").unwrap();
        assert!(catalog.configure_docker_with_private_registry);
        assert_eq!(catalog.docker_registry_full_url, "registry.example.com:5000");
        assert_eq!(catalog.docker_registry_username, "pusher");
    }

    #[test]
    fn enable_restart_sets_every_force_flag() {
        let mut catalog = ClusterCatalog::default();
        catalog.enable_restart();
        assert!(catalog.force_etcd_restart);
        assert!(catalog.force_apiserver_restart);
        assert!(catalog.force_docker_restart);
    }

    #[test]
    fn storage_volume_vars_compute_quota_and_allow_list() {
        let plan = sample_plan();
        let mut catalog = catalog_from_plan(&plan, Path::new("/tmp/certs"), "1.5.0").unwrap();
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
        apply_storage_volume(&mut catalog, &plan, &volume);
        assert_eq!(catalog.volume_quota_bytes, 10 << 30);
        assert_eq!(catalog.volume_mount, "/");
        let allowed: Vec<&str> = catalog.volume_allow_ips.split(',').collect();
        assert_eq!(allowed[0], "10.10.*.*");
        assert_eq!(allowed[1], "172.16.0.0/16");
        // The worker with an internal address contributes that address
        assert!(allowed.contains(&"192.168.0.4"));
        assert!(!allowed.contains(&"10.0.0.4"));
    }

    #[test]
    fn node_labels_flatten_to_sorted_pairs() {
        let mut plan = sample_plan();
        plan.worker.nodes[0]
            .labels
            .insert("disk".to_string(), "ssd".to_string());
        plan.worker.nodes[0]
            .labels
            .insert("zone".to_string(), "us-east".to_string());
        let catalog = catalog_from_plan(&plan, Path::new("/tmp/certs"), "1.5.0").unwrap();
        assert_eq!(
            catalog.node_labels.get("worker01").map(String::as_str),
            Some("disk=ssd,zone=us-east")
        );
    }
}
