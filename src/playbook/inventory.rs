//! The inventory compiler: projects the plan's node groups into the INI
//! inventory the playbook engine consumes.

use std::fmt::Write as _;

use crate::plan::Plan;

/// An inventory is a list of roles, each holding its member nodes.
#[derive(Debug, Clone, Default)]
pub struct Inventory {
    pub roles: Vec<Role>,
}

#[derive(Debug, Clone)]
pub struct Role {
    pub name: String,
    pub nodes: Vec<InventoryNode>,
}

/// A node as the engine sees it: addresses plus SSH connection details.
#[derive(Debug, Clone)]
pub struct InventoryNode {
    pub host: String,
    pub public_ip: String,
    pub internal_ip: String,
    pub ssh_private_key: String,
    pub ssh_port: u16,
    pub ssh_user: String,
}

impl Inventory {
    /// Render the inventory in INI format. Every value is quoted so hosts
    /// with unusual characters cannot break the section structure.
    pub fn to_ini(&self) -> String {
        let mut out = String::new();
        for role in &self.roles {
            let _ = writeln!(out, "[{}]", role.name);
            for node in &role.nodes {
                let internal = if node.internal_ip.is_empty() {
                    &node.public_ip
                } else {
                    &node.internal_ip
                };
                let _ = writeln!(
                    out,
                    "{:?} ansible_host={:?} internal_ipv4={:?} ansible_ssh_private_key_file={:?} ansible_port={} ansible_user={:?}",
                    node.host,
                    node.public_ip,
                    internal,
                    node.ssh_private_key,
                    node.ssh_port,
                    node.ssh_user,
                );
            }
        }
        out
    }
}

/// Build the inventory from the plan. Roles appear in a fixed order, and
/// roles with no members are omitted entirely.
pub fn inventory_from_plan(plan: &Plan) -> Inventory {
    let key = plan.ssh_key_path().display().to_string();
    let node = |n: &crate::plan::PlanNode| InventoryNode {
        host: n.host.clone(),
        public_ip: n.ip.clone(),
        internal_ip: n.internalip.clone(),
        ssh_private_key: key.clone(),
        ssh_port: plan.cluster.ssh.port,
        ssh_user: plan.cluster.ssh.user.clone(),
    };
    let mut roles = Vec::new();
    for (name, group) in [
        ("etcd", &plan.etcd.nodes),
        ("master", &plan.master.nodes),
        ("worker", &plan.worker.nodes),
        ("ingress", &plan.ingress.nodes),
        ("storage", &plan.storage.nodes),
    ] {
        if group.is_empty() {
            continue;
        }
        roles.push(Role {
            name: name.to_string(),
            nodes: group.iter().map(node).collect(),
        });
    }
    Inventory { roles }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_node(host: &str, public: &str, internal: &str) -> InventoryNode {
        InventoryNode {
            host: host.to_string(),
            public_ip: public.to_string(),
            internal_ip: internal.to_string(),
            ssh_private_key: "/home/op/cluster.key".to_string(),
            ssh_port: 22,
            ssh_user: "op".to_string(),
        }
    }

    #[test]
    fn ini_quotes_values_and_lists_roles_in_order() {
        let inventory = Inventory {
            roles: vec![
                Role {
                    name: "etcd".to_string(),
                    nodes: vec![sample_node("etcd01", "203.0.113.10", "10.0.0.10")],
                },
                Role {
                    name: "master".to_string(),
                    nodes: vec![sample_node("master01", "203.0.113.20", "")],
                },
            ],
        };
        let ini = inventory.to_ini();
        let lines: Vec<&str> = ini.lines().collect();
        assert_eq!(lines[0], "[etcd]");
        assert_eq!(
            lines[1],
            "\"etcd01\" ansible_host=\"203.0.113.10\" internal_ipv4=\"10.0.0.10\" \
             ansible_ssh_private_key_file=\"/home/op/cluster.key\" ansible_port=22 ansible_user=\"op\""
        );
        assert_eq!(lines[2], "[master]");
        // Internal address falls back to the public one
        assert!(lines[3].contains("internal_ipv4=\"203.0.113.20\""));
    }

    #[test]
    fn empty_roles_are_omitted() {
        let inventory = Inventory {
            roles: vec![Role {
                name: "worker".to_string(),
                nodes: vec![sample_node("worker01", "10.0.0.3", "")],
            }],
        };
        let ini = inventory.to_ini();
        assert!(ini.contains("[worker]"));
        assert!(!ini.contains("[ingress]"));
    }
}
