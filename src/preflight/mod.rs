//! Preflight checks: local and remote verification that a node is fit
//! for an installation step.
//!
//! The driver posts a [`CheckRequest`] to a check server running on the
//! node, augments the response with client-side TCP reachability checks,
//! and hands the combined results to the caller. Individual check
//! failures are data, not errors; only transport failures abort a batch.

pub mod checks;
pub mod client;
pub mod package;
pub mod server;

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// A preflight check that verifies some condition on the node.
pub trait Check: Send {
    /// Name of the check, unique within a request
    fn name(&self) -> String;
    /// Ok when the condition holds; the error carries remediation detail
    fn check(&self) -> Result<()>;
}

/// A check that holds a resource open until released.
pub trait ClosableCheck: Check {
    fn close(&self) -> Result<()>;
}

/// The set of checks a driver asks a node to run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckRequest {
    pub binary_dependencies: Vec<String>,
    pub package_dependencies: Vec<String>,
    pub tcp_ports: Vec<u16>,
}

/// The outcome of one check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResult {
    pub name: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
}

impl CheckResult {
    /// Run a check and record its outcome.
    pub fn from_check(check: &dyn Check) -> Self {
        match check.check() {
            Ok(()) => Self {
                name: check.name(),
                success: true,
                error: String::new(),
            },
            Err(err) => Self {
                name: check.name(),
                success: false,
                error: format!("{err:#}"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;

    struct AlwaysFails;
    impl Check for AlwaysFails {
        fn name(&self) -> String {
            "always fails".into()
        }
        fn check(&self) -> Result<()> {
            bail!("broken on purpose")
        }
    }

    #[test]
    fn result_records_check_name_and_error() {
        let result = CheckResult::from_check(&AlwaysFails);
        assert_eq!(result.name, "always fails");
        assert!(!result.success);
        assert!(result.error.contains("broken on purpose"));
    }

    #[test]
    fn request_round_trips_through_json() {
        let req = CheckRequest {
            binary_dependencies: vec!["iptables".into()],
            package_dependencies: vec!["docker-engine".into()],
            tcp_ports: vec![6443, 2379],
        };
        let encoded = serde_json::to_string(&req).unwrap();
        let decoded: CheckRequest = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.tcp_ports, vec![6443, 2379]);
        assert_eq!(decoded.binary_dependencies, vec!["iptables".to_string()]);
    }
}
