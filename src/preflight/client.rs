//! Driver-side preflight client.
//!
//! Posts a check request to the server running on a node, then runs the
//! client half of the TCP checks against the same ports before asking the
//! server to release them.

use anyhow::{Context, Result};

use super::checks::TcpPortClientCheck;
use super::{CheckRequest, CheckResult};

pub struct PreflightClient {
    /// ip:port of the node's check server
    pub target: String,
}

impl PreflightClient {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
        }
    }

    /// Run the checks against the remote node, returning the combined
    /// server-side and client-side results.
    pub fn run_checks(&self, request: &CheckRequest) -> Result<Vec<CheckResult>> {
        let agent = ureq::Agent::new_with_defaults();
        let mut response = agent
            .post(format!("http://{}/run-checks", self.target))
            .send_json(request)
            .with_context(|| format!("preflight server at {:?} responded with error", self.target))?;
        let mut results: Vec<CheckResult> = response
            .body_mut()
            .read_json()
            .context("error decoding preflight server response")?;

        let host = self
            .target
            .rsplit_once(':')
            .map_or(self.target.as_str(), |(host, _)| host);

        for port in &request.tcp_ports {
            let check = TcpPortClientCheck {
                port: *port,
                ip: host.to_string(),
            };
            results.push(CheckResult::from_check(&check));
        }

        // Best effort: the server's listeners time out with the process
        // anyway, and the results are already in hand.
        if let Err(err) = agent
            .get(format!("http://{}/close-checks", self.target))
            .call()
        {
            log::warn!("error closing checks on {:?}: {err}", self.target);
        }

        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preflight::server::PreflightServer;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn roundtrip_returns_one_result_per_check() {
        let server = Arc::new(PreflightServer::bind(0).unwrap());
        let port = server.port();
        let background = Arc::clone(&server);
        thread::spawn(move || {
            let _ = background.run();
        });

        // Ephemeral port for the TCP pair so the test cannot collide
        let probe_port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };

        let client = PreflightClient::new(format!("127.0.0.1:{port}"));
        let request = CheckRequest {
            binary_dependencies: vec!["sh".into()],
            package_dependencies: vec![],
            tcp_ports: vec![probe_port],
        };
        let results = client.run_checks(&request).unwrap();

        // binary + server-side tcp + client-side tcp
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].name, "sh exists");
        assert_eq!(results[1].name, format!("TCP port {probe_port} bindable"));
        assert_eq!(results[2].name, format!("TCP port {probe_port} accessible"));
    }

    #[test]
    fn unreachable_server_surfaces_transport_error() {
        let client = PreflightClient::new("127.0.0.1:1");
        let request = CheckRequest::default();
        assert!(client.run_checks(&request).is_err());
    }
}
