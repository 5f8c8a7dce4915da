//! The preflight check server that runs on each node.
//!
//! Exposes POST /run-checks to execute a batch and GET /close-checks to
//! release any TCP listeners held open by the previous batch.

use anyhow::{anyhow, Context, Result};
use std::str::FromStr;
use std::sync::Mutex;
use tiny_http::{Header, Method, Response, Server};

use super::checks::{BinaryDependencyCheck, TcpPortServerCheck};
use super::package::{PackageInstalledCheck, PackageQuery};
use super::{Check, CheckRequest, CheckResult, ClosableCheck};

pub struct PreflightServer {
    server: Server,
    closable: Mutex<Vec<TcpPortServerCheck>>,
}

impl PreflightServer {
    /// Bind the control port. Port 0 picks an ephemeral port.
    pub fn bind(port: u16) -> Result<Self> {
        let server = Server::http(("0.0.0.0", port))
            .map_err(|err| anyhow!("error binding preflight server on port {port}: {err}"))?;
        Ok(Self {
            server,
            closable: Mutex::new(Vec::new()),
        })
    }

    /// The port the server is listening on.
    pub fn port(&self) -> u16 {
        self.server.server_addr().to_ip().map_or(0, |a| a.port())
    }

    /// Serve requests until the process exits.
    pub fn run(&self) -> Result<()> {
        log::info!("preflight server listening on port {}", self.port());
        loop {
            let mut request = self
                .server
                .recv()
                .context("error receiving preflight request")?;
            let response = match (request.method(), request.url()) {
                (Method::Post, "/run-checks") => {
                    match serde_json::from_reader::<_, CheckRequest>(request.as_reader()) {
                        Ok(check_request) => {
                            let results = self.run_checks(&check_request);
                            match serde_json::to_string(&results) {
                                Ok(body) => json_response(body),
                                Err(_) => Response::from_string("").with_status_code(500),
                            }
                        }
                        Err(_) => Response::from_string("").with_status_code(400),
                    }
                }
                (Method::Get, "/close-checks") => {
                    self.close_checks();
                    Response::from_string("")
                }
                (Method::Post, "/close-checks") | (_, "/run-checks") => {
                    Response::from_string("").with_status_code(405)
                }
                _ => Response::from_string("").with_status_code(404),
            };
            if let Err(err) = request.respond(response) {
                log::warn!("error writing preflight response: {err}");
            }
        }
    }

    /// Run the requested checks in declaration order: binary, package,
    /// then TCP server checks. The closable list is replaced atomically.
    pub fn run_checks(&self, request: &CheckRequest) -> Vec<CheckResult> {
        let mut results = Vec::new();

        for binary in &request.binary_dependencies {
            let check = BinaryDependencyCheck {
                binary: binary.clone(),
            };
            results.push(CheckResult::from_check(&check));
        }

        for package in &request.package_dependencies {
            let check = PackageInstalledCheck {
                package: PackageQuery::parse(package),
            };
            results.push(CheckResult::from_check(&check));
        }

        let mut closable = Vec::new();
        for port in &request.tcp_ports {
            let check = TcpPortServerCheck::new(*port);
            results.push(CheckResult::from_check(&check));
            closable.push(check);
        }

        match self.closable.lock() {
            Ok(mut held) => *held = closable,
            Err(poisoned) => *poisoned.into_inner() = closable,
        }

        results
    }

    /// Release TCP listeners from the previous batch. Idempotent.
    pub fn close_checks(&self) {
        let drained = match self.closable.lock() {
            Ok(mut held) => std::mem::take(&mut *held),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };
        for check in drained {
            if let Err(err) = check.close() {
                log::warn!("error closing check {:?}: {err}", check.name());
            }
        }
    }
}

fn json_response(body: String) -> Response<std::io::Cursor<Vec<u8>>> {
    let response = Response::from_string(body);
    match Header::from_str("Content-Type: application/json") {
        Ok(header) => response.with_header(header),
        Err(()) => response,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn results_preserve_declaration_order_and_count() {
        let server = PreflightServer::bind(0).unwrap();
        let request = CheckRequest {
            binary_dependencies: vec!["sh".into(), "no-such-binary".into()],
            package_dependencies: vec![],
            tcp_ports: vec![0],
        };
        let results = server.run_checks(&request);
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].name, "sh exists");
        assert!(results[0].success);
        assert!(!results[1].success);
        assert_eq!(results[2].name, "TCP port 0 bindable");
        server.close_checks();
    }

    #[test]
    fn close_checks_is_idempotent() {
        let server = PreflightServer::bind(0).unwrap();
        let request = CheckRequest {
            tcp_ports: vec![0],
            ..Default::default()
        };
        server.run_checks(&request);
        server.close_checks();
        server.close_checks();
    }
}
