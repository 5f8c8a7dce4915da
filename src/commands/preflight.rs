//! The two halves of the node check plumbing. The preflight playbook
//! ships the binary to each node, starts it in server mode, then runs
//! the client against it and captures the JSON results from stdout.

use anyhow::{bail, Result};

use crate::cli::{PreflightClientArgs, PreflightServerArgs};
use crate::preflight::client::PreflightClient;
use crate::preflight::server::PreflightServer;
use crate::preflight::CheckRequest;

pub fn server(args: &PreflightServerArgs) -> Result<()> {
    let server = PreflightServer::bind(args.port)?;
    server.run()
}

pub fn client(args: &PreflightClientArgs) -> Result<()> {
    let request = CheckRequest {
        binary_dependencies: args.binary_dependencies.clone(),
        package_dependencies: args.package_dependencies.clone(),
        tcp_ports: args.tcp_ports.clone(),
    };
    let client = PreflightClient::new(&args.target);

    // The server is started just before the client runs, so give it a
    // moment to come up before treating the transport as broken.
    let mut results = Vec::new();
    crate::retry::linear(
        || {
            results = client.run_checks(&request)?;
            Ok(())
        },
        3,
    )?;

    // Stdout carries only the results so the caller can parse them
    println!("{}", serde_json::to_string(&results)?);

    if results.iter().any(|r| !r.success) {
        bail!("one or more node checks failed");
    }
    Ok(())
}
