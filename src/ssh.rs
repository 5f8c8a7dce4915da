//! Remote command fanout over ssh.
//!
//! Runs an ordered command sequence against a set of hosts: serial per
//! host, parallel across hosts, bounded by a single deadline. Workers
//! observe cancellation between commands, never mid-command.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;

/// An addressable host for fanout operations
#[derive(Debug, Clone)]
pub struct SshTarget {
    pub host: String,
    pub ip: String,
    pub user: String,
}

#[derive(Debug, Error)]
pub enum FanoutError {
    #[error("timed out running commands on nodes")]
    Timeout,
    #[error("error running command on node {host}")]
    Remote { host: String },
}

/// Run `cmds` in order on every node. Commands are serialized per host and
/// run in parallel across hosts. Returns an error on the first remote
/// failure or when the deadline elapses, signalling all workers to stop.
pub fn run_via_ssh(
    cmds: &[String],
    nodes: &[SshTarget],
    ssh_key: &Path,
    timeout: Duration,
) -> Result<(), FanoutError> {
    let key = ssh_key.to_path_buf();
    fanout(cmds, nodes, timeout, move |cmd, node| {
        execute_cmd(cmd, node, &key)
    })
}

/// Copy a local file to a node via scp, honoring the same deadline
/// semantics as command fanout.
pub fn copy_file_to_remote(
    src: &Path,
    dst: &str,
    node: &SshTarget,
    ssh_key: &Path,
    timeout: Duration,
) -> Result<(), FanoutError> {
    let (tx, rx) = mpsc::channel();
    let src = src.to_path_buf();
    let dst = dst.to_string();
    let node = node.clone();
    let key = ssh_key.to_path_buf();
    thread::spawn(move || {
        let result = scp_file(&src, &dst, &node, &key);
        match &result {
            Ok(out) | Err(out) => {
                if !out.is_empty() {
                    println!("{out}");
                }
            }
        }
        let _ = tx.send((node.host.clone(), result.is_ok()));
    });
    match rx.recv_timeout(timeout) {
        Ok((_, true)) => Ok(()),
        Ok((host, false)) => Err(FanoutError::Remote { host }),
        Err(_) => Err(FanoutError::Timeout),
    }
}

/// Poll a node until an ssh connection succeeds or the timeout elapses.
/// Returns true if the connection was established.
pub fn wait_until_ssh_open(ip: &str, user: &str, ssh_key: &Path, timeout: Duration) -> bool {
    wait_until_open(timeout, || {
        let status = Command::new("ssh")
            .arg("-i")
            .arg(ssh_key)
            .args(["-o", "ConnectTimeout=5"])
            .args(["-o", "BatchMode=yes"])
            .args(["-o", "StrictHostKeyChecking=no"])
            .arg(format!("{user}@{ip}"))
            .arg("exit")
            .status();
        let open = status.map(|s| s.success()).unwrap_or(false);
        if !open {
            log::debug!("ssh to {ip} not ready yet");
        }
        open
    })
}

// Probe immediately, then every 3 s until success or the deadline.
// The sleep only happens between failed attempts.
fn wait_until_open(timeout: Duration, mut probe: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if probe() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_secs(3));
    }
}

// The command runner is a parameter so the scheduling semantics can be
// exercised without a real ssh binary.
fn fanout<R>(
    cmds: &[String],
    targets: &[SshTarget],
    timeout: Duration,
    run: R,
) -> Result<(), FanoutError>
where
    R: Fn(&str, &SshTarget) -> Result<String, String> + Send + Sync + 'static,
{
    let deadline = Instant::now() + timeout;
    let bail = Arc::new(AtomicBool::new(false));
    let run = Arc::new(run);
    let (tx, rx) = mpsc::channel::<Result<(), String>>();

    // One worker per host, running the commands serially. A worker exits
    // on its first command failure or when the bail flag is raised.
    for target in targets {
        let cmds = cmds.to_vec();
        let target = target.clone();
        let bail = Arc::clone(&bail);
        let run = Arc::clone(&run);
        let tx = tx.clone();
        thread::spawn(move || {
            for cmd in &cmds {
                if bail.load(Ordering::SeqCst) {
                    return;
                }
                match run(cmd, &target) {
                    Ok(out) => {
                        if !out.is_empty() {
                            println!("{out}");
                        }
                        if tx.send(Ok(())).is_err() {
                            return;
                        }
                    }
                    Err(out) => {
                        if !out.is_empty() {
                            println!("{out}");
                        }
                        let _ = tx.send(Err(target.host.clone()));
                        return;
                    }
                }
            }
        });
    }
    drop(tx);

    // Expect one status per host-command pair. Any failure or an expired
    // deadline raises the bail flag so the remaining workers stop between
    // commands.
    let expected = cmds.len() * targets.len();
    for _ in 0..expected {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match rx.recv_timeout(remaining) {
            Ok(Ok(())) => {}
            Ok(Err(host)) => {
                bail.store(true, Ordering::SeqCst);
                return Err(FanoutError::Remote { host });
            }
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => {
                bail.store(true, Ordering::SeqCst);
                return Err(FanoutError::Timeout);
            }
        }
    }
    Ok(())
}

fn execute_cmd(cmd: &str, node: &SshTarget, key: &PathBuf) -> Result<String, String> {
    let output = Command::new("ssh")
        .args(["-o", "StrictHostKeyChecking no", "-t", "-t", "-i"])
        .arg(key)
        .arg(format!("{}@{}", node.user, node.ip))
        .arg(cmd)
        .output();
    match output {
        Ok(out) => {
            let mut combined = String::from_utf8_lossy(&out.stdout).into_owned();
            combined.push_str(&String::from_utf8_lossy(&out.stderr));
            let annotated = annotate(&node.host, &combined);
            if out.status.success() {
                Ok(annotated)
            } else {
                Err(annotated)
            }
        }
        Err(err) => Err(format!("{}: failed to invoke ssh: {err}", node.host)),
    }
}

fn scp_file(src: &Path, dst: &str, node: &SshTarget, key: &Path) -> Result<String, String> {
    let output = Command::new("scp")
        .args(["-o", "StrictHostKeyChecking no", "-i"])
        .arg(key)
        .arg(src)
        .arg(format!("{}@{}:{dst}", node.user, node.ip))
        .output();
    match output {
        Ok(out) => {
            let mut combined = String::from_utf8_lossy(&out.stdout).into_owned();
            combined.push_str(&String::from_utf8_lossy(&out.stderr));
            let annotated = annotate(&node.host, &combined);
            if out.status.success() {
                Ok(annotated)
            } else {
                Err(annotated)
            }
        }
        Err(err) => Err(format!("{}: failed to invoke scp: {err}", node.host)),
    }
}

// Prefix every output line with the host it came from.
fn annotate(host: &str, output: &str) -> String {
    output
        .lines()
        .map(|line| format!("{host}: {line}"))
        .collect::<Vec<_>>()
        .join("\n")
}
