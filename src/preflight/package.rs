//! Package-installed checks against the local package database.
//!
//! RPM systems are queried with `yum list installed`, Debian systems with
//! `dpkg -l`. A check passes only on an exact name match, and an exact
//! version match when the check is version-qualified.

use anyhow::{bail, Result};
use std::process::{Command, Stdio};

use super::Check;

/// A package name, optionally pinned to a version.
#[derive(Debug, Clone)]
pub struct PackageQuery {
    pub name: String,
    pub version: Option<String>,
}

impl PackageQuery {
    /// Parse "name" or "name=version" as used in check requests.
    pub fn parse(spec: &str) -> Self {
        match spec.split_once('=') {
            Some((name, version)) => Self {
                name: name.to_string(),
                version: Some(version.to_string()),
            },
            None => Self {
                name: spec.to_string(),
                version: None,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PackageManager {
    Rpm,
    Deb,
}

fn detect_package_manager() -> Result<PackageManager> {
    if binary_exists("yum") {
        return Ok(PackageManager::Rpm);
    }
    if binary_exists("dpkg") {
        return Ok(PackageManager::Deb);
    }
    bail!("attempting to check package dependency on an unsupported distribution")
}

fn binary_exists(binary: &str) -> bool {
    Command::new("which")
        .arg(binary)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Verifies that a package is installed on the host.
#[derive(Debug)]
pub struct PackageInstalledCheck {
    pub package: PackageQuery,
}

impl Check for PackageInstalledCheck {
    fn name(&self) -> String {
        match &self.package.version {
            Some(version) => format!("{} {} is installed", self.package.name, version),
            None => format!("{} is installed", self.package.name),
        }
    }

    fn check(&self) -> Result<()> {
        let manager = detect_package_manager()?;
        let output = query_installed(manager, &self.package.name)?;
        let listed = match manager {
            PackageManager::Rpm => rpm_lists_package(&self.package, &output),
            PackageManager::Deb => deb_lists_package(&self.package, &output),
        };
        if !listed {
            bail!(
                "install {:?}, as it was not found on the system",
                self.package.name
            );
        }
        Ok(())
    }
}

fn query_installed(manager: PackageManager, name: &str) -> Result<String> {
    let output = match manager {
        PackageManager::Rpm => Command::new("yum")
            .args(["list", "installed", "-q", name])
            .output(),
        PackageManager::Deb => Command::new("dpkg").args(["-l", name]).output(),
    };
    match output {
        Ok(out) => {
            let mut combined = String::from_utf8_lossy(&out.stdout).into_owned();
            combined.push_str(&String::from_utf8_lossy(&out.stderr));
            Ok(combined)
        }
        Err(err) => bail!("unable to query the package database: {err}"),
    }
}

// yum prints "name.arch  version  repo" rows for installed packages.
fn rpm_lists_package(query: &PackageQuery, output: &str) -> bool {
    for line in output.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() != 3 {
            continue;
        }
        let name = fields[0].split('.').next().unwrap_or(fields[0]);
        if name != query.name {
            continue;
        }
        match &query.version {
            Some(version) => {
                if fields[1] == version {
                    return true;
                }
            }
            None => return true,
        }
    }
    false
}

// dpkg -l prints "ii  name  version  arch  description" rows.
fn deb_lists_package(query: &PackageQuery, output: &str) -> bool {
    for line in output.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 5 || fields[0] != "ii" {
            continue;
        }
        if fields[1] != query.name {
            continue;
        }
        match &query.version {
            Some(version) => {
                if fields[2] == version {
                    return true;
                }
            }
            None => return true,
        }
    }
    false
}
