//! Seed a container image registry with the images the cluster pulls
//! during installation or upgrade.
//!
//! Each image is pulled from its upstream registry, retagged under the
//! target registry, and pushed there with the local docker CLI.

use anyhow::{bail, Context as _, Result};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::cli::SeedRegistryArgs;
use crate::plan::read_plan_file;
use crate::util;
use crate::Context;

const IMAGES_MANIFEST_FILE: &str = "ansible/playbooks/group_vars/container_images.yaml";

#[derive(Debug, Deserialize)]
struct ImageManifest {
    official_images: BTreeMap<String, Image>,
}

#[derive(Debug, Deserialize)]
struct Image {
    name: String,
    version: String,
}

impl fmt::Display for Image {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.version)
    }
}

pub fn run(ctx: &Context, args: &SeedRegistryArgs) -> Result<()> {
    let manifest = read_image_manifest(&manifest_path(args.images_manifest_file.as_deref()))?;

    if args.list_only {
        for image in manifest.official_images.values() {
            println!("{image}");
        }
        return Ok(());
    }

    util::print_header(&mut std::io::stdout(), "Seed Container Image Registry", '=');

    if !docker_available() {
        bail!("did not find docker installed on this node; the docker CLI is required for seeding the registry");
    }

    // The server from the command line wins over the one in the plan
    let server = match &args.server {
        Some(server) => server.clone(),
        None => {
            if !ctx.plan_file.exists() {
                bail!(
                    "plan file {} does not exist; run \"bosun install plan\" to generate it, or use the --server option",
                    ctx.plan_file.display()
                );
            }
            let plan = read_plan_file(&ctx.plan_file)?;
            if plan.docker_registry.server.is_empty() {
                bail!("the private registry's address must be set in the plan file, or passed with --server");
            }
            plan.docker_registry.server
        }
    };

    let bar = ProgressBar::new(manifest.official_images.len() as u64);
    if let Ok(style) = ProgressStyle::with_template("[{pos}/{len}] {wide_msg}") {
        bar.set_style(style);
    }
    for image in manifest.official_images.values() {
        bar.set_message(format!("Seeding {image}"));
        seed_image(image, &server, ctx.verbose > 0)
            .with_context(|| format!("error seeding image {image}"))?;
        bar.println(format!("{} {image}", "✓".green()));
        bar.inc(1);
    }
    bar.finish_and_clear();

    println!();
    println!(
        "{}",
        format!("The registry {server:?} was seeded successfully.").green()
    );
    Ok(())
}

fn seed_image(image: &Image, registry: &str, verbose: bool) -> Result<()> {
    let private_tag = format!("{registry}/{image}");
    run_docker(&["pull", &image.to_string()], verbose)?;
    run_docker(&["tag", &image.to_string(), &private_tag], verbose)?;
    run_docker(&["push", &private_tag], verbose)?;
    Ok(())
}

fn run_docker(args: &[&str], verbose: bool) -> Result<()> {
    let status = Command::new("docker")
        .args(args)
        .stdout(if verbose {
            Stdio::inherit()
        } else {
            Stdio::null()
        })
        .stderr(Stdio::inherit())
        .status()
        .with_context(|| format!("error invoking docker {}", args.join(" ")))?;
    if !status.success() {
        bail!("docker {} exited with {status}", args.join(" "));
    }
    Ok(())
}

fn docker_available() -> bool {
    let Some(path) = std::env::var_os("PATH") else {
        return false;
    };
    std::env::split_paths(&path).any(|dir| dir.join("docker").is_file())
}

// The manifest ships next to the executable; fall back to the working
// directory when the executable path cannot be determined.
fn manifest_path(custom: Option<&Path>) -> PathBuf {
    if let Some(custom) = custom {
        return custom.to_path_buf();
    }
    match std::env::current_exe() {
        Ok(exe) => match exe.parent() {
            Some(dir) => dir.join(IMAGES_MANIFEST_FILE),
            None => PathBuf::from(IMAGES_MANIFEST_FILE),
        },
        Err(_) => PathBuf::from(IMAGES_MANIFEST_FILE),
    }
}

fn read_image_manifest(path: &Path) -> Result<ImageManifest> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("error reading the list of images from {}", path.display()))?;
    serde_yaml::from_str(&contents)
        .with_context(|| format!("error unmarshaling the list of images from {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn manifest_parses_names_and_versions() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "official_images:\n  etcd:\n    name: quay.io/coreos/etcd\n    version: v3.1.10\n  kube_proxy:\n    name: gcr.io/google-containers/kube-proxy\n    version: v1.8.3"
        )
        .unwrap();
        let manifest = read_image_manifest(file.path()).unwrap();
        assert_eq!(manifest.official_images.len(), 2);
        assert_eq!(
            manifest.official_images["etcd"].to_string(),
            "quay.io/coreos/etcd:v3.1.10"
        );
    }

    #[test]
    fn custom_manifest_path_is_used_verbatim() {
        let path = manifest_path(Some(Path::new("/tmp/images.yaml")));
        assert_eq!(path, PathBuf::from("/tmp/images.yaml"));
    }
}
