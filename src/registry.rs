//! Registry client for the artifact commands.
//!
//! Images go through the `docker` CLI, files through `oras`, and Harbor
//! projects through the Harbor v2 REST API. The registry is assumed to be
//! served over plain HTTP on the day-0 network.

use crate::runner;
use anyhow::{Context, Result};
use base64::prelude::*;
use executor::{AuthConfig, DEFAULT_REV, GlobalParams, RegistryClient, RegistryEndpoint};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

/// Project used for images without a namespace, as on Docker Hub.
const DEFAULT_PROJECT: &str = "library";

pub struct CliRegistry {
    agent: ureq::Agent,
    /// `host:port` for file artifacts, when configured
    file_registry: Option<String>,
    file_project: String,
}

impl CliRegistry {
    pub fn from_params(params: &GlobalParams) -> Self {
        Self {
            agent: ureq::Agent::new_with_defaults(),
            file_registry: params.registry_address().ok(),
            file_project: params.file_project().to_string(),
        }
    }

    fn file_registry(&self) -> Result<&str> {
        self.file_registry
            .as_deref()
            .context("providerIP and registryPort must be set to push files")
    }

    /// Create the Harbor project `name` unless it exists.
    fn ensure_project(&self, endpoint: &RegistryEndpoint, name: &str) -> Result<()> {
        let base = format!("http://{}/api/v2.0", endpoint.address());
        let auth = basic_auth(&endpoint.user, &endpoint.password);

        match self
            .agent
            .head(&format!("{base}/projects?project_name={name}"))
            .header("Authorization", &auth)
            .call()
        {
            Ok(_) => {
                log::debug!("harbor project {} exists", name);
                return Ok(());
            }
            Err(ureq::Error::StatusCode(404)) => {}
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to look up project {name}"));
            }
        }

        let body = serde_json::json!({
            "project_name": name,
            "metadata": { "public": "true" },
        });
        match self
            .agent
            .post(&format!("{base}/projects"))
            .header("Authorization", &auth)
            .send_json(&body)
        {
            // 409: created by someone else in the meantime
            Ok(_) | Err(ureq::Error::StatusCode(409)) => {
                log::info!("harbor project {} ready", name);
                Ok(())
            }
            Err(e) => Err(e).with_context(|| format!("Failed to create project {name}")),
        }
    }
}

impl RegistryClient for CliRegistry {
    fn get_auth_conf(&self, endpoint: &RegistryEndpoint) -> executor::Result<AuthConfig> {
        Ok(AuthConfig {
            server_address: endpoint.address(),
            username: endpoint.user.clone(),
            password: endpoint.password.clone(),
        })
    }

    fn tag_image_to_local(&self, image: &str, registry: &str) -> executor::Result<String> {
        let target = format!("{registry}/{}", harbor_path(image));
        runner::run_capture("docker", &["tag", image, &target]).map_err(registry_error)?;
        Ok(target)
    }

    fn image_push(&self, image: &str, auth: &AuthConfig) -> executor::Result<()> {
        runner::run_capture_in(
            None,
            "docker",
            &[
                "login",
                &auth.server_address,
                "--username",
                &auth.username,
                "--password-stdin",
            ],
            Some(&auth.password),
        )
        .map_err(registry_error)?;
        runner::run_capture("docker", &["push", image]).map_err(registry_error)?;
        Ok(())
    }

    fn map_image_url_create_harbor_project(
        &self,
        endpoint: &RegistryEndpoint,
        images: &[String],
    ) -> executor::Result<Vec<String>> {
        let projects: BTreeSet<String> = images.iter().map(|i| project_of(i)).collect();
        for project in &projects {
            self.ensure_project(endpoint, project)
                .map_err(registry_error)?;
        }
        Ok(images.to_vec())
    }

    fn push_file_to_repo(&self, path: &str, sub_ref: &str, rev: &str) -> executor::Result<String> {
        push_file(self, path, sub_ref, rev).map_err(registry_error)
    }

    fn pull_file_from_repo(&self, target: &str, oci_url: &str) -> executor::Result<()> {
        pull_file(target, oci_url).map_err(registry_error)
    }
}

fn push_file(client: &CliRegistry, path: &str, sub_ref: &str, rev: &str) -> Result<String> {
    require_oras()?;
    let file = crate::paths::expand(path);
    let name = file
        .file_name()
        .and_then(|n| n.to_str())
        .with_context(|| format!("{path} does not name a file"))?
        .to_string();
    let dir = file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));

    let sub_ref = if sub_ref.is_empty() { name.as_str() } else { sub_ref };
    let rev = if rev.is_empty() { DEFAULT_REV } else { rev };
    let reference = format!(
        "{}/{}/{}:{}",
        client.file_registry()?,
        client.file_project,
        sub_ref,
        rev
    );

    runner::run_capture_in(
        Some(dir),
        "oras",
        &["push", "--plain-http", &reference, &name],
        None,
    )?;
    Ok(reference)
}

fn pull_file(target: &str, oci_url: &str) -> Result<()> {
    require_oras()?;
    let reference = oci_reference(oci_url);
    let target = crate::paths::expand(target);
    let parent = target
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    fs::create_dir_all(parent)?;

    let staging = parent.join(format!(".edgekit-pull-{}", std::process::id()));
    fs::create_dir_all(&staging)?;
    let staging_arg = staging.to_string_lossy().into_owned();

    let result = runner::run_capture("oras", &["pull", "--plain-http", reference, "-o", &staging_arg])
        .and_then(|_| single_file(&staging))
        .and_then(|pulled| {
            fs::rename(&pulled, &target)
                .with_context(|| format!("Failed to move artifact to {}", target.display()))
        });
    let _ = fs::remove_dir_all(&staging);
    result
}

/// The one file an artifact pull produced.
fn single_file(dir: &Path) -> Result<PathBuf> {
    let mut files = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file());
    let first = files.next().context("artifact contained no file")?;
    if files.next().is_some() {
        anyhow::bail!("artifact contained more than one file");
    }
    Ok(first)
}

fn require_oras() -> Result<()> {
    if !runner::command_exists("oras") {
        anyhow::bail!("oras is required for file artifacts but was not found in PATH");
    }
    Ok(())
}

fn registry_error(err: anyhow::Error) -> executor::Error {
    executor::Error::Registry(format!("{err:#}"))
}

/// Strip the `oci://` scheme.
fn oci_reference(url: &str) -> &str {
    url.strip_prefix("oci://").unwrap_or(url)
}

/// Repository path of `image` inside Harbor: the source registry host is
/// dropped and images without a namespace go to `library`.
pub fn harbor_path(image: &str) -> String {
    let path = match image.split_once('/') {
        Some((first, rest)) if is_registry_host(first) => rest,
        _ => image,
    };
    if path.contains('/') {
        path.to_string()
    } else {
        format!("{DEFAULT_PROJECT}/{path}")
    }
}

/// Harbor project an image is filed under.
pub fn project_of(image: &str) -> String {
    harbor_path(image)
        .split('/')
        .next()
        .unwrap_or(DEFAULT_PROJECT)
        .to_string()
}

fn is_registry_host(segment: &str) -> bool {
    segment.contains('.') || segment.contains(':') || segment == "localhost"
}

fn basic_auth(user: &str, password: &str) -> String {
    format!("Basic {}", BASE64_STANDARD.encode(format!("{user}:{password}")))
}
