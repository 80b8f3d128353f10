//! Registry collaborator interface.
//!
//! The executor decides *when* images and files move; how they move
//! (docker, oras, the Harbor API) is up to the implementation handed in by
//! the caller.

use crate::error::{Error, Result};
use crate::params::RegistryEndpoint;

/// Revision used by `pullFile` when none is given.
pub const DEFAULT_REV: &str = "0.0.0";

/// Credentials for pushing to a registry.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct AuthConfig {
    pub server_address: String,
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("server_address", &self.server_address)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Image and file registry operations used by the artifact commands.
pub trait RegistryClient: Send + Sync {
    /// Build push credentials for the registry.
    fn get_auth_conf(&self, endpoint: &RegistryEndpoint) -> Result<AuthConfig>;

    /// Tag `image` for `registry` (`host:port`) and return the new reference.
    fn tag_image_to_local(&self, image: &str, registry: &str) -> Result<String>;

    fn image_push(&self, image: &str, auth: &AuthConfig) -> Result<()>;

    /// Ensure a project exists for every image and return the image
    /// references rewritten into those projects.
    fn map_image_url_create_harbor_project(
        &self,
        endpoint: &RegistryEndpoint,
        images: &[String],
    ) -> Result<Vec<String>>;

    /// Push a local file as an OCI artifact and return its reference.
    fn push_file_to_repo(&self, path: &str, sub_ref: &str, rev: &str) -> Result<String>;

    /// Fetch the artifact at `oci_url` into `target`.
    fn pull_file_from_repo(&self, target: &str, oci_url: &str) -> Result<()>;
}

/// Client for runs that use no registry commands.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoRegistry;

impl NoRegistry {
    fn refuse<T>(operation: &str) -> Result<T> {
        Err(Error::Registry(format!(
            "{operation}: no registry client configured"
        )))
    }
}

impl RegistryClient for NoRegistry {
    fn get_auth_conf(&self, _endpoint: &RegistryEndpoint) -> Result<AuthConfig> {
        Self::refuse("get auth config")
    }

    fn tag_image_to_local(&self, _image: &str, _registry: &str) -> Result<String> {
        Self::refuse("tag image")
    }

    fn image_push(&self, _image: &str, _auth: &AuthConfig) -> Result<()> {
        Self::refuse("push image")
    }

    fn map_image_url_create_harbor_project(
        &self,
        _endpoint: &RegistryEndpoint,
        _images: &[String],
    ) -> Result<Vec<String>> {
        Self::refuse("create project")
    }

    fn push_file_to_repo(&self, _path: &str, _sub_ref: &str, _rev: &str) -> Result<String> {
        Self::refuse("push file")
    }

    fn pull_file_from_repo(&self, _target: &str, _oci_url: &str) -> Result<()> {
        Self::refuse("pull file")
    }
}

/// `oci://<registry>/<project>/<sub_ref>:<rev>`, with an empty `rev`
/// replaced by [`DEFAULT_REV`].
pub fn oci_file_url(registry: &str, project: &str, sub_ref: &str, rev: &str) -> String {
    let rev = if rev.is_empty() { DEFAULT_REV } else { rev };
    format!("oci://{registry}/{project}/{sub_ref}:{rev}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_oci_file_url_defaults_rev() {
        assert_eq!(
            oci_file_url("10.0.0.1:5000", "edgekit", "bin/kubectl", ""),
            "oci://10.0.0.1:5000/edgekit/bin/kubectl:0.0.0"
        );
        assert_eq!(
            oci_file_url("10.0.0.1:5000", "files", "kubectl", "1.28.2"),
            "oci://10.0.0.1:5000/files/kubectl:1.28.2"
        );
    }

    #[test]
    fn test_no_registry_refuses() {
        let err = NoRegistry.pull_file_from_repo("/tmp/x", "oci://a/b/c:1").unwrap_err();
        assert!(matches!(err, Error::Registry(_)));
    }

    #[test]
    fn test_auth_debug_redacts_password() {
        let auth = AuthConfig {
            server_address: "10.0.0.1:5000".into(),
            username: "admin".into(),
            password: "Harbor12345".into(),
        };
        assert!(!format!("{auth:?}").contains("Harbor12345"));
    }
}
