//! # Manifest
//!
//! Trust manifest for user-defined spec documents.
//!
//! A spec is trusted by recording the BLAKE3 hash of its bytes. Before a
//! spec runs, its current hash is checked against the recorded one:
//! - a matching hash means the spec is unchanged since it was reviewed
//! - a different hash means someone edited it after review
//! - no entry means it was never reviewed
//!
//! Entries are keyed by canonical path and stored as TOML.
//!
//! ## Example
//!
//! ```no_run
//! use manifest::{TrustManifest, Verdict};
//! use std::path::Path;
//!
//! let mut trust = TrustManifest::open(Path::new("/etc/edgekit/trusted-specs.toml"))?;
//! let spec = Path::new("install.yaml");
//! let bytes = std::fs::read(spec)?;
//!
//! let key = manifest::spec_key(spec)?;
//! trust.trust(&key, &bytes);
//! trust.save()?;
//!
//! assert_eq!(trust.verify(&key, &bytes), Verdict::Trusted);
//! # Ok::<(), manifest::Error>(())
//! ```

mod error;

pub use error::{Error, Result};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// File name of the manifest inside the config directory.
pub const MANIFEST_FILE: &str = "trusted-specs.toml";

/// One approved spec.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustEntry {
    /// BLAKE3 hash of the spec bytes, hex encoded
    pub hash: String,
    /// When the spec was approved
    pub trusted_at: DateTime<Utc>,
}

/// Outcome of checking a spec against the manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Recorded hash matches
    Trusted,
    /// Recorded hash differs from the current content
    Mismatch { expected: String, actual: String },
    /// No entry for this spec
    Unknown,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ManifestFile {
    #[serde(default)]
    specs: BTreeMap<String, TrustEntry>,
}

/// The set of approved specs, backed by a TOML file.
#[derive(Debug)]
pub struct TrustManifest {
    path: PathBuf,
    entries: BTreeMap<String, TrustEntry>,
}

impl TrustManifest {
    /// Load the manifest at `path`.
    ///
    /// A missing file is an empty manifest; it is created on `save`.
    pub fn open(path: &Path) -> Result<Self> {
        let entries = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let file: ManifestFile = toml::from_str(&content).map_err(|source| Error::Parse {
                path: path.to_path_buf(),
                source,
            })?;
            file.specs
        } else {
            BTreeMap::new()
        };

        Ok(Self {
            path: path.to_path_buf(),
            entries,
        })
    }

    /// Write the manifest back to disk, creating parent directories.
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = ManifestFile {
            specs: self.entries.clone(),
        };
        let content = toml::to_string_pretty(&file)?;
        std::fs::write(&self.path, content)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record `content` as the approved version of `key`.
    pub fn trust(&mut self, key: &str, content: &[u8]) -> &TrustEntry {
        let entry = TrustEntry {
            hash: hash_bytes(content),
            trusted_at: Utc::now(),
        };
        self.entries.insert(key.to_string(), entry);
        &self.entries[key]
    }

    /// Forget `key`. Returns whether an entry was removed.
    pub fn revoke(&mut self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Check `content` against the entry for `key`.
    pub fn verify(&self, key: &str, content: &[u8]) -> Verdict {
        match self.entries.get(key) {
            None => Verdict::Unknown,
            Some(entry) => {
                let actual = hash_bytes(content);
                if actual == entry.hash {
                    Verdict::Trusted
                } else {
                    Verdict::Mismatch {
                        expected: entry.hash.clone(),
                        actual,
                    }
                }
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&TrustEntry> {
        self.entries.get(key)
    }

    /// Entries in key order.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &TrustEntry)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// BLAKE3 hash of `content`, hex encoded.
pub fn hash_bytes(content: &[u8]) -> String {
    blake3::hash(content).to_hex().to_string()
}

/// Manifest key for a spec: its canonical path.
pub fn spec_key(path: &Path) -> Result<String> {
    if !path.exists() {
        return Err(Error::PathNotFound(path.to_path_buf()));
    }
    let canonical = path.canonicalize()?;
    Ok(canonical.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_open_missing_file_is_empty() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested").join(MANIFEST_FILE);

        let manifest = TrustManifest::open(&path).unwrap();
        assert!(manifest.is_empty());
        assert!(!path.exists());

        manifest.save().unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_verdicts() {
        let tmp = TempDir::new().unwrap();
        let mut manifest = TrustManifest::open(&tmp.path().join(MANIFEST_FILE)).unwrap();

        assert_eq!(manifest.verify("/specs/a.yaml", b"steps: []"), Verdict::Unknown);

        manifest.trust("/specs/a.yaml", b"steps: []");
        assert_eq!(manifest.verify("/specs/a.yaml", b"steps: []"), Verdict::Trusted);

        match manifest.verify("/specs/a.yaml", b"steps: [rm -rf /]") {
            Verdict::Mismatch { expected, actual } => {
                assert_eq!(expected, hash_bytes(b"steps: []"));
                assert_ne!(expected, actual);
            }
            other => panic!("unexpected verdict: {other:?}"),
        }
    }

    #[test]
    fn test_save_and_reload() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(MANIFEST_FILE);

        let mut manifest = TrustManifest::open(&path).unwrap();
        let recorded = manifest.trust("/specs/b.yaml", b"hello").clone();
        manifest.save().unwrap();

        let reloaded = TrustManifest::open(&path).unwrap();
        assert_eq!(reloaded.len(), 1);
        assert_eq!(reloaded.get("/specs/b.yaml"), Some(&recorded));
        assert_eq!(reloaded.verify("/specs/b.yaml", b"hello"), Verdict::Trusted);
    }

    #[test]
    fn test_revoke() {
        let tmp = TempDir::new().unwrap();
        let mut manifest = TrustManifest::open(&tmp.path().join(MANIFEST_FILE)).unwrap();
        manifest.trust("/specs/c.yaml", b"x");

        assert!(manifest.revoke("/specs/c.yaml"));
        assert!(!manifest.revoke("/specs/c.yaml"));
        assert_eq!(manifest.verify("/specs/c.yaml", b"x"), Verdict::Unknown);
    }

    #[test]
    fn test_entries_are_sorted() {
        let tmp = TempDir::new().unwrap();
        let mut manifest = TrustManifest::open(&tmp.path().join(MANIFEST_FILE)).unwrap();
        manifest.trust("/z.yaml", b"z");
        manifest.trust("/a.yaml", b"a");

        let keys: Vec<&str> = manifest.entries().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["/a.yaml", "/z.yaml"]);
    }

    #[test]
    fn test_spec_key_is_canonical() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("spec.yaml");
        std::fs::write(&path, "x").unwrap();

        let dotted = tmp.path().join(".").join("spec.yaml");
        assert_eq!(spec_key(&dotted).unwrap(), spec_key(&path).unwrap());
        assert!(matches!(
            spec_key(&tmp.path().join("nope.yaml")),
            Err(Error::PathNotFound(_))
        ));
    }

    #[test]
    fn test_corrupt_manifest_is_parse_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(MANIFEST_FILE);
        std::fs::write(&path, "specs = [[[").unwrap();
        assert!(matches!(TrustManifest::open(&path), Err(Error::Parse { .. })));
    }
}
