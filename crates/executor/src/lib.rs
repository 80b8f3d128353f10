//! # Executor
//!
//! Runs a declarative list of steps across a set of machines.
//!
//! A run starts from the global parameter file, which declares the nodes
//! and their roles. Each step selects nodes by role, each command narrows
//! that selection with a `when` guard, renders its arguments per node and
//! runs on every remaining node concurrently.
//!
//! ## Core Concepts
//!
//! - **Node**: a machine reached through a [`Transport`]; the local machine
//!   is always present as the day-0 node
//! - **NodeRegistry**: nodes indexed by IP and role
//! - **Selector**: role algebra (`anyOf`, `allOf`, `noneOf`) picking a step's nodes
//! - **TemplateOverride**: per-node rendering of escaped `\{\{ ... \}\}` markers
//! - **Dispatcher**: runs one command kind on a node set
//! - **Executor**: the step interpreter tying it all together
//!
//! ## Example
//!
//! ```no_run
//! use executor::{Executor, GlobalParams, NoProgress, TrustGate};
//! use std::path::Path;
//!
//! let params = GlobalParams::from_yaml_str(&std::fs::read_to_string("params.yaml")?)?;
//! let executor = Executor::new(params, None)?;
//! let summary = executor.run_spec_file(Path::new("spec.yaml"), &TrustGate::open(), &mut NoProgress)?;
//! println!("{} steps", summary.steps);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Collaborators
//!
//! - [`RegistryClient`]: image and file registry operations
//! - [`Progress`]: receives progress updates
//!
//! Neither pulls in a UI or a registry SDK; the binary provides both.

pub mod cancel;
pub mod client;
pub mod dispatch;
pub mod error;
pub mod executor;
pub mod params;
pub mod pipe;
pub mod registry;
pub mod selector;
pub mod spec;
pub mod template;
pub mod transport;

#[cfg(test)]
mod testing;

pub use cancel::CancelToken;
pub use client::{AuthConfig, DEFAULT_REV, NoRegistry, RegistryClient, oci_file_url};
pub use dispatch::Dispatcher;
pub use error::{Error, ErrorCategory, Result};
pub use executor::{Executor, NoProgress, Progress, RunSummary};
pub use params::{GlobalParams, NodeConfig, RegistryEndpoint};
pub use registry::{LOCAL_IP, Node, NodeRegistry, ROLE_DAY0, UNKNOWN_ROLE};
pub use selector::{NodeSelector, NodeSet, Selector};
pub use spec::{Command, CommandKind, Step, TrustGate, load_spec_from_file};
pub use template::TemplateOverride;
pub use transport::{AttachIo, LocalTransport, SshConfig, SshTransport, Transport};
