//! # envgene
//!
//! Resolves environment configuration for a project from a remote EnvGene
//! effective-set repository: walks the deployment tree, fetches the
//! per-environment parameter and credential documents, transparently
//! decrypts SOPS-encrypted documents through the external `sops` tool, and
//! merges everything into a cached graph of environments, systems and
//! connections.
//!
//! ## Modules
//!
//! - `cache` - Resolution cache with per-environment single-flight population
//! - `config` - Typed configuration for repository access and decryption
//! - `decrypt` - SOPS encryption detection and decryption gate
//! - `descriptor` - Parameter/credential document parsing and merging
//! - `model` - Environment, system and connection entities
//! - `remote` - Repository document fetcher (GitLab raw-file API)
//! - `resolver` - The resolution pipeline tying the pieces together
//! - `scheduler` - Cleanup-job scheduler collaborator interface
//! - `subprocess` - Unified subprocess abstraction layer for testing
pub mod cache;
pub mod config;
pub mod decrypt;
pub mod descriptor;
pub mod error;
pub mod model;
pub mod remote;
pub mod resolver;
pub mod scheduler;
pub mod subprocess;

pub use error::{Error, Result};
pub use model::{Connection, ConnectionType, Environment, EnvironmentRef, System};
pub use resolver::EnvironmentResolver;
