//! Environment, system and connection entities.
//!
//! The graph is built once per environment by the descriptor parser and
//! published behind `Arc` by the resolution cache; nothing mutates it after
//! publication. References to not-yet-resolved environments are represented
//! explicitly by [`EnvironmentRef::Unresolved`] and upgraded by an explicit
//! resolution call rather than on access.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A named deployment target composed of systems and their connections.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Environment {
    pub id: Uuid,
    pub name: String,
    pub cluster_name: String,
    pub project_id: Uuid,
    pub systems: Vec<System>,
}

impl Environment {
    /// Find a system by its identifier.
    pub fn system_by_id(&self, system_id: Uuid) -> Option<&System> {
        self.systems.iter().find(|s| s.id == system_id)
    }

    /// Find a system by name.
    pub fn system_by_name(&self, name: &str) -> Option<&System> {
        self.systems.iter().find(|s| s.name == name)
    }
}

/// A logical component within an environment. System names are unique
/// within one environment; the parser merges repeated names instead of
/// duplicating entries.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct System {
    pub id: Uuid,
    pub name: String,
    pub connections: Vec<Connection>,
}

impl System {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            connections: Vec::new(),
        }
    }
}

/// A typed, named access method of a system. Parameter keys and values are
/// opaque strings; validation is the caller's job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Connection {
    pub id: Uuid,
    pub system_id: Uuid,
    pub name: String,
    pub connection_type: ConnectionType,
    pub parameters: BTreeMap<String, String>,
}

/// Closed set of recognized connection types. An unrecognized type string
/// is a typed parse error, never a silently dropped field.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConnectionType {
    Http,
    Db,
    Ssh,
    Kafka,
}

impl ConnectionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionType::Http => "HTTP",
            ConnectionType::Db => "DB",
            ConnectionType::Ssh => "SSH",
            ConnectionType::Kafka => "KAFKA",
        }
    }
}

impl fmt::Display for ConnectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
#[error("unknown connection type: {0}")]
pub struct UnknownConnectionType(pub String);

impl FromStr for ConnectionType {
    type Err = UnknownConnectionType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "HTTP" => Ok(ConnectionType::Http),
            "DB" => Ok(ConnectionType::Db),
            "SSH" => Ok(ConnectionType::Ssh),
            "KAFKA" => Ok(ConnectionType::Kafka),
            _ => Err(UnknownConnectionType(s.to_string())),
        }
    }
}

/// Two-state reference to an environment: either just the identifier of a
/// discovered-but-unresolved environment, or the fully resolved value.
#[derive(Debug, Clone)]
pub enum EnvironmentRef {
    Unresolved { id: Uuid },
    Resolved(Arc<Environment>),
}

impl EnvironmentRef {
    pub fn id(&self) -> Uuid {
        match self {
            EnvironmentRef::Unresolved { id } => *id,
            EnvironmentRef::Resolved(env) => env.id,
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, EnvironmentRef::Resolved(_))
    }

    /// Return the resolved environment, if this reference carries one.
    pub fn resolved(&self) -> Option<Arc<Environment>> {
        match self {
            EnvironmentRef::Unresolved { .. } => None,
            EnvironmentRef::Resolved(env) => Some(Arc::clone(env)),
        }
    }
}
