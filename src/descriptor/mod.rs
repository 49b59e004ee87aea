//! Parsing and merging of environment descriptor documents.
//!
//! A parameters document declares the systems of one environment under the
//! `ATP_ENVGENE_CONFIGURATION` / `effectiveSet` keys:
//!
//! ```yaml
//! ATP_ENVGENE_CONFIGURATION:
//!   effectiveSet:
//!     billing-gateway:
//!       HTTP:
//!         url: "https://billing.example.com"
//!         timeout: "30000"
//!       DB:
//!         jdbc_url: "jdbc:postgresql://db:5432/billing"
//! ```
//!
//! A credentials document overlays secret parameter values onto systems
//! matched by name. Parsing is best-effort per environment: malformed
//! top-level content degrades to an empty system list with a warning so one
//! bad document never blocks sibling environments.

use std::collections::BTreeMap;
use std::str::FromStr;

use serde_yaml::Value;
use uuid::Uuid;

use crate::model::{Connection, ConnectionType, System};

/// The single well-known top-level key; all other top-level content is
/// ignored.
pub const CONFIGURATION_KEY: &str = "ATP_ENVGENE_CONFIGURATION";
/// The effective-set section listing the deployment entries.
pub const EFFECTIVE_SET_KEY: &str = "effectiveSet";

/// Parse a parameters document into its ordered system list.
pub fn parse_parameters_document(content: &str) -> Vec<System> {
    let doc: Value = match serde_yaml::from_str(content) {
        Ok(doc) => doc,
        Err(e) => {
            tracing::warn!("Unparseable parameters document, skipping: {}", e);
            return Vec::new();
        }
    };
    parse_systems(&doc)
}

/// Parse a credentials document into overlay systems. Accepts the same
/// wrapped shape as the parameters document; when the wrapper keys are
/// absent the document root is treated as the systems mapping directly.
pub fn parse_credentials_document(content: &str) -> Vec<System> {
    let doc: Value = match serde_yaml::from_str(content) {
        Ok(doc) => doc,
        Err(e) => {
            tracing::warn!("Unparseable credentials document, skipping overlay: {}", e);
            return Vec::new();
        }
    };

    let mut root = &doc;
    if let Some(inner) = root.get(CONFIGURATION_KEY) {
        root = inner;
    }
    if let Some(inner) = root.get(EFFECTIVE_SET_KEY) {
        root = inner;
    }
    match root.as_mapping() {
        Some(map) => parse_systems_map(map),
        None => Vec::new(),
    }
}

/// Extract systems from a parsed parameters document.
pub fn parse_systems(doc: &Value) -> Vec<System> {
    let configuration = match doc.get(CONFIGURATION_KEY) {
        Some(configuration) => configuration,
        None => {
            tracing::debug!("No {} key, environment has no systems", CONFIGURATION_KEY);
            return Vec::new();
        }
    };

    if !configuration.is_mapping() {
        tracing::warn!(
            "{} holds a non-mapping value, treating environment as unconfigured",
            CONFIGURATION_KEY
        );
        return Vec::new();
    }

    let effective_set = match configuration.get(EFFECTIVE_SET_KEY).and_then(Value::as_mapping) {
        Some(map) => map,
        None => {
            tracing::debug!("No effective set, environment has no systems");
            return Vec::new();
        }
    };

    parse_systems_map(effective_set)
}

/// Turn a systems mapping (name -> connections) into entities, preserving
/// insertion order. A repeated system name merges into the earlier entry.
fn parse_systems_map(map: &serde_yaml::Mapping) -> Vec<System> {
    let mut systems: Vec<System> = Vec::new();

    for (name, declared) in map {
        let name = match name.as_str() {
            Some(name) => name,
            None => {
                tracing::warn!("Skipping system with non-string name: {:?}", name);
                continue;
            }
        };

        let declared = match declared.as_mapping() {
            Some(map) => map,
            None => {
                tracing::warn!("Skipping system '{}': connections are not a mapping", name);
                continue;
            }
        };

        let system_id = Uuid::new_v4();
        let mut connections = Vec::new();
        for (type_token, params) in declared {
            match parse_connection(system_id, type_token, params) {
                Some(connection) => connections.push(connection),
                None => continue,
            }
        }

        match systems.iter_mut().find(|s| s.name == name) {
            Some(existing) => merge_connections(existing, connections),
            None => systems.push(System {
                id: system_id,
                name: name.to_string(),
                connections,
            }),
        }
    }

    systems
}

/// Parse one declared connection. An unrecognized type skips this single
/// connection, never the whole system.
fn parse_connection(system_id: Uuid, type_token: &Value, params: &Value) -> Option<Connection> {
    let token = match type_token.as_str() {
        Some(token) => token,
        None => {
            tracing::warn!("Skipping connection with non-string type: {:?}", type_token);
            return None;
        }
    };

    let connection_type = match ConnectionType::from_str(token) {
        Ok(connection_type) => connection_type,
        Err(e) => {
            tracing::warn!("Skipping connection '{}': {}", token, e);
            return None;
        }
    };

    let mut parameters = BTreeMap::new();
    match params.as_mapping() {
        Some(map) => {
            for (key, value) in map {
                let key = match key.as_str() {
                    Some(key) => key.to_string(),
                    None => {
                        tracing::warn!("Skipping non-string parameter key in '{}'", token);
                        continue;
                    }
                };
                match scalar_to_string(value) {
                    Some(value) => {
                        parameters.insert(key, value);
                    }
                    None => {
                        tracing::warn!("Skipping non-scalar parameter '{}' in '{}'", key, token);
                    }
                }
            }
        }
        None => {
            tracing::warn!("Connection '{}' has no parameter mapping", token);
        }
    }

    Some(Connection {
        id: Uuid::new_v4(),
        system_id,
        name: token.to_string(),
        connection_type,
        parameters,
    })
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null => Some(String::new()),
        _ => None,
    }
}

/// Overlay credential systems onto the base list. Systems are matched by
/// name; matched systems merge connection-by-connection, unmatched overlay
/// systems are appended after all base systems in overlay order.
pub fn merge_credentials(mut base: Vec<System>, overlay: Vec<System>) -> Vec<System> {
    for system in overlay {
        match base.iter_mut().find(|s| s.name == system.name) {
            Some(existing) => merge_connections(existing, system.connections),
            None => base.push(system),
        }
    }
    base
}

/// Merge incoming connections into a system: parameter values of a
/// same-named connection are replaced or added, new connections appended.
fn merge_connections(system: &mut System, incoming: Vec<Connection>) {
    for mut connection in incoming {
        match system
            .connections
            .iter_mut()
            .find(|c| c.name == connection.name)
        {
            Some(existing) => {
                existing.parameters.extend(connection.parameters);
            }
            None => {
                connection.system_id = system.id;
                system.connections.push(connection);
            }
        }
    }
}
