//! Schedule configuration of test-data cleanup jobs.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ScheduleConfig;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum CleanupKind {
    Sql,
    Date,
    Class,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupJobConfig {
    pub id: Uuid,
    pub enabled: bool,
    #[serde(default)]
    pub schedule: String,
    pub kind: CleanupKind,
    #[serde(default)]
    pub query_timeout: Option<u32>,
    #[serde(default)]
    pub shared: bool,
}

impl ScheduleConfig for CleanupJobConfig {
    fn id(&self) -> Uuid {
        self.id
    }

    fn schedule(&self) -> &str {
        &self.schedule
    }

    fn enabled(&self) -> bool {
        self.enabled
    }
}
