//! Audit log entry model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// One audited action, stored locally until shipped elsewhere.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub local_id: Uuid,
    pub user_id: String,
    pub action: String,
    pub resource_type: String,
    pub resource_id: String,
    pub workspace_id: Option<String>,
    pub method_name: String,
    pub metadata: serde_json::Value,
    pub created_utc: DateTime<Utc>,
}

impl AuditLogEntry {
    /// New entry stamped with a fresh id and the current time.
    pub fn new(
        user_id: impl Into<String>,
        action: impl Into<String>,
        resource_type: impl Into<String>,
        resource_id: impl Into<String>,
        method_name: impl Into<String>,
    ) -> Self {
        Self {
            local_id: Uuid::new_v4(),
            user_id: user_id.into(),
            action: action.into(),
            resource_type: resource_type.into(),
            resource_id: resource_id.into(),
            workspace_id: None,
            method_name: method_name.into(),
            metadata: serde_json::Value::Null,
            created_utc: Utc::now(),
        }
    }

    pub fn with_workspace(mut self, workspace_id: impl Into<String>) -> Self {
        self.workspace_id = Some(workspace_id.into());
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}
