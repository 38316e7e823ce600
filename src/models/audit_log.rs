use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// A security- or grading-relevant action handed to the audit collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub actor_id: Option<Uuid>,
    pub action: String,
    pub entity_type: String,
    pub entity_id: Uuid,
    pub changes: Option<JsonValue>,
    pub created_at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn submission(
        actor_id: Option<Uuid>,
        action: &str,
        submission_id: Uuid,
        changes: Option<JsonValue>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            actor_id,
            action: action.to_string(),
            entity_type: "exam_submission".to_string(),
            entity_id: submission_id,
            changes,
            created_at,
        }
    }
}
