use chrono::Utc;
use rusqlite::params;
use serde_json::Value;

use crate::error::StoreResult;
use crate::types::AuditResult;
use crate::Store;

impl Store {
    pub async fn audit(
        &self,
        agent_role: &str,
        tool_name: &str,
        arguments: &Value,
        result: AuditResult,
        detail: Option<&str>,
    ) -> StoreResult<()> {
        let conn = self.conn.lock().await;
        let now = Utc::now();
        conn.execute(
            "INSERT INTO audit_records (agent_role, tool_name, arguments_json, result, detail, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                agent_role,
                tool_name,
                serde_json::to_string(arguments)?,
                result.as_str(),
                detail,
                now.to_rfc3339(),
            ],
        )?;
        Ok(())
    }
}
