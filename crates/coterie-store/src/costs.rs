use chrono::{Duration, Local, Utc};
use rusqlite::params;

use crate::error::StoreResult;
use crate::Store;

impl Store {
    /// Cost records are written before the router returns success to the
    /// caller, so a successful call is always visible in the daily total by
    /// the time the caller sees the response.
    pub async fn log_cost(
        &self,
        agent_role: &str,
        provider: &str,
        model: &str,
        input_tokens: i64,
        output_tokens: i64,
        cost_usd: f64,
        latency_ms: i64,
    ) -> StoreResult<()> {
        let conn = self.conn.lock().await;
        let now = Utc::now();
        conn.execute(
            "INSERT INTO cost_records (agent_role, provider, model, input_tokens, output_tokens,
                cost_usd, latency_ms, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![agent_role, provider, model, input_tokens, output_tokens, cost_usd, latency_ms, now.to_rfc3339()],
        )?;
        Ok(())
    }

    pub async fn get_daily_cost(&self) -> StoreResult<f64> {
        let since = start_of_local_day();
        self.sum_cost_since(since).await
    }

    pub async fn get_weekly_cost(&self) -> StoreResult<f64> {
        let since = start_of_local_day() - Duration::days(6);
        self.sum_cost_since(since).await
    }

    async fn sum_cost_since(&self, since: chrono::DateTime<Utc>) -> StoreResult<f64> {
        let conn = self.conn.lock().await;
        let total: Option<f64> = conn.query_row(
            "SELECT SUM(cost_usd) FROM cost_records WHERE created_at >= ?1",
            params![since.to_rfc3339()],
            |row| row.get(0),
        )?;
        Ok(total.unwrap_or(0.0))
    }
}

fn start_of_local_day() -> chrono::DateTime<Utc> {
    let local_today = Local::now().date_naive();
    let local_midnight = local_today.and_hms_opt(0, 0, 0).expect("valid midnight");
    Local
        .from_local_datetime(&local_midnight)
        .single()
        .unwrap_or_else(Local::now)
        .with_timezone(&Utc)
}

use chrono::TimeZone;
