use std::path::{Path, PathBuf};

use chrono::{Duration, Local, NaiveDate};

use crate::error::MemoryResult;

/// L2: `{workspace}/memory/YYYY-MM-DD.md`. A session's first turns of the
/// day find today's (and yesterday's) log already on disk; agentic
/// compaction appends to it as it learns things worth keeping past one
/// session but not worth promoting to durable memory yet.
pub fn memory_dir(workspace: &Path) -> MemoryResult<PathBuf> {
    let dir = workspace.join("memory");
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

pub fn daily_log_path(workspace: &Path, day: NaiveDate) -> MemoryResult<PathBuf> {
    Ok(memory_dir(workspace)?.join(format!("{day}.md")))
}

/// Appends a timestamped section to today's log. Called after a successful
/// compaction run, never mid-conversation.
pub fn append_to_daily_log(workspace: &Path, heading: &str, content: &str) -> MemoryResult<()> {
    let path = daily_log_path(workspace, Local::now().date_naive())?;
    let timestamp = Local::now().format("%H:%M");
    let title = if heading.is_empty() {
        format!("[{timestamp}] Compaction")
    } else {
        format!("[{timestamp}] {heading}")
    };
    let entry = format!("\n## {title}\n\n{}\n", content.trim());
    use std::io::Write;
    let mut file = std::fs::OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(entry.as_bytes())?;
    Ok(())
}

/// Concatenates the last `n_days` of logs, oldest first, for the context
/// builder's L2 slot. Missing or empty days are skipped silently; a brand
/// new workspace returns an empty string rather than an error.
pub fn load_recent_daily_logs(workspace: &Path, n_days: i64) -> MemoryResult<String> {
    let today = Local::now().date_naive();
    let mut sections = Vec::new();
    for offset in (0..n_days).rev() {
        let day = today - Duration::days(offset);
        let path = daily_log_path(workspace, day)?;
        if let Ok(text) = std::fs::read_to_string(&path) {
            let trimmed = text.trim();
            if !trimmed.is_empty() {
                sections.push(format!("# Daily Log: {day}\n\n{trimmed}"));
            }
        }
    }
    Ok(sections.join("\n\n---\n\n"))
}

pub struct DailyLogStats {
    pub exists: bool,
    pub size_bytes: u64,
    pub sections: usize,
}

pub fn daily_log_stats(workspace: &Path) -> MemoryResult<DailyLogStats> {
    let path = daily_log_path(workspace, Local::now().date_naive())?;
    match std::fs::read_to_string(&path) {
        Ok(text) => Ok(DailyLogStats {
            exists: true,
            size_bytes: text.len() as u64,
            sections: text.matches("\n## ").count(),
        }),
        Err(_) => Ok(DailyLogStats { exists: false, size_bytes: 0, sections: 0 }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_then_load_round_trips_todays_entry() {
        let dir = tempfile::tempdir().unwrap();
        append_to_daily_log(dir.path(), "Findings", "agreed on postgres over sqlite").unwrap();
        let combined = load_recent_daily_logs(dir.path(), 2).unwrap();
        assert!(combined.contains("agreed on postgres over sqlite"));
        assert!(combined.contains("Findings"));
    }

    #[test]
    fn missing_logs_produce_empty_string_not_error() {
        let dir = tempfile::tempdir().unwrap();
        let combined = load_recent_daily_logs(dir.path(), 3).unwrap();
        assert_eq!(combined, "");
    }
}
