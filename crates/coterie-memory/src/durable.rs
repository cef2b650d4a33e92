use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::Local;
use regex::Regex;
use sha2::{Digest, Sha256};

use crate::error::MemoryResult;

const SECTION_KEY_FACTS: &str = "KEY FACTS";
const SECTION_USER_PREFS: &str = "USER PREFERENCES";
const SECTION_OPEN_TASKS: &str = "OPEN TASKS";
const SECTION_CONCLUSIONS: &str = "CONCLUSIONS";
const STANDARD_SECTIONS: [&str; 4] = [SECTION_KEY_FACTS, SECTION_USER_PREFS, SECTION_OPEN_TASKS, SECTION_CONCLUSIONS];

/// L3: `{workspace}/MEMORY.md`. A plain file a user can read and edit
/// directly; agentic compaction only ever upserts whole `## heading`
/// sections, so hand-written content outside those sections survives.
pub fn memory_file_path(workspace: &Path) -> PathBuf {
    workspace.join("MEMORY.md")
}

pub fn load_durable_memory(workspace: &Path) -> MemoryResult<String> {
    Ok(std::fs::read_to_string(memory_file_path(workspace)).unwrap_or_default())
}

fn section_heading_re() -> Regex {
    Regex::new(r"(?m)^## (.+?)$").expect("static section heading pattern")
}

fn parse_sections(text: &str) -> BTreeMap<String, String> {
    let re = section_heading_re();
    let matches: Vec<_> = re.find_iter(text).collect();
    let mut sections = BTreeMap::new();
    for (i, m) in matches.iter().enumerate() {
        let heading = m.as_str().trim_start_matches("## ").trim().to_string();
        let start = m.end();
        let end = matches.get(i + 1).map(|n| n.start()).unwrap_or(text.len());
        sections.insert(heading, text[start..end].trim().to_string());
    }
    sections
}

fn build_file(sections: &BTreeMap<String, String>) -> String {
    let mut out = String::from("# Coterie — Persistent Memory\n");
    out.push_str(&format!("_Last updated: {}_\n", Local::now().format("%Y-%m-%d %H:%M")));

    let ordered = STANDARD_SECTIONS.iter().filter(|h| sections.contains_key(**h));
    let others = sections.keys().filter(|h| !STANDARD_SECTIONS.contains(&h.as_str()));

    for heading in ordered.chain(others) {
        if let Some(content) = sections.get(*heading) {
            if !content.is_empty() {
                out.push_str(&format!("\n## {heading}\n\n{content}\n"));
            }
        }
    }
    out
}

fn sha256_hex(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Upserts one `## heading` section. Skipped (returns `false`) if the new
/// content hashes identically to what's already there, so a re-run of the
/// same compaction doesn't churn the file's `Last updated` timestamp for no
/// reason.
pub fn upsert_memory_section(workspace: &Path, heading: &str, content: &str) -> MemoryResult<bool> {
    let content = content.trim();
    if content.is_empty() {
        return Ok(false);
    }
    let path = memory_file_path(workspace);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let existing_text = std::fs::read_to_string(&path).unwrap_or_default();
    let mut sections = parse_sections(&existing_text);

    let old_hash = sha256_hex(sections.get(heading).map(String::as_str).unwrap_or(""));
    let new_hash = sha256_hex(content);
    if old_hash == new_hash {
        return Ok(false);
    }

    sections.insert(heading.to_string(), content.to_string());
    std::fs::write(&path, build_file(&sections))?;
    Ok(true)
}

/// Parses a compaction result (four markdown sections) and merges each
/// non-empty one into `MEMORY.md`. Returns which headings actually changed.
pub fn merge_compaction_result(workspace: &Path, compaction_text: &str) -> MemoryResult<BTreeMap<String, bool>> {
    let sections = parse_sections(compaction_text);
    let mut results = BTreeMap::new();
    for (heading, content) in sections {
        if !content.trim().is_empty() {
            let changed = upsert_memory_section(workspace, &heading, &content)?;
            results.insert(heading, changed);
        }
    }
    Ok(results)
}

pub struct DurableMemoryStats {
    pub exists: bool,
    pub size_bytes: u64,
    pub sections: Vec<String>,
}

pub fn durable_memory_stats(workspace: &Path) -> MemoryResult<DurableMemoryStats> {
    let path = memory_file_path(workspace);
    match std::fs::read_to_string(&path) {
        Ok(text) => Ok(DurableMemoryStats {
            exists: true,
            size_bytes: text.len() as u64,
            sections: parse_sections(&text).into_keys().collect(),
        }),
        Err(_) => Ok(DurableMemoryStats { exists: false, size_bytes: 0, sections: Vec::new() }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upsert_creates_then_updates_a_section() {
        let dir = tempfile::tempdir().unwrap();
        let changed = upsert_memory_section(dir.path(), SECTION_KEY_FACTS, "user runs rust 1.80").unwrap();
        assert!(changed);
        let text = load_durable_memory(dir.path()).unwrap();
        assert!(text.contains("user runs rust 1.80"));

        let changed_again = upsert_memory_section(dir.path(), SECTION_KEY_FACTS, "user runs rust 1.80").unwrap();
        assert!(!changed_again, "identical content must be a no-op");
    }

    #[test]
    fn standard_sections_are_ordered_before_custom_ones() {
        let dir = tempfile::tempdir().unwrap();
        upsert_memory_section(dir.path(), "CUSTOM NOTE", "something").unwrap();
        upsert_memory_section(dir.path(), SECTION_CONCLUSIONS, "ship it").unwrap();
        let text = load_durable_memory(dir.path()).unwrap();
        let conclusions_pos = text.find(SECTION_CONCLUSIONS).unwrap();
        let custom_pos = text.find("CUSTOM NOTE").unwrap();
        assert!(conclusions_pos < custom_pos);
    }
}
