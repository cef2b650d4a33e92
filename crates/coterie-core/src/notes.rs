//! Per-session task-context note: a short running log the CEO appends one
//! bullet to at the end of every turn and reads back at the start of the
//! next one's system prompt (§4.J steps 2 and 5, §6 persisted-state
//! layout). Capped at 2,600 characters; oldest bullets are evicted first,
//! mirroring how `coterie-memory`'s daily log and durable memory are
//! plain synchronous file operations rather than going through the store.

use std::fs;
use std::path::{Path, PathBuf};

const MAX_NOTE_CHARS: usize = 2_600;

fn note_path(workspace: &Path, session_id: &str) -> PathBuf {
    let suffix: String = session_id.chars().rev().take(8).collect::<String>().chars().rev().collect();
    let suffix = if suffix.is_empty() { "session".to_string() } else { suffix };
    workspace.join("context").join(format!("{suffix}.md"))
}

/// Reads the current note for `session_id`, or `None` if it doesn't exist
/// yet or is blank.
pub fn load_note(workspace: &Path, session_id: &str) -> Option<String> {
    let content = fs::read_to_string(note_path(workspace, session_id)).ok()?;
    if content.trim().is_empty() {
        None
    } else {
        Some(content)
    }
}

/// Appends one bullet line, then evicts whole bullets from the top until
/// the file is back under the character cap.
pub fn append_note_line(workspace: &Path, session_id: &str, line: &str) -> std::io::Result<()> {
    let path = note_path(workspace, session_id);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut content = fs::read_to_string(&path).unwrap_or_default();
    if !content.is_empty() && !content.ends_with('\n') {
        content.push('\n');
    }
    content.push_str("- ");
    content.push_str(line.replace('\n', " ").trim());
    content.push('\n');

    fs::write(&path, evict_oldest_bullets(&content, MAX_NOTE_CHARS))
}

fn evict_oldest_bullets(content: &str, max_chars: usize) -> String {
    if content.chars().count() <= max_chars {
        return content.to_string();
    }
    let mut lines: Vec<&str> = content.lines().collect();
    while lines.len() > 1 && lines.join("\n").chars().count() > max_chars {
        lines.remove(0);
    }
    let mut joined = lines.join("\n");
    joined.push('\n');
    joined
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn note_path_uses_last_eight_chars_of_session_id() {
        let dir = tempfile::tempdir().unwrap();
        let path = note_path(dir.path(), "session-abc12345678");
        assert_eq!(path.file_name().unwrap().to_str().unwrap(), "12345678.md");
    }

    #[test]
    fn append_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        append_note_line(dir.path(), "sess-0001", "delegated research task to researcher").unwrap();
        let note = load_note(dir.path(), "sess-0001").unwrap();
        assert!(note.contains("delegated research task to researcher"));
    }

    #[test]
    fn overflow_evicts_oldest_bullets_first() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..200 {
            append_note_line(dir.path(), "sess-overflow", &format!("bullet number {i} with some filler text to grow the file")).unwrap();
        }
        let note = load_note(dir.path(), "sess-overflow").unwrap();
        assert!(note.chars().count() <= MAX_NOTE_CHARS);
        assert!(!note.contains("bullet number 0 "));
        assert!(note.contains("bullet number 199"));
    }
}
