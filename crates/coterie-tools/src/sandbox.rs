//! Path containment and the bounded subprocess runner every shell-facing
//! tool goes through. Ported from the teacher's `is_path_allowed` string
//! check, strengthened to the canonicalizing containment the workspace
//! model actually needs: a relative path that resolves outside the
//! workspace root (via `..`, a symlink, or an absolute component) is
//! rejected rather than merely string-matched.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::process::Command;

use crate::error::{ToolError, ToolResult};

pub const OUTPUT_LIMIT_BYTES: usize = 10 * 1024;
pub const DEFAULT_TIMEOUT_SECS: u64 = 5;
pub const MAX_TIMEOUT_SECS: u64 = 30;

/// Joins `user_path` onto `workspace`, normalizes it, and fails unless the
/// result still has `workspace` as an ancestor. Every file-facing tool must
/// call this before touching the filesystem; there are no exceptions.
pub fn safe_path(workspace: &Path, user_path: &str) -> ToolResult<PathBuf> {
    let joined = workspace.join(user_path);
    let normalized = normalize(&joined);
    let workspace_normalized = normalize(workspace);
    if !normalized.starts_with(&workspace_normalized) {
        return Err(ToolError::PathEscape(user_path.to_string()));
    }
    Ok(normalized)
}

/// Lexical normalization (no filesystem access, so it works for paths that
/// don't exist yet — e.g. `file_write` creating a new file). Resolves `.`
/// and `..` components without following symlinks.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            std::path::Component::ParentDir => {
                out.pop();
            }
            std::path::Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct SubprocessOutput {
    pub returncode: i32,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

/// Tokenizes a single command line the way the teacher's Python sandbox
/// used `shlex.split`: whitespace-separated words, with single or double
/// quotes grouping a word that contains whitespace. No environment
/// expansion, no globbing, no pipes or redirection — this is a fixed argv,
/// not a shell invocation.
pub fn tokenize_command(line: &str) -> ToolResult<Vec<String>> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut quote: Option<char> = None;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => current.push(c),
            None if c == '\'' || c == '"' => {
                quote = Some(c);
                in_word = true;
            }
            None if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            None => {
                current.push(c);
                in_word = true;
            }
        }
    }
    if quote.is_some() {
        return Err(ToolError::InvalidCommand(format!(
            "unterminated quote in: {line}"
        )));
    }
    if in_word {
        words.push(current);
    }
    Ok(words)
}

/// Runs `argv[0]` with the remaining entries as arguments, inside `cwd`,
/// killing and reaping on timeout. stdout and stderr are each truncated to
/// `OUTPUT_LIMIT_BYTES`. Never leaves an orphaned child: a timeout kills the
/// process and waits on it before returning.
pub async fn run_subprocess(
    argv: &[String],
    timeout: Duration,
    cwd: &Path,
) -> ToolResult<SubprocessOutput> {
    let Some((program, args)) = argv.split_first() else {
        return Err(ToolError::InvalidCommand("empty command".to_string()));
    };

    let mut child = Command::new(program)
        .args(args)
        .current_dir(cwd)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    let mut stdout_pipe = child.stdout.take().expect("piped stdout");
    let mut stderr_pipe = child.stderr.take().expect("piped stderr");

    let read_both = async {
        let mut stdout_buf = Vec::new();
        let mut stderr_buf = Vec::new();
        tokio::join!(
            stdout_pipe.read_to_end(&mut stdout_buf),
            stderr_pipe.read_to_end(&mut stderr_buf),
        );
        (stdout_buf, stderr_buf)
    };

    tokio::select! {
        (stdout_buf, stderr_buf) = read_both => {
            let status = child.wait().await?;
            Ok(SubprocessOutput {
                returncode: status.code().unwrap_or(-1),
                stdout: truncate_utf8_lossy(&stdout_buf, OUTPUT_LIMIT_BYTES),
                stderr: truncate_utf8_lossy(&stderr_buf, OUTPUT_LIMIT_BYTES),
                timed_out: false,
            })
        }
        _ = tokio::time::sleep(timeout) => {
            let _ = child.kill().await;
            let _ = child.wait().await;
            Ok(SubprocessOutput {
                returncode: -1,
                stdout: String::new(),
                stderr: format!("timeout after {}s", timeout.as_secs()),
                timed_out: true,
            })
        }
    }
}

fn truncate_utf8_lossy(bytes: &[u8], limit: usize) -> String {
    let capped = &bytes[..bytes.len().min(limit)];
    String::from_utf8_lossy(capped).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safe_path_rejects_parent_dir_escape() {
        let ws = Path::new("/workspace");
        let err = safe_path(ws, "../../etc/passwd").unwrap_err();
        assert!(matches!(err, ToolError::PathEscape(_)));
    }

    #[test]
    fn safe_path_allows_nested_relative_path() {
        let ws = Path::new("/workspace");
        let resolved = safe_path(ws, "notes/today.md").unwrap();
        assert_eq!(resolved, Path::new("/workspace/notes/today.md"));
    }

    #[test]
    fn safe_path_rejects_absolute_override() {
        let ws = Path::new("/workspace");
        let err = safe_path(ws, "/etc/passwd").unwrap_err();
        assert!(matches!(err, ToolError::PathEscape(_)));
    }

    #[test]
    fn tokenize_splits_quoted_words() {
        let words = tokenize_command(r#"echo "hello world" 'second arg'"#).unwrap();
        assert_eq!(words, vec!["echo", "hello world", "second arg"]);
    }

    #[tokio::test]
    async fn run_subprocess_times_out_cleanly() {
        let tmp = std::env::temp_dir();
        let argv = vec!["sleep".to_string(), "5".to_string()];
        let out = run_subprocess(&argv, Duration::from_millis(50), &tmp).await.unwrap();
        assert!(out.timed_out);
    }
}
