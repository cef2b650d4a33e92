//! Security reviewer: a pure pattern engine, no model call, that vetoes
//! dangerous commands, redacts PII, and blocks references to sensitive
//! system paths. Grounded on
//! `original_source/multiclaws/roles/cso.py`.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use coterie_store::{AuditResult, Store};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Serialize)]
pub struct SecurityDecision {
    pub approved: bool,
    pub risk_level: RiskLevel,
    pub findings: Vec<String>,
    pub redacted_text: String,
}

static BLOCKED_COMMANDS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"\brm\s+-[rf]{1,2}\s+/",
        r"(?i)\brmdir\s+/s\b",
        r"\b(dd|shred)\b.*\b/dev/",
        r"\bcurl\b.*\|\s*(sh|bash|python)",
        r"\bwget\b.*-O\s*-\b.*\|\s*(sh|bash|python)",
        r"\bsudo\s+rm\b",
        r"\bchmod\s+777\b",
        r"\b(mkfs|fdisk|parted)\b",
        r"\b(nc|netcat)\b.*-e\b",
        r"\b(python|python3|perl|ruby)\s+-c\b.*exec",
        r">\s*/etc/(passwd|shadow|sudoers)",
        r"\bkill\s+-9\s+1\b",
        r":\(\)\{:\|:&\};:",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("static security pattern compiles"))
    .collect()
});

static PII_PATTERNS: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    vec![
        ("credit_card", Regex::new(r"\b(?:4[0-9]{12}(?:[0-9]{3})?|5[1-5][0-9]{14}|3[47][0-9]{13})\b").unwrap()),
        ("ssn", Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").unwrap()),
        ("api_key_sk", Regex::new(r"\bsk-[A-Za-z0-9]{20,}\b").unwrap()),
        ("api_key_gsk", Regex::new(r"\bgsk_[A-Za-z0-9]{20,}\b").unwrap()),
        ("private_key", Regex::new(r"-----BEGIN (RSA |EC )?PRIVATE KEY-----").unwrap()),
        ("aws_key", Regex::new(r"\bAKIA[0-9A-Z]{16}\b").unwrap()),
    ]
});

const BLOCKED_PATH_PREFIXES: &[&str] = &["/etc/", "/sys/", "/proc/", "/boot/", r"c:\windows\", r"c:\system32\"];

const HIGH_RISK_TOOLS: &[&str] = &["shell_exec", "run_python_equivalent", "file_write"];

pub struct SecurityReviewer;

impl Default for SecurityReviewer {
    fn default() -> Self {
        Self
    }
}

impl SecurityReviewer {
    pub fn new() -> Self {
        Self
    }

    /// Reviews free text (or a flattened tool-argument blob). `tool_name`
    /// empty means "review a task description," not a specific tool call.
    pub fn review(&self, text: &str, tool_name: &str) -> SecurityDecision {
        let mut findings = Vec::new();
        let mut risk = RiskLevel::Low;

        if tool_name.is_empty() || HIGH_RISK_TOOLS.contains(&tool_name) {
            for pattern in &*BLOCKED_COMMANDS {
                if pattern.is_match(text) {
                    findings.push(format!("blocked command pattern: {}", pattern.as_str()));
                    risk = RiskLevel::Critical;
                }
            }
        }

        let (redacted_text, pii_hits) = self.redact_pii(text);
        if !pii_hits.is_empty() {
            findings.extend(pii_hits);
            if risk < RiskLevel::High {
                risk = RiskLevel::High;
            }
        }

        let lower = text.to_lowercase();
        for prefix in BLOCKED_PATH_PREFIXES {
            if lower.contains(prefix) {
                findings.push(format!("blocked system path reference: {prefix}"));
                risk = RiskLevel::Critical;
            }
        }

        SecurityDecision {
            approved: risk != RiskLevel::Critical,
            risk_level: risk,
            findings,
            redacted_text,
        }
    }

    /// Reviews a specific tool call's arguments (flattened to text) and
    /// writes an audit row recording the decision. Every review writes an
    /// audit row; there is no silent path.
    pub async fn review_tool_args(
        &self,
        store: &Store,
        tool_name: &str,
        args: &serde_json::Value,
        agent_role: &str,
    ) -> SecurityDecision {
        let flattened = flatten_args_to_text(args);
        let decision = self.review(&flattened, tool_name);

        let result = if decision.approved { AuditResult::Allowed } else { AuditResult::Denied };
        let detail = if decision.findings.is_empty() {
            "clean".to_string()
        } else {
            decision.findings.join("; ")
        };
        let _ = store.audit(agent_role, tool_name, args, result, Some(&detail)).await;

        decision
    }

    fn redact_pii(&self, text: &str) -> (String, Vec<String>) {
        let mut redacted = text.to_string();
        let mut hits = Vec::new();
        for (name, pattern) in &*PII_PATTERNS {
            if pattern.is_match(&redacted) {
                redacted = pattern.replace_all(&redacted, format!("[REDACTED:{}]", name.to_uppercase())).into_owned();
                hits.push(format!("PII detected and redacted: {name}"));
            }
        }
        (redacted, hits)
    }
}

fn flatten_args_to_text(args: &serde_json::Value) -> String {
    match args {
        serde_json::Value::Object(map) => map
            .values()
            .map(|v| match v {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect::<Vec<_>>()
            .join(" "),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn rm_rf_root_is_critical_and_vetoed() {
        let reviewer = SecurityReviewer::new();
        let decision = reviewer.review("run this: rm -rf /", "shell_exec");
        assert_eq!(decision.risk_level, RiskLevel::Critical);
        assert!(!decision.approved);
    }

    #[test]
    fn credit_card_number_gets_redacted_not_vetoed() {
        let reviewer = SecurityReviewer::new();
        let decision = reviewer.review("card is 4111111111111111 please charge it", "");
        assert_eq!(decision.risk_level, RiskLevel::High);
        assert!(decision.approved);
        assert!(decision.redacted_text.contains("[REDACTED:CREDIT_CARD]"));
    }

    #[tokio::test]
    async fn review_tool_args_writes_an_audit_row_either_way() {
        let store = Store::open_in_memory().await.unwrap();
        let reviewer = SecurityReviewer::new();
        let decision = reviewer
            .review_tool_args(&store, "shell_exec", &json!({"command": "ls -la"}), "coder")
            .await;
        assert!(decision.approved);
    }
}
