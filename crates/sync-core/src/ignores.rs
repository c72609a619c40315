//! Daemon ignore rules that keep the engine's own files out of sync.
//!
//! The state file is per-device; syncing it would make every device fight
//! over the same document.

use crate::paths;

/// Comment line marking the block of rules managed here.
pub const RULES_HEADER: &str = "# --- sync-agent state ---";

/// Rules excluding the state file at `state_path` (vault-relative), with the
/// folder prefix applied.
pub fn required_rules(prefix: &str, state_path: &str) -> Vec<String> {
    let state_path = paths::normalize(state_path);
    let (dir, file_name) = match state_path.rfind('/') {
        Some(pos) => (&state_path[..=pos], &state_path[pos + 1..]),
        None => ("", state_path.as_str()),
    };
    let stem = file_name
        .rsplit_once('.')
        .map_or(file_name, |(stem, _)| stem);

    let join = |rule: String| paths::normalize(&format!("{}{}", prefix, rule));
    vec![
        join(state_path.clone()),
        join(format!("{}{}.sync-conflict*", dir, stem)),
        join(format!("{}{}{}.tmp", dir, paths::DAEMON_TEMP_MARKER, file_name)),
        join(format!("**/{}", file_name)),
    ]
}

/// Append the header and any missing `required` rules to `current`.
///
/// Returns the new list, or `None` when nothing had to change.
pub fn merge_rules(current: &[String], required: &[String]) -> Option<Vec<String>> {
    let mut lines = current.to_vec();
    let mut modified = false;

    if !lines.iter().any(|line| line.trim() == RULES_HEADER) {
        lines.push(String::new());
        lines.push(RULES_HEADER.to_string());
        modified = true;
    }

    for rule in required {
        if !lines.contains(rule) {
            lines.push(rule.clone());
            modified = true;
        }
    }

    modified.then_some(lines)
}

/// Split edited text into rules: lines trimmed, blank lines dropped.
pub fn parse_rules(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn render_rules(rules: &[String]) -> String {
    rules.join("\n")
}
