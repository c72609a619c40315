//! Recent activity built from the daemon's event log.

use chrono::{DateTime, FixedOffset};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;

use crate::api::DaemonEvent;
use crate::monitor::updated_files;

/// Event types the history is built from.
pub const HISTORY_EVENT_TYPES: [&str; 2] = ["ItemFinished", "LocalIndexUpdated"];

/// How many events to request from the daemon.
pub const HISTORY_EVENT_LIMIT: u32 = 100;

/// How many items to keep.
pub const HISTORY_SIZE: usize = 10;

/// A local index update this close (in event ids) to an incoming item for
/// the same path is the echo of that item, not a local change.
const ECHO_WINDOW: u64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryAction {
    Added,
    Updated,
    Deleted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Received from another device
    In,
    /// Local change sent out
    Out,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryItem {
    pub id: u64,
    /// Last path segment
    pub filename: String,
    /// Folder-relative path as reported by the daemon
    pub path: String,
    pub action: HistoryAction,
    pub direction: Direction,
    pub timestamp: Option<DateTime<FixedOffset>>,
}

struct Entry {
    item: HistoryItem,
    /// Id of the last incoming item for this path, 0 if none
    last_in_id: u64,
}

/// Build the most recent activity for `folder`, newest first.
///
/// Paths containing any of `ignore_patterns` are skipped.
pub fn build_history(
    events: &[DaemonEvent],
    folder: &str,
    ignore_patterns: &[String],
) -> Vec<HistoryItem> {
    let ignored = |path: &str| ignore_patterns.iter().any(|p| path.contains(p.as_str()));
    let mut by_path: HashMap<String, Entry> = HashMap::new();

    for event in events {
        if event.folder() != Some(folder) {
            continue;
        }

        match event.kind.as_str() {
            "ItemFinished" => {
                let path = event
                    .data
                    .get("item")
                    .and_then(Value::as_str)
                    .unwrap_or("Unknown");
                if ignored(path) {
                    continue;
                }
                let action = match event.data.get("action").and_then(Value::as_str) {
                    Some("delete") => HistoryAction::Deleted,
                    _ => HistoryAction::Updated,
                };
                by_path.insert(
                    path.to_string(),
                    Entry {
                        item: item(event, path, action, Direction::In),
                        last_in_id: event.id,
                    },
                );
            }
            "LocalIndexUpdated" => {
                for path in updated_files(&event.data) {
                    if ignored(path) {
                        continue;
                    }
                    let last_in_id = by_path.get(path).map_or(0, |prev| prev.last_in_id);
                    let direction =
                        if last_in_id > 0 && event.id.saturating_sub(last_in_id) < ECHO_WINDOW {
                            Direction::In
                        } else {
                            Direction::Out
                        };
                    by_path.insert(
                        path.to_string(),
                        Entry {
                            item: item(event, path, HistoryAction::Updated, direction),
                            last_in_id,
                        },
                    );
                }
            }
            _ => {}
        }
    }

    let mut items: Vec<HistoryItem> = by_path.into_values().map(|entry| entry.item).collect();
    items.sort_by(|a, b| b.id.cmp(&a.id).then_with(|| a.path.cmp(&b.path)));
    items.truncate(HISTORY_SIZE);
    items
}

fn item(event: &DaemonEvent, path: &str, action: HistoryAction, direction: Direction) -> HistoryItem {
    let filename = path
        .rsplit(['/', '\\'])
        .next()
        .filter(|name| !name.is_empty())
        .unwrap_or(path)
        .to_string();
    HistoryItem {
        id: event.id,
        filename,
        path: path.to_string(),
        action,
        direction,
        timestamp: event.time,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ev(id: u64, kind: &str, data: Value) -> DaemonEvent {
        DaemonEvent {
            id,
            kind: kind.to_string(),
            time: None,
            data,
        }
    }

    fn finished(id: u64, path: &str, action: &str) -> DaemonEvent {
        ev(id, "ItemFinished", json!({"folder": "f1", "item": path, "action": action}))
    }

    fn local(id: u64, paths: &[&str]) -> DaemonEvent {
        ev(id, "LocalIndexUpdated", json!({"folder": "f1", "filenames": paths}))
    }

    #[test]
    fn test_incoming_and_outgoing() {
        let events = vec![
            finished(1, "Notes/in.md", "update"),
            finished(2, "gone.md", "delete"),
            local(3, &["Notes/out.md"]),
        ];

        let history = build_history(&events, "f1", &[]);

        assert_eq!(history.len(), 3);
        assert_eq!(history[0].filename, "out.md");
        assert_eq!(history[0].direction, Direction::Out);
        assert_eq!(history[1].action, HistoryAction::Deleted);
        assert_eq!(history[2].filename, "in.md");
        assert_eq!(history[2].direction, Direction::In);
    }

    #[test]
    fn test_echo_of_incoming_item_stays_incoming() {
        let events = vec![finished(10, "a.md", "update"), local(13, &["a.md"])];

        let history = build_history(&events, "f1", &[]);

        assert_eq!(history.len(), 1);
        assert_eq!(history[0].id, 13);
        assert_eq!(history[0].direction, Direction::In);
    }

    #[test]
    fn test_late_local_update_is_outgoing() {
        let events = vec![finished(10, "a.md", "update"), local(15, &["a.md"])];

        let history = build_history(&events, "f1", &[]);

        assert_eq!(history[0].direction, Direction::Out);
    }

    #[test]
    fn test_other_folder_and_ignored_paths_skipped() {
        let events = vec![
            ev(1, "ItemFinished", json!({"folder": "f2", "item": "a.md", "action": "update"})),
            finished(2, ".obsidian/workspace.json", "update"),
            local(3, &["b.md", ".DS_Store"]),
        ];
        let patterns = vec![".obsidian".to_string(), ".DS_Store".to_string()];

        let history = build_history(&events, "f1", &patterns);

        assert_eq!(history.len(), 1);
        assert_eq!(history[0].filename, "b.md");
    }

    #[test]
    fn test_truncates_to_newest_ten() {
        let events: Vec<DaemonEvent> = (1..=15)
            .map(|i| local(i * 10, &[format!("note-{i}.md").as_str()]))
            .collect();

        let history = build_history(&events, "f1", &[]);

        assert_eq!(history.len(), HISTORY_SIZE);
        assert_eq!(history[0].id, 150);
        assert_eq!(history[9].id, 60);
    }
}
