//! Plain-text rendering of controller state.

use hearth_core::{ActionKind, EntryState, EntryStatus, Ownership, PendingSelection};
use std::fmt::Write;

const ID_WIDTH: usize = 8;

fn short_id(id: &str) -> &str {
    id.get(..ID_WIDTH).unwrap_or(id)
}

/// Human-readable status, including ownership and in-flight actions.
pub fn status_label(state: &EntryState) -> String {
    match state.loading {
        Some(ActionKind::Start) => return "starting".to_string(),
        Some(ActionKind::Stop) => return "stopping".to_string(),
        None => {}
    }
    match (state.view.status, state.ownership) {
        (EntryStatus::Running, Ownership::Managed { pid }) => format!("running (pid {})", pid),
        (EntryStatus::Running, _) => "running (external)".to_string(),
        (EntryStatus::Error, _) => match &state.view.error_message {
            Some(err) => format!("error: {}", err.message),
            None => "error".to_string(),
        },
        (status, _) => status.to_string(),
    }
}

/// One row per entry, with a header.
pub fn entries_table(states: &[EntryState]) -> String {
    if states.is_empty() {
        return "No servers registered. Add one with `hearth add <path>`.\n".to_string();
    }

    let name_width = states
        .iter()
        .map(|s| s.view.name.chars().count())
        .max()
        .unwrap_or(0)
        .max(4);
    let artifact_width = states
        .iter()
        .map(|s| s.view.artifact_name.chars().count())
        .max()
        .unwrap_or(0)
        .max(8);

    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<ID_WIDTH$}  {:<name_width$}  {:<artifact_width$}  {:>5}  STATUS",
        "ID", "NAME", "ARTIFACT", "PORT"
    );
    for state in states {
        let view = &state.view;
        let port = if view.settings.port == 0 {
            "-".to_string()
        } else {
            view.settings.port.to_string()
        };
        let _ = writeln!(
            out,
            "{:<ID_WIDTH$}  {:<name_width$}  {:<artifact_width$}  {:>5}  {}",
            short_id(view.id.as_str()),
            view.name,
            view.artifact_name,
            port,
            status_label(state)
        );
    }
    out
}

/// Numbered list of candidate artifacts for an interactive choice.
pub fn candidates(pending: &PendingSelection) -> String {
    let mut out = format!(
        "{} contains several jars. Which one starts the server?\n",
        pending.path.display()
    );
    for (i, artifact) in pending.candidate_artifacts.iter().enumerate() {
        let _ = writeln!(out, "  {}) {}", i + 1, artifact);
    }
    out
}

/// Map a numbered answer (or a literal file name) onto a candidate.
///
/// An empty answer means "cancel".
pub fn pick<'a>(candidates: &'a [String], answer: &str) -> Option<&'a str> {
    let answer = answer.trim();
    if answer.is_empty() {
        return None;
    }
    if let Ok(n) = answer.parse::<usize>() {
        return n.checked_sub(1).and_then(|i| candidates.get(i)).map(String::as_str);
    }
    candidates.iter().find(|c| c.as_str() == answer).map(String::as_str)
}
