//! Per-entry lifecycle bookkeeping: loading flags and toggle intents.
//!
//! The loading set is the only mutual-exclusion primitive between lifecycle
//! actions. An entry that is starting or stopping accepts no further toggle
//! until its flag is cleared, either by the action itself (stops, failed
//! starts) or by reconciliation (confirmed or abandoned starts).

use crate::reconcile::EntryStatus;
use crate::registry::EntryId;
use serde::Serialize;
use std::collections::HashMap;
use tokio::time::Instant;

/// Which lifecycle action holds an entry's loading flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Start,
    Stop,
}

/// An in-flight lifecycle action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadingAction {
    pub kind: ActionKind,
    pub since: Instant,
}

/// Entries currently starting or stopping.
#[derive(Debug, Default, Clone)]
pub struct LoadingSet {
    actions: HashMap<EntryId, LoadingAction>,
}

impl LoadingSet {
    /// Flag `id` as busy. Returns false if it already was.
    pub fn try_begin(&mut self, id: &EntryId, kind: ActionKind, now: Instant) -> bool {
        if self.actions.contains_key(id) {
            return false;
        }
        self.actions
            .insert(id.clone(), LoadingAction { kind, since: now });
        true
    }

    pub fn finish(&mut self, id: &EntryId) -> Option<LoadingAction> {
        self.actions.remove(id)
    }

    pub fn contains(&self, id: &EntryId) -> bool {
        self.actions.contains_key(id)
    }

    pub fn get(&self, id: &EntryId) -> Option<&LoadingAction> {
        self.actions.get(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &EntryId> {
        self.actions.keys()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

/// Who owns a running entry's process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Ownership {
    /// Launched by this controller; `pid` is recorded.
    Managed { pid: u32 },
    /// Running, but started by someone else. Never stopped by us.
    External,
    /// Not running.
    NotRunning,
}

impl Ownership {
    pub fn of(status: EntryStatus, pid: Option<u32>) -> Self {
        match (status, pid) {
            (EntryStatus::Running, Some(pid)) => Ownership::Managed { pid },
            (EntryStatus::Running, None) => Ownership::External,
            _ => Ownership::NotRunning,
        }
    }
}

/// Why a toggle did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IgnoreReason {
    /// A start or stop is already in flight.
    Loading,
    /// The entry is misconfigured.
    Error,
    /// The entry runs outside this controller.
    External,
    /// A launched process is still recorded but liveness cannot be told.
    Unconfirmed,
}

/// What a toggle resolved to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum ToggleOutcome {
    Ignored { reason: IgnoreReason },
    /// The entry is a managed, running process. Call `stop` to confirm.
    ConfirmStop { pid: u32 },
    /// A start was issued and the process spawned.
    Started { pid: u32 },
}

/// The intent behind a toggle, before any side effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleIntent {
    Ignore(IgnoreReason),
    ConfirmStop { pid: u32 },
    Start,
}

/// Classify a toggle request from the entry's current state.
pub fn toggle_intent(status: EntryStatus, pid: Option<u32>, loading: bool) -> ToggleIntent {
    if loading {
        return ToggleIntent::Ignore(IgnoreReason::Loading);
    }
    if status == EntryStatus::Error {
        return ToggleIntent::Ignore(IgnoreReason::Error);
    }
    match Ownership::of(status, pid) {
        Ownership::Managed { pid } => ToggleIntent::ConfirmStop { pid },
        Ownership::External => ToggleIntent::Ignore(IgnoreReason::External),
        // Starting again would orphan the recorded process.
        Ownership::NotRunning if status == EntryStatus::Unknown && pid.is_some() => {
            ToggleIntent::Ignore(IgnoreReason::Unconfirmed)
        }
        Ownership::NotRunning => ToggleIntent::Start,
    }
}
