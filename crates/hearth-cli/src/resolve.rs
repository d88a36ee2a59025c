//! Turning user-typed server references into entry ids.

use anyhow::{bail, Result};
use hearth_core::{EntryId, ManagedEntry};

/// Resolve `query` against the registered entries.
///
/// An exact id wins, then an exact (case-insensitive) name, then a unique id
/// prefix.
pub fn resolve_id(entries: &[ManagedEntry], query: &str) -> Result<EntryId> {
    let query = query.trim();
    if query.is_empty() {
        bail!("No server given");
    }

    if let Some(entry) = entries.iter().find(|e| e.id.as_str() == query) {
        return Ok(entry.id.clone());
    }

    let by_name: Vec<_> = entries
        .iter()
        .filter(|e| e.name.eq_ignore_ascii_case(query))
        .collect();
    if let [entry] = by_name.as_slice() {
        return Ok(entry.id.clone());
    }

    let by_prefix: Vec<_> = entries
        .iter()
        .filter(|e| e.id.as_str().starts_with(query))
        .collect();
    match by_prefix.as_slice() {
        [entry] => Ok(entry.id.clone()),
        [] if by_name.is_empty() => bail!("No server matches '{}'", query),
        _ => bail!(
            "'{}' is ambiguous; use a longer id prefix ({} matches)",
            query,
            by_prefix.len().max(by_name.len())
        ),
    }
}
