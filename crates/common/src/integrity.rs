//! Referential integrity between kinds
//!
//! Checks run against the tables before any mutation; the back-reference
//! helpers run only after every check has passed, so a failed request never
//! leaves partial state behind.

use crate::record::Record;
use crate::store::Tables;
use crate::types::{Kind, Reference};
use crate::{Error, Result};
use tracing::{debug, warn};

/// Strip a fully-qualified path down to its final segment
pub fn normalize_key(raw: &str) -> &str {
    let trimmed = raw.trim().trim_end_matches('/');
    trimmed.rsplit('/').next().unwrap_or(trimmed)
}

/// Resolve a foreign key against the owning table
pub fn resolve(tables: &Tables, kind: Kind, raw: &str) -> Result<String> {
    let key = normalize_key(raw);
    if key.is_empty() {
        return Err(Error::invalid(format!("empty {} reference", kind)));
    }
    if tables.contains(kind, key) {
        Ok(key.to_string())
    } else {
        Err(Error::not_found(kind, key))
    }
}

/// Resolve every entry of a foreign-key list
pub fn resolve_all(tables: &Tables, kind: Kind, raws: &[String]) -> Result<Vec<String>> {
    let mut keys = Vec::with_capacity(raws.len());
    for raw in raws {
        let key = resolve(tables, kind, raw)?;
        if !keys.contains(&key) {
            keys.push(key);
        }
    }
    Ok(keys)
}

/// Validate that every reference points at an existing record
pub fn check_references(tables: &Tables, references: &[Reference]) -> Result<()> {
    match references.iter().find(|r| !tables.contains(r.kind, &r.key)) {
        Some(missing) => Err(Error::not_found(missing.kind, missing.key.clone())),
        None => Ok(()),
    }
}

/// Entry a record leaves in its parents' back-reference lists: the key,
/// prefixed with the record's region or zone when it has one
pub fn back_ref(record: &dyn Record) -> Reference {
    match record.location() {
        Some(location) => Reference::new(record.kind(), format!("{}/{}", location, record.key())),
        None => Reference::new(record.kind(), record.key()),
    }
}

/// Add `child` to the back-reference list of each parent
pub fn register_back_refs(tables: &mut Tables, child: &Reference, parents: &[Reference]) {
    for parent in parents {
        let Some(record) = tables.get_mut(parent.kind, &parent.key) else {
            continue;
        };
        if let Some(children) = record.as_record_mut().child_keys_mut(child.kind) {
            if !children.contains(&child.key) {
                children.push(child.key.clone());
                debug!("Linked {} under {}", child, parent);
            }
        }
    }
}

/// Remove `child` from the back-reference list of each parent
pub fn unregister_back_refs(tables: &mut Tables, child: &Reference, parents: &[Reference]) {
    for parent in parents {
        let Some(record) = tables.get_mut(parent.kind, &parent.key) else {
            continue;
        };
        if let Some(children) = record.as_record_mut().child_keys_mut(child.kind) {
            children.retain(|key| key != &child.key);
            debug!("Unlinked {} from {}", child, parent);
        }
    }
}

/// Move back-references after a record's parents changed
pub fn relink_back_refs(
    tables: &mut Tables,
    child: &Reference,
    old_parents: &[Reference],
    new_parents: &[Reference],
) {
    let removed: Vec<Reference> = old_parents
        .iter()
        .filter(|p| !new_parents.contains(p))
        .cloned()
        .collect();
    let added: Vec<Reference> = new_parents
        .iter()
        .filter(|p| !old_parents.contains(p))
        .cloned()
        .collect();
    unregister_back_refs(tables, child, &removed);
    register_back_refs(tables, child, &added);
}

/// Refuse deletion of `target` while it is in use or has live dependents
pub fn check_deletable(tables: &Tables, target: &Reference) -> Result<()> {
    let record = tables
        .get(target.kind, &target.key)
        .ok_or_else(|| Error::not_found(target.kind, target.key.clone()))?;

    if let Some(reason) = record.as_record().in_use() {
        warn!("Refusing to delete {}: {}", target, reason);
        return Err(Error::DependencyViolation {
            kind: target.kind,
            key: target.key.clone(),
            reason,
        });
    }

    let dependent = tables
        .iter_all()
        .filter(|r| !(r.kind() == target.kind && r.key() == target.key))
        .find(|r| r.as_record().depends_on(target));
    if let Some(dependent) = dependent {
        warn!("Refusing to delete {}: {} depends on it", target, dependent.kind());
        return Err(Error::DependencyViolation {
            kind: target.kind,
            key: target.key.clone(),
            reason: format!(
                "{} '{}' depends on it",
                dependent.kind(),
                dependent.key()
            ),
        });
    }

    Ok(())
}
