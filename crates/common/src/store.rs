//! In-memory resource store
//!
//! One table per kind, all behind a single lock so that integrity checks
//! spanning several kinds observe one consistent snapshot.

use crate::record::ResourceRecord;
use crate::types::Kind;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Records of one kind, kept in insertion order
#[derive(Debug, Clone, Default)]
struct KindTable {
    order: Vec<String>,
    rows: HashMap<String, ResourceRecord>,
}

/// All kind tables
#[derive(Debug, Clone, Default)]
pub struct Tables {
    tables: HashMap<Kind, KindTable>,
}

impl Tables {
    pub fn get(&self, kind: Kind, key: &str) -> Option<&ResourceRecord> {
        self.tables.get(&kind)?.rows.get(key)
    }

    pub fn get_mut(&mut self, kind: Kind, key: &str) -> Option<&mut ResourceRecord> {
        self.tables.get_mut(&kind)?.rows.get_mut(key)
    }

    pub fn contains(&self, kind: Kind, key: &str) -> bool {
        self.get(kind, key).is_some()
    }

    /// Insert or replace a record under its own kind and key.
    ///
    /// A replaced record keeps its original position.
    pub fn put(&mut self, record: ResourceRecord) -> Option<ResourceRecord> {
        let kind = record.kind();
        let key = record.key().to_string();
        let table = self.tables.entry(kind).or_default();
        let previous = table.rows.insert(key.clone(), record);
        if previous.is_none() {
            table.order.push(key);
        }
        previous
    }

    pub fn delete(&mut self, kind: Kind, key: &str) -> Option<ResourceRecord> {
        let table = self.tables.get_mut(&kind)?;
        let removed = table.rows.remove(key)?;
        table.order.retain(|k| k != key);
        debug!("Deleted {} {}", kind, key);
        Some(removed)
    }

    /// Records of one kind in insertion order
    pub fn values(&self, kind: Kind) -> impl Iterator<Item = &ResourceRecord> + '_ {
        self.tables
            .get(&kind)
            .into_iter()
            .flat_map(|table| table.order.iter().filter_map(move |key| table.rows.get(key)))
    }

    /// Records of every kind
    pub fn iter_all(&self) -> impl Iterator<Item = &ResourceRecord> + '_ {
        Kind::ALL.into_iter().flat_map(move |kind| self.values(kind))
    }

    pub fn len(&self, kind: Kind) -> usize {
        self.tables.get(&kind).map_or(0, |t| t.rows.len())
    }

    pub fn is_empty(&self) -> bool {
        self.tables.values().all(|t| t.rows.is_empty())
    }

    pub fn find_by_name(&self, kind: Kind, name: &str) -> Option<&ResourceRecord> {
        self.values(kind).find(|r| r.meta().name == name)
    }

    pub fn clear(&mut self) {
        self.tables.clear();
    }
}

/// Shared handle to the tables, owned by the hosting process
#[derive(Clone, Default)]
pub struct Store {
    inner: Arc<RwLock<Tables>>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read(&self) -> RwLockReadGuard<'_, Tables> {
        self.inner.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, Tables> {
        self.inner.write()
    }

    /// Drop every record of every kind
    pub fn reset(&self) {
        self.inner.write().clear();
        info!("Resource store reset");
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tables = self.inner.read();
        let mut map = f.debug_map();
        for kind in Kind::ALL {
            map.entry(&kind, &tables.len(kind));
        }
        map.finish()
    }
}
