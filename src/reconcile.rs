//! Widget-side bookkeeping for applying sync responses.
//!
//! This models the client store, not the server: the server only produces the
//! remaps. It is a library API for widget hosts and is driven from tests.
//!
//! Remaps coming back from the server re-key records in place. Re-keying is
//! not an edit: it never marks a record dirty, so applying a response can not
//! produce another outbound change.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::error::{Result, SyncError};
use crate::model::{ChangeSet, IdRemap, Record, SyncResponse, WidgetDependency};

#[derive(Debug, Clone, PartialEq)]
pub struct StoredDependency {
    pub dependency: WidgetDependency,
    /// Edited locally since the last successful sync.
    pub dirty: bool,
    /// Not yet persisted; its id is a phantom id.
    pub phantom: bool,
}

#[derive(Debug, Clone, Default)]
pub struct DependencyStore {
    records: BTreeMap<String, StoredDependency>,
}

impl DependencyStore {
    /// Start from a load response. Everything is clean.
    pub fn load(dependencies: Vec<WidgetDependency>) -> Self {
        let records = dependencies
            .into_iter()
            .map(|dependency| {
                let stored = StoredDependency {
                    dependency,
                    dirty: false,
                    phantom: false,
                };
                (stored.dependency.id.clone(), stored)
            })
            .collect();
        Self { records }
    }

    pub fn get(&self, id: &str) -> Option<&WidgetDependency> {
        self.records.get(id).map(|r| &r.dependency)
    }

    pub fn is_dirty(&self, id: &str) -> bool {
        self.records.get(id).is_some_and(|r| r.dirty)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Add a dependency drawn in the widget under a phantom id.
    pub fn insert_phantom(&mut self, dependency: WidgetDependency) -> Result<()> {
        if self.records.contains_key(&dependency.id) {
            return Err(SyncError::MalformedRecord(format!(
                "dependency id {} already in use",
                dependency.id
            )));
        }
        self.records.insert(
            dependency.id.clone(),
            StoredDependency {
                dependency,
                dirty: true,
                phantom: true,
            },
        );
        Ok(())
    }

    /// Apply a local edit. Returns false when no such record exists.
    pub fn edit(&mut self, id: &str, f: impl FnOnce(&mut WidgetDependency)) -> bool {
        match self.records.get_mut(id) {
            Some(stored) => {
                f(&mut stored.dependency);
                stored.dirty = true;
                true
            }
            None => false,
        }
    }

    /// Outbound changes: phantom records as adds, edited persisted records as
    /// updates.
    pub fn pending(&self) -> Result<ChangeSet> {
        let mut changes = ChangeSet::default();
        for stored in self.records.values().filter(|r| r.dirty) {
            let mut record = as_record(&stored.dependency)?;
            if stored.phantom {
                if let Some(id) = record.remove("id") {
                    record.insert("$PhantomId".to_string(), id);
                }
                changes.added.push(record);
            } else {
                changes.updated.push(record);
            }
        }
        Ok(changes)
    }

    /// Point dependencies at the real ids of tasks that were just created.
    pub fn retarget_tasks(&mut self, remaps: &[IdRemap]) {
        for remap in remaps {
            let IdRemap::Created { phantom_id, id } = remap else {
                continue;
            };
            for stored in self.records.values_mut() {
                let dep = &mut stored.dependency;
                if dep.from == *phantom_id {
                    dep.from = id.clone();
                }
                if dep.to == *phantom_id {
                    dep.to = id.clone();
                }
            }
        }
    }

    /// Move the record at `old_id` to `new_id`.
    ///
    /// Only happens when `old_id` is present and `new_id` is free; returns
    /// whether the swap took place.
    pub fn rekey(&mut self, old_id: &str, new_id: &str) -> bool {
        if old_id == new_id || self.records.contains_key(new_id) {
            log::warn!("not re-keying dependency {old_id}: {new_id} is taken");
            return false;
        }
        let Some(mut stored) = self.records.remove(old_id) else {
            log::debug!("no dependency {old_id} to re-key");
            return false;
        };
        stored.dependency.id = new_id.to_string();
        stored.phantom = false;
        self.records.insert(new_id.to_string(), stored);
        true
    }

    /// Apply a sync response. On success every remap is applied and all
    /// records become clean; a failed sync leaves the store untouched.
    pub fn apply(&mut self, response: &SyncResponse) -> usize {
        if !response.success {
            return 0;
        }
        if let Some(tasks) = &response.tasks {
            self.retarget_tasks(&tasks.rows);
        }
        let mut applied = 0;
        if let Some(dependencies) = &response.dependencies {
            for remap in &dependencies.rows {
                let swapped = match remap {
                    IdRemap::Created { phantom_id, id } => self.rekey(phantom_id, id),
                    IdRemap::Replaced { old_id, new_id } => self.rekey(old_id, new_id),
                };
                applied += usize::from(swapped);
            }
        }
        for stored in self.records.values_mut() {
            stored.dirty = false;
        }
        applied
    }
}

fn as_record(dependency: &WidgetDependency) -> Result<Record> {
    match serde_json::to_value(dependency) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(SyncError::MalformedRecord(other.to_string())),
        Err(e) => Err(SyncError::MalformedRecord(e.to_string())),
    }
}
