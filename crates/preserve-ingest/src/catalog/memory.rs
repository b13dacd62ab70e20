use super::{Catalog, CatalogChecksum, CatalogFile, CatalogObject, CatalogStorageRecord};
use crate::models::PremisEvent;
use async_trait::async_trait;
use preserve_common::{PreserveError, Result};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

#[derive(Default)]
struct State {
    next_id: i64,
    objects: HashMap<String, CatalogObject>,
    files: HashMap<String, CatalogFile>,
    events: HashMap<String, PremisEvent>,
}

impl State {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn record_event(&mut self, event: &PremisEvent) -> PremisEvent {
        if let Some(existing) = self.events.get(&event.identifier) {
            return existing.clone();
        }
        let mut saved = event.clone();
        saved.id = Some(self.next_id());
        self.events.insert(saved.identifier.clone(), saved.clone());
        saved
    }
}

/// In-memory catalog. Keeps the full checksum history of each file the way
/// the real catalog does.
#[derive(Default)]
pub struct MemoryCatalog {
    state: Mutex<State>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn object(&self, identifier: &str) -> Option<CatalogObject> {
        self.state().objects.get(identifier).cloned()
    }

    pub fn file(&self, identifier: &str) -> Option<CatalogFile> {
        self.state().files.get(identifier).cloned()
    }

    pub fn file_count(&self) -> usize {
        self.state().files.len()
    }

    pub fn events(&self) -> Vec<PremisEvent> {
        self.state().events.values().cloned().collect()
    }
}

#[async_trait]
impl Catalog for MemoryCatalog {
    async fn object_get(&self, identifier: &str) -> Result<Option<CatalogObject>> {
        Ok(self.object(identifier))
    }

    async fn object_save(&self, object: &CatalogObject) -> Result<CatalogObject> {
        let mut state = self.state();
        let mut saved = object.clone();
        let existing_id = state.objects.get(&object.identifier).map(|o| o.id);
        match (object.id, existing_id) {
            (None, Some(existing)) => {
                return Err(PreserveError::Catalog(format!(
                    "Object {} already exists with id {:?}",
                    object.identifier, existing
                )))
            },
            (None, None) => saved.id = Some(state.next_id()),
            (Some(_), _) => {},
        }
        state.objects.insert(saved.identifier.clone(), saved.clone());
        Ok(saved)
    }

    async fn file_get(&self, identifier: &str) -> Result<Option<CatalogFile>> {
        Ok(self.file(identifier).map(|mut f| {
            f.premis_events.clear();
            f
        }))
    }

    async fn file_save(&self, file: &CatalogFile) -> Result<CatalogFile> {
        let mut state = self.state();
        let previous = state.files.get(&file.identifier).cloned();
        let id = match (&previous, file.id) {
            (Some(prev), None) => {
                return Err(PreserveError::Catalog(format!(
                    "File {} already exists with id {:?}",
                    file.identifier, prev.id
                )))
            },
            (None, None) => state.next_id(),
            (_, Some(id)) => id,
        };

        let mut saved = file.clone();
        saved.id = Some(id);
        if let Some(prev) = previous {
            let mut checksums = prev.checksums;
            checksums.extend(file.checksums.iter().cloned());
            saved.checksums = checksums;

            let mut records = prev.storage_records;
            for record in &file.storage_records {
                if !records.contains(record) {
                    records.push(record.clone());
                }
            }
            saved.storage_records = records;
        }
        saved.premis_events = file
            .premis_events
            .iter()
            .map(|e| state.record_event(e))
            .collect();

        state.files.insert(saved.identifier.clone(), saved.clone());
        Ok(saved)
    }

    async fn checksums(&self, file_identifier: &str) -> Result<Vec<CatalogChecksum>> {
        Ok(self
            .file(file_identifier)
            .map(|f| f.checksums)
            .unwrap_or_default())
    }

    async fn storage_records(&self, file_identifier: &str) -> Result<Vec<CatalogStorageRecord>> {
        Ok(self
            .file(file_identifier)
            .map(|f| f.storage_records)
            .unwrap_or_default())
    }

    async fn event_save(&self, event: &PremisEvent) -> Result<PremisEvent> {
        Ok(self.state().record_event(event))
    }
}
