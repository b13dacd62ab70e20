use super::{FileBatch, MetadataStore};
use crate::models::{IngestFile, IngestObject};
use async_trait::async_trait;
use preserve_common::Result;
use std::collections::BTreeMap;
use std::sync::Mutex;

type Key = (i64, String);

/// In-process metadata store. Records are stored as JSON so every save and
/// load goes through the same serialization as the database store.
#[derive(Default)]
pub struct MemoryMetadataStore {
    objects: Mutex<BTreeMap<Key, String>>,
    files: Mutex<BTreeMap<Key, String>>,
}

impl MemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(map: &Mutex<BTreeMap<Key, String>>) -> std::sync::MutexGuard<'_, BTreeMap<Key, String>> {
        map.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl MetadataStore for MemoryMetadataStore {
    async fn object_get(&self, work_item_id: i64, identifier: &str) -> Result<Option<IngestObject>> {
        Self::lock(&self.objects)
            .get(&(work_item_id, identifier.to_string()))
            .map(|json| serde_json::from_str(json))
            .transpose()
            .map_err(Into::into)
    }

    async fn object_save(&self, work_item_id: i64, object: &IngestObject) -> Result<()> {
        let json = serde_json::to_string(object)?;
        Self::lock(&self.objects).insert((work_item_id, object.identifier()), json);
        Ok(())
    }

    async fn object_delete(&self, work_item_id: i64, identifier: &str) -> Result<()> {
        Self::lock(&self.objects).remove(&(work_item_id, identifier.to_string()));
        Ok(())
    }

    async fn file_get(&self, work_item_id: i64, identifier: &str) -> Result<Option<IngestFile>> {
        Self::lock(&self.files)
            .get(&(work_item_id, identifier.to_string()))
            .map(|json| serde_json::from_str(json))
            .transpose()
            .map_err(Into::into)
    }

    async fn file_save(&self, work_item_id: i64, file: &IngestFile) -> Result<()> {
        let json = serde_json::to_string(file)?;
        Self::lock(&self.files).insert((work_item_id, file.identifier()), json);
        Ok(())
    }

    async fn file_delete(&self, work_item_id: i64, identifier: &str) -> Result<()> {
        Self::lock(&self.files).remove(&(work_item_id, identifier.to_string()));
        Ok(())
    }

    async fn file_batch(&self, work_item_id: i64, offset: u64, limit: u64) -> Result<FileBatch> {
        let files = Self::lock(&self.files);
        let mut page = files
            .range((work_item_id, String::new())..)
            .take_while(|((id, _), _)| *id == work_item_id)
            .skip(offset as usize)
            .take(limit as usize + 1)
            .map(|(_, json)| serde_json::from_str::<IngestFile>(json))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let next_offset = if page.len() as u64 > limit {
            page.truncate(limit as usize);
            Some(offset + limit)
        } else {
            None
        };
        Ok(FileBatch {
            files: page,
            next_offset,
        })
    }

    async fn file_count(&self, work_item_id: i64) -> Result<u64> {
        Ok(Self::lock(&self.files)
            .keys()
            .filter(|(id, _)| *id == work_item_id)
            .count() as u64)
    }

    async fn work_item_delete(&self, work_item_id: i64) -> Result<u64> {
        let mut removed = 0;
        for map in [&self.objects, &self.files] {
            let mut guard = Self::lock(map);
            let before = guard.len();
            guard.retain(|(id, _), _| *id != work_item_id);
            removed += (before - guard.len()) as u64;
        }
        Ok(removed)
    }
}
