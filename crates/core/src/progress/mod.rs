use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::Result;

/// The player's persisted progress.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressRecord {
    pub current_level_index: usize,
    pub max_unlocked_level_index: usize,
    #[serde(default)]
    pub level_scores: BTreeMap<usize, i32>,
}

impl ProgressRecord {
    /// Raises the unlocked high-water mark; never lowers it.
    pub fn unlock(&mut self, index: usize) {
        self.max_unlocked_level_index = self.max_unlocked_level_index.max(index);
    }

    pub fn is_unlocked(&self, index: usize) -> bool {
        index <= self.max_unlocked_level_index
    }

    /// Pulls indices back inside a level list of `level_count` entries.
    pub fn clamp_to(&mut self, level_count: usize) {
        let last = level_count.saturating_sub(1);
        self.max_unlocked_level_index = self.max_unlocked_level_index.min(last);
        self.current_level_index = self
            .current_level_index
            .min(self.max_unlocked_level_index);
        self.level_scores.retain(|&index, _| index <= last);
    }
}

/// Get/set storage for a single [`ProgressRecord`].
pub trait ProgressStore {
    fn load(&self) -> Result<Option<ProgressRecord>>;
    fn save(&mut self, record: &ProgressRecord) -> Result<()>;
}

/// Keeps the record in memory; used by tests and ephemeral sessions.
#[derive(Debug, Default, Clone)]
pub struct MemoryProgressStore {
    record: Option<ProgressRecord>,
    saves: usize,
}

impl MemoryProgressStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_record(record: ProgressRecord) -> Self {
        Self {
            record: Some(record),
            saves: 0,
        }
    }

    pub fn record(&self) -> Option<&ProgressRecord> {
        self.record.as_ref()
    }

    /// Number of successful `save` calls.
    pub fn saves(&self) -> usize {
        self.saves
    }
}

impl ProgressStore for MemoryProgressStore {
    fn load(&self) -> Result<Option<ProgressRecord>> {
        Ok(self.record.clone())
    }

    fn save(&mut self, record: &ProgressRecord) -> Result<()> {
        self.record = Some(record.clone());
        self.saves += 1;
        Ok(())
    }
}

/// Stores the record as pretty-printed JSON in a single file.
#[derive(Debug, Clone)]
pub struct JsonFileProgressStore {
    path: PathBuf,
}

impl JsonFileProgressStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ProgressStore for JsonFileProgressStore {
    fn load(&self) -> Result<Option<ProgressRecord>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let source = std::fs::read_to_string(&self.path)?;
        Ok(Some(serde_json::from_str(&source)?))
    }

    fn save(&mut self, record: &ProgressRecord) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(record)?;
        std::fs::write(&self.path, json)?;
        Ok(())
    }
}

/// Loads progress, falling back to a fresh record when nothing usable exists.
///
/// Read or parse failures are logged rather than returned.
pub fn restore_progress(store: &dyn ProgressStore, level_count: usize) -> ProgressRecord {
    let mut record = match store.load() {
        Ok(Some(record)) => record,
        Ok(None) => ProgressRecord::default(),
        Err(err) => {
            tracing::warn!(error = %err, "could not restore progress, starting fresh");
            ProgressRecord::default()
        }
    };
    record.clamp_to(level_count);
    record
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RhythmError;

    struct BrokenStore;

    impl ProgressStore for BrokenStore {
        fn load(&self) -> Result<Option<ProgressRecord>> {
            Err(RhythmError::msg("disk on fire"))
        }

        fn save(&mut self, _record: &ProgressRecord) -> Result<()> {
            Err(RhythmError::msg("disk on fire"))
        }
    }

    fn record(current: usize, unlocked: usize) -> ProgressRecord {
        ProgressRecord {
            current_level_index: current,
            max_unlocked_level_index: unlocked,
            level_scores: BTreeMap::from([(0, 120)]),
        }
    }

    #[test]
    fn unlock_never_moves_backwards() {
        let mut progress = record(0, 3);
        progress.unlock(1);
        assert_eq!(progress.max_unlocked_level_index, 3);
        progress.unlock(4);
        assert_eq!(progress.max_unlocked_level_index, 4);
        assert!(progress.is_unlocked(2));
        assert!(!progress.is_unlocked(5));
    }

    #[test]
    fn failing_store_restores_zero_progress() {
        let restored = restore_progress(&BrokenStore, 5);
        assert_eq!(restored, ProgressRecord::default());
    }

    #[test]
    fn restored_indices_fit_the_level_list() {
        let mut scores = record(6, 9);
        scores.level_scores.insert(8, 40);
        let store = MemoryProgressStore::with_record(scores);

        let restored = restore_progress(&store, 4);
        assert_eq!(restored.max_unlocked_level_index, 3);
        assert_eq!(restored.current_level_index, 3);
        assert_eq!(restored.level_scores, BTreeMap::from([(0, 120)]));
    }

    #[test]
    fn current_level_past_the_unlocked_one_is_pulled_back() {
        let store = MemoryProgressStore::with_record(record(3, 1));

        let restored = restore_progress(&store, 5);
        assert_eq!(restored.current_level_index, 1);
        assert_eq!(restored.max_unlocked_level_index, 1);
        assert!(!restored.is_unlocked(3));
    }

    #[test]
    fn json_file_store_persists_records() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = JsonFileProgressStore::new(dir.path().join("saves").join("progress.json"));
        assert_eq!(store.load().unwrap(), None);

        store.save(&record(1, 2)).unwrap();
        let reopened = JsonFileProgressStore::new(store.path().to_path_buf());
        assert_eq!(reopened.load().unwrap(), Some(record(1, 2)));
    }

    #[test]
    fn corrupted_file_falls_back_to_zero_progress() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("progress.json");
        std::fs::write(&path, "{ not json").unwrap();

        let store = JsonFileProgressStore::new(&path);
        assert!(store.load().is_err());
        assert_eq!(restore_progress(&store, 3), ProgressRecord::default());
    }
}
