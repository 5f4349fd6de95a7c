//! JSON file of enrolled face embeddings.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use cardscan_core::{CorpusEntry, Embedding};

pub struct CorpusStore {
    path: PathBuf,
}

impl CorpusStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All entries; a missing file is an empty corpus.
    pub fn load(&self) -> Result<Vec<CorpusEntry>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let raw = std::fs::read_to_string(&self.path)
            .with_context(|| format!("reading corpus {}", self.path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("parsing corpus {}", self.path.display()))
    }

    /// Append one embedding and return its new record ID.
    pub fn enroll(&self, label: &str, embedding: Embedding) -> Result<String> {
        let mut entries = self.load()?;
        let id = uuid::Uuid::new_v4().to_string();
        entries.push(CorpusEntry {
            id: id.clone(),
            label: label.to_string(),
            embedding,
        });
        self.save(&entries)?;
        tracing::info!(id = %id, label, total = entries.len(), "embedding enrolled");
        Ok(id)
    }

    fn save(&self, entries: &[CorpusEntry]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(entries)?;
        std::fs::write(&self.path, json)
            .with_context(|| format!("writing corpus {}", self.path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_corpus_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = CorpusStore::new(dir.path().join("none.json"));
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn test_enroll_roundtrip_is_exact() {
        let dir = tempfile::tempdir().unwrap();
        let store = CorpusStore::new(dir.path().join("nested/corpus.json"));
        let values = vec![0.1f32, -0.2, 0.333_333_34, 1.0e-7];

        let first = store.enroll("NGUYỄN VĂN ANH", Embedding::new(values.clone())).unwrap();
        let second = store.enroll("20220991", Embedding::new(vec![1.0; 4])).unwrap();
        assert_ne!(first, second);

        let entries = store.load().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].id, first);
        assert_eq!(entries[0].label, "NGUYỄN VĂN ANH");
        assert_eq!(entries[0].embedding.values, values);
    }

    #[test]
    fn test_corrupt_corpus_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corpus.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(CorpusStore::new(path).load().is_err());
    }
}
