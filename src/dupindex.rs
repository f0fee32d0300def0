//! Duplicate-index collaborator interface (spec §6).
//!
//! An external key/value service that tracks content-hash -> filename
//! mappings so callers can dedupe uploads; this crate only needs the four
//! operations it actually calls out to, abstracted the same way the tracker
//! is so tests can swap in an in-memory fake.

use async_trait::async_trait;

#[async_trait]
pub trait DuplicateIndex: Send + Sync {
    async fn get(&self, key: &[u8]) -> std::io::Result<Option<String>>;
    async fn set(&self, key: &[u8], filename: &str) -> std::io::Result<()>;
    async fn inc(&self, key: &[u8]) -> std::io::Result<u64>;
    async fn delete(&self, key: &[u8]) -> std::io::Result<()>;
}

/// In-memory duplicate index, useful for single-node deployments and tests.
/// A production deployment would point this at a shared service instead;
/// the trait boundary is what matters to the storage core.
#[derive(Default)]
pub struct InMemoryDuplicateIndex {
    entries: tokio::sync::Mutex<std::collections::HashMap<Vec<u8>, (String, u64)>>,
}

#[async_trait]
impl DuplicateIndex for InMemoryDuplicateIndex {
    async fn get(&self, key: &[u8]) -> std::io::Result<Option<String>> {
        Ok(self.entries.lock().await.get(key).map(|(name, _)| name.clone()))
    }

    async fn set(&self, key: &[u8], filename: &str) -> std::io::Result<()> {
        let mut entries = self.entries.lock().await;
        entries.entry(key.to_vec()).or_insert_with(|| (filename.to_string(), 0)).0 = filename.to_string();
        Ok(())
    }

    async fn inc(&self, key: &[u8]) -> std::io::Result<u64> {
        let mut entries = self.entries.lock().await;
        let entry = entries.entry(key.to_vec()).or_insert_with(|| (String::new(), 0));
        entry.1 += 1;
        Ok(entry.1)
    }

    async fn delete(&self, key: &[u8]) -> std::io::Result<()> {
        self.entries.lock().await.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let index = InMemoryDuplicateIndex::default();
        index.set(b"hash", "M00/00/00/abc.txt").await.unwrap();
        assert_eq!(index.get(b"hash").await.unwrap().as_deref(), Some("M00/00/00/abc.txt"));
    }

    #[tokio::test]
    async fn inc_counts_references() {
        let index = InMemoryDuplicateIndex::default();
        assert_eq!(index.inc(b"hash").await.unwrap(), 1);
        assert_eq!(index.inc(b"hash").await.unwrap(), 2);
        index.delete(b"hash").await.unwrap();
        assert_eq!(index.inc(b"hash").await.unwrap(), 1);
    }
}
