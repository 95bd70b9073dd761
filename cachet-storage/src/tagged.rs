//! Tag-scoped views.
//!
//! Each tag owns a random id stored in the underlying store under
//! `tag:{name}:key`. A tagged key is prefixed with the SHA-256 of the ids of
//! every tag in the set, so resetting any tag id orphans every entry written
//! through that set without touching other keys.

use sha2::{Digest, Sha256};
use uuid::Uuid;

use cachet_core::{CacheValue, CachetResult, Ttl};

use crate::repository::Repository;

/// An ordered set of tag names bound to one repository.
#[derive(Debug, Clone)]
pub struct TagSet {
    repository: Repository,
    names: Vec<String>,
}

impl TagSet {
    pub fn new(repository: Repository, names: Vec<String>) -> Self {
        Self { repository, names }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Key under which the id of tag `name` is stored.
    pub fn tag_key(name: &str) -> String {
        format!("tag:{}:key", name)
    }

    /// Current id of tag `name`, creating one if the tag is new.
    pub fn tag_id(&self, name: &str) -> CachetResult<String> {
        match self.repository.get(&Self::tag_key(name))? {
            Some(CacheValue::String(id)) => Ok(id),
            _ => self.reset_tag(name),
        }
    }

    /// Give tag `name` a fresh id.
    pub fn reset_tag(&self, name: &str) -> CachetResult<String> {
        let id = Uuid::now_v7().simple().to_string();
        self.repository
            .forever(&Self::tag_key(name), &CacheValue::String(id.clone()))?;
        Ok(id)
    }

    /// Reset every tag in the set.
    pub fn reset(&self) -> CachetResult<()> {
        for name in &self.names {
            self.reset_tag(name)?;
        }
        Ok(())
    }

    /// Namespace for keys written through this set.
    pub fn namespace(&self) -> CachetResult<String> {
        let ids = self
            .names
            .iter()
            .map(|name| self.tag_id(name))
            .collect::<CachetResult<Vec<_>>>()?;

        let mut hasher = Sha256::new();
        hasher.update(ids.join("|").as_bytes());
        Ok(hex::encode(hasher.finalize()))
    }
}

/// Repository view whose keys are scoped by a [`TagSet`].
///
/// Operations go straight to the store that produced the view; they do not
/// fall back.
#[derive(Debug, Clone)]
pub struct TaggedCache {
    repository: Repository,
    tags: TagSet,
}

impl TaggedCache {
    pub fn new(repository: Repository, names: Vec<String>) -> Self {
        let tags = TagSet::new(repository.clone(), names);
        Self { repository, tags }
    }

    pub fn tags(&self) -> &TagSet {
        &self.tags
    }

    /// Name of the store backing this view.
    pub fn store_name(&self) -> &str {
        self.repository.store().name()
    }

    /// Fully qualified key for `key` under the current tag ids.
    pub fn tagged_key(&self, key: &str) -> CachetResult<String> {
        Ok(format!("{}:{}", self.tags.namespace()?, key))
    }

    pub fn get(&self, key: &str) -> CachetResult<Option<CacheValue>> {
        self.repository.get(&self.tagged_key(key)?)
    }

    pub fn has(&self, key: &str) -> CachetResult<bool> {
        self.repository.has(&self.tagged_key(key)?)
    }

    pub fn put(&self, key: &str, value: impl Into<CacheValue>, ttl: Option<Ttl>) -> CachetResult<bool> {
        self.repository
            .put(&self.tagged_key(key)?, &value.into(), ttl)
    }

    pub fn add(&self, key: &str, value: impl Into<CacheValue>, ttl: Option<Ttl>) -> CachetResult<bool> {
        self.repository
            .add(&self.tagged_key(key)?, &value.into(), ttl)
    }

    pub fn forever(&self, key: &str, value: impl Into<CacheValue>) -> CachetResult<bool> {
        self.repository.forever(&self.tagged_key(key)?, &value.into())
    }

    pub fn increment(&self, key: &str, amount: i64) -> CachetResult<i64> {
        self.repository.increment(&self.tagged_key(key)?, amount)
    }

    pub fn decrement(&self, key: &str, amount: i64) -> CachetResult<i64> {
        self.repository.decrement(&self.tagged_key(key)?, amount)
    }

    pub fn forget(&self, key: &str) -> CachetResult<bool> {
        self.repository.forget(&self.tagged_key(key)?)
    }

    /// Invalidate every entry written through this tag set.
    pub fn flush(&self) -> CachetResult<bool> {
        self.tags.reset()?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;
    use std::sync::Arc;

    fn repository() -> Repository {
        Repository::new(Arc::new(MemoryStore::new("array")))
    }

    #[test]
    fn test_tagged_keys_are_isolated() {
        let repo = repository();
        let people = repo.tags(&["people"]).unwrap();
        let artists = repo.tags(&["artists"]).unwrap();

        people.put("john", "doe", None).unwrap();
        artists.put("john", "lennon", None).unwrap();

        assert_eq!(people.get("john").unwrap(), Some(json!("doe")));
        assert_eq!(artists.get("john").unwrap(), Some(json!("lennon")));
        assert_eq!(repo.get("john").unwrap(), None);
    }

    #[test]
    fn test_same_tags_share_namespace() {
        let repo = repository();
        let a = repo.tags(&["people", "artists"]).unwrap();
        let b = repo.tags(&["people", "artists"]).unwrap();

        a.forever("john", "lennon").unwrap();
        assert_eq!(b.get("john").unwrap(), Some(json!("lennon")));
        assert_eq!(a.tagged_key("x").unwrap(), b.tagged_key("x").unwrap());
    }

    #[test]
    fn test_flush_invalidates_only_tagged_entries() {
        let repo = repository();
        repo.forever("plain", &json!(1)).unwrap();

        let people = repo.tags(&["people"]).unwrap();
        people.forever("john", "doe").unwrap();
        assert!(people.has("john").unwrap());

        assert!(people.flush().unwrap());

        assert!(!people.has("john").unwrap());
        assert_eq!(repo.get("plain").unwrap(), Some(json!(1)));
    }

    #[test]
    fn test_flush_of_one_tag_affects_combined_sets() {
        let repo = repository();
        let combined = repo.tags(&["people", "artists"]).unwrap();
        combined.forever("john", "lennon").unwrap();

        repo.tags(&["artists"]).unwrap().flush().unwrap();

        assert_eq!(combined.get("john").unwrap(), None);
    }

    #[test]
    fn test_counters_and_forget() {
        let repo = repository();
        let tagged = repo.tags(&["counters"]).unwrap();

        assert_eq!(tagged.increment("hits", 2).unwrap(), 2);
        assert_eq!(tagged.decrement("hits", 1).unwrap(), 1);
        assert!(tagged.forget("hits").unwrap());
        assert!(!tagged.has("hits").unwrap());
    }

    #[test]
    fn test_tag_id_is_stable_until_reset() {
        let repo = repository();
        let set = TagSet::new(repo.clone(), vec!["people".to_string()]);

        let first = set.tag_id("people").unwrap();
        assert_eq!(set.tag_id("people").unwrap(), first);
        assert_eq!(
            repo.get(&TagSet::tag_key("people")).unwrap(),
            Some(json!(first.clone()))
        );

        let second = set.reset_tag("people").unwrap();
        assert_ne!(first, second);
    }
}
