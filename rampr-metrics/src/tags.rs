use crate::key::KeyId;
use smallvec::SmallVec;

/// Sorted, de-duplicated set of interned `(key, value)` pairs identifying one series.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct TagSet {
    // Most series carry scenario + a couple of request tags.
    tags: SmallVec<[(KeyId, KeyId); 4]>,
}

impl TagSet {
    /// Builds a set from arbitrary pairs. When a key repeats, the first occurrence wins.
    pub fn from_pairs(iter: impl IntoIterator<Item = (KeyId, KeyId)>) -> Self {
        let mut tags: SmallVec<[(KeyId, KeyId); 4]> = iter.into_iter().collect();
        // Stable sort keeps insertion order among equal keys so `dedup_by_key` keeps the first.
        tags.sort_by_key(|(k, _)| *k);
        tags.dedup_by_key(|(k, _)| *k);
        Self { tags }
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (KeyId, KeyId)> + '_ {
        self.tags.iter().copied()
    }

    pub fn get(&self, key: KeyId) -> Option<KeyId> {
        self.tags
            .binary_search_by_key(&key, |(k, _)| *k)
            .ok()
            .map(|idx| self.tags[idx].1)
    }

    /// True when every `(key, value)` filter pair is present in this set.
    pub fn matches(&self, filter: &[(KeyId, KeyId)]) -> bool {
        filter.iter().all(|(k, v)| self.get(*k) == Some(*v))
    }
}
