//! Time-keyed, LRU-bounded, lazily paged store.
//!
//! [`TimeSeriesStore`] separates *known keys* from *loaded values*:
//!
//! - the index (`BTreeMap<key, SlotId>`) is built once by scanning the data
//!   folder and answers "is there any bucket at or before X" without
//!   touching the disk;
//! - at most `max_items` slots hold a value at any time, ordered by an
//!   [`EvictionList`]. Reaching a slot without a value pages it in through
//!   the [`DatedSource`]; making room evicts the least recently used slot,
//!   writing it back first if it is dirty.
//!
//! Writes are deferred: a mutated bucket is persisted when it is evicted or
//! on an explicit [`save`](TimeSeriesStore::save). The store is not
//! thread-safe by itself; callers serialize access (the server keeps it
//! behind a single mutex).

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::error::StorageError;
use crate::eviction::{EvictionList, SlotId};
use crate::source::{scan_files, DatedSource, DbFileWithDate, KeyMapper};

/// Per-key container. Slots are never removed; only their value comes and goes.
#[derive(Debug)]
struct Slot<V> {
    key: i32,
    value: Option<V>,
}

/// Generic bucketed cache over a [`DatedSource`].
pub struct TimeSeriesStore<V, S, M> {
    data_folder: PathBuf,
    source: S,
    mapper: M,
    max_items: usize,
    index: BTreeMap<i32, SlotId>,
    slots: Vec<Slot<V>>,
    lru: EvictionList,
    modified: BTreeSet<i32>,
}

impl<V, S, M> TimeSeriesStore<V, S, M>
where
    S: DatedSource<V>,
    M: KeyMapper,
{
    /// Creates an empty store. Call [`init`](Self::init) or
    /// [`load_all`](Self::load_all) to discover existing buckets.
    ///
    /// `max_items` is clamped to at least 1.
    #[must_use]
    pub fn new(data_folder: impl Into<PathBuf>, source: S, mapper: M, max_items: usize) -> Self {
        Self {
            data_folder: data_folder.into(),
            source,
            mapper,
            max_items: max_items.max(1),
            index: BTreeMap::new(),
            slots: Vec::new(),
            lru: EvictionList::new(),
            modified: BTreeSet::new(),
        }
    }

    // --- Index building ---

    /// Scans the data folder and creates one empty slot per bucket key
    /// without loading any payload. Returns the number of known keys.
    ///
    /// # Errors
    ///
    /// Returns a [`StorageError`] when the folder cannot be listed or a
    /// file name carries no date.
    pub fn init(&mut self) -> Result<usize, StorageError> {
        let files = scan_files(&self.data_folder)?;
        for file in &files {
            let date = self.source.date_of(file)?;
            let key = self.mapper.key_of(date);
            self.ensure_slot(key);
        }
        info!(
            folder = %self.data_folder.display(),
            files = files.len(),
            keys = self.index.len(),
            "index built"
        );
        Ok(self.index.len())
    }

    /// Scans the data folder and eagerly loads every bucket, grouping files
    /// by key. Loaded buckets are clean. Returns the number of buckets.
    ///
    /// With fewer `max_items` than buckets, earlier buckets are evicted
    /// (without writes) as later ones load.
    ///
    /// # Errors
    ///
    /// Returns the first [`StorageError`] hit while scanning or loading.
    pub fn load_all(&mut self) -> Result<usize, StorageError> {
        let mut groups: BTreeMap<i32, Vec<DbFileWithDate>> = BTreeMap::new();
        for file in scan_files(&self.data_folder)? {
            let date = self.source.date_of(&file)?;
            let key = self.mapper.key_of(date);
            groups
                .entry(key)
                .or_default()
                .push(DbFileWithDate::new(file.path, date));
        }
        let count = groups.len();
        for (key, files) in groups {
            let value = self.source.load(&files)?;
            self.add(key, Some(value), false)?;
        }
        info!(
            folder = %self.data_folder.display(),
            buckets = count,
            active = self.lru.len(),
            "all buckets loaded"
        );
        Ok(count)
    }

    // --- Lookup ---

    /// Returns the bucket at the greatest key `<= key_of(date)`, paging it
    /// in if needed. `None` when no such key exists.
    ///
    /// # Errors
    ///
    /// Returns a [`StorageError`] when paging in or making room fails.
    pub fn load(&mut self, date: i32) -> Result<Option<&mut V>, StorageError> {
        let key = self.mapper.key_of(date);
        let Some((_, &id)) = self.index.range(..=key).next_back() else {
            return Ok(None);
        };
        self.get_or_page(id).map(Some)
    }

    /// Returns the bucket at exactly `key_of(date)`, creating an empty
    /// (default) dirty bucket when the key is unknown.
    ///
    /// # Errors
    ///
    /// Returns a [`StorageError`] when paging in or making room fails.
    pub fn load_or_add(&mut self, date: i32) -> Result<&mut V, StorageError>
    where
        V: Default,
    {
        let key = self.mapper.key_of(date);
        if let Some(&id) = self.index.get(&key) {
            return self.get_or_page(id);
        }
        self.add(key, Some(V::default()), true)?;
        let id = self.ensure_slot(key);
        self.get_or_page(id)
    }

    /// Visits every bucket with a key in `[key_of(from), key_of(to)]` in
    /// ascending order, paging each in and promoting it to most recently used.
    ///
    /// # Errors
    ///
    /// Stops at and returns the first error from paging or from `f`.
    pub fn for_each_in_range<E, F>(&mut self, from: i32, to: i32, mut f: F) -> Result<(), E>
    where
        E: From<StorageError>,
        F: FnMut(i32, &mut V) -> Result<(), E>,
    {
        let first = self.mapper.key_of(from);
        let last = self.mapper.key_of(to);
        if first > last {
            return Ok(());
        }
        let targets: Vec<(i32, SlotId)> = self
            .index
            .range(first..=last)
            .map(|(&key, &id)| (key, id))
            .collect();
        for (key, id) in targets {
            let value = self.get_or_page(id)?;
            f(key, value)?;
        }
        Ok(())
    }

    /// Collects clones of every bucket in `[key_of(from), key_of(to)]`.
    ///
    /// # Errors
    ///
    /// Returns the first [`StorageError`] hit while paging.
    pub fn load_range(&mut self, from: i32, to: i32) -> Result<Vec<(i32, V)>, StorageError>
    where
        V: Clone,
    {
        let mut out = Vec::new();
        self.for_each_in_range(from, to, |key, value: &mut V| {
            out.push((key, value.clone()));
            Ok::<(), StorageError>(())
        })?;
        Ok(out)
    }

    // --- Mutation ---

    /// Inserts or replaces the value of bucket `key`.
    ///
    /// Attaching a value to a slot that is not yet live makes room first.
    /// `None` detaches the current value without writing it back and drops
    /// its dirty flag.
    ///
    /// # Errors
    ///
    /// Returns a [`StorageError`] when writing back an evicted bucket fails.
    pub fn add(&mut self, key: i32, value: Option<V>, mark_modified: bool) -> Result<(), StorageError> {
        let id = self.ensure_slot(key);
        match value {
            Some(value) => {
                if !self.lru.contains(id) {
                    self.cleanup()?;
                }
                self.slots[id].value = Some(value);
                self.lru.push_front(id);
                if mark_modified {
                    self.modified.insert(key);
                }
            }
            None => {
                self.slots[id].value = None;
                self.lru.remove(id);
                self.modified.remove(&key);
            }
        }
        Ok(())
    }

    /// Flags an existing bucket dirty without loading it. Returns `false`
    /// for an unknown key.
    pub fn mark_as_modified(&mut self, key: i32) -> bool {
        if !self.index.contains_key(&key) {
            return false;
        }
        self.modified.insert(key);
        true
    }

    // --- Persistence ---

    /// Writes back every dirty bucket and clears the dirty set.
    ///
    /// Each key leaves the dirty set only after its write succeeds, so a
    /// failed flush can be retried. Returns the number of buckets written.
    ///
    /// # Errors
    ///
    /// Returns the first write error.
    pub fn save(&mut self) -> Result<usize, StorageError> {
        let dirty: Vec<i32> = self.modified.iter().copied().collect();
        let mut written = 0;
        for key in dirty {
            if let Some(value) = self.index.get(&key).and_then(|&id| self.slots[id].value.as_ref()) {
                self.source.save(value, &self.data_folder, key)?;
                written += 1;
            } else {
                warn!(key, "dirty bucket has no loaded value, skipping");
            }
            self.modified.remove(&key);
        }
        if written > 0 {
            debug!(written, "dirty buckets flushed");
        }
        Ok(written)
    }

    /// Writes every loaded bucket, dirty or not, through `target` into
    /// `folder`. Used for format migration. Clears the dirty set.
    ///
    /// # Errors
    ///
    /// Returns the first write error.
    pub fn save_all<T>(&mut self, target: &T, folder: &Path) -> Result<usize, StorageError>
    where
        T: DatedSource<V> + ?Sized,
    {
        let mut written = 0;
        for (&key, &id) in &self.index {
            if let Some(value) = self.slots[id].value.as_ref() {
                target.save(value, folder, key)?;
                written += 1;
            }
        }
        self.modified.clear();
        info!(folder = %folder.display(), written, "buckets exported");
        Ok(written)
    }

    // --- Inspection ---

    /// Number of buckets currently holding a value.
    #[must_use]
    pub fn active_items(&self) -> usize {
        self.lru.len()
    }

    #[must_use]
    pub fn max_items(&self) -> usize {
        self.max_items
    }

    /// Number of known bucket keys, loaded or not.
    #[must_use]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Known bucket keys in ascending order.
    pub fn keys(&self) -> impl Iterator<Item = i32> + '_ {
        self.index.keys().copied()
    }

    #[must_use]
    pub fn contains_key(&self, key: i32) -> bool {
        self.index.contains_key(&key)
    }

    #[must_use]
    pub fn is_loaded(&self, key: i32) -> bool {
        self.index.get(&key).is_some_and(|&id| self.lru.contains(id))
    }

    #[must_use]
    pub fn is_modified(&self, key: i32) -> bool {
        self.modified.contains(&key)
    }

    /// Peeks at a loaded value without paging or touching recency.
    #[must_use]
    pub fn peek(&self, key: i32) -> Option<&V> {
        self.index
            .get(&key)
            .and_then(|&id| self.slots[id].value.as_ref())
    }

    #[must_use]
    pub fn data_folder(&self) -> &Path {
        &self.data_folder
    }

    #[must_use]
    pub fn mapper(&self) -> &M {
        &self.mapper
    }

    // --- Internals ---

    fn ensure_slot(&mut self, key: i32) -> SlotId {
        if let Some(&id) = self.index.get(&key) {
            return id;
        }
        let id = self.slots.len();
        self.slots.push(Slot { key, value: None });
        self.index.insert(key, id);
        id
    }

    fn get_or_page(&mut self, id: SlotId) -> Result<&mut V, StorageError> {
        let key = self.slots[id].key;
        if self.slots[id].value.is_some() {
            self.lru.move_to_front(id);
        } else {
            self.cleanup()?;
            let files = self.source.file_names(&self.data_folder, key)?;
            let value = self.source.load(&files)?;
            self.slots[id].value = Some(value);
            self.lru.push_front(id);
            debug!(key, active = self.lru.len(), "bucket paged in");
        }
        self.slots[id]
            .value
            .as_mut()
            .ok_or(StorageError::MissingBucket { key })
    }

    /// Evicts least recently used buckets until there is room for one more.
    fn cleanup(&mut self) -> Result<(), StorageError> {
        while self.lru.len() >= self.max_items {
            let Some(id) = self.lru.back() else { break };
            let key = self.slots[id].key;
            if self.modified.contains(&key) {
                if let Some(value) = self.slots[id].value.as_ref() {
                    self.source.save(value, &self.data_folder, key)?;
                }
                self.modified.remove(&key);
            }
            self.lru.pop_back();
            self.slots[id].value = None;
            debug!(key, "bucket evicted");
        }
        Ok(())
    }
}

impl<V, S, M> std::fmt::Debug for TimeSeriesStore<V, S, M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimeSeriesStore")
            .field("data_folder", &self.data_folder)
            .field("max_items", &self.max_items)
            .field("keys", &self.index.len())
            .field("active", &self.lru.len())
            .field("modified", &self.modified.len())
            .finish_non_exhaustive()
    }
}
