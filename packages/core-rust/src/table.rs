//! Fully loaded keyed tables for small entity dictionaries.
//!
//! Unlike the time-series store, a [`KeyedTable`] has no eviction: the
//! whole file is read at open time and rewritten as a unit on save.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::StorageError;

/// An entity with an integer primary key.
pub trait Identifiable {
    fn id(&self) -> i32;
}

/// Whole-file list persistence for a table.
pub trait TableSource<T>: Send + Sync {
    /// Loads every entity from `path`.
    ///
    /// # Errors
    ///
    /// Returns a [`StorageError`] when the file is unreadable or corrupt.
    fn load(&self, path: &Path) -> Result<Vec<T>, StorageError>;

    /// Replaces the file at `path` with `items`.
    ///
    /// # Errors
    ///
    /// Returns a [`StorageError`] on write failure or for read-only sources.
    fn save(&self, items: &[T], path: &Path) -> Result<(), StorageError>;

    /// File extension (without the dot) this source reads and writes.
    fn extension(&self) -> &'static str;
}

/// In-memory table keyed by entity id, backed by one file.
pub struct KeyedTable<T> {
    name: &'static str,
    folder: PathBuf,
    source: Box<dyn TableSource<T>>,
    data: BTreeMap<i32, T>,
    modified: bool,
}

impl<T: Identifiable> KeyedTable<T> {
    /// Opens `<folder>/<name>.<ext>`. A missing file yields an empty table.
    ///
    /// # Errors
    ///
    /// Returns a [`StorageError`] when an existing file cannot be loaded.
    pub fn open(
        name: &'static str,
        folder: impl Into<PathBuf>,
        source: Box<dyn TableSource<T>>,
    ) -> Result<Self, StorageError> {
        let folder = folder.into();
        let path = table_path(&folder, name, source.as_ref());
        let data = if path.exists() {
            source
                .load(&path)?
                .into_iter()
                .map(|item| (item.id(), item))
                .collect()
        } else {
            debug!(table = name, path = %path.display(), "table file absent, starting empty");
            BTreeMap::new()
        };
        Ok(Self {
            name,
            folder,
            source,
            data,
            modified: false,
        })
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[must_use]
    pub fn get(&self, id: i32) -> Option<&T> {
        self.data.get(&id)
    }

    #[must_use]
    pub fn contains(&self, id: i32) -> bool {
        self.data.contains_key(&id)
    }

    /// Applies `f` to entity `id`. Returns `false` when it does not exist.
    pub fn update(&mut self, id: i32, f: impl FnOnce(&mut T)) -> bool {
        match self.data.get_mut(&id) {
            Some(item) => {
                f(item);
                self.modified = true;
                true
            }
            None => false,
        }
    }

    /// Inserts or replaces an entity under its own id.
    pub fn insert(&mut self, item: T) {
        self.data.insert(item.id(), item);
        self.modified = true;
    }

    pub fn remove(&mut self, id: i32) -> Option<T> {
        let removed = self.data.remove(&id);
        if removed.is_some() {
            self.modified = true;
        }
        removed
    }

    /// Entities in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.data.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.data.values_mut()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[must_use]
    pub fn is_modified(&self) -> bool {
        self.modified
    }

    /// Writes the table back through its own source if it changed.
    ///
    /// # Errors
    ///
    /// Returns a [`StorageError`] on write failure.
    pub fn save(&mut self) -> Result<bool, StorageError>
    where
        T: Clone,
    {
        if !self.modified {
            return Ok(false);
        }
        let path = table_path(&self.folder, self.name, self.source.as_ref());
        self.source.save(&self.values(), &path)?;
        self.modified = false;
        Ok(true)
    }

    /// Writes the whole table through `source` into `folder`, regardless of
    /// the modified flag. Used for format migration.
    ///
    /// # Errors
    ///
    /// Returns a [`StorageError`] on write failure.
    pub fn save_all(&mut self, source: &dyn TableSource<T>, folder: &Path) -> Result<(), StorageError>
    where
        T: Clone,
    {
        let path = table_path(folder, self.name, source);
        source.save(&self.values(), &path)?;
        self.modified = false;
        Ok(())
    }

    fn values(&self) -> Vec<T>
    where
        T: Clone,
    {
        self.data.values().cloned().collect()
    }
}

fn table_path<T>(folder: &Path, name: &str, source: &dyn TableSource<T>) -> PathBuf {
    folder.join(format!("{name}.{}", source.extension()))
}
