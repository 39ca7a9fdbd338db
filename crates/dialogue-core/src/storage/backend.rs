//! Key-value storage backend
//!
//! The persistent dialogue storages talk to an ordered key-value service
//! through two small traits: a [`StorageBackend`] hands out named
//! [`Collection`]s, and a collection stores JSON objects under string ids.
//!
//! Two backends ship with the crate:
//!
//! - [`MemoryStorage`]: in-process `BTreeMap`s, useful for tests and for
//!   carrying dialogues across a `teardown`/`setup` cycle within one process
//! - [`FileStorage`]: one directory per collection and one JSON file per object

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::errors::{DialogueError, DialogueResult};

/// Suffix appended to a collection name to form its terminal-dialogue collection
pub const TERMINAL_STATE_DIALOGUES_COLLECTION_SUFFIX: &str = "_terminal";

/// A named set of JSON objects keyed by string id
pub trait Collection: Send + Sync {
    /// Insert or overwrite the object stored under `object_id`
    fn put(&self, object_id: &str, object_body: Value) -> DialogueResult<()>;

    /// Fetch the object stored under `object_id`
    fn get(&self, object_id: &str) -> DialogueResult<Option<Value>>;

    /// Delete the object stored under `object_id`, if any
    fn remove(&self, object_id: &str) -> DialogueResult<()>;

    /// All objects whose value at the dot-separated `field` path equals `equals`
    fn find(&self, field: &str, equals: &Value) -> DialogueResult<Vec<(String, Value)>> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|(_, body)| field_value(body, field) == Some(equals))
            .collect())
    }

    /// All objects, ordered by id
    fn list(&self) -> DialogueResult<Vec<(String, Value)>>;
}

/// Source of named collections
pub trait StorageBackend: Send + Sync {
    /// Open (creating if needed) the collection called `name`
    ///
    /// Names are restricted to ASCII letters, digits and `_`.
    fn collection(&self, name: &str) -> DialogueResult<Arc<dyn Collection>>;
}

/// Resolve a dot-separated path inside a JSON object
fn field_value<'a>(body: &'a Value, field: &str) -> Option<&'a Value> {
    field
        .split('.')
        .try_fold(body, |value, segment| value.as_object()?.get(segment))
}

fn validate_collection_name(name: &str) -> DialogueResult<()> {
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(DialogueError::storage(format!(
            "Invalid collection name '{}': only letters, digits and '_' are allowed",
            name
        )));
    }
    Ok(())
}

/// In-memory collection
#[derive(Debug, Default)]
pub struct MemoryCollection {
    objects: Mutex<BTreeMap<String, Value>>,
}

impl Collection for MemoryCollection {
    fn put(&self, object_id: &str, object_body: Value) -> DialogueResult<()> {
        self.objects.lock().insert(object_id.to_string(), object_body);
        Ok(())
    }

    fn get(&self, object_id: &str) -> DialogueResult<Option<Value>> {
        Ok(self.objects.lock().get(object_id).cloned())
    }

    fn remove(&self, object_id: &str) -> DialogueResult<()> {
        self.objects.lock().remove(object_id);
        Ok(())
    }

    fn list(&self) -> DialogueResult<Vec<(String, Value)>> {
        Ok(self
            .objects
            .lock()
            .iter()
            .map(|(id, body)| (id.clone(), body.clone()))
            .collect())
    }
}

/// In-memory backend; collections live as long as the backend
#[derive(Debug, Default)]
pub struct MemoryStorage {
    collections: Mutex<HashMap<String, Arc<MemoryCollection>>>,
}

impl MemoryStorage {
    /// Create an empty backend
    pub fn new() -> Self {
        Self::default()
    }
}

impl StorageBackend for MemoryStorage {
    fn collection(&self, name: &str) -> DialogueResult<Arc<dyn Collection>> {
        validate_collection_name(name)?;
        let collection: Arc<dyn Collection> = self
            .collections
            .lock()
            .entry(name.to_string())
            .or_default()
            .clone();
        Ok(collection)
    }
}

/// Directory-backed collection
///
/// Object ids are hex-encoded into file names so any id maps to a valid path.
#[derive(Debug)]
pub struct FileCollection {
    dir: PathBuf,
}

impl FileCollection {
    fn object_path(&self, object_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", hex::encode(object_id)))
    }

    fn object_id(path: &Path) -> Option<String> {
        if path.extension()? != "json" {
            return None;
        }
        let stem = path.file_stem()?.to_str()?;
        let bytes = hex::decode(stem).ok()?;
        String::from_utf8(bytes).ok()
    }
}

impl Collection for FileCollection {
    fn put(&self, object_id: &str, object_body: Value) -> DialogueResult<()> {
        let data = serde_json::to_vec_pretty(&object_body)?;
        fs::write(self.object_path(object_id), data)?;
        Ok(())
    }

    fn get(&self, object_id: &str) -> DialogueResult<Option<Value>> {
        let path = self.object_path(object_id);
        if !path.exists() {
            return Ok(None);
        }
        let data = fs::read(path)?;
        Ok(Some(serde_json::from_slice(&data)?))
    }

    fn remove(&self, object_id: &str) -> DialogueResult<()> {
        let path = self.object_path(object_id);
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }

    fn list(&self) -> DialogueResult<Vec<(String, Value)>> {
        let mut objects: BTreeMap<String, Value> = BTreeMap::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let Some(object_id) = Self::object_id(&path) else {
                continue;
            };
            let data = fs::read(&path)?;
            objects.insert(object_id, serde_json::from_slice(&data)?);
        }
        Ok(objects.into_iter().collect())
    }
}

/// File-backed storage rooted at a directory
#[derive(Debug, Clone)]
pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    /// Create a backend rooted at `root`, creating the directory if needed
    pub fn new(root: impl Into<PathBuf>) -> DialogueResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Root directory of the backend
    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl StorageBackend for FileStorage {
    fn collection(&self, name: &str) -> DialogueResult<Arc<dyn Collection>> {
        validate_collection_name(name)?;
        let dir = self.root.join(name);
        fs::create_dir_all(&dir)?;
        debug!("Opened file collection {}", dir.display());
        Ok(Arc::new(FileCollection { dir }))
    }
}

/// Identity of the component that owns a set of dialogues
///
/// Determines the collection names the persistent storages use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageOwner {
    pub author: String,
    pub skill_name: String,
    pub component_name: String,
    pub component_kind: String,
    pub dialogues_kind: String,
}

impl StorageOwner {
    /// Create an owner identity
    pub fn new(
        author: impl Into<String>,
        skill_name: impl Into<String>,
        component_name: impl Into<String>,
        component_kind: impl Into<String>,
        dialogues_kind: impl Into<String>,
    ) -> Self {
        Self {
            author: author.into(),
            skill_name: skill_name.into(),
            component_name: component_name.into(),
            component_kind: component_kind.into(),
            dialogues_kind: dialogues_kind.into(),
        }
    }

    /// Name of the active-dialogue collection
    pub fn collection_name(&self) -> String {
        [
            self.author.as_str(),
            self.skill_name.as_str(),
            self.component_name.as_str(),
            self.component_kind.as_str(),
            self.dialogues_kind.as_str(),
        ]
        .join("_")
    }

    /// Name of the terminal-dialogue collection
    pub fn terminal_collection_name(&self) -> String {
        format!(
            "{}{}",
            self.collection_name(),
            TERMINAL_STATE_DIALOGUES_COLLECTION_SUFFIX
        )
    }
}

/// Everything a persistent storage needs: who owns it and where to write
#[derive(Clone)]
pub struct StorageContext {
    pub owner: StorageOwner,
    pub backend: Arc<dyn StorageBackend>,
}

impl StorageContext {
    /// Create a storage context
    pub fn new(owner: StorageOwner, backend: Arc<dyn StorageBackend>) -> Self {
        Self { owner, backend }
    }

    /// Open the active and terminal collections for the owner
    pub(crate) fn open_collections(
        &self,
    ) -> DialogueResult<(Arc<dyn Collection>, Arc<dyn Collection>)> {
        let active = self.backend.collection(&self.owner.collection_name())?;
        let terminal = self
            .backend
            .collection(&self.owner.terminal_collection_name())?;
        Ok((active, terminal))
    }
}

impl fmt::Debug for StorageContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageContext")
            .field("owner", &self.owner)
            .finish_non_exhaustive()
    }
}
