//! The metadata catalog.
//!
//! Two indexed tables — repositories and workpads — plus an advisory
//! "active workpad" pointer. [`CatalogBackend`] is the storage seam: the
//! bundled [`JsonCatalog`] keeps each table in a JSON file and rewrites it
//! atomically (write-temp + rename) on every mutation. Other backends (SQL,
//! remote) implement the same trait.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;

use super::record::{RepoRecord, WorkpadRecord};
use crate::error::{Error, Result};

/// Storage seam for catalog records.
///
/// Implementations serialize every field of the record types losslessly and
/// make each mutation durable before returning. A single writer at a time is
/// assumed (the store serializes callers).
pub trait CatalogBackend: Send + Sync {
    fn get_repo(&self, id: &str) -> Result<Option<RepoRecord>>;
    fn put_repo(&self, record: RepoRecord) -> Result<()>;
    fn delete_repo(&self, id: &str) -> Result<()>;
    fn list_repos(&self) -> Result<Vec<RepoRecord>>;

    fn get_workpad(&self, id: &str) -> Result<Option<WorkpadRecord>>;
    fn put_workpad(&self, record: WorkpadRecord) -> Result<()>;
    fn delete_workpad(&self, id: &str) -> Result<()>;
    fn list_workpads(&self) -> Result<Vec<WorkpadRecord>>;

    fn active_workpad(&self) -> Result<Option<String>>;
    fn set_active_workpad(&self, pad_id: Option<&str>) -> Result<()>;

    /// Force all tables to disk, even if nothing changed.
    fn snapshot(&self) -> Result<()>;
}

const REPOS_FILE: &str = "repositories.json";
const PADS_FILE: &str = "workpads.json";
const ACTIVE_FILE: &str = "active_pad.json";

#[derive(Debug, Default, Serialize, Deserialize)]
struct ActivePointer {
    pad_id: Option<String>,
}

#[derive(Debug, Default)]
struct Tables {
    repos: IndexMap<String, RepoRecord>,
    pads: IndexMap<String, WorkpadRecord>,
    active: ActivePointer,
}

/// JSON-file catalog backend.
#[derive(Debug)]
pub struct JsonCatalog {
    dir: PathBuf,
    tables: Mutex<Tables>,
}

impl JsonCatalog {
    /// Open (or create) the catalog at `dir`.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        let tables = Tables {
            repos: read_table(&dir.join(REPOS_FILE))?,
            pads: read_table(&dir.join(PADS_FILE))?,
            active: read_json_or_default(&dir.join(ACTIVE_FILE))?,
        };
        Ok(Self {
            dir,
            tables: Mutex::new(tables),
        })
    }

    fn with_tables<T>(&self, f: impl FnOnce(&mut Tables) -> Result<T>) -> Result<T> {
        let mut guard = self.tables.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut guard)
    }

    fn persist_repos(&self, tables: &Tables) -> Result<()> {
        write_json_atomic(&self.dir, REPOS_FILE, &tables.repos)
    }

    fn persist_pads(&self, tables: &Tables) -> Result<()> {
        write_json_atomic(&self.dir, PADS_FILE, &tables.pads)
    }

    fn persist_active(&self, tables: &Tables) -> Result<()> {
        write_json_atomic(&self.dir, ACTIVE_FILE, &tables.active)
    }
}

fn read_table<T: DeserializeOwned>(path: &Path) -> Result<IndexMap<String, T>> {
    match std::fs::read_to_string(path) {
        Ok(text) => serde_json::from_str(&text).map_err(|e| Error::Catalog {
            detail: format!("{}: {e}", path.display()),
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(IndexMap::new()),
        Err(e) => Err(e.into()),
    }
}

fn read_json_or_default<T: DeserializeOwned + Default>(path: &Path) -> Result<T> {
    match std::fs::read_to_string(path) {
        Ok(text) => serde_json::from_str(&text).map_err(|e| Error::Catalog {
            detail: format!("{}: {e}", path.display()),
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(T::default()),
        Err(e) => Err(e.into()),
    }
}

/// Serialize to a temp file in the catalog directory, then rename over the
/// target so readers never observe a half-written table.
fn write_json_atomic<T: Serialize>(dir: &Path, name: &str, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).map_err(|e| Error::Catalog {
        detail: format!("serializing {name}: {e}"),
    })?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(json.as_bytes())?;
    tmp.flush()?;
    tmp.persist(dir.join(name)).map_err(|e| Error::Catalog {
        detail: format!("persisting {name}: {e}"),
    })?;
    Ok(())
}

impl CatalogBackend for JsonCatalog {
    fn get_repo(&self, id: &str) -> Result<Option<RepoRecord>> {
        self.with_tables(|t| Ok(t.repos.get(id).cloned()))
    }

    fn put_repo(&self, record: RepoRecord) -> Result<()> {
        self.with_tables(|t| {
            t.repos.insert(record.id.clone(), record);
            self.persist_repos(t)
        })
    }

    fn delete_repo(&self, id: &str) -> Result<()> {
        self.with_tables(|t| {
            t.repos.shift_remove(id);
            self.persist_repos(t)
        })
    }

    fn list_repos(&self) -> Result<Vec<RepoRecord>> {
        self.with_tables(|t| Ok(t.repos.values().cloned().collect()))
    }

    fn get_workpad(&self, id: &str) -> Result<Option<WorkpadRecord>> {
        self.with_tables(|t| Ok(t.pads.get(id).cloned()))
    }

    fn put_workpad(&self, record: WorkpadRecord) -> Result<()> {
        self.with_tables(|t| {
            t.pads.insert(record.id.clone(), record);
            self.persist_pads(t)
        })
    }

    fn delete_workpad(&self, id: &str) -> Result<()> {
        self.with_tables(|t| {
            t.pads.shift_remove(id);
            self.persist_pads(t)
        })
    }

    fn list_workpads(&self) -> Result<Vec<WorkpadRecord>> {
        self.with_tables(|t| Ok(t.pads.values().cloned().collect()))
    }

    fn active_workpad(&self) -> Result<Option<String>> {
        self.with_tables(|t| Ok(t.active.pad_id.clone()))
    }

    fn set_active_workpad(&self, pad_id: Option<&str>) -> Result<()> {
        self.with_tables(|t| {
            t.active.pad_id = pad_id.map(str::to_owned);
            self.persist_active(t)
        })
    }

    fn snapshot(&self) -> Result<()> {
        self.with_tables(|t| {
            self.persist_repos(t)?;
            self.persist_pads(t)?;
            self.persist_active(t)
        })
    }
}
