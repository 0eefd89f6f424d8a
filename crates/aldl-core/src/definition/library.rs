//! Definition library
//!
//! Holds every loaded definition keyed by name, plus the name of the active
//! one. A library opened from disk is backed by `library.json` in its
//! directory; [`DefinitionLibrary::new`] gives an in-memory library.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

use super::{Definition, DefinitionError, DefinitionSource};

const INDEX_FILE: &str = "library.json";

/// Errors from library operations
#[derive(Error, Debug)]
pub enum LibraryError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Library file is corrupt: {0}")]
    Json(#[from] serde_json::Error),

    #[error("No definition named '{0}'")]
    NotFound(String),

    #[error(transparent)]
    Definition(#[from] DefinitionError),

    #[error("Could not find app data directory")]
    NoDataDir,
}

/// On-disk form of the library
#[derive(Debug, Default, Serialize, Deserialize)]
struct LibraryIndex {
    #[serde(default)]
    definitions: Vec<Definition>,
    #[serde(default)]
    active: Option<String>,
}

/// Loaded definitions, keyed by name
#[derive(Debug, Default)]
pub struct DefinitionLibrary {
    /// Directory holding `library.json`, `None` when in-memory
    path: Option<PathBuf>,
    definitions: Vec<Definition>,
    active: Option<String>,
}

impl DefinitionLibrary {
    /// Create an empty in-memory library
    pub fn new() -> Self {
        Self::default()
    }

    /// Default library directory (in app data)
    pub fn default_path() -> Result<PathBuf, LibraryError> {
        let base = dirs::data_local_dir()
            .or_else(dirs::home_dir)
            .ok_or(LibraryError::NoDataDir)?;
        Ok(base.join("ALDL").join("definitions"))
    }

    /// Open or create the library stored in `path` (or the default directory)
    pub fn open(path: Option<&Path>) -> Result<Self, LibraryError> {
        let dir = match path {
            Some(p) => p.to_path_buf(),
            None => Self::default_path()?,
        };
        fs::create_dir_all(&dir)?;

        let index_path = dir.join(INDEX_FILE);
        let index = if index_path.exists() {
            let content = fs::read_to_string(&index_path)?;
            serde_json::from_str(&content)?
        } else {
            LibraryIndex::default()
        };

        let mut library = Self {
            path: Some(dir),
            definitions: index.definitions,
            active: None,
        };
        // A stale active name is dropped rather than trusted
        if let Some(name) = index.active {
            if library.get(&name).is_some() {
                library.active = Some(name);
            }
        }

        debug!(
            count = library.definitions.len(),
            active = ?library.active,
            "opened definition library"
        );
        Ok(library)
    }

    /// Write the library back to disk. No-op for in-memory libraries.
    pub fn save(&self) -> Result<(), LibraryError> {
        let Some(dir) = &self.path else {
            return Ok(());
        };
        let index = LibraryIndex {
            definitions: self.definitions.clone(),
            active: self.active.clone(),
        };
        let content = serde_json::to_string_pretty(&index)?;
        fs::write(dir.join(INDEX_FILE), content)?;
        Ok(())
    }

    /// Directory backing this library, if any
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Add a definition, replacing any definition with the same name.
    ///
    /// Returns the replaced definition.
    pub fn insert(&mut self, definition: Definition) -> Option<Definition> {
        match self.definitions.iter_mut().find(|d| d.name == definition.name) {
            Some(slot) => {
                info!(name = %definition.name, "replacing definition");
                Some(std::mem::replace(slot, definition))
            }
            None => {
                info!(name = %definition.name, "adding definition");
                self.definitions.push(definition);
                None
            }
        }
    }

    /// Parse `text` with `source`, store the result and make it active
    pub fn load(
        &mut self,
        source: &dyn DefinitionSource,
        text: &str,
        display_name: &str,
    ) -> Result<&Definition, LibraryError> {
        let definition = source.parse(text, display_name)?;
        let name = definition.name.clone();
        self.insert(definition);
        self.set_active(&name)?;
        self.get(&name).ok_or(LibraryError::NotFound(name))
    }

    /// Remove a definition. Removing the active definition clears the selection.
    pub fn remove(&mut self, name: &str) -> Option<Definition> {
        let idx = self.definitions.iter().position(|d| d.name == name)?;
        if self.active.as_deref() == Some(name) {
            self.active = None;
        }
        Some(self.definitions.remove(idx))
    }

    /// Look up a definition by name
    pub fn get(&self, name: &str) -> Option<&Definition> {
        self.definitions.iter().find(|d| d.name == name)
    }

    /// Mutable lookup, for gauge edits
    pub fn get_mut(&mut self, name: &str) -> Option<&mut Definition> {
        self.definitions.iter_mut().find(|d| d.name == name)
    }

    /// All definitions in insertion order
    pub fn iter(&self) -> impl Iterator<Item = &Definition> {
        self.definitions.iter()
    }

    /// Number of stored definitions
    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    /// Whether the library is empty
    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    /// Select the active definition
    pub fn set_active(&mut self, name: &str) -> Result<(), LibraryError> {
        if self.get(name).is_none() {
            return Err(LibraryError::NotFound(name.to_string()));
        }
        self.active = Some(name.to_string());
        Ok(())
    }

    /// The active definition
    pub fn active(&self) -> Option<&Definition> {
        self.active.as_deref().and_then(|name| self.get(name))
    }

    /// Name of the active definition
    pub fn active_name(&self) -> Option<&str> {
        self.active.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{JsonDefinitionSource, ParameterDefinition};
    use tempfile::tempdir;

    #[test]
    fn test_insert_replaces_same_name() {
        let mut library = DefinitionLibrary::new();
        library.insert(Definition::new("A"));
        library.insert(Definition::new("B"));
        assert_eq!(library.len(), 2);

        let updated = Definition::new("A").with_parameter(ParameterDefinition::new("rpm", "RPM", 0, 1));
        let old = library.insert(updated);
        assert!(old.is_some_and(|d| d.parameters.is_empty()));
        assert_eq!(library.len(), 2);
        assert_eq!(library.get("A").unwrap().parameters.len(), 1);
    }

    #[test]
    fn test_remove_active_clears_selection() {
        let mut library = DefinitionLibrary::new();
        library.insert(Definition::new("A"));
        library.set_active("A").unwrap();
        assert_eq!(library.active().map(|d| d.name.as_str()), Some("A"));

        assert!(library.remove("A").is_some());
        assert!(library.active().is_none());
        assert!(library.remove("A").is_none());
    }

    #[test]
    fn test_gauge_rebind_in_place() {
        let mut library = DefinitionLibrary::new();
        let mut def = Definition::new("A")
            .with_parameter(ParameterDefinition::new("rpm", "Engine RPM", 0, 1))
            .with_parameter(ParameterDefinition::new("clt", "Coolant Temp", 1, 1));
        def.bind_default_gauges();
        library.insert(def);

        library.get_mut("A").unwrap().rebind_gauge(0, "clt").unwrap();
        let stored = library.get("A").unwrap();
        assert_eq!(stored.gauges[0].field.as_str(), "clt");
        assert!(library.get_mut("missing").is_none());
    }

    #[test]
    fn test_set_active_unknown() {
        let mut library = DefinitionLibrary::new();
        assert!(matches!(
            library.set_active("missing"),
            Err(LibraryError::NotFound(_))
        ));
    }

    #[test]
    fn test_load_activates() {
        let mut library = DefinitionLibrary::new();
        let def = library
            .load(&JsonDefinitionSource, r#"{"name": "ECM"}"#, "ecm.json")
            .unwrap();
        assert_eq!(def.name, "ECM");
        assert_eq!(library.active_name(), Some("ECM"));
    }

    #[test]
    fn test_persistence_round_trip() {
        let dir = tempdir().unwrap();
        {
            let mut library = DefinitionLibrary::open(Some(dir.path())).unwrap();
            library.insert(Definition::new("A"));
            library.set_active("A").unwrap();
            library.save().unwrap();
        }
        let library = DefinitionLibrary::open(Some(dir.path())).unwrap();
        assert_eq!(library.len(), 1);
        assert_eq!(library.active_name(), Some("A"));
    }

    #[test]
    fn test_stale_active_name_is_dropped() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join(INDEX_FILE),
            r#"{"definitions": [], "active": "gone"}"#,
        )
        .unwrap();
        let library = DefinitionLibrary::open(Some(dir.path())).unwrap();
        assert!(library.active_name().is_none());
    }
}
