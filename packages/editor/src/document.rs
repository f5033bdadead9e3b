//! Document façade: owns the raw line buffer together with the parsed
//! views, routes reads to the query layer and writes through the mutation
//! layer, and handles file-backed persistence.

use crate::errors::EditorError;
use crate::insert::Anchor;
use crate::mutations::{LineCache, Mutation, Outcome};
use crate::query::{self, ShowType};
use casedict_parser::{parse, Dict, NodeTree, Route, Value};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Parsed state: the authoritative lines plus the two derived views and
/// the first-word line cache. Rebuilt from the lines after structural
/// edits; synced in place after column patches.
pub(crate) struct DocState {
    pub(crate) lines: Vec<String>,
    pub(crate) data: Value,
    pub(crate) tree: NodeTree,
    pub(crate) cache: LineCache,
}

impl DocState {
    pub(crate) fn from_source(source: &str) -> Self {
        let (data, tree) = parse(source);
        let lines: Vec<String> = source.split('\n').map(String::from).collect();
        let mut cache = LineCache::default();
        cache.rebuild(&lines);
        Self {
            lines,
            data,
            tree,
            cache,
        }
    }

    /// Serialized document text. Joining on `\n` inverts the split
    /// exactly, trailing newline included.
    pub(crate) fn text(&self) -> String {
        self.lines.join("\n")
    }

    /// Rebuild both derived views and the line cache from the lines.
    pub(crate) fn reparse(&mut self) {
        let source = self.text();
        let (data, tree) = parse(&source);
        self.data = data;
        self.tree = tree;
        self.cache.rebuild(&self.lines);
    }
}

/// Where a document lives between edits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentStorage {
    Memory,
    File(PathBuf),
}

/// A loaded dictionary document.
///
/// Reads return `Option`/empty collections and writes return `bool`; a
/// failed write leaves the text untouched. Failure details are emitted on
/// the `tracing` debug level.
pub struct Document {
    state: Option<DocState>,
    storage: DocumentStorage,
    version: u64,
    dirty: bool,
}

impl Document {
    /// In-memory document; [`save`](Self::save) requires
    /// [`save_as`](Self::save_as) first.
    pub fn from_source(source: &str) -> Self {
        Self {
            state: Some(DocState::from_source(source)),
            storage: DocumentStorage::Memory,
            version: 0,
            dirty: false,
        }
    }

    pub fn load(path: impl Into<PathBuf>) -> Result<Self, EditorError> {
        let path = path.into();
        let source = std::fs::read_to_string(&path)?;
        tracing::debug!(path = %path.display(), bytes = source.len(), "loaded document");
        Ok(Self {
            state: Some(DocState::from_source(&source)),
            storage: DocumentStorage::File(path),
            version: 0,
            dirty: false,
        })
    }

    pub fn is_loaded(&self) -> bool {
        self.state.is_some()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Bumped once per committed edit batch.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn storage(&self) -> &DocumentStorage {
        &self.storage
    }

    /// Full document text, byte-identical to the last load/save plus any
    /// applied edits.
    pub fn text(&self) -> Option<String> {
        self.state.as_ref().map(DocState::text)
    }

    /// JSON export of the parsed structure.
    pub fn to_json(&self) -> Option<String> {
        let state = self.state.as_ref()?;
        serde_json::to_string_pretty(&state.data).ok()
    }

    // -- persistence --------------------------------------------------------

    /// Write atomically over the backing file: the text goes to a
    /// temporary file in the same directory, then replaces the target.
    pub fn save(&mut self) -> Result<(), EditorError> {
        let DocumentStorage::File(path) = &self.storage else {
            return Err(EditorError::NotFileBacked);
        };
        let path = path.clone();
        self.write_to(&path)?;
        self.dirty = false;
        Ok(())
    }

    pub fn save_as(&mut self, path: impl Into<PathBuf>) -> Result<(), EditorError> {
        let path = path.into();
        self.write_to(&path)?;
        self.storage = DocumentStorage::File(path);
        self.dirty = false;
        Ok(())
    }

    fn write_to(&self, path: &Path) -> Result<(), EditorError> {
        let state = self.state.as_ref().ok_or(EditorError::NotLoaded)?;
        let dir = path.parent().unwrap_or_else(|| Path::new("."));

        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(state.text().as_bytes())?;
        tmp.persist(path)?;

        tracing::debug!(path = %path.display(), "saved document");
        Ok(())
    }

    /// Drop in-memory edits and re-read the backing file.
    pub fn reload(&mut self) -> Result<(), EditorError> {
        let DocumentStorage::File(path) = &self.storage else {
            return Err(EditorError::NotFileBacked);
        };
        let source = std::fs::read_to_string(path)?;
        self.state = Some(DocState::from_source(&source));
        self.dirty = false;
        self.version += 1;
        Ok(())
    }

    // -- reads --------------------------------------------------------------

    pub fn get_value(&self, route: &str) -> Option<Value> {
        self.get_value_with(route, ShowType::Auto, None)
    }

    pub fn get_value_with(
        &self,
        route: &str,
        show_type: ShowType,
        map_key: Option<&str>,
    ) -> Option<Value> {
        let state = self.state.as_ref()?;
        query::get_value(&state.data, &state.tree, route, show_type, map_key)
    }

    pub fn has_key(&self, route: &str) -> bool {
        let Some(state) = self.state.as_ref() else {
            return false;
        };
        state.tree.find(&Route::parse(route)).is_some() || query::has_key(&state.data, route)
    }

    pub fn get_key_list(&self, route: &str) -> Vec<String> {
        match self.state.as_ref() {
            Some(state) => query::get_key_list(&state.data, route),
            None => Vec::new(),
        }
    }

    pub fn get_key_name_list(&self, route: &str) -> Vec<String> {
        match self.state.as_ref() {
            Some(state) => query::get_key_name_list(&state.data, route),
            None => Vec::new(),
        }
    }

    // -- writes -------------------------------------------------------------

    /// Start an edit batch. Each operation re-indexes only as much as it
    /// must; the batch commits (one final re-parse, version bump, dirty
    /// flag) when the guard drops.
    pub fn begin_edit(&mut self) -> Edit<'_> {
        Edit {
            doc: self,
            mutated: false,
            needs_reparse: false,
        }
    }

    pub fn set_value(&mut self, route: &str, value: Value) -> bool {
        self.begin_edit().set_value(route, value)
    }

    pub fn set_value_with(
        &mut self,
        route: &str,
        value: Value,
        show_type: ShowType,
        map_key: Option<&str>,
    ) -> bool {
        self.begin_edit()
            .set_value_with(route, value, show_type, map_key)
    }

    pub fn insert_value(&mut self, route: &str, value: Value) -> bool {
        self.begin_edit().insert_value(route, value)
    }

    pub fn insert_value_with(
        &mut self,
        route: &str,
        value: Value,
        show_type: ShowType,
        anchor: Option<Anchor>,
    ) -> bool {
        self.begin_edit()
            .insert_value_with(route, value, show_type, anchor)
    }

    pub fn insert_list_item(&mut self, route: &str, item: Dict) -> bool {
        self.begin_edit().insert_list_item(route, item)
    }

    pub fn rename(&mut self, route: &str, new_key: &str) -> bool {
        self.begin_edit().rename(route, new_key)
    }

    pub fn remove(&mut self, route: &str) -> bool {
        self.begin_edit().remove(route)
    }

    pub fn clear(&mut self, route: &str) -> bool {
        self.begin_edit().clear(route)
    }
}

/// RAII edit batch over a [`Document`].
///
/// Structural operations re-parse immediately so later operations in the
/// same batch see fresh positions; column patches only sync the touched
/// node. The final commit happens in `Drop`.
pub struct Edit<'a> {
    doc: &'a mut Document,
    mutated: bool,
    needs_reparse: bool,
}

impl Edit<'_> {
    pub fn set_value(&mut self, route: &str, value: Value) -> bool {
        self.set_value_with(route, value, ShowType::Auto, None)
    }

    /// Set an existing entry, or insert it when the route does not resolve
    /// yet (field selectors never fall back to insertion).
    pub fn set_value_with(
        &mut self,
        route: &str,
        value: Value,
        show_type: ShowType,
        map_key: Option<&str>,
    ) -> bool {
        if map_key.is_none() && !self.doc.has_key(route) {
            return self.insert_value_with(route, value, show_type, None);
        }
        self.apply(Mutation::SetValue {
            route: route.to_string(),
            value,
            show_type,
            map_key: map_key.map(String::from),
        })
    }

    pub fn insert_value(&mut self, route: &str, value: Value) -> bool {
        self.insert_value_with(route, value, ShowType::Auto, None)
    }

    /// Insert a new entry. A mapping aimed at an existing list-valued key
    /// becomes a new record of that list instead of a duplicate key.
    pub fn insert_value_with(
        &mut self,
        route: &str,
        value: Value,
        show_type: ShowType,
        anchor: Option<Anchor>,
    ) -> bool {
        if !route.contains('[') && anchor.is_none() {
            if let Value::Dict(item) = &value {
                let is_list = self
                    .doc
                    .state
                    .as_ref()
                    .and_then(|s| query::resolve(&s.data, &Route::parse(route)))
                    .is_some_and(|v| matches!(v, Value::List(_)));
                if is_list {
                    return self.insert_list_item(route, item.clone());
                }
            }
        }

        self.apply(Mutation::InsertValue {
            route: route.to_string(),
            value,
            show_type,
            anchor,
        })
    }

    pub fn insert_list_item(&mut self, route: &str, item: Dict) -> bool {
        self.apply(Mutation::InsertListItem {
            route: route.to_string(),
            item,
        })
    }

    pub fn rename(&mut self, route: &str, new_key: &str) -> bool {
        self.apply(Mutation::Rename {
            route: route.to_string(),
            new_key: new_key.to_string(),
        })
    }

    pub fn remove(&mut self, route: &str) -> bool {
        self.apply(Mutation::Remove {
            route: route.to_string(),
        })
    }

    pub fn clear(&mut self, route: &str) -> bool {
        self.apply(Mutation::Clear {
            route: route.to_string(),
        })
    }

    fn apply(&mut self, mutation: Mutation) -> bool {
        let Some(state) = self.doc.state.as_mut() else {
            tracing::warn!("edit on unloaded document ignored");
            return false;
        };

        match mutation.apply(state) {
            Ok(Outcome::Structural) => {
                state.reparse();
                self.needs_reparse = false;
                self.mutated = true;
                true
            }
            Ok(Outcome::Patched) => {
                // The touched node is already synced; the semantic tree
                // catches up at commit.
                state.cache.rebuild(&state.lines);
                self.needs_reparse = true;
                self.mutated = true;
                true
            }
            Err(err) => {
                tracing::debug!(error = %err, "mutation rejected");
                false
            }
        }
    }
}

impl Drop for Edit<'_> {
    fn drop(&mut self) {
        if !self.mutated {
            return;
        }
        if self.needs_reparse {
            if let Some(state) = self.doc.state.as_mut() {
                state.reparse();
            }
        }
        self.doc.dirty = true;
        self.doc.version += 1;
    }
}
