//! # casedict-editor
//!
//! Structural, format-preserving editor for brace-delimited case
//! dictionaries, built on [`casedict_parser`].
//!
//! The document keeps its raw lines as the single source of truth and
//! derives two synchronized views from them:
//!
//! ```text
//!            ┌────────────► Value     (semantic reads: query)
//! raw lines ─┤
//!            └────────────► NodeTree  (line/column index: mutations)
//! ```
//!
//! Reads resolve dotted/bracketed routes over the semantic view and
//! decode the recurring composite sub-formats (count-prefixed inline
//! lists, fixed-arity records, type/name-list pairs). Writes patch the
//! raw lines surgically — untouched lines, including comments and
//! alignment, survive byte-for-byte — and the derived views are rebuilt
//! or synced afterwards.
//!
//! ```no_run
//! use casedict_editor::{Document, Value};
//!
//! # fn main() -> Result<(), casedict_editor::EditorError> {
//! let mut doc = Document::load("system/controlDict")?;
//! doc.set_value("stopAt", Value::str("writeNow"));
//! doc.save()?;
//! # Ok(())
//! # }
//! ```

pub mod document;
pub mod errors;
pub mod insert;
pub mod mutations;
pub mod query;

pub use document::{Document, DocumentStorage, Edit};
pub use errors::EditorError;
pub use insert::Anchor;
pub use mutations::{Mutation, MutationError};
pub use query::ShowType;

pub use casedict_parser::{Dict, Route, Segment, Value};
