//! # casedict-parser
//!
//! Lossless parser for brace-delimited case dictionaries.
//!
//! The pipeline keeps two derived views of the same text in lock-step:
//!
//! ```text
//! raw text ──► tokenizer ──► extractor ──► Value   (semantic shape)
//!     │
//!     └──────► NodeBuilder ─────────────► NodeTree (line/column index)
//! ```
//!
//! The tokenizer covers every input byte (concatenating all token spans
//! reproduces the source exactly), the extractor folds tokens into a
//! position-free [`Value`] tree, and the [`NodeBuilder`] re-scans the raw
//! lines to annotate every key with exact line/column ranges so an editor
//! can patch the text surgically.

pub mod extractor;
pub mod node;
pub mod route;
pub mod tokenizer;
pub mod value;

pub use extractor::{extract, extract_source};
pub use node::{ColSpan, Node, NodeBuilder, NodeId, NodeTree};
pub use route::{Route, Segment};
pub use tokenizer::{tokenize, Token};
pub use value::{Dict, Value};

/// Run the full pipeline: tokenize, extract, build the position index.
pub fn parse(source: &str) -> (Value, NodeTree) {
    let tokens = tokenize(source);
    let data = extract(source, &tokens);
    let tree = NodeBuilder::new(source).build(&data);
    (data, tree)
}
