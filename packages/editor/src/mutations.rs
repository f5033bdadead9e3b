//! Mutation layer: the surgical editor.
//!
//! Every operation follows the same state machine: locate (route → node or
//! line range) → validate → patch (column-range replacement or line
//! surgery) → normalize (collapse blank lines left at a deletion site) →
//! commit. Patches touch only the bytes that actually change; everything
//! else stays byte-identical.

use crate::document::DocState;
use crate::insert::{self, Anchor};
use crate::query::{self, ShowType};
use casedict_parser::{ColSpan, Dict, NodeId, Route, Segment, Value};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

pub type MutationResult<T> = Result<T, MutationError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MutationError {
    #[error("route `{0}` does not resolve to a node")]
    NodeNotFound(String),

    #[error("index {index} out of range for `{route}`")]
    OutOfRange { route: String, index: usize },

    #[error("structure mismatch at `{route}`: {message}")]
    StructureMismatch { route: String, message: String },

    #[error("`{0}` is not position-indexed; the document may be unbalanced")]
    Unindexed(String),
}

impl MutationError {
    fn mismatch(route: impl Into<String>, message: impl Into<String>) -> Self {
        Self::StructureMismatch {
            route: route.into(),
            message: message.into(),
        }
    }
}

/// How a successful mutation left the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Outcome {
    /// Single-line column patch; the touched node was kept in sync, no
    /// other node's position can have shifted.
    Patched,
    /// Line-level surgery; the position index must be rebuilt.
    Structural,
}

/// One structural edit, validated against the document before any text
/// changes. The façade maps errors to `false`; a failed mutation leaves
/// the line buffer untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Mutation {
    Rename {
        route: String,
        new_key: String,
    },
    SetValue {
        route: String,
        value: Value,
        show_type: ShowType,
        map_key: Option<String>,
    },
    Remove {
        route: String,
    },
    Clear {
        route: String,
    },
    InsertValue {
        route: String,
        value: Value,
        show_type: ShowType,
        anchor: Option<Anchor>,
    },
    InsertListItem {
        route: String,
        item: Dict,
    },
}

impl Mutation {
    pub(crate) fn apply(&self, state: &mut DocState) -> MutationResult<Outcome> {
        match self {
            Mutation::Rename { route, new_key } => rename(state, route, new_key),
            Mutation::SetValue {
                route,
                value,
                show_type,
                map_key,
            } => change_value(state, route, value, *show_type, map_key.as_deref()),
            Mutation::Remove { route } => remove(state, route),
            Mutation::Clear { route } => clear(state, route),
            Mutation::InsertValue {
                route,
                value,
                show_type,
                anchor,
            } => insert::insert_value(state, route, value, *show_type, anchor.as_ref()),
            Mutation::InsertListItem { route, item } => {
                insert::insert_list_item(state, route, item)
            }
        }
    }
}

/// Per-key cache of line numbers keyed by each line's first word. Rebuilt
/// on every re-parse; a stale cache is a correctness bug, not just a
/// performance one.
#[derive(Debug, Default, Clone)]
pub(crate) struct LineCache {
    map: HashMap<String, Vec<usize>>,
}

impl LineCache {
    pub fn rebuild(&mut self, lines: &[String]) {
        self.map.clear();
        for (i, line) in lines.iter().enumerate() {
            if let Some(word) = line.split_whitespace().next() {
                self.map.entry(word.to_string()).or_default().push(i);
            }
        }
    }

    /// Line numbers whose first word is `key`, in document order.
    pub fn lines(&self, key: &str) -> &[usize] {
        self.map.get(key).map(Vec::as_slice).unwrap_or(&[])
    }
}

// ---------------------------------------------------------------------------
// rename

/// Replace only the key's column span, preserving the value's starting
/// column when the new key fits in the old gap.
fn rename(state: &mut DocState, route: &str, new_key: &str) -> MutationResult<Outcome> {
    let parsed = Route::parse(route);
    let id = state
        .tree
        .find(&parsed)
        .ok_or_else(|| MutationError::NodeNotFound(route.to_string()))?;

    let node = state.tree.get(id);
    let line_no = node.line_start;
    let key_col = node
        .key_col
        .ok_or_else(|| MutationError::Unindexed(route.to_string()))?;

    let text = &state.lines[line_no];
    let bytes = text.as_bytes();
    let mut vcol = key_col.end;
    while vcol < bytes.len() && (bytes[vcol] == b' ' || bytes[vcol] == b'\t') {
        vcol += 1;
    }

    let new_end = key_col.start + new_key.len();
    let new_line = if new_end <= vcol {
        format!(
            "{}{}{}{}",
            &text[..key_col.start],
            new_key,
            " ".repeat(vcol - new_end),
            &text[vcol..]
        )
    } else {
        format!("{}{} {}", &text[..key_col.start], new_key, &text[vcol..])
    };

    tracing::debug!(route, new_key, line = line_no, "rename key");
    state.lines[line_no] = new_line;

    state.tree.rename(id, new_key);
    state.tree.get_mut(id).key_col = Some(ColSpan {
        start: key_col.start,
        end: new_end,
    });
    Ok(Outcome::Patched)
}

// ---------------------------------------------------------------------------
// change_value

fn change_value(
    state: &mut DocState,
    route: &str,
    value: &Value,
    show_type: ShowType,
    map_key: Option<&str>,
) -> MutationResult<Outcome> {
    let parsed = resolve_name_to_index(state, &Route::parse(route));
    let route = parsed.to_string();

    let last_indexed_key = match parsed.segments().last() {
        Some(Segment::Indexed { key, .. }) => Some(key.as_str()),
        _ => None,
    };

    if parsed.last_key() == Some("inGroups") {
        return set_count_prefixed(state, &parsed, value);
    }

    if last_indexed_key == Some("regions") {
        if let Some(map_key) = map_key {
            return set_region_field(state, &parsed, value, map_key);
        }
    }

    if parsed.last_key() == Some("vertices") {
        if parsed.last_index().is_some() {
            // There is no per-item position granularity; callers rewrite
            // the whole block instead.
            return Err(MutationError::mismatch(
                route,
                "single vector items cannot be patched; set the whole block",
            ));
        }
        return set_vector_block(state, &parsed, value);
    }

    if last_indexed_key == Some("blocks") {
        if let Some(map_key) = map_key {
            return set_block_field(state, &parsed, value, map_key);
        }
    }

    if is_simple_list_block(state, &parsed, value) {
        return set_list_block(state, &parsed, value, show_type);
    }

    if let [Segment::Indexed { key, index }, Segment::Key(field)] = parsed.segments() {
        return set_record_field_line(state, key, *index, field, value);
    }

    set_scalar(state, &parsed, value)
}

/// Rewrite `list.name.tail` to `list[i].tail` when `name` matches a child
/// record of a list-valued node.
fn resolve_name_to_index(state: &DocState, route: &Route) -> Route {
    let segs = route.segments();
    if segs.len() < 2 {
        return route.clone();
    }
    let Segment::Key(top) = &segs[0] else {
        return route.clone();
    };
    let Some(name) = segs[1].key() else {
        return route.clone();
    };

    let Some(id) = state.tree.find(&Route::parse(top)) else {
        return route.clone();
    };
    let node = state.tree.get(id);
    if !matches!(node.value, Some(Value::List(_))) {
        return route.clone();
    }

    for (i, child) in node.children.iter().enumerate() {
        let child = state.tree.get(*child);
        // Anonymous records carry no key; match on their `name` field.
        let matches = child.key == *name
            || child
                .value
                .as_ref()
                .and_then(Value::as_dict)
                .and_then(|d| d.get("name"))
                .is_some_and(|v| v.to_string() == *name);
        if matches {
            let mut rewritten = format!("{}[{}]", top, i);
            for seg in &segs[2..] {
                rewritten.push('.');
                rewritten.push_str(&match seg {
                    Segment::Key(k) => k.clone(),
                    Segment::Indexed { key, index } => format!("{}[{}]", key, index),
                    Segment::Index(index) => format!("[{}]", index),
                });
            }
            return Route::parse(&rewritten);
        }
    }

    route.clone()
}

/// Rewrite a count-prefixed inline list, keeping the count equal to the
/// new item count. The whole `N(items)` span is composed in one pass.
fn set_count_prefixed(state: &mut DocState, route: &Route, value: &Value) -> MutationResult<Outcome> {
    let items = value
        .as_list()
        .ok_or_else(|| MutationError::mismatch(route.to_string(), "expected a list"))?;
    let key = route.last_key().unwrap_or_default().to_string();

    let parent = route.parent();
    let id = state
        .tree
        .find(&parent)
        .ok_or_else(|| MutationError::NodeNotFound(route.to_string()))?;
    let (start, end) = block_range(state, id);

    // The per-key line cache narrows the scan to this key's lines.
    let i = state
        .cache
        .lines(&key)
        .iter()
        .copied()
        .find(|l| (start..end).contains(l))
        .ok_or_else(|| MutationError::NodeNotFound(route.to_string()))?;

    let line = &state.lines[i];
    let key_pos = line.find(key.as_str()).unwrap_or(0);
    let after_key = key_pos + key.len();

    let bytes = line.as_bytes();
    let mut count_start = after_key;
    while count_start < bytes.len() && (bytes[count_start] == b' ' || bytes[count_start] == b'\t') {
        count_start += 1;
    }

    let paren_l = line[after_key..]
        .find('(')
        .map(|p| p + after_key)
        .ok_or_else(|| MutationError::mismatch(route.to_string(), "missing '('"))?;
    let paren_r = line[paren_l + 1..]
        .find(')')
        .map(|p| p + paren_l + 1)
        .ok_or_else(|| MutationError::mismatch(route.to_string(), "missing ')'"))?;

    let replacement = format!("{}({})", items.len(), join_values(items));
    let new_line = format!("{}{}{}", &line[..count_start], replacement, &line[paren_r + 1..]);

    tracing::debug!(route = %route, line = i, "rewrite count-prefixed list");
    state.lines[i] = new_line;
    Ok(Outcome::Structural)
}

/// Patch one field of a `type (names...)` pair, keeping sibling alignment.
fn set_region_field(
    state: &mut DocState,
    route: &Route,
    value: &Value,
    map_key: &str,
) -> MutationResult<Outcome> {
    let key = route.last_key().unwrap_or_default();
    let idx = route
        .last_index()
        .ok_or_else(|| MutationError::mismatch(route.to_string(), "missing index"))?;

    let mut base_segments = route.parent().to_string();
    if !base_segments.is_empty() {
        base_segments.push('.');
    }
    base_segments.push_str(key);
    let base = Route::parse(&base_segments);

    let id = state
        .tree
        .find(&base)
        .ok_or_else(|| MutationError::NodeNotFound(route.to_string()))?;
    let node = state.tree.get(id);

    let records = match &node.value {
        Some(Value::List(items)) => query::group_regions(items),
        _ => Vec::new(),
    };
    if idx >= records.len() {
        return Err(MutationError::OutOfRange {
            route: route.to_string(),
            index: idx,
        });
    }

    let (start, end) = block_range(state, id);
    let mut cur = -1i64;

    for i in start..end {
        let trimmed = state.lines[i].trim();
        if trimmed.is_empty() || trimmed == "(" {
            continue;
        }
        if trimmed.starts_with(')') {
            break;
        }

        cur += 1;
        if cur != idx as i64 {
            continue;
        }

        let line = state.lines[i].clone();
        let paren_l = line
            .find('(')
            .ok_or_else(|| MutationError::mismatch(route.to_string(), "missing '('"))?;

        match map_key {
            "names" => {
                let paren_r = line[paren_l + 1..]
                    .find(')')
                    .map(|p| p + paren_l + 1)
                    .ok_or_else(|| MutationError::mismatch(route.to_string(), "missing ')'"))?;
                let names = match value {
                    Value::List(items) => join_values(items),
                    other => other.to_string(),
                };
                replace_cols(&mut state.lines, i, paren_l + 1, paren_r, &names);
            }
            "type" => {
                let indent_len = line.len() - line.trim_start().len();
                let type_end = line[indent_len..]
                    .find(char::is_whitespace)
                    .map(|p| p + indent_len)
                    .unwrap_or(paren_l);

                // Re-derive the inter-field padding from the original
                // column gap so sibling lines stay aligned.
                let new_type = value.to_string();
                let old_pad = paren_l.saturating_sub(type_end);
                let old_len = type_end - indent_len;
                let pad = old_pad as i64 - (new_type.len() as i64 - old_len as i64);
                let pad = pad.max(1) as usize;

                let new_line = format!(
                    "{}{}{}{}",
                    &line[..indent_len],
                    new_type,
                    " ".repeat(pad),
                    &line[paren_l..]
                );
                state.lines[i] = new_line;
            }
            _ => {
                return Err(MutationError::mismatch(
                    route.to_string(),
                    format!("unknown field `{}`", map_key),
                ))
            }
        }

        tracing::debug!(route = %route, field = map_key, line = i, "patch pair record");
        return Ok(Outcome::Structural);
    }

    Err(MutationError::OutOfRange {
        route: route.to_string(),
        index: idx,
    })
}

/// Replace the entire inner line range of a vector block with freshly
/// formatted `( x  y  z )` lines.
fn set_vector_block(state: &mut DocState, route: &Route, value: &Value) -> MutationResult<Outcome> {
    let id = state
        .tree
        .find(route)
        .ok_or_else(|| MutationError::NodeNotFound(route.to_string()))?;
    let node = state.tree.get(id);
    let block_end = node
        .block_end_line
        .ok_or_else(|| MutationError::Unindexed(route.to_string()))?;
    let line_start = node.line_start;

    let items = value
        .as_list()
        .ok_or_else(|| MutationError::mismatch(route.to_string(), "expected a list of vectors"))?;

    let mut rendered = Vec::with_capacity(items.len());
    for item in items {
        let v = item.as_list().filter(|v| v.len() == 3).ok_or_else(|| {
            MutationError::mismatch(route.to_string(), "each item must be a 3-vector")
        })?;
        let joined: Vec<String> = v.iter().map(Value::to_string).collect();
        rendered.push(format!("    ( {} )", joined.join("  ")));
    }

    let opener = find_opener(&state.lines, line_start, block_end, '(')
        .ok_or_else(|| MutationError::Unindexed(route.to_string()))?;

    tracing::debug!(route = %route, lines = rendered.len(), "rewrite vector block");
    state.lines.splice(opener + 1..block_end, rendered);
    Ok(Outcome::Structural)
}

/// Patch one parenthesized field of a fixed-arity record line. The record
/// keyword is discovered from the document, not assumed.
fn set_block_field(
    state: &mut DocState,
    route: &Route,
    value: &Value,
    map_key: &str,
) -> MutationResult<Outcome> {
    // Field → nth paren group on the record line.
    let group_index = match map_key {
        "vertices" => 0,
        "cells" => 1,
        "grading" => 2,
        _ => {
            return Err(MutationError::mismatch(
                route.to_string(),
                format!("unknown field `{}`", map_key),
            ))
        }
    };

    let key = route.last_key().unwrap_or_default();
    let idx = route
        .last_index()
        .ok_or_else(|| MutationError::mismatch(route.to_string(), "missing index"))?;

    let mut base = route.parent().to_string();
    if !base.is_empty() {
        base.push('.');
    }
    base.push_str(key);

    let id = state
        .tree
        .find(&Route::parse(&base))
        .ok_or_else(|| MutationError::NodeNotFound(route.to_string()))?;
    let (start, end) = block_range(state, id);

    let keyword = record_keyword(&state.lines, start, end).ok_or_else(|| {
        MutationError::mismatch(route.to_string(), "no records found in block")
    })?;

    let mut cur = -1i64;
    for i in start..end {
        if !state.lines[i].trim_start().starts_with(keyword.as_str()) {
            continue;
        }

        cur += 1;
        if cur != idx as i64 {
            continue;
        }

        let groups = paren_groups(&state.lines[i]);
        let (l, r) = *groups.get(group_index).ok_or_else(|| {
            MutationError::mismatch(route.to_string(), "record has too few fields")
        })?;

        let text = match value {
            Value::List(items) => join_values(items),
            other => other.to_string(),
        };

        tracing::debug!(route = %route, field = map_key, line = i, "patch record field");
        replace_cols(&mut state.lines, i, l + 1, r, &text);
        return Ok(Outcome::Structural);
    }

    Err(MutationError::OutOfRange {
        route: route.to_string(),
        index: idx,
    })
}

/// A list of plain scalars addressed at a multi-line block node.
fn is_simple_list_block(state: &DocState, route: &Route, value: &Value) -> bool {
    let Some(items) = value.as_list() else {
        return false;
    };
    if !items.iter().all(Value::is_scalar) {
        return false;
    }
    let Some(id) = state.tree.find(route) else {
        return false;
    };
    state.tree.get(id).block_end_line.is_some()
}

/// Replace the inner line range of a uniform list block with freshly
/// formatted lines. This is the one case where formatting of the edited
/// region is regenerated rather than column-patched.
fn set_list_block(
    state: &mut DocState,
    route: &Route,
    value: &Value,
    show_type: ShowType,
) -> MutationResult<Outcome> {
    let id = state
        .tree
        .find(route)
        .ok_or_else(|| MutationError::NodeNotFound(route.to_string()))?;
    let node = state.tree.get(id);
    let block_end = node
        .block_end_line
        .ok_or_else(|| MutationError::Unindexed(route.to_string()))?;
    let line_start = node.line_start;

    let items = value
        .as_list()
        .ok_or_else(|| MutationError::mismatch(route.to_string(), "expected a list"))?;

    let key_line = &state.lines[line_start];
    let indent = &key_line[..key_line.len() - key_line.trim_start().len()];

    let render = |item: &Value| match item {
        Value::Str(s) if !s.starts_with('"') => format!("\"{}\"", s),
        other => other.to_string(),
    };

    let rendered: Vec<String> = if show_type == ShowType::Inline {
        let body: Vec<String> = items.iter().map(&render).collect();
        vec![format!("{}    {}", indent, body.join(" "))]
    } else {
        items
            .iter()
            .map(|item| format!("{}    {}", indent, render(item)))
            .collect()
    };

    let opener = find_any_opener(&state.lines, line_start, block_end)
        .ok_or_else(|| MutationError::Unindexed(route.to_string()))?;

    tracing::debug!(route = %route, lines = rendered.len(), "rewrite list block");
    state.lines.splice(opener + 1..block_end, rendered);
    Ok(Outcome::Structural)
}

/// Patch `list[i].field` inside a parenthesized run of braced records.
fn set_record_field_line(
    state: &mut DocState,
    key: &str,
    idx: usize,
    field: &str,
    value: &Value,
) -> MutationResult<Outcome> {
    let id = state
        .tree
        .find(&Route::parse(key))
        .ok_or_else(|| MutationError::NodeNotFound(key.to_string()))?;
    let node = state.tree.get(id);
    let block_end = node
        .block_end_line
        .ok_or_else(|| MutationError::Unindexed(key.to_string()))?;

    let mut cur = -1i64;
    let mut i = node.line_start + 1;

    while i <= block_end {
        if state.lines[i].trim() == "{" {
            cur += 1;
            i += 1;

            if cur != idx as i64 {
                // Skip the rest of this record.
                let mut depth = 1;
                while i <= block_end && depth > 0 {
                    match state.lines[i].trim() {
                        "{" => depth += 1,
                        "}" => depth -= 1,
                        _ => {}
                    }
                    i += 1;
                }
                continue;
            }

            while i <= block_end {
                let line = state.lines[i].clone();
                let trimmed = line.trim();

                if trimmed == "}" {
                    return Err(MutationError::NodeNotFound(format!(
                        "{}[{}].{}",
                        key, idx, field
                    )));
                }

                if trimmed.starts_with(field) {
                    let indent_len = line.len() - line.trim_start().len();
                    let bytes = line.as_bytes();

                    let mut val_start = indent_len + field.len();
                    while val_start < bytes.len()
                        && (bytes[val_start] == b' ' || bytes[val_start] == b'\t')
                    {
                        val_start += 1;
                    }
                    let mut val_end = val_start;
                    while val_end < bytes.len() && bytes[val_end] != b';' && bytes[val_end] != b'/'
                    {
                        val_end += 1;
                    }

                    replace_cols(&mut state.lines, i, val_start, val_end, &value.to_string());
                    return Ok(Outcome::Structural);
                }

                i += 1;
            }
        }
        i += 1;
    }

    Err(MutationError::OutOfRange {
        route: format!("{}[{}]", key, idx),
        index: idx,
    })
}

/// Default path: replace only the value's column span on its line. A
/// trailing `//` comment is preserved unchanged after the new value;
/// 3-element lists render as `(x y z)`.
fn set_scalar(state: &mut DocState, route: &Route, value: &Value) -> MutationResult<Outcome> {
    let id = state
        .tree
        .find(route)
        .ok_or_else(|| MutationError::NodeNotFound(route.to_string()))?;
    let node = state.tree.get(id);
    let vcol = node
        .value_col
        .ok_or_else(|| MutationError::Unindexed(route.to_string()))?;
    let line_no = node.line_start;

    let value_str = value.to_string();
    let line = &state.lines[line_no];

    let comment_pos = line
        .get(vcol.end..)
        .and_then(|rest| rest.find("//"))
        .map(|p| p + vcol.end);

    let (body, comment) = match comment_pos {
        Some(pos) => (
            line[..pos].trim_end().to_string(),
            format!(" {}", line[pos..].trim_start()),
        ),
        None => (line.clone(), String::new()),
    };

    let tail = body.get(vcol.end..).unwrap_or("");
    let new_line = format!("{}{}{}{}", &body[..vcol.start], value_str, tail, comment);

    tracing::debug!(route = %route, line = line_no, "patch value span");
    state.lines[line_no] = new_line;

    let node = state.tree.get_mut(id);
    node.value = Some(value.clone());
    node.value_col = Some(ColSpan {
        start: vcol.start,
        end: vcol.start + value_str.len(),
    });
    Ok(Outcome::Patched)
}

// ---------------------------------------------------------------------------
// remove

fn remove(state: &mut DocState, route: &str) -> MutationResult<Outcome> {
    let parsed = Route::parse(route);

    if let [Segment::Indexed { key, index }, Segment::Key(field)] = parsed.segments() {
        return remove_record_field(state, key, *index, field);
    }

    if let Some(Segment::Indexed { key, index }) = parsed.segments().last() {
        return remove_indexed(state, &parsed, key, *index);
    }

    let id = state
        .tree
        .find(&parsed)
        .ok_or_else(|| MutationError::NodeNotFound(route.to_string()))?;
    remove_node(state, id)
}

/// Delete a node's full line range.
fn remove_node(state: &mut DocState, id: NodeId) -> MutationResult<Outcome> {
    let node = state.tree.get(id);

    let start = node.line_start;
    let end = match node.block_end_line {
        Some(close) => close + 1,
        None => start + 1,
    };

    tracing::debug!(start, end, "remove entry");
    state.lines.drain(start..end);
    state.tree.unlink(id);
    normalize_blanks(&mut state.lines, start);
    Ok(Outcome::Structural)
}

/// Trailing `key[i]` is context-dependent: the nth sibling when the key
/// recurs at this level, otherwise the nth item of the key's
/// parenthesized list.
fn remove_indexed(
    state: &mut DocState,
    route: &Route,
    key: &str,
    idx: usize,
) -> MutationResult<Outcome> {
    let parent = state
        .tree
        .find(&route.parent())
        .ok_or_else(|| MutationError::NodeNotFound(route.to_string()))?;
    let group = state
        .tree
        .get(parent)
        .child_map
        .get(key)
        .cloned()
        .unwrap_or_default();

    if group.len() > 1 {
        let id = *group.get(idx).ok_or(MutationError::OutOfRange {
            route: route.to_string(),
            index: idx,
        })?;
        return remove_node(state, id);
    }

    let id = *group
        .first()
        .ok_or_else(|| MutationError::NodeNotFound(route.to_string()))?;
    remove_list_item(state, id, route, idx)
}

/// Delete one item of the node's parenthesized list: a braced record's
/// full line range, or a single line for a scalar item. The scan never
/// leaves the node's own line range.
fn remove_list_item(
    state: &mut DocState,
    id: NodeId,
    route: &Route,
    idx: usize,
) -> MutationResult<Outcome> {
    let node = state.tree.get(id);
    let close = node
        .block_end_line
        .ok_or_else(|| MutationError::mismatch(route.to_string(), "not a list block"))?;
    let open = find_opener(&state.lines, node.line_start, close, '(')
        .ok_or_else(|| MutationError::Unindexed(route.to_string()))?;

    let braced = state.lines[open + 1..close]
        .iter()
        .any(|line| line.contains('{'));

    if braced {
        let items = braced_item_ranges(&state.lines, open + 1, close);
        let (s, e) = *items.get(idx).ok_or(MutationError::OutOfRange {
            route: route.to_string(),
            index: idx,
        })?;

        tracing::debug!(route = %route, idx, start = s, end = e, "remove braced list item");
        state.lines.drain(s..=e);
        normalize_blanks(&mut state.lines, s);
        return Ok(Outcome::Structural);
    }

    let candidates: Vec<usize> = (open + 1..close)
        .filter(|i| {
            let t = state.lines[*i].trim();
            !t.is_empty() && !t.starts_with("//")
        })
        .collect();

    let line = *candidates.get(idx).ok_or(MutationError::OutOfRange {
        route: route.to_string(),
        index: idx,
    })?;

    tracing::debug!(route = %route, idx, line, "remove scalar list item");
    state.lines.remove(line);
    normalize_blanks(&mut state.lines, line);
    Ok(Outcome::Structural)
}

/// Delete a single field line inside one braced record of a list.
fn remove_record_field(
    state: &mut DocState,
    key: &str,
    idx: usize,
    field: &str,
) -> MutationResult<Outcome> {
    let id = state
        .tree
        .find(&Route::parse(key))
        .ok_or_else(|| MutationError::NodeNotFound(key.to_string()))?;
    let node = state.tree.get(id);
    let close = node
        .block_end_line
        .ok_or_else(|| MutationError::Unindexed(key.to_string()))?;
    let open = find_opener(&state.lines, node.line_start, close, '(')
        .ok_or_else(|| MutationError::Unindexed(key.to_string()))?;

    let items = braced_item_ranges(&state.lines, open + 1, close);
    let (item_start, item_end) = *items.get(idx).ok_or(MutationError::OutOfRange {
        route: format!("{}[{}]", key, idx),
        index: idx,
    })?;

    for i in item_start + 1..item_end {
        if state.lines[i].trim_start().starts_with(field) {
            tracing::debug!(key, idx, field, line = i, "remove record field");
            state.lines.remove(i);
            normalize_blanks(&mut state.lines, i);
            return Ok(Outcome::Structural);
        }
    }

    Err(MutationError::NodeNotFound(format!(
        "{}[{}].{}",
        key, idx, field
    )))
}

// ---------------------------------------------------------------------------
// clear

/// Empty a block's or list's contents while retaining the surrounding
/// braces/parentheses and the key line.
fn clear(state: &mut DocState, route: &str) -> MutationResult<Outcome> {
    let parsed = Route::parse(route);
    let id = state
        .tree
        .find(&parsed)
        .ok_or_else(|| MutationError::NodeNotFound(route.to_string()))?;
    let node = state.tree.get(id);

    if let Some(block_end) = node.block_end_line {
        let opener = find_any_opener(&state.lines, node.line_start, block_end)
            .ok_or_else(|| MutationError::Unindexed(route.to_string()))?;

        if opener + 1 < block_end {
            tracing::debug!(route, opener, block_end, "clear block contents");
            state.lines.drain(opener + 1..block_end);
        }
        return Ok(Outcome::Structural);
    }

    // Inline list on the key line: empty the parenthesized span. A count
    // prefix is part of the list encoding and is regenerated as zero.
    if matches!(node.value, Some(Value::List(_))) {
        let line_no = node.line_start;
        let line = &state.lines[line_no];
        if let Some(l) = line.find('(') {
            if let Some(r) = line[l + 1..].find(')').map(|p| p + l + 1) {
                let bytes = line.as_bytes();
                let mut count_start = l;
                while count_start > 0 && bytes[count_start - 1].is_ascii_digit() {
                    count_start -= 1;
                }

                if count_start < l {
                    replace_cols(&mut state.lines, line_no, count_start, r + 1, "0()");
                } else {
                    replace_cols(&mut state.lines, line_no, l + 1, r, "");
                }
                return Ok(Outcome::Structural);
            }
        }
    }

    Err(MutationError::mismatch(route, "not a block or list"))
}

// ---------------------------------------------------------------------------
// shared text helpers

pub(crate) fn replace_cols(
    lines: &mut [String],
    line: usize,
    col_start: usize,
    col_end: usize,
    text: &str,
) {
    let old = &lines[line];
    lines[line] = format!("{}{}{}", &old[..col_start], text, &old[col_end..]);
}

pub(crate) fn join_values(items: &[Value]) -> String {
    let parts: Vec<String> = items.iter().map(Value::to_string).collect();
    parts.join(" ")
}

/// Line range inside a node's block: `(line_start + 1, block_end_line)`,
/// or the whole buffer for the root.
fn block_range(state: &DocState, id: NodeId) -> (usize, usize) {
    let node = state.tree.get(id);
    match node.block_end_line {
        Some(end) => (node.line_start + 1, end),
        None if node.parent.is_none() => (0, state.lines.len()),
        None => (node.line_start, node.line_start + 1),
    }
}

/// First line in `[start, end]` containing `which`.
fn find_opener(lines: &[String], start: usize, end: usize, which: char) -> Option<usize> {
    (start..=end.min(lines.len().saturating_sub(1))).find(|i| lines[*i].contains(which))
}

/// First line in `[start, end]` containing either kind of opener.
fn find_any_opener(lines: &[String], start: usize, end: usize) -> Option<usize> {
    (start..=end.min(lines.len().saturating_sub(1)))
        .find(|i| lines[*i].contains('{') || lines[*i].contains('('))
}

/// The keyword leading each record of a fixed-arity block: the first word
/// of the first significant line inside the parens.
fn record_keyword(lines: &[String], start: usize, end: usize) -> Option<String> {
    for line in &lines[start..end] {
        let t = line.trim();
        if t.is_empty() || t.starts_with("//") || t.starts_with('(') || t.starts_with(')') {
            continue;
        }
        return t.split_whitespace().next().map(String::from);
    }
    None
}

/// Same-line parenthesized groups as `(open, close)` column pairs.
fn paren_groups(line: &str) -> Vec<(usize, usize)> {
    let mut groups = Vec::new();
    let mut pos = 0;
    while let Some(l) = line[pos..].find('(').map(|p| p + pos) {
        let Some(r) = line[l + 1..].find(')').map(|p| p + l + 1) else {
            break;
        };
        groups.push((l, r));
        pos = r + 1;
    }
    groups
}

/// Braced item line ranges `(open_line, close_line)` inside `[start, end)`.
fn braced_item_ranges(lines: &[String], start: usize, end: usize) -> Vec<(usize, usize)> {
    let mut items = Vec::new();
    let mut depth = 0i32;
    let mut cur_start: Option<usize> = None;

    for (j, line) in lines.iter().enumerate().take(end).skip(start) {
        if line.contains('{') && cur_start.is_none() {
            cur_start = Some(j);
        }

        if cur_start.is_some() {
            depth += line.matches('{').count() as i32;
            depth -= line.matches('}').count() as i32;

            if depth == 0 {
                items.push((cur_start.take().unwrap(), j));
            }
        }
    }

    items
}

/// Collapse the run of blank lines meeting at a deletion site down to one.
/// Local by design: lines away from the site are never touched.
pub(crate) fn normalize_blanks(lines: &mut Vec<String>, site: usize) {
    let site = site.min(lines.len());

    let mut run_start = site;
    while run_start > 0
        && run_start <= lines.len()
        && lines
            .get(run_start - 1)
            .is_some_and(|l| l.trim().is_empty())
    {
        run_start -= 1;
    }

    let mut run_end = run_start;
    while run_end < lines.len() && lines[run_end].trim().is_empty() {
        run_end += 1;
    }

    if run_end - run_start >= 2 {
        lines.drain(run_start..run_end - 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::DocState;

    const DOC: &str = "\
startFrom       startTime;
stopAt          endTime;   // stop criterion

outlet
{
    type        patch;
    name        outlet_face;
    inGroups    2(wall patch);

    maxY
    {
        name    fluid;
        patch   outlet;
    }
}

vertices
(
    ( 0 0 0 )
    ( 1 0 0 )
    ( 1 1 0 )
);

blocks
(
    hex (0 1 2 3 4 5 6 7) (10 10 1) simpleGrading (1 1 1)
    hex (8 9 10 11 12 13 14 15) (20 20 1) simpleGrading (2 2 1)
);

regions
(
    fluid   (region1 region2)
    solid   (region3)
);

actions
(
    {
        name        action1;
        type        faceZoneSet;
        faceSet     faces1;
    }
    {
        name        action2;
        type        cellZoneSet;
        faceSet     faces2;
    }
);
";

    fn state() -> DocState {
        DocState::from_source(DOC)
    }

    fn apply(state: &mut DocState, mutation: Mutation) -> MutationResult<Outcome> {
        let result = mutation.apply(state);
        if matches!(result, Ok(Outcome::Structural)) {
            state.reparse();
        }
        result
    }

    fn set(state: &mut DocState, route: &str, value: Value) -> MutationResult<Outcome> {
        apply(
            state,
            Mutation::SetValue {
                route: route.to_string(),
                value,
                show_type: ShowType::Auto,
                map_key: None,
            },
        )
    }

    fn strs(items: &[&str]) -> Value {
        Value::List(items.iter().map(|s| Value::str(*s)).collect())
    }

    fn nums(items: &[f64]) -> Value {
        Value::List(items.iter().map(|n| Value::Number(*n)).collect())
    }

    #[test]
    fn test_rename_preserves_value_column() {
        let mut s = state();
        let before = s.lines[6].clone();
        assert_eq!(before, "    name        outlet_face;");

        apply(
            &mut s,
            Mutation::Rename {
                route: "outlet.name".into(),
                new_key: "label".into(),
            },
        )
        .unwrap();

        // Shorter key: the gap absorbs the difference, value column fixed.
        assert_eq!(s.lines[6], "    label       outlet_face;");
    }

    #[test]
    fn test_rename_longer_key_inserts_one_space() {
        let mut s = state();
        apply(
            &mut s,
            Mutation::Rename {
                route: "outlet.name".into(),
                new_key: "aVeryMuchLongerKey".into(),
            },
        )
        .unwrap();
        assert_eq!(s.lines[6], "    aVeryMuchLongerKey outlet_face;");
    }

    #[test]
    fn test_set_scalar_touches_only_value_span() {
        let mut s = state();
        set(&mut s, "startFrom", Value::str("latestTime")).unwrap();
        assert_eq!(s.lines[0], "startFrom       latestTime;");
    }

    #[test]
    fn test_set_scalar_preserves_trailing_comment() {
        let mut s = state();
        set(&mut s, "stopAt", Value::str("writeNow")).unwrap();
        assert_eq!(s.lines[1], "stopAt          writeNow; // stop criterion");
    }

    #[test]
    fn test_set_vector_value() {
        let mut s = state();
        set(&mut s, "outlet.maxY.patch", nums(&[1.0, 2.0, 3.0])).unwrap();
        assert_eq!(s.lines[12], "        patch   (1 2 3);");
    }

    #[test]
    fn test_count_prefixed_rewrite() {
        let mut s = state();
        set(&mut s, "outlet.inGroups", strs(&["wall", "patch", "boundary"])).unwrap();
        assert_eq!(s.lines[7], "    inGroups    3(wall patch boundary);");
    }

    #[test]
    fn test_vector_block_rewrite() {
        let mut s = state();
        set(
            &mut s,
            "vertices",
            Value::list([nums(&[0.0, 0.0, 0.0]), nums(&[1.0, 1.0, 1.0])]),
        )
        .unwrap();

        assert_eq!(s.lines[17], "(");
        assert_eq!(s.lines[18], "    ( 0  0  0 )");
        assert_eq!(s.lines[19], "    ( 1  1  1 )");
        assert_eq!(s.lines[20], ");");
    }

    #[test]
    fn test_single_vertex_set_is_rejected() {
        let mut s = state();
        let before = s.text();
        assert!(set(&mut s, "vertices[1]", nums(&[5.0, 5.0, 5.0])).is_err());
        assert_eq!(s.text(), before);
    }

    #[test]
    fn test_block_record_field_patch() {
        let mut s = state();
        apply(
            &mut s,
            Mutation::SetValue {
                route: "blocks[0]".into(),
                value: nums(&[30.0, 30.0, 30.0]),
                show_type: ShowType::Auto,
                map_key: Some("cells".into()),
            },
        )
        .unwrap();

        assert_eq!(
            s.lines[25],
            "    hex (0 1 2 3 4 5 6 7) (30 30 30) simpleGrading (1 1 1)"
        );
        // Second record untouched.
        assert_eq!(
            s.lines[26],
            "    hex (8 9 10 11 12 13 14 15) (20 20 1) simpleGrading (2 2 1)"
        );
    }

    #[test]
    fn test_block_grading_patch() {
        let mut s = state();
        apply(
            &mut s,
            Mutation::SetValue {
                route: "blocks[1]".into(),
                value: nums(&[3.0, 3.0, 3.0]),
                show_type: ShowType::Auto,
                map_key: Some("grading".into()),
            },
        )
        .unwrap();
        assert_eq!(
            s.lines[26],
            "    hex (8 9 10 11 12 13 14 15) (20 20 1) simpleGrading (3 3 3)"
        );
    }

    #[test]
    fn test_region_type_patch_keeps_alignment() {
        let mut s = state();
        apply(
            &mut s,
            Mutation::SetValue {
                route: "regions[0]".into(),
                value: Value::str("newFluid"),
                show_type: ShowType::Auto,
                map_key: Some("type".into()),
            },
        )
        .unwrap();
        assert_eq!(s.lines[31], "    newFluid (region1 region2)");
        assert_eq!(s.lines[32], "    solid   (region3)");
    }

    #[test]
    fn test_region_names_patch() {
        let mut s = state();
        apply(
            &mut s,
            Mutation::SetValue {
                route: "regions[1]".into(),
                value: strs(&["regionA", "regionB"]),
                show_type: ShowType::Auto,
                map_key: Some("names".into()),
            },
        )
        .unwrap();
        assert_eq!(s.lines[32], "    solid   (regionA regionB)");
    }

    #[test]
    fn test_record_field_line_patch() {
        let mut s = state();
        set(&mut s, "actions[1].faceSet", Value::str("newFaces")).unwrap();
        assert_eq!(s.lines[45], "        faceSet     newFaces;");
    }

    #[test]
    fn test_record_name_resolves_to_index() {
        let mut s = state();
        set(&mut s, "actions.action2.type", Value::str("pointSet")).unwrap();
        assert_eq!(s.lines[44], "        type        pointSet;");
    }

    #[test]
    fn test_remove_scalar_key() {
        let mut s = state();
        apply(
            &mut s,
            Mutation::Remove {
                route: "outlet.maxY.name".into(),
            },
        )
        .unwrap();

        assert!(!crate::query::has_key(&s.data, "outlet.maxY.name"));
        assert!(crate::query::has_key(&s.data, "outlet.maxY.patch"));
    }

    #[test]
    fn test_remove_block_deletes_full_range() {
        let mut s = state();
        let before_len = s.lines.len();
        apply(
            &mut s,
            Mutation::Remove {
                route: "outlet.maxY".into(),
            },
        )
        .unwrap();

        assert!(!crate::query::has_key(&s.data, "outlet.maxY"));
        // Four block lines gone, plus one collapsed blank.
        assert!(s.lines.len() <= before_len - 4);
        assert!(crate::query::has_key(&s.data, "outlet.type"));
    }

    #[test]
    fn test_remove_list_item_keeps_others() {
        let mut s = state();
        apply(
            &mut s,
            Mutation::Remove {
                route: "actions[0]".into(),
            },
        )
        .unwrap();

        let names = crate::query::get_key_name_list(&s.data, "actions");
        assert_eq!(names, vec!["action2"]);
    }

    #[test]
    fn test_remove_record_field() {
        let mut s = state();
        apply(
            &mut s,
            Mutation::Remove {
                route: "actions[0].faceSet".into(),
            },
        )
        .unwrap();

        let actions = s.data.as_dict().unwrap().get("actions").unwrap().as_list().unwrap();
        assert!(!actions[0].as_dict().unwrap().contains_key("faceSet"));
        assert!(actions[1].as_dict().unwrap().contains_key("faceSet"));
    }

    #[test]
    fn test_remove_out_of_range_changes_nothing() {
        let mut s = state();
        let before = s.text();
        assert!(apply(
            &mut s,
            Mutation::Remove {
                route: "actions[7]".into()
            }
        )
        .is_err());
        assert_eq!(s.text(), before);
    }

    #[test]
    fn test_remove_repeated_key_sibling_only() {
        let source = "\
sensor          alpha;
sensor          beta;

vertices
(
    ( 0 0 0 )
    ( 1 0 0 )
);
";
        let mut s = DocState::from_source(source);
        apply(
            &mut s,
            Mutation::Remove {
                route: "sensor[1]".into(),
            },
        )
        .unwrap();

        assert_eq!(s.lines[0], "sensor          alpha;");
        assert!(!s.text().contains("beta"));
        // The paren block further down keeps all of its items.
        assert!(s.text().contains("( 0 0 0 )"));
        assert!(s.text().contains("( 1 0 0 )"));
    }

    #[test]
    fn test_remove_vertex_by_index() {
        let mut s = state();
        apply(
            &mut s,
            Mutation::Remove {
                route: "vertices[1]".into(),
            },
        )
        .unwrap();

        assert_eq!(s.lines[18], "    ( 0 0 0 )");
        assert_eq!(s.lines[19], "    ( 1 1 0 )");
    }

    #[test]
    fn test_remove_indexed_on_plain_scalar_changes_nothing() {
        let mut s = state();
        let before = s.text();
        assert!(apply(
            &mut s,
            Mutation::Remove {
                route: "startFrom[0]".into()
            }
        )
        .is_err());
        assert_eq!(s.text(), before);
    }

    #[test]
    fn test_clear_block() {
        let mut s = state();
        apply(
            &mut s,
            Mutation::Clear {
                route: "outlet.maxY".into(),
            },
        )
        .unwrap();

        assert!(crate::query::has_key(&s.data, "outlet.maxY"));
        assert_eq!(crate::query::get_key_list(&s.data, "outlet.maxY"), Vec::<String>::new());
    }

    #[test]
    fn test_clear_count_prefixed_list_resets_count() {
        let mut s = state();
        apply(
            &mut s,
            Mutation::Clear {
                route: "outlet.inGroups".into(),
            },
        )
        .unwrap();
        assert_eq!(s.lines[7], "    inGroups    0();");
    }

    #[test]
    fn test_locality_of_scalar_patch() {
        let mut s = state();
        let before: Vec<String> = s.lines.clone();
        set(&mut s, "startFrom", Value::str("latestTime")).unwrap();

        for (i, line) in s.lines.iter().enumerate() {
            if i != 0 {
                assert_eq!(line, &before[i], "line {} changed", i);
            }
        }
    }

    #[test]
    fn test_normalize_blanks_is_local() {
        let mut lines: Vec<String> = vec![
            "a;".into(),
            "".into(),
            "".into(),
            "b;".into(),
            "".into(),
            "".into(),
            "c;".into(),
        ];
        normalize_blanks(&mut lines, 2);
        // Only the run at the site collapsed.
        assert_eq!(lines, vec!["a;", "", "b;", "", "", "c;"]);
    }
}
