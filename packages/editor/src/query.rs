//! Query layer: route resolution over the generic value and the node
//! tree, plus decoders for the recurring composite sub-formats
//! (count-prefixed inline lists, type/name-list pairs, fixed-arity
//! records).

use casedict_parser::{NodeTree, Route, Segment, Value};
use serde::{Deserialize, Serialize};

/// Formatting/decoding hint accepted by the query and mutation layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ShowType {
    #[default]
    Auto,
    /// Require a numeric list; absent otherwise.
    Vector,
    /// Render a rewritten list on a single line instead of one item per
    /// line (mutation layer only).
    Inline,
}

/// Field positions inside one fixed-arity record:
/// `kw (vertices) (cells) gradingKw (grading)`.
fn block_field_index(map_key: &str) -> Option<usize> {
    match map_key {
        "vertices" => Some(1),
        "cells" => Some(2),
        "grading" => Some(4),
        _ => None,
    }
}

/// Field positions inside one `[type, names]` pair.
fn region_field_index(map_key: &str) -> Option<usize> {
    match map_key {
        "type" => Some(0),
        "names" => Some(1),
        _ => None,
    }
}

/// Generic value walk. A bare key looks into mappings (with the
/// single-entry descent rule) or finds the first record carrying the key
/// in a list; a bracketed key indexes into a list-valued entry.
pub(crate) fn resolve<'v>(data: &'v Value, route: &Route) -> Option<&'v Value> {
    let mut cur = data;

    for seg in route.segments() {
        cur = match seg {
            Segment::Indexed { key, index } => {
                let list = cur.as_dict()?.get(key)?.as_list()?;
                list.get(*index)?
            }
            Segment::Index(index) => cur.as_list()?.get(*index)?,
            Segment::Key(key) => match cur {
                Value::List(items) => items
                    .iter()
                    .find_map(|item| item.as_dict().and_then(|d| d.get(key)))?,
                Value::Dict(d) => {
                    if let Some(v) = d.get(key) {
                        v
                    } else if d.len() == 1 {
                        // Single-entry descent: tolerate an extra wrapping
                        // level (e.g. a count-prefixed boundary mapping).
                        let (_, only) = d.iter().next()?;
                        only.as_dict()?.get(key)?
                    } else {
                        return None;
                    }
                }
                _ => return None,
            },
        };
    }

    Some(cur)
}

pub fn has_key(data: &Value, route: &str) -> bool {
    resolve(data, &Route::parse(route)).is_some()
}

/// Resolve a route and decode composite sub-formats keyed on the final
/// segment. Absent route, malformed index or type mismatch is `None`.
pub fn get_value(
    data: &Value,
    tree: &NodeTree,
    route: &str,
    show_type: ShowType,
    map_key: Option<&str>,
) -> Option<Value> {
    let parsed = Route::parse(route);

    // Composite records are grouped out of a flat item run, so an indexed
    // final segment must index the grouped records, not the raw items:
    // resolve the bare key and let the decoder apply the index.
    let composite = matches!(parsed.last_key(), Some("blocks") | Some("regions"));
    let lookup = if composite && parsed.last_index().is_some() {
        let mut base = parsed.parent().to_string();
        if !base.is_empty() {
            base.push('.');
        }
        base.push_str(parsed.last_key().unwrap_or_default());
        Route::parse(&base)
    } else {
        parsed.clone()
    };

    let value = match tree.find(&lookup) {
        Some(id) => tree.get(id).value.clone()?,
        None => resolve(data, &lookup)?.clone(),
    };

    match parsed.last_key() {
        Some("blocks") => decode_blocks(value, map_key, parsed.last_index()),
        Some("inGroups") => decode_ingroups(value),
        Some("regions") => decode_regions(value, map_key, parsed.last_index()),
        Some("vertices") => Some(value),
        _ if show_type == ShowType::Vector => value.is_numeric_list().then_some(value),
        _ => decode_default(value, map_key),
    }
}

/// Ordered key names of the mapping at `route` (empty for non-mappings).
pub fn get_key_list(data: &Value, route: &str) -> Vec<String> {
    match resolve(data, &Route::parse(route)) {
        Some(Value::Dict(d)) => d.keys().map(String::from).collect(),
        _ => Vec::new(),
    }
}

/// Like [`get_key_list`], but a list of records reports each record's
/// `name` field, so positional items stay identifiable after edits.
pub fn get_key_name_list(data: &Value, route: &str) -> Vec<String> {
    match resolve(data, &Route::parse(route)) {
        Some(Value::Dict(d)) => d.keys().map(String::from).collect(),
        Some(Value::List(items)) => items
            .iter()
            .filter_map(|item| item.as_dict()?.get("name"))
            .map(|v| v.to_string())
            .collect(),
        _ => Vec::new(),
    }
}

/// Group the flat token run of a fixed-arity block into records. Each
/// record starts where the leading keyword atom recurs.
pub(crate) fn group_blocks(items: &[Value]) -> Vec<Vec<Value>> {
    // Already grouped?
    if items.iter().all(|i| matches!(i, Value::List(_))) {
        return items
            .iter()
            .filter_map(|i| i.as_list().map(<[Value]>::to_vec))
            .collect();
    }

    let Some(leader) = items.first().and_then(Value::as_str) else {
        return Vec::new();
    };

    let mut records: Vec<Vec<Value>> = Vec::new();
    for item in items {
        if item.as_str() == Some(leader) {
            records.push(Vec::new());
        }
        if let Some(rec) = records.last_mut() {
            rec.push(item.clone());
        }
    }
    records
}

/// Group the flat `type (names...)` run into `[type, names]` pairs.
pub(crate) fn group_regions(items: &[Value]) -> Vec<Vec<Value>> {
    if items
        .iter()
        .all(|i| matches!(i, Value::List(l) if l.len() == 2))
    {
        return items
            .iter()
            .filter_map(|i| i.as_list().map(<[Value]>::to_vec))
            .collect();
    }

    let mut records: Vec<Vec<Value>> = Vec::new();
    for item in items {
        match item {
            Value::List(_) => {
                if let Some(rec) = records.last_mut() {
                    if rec.len() == 1 {
                        rec.push(item.clone());
                    }
                }
            }
            _ => records.push(vec![item.clone()]),
        }
    }
    records.retain(|r| r.len() == 2);
    records
}

fn decode_blocks(value: Value, map_key: Option<&str>, index: Option<usize>) -> Option<Value> {
    let items = value.as_list()?;
    let records = group_blocks(items);

    if let Some(idx) = index {
        let rec = records.get(idx)?;
        return match map_key {
            None => Some(Value::List(rec.clone())),
            Some(k) => {
                let field = block_field_index(k)?;
                rec.get(field).cloned().map(strip_inline_comment)
            }
        };
    }

    match map_key {
        None => Some(Value::List(
            records.into_iter().map(Value::List).collect(),
        )),
        Some(k) => {
            let field = block_field_index(k)?;
            Some(Value::List(
                records
                    .into_iter()
                    .filter_map(|rec| rec.get(field).cloned())
                    .map(strip_inline_comment)
                    .collect(),
            ))
        }
    }
}

fn decode_regions(value: Value, map_key: Option<&str>, index: Option<usize>) -> Option<Value> {
    let items = value.as_list()?;
    let records = group_regions(items);

    if let Some(idx) = index {
        let rec = records.get(idx)?;
        return match map_key {
            None => Some(Value::List(rec.clone())),
            Some(k) => rec.get(region_field_index(k)?).cloned(),
        };
    }

    match map_key {
        None => Some(Value::List(
            records.into_iter().map(Value::List).collect(),
        )),
        Some(k) => {
            let field = region_field_index(k)?;
            Some(Value::List(
                records
                    .into_iter()
                    .filter_map(|rec| rec.get(field).cloned())
                    .collect(),
            ))
        }
    }
}

/// Count-prefixed inline lists decode to the bare item list; the count is
/// informational and regenerated on write.
fn decode_ingroups(value: Value) -> Option<Value> {
    match value {
        Value::List(_) => Some(value),
        Value::Dict(ref d) => match d.get("values") {
            Some(v @ Value::List(_)) => Some(v.clone()),
            _ => None,
        },
        Value::Str(ref s) => {
            let open = s.find('(')?;
            let close = s[open + 1..].find(')')? + open + 1;
            Some(Value::List(
                s[open + 1..close]
                    .split_whitespace()
                    .map(Value::from_atom)
                    .collect(),
            ))
        }
        _ => None,
    }
}

fn decode_default(value: Value, map_key: Option<&str>) -> Option<Value> {
    let Some(key) = map_key else {
        return Some(value);
    };

    match value {
        Value::Dict(d) => d.get(key).cloned(),
        Value::List(items) => Some(Value::List(
            items
                .iter()
                .filter_map(|item| item.as_dict()?.get(key).cloned())
                .collect(),
        )),
        _ => None,
    }
}

fn strip_inline_comment(value: Value) -> Value {
    if let Value::Str(ref s) = value {
        if let Some(pos) = s.find("//") {
            return Value::Str(s[..pos].trim().to_string());
        }
    }
    value
}
