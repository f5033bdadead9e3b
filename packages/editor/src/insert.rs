//! Insertion: new entries, scaffolded intermediate blocks and list
//! records. Existing lines are never reformatted; insertion only splices
//! freshly rendered lines into the buffer.

use crate::document::DocState;
use crate::mutations::{MutationError, MutationResult, Outcome};
use crate::query::ShowType;
use casedict_parser::{Dict, Route, Segment, Value};
use serde::{Deserialize, Serialize};

/// Column where values of newly rendered entries start.
const KEY_COL: usize = 16;

/// Nesting step for rendered lines.
const INDENT: usize = 4;

/// Placement of an inserted entry relative to an existing sibling key.
/// Without an anchor, new entries go at the end of their block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Anchor {
    Before(String),
    After(String),
}

/// Insert a new entry at `route`, creating any missing intermediate
/// blocks along the way.
pub(crate) fn insert_value(
    state: &mut DocState,
    route: &str,
    value: &Value,
    show_type: ShowType,
    anchor: Option<&Anchor>,
) -> MutationResult<Outcome> {
    let parsed = Route::parse(route);
    let key = match parsed.segments().last() {
        Some(Segment::Key(k)) => k.clone(),
        _ => {
            return Err(MutationError::StructureMismatch {
                route: route.to_string(),
                message: "insertion target must be a plain key".to_string(),
            })
        }
    };

    let parent = parsed.parent();
    ensure_block(state, &parent)?;

    let (insert_at, indent) = insertion_point(state, &parent, anchor)?;
    let rendered = render_entry(&key, value, show_type, indent);

    tracing::debug!(route, line = insert_at, "insert entry");
    state.lines.splice(insert_at..insert_at, rendered);
    Ok(Outcome::Structural)
}

/// Append one braced record to a parenthesized list, before its closing
/// parenthesis.
pub(crate) fn insert_list_item(
    state: &mut DocState,
    route: &str,
    item: &Dict,
) -> MutationResult<Outcome> {
    let parsed = Route::parse(route);
    let id = state
        .tree
        .find(&parsed)
        .ok_or_else(|| MutationError::NodeNotFound(route.to_string()))?;
    let node = state.tree.get(id);
    let close = node
        .block_end_line
        .ok_or_else(|| MutationError::Unindexed(route.to_string()))?;

    let indent = line_indent(&state.lines[node.line_start]) + INDENT;
    let pad = " ".repeat(indent);

    let mut rendered = vec![format!("{}{{", pad)];
    for (field, value) in item.iter() {
        rendered.push(format!(
            "{}{};",
            key_prefix(indent + INDENT, field),
            value
        ));
    }
    rendered.push(format!("{}}}", pad));

    tracing::debug!(route, line = close, "insert list record");
    state.lines.splice(close..close, rendered);
    Ok(Outcome::Structural)
}

/// Make every segment of `route` resolve to a block node, inserting empty
/// brace blocks for the segments that don't exist yet.
fn ensure_block(state: &mut DocState, route: &Route) -> MutationResult<()> {
    let mut prefix = String::new();

    for seg in route.segments() {
        let Segment::Key(key) = seg else {
            // Indexed prefixes must already exist; they cannot be scaffolded.
            return match state.tree.find(route) {
                Some(_) => Ok(()),
                None => Err(MutationError::NodeNotFound(route.to_string())),
            };
        };

        if !prefix.is_empty() {
            prefix.push('.');
        }
        prefix.push_str(key);

        let here = Route::parse(&prefix);
        if state.tree.find(&here).is_some() {
            continue;
        }

        let (insert_at, indent) = insertion_point(state, &here.parent(), None)?;
        let pad = " ".repeat(indent);
        let block = vec![
            format!("{}{}", pad, key),
            format!("{}{{", pad),
            format!("{}}}", pad),
        ];

        tracing::debug!(key, line = insert_at, "scaffold intermediate block");
        state.lines.splice(insert_at..insert_at, block);
        state.reparse();
    }

    Ok(())
}

/// Default line index and indentation for a new entry inside `parent`.
/// An anchor pins the entry to a named sibling instead.
fn insertion_point(
    state: &DocState,
    parent: &Route,
    anchor: Option<&Anchor>,
) -> MutationResult<(usize, usize)> {
    let (default_at, indent, block_start) = if parent.is_empty() {
        // Root level: append before the trailing empty element kept by the
        // line split, so the file keeps its final newline.
        let at = match state.lines.last() {
            Some(last) if last.is_empty() => state.lines.len() - 1,
            _ => state.lines.len(),
        };
        (at, 0, 0)
    } else {
        let id = state
            .tree
            .find(parent)
            .ok_or_else(|| MutationError::NodeNotFound(parent.to_string()))?;
        let node = state.tree.get(id);
        let close = node
            .block_end_line
            .ok_or_else(|| MutationError::Unindexed(parent.to_string()))?;
        let indent = line_indent(&state.lines[node.line_start]) + INDENT;
        (close, indent, node.line_start)
    };

    let Some(anchor) = anchor else {
        return Ok((default_at, indent));
    };

    let sibling_key = match anchor {
        Anchor::Before(k) | Anchor::After(k) => k,
    };
    let mut sibling_route = parent.to_string();
    if !sibling_route.is_empty() {
        sibling_route.push('.');
    }
    sibling_route.push_str(sibling_key);

    let sibling = state
        .tree
        .find(&Route::parse(&sibling_route))
        .ok_or_else(|| MutationError::NodeNotFound(sibling_route.clone()))?;
    let sibling = state.tree.get(sibling);
    if sibling.line_start < block_start {
        return Err(MutationError::NodeNotFound(sibling_route));
    }

    let at = match anchor {
        Anchor::Before(_) => sibling.line_start,
        Anchor::After(_) => sibling.line_end + 1,
    };
    Ok((at, indent))
}

/// Render one entry as lines: a scalar on a single padded line, a mapping
/// as a brace block, a list inline or as a paren block.
fn render_entry(key: &str, value: &Value, show_type: ShowType, indent: usize) -> Vec<String> {
    let pad = " ".repeat(indent);

    match value {
        Value::Dict(d) => {
            let mut lines = vec![format!("{}{}", pad, key), format!("{}{{", pad)];
            for (k, v) in d.iter() {
                lines.extend(render_entry(k, v, ShowType::Auto, indent + INDENT));
            }
            lines.push(format!("{}}}", pad));
            lines
        }
        Value::List(items) => {
            let inline = show_type == ShowType::Inline
                || show_type == ShowType::Vector
                || value.is_numeric_list();
            if inline {
                let joined: Vec<String> = items.iter().map(Value::to_string).collect();
                vec![format!("{}({});", key_prefix(indent, key), joined.join(" "))]
            } else {
                let mut lines = vec![format!("{}{}", pad, key), format!("{}(", pad)];
                let item_pad = " ".repeat(indent + INDENT);
                for item in items {
                    lines.push(format!("{}{}", item_pad, item));
                }
                lines.push(format!("{});", pad));
                lines
            }
        }
        _ => vec![format!("{}{};", key_prefix(indent, key), value)],
    }
}

/// `indent + key`, padded so the value starts at [`KEY_COL`] when it fits,
/// with a single separating space otherwise.
fn key_prefix(indent: usize, key: &str) -> String {
    let mut prefix = format!("{}{}", " ".repeat(indent), key);
    if prefix.len() < KEY_COL {
        prefix.push_str(&" ".repeat(KEY_COL - prefix.len()));
    } else {
        prefix.push(' ');
    }
    prefix
}

fn line_indent(line: &str) -> usize {
    line.len() - line.trim_start().len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::DocState;
    use crate::query;

    const DOC: &str = "\
startFrom       startTime;

outlet
{
    type        patch;
    name        outlet_face;
}

actions
(
    {
        name        action1;
        type        faceZoneSet;
    }
);
";

    fn state() -> DocState {
        DocState::from_source(DOC)
    }

    fn insert(s: &mut DocState, route: &str, value: Value) {
        insert_value(s, route, &value, ShowType::Auto, None).unwrap();
        s.reparse();
    }

    #[test]
    fn test_insert_scalar_into_block() {
        let mut s = state();
        insert(&mut s, "outlet.offset", Value::Number(2.0));

        assert_eq!(s.lines[6], "    offset      2;");
        assert_eq!(
            query::get_value(&s.data, &s.tree, "outlet.offset", ShowType::Auto, None),
            Some(Value::Number(2.0))
        );
    }

    #[test]
    fn test_insert_at_root_keeps_final_newline() {
        let mut s = state();
        insert(&mut s, "deltaT", Value::Number(0.005));

        assert_eq!(s.lines[s.lines.len() - 2], "deltaT          0.005;");
        assert_eq!(s.lines.last().map(String::as_str), Some(""));
    }

    #[test]
    fn test_insert_before_anchor() {
        let mut s = state();
        insert_value(
            &mut s,
            "outlet.kind",
            &Value::str("wall"),
            ShowType::Auto,
            Some(&Anchor::Before("name".to_string())),
        )
        .unwrap();
        s.reparse();

        assert_eq!(s.lines[5], "    kind        wall;");
        assert_eq!(s.lines[6], "    name        outlet_face;");
    }

    #[test]
    fn test_insert_after_anchor() {
        let mut s = state();
        insert_value(
            &mut s,
            "outlet.kind",
            &Value::str("wall"),
            ShowType::Auto,
            Some(&Anchor::After("type".to_string())),
        )
        .unwrap();
        s.reparse();

        assert_eq!(s.lines[4], "    type        patch;");
        assert_eq!(s.lines[5], "    kind        wall;");
    }

    #[test]
    fn test_insert_scaffolds_missing_blocks() {
        let mut s = state();
        insert(&mut s, "boundaryField.inlet.type", Value::str("fixedValue"));

        assert!(query::has_key(&s.data, "boundaryField.inlet.type"));
        let idx = s
            .lines
            .iter()
            .position(|l| l.trim() == "boundaryField")
            .unwrap();
        assert_eq!(s.lines[idx + 1], "{");
        assert_eq!(s.lines[idx + 2], "    inlet");
        assert_eq!(s.lines[idx + 3], "    {");
        assert_eq!(s.lines[idx + 4], "        type    fixedValue;");
    }

    #[test]
    fn test_insert_numeric_list_renders_inline() {
        let mut s = state();
        insert(
            &mut s,
            "outlet.origin",
            Value::List(vec![
                Value::Number(0.0),
                Value::Number(1.0),
                Value::Number(2.0),
            ]),
        );
        assert_eq!(s.lines[6], "    origin      (0 1 2);");
    }

    #[test]
    fn test_insert_dict_renders_block() {
        let mut s = state();
        let mut d = Dict::new();
        d.push("type", Value::str("slip"));
        insert(&mut s, "outlet.maxY", Value::Dict(d));

        assert_eq!(s.lines[6], "    maxY");
        assert_eq!(s.lines[7], "    {");
        assert_eq!(s.lines[8], "        type    slip;");
        assert_eq!(s.lines[9], "    }");
        assert!(query::has_key(&s.data, "outlet.maxY.type"));
    }

    #[test]
    fn test_insert_list_item_appends_record() {
        let mut s = state();
        let mut item = Dict::new();
        item.push("name", Value::str("action2"));
        item.push("type", Value::str("cellZoneSet"));
        insert_list_item(&mut s, "actions", &item).unwrap();
        s.reparse();

        assert_eq!(
            query::get_key_name_list(&s.data, "actions"),
            vec!["action1", "action2"]
        );
        assert_eq!(s.lines[14], "    {");
        assert_eq!(s.lines[15], "        name    action2;");
        assert_eq!(s.lines[16], "        type    cellZoneSet;");
        assert_eq!(s.lines[17], "    }");
    }

    #[test]
    fn test_insert_into_missing_indexed_parent_fails() {
        let mut s = state();
        let err = insert_value(
            &mut s,
            "actions[5].field",
            &Value::str("x"),
            ShowType::Auto,
            None,
        );
        assert!(err.is_err());
    }
}
