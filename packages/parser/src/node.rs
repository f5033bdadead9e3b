//! Position index: a tree of line/column-annotated nodes over the raw
//! lines, built by re-scanning the text independently of the extractor.
//!
//! The node tree is what makes surgical editing possible: every key knows
//! the exact column span of its key and value on its starting line, and
//! block-valued keys know the line of their matching closing brace.

use crate::route::{Route, Segment};
use crate::value::{Dict, Value};
use std::collections::HashMap;

/// Index of a node inside its `NodeTree` arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

/// Column span on a single line (byte offsets, end exclusive).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColSpan {
    pub start: usize,
    pub end: usize,
}

/// One key or list item, tracked against the raw line buffer.
#[derive(Debug, Clone)]
pub struct Node {
    /// Key text; empty for the root and for anonymous list records.
    pub key: String,
    /// Value bound from the extracted tree; a disposable clone, rebuilt on
    /// every re-parse.
    pub value: Option<Value>,
    /// Non-owning back-reference.
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub child_map: HashMap<String, Vec<NodeId>>,

    pub line_start: usize,
    pub line_end: usize,
    pub key_col: Option<ColSpan>,
    /// Span of the same-line value text, excluding a terminating `;` and
    /// any trailing comment. Absent for block-valued nodes.
    pub value_col: Option<ColSpan>,
    /// Line of the matching `}` or `)` for block-valued nodes.
    pub block_end_line: Option<usize>,
}

impl Node {
    fn new(key: impl Into<String>, line: usize) -> Self {
        Self {
            key: key.into(),
            value: None,
            parent: None,
            children: Vec::new(),
            child_map: HashMap::new(),
            line_start: line,
            line_end: line,
            key_col: None,
            value_col: None,
            block_end_line: None,
        }
    }
}

/// Arena-allocated node tree.
#[derive(Debug, Clone)]
pub struct NodeTree {
    nodes: Vec<Node>,
    root: NodeId,
}

impl NodeTree {
    fn with_root(root: Node) -> Self {
        Self {
            nodes: vec![root],
            root: NodeId(0),
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn get(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub fn get_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0]
    }

    fn add_child(&mut self, parent: NodeId, mut node: Node) -> NodeId {
        node.parent = Some(parent);
        let id = NodeId(self.nodes.len());
        let key = node.key.clone();
        self.nodes.push(node);

        let p = &mut self.nodes[parent.0];
        p.children.push(id);
        p.child_map.entry(key).or_default().push(id);
        id
    }

    /// Resolve a route against the tree.
    ///
    /// A bare key takes the first same-named child; a bracketed key indexes
    /// into the repeated-key sibling group; a bare index takes the nth
    /// child.
    pub fn find(&self, route: &Route) -> Option<NodeId> {
        let mut cur = self.root;

        for seg in route.segments() {
            let node = self.get(cur);
            cur = match seg {
                Segment::Key(k) => *node.child_map.get(k)?.first()?,
                Segment::Indexed { key, index } => *node.child_map.get(key)?.get(*index)?,
                Segment::Index(index) => *node.children.get(*index)?,
            };
        }

        Some(cur)
    }

    /// Change a node's key, keeping the parent's key lookup in sync.
    pub fn rename(&mut self, id: NodeId, new_key: impl Into<String>) {
        let new_key = new_key.into();
        let old_key = std::mem::replace(&mut self.nodes[id.0].key, new_key.clone());

        if let Some(parent) = self.nodes[id.0].parent {
            let p = &mut self.nodes[parent.0];
            if let Some(group) = p.child_map.get_mut(&old_key) {
                group.retain(|c| *c != id);
                if group.is_empty() {
                    p.child_map.remove(&old_key);
                }
            }
            p.child_map.entry(new_key).or_default().push(id);
        }
    }

    /// Detach a node from its parent's child list and key lookup.
    pub fn unlink(&mut self, id: NodeId) {
        let Some(parent) = self.get(id).parent else {
            return;
        };
        let p = &mut self.nodes[parent.0];
        p.children.retain(|c| *c != id);
        for group in p.child_map.values_mut() {
            group.retain(|c| *c != id);
        }
        self.nodes[id.0].parent = None;
    }
}

/// Builds the `NodeTree` by scanning raw lines with line/column
/// bookkeeping, then binding each node's value from the extracted tree.
pub struct NodeBuilder<'a> {
    lines: Vec<&'a str>,
}

impl<'a> NodeBuilder<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            lines: source.split('\n').collect(),
        }
    }

    pub fn build(&self, data: &Value) -> NodeTree {
        let mut root = Node::new("", 0);
        root.line_end = self.lines.len().saturating_sub(1);
        root.value = Some(data.clone());

        let mut tree = NodeTree::with_root(root);
        let root_id = tree.root();
        self.build_range(&mut tree, root_id, 0, self.lines.len(), data.as_dict());
        tree
    }

    /// Scan `[start, end)` and attach one node per entry to `parent`.
    fn build_range(
        &self,
        tree: &mut NodeTree,
        parent: NodeId,
        start: usize,
        end: usize,
        ctx: Option<&Dict>,
    ) {
        let mut entries: Vec<(String, NodeId)> = Vec::new();
        let mut seen: HashMap<String, usize> = HashMap::new();

        let mut i = start;
        while i < end {
            let line = self.lines[i];
            let trimmed = line.trim();

            if trimmed.is_empty() || trimmed.starts_with("//") {
                i += 1;
                continue;
            }
            if trimmed.starts_with("/*") {
                while i < end && !self.lines[i].contains("*/") {
                    i += 1;
                }
                i += 1;
                continue;
            }
            let Some((ks, ke)) = first_word_span(line) else {
                // Structural punctuation with no key on this line.
                i += 1;
                continue;
            };

            let key = &line[ks..ke];
            let occurrence = *seen.get(key).unwrap_or(&0);
            *seen.entry(key.to_string()).or_insert(0) += 1;

            let binding = resolve_binding(ctx, key, occurrence);

            match self.classify_entry(i, ke, end) {
                EntryShape::BraceBlock { opener } => {
                    let Some(close) = self.match_depth(opener, end, '{', '}') else {
                        // Unbalanced nesting: leave the rest unindexed.
                        break;
                    };

                    let mut node = Node::new(key, i);
                    node.line_end = close;
                    node.key_col = Some(ColSpan { start: ks, end: ke });
                    node.block_end_line = Some(close);
                    let id = tree.add_child(parent, node);
                    entries.push((key.to_string(), id));

                    let child_ctx = binding.and_then(Value::as_dict);
                    self.build_range(tree, id, opener + 1, close, child_ctx);
                    i = close + 1;
                }
                EntryShape::ParenBlock { opener } => {
                    let Some(close) = self.match_depth(opener, end, '(', ')') else {
                        break;
                    };

                    let mut node = Node::new(key, i);
                    node.line_end = close;
                    node.key_col = Some(ColSpan { start: ks, end: ke });
                    node.block_end_line = Some(close);
                    let id = tree.add_child(parent, node);
                    entries.push((key.to_string(), id));

                    self.build_list_records(tree, id, opener + 1, close, binding);
                    i = close + 1;
                }
                EntryShape::Scalar => {
                    let mut node = Node::new(key, i);
                    node.key_col = Some(ColSpan { start: ks, end: ke });
                    node.value_col = value_span(line, ke);
                    let id = tree.add_child(parent, node);
                    entries.push((key.to_string(), id));
                    i += 1;
                }
            }
        }

        self.bind_values(tree, &entries, ctx);
    }

    /// Attach braced records inside a parenthesized block as child nodes,
    /// so list items are addressable positionally and by record name.
    fn build_list_records(
        &self,
        tree: &mut NodeTree,
        parent: NodeId,
        start: usize,
        end: usize,
        binding: Option<&Value>,
    ) {
        let mut record_index = 0usize;
        let mut j = start;

        while j < end {
            let trimmed = self.lines[j].trim();

            let (name, opener) = if trimmed.starts_with('{') {
                (String::new(), j)
            } else if is_bare_word(trimmed) {
                match self.next_significant(j + 1, end) {
                    Some(next) if self.lines[next].trim().starts_with('{') => {
                        (trimmed.to_string(), next)
                    }
                    _ => {
                        j += 1;
                        continue;
                    }
                }
            } else {
                j += 1;
                continue;
            };

            let Some(close) = self.match_depth(opener, end, '{', '}') else {
                return;
            };

            let record_value = record_binding(binding, &name, record_index);

            let mut node = Node::new(name.clone(), j);
            node.line_end = close;
            node.block_end_line = Some(close);
            node.value = record_value.cloned();
            if !name.is_empty() {
                let trimmed_start = self.lines[j].len() - self.lines[j].trim_start().len();
                node.key_col = Some(ColSpan {
                    start: trimmed_start,
                    end: trimmed_start + name.len(),
                });
            }
            let id = tree.add_child(parent, node);

            let child_ctx = record_value.and_then(Value::as_dict);
            self.build_range(tree, id, opener + 1, close, child_ctx);

            record_index += 1;
            j = close + 1;
        }
    }

    fn bind_values(&self, tree: &mut NodeTree, entries: &[(String, NodeId)], ctx: Option<&Dict>) {
        let Some(dict) = ctx else {
            return;
        };

        let mut groups: Vec<(&str, Vec<NodeId>)> = Vec::new();
        for (key, id) in entries {
            match groups.iter_mut().find(|(k, _)| k == key) {
                Some((_, ids)) => ids.push(*id),
                None => groups.push((key, vec![*id])),
            }
        }

        for (key, ids) in groups {
            let Some(value) = dict.get(key) else {
                continue;
            };

            if ids.len() > 1 {
                // Repeated sibling keys were collapsed into a list; hand
                // the nth occurrence its own item.
                if let Value::List(items) = value {
                    for (n, id) in ids.iter().enumerate() {
                        tree.get_mut(*id).value = items.get(n).cloned();
                    }
                    continue;
                }
            }
            for id in ids {
                tree.get_mut(id).value = Some(value.clone());
            }
        }
    }

    fn classify_entry(&self, line: usize, after_key: usize, end: usize) -> EntryShape {
        let rest = &self.lines[line][after_key.min(self.lines[line].len())..];

        match rest.trim_start().chars().next() {
            Some('{') => EntryShape::BraceBlock { opener: line },
            Some('(') => {
                if paren_balanced(rest) {
                    EntryShape::Scalar
                } else {
                    EntryShape::ParenBlock { opener: line }
                }
            }
            Some(_) => EntryShape::Scalar,
            None => {
                // Key alone on its line; the block opener, if any, is on a
                // following line.
                match self.next_significant(line + 1, end) {
                    Some(next) if self.lines[next].trim_start().starts_with('{') => {
                        EntryShape::BraceBlock { opener: next }
                    }
                    Some(next) if self.lines[next].trim_start().starts_with('(') => {
                        EntryShape::ParenBlock { opener: next }
                    }
                    _ => EntryShape::Scalar,
                }
            }
        }
    }

    /// Next non-blank, non-comment line index in `[from, end)`.
    fn next_significant(&self, from: usize, end: usize) -> Option<usize> {
        let mut j = from;
        while j < end {
            let t = self.lines[j].trim();
            if t.is_empty() || t.starts_with("//") {
                j += 1;
                continue;
            }
            if t.starts_with("/*") {
                while j < end && !self.lines[j].contains("*/") {
                    j += 1;
                }
                j += 1;
                continue;
            }
            return Some(j);
        }
        None
    }

    /// Line where the bracket opened on `from` reaches depth zero.
    fn match_depth(&self, from: usize, end: usize, open: char, close: char) -> Option<usize> {
        let mut depth = 0i32;
        for j in from..end {
            let line = self.lines[j];
            depth += line.matches(open).count() as i32;
            depth -= line.matches(close).count() as i32;
            if depth <= 0 && line.contains(close) {
                return Some(j);
            }
        }
        None
    }
}

enum EntryShape {
    Scalar,
    BraceBlock { opener: usize },
    ParenBlock { opener: usize },
}

/// Value binding for the nth occurrence of a repeated key, used as the
/// recursion context while scanning (final binding happens afterwards).
fn resolve_binding<'v>(ctx: Option<&'v Dict>, key: &str, occurrence: usize) -> Option<&'v Value> {
    let value = ctx?.get(key)?;
    if occurrence > 0 {
        if let Value::List(items) = value {
            return items.get(occurrence);
        }
    }
    Some(value)
}

/// Value of one braced record inside a parenthesized list.
fn record_binding<'v>(
    binding: Option<&'v Value>,
    name: &str,
    index: usize,
) -> Option<&'v Value> {
    match binding? {
        Value::List(items) => items.get(index),
        Value::Dict(d) if !name.is_empty() => d.get(name),
        _ => None,
    }
}

fn is_word_char(c: char) -> bool {
    !c.is_whitespace() && !matches!(c, '{' | '}' | '(' | ')' | ';' | '"')
}

fn is_bare_word(text: &str) -> bool {
    !text.is_empty() && text.chars().all(is_word_char)
}

fn first_word_span(line: &str) -> Option<(usize, usize)> {
    let start = line.find(|c: char| !c.is_whitespace())?;
    if !is_word_char(line[start..].chars().next()?) {
        return None;
    }
    let end = line[start..]
        .find(|c: char| !is_word_char(c))
        .map(|off| start + off)
        .unwrap_or(line.len());
    Some((start, end))
}

/// True when every `(` opened in the text closes again within it.
fn paren_balanced(text: &str) -> bool {
    let opens = text.matches('(').count();
    let closes = text.matches(')').count();
    opens > 0 && opens <= closes
}

/// Same-line value span: first non-whitespace after the key, up to but
/// excluding a `;` terminator or trailing `//` comment, right-trimmed.
fn value_span(line: &str, after_key: usize) -> Option<ColSpan> {
    let bytes = line.as_bytes();
    let mut start = after_key;
    while start < bytes.len() && (bytes[start] == b' ' || bytes[start] == b'\t') {
        start += 1;
    }
    if start >= bytes.len() {
        return None;
    }

    let mut end = start;
    while end < bytes.len() {
        if bytes[end] == b';' {
            break;
        }
        if bytes[end] == b'/' && end + 1 < bytes.len() && bytes[end + 1] == b'/' {
            break;
        }
        end += 1;
    }
    while end > start && (bytes[end - 1] == b' ' || bytes[end - 1] == b'\t') {
        end -= 1;
    }
    if end == start {
        return None;
    }
    Some(ColSpan { start, end })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::extract_source;

    const DOC: &str = "\
// header
FoamFile
{
    version     2.0;
    format      ascii;
}

startFrom       startTime;

outlet
{
    type        patch;
    inGroups    2(wall patch);

    maxY
    {
        name    fluid;
    }
}

vertices
(
    ( 0 0 0 )
    ( 1 0 0 )
);

actions
(
    {
        name        action1;
    }
    {
        name        action2;
    }
);
";

    fn build(source: &str) -> NodeTree {
        let data = extract_source(source);
        NodeBuilder::new(source).build(&data)
    }

    #[test]
    fn test_scalar_spans() {
        let tree = build(DOC);
        let id = tree.find(&Route::parse("startFrom")).unwrap();
        let node = tree.get(id);

        assert_eq!(node.line_start, 7);
        assert_eq!(node.key_col, Some(ColSpan { start: 0, end: 9 }));
        assert_eq!(node.value_col, Some(ColSpan { start: 16, end: 25 }));
        assert_eq!(node.value, Some(Value::str("startTime")));
    }

    #[test]
    fn test_block_end_line() {
        let tree = build(DOC);
        let outlet = tree.get(tree.find(&Route::parse("outlet")).unwrap());
        assert_eq!(outlet.line_start, 9);
        assert_eq!(outlet.block_end_line, Some(18));
    }

    #[test]
    fn test_nested_lookup() {
        let tree = build(DOC);
        let name = tree.get(tree.find(&Route::parse("outlet.maxY.name")).unwrap());
        assert_eq!(name.value, Some(Value::str("fluid")));
        assert_eq!(name.line_start, 16);
    }

    #[test]
    fn test_paren_block_node() {
        let tree = build(DOC);
        let vertices = tree.get(tree.find(&Route::parse("vertices")).unwrap());
        assert_eq!(vertices.line_start, 20);
        assert_eq!(vertices.block_end_line, Some(24));
        assert!(matches!(vertices.value, Some(Value::List(_))));
    }

    #[test]
    fn test_anonymous_records_become_children() {
        let tree = build(DOC);
        let actions = tree.get(tree.find(&Route::parse("actions")).unwrap());
        assert_eq!(actions.children.len(), 2);

        let first = tree.get(actions.children[0]);
        let d = first.value.as_ref().unwrap().as_dict().unwrap();
        assert_eq!(d.get("name"), Some(&Value::str("action1")));
        assert!(first.block_end_line.is_some());
    }

    #[test]
    fn test_group_index_resolves_single_node() {
        // `blocks[0]`-style addressing: index 0 of a single-node group is
        // the node itself.
        let tree = build(DOC);
        let by_key = tree.find(&Route::parse("vertices")).unwrap();
        let by_index = tree.find(&Route::parse("vertices[0]")).unwrap();
        assert_eq!(by_key, by_index);
        assert!(tree.find(&Route::parse("vertices[1]")).is_none());
    }

    #[test]
    fn test_inline_list_is_scalar_entry() {
        let tree = build(DOC);
        let ingroups = tree.get(tree.find(&Route::parse("outlet.inGroups")).unwrap());
        assert_eq!(ingroups.block_end_line, None);
        let span = ingroups.value_col.unwrap();
        assert_eq!(&DOC.split('\n').nth(12).unwrap()[span.start..span.end], "2(wall patch)");
    }

    #[test]
    fn test_sibling_ranges_increase() {
        let tree = build(DOC);
        let root = tree.get(tree.root());
        let mut prev_end = 0;
        for child in &root.children {
            let node = tree.get(*child);
            assert!(node.line_start >= prev_end);
            prev_end = node.line_end;
        }
    }

    #[test]
    fn test_unbalanced_block_degrades() {
        let source = "ok value;\nbroken\n{\n    a b;\n";
        let tree = build(source);
        assert!(tree.find(&Route::parse("ok")).is_some());
        // The unterminated block stays unindexed but nothing panics.
        assert!(tree.find(&Route::parse("broken")).is_none());
    }

    #[test]
    fn test_unlink() {
        let mut tree = build(DOC);
        let id = tree.find(&Route::parse("startFrom")).unwrap();
        tree.unlink(id);
        assert!(tree.find(&Route::parse("startFrom")).is_none());
    }
}
