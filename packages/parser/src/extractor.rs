//! Structure extractor: folds the token stream into the generic value tree.
//!
//! Position information is deliberately discarded here; this layer answers
//! "what does the document mean", the position index builder answers "where
//! does each part live".

use crate::tokenizer::{tokenize, Token};
use crate::value::{Dict, Value};
use std::ops::Range;

/// Extract the generic value tree from a token stream.
///
/// The root of a document is an implicit mapping, so the result is always
/// a `Value::Dict`.
pub fn extract(source: &str, tokens: &[(Token, Range<usize>)]) -> Value {
    let items: Vec<(Token, &str)> = tokens
        .iter()
        .filter(|(t, _)| !t.is_trivia())
        .map(|(t, span)| (*t, &source[span.clone()]))
        .collect();

    let mut pos = 0;
    Value::Dict(parse_block(&items, &mut pos))
}

/// Convenience wrapper: tokenize and extract in one step.
pub fn extract_source(source: &str) -> Value {
    let tokens = tokenize(source);
    extract(source, &tokens)
}

enum Term {
    Atom(String),
    Sub(Value),
    Block(Dict),
}

enum ListItem {
    Atom(String),
    Sub(Value),
    Record { name: Option<String>, dict: Dict },
}

/// Parse entries until a closing `}` (consumed) or end of input.
///
/// Repeated keys at one level collapse into a single list-valued entry in
/// encounter order.
fn parse_block(items: &[(Token, &str)], pos: &mut usize) -> Dict {
    let mut groups: Vec<(String, Vec<Value>)> = Vec::new();

    while *pos < items.len() {
        match items[*pos].0 {
            Token::RBrace => {
                *pos += 1;
                break;
            }
            Token::Word | Token::Quoted => {
                let key = items[*pos].1.to_string();
                *pos += 1;
                let value = parse_entry_value(items, pos);

                match groups.iter_mut().find(|(k, _)| *k == key) {
                    Some((_, values)) => values.push(value),
                    None => groups.push((key, vec![value])),
                }
            }
            // Stray symbol at entry position; skip it.
            _ => *pos += 1,
        }
    }

    groups
        .into_iter()
        .map(|(key, mut values)| {
            let value = if values.len() == 1 {
                values.pop().unwrap()
            } else {
                Value::List(values)
            };
            (key, value)
        })
        .collect()
}

/// Parse the value part of one entry, up to and including its terminator.
fn parse_entry_value(items: &[(Token, &str)], pos: &mut usize) -> Value {
    let mut terms: Vec<Term> = Vec::new();

    while *pos < items.len() {
        match items[*pos].0 {
            Token::Semicolon => {
                *pos += 1;
                break;
            }
            Token::LBrace => {
                *pos += 1;
                terms.push(Term::Block(parse_block(items, pos)));
                if *pos < items.len() && items[*pos].0 == Token::Semicolon {
                    *pos += 1;
                }
                break;
            }
            Token::LParen => {
                *pos += 1;
                terms.push(Term::Sub(parse_list(items, pos)));
            }
            Token::Word | Token::Quoted => {
                terms.push(Term::Atom(items[*pos].1.to_string()));
                *pos += 1;
            }
            // The enclosing block's closer terminates an unfinished entry.
            Token::RBrace => break,
            _ => *pos += 1,
        }
    }

    shape_terms(terms)
}

fn shape_terms(mut terms: Vec<Term>) -> Value {
    // Count-prefixed inline list: `2(wall patch)` decodes to the bare list;
    // the count is regenerated on write.
    if terms.len() == 2 {
        if let (Term::Atom(count), Term::Sub(_)) = (&terms[0], &terms[1]) {
            if count.parse::<u64>().is_ok() {
                if let Term::Sub(list) = terms.pop().unwrap() {
                    return list;
                }
            }
        }
    }

    match terms.len() {
        0 => Value::Str(String::new()),
        1 => match terms.pop().unwrap() {
            Term::Atom(a) => Value::from_atom(&a),
            Term::Sub(v) => v,
            Term::Block(d) => Value::Dict(d),
        },
        _ => Value::List(
            terms
                .into_iter()
                .map(|t| match t {
                    Term::Atom(a) => Value::from_atom(&a),
                    Term::Sub(v) => v,
                    Term::Block(d) => Value::Dict(d),
                })
                .collect(),
        ),
    }
}

/// Parse a parenthesized list body, consuming the closing `)`.
fn parse_list(items: &[(Token, &str)], pos: &mut usize) -> Value {
    let mut out: Vec<ListItem> = Vec::new();

    while *pos < items.len() {
        match items[*pos].0 {
            Token::RParen => {
                *pos += 1;
                break;
            }
            Token::LParen => {
                *pos += 1;
                out.push(ListItem::Sub(parse_list(items, pos)));
            }
            Token::LBrace => {
                *pos += 1;
                out.push(ListItem::Record {
                    name: None,
                    dict: parse_block(items, pos),
                });
            }
            Token::Word | Token::Quoted => {
                let text = items[*pos].1;
                // `name { ... }` inside parens is a named record.
                if *pos + 1 < items.len() && items[*pos + 1].0 == Token::LBrace {
                    *pos += 2;
                    out.push(ListItem::Record {
                        name: Some(text.to_string()),
                        dict: parse_block(items, pos),
                    });
                } else {
                    out.push(ListItem::Atom(text.to_string()));
                    *pos += 1;
                }
            }
            Token::Semicolon => *pos += 1,
            Token::RBrace => break,
            _ => *pos += 1,
        }
    }

    shape_list(out)
}

fn shape_list(items: Vec<ListItem>) -> Value {
    let all_records = !items.is_empty()
        && items
            .iter()
            .all(|i| matches!(i, ListItem::Record { .. }));

    if all_records {
        let all_named = items
            .iter()
            .all(|i| matches!(i, ListItem::Record { name: Some(_), .. }));

        if all_named {
            // A run of `name { ... }` records extracts to a mapping.
            return Value::Dict(
                items
                    .into_iter()
                    .map(|i| match i {
                        ListItem::Record { name, dict } => {
                            (name.unwrap_or_default(), Value::Dict(dict))
                        }
                        _ => unreachable!(),
                    })
                    .collect(),
            );
        }

        // Anonymous `{ ... }` records extract to a list of mappings.
        return Value::List(
            items
                .into_iter()
                .map(|i| match i {
                    ListItem::Record { dict, .. } => Value::Dict(dict),
                    _ => unreachable!(),
                })
                .collect(),
        );
    }

    // Mixed atoms/sublists stay a flat list; the query layer groups
    // composite records (blocks, regions) out of this shape.
    Value::List(
        items
            .into_iter()
            .map(|i| match i {
                ListItem::Atom(a) => Value::from_atom(&a),
                ListItem::Sub(v) => v,
                ListItem::Record { dict, .. } => Value::Dict(dict),
            })
            .collect(),
    )
}
