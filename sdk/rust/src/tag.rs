//! Parser for `#[graphql("...")]` field tags.
//!
//! Accepted forms:
//! - `-` (ignore the field)
//! - `name`, `name(args)`
//! - `alias: name`, `alias: name(args)`
//! - `... on Type`
//!
//! Argument clauses are captured verbatim; only their delimiters and string
//! literals are checked so that a broken clause fails at build time instead
//! of producing an invalid document.

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Tag {
    Ignore,
    Fragment(String),
    Field {
        alias: Option<String>,
        name: String,
        arguments: Option<String>,
    },
}

pub(crate) fn parse(tag: &str) -> Result<Tag, &'static str> {
    let tag = tag.trim();
    if tag == "-" {
        return Ok(Tag::Ignore);
    }

    if let Some(rest) = tag.strip_prefix("...") {
        let rest = rest.trim_start();
        let type_name = rest
            .strip_prefix("on")
            .filter(|after| after.starts_with(char::is_whitespace))
            .map(str::trim)
            .ok_or("inline fragment must read `... on Type`")?;
        if !is_name(type_name) {
            return Err("inline fragment type condition is not a valid name");
        }
        return Ok(Tag::Fragment(type_name.to_string()));
    }

    let (head, arguments) = match tag.find('(') {
        Some(open) => {
            let close = matching_paren(tag, open)?;
            if !tag[close + 1..].trim().is_empty() {
                return Err("unexpected text after argument clause");
            }
            let inner = &tag[open + 1..close];
            if inner.trim().is_empty() {
                return Err("empty argument clause");
            }
            (&tag[..open], Some(inner.to_string()))
        }
        None => {
            if tag.contains(')') {
                return Err("unbalanced argument clause");
            }
            (tag, None)
        }
    };

    let (alias, name) = match head.split_once(':') {
        Some((alias, name)) => {
            let alias = alias.trim();
            if !is_name(alias) {
                return Err("alias is not a valid name");
            }
            (Some(alias.to_string()), name.trim())
        }
        None => (None, head.trim()),
    };

    if name.is_empty() {
        return Err("missing field name");
    }
    if !is_name(name) {
        return Err("field name is not a valid name");
    }

    Ok(Tag::Field {
        alias,
        name: name.to_string(),
        arguments,
    })
}

/// Finds the `)` closing the `(` at `open`, skipping string literals and
/// nested list/object values.
fn matching_paren(text: &str, open: usize) -> Result<usize, &'static str> {
    let mut stack: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in text[open..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match c {
            '"' => in_string = true,
            '(' | '[' | '{' => stack.push(c),
            ')' | ']' | '}' => {
                let expected = match c {
                    ')' => '(',
                    ']' => '[',
                    _ => '{',
                };
                if stack.pop() != Some(expected) {
                    return Err("unbalanced argument clause");
                }
                if stack.is_empty() {
                    return Ok(open + offset);
                }
            }
            _ => {}
        }
    }

    if in_string {
        Err("unterminated string in argument clause")
    } else {
        Err("unbalanced argument clause")
    }
}

fn is_name(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c == '_' || c.is_ascii_alphabetic())
        && chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
}

/// Default wire name for a Rust field identifier: `user_name` -> `userName`.
pub(crate) fn wire_name(ident: &str) -> String {
    let mut out = String::with_capacity(ident.len());
    let mut upper_next = false;
    for c in ident.trim_start_matches('_').chars() {
        if c == '_' {
            upper_next = !out.is_empty();
        } else if upper_next {
            out.extend(c.to_uppercase());
            upper_next = false;
        } else if out.is_empty() {
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }
    if out.is_empty() {
        ident.to_string()
    } else {
        out
    }
}
