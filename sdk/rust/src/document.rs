//! Query document construction.
//!
//! A document is a selection set rendered from a shape descriptor,
//! optionally preceded by the operation keyword, an operation name and a
//! variable-declaration header:
//!
//! ```text
//! {user{id,name}}
//! query GetUser($login: String!){user(login: $login){id,name}}
//! ```

use crate::error::BuildError;
use crate::shape::{shape_of, FieldSpec, GraphQLShape, ObjectShape};
use crate::types::{VariableTable, Variables};
use tracing::trace;

/// The operation keyword.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OperationType {
    #[default]
    Query,
    Mutation,
}

impl OperationType {
    pub const fn keyword(self) -> &'static str {
        match self {
            Self::Query => "query",
            Self::Mutation => "mutation",
        }
    }
}

/// A built document and the variables it declares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub text: String,
    pub variables: VariableTable,
}

impl Document {
    /// Builds the document selecting the shape `T`.
    pub fn build<T: GraphQLShape>(
        operation: OperationType,
        variables: &Variables,
        operation_name: Option<&str>,
    ) -> Result<Self, BuildError> {
        let shape = shape_of::<T>()?;
        build(&shape, variables, operation, operation_name)
    }
}

/// Renders `shape` into a document.
pub fn build(
    shape: &ObjectShape,
    variables: &Variables,
    operation: OperationType,
    operation_name: Option<&str>,
) -> Result<Document, BuildError> {
    let selection = selection_set(shape);
    let table = declare(&selection, variables)?;

    let mut text = String::with_capacity(selection.len() + 32);
    if operation != OperationType::Query || operation_name.is_some() || !table.is_empty() {
        text.push_str(operation.keyword());
        if let Some(name) = operation_name {
            text.push(' ');
            text.push_str(name);
        }
        if !table.is_empty() {
            text.push('(');
            text.push_str(&table.to_string());
            text.push(')');
        }
    }
    text.push_str(&selection);

    trace!(shape = shape.type_name, document = %text, "built document");
    Ok(Document {
        text,
        variables: table,
    })
}

/// Renders the selection set of `shape`: `{a,b{c}}`.
pub fn selection_set(shape: &ObjectShape) -> String {
    let mut out = String::new();
    write_selection(shape, &mut out);
    out
}

fn write_selection(shape: &ObjectShape, out: &mut String) {
    out.push('{');
    let mut first = true;
    write_fields(shape, out, &mut first);
    out.push('}');
}

fn write_fields(shape: &ObjectShape, out: &mut String, first: &mut bool) {
    for spec in shape.active() {
        if spec.inline && spec.fragment.is_none() {
            if let Some(children) = spec.children.as_deref() {
                write_fields(children, out, first);
            }
            continue;
        }
        if !*first {
            out.push(',');
        }
        *first = false;
        write_field(spec, out);
    }
}

fn write_field(spec: &FieldSpec, out: &mut String) {
    if let Some(on) = &spec.fragment {
        out.push_str("... on ");
        out.push_str(on);
    } else {
        if let Some(alias) = &spec.alias {
            out.push_str(alias);
            out.push(':');
        }
        out.push_str(&spec.wire_name);
        if let Some(arguments) = &spec.arguments {
            out.push('(');
            out.push_str(arguments);
            out.push(')');
        }
    }
    if let Some(children) = spec.children.as_deref() {
        write_selection(children, out);
    }
}

/// Declares every variable referenced by `text`, in order of first use.
///
/// A reference with no key in `variables` is [`BuildError::MissingVariable`],
/// whether the bag is empty or not. Text without references declares nothing.
pub fn declare(text: &str, variables: &Variables) -> Result<VariableTable, BuildError> {
    let mut table = VariableTable::default();
    for name in references(text) {
        if table.get(name).is_some() {
            continue;
        }
        let var = variables
            .get(name)
            .ok_or_else(|| BuildError::MissingVariable(name.to_string()))?;
        table.declare(name, var.resolve_sig(name)?);
    }
    Ok(table)
}

/// Prepends a declaration header to a hand-written shorthand document.
///
/// Documents that already start with an operation keyword are returned
/// unchanged.
pub fn declare_prebuilt(text: &str, variables: &Variables) -> Result<String, BuildError> {
    let trimmed = text.trim_start();
    if !trimmed.starts_with('{') {
        return Ok(text.to_string());
    }
    let table = declare(trimmed, variables)?;
    if table.is_empty() {
        return Ok(text.to_string());
    }
    Ok(format!("query({table}){trimmed}"))
}

/// `$name` references outside string literals, in order of appearance.
fn references(text: &str) -> Vec<&str> {
    let bytes = text.as_bytes();
    let mut names = Vec::new();
    let mut in_string = false;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'\\' if in_string => i += 1,
            b'"' => in_string = !in_string,
            b'$' if !in_string => {
                let start = i + 1;
                let mut end = start;
                while end < bytes.len() && (bytes[end] == b'_' || bytes[end].is_ascii_alphanumeric())
                {
                    end += 1;
                }
                if end > start {
                    names.push(&text[start..end]);
                }
                i = end;
                continue;
            }
            _ => {}
        }
        i += 1;
    }
    names
}
