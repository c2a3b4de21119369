//! Merging a response envelope into a target shape.
//!
//! `data` is decoded first. Every error record with a path is then walked
//! against the target: when the server has nothing at that path and the
//! field there is nullable, it is reset to `None`. Records are applied
//! independently, in order, and all of them are returned. A response without
//! `data` leaves the target as it was.

use crate::error::ErrorCode;
use crate::response::{Envelope, ErrorRecord, Errors, PathSegment};
use crate::shape::{decode_fields, shape_of, Field, GraphQLShape, ObjectShape};
use serde_json::Value;
use tracing::{debug, trace};

/// Decodes `envelope` into `target` and collects its errors.
///
/// On `Err`, `target` still holds whatever partial data was decoded.
pub fn reconcile<T: GraphQLShape>(envelope: &Envelope, target: &mut T) -> Result<(), Errors> {
    let shape = shape_of::<T>().map_err(|err| {
        Errors::single(ErrorRecord::from_cause(
            ErrorCode::GraphqlDecodeError,
            err.to_string(),
            err,
        ))
    })?;
    reconcile_with(envelope, target, &shape)
}

/// [`reconcile`] for a target whose shape is already resolved.
pub fn reconcile_with(
    envelope: &Envelope,
    target: &mut dyn Field,
    shape: &ObjectShape,
) -> Result<(), Errors> {
    let mut records = envelope.errors.clone();

    let data = match envelope.data_value() {
        Ok(data) => data.filter(|data| !data.is_null()),
        Err(err) => {
            records.push(ErrorRecord::from_cause(
                ErrorCode::GraphqlDecodeError,
                err.to_string(),
                err,
            ));
            None
        }
    };

    // Without data the target keeps its pre-call state, error paths included.
    if let Some(data) = &data {
        if let Err(err) = decode_fields(target, shape, data) {
            debug!(shape = shape.type_name, error = %err, "failed to decode data");
            records.push(ErrorRecord::from_cause(
                ErrorCode::GraphqlDecodeError,
                err.to_string(),
                err,
            ));
        }

        for record in &envelope.errors {
            if !record.path.is_empty() {
                null_error_path(target, shape, data, &record.path);
            }
        }
    }

    match Errors::from_vec(records) {
        Some(errors) => {
            debug!(count = errors.len(), "response carried errors");
            Err(errors)
        }
        None => Ok(()),
    }
}

/// Resets the nullable field at `path` if the server left it empty.
fn null_error_path(
    target: &mut dyn Field,
    shape: &ObjectShape,
    data: &Value,
    path: &[PathSegment],
) {
    if lookup(data, path).is_some_and(|value| !value.is_null()) {
        return;
    }
    if let Some(field) = walk(target, shape, path) {
        if field.is_nullable() {
            trace!(path = ?path, "nulled field at error path");
            field.clear();
        }
    }
}

/// Follows `path` through the target. `None` when a segment does not exist,
/// which means the value is already absent.
fn walk<'a>(
    target: &'a mut dyn Field,
    shape: &ObjectShape,
    path: &[PathSegment],
) -> Option<&'a mut dyn Field> {
    let mut current = target;
    let mut shape = Some(shape);

    for segment in path {
        match segment {
            PathSegment::Field(name) => {
                let (route, spec) = shape?.route(name)?;
                for index in route {
                    current = current.field_mut(index)?;
                }
                shape = spec.children.as_deref();
            }
            PathSegment::Index(index) => current = current.element_mut(*index)?,
        }
    }
    Some(current)
}

fn lookup<'v>(data: &'v Value, path: &[PathSegment]) -> Option<&'v Value> {
    path.iter().try_fold(data, |value, segment| match segment {
        PathSegment::Field(name) => value.get(name.as_str()),
        PathSegment::Index(index) => value.get(*index),
    })
}
