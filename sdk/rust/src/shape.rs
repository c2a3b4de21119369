//! Shape descriptors.
//!
//! A shape is a Rust struct deriving [`GraphQLShape`]. The derive emits a
//! table of [`RawField`]s and an indexed accessor; [`shape_of`] turns the
//! table into an immutable [`ObjectShape`] once per type and caches it for
//! the lifetime of the process. The document builder, the decoder and the
//! error-path walker all work on the cached descriptor.

use crate::error::BuildError;
use crate::tag::{self, Tag};
use rustc_hash::{FxHashMap, FxHashSet};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::any::TypeId;
use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};
use thiserror::Error;
use tracing::trace;

// ============================================================================
// Descriptor types
// ============================================================================

/// What a field selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    /// A leaf value.
    Scalar,
    /// A nested selection set.
    Object,
    /// A list; `children` describes the element's selection, if any.
    List,
    /// A JSON subtree captured without destructuring.
    Raw,
}

/// Static description of a Rust type used as a field.
#[derive(Debug, Clone)]
pub struct TypeDesc {
    pub kind: Kind,
    pub nullable: bool,
    pub children: Option<Arc<ObjectShape>>,
}

impl TypeDesc {
    pub fn scalar() -> Self {
        Self {
            kind: Kind::Scalar,
            nullable: false,
            children: None,
        }
    }

    pub fn object(shape: Arc<ObjectShape>) -> Self {
        Self {
            kind: Kind::Object,
            nullable: false,
            children: Some(shape),
        }
    }

    pub fn raw(selection: Option<Arc<ObjectShape>>) -> Self {
        Self {
            kind: Kind::Raw,
            nullable: false,
            children: selection,
        }
    }

    /// Wraps the description as an optional value.
    #[must_use]
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// Wraps the description as a list of this type.
    #[must_use]
    pub fn list(self) -> Self {
        Self {
            kind: Kind::List,
            nullable: false,
            children: self.children,
        }
    }
}

/// One field of a shape, with its annotation already parsed.
#[derive(Debug, Clone)]
pub struct FieldSpec {
    /// Position in the struct's accessor table.
    pub index: usize,
    /// Rust identifier.
    pub ident: &'static str,
    pub wire_name: String,
    pub alias: Option<String>,
    /// Argument clause, verbatim, without the parentheses.
    pub arguments: Option<String>,
    /// Fields are spliced into the parent selection set.
    pub inline: bool,
    /// Type condition for `... on Type` selections. Implies `inline`.
    pub fragment: Option<String>,
    pub ignored: bool,
    pub kind: Kind,
    pub nullable: bool,
    pub children: Option<Arc<ObjectShape>>,
}

impl FieldSpec {
    /// The key this field has in the response: the alias if present.
    pub fn response_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.wire_name)
    }

    fn derive(type_name: &'static str, raw: &RawField) -> Result<Self, BuildError> {
        let mut spec = Self {
            index: raw.index,
            ident: raw.ident,
            wire_name: tag::wire_name(raw.ident),
            alias: None,
            arguments: None,
            inline: false,
            fragment: None,
            ignored: true,
            kind: Kind::Scalar,
            nullable: false,
            children: None,
        };

        let Some(describe) = raw.describe else {
            return Ok(spec);
        };

        let parsed = match raw.tag {
            Some(text) => Some(tag::parse(text).map_err(|reason| BuildError::MalformedTag {
                type_name,
                field: raw.ident,
                tag: text.to_string(),
                reason,
            })?),
            None => None,
        };
        if parsed == Some(Tag::Ignore) {
            return Ok(spec);
        }

        let desc = describe()?;
        spec.ignored = false;
        spec.kind = desc.kind;
        spec.nullable = desc.nullable;
        spec.children = desc.children;

        match parsed {
            Some(Tag::Field {
                alias,
                name,
                arguments,
            }) => {
                if raw.flatten {
                    return Err(BuildError::MalformedTag {
                        type_name,
                        field: raw.ident,
                        tag: raw.tag.unwrap_or_default().to_string(),
                        reason: "a flattened field cannot name a selection",
                    });
                }
                spec.alias = alias;
                spec.wire_name = name;
                spec.arguments = arguments;
            }
            Some(Tag::Fragment(on)) => {
                spec.fragment = Some(on);
                spec.inline = true;
            }
            Some(Tag::Ignore) | None => spec.inline = raw.flatten,
        }

        if spec.inline && (spec.kind != Kind::Object || spec.children.is_none()) {
            return Err(BuildError::FlattenNonObject {
                type_name,
                field: raw.ident,
            });
        }

        Ok(spec)
    }
}

/// The descriptor of one struct: its fields in declaration order.
#[derive(Debug, Clone)]
pub struct ObjectShape {
    pub type_name: &'static str,
    pub fields: Vec<FieldSpec>,
}

impl ObjectShape {
    /// Fields that take part in the query and in decoding.
    pub fn active(&self) -> impl Iterator<Item = &FieldSpec> {
        self.fields.iter().filter(|spec| !spec.ignored)
    }

    /// Resolves a response key to a field, descending through inline
    /// children. Returns the accessor indices to follow from this object.
    pub fn route(&self, name: &str) -> Option<(Vec<usize>, &FieldSpec)> {
        let mut route = Vec::new();
        let spec = self.route_into(name, &mut route)?;
        Some((route, spec))
    }

    fn route_into(&self, name: &str, route: &mut Vec<usize>) -> Option<&FieldSpec> {
        for spec in self.active() {
            if spec.inline {
                let Some(children) = spec.children.as_deref() else {
                    continue;
                };
                route.push(spec.index);
                if let Some(found) = children.route_into(name, route) {
                    return Some(found);
                }
                route.pop();
            } else if spec.response_name() == name {
                route.push(spec.index);
                return Some(spec);
            }
        }
        None
    }

    /// Response keys must be unique within one selection set, counting
    /// flattened children. Fragments are separate selection sets.
    fn check_unique(&self) -> Result<(), BuildError> {
        fn collect<'a>(
            shape: &'a ObjectShape,
            owner: &'static str,
            seen: &mut FxHashSet<&'a str>,
        ) -> Result<(), BuildError> {
            for spec in shape.active() {
                if spec.fragment.is_some() {
                    continue;
                }
                if spec.inline {
                    if let Some(children) = spec.children.as_deref() {
                        collect(children, owner, seen)?;
                    }
                    continue;
                }
                if !seen.insert(spec.response_name()) {
                    return Err(BuildError::DuplicateSelection {
                        type_name: owner,
                        name: spec.response_name().to_string(),
                    });
                }
            }
            Ok(())
        }

        collect(self, self.type_name, &mut FxHashSet::default())
    }
}

/// A field as emitted by `#[derive(GraphQLShape)]`, before tag parsing.
#[derive(Debug, Clone, Copy)]
pub struct RawField {
    pub ident: &'static str,
    pub index: usize,
    pub tag: Option<&'static str>,
    pub flatten: bool,
    /// `None` for skipped fields, whose type need not implement [`Field`].
    pub describe: Option<fn() -> Result<TypeDesc, BuildError>>,
}

impl RawField {
    pub fn of<T: Field>(
        ident: &'static str,
        index: usize,
        tag: Option<&'static str>,
        flatten: bool,
    ) -> Self {
        Self {
            ident,
            index,
            tag,
            flatten,
            describe: Some(T::describe),
        }
    }

    pub fn ignored(ident: &'static str) -> Self {
        Self {
            ident,
            index: usize::MAX,
            tag: None,
            flatten: false,
            describe: None,
        }
    }
}

// ============================================================================
// Traits
// ============================================================================

/// A Rust type that can appear in a shape.
///
/// Implemented for scalars, `Option`, `Vec`, [`RawJson`], [`Raw`] and, via
/// the derive, for shape structs. The object-safe part is what the decoder
/// and the error-path walker use at runtime.
pub trait Field {
    /// Static description of this type.
    fn describe() -> Result<TypeDesc, BuildError>
    where
        Self: Sized;

    /// The value a freshly allocated target holds.
    fn empty() -> Self
    where
        Self: Sized;

    /// Merges a JSON value into `self`.
    fn decode(&mut self, value: &Value) -> Result<(), DecodeError>;

    /// Resets to the empty value (`None` for options).
    fn clear(&mut self);

    fn is_nullable(&self) -> bool {
        false
    }

    /// Struct field by accessor index.
    fn field_mut(&mut self, _index: usize) -> Option<&mut dyn Field> {
        None
    }

    /// List element by position.
    fn element_mut(&mut self, _index: usize) -> Option<&mut dyn Field> {
        None
    }
}

/// A struct deriving its selection set from its fields.
pub trait GraphQLShape: Field + Sized + 'static {
    /// The Rust identifier of the struct.
    const TYPE_NAME: &'static str;

    fn raw_fields() -> Vec<RawField>;
}

// ============================================================================
// Descriptor cache
// ============================================================================

type ShapeCache = RwLock<FxHashMap<TypeId, Arc<ObjectShape>>>;

fn cache() -> &'static ShapeCache {
    static SHAPES: OnceLock<ShapeCache> = OnceLock::new();
    SHAPES.get_or_init(ShapeCache::default)
}

/// Returns the cached descriptor of `T`, deriving it on first use.
///
/// Failed derivations are not cached; the same error is produced on every
/// call.
pub fn shape_of<T: GraphQLShape>() -> Result<Arc<ObjectShape>, BuildError> {
    let id = TypeId::of::<T>();
    if let Some(shape) = cache()
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(&id)
    {
        return Ok(Arc::clone(shape));
    }

    // Children are derived recursively, so the lock is not held here.
    let fields = T::raw_fields()
        .iter()
        .map(|raw| FieldSpec::derive(T::TYPE_NAME, raw))
        .collect::<Result<Vec<_>, _>>()?;
    let shape = ObjectShape {
        type_name: T::TYPE_NAME,
        fields,
    };
    shape.check_unique()?;

    let mut shapes = cache().write().unwrap_or_else(PoisonError::into_inner);
    let shape = shapes.entry(id).or_insert_with(|| {
        trace!(type_name = T::TYPE_NAME, "derived shape descriptor");
        Arc::new(shape)
    });
    Ok(Arc::clone(shape))
}

/// [`Field::describe`] for derived shapes.
pub fn describe_object<T: GraphQLShape>() -> Result<TypeDesc, BuildError> {
    shape_of::<T>().map(TypeDesc::object)
}

// ============================================================================
// Decoding
// ============================================================================

/// `data` does not fit the target shape.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("expected {expected} at `{path}`, found {found}")]
    Mismatch {
        path: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("invalid value at `{path}`")]
    Invalid {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Shape(#[from] BuildError),
}

impl DecodeError {
    fn mismatch(expected: &'static str, found: &Value) -> Self {
        Self::Mismatch {
            path: String::new(),
            expected,
            found: json_kind(found),
        }
    }

    fn invalid(source: serde_json::Error) -> Self {
        Self::Invalid {
            path: String::new(),
            source,
        }
    }

    /// Prefixes the error location with a parent segment.
    #[must_use]
    pub fn within(mut self, segment: &str) -> Self {
        if let Self::Mismatch { path, .. } | Self::Invalid { path, .. } = &mut self {
            *path = if path.is_empty() {
                segment.to_string()
            } else {
                format!("{segment}.{path}")
            };
        }
        self
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// [`Field::decode`] for derived shapes.
pub fn decode_object<T: GraphQLShape>(target: &mut T, value: &Value) -> Result<(), DecodeError> {
    let shape = shape_of::<T>()?;
    decode_fields(target, &shape, value)
}

/// Decodes `value` into `target` following `shape`. Keys missing from the
/// object leave the corresponding fields untouched.
///
/// A field that fails to decode does not stop its siblings; the first
/// failure is returned once every field has been visited.
pub(crate) fn decode_fields(
    target: &mut dyn Field,
    shape: &ObjectShape,
    value: &Value,
) -> Result<(), DecodeError> {
    let object = match value {
        Value::Null => {
            target.clear();
            return Ok(());
        }
        Value::Object(object) => object,
        other => return Err(DecodeError::mismatch("object", other)),
    };

    let mut first_error = None;
    for spec in shape.active() {
        let Some(field) = target.field_mut(spec.index) else {
            continue;
        };
        let decoded = if spec.inline {
            field.decode(value)
        } else if let Some(child) = object.get(spec.response_name()) {
            field
                .decode(child)
                .map_err(|err| err.within(spec.response_name()))
        } else {
            continue;
        };
        if let Err(err) = decoded {
            first_error.get_or_insert(err);
        }
    }
    first_error.map_or(Ok(()), Err)
}

// ============================================================================
// Built-in field types
// ============================================================================

macro_rules! scalar_field {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Field for $ty {
                fn describe() -> Result<TypeDesc, BuildError> {
                    Ok(TypeDesc::scalar())
                }

                fn empty() -> Self {
                    <$ty>::default()
                }

                fn decode(&mut self, value: &Value) -> Result<(), DecodeError> {
                    if value.is_null() {
                        self.clear();
                        return Ok(());
                    }
                    *self = <$ty as Deserialize>::deserialize(value).map_err(DecodeError::invalid)?;
                    Ok(())
                }

                fn clear(&mut self) {
                    *self = <$ty>::default();
                }
            }
        )*
    };
}

scalar_field!(
    String, bool, i8, i16, i32, i64, isize, u8, u16, u32, u64, usize, f32, f64, Id, Value,
);

impl<T: Field> Field for Option<T> {
    fn describe() -> Result<TypeDesc, BuildError> {
        T::describe().map(TypeDesc::nullable)
    }

    fn empty() -> Self {
        None
    }

    fn decode(&mut self, value: &Value) -> Result<(), DecodeError> {
        if value.is_null() {
            *self = None;
            return Ok(());
        }
        match self {
            Some(inner) => inner.decode(value),
            None => {
                let mut inner = T::empty();
                let decoded = inner.decode(value);
                *self = Some(inner);
                decoded
            }
        }
    }

    fn clear(&mut self) {
        *self = None;
    }

    fn is_nullable(&self) -> bool {
        true
    }

    fn field_mut(&mut self, index: usize) -> Option<&mut dyn Field> {
        match self {
            Some(inner) => inner.field_mut(index),
            None => None,
        }
    }

    fn element_mut(&mut self, index: usize) -> Option<&mut dyn Field> {
        match self {
            Some(inner) => inner.element_mut(index),
            None => None,
        }
    }
}

impl<T: Field> Field for Vec<T> {
    fn describe() -> Result<TypeDesc, BuildError> {
        T::describe().map(TypeDesc::list)
    }

    fn empty() -> Self {
        Vec::new()
    }

    fn decode(&mut self, value: &Value) -> Result<(), DecodeError> {
        let items = match value {
            Value::Null => {
                self.clear();
                return Ok(());
            }
            Value::Array(items) => items,
            other => return Err(DecodeError::mismatch("array", other)),
        };

        let mut decoded = Vec::with_capacity(items.len());
        let mut first_error = None;
        for (position, item) in items.iter().enumerate() {
            let mut element = T::empty();
            if let Err(err) = element.decode(item) {
                first_error.get_or_insert_with(|| err.within(&position.to_string()));
            }
            decoded.push(element);
        }
        *self = decoded;
        first_error.map_or(Ok(()), Err)
    }

    fn clear(&mut self) {
        Vec::clear(self);
    }

    fn element_mut(&mut self, index: usize) -> Option<&mut dyn Field> {
        self.get_mut(index).map(|element| element as &mut dyn Field)
    }
}

// ============================================================================
// ID and raw pass-through
// ============================================================================

/// The protocol's `ID` scalar. Accepts both strings and integers on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Id(pub String);

impl Id {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<'de> Deserialize<'de> for Id {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Wire {
            Text(String),
            Int(i64),
        }

        Ok(match Wire::deserialize(deserializer)? {
            Wire::Text(text) => Self(text),
            Wire::Int(int) => Self(int.to_string()),
        })
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Id {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for Id {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl PartialEq<&str> for Id {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

/// A JSON subtree kept as compact bytes instead of being destructured.
///
/// Selects nothing below the field itself. Empty until decoded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawJson(Vec<u8>);

impl RawJson {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// The captured JSON text.
    pub fn as_str(&self) -> &str {
        // Only ever filled by `serde_json::to_vec`.
        std::str::from_utf8(&self.0).unwrap_or_default()
    }

    /// Decodes the captured subtree into `T`.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.0)
    }

    fn capture(&mut self, value: &Value) -> Result<(), DecodeError> {
        self.0 = serde_json::to_vec(value).map_err(DecodeError::invalid)?;
        Ok(())
    }
}

impl Field for RawJson {
    fn describe() -> Result<TypeDesc, BuildError> {
        Ok(TypeDesc::raw(None))
    }

    fn empty() -> Self {
        Self::default()
    }

    fn decode(&mut self, value: &Value) -> Result<(), DecodeError> {
        self.capture(value)
    }

    fn clear(&mut self) {
        self.0.clear();
    }
}

impl fmt::Display for RawJson {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Like [`RawJson`], but selects the fields of the shape `S`.
pub struct Raw<S> {
    json: RawJson,
    _shape: PhantomData<fn() -> S>,
}

impl<S> Raw<S> {
    pub fn json(&self) -> &RawJson {
        &self.json
    }

    pub fn into_json(self) -> RawJson {
        self.json
    }
}

impl<S: GraphQLShape> Raw<S> {
    /// Decodes the captured subtree into the selected shape.
    pub fn parse(&self) -> Result<S, DecodeError> {
        let value: Value = self.json.parse().map_err(DecodeError::invalid)?;
        let mut shape = S::empty();
        shape.decode(&value)?;
        Ok(shape)
    }
}

impl<S> Default for Raw<S> {
    fn default() -> Self {
        Self {
            json: RawJson::default(),
            _shape: PhantomData,
        }
    }
}

impl<S> fmt::Debug for Raw<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Raw").field(&self.json.as_str()).finish()
    }
}

impl<S> Clone for Raw<S> {
    fn clone(&self) -> Self {
        Self {
            json: self.json.clone(),
            _shape: PhantomData,
        }
    }
}

impl<S: GraphQLShape> Field for Raw<S> {
    fn describe() -> Result<TypeDesc, BuildError> {
        shape_of::<S>().map(|shape| TypeDesc::raw(Some(shape)))
    }

    fn empty() -> Self {
        Self::default()
    }

    fn decode(&mut self, value: &Value) -> Result<(), DecodeError> {
        self.json.capture(value)
    }

    fn clear(&mut self) {
        self.json.clear();
    }
}
