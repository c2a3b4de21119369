//! Variable type signatures.
//!
//! [`InputType`] maps a Rust type to its protocol type signature statically;
//! values inserted as bare JSON are inferred when the document is built.

use crate::error::BuildError;
use crate::shape::Id;
use indexmap::IndexMap;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use serde_json::Value;
use std::borrow::Cow;
use std::fmt;

/// A protocol type signature such as `ID!` or `[String!]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeSig {
    Named {
        name: Cow<'static, str>,
        nullable: bool,
    },
    List {
        of: Box<TypeSig>,
        nullable: bool,
    },
}

impl TypeSig {
    /// A non-null named type.
    pub fn named(name: impl Into<Cow<'static, str>>) -> Self {
        Self::Named {
            name: name.into(),
            nullable: false,
        }
    }

    /// A non-null list of `of`.
    pub fn list(of: TypeSig) -> Self {
        Self::List {
            of: Box::new(of),
            nullable: false,
        }
    }

    /// The nullable form of this signature.
    #[must_use]
    pub fn into_nullable(mut self) -> Self {
        match &mut self {
            Self::Named { nullable, .. } | Self::List { nullable, .. } => *nullable = true,
        }
        self
    }

    pub fn is_nullable(&self) -> bool {
        match self {
            Self::Named { nullable, .. } | Self::List { nullable, .. } => *nullable,
        }
    }

    /// Number of list wrappers around the named type.
    pub fn list_depth(&self) -> usize {
        match self {
            Self::Named { .. } => 0,
            Self::List { of, .. } => 1 + of.list_depth(),
        }
    }

    /// The innermost named type.
    pub fn name(&self) -> &str {
        match self {
            Self::Named { name, .. } => name,
            Self::List { of, .. } => of.name(),
        }
    }
}

impl fmt::Display for TypeSig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let nullable = match self {
            Self::Named { name, nullable } => {
                f.write_str(name)?;
                *nullable
            }
            Self::List { of, nullable } => {
                write!(f, "[{of}]")?;
                *nullable
            }
        };
        if !nullable {
            f.write_str("!")?;
        }
        Ok(())
    }
}

/// A Rust type usable as a variable value.
///
/// Derive it for input objects and enums with `#[derive(GraphQLInput)]`.
pub trait InputType: Serialize {
    fn type_sig() -> TypeSig;
}

macro_rules! named_input {
    ($name:literal => $($ty:ty),* $(,)?) => {
        $(
            impl InputType for $ty {
                fn type_sig() -> TypeSig {
                    TypeSig::named($name)
                }
            }
        )*
    };
}

named_input!("String" => String, str);
named_input!("Boolean" => bool);
named_input!("Int" => i8, i16, i32, i64, isize, u8, u16, u32, u64, usize);
named_input!("Float" => f32, f64);
named_input!("ID" => Id);

impl<T: InputType + ?Sized> InputType for &T {
    fn type_sig() -> TypeSig {
        T::type_sig()
    }
}

impl<T: InputType> InputType for Option<T> {
    fn type_sig() -> TypeSig {
        T::type_sig().into_nullable()
    }
}

impl<T: InputType> InputType for Vec<T> {
    fn type_sig() -> TypeSig {
        TypeSig::list(T::type_sig())
    }
}

impl<T: InputType> InputType for [T] {
    fn type_sig() -> TypeSig {
        TypeSig::list(T::type_sig())
    }
}

/// Infers a signature from a bare JSON value.
pub fn infer(value: &Value) -> Result<TypeSig, &'static str> {
    match value {
        Value::Null => Err("null carries no type"),
        Value::Bool(_) => Ok(TypeSig::named("Boolean")),
        Value::Number(n) if n.is_i64() || n.is_u64() => Ok(TypeSig::named("Int")),
        Value::Number(_) => Ok(TypeSig::named("Float")),
        Value::String(_) => Ok(TypeSig::named("String")),
        Value::Array(items) => match items.first() {
            Some(first) => infer(first).map(TypeSig::list),
            None => Err("an empty list carries no element type"),
        },
        Value::Object(_) => Err("input objects need a named type; use a typed variable"),
    }
}

/// One variable value and, when known statically, its signature.
#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    pub value: Value,
    pub sig: Option<TypeSig>,
}

impl Variable {
    /// The declared signature, inferring it from the value if needed.
    pub fn resolve_sig(&self, name: &str) -> Result<TypeSig, BuildError> {
        match &self.sig {
            Some(sig) => Ok(sig.clone()),
            None => infer(&self.value).map_err(|reason| BuildError::UnmappableVariable {
                name: name.to_string(),
                reason,
            }),
        }
    }
}

/// The variables bag sent with a request. Serializes as a JSON object in
/// insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Variables {
    entries: IndexMap<String, Variable>,
}

impl Variables {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a typed value; the signature comes from [`InputType`].
    pub fn insert<V: InputType>(
        &mut self,
        name: impl Into<String>,
        value: V,
    ) -> Result<(), BuildError> {
        let name = name.into();
        let value = serde_json::to_value(&value).map_err(|source| BuildError::EncodeVariable {
            name: name.clone(),
            source,
        })?;
        self.entries.insert(
            name,
            Variable {
                value,
                sig: Some(V::type_sig()),
            },
        );
        Ok(())
    }

    /// Builder form of [`Variables::insert`].
    pub fn with<V: InputType>(
        mut self,
        name: impl Into<String>,
        value: V,
    ) -> Result<Self, BuildError> {
        self.insert(name, value)?;
        Ok(self)
    }

    /// Inserts a bare JSON value whose signature is inferred at build time.
    pub fn insert_value(&mut self, name: impl Into<String>, value: Value) {
        self.entries.insert(name.into(), Variable { value, sig: None });
    }

    /// Inserts a JSON value with an explicit signature.
    pub fn insert_typed(&mut self, name: impl Into<String>, value: Value, sig: TypeSig) {
        self.entries.insert(
            name.into(),
            Variable {
                value,
                sig: Some(sig),
            },
        );
    }

    pub fn get(&self, name: &str) -> Option<&Variable> {
        self.entries.get(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Variable)> {
        self.entries.iter().map(|(name, var)| (name.as_str(), var))
    }
}

impl Serialize for Variables {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, var) in &self.entries {
            map.serialize_entry(name, &var.value)?;
        }
        map.end()
    }
}

impl From<serde_json::Map<String, Value>> for Variables {
    fn from(map: serde_json::Map<String, Value>) -> Self {
        let mut variables = Self::new();
        for (name, value) in map {
            variables.insert_value(name, value);
        }
        variables
    }
}

/// Declared variables of a document, in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VariableTable {
    entries: IndexMap<String, TypeSig>,
}

impl VariableTable {
    pub(crate) fn declare(&mut self, name: &str, sig: TypeSig) {
        self.entries.entry(name.to_string()).or_insert(sig);
    }

    pub fn get(&self, name: &str) -> Option<&TypeSig> {
        self.entries.get(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &TypeSig)> {
        self.entries.iter().map(|(name, sig)| (name.as_str(), sig))
    }
}

/// Renders the header body: `$a: T, $b: U`.
impl fmt::Display for VariableTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (name, sig)) in self.entries.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "${name}: {sig}")?;
        }
        Ok(())
    }
}
