//! Derive macros for shapeql.
//!
//! `GraphQLShape` turns a struct into a selection shape: the derive only
//! emits a static field table and an indexed field accessor, everything else
//! (document building, decoding, error-path walking) is generic code in
//! `shapeql_sdk` driven by the cached descriptor.
//!
//! # Example
//!
//! ```ignore
//! use shapeql_sdk::{GraphQLInput, GraphQLShape, Id};
//!
//! #[derive(GraphQLShape)]
//! struct Viewer {
//!     #[graphql("node1: node(id: $id)")]
//!     node: Option<Node>,
//!     #[graphql(skip)]
//!     fetched_at: u64,
//! }
//!
//! #[derive(GraphQLShape)]
//! struct Node {
//!     id: Id,
//! }
//!
//! #[derive(serde::Serialize, GraphQLInput)]
//! #[graphql(name = "UserFilter")]
//! struct Filter {
//!     active: bool,
//! }
//! ```

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{
    ext::IdentExt, parse::ParseStream, parse_macro_input, punctuated::Punctuated, Attribute, Data,
    DataStruct, DeriveInput, Fields, Ident, LitStr, Token,
};

/// Derives `shapeql_sdk::shape::GraphQLShape` and `shapeql_sdk::shape::Field`.
///
/// Field attributes:
///
/// - `#[graphql("alias: name(args)")]` selects `name` under `alias` with the
///   argument clause copied verbatim. `"name"` and `"name(args)"` work too.
/// - `#[graphql("... on Type")]` selects the field's own fields as an inline
///   fragment on `Type`.
/// - `#[graphql(skip)]` or `#[graphql("-")]` leaves the field out of the
///   query and out of decoding. Skipped fields must implement `Default`.
/// - `#[graphql(flatten)]` splices the nested struct's fields into this
///   selection set.
#[proc_macro_derive(GraphQLShape, attributes(graphql))]
pub fn derive_graphql_shape(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    expand_shape(&input)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}

/// Derives `shapeql_sdk::types::InputType` for a serializable input object
/// or enum. The protocol type name defaults to the Rust identifier and can
/// be overridden with `#[graphql(name = "ProtocolName")]`.
#[proc_macro_derive(GraphQLInput, attributes(graphql))]
pub fn derive_graphql_input(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    expand_input(&input)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}

enum GraphqlArg {
    Tag(LitStr),
    Skip(Ident),
    Flatten(Ident),
    Name(Ident, LitStr),
}

impl syn::parse::Parse for GraphqlArg {
    fn parse(input: ParseStream) -> syn::Result<Self> {
        if input.peek(LitStr) {
            return Ok(Self::Tag(input.parse()?));
        }

        let ident: Ident = input.parse()?;
        match ident.to_string().as_str() {
            "skip" => Ok(Self::Skip(ident)),
            "flatten" => Ok(Self::Flatten(ident)),
            "name" => {
                input.parse::<Token![=]>()?;
                Ok(Self::Name(ident, input.parse()?))
            }
            other => Err(syn::Error::new(
                ident.span(),
                format!("unknown graphql attribute `{other}`"),
            )),
        }
    }
}

fn graphql_args(attrs: &[Attribute]) -> syn::Result<Vec<GraphqlArg>> {
    let mut args = Vec::new();
    for attr in attrs.iter().filter(|attr| attr.path().is_ident("graphql")) {
        let parsed =
            attr.parse_args_with(Punctuated::<GraphqlArg, Token![,]>::parse_terminated)?;
        args.extend(parsed);
    }
    Ok(args)
}

#[derive(Default)]
struct FieldAttrs {
    tag: Option<LitStr>,
    skip: bool,
    flatten: bool,
}

impl FieldAttrs {
    fn from_attrs(attrs: &[Attribute]) -> syn::Result<Self> {
        let mut out = Self::default();
        for arg in graphql_args(attrs)? {
            match arg {
                GraphqlArg::Tag(lit) => {
                    if out.tag.is_some() {
                        return Err(syn::Error::new(lit.span(), "duplicate graphql tag"));
                    }
                    if lit.value().trim() == "-" {
                        out.skip = true;
                    }
                    out.tag = Some(lit);
                }
                GraphqlArg::Skip(_) => out.skip = true,
                GraphqlArg::Flatten(_) => out.flatten = true,
                GraphqlArg::Name(ident, _) => {
                    return Err(syn::Error::new(
                        ident.span(),
                        "`name` is a container attribute; use a tag string on fields",
                    ));
                }
            }
        }
        Ok(out)
    }
}

fn expand_shape(input: &DeriveInput) -> syn::Result<TokenStream2> {
    let krate = quote! { ::shapeql_sdk };
    let name = &input.ident;
    let name_str = name.unraw().to_string();
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let fields = match &input.data {
        Data::Struct(DataStruct {
            fields: Fields::Named(named),
            ..
        }) => &named.named,
        _ => {
            return Err(syn::Error::new_spanned(
                name,
                "GraphQLShape can only be derived for structs with named fields",
            ));
        }
    };

    let mut raw_fields = Vec::new();
    let mut accessors = Vec::new();
    let mut initializers = Vec::new();
    let mut index = 0usize;

    for field in fields {
        let Some(ident) = &field.ident else {
            continue;
        };
        let ty = &field.ty;
        let attrs = FieldAttrs::from_attrs(&field.attrs)?;
        let ident_str = ident.unraw().to_string();

        if attrs.skip {
            raw_fields.push(quote! {
                #krate::shape::RawField::ignored(#ident_str)
            });
            initializers.push(quote! {
                #ident: ::core::default::Default::default()
            });
            continue;
        }

        let tag = match &attrs.tag {
            Some(lit) => quote! { ::core::option::Option::Some(#lit) },
            None => quote! { ::core::option::Option::None },
        };
        let flatten = attrs.flatten;

        raw_fields.push(quote! {
            #krate::shape::RawField::of::<#ty>(#ident_str, #index, #tag, #flatten)
        });
        accessors.push(quote! {
            #index => ::core::option::Option::Some(&mut self.#ident as &mut dyn #krate::shape::Field)
        });
        initializers.push(quote! {
            #ident: <#ty as #krate::shape::Field>::empty()
        });
        index += 1;
    }

    Ok(quote! {
        impl #impl_generics #krate::shape::GraphQLShape for #name #ty_generics #where_clause {
            const TYPE_NAME: &'static str = #name_str;

            fn raw_fields() -> ::std::vec::Vec<#krate::shape::RawField> {
                ::std::vec![#(#raw_fields),*]
            }
        }

        impl #impl_generics #krate::shape::Field for #name #ty_generics #where_clause {
            fn describe() -> ::core::result::Result<#krate::shape::TypeDesc, #krate::error::BuildError> {
                #krate::shape::describe_object::<Self>()
            }

            fn empty() -> Self {
                Self {
                    #(#initializers),*
                }
            }

            fn decode(
                &mut self,
                value: &#krate::__private::Value,
            ) -> ::core::result::Result<(), #krate::shape::DecodeError> {
                #krate::shape::decode_object(self, value)
            }

            fn clear(&mut self) {
                *self = <Self as #krate::shape::Field>::empty();
            }

            fn field_mut(
                &mut self,
                index: usize,
            ) -> ::core::option::Option<&mut dyn #krate::shape::Field> {
                match index {
                    #(#accessors,)*
                    _ => ::core::option::Option::None,
                }
            }
        }
    })
}

fn expand_input(input: &DeriveInput) -> syn::Result<TokenStream2> {
    let krate = quote! { ::shapeql_sdk };
    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let mut type_name = name.unraw().to_string();
    for arg in graphql_args(&input.attrs)? {
        match arg {
            GraphqlArg::Name(_, lit) => type_name = lit.value(),
            GraphqlArg::Tag(lit) => {
                return Err(syn::Error::new(
                    lit.span(),
                    "input types take `name = \"...\"`, not a selection tag",
                ));
            }
            GraphqlArg::Skip(ident) | GraphqlArg::Flatten(ident) => {
                return Err(syn::Error::new(
                    ident.span(),
                    "`skip` and `flatten` only apply to shape fields",
                ));
            }
        }
    }

    Ok(quote! {
        impl #impl_generics #krate::types::InputType for #name #ty_generics #where_clause {
            fn type_sig() -> #krate::types::TypeSig {
                #krate::types::TypeSig::named(#type_name)
            }
        }
    })
}
