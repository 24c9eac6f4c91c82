//! `#[derive(Document)]` for the whisker document store.
//!
//! The macro analyzes a named struct once at compile time and generates the
//! `whisker::Document` implementation: id and version accessors, the JSON
//! payload split (the stored `data` object never contains the id or version
//! keys), and the declared index list.
//!
//! Role resolution is convention-first with attribute override:
//!
//! - the id field is the one attributed `#[document(id)]`, else the field
//!   named `id`; it must be a `String`
//! - the version field is the one attributed `#[document(version)]`, else a
//!   field named `version` of integer type; it is optional
//! - `#[document(index)]` on a field declares a btree index on its JSON
//!   path; `#[document(index(gin))]` declares one whole-document GIN index
//!
//! JSON keys follow serde: a field-level `#[serde(rename = "...")]` wins,
//! else a container-level `#[serde(rename_all = "camelCase")]` is applied,
//! else the field name is used verbatim. Fields with `#[serde(skip)]` are
//! excluded from the data payload and the index list.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{parse_macro_input, Data, DeriveInput, Fields, LitStr, Token};

#[derive(Clone, Copy, PartialEq)]
enum IndexKind {
    Btree,
    Gin,
}

struct FieldInfo {
    ident: syn::Ident,
    ty: syn::Type,
    json_key: String,
    skip: bool,
    is_id: bool,
    is_version: bool,
    index: Option<IndexKind>,
}

#[proc_macro_derive(Document, attributes(document))]
pub fn derive_document(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    match expand(&input) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

fn expand(input: &DeriveInput) -> syn::Result<TokenStream2> {
    let fields = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(named) => &named.named,
            _ => {
                return Err(syn::Error::new_spanned(
                    input,
                    "#[derive(Document)] requires named fields",
                ))
            }
        },
        _ => {
            return Err(syn::Error::new_spanned(
                input,
                "#[derive(Document)] only supports structs",
            ))
        }
    };

    let rename_all = container_rename_all(&input.attrs);
    let mut infos = Vec::with_capacity(fields.len());
    for field in fields {
        infos.push(analyze_field(field, rename_all.as_deref())?);
    }

    let id = resolve_id(input, &infos)?;
    let version = resolve_version(&infos);

    let ident = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let id_ident = &id.ident;
    let id_key = &id.json_key;

    let version_accessors = match version {
        Some(v) => {
            let v_ident = &v.ident;
            quote! {
                fn document_version(&self) -> ::std::option::Option<i64> {
                    ::std::option::Option::Some(self.#v_ident as i64)
                }

                fn set_document_version(&mut self, version: i64) {
                    self.#v_ident = version as _;
                }
            }
        }
        None => quote! {},
    };

    let strip_version = version.map(|v| {
        let key = &v.json_key;
        quote! { map.remove(#key); }
    });
    let inject_version = version.map(|v| {
        let key = &v.json_key;
        quote! {
            map.insert(
                #key.to_owned(),
                whisker::serde_json::Value::from(version),
            );
        }
    });

    let index_entries = index_entries(&infos);
    let field_entries = infos.iter().filter(|f| !f.skip).map(|f| {
        let column = f.ident.to_string();
        let json_key = &f.json_key;
        quote! {
            whisker::FieldSpec { column: #column, json_key: #json_key }
        }
    });

    Ok(quote! {
        #[automatically_derived]
        impl #impl_generics whisker::Document for #ident #ty_generics #where_clause {
            const INDEXES: &'static [whisker::IndexSpec] = &[#(#index_entries),*];
            const FIELDS: &'static [whisker::FieldSpec] = &[#(#field_entries),*];

            fn document_id(&self) -> &str {
                &self.#id_ident
            }

            fn set_document_id(&mut self, id: &str) {
                self.#id_ident = id.to_owned();
            }

            #version_accessors

            fn to_data(
                &self,
            ) -> ::std::result::Result<whisker::serde_json::Value, whisker::serde_json::Error>
            {
                let mut value = whisker::serde_json::to_value(self)?;
                if let whisker::serde_json::Value::Object(map) = &mut value {
                    map.remove(#id_key);
                    #strip_version
                }
                ::std::result::Result::Ok(value)
            }

            fn from_data(
                data: whisker::serde_json::Value,
                id: &str,
                version: i64,
            ) -> ::std::result::Result<Self, whisker::serde_json::Error> {
                let mut map = match data {
                    whisker::serde_json::Value::Object(map) => map,
                    _ => whisker::serde_json::Map::new(),
                };
                map.insert(
                    #id_key.to_owned(),
                    whisker::serde_json::Value::String(id.to_owned()),
                );
                #inject_version
                let _ = version;
                whisker::serde_json::from_value(whisker::serde_json::Value::Object(map))
            }
        }
    })
}

fn resolve_id<'a>(input: &DeriveInput, infos: &'a [FieldInfo]) -> syn::Result<&'a FieldInfo> {
    let id = infos
        .iter()
        .find(|f| f.is_id)
        .or_else(|| infos.iter().find(|f| f.ident == "id"));
    let id = id.ok_or_else(|| {
        syn::Error::new_spanned(
            &input.ident,
            "#[derive(Document)] requires an id field: name one `id` or attribute one with #[document(id)]",
        )
    })?;
    if !is_string(&id.ty) {
        return Err(syn::Error::new_spanned(
            &id.ident,
            "the document id field must be a String",
        ));
    }
    Ok(id)
}

fn resolve_version<'a>(infos: &'a [FieldInfo]) -> Option<&'a FieldInfo> {
    infos
        .iter()
        .find(|f| f.is_version)
        .or_else(|| infos.iter().find(|f| f.ident == "version" && is_integer(&f.ty)))
}

fn index_entries(infos: &[FieldInfo]) -> Vec<TokenStream2> {
    let mut entries = Vec::new();
    let mut has_gin = false;
    for field in infos.iter().filter(|f| !f.skip) {
        match field.index {
            Some(IndexKind::Btree) => {
                let json_key = &field.json_key;
                entries.push(quote! {
                    whisker::IndexSpec {
                        kind: whisker::IndexKind::Btree,
                        json_key: #json_key,
                    }
                });
            }
            Some(IndexKind::Gin) if !has_gin => {
                has_gin = true;
                entries.push(quote! {
                    whisker::IndexSpec {
                        kind: whisker::IndexKind::Gin,
                        json_key: "",
                    }
                });
            }
            _ => {}
        }
    }
    entries
}

fn analyze_field(field: &syn::Field, rename_all: Option<&str>) -> syn::Result<FieldInfo> {
    let ident = field.ident.clone().expect("named field");

    let mut is_id = false;
    let mut is_version = false;
    let mut index = None;
    for attr in &field.attrs {
        if !attr.path().is_ident("document") {
            continue;
        }
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("id") {
                is_id = true;
            } else if meta.path.is_ident("version") {
                is_version = true;
            } else if meta.path.is_ident("index") {
                if meta.input.peek(syn::token::Paren) {
                    meta.parse_nested_meta(|inner| {
                        if inner.path.is_ident("gin") {
                            index = Some(IndexKind::Gin);
                            Ok(())
                        } else {
                            Err(inner.error("unknown index kind; expected `gin`"))
                        }
                    })?;
                } else {
                    index = Some(IndexKind::Btree);
                }
            } else {
                return Err(meta.error("unknown document attribute"));
            }
            Ok(())
        })?;
    }

    let (rename, skip) = serde_field_attrs(&field.attrs);
    let json_key = rename.unwrap_or_else(|| match rename_all {
        Some("camelCase") => camel_case(&ident.to_string()),
        _ => ident.to_string(),
    });

    Ok(FieldInfo {
        ident,
        ty: field.ty.clone(),
        json_key,
        skip,
        is_id,
        is_version,
        index,
    })
}

/// Reads `rename` and `skip` out of `#[serde(...)]` attributes, ignoring
/// everything else serde understands.
fn serde_field_attrs(attrs: &[syn::Attribute]) -> (Option<String>, bool) {
    let mut rename = None;
    let mut skip = false;
    for attr in attrs {
        if !attr.path().is_ident("serde") {
            continue;
        }
        let _ = attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("rename") {
                rename = Some(meta.value()?.parse::<LitStr>()?.value());
            } else if meta.path.is_ident("skip") {
                skip = true;
            } else if meta.input.peek(syn::token::Paren) {
                let content;
                syn::parenthesized!(content in meta.input);
                let _: TokenStream2 = content.parse()?;
            } else if meta.input.peek(Token![=]) {
                let _: syn::Expr = meta.value()?.parse()?;
            }
            Ok(())
        });
    }
    (rename, skip)
}

fn container_rename_all(attrs: &[syn::Attribute]) -> Option<String> {
    let mut rename_all = None;
    for attr in attrs {
        if !attr.path().is_ident("serde") {
            continue;
        }
        let _ = attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("rename_all") {
                rename_all = Some(meta.value()?.parse::<LitStr>()?.value());
            } else if meta.input.peek(syn::token::Paren) {
                let content;
                syn::parenthesized!(content in meta.input);
                let _: TokenStream2 = content.parse()?;
            } else if meta.input.peek(Token![=]) {
                let _: syn::Expr = meta.value()?.parse()?;
            }
            Ok(())
        });
    }
    rename_all
}

fn is_string(ty: &syn::Type) -> bool {
    last_segment(ty).is_some_and(|s| s == "String")
}

fn is_integer(ty: &syn::Type) -> bool {
    const INTS: &[&str] = &[
        "i8", "i16", "i32", "i64", "isize", "u8", "u16", "u32", "u64", "usize",
    ];
    last_segment(ty).is_some_and(|s| INTS.contains(&s.as_str()))
}

fn last_segment(ty: &syn::Type) -> Option<String> {
    match ty {
        syn::Type::Path(path) => path.path.segments.last().map(|s| s.ident.to_string()),
        _ => None,
    }
}

fn camel_case(snake: &str) -> String {
    let mut out = String::with_capacity(snake.len());
    let mut upper_next = false;
    for ch in snake.chars() {
        if ch == '_' {
            upper_next = true;
        } else if upper_next {
            out.extend(ch.to_uppercase());
            upper_next = false;
        } else {
            out.push(ch);
        }
    }
    out
}
