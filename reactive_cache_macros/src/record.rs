use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{Data, DeriveInput, Field, Fields, Ident, LitStr, Type};

// Serialized as JSON objects, which fail at runtime on non-string keys.
const MAP_TYPES: &[&str] = &["HashMap", "BTreeMap", "IndexMap"];

pub fn derive_record(input: TokenStream) -> TokenStream {
    let input = syn::parse_macro_input!(input as DeriveInput);
    match expand(&input) {
        Ok(expanded) => TokenStream::from(expanded),
        Err(err) => TokenStream::from(err.to_compile_error()),
    }
}

fn expand(input: &DeriveInput) -> syn::Result<TokenStream2> {
    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    // #[record(entity = "...")] on the struct
    let entity = extract_entity(input)?;

    // Fields marked #[record(id)], in declaration order
    let id_fields = extract_id_fields(input)?;
    if id_fields.len() > 1 {
        for field in &id_fields {
            reject_map_type(field)?;
        }
    }
    let id_fields: Vec<&Ident> = id_fields.iter().filter_map(|field| field.ident.as_ref()).collect();

    let id_body = match id_fields.as_slice() {
        [single] => quote! {
            ::std::string::ToString::to_string(&self.#single)
        },
        several => quote! {
            ::reactive_cache::composite_id(&( #( &self.#several, )* ))
                .expect("composite record id must serialize")
        },
    };

    Ok(quote! {
        impl #impl_generics ::reactive_cache::Record for #name #ty_generics #where_clause {
            const ENTITY: &'static str = #entity;

            fn id(&self) -> ::std::string::String {
                #id_body
            }
        }
    })
}

fn extract_entity(input: &DeriveInput) -> syn::Result<String> {
    for attr in &input.attrs {
        if !attr.path().is_ident("record") {
            continue;
        }

        let mut entity = None;
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("entity") {
                let value: LitStr = meta.value()?.parse()?;
                entity = Some(value.value());
                Ok(())
            } else {
                Err(meta.error("expected `entity = \"...\"`"))
            }
        })?;

        if let Some(entity) = entity {
            return Ok(entity);
        }
    }

    // Default: snake_case struct name + "s"
    Ok(format!("{}s", to_snake_case(&input.ident.to_string())))
}

fn reject_map_type(field: &Field) -> syn::Result<()> {
    let Type::Path(path) = &field.ty else {
        return Ok(());
    };
    match path.path.segments.last() {
        Some(segment) if MAP_TYPES.iter().any(|map| segment.ident == *map) => Err(syn::Error::new_spanned(
            &field.ty,
            "Record derive: composite id fields cannot be maps; use scalars, strings, tuples or sequences",
        )),
        _ => Ok(()),
    }
}

fn extract_id_fields(input: &DeriveInput) -> syn::Result<Vec<Field>> {
    let Data::Struct(data_struct) = &input.data else {
        return Err(syn::Error::new_spanned(
            &input.ident,
            "Record derive: only structs with named fields are supported",
        ));
    };
    let Fields::Named(fields) = &data_struct.fields else {
        return Err(syn::Error::new_spanned(
            &input.ident,
            "Record derive: only structs with named fields are supported",
        ));
    };

    let mut marked = Vec::new();
    for field in &fields.named {
        for attr in &field.attrs {
            if !attr.path().is_ident("record") {
                continue;
            }
            let mut is_id = false;
            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("id") {
                    is_id = true;
                    Ok(())
                } else {
                    Err(meta.error("expected `id`"))
                }
            })?;
            if is_id {
                marked.push(field.clone());
            }
        }
    }
    if !marked.is_empty() {
        return Ok(marked);
    }

    // Default: a field named "id"
    fields
        .named
        .iter()
        .find(|field| field.ident.as_ref().is_some_and(|ident| ident == "id"))
        .map(|field| vec![field.clone()])
        .ok_or_else(|| {
            syn::Error::new_spanned(
                &input.ident,
                "Record derive: no field marked with #[record(id)] and no field named `id`",
            )
        })
}

fn to_snake_case(s: &str) -> String {
    let mut result = String::new();
    for (i, ch) in s.chars().enumerate() {
        if ch.is_uppercase() {
            if i > 0 {
                result.push('_');
            }
            result.extend(ch.to_lowercase());
        } else {
            result.push(ch);
        }
    }
    result
}
