mod record;

use proc_macro::TokenStream;

/// Derive macro for the `Record` trait.
///
/// # Usage
///
/// ```ignore
/// #[derive(Clone, PartialEq, Record)]
/// #[record(entity = "users")]
/// struct User {
///     #[record(id)]
///     pub id: String,
///     pub name: String,
/// }
/// ```
///
/// - `#[record(entity = "...")]` sets the entity name.
///   If omitted, defaults to snake_case struct name + "s".
/// - `#[record(id)]` marks the field used as the store key. Marking several
///   fields builds a composite id (a JSON array of their values, in field
///   order). If omitted, defaults to a field named `id`.
/// - Single id fields only need `ToString`; composite id fields need
///   `serde::Serialize` and must encode to JSON without error; `id()`
///   panics otherwise. Map-typed fields (`HashMap`, `BTreeMap`, `IndexMap`)
///   are rejected in composite ids.
#[proc_macro_derive(Record, attributes(record))]
pub fn derive_record(input: TokenStream) -> TokenStream {
    record::derive_record(input)
}
