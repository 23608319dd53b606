mod entity;

use entity::derive_entity;
use proc_macro::TokenStream;
use proc_macro_error2::proc_macro_error;

/// Implement `tidal_orm::entity::Entity` for a struct holding an `Attributes` store, along with
/// `PartialEq`, `Eq` and `Hash` based on the entity's type and primary key.
///
/// ```ignore
/// #[derive(Default, Entity)]
/// #[tidal_orm(table = "users", validate = "validate_user")]
/// struct User {
///     attributes: Attributes,
/// }
/// ```
#[proc_macro_error]
#[proc_macro_derive(Entity, attributes(tidal_orm))]
pub fn entity(input: TokenStream) -> TokenStream {
    derive_entity(input.into()).into()
}
