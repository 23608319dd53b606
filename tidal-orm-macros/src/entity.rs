use convert_case::{Case, Casing};
use darling::{
    FromDeriveInput, FromField,
    ast::Data,
    util::{Flag, PathList},
};
use proc_macro_error2::{abort, emit_error};
use proc_macro2::TokenStream;
use quote::quote;
use syn::{DeriveInput, Ident, Path, parse2};

#[derive(FromField, Debug, Clone)]
#[darling(attributes(tidal_orm))]
struct DeriveEntityField {
    ident: Option<Ident>,
    attributes: Flag,
}

#[derive(FromDeriveInput)]
#[darling(attributes(tidal_orm))]
struct DeriveEntityTarget {
    ident: Ident,
    generics: syn::Generics,
    table: Option<String>,
    primary_key: Option<PathList>,
    validate: Option<Path>,
    data: Data<(), DeriveEntityField>,
}

pub fn derive_entity(input: TokenStream) -> TokenStream {
    let input: DeriveInput = match parse2(input) {
        Ok(r) => r,
        Err(e) => return e.to_compile_error(),
    };

    let target = match DeriveEntityTarget::from_derive_input(&input) {
        Ok(r) => r,
        Err(e) => return e.write_errors(),
    };

    let Some(struct_data) = target.data.take_struct() else {
        abort! {
            input, "Target is not a struct.";
            note = "This macro must be run on a struct.";
        };
    };

    let marked = struct_data
        .fields
        .iter()
        .filter(|e| e.attributes.is_present())
        .collect::<Vec<_>>();

    if marked.len() > 1 {
        marked.iter().for_each(|e| {
            emit_error! {
                e.attributes.span(), "Clashing attribute store here."
            };
        });

        abort! {
            input, "More than one field is marked as the attribute store.";
            note = "Mark exactly one field with #[tidal_orm(attributes)].";
        }
    }

    let attributes_field = marked
        .first()
        .and_then(|e| e.ident.clone())
        .or_else(|| {
            struct_data
                .fields
                .iter()
                .filter_map(|e| e.ident.as_ref())
                .find(|e| **e == "attributes")
                .cloned()
        });

    let Some(attributes_field) = attributes_field else {
        abort! {
            input, "Missing attribute store.";
            note = "Add a field `attributes: Attributes`, or mark the field holding the store with #[tidal_orm(attributes)].";
        }
    };

    let primary_keys = match &target.primary_key {
        None => vec!["id".to_string()],
        Some(list) => list
            .iter()
            .map(|e| match e.get_ident() {
                Some(ident) => ident.to_string(),
                None => abort! {
                    e, "Primary key columns must be plain column names.";
                    note = "Use e.g. #[tidal_orm(primary_key(order_id, product_id))].";
                },
            })
            .collect(),
    };

    if let Some(duplicate) = primary_keys
        .iter()
        .find(|e| primary_keys.iter().filter(|o| e.eq(o)).count() > 1)
    {
        abort! {
            input, "Duplicate primary key column \"{}\"", duplicate;
            note = "Each primary key column may only be listed once.";
        }
    }

    let table_name = target
        .table
        .unwrap_or(target.ident.to_string().to_case(Case::Snake));

    let validate_impl = target.validate.map(|path| {
        quote! {
            fn validate(&self) -> ::std::vec::Vec<::std::string::String> {
                #path(self)
            }
        }
    });

    let entity_ident = &target.ident;
    let (impl_generics, ty_generics, where_clause) = target.generics.split_for_impl();

    quote! {
        impl #impl_generics ::tidal_orm::entity::Entity for #entity_ident #ty_generics #where_clause {
            fn table_name() -> ::std::string::String {
                ::std::string::String::from(#table_name)
            }

            fn primary_keys() -> &'static [&'static str] {
                &[
                    #(#primary_keys),*
                ]
            }

            fn attributes(&self) -> &::tidal_orm::entity::attributes::Attributes {
                &self.#attributes_field
            }

            fn attributes_mut(&mut self) -> &mut ::tidal_orm::entity::attributes::Attributes {
                &mut self.#attributes_field
            }

            #validate_impl
        }

        impl #impl_generics ::std::cmp::PartialEq for #entity_ident #ty_generics #where_clause {
            fn eq(&self, other: &Self) -> bool {
                ::tidal_orm::entity::same_identity(self, other)
            }
        }

        impl #impl_generics ::std::cmp::Eq for #entity_ident #ty_generics #where_clause {}

        impl #impl_generics ::std::hash::Hash for #entity_ident #ty_generics #where_clause {
            fn hash<H: ::std::hash::Hasher>(&self, state: &mut H) {
                ::tidal_orm::entity::hash_identity(self, state);
            }
        }
    }
}
