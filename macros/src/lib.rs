//! Derive macros for the boxoffice lifecycle engine
//!
//! Machine inputs travel under stable wire names: job keys, the event log,
//! `can_transition` lookups and metric labels all refer to `TICKET_RESERVED`
//! rather than to a Rust variant. This crate derives those names from the
//! action enums so the two never drift apart.
//!
//! # Available Macros
//!
//! - `#[derive(MachineEvent)]` - Generates event-name helpers for action enums
//!
//! # Example
//!
//! ```ignore
//! use boxoffice_macros::MachineEvent;
//!
//! #[derive(MachineEvent, Clone, Debug)]
//! enum ShowAction {
//!     TicketReserved { ticket_id: TicketId },
//!     ShowStarted,
//!     #[event(name = "BOX_OFFICE_CLOSED")]
//!     CloseBoxOffice,
//! }
//!
//! assert_eq!(ShowAction::ShowStarted.name(), "SHOW_STARTED");
//! assert!(ShowAction::NAMES.contains(&"BOX_OFFICE_CLOSED"));
//! assert!(ShowAction::from_unit_name("SHOW_STARTED").is_some());
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use proc_macro::TokenStream;
use quote::quote;
use syn::{Attribute, Data, DeriveInput, Fields, LitStr, parse_macro_input};

/// Derive macro for machine action enums
///
/// Generates:
/// - `name()` - the SCREAMING_SNAKE event name of the variant
/// - `NAMES` - every event name the enum can carry, in declaration order
/// - `from_unit_name()` - builds a field-less variant from its event name,
///   which is how timer jobs that carry no payload are turned back into actions
///
/// # Attributes
///
/// - `#[event(name = "...")]` - Override the derived event name
///
/// # Panics
///
/// This macro will produce a compile error (not a runtime panic) if:
/// - Applied to a non-enum type
/// - Two variants resolve to the same event name
/// - The `event` attribute is malformed
#[proc_macro_derive(MachineEvent, attributes(event))]
pub fn derive_machine_event(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    let name = &input.ident;

    let Data::Enum(data_enum) = &input.data else {
        return syn::Error::new_spanned(input, "#[derive(MachineEvent)] can only be used on enums")
            .to_compile_error()
            .into();
    };

    let mut names: Vec<String> = Vec::with_capacity(data_enum.variants.len());
    let mut name_arms = Vec::with_capacity(data_enum.variants.len());
    let mut unit_arms = Vec::new();

    for variant in &data_enum.variants {
        let variant_ident = &variant.ident;
        let event_name = match event_name_override(&variant.attrs) {
            Ok(Some(explicit)) => explicit,
            Ok(None) => screaming_snake(&variant_ident.to_string()),
            Err(err) => return err.to_compile_error().into(),
        };

        if names.contains(&event_name) {
            return syn::Error::new_spanned(
                variant,
                format!("duplicate machine event name `{event_name}`"),
            )
            .to_compile_error()
            .into();
        }

        let arm = match &variant.fields {
            Fields::Named(_) => quote! { Self::#variant_ident { .. } => #event_name, },
            Fields::Unnamed(_) => quote! { Self::#variant_ident(..) => #event_name, },
            Fields::Unit => {
                unit_arms.push(quote! { #event_name => Some(Self::#variant_ident), });
                quote! { Self::#variant_ident => #event_name, }
            },
        };
        name_arms.push(arm);
        names.push(event_name);
    }

    let expanded = quote! {
        impl #name {
            /// Every event name this machine understands
            pub const NAMES: &'static [&'static str] = &[#(#names),*];

            /// Returns the wire name of this event
            #[must_use]
            pub const fn name(&self) -> &'static str {
                match self {
                    #(#name_arms)*
                }
            }

            /// Builds a field-less event from its wire name
            #[must_use]
            pub fn from_unit_name(name: &str) -> Option<Self> {
                match name {
                    #(#unit_arms)*
                    _ => None,
                }
            }

            /// Returns true if `name` is one of this machine's event names
            #[must_use]
            pub fn is_known(name: &str) -> bool {
                Self::NAMES.contains(&name)
            }
        }
    };

    TokenStream::from(expanded)
}

/// Reads `#[event(name = "...")]` from a variant, if present
fn event_name_override(attrs: &[Attribute]) -> syn::Result<Option<String>> {
    let mut found = None;
    for attr in attrs.iter().filter(|attr| attr.path().is_ident("event")) {
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("name") {
                let value: LitStr = meta.value()?.parse()?;
                found = Some(value.value());
                Ok(())
            } else {
                Err(meta.error("unsupported event attribute, expected `name = \"...\"`"))
            }
        })?;
    }
    Ok(found)
}

/// `TicketReservationTimeout` -> `TICKET_RESERVATION_TIMEOUT`
fn screaming_snake(ident: &str) -> String {
    let mut out = String::with_capacity(ident.len() + 4);
    let chars: Vec<char> = ident.chars().collect();
    for (i, c) in chars.iter().enumerate() {
        if c.is_uppercase() && i > 0 {
            let prev_lower = chars[i - 1].is_lowercase() || chars[i - 1].is_ascii_digit();
            let next_lower = chars.get(i + 1).is_some_and(|n| n.is_lowercase());
            if prev_lower || (chars[i - 1].is_uppercase() && next_lower) {
                out.push('_');
            }
        }
        out.extend(c.to_uppercase());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::screaming_snake;

    #[test]
    fn converts_camel_case_variants() {
        assert_eq!(screaming_snake("TicketReserved"), "TICKET_RESERVED");
        assert_eq!(screaming_snake("ShowStarted"), "SHOW_STARTED");
        assert_eq!(screaming_snake("Waiting4Payment"), "WAITING4_PAYMENT");
        assert_eq!(screaming_snake("HTTPTimeout"), "HTTP_TIMEOUT");
        assert_eq!(screaming_snake("Ended"), "ENDED");
    }
}
