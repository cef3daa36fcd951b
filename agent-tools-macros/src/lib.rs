//! Procedural macros for capability registration.
//!
//! `#[capability]` leaves the annotated function untouched and registers it at
//! link time, so `CapabilityModule::collect(module_path!())` can discover it
//! without a hand-maintained export table.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{ItemFn, LitStr, parse_macro_input};

/// Registers a function as a capability.
///
/// The function must have the signature
/// `fn(ResolvedArguments) -> ToolResult<serde_json::Value>`. The exported symbol
/// defaults to the function name and can be overridden with
/// `#[capability(name = "...")]`.
#[proc_macro_attribute]
pub fn capability(attr: TokenStream, item: TokenStream) -> TokenStream {
    let function = parse_macro_input!(item as ItemFn);

    let mut name: Option<LitStr> = None;
    let parser = syn::meta::parser(|meta| {
        if meta.path.is_ident("name") {
            name = Some(meta.value()?.parse()?);
            Ok(())
        } else {
            Err(meta.error("unsupported capability property, expected `name`"))
        }
    });
    parse_macro_input!(attr with parser);

    if let Some(asyncness) = &function.sig.asyncness {
        return syn::Error::new_spanned(asyncness, "capabilities must be synchronous functions")
            .to_compile_error()
            .into();
    }
    if !function.sig.generics.params.is_empty() {
        return syn::Error::new_spanned(&function.sig.generics, "capabilities cannot be generic")
            .to_compile_error()
            .into();
    }

    let ident = &function.sig.ident;
    let symbol = name.unwrap_or_else(|| LitStr::new(&ident.to_string(), ident.span()));

    let expanded: TokenStream2 = quote! {
        #function

        ::agent_tools::inventory::submit! {
            ::agent_tools::registry::CapabilityDescriptor::new(
                #symbol,
                ::core::module_path!(),
                #ident,
            )
        }
    };
    expanded.into()
}
