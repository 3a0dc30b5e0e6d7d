use proc_macro2::Span;
use proc_macro_crate::FoundCrate;
use proc_macro::TokenStream;

mod attrs;
mod entry;

fn get_hookwire_crate_name() -> syn::Result<syn::Ident> {
    match proc_macro_crate::crate_name("hookwire") {
        // `hookwire` re-exports itself under its own name, so this works both inside the
        // library and in its integration tests
        Ok(FoundCrate::Itself) => Ok(syn::Ident::new("hookwire", Span::call_site())),
        Ok(FoundCrate::Name(named)) => Ok(syn::Ident::new(named.as_str(), Span::call_site())),
        Err(e) => Err(syn::Error::new(Span::call_site(), e)),
    }
}

/// Turns a plain function into a plugin API entry point.
///
/// A module with the function's name is generated next to it, holding `NAME` and
/// `entry`, the marshalling wrapper to register with `Api::register`. The wrapper pops
/// one argument per parameter, in declaration order, calls the function, and pushes
/// the return value (`()`, a single value, or a tuple pushed left to right). A
/// `Result` return is unwrapped first, its error becoming a handler failure.
#[proc_macro_attribute]
pub fn entry_point(attr: TokenStream, item: TokenStream) -> TokenStream {
    entry::make_entry_point(attr, item)
}
