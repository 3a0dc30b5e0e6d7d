use proc_macro2::TokenStream;
use syn::spanned::Spanned;

use super::attrs::EntryPointAttrs;

/// Extracts the identifier from the provided argument
fn arg_to_name(input: &syn::FnArg) -> syn::Result<syn::Ident> {
    match input {
        // There is no object to pop a receiver into
        syn::FnArg::Receiver(receiver) => {
            Err(syn::Error::new(receiver.span(), "entry points cannot take `self`"))
        },
        // If it is a typed argument, make sure that the ident pattern is *not* a wild match,
        // since the generated wrapper needs a binding to pop into
        syn::FnArg::Typed(syn::PatType { pat, .. }) => match &**pat {
            syn::Pat::Ident(syn::PatIdent { ident, .. }) => Ok(ident.clone()),
            _ => Err(syn::Error::new(pat.span(), "invalid argument pattern, expected an identifier"))
        }
    }
}

/// Extracts the type of the provided argument
fn arg_to_type(input: &syn::FnArg) -> syn::Result<syn::Type> {
    match input {
        syn::FnArg::Receiver(receiver) => {
            Err(syn::Error::new(receiver.span(), "entry points cannot take `self`"))
        },
        syn::FnArg::Typed(syn::PatType { ty, .. }) => Ok((**ty).clone())
    }
}

/// Checks if the return type is a `Result`, by the last segment of its path
fn returns_result(output: &syn::ReturnType) -> bool {
    let syn::ReturnType::Type(_, ty) = output else {
        return false;
    };

    match &**ty {
        syn::Type::Path(path) => path
            .path
            .segments
            .last()
            .map(|segment| segment.ident == "Result")
            .unwrap_or(false),
        _ => false
    }
}

fn make_entry_point_internal(attrs: EntryPointAttrs, user_fn: syn::ItemFn) -> syn::Result<TokenStream> {
    if !user_fn.sig.generics.params.is_empty() {
        return Err(syn::Error::new(
            user_fn.sig.generics.span(),
            "entry points cannot be generic, every argument needs a fixed type tag"
        ));
    }

    if let Some(asyncness) = &user_fn.sig.asyncness {
        return Err(syn::Error::new(asyncness.span(), "entry points run synchronously on the calling thread"));
    }

    let hookwire = crate::get_hookwire_crate_name()?;

    let base_ident = &user_fn.sig.ident;
    let vis = &user_fn.vis;

    let name = match &attrs.name {
        Some(kv) => kv.value.value(),
        None => base_ident.to_string()
    };

    let names = user_fn.sig.inputs
        .iter()
        .map(arg_to_name)
        .collect::<syn::Result<Vec<_>>>()?;

    let types = user_fn.sig.inputs
        .iter()
        .map(arg_to_type)
        .collect::<syn::Result<Vec<_>>>()?;

    let names_ = names.iter();

    // Pop order is declaration order, which is the documented wire order of the entry point
    let call = if returns_result(&user_fn.sig.output) {
        quote::quote! {
            super::#base_ident(#(#names_),*)
                .map_err(|error| #hookwire::Error::handler(NAME, error))?
        }
    } else {
        quote::quote! {
            super::#base_ident(#(#names_),*)
        }
    };

    let names = names.iter();
    let types = types.iter();

    Ok(quote::quote! {
        #vis mod #base_ident {
            #[allow(unused_imports)]
            use super::*;

            /// The name this entry point is registered under
            pub const NAME: &str = #name;

            #[allow(unused_variables)]
            pub fn entry(
                args: &mut #hookwire::stack::ArgumentFrame
            ) -> #hookwire::Result<#hookwire::stack::ArgumentFrame> {
                #(
                    let #names: #types = args.pop()?;
                )*

                let returned = #call;
                Ok(#hookwire::stack::IntoFrame::into_frame(returned))
            }
        }

        #user_fn
    })
}

pub fn make_entry_point(attr: proc_macro::TokenStream, item: proc_macro::TokenStream) -> proc_macro::TokenStream {
    let attrs = syn::parse_macro_input!(attr as EntryPointAttrs);
    let user_fn = syn::parse_macro_input!(item as syn::ItemFn);

    match make_entry_point_internal(attrs, user_fn) {
        Ok(stream) => stream.into(),
        Err(e) => e.into_compile_error().into()
    }
}
