use proc_macro2::TokenStream;
use quote::quote;
use syn::spanned::Spanned;

/// Derives `actlet::Message`.
///
/// A message without the `reply` attribute is a `Signal`.  A message with it
/// is an `Action` whose reply type is given either as a type or as a string
/// literal containing a type:
///
/// ```ignore
/// #[derive(Message)]
/// #[reply(Vec<usize>)]
/// struct Query;
///
/// #[derive(Message)]
/// #[reply("Result<(), Error>")]
/// struct Update;
/// ```
#[proc_macro_derive(Message, attributes(reply))]
pub fn message_derive(input: proc_macro::TokenStream) -> proc_macro::TokenStream {
    let input = syn::parse_macro_input!(input as syn::DeriveInput);
    match expand(&input) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

fn expand(input: &syn::DeriveInput) -> syn::Result<TokenStream> {
    let ty_name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let reply = input
        .attrs
        .iter()
        .find(|attr| attr.path().is_ident("reply"))
        .map(parse_reply)
        .transpose()?;

    let (reply_type, message_trait) = match reply {
        Some(reply_type) => (reply_type, quote!(actlet::Action)),
        None => (quote!(()), quote!(actlet::Signal)),
    };

    Ok(quote! {
        impl #impl_generics actlet::Message for #ty_name #ty_generics #where_clause {
            type Reply = #reply_type;
        }

        impl #impl_generics #message_trait for #ty_name #ty_generics #where_clause {}
    })
}

fn parse_reply(attr: &syn::Attribute) -> syn::Result<TokenStream> {
    // `#[reply]`
    if let syn::Meta::Path(_) = attr.meta {
        return Ok(quote!(()));
    }
    let tokens = attr.parse_args::<TokenStream>()?;
    if tokens.is_empty() {
        return Ok(quote!(()));
    }
    let ty = match syn::parse2::<syn::LitStr>(tokens.clone()) {
        Ok(lit) => lit.parse::<syn::Type>()?,
        Err(_) => syn::parse2::<syn::Type>(tokens)
            .map_err(|err| syn::Error::new(attr.span(), format!("Invalid reply type: {err}")))?,
    };
    Ok(quote!(#ty))
}
