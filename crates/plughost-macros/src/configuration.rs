use proc_macro2::TokenStream;
use quote::quote;
use syn::{Data, DeriveInput, LitStr, Result};

/// Parsed `#[configuration(...)]` options.
#[derive(Default)]
struct ConfigurationAttrs {
    name: Option<LitStr>,
}

fn parse_attrs(input: &DeriveInput) -> Result<ConfigurationAttrs> {
    let mut attrs = ConfigurationAttrs::default();

    for attr in &input.attrs {
        if !attr.path().is_ident("configuration") {
            continue;
        }
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("name") {
                attrs.name = Some(meta.value()?.parse()?);
                Ok(())
            } else {
                Err(meta.error("unknown configuration attribute; expected `name`"))
            }
        })?;
    }

    Ok(attrs)
}

pub fn derive_plug_in_configuration(input: &DeriveInput) -> Result<TokenStream> {
    if let Data::Union(data) = &input.data {
        return Err(syn::Error::new(
            data.union_token.span,
            "PlugInConfiguration cannot be derived for unions",
        ));
    }

    let attrs = parse_attrs(input)?;
    let ident = &input.ident;
    let name = attrs
        .name
        .unwrap_or_else(|| LitStr::new(&ident.to_string(), ident.span()));
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    Ok(quote! {
        impl #impl_generics ::plughost_core::PlugInConfiguration for #ident #ty_generics #where_clause {
            const TYPE_NAME: &'static str = #name;
        }
    })
}
