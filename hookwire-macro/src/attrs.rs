use syn::parse::Parse;

pub mod kw {
    syn::custom_keyword!(name);
}

pub struct KeyValue<Key: Parse, Value: Parse> {
    pub key: Key,
    pub equals: syn::Token![=],
    pub value: Value
}

impl<Key: Parse, Value: Parse> Parse for KeyValue<Key, Value> {
    fn parse(input: syn::parse::ParseStream) -> syn::Result<Self> {
        let key = input.parse()?;
        let equals = input.parse()?;
        let value = input.parse()?;
        Ok(Self { key, equals, value })
    }
}

/// Arguments of `#[entry_point]`, which are either empty or `name = "..."`
pub struct EntryPointAttrs {
    pub name: Option<KeyValue<kw::name, syn::LitStr>>,
}

impl Parse for EntryPointAttrs {
    fn parse(input: syn::parse::ParseStream) -> syn::Result<Self> {
        if input.is_empty() {
            return Ok(Self { name: None });
        }

        let name = input.parse()?;

        // allow a trailing comma, nothing else
        if input.peek(syn::Token![,]) {
            let _: syn::Token![,] = input.parse()?;
        }

        if !input.is_empty() {
            return Err(syn::Error::new(input.span(), "unexpected argument, expected `name = \"...\"`"));
        }

        Ok(Self { name: Some(name) })
    }
}
