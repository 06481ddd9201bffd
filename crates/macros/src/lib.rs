use proc_macro::TokenStream;
use quote::quote;
use syn::{
    parse::Parse, parse::ParseStream, parse_macro_input, DeriveInput, Expr, ExprArray, Ident,
    LitStr, Token,
};

/// Parsed `#[teamserver_plugin(...)]` arguments
struct PluginAttr {
    name: String,
    kind: String,
    version: String,
    author: String,
    resources: Vec<String>,
}

impl Parse for PluginAttr {
    fn parse(input: ParseStream) -> syn::Result<Self> {
        let mut name = String::new();
        let mut kind = String::new();
        let mut version = String::from("0.1.0");
        let mut author = String::new();
        let mut resources = Vec::new();

        while !input.is_empty() {
            let key: Ident = input.parse()?;
            input.parse::<Token![=]>()?;

            if input.peek(LitStr) {
                let val: LitStr = input.parse()?;
                match key.to_string().as_str() {
                    "name" => name = val.value(),
                    "kind" => kind = val.value(),
                    "version" => version = val.value(),
                    "author" => author = val.value(),
                    other => {
                        return Err(syn::Error::new_spanned(
                            &key,
                            format!("unknown teamserver_plugin key '{}'", other),
                        ))
                    }
                }
            } else if input.peek(syn::token::Bracket) {
                let content: ExprArray = input.parse()?;
                let mut vals = Vec::new();
                for elem in &content.elems {
                    match elem {
                        Expr::Lit(syn::ExprLit {
                            lit: syn::Lit::Str(s),
                            ..
                        }) => vals.push(s.value()),
                        other => {
                            return Err(syn::Error::new_spanned(
                                other,
                                "expected a string literal",
                            ))
                        }
                    }
                }

                match key.to_string().as_str() {
                    "resources" => resources = vals,
                    other => {
                        return Err(syn::Error::new_spanned(
                            &key,
                            format!("unknown teamserver_plugin list '{}'", other),
                        ))
                    }
                }
            } else {
                return Err(input.error("expected a string literal or a list"));
            }

            if !input.is_empty() {
                input.parse::<Token![,]>()?;
            }
        }

        Ok(PluginAttr {
            name,
            kind,
            version,
            author,
            resources,
        })
    }
}

/// Turns a struct into a statically registered teamserver extension.
///
/// ```ignore
/// #[teamserver_plugin(name = "demo", kind = "Agent", author = "ops", resources = ["demo.bin"])]
/// pub struct Demo { core: OnceLock<Arc<dyn CoreHandle>> }
/// ```
///
/// The struct must provide `async fn new_plugin() -> anyhow::Result<Self>`,
/// implement `Extension`, and implement the capability trait for its kind.
#[proc_macro_attribute]
pub fn teamserver_plugin(attr: TokenStream, item: TokenStream) -> TokenStream {
    let input = parse_macro_input!(item as DeriveInput);
    let attr = parse_macro_input!(attr as PluginAttr);

    match emit_plugin_code(input, attr) {
        Ok(expanded) => TokenStream::from(expanded),
        Err(err) => err.to_compile_error().into(),
    }
}

fn emit_plugin_code(
    input: DeriveInput,
    attr: PluginAttr,
) -> syn::Result<proc_macro2::TokenStream> {
    let name = &input.ident;

    if attr.name.is_empty() {
        return Err(syn::Error::new_spanned(
            &input.ident,
            "Plugin 'name' is required",
        ));
    }
    if !attr
        .name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-')
    {
        return Err(syn::Error::new_spanned(
            &input.ident,
            format!(
                "Plugin name '{}' may only contain [A-Za-z0-9_.-]",
                attr.name
            ),
        ));
    }

    // The cast for the declared kind only type-checks when the struct
    // implements the matching capability trait.
    let (kind_ident, cast_method) = match attr.kind.as_str() {
        "Agent" => (
            quote! { teamserver_shared::PluginKind::Agent },
            quote! {
                fn as_agent(self: std::sync::Arc<Self>)
                    -> Option<std::sync::Arc<dyn teamserver_shared::AgentCapability>> { Some(self) }
            },
        ),
        "Listener" => (
            quote! { teamserver_shared::PluginKind::Listener },
            quote! {
                fn as_listener(self: std::sync::Arc<Self>)
                    -> Option<std::sync::Arc<dyn teamserver_shared::ListenerCapability>> { Some(self) }
            },
        ),
        "Management" => (
            quote! { teamserver_shared::PluginKind::Management },
            quote! {
                fn as_management(self: std::sync::Arc<Self>)
                    -> Option<std::sync::Arc<dyn teamserver_shared::ManagementCapability>> { Some(self) }
            },
        ),
        "" => {
            return Err(syn::Error::new_spanned(
                &input.ident,
                "Plugin 'kind' is required (Agent, Listener or Management)",
            ))
        }
        other => {
            return Err(syn::Error::new_spanned(
                &input.ident,
                format!(
                    "Unknown plugin kind '{}': expected Agent, Listener or Management",
                    other
                ),
            ))
        }
    };

    let factory_name = quote::format_ident!("{}Factory", name);
    let plugin_name_str = &attr.name;
    let version_str = &attr.version;
    let author_str = &attr.author;
    let resources_tokens = attr.resources.iter().map(|r| quote! { #r.to_string() });

    Ok(quote! {
        #input

        impl #name {
            pub const PLUGIN_NAME: &'static str = #plugin_name_str;

            pub fn factory() -> std::sync::Arc<dyn teamserver_shared::PluginFactory> {
                std::sync::Arc::new(#factory_name)
            }

            pub fn auto_descriptor(&self) -> teamserver_shared::PluginDescriptor {
                teamserver_shared::PluginDescriptor {
                    name: Self::PLUGIN_NAME.to_string(),
                    kind: #kind_ident,
                    version: #version_str.to_string(),
                    author: #author_str.to_string(),
                    resources: vec![ #(#resources_tokens),* ],
                }
            }
        }

        impl teamserver_shared::PluginCast for #name {
            #cast_method
        }

        pub struct #factory_name;

        #[async_trait::async_trait]
        impl teamserver_shared::PluginFactory for #factory_name {
            fn name(&self) -> &str { #plugin_name_str }
            fn kind(&self) -> teamserver_shared::PluginKind { #kind_ident }
            async fn create(&self) -> anyhow::Result<std::sync::Arc<dyn teamserver_shared::Extension>> {
                let plugin = #name::new_plugin().await?;
                Ok(std::sync::Arc::new(plugin))
            }
        }

        teamserver_shared::inventory::submit! {
            teamserver_shared::PluginRegistrar {
                factory: #name::factory,
            }
        }
    })
}
