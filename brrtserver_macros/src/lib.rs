//! Handler compilation attribute for `brrtserver`.
//!
//! `#[handler(...)]` keeps the annotated function untouched and generates a
//! sibling `<name>_handler()` constructor returning a `HandlerDef`: the
//! ordered parameter descriptors, the route attributes and a thunk that pulls
//! the already-converted arguments out of a `BoundArgs` and calls the function.
//!
//! ```rust,ignore
//! #[handler(get("/user/{login}/{year}"), defaults(limit = 10))]
//! fn get_user(login: String, year: i32, limit: u32) -> Json<User> { ... }
//!
//! router.handler(get_user_handler());
//! ```

use proc_macro::TokenStream;
use quote::{format_ident, quote};
use syn::{
    parenthesized,
    parse::{Parse, ParseStream},
    parse_macro_input,
    punctuated::Punctuated,
    Expr, ExprLit, FnArg, Ident, ItemFn, Lit, LitStr, Pat, Result as SynResult, Token, Type,
};

struct DefaultDef {
    ident: Ident,
    value: String,
}

impl Parse for DefaultDef {
    fn parse(input: ParseStream) -> SynResult<Self> {
        let ident: Ident = input.parse()?;
        input.parse::<Token![=]>()?;
        let expr: Expr = input.parse()?;
        let value = match &expr {
            Expr::Lit(ExprLit {
                lit: Lit::Str(s), ..
            }) => s.value(),
            other => quote!(#other).to_string().replace(' ', ""),
        };
        Ok(DefaultDef { ident, value })
    }
}

enum HandlerOption {
    Route { method: String, path: LitStr },
    Absolute,
    Name(LitStr),
    Defaults(Vec<DefaultDef>),
}

impl Parse for HandlerOption {
    fn parse(input: ParseStream) -> SynResult<Self> {
        let ident: Ident = input.parse()?;
        let key = ident.to_string();
        match key.as_str() {
            "absolute" => Ok(HandlerOption::Absolute),
            "name" => {
                input.parse::<Token![=]>()?;
                Ok(HandlerOption::Name(input.parse()?))
            }
            "defaults" => {
                let content;
                parenthesized!(content in input);
                let defs = Punctuated::<DefaultDef, Token![,]>::parse_terminated(&content)?;
                Ok(HandlerOption::Defaults(defs.into_iter().collect()))
            }
            "route" => {
                let content;
                parenthesized!(content in input);
                let method: LitStr = content.parse()?;
                content.parse::<Token![,]>()?;
                let path: LitStr = content.parse()?;
                Ok(HandlerOption::Route {
                    method: method.value().to_ascii_uppercase(),
                    path,
                })
            }
            "get" | "post" | "put" | "delete" | "patch" | "head" | "options" | "any" => {
                let content;
                parenthesized!(content in input);
                let path: LitStr = content.parse()?;
                let method = if key == "any" {
                    "*".to_string()
                } else {
                    key.to_ascii_uppercase()
                };
                Ok(HandlerOption::Route { method, path })
            }
            other => Err(syn::Error::new(
                ident.span(),
                format!("unexpected handler option `{other}`"),
            )),
        }
    }
}

struct HandlerArgs {
    options: Vec<HandlerOption>,
}

impl Parse for HandlerArgs {
    fn parse(input: ParseStream) -> SynResult<Self> {
        let options = Punctuated::<HandlerOption, Token![,]>::parse_terminated(input)?;
        Ok(HandlerArgs {
            options: options.into_iter().collect(),
        })
    }
}

enum Injection {
    SessionMut,
    SessionRef,
    Request,
}

fn injection_kind(ty: &Type) -> Option<Injection> {
    if let Type::Reference(r) = ty {
        if let Type::Path(p) = r.elem.as_ref() {
            let last = p.path.segments.last()?;
            return match last.ident.to_string().as_str() {
                "Session" if r.mutability.is_some() => Some(Injection::SessionMut),
                "Session" => Some(Injection::SessionRef),
                "Request" => Some(Injection::Request),
                _ => None,
            };
        }
    }
    None
}

#[proc_macro_attribute]
pub fn handler(attr: TokenStream, item: TokenStream) -> TokenStream {
    let args = parse_macro_input!(attr as HandlerArgs);
    let input = parse_macro_input!(item as ItemFn);
    match expand(args, input) {
        Ok(ts) => ts.into(),
        Err(e) => e.to_compile_error().into(),
    }
}

fn expand(args: HandlerArgs, input: ItemFn) -> SynResult<proc_macro2::TokenStream> {
    let fn_ident = &input.sig.ident;
    let fn_vis = &input.vis;
    let ctor_ident = format_ident!("{}_handler", fn_ident);

    let mut name = fn_ident.to_string();
    let mut absolute = false;
    let mut routes = Vec::new();
    let mut defaults = Vec::new();
    for opt in args.options {
        match opt {
            HandlerOption::Route { method, path } => routes.push((method, path)),
            HandlerOption::Absolute => absolute = true,
            HandlerOption::Name(n) => name = n.value(),
            HandlerOption::Defaults(d) => defaults.extend(d),
        }
    }

    let mut specs = Vec::new();
    let mut lets = Vec::new();
    let mut call_args = Vec::new();
    let mut seen = Vec::new();

    for (idx, arg) in input.sig.inputs.iter().enumerate() {
        let pt = match arg {
            FnArg::Receiver(r) => {
                return Err(syn::Error::new_spanned(r, "handlers cannot take `self`"));
            }
            FnArg::Typed(pt) => pt,
        };
        let ident = match pt.pat.as_ref() {
            Pat::Ident(pi) => pi.ident.clone(),
            other => {
                return Err(syn::Error::new_spanned(
                    other,
                    "handler parameters must be plain identifiers",
                ));
            }
        };
        let param_name = ident.to_string();
        let param_name = param_name.trim_start_matches('_').to_string();
        seen.push(ident.to_string());

        match injection_kind(&pt.ty) {
            Some(Injection::SessionMut) => {
                specs.push(quote! { ::brrtserver::dispatcher::ParamSpec::session(#param_name) });
                call_args.push(quote! { session });
            }
            Some(Injection::SessionRef) => {
                specs.push(quote! { ::brrtserver::dispatcher::ParamSpec::session(#param_name) });
                call_args.push(quote! { &*session });
            }
            Some(Injection::Request) => {
                specs.push(quote! { ::brrtserver::dispatcher::ParamSpec::request(#param_name) });
                call_args.push(quote! { session.request() });
            }
            None => {
                let ty = &pt.ty;
                let var = format_ident!("__arg{}", idx);
                let default = defaults.iter().find(|d| d.ident == ident);
                let spec = match default {
                    Some(d) => {
                        let value = &d.value;
                        quote! {
                            ::brrtserver::dispatcher::ParamSpec::of::<#ty>(#param_name).with_default(#value)
                        }
                    }
                    None => quote! { ::brrtserver::dispatcher::ParamSpec::of::<#ty>(#param_name) },
                };
                specs.push(spec);
                lets.push(quote! { let #var: #ty = args.take::<#ty>(#idx)?; });
                call_args.push(quote! { #var });
            }
        }
    }

    if let Some(unknown) = defaults.iter().find(|d| !seen.contains(&d.ident.to_string())) {
        return Err(syn::Error::new(
            unknown.ident.span(),
            format!("default given for unknown parameter `{}`", unknown.ident),
        ));
    }

    let route_calls = routes.iter().map(|(method, path)| {
        quote! { .route(#method, #path) }
    });
    let absolute_call = if absolute {
        quote! { .absolute() }
    } else {
        quote! {}
    };

    Ok(quote! {
        #input

        #[doc(hidden)]
        #[allow(clippy::needless_borrow, unused_variables)]
        #fn_vis fn #ctor_ident() -> ::brrtserver::dispatcher::HandlerDef {
            ::brrtserver::dispatcher::HandlerDef::new(
                #name,
                ::std::vec![#(#specs),*],
                |session: &mut ::brrtserver::server::Session,
                 args: &mut ::brrtserver::dispatcher::BoundArgs| {
                    #(#lets)*
                    ::brrtserver::dispatcher::IntoReply::into_reply(#fn_ident(#(#call_args),*))
                },
            )
            #(#route_calls)*
            #absolute_call
        }
    })
}
