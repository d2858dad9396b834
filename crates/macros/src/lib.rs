use proc_macro::TokenStream;
use quote::quote;
use syn::{ItemFn, parse_macro_input};

/// Turns an `async fn` into a `#[tokio::test]` with `env_logger` installed,
/// so `RUST_LOG=debug cargo test` shows the crate's log lines.
#[proc_macro_attribute]
pub fn logged_test(_attr: TokenStream, item: TokenStream) -> TokenStream {
    let input_fn = parse_macro_input!(item as ItemFn);
    let fn_name = &input_fn.sig.ident;
    let fn_vis = &input_fn.vis;
    let fn_inputs = &input_fn.sig.inputs;
    let fn_output = &input_fn.sig.output;
    let fn_body = &input_fn.block;
    let fn_attrs = &input_fn.attrs;

    if input_fn.sig.asyncness.is_none() {
        return syn::Error::new_spanned(&input_fn.sig.fn_token, "logged_test requires an async fn")
            .to_compile_error()
            .into();
    }

    let output = quote! {
        #(#fn_attrs)*
        #[tokio::test]
        #fn_vis async fn #fn_name(#fn_inputs) #fn_output {
            let _ = env_logger::builder().is_test(true).try_init();
            #fn_body
        }
    };

    output.into()
}
