use std::time::Duration;

use proc_macro2::Literal;
use quote::quote;

use crate::error::Error;
use crate::scan::FunctionRecord;
use crate::splice::runtime_module;

/// Identifier of the generated module; fails when `suffix` would not make a
/// valid Rust identifier.
pub fn module_ident(suffix: &str) -> Result<syn::Ident, Error> {
    syn::parse_str(&runtime_module(suffix)).map_err(|e| {
        Error::Template(format!("suffix {suffix:?} does not form an identifier: {e}"))
    })
}

/// Render the module appended to the entry file.
///
/// It owns the unit's `COVER` static (names and lines of `records`, every
/// counter `false`), the `collect` routine writing to `output`, the `enter`
/// hook that `main` keeps alive as a flush guard and, when `period` is
/// non-zero, `start_periodic`.
///
/// The result depends only on the arguments.
pub fn render_fragment(
    suffix: &str,
    output: &str,
    period: Duration,
    records: &[FunctionRecord],
) -> Result<String, Error> {
    let module = module_ident(suffix)?;

    let count = Literal::usize_unsuffixed(records.len());
    let names = records.iter().map(|r| r.name.as_str());
    let lines = records.iter().map(|r| Literal::u32_unsuffixed(r.line));
    let counts = records
        .iter()
        .map(|_| quote!(::core::sync::atomic::AtomicBool::new(false)));

    let (start_call, periodic) = if period.is_zero() {
        (None, None)
    } else {
        let nanos = u64::try_from(period.as_nanos())
            .map_err(|_| Error::Template(format!("period {period:?} is too long")))?;
        let nanos = Literal::u64_unsuffixed(nanos);
        let start_call = quote! { start_periodic(); };
        let periodic = quote! {
            fn start_periodic() {
                COVER.spawn_periodic(::std::time::Duration::from_nanos(#nanos), OUTPUT);
            }
        };
        (Some(start_call), Some(periodic))
    };

    let tokens = quote! {
        #[doc(hidden)]
        #[allow(dead_code)]
        pub(crate) mod #module {
            pub(crate) static COVER: ::funccover_runtime::Cover<#count> =
                ::funccover_runtime::Cover::new(
                    [#(#names),*],
                    [#(#lines),*],
                    [#(#counts),*],
                );

            pub(crate) const OUTPUT: &str = #output;

            pub(crate) fn collect() {
                COVER.collect(OUTPUT);
            }

            pub(crate) fn enter() -> ::funccover_runtime::Flush<'static, #count> {
                #start_call
                COVER.flush_on_drop(OUTPUT)
            }

            #periodic
        }
    };

    let file: syn::File = syn::parse2(tokens).map_err(|e| Error::Template(e.to_string()))?;
    Ok(prettyplease::unparse(&file))
}
