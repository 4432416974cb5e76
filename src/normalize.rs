use crate::scan::parse_indexed;

/// Crate the generated fragment links against.
pub const RUNTIME_CRATE: &str = "funccover_runtime";

/// Make sure the crate root declares `extern crate funccover_runtime;`.
///
/// The declaration goes after the crate's inner attributes (or its shebang
/// line) on an existing line, so comments, layout and line numbers of the
/// file are untouched. A file that already has it is returned as is.
pub fn ensure_runtime_reference(source: &str) -> Result<String, syn::Error> {
    let (file, index) = parse_indexed(source)?;
    if has_runtime_reference(&file) {
        return Ok(source.to_string());
    }

    let after_attrs = file
        .attrs
        .iter()
        .filter(|a| matches!(a.style, syn::AttrStyle::Inner(_)))
        .map(|a| index.after_inner_attr(a))
        .max();
    let at = match after_attrs {
        Some(offset) => offset,
        None => {
            let bom = if source.starts_with('\u{feff}') {
                '\u{feff}'.len_utf8()
            } else {
                0
            };
            match file.shebang {
                Some(_) => source[bom..]
                    .find('\n')
                    .map_or(source.len(), |nl| bom + nl + 1),
                None => bom,
            }
        }
    };

    let decl = format!("extern crate {RUNTIME_CRATE};");
    let mut out = String::with_capacity(source.len() + decl.len() + 2);
    let before = &source[..at];
    out.push_str(before);
    let line_has_text = !before.trim_start_matches('\u{feff}').is_empty();
    if line_has_text && !before.ends_with(char::is_whitespace) {
        out.push(' ');
    }
    out.push_str(&decl);
    if at < source.len() && !source[at..].starts_with(char::is_whitespace) {
        out.push(' ');
    }
    out.push_str(&source[at..]);
    Ok(out)
}

/// Only the crate root's own items count: a declaration inside a module does
/// not make the crate reachable as `::funccover_runtime`.
fn has_runtime_reference(file: &syn::File) -> bool {
    file.items.iter().any(|item| match item {
        syn::Item::ExternCrate(ec) => ec.ident == RUNTIME_CRATE && ec.rename.is_none(),
        _ => false,
    })
}
