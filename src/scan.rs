use proc_macro2::LineColumn;
use syn::visit::Visit;

/// Name of the function whose exit flushes coverage.
pub const ENTRY_NAME: &str = "main";

/// One instrumented function: its (possibly file-qualified) name and the
/// 1-indexed line of its `fn` keyword.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionRecord {
    pub name: String,
    pub line: u32,
}

/// Byte offsets of an entry function's body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryBody {
    /// Same offset as the entry function's counter statement.
    pub start: usize,
    /// Offset of the closing `}`.
    pub exit: usize,
}

/// Everything the splicer needs to know about one source file.
///
/// `records[i]` and `body_starts[i]` describe the same function; both are in
/// declaration order, which is also ascending byte order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileScan {
    pub records: Vec<FunctionRecord>,
    pub body_starts: Vec<usize>,
    /// Every file-level `main`. More than one only under mutually exclusive
    /// `#[cfg]`s, and each gets its own flush guard.
    pub entries: Vec<EntryBody>,
}

impl FileScan {
    pub fn has_entry(&self) -> bool {
        !self.entries.is_empty()
    }

    pub fn function_set(&self) -> FunctionSet {
        FunctionSet {
            records: self.records.clone(),
            has_entry: self.has_entry(),
        }
    }
}

/// Ordered function records of a file or of a whole unit. The position of a
/// record is its counter index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FunctionSet {
    records: Vec<FunctionRecord>,
    has_entry: bool,
}

impl FunctionSet {
    pub fn records(&self) -> &[FunctionRecord] {
        &self.records
    }

    pub fn has_entry(&self) -> bool {
        self.has_entry
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Append `other` after the records already present.
    pub fn extend(&mut self, other: FunctionSet) {
        self.records.extend(other.records);
        self.has_entry |= other.has_entry;
    }
}

/// Parse `source` and collect every instrumentable function.
///
/// Collected: free functions, methods of `impl` blocks, default methods of
/// traits, and the same inside inline `mod` blocks. Function bodies are not
/// descended into, and `const fn` is skipped because a counter update is
/// not allowed in a const context.
///
/// With `file_id`, names are reported as `<file_id>:<name>`.
pub fn scan_source(source: &str, file_id: Option<&str>) -> Result<FileScan, syn::Error> {
    let (file, index) = parse_indexed(source)?;

    let mut scanner = FnScanner {
        index,
        file_id,
        modules: Vec::new(),
        current_impl: None,
        current_trait: None,
        scan: FileScan::default(),
    };
    scanner.visit_file(&file);
    Ok(scanner.scan)
}

/// Parse `source` and index it so spans can be turned into byte offsets.
pub(crate) fn parse_indexed(source: &str) -> Result<(syn::File, LineIndex<'_>), syn::Error> {
    // syn drops a leading BOM before parsing; spans are relative to what it saw.
    let (base, text) = match source.strip_prefix('\u{feff}') {
        Some(rest) => ('\u{feff}'.len_utf8(), rest),
        None => (0, source),
    };
    let file = syn::parse_file(text)?;
    Ok((file, LineIndex::new(text, base)))
}

/// Converts `proc_macro2` line/column positions (columns counted in chars)
/// into byte offsets of the original source.
pub(crate) struct LineIndex<'a> {
    text: &'a str,
    line_starts: Vec<usize>,
    base: usize,
}

impl<'a> LineIndex<'a> {
    fn new(text: &'a str, base: usize) -> Self {
        let mut line_starts = vec![0];
        line_starts.extend(
            text.bytes()
                .enumerate()
                .filter(|&(_, b)| b == b'\n')
                .map(|(i, _)| i + 1),
        );
        LineIndex {
            text,
            line_starts,
            base,
        }
    }

    pub(crate) fn offset(&self, pos: LineColumn) -> usize {
        self.base + self.local(pos)
    }

    /// Offset into the BOM-less text.
    fn local(&self, pos: LineColumn) -> usize {
        let start = self
            .line_starts
            .get(pos.line.saturating_sub(1))
            .copied()
            .unwrap_or(self.text.len());
        let line = &self.text[start..];
        let column = line
            .char_indices()
            .nth(pos.column)
            .map(|(i, _)| i)
            .unwrap_or(line.len());
        start + column
    }

    /// First byte after an inner attribute where code may be inserted.
    ///
    /// For `#![..]` and `/*! .. */` that is the end of the attribute. A `//!`
    /// comment runs to the end of its line, so the point moves to the start
    /// of the next line.
    pub(crate) fn after_inner_attr(&self, attr: &syn::Attribute) -> usize {
        let start = self.local(attr.pound_token.span.start());
        let end = self.local(attr.bracket_token.span.close().end());
        let end = if self.text[start..].starts_with("//!") {
            self.text[end..]
                .find('\n')
                .map_or(self.text.len(), |nl| end + nl + 1)
        } else {
            end
        };
        self.base + end
    }
}

struct FnScanner<'a> {
    index: LineIndex<'a>,
    file_id: Option<&'a str>,
    /// Inline `mod` blocks enclosing the current item.
    modules: Vec<String>,
    current_impl: Option<String>,
    current_trait: Option<String>,
    scan: FileScan,
}

impl FnScanner<'_> {
    fn qualified(&self, owner: Option<&str>, name: &str) -> String {
        let mut path: Vec<&str> = self.modules.iter().map(String::as_str).collect();
        path.extend(owner);
        path.push(name);
        let path = path.join("::");
        match self.file_id {
            Some(id) => format!("{id}:{path}"),
            None => path,
        }
    }

    /// Record one function and return the offset where its counter goes.
    fn record(
        &mut self,
        name: String,
        sig: &syn::Signature,
        attrs: &[syn::Attribute],
        block: &syn::Block,
    ) -> usize {
        let open = self.index.offset(block.brace_token.span.open().end());
        // Inner attributes must stay the first thing in the body.
        let body_start = attrs
            .iter()
            .filter(|a| matches!(a.style, syn::AttrStyle::Inner(_)))
            .map(|a| self.index.after_inner_attr(a))
            .fold(open, usize::max);

        let line = u32::try_from(sig.fn_token.span.start().line).unwrap_or(u32::MAX);
        self.scan.records.push(FunctionRecord { name, line });
        self.scan.body_starts.push(body_start);
        body_start
    }
}

fn is_instrumentable(sig: &syn::Signature) -> bool {
    sig.constness.is_none()
}

impl<'ast> Visit<'ast> for FnScanner<'_> {
    fn visit_item_fn(&mut self, node: &'ast syn::ItemFn) {
        if !is_instrumentable(&node.sig) {
            return;
        }
        let bare = node.sig.ident.to_string();
        let name = self.qualified(None, &bare);
        let start = self.record(name, &node.sig, &node.attrs, &node.block);

        if bare == ENTRY_NAME && self.modules.is_empty() {
            let exit = self.index.offset(node.block.brace_token.span.close().start());
            self.scan.entries.push(EntryBody { start, exit });
        }
        // Nested items and closures are not instrumented.
    }

    fn visit_item_impl(&mut self, node: &'ast syn::ItemImpl) {
        let prev = self.current_impl.replace(type_name(&node.self_ty));
        syn::visit::visit_item_impl(self, node);
        self.current_impl = prev;
    }

    fn visit_impl_item_fn(&mut self, node: &'ast syn::ImplItemFn) {
        if !is_instrumentable(&node.sig) {
            return;
        }
        let owner = self.current_impl.clone();
        let name = self.qualified(owner.as_deref(), &node.sig.ident.to_string());
        self.record(name, &node.sig, &node.attrs, &node.block);
    }

    fn visit_item_trait(&mut self, node: &'ast syn::ItemTrait) {
        let prev = self.current_trait.replace(node.ident.to_string());
        syn::visit::visit_item_trait(self, node);
        self.current_trait = prev;
    }

    fn visit_trait_item_fn(&mut self, node: &'ast syn::TraitItemFn) {
        let Some(block) = &node.default else {
            return;
        };
        if !is_instrumentable(&node.sig) {
            return;
        }
        let owner = self.current_trait.clone();
        let name = self.qualified(owner.as_deref(), &node.sig.ident.to_string());
        self.record(name, &node.sig, &node.attrs, block);
    }

    fn visit_item_mod(&mut self, node: &'ast syn::ItemMod) {
        if node.content.is_none() {
            return;
        }
        self.modules.push(node.ident.to_string());
        syn::visit::visit_item_mod(self, node);
        self.modules.pop();
    }

    // Items nested in const/static initializers are not top-level.
    fn visit_expr(&mut self, _: &'ast syn::Expr) {}
}

/// Best-effort type name for `impl` blocks: the last path segment.
fn type_name(ty: &syn::Type) -> String {
    match ty {
        syn::Type::Path(tp) => tp
            .path
            .segments
            .last()
            .map(|seg| seg.ident.to_string())
            .unwrap_or_else(|| "_".to_string()),
        syn::Type::Reference(r) => type_name(&r.elem),
        _ => "_".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(scan: &FileScan) -> Vec<&str> {
        scan.records.iter().map(|r| r.name.as_str()).collect()
    }

    fn lines(scan: &FileScan) -> Vec<u32> {
        scan.records.iter().map(|r| r.line).collect()
    }

    #[test]
    fn records_functions_in_declaration_order() {
        let source = "\
fn zeta() {}
fn alpha() {}

fn main() {
    zeta();
    alpha();
}
";
        let scan = scan_source(source, None).unwrap();
        assert_eq!(names(&scan), ["zeta", "alpha", "main"]);
        assert_eq!(lines(&scan), [1, 2, 4]);
        assert!(scan.has_entry());
    }

    #[test]
    fn line_is_the_fn_keyword_not_the_attributes() {
        let source = "\
/// Docs.
#[inline]
pub(crate) async fn fetch() {}
";
        let scan = scan_source(source, None).unwrap();
        assert_eq!(lines(&scan), [3]);
    }

    #[test]
    fn body_start_is_just_after_the_open_brace() {
        let source = "fn f1() { one(); }\nfn main() {\n    f1()\n}\n";
        let scan = scan_source(source, None).unwrap();

        for &offset in &scan.body_starts {
            assert_eq!(&source[offset - 1..offset], "{");
        }
        let entry = scan.entries[0];
        assert_eq!(entry.start, scan.body_starts[1]);
        assert_eq!(&source[entry.exit..=entry.exit], "}");
        assert_eq!(entry.exit, source.len() - 2);
    }

    #[test]
    fn offsets_are_bytes_even_with_multibyte_text() {
        let source = "const S: &str = \"héllo wörld\"; fn après() { let _ = \"ü\"; }\n";
        let scan = scan_source(source, None).unwrap();
        assert_eq!(names(&scan), ["après"]);
        let offset = scan.body_starts[0];
        assert_eq!(&source[offset - 1..offset], "{");
        assert!(source[offset..].starts_with(" let _ = \"ü\";"));
    }

    #[test]
    fn leading_bom_is_accounted_for() {
        let source = "\u{feff}fn main() {}\n";
        let scan = scan_source(source, None).unwrap();
        let entry = scan.entries[0];
        assert_eq!(&source[entry.start - 1..entry.start], "{");
        assert_eq!(&source[entry.exit..=entry.exit], "}");
        assert_eq!(lines(&scan), [1]);
    }

    #[test]
    fn body_start_skips_inner_attributes() {
        let source = "fn quiet() {\n    #![allow(unused)]\n    let x = 1;\n}\n";
        let scan = scan_source(source, None).unwrap();
        let offset = scan.body_starts[0];
        assert!(source[..offset].ends_with("#![allow(unused)]"));
    }

    #[test]
    fn body_start_moves_past_inner_line_doc_comments() {
        let source = "fn f() {\n    //! inner docs\n    let _x = 1;\n}\nfn main() { f() }\n";
        let scan = scan_source(source, None).unwrap();
        let offset = scan.body_starts[0];
        assert!(source[..offset].ends_with("//! inner docs\n"), "offset {offset}");
        assert!(source[offset..].starts_with("    let _x = 1;"));
    }

    #[test]
    fn body_start_follows_inner_block_doc_comments() {
        let source = "fn f() { /*! block docs */ let _x = 1; }\n";
        let scan = scan_source(source, None).unwrap();
        let offset = scan.body_starts[0];
        assert!(source[..offset].ends_with("/*! block docs */"), "offset {offset}");
    }

    #[test]
    fn cfg_gated_mains_are_all_entries() {
        let source = "\
#[cfg(unix)]
fn main() {}
#[cfg(not(unix))]
fn main() {}
";
        let scan = scan_source(source, None).unwrap();
        assert_eq!(scan.entries.len(), 2);
        assert_eq!(scan.entries[0].start, scan.body_starts[0]);
        assert_eq!(scan.entries[1].start, scan.body_starts[1]);
    }

    #[test]
    fn methods_and_trait_defaults_are_qualified() {
        let source = "\
struct Walker;
impl Walker {
    fn walk(&self) {}
    const fn fixed() -> u8 { 1 }
}
trait Draw {
    fn draw(&self) {}
    fn required(&self);
}
impl Draw for &Walker {}
";
        let scan = scan_source(source, None).unwrap();
        assert_eq!(names(&scan), ["Walker::walk", "Draw::draw"]);
        assert_eq!(lines(&scan), [3, 7]);
        assert!(!scan.has_entry());
    }

    #[test]
    fn inline_modules_are_walked_but_not_bodies() {
        let source = "\
fn outer() {
    fn nested() {}
    let _c = || 1;
}
mod inner {
    pub fn main() {}
}
mod external;
";
        let scan = scan_source(source, None).unwrap();
        assert_eq!(names(&scan), ["outer", "inner::main"]);
        assert!(!scan.has_entry(), "only a file-level main is the entry");
    }

    #[test]
    fn const_fn_and_const_initializers_are_skipped() {
        let source = "\
const fn size() -> usize { 4 }
const _: () = { fn hidden() {} };
unsafe fn raw() {}
extern \"C\" fn callback() {}
";
        let scan = scan_source(source, None).unwrap();
        assert_eq!(names(&scan), ["raw", "callback"]);
    }

    #[test]
    fn file_id_qualifies_names() {
        let scan = scan_source("fn f() {}\nimpl S { fn m(&self) {} }\n", Some("src/a.rs")).unwrap();
        assert_eq!(names(&scan), ["src/a.rs:f", "src/a.rs:S::m"]);
    }

    #[test]
    fn empty_file_yields_empty_set() {
        let scan = scan_source("use std::fmt;\nstruct S;\n", None).unwrap();
        assert!(scan.records.is_empty());
        assert!(scan.body_starts.is_empty());
        assert!(!scan.has_entry());
        assert!(scan.function_set().is_empty());
    }

    #[test]
    fn broken_source_is_a_hard_failure() {
        assert!(scan_source("fn main() {\n no fn this is a bad line () {}\n", None).is_err());
        assert!(scan_source("hello world", None).is_err());
    }

    #[test]
    fn function_sets_concatenate_in_order() {
        let a = scan_source("fn a1() {}\nfn a2() {}\n", Some("a")).unwrap();
        let b = scan_source("fn main() {}\n", Some("b")).unwrap();

        let mut set = a.function_set();
        assert!(!set.has_entry());
        set.extend(b.function_set());

        let names: Vec<&str> = set.records().iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, ["a:a1", "a:a2", "b:main"]);
        assert_eq!(set.len(), 3);
        assert!(set.has_entry());
    }
}
