use std::path::Path;

/// `[package].version` of the runtime crate sitting next to this one, if the
/// sources include it.
fn sibling_runtime_version(manifest: &Path) -> Option<String> {
    let text = std::fs::read_to_string(manifest).ok()?;
    let doc: toml_edit::DocumentMut = text.parse().ok()?;
    doc.get("package")?
        .get("version")?
        .as_str()
        .map(str::to_owned)
}

fn main() {
    let manifest = Path::new("funccover-runtime/Cargo.toml");
    println!("cargo::rerun-if-changed={}", manifest.display());

    // A packaged `funccover` has no runtime sources beside it; both crates
    // are released under one version number.
    let version = sibling_runtime_version(manifest)
        .or_else(|| std::env::var("CARGO_PKG_VERSION").ok())
        .unwrap_or_default();
    println!("cargo::rustc-env=FUNCCOVER_RUNTIME_VERSION={version}");
}
