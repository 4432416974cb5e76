use std::path::Path;

use toml_edit::DocumentMut;

use crate::error::Error;

/// Package name of the support crate the generated code links against.
pub const RUNTIME_PACKAGE: &str = "funccover-runtime";

/// How to reference funccover-runtime in the instrumented project's manifest.
#[derive(Debug, Clone, Copy)]
pub enum RuntimeSource<'a> {
    /// Published crate version (e.g. "0.1.0").
    Version(&'a str),
    /// Local path to the runtime crate.
    Path(&'a Path),
}

/// Add `funccover-runtime` to `[dependencies]` of the manifest at
/// `manifest_path`, replacing any previous entry.
///
/// Uses `toml_edit` so the rest of the file keeps its formatting.
pub fn inject_runtime(manifest_path: &Path, source: RuntimeSource<'_>) -> Result<(), Error> {
    let content = std::fs::read_to_string(manifest_path).map_err(|source| Error::ReadError {
        path: manifest_path.to_path_buf(),
        source,
    })?;
    let mut doc: DocumentMut = content
        .parse()
        .map_err(|e| Error::Manifest(format!("{}: {e}", manifest_path.display())))?;

    if !doc.contains_key("dependencies") {
        doc["dependencies"] = toml_edit::Item::Table(toml_edit::Table::new());
    }
    let Some(deps) = doc["dependencies"].as_table_like_mut() else {
        return Err(Error::Manifest(format!(
            "{}: [dependencies] is not a table",
            manifest_path.display()
        )));
    };

    let entry = match source {
        RuntimeSource::Version(v) => toml_edit::value(v),
        RuntimeSource::Path(p) => {
            let mut table = toml_edit::InlineTable::new();
            table.insert("path", p.to_string_lossy().as_ref().into());
            toml_edit::Item::Value(toml_edit::Value::InlineTable(table))
        }
    };
    deps.insert(RUNTIME_PACKAGE, entry);

    std::fs::write(manifest_path, doc.to_string())?;
    tracing::info!(manifest = %manifest_path.display(), ?source, "added runtime dependency");
    Ok(())
}
