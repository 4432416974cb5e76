use std::io::Write;
use std::path::{Component, Path, PathBuf};

use ignore::WalkBuilder;

use crate::error::Error;
use crate::instrument::InstrumentedFile;

/// Expand command-line arguments into the unit's source files.
///
/// Directories contribute their `.rs` files (sorted, `.gitignore` honored,
/// `target/` skipped). Other arguments are kept when they name a `.rs` file
/// and ignored otherwise. Duplicates keep their first position.
pub fn collect_sources(args: &[PathBuf]) -> Result<Vec<PathBuf>, Error> {
    let mut sources: Vec<PathBuf> = Vec::new();
    for arg in args {
        if arg.is_dir() {
            let mut found = Vec::new();
            let walker = WalkBuilder::new(arg)
                .filter_entry(|entry| {
                    !(entry.file_type().is_some_and(|ft| ft.is_dir())
                        && entry.file_name() == "target")
                })
                .build();
            for entry in walker {
                let entry = entry.map_err(|e| std::io::Error::other(e.to_string()))?;
                if entry.file_type().is_some_and(|ft| ft.is_file()) && is_rust_source(entry.path())
                {
                    found.push(entry.into_path());
                }
            }
            found.sort();
            tracing::debug!(dir = %arg.display(), files = found.len(), "expanded directory");
            sources.extend(found);
        } else if is_rust_source(arg) {
            sources.push(arg.clone());
        } else {
            tracing::debug!(path = %arg.display(), "skipping non-Rust argument");
        }
    }

    let mut seen = std::collections::HashSet::new();
    sources.retain(|p| seen.insert(p.clone()));
    Ok(sources)
}

fn is_rust_source(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "rs")
}

/// Deepest directory containing every path in `paths`.
///
/// Paths are compared component-wise without touching the filesystem, so
/// relative and absolute paths only share an ancestor with their own kind.
pub fn common_ancestor(paths: &[PathBuf]) -> PathBuf {
    let mut iter = paths.iter();
    let Some(first) = iter.next() else {
        return PathBuf::new();
    };
    let mut prefix = parent_components(first);
    for path in iter {
        let parent = parent_components(path);
        let shared = prefix
            .iter()
            .zip(&parent)
            .take_while(|(a, b)| a == b)
            .count();
        prefix.truncate(shared);
    }
    prefix.iter().collect()
}

fn parent_components(path: &Path) -> Vec<Component<'_>> {
    path.parent()
        .map_or_else(Vec::new, |dir| dir.components().collect())
}

/// Write every file under `dir` at its path relative to the sources' common
/// ancestor. Returns the written paths in unit order.
pub fn write_to_dir(files: &[InstrumentedFile], dir: &Path) -> Result<Vec<PathBuf>, Error> {
    let paths: Vec<PathBuf> = files.iter().map(|f| f.path.clone()).collect();
    let root = common_ancestor(&paths);

    let mut written = Vec::with_capacity(files.len());
    for file in files {
        let relative = file.path.strip_prefix(&root).unwrap_or(&file.path);
        let relative: PathBuf = relative
            .components()
            .filter(|c| matches!(c, Component::Normal(_)))
            .collect();
        let dest = dir.join(&relative);
        if is_same_file(&dest, &file.path) {
            return Err(Error::InvalidArgs(format!(
                "refusing to overwrite source {} in place",
                file.path.display()
            )));
        }
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&dest, &file.source)?;
        tracing::debug!(from = %file.path.display(), to = %dest.display(), "wrote");
        written.push(dest);
    }
    Ok(written)
}

fn is_same_file(a: &Path, b: &Path) -> bool {
    match (std::fs::canonicalize(a), std::fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Print every file to `out`, each preceded by a `// <path>` header line.
pub fn write_listing<W: Write>(files: &[InstrumentedFile], mut out: W) -> std::io::Result<()> {
    for file in files {
        writeln!(out, "// {}", file.path.display())?;
        out.write_all(file.source.as_bytes())?;
        if !file.source.ends_with('\n') {
            writeln!(out)?;
        }
    }
    out.flush()
}
