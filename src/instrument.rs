use std::path::{Path, PathBuf};

use crate::config::InstrumentConfig;
use crate::error::Error;
use crate::fragment::{module_ident, render_fragment};
use crate::normalize::ensure_runtime_reference;
use crate::scan::{FileScan, FunctionSet, scan_source};
use crate::splice::splice;

/// Final source of one file of the unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstrumentedFile {
    pub path: PathBuf,
    pub source: String,
    /// True for the file that received the runtime fragment.
    pub is_entry: bool,
}

/// Instruments the files of one compilation unit together: one counter
/// index space, one runtime fragment.
#[derive(Debug)]
pub struct Instrumenter {
    config: InstrumentConfig,
    sources: Vec<(PathBuf, String)>,
}

impl Instrumenter {
    pub fn new(config: InstrumentConfig) -> Self {
        Instrumenter {
            config,
            sources: Vec::new(),
        }
    }

    /// Add a source that is already in memory. Files are instrumented in the
    /// order they are added.
    pub fn add_source(&mut self, path: impl Into<PathBuf>, source: impl Into<String>) {
        self.sources.push((path.into(), source.into()));
    }

    /// Read `path` and add it to the unit.
    pub fn add_file(&mut self, path: &Path) -> Result<(), Error> {
        let source = std::fs::read_to_string(path).map_err(|source| Error::ReadError {
            path: path.to_path_buf(),
            source,
        })?;
        self.add_source(path, source);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Instrument every file of the unit.
    ///
    /// Any failure aborts the whole unit so that no partially instrumented
    /// set of files is ever returned.
    pub fn instrument(&self) -> Result<Vec<InstrumentedFile>, Error> {
        // Counter statements name the generated module in every file.
        module_ident(&self.config.suffix)?;
        let qualify = self.sources.len() > 1;

        // Pass 1: scan everything, merge the records, find the entry file.
        let mut scans: Vec<FileScan> = Vec::with_capacity(self.sources.len());
        let mut functions = FunctionSet::default();
        let mut entry_file: Option<usize> = None;
        for (i, (path, source)) in self.sources.iter().enumerate() {
            let file_id = qualify.then(|| path.to_string_lossy());
            let scan = scan_source(source, file_id.as_deref()).map_err(|source| {
                Error::ParseError {
                    path: path.clone(),
                    source,
                }
            })?;
            tracing::debug!(
                file = %path.display(),
                functions = scan.records.len(),
                entry = scan.has_entry(),
                "scanned"
            );

            if scan.has_entry() {
                if let Some(first) = entry_file {
                    return Err(Error::Consistency(format!(
                        "both {} and {} define an entry function",
                        self.sources[first].0.display(),
                        path.display()
                    )));
                }
                entry_file = Some(i);
            }
            functions.extend(scan.function_set());
            scans.push(scan);
        }
        match entry_file {
            Some(entry) => self.check_single_crate(entry)?,
            None => tracing::warn!("no entry function found; coverage will never be written"),
        }

        // Pass 2: splice with one running counter index.
        let suffix = &self.config.suffix;
        let mut next_index = 0;
        let mut out = Vec::with_capacity(self.sources.len());
        for (i, ((path, source), scan)) in self.sources.iter().zip(&scans).enumerate() {
            let spliced = splice(source, scan, suffix, next_index)?;
            next_index = spliced.next_index;

            let is_entry = entry_file == Some(i);
            let source = if is_entry {
                self.attach_runtime(path, &spliced.source, &functions)?
            } else {
                spliced.source
            };
            out.push(InstrumentedFile {
                path: path.clone(),
                source,
                is_entry,
            });
        }

        if next_index != functions.len() {
            return Err(Error::Consistency(format!(
                "spliced {next_index} counters for {} functions",
                functions.len()
            )));
        }
        tracing::info!(
            files = out.len(),
            functions = functions.len(),
            suffix = %suffix,
            "instrumented unit"
        );
        Ok(out)
    }

    /// A `lib.rs` next to the entry file is the root of a separate library
    /// crate, which cannot reach the generated module.
    fn check_single_crate(&self, entry: usize) -> Result<(), Error> {
        let entry_path = &self.sources[entry].0;
        let entry_dir = entry_path.parent();
        let library_root = self.sources.iter().map(|(path, _)| path).find(|path| {
            path.file_name().is_some_and(|name| name == "lib.rs") && path.parent() == entry_dir
        });
        match library_root {
            Some(lib) => Err(Error::Consistency(format!(
                "{} and {} are separate crate roots; instrument them as separate units",
                lib.display(),
                entry_path.display()
            ))),
            None => Ok(()),
        }
    }

    fn attach_runtime(
        &self,
        path: &Path,
        spliced: &str,
        functions: &FunctionSet,
    ) -> Result<String, Error> {
        // The splice only ever adds statements; output that no longer
        // parses means the offsets were wrong.
        let mut source = ensure_runtime_reference(spliced).map_err(|e| {
            Error::Consistency(format!(
                "instrumented {} is not valid Rust: {e}",
                path.display()
            ))
        })?;
        let fragment = render_fragment(
            &self.config.suffix,
            &self.config.output,
            self.config.period,
            functions.records(),
        )?;
        if !source.ends_with('\n') {
            source.push('\n');
        }
        source.push('\n');
        source.push_str(&fragment);
        Ok(source)
    }
}
