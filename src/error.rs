use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to parse {}: {source}", path.display())]
    ParseError {
        path: PathBuf,
        #[source]
        source: syn::Error,
    },

    /// Scanner and splicer disagree, or the unit is malformed (e.g. two
    /// entry functions). Always a reason to abort the whole unit.
    #[error("inconsistent instrumentation: {0}")]
    Consistency(String),

    #[error("failed to render coverage runtime: {0}")]
    Template(String),

    #[error("invalid period: {0}")]
    InvalidPeriod(String),

    #[error("{0}")]
    InvalidArgs(String),

    #[error("failed to read {}: {source}", path.display())]
    ReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to update manifest: {0}")]
    Manifest(String),

    #[error("{0}")]
    Io(#[from] std::io::Error),
}
