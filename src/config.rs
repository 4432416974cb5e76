use std::path::Path;
use std::time::Duration;

use sha2::{Digest, Sha256};

use crate::error::Error;

/// Default coverage output file, relative to the instrumented program's CWD.
pub const DEFAULT_OUTPUT: &str = "cover.out";

/// Settings shared by every file of one compilation unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstrumentConfig {
    /// Appended to generated names so several instrumented units can coexist.
    pub suffix: String,
    /// Where the instrumented program writes its coverage lines.
    pub output: String,
    /// Zero disables periodic collection.
    pub period: Duration,
}

impl InstrumentConfig {
    pub fn new(suffix: impl Into<String>) -> Self {
        InstrumentConfig {
            suffix: suffix.into(),
            output: DEFAULT_OUTPUT.to_string(),
            period: Duration::ZERO,
        }
    }

    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.output = output.into();
        self
    }

    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }
}

/// Unique suffix for a unit: the first 6 bytes of the SHA-256 of its first
/// source path, hex encoded.
pub fn derive_suffix(first_source: &Path) -> String {
    let digest = Sha256::digest(first_source.to_string_lossy().as_bytes());
    digest[..6].iter().map(|b| format!("{b:02x}")).collect()
}

/// Parse a duration such as `500ms`, `2s`, `1m30s` or `1.5h`.
///
/// Accepted units are `ns`, `us` (or `µs`), `ms`, `s`, `m` and `h`; a bare
/// `0` means "disabled". Signed values are rejected.
pub fn parse_period(input: &str) -> Result<Duration, Error> {
    let invalid = |why: &str| Error::InvalidPeriod(format!("{input:?}: {why}"));

    let s = input.trim();
    if s.is_empty() {
        return Err(invalid("empty duration"));
    }
    if s.starts_with('-') {
        return Err(invalid("must not be negative"));
    }
    let s = s.strip_prefix('+').unwrap_or(s);
    if s == "0" {
        return Ok(Duration::ZERO);
    }

    let mut total = 0f64;
    let mut rest = s;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if number_len == 0 {
            return Err(invalid("expected a number"));
        }
        let value: f64 = rest[..number_len]
            .parse()
            .map_err(|_| invalid("malformed number"))?;
        rest = &rest[number_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let nanos_per_unit = match &rest[..unit_len] {
            "ns" => 1.0,
            "us" | "µs" | "μs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60e9,
            "h" => 3600e9,
            "" => return Err(invalid("missing unit")),
            _ => return Err(invalid("unknown unit")),
        };
        rest = &rest[unit_len..];
        total += value * nanos_per_unit;
    }

    if !total.is_finite() || total > u64::MAX as f64 {
        return Err(invalid("out of range"));
    }
    Ok(Duration::from_nanos(total.round() as u64))
}
