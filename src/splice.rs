use crate::error::Error;
use crate::scan::FileScan;

/// Name of the generated module that owns a unit's coverage state.
pub fn runtime_module(suffix: &str) -> String {
    format!("__funccover_{suffix}")
}

/// Counter update written as the first statement of function `index`.
pub fn counter_stmt(suffix: &str, index: usize) -> String {
    format!(" crate::{}::COVER.hit({index});", runtime_module(suffix))
}

/// Guard binding written into the entry function. Dropping it at the end of
/// the body runs the collection routine.
pub fn flush_stmt(suffix: &str) -> String {
    format!(
        " let __funccover_flush = crate::{}::enter();",
        runtime_module(suffix)
    )
}

/// Output of one splicer pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Spliced {
    pub source: String,
    /// First counter index not used by this file.
    pub next_index: usize,
}

#[derive(Debug)]
struct InsertionEvent {
    offset: usize,
    text: String,
}

/// Inject counter statements (and a guard into each entry `main`) into
/// `source`.
///
/// Indices run from `start_index` in declaration order. Injected text never
/// contains a newline, so line numbers of the original code are unchanged.
pub fn splice(
    source: &str,
    scan: &FileScan,
    suffix: &str,
    start_index: usize,
) -> Result<Spliced, Error> {
    if scan.records.len() != scan.body_starts.len() {
        return Err(Error::Consistency(format!(
            "{} function records but {} body offsets",
            scan.records.len(),
            scan.body_starts.len()
        )));
    }

    let mut events: Vec<InsertionEvent> = Vec::with_capacity(scan.body_starts.len() + 1);
    let mut index = start_index;
    for (i, &offset) in scan.body_starts.iter().enumerate() {
        if i > 0 && offset <= scan.body_starts[i - 1] {
            return Err(Error::Consistency(format!(
                "body offset {offset} does not follow {}",
                scan.body_starts[i - 1]
            )));
        }
        events.push(InsertionEvent {
            offset,
            text: counter_stmt(suffix, index),
        });
        index += 1;
        // The guard shares the entry's body-start offset and follows its counter.
        if let Some(entry) = scan.entries.iter().find(|e| e.start == offset) {
            check_entry_exit(source, entry.start, entry.exit)?;
            events.push(InsertionEvent {
                offset,
                text: flush_stmt(suffix),
            });
        }
    }
    if let Some(entry) = scan
        .entries
        .iter()
        .find(|e| !scan.body_starts.contains(&e.start))
    {
        return Err(Error::Consistency(format!(
            "entry body at byte {} has no counter offset",
            entry.start
        )));
    }

    let added: usize = events.iter().map(|e| e.text.len()).sum();
    let mut out = String::with_capacity(source.len() + added);
    let mut cursor = 0;
    for event in &events {
        check_offset(source, cursor, event.offset)?;
        out.push_str(&source[cursor..event.offset]);
        out.push_str(&event.text);
        cursor = event.offset;
    }
    out.push_str(&source[cursor..]);

    tracing::trace!(
        functions = scan.records.len(),
        start_index,
        next_index = index,
        "spliced counters"
    );
    Ok(Spliced {
        source: out,
        next_index: index,
    })
}

fn check_offset(source: &str, cursor: usize, offset: usize) -> Result<(), Error> {
    if offset < cursor {
        return Err(Error::Consistency(format!(
            "insertion offset {offset} is behind scan position {cursor}"
        )));
    }
    if offset > source.len() || !source.is_char_boundary(offset) {
        return Err(Error::Consistency(format!(
            "insertion offset {offset} is not a character boundary of a {}-byte source",
            source.len()
        )));
    }
    // Body starts follow the opening brace or the body's last inner
    // attribute, which may be a `//!` line or a `/*! */` block.
    let before = &source[..offset];
    if before.ends_with(['{', ']', '\n']) || before.ends_with("*/") {
        Ok(())
    } else {
        Err(Error::Consistency(format!(
            "insertion offset {offset} does not follow a function body opening"
        )))
    }
}

fn check_entry_exit(source: &str, start: usize, exit: usize) -> Result<(), Error> {
    if exit < start || source.as_bytes().get(exit) != Some(&b'}') {
        return Err(Error::Consistency(format!(
            "entry body [{start}, {exit}] does not end in a closing brace"
        )));
    }
    Ok(())
}
