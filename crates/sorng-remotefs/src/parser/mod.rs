//! Directory-listing parsers.
//!
//! Supports three dialects:
//! 1. **Unix-style** (`ls -l`), including the Rumpus / WebSTAR variants
//! 2. **Windows/IIS-style**: `01-01-26  12:00AM       1234 file.txt`
//! 3. **MLSD facts** (RFC 3659): `type=file;size=1234;modify=20260101120000; file.txt`
//!
//! A line no dialect understands is skipped, never fatal.

pub mod mlsd;
pub mod unix;
pub mod windows;

pub use mlsd::MlsdParser;
pub use unix::UnixParser;
pub use windows::WindowsParser;

use crate::types::Entry;
use chrono::{FixedOffset, Offset, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Parses one raw listing line. `None` means the line is unparsable.
pub trait EntryParser: Send + Sync {
    fn parse(&self, line: &str) -> Option<Entry>;
}

/// Tries several dialects in order, starting with the one that matched last.
pub struct CompositeParser {
    parsers: Vec<Box<dyn EntryParser>>,
    last_match: AtomicUsize,
}

impl CompositeParser {
    pub fn new(parsers: Vec<Box<dyn EntryParser>>) -> Self {
        Self {
            parsers,
            last_match: AtomicUsize::new(0),
        }
    }
}

impl EntryParser for CompositeParser {
    fn parse(&self, line: &str) -> Option<Entry> {
        let first = self.last_match.load(Ordering::Relaxed);
        if let Some(entry) = self.parsers.get(first).and_then(|p| p.parse(line)) {
            return Some(entry);
        }
        for (i, parser) in self.parsers.iter().enumerate() {
            if i == first {
                continue;
            }
            if let Some(entry) = parser.parse(line) {
                self.last_match.store(i, Ordering::Relaxed);
                return Some(entry);
            }
        }
        None
    }
}

/// Pick the dialect order from the server's SYST identification.
pub fn parser_for_system(system: Option<&str>, offset: FixedOffset) -> Box<dyn EntryParser> {
    let system = system.unwrap_or("").to_uppercase();
    let parsers: Vec<Box<dyn EntryParser>> = if system.contains("WINDOWS") {
        vec![
            Box::new(WindowsParser::new(offset)),
            Box::new(UnixParser::new(offset)),
            Box::new(MlsdParser),
        ]
    } else {
        vec![
            Box::new(UnixParser::new(offset)),
            Box::new(MlsdParser),
            Box::new(WindowsParser::new(offset)),
        ]
    };
    log::debug!("Listing parser for system '{}' selected", system);
    Box::new(CompositeParser::new(parsers))
}

/// Parse every line, skipping unparsable ones and the `.` / `..` entries.
/// Server order is preserved.
pub fn parse_listing<'a, I>(parser: &dyn EntryParser, lines: I) -> Vec<Entry>
where
    I: IntoIterator<Item = &'a str>,
{
    lines
        .into_iter()
        .map(|l| l.trim_end_matches(['\r', '\n']))
        .filter(|l| !l.trim().is_empty())
        .filter_map(|line| {
            let parsed = parser.parse(line);
            if parsed.is_none() {
                log::debug!("Skipping unparsable listing line: {}", line);
            }
            parsed
        })
        .filter(|e| e.name != "." && e.name != "..")
        .collect()
}

/// Offset for a host's `utc_offset_minutes`.
pub fn offset_from_minutes(minutes: i32) -> FixedOffset {
    FixedOffset::east_opt(minutes.saturating_mul(60)).unwrap_or_else(|| Utc.fix())
}
