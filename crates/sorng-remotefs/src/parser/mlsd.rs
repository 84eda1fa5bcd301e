//! RFC 3659 machine listing: `fact1=val1;fact2=val2; filename`.

use super::EntryParser;
use crate::types::{Attributes, Entry, PathType, Permission};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use std::collections::HashMap;

/// MLSD/MLST fact lines. Timestamps are UTC by definition, so no offset applies.
#[derive(Debug, Clone, Copy, Default)]
pub struct MlsdParser;

impl EntryParser for MlsdParser {
    fn parse(&self, line: &str) -> Option<Entry> {
        if !line.contains('=') || !line.contains(';') {
            return None;
        }
        let line = line.trim_start();
        let (facts_str, name) = line.split_once("; ")?;
        if name.is_empty() {
            return None;
        }

        let facts: HashMap<String, String> = facts_str
            .split(';')
            .filter_map(|seg| seg.trim().split_once('='))
            .map(|(k, v)| (k.to_lowercase(), v.to_string()))
            .collect();

        let kind = match facts.get("type").map(|s| s.to_lowercase()).as_deref() {
            // Current / parent directory markers.
            Some("cdir") | Some("pdir") => return None,
            Some("dir") => PathType::Directory,
            Some("file") => PathType::File,
            Some("os.unix=symlink") | Some("os.unix=slink") => PathType::SymbolicLink,
            Some(_) => PathType::Unknown,
            None => return None,
        };

        Some(Entry {
            name: name.to_string(),
            attributes: Attributes {
                kind,
                size: facts.get("size").and_then(|v| v.parse().ok()),
                modified: facts.get("modify").and_then(|v| parse_time(v)),
                owner: facts.get("unix.owner").cloned(),
                group: facts.get("unix.group").cloned(),
                permission: facts.get("unix.mode").and_then(|m| Permission::from_octal(m)),
                ..Attributes::default()
            },
        })
    }
}

/// Parse `YYYYMMDDHHmmSS[.fraction]`, also used for MDTM replies.
pub fn parse_time(s: &str) -> Option<DateTime<Utc>> {
    let base = s.get(..14)?;
    NaiveDateTime::parse_from_str(base, "%Y%m%d%H%M%S")
        .ok()
        .map(|dt| Utc.from_utc_datetime(&dt))
}

/// Format a timestamp for MFMT / MDTM-style commands.
pub fn format_time(t: &DateTime<Utc>) -> String {
    t.format("%Y%m%d%H%M%S").to_string()
}
