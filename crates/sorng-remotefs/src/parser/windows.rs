//! Windows / IIS `DIR` dialect.
//!
//! ```text
//! 12-05-96  05:03PM       <DIR>          absoft2
//! 05-26-1995  10:57AM               143712 $LDR$
//! ```

use super::EntryParser;
use crate::types::{Attributes, Entry, PathType};
use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref WINDOWS_LINE: Regex = Regex::new(
        r"^(\d{2}-\d{2}-(?:\d{2}|\d{4}))\s+(\d{1,2}:\d{2}\s*[AaPp][Mm])\s+(<DIR>|\d+)\s+(.+)$"
    )
    .unwrap();
}

#[derive(Debug, Clone)]
pub struct WindowsParser {
    offset: FixedOffset,
}

impl WindowsParser {
    pub fn new(offset: FixedOffset) -> Self {
        Self { offset }
    }

    fn parse_date(&self, date: &str, time: &str) -> Option<DateTime<Utc>> {
        let time = time.replace(' ', "").to_uppercase();
        let text = format!("{} {}", date, time);
        let format = if date.len() == 10 {
            "%m-%d-%Y %I:%M%p"
        } else {
            "%m-%d-%y %I:%M%p"
        };
        let naive = NaiveDateTime::parse_from_str(&text, format).ok()?;
        self.offset
            .from_local_datetime(&naive)
            .single()
            .map(|dt| dt.with_timezone(&Utc))
    }
}

impl EntryParser for WindowsParser {
    fn parse(&self, line: &str) -> Option<Entry> {
        let caps = WINDOWS_LINE.captures(line.trim_start())?;
        let (kind, size) = match &caps[3] {
            "<DIR>" => (PathType::Directory, None),
            n => (PathType::File, Some(n.parse::<u64>().ok()?)),
        };
        let name = caps[4].to_string();
        Some(Entry {
            name,
            attributes: Attributes {
                kind,
                size,
                modified: self.parse_date(&caps[1], &caps[2]),
                ..Attributes::default()
            },
        })
    }
}
