//! Unix `ls -l` dialect.
//!
//! ```text
//! drwxr-xr-x   2 user group  4096 Jan  1 12:00 dirname
//! -rw-r--r--   1 user group  1234 Jan  1  2025 file.txt
//! lrwxrwxrwx   1 user group    42 Jan  1 12:00 link -> target
//! drwxr-xr-x               folder        0 Oct 18 13:02 Akrilik        (Rumpus)
//! -rwx------          17      332      640 Dec 20 08:54 file 1         (WebSTAR)
//! ```
//!
//! The columns between the permission string and the size vary between
//! servers, so the size is taken as the last number before the date.

use super::EntryParser;
use crate::types::{Attributes, Entry, PathType, Permission};
use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveTime, TimeZone, Utc};
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref UNIX_LINE: Regex = Regex::new(
        r"(?x)
        ^([-bcdlps])                          # type
        ([rwxsStTl-]{9})[+@.]?\s+             # permissions (+ACL marker)
        (.*?)\s+                              # links / owner / group, or `folder N`
        (\d+)\s+                              # size
        ([A-Za-z]{3}\s+\d{1,2}\s+(?:\d{1,2}:\d{2}|\d{4}))   # date
        \s(.+)$                               # filename (possibly with -> target)
        "
    )
    .unwrap();
}

#[derive(Debug, Clone)]
pub struct UnixParser {
    offset: FixedOffset,
    /// Fixed "now" for year inference; the wall clock when `None`.
    reference: Option<DateTime<Utc>>,
}

impl UnixParser {
    pub fn new(offset: FixedOffset) -> Self {
        Self {
            offset,
            reference: None,
        }
    }

    pub fn with_reference(offset: FixedOffset, reference: DateTime<Utc>) -> Self {
        Self {
            offset,
            reference: Some(reference),
        }
    }

    fn parse_date(&self, text: &str) -> Option<DateTime<Utc>> {
        let mut parts = text.split_whitespace();
        let month = month_number(parts.next()?)?;
        let day: u32 = parts.next()?.parse().ok()?;
        let last = parts.next()?;

        let to_utc = |date: NaiveDate, time: NaiveTime| {
            self.offset
                .from_local_datetime(&date.and_time(time))
                .single()
                .map(|dt| dt.with_timezone(&Utc))
        };

        if let Some((h, m)) = last.split_once(':') {
            // No year: the most recent such date not in the future.
            let time = NaiveTime::from_hms_opt(h.parse().ok()?, m.parse().ok()?, 0)?;
            let now = self.reference.unwrap_or_else(Utc::now);
            let year = now.with_timezone(&self.offset).year();
            let candidate = to_utc(NaiveDate::from_ymd_opt(year, month, day)?, time)?;
            if candidate > now + Duration::days(1) {
                to_utc(NaiveDate::from_ymd_opt(year - 1, month, day)?, time)
            } else {
                Some(candidate)
            }
        } else {
            let year: i32 = last.parse().ok()?;
            to_utc(NaiveDate::from_ymd_opt(year, month, day)?, NaiveTime::MIN)
        }
    }
}

impl EntryParser for UnixParser {
    fn parse(&self, line: &str) -> Option<Entry> {
        let caps = UNIX_LINE.captures(line)?;

        let kind = match &caps[1] {
            "d" => PathType::Directory,
            "l" => PathType::SymbolicLink,
            "-" => PathType::File,
            _ => PathType::Unknown,
        };
        let permission = Permission::from_symbolic(&caps[2].replace('l', "S"));
        let size: u64 = caps[4].parse().ok()?;
        let modified = self.parse_date(&caps[5]);

        let middle: Vec<&str> = caps[3].split_whitespace().collect();
        let (owner, group) = if middle.len() >= 3 {
            (Some(middle[1].to_string()), Some(middle[2].to_string()))
        } else {
            (None, None)
        };

        let raw_name = &caps[6];
        let (name, link_target) = if kind == PathType::SymbolicLink {
            match raw_name.split_once(" -> ") {
                Some((n, t)) => (n.to_string(), Some(t.to_string())),
                None => (raw_name.to_string(), None),
            }
        } else {
            (raw_name.to_string(), None)
        };

        if name.is_empty() {
            return None;
        }

        Some(Entry {
            name,
            attributes: Attributes {
                kind,
                size: Some(size),
                modified,
                owner,
                group,
                permission,
                link_target,
                ..Attributes::default()
            },
        })
    }
}

fn month_number(name: &str) -> Option<u32> {
    let n = match name.to_ascii_lowercase().as_str() {
        "jan" => 1,
        "feb" => 2,
        "mar" => 3,
        "apr" => 4,
        "may" => 5,
        "jun" => 6,
        "jul" => 7,
        "aug" => 8,
        "sep" => 9,
        "oct" => 10,
        "nov" => 11,
        "dec" => 12,
        _ => return None,
    };
    Some(n)
}
