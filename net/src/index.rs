//! Machine-readable keyserver index listings.
//!
//! A keyserver answers `op=index&options=mr` with a colon-delimited
//! listing.  Each `pub` record starts a key, and the `uid` records
//! following it belong to that key:
//!
//! ```text
//! info:1:1
//! pub:D03F6F865226FE8B:1:2048:1511355130::
//! uid:Testy McTestface <testy@example.org>:1511355130::
//! ```
//!
//! The fields of a `pub` record are the key ID, the algorithm, the key
//! length, the creation time, the expiration time and the flags.
//!
//! This module only parses.  Fetching the listing and the selected key
//! is done by [`KeyServer::get_key_by_email`].
//!
//!   [`KeyServer::get_key_by_email`]: crate::KeyServer::get_key_by_email

use std::cmp::Ordering;
use std::time::{SystemTime, UNIX_EPOCH};

use percent_encoding::percent_decode_str;

/// Number of fields in a well-formed `pub` record.
const PUB_FIELDS: usize = 7;

/// A key listed in an index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    key_id: String,
    created: String,
    expires: Option<u64>,
    uids: Vec<String>,
}

impl IndexEntry {
    /// Parses a `pub` record.
    ///
    /// Returns `None` if the record is malformed or the key expired at
    /// or before `now` (in seconds since the epoch).
    fn from_pub_record(line: &str, now: u64) -> Option<Self> {
        let fields: Vec<&str> = line.split(':').collect();
        if fields.len() != PUB_FIELDS {
            tracing::trace!(fields = fields.len(), "skipping malformed pub record");
            return None;
        }

        // An expiration time that is not a number does not expire the
        // key.
        let expires = fields[5].parse::<u64>().ok();
        if let Some(t) = expires {
            if t <= now {
                tracing::trace!(key_id = fields[1], expires = t,
                                "skipping expired key");
                return None;
            }
        }

        Some(IndexEntry {
            key_id: fields[1].to_string(),
            created: fields[4].to_string(),
            expires,
            uids: Vec::new(),
        })
    }

    /// Returns the key ID as listed by the server.
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// Returns the creation time field.
    pub fn created(&self) -> &str {
        &self.created
    }

    /// Returns the expiration time in seconds since the epoch, if any.
    pub fn expires(&self) -> Option<u64> {
        self.expires
    }

    /// Returns the email addresses of the key's `uid` records, in
    /// listing order.
    pub fn uids(&self) -> &[String] {
        &self.uids
    }

    /// Returns whether one of the uids is exactly `address`.
    pub fn has_uid(&self, address: &str) -> bool {
        self.uids.iter().any(|u| u == address)
    }

    /// Orders entries from oldest to newest.
    ///
    /// Creation times are compared numerically if both are numbers,
    /// and lexically otherwise.  Ties are broken by the key ID.
    fn cmp_age(&self, other: &Self) -> Ordering {
        match (self.created.parse::<u64>(), other.created.parse::<u64>()) {
            (Ok(a), Ok(b)) => a.cmp(&b),
            _ => self.created.cmp(&other.created),
        }.then_with(|| self.key_id.cmp(&other.key_id))
    }
}

/// Extracts the first address enclosed in angle brackets.
fn email_of(record: &str) -> Option<String> {
    let uid = percent_decode_str(record).decode_utf8_lossy();
    let start = uid.find('<')? + 1;
    let len = uid[start..].find('>')?;
    Some(uid[start..start + len].to_string())
}

/// A parsed index listing.
///
/// Only keys that were well-formed and not expired at parse time are
/// retained.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Index {
    entries: Vec<IndexEntry>,
}

impl Index {
    /// Parses a machine-readable index listing.
    ///
    /// Keys whose expiration time is at or before `now` are dropped,
    /// as are the `uid` records following them.
    ///
    /// Every retained `pub` record becomes its own entry, even if
    /// several share the same creation time field.
    pub fn parse(body: &str, now: SystemTime) -> Self {
        let now = now.duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);

        let mut entries: Vec<IndexEntry> = Vec::new();
        // Whether the last `pub` record was retained.
        let mut current = false;

        for line in body.lines() {
            let line = line.trim_end_matches('\r');
            if line.starts_with("pub:") {
                match IndexEntry::from_pub_record(line, now) {
                    Some(entry) => {
                        entries.push(entry);
                        current = true;
                    },
                    None => current = false,
                }
            } else if let Some(record) = line.strip_prefix("uid:") {
                if ! current {
                    continue;
                }
                if let (Some(email), Some(entry)) =
                    (email_of(record), entries.last_mut())
                {
                    entry.uids.push(email);
                }
            }
        }

        Index { entries }
    }

    /// Returns the retained keys in listing order.
    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    /// Returns the keys that have a uid matching `address` exactly.
    pub fn matching<'a>(&'a self, address: &'a str)
                        -> impl Iterator<Item = &'a IndexEntry> + 'a
    {
        self.entries.iter().filter(move |e| e.has_uid(address))
    }

    /// Returns the newest key that has a uid matching `address`.
    pub fn newest_matching(&self, address: &str) -> Option<&IndexEntry> {
        self.entries.iter()
            .filter(|e| e.has_uid(address))
            .max_by(|a, b| a.cmp_age(b))
    }
}
