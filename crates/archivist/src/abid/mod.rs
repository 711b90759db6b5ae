//! Content-addressed, time-sortable identifiers (ABIDs).
//!
//! Every Link and Job is named by an ABID issued once at creation:
//!
//! ```text
//! lnk_01JAB3C9QZ 5F0C12A4 9E 3B7A01
//! |   |          |        |  |
//! |   |          |        |  tie-break (6)
//! |   |          |        subtype hash (2)
//! |   |          salted content hash (8)
//! |   creation time, ULID-encoded (10)
//! type prefix (3)
//! ```
//!
//! The 26-character body is valid Crockford base32, so it sorts by creation
//! time and round-trips through any ULID parser. The content hash is
//! `SHA256(content_key + salt)`: two installs sharing a salt derive the same
//! component for the same URL, while a holder of the identifier alone learns
//! nothing about the content key.

mod source;

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use ulid::Ulid;

pub use source::{
    guard_mutation, reissue, verify, AbidComponent, AbidSource, ComponentMismatch,
    ConflictReport,
};

pub const PREFIX_LEN: usize = 3;
pub const TS_LEN: usize = 10;
pub const URI_LEN: usize = 8;
pub const SUBTYPE_LEN: usize = 2;
pub const RAND_LEN: usize = 6;
pub const BODY_LEN: usize = TS_LEN + URI_LEN + SUBTYPE_LEN + RAND_LEN;

const CROCKFORD: &str = "0123456789ABCDEFGHJKMNPQRSTVWXYZ";

/// Errors from parsing an ABID string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AbidParseError {
    #[error("invalid ABID length {0} (expected 26 or 30 characters)")]
    Length(usize),
    #[error("invalid ABID prefix '{0}'")]
    Prefix(String),
    #[error("invalid character '{0}' in ABID body")]
    Character(char),
}

/// A validated ABID in its canonical text form (`pfx_BODY`, body uppercase).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Abid(String);

/// The individual components of an ABID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AbidParts {
    pub prefix: String,
    pub ts: String,
    pub uri: String,
    pub subtype: String,
    pub rand: String,
}

impl AbidParts {
    /// Get one component by name.
    pub fn component(&self, component: AbidComponent) -> &str {
        match component {
            AbidComponent::Prefix => &self.prefix,
            AbidComponent::Timestamp => &self.ts,
            AbidComponent::Uri => &self.uri,
            AbidComponent::Subtype => &self.subtype,
            AbidComponent::Rand => &self.rand,
        }
    }
}

impl Abid {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Type prefix (e.g. `lnk`).
    pub fn prefix(&self) -> &str {
        &self.0[..PREFIX_LEN]
    }

    /// The 26-character ULID-compatible body.
    pub fn body(&self) -> &str {
        &self.0[PREFIX_LEN + 1..]
    }

    pub fn parts(&self) -> AbidParts {
        let body = self.body();
        let (ts, rest) = body.split_at(TS_LEN);
        let (uri, rest) = rest.split_at(URI_LEN);
        let (subtype, rand) = rest.split_at(SUBTYPE_LEN);
        AbidParts {
            prefix: self.prefix().to_string(),
            ts: ts.to_string(),
            uri: uri.to_string(),
            subtype: subtype.to_string(),
            rand: rand.to_string(),
        }
    }

    /// Creation time encoded in the identifier (millisecond precision).
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        let padded = format!("{}{}", &self.body()[..TS_LEN], "0".repeat(BODY_LEN - TS_LEN));
        let ulid = Ulid::from_string(&padded).ok()?;
        DateTime::from_timestamp_millis(ulid.timestamp_ms() as i64)
    }

    /// Parse an ABID, requiring a specific type prefix.
    pub fn parse_with_prefix(s: &str, prefix: &str) -> Result<Self, AbidParseError> {
        let trimmed = s.trim();
        if trimmed.len() == BODY_LEN {
            return Self::from_str(&format!("{}_{}", prefix, trimmed));
        }
        let abid = Self::from_str(trimmed)?;
        if abid.prefix() != prefix {
            return Err(AbidParseError::Prefix(abid.prefix().to_string()));
        }
        Ok(abid)
    }
}

impl FromStr for Abid {
    type Err = AbidParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.len() != PREFIX_LEN + 1 + BODY_LEN || !s.is_ascii() {
            return Err(AbidParseError::Length(s.len()));
        }
        let (prefix, rest) = s.split_at(PREFIX_LEN);
        if !prefix
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        {
            return Err(AbidParseError::Prefix(prefix.to_string()));
        }
        let body = rest
            .strip_prefix('_')
            .ok_or_else(|| AbidParseError::Prefix(s[..PREFIX_LEN + 1].to_string()))?
            .to_ascii_uppercase();
        if let Some(bad) = body.chars().find(|c| !CROCKFORD.contains(*c)) {
            return Err(AbidParseError::Character(bad));
        }
        Ok(Abid(format!("{}_{}", prefix, body)))
    }
}

impl TryFrom<String> for Abid {
    type Error = AbidParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Abid> for String {
    fn from(abid: Abid) -> Self {
        abid.0
    }
}

impl fmt::Display for Abid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Derive an identifier from its sources.
///
/// Pure: the same inputs always produce the same identifier.
pub fn derive(
    prefix: &str,
    created_at: DateTime<Utc>,
    content_key: &str,
    subtype: &str,
    tie_break: &str,
    salt: &str,
) -> Abid {
    let body = format!(
        "{}{}{}{}",
        ts_component(created_at),
        hash_component(&format!("{}{}", content_key, salt), URI_LEN),
        hash_component(subtype, SUBTYPE_LEN),
        hash_component(tie_break, RAND_LEN),
    );
    Abid(format!("{}_{}", prefix, body))
}

/// Fresh random tie-break source for a new entity.
pub fn new_tie_break() -> String {
    Ulid::new().to_string()
}

fn ts_component(created_at: DateTime<Utc>) -> String {
    let ms = created_at.timestamp_millis().max(0) as u64;
    let encoded = Ulid::from_parts(ms, 0).to_string();
    encoded[..TS_LEN].to_string()
}

fn hash_component(input: &str, len: usize) -> String {
    let digest = Sha256::digest(input.as_bytes());
    let mut hexed = hex::encode_upper(digest);
    hexed.truncate(len);
    hexed
}
