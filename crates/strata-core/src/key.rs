//! Storage key space shared between the log and its backends.
//!
//! Backends that want string keys (files, sled trees, remote KV) use the
//! `Display`/`FromStr` forms: `"<index>-<scale>"` for entries and the
//! reserved literals `"head"` / `"tail"` for the persisted marks.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A key in the backing store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Key {
    /// The persisted head mark (latest committed index).
    Head,
    /// The persisted tail mark (oldest retained index).
    Tail,
    /// A stored delta covering `(index - scale, index]`.
    Entry { index: u64, scale: u64 },
}

impl Key {
    /// Shorthand for an entry key.
    pub fn entry(index: u64, scale: u64) -> Self {
        Key::Entry { index, scale }
    }

    /// The scale of an entry key, or `None` for the reserved marks.
    pub fn scale(&self) -> Option<u64> {
        match self {
            Key::Entry { scale, .. } => Some(*scale),
            _ => None,
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Head => write!(f, "head"),
            Key::Tail => write!(f, "tail"),
            Key::Entry { index, scale } => write!(f, "{}-{}", index, scale),
        }
    }
}

/// Error parsing a string key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParseKeyError(String);

impl fmt::Display for ParseKeyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "malformed store key: {}", self.0)
    }
}

impl std::error::Error for ParseKeyError {}

impl FromStr for Key {
    type Err = ParseKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "head" => return Ok(Key::Head),
            "tail" => return Ok(Key::Tail),
            _ => {}
        }

        let (index, scale) = s
            .split_once('-')
            .ok_or_else(|| ParseKeyError(s.to_string()))?;

        let index = index
            .parse::<u64>()
            .map_err(|_| ParseKeyError(s.to_string()))?;
        let scale = scale
            .parse::<u64>()
            .map_err(|_| ParseKeyError(s.to_string()))?;

        if scale == 0 {
            return Err(ParseKeyError(s.to_string()));
        }

        Ok(Key::Entry { index, scale })
    }
}
