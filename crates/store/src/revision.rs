//! Revision strings and their ordering
//!
//! A revision is `"<generation>-<sha256 hex>"`. The generation counts writes
//! to the document; the digest covers the document content. Ordering is
//! generation first, then digest lexicographically, which gives every
//! replica the same winner for any pair of concurrent revisions.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Revision {
    generation: u64,
    digest: String,
}

impl Revision {
    pub fn new(generation: u64, digest: impl Into<String>) -> Self {
        Self {
            generation,
            digest: digest.into(),
        }
    }

    /// First revision of a document with the given content digest.
    pub fn first(digest: impl Into<String>) -> Self {
        Self::new(1, digest)
    }

    /// Successor revision: generation + 1 with a fresh content digest.
    pub fn next(&self, digest: impl Into<String>) -> Self {
        Self::new(self.generation + 1, digest)
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn digest(&self) -> &str {
        &self.digest
    }
}

/// SHA-256 hex digest of arbitrary content bytes, for revision construction.
pub fn content_digest(content: &[u8]) -> String {
    hex::encode(Sha256::digest(content))
}

impl Ord for Revision {
    fn cmp(&self, other: &Self) -> Ordering {
        self.generation
            .cmp(&other.generation)
            .then_with(|| self.digest.cmp(&other.digest))
    }
}

impl PartialOrd for Revision {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.generation, self.digest)
    }
}

impl FromStr for Revision {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (generation, digest) = s
            .split_once('-')
            .ok_or_else(|| format!("Revision '{}' missing generation separator", s))?;
        let generation: u64 = generation
            .parse()
            .map_err(|_| format!("Revision '{}' has a non-numeric generation", s))?;
        if generation == 0 || digest.is_empty() {
            return Err(format!("Revision '{}' is out of range", s));
        }
        Ok(Self::new(generation, digest))
    }
}

impl Serialize for Revision {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Revision {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
