//! Documents and attachments
//!
//! Documents follow the usual underscore-prefixed field convention so the
//! same JSON shape travels over the replication dialect unmodified.
//! Attachment data is base64 on the wire and raw bytes in memory.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::revision::{content_digest, Revision};

/// A named binary attachment on a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    #[serde(rename = "content_type")]
    pub content_type: String,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
}

impl Attachment {
    pub fn new(content_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            content_type: content_type.into(),
            data,
        }
    }
}

/// A stored document: revisioned, possibly deleted, carrying attachments.
///
/// Attachments live in a `BTreeMap` so the content digest feeding the
/// revision string is independent of insertion order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_rev")]
    pub rev: Revision,
    #[serde(rename = "_deleted", default, skip_serializing_if = "is_false")]
    pub deleted: bool,
    #[serde(
        rename = "_attachments",
        default,
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub attachments: BTreeMap<String, Attachment>,
}

impl Document {
    /// Digest of the document's content (not its revision), used to mint
    /// the next revision string.
    pub fn digest_content(
        deleted: bool,
        attachments: &BTreeMap<String, Attachment>,
    ) -> String {
        let mut hasher_input = Vec::new();
        hasher_input.push(u8::from(deleted));
        for (name, attachment) in attachments {
            hasher_input.extend_from_slice(name.as_bytes());
            hasher_input.push(0);
            hasher_input.extend_from_slice(attachment.content_type.as_bytes());
            hasher_input.push(0);
            hasher_input.extend_from_slice(&attachment.data);
            hasher_input.push(0);
        }
        content_digest(&hasher_input)
    }

    /// A deletion tombstone carrying only id and revision.
    pub fn tombstone(id: impl Into<String>, rev: Revision) -> Self {
        Self {
            id: id.into(),
            rev,
            deleted: true,
            attachments: BTreeMap::new(),
        }
    }
}

fn is_false(value: &bool) -> bool {
    !*value
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        STANDARD.decode(raw).map_err(serde::de::Error::custom)
    }
}
