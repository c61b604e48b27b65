//! Field name sanitization for MongoDB compatibility.
//!
//! MongoDB restricts field names (keys) from containing dots, which address nested
//! fields, and dollar signs, which mark operators. Entity documents may carry such
//! keys inside free-form maps, so keys are escaped on the way in and restored on the
//! way out. Values are stored untouched so filters compare against the raw data.

use bson::{Bson, Document};

/// Escapes and restores document keys.
pub(crate) struct KeySanitizer;

impl KeySanitizer {
    /// Character replacements for sanitization
    const REPLACEMENTS: [(&'static str, &'static str); 3] = [
        (".", "__dot__"),
        ("$", "__dollar__"),
        ("\0", "__null__"),
    ];

    /// Escapes a single key.
    pub(crate) fn sanitize_key(input: &str) -> String {
        let mut sanitized = input.to_string();
        for (target, replacement) in Self::REPLACEMENTS.iter() {
            sanitized = sanitized.replace(*target, *replacement);
        }
        sanitized
    }

    /// Reverts [`sanitize_key`](Self::sanitize_key).
    pub(crate) fn restore_key(input: &str) -> String {
        let mut restored = input.to_string();
        for (target, replacement) in Self::REPLACEMENTS.iter().rev() {
            restored = restored.replace(*replacement, *target);
        }
        restored
    }

    /// Escapes every segment of a dotted field path, keeping the separating dots.
    pub(crate) fn sanitize_path(path: &str) -> String {
        path.split('.')
            .map(Self::sanitize_key)
            .collect::<Vec<_>>()
            .join(".")
    }

    /// Recursively escapes the keys of `document`.
    pub(crate) fn sanitize_document(document: Document) -> Document {
        document
            .into_iter()
            .map(|(key, value)| (Self::sanitize_key(&key), Self::sanitize_value(value)))
            .collect()
    }

    /// Recursively restores the keys of `document`.
    pub(crate) fn restore_document(document: Document) -> Document {
        document
            .into_iter()
            .map(|(key, value)| (Self::restore_key(&key), Self::restore_value(value)))
            .collect()
    }

    fn sanitize_value(value: Bson) -> Bson {
        match value {
            Bson::Document(doc) => Bson::Document(Self::sanitize_document(doc)),
            Bson::Array(items) => Bson::Array(items.into_iter().map(Self::sanitize_value).collect()),
            other => other,
        }
    }

    fn restore_value(value: Bson) -> Bson {
        match value {
            Bson::Document(doc) => Bson::Document(Self::restore_document(doc)),
            Bson::Array(items) => Bson::Array(items.into_iter().map(Self::restore_value).collect()),
            other => other,
        }
    }
}
