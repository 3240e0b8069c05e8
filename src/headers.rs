//! Parsed response header collection.
//!
//! Header names are matched case-insensitively: they are stored lower-cased,
//! ordered, and every value received for a name is kept in arrival order.

use std::collections::BTreeMap;

use http::header::{HeaderMap, HeaderName, HeaderValue};

use crate::error::{Error, Result};

/// Immutable multi-value header map produced by the header parser.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseHeaders {
    map: BTreeMap<String, Vec<String>>,
}

impl ResponseHeaders {
    /// Create an empty header collection.
    pub fn new() -> Self {
        Self::default()
    }

    /// First value received for `name`.
    pub fn first_value(&self, name: &str) -> Option<&str> {
        self.all_values(name).first().map(String::as_str)
    }

    /// First value for `name` parsed as an unsigned integer.
    ///
    /// Returns `None` when the header is absent or not a number.
    pub fn first_value_as_u64(&self, name: &str) -> Option<u64> {
        self.first_value(name)?.parse().ok()
    }

    /// All values for `name` in arrival order (empty if absent).
    pub fn all_values(&self, name: &str) -> &[String] {
        self.map
            .get(&name.to_ascii_lowercase())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.map.contains_key(&name.to_ascii_lowercase())
    }

    /// Number of distinct header names.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Iterate `(name, values)` pairs ordered by name.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.map.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// Convert into an `http::HeaderMap`.
    ///
    /// Fails if a name or value is not representable as an HTTP field.
    pub fn to_header_map(&self) -> Result<HeaderMap> {
        let mut out = HeaderMap::with_capacity(self.map.len());
        for (name, values) in &self.map {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| Error::http_protocol(format!("Invalid header name {:?}: {}", name, e)))?;
            for value in values {
                // Values were decoded one byte per char, so this round-trips.
                let raw: Vec<u8> = value.chars().map(|c| c as u8).collect();
                let value = HeaderValue::from_bytes(&raw).map_err(|e| {
                    Error::http_protocol(format!("Invalid value for header {}: {}", name, e))
                })?;
                out.append(name.clone(), value);
            }
        }
        Ok(out)
    }
}

/// Mutable accumulator used while a header block is being parsed.
#[derive(Debug, Default)]
pub(crate) struct HeadersBuilder {
    map: BTreeMap<String, Vec<String>>,
}

impl HeadersBuilder {
    /// Add a raw `name: value` line.
    ///
    /// The line is split on the first colon and both sides are trimmed.
    /// Lines without a colon or with an empty name are dropped.
    pub(crate) fn add_line(&mut self, line: &str) {
        let Some((name, value)) = line.split_once(':') else {
            tracing::trace!("Dropping header line without colon: {:?}", line);
            return;
        };
        let name = name.trim();
        if name.is_empty() {
            tracing::trace!("Dropping header line with empty name: {:?}", line);
            return;
        }
        self.map
            .entry(name.to_ascii_lowercase())
            .or_default()
            .push(value.trim().to_string());
    }

    pub(crate) fn build(self) -> ResponseHeaders {
        ResponseHeaders { map: self.map }
    }
}
