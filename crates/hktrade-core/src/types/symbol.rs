//! Symbol normalization.
//!
//! HKEX stock codes are numeric, and venues disagree on formatting: the
//! OpenD gateway wants `HK.00700`, the Client Portal wants `0700`. The
//! canonical form used everywhere inside the system strips leading zeros
//! (`700`), and each venue supplies a [`SymbolCodec`] describing its own
//! wire form.

use serde::{Deserialize, Serialize};

use crate::error::NormalizeError;

/// A venue-neutral canonical symbol: digits with leading zeros stripped.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Symbol(String);

impl Symbol {
    /// Normalize a raw caller-supplied code to canonical form.
    ///
    /// Accepts any string of ASCII digits, e.g. `"0700"`, `"700"` and
    /// `"00700"` all normalize to `"700"`. An all-zero code normalizes
    /// to `"0"`.
    pub fn normalize(raw: &str) -> Result<Self, NormalizeError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
            return Err(NormalizeError::InvalidSymbol(raw.to_string()));
        }
        let stripped = trimmed.trim_start_matches('0');
        let canonical = if stripped.is_empty() { "0" } else { stripped };
        Ok(Symbol(canonical.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Venue-specific symbol formatting, driven by data so a new venue only
/// supplies a prefix and pad width.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolCodec {
    /// Prefix prepended to the padded code (e.g. `"HK."`).
    #[serde(default)]
    pub prefix: String,
    /// Zero-pad width of the numeric code.
    pub pad_width: usize,
}

impl SymbolCodec {
    pub fn new(prefix: impl Into<String>, pad_width: usize) -> Self {
        Self {
            prefix: prefix.into(),
            pad_width,
        }
    }

    /// Render a canonical symbol in this venue's wire form.
    pub fn to_venue(&self, symbol: &Symbol) -> String {
        format!(
            "{}{:0>width$}",
            self.prefix,
            symbol.as_str(),
            width = self.pad_width
        )
    }

    /// Parse a venue wire form back to canonical.
    pub fn parse(&self, venue_form: &str) -> Result<Symbol, NormalizeError> {
        let code = venue_form
            .strip_prefix(self.prefix.as_str())
            .unwrap_or(venue_form);
        Symbol::normalize(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_strips_leading_zeros() {
        assert_eq!(Symbol::normalize("0700").unwrap().as_str(), "700");
        assert_eq!(Symbol::normalize("700").unwrap().as_str(), "700");
        assert_eq!(Symbol::normalize("00700").unwrap().as_str(), "700");
        assert_eq!(Symbol::normalize("0000").unwrap().as_str(), "0");
    }

    #[test]
    fn test_normalize_rejects_garbage() {
        assert!(Symbol::normalize("").is_err());
        assert!(Symbol::normalize("70A0").is_err());
        assert!(Symbol::normalize("HK.700").is_err());
    }

    #[test]
    fn test_round_trip_futu_form() {
        let codec = SymbolCodec::new("HK.", 5);
        let a = Symbol::normalize("0700").unwrap();
        let b = Symbol::normalize("700").unwrap();
        assert_eq!(codec.to_venue(&a), "HK.00700");
        assert_eq!(codec.to_venue(&a), codec.to_venue(&b));
        assert_eq!(codec.parse("HK.00700").unwrap(), a);
    }

    #[test]
    fn test_round_trip_portal_form() {
        let codec = SymbolCodec::new("", 4);
        let s = Symbol::normalize("5").unwrap();
        assert_eq!(codec.to_venue(&s), "0005");
        assert_eq!(codec.parse("0005").unwrap(), s);
    }
}
