//! Plate normalization
//!
//! Plates are keyed in the ledger by their normalized form: uppercase ASCII
//! alphanumerics with every separator removed ("abc-123" and "ABC 123" are the
//! same vehicle). A plate must carry at least one decimal digit, since the
//! restriction calendar is keyed on the last digit.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Normalized vehicle plate
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Plate(String);

impl Plate {
    /// Normalize raw plate text
    ///
    /// Uppercases and drops everything that is not an ASCII letter or digit.
    /// Fails with `InvalidPlate` when the result has no digit.
    pub fn parse(raw: &str) -> Result<Self> {
        let normalized: String = raw
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .map(|c| c.to_ascii_uppercase())
            .collect();

        if !normalized.bytes().any(|b| b.is_ascii_digit()) {
            return Err(Error::InvalidPlate(raw.to_string()));
        }

        Ok(Self(normalized))
    }

    /// Last decimal digit of the plate, scanning from the end
    ///
    /// Plates such as "BAB89E" end in a letter; their digit is 9.
    pub fn last_digit(&self) -> u8 {
        self.0
            .bytes()
            .rev()
            .find(u8::is_ascii_digit)
            .map(|b| b - b'0')
            // parse() guarantees at least one digit
            .unwrap_or_default()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Plate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Plate {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Plate {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Plate::parse(&value)
    }
}

impl From<Plate> for String {
    fn from(plate: Plate) -> Self {
        plate.0
    }
}

impl std::str::FromStr for Plate {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Plate::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_uppercases_and_strips_separators() {
        let plate = Plate::parse("abc-123").unwrap();
        assert_eq!(plate.as_str(), "ABC123");

        let plate = Plate::parse(" xy z 9.8 7 ").unwrap();
        assert_eq!(plate.as_str(), "XYZ987");
    }

    #[test]
    fn test_parse_rejects_plate_without_digit() {
        let err = Plate::parse("ABCDEF").unwrap_err();
        assert!(matches!(err, Error::InvalidPlate(ref p) if p == "ABCDEF"));
    }

    #[test]
    fn test_parse_rejects_empty() {
        assert!(matches!(Plate::parse(""), Err(Error::InvalidPlate(_))));
        assert!(matches!(Plate::parse(" - "), Err(Error::InvalidPlate(_))));
    }

    #[test]
    fn test_last_digit_skips_trailing_letters() {
        assert_eq!(Plate::parse("BAB89E").unwrap().last_digit(), 9);
        assert_eq!(Plate::parse("ABC120").unwrap().last_digit(), 0);
        assert_eq!(Plate::parse("7ABCDE").unwrap().last_digit(), 7);
    }

    #[test]
    fn test_serde_normalizes_on_deserialize() {
        let plate: Plate = serde_json::from_str("\"abc 321\"").unwrap();
        assert_eq!(plate.as_str(), "ABC321");
        assert_eq!(serde_json::to_string(&plate).unwrap(), "\"ABC321\"");
        assert!(serde_json::from_str::<Plate>("\"ABCDEF\"").is_err());
    }
}
