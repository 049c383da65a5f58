//! Location code types.

use std::fmt;

/// Error returned when parsing an invalid location code.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {kind} code: {reason}")]
pub struct InvalidLocation {
    kind: &'static str,
    reason: &'static str,
}

/// Maximum length of a TIPLOC.
const TIPLOC_MAX_LEN: usize = 7;

/// A TIPLOC (Timing Point Location) code.
///
/// TIPLOCs name every timing point on the network: stations, junctions,
/// sidings. They are 1-7 uppercase ASCII letters or digits. Unlike a
/// [`Crs`], every stop in a Darwin schedule has one.
///
/// # Examples
///
/// ```
/// use darwin_ingest::domain::Tiploc;
///
/// let tpl = Tiploc::parse("PADTON").unwrap();
/// assert_eq!(tpl.as_str(), "PADTON");
///
/// assert!(Tiploc::parse("padton").is_err());
/// assert!(Tiploc::parse("TOOLONGX").is_err());
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tiploc {
    bytes: [u8; TIPLOC_MAX_LEN],
    len: u8,
}

impl Tiploc {
    /// Parse a TIPLOC.
    ///
    /// Darwin pads some TIPLOCs with trailing spaces; those are trimmed.
    pub fn parse(s: &str) -> Result<Self, InvalidLocation> {
        let invalid = |reason| InvalidLocation {
            kind: "TIPLOC",
            reason,
        };
        let trimmed = s.trim_end();
        let raw = trimmed.as_bytes();

        if raw.is_empty() {
            return Err(invalid("cannot be empty"));
        }
        if raw.len() > TIPLOC_MAX_LEN {
            return Err(invalid("longer than 7 characters"));
        }
        if !raw
            .iter()
            .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit())
        {
            return Err(invalid("must be uppercase ASCII letters or digits"));
        }

        let mut bytes = [0u8; TIPLOC_MAX_LEN];
        bytes[..raw.len()].copy_from_slice(raw);
        Ok(Tiploc {
            bytes,
            len: raw.len() as u8,
        })
    }

    /// Returns the TIPLOC as a string slice.
    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.bytes[..self.len as usize]).unwrap_or_default()
    }
}

impl fmt::Debug for Tiploc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tiploc({})", self.as_str())
    }
}

impl fmt::Display for Tiploc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A 3-letter CRS (Computer Reservation System) station code.
///
/// CRS codes are always 3 uppercase ASCII letters. Darwin uses them for
/// passenger-facing data such as station messages and platform orders.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Crs([u8; 3]);

impl Crs {
    /// Parse a CRS code from exactly 3 uppercase ASCII letters.
    pub fn parse(s: &str) -> Result<Self, InvalidLocation> {
        let bytes = s.as_bytes();

        if bytes.len() != 3 {
            return Err(InvalidLocation {
                kind: "CRS",
                reason: "must be exactly 3 characters",
            });
        }
        if !bytes.iter().all(u8::is_ascii_uppercase) {
            return Err(InvalidLocation {
                kind: "CRS",
                reason: "must be uppercase ASCII letters A-Z",
            });
        }

        Ok(Crs([bytes[0], bytes[1], bytes[2]]))
    }

    /// Returns the CRS code as a string slice.
    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.0).unwrap_or_default()
    }
}

impl fmt::Debug for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Crs({})", self.as_str())
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Roundtrip: parse then as_str returns the original
        #[test]
        fn tiploc_roundtrip(s in "[A-Z0-9]{1,7}") {
            let tpl = Tiploc::parse(&s).unwrap();
            prop_assert_eq!(tpl.as_str(), s.as_str());
        }

        /// Lowercase letters are always rejected
        #[test]
        fn lowercase_tiploc_rejected(s in "[a-z]{1,7}") {
            prop_assert!(Tiploc::parse(&s).is_err());
        }

        #[test]
        fn crs_roundtrip(s in "[A-Z]{3}") {
            let crs = Crs::parse(&s).unwrap();
            prop_assert_eq!(crs.as_str(), s.as_str());
        }
    }
}
