//! Train run identifiers.

use std::fmt;

/// Error returned when parsing an invalid RID or UID.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {kind}: {reason}")]
pub struct InvalidIdentifier {
    kind: &'static str,
    reason: &'static str,
}

/// Maximum length of a Darwin RID.
const RID_MAX_LEN: usize = 16;

/// Length of a schedule UID.
const UID_LEN: usize = 6;

/// A Darwin run identifier (RID).
///
/// RIDs identify one train's one run on one day and are stable for the life
/// of that run. They are up to 16 ASCII alphanumeric characters; in practice
/// a date prefix followed by a serial.
///
/// # Examples
///
/// ```
/// use darwin_ingest::domain::Rid;
///
/// let rid = Rid::parse("202401158012345").unwrap();
/// assert_eq!(rid.as_str(), "202401158012345");
///
/// assert!(Rid::parse("").is_err());
/// assert!(Rid::parse("20240115801234567").is_err());
/// ```
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Rid(String);

impl Rid {
    /// Parse a RID, rejecting empty, over-long or non-alphanumeric input.
    pub fn parse(s: &str) -> Result<Self, InvalidIdentifier> {
        let invalid = |reason| InvalidIdentifier { kind: "RID", reason };

        if s.is_empty() {
            return Err(invalid("cannot be empty"));
        }
        if s.len() > RID_MAX_LEN {
            return Err(invalid("longer than 16 characters"));
        }
        if !s.bytes().all(|b| b.is_ascii_alphanumeric()) {
            return Err(invalid("must be ASCII alphanumeric"));
        }

        Ok(Rid(s.to_string()))
    }

    /// Returns the RID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Rid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Rid({})", self.0)
    }
}

impl fmt::Display for Rid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A schedule UID.
///
/// Six ASCII alphanumeric characters identifying a scheduled route. Unlike a
/// [`Rid`], a UID is reused on every day the route runs.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Uid([u8; UID_LEN]);

impl Uid {
    /// Parse a UID from exactly six ASCII alphanumeric characters.
    pub fn parse(s: &str) -> Result<Self, InvalidIdentifier> {
        let invalid = |reason| InvalidIdentifier { kind: "UID", reason };
        let bytes = s.as_bytes();

        if bytes.len() != UID_LEN {
            return Err(invalid("must be exactly 6 characters"));
        }
        if !bytes.iter().all(u8::is_ascii_alphanumeric) {
            return Err(invalid("must be ASCII alphanumeric"));
        }

        let mut buf = [0u8; UID_LEN];
        buf.copy_from_slice(bytes);
        Ok(Uid(buf))
    }

    /// Returns the UID as a string slice.
    pub fn as_str(&self) -> &str {
        // Only ASCII alphanumerics are ever stored.
        std::str::from_utf8(&self.0).unwrap_or_default()
    }
}

impl fmt::Debug for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Uid({})", self.as_str())
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
