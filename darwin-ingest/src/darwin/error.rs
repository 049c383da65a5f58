//! Decoder error types.

/// Errors from decoding a Push Port payload.
///
/// Every variant means the document is malformed: the message cannot be
/// processed and its offset is not committed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// The payload is not well-formed XML.
    #[error("XML syntax error: {0}")]
    Syntax(String),

    /// A mandatory attribute is missing.
    #[error("<{element}> is missing attribute {attribute}")]
    MissingAttribute {
        element: String,
        attribute: &'static str,
    },

    /// A mandatory child element is missing.
    #[error("<{element}> is missing child <{child}>")]
    MissingElement {
        element: String,
        child: &'static str,
    },

    /// An attribute or element value could not be parsed.
    #[error("<{element}> has invalid {field} {value:?}: {reason}")]
    InvalidValue {
        element: String,
        field: &'static str,
        value: String,
        reason: String,
    },

    /// Zero or several members of an exactly-one group are present.
    #[error("<{element}> must contain exactly one of {expected}, found {found}")]
    Choice {
        element: String,
        expected: &'static str,
        found: usize,
    },

    /// The document violates a structural rule.
    #[error("malformed document: {0}")]
    Structure(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = DecodeError::MissingAttribute {
            element: "schedule".into(),
            attribute: "rid",
        };
        assert_eq!(err.to_string(), "<schedule> is missing attribute rid");

        let err = DecodeError::Choice {
            element: "alarm".into(),
            expected: "set, clear",
            found: 2,
        };
        assert_eq!(
            err.to_string(),
            "<alarm> must contain exactly one of set, clear, found 2"
        );

        let err = DecodeError::InvalidValue {
            element: "IP".into(),
            field: "wta",
            value: "25:00".into(),
            reason: "hour must be 0-23".into(),
        };
        assert!(err.to_string().contains("\"25:00\""));
    }
}
