//! The JSON capsule each feed message arrives in.

use serde::Deserialize;

/// Error parsing a message capsule.
#[derive(Debug, thiserror::Error)]
pub enum CapsuleError {
    #[error("invalid capsule JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid PushPortSequence {0:?}")]
    InvalidSequence(String),
}

/// A feed message: identifiers plus the embedded Push Port XML.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageCapsule {
    /// Globally unique per feed instance.
    pub message_id: String,
    pub sequence: u64,
    /// The Push Port document, as XML text.
    pub payload: String,
}

#[derive(Deserialize)]
struct RawCapsule {
    #[serde(rename = "messageID")]
    message_id: String,
    properties: RawProperties,
    bytes: String,
}

#[derive(Deserialize)]
struct RawProperties {
    #[serde(rename = "PushPortSequence")]
    sequence: RawString,
}

#[derive(Deserialize)]
struct RawString {
    string: String,
}

impl MessageCapsule {
    /// Parse a capsule from a message value. Unknown fields are ignored.
    ///
    /// # Examples
    ///
    /// ```
    /// use darwin_ingest::darwin::MessageCapsule;
    ///
    /// let json = br#"{"messageID":"ID:1","properties":{"PushPortSequence":{"string":"42"}},"bytes":"<Pport/>"}"#;
    /// let capsule = MessageCapsule::parse(json).unwrap();
    /// assert_eq!(capsule.sequence, 42);
    /// assert_eq!(capsule.payload, "<Pport/>");
    /// ```
    pub fn parse(value: &[u8]) -> Result<Self, CapsuleError> {
        let raw: RawCapsule = serde_json::from_slice(value)?;
        let sequence = raw
            .properties
            .sequence
            .string
            .trim()
            .parse::<u64>()
            .map_err(|_| CapsuleError::InvalidSequence(raw.properties.sequence.string.clone()))?;

        Ok(MessageCapsule {
            message_id: raw.message_id,
            sequence,
            payload: raw.bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_capsule_with_extra_fields() {
        let json = br#"{
            "destination": {"name": "Darwin.Push.Port", "destinationType": "TOPIC"},
            "messageID": "ID:darwin-1234",
            "type": null,
            "properties": {
                "PushPortSequence": {"string": "7340123"},
                "MessageType": {"string": "TS"}
            },
            "bytes": "<?xml version=\"1.0\"?><Pport ts=\"x\" version=\"16.0\"/>"
        }"#;

        let capsule = MessageCapsule::parse(json).unwrap();
        assert_eq!(capsule.message_id, "ID:darwin-1234");
        assert_eq!(capsule.sequence, 7_340_123);
        assert!(capsule.payload.starts_with("<?xml"));
    }

    #[test]
    fn rejects_bad_sequence() {
        let json = br#"{"messageID":"a","properties":{"PushPortSequence":{"string":"-1"}},"bytes":""}"#;
        let err = MessageCapsule::parse(json).unwrap_err();
        assert!(matches!(err, CapsuleError::InvalidSequence(ref s) if s == "-1"));
        assert_eq!(err.to_string(), "invalid PushPortSequence \"-1\"");
    }

    #[test]
    fn rejects_missing_fields() {
        let json = br#"{"messageID":"a","bytes":""}"#;
        assert!(matches!(
            MessageCapsule::parse(json),
            Err(CapsuleError::Json(_))
        ));
        assert!(MessageCapsule::parse(b"not json").is_err());
    }
}
