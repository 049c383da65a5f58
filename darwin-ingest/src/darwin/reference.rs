//! Decoding of the reference data file (`PportTimetableRef`).
//!
//! Only the shared lookups are read: locations, operators, and the late
//! running and cancellation reason texts.

use tracing::warn;

use crate::domain::{Crs, Tiploc};

use super::error::DecodeError;
use super::xml::Element;

/// A location known to Darwin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocationRef {
    pub tiploc: Tiploc,
    /// Only passenger stations have a CRS code.
    pub crs: Option<Crs>,
    pub toc: Option<String>,
    pub name: String,
}

/// A train operating company.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TocRef {
    pub code: String,
    pub name: String,
    pub url: Option<String>,
}

/// A delay or cancellation reason text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReasonRef {
    pub code: u32,
    pub text: String,
}

/// The decoded reference file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReferenceData {
    pub timetable_id: Option<String>,
    pub locations: Vec<LocationRef>,
    pub operators: Vec<TocRef>,
    pub late_running_reasons: Vec<ReasonRef>,
    pub cancellation_reasons: Vec<ReasonRef>,
}

/// Decode a reference data file.
///
/// Locations with an unusable TIPLOC or CRS are skipped with a warning
/// rather than failing the whole import.
pub fn decode_reference(bytes: &[u8]) -> Result<ReferenceData, DecodeError> {
    let root = Element::parse(bytes)?;
    if root.name != "PportTimetableRef" {
        return Err(DecodeError::Structure(format!(
            "expected <PportTimetableRef>, found <{}>",
            root.name
        )));
    }

    let mut data = ReferenceData {
        timetable_id: root.string_attr("timetableId"),
        ..ReferenceData::default()
    };

    for child in root.children() {
        match child.name.as_str() {
            "LocationRef" => match location(child) {
                Ok(location) => data.locations.push(location),
                Err(e) => warn!(error = %e, "skipping reference location"),
            },
            "TocRef" => data.operators.push(TocRef {
                code: child.required_attr("toc")?.to_string(),
                name: child.required_attr("tocname")?.to_string(),
                url: child.string_attr("url"),
            }),
            "LateRunningReasons" => data.late_running_reasons = reasons(child)?,
            "CancellationReasons" => data.cancellation_reasons = reasons(child)?,
            _ => {}
        }
    }

    Ok(data)
}

fn location(e: &Element) -> Result<LocationRef, DecodeError> {
    let tiploc = e.parse_required("tpl", Tiploc::parse)?;
    Ok(LocationRef {
        crs: e.parse_attr("crs", Crs::parse)?,
        toc: e.string_attr("toc"),
        name: e
            .string_attr("locname")
            .unwrap_or_else(|| tiploc.to_string()),
        tiploc,
    })
}

fn reasons(e: &Element) -> Result<Vec<ReasonRef>, DecodeError> {
    e.children_named("Reason")
        .map(|reason| -> Result<ReasonRef, DecodeError> {
            Ok(ReasonRef {
                code: reason.parse_required("code", str::parse::<u32>)?,
                text: reason.required_attr("reasontext")?.to_string(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_reference_sample() {
        let bytes = include_bytes!(concat!(
            env!("CARGO_MANIFEST_DIR"),
            "/data/samples/reference.xml"
        ));
        let data = decode_reference(bytes).unwrap();

        assert_eq!(data.timetable_id.as_deref(), Some("20240312020500"));
        assert_eq!(data.locations.len(), 3);
        assert_eq!(data.locations[0].crs.map(|c| c.to_string()), Some("PAD".into()));
        assert_eq!(data.locations[0].name, "London Paddington");
        assert_eq!(data.locations[2].crs, None);

        assert_eq!(data.operators.len(), 2);
        assert_eq!(data.operators[1].url, None);

        assert_eq!(data.late_running_reasons[0].code, 501);
        assert_eq!(data.cancellation_reasons[0].code, 104);
    }

    #[test]
    fn skips_bad_locations() {
        let xml = br#"<PportTimetableRef>
            <LocationRef tpl="lower" locname="Bad"/>
            <LocationRef tpl="GOOD" crs="GD" locname="Bad CRS"/>
            <LocationRef tpl="FINE" locname="Fine"/>
        </PportTimetableRef>"#;
        let data = decode_reference(xml).unwrap();
        assert_eq!(data.locations.len(), 1);
        assert_eq!(data.locations[0].tiploc.as_str(), "FINE");
    }

    #[test]
    fn rejects_other_documents() {
        assert!(matches!(
            decode_reference(b"<Pport/>"),
            Err(DecodeError::Structure(_))
        ));
    }
}
