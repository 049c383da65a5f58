//! Darwin Push Port wire format.
//!
//! Each feed message is a JSON capsule wrapping one XML `Pport` document.
//! This module turns those bytes into typed values and knows nothing about
//! storage.
//!
//! Key characteristics of the Push Port schema:
//! - Almost every attribute is optional, many with documented defaults
//! - Namespace prefixes differ between schema versions, so elements are
//!   matched by local name
//! - Times are "HH:MM" or "HH:MM:SS" in UK local time, with no date

mod capsule;
pub mod defaults;
mod decode;
mod error;
mod reference;
mod types;
mod xml;

pub use capsule::{CapsuleError, MessageCapsule};
pub use decode::decode;
pub use error::DecodeError;
pub use reference::{LocationRef, ReasonRef, ReferenceData, TocRef, decode_reference};
pub use types::{
    Alarm, AlarmFailure, AlertService, AssociatedService, Association, Coach, CoachLoading,
    Content, Deactivation, DisruptionReason, ForecastLocation, Formation, FormationLoading,
    HeadcodeChange, LoadingValue, PhaseForecast, PlatformInfo, PushPortDocument, Response,
    Schedule, ScheduleFormations, ServiceAttributes, ServiceLoading, StationMessage,
    StatusUpdate, Stop, StopAttributes, StopKind, TimeSignature, TimetableNotice, Toilet,
    ToiletStatus, TrainAlert, TrainOrder, TrainOrderAction, TrainOrderItem, TrainOrderSet,
    TrainStatus, UpdateOrigin,
};
