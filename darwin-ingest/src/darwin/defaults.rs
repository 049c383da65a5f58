//! Schema default values.
//!
//! Attributes with a schema default are plain fields. The decoder starts from
//! these `Default` values and overwrites whatever the document supplies.
//! Defaults that depend on content rather than presence (an empty activity
//! list, an empty toilet status) are fixed afterwards by [`ApplyDefaults`].

use super::types::{
    Coach, Formation, LoadingValue, PlatformInfo, PushPortDocument, Content, Response, Schedule,
    ScheduleFormations, ServiceAttributes, ServiceLoading, Stop, StopAttributes, Toilet,
    ToiletStatus,
};

/// Activity code for a stop with no activity.
pub const NO_ACTIVITY: &str = "none";

/// Loading type when none is given.
pub const TYPICAL_LOADING: &str = "Typical";

/// Platform source when none is given (planned).
pub const PLANNED_PLATFORM_SOURCE: &str = "P";

impl Default for ServiceAttributes {
    fn default() -> Self {
        ServiceAttributes {
            status: "P".to_string(),
            category: "OO".to_string(),
            passenger: true,
            active: true,
            deleted: false,
            charter: false,
        }
    }
}

impl Default for StopAttributes {
    fn default() -> Self {
        StopAttributes {
            activities: vec![NO_ACTIVITY.to_string()],
            planned_activities: Vec::new(),
            cancelled: false,
            route_delay: 0,
        }
    }
}

impl Default for PlatformInfo {
    fn default() -> Self {
        PlatformInfo {
            platform: String::new(),
            suppressed: false,
            cis_suppressed: false,
            source: PLANNED_PLATFORM_SOURCE.to_string(),
            confirmed: false,
        }
    }
}

impl Default for Toilet {
    fn default() -> Self {
        Toilet {
            kind: "Unknown".to_string(),
            status: ToiletStatus::InService,
        }
    }
}

impl<T: Default> Default for LoadingValue<T> {
    fn default() -> Self {
        LoadingValue {
            value: T::default(),
            kind: TYPICAL_LOADING.to_string(),
            source: None,
            source_instance: None,
        }
    }
}

/// Fix up defaults that depend on content rather than presence.
pub trait ApplyDefaults {
    fn apply_defaults(&mut self);
}

impl ApplyDefaults for PushPortDocument {
    fn apply_defaults(&mut self) {
        match &mut self.content {
            Content::Update(response) | Content::Snapshot(response) => response.apply_defaults(),
            Content::TimetableNotice(_) | Content::Status(_) => {}
        }
    }
}

impl ApplyDefaults for Response {
    fn apply_defaults(&mut self) {
        self.schedules.iter_mut().for_each(Schedule::apply_defaults);
        self.formations
            .iter_mut()
            .for_each(ScheduleFormations::apply_defaults);
        self.service_loadings
            .iter_mut()
            .for_each(ServiceLoading::apply_defaults);
    }
}

impl ApplyDefaults for Schedule {
    fn apply_defaults(&mut self) {
        self.stops.iter_mut().for_each(Stop::apply_defaults);
    }
}

impl ApplyDefaults for Stop {
    fn apply_defaults(&mut self) {
        let activities = &mut self.attributes.activities;
        activities.retain(|code| !code.trim().is_empty());
        if activities.is_empty() {
            activities.push(NO_ACTIVITY.to_string());
        }
    }
}

impl ApplyDefaults for ScheduleFormations {
    fn apply_defaults(&mut self) {
        self.formations.iter_mut().for_each(Formation::apply_defaults);
    }
}

impl ApplyDefaults for Formation {
    fn apply_defaults(&mut self) {
        self.coaches.iter_mut().for_each(Coach::apply_defaults);
    }
}

impl ApplyDefaults for Coach {
    fn apply_defaults(&mut self) {
        if self.toilet.kind.trim().is_empty() {
            self.toilet.kind = Toilet::default().kind;
        }
    }
}

impl ApplyDefaults for ServiceLoading {
    fn apply_defaults(&mut self) {
        if let Some(category) = &mut self.category {
            fill_loading_kind(&mut category.kind);
        }
        if let Some(percentage) = &mut self.percentage {
            fill_loading_kind(&mut percentage.kind);
        }
    }
}

fn fill_loading_kind(kind: &mut String) {
    if kind.trim().is_empty() {
        *kind = TYPICAL_LOADING.to_string();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::darwin::types::{StopKind, TimeSignature};
    use crate::domain::{Rid, Tiploc};

    fn stop(activities: &[&str]) -> Stop {
        Stop {
            kind: StopKind::Intermediate,
            tiploc: Tiploc::parse("RDNGSTN").unwrap(),
            times: TimeSignature::default(),
            attributes: StopAttributes {
                activities: activities.iter().map(|s| s.to_string()).collect(),
                ..StopAttributes::default()
            },
            platform: None,
            formation_id: None,
            false_destination: None,
        }
    }

    #[test]
    fn service_attribute_defaults() {
        let attrs = ServiceAttributes::default();
        assert_eq!(attrs.status, "P");
        assert_eq!(attrs.category, "OO");
        assert!(attrs.passenger);
        assert!(attrs.active);
        assert!(!attrs.deleted);
        assert!(!attrs.charter);
    }

    #[test]
    fn empty_activities_become_none() {
        let mut s = stop(&[]);
        s.apply_defaults();
        assert_eq!(s.attributes.activities, vec!["none"]);

        let mut s = stop(&["  "]);
        s.apply_defaults();
        assert_eq!(s.attributes.activities, vec!["none"]);

        let mut s = stop(&["T", "RM"]);
        s.apply_defaults();
        assert_eq!(s.attributes.activities, vec!["T", "RM"]);
    }

    #[test]
    fn empty_toilet_and_loading_kinds_filled() {
        let mut coach = Coach {
            number: "A".into(),
            class: None,
            toilet: Toilet {
                kind: String::new(),
                status: ToiletStatus::NotInService,
            },
        };
        coach.apply_defaults();
        assert_eq!(coach.toilet.kind, "Unknown");
        assert_eq!(coach.toilet.status, ToiletStatus::NotInService);

        let mut loading = ServiceLoading {
            rid: Rid::parse("202401018712345").unwrap(),
            tiploc: Tiploc::parse("RDNGSTN").unwrap(),
            signature: TimeSignature::default(),
            category: None,
            percentage: Some(LoadingValue {
                value: 40,
                kind: String::new(),
                source: None,
                source_instance: None,
            }),
        };
        loading.apply_defaults();
        assert_eq!(loading.percentage.unwrap().kind, "Typical");
    }

    #[test]
    fn platform_defaults() {
        let platform = PlatformInfo::default();
        assert_eq!(platform.source, "P");
        assert!(!platform.confirmed);
        assert!(!platform.suppressed);
    }
}
