//! Unit tests for message interpretation against the memory store.

use super::*;
use crate::files::LocalFileStore;
use crate::store::{MemoryStore, ReasonKind};
use chrono::{TimeZone, Utc};

macro_rules! sample {
    ($name:literal) => {
        include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/data/samples/", $name))
    };
}

fn envelope(message_id: &str, sequence: u64, offset: i64, xml: &str) -> Envelope {
    let capsule = serde_json::json!({
        "messageID": message_id,
        "properties": {"PushPortSequence": {"string": sequence.to_string()}},
        "bytes": xml,
    });
    Envelope {
        key: None,
        value: capsule.to_string().into_bytes(),
        partition: 0,
        offset,
    }
}

fn interpreter() -> Interpreter<MemoryStore> {
    Interpreter::new(MemoryStore::new())
}

/// A uR with five update kinds, mapped in this order: a new schedule, a
/// deactivation of the stored sample schedule, a forecast for a service
/// nobody knows, a service loading and an alarm.
const FIVE_KINDS_THIRD_FAILS: &str = r#"<Pport ts="2024-03-12T08:41:00Z" version="16.0"><uR>
<alarm><set id="21"><tdFeedFail/></set></alarm>
<serviceLoading rid="202403128712345" tpl="RDNGSTN" wta="08:40" wtd="08:42"><loadingPercentage>45</loadingPercentage></serviceLoading>
<TS rid="202403120000001" uid="C12345" ssd="2024-03-12"><Location tpl="RDNGSTN" wta="08:40" wtd="08:42"><arr et="08:41"/></Location></TS>
<deactivated rid="202403128712345"/>
<schedule rid="202403127654321" uid="W54321" trainId="2Z99" ssd="2024-03-12" toc="SW"><OR tpl="WATRLMN" wtd="23:50"/><DT tpl="WOKING" wta="00:25:30"/></schedule>
</uR></Pport>"#;

/// Collects formatted log output.
#[derive(Clone, Default)]
struct LogBuffer(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

impl LogBuffer {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl std::io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn stores_schedule_and_logs_message() {
    let interpreter = interpreter();
    let outcome = interpreter
        .process(&envelope("ID:1", 100, 7, sample!("schedule.xml")))
        .await
        .unwrap();
    assert_eq!(
        outcome,
        Outcome::Stored {
            message_id: "ID:1".into(),
            writes: 1
        }
    );

    let state = interpreter.store().snapshot();
    let rid = crate::domain::Rid::parse("202403128712345").unwrap();
    assert_eq!(state.stops[&rid].len(), 6);
    assert_eq!(state.schedules[&rid].message_id, "ID:1");

    let message = &state.messages[0];
    assert_eq!(message.sequence, 100);
    assert_eq!(message.offset, 7);
    assert_eq!(message.kind, "update");
}

#[tokio::test]
async fn redelivered_message_is_skipped() {
    let interpreter = interpreter();
    let message = envelope("ID:1", 100, 7, sample!("schedule.xml"));

    interpreter.process(&message).await.unwrap();
    let again = interpreter.process(&message).await.unwrap();

    assert_eq!(
        again,
        Outcome::Duplicate {
            message_id: "ID:1".into()
        }
    );
    assert_eq!(interpreter.store().snapshot().messages.len(), 1);
}

#[tokio::test]
async fn forecast_uses_stored_schedule() {
    let interpreter = interpreter();
    interpreter
        .process(&envelope("ID:1", 1, 0, sample!("schedule.xml")))
        .await
        .unwrap();
    interpreter
        .process(&envelope("ID:2", 2, 1, sample!("forecast.xml")))
        .await
        .unwrap();

    let state = interpreter.store().snapshot();
    assert_eq!(state.forecasts.len(), 2);
    let reading = &state.forecasts[0];
    assert_eq!(reading.message_id, "ID:2");
    assert_eq!(reading.stop_sequence, 2);
    assert_eq!(
        reading.arrival.as_ref().unwrap().actual,
        Some(Utc.with_ymd_and_hms(2024, 3, 12, 8, 43, 0).unwrap())
    );
}

#[tokio::test]
async fn failing_mapping_persists_nothing() {
    let interpreter = interpreter();
    interpreter
        .process(&envelope("ID:1", 1, 0, sample!("schedule.xml")))
        .await
        .unwrap();

    let err = interpreter
        .process(&envelope("ID:9", 9, 3, FIVE_KINDS_THIRD_FAILS))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ProcessError::Location(MatchError::NoMatchingLocation { .. })
    ));

    let state = interpreter.store().snapshot();
    let stored = crate::domain::Rid::parse("202403128712345").unwrap();
    let new = crate::domain::Rid::parse("202403127654321").unwrap();
    assert!(!state.schedules.contains_key(&new));
    assert!(state.schedules[&stored].attributes.active);
    assert!(state.forecasts.is_empty());
    assert!(state.service_loadings.is_empty());
    assert!(state.alarms.is_empty());
    assert_eq!(state.messages.len(), 1);
    assert_eq!(interpreter.store().commits(), 1);
}

#[tokio::test]
async fn failures_are_logged_with_message_id() {
    let logs = LogBuffer::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer({
            let logs = logs.clone();
            move || logs.clone()
        })
        .with_ansi(false)
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let interpreter = interpreter();
    interpreter
        .process(&envelope("ID:3", 3, 0, "<Pport ts=\"x\" version=\"16.0\"><uR>"))
        .await
        .unwrap_err();

    let output = logs.contents();
    assert!(output.contains("message rolled back"), "{output}");
    assert!(output.contains("message_id=ID:3"), "{output}");
}

#[tokio::test]
async fn malformed_document_is_reported() {
    let interpreter = interpreter();
    let err = interpreter
        .process(&envelope("ID:3", 3, 0, "<Pport ts=\"x\" version=\"16.0\"><uR>"))
        .await
        .unwrap_err();
    assert!(matches!(err, ProcessError::MalformedDocument(_)));

    let err = interpreter
        .process(&Envelope {
            key: None,
            value: b"{}".to_vec(),
            partition: 0,
            offset: 1,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, ProcessError::Capsule(_)));
    assert!(interpreter.store().snapshot().messages.is_empty());
}

#[tokio::test]
async fn stores_every_message_keyed_kind() {
    let interpreter = interpreter();
    let outcome = interpreter
        .process(&envelope("ID:4", 4, 0, sample!("mixed_update.xml")))
        .await
        .unwrap();
    assert!(matches!(outcome, Outcome::Stored { writes: 12, .. }));

    let state = interpreter.store().snapshot();
    assert_eq!(state.message_keyed_rows(), 11);
    assert_eq!(state.alarms.len(), 3);
    assert_eq!(state.train_orders.len(), 2);
    assert!(state.alarms.iter().all(|(id, _)| id == "ID:4"));
}

#[tokio::test]
async fn status_message_is_stored() {
    let interpreter = interpreter();
    interpreter
        .process(&envelope("ID:5", 5, 0, sample!("failure.xml")))
        .await
        .unwrap();

    let state = interpreter.store().snapshot();
    assert_eq!(state.statuses.len(), 1);
    assert_eq!(state.messages[0].kind, "status");
}

#[tokio::test]
async fn timetable_notice_imports_reference_file() {
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::io::Write;

    let dir = tempfile::tempdir().unwrap();
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(sample!("reference.xml").as_bytes())
        .unwrap();
    std::fs::write(
        dir.path().join("20240312020500_ref_v3.xml.gz"),
        encoder.finish().unwrap(),
    )
    .unwrap();

    let interpreter =
        interpreter().with_files(std::sync::Arc::new(LocalFileStore::new(dir.path())));
    let outcome = interpreter
        .process(&envelope("ID:6", 6, 0, sample!("timetable_notice.xml")))
        .await
        .unwrap();
    assert!(matches!(outcome, Outcome::Stored { writes: 8, .. }));

    let state = interpreter.store().snapshot();
    assert_eq!(state.timetable_notices.len(), 1);
    assert_eq!(state.locations.len(), 3);
    assert_eq!(state.operators.len(), 2);
    assert_eq!(
        state.reasons.get(&(ReasonKind::Cancellation.as_str(), 104)).map(String::as_str),
        Some("This train has been cancelled because of a fault on this train")
    );
}

#[tokio::test]
async fn missing_reference_file_fails_the_notice() {
    let dir = tempfile::tempdir().unwrap();
    let interpreter =
        interpreter().with_files(std::sync::Arc::new(LocalFileStore::new(dir.path())));

    let err = interpreter
        .process(&envelope("ID:7", 7, 0, sample!("timetable_notice.xml")))
        .await
        .unwrap_err();
    assert!(matches!(err, ProcessError::Files(_)));
    assert!(interpreter.store().snapshot().timetable_notices.is_empty());
}

#[tokio::test]
async fn notice_without_file_store_is_still_stored() {
    let interpreter = interpreter();
    interpreter
        .process(&envelope("ID:8", 8, 0, sample!("timetable_notice.xml")))
        .await
        .unwrap();
    let state = interpreter.store().snapshot();
    assert_eq!(state.timetable_notices.len(), 1);
    assert!(state.locations.is_empty());
}

#[tokio::test]
async fn import_reference_needs_a_file_store() {
    let err = interpreter()
        .import_reference("ref.xml")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ProcessError::Files(FileStoreError::NotConfigured)
    ));
}

#[tokio::test]
async fn import_reference_from_directory() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("ref.xml"), sample!("reference.xml")).unwrap();

    let interpreter =
        interpreter().with_files(std::sync::Arc::new(LocalFileStore::new(dir.path())));
    assert_eq!(interpreter.import_reference("ref.xml").await.unwrap(), 7);
    assert_eq!(interpreter.store().snapshot().operators.len(), 2);
}
