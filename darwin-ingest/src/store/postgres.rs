//! PostgreSQL store.
//!
//! Tables are created by `schema.sql` at the crate root. Message-keyed rows
//! use `ON CONFLICT DO NOTHING`, so replaying a message is harmless even
//! without the message log.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::{Postgres, Row};

use crate::darwin::{
    Alarm, AlarmFailure, Association, DisruptionReason, FormationLoading, HeadcodeChange,
    LocationRef, ReasonRef, ScheduleFormations, ServiceLoading, StationMessage, StatusUpdate,
    StopKind, TimeSignature, TimetableNotice, TocRef, TrainAlert, TrainOrder, TrainOrderAction,
    TrainOrderItem,
};
use crate::domain::{Rid, Tiploc};

use super::keys;
use super::records::{ForecastRecord, MessageRecord, PhaseRecord, ScheduleRecord, StopRecord};
use super::{
    AssociationRepository, FormationRepository, ForecastRepository, MessageLog, NoticeRepository,
    ReasonKind, ReferenceRepository, ScheduleRepository, Store, StoreError, Transaction,
};

/// A store backed by a PostgreSQL connection pool.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Store for PgStore {
    type Tx = PgTransaction;

    async fn begin(&self) -> Result<PgTransaction, StoreError> {
        Ok(PgTransaction {
            tx: self.pool.begin().await?,
        })
    }
}

/// An open PostgreSQL transaction.
pub struct PgTransaction {
    tx: sqlx::Transaction<'static, Postgres>,
}

#[async_trait]
impl Transaction for PgTransaction {
    async fn commit(self) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self) -> Result<(), StoreError> {
        self.tx.rollback().await?;
        Ok(())
    }
}

fn corrupt(what: &str, e: impl ToString) -> StoreError {
    StoreError::Corrupt(format!("{what}: {}", e.to_string()))
}

/// Postgres has no unsigned integers.
fn to_i64(value: u64) -> Result<i64, StoreError> {
    i64::try_from(value).map_err(|e| corrupt("value out of range", e))
}

fn reason_columns(reason: Option<&DisruptionReason>) -> (Option<i64>, Option<String>, bool) {
    match reason {
        Some(r) => (
            Some(i64::from(r.code)),
            r.tiploc.map(|t| t.to_string()),
            r.near,
        ),
        None => (None, None, false),
    }
}

fn signature_json(signature: &TimeSignature) -> serde_json::Value {
    let text = |t: Option<crate::domain::TrainTime>| t.map(|t| t.to_string());
    json!({
        "wta": text(signature.working_arrival),
        "wtd": text(signature.working_departure),
        "wtp": text(signature.working_passing),
        "pta": text(signature.public_arrival),
        "ptd": text(signature.public_departure),
    })
}

fn stop_from_row(row: &PgRow) -> Result<StopRecord, StoreError> {
    let rid: String = row.try_get("rid")?;
    let kind: String = row.try_get("kind")?;
    let tiploc: String = row.try_get("tiploc")?;
    let false_destination: Option<String> = row.try_get("false_destination")?;
    let reason_code: Option<i64> = row.try_get("cancel_reason")?;
    let reason_tiploc: Option<String> = row.try_get("cancel_reason_tiploc")?;

    let cancel_reason = match reason_code {
        Some(code) => Some(DisruptionReason {
            code: u32::try_from(code).map_err(|e| corrupt("cancel reason", e))?,
            tiploc: reason_tiploc
                .as_deref()
                .map(Tiploc::parse)
                .transpose()
                .map_err(|e| corrupt("cancel reason tiploc", e))?,
            near: row.try_get("cancel_reason_near")?,
        }),
        None => None,
    };

    Ok(StopRecord {
        rid: Rid::parse(&rid).map_err(|e| corrupt("rid", e))?,
        sequence: row.try_get("sequence")?,
        kind: StopKind::from_tag(&kind).ok_or_else(|| corrupt("stop kind", &kind))?,
        tiploc: Tiploc::parse(&tiploc).map_err(|e| corrupt("tiploc", e))?,
        working_arrival: row.try_get("wta")?,
        working_departure: row.try_get("wtd")?,
        working_passing: row.try_get("wtp")?,
        public_arrival: row.try_get("pta")?,
        public_departure: row.try_get("ptd")?,
        activities: row.try_get("activities")?,
        planned_activities: row.try_get("planned_activities")?,
        cancelled: row.try_get("cancelled")?,
        cancel_reason,
        platform: row.try_get("platform")?,
        formation_id: row.try_get("formation_id")?,
        effective_formation_id: row.try_get("effective_formation_id")?,
        route_delay: row.try_get("route_delay")?,
        false_destination: false_destination
            .as_deref()
            .map(Tiploc::parse)
            .transpose()
            .map_err(|e| corrupt("false destination", e))?,
    })
}

#[async_trait]
impl ScheduleRepository for PgTransaction {
    async fn stops_at(
        &mut self,
        rid: &Rid,
        tiploc: Tiploc,
    ) -> Result<Vec<StopRecord>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT rid, sequence, kind, tiploc, wta, wtd, wtp, pta, ptd,
                   activities, planned_activities, cancelled,
                   cancel_reason, cancel_reason_tiploc, cancel_reason_near,
                   platform, formation_id, effective_formation_id,
                   route_delay, false_destination
            FROM stop
            WHERE rid = $1 AND tiploc = $2
            ORDER BY sequence
            "#,
        )
        .bind(rid.as_str())
        .bind(tiploc.as_str())
        .fetch_all(&mut *self.tx)
        .await?;

        rows.iter().map(stop_from_row).collect()
    }

    async fn replace_schedule(
        &mut self,
        schedule: &ScheduleRecord,
        stops: &[StopRecord],
    ) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM stop WHERE rid = $1")
            .bind(schedule.rid.as_str())
            .execute(&mut *self.tx)
            .await?;

        let (reason, reason_tiploc, reason_near) = reason_columns(schedule.cancel_reason.as_ref());
        let attrs = &schedule.attributes;
        sqlx::query(
            r#"
            INSERT INTO schedule (rid, uid, ssd, headcode, rsid, toc, status, category,
                                  passenger, active, deleted, charter,
                                  cancel_reason, cancel_reason_tiploc, cancel_reason_near,
                                  message_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            ON CONFLICT (rid) DO UPDATE SET
                uid = EXCLUDED.uid, ssd = EXCLUDED.ssd, headcode = EXCLUDED.headcode,
                rsid = EXCLUDED.rsid, toc = EXCLUDED.toc, status = EXCLUDED.status,
                category = EXCLUDED.category, passenger = EXCLUDED.passenger,
                active = EXCLUDED.active, deleted = EXCLUDED.deleted,
                charter = EXCLUDED.charter, cancel_reason = EXCLUDED.cancel_reason,
                cancel_reason_tiploc = EXCLUDED.cancel_reason_tiploc,
                cancel_reason_near = EXCLUDED.cancel_reason_near,
                message_id = EXCLUDED.message_id
            "#,
        )
        .bind(schedule.rid.as_str())
        .bind(schedule.uid.as_str())
        .bind(schedule.ssd)
        .bind(&schedule.headcode)
        .bind(&schedule.rsid)
        .bind(&schedule.toc)
        .bind(&attrs.status)
        .bind(&attrs.category)
        .bind(attrs.passenger)
        .bind(attrs.active)
        .bind(attrs.deleted)
        .bind(attrs.charter)
        .bind(reason)
        .bind(reason_tiploc)
        .bind(reason_near)
        .bind(&schedule.message_id)
        .execute(&mut *self.tx)
        .await?;

        for stop in stops {
            let (reason, reason_tiploc, reason_near) = reason_columns(stop.cancel_reason.as_ref());
            sqlx::query(
                r#"
                INSERT INTO stop (rid, sequence, kind, tiploc, wta, wtd, wtp, pta, ptd,
                                  activities, planned_activities, cancelled,
                                  cancel_reason, cancel_reason_tiploc, cancel_reason_near,
                                  platform, formation_id, effective_formation_id,
                                  route_delay, false_destination)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15,
                        $16, $17, $18, $19, $20)
                "#,
            )
            .bind(stop.rid.as_str())
            .bind(stop.sequence)
            .bind(stop.kind.tag())
            .bind(stop.tiploc.as_str())
            .bind(stop.working_arrival)
            .bind(stop.working_departure)
            .bind(stop.working_passing)
            .bind(stop.public_arrival)
            .bind(stop.public_departure)
            .bind(&stop.activities)
            .bind(&stop.planned_activities)
            .bind(stop.cancelled)
            .bind(reason)
            .bind(reason_tiploc)
            .bind(reason_near)
            .bind(&stop.platform)
            .bind(&stop.formation_id)
            .bind(&stop.effective_formation_id)
            .bind(stop.route_delay)
            .bind(stop.false_destination.map(|t| t.to_string()))
            .execute(&mut *self.tx)
            .await?;
        }

        Ok(())
    }

    async fn deactivate_schedule(&mut self, rid: &Rid) -> Result<(), StoreError> {
        sqlx::query("UPDATE schedule SET active = false WHERE rid = $1")
            .bind(rid.as_str())
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }
}

impl PgTransaction {
    async fn insert_phase(
        &mut self,
        forecast: &ForecastRecord,
        phase: &'static str,
        record: &PhaseRecord,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO forecast_phase (message_id, rid, stop_sequence, phase,
                                        estimated, working_estimated, actual, estimated_minimum,
                                        actual_removed, unknown_delay, delayed,
                                        source, source_instance)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(&forecast.message_id)
        .bind(forecast.rid.as_str())
        .bind(forecast.stop_sequence)
        .bind(phase)
        .bind(record.estimated)
        .bind(record.working_estimated)
        .bind(record.actual)
        .bind(record.estimated_minimum)
        .bind(record.actual_removed)
        .bind(record.unknown_delay)
        .bind(record.delayed)
        .bind(&record.source)
        .bind(&record.source_instance)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    /// Insert one message-keyed row whose detail is held as JSON.
    async fn insert_keyed(
        &mut self,
        table: &'static str,
        message_id: &str,
        key: &str,
        detail: serde_json::Value,
    ) -> Result<(), StoreError> {
        // `table` is always one of the fixed names below.
        let sql = format!(
            "INSERT INTO {table} (message_id, item_key, detail) \
             VALUES ($1, $2, $3::jsonb) ON CONFLICT DO NOTHING"
        );
        sqlx::query(&sql)
            .bind(message_id)
            .bind(key)
            .bind(detail.to_string())
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ForecastRepository for PgTransaction {
    async fn insert_forecast(&mut self, forecast: &ForecastRecord) -> Result<(), StoreError> {
        let (reason, reason_tiploc, reason_near) = reason_columns(forecast.late_reason.as_ref());
        let platform = forecast.platform.as_ref();
        sqlx::query(
            r#"
            INSERT INTO forecast (message_id, rid, stop_sequence, tiploc,
                                  platform, platform_suppressed, platform_cis_suppressed,
                                  platform_source, platform_confirmed,
                                  suppressed, length, detach_front, reverse_formation,
                                  late_reason, late_reason_tiploc, late_reason_near)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(&forecast.message_id)
        .bind(forecast.rid.as_str())
        .bind(forecast.stop_sequence)
        .bind(forecast.tiploc.as_str())
        .bind(platform.map(|p| p.platform.clone()))
        .bind(platform.map(|p| p.suppressed))
        .bind(platform.map(|p| p.cis_suppressed))
        .bind(platform.map(|p| p.source.clone()))
        .bind(platform.map(|p| p.confirmed))
        .bind(forecast.suppressed)
        .bind(i64::from(forecast.length))
        .bind(forecast.detach_front)
        .bind(forecast.reverse_formation)
        .bind(reason)
        .bind(reason_tiploc)
        .bind(reason_near)
        .execute(&mut *self.tx)
        .await?;

        let phases = [
            ("arr", &forecast.arrival),
            ("dep", &forecast.departure),
            ("pass", &forecast.passing),
        ];
        for (phase, record) in phases {
            if let Some(record) = record {
                self.insert_phase(forecast, phase, record).await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl AssociationRepository for PgTransaction {
    async fn insert_association(
        &mut self,
        message_id: &str,
        association: &Association,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO association (message_id, item_key, tiploc, category, cancelled,
                                     deleted, main_rid, main_times, assoc_rid, assoc_times)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8::jsonb, $9, $10::jsonb)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(message_id)
        .bind(keys::association(association))
        .bind(association.tiploc.as_str())
        .bind(&association.category)
        .bind(association.cancelled)
        .bind(association.deleted)
        .bind(association.main.rid.as_str())
        .bind(signature_json(&association.main.signature).to_string())
        .bind(association.associated.rid.as_str())
        .bind(signature_json(&association.associated.signature).to_string())
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl FormationRepository for PgTransaction {
    async fn insert_formations(
        &mut self,
        message_id: &str,
        formations: &ScheduleFormations,
    ) -> Result<(), StoreError> {
        for formation in &formations.formations {
            let coaches: Vec<_> = formation
                .coaches
                .iter()
                .map(|c| {
                    json!({
                        "number": c.number,
                        "class": c.class,
                        "toilet": c.toilet.kind,
                        "toilet_status": c.toilet.status.as_str(),
                    })
                })
                .collect();
            let detail = json!({
                "rid": formations.rid.as_str(),
                "source": formation.source,
                "source_instance": formation.source_instance,
                "coaches": coaches,
            });
            self.insert_keyed("formation", message_id, &keys::formation(formation), detail)
                .await?;
        }
        Ok(())
    }

    async fn insert_service_loading(
        &mut self,
        message_id: &str,
        loading: &ServiceLoading,
    ) -> Result<(), StoreError> {
        let detail = json!({
            "tiploc": loading.tiploc.as_str(),
            "times": signature_json(&loading.signature),
            "category": loading.category.as_ref().map(|c| json!({
                "value": c.value, "type": c.kind, "source": c.source,
            })),
            "percentage": loading.percentage.as_ref().map(|p| json!({
                "value": p.value, "type": p.kind, "source": p.source,
            })),
        });
        let key = keys::service_loading(loading);
        self.insert_keyed("service_loading", message_id, &key, detail)
            .await
    }

    async fn insert_formation_loading(
        &mut self,
        message_id: &str,
        loading: &FormationLoading,
    ) -> Result<(), StoreError> {
        let coaches: Vec<_> = loading
            .coaches
            .iter()
            .map(|c| json!({ "coach": c.coach, "percentage": c.percentage, "source": c.source }))
            .collect();
        let detail = json!({
            "rid": loading.rid.as_str(),
            "tiploc": loading.tiploc.as_str(),
            "times": signature_json(&loading.signature),
            "coaches": coaches,
        });
        let key = keys::formation_loading(loading);
        self.insert_keyed("formation_loading", message_id, &key, detail)
            .await
    }
}

fn order_item_json(item: &TrainOrderItem) -> serde_json::Value {
    match item {
        TrainOrderItem::Service { rid, signature } => {
            json!({ "rid": rid.as_str(), "times": signature_json(signature) })
        }
        TrainOrderItem::Headcode(headcode) => json!({ "train_id": headcode }),
    }
}

#[async_trait]
impl NoticeRepository for PgTransaction {
    async fn insert_station_message(
        &mut self,
        message_id: &str,
        message: &StationMessage,
    ) -> Result<(), StoreError> {
        let stations: Vec<&str> = message.stations.iter().map(|c| c.as_str()).collect();
        let detail = json!({
            "category": message.category,
            "severity": message.severity,
            "suppress": message.suppress,
            "stations": stations,
            "text": message.text,
        });
        let key = keys::station_message(message);
        self.insert_keyed("station_message", message_id, &key, detail)
            .await
    }

    async fn insert_train_order(
        &mut self,
        message_id: &str,
        position: usize,
        order: &TrainOrder,
    ) -> Result<(), StoreError> {
        let action = match &order.action {
            TrainOrderAction::Set(set) => json!({
                "set": {
                    "first": order_item_json(&set.first),
                    "second": set.second.as_ref().map(order_item_json),
                    "third": set.third.as_ref().map(order_item_json),
                }
            }),
            TrainOrderAction::Clear => json!("clear"),
        };
        let detail = json!({
            "crs": order.crs.as_str(),
            "platform": order.platform,
            "action": action,
        });
        let key = keys::train_order(order, position);
        self.insert_keyed("train_order", message_id, &key, detail)
            .await
    }

    async fn insert_train_alert(
        &mut self,
        message_id: &str,
        alert: &TrainAlert,
    ) -> Result<(), StoreError> {
        let services: Vec<_> = alert
            .services
            .iter()
            .map(|s| {
                let locations: Vec<&str> = s.locations.iter().map(|t| t.as_str()).collect();
                json!({
                    "rid": s.rid.as_str(),
                    "uid": s.uid.as_str(),
                    "ssd": s.ssd.to_string(),
                    "locations": locations,
                })
            })
            .collect();
        let detail = json!({
            "services": services,
            "sms": alert.send_by_sms,
            "email": alert.send_by_email,
            "twitter": alert.send_by_twitter,
            "source": alert.source,
            "text": alert.text,
            "audience": alert.audience,
            "type": alert.kind,
        });
        self.insert_keyed("train_alert", message_id, &keys::train_alert(alert), detail)
            .await
    }

    async fn insert_headcode_change(
        &mut self,
        message_id: &str,
        position: usize,
        change: &HeadcodeChange,
    ) -> Result<(), StoreError> {
        let detail = json!({
            "berth_area": change.berth_area,
            "berth": change.berth,
            "incorrect": change.incorrect_headcode,
            "correct": change.correct_headcode,
        });
        let key = keys::headcode_change(change, position);
        self.insert_keyed("headcode_change", message_id, &key, detail)
            .await
    }

    async fn insert_alarm(&mut self, message_id: &str, alarm: &Alarm) -> Result<(), StoreError> {
        let detail = match alarm {
            Alarm::Set { failure, .. } => match failure {
                AlarmFailure::TdArea(area) => json!({ "set": "td_area", "area": area }),
                AlarmFailure::TdFeed => json!({ "set": "td_feed" }),
                AlarmFailure::TyrellFeed => json!({ "set": "tyrell_feed" }),
            },
            Alarm::Clear { .. } => json!({ "clear": true }),
        };
        self.insert_keyed("alarm", message_id, &keys::alarm(alarm), detail)
            .await
    }

    async fn insert_timetable_notice(
        &mut self,
        message_id: &str,
        notice: &TimetableNotice,
    ) -> Result<(), StoreError> {
        let detail = json!({
            "timetable_file": notice.timetable_file,
            "reference_file": notice.reference_file,
        });
        let key = keys::timetable_notice(notice);
        self.insert_keyed("timetable_notice", message_id, &key, detail)
            .await
    }

    async fn insert_status(
        &mut self,
        message_id: &str,
        status: &StatusUpdate,
    ) -> Result<(), StoreError> {
        let detail = json!({
            "code": status.code,
            "request_source": status.request_source,
            "request_id": status.request_id,
            "text": status.text,
        });
        let key = keys::status(status);
        self.insert_keyed("status_update", message_id, &key, detail)
            .await
    }
}

#[async_trait]
impl ReferenceRepository for PgTransaction {
    async fn upsert_location(&mut self, location: &LocationRef) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO location (tiploc, crs, toc, name) VALUES ($1, $2, $3, $4)
            ON CONFLICT (tiploc) DO UPDATE
                SET crs = EXCLUDED.crs, toc = EXCLUDED.toc, name = EXCLUDED.name
            "#,
        )
        .bind(location.tiploc.as_str())
        .bind(location.crs.map(|c| c.to_string()))
        .bind(&location.toc)
        .bind(&location.name)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn upsert_operator(&mut self, operator: &TocRef) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO operator (toc, name, url) VALUES ($1, $2, $3)
            ON CONFLICT (toc) DO UPDATE SET name = EXCLUDED.name, url = EXCLUDED.url
            "#,
        )
        .bind(&operator.code)
        .bind(&operator.name)
        .bind(&operator.url)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn upsert_reason(
        &mut self,
        kind: ReasonKind,
        reason: &ReasonRef,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO reason (kind, code, text) VALUES ($1, $2, $3)
            ON CONFLICT (kind, code) DO UPDATE SET text = EXCLUDED.text
            "#,
        )
        .bind(kind.as_str())
        .bind(i64::from(reason.code))
        .bind(&reason.text)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl MessageLog for PgTransaction {
    async fn message_seen(&mut self, message_id: &str) -> Result<bool, StoreError> {
        let seen: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM message WHERE message_id = $1)")
                .bind(message_id)
                .fetch_one(&mut *self.tx)
                .await?;
        Ok(seen)
    }

    async fn record_message(&mut self, message: &MessageRecord) -> Result<(), StoreError> {
        let timestamp: DateTime<Utc> = message.timestamp.with_timezone(&Utc);
        sqlx::query(
            r#"
            INSERT INTO message (message_id, sequence, partition, "offset", created_at, kind)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(&message.message_id)
        .bind(to_i64(message.sequence)?)
        .bind(message.partition)
        .bind(message.offset)
        .bind(timestamp)
        .bind(&message.kind)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }
}
