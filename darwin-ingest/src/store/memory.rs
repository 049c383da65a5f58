//! In-memory store.
//!
//! Writes are staged in the transaction and applied to the shared state
//! under one lock on commit, so a failed or dropped transaction leaves no
//! trace. Reads see committed state only.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use crate::darwin::{
    Alarm, Association, FormationLoading, HeadcodeChange, LocationRef, ReasonRef,
    ScheduleFormations, ServiceLoading, StationMessage, StatusUpdate, TimetableNotice, TocRef,
    TrainAlert, TrainOrder,
};
use crate::domain::{Rid, Tiploc};

use super::keys;
use super::records::{ForecastRecord, MessageRecord, ScheduleRecord, StopRecord};
use super::{
    AssociationRepository, FormationRepository, ForecastRepository, MessageLog, NoticeRepository,
    ReasonKind, ReferenceRepository, ScheduleRepository, Store, StoreError, Transaction,
};

/// Everything the memory store holds.
#[derive(Debug, Clone, Default)]
pub struct MemoryState {
    pub schedules: HashMap<Rid, ScheduleRecord>,
    pub stops: HashMap<Rid, Vec<StopRecord>>,
    pub forecasts: Vec<ForecastRecord>,
    pub associations: Vec<(String, Association)>,
    pub formations: Vec<(String, ScheduleFormations)>,
    pub service_loadings: Vec<(String, ServiceLoading)>,
    pub formation_loadings: Vec<(String, FormationLoading)>,
    pub station_messages: Vec<(String, StationMessage)>,
    pub train_orders: Vec<(String, TrainOrder)>,
    pub train_alerts: Vec<(String, TrainAlert)>,
    pub headcode_changes: Vec<(String, HeadcodeChange)>,
    pub alarms: Vec<(String, Alarm)>,
    pub timetable_notices: Vec<(String, TimetableNotice)>,
    pub statuses: Vec<(String, StatusUpdate)>,
    pub locations: BTreeMap<Tiploc, LocationRef>,
    pub operators: BTreeMap<String, TocRef>,
    pub reasons: BTreeMap<(&'static str, u32), String>,
    pub messages: Vec<MessageRecord>,
    /// `(table, message_id, item_key)` of every message-keyed row.
    row_keys: HashSet<(&'static str, String, String)>,
}

impl MemoryState {
    /// Claim a row key; false if a row with the same key already exists.
    fn claim(&mut self, table: &'static str, message_id: &str, key: String) -> bool {
        self.row_keys.insert((table, message_id.to_string(), key))
    }

    /// Number of message-keyed rows across all kinds.
    pub fn message_keyed_rows(&self) -> usize {
        self.forecasts.len()
            + self.associations.len()
            + self.formations.len()
            + self.service_loadings.len()
            + self.formation_loadings.len()
            + self.station_messages.len()
            + self.train_orders.len()
            + self.train_alerts.len()
            + self.headcode_changes.len()
            + self.alarms.len()
            + self.timetable_notices.len()
            + self.statuses.len()
    }
}

type Staged = Box<dyn FnOnce(&mut MemoryState) + Send>;

#[derive(Debug, Default)]
struct Switches {
    fail_commits: AtomicBool,
    commits: AtomicUsize,
    rollbacks: AtomicUsize,
}

/// A store held entirely in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
    switches: Arc<Switches>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A copy of the committed state.
    pub fn snapshot(&self) -> MemoryState {
        lock(&self.state).clone()
    }

    /// Make every subsequent commit fail (or succeed again).
    pub fn fail_commits(&self, fail: bool) {
        self.switches.fail_commits.store(fail, Ordering::SeqCst);
    }

    /// Number of successful commits so far.
    pub fn commits(&self) -> usize {
        self.switches.commits.load(Ordering::SeqCst)
    }

    /// Number of explicit rollbacks so far.
    pub fn rollbacks(&self) -> usize {
        self.switches.rollbacks.load(Ordering::SeqCst)
    }
}

fn lock(state: &Mutex<MemoryState>) -> MutexGuard<'_, MemoryState> {
    // A panic while holding the lock cannot leave state half-written: staged
    // writes are plain inserts.
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl Store for MemoryStore {
    type Tx = MemoryTransaction;

    async fn begin(&self) -> Result<MemoryTransaction, StoreError> {
        Ok(MemoryTransaction {
            state: Arc::clone(&self.state),
            switches: Arc::clone(&self.switches),
            staged: Vec::new(),
        })
    }
}

/// A transaction against a [`MemoryStore`].
pub struct MemoryTransaction {
    state: Arc<Mutex<MemoryState>>,
    switches: Arc<Switches>,
    staged: Vec<Staged>,
}

impl MemoryTransaction {
    fn stage(&mut self, write: impl FnOnce(&mut MemoryState) + Send + 'static) {
        self.staged.push(Box::new(write));
    }

    /// Stage a message-keyed row. Like `ON CONFLICT DO NOTHING`, a row whose
    /// key is already taken is dropped.
    fn stage_keyed<T: Clone + Send + 'static>(
        &mut self,
        table: &'static str,
        message_id: &str,
        key: String,
        item: &T,
        rows: fn(&mut MemoryState) -> &mut Vec<(String, T)>,
    ) {
        let (message_id, item) = (message_id.to_string(), item.clone());
        self.stage(move |state| {
            if state.claim(table, &message_id, key) {
                rows(state).push((message_id, item));
            }
        });
    }
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn commit(self) -> Result<(), StoreError> {
        if self.switches.fail_commits.load(Ordering::SeqCst) {
            return Err(StoreError::Commit("memory store set to fail commits".into()));
        }
        let mut state = lock(&self.state);
        for write in self.staged {
            write(&mut state);
        }
        self.switches.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(self) -> Result<(), StoreError> {
        self.switches.rollbacks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl ScheduleRepository for MemoryTransaction {
    async fn stops_at(
        &mut self,
        rid: &Rid,
        tiploc: Tiploc,
    ) -> Result<Vec<StopRecord>, StoreError> {
        let state = lock(&self.state);
        Ok(state
            .stops
            .get(rid)
            .map(|stops| {
                stops
                    .iter()
                    .filter(|stop| stop.tiploc == tiploc)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn replace_schedule(
        &mut self,
        schedule: &ScheduleRecord,
        stops: &[StopRecord],
    ) -> Result<(), StoreError> {
        let schedule = schedule.clone();
        let stops = stops.to_vec();
        self.stage(move |state| {
            state.stops.insert(schedule.rid.clone(), stops);
            state.schedules.insert(schedule.rid.clone(), schedule);
        });
        Ok(())
    }

    async fn deactivate_schedule(&mut self, rid: &Rid) -> Result<(), StoreError> {
        let rid = rid.clone();
        self.stage(move |state| {
            if let Some(schedule) = state.schedules.get_mut(&rid) {
                schedule.attributes.active = false;
            }
        });
        Ok(())
    }
}

#[async_trait]
impl ForecastRepository for MemoryTransaction {
    async fn insert_forecast(&mut self, forecast: &ForecastRecord) -> Result<(), StoreError> {
        let forecast = forecast.clone();
        self.stage(move |state| {
            if state.claim("forecast", &forecast.message_id, keys::forecast(&forecast)) {
                state.forecasts.push(forecast);
            }
        });
        Ok(())
    }
}

#[async_trait]
impl AssociationRepository for MemoryTransaction {
    async fn insert_association(
        &mut self,
        message_id: &str,
        association: &Association,
    ) -> Result<(), StoreError> {
        let key = keys::association(association);
        self.stage_keyed("association", message_id, key, association, |s| &mut s.associations);
        Ok(())
    }
}

#[async_trait]
impl FormationRepository for MemoryTransaction {
    async fn insert_formations(
        &mut self,
        message_id: &str,
        formations: &ScheduleFormations,
    ) -> Result<(), StoreError> {
        let (message_id, mut formations) = (message_id.to_string(), formations.clone());
        self.stage(move |state| {
            // One row per formation, as in Postgres.
            formations
                .formations
                .retain(|f| state.claim("formation", &message_id, keys::formation(f)));
            if !formations.formations.is_empty() {
                state.formations.push((message_id, formations));
            }
        });
        Ok(())
    }

    async fn insert_service_loading(
        &mut self,
        message_id: &str,
        loading: &ServiceLoading,
    ) -> Result<(), StoreError> {
        let key = keys::service_loading(loading);
        self.stage_keyed("service_loading", message_id, key, loading, |s| &mut s.service_loadings);
        Ok(())
    }

    async fn insert_formation_loading(
        &mut self,
        message_id: &str,
        loading: &FormationLoading,
    ) -> Result<(), StoreError> {
        let key = keys::formation_loading(loading);
        self.stage_keyed("formation_loading", message_id, key, loading, |s| {
            &mut s.formation_loadings
        });
        Ok(())
    }
}

#[async_trait]
impl NoticeRepository for MemoryTransaction {
    async fn insert_station_message(
        &mut self,
        message_id: &str,
        message: &StationMessage,
    ) -> Result<(), StoreError> {
        let key = keys::station_message(message);
        self.stage_keyed("station_message", message_id, key, message, |s| &mut s.station_messages);
        Ok(())
    }

    async fn insert_train_order(
        &mut self,
        message_id: &str,
        position: usize,
        order: &TrainOrder,
    ) -> Result<(), StoreError> {
        let key = keys::train_order(order, position);
        self.stage_keyed("train_order", message_id, key, order, |s| &mut s.train_orders);
        Ok(())
    }

    async fn insert_train_alert(
        &mut self,
        message_id: &str,
        alert: &TrainAlert,
    ) -> Result<(), StoreError> {
        let key = keys::train_alert(alert);
        self.stage_keyed("train_alert", message_id, key, alert, |s| &mut s.train_alerts);
        Ok(())
    }

    async fn insert_headcode_change(
        &mut self,
        message_id: &str,
        position: usize,
        change: &HeadcodeChange,
    ) -> Result<(), StoreError> {
        let key = keys::headcode_change(change, position);
        self.stage_keyed("headcode_change", message_id, key, change, |s| &mut s.headcode_changes);
        Ok(())
    }

    async fn insert_alarm(&mut self, message_id: &str, alarm: &Alarm) -> Result<(), StoreError> {
        self.stage_keyed("alarm", message_id, keys::alarm(alarm), alarm, |s| &mut s.alarms);
        Ok(())
    }

    async fn insert_timetable_notice(
        &mut self,
        message_id: &str,
        notice: &TimetableNotice,
    ) -> Result<(), StoreError> {
        let key = keys::timetable_notice(notice);
        self.stage_keyed("timetable_notice", message_id, key, notice, |s| {
            &mut s.timetable_notices
        });
        Ok(())
    }

    async fn insert_status(
        &mut self,
        message_id: &str,
        status: &StatusUpdate,
    ) -> Result<(), StoreError> {
        let key = keys::status(status);
        self.stage_keyed("status_update", message_id, key, status, |s| &mut s.statuses);
        Ok(())
    }
}

#[async_trait]
impl ReferenceRepository for MemoryTransaction {
    async fn upsert_location(&mut self, location: &LocationRef) -> Result<(), StoreError> {
        let location = location.clone();
        self.stage(move |state| {
            state.locations.insert(location.tiploc, location);
        });
        Ok(())
    }

    async fn upsert_operator(&mut self, operator: &TocRef) -> Result<(), StoreError> {
        let operator = operator.clone();
        self.stage(move |state| {
            state.operators.insert(operator.code.clone(), operator);
        });
        Ok(())
    }

    async fn upsert_reason(
        &mut self,
        kind: ReasonKind,
        reason: &ReasonRef,
    ) -> Result<(), StoreError> {
        let reason = reason.clone();
        self.stage(move |state| {
            state.reasons.insert((kind.as_str(), reason.code), reason.text);
        });
        Ok(())
    }
}

#[async_trait]
impl MessageLog for MemoryTransaction {
    async fn message_seen(&mut self, message_id: &str) -> Result<bool, StoreError> {
        let state = lock(&self.state);
        Ok(state.messages.iter().any(|m| m.message_id == message_id))
    }

    async fn record_message(&mut self, message: &MessageRecord) -> Result<(), StoreError> {
        let message = message.clone();
        self.stage(move |state| state.messages.push(message));
        Ok(())
    }
}
