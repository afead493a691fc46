use crate::error::ReadError;
use crate::feeder_config::{EquipmentClass, TargetKey};
use crate::register_reader::RawRegister;
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
    time::SystemTime,
};
use tokio::task::AbortHandle;

/// The registers of one successful read.
#[derive(Debug, Clone, PartialEq)]
pub struct RegisterSnapshot {
    pub registers: Vec<RawRegister>,
    /// Value of the target's read sequence once this snapshot was applied.
    pub sequence: u64,
    /// Wall-clock time of the tick that issued the read.
    pub read_at: SystemTime,
}

impl RegisterSnapshot {
    pub fn find(&self, address: u16) -> Option<&RawRegister> {
        self.registers.iter().find(|r| r.address == address)
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct MeasurementState {
    pub active: bool,
    pub started_at: Option<SystemTime>,
    pub read_sequence: u64,
}

/// What a new activation does to the read counter and last snapshot.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum SequencePolicy {
    /// Counter and snapshot carry over across stop/start.
    #[default]
    Cumulative,
    /// A new start clears the counter and the snapshot.
    ResetOnStart,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchDecision {
    Proceed,
    /// The previous read of this activation has not completed yet.
    SkipInFlight,
    /// The activation this tick belongs to is over.
    Retired,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ApplyOutcome {
    Applied { sequence: u64 },
    /// Response belongs to an activation that has since been stopped or restarted.
    StaleEpoch,
    /// A read dispatched later has already been applied.
    Superseded,
    Failed(ReadError),
}

#[derive(Debug, Default)]
struct TargetRecord {
    state: MeasurementState,
    snapshot: Option<RegisterSnapshot>,
    epoch: u64,
    in_flight: bool,
    last_applied_dispatch: u64,
    task: Option<AbortHandle>,
}

impl TargetRecord {
    fn retire(&mut self) -> bool {
        let was_active = self.state.active;
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.epoch += 1;
        self.in_flight = false;
        self.state.active = false;
        self.state.started_at = None;
        was_active
    }
}

/// Snapshots of both equipment classes of one feeder.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct FeederSnapshots {
    pub relay: Option<RegisterSnapshot>,
    pub analyzer: Option<RegisterSnapshot>,
}

impl FeederSnapshots {
    pub fn get(&self, equipment: EquipmentClass) -> Option<&RegisterSnapshot> {
        match equipment {
            EquipmentClass::Relay => self.relay.as_ref(),
            EquipmentClass::Analyzer => self.analyzer.as_ref(),
        }
    }

    pub fn set(&mut self, equipment: EquipmentClass, snapshot: Option<RegisterSnapshot>) {
        match equipment {
            EquipmentClass::Relay => self.relay = snapshot,
            EquipmentClass::Analyzer => self.analyzer = snapshot,
        }
    }
}

/// Latest register snapshot and measurement state of every target.
///
/// Each target lives in one record that also owns its polling task handle and
/// activation epoch. Records are only ever replaced field-wise under the lock,
/// so readers always see a consistent snapshot.
#[derive(Clone, Default)]
pub struct LiveRegisterStore {
    records: Arc<Mutex<HashMap<TargetKey, TargetRecord>>>,
}

impl LiveRegisterStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<TargetKey, TargetRecord>> {
        // Records are never left half-written, so a poisoned lock is still usable.
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Starts a new activation and returns its epoch. Any previous activation is retired.
    pub(crate) fn activate(
        &self,
        key: &TargetKey,
        started_at: SystemTime,
        policy: SequencePolicy,
    ) -> u64 {
        let mut records = self.lock();
        let record = records.entry(key.clone()).or_default();
        record.retire();
        if policy == SequencePolicy::ResetOnStart {
            record.state.read_sequence = 0;
            record.snapshot = None;
        }
        record.state.active = true;
        record.state.started_at = Some(started_at);
        record.last_applied_dispatch = 0;
        record.epoch
    }

    /// Hands the polling task of `epoch` to its record. Aborts it right away if
    /// the activation was already retired.
    pub(crate) fn attach_task(&self, key: &TargetKey, epoch: u64, task: AbortHandle) {
        let mut records = self.lock();
        match records.get_mut(key) {
            Some(record) if record.epoch == epoch && record.state.active => {
                record.task = Some(task)
            }
            _ => task.abort(),
        }
    }

    /// Ends the current activation. Returns whether the target was active.
    ///
    /// The snapshot and read sequence are kept.
    pub(crate) fn deactivate(&self, key: &TargetKey) -> bool {
        let mut records = self.lock();
        records.get_mut(key).map(TargetRecord::retire).unwrap_or(false)
    }

    /// Ends every activation. Returns how many targets were active.
    pub(crate) fn deactivate_all(&self) -> usize {
        let mut records = self.lock();
        records
            .values_mut()
            .map(TargetRecord::retire)
            .filter(|was_active| *was_active)
            .count()
    }

    pub(crate) fn begin_dispatch(
        &self,
        key: &TargetKey,
        epoch: u64,
        skip_in_flight: bool,
    ) -> DispatchDecision {
        let mut records = self.lock();
        let Some(record) = records.get_mut(key) else {
            return DispatchDecision::Retired;
        };
        if record.epoch != epoch || !record.state.active {
            return DispatchDecision::Retired;
        }
        if skip_in_flight && record.in_flight {
            return DispatchDecision::SkipInFlight;
        }
        record.in_flight = true;
        DispatchDecision::Proceed
    }

    /// Applies the outcome of read number `dispatch` of activation `epoch`.
    pub(crate) fn apply_read(
        &self,
        key: &TargetKey,
        epoch: u64,
        dispatch: u64,
        read_at: SystemTime,
        result: Result<Vec<RawRegister>, ReadError>,
    ) -> ApplyOutcome {
        let mut records = self.lock();
        let Some(record) = records.get_mut(key) else {
            return ApplyOutcome::StaleEpoch;
        };
        if record.epoch != epoch {
            return ApplyOutcome::StaleEpoch;
        }
        record.in_flight = false;

        let registers = match result {
            Ok(registers) => registers,
            Err(error) => return ApplyOutcome::Failed(error),
        };
        if dispatch <= record.last_applied_dispatch {
            return ApplyOutcome::Superseded;
        }

        record.last_applied_dispatch = dispatch;
        record.state.read_sequence += 1;
        let sequence = record.state.read_sequence;
        record.snapshot = Some(RegisterSnapshot {
            registers,
            sequence,
            read_at,
        });
        ApplyOutcome::Applied { sequence }
    }

    pub fn is_active(&self, key: &TargetKey) -> bool {
        self.lock().get(key).is_some_and(|r| r.state.active)
    }

    pub fn measurement_state(&self, key: &TargetKey) -> MeasurementState {
        self.lock()
            .get(key)
            .map(|r| r.state.clone())
            .unwrap_or_default()
    }

    pub fn last_snapshot(&self, key: &TargetKey) -> Option<RegisterSnapshot> {
        self.lock().get(key).and_then(|r| r.snapshot.clone())
    }

    pub fn started_at(&self, key: &TargetKey) -> Option<SystemTime> {
        self.lock().get(key).and_then(|r| r.state.started_at)
    }

    pub fn read_sequence(&self, key: &TargetKey) -> u64 {
        self.lock().get(key).map_or(0, |r| r.state.read_sequence)
    }

    pub fn snapshots_for_feeder(&self, feeder_id: &str) -> FeederSnapshots {
        let records = self.lock();
        let mut snapshots = FeederSnapshots::default();
        for equipment in EquipmentClass::ALL {
            let key = TargetKey::new(feeder_id, equipment);
            snapshots.set(equipment, records.get(&key).and_then(|r| r.snapshot.clone()));
        }
        snapshots
    }
}
