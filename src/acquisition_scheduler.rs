use crate::error::{ConfigValidationError, ReadError};
use crate::feeder_config::{ConnectionOverride, EquipmentClass, FeederConfig, Target, TargetKey};
use crate::register_reader::RegisterReader;
use crate::register_store::{
    ApplyOutcome, DispatchDecision, FeederSnapshots, LiveRegisterStore, MeasurementState,
    RegisterSnapshot, SequencePolicy,
};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::time::{interval, MissedTickBehavior};

/// What to do with a tick whose predecessor read is still outstanding.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum OverlapPolicy {
    /// Skip the tick. At most one read per target is in flight.
    #[default]
    SkipWhileInFlight,
    /// Dispatch anyway; only a read newer than the last applied one is kept.
    AllowOverlap,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerOptions {
    pub sequence_policy: SequencePolicy,
    pub overlap_policy: OverlapPolicy,
}

/// Drives one recurring poll per (feeder, equipment) target.
///
/// Must be used from within a tokio runtime. Dropping the last clone cancels
/// every polling task.
#[derive(Clone)]
pub struct AcquisitionScheduler {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    reader: Arc<dyn RegisterReader>,
    store: LiveRegisterStore,
    options: SchedulerOptions,
}

impl Drop for SchedulerInner {
    fn drop(&mut self) {
        self.store.deactivate_all();
    }
}

impl AcquisitionScheduler {
    pub fn new(reader: Arc<dyn RegisterReader>) -> Self {
        Self::with_options(reader, SchedulerOptions::default())
    }

    pub fn with_options(reader: Arc<dyn RegisterReader>, options: SchedulerOptions) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                reader,
                store: LiveRegisterStore::new(),
                options,
            }),
        }
    }

    pub fn store(&self) -> &LiveRegisterStore {
        &self.inner.store
    }

    /// Starts polling one equipment of `feeder`, restarting it if already active.
    ///
    /// `overrides` are layered over the stored settings for this activation only.
    /// On invalid settings the target is left inactive and no task is spawned.
    pub fn start(
        &self,
        feeder: &FeederConfig,
        equipment: EquipmentClass,
        overrides: Option<&ConnectionOverride>,
    ) -> Result<(), ConfigValidationError> {
        let key = feeder.target_key(equipment);
        let stored = feeder.equipment(equipment);
        let merged = match overrides {
            Some(overrides) => overrides.apply(stored),
            None => stored.clone(),
        };

        let params = match merged.validate() {
            Ok(params) => params,
            Err(error) => {
                self.inner.store.deactivate(&key);
                tracing::warn!(target_key = %key, %error, "not starting measurement");
                return Err(error);
            }
        };

        let epoch = self.inner.store.activate(
            &key,
            SystemTime::now(),
            self.inner.options.sequence_policy,
        );
        tracing::info!(
            target_key = %key,
            host = %params.host,
            port = params.port,
            start = params.start_address,
            count = params.register_count,
            period_ms = params.period.as_millis() as u64,
            epoch,
            "starting measurement"
        );

        let target = Target {
            key: key.clone(),
            params,
        };
        let task = tokio::spawn(poll_target(
            self.inner.reader.clone(),
            self.inner.store.clone(),
            target,
            epoch,
            self.inner.options.overlap_policy,
        ));
        self.inner.store.attach_task(&key, epoch, task.abort_handle());
        Ok(())
    }

    /// Stops polling. The last snapshot and read sequence stay visible.
    pub fn stop(&self, key: &TargetKey) -> bool {
        let was_active = self.inner.store.deactivate(key);
        if was_active {
            tracing::info!(target_key = %key, "stopped measurement");
        }
        was_active
    }

    /// Stops the target if active, starts it otherwise. Returns the new active state.
    pub fn toggle(
        &self,
        feeder: &FeederConfig,
        equipment: EquipmentClass,
        overrides: Option<&ConnectionOverride>,
    ) -> Result<bool, ConfigValidationError> {
        let key = feeder.target_key(equipment);
        if self.is_active(&key) {
            self.stop(&key);
            Ok(false)
        } else {
            self.start(feeder, equipment, overrides).map(|()| true)
        }
    }

    /// Cancels every polling task.
    pub fn shutdown(&self) {
        let stopped = self.inner.store.deactivate_all();
        tracing::info!(stopped, "acquisition scheduler shut down");
    }

    pub fn is_active(&self, key: &TargetKey) -> bool {
        self.inner.store.is_active(key)
    }

    pub fn last_snapshot(&self, key: &TargetKey) -> Option<RegisterSnapshot> {
        self.inner.store.last_snapshot(key)
    }

    pub fn started_at(&self, key: &TargetKey) -> Option<SystemTime> {
        self.inner.store.started_at(key)
    }

    pub fn read_sequence(&self, key: &TargetKey) -> u64 {
        self.inner.store.read_sequence(key)
    }

    pub fn measurement_state(&self, key: &TargetKey) -> MeasurementState {
        self.inner.store.measurement_state(key)
    }

    pub fn snapshots_for_feeder(&self, feeder_id: &str) -> FeederSnapshots {
        self.inner.store.snapshots_for_feeder(feeder_id)
    }
}

/// Recurring poll of one target for one activation.
///
/// Reads run in their own tasks so a slow device only delays its own result,
/// never the timer.
async fn poll_target(
    reader: Arc<dyn RegisterReader>,
    store: LiveRegisterStore,
    target: Target,
    epoch: u64,
    overlap: OverlapPolicy,
) {
    let mut ticker = interval(target.params.period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let skip_in_flight = overlap == OverlapPolicy::SkipWhileInFlight;
    let target = Arc::new(target);
    let mut dispatch = 0u64;

    loop {
        // First tick completes immediately.
        ticker.tick().await;

        match store.begin_dispatch(&target.key, epoch, skip_in_flight) {
            DispatchDecision::Proceed => {}
            DispatchDecision::SkipInFlight => {
                tracing::debug!(target_key = %target.key, "previous read still in flight, skipping tick");
                continue;
            }
            DispatchDecision::Retired => break,
        }
        dispatch += 1;

        let read_at = SystemTime::now();
        let reader = reader.clone();
        let store = store.clone();
        let target = target.clone();
        tokio::spawn(async move {
            let read = {
                let target = target.clone();
                tokio::spawn(async move {
                    let params = &target.params;
                    reader
                        .read(&params.host, params.port, params.start_address, params.register_count)
                        .await
                })
            };
            // A reader that panics still has to release the in-flight slot.
            let result = read.await.unwrap_or_else(|error| {
                Err(ReadError::Protocol(format!("read task failed: {error}")))
            });
            match store.apply_read(&target.key, epoch, dispatch, read_at, result) {
                ApplyOutcome::Applied { sequence } => {
                    tracing::trace!(target_key = %target.key, sequence, "snapshot updated")
                }
                ApplyOutcome::Failed(error) => {
                    tracing::warn!(target_key = %target.key, %error, "register read failed")
                }
                ApplyOutcome::StaleEpoch => {
                    tracing::debug!(target_key = %target.key, epoch, "discarding read from stopped activation")
                }
                ApplyOutcome::Superseded => {
                    tracing::debug!(target_key = %target.key, dispatch, "discarding read older than applied one")
                }
            }
        });
    }

    tracing::debug!(target_key = %target.key, epoch, "polling task exiting");
}
