//! Simulated LiveData engine
//!
//! Answers every request with a STATUS and publishes VALUE messages for active
//! subscriptions from a per-subscription ticker task.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::Outbox;
use crate::livedata::{
    LiveDataCommand, LiveDataHandle, LiveDataStatus, LiveDataValue, LiveDataValueType,
    MAX_LIVE_DATA_ENTRIES, SignalValue,
};
use crate::message::{
    LiveDataCommandMessage, LiveDataSetValueMessage, LiveDataStatusMessage, LiveDataValueMessage,
    Message,
};
use crate::Result;

/// Seconds since the Unix epoch reported by `GpsTime` at startup.
const GPS_TIME_BASE: i64 = 1_700_000_000;

#[derive(Debug, Default)]
struct EngineState {
    subscriptions: HashMap<LiveDataHandle, CancellationToken>,
    overrides: HashMap<LiveDataValueType, SignalValue>,
}

#[derive(Debug, Default)]
pub(crate) struct LiveDataEngine {
    state: std::sync::Arc<Mutex<EngineState>>,
}

fn lock(state: &Mutex<EngineState>) -> MutexGuard<'_, EngineState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl LiveDataEngine {
    pub(crate) fn subscription_count(&self) -> usize {
        lock(&self.state).subscriptions.len()
    }

    /// Stop every publisher. Values written with SET_VALUE survive.
    pub(crate) fn stop_all(&self) {
        for (_, stop) in lock(&self.state).subscriptions.drain() {
            stop.cancel();
        }
    }

    pub(crate) fn handle_command(&self, command: &LiveDataCommandMessage, outbox: &Outbox) {
        let status = match command.command {
            LiveDataCommand::Subscribe => self.subscribe(command, outbox),
            LiveDataCommand::Unsubscribe => {
                let removed = lock(&self.state).subscriptions.remove(&command.handle);
                match removed {
                    Some(stop) => {
                        stop.cancel();
                        LiveDataStatus::Success
                    }
                    None => LiveDataStatus::ErrHandle,
                }
            }
            LiveDataCommand::ClearAll => {
                self.stop_all();
                LiveDataStatus::Success
            }
            _ => LiveDataStatus::ErrUnknownCommand,
        };
        debug!(
            handle = command.handle,
            command = %command.command,
            %status,
            "Simulated LiveData request"
        );
        reply(outbox, command.handle, command.command, status);
    }

    pub(crate) fn handle_set_value(&self, request: &LiveDataSetValueMessage, outbox: &Outbox) {
        let status = if request.args.len() > MAX_LIVE_DATA_ENTRIES {
            LiveDataStatus::ErrFull
        } else {
            let mut state = lock(&self.state);
            for (arg, value) in request.args.iter().zip(&request.values) {
                if let Some(typed) = value.typed(arg.value_type) {
                    state.overrides.insert(arg.value_type, typed);
                }
            }
            LiveDataStatus::Success
        };
        reply(outbox, request.handle, LiveDataCommand::SetValue, status);
    }

    fn subscribe(&self, command: &LiveDataCommandMessage, outbox: &Outbox) -> LiveDataStatus {
        if command.args.len() > MAX_LIVE_DATA_ENTRIES {
            return LiveDataStatus::ErrFull;
        }
        if command.args.is_empty() || command.update_period.is_zero() {
            return LiveDataStatus::ErrUnknownCommand;
        }

        let stop = outbox.closed.child_token();
        let previous = lock(&self.state).subscriptions.insert(command.handle, stop.clone());
        if let Some(previous) = previous {
            previous.cancel();
        }

        let publisher = Publisher {
            handle: command.handle,
            signals: command.signals(),
            period: command.update_period,
            expiration: command.expiration_time,
            state: self.state.clone(),
            outbox: outbox.clone(),
        };
        tokio::spawn(publisher.run(stop));
        LiveDataStatus::Success
    }
}

fn reply(
    outbox: &Outbox,
    handle: LiveDataHandle,
    requested_command: LiveDataCommand,
    status: LiveDataStatus,
) {
    outbox.push(Message::livedata(LiveDataStatusMessage { handle, requested_command, status }));
}

struct Publisher {
    handle: LiveDataHandle,
    signals: Vec<LiveDataValueType>,
    period: Duration,
    expiration: Duration,
    state: std::sync::Arc<Mutex<EngineState>>,
    outbox: Outbox,
}

impl Publisher {
    async fn run(self, stop: CancellationToken) {
        let started = Instant::now();
        let mut ticker = tokio::time::interval_at(started + self.period, self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                now = ticker.tick() => {
                    if !self.expiration.is_zero() && now.duration_since(started) > self.expiration {
                        debug!(handle = self.handle, "Simulated LiveData subscription expired");
                        break;
                    }
                    // Values are positional, so one unencodable signal drops the whole sample.
                    let values = match self.sample(now.duration_since(started)) {
                        Ok(values) => values,
                        Err(e) => {
                            warn!(handle = self.handle, "Skipping LiveData sample: {}", e);
                            continue;
                        }
                    };
                    trace!(
                        handle = self.handle,
                        count = values.len(),
                        "Publishing LiveData values"
                    );
                    let message = LiveDataValueMessage { handle: self.handle, values };
                    self.outbox.push(Message::livedata(message));
                }
            }
        }
    }

    fn sample(&self, elapsed: Duration) -> Result<Vec<LiveDataValue>> {
        let overrides = lock(&self.state).overrides.clone();
        self.signals
            .iter()
            .map(|signal| {
                let value = overrides.get(signal).copied();
                value.unwrap_or_else(|| default_value(*signal, elapsed)).to_wire()
            })
            .collect()
    }
}

fn default_value(signal: LiveDataValueType, elapsed: Duration) -> SignalValue {
    match signal {
        LiveDataValueType::GpsLatitude => SignalValue::Double(42.4862),
        LiveDataValueType::GpsLongitude => SignalValue::Double(-83.1436),
        LiveDataValueType::GpsAltitude => SignalValue::Double(190.5),
        LiveDataValueType::GpsSpeed => SignalValue::Double(0.0),
        LiveDataValueType::GpsAccuracy => SignalValue::Double(2.5),
        LiveDataValueType::GpsBearing => SignalValue::Double(90.0),
        LiveDataValueType::GpsValid
        | LiveDataValueType::GpsEnable
        | LiveDataValueType::GpsTimeValid => SignalValue::Boolean(true),
        LiveDataValueType::ManualTrigger | LiveDataValueType::DaqEnable => {
            SignalValue::Boolean(false)
        }
        LiveDataValueType::TimeSinceMsg => {
            SignalValue::Integer(elapsed.as_millis().min(i32::MAX as u128) as i64)
        }
        LiveDataValueType::GpsTime => {
            SignalValue::Integer(GPS_TIME_BASE + elapsed.as_secs() as i64)
        }
    }
}
