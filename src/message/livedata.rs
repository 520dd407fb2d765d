//! LiveData messages

use std::time::Duration;

use crate::livedata::{
    LiveDataCommand, LiveDataHandle, LiveDataObjectType, LiveDataStatus, LiveDataValue,
    LiveDataValueType, MAX_LIVE_DATA_ENTRIES, SignalValue,
};
use crate::{DeviceError, Result};

/// One signal selector in a SUBSCRIBE or SET_VALUE request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LiveDataArgument {
    pub object_type: LiveDataObjectType,
    pub object_index: u32,
    pub signal_index: u32,
    pub value_type: LiveDataValueType,
}

impl LiveDataArgument {
    pub fn signal(value_type: LiveDataValueType) -> Self {
        Self { object_type: LiveDataObjectType::Misc, object_index: 0, signal_index: 0, value_type }
    }
}

/// Host to device request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveDataCommandMessage {
    pub handle: LiveDataHandle,
    pub command: LiveDataCommand,
    pub update_period: Duration,
    /// Zero keeps the subscription alive until it is unsubscribed.
    pub expiration_time: Duration,
    pub args: Vec<LiveDataArgument>,
}

impl LiveDataCommandMessage {
    pub fn subscribe(
        handle: LiveDataHandle,
        signals: &[LiveDataValueType],
        update_period: Duration,
        expiration_time: Duration,
    ) -> Self {
        Self {
            handle,
            command: LiveDataCommand::Subscribe,
            update_period,
            expiration_time,
            args: signals.iter().copied().map(LiveDataArgument::signal).collect(),
        }
    }

    pub fn unsubscribe(handle: LiveDataHandle) -> Self {
        Self::bare(handle, LiveDataCommand::Unsubscribe)
    }

    pub fn clear_all(handle: LiveDataHandle) -> Self {
        Self::bare(handle, LiveDataCommand::ClearAll)
    }

    fn bare(handle: LiveDataHandle, command: LiveDataCommand) -> Self {
        Self {
            handle,
            command,
            update_period: Duration::ZERO,
            expiration_time: Duration::ZERO,
            args: Vec::new(),
        }
    }

    pub fn append_signal(&mut self, value_type: LiveDataValueType) {
        self.args.push(LiveDataArgument::signal(value_type));
    }

    pub fn signals(&self) -> Vec<LiveDataValueType> {
        self.args.iter().map(|arg| arg.value_type).collect()
    }

    pub fn validate(&self) -> Result<()> {
        if self.args.len() > MAX_LIVE_DATA_ENTRIES {
            return Err(DeviceError::configuration(format!(
                "LiveData request has {} arguments, the limit is {}",
                self.args.len(),
                MAX_LIVE_DATA_ENTRIES
            )));
        }
        if self.command == LiveDataCommand::Subscribe {
            if self.args.is_empty() {
                return Err(DeviceError::configuration(
                    "LiveData subscription needs at least one signal",
                ));
            }
            if self.update_period.is_zero() {
                return Err(DeviceError::configuration("LiveData update period must be non-zero"));
            }
        }
        if self.update_period.as_millis() > u32::MAX as u128
            || self.expiration_time.as_millis() > u32::MAX as u128
        {
            return Err(DeviceError::configuration(
                "LiveData periods must fit in 32-bit milliseconds",
            ));
        }
        Ok(())
    }
}

/// Device confirmation or rejection of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiveDataStatusMessage {
    pub handle: LiveDataHandle,
    pub requested_command: LiveDataCommand,
    pub status: LiveDataStatus,
}

/// Periodic values for a subscription, in subscription signal order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveDataValueMessage {
    pub handle: LiveDataHandle,
    pub values: Vec<LiveDataValue>,
}

impl LiveDataValueMessage {
    /// Pair each value with the signal it was requested for.
    ///
    /// Returns `None` if the number of values does not match the signal list or a value
    /// is not a valid encoding for its signal.
    pub fn typed(
        &self,
        signals: &[LiveDataValueType],
    ) -> Option<Vec<(LiveDataValueType, SignalValue)>> {
        if signals.len() != self.values.len() {
            return None;
        }
        signals
            .iter()
            .zip(&self.values)
            .map(|(signal, value)| value.typed(*signal).map(|typed| (*signal, typed)))
            .collect()
    }
}

/// One-shot write of signal values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveDataSetValueMessage {
    pub handle: LiveDataHandle,
    pub args: Vec<LiveDataArgument>,
    pub values: Vec<LiveDataValue>,
}

impl LiveDataSetValueMessage {
    pub fn new(handle: LiveDataHandle) -> Self {
        Self { handle, args: Vec::new(), values: Vec::new() }
    }

    /// Append a signal write, converting the value to its wire form.
    pub fn push(&mut self, value_type: LiveDataValueType, value: SignalValue) -> Result<()> {
        let wire = value.to_wire()?;
        self.args.push(LiveDataArgument::signal(value_type));
        self.values.push(wire);
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.args.is_empty() || self.args.len() != self.values.len() {
            return Err(DeviceError::configuration(format!(
                "LiveData set-value needs matching arguments and values ({} vs {})",
                self.args.len(),
                self.values.len()
            )));
        }
        if self.args.len() > MAX_LIVE_DATA_ENTRIES {
            return Err(DeviceError::configuration(format!(
                "LiveData set-value has {} entries, the limit is {}",
                self.args.len(),
                MAX_LIVE_DATA_ENTRIES
            )));
        }
        Ok(())
    }
}
