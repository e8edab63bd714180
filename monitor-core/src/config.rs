//! Immutable monitor configuration.
//!
//! The firmware builds one [`MonitorConfig`] from its compile-time constants
//! at boot, validates it, and passes it by reference to every component.

use core::fmt::{Display, Formatter, Result as FmtResult};

use heapless::Vec;
use serde::{Deserialize, Serialize};

use crate::{sampler::MAX_READINGS, BUF_SIZE, MAX_CHANNELS};

/// Identifies a battery channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ChannelId {
    /// Engine battery
    A,
    /// House (deep cycle) battery
    B,
}

impl ChannelId {
    /// Slot of the channel in persisted state.
    pub const fn index(self) -> usize {
        match self {
            Self::A => 0,
            Self::B => 1,
        }
    }
}

impl Display for ChannelId {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::A => write!(f, "A"),
            Self::B => write!(f, "B"),
        }
    }
}

/// Static description of one battery channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelConfig {
    pub id: ChannelId,
    /// Human readable name used in mail bodies and logs
    pub label: &'static str,
    pub adc_pin: u8,
    /// Raw ADC counts per volt for this channel's divider network
    pub multiplier: f32,
    pub warn_low_volts: f32,
    pub alarm_low_volts: f32,
    pub warn_subject: &'static str,
    pub alarm_subject: &'static str,
    /// Disabled channels are never sampled, evaluated or reported
    pub monitored: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplingConfig {
    pub num_readings: usize,
    pub delay_between_readings_ms: u32,
}

/// Bounded retry budget for acquiring connectivity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u8,
    pub interval_ms: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MonitorConfig {
    pub channels: Vec<ChannelConfig, MAX_CHANNELS>,
    pub sampling: SamplingConfig,
    /// Send the all-clear message once every this many wake cycles
    pub ok_interval: u32,
    pub ok_subject: &'static str,
    pub sleep_secs: u64,
    pub wifi_retry: RetryPolicy,
    /// When false, composed messages are only logged
    pub send_mail: bool,
    pub debug: bool,
}

impl MonitorConfig {
    /// Channels that take part in the cycle, in channel order.
    pub fn monitored_channels(&self) -> impl Iterator<Item = &ChannelConfig> {
        self.channels.iter().filter(|channel| channel.monitored)
    }

    /// Look up a channel that is enabled for monitoring.
    pub fn channel(&self, id: ChannelId) -> Result<&ChannelConfig, ConfigError> {
        let channel = self
            .channels
            .iter()
            .find(|channel| channel.id == id)
            .ok_or(ConfigError::UnknownChannel(id))?;

        if channel.monitored {
            Ok(channel)
        } else {
            Err(ConfigError::ChannelDisabled(id))
        }
    }

    /// Check the configuration once before the first cycle.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.monitored_channels().next().is_none() {
            return Err(ConfigError::NoChannels);
        }

        for (position, channel) in self.channels.iter().enumerate() {
            if self.channels[..position].iter().any(|c| c.id == channel.id) {
                return Err(ConfigError::DuplicateChannel(channel.id));
            }
            if !channel.monitored {
                continue;
            }
            if !(channel.multiplier.is_finite() && channel.multiplier > 0.0) {
                return Err(ConfigError::InvalidMultiplier(channel.id));
            }
            if channel.alarm_low_volts >= channel.warn_low_volts {
                return Err(ConfigError::InvertedThresholds(channel.id));
            }
            check_subject(channel.warn_subject)?;
            check_subject(channel.alarm_subject)?;
        }

        let readings = self.sampling.num_readings;
        if readings == 0 || readings > MAX_READINGS {
            return Err(ConfigError::InvalidReadings(readings));
        }
        if self.ok_interval == 0 {
            return Err(ConfigError::InvalidOkInterval);
        }
        if self.wifi_retry.attempts == 0 {
            return Err(ConfigError::InvalidRetryBudget);
        }
        check_subject(self.ok_subject)
    }
}

/// Two subject templates must fit into one subject buffer.
fn check_subject(subject: &str) -> Result<(), ConfigError> {
    let max = BUF_SIZE / 2;
    if subject.len() >= max {
        return Err(ConfigError::SubjectTooLong {
            len: subject.len(),
            max,
        });
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    NoChannels,
    DuplicateChannel(ChannelId),
    UnknownChannel(ChannelId),
    ChannelDisabled(ChannelId),
    InvalidMultiplier(ChannelId),
    InvertedThresholds(ChannelId),
    InvalidReadings(usize),
    InvalidOkInterval,
    InvalidRetryBudget,
    SubjectTooLong { len: usize, max: usize },
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::NoChannels => write!(f, "no battery channel is monitored"),
            Self::DuplicateChannel(id) => write!(f, "channel {} configured twice", id),
            Self::UnknownChannel(id) => write!(f, "channel {} is not configured", id),
            Self::ChannelDisabled(id) => write!(f, "channel {} is not monitored", id),
            Self::InvalidMultiplier(id) => {
                write!(f, "channel {} needs a positive ADC multiplier", id)
            }
            Self::InvertedThresholds(id) => {
                write!(f, "channel {} alarm threshold must be below warn", id)
            }
            Self::InvalidReadings(n) => {
                write!(f, "{} readings per sample (1..={})", n, MAX_READINGS)
            }
            Self::InvalidOkInterval => write!(f, "OK interval must be at least one wake"),
            Self::InvalidRetryBudget => write!(f, "WiFi retry budget must allow one attempt"),
            Self::SubjectTooLong { len, max } => {
                write!(f, "subject template of {} bytes, limit is {}", len, max - 1)
            }
        }
    }
}
