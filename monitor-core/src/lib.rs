//! Hardware-independent core of the battery monitor.
//!
//! One wake cycle samples every monitored battery channel, classifies the
//! averaged voltage, decides whether an e-mail is due, hands it to a mail
//! transport and persists the small amount of state that has to survive deep
//! sleep. Everything that touches hardware (ADC, WiFi, TCP, RTC memory) sits
//! behind a trait so the whole cycle runs on a desktop host in tests.

#![cfg_attr(not(test), no_std)]

pub mod config;
pub mod controller;
pub mod converter;
pub mod evaluator;
pub mod notifier;
pub mod sampler;
pub mod smtp;
pub mod state;

pub use config::{ChannelConfig, ChannelId, ConfigError, MonitorConfig};
pub use controller::{ChannelOutcome, CycleController, CycleReport};
pub use evaluator::Severity;
pub use notifier::{ConnectivityError, Delivery, MailTransport, SendFailure};
pub use sampler::{AcquisitionError, AdcReader};
pub use state::{CycleState, StateStore};

/// Size of the utility string buffers; subject lines are bounded by it.
pub const BUF_SIZE: usize = 128;

/// Upper bound on monitored channels (engine and house battery).
pub const MAX_CHANNELS: usize = 2;
