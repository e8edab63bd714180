//! One wake cycle: WAKE → SAMPLE → EVALUATE → DECIDE → (NOTIFY) → PERSIST → SLEEP.
//!
//! The controller is the only writer of [`CycleState`]. Every error it meets
//! is local to the cycle; it always reaches PERSIST and hands the sleep
//! duration back to the caller.

use embedded_hal_async::delay::DelayNs;
use heapless::Vec;
use log::{debug, info, warn};

use crate::{
    config::{ChannelId, MonitorConfig},
    converter::{to_volts, Reading},
    evaluator::{classify, Severity},
    notifier::{Delivery, MailTransport, MessageContext, NotificationEvent, Notifier, SendFailure},
    sampler::{AcquisitionError, AdcReader, Sampler},
    state::{self, CycleState, StateError, StateStore},
    MAX_CHANNELS,
};

/// Alerts for every channel, or the single all-clear event.
pub const MAX_EVENTS: usize = MAX_CHANNELS + 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Wake,
    Sample,
    Evaluate,
    Decide,
    Notify,
    Persist,
    Sleep,
}

/// What became of one monitored channel this cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ChannelOutcome {
    Evaluated { reading: Reading, severity: Severity },
    /// Sampling failed; the channel is neither NORMAL nor alerting
    Unknown {
        channel: ChannelId,
        error: AcquisitionError,
    },
}

impl ChannelOutcome {
    pub fn channel(&self) -> ChannelId {
        match self {
            Self::Evaluated { reading, .. } => reading.channel,
            Self::Unknown { channel, .. } => *channel,
        }
    }

    pub fn severity(&self) -> Option<Severity> {
        match self {
            Self::Evaluated { severity, .. } => Some(*severity),
            Self::Unknown { .. } => None,
        }
    }
}

/// Outcome of the DECIDE phase.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub events: Vec<NotificationEvent, MAX_EVENTS>,
    /// Wake counter including the current cycle
    pub wakes_since_ok_sent: u32,
}

impl Decision {
    pub fn is_all_clear(&self) -> bool {
        self.events.iter().any(|event| event.channel.is_none())
    }
}

/// Decide which notifications the current outcomes call for.
///
/// * ALARM notifies every cycle.
/// * WARN notifies when the previous cycle was not WARN.
/// * The all-clear goes out when every monitored channel is NORMAL and
///   `ok_interval` wakes have passed since the last delivered one.
pub fn decide(
    config: &MonitorConfig,
    prior: &CycleState,
    outcomes: &[ChannelOutcome],
    timestamp: u64,
) -> Decision {
    let wakes_since_ok_sent = prior.wakes_since_ok_sent.saturating_add(1);
    let mut events = Vec::new();

    for outcome in outcomes {
        let ChannelOutcome::Evaluated { reading, severity } = outcome else {
            continue;
        };
        let Ok(channel) = config.channel(reading.channel) else {
            continue;
        };

        let previous = prior.channel(reading.channel).last_severity;
        let template = match severity {
            Severity::Alarm => Some(channel.alarm_subject),
            Severity::Warn if previous != Some(Severity::Warn) => Some(channel.warn_subject),
            _ => None,
        };

        if let Some(subject_template) = template {
            // at most one event per channel
            let _ = events.push(NotificationEvent {
                subject_template,
                channel: Some(reading.channel),
                severity: *severity,
                timestamp,
            });
        }
    }

    let all_normal = !outcomes.is_empty()
        && outcomes
            .iter()
            .all(|outcome| outcome.severity() == Some(Severity::Normal));
    if all_normal && wakes_since_ok_sent >= config.ok_interval {
        let _ = events.push(NotificationEvent {
            subject_template: config.ok_subject,
            channel: None,
            severity: Severity::Normal,
            timestamp,
        });
    }

    Decision {
        events,
        wakes_since_ok_sent,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub cycle_index: u32,
    pub outcomes: Vec<ChannelOutcome, MAX_CHANNELS>,
    pub decision: Decision,
    /// `None` when nothing was due
    pub delivery: Option<Result<Delivery, SendFailure>>,
    pub state: CycleState,
    pub persisted: Result<(), StateError>,
    pub sleep_secs: u64,
}

pub struct CycleController<'c, A, T, D, S> {
    config: &'c MonitorConfig,
    sampler: Sampler<A, D>,
    notifier: Notifier<T, D>,
    store: S,
}

impl<'c, A, T, D, S> CycleController<'c, A, T, D, S>
where
    A: AdcReader,
    T: MailTransport,
    D: DelayNs + Clone,
    S: StateStore,
{
    pub fn new(config: &'c MonitorConfig, adc: A, transport: T, delay: D, store: S) -> Self {
        Self {
            config,
            sampler: Sampler::new(adc, delay.clone(), config.sampling),
            notifier: Notifier::new(transport, delay, config),
            store,
        }
    }

    pub async fn run(&mut self) -> CycleReport {
        debug!("{:?}", Phase::Wake);
        let mut state = state::restore(&mut self.store);
        state.wake_count = state.wake_count.wrapping_add(1);
        let cycle_index = state.wake_count;
        let timestamp = state.monitor_time_secs;
        info!("Wake cycle {}", cycle_index);

        debug!("{:?}", Phase::Sample);
        let mut outcomes: Vec<ChannelOutcome, MAX_CHANNELS> = Vec::new();
        for channel in self.config.monitored_channels() {
            let outcome = match self.sampler.sample(channel).await {
                Ok(sample) => {
                    let voltage = to_volts(sample.mean(), channel.multiplier);
                    let severity = classify(voltage, channel);
                    info!("{}: {} V, {}", channel.label, voltage, severity);
                    ChannelOutcome::Evaluated {
                        reading: Reading {
                            channel: channel.id,
                            voltage,
                            cycle_index,
                        },
                        severity,
                    }
                }
                Err(error) => {
                    warn!("{}: state unknown this cycle: {}", channel.label, error);
                    ChannelOutcome::Unknown {
                        channel: channel.id,
                        error,
                    }
                }
            };
            // monitored channels never exceed MAX_CHANNELS
            let _ = outcomes.push(outcome);
        }
        debug!("{:?}", Phase::Evaluate);

        debug!("{:?}", Phase::Decide);
        let decision = decide(self.config, &state, &outcomes, timestamp);

        let delivery = if decision.events.is_empty() {
            debug!(
                "Nothing to send, {} of {} wakes towards the next OK",
                decision.wakes_since_ok_sent, self.config.ok_interval
            );
            None
        } else {
            debug!("{:?}", Phase::Notify);
            let context = MessageContext {
                config: self.config,
                outcomes: &outcomes,
                cycle_index,
            };
            let result = self.notifier.notify(&decision.events, &context).await;
            if let Err(failure) = &result {
                warn!("Notification dropped: {}", failure);
            }
            Some(result)
        };

        debug!("{:?}", Phase::Persist);
        for outcome in &outcomes {
            if let Some(severity) = outcome.severity() {
                state.channel_mut(outcome.channel()).last_severity = Some(severity);
            }
        }
        let all_clear_delivered = decision.is_all_clear() && matches!(delivery, Some(Ok(_)));
        state.wakes_since_ok_sent = if all_clear_delivered {
            0
        } else {
            decision.wakes_since_ok_sent
        };
        state.monitor_time_secs = state.monitor_time_secs.saturating_add(self.config.sleep_secs);

        let persisted = state::persist(&mut self.store, &state);
        if let Err(error) = &persisted {
            warn!("Could not persist cycle state: {}", error);
        }

        debug!("{:?}", Phase::Sleep);
        CycleReport {
            cycle_index,
            outcomes,
            decision,
            delivery,
            state,
            persisted,
            sleep_secs: self.config.sleep_secs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ChannelConfig, RetryPolicy, SamplingConfig};

    fn config(ok_interval: u32) -> MonitorConfig {
        let mut channels = Vec::new();
        for (id, label) in [(ChannelId::A, "A"), (ChannelId::B, "B")] {
            channels
                .push(ChannelConfig {
                    id,
                    label,
                    adc_pin: 34,
                    multiplier: 100.0,
                    warn_low_volts: 11.5,
                    alarm_low_volts: 10.5,
                    warn_subject: "Warn ",
                    alarm_subject: "Alarm ",
                    monitored: true,
                })
                .unwrap();
        }
        MonitorConfig {
            channels,
            sampling: SamplingConfig {
                num_readings: 1,
                delay_between_readings_ms: 0,
            },
            ok_interval,
            ok_subject: "OK ",
            sleep_secs: 1800,
            wifi_retry: RetryPolicy {
                attempts: 1,
                interval_ms: 0,
            },
            send_mail: true,
            debug: false,
        }
    }

    fn evaluated(channel: ChannelId, voltage: f32, severity: Severity) -> ChannelOutcome {
        ChannelOutcome::Evaluated {
            reading: Reading {
                channel,
                voltage,
                cycle_index: 1,
            },
            severity,
        }
    }

    #[test]
    fn alarm_notifies_even_when_it_was_alarm_before() {
        let config = config(10);
        let mut prior = CycleState::fresh();
        prior.channel_mut(ChannelId::A).last_severity = Some(Severity::Alarm);

        let decision = decide(
            &config,
            &prior,
            &[
                evaluated(ChannelId::A, 10.2, Severity::Alarm),
                evaluated(ChannelId::B, 12.6, Severity::Normal),
            ],
            0,
        );

        assert_eq!(decision.events.len(), 1);
        assert_eq!(decision.events[0].channel, Some(ChannelId::A));
        assert_eq!(decision.events[0].subject_template, "Alarm ");
        assert!(!decision.is_all_clear());
    }

    #[test]
    fn warn_is_edge_triggered() {
        let config = config(10);
        let outcomes = [evaluated(ChannelId::B, 11.0, Severity::Warn)];

        let mut prior = CycleState::fresh();
        for previous in [None, Some(Severity::Normal), Some(Severity::Alarm)] {
            prior.channel_mut(ChannelId::B).last_severity = previous;
            let decision = decide(&config, &prior, &outcomes, 0);
            assert_eq!(decision.events.len(), 1, "after {previous:?}");
        }

        prior.channel_mut(ChannelId::B).last_severity = Some(Severity::Warn);
        assert!(decide(&config, &prior, &outcomes, 0).events.is_empty());
    }

    #[test]
    fn all_clear_waits_for_interval() {
        let config = config(3);
        let outcomes = [
            evaluated(ChannelId::A, 12.6, Severity::Normal),
            evaluated(ChannelId::B, 12.7, Severity::Normal),
        ];
        let mut prior = CycleState::fresh();

        prior.wakes_since_ok_sent = 1;
        let decision = decide(&config, &prior, &outcomes, 0);
        assert!(decision.events.is_empty());
        assert_eq!(decision.wakes_since_ok_sent, 2);

        prior.wakes_since_ok_sent = 2;
        let decision = decide(&config, &prior, &outcomes, 0);
        assert!(decision.is_all_clear());
        assert_eq!(decision.events[0].subject_template, "OK ");
    }

    #[test]
    fn unknown_channel_blocks_all_clear() {
        let config = config(1);
        let outcomes = [
            ChannelOutcome::Unknown {
                channel: ChannelId::A,
                error: AcquisitionError::Unavailable(ChannelId::A),
            },
            evaluated(ChannelId::B, 12.7, Severity::Normal),
        ];

        let decision = decide(&config, &CycleState::fresh(), &outcomes, 0);

        assert!(decision.events.is_empty());
        assert_eq!(decision.wakes_since_ok_sent, 1);
    }

    #[test]
    fn no_outcomes_is_not_all_clear() {
        let decision = decide(&config(1), &CycleState::fresh(), &[], 0);
        assert!(decision.events.is_empty());
    }
}
