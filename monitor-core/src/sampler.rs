use core::fmt::{Display, Formatter, Result as FmtResult};

use embedded_hal_async::delay::DelayNs;
use heapless::Vec;
use log::{debug, warn};

use crate::config::{ChannelConfig, ChannelId, SamplingConfig};

/// Capacity of a [`Sample`].
pub const MAX_READINGS: usize = 64;

/// One-shot raw ADC access for a battery channel.
pub trait AdcReader {
    fn read_raw(&mut self, channel: &ChannelConfig) -> Result<u16, AcquisitionError>;
}

impl<T: AdcReader + ?Sized> AdcReader for &mut T {
    fn read_raw(&mut self, channel: &ChannelConfig) -> Result<u16, AcquisitionError> {
        (**self).read_raw(channel)
    }
}

/// Raw readings taken from one channel during one cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    channel: ChannelId,
    readings: Vec<u16, MAX_READINGS>,
}

impl Sample {
    pub fn channel(&self) -> ChannelId {
        self.channel
    }

    pub fn readings(&self) -> &[u16] {
        &self.readings
    }

    /// Arithmetic mean of the raw readings.
    pub fn mean(&self) -> f32 {
        let sum: u32 = self.readings.iter().map(|&r| u32::from(r)).sum();
        sum as f32 / self.readings.len() as f32
    }
}

/// Takes `num_readings` ADC readings per channel with a fixed pause between them.
pub struct Sampler<A, D> {
    adc: A,
    delay: D,
    config: SamplingConfig,
}

impl<A, D> Sampler<A, D>
where
    A: AdcReader,
    D: DelayNs,
{
    pub fn new(adc: A, delay: D, config: SamplingConfig) -> Self {
        Self { adc, delay, config }
    }

    pub async fn sample(&mut self, channel: &ChannelConfig) -> Result<Sample, AcquisitionError> {
        let count = self.config.num_readings.min(MAX_READINGS);
        if count == 0 {
            return Err(AcquisitionError::NoReadings(channel.id));
        }

        let mut readings: Vec<u16, MAX_READINGS> = Vec::new();
        for index in 0..count {
            if index > 0 {
                self.delay
                    .delay_ms(self.config.delay_between_readings_ms)
                    .await;
            }
            let raw = self.adc.read_raw(channel).inspect_err(|error| {
                warn!("{}: reading {}/{} failed: {}", channel.label, index + 1, count, error);
            })?;
            // count is bounded by MAX_READINGS above
            let _ = readings.push(raw);
        }

        let sample = Sample {
            channel: channel.id,
            readings,
        };
        debug!(
            "{}: {} readings on pin {}, mean {}",
            channel.label,
            count,
            channel.adc_pin,
            sample.mean()
        );
        Ok(sample)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquisitionError {
    /// The ADC could not deliver a conversion for this channel
    Unavailable(ChannelId),
    /// The channel has no ADC pin wired in this build
    NotWired(ChannelId),
    NoReadings(ChannelId),
}

impl Display for AcquisitionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Unavailable(id) => write!(f, "ADC read unavailable on channel {}", id),
            Self::NotWired(id) => write!(f, "no ADC pin wired for channel {}", id),
            Self::NoReadings(id) => write!(f, "no readings requested for channel {}", id),
        }
    }
}
