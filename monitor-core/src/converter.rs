use crate::config::ChannelId;

/// Averaged battery voltage of one channel in one wake cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    pub channel: ChannelId,
    pub voltage: f32,
    pub cycle_index: u32,
}

/// Scale a raw ADC mean to volts with the channel's divider multiplier.
pub fn to_volts(raw_mean: f32, multiplier: f32) -> f32 {
    raw_mean / multiplier
}
