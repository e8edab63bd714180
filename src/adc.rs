use esp_hal::{
    analog::adc::{Adc, AdcConfig, AdcPin, Attenuation},
    peripherals::{ADC1, GPIO34, GPIO35},
    Blocking,
};
use log::info;
use monitor_core::{AcquisitionError, AdcReader, ChannelConfig, ChannelId};

use crate::config::{ADC_PIN_A, ADC_PIN_B, BATTERY_B_MONITORED};

pub struct BatteryPeripherals {
    pub adc1: ADC1<'static>,
    pub battery_a_pin: GPIO34<'static>,
    pub battery_b_pin: GPIO35<'static>,
}

/// One-shot reads of both battery dividers on ADC1.
pub struct BatteryAdc {
    adc: Adc<'static, ADC1<'static>, Blocking>,
    battery_a: AdcPin<GPIO34<'static>, ADC1<'static>>,
    battery_b: Option<AdcPin<GPIO35<'static>, ADC1<'static>>>,
}

impl BatteryAdc {
    pub fn new(p: BatteryPeripherals) -> Self {
        // 11 dB covers the full 0..3.3 V divider output
        let mut adc1_config = AdcConfig::new();
        let battery_a = adc1_config.enable_pin(p.battery_a_pin, Attenuation::_11dB);
        let battery_b = BATTERY_B_MONITORED
            .then(|| adc1_config.enable_pin(p.battery_b_pin, Attenuation::_11dB));
        let adc = Adc::new(p.adc1, adc1_config);

        info!(
            "ADC1 ready, battery A on GPIO{}, battery B {}",
            ADC_PIN_A,
            if battery_b.is_some() { "on GPIO35" } else { "off" }
        );

        Self {
            adc,
            battery_a,
            battery_b,
        }
    }
}

impl AdcReader for BatteryAdc {
    fn read_raw(&mut self, channel: &ChannelConfig) -> Result<u16, AcquisitionError> {
        let read = match (channel.id, channel.adc_pin) {
            (ChannelId::A, ADC_PIN_A) => nb::block!(self.adc.read_oneshot(&mut self.battery_a)),
            (ChannelId::B, ADC_PIN_B) => match self.battery_b.as_mut() {
                Some(pin) => nb::block!(self.adc.read_oneshot(pin)),
                None => return Err(AcquisitionError::NotWired(channel.id)),
            },
            _ => return Err(AcquisitionError::NotWired(channel.id)),
        };
        read.map_err(|_| AcquisitionError::Unavailable(channel.id))
    }
}
