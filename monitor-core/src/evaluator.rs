use core::fmt::{Display, Formatter, Result as FmtResult};

use serde::{Deserialize, Serialize};

use crate::config::ChannelConfig;

/// Classification of a battery voltage, ordered by urgency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    Normal,
    Warn,
    Alarm,
}

impl Display for Severity {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Normal => write!(f, "NORMAL"),
            Self::Warn => write!(f, "WARN"),
            Self::Alarm => write!(f, "ALARM"),
        }
    }
}

/// Both thresholds are inclusive on the low side.
pub fn classify(volts: f32, config: &ChannelConfig) -> Severity {
    if volts <= config.alarm_low_volts {
        Severity::Alarm
    } else if volts <= config.warn_low_volts {
        Severity::Warn
    } else {
        Severity::Normal
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChannelId;

    fn channel() -> ChannelConfig {
        ChannelConfig {
            id: ChannelId::A,
            label: "Battery A (Engine)",
            adc_pin: 34,
            multiplier: 189.0,
            warn_low_volts: 11.5,
            alarm_low_volts: 10.5,
            warn_subject: "Warn: Battery A (Engine) ",
            alarm_subject: "Alarm: Battery A (Engine) ",
            monitored: true,
        }
    }

    #[test]
    fn above_warn_is_normal() {
        let config = channel();
        for volts in [11.51, 12.0, 12.7, 14.4, 30.0] {
            assert_eq!(classify(volts, &config), Severity::Normal, "{volts} V");
        }
    }

    #[test]
    fn between_thresholds_is_warn() {
        let config = channel();
        for volts in [10.51, 11.0, 11.49, 11.5] {
            assert_eq!(classify(volts, &config), Severity::Warn, "{volts} V");
        }
    }

    #[test]
    fn at_or_below_alarm_is_alarm() {
        let config = channel();
        for volts in [10.5, 10.2, 3.0, 0.0, -1.0] {
            assert_eq!(classify(volts, &config), Severity::Alarm, "{volts} V");
        }
    }

    #[test]
    fn severities_are_ordered() {
        assert!(Severity::Normal < Severity::Warn);
        assert!(Severity::Warn < Severity::Alarm);
        assert_eq!(
            [Severity::Warn, Severity::Alarm, Severity::Normal]
                .into_iter()
                .max(),
            Some(Severity::Alarm)
        );
    }
}
