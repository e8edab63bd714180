use core::num::ParseIntError;

use heapless::Vec;
use monitor_core::{
    config::{ChannelConfig, RetryPolicy, SamplingConfig},
    smtp::SmtpAccount,
    ChannelId, MonitorConfig,
};

pub const DEVICE_ID: &str = "battery-monitor";

// Battery voltage thresholds in volts, inclusive on the low side
pub const BATTERY_A_WARN_LOW: f32 = 11.5;
pub const BATTERY_B_WARN_LOW: f32 = 11.5;
pub const BATTERY_A_ALARM_LOW: f32 = 10.5;
pub const BATTERY_B_ALARM_LOW: f32 = 10.5;

// Keep each subject below half of monitor_core::BUF_SIZE
pub const SUBJECT_BATTERY_MONITOR_WORKING: &str = "OK: Batteries Charged";
pub const SUBJECT_BATTERY_A_ALARM_LOW: &str = "Alarm: Battery A (Engine) ";
pub const SUBJECT_BATTERY_B_ALARM_LOW: &str = "Alarm: Battery B (DeepCycle) ";
pub const SUBJECT_BATTERY_A_WARN_LOW: &str = "Warn: Battery A (Engine) ";
pub const SUBJECT_BATTERY_B_WARN_LOW: &str = "Warn: Battery B (DeepCycle) ";

// ESP will go to deep sleep and not sample for this duration
pub const TIME_TO_SLEEP: u64 = 1800;
/// Wake cycles between all-clear mails while nothing else is reported
pub const IM_OK_INTERVAL: u32 = 1;

pub const ADC_PIN_A: u8 = 34;
pub const ADC_PIN_B: u8 = 35;
/// Raw ADC counts per volt for the divider on channel A, measured
pub const ADC_A_MULTIPLIER: f32 = 189.0;
pub const ADC_B_MULTIPLIER: f32 = 179.0;
pub const NUM_READINGS: usize = 25;
pub const DELAY_BETWEEN_READINGS: u32 = 50;
pub const BATTERY_B_MONITORED: bool = true;

pub const NUM_WIFI_ATTEMPTS: u8 = 25;
pub const WIFI_RETRY_INTERVAL: u32 = 100;

/// Log only, never send, while developing
pub const SEND_MAIL: bool = true;
pub const DEBUG: bool = true;

pub const WIFI_SSID: &str = env!("WIFI_SSID", "WIFI_SSID is not set, see .env.example");
pub const WIFI_PASSWORD: &str = env!("WIFI_PASSWORD", "WIFI_PASSWORD is not set, see .env.example");

pub const SMTP_HOST: &str = env!("SMTP_HOST", "SMTP_HOST is not set, see .env.example");
const SMTP_PORT: &str = env!("SMTP_PORT", "SMTP_PORT is not set, see .env.example");
pub const SMTP_FROM_NAME: &str =
    env!("SMTP_FROM_NAME", "SMTP_FROM_NAME is not set, see .env.example");
pub const SMTP_FROM_EMAIL: &str =
    env!("SMTP_FROM_EMAIL", "SMTP_FROM_EMAIL is not set, see .env.example");
pub const SMTP_PASSWORD: &str = env!("SMTP_PASSWORD", "SMTP_PASSWORD is not set, see .env.example");
pub const SMTP_TO_EMAIL1: &str =
    env!("SMTP_TO_EMAIL1", "SMTP_TO_EMAIL1 is not set, see .env.example");
pub const SMTP_TO_EMAIL2: &str =
    env!("SMTP_TO_EMAIL2", "SMTP_TO_EMAIL2 is not set, see .env.example");

pub fn monitor_config() -> MonitorConfig {
    let engine = ChannelConfig {
        id: ChannelId::A,
        label: "Battery A (Engine)",
        adc_pin: ADC_PIN_A,
        multiplier: ADC_A_MULTIPLIER,
        warn_low_volts: BATTERY_A_WARN_LOW,
        alarm_low_volts: BATTERY_A_ALARM_LOW,
        warn_subject: SUBJECT_BATTERY_A_WARN_LOW,
        alarm_subject: SUBJECT_BATTERY_A_ALARM_LOW,
        monitored: true,
    };
    let deep_cycle = ChannelConfig {
        id: ChannelId::B,
        label: "Battery B (DeepCycle)",
        adc_pin: ADC_PIN_B,
        multiplier: ADC_B_MULTIPLIER,
        warn_low_volts: BATTERY_B_WARN_LOW,
        alarm_low_volts: BATTERY_B_ALARM_LOW,
        warn_subject: SUBJECT_BATTERY_B_WARN_LOW,
        alarm_subject: SUBJECT_BATTERY_B_ALARM_LOW,
        monitored: BATTERY_B_MONITORED,
    };

    MonitorConfig {
        channels: Vec::from_array([engine, deep_cycle]),
        sampling: SamplingConfig {
            num_readings: NUM_READINGS,
            delay_between_readings_ms: DELAY_BETWEEN_READINGS,
        },
        ok_interval: IM_OK_INTERVAL,
        ok_subject: SUBJECT_BATTERY_MONITOR_WORKING,
        sleep_secs: TIME_TO_SLEEP,
        wifi_retry: RetryPolicy {
            attempts: NUM_WIFI_ATTEMPTS,
            interval_ms: WIFI_RETRY_INTERVAL,
        },
        send_mail: SEND_MAIL,
        debug: DEBUG,
    }
}

/// The sender address doubles as the login; no password means no AUTH.
pub fn smtp_account() -> SmtpAccount<'static> {
    SmtpAccount {
        helo_domain: DEVICE_ID,
        username: if SMTP_PASSWORD.is_empty() {
            ""
        } else {
            SMTP_FROM_EMAIL
        },
        password: SMTP_PASSWORD,
        from_name: SMTP_FROM_NAME,
        from_email: SMTP_FROM_EMAIL,
        recipients: [SMTP_TO_EMAIL1, SMTP_TO_EMAIL2],
    }
}

pub fn smtp_port() -> Result<u16, ParseIntError> {
    SMTP_PORT.parse()
}
