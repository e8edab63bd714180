#![no_std]
#![no_main]

use core::num::ParseIntError;

use adc::{BatteryAdc, BatteryPeripherals};
use config::{monitor_config, smtp_account, smtp_port, SMTP_HOST};
use embassy_executor::Spawner;
use embassy_time::{Delay, Duration};
use esp_backtrace as _;
use esp_hal::{clock::CpuClock, peripherals::WIFI, timer::timg::TimerGroup};
use log::{error, info, LevelFilter};
use mail::SmtpMailer;
use monitor_core::{ConfigError, CycleController, MonitorConfig};
use rtc_memory::RtcStateStore;
use sleep::enter_deep;

extern crate alloc;

mod adc;
mod config;
mod mail;
mod rtc_memory;
mod sleep;
mod wifi;

esp_bootloader_esp_idf::esp_app_desc!();

#[esp_rtos::main]
async fn main(spawner: Spawner) -> ! {
    let peripherals = esp_hal::init(esp_hal::Config::default().with_cpu_clock(CpuClock::max()));

    esp_alloc::heap_allocator!(size: 72 * 1024);

    let timg0 = TimerGroup::new(peripherals.TIMG0);
    esp_rtos::start(timg0.timer0);

    let monitor = monitor_config();
    esp_println::logger::init_logger(if monitor.debug {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    });

    let battery_peripherals = BatteryPeripherals {
        adc1: peripherals.ADC1,
        battery_a_pin: peripherals.GPIO34,
        battery_b_pin: peripherals.GPIO35,
    };

    if let Err(error) = run_cycle(spawner, &monitor, battery_peripherals, peripherals.WIFI).await {
        error!("Skipping this cycle: {}", error);
    }

    enter_deep(peripherals.LPWR, Duration::from_secs(monitor.sleep_secs));
}

/// Sample, evaluate, notify and persist once.
async fn run_cycle(
    spawner: Spawner,
    monitor: &MonitorConfig,
    battery_peripherals: BatteryPeripherals,
    wifi: WIFI<'static>,
) -> Result<(), Error> {
    monitor.validate()?;

    let adc = BatteryAdc::new(battery_peripherals);
    let mailer = SmtpMailer::new(wifi, spawner, smtp_account(), SMTP_HOST, smtp_port()?);
    let mut controller = CycleController::new(monitor, adc, mailer, Delay, RtcStateStore);

    let report = controller.run().await;

    info!(
        "Cycle {} done: {} event(s), delivery {:?}, {} wakes since last OK",
        report.cycle_index,
        report.decision.events.len(),
        report.delivery,
        report.state.wakes_since_ok_sent
    );
    Ok(())
}

#[derive(Debug)]
enum Error {
    Config(ConfigError),
    SmtpPort(ParseIntError),
}

impl From<ConfigError> for Error {
    fn from(error: ConfigError) -> Self {
        Self::Config(error)
    }
}

impl From<ParseIntError> for Error {
    fn from(error: ParseIntError) -> Self {
        Self::SmtpPort(error)
    }
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Config(error) => write!(f, "invalid configuration: {}", error),
            Self::SmtpPort(error) => write!(f, "SMTP_PORT is not a port number: {}", error),
        }
    }
}
