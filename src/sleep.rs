use embassy_time::Duration;
use esp_hal::peripherals::LPWR;
use esp_hal::rtc_cntl::sleep::TimerWakeupSource;
use esp_hal::rtc_cntl::Rtc;
use log::info;

/// Enter deep sleep for the specified duration. The timer is the only wake-up
/// source; waking up resets the chip and starts the next cycle from `main`.
pub fn enter_deep(rtc_cntl: LPWR<'static>, interval: Duration) -> ! {
    let wakeup_source_timer = TimerWakeupSource::new(interval.into());

    let mut rtc = Rtc::new(rtc_cntl);

    info!("Entering deep sleep for {}s", interval.as_secs());
    rtc.sleep_deep(&[&wakeup_source_timer]);
}
