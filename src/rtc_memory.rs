//! Cycle state record kept in RTC fast memory across deep sleep.
//!
//! Statics placed with `#[ram(unstable(rtc_fast))]` need interior mutability.
//! [`RtcCell`] provides it behind a critical section so no call site needs
//! `unsafe`. The single executor runs cooperatively on one core and deep
//! sleep halts execution, so access across boots is sequential.

use core::cell::UnsafeCell;

use esp_hal::ram;
use monitor_core::{state::RECORD_SIZE, StateStore};

/// Zeroed on a cold boot, kept across deep sleep.
#[ram(unstable(rtc_fast))]
static CYCLE_RECORD: RtcCell<[u8; RECORD_SIZE]> = RtcCell::new([0; RECORD_SIZE]);

/// Interior mutability for a static in RTC fast memory.
pub struct RtcCell<T> {
    value: UnsafeCell<T>,
}

impl<T> RtcCell<T> {
    pub const fn new(value: T) -> Self {
        Self {
            value: UnsafeCell::new(value),
        }
    }

    #[inline]
    pub fn get(&self) -> T
    where
        T: Copy,
    {
        critical_section::with(|_cs| {
            // SAFETY: interrupts are off and there is a single core running
            // a cooperative executor, so nothing else touches the value.
            unsafe { *self.value.get() }
        })
    }

    #[inline]
    pub fn set(&self, value: T) {
        critical_section::with(|_cs| {
            // SAFETY: as in `get`.
            unsafe {
                *self.value.get() = value;
            }
        })
    }
}

// SAFETY: every access goes through a critical section.
unsafe impl<T> Sync for RtcCell<T> where T: Send {}

/// [`StateStore`] backed by [`CYCLE_RECORD`].
pub struct RtcStateStore;

impl StateStore for RtcStateStore {
    fn load(&mut self) -> [u8; RECORD_SIZE] {
        CYCLE_RECORD.get()
    }

    fn store(&mut self, record: &[u8; RECORD_SIZE]) {
        CYCLE_RECORD.set(*record);
    }
}
