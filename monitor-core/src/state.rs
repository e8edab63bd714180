//! Cycle state that survives deep sleep.
//!
//! The state is stored as a fixed-size record so it can live in a small
//! region of RTC memory:
//!
//! | offset        | size | content                                  |
//! |---------------|------|------------------------------------------|
//! | 0             | 1    | schema version                           |
//! | 1             | 1    | payload length `n`                       |
//! | 2             | n    | postcard encoded [`CycleState`]          |
//! | 2 + n         | 4    | CRC-32 (ISO-HDLC) of bytes `0..2 + n`, LE |
//!
//! Any record that does not check out is discarded and the cycle starts from
//! [`CycleState::fresh`]. That is also what happens on a cold boot, where the
//! region holds zeroes or garbage.

use core::fmt::{Display, Formatter, Result as FmtResult};

use crc::{Crc, CRC_32_ISO_HDLC};
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::{config::ChannelId, evaluator::Severity, MAX_CHANNELS};

pub const RECORD_SIZE: usize = 64;
pub const SCHEMA_VERSION: u8 = 1;

const HEADER_LEN: usize = 2;
const CRC_LEN: usize = 4;
const RECORD_CRC: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// Raw storage for the persisted record.
pub trait StateStore {
    fn load(&mut self) -> [u8; RECORD_SIZE];
    fn store(&mut self, record: &[u8; RECORD_SIZE]);
}

impl<T: StateStore + ?Sized> StateStore for &mut T {
    fn load(&mut self) -> [u8; RECORD_SIZE] {
        (**self).load()
    }

    fn store(&mut self, record: &[u8; RECORD_SIZE]) {
        (**self).store(record)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelState {
    pub channel: ChannelId,
    /// `None` until the channel has been evaluated once
    pub last_severity: Option<Severity>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleState {
    pub wake_count: u32,
    pub wakes_since_ok_sent: u32,
    /// Estimated seconds since the first boot, advanced by the sleep time
    pub monitor_time_secs: u64,
    pub channels: [ChannelState; MAX_CHANNELS],
}

impl Default for CycleState {
    fn default() -> Self {
        Self::fresh()
    }
}

impl CycleState {
    pub const fn fresh() -> Self {
        Self {
            wake_count: 0,
            wakes_since_ok_sent: 0,
            monitor_time_secs: 0,
            channels: [
                ChannelState {
                    channel: ChannelId::A,
                    last_severity: None,
                },
                ChannelState {
                    channel: ChannelId::B,
                    last_severity: None,
                },
            ],
        }
    }

    pub fn channel(&self, id: ChannelId) -> &ChannelState {
        &self.channels[id.index()]
    }

    pub fn channel_mut(&mut self, id: ChannelId) -> &mut ChannelState {
        &mut self.channels[id.index()]
    }

    pub fn encode(&self) -> Result<[u8; RECORD_SIZE], StateError> {
        let mut record = [0u8; RECORD_SIZE];
        record[0] = SCHEMA_VERSION;

        let payload_len = postcard::to_slice(self, &mut record[HEADER_LEN..RECORD_SIZE - CRC_LEN])
            .map_err(|_| StateError::Overflow)?
            .len();
        // payload area is smaller than 256 bytes
        record[1] = payload_len as u8;

        let end = HEADER_LEN + payload_len;
        let crc = RECORD_CRC.checksum(&record[..end]);
        record[end..end + CRC_LEN].copy_from_slice(&crc.to_le_bytes());
        Ok(record)
    }

    pub fn decode(record: &[u8; RECORD_SIZE]) -> Result<Self, StateError> {
        if record[0] != SCHEMA_VERSION {
            return Err(StateError::UnsupportedVersion(record[0]));
        }

        let payload_len = usize::from(record[1]);
        if payload_len == 0 || HEADER_LEN + payload_len + CRC_LEN > RECORD_SIZE {
            return Err(StateError::Length(payload_len));
        }

        let end = HEADER_LEN + payload_len;
        let stored = u32::from_le_bytes([
            record[end],
            record[end + 1],
            record[end + 2],
            record[end + 3],
        ]);
        let computed = RECORD_CRC.checksum(&record[..end]);
        if stored != computed {
            return Err(StateError::Checksum { stored, computed });
        }

        let state: Self =
            postcard::from_bytes(&record[HEADER_LEN..end]).map_err(|_| StateError::Payload)?;
        if state
            .channels
            .iter()
            .enumerate()
            .any(|(index, slot)| slot.channel.index() != index)
        {
            return Err(StateError::Payload);
        }
        Ok(state)
    }
}

/// Read the persisted state, falling back to a fresh one.
pub fn restore<S: StateStore>(store: &mut S) -> CycleState {
    let record = store.load();
    match CycleState::decode(&record) {
        Ok(state) => state,
        Err(StateError::UnsupportedVersion(0)) if record.iter().all(|&b| b == 0) => {
            info!("No persisted cycle state, starting fresh");
            CycleState::fresh()
        }
        Err(error) => {
            warn!("Discarding persisted cycle state: {}", error);
            CycleState::fresh()
        }
    }
}

pub fn persist<S: StateStore>(store: &mut S, state: &CycleState) -> Result<(), StateError> {
    let record = state.encode()?;
    store.store(&record);
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateError {
    UnsupportedVersion(u8),
    Length(usize),
    Checksum { stored: u32, computed: u32 },
    Payload,
    Overflow,
}

impl Display for StateError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::UnsupportedVersion(v) => write!(f, "unsupported schema version {}", v),
            Self::Length(n) => write!(f, "payload length {} out of range", n),
            Self::Checksum { stored, computed } => {
                write!(f, "checksum {:#010x} does not match {:#010x}", stored, computed)
            }
            Self::Payload => write!(f, "payload does not decode"),
            Self::Overflow => write!(f, "state does not fit into the record"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct MemoryStore([u8; RECORD_SIZE]);

    impl StateStore for MemoryStore {
        fn load(&mut self) -> [u8; RECORD_SIZE] {
            self.0
        }

        fn store(&mut self, record: &[u8; RECORD_SIZE]) {
            self.0 = *record;
        }
    }

    fn busy_state() -> CycleState {
        let mut state = CycleState::fresh();
        state.wake_count = 4_000_000_000;
        state.wakes_since_ok_sent = 47;
        state.monitor_time_secs = u64::MAX / 3;
        state.channel_mut(ChannelId::A).last_severity = Some(Severity::Alarm);
        state.channel_mut(ChannelId::B).last_severity = Some(Severity::Warn);
        state
    }

    #[test]
    fn record_survives_store_and_restore() {
        let mut store = MemoryStore([0; RECORD_SIZE]);
        let state = busy_state();

        persist(&mut store, &state).unwrap();

        assert_eq!(store.0[0], SCHEMA_VERSION);
        assert_eq!(restore(&mut store), state);
    }

    #[test]
    fn zeroed_memory_restores_fresh_state() {
        let mut store = MemoryStore([0; RECORD_SIZE]);
        assert_eq!(restore(&mut store), CycleState::fresh());
    }

    #[test]
    fn flipped_bit_is_detected() {
        let mut record = busy_state().encode().unwrap();
        record[5] ^= 0x10;

        assert!(matches!(
            CycleState::decode(&record),
            Err(StateError::Checksum { .. })
        ));

        let mut store = MemoryStore(record);
        assert_eq!(restore(&mut store), CycleState::fresh());
    }

    #[test]
    fn newer_schema_is_not_trusted() {
        let mut record = busy_state().encode().unwrap();
        record[0] = SCHEMA_VERSION + 1;

        assert_eq!(
            CycleState::decode(&record),
            Err(StateError::UnsupportedVersion(SCHEMA_VERSION + 1))
        );
    }

    #[test]
    fn length_past_the_record_is_rejected() {
        let mut record = [0xAAu8; RECORD_SIZE];
        record[0] = SCHEMA_VERSION;
        record[1] = (RECORD_SIZE - HEADER_LEN) as u8;

        assert_eq!(
            CycleState::decode(&record),
            Err(StateError::Length(RECORD_SIZE - HEADER_LEN))
        );
    }
}
