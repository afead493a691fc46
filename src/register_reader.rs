use crate::error::ReadError;
use async_trait::async_trait;
use serde_derive::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Mutex,
    },
    time::Duration,
};

/// One 16-bit word read from a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRegister {
    pub index: usize,
    pub address: u16,
    pub raw_value: u16,
}

/// Reads a contiguous block of registers from one device.
///
/// Implementations return exactly `count` registers, addressed
/// `start_address..start_address + count` in order.
#[async_trait]
pub trait RegisterReader: Send + Sync {
    async fn read(
        &self,
        host: &str,
        port: u16,
        start_address: u16,
        count: u16,
    ) -> Result<Vec<RawRegister>, ReadError>;
}

/// Turns a plain word block into addressed registers.
pub fn to_raw_registers(start_address: u16, words: &[u16]) -> Vec<RawRegister> {
    words
        .iter()
        .enumerate()
        .map(|(index, word)| RawRegister {
            index,
            address: start_address.wrapping_add(index as u16),
            raw_value: *word,
        })
        .collect()
}

/// Deterministic stand-in for a device, used by tests and demo setups.
///
/// Registers not pinned with [`SimulatedRegisterReader::set_register`] return a
/// value derived only from the address and the number of reads served so far.
#[derive(Debug, Default)]
pub struct SimulatedRegisterReader {
    reads: AtomicU64,
    failing: AtomicBool,
    latency: Duration,
    pinned: Mutex<HashMap<u16, u16>>,
}

impl SimulatedRegisterReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every read sleeps for `latency` before answering.
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency,
            ..Self::default()
        }
    }

    pub fn set_register(&self, address: u16, value: u16) {
        let mut pinned = self.pinned.lock().unwrap_or_else(|e| e.into_inner());
        pinned.insert(address, value);
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Relaxed);
    }

    /// Number of read calls received, failed ones included.
    pub fn read_count(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    fn simulated_value(address: u16, read_number: u64) -> u16 {
        ((address as u64 * 31 + read_number * 7) % 1000) as u16
    }
}

#[async_trait]
impl RegisterReader for SimulatedRegisterReader {
    async fn read(
        &self,
        host: &str,
        _port: u16,
        start_address: u16,
        count: u16,
    ) -> Result<Vec<RawRegister>, ReadError> {
        let read_number = self.reads.fetch_add(1, Ordering::Relaxed);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if self.failing.load(Ordering::Relaxed) {
            return Err(ReadError::Connection(format!("{host} is unreachable")));
        }
        if start_address as u32 + count as u32 > u16::MAX as u32 + 1 {
            return Err(ReadError::Protocol(format!(
                "range {start_address}+{count} out of bounds"
            )));
        }

        let pinned = self.pinned.lock().unwrap_or_else(|e| e.into_inner());
        let words: Vec<u16> = (0..count)
            .map(|offset| {
                let address = start_address + offset;
                pinned
                    .get(&address)
                    .copied()
                    .unwrap_or_else(|| Self::simulated_value(address, read_number))
            })
            .collect();
        Ok(to_raw_registers(start_address, &words))
    }
}
