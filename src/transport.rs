//! Byte-level transport abstraction.
//!
//! The protocol engine is written against [`Transport`] so the same
//! transaction code runs over a real serial port or a scripted test
//! double.

use crate::error::Result;
use std::time::Duration;

/// A half-duplex byte pipe with explicit open/close and bounded reads.
pub trait Transport: Send {
    /// Opens the underlying device. Opening an open transport is a no-op.
    fn open(&mut self) -> Result<()>;

    /// Closes the underlying device. Closing a closed transport is a no-op.
    fn close(&mut self);

    /// Whether the transport is currently open.
    fn is_open(&self) -> bool;

    /// Writes the entire buffer.
    fn write(&mut self, data: &[u8]) -> Result<()>;

    /// Reads up to `buf.len()` bytes, returning how many arrived.
    ///
    /// Returns whatever is available once `timeout` elapses, possibly
    /// zero bytes; it must never block past the deadline.
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize>;

    /// Human-readable description of the endpoint, for logs.
    fn describe(&self) -> String;
}

#[cfg(test)]
pub(crate) mod testing {
    //! A register-space test double.
    //!
    //! `MockDevice` behaves like a small Modbus slave: it parses request
    //! frames, serves reads from a register map, applies writes and echoes
    //! them, and stays silent on frames addressed to someone else or
    //! carrying a bad CRC. Fault injection covers corrupted replies,
    //! swallowed replies and a device that dies mid-conversation.

    use super::Transport;
    use crate::crc::crc16;
    use crate::error::{Error, Result};
    use std::collections::{BTreeMap, VecDeque};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[derive(Default)]
    struct State {
        open: bool,
        slave: u8,
        registers: BTreeMap<u16, u16>,
        requests: Vec<Vec<u8>>,
        pending: VecDeque<u8>,
        corrupt_replies: u32,
        drop_replies: u32,
        reply_budget: Option<u32>,
    }

    /// Cloning yields another handle onto the same device, so tests can
    /// hand one clone to a client and keep another for inspection.
    #[derive(Clone)]
    pub(crate) struct MockDevice {
        state: Arc<Mutex<State>>,
    }

    impl MockDevice {
        pub fn new(slave: u8) -> Self {
            let state = State {
                slave,
                ..State::default()
            };
            Self {
                state: Arc::new(Mutex::new(state)),
            }
        }

        pub fn set_register(&self, address: u16, value: u16) {
            self.state.lock().unwrap().registers.insert(address, value);
        }

        pub fn set_registers(&self, address: u16, values: &[u16]) {
            let mut state = self.state.lock().unwrap();
            for (offset, value) in values.iter().enumerate() {
                state.registers.insert(address + offset as u16, *value);
            }
        }

        pub fn register(&self, address: u16) -> Option<u16> {
            self.state.lock().unwrap().registers.get(&address).copied()
        }

        pub fn request_count(&self) -> usize {
            self.state.lock().unwrap().requests.len()
        }

        pub fn requests(&self) -> Vec<Vec<u8>> {
            self.state.lock().unwrap().requests.clone()
        }

        /// Corrupts the CRC trailer of the next `n` replies.
        pub fn corrupt_next_replies(&self, n: u32) {
            self.state.lock().unwrap().corrupt_replies = n;
        }

        /// Swallows the next `n` replies entirely.
        pub fn drop_next_replies(&self, n: u32) {
            self.state.lock().unwrap().drop_replies = n;
        }

        /// Serves `n` more replies, then goes permanently silent.
        pub fn fail_after_replies(&self, n: u32) {
            self.state.lock().unwrap().reply_budget = Some(n);
        }
    }

    impl State {
        fn respond(&mut self, frame: &[u8]) {
            if frame.len() < 4 {
                return;
            }
            let (body, trailer) = frame.split_at(frame.len() - 2);
            if crc16(body).to_le_bytes() != [trailer[0], trailer[1]] {
                return;
            }
            if frame[0] != self.slave {
                return;
            }
            if self.drop_replies > 0 {
                self.drop_replies -= 1;
                return;
            }
            match self.reply_budget {
                Some(0) => return,
                Some(ref mut budget) => *budget -= 1,
                None => {}
            }
            let function = frame[1];
            let address = u16::from_be_bytes([frame[2], frame[3]]);
            let mut response = match function {
                0x03 | 0x04 => {
                    let count = u16::from_be_bytes([frame[4], frame[5]]);
                    if count == 0 || !self.registers.contains_key(&address) {
                        self.exception(function, 0x02)
                    } else {
                        let mut body = vec![self.slave, function, (count * 2) as u8];
                        for offset in 0..count {
                            let value = self
                                .registers
                                .get(&(address + offset))
                                .copied()
                                .unwrap_or(0);
                            body.extend_from_slice(&value.to_be_bytes());
                        }
                        finish(body)
                    }
                }
                0x06 => {
                    let value = u16::from_be_bytes([frame[4], frame[5]]);
                    self.registers.insert(address, value);
                    frame.to_vec()
                }
                0x10 => {
                    let count = u16::from_be_bytes([frame[4], frame[5]]);
                    for offset in 0..count {
                        let at = 7 + 2 * offset as usize;
                        let value = u16::from_be_bytes([frame[at], frame[at + 1]]);
                        self.registers.insert(address + offset, value);
                    }
                    finish(frame[..6].to_vec())
                }
                _ => self.exception(function, 0x01),
            };
            if self.corrupt_replies > 0 {
                self.corrupt_replies -= 1;
                let last = response.len() - 1;
                response[last] ^= 0xFF;
            }
            self.pending.extend(response);
        }

        fn exception(&self, function: u8, code: u8) -> Vec<u8> {
            finish(vec![self.slave, function | 0x80, code])
        }
    }

    fn finish(mut body: Vec<u8>) -> Vec<u8> {
        let crc = crc16(&body);
        body.extend_from_slice(&crc.to_le_bytes());
        body
    }

    impl Transport for MockDevice {
        fn open(&mut self) -> Result<()> {
            self.state.lock().unwrap().open = true;
            Ok(())
        }

        fn close(&mut self) {
            self.state.lock().unwrap().open = false;
        }

        fn is_open(&self) -> bool {
            self.state.lock().unwrap().open
        }

        fn write(&mut self, data: &[u8]) -> Result<()> {
            let mut state = self.state.lock().unwrap();
            if !state.open {
                return Err(Error::NotConnected);
            }
            state.requests.push(data.to_vec());
            state.pending.clear();
            state.respond(data);
            Ok(())
        }

        fn read(&mut self, buf: &mut [u8], _timeout: Duration) -> Result<usize> {
            let mut state = self.state.lock().unwrap();
            if !state.open {
                return Err(Error::NotConnected);
            }
            let mut filled = 0;
            while filled < buf.len() {
                match state.pending.pop_front() {
                    Some(byte) => {
                        buf[filled] = byte;
                        filled += 1;
                    }
                    None => break,
                }
            }
            Ok(filled)
        }

        fn describe(&self) -> String {
            "mock device".into()
        }
    }
}
