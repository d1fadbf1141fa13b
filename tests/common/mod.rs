//! In-memory Wii Remote used by the integration tests.
//!
//! The control side answers every report with a handshake byte. Register
//! requests are answered on a simulated interrupt channel that feeds a real
//! listener thread, so replies reach the driver the same way they do over
//! the bridge.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::io::{self, Read, Write};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;

use wiimote_rw::infrastructure::wiimote::bridge::run_listener;
use wiimote_rw::infrastructure::wiimote::protocol::{
    INPUT_REPORT_HEADER, OUTPUT_REPORT_HEADER, RPT_READ_DATA, RPT_READ_REQ, RPT_WRITE, RPT_WRITE_ACK,
};
use wiimote_rw::{RwResolver, RwState, Wiimote};

/// Content of memory that was never written
pub fn default_byte(addr: u32) -> u8 {
    ((addr >> 8) ^ addr) as u8
}

#[derive(Default)]
pub struct DeviceState {
    /// Every frame the host managed to write, in order
    pub sent: Vec<Vec<u8>>,
    pub eeprom: HashMap<u32, u8>,
    pub registers: HashMap<u32, u8>,
    /// Handshake bytes for the next reports; 0x00 once empty
    pub handshake_script: VecDeque<u8>,
    /// Answer nothing on the control channel
    pub withhold_handshakes: bool,
    /// Never answer register requests
    pub silent: bool,
    pub read_error: Option<u8>,
    pub write_error: Option<u8>,
    /// Fail the write of report `.0` after `.1` successful ones
    pub fail_report: Option<(u8, usize)>,
    /// Register requests seen
    pub rw_requests: usize,
    /// Register requests that arrived while the host slot was not Pending
    pub unpublished_requests: usize,
    /// Host-side view of the transaction slot
    observer: Option<RwResolver>,
}

impl DeviceState {
    pub fn report_ids(&self) -> Vec<u8> {
        self.sent.iter().map(|f| f[1]).collect()
    }

    pub fn frames_of(&self, report_id: u8) -> Vec<Vec<u8>> {
        self.sent.iter().filter(|f| f[1] == report_id).cloned().collect()
    }

    fn memory(&mut self, flags: u8) -> &mut HashMap<u32, u8> {
        if flags & 0x04 != 0 {
            &mut self.registers
        } else {
            &mut self.eeprom
        }
    }
}

/// Control channel of the emulated device
pub struct DeviceChannel {
    state: Arc<Mutex<DeviceState>>,
    handshakes: VecDeque<u8>,
    interrupt: mpsc::Sender<Vec<u8>>,
}

impl DeviceChannel {
    fn lock(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock().unwrap()
    }

    fn answer(&mut self, frame: &[u8]) {
        let mut state = self.state.lock().unwrap();
        let handshake = state.handshake_script.pop_front().unwrap_or(0x00);
        if !state.withhold_handshakes {
            self.handshakes.push_back(handshake);
        }
        if handshake != 0x00 || state.silent {
            return;
        }

        if matches!(frame[1], RPT_WRITE | RPT_READ_REQ) {
            let published = state.observer.as_ref().map_or(true, |o| o.state() == RwState::Pending);
            if !published {
                state.unpublished_requests += 1;
            }
        }

        let payload = &frame[2..];
        let replies = match frame[1] {
            RPT_WRITE => {
                state.rw_requests += 1;
                let offset = u32::from_be_bytes([0, payload[1], payload[2], payload[3]]);
                let len = payload[4] as usize;
                let data = payload[5..5 + len].to_vec();
                let memory = state.memory(payload[0]);
                for (i, b) in data.into_iter().enumerate() {
                    memory.insert(offset + i as u32, b);
                }
                let error = state.write_error.unwrap_or(0);
                vec![vec![INPUT_REPORT_HEADER, RPT_WRITE_ACK, 0x00, 0x00, RPT_WRITE, error]]
            }
            RPT_READ_REQ => {
                state.rw_requests += 1;
                let offset = u32::from_be_bytes([0, payload[1], payload[2], payload[3]]);
                let len = u16::from_be_bytes([payload[4], payload[5]]) as u32;
                let error = state.read_error.unwrap_or(0);
                let flags = payload[0];
                let memory = state.memory(flags).clone();
                read_replies(&memory, offset, len, error)
            }
            _ => Vec::new(),
        };
        drop(state);

        for reply in replies {
            let _ = self.interrupt.send(reply);
        }
    }
}

fn read_replies(memory: &HashMap<u32, u8>, offset: u32, len: u32, error: u8) -> Vec<Vec<u8>> {
    let mut replies = Vec::new();
    let mut addr = offset;
    while addr < offset + len {
        let size = (offset + len - addr).min(16);
        let mut frame = vec![0u8; 23];
        frame[0] = INPUT_REPORT_HEADER;
        frame[1] = RPT_READ_DATA;
        frame[4] = (((size - 1) as u8) << 4) | error;
        frame[5..7].copy_from_slice(&(addr as u16).to_be_bytes());
        for i in 0..size {
            let a = addr + i;
            frame[7 + i as usize] = memory.get(&a).copied().unwrap_or_else(|| default_byte(a));
        }
        replies.push(frame);
        if error != 0 {
            break;
        }
        addr += size;
    }
    replies
}

impl Write for DeviceChannel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        assert_eq!(buf[0], OUTPUT_REPORT_HEADER, "output reports start with SET_REPORT|OUTPUT");
        {
            let mut state = self.lock();
            if let Some((report_id, remaining)) = state.fail_report {
                if report_id == buf[1] {
                    if remaining == 0 {
                        return Err(io::Error::new(io::ErrorKind::BrokenPipe, "link dropped"));
                    }
                    state.fail_report = Some((report_id, remaining - 1));
                }
            }
            state.sent.push(buf.to_vec());
        }
        self.answer(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Read for DeviceChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.handshakes.pop_front() {
            Some(b) if !buf.is_empty() => {
                buf[0] = b;
                Ok(1)
            }
            _ => Ok(0),
        }
    }
}

/// Interrupt channel as the listener sees it: length-prefixed frames
struct InterruptReader {
    frames: mpsc::Receiver<Vec<u8>>,
    pending: VecDeque<u8>,
}

impl Read for InterruptReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pending.is_empty() {
            match self.frames.recv() {
                Ok(frame) => {
                    self.pending.push_back(frame.len() as u8);
                    self.pending.extend(frame);
                }
                Err(_) => return Ok(0),
            }
        }
        let n = buf.len().min(self.pending.len());
        for (dst, src) in buf.iter_mut().zip(self.pending.drain(..n)) {
            *dst = src;
        }
        Ok(n)
    }
}

pub struct Emulator {
    pub wiimote: Arc<Wiimote<DeviceChannel>>,
    pub state: Arc<Mutex<DeviceState>>,
    pub listener: JoinHandle<io::Result<()>>,
}

impl Emulator {
    pub fn state(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock().unwrap()
    }
}

pub fn connect(id: i32) -> Emulator {
    connect_with_timeout(id, None)
}

pub fn connect_with_timeout(id: i32, timeout: Option<Duration>) -> Emulator {
    let state = Arc::new(Mutex::new(DeviceState::default()));
    let (tx, rx) = mpsc::channel();
    let channel = DeviceChannel {
        state: state.clone(),
        handshakes: VecDeque::new(),
        interrupt: tx,
    };
    let wiimote = Arc::new(Wiimote::new(id, channel).with_rw_timeout(timeout));
    let resolver = wiimote.resolver();
    state.lock().unwrap().observer = Some(resolver.clone());
    let listener = std::thread::spawn(move || {
        run_listener(
            InterruptReader {
                frames: rx,
                pending: VecDeque::new(),
            },
            resolver,
        )
    });

    Emulator {
        wiimote,
        state,
        listener,
    }
}
