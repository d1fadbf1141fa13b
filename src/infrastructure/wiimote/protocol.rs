//! Wii Remote Report Protocol
//!
//! Constants and pure encoders for the reports exchanged over the
//! control and interrupt channels. Nothing in here performs I/O.

use super::WiimoteError;

/// Transaction type mask (high nibble of the first byte of every frame)
pub const BT_TRANS_MASK: u8 = 0xF0;
pub const BT_TRANS_HANDSHAKE: u8 = 0x00;
pub const BT_TRANS_SET_REPORT: u8 = 0x50;
pub const BT_TRANS_DATA: u8 = 0xA0;

/// Parameter mask (low nibble of the first byte of every frame)
pub const BT_PARAM_MASK: u8 = 0x0F;
pub const BT_PARAM_SUCCESSFUL: u8 = 0x00;
pub const BT_PARAM_INPUT: u8 = 0x01;
pub const BT_PARAM_OUTPUT: u8 = 0x02;

/// Header byte of every outgoing report
pub const OUTPUT_REPORT_HEADER: u8 = BT_TRANS_SET_REPORT | BT_PARAM_OUTPUT;

/// Header byte of every inbound report on the interrupt channel
pub const INPUT_REPORT_HEADER: u8 = BT_TRANS_DATA | BT_PARAM_INPUT;

/// Output report ids
pub const RPT_RUMBLE: u8 = 0x10;
pub const RPT_LED_RUMBLE: u8 = 0x11;
pub const RPT_SPEAKER_ENABLE: u8 = 0x14;
pub const RPT_WRITE: u8 = 0x16;
pub const RPT_READ_REQ: u8 = 0x17;
pub const RPT_SPEAKER_DATA: u8 = 0x18;
pub const RPT_SPEAKER_MUTE: u8 = 0x19;

/// Input report ids the register protocol listens for
pub const RPT_READ_DATA: u8 = 0x21;
pub const RPT_WRITE_ACK: u8 = 0x22;

/// Largest payload that fits after the two header bytes
pub const MAX_REPORT_PAYLOAD: usize = 21;

pub const READ_REQUEST_LEN: usize = 6;
pub const WRITE_REQUEST_LEN: usize = 21;

/// Per-report write payload limit of the device
pub const WRITE_CHUNK_SIZE: usize = 16;

/// Largest addressable offset (24-bit address space)
pub const MAX_OFFSET: u32 = 0x00FF_FFFF;

/// Flags accepted by `send_report`
pub mod send_flags {
    /// Do not patch the rumble bit into payload byte 0
    pub const NO_RUMBLE: u8 = 0x01;
}

/// Address-space and post-processing flags for memory reads and writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RwFlags(u8);

impl RwFlags {
    pub const EEPROM: RwFlags = RwFlags(0x00);
    pub const REGISTER: RwFlags = RwFlags(0x04);
    /// Host-side only: run every byte read through [`decode`]
    pub const DECODE: RwFlags = RwFlags(0x08);

    const ADDRESS_MASK: u8 = Self::EEPROM.0 | Self::REGISTER.0;

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    pub const fn contains(self, other: RwFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// The part of the flags that travels on the wire
    pub const fn address_flags(self) -> u8 {
        self.0 & Self::ADDRESS_MASK
    }
}

impl std::ops::BitOr for RwFlags {
    type Output = RwFlags;

    fn bitor(self, rhs: RwFlags) -> RwFlags {
        RwFlags(self.0 | rhs.0)
    }
}

/// Undo the obfuscation applied to calibration memory
pub const fn decode(byte: u8) -> u8 {
    (byte ^ 0x17).wrapping_add(0x17)
}

/// Build a complete outgoing frame
///
/// ```text
/// [0]     : SET_REPORT | OUTPUT
/// [1]     : report id
/// [2..]   : payload, bit 0 of [2] carries the rumble state unless NO_RUMBLE
/// ```
pub fn encode_report(
    flags: u8,
    report_id: u8,
    payload: &[u8],
    rumble: bool,
) -> Result<Vec<u8>, WiimoteError> {
    if payload.len() > MAX_REPORT_PAYLOAD {
        return Err(WiimoteError::PayloadTooLarge(payload.len()));
    }

    let mut frame = Vec::with_capacity(payload.len() + 2);
    frame.push(OUTPUT_REPORT_HEADER);
    frame.push(report_id);
    frame.extend_from_slice(payload);

    if flags & send_flags::NO_RUMBLE == 0 && frame.len() > 2 && rumble {
        frame[2] |= 0x01;
    }

    Ok(frame)
}

/// Outcome of inspecting a handshake byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handshake {
    Successful,
    NotHandshake(u8),
    Failed(u8),
}

pub fn classify_handshake(byte: u8) -> Handshake {
    if byte & BT_TRANS_MASK != BT_TRANS_HANDSHAKE {
        Handshake::NotHandshake(byte)
    } else if byte & BT_PARAM_MASK != BT_PARAM_SUCCESSFUL {
        Handshake::Failed(byte)
    } else {
        Handshake::Successful
    }
}

fn check_offset(offset: u32) -> Result<(), WiimoteError> {
    if offset > MAX_OFFSET {
        return Err(WiimoteError::InvalidRequest(format!(
            "offset {offset:#x} exceeds 24-bit address space"
        )));
    }
    Ok(())
}

/// Both the first and the last byte of `offset..offset + len` must be
/// addressable
fn check_range(offset: u32, len: usize) -> Result<(), WiimoteError> {
    check_offset(offset)?;
    if len > 0 && offset as u64 + len as u64 - 1 > MAX_OFFSET as u64 {
        return Err(WiimoteError::InvalidRequest(format!(
            "{len} bytes at {offset:#x} run past the 24-bit address space"
        )));
    }
    Ok(())
}

/// Read request body
///
/// ```text
/// [0]   : address flags (EEPROM / REGISTER)
/// [1-3] : offset (24-bit big-endian)
/// [4-5] : length (16-bit big-endian)
/// ```
pub fn encode_read_request(
    flags: RwFlags,
    offset: u32,
    len: usize,
) -> Result<[u8; READ_REQUEST_LEN], WiimoteError> {
    check_range(offset, len)?;
    let len = u16::try_from(len).map_err(|_| {
        WiimoteError::InvalidRequest(format!("read length {len} exceeds 16 bits"))
    })?;

    let off = offset.to_be_bytes();
    let len = len.to_be_bytes();
    Ok([flags.address_flags(), off[1], off[2], off[3], len[0], len[1]])
}

/// A slice of a logical write that fits in a single write report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteChunk<'a> {
    pub offset: u32,
    pub data: &'a [u8],
}

/// Split a write into report-sized chunks with absolute offsets
///
/// The whole range is validated up front, so a write that cannot be
/// completed never sends its first chunks.
pub fn plan_write_chunks(offset: u32, data: &[u8]) -> Result<Vec<WriteChunk<'_>>, WiimoteError> {
    check_range(offset, data.len())?;
    data.chunks(WRITE_CHUNK_SIZE)
        .enumerate()
        .map(|(i, chunk)| {
            u32::try_from(i * WRITE_CHUNK_SIZE)
                .ok()
                .and_then(|delta| offset.checked_add(delta))
                .map(|offset| WriteChunk { offset, data: chunk })
                .ok_or_else(|| WiimoteError::InvalidRequest(format!("chunk {i} offset overflows")))
        })
        .collect()
}

/// Write request body
///
/// ```text
/// [0]    : address flags
/// [1-3]  : chunk offset (24-bit big-endian)
/// [4]    : chunk length (1-16)
/// [5-20] : chunk data, zero padded
/// ```
pub fn encode_write_request(
    flags: RwFlags,
    chunk: &WriteChunk<'_>,
) -> Result<[u8; WRITE_REQUEST_LEN], WiimoteError> {
    check_offset(chunk.offset)?;
    if chunk.data.len() > WRITE_CHUNK_SIZE {
        return Err(WiimoteError::InvalidRequest(format!(
            "write chunk of {} bytes exceeds {WRITE_CHUNK_SIZE}",
            chunk.data.len()
        )));
    }

    let off = chunk.offset.to_be_bytes();
    let mut body = [0u8; WRITE_REQUEST_LEN];
    body[0] = flags.address_flags();
    body[1..4].copy_from_slice(&off[1..4]);
    body[4] = chunk.data.len() as u8;
    body[5..5 + chunk.data.len()].copy_from_slice(chunk.data);
    Ok(body)
}

/// Register protocol reports recognized on the interrupt channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RwReport<'a> {
    /// ```text
    /// [0]    : DATA | INPUT
    /// [1]    : 0x21
    /// [2-3]  : buttons
    /// [4]    : (size - 1) << 4 | error
    /// [5-6]  : offset (low 16 bits)
    /// [7-22] : data
    /// ```
    ReadData {
        error: u8,
        offset: u16,
        data: &'a [u8],
    },
    /// ```text
    /// [0]   : DATA | INPUT
    /// [1]   : 0x22
    /// [2-3] : buttons
    /// [4]   : acknowledged report id
    /// [5]   : error
    /// ```
    WriteAck { report_id: u8, error: u8 },
}

const READ_DATA_LEN: usize = 7 + WRITE_CHUNK_SIZE;
const WRITE_ACK_LEN: usize = 6;

/// Pick the register protocol reports out of an inbound frame
///
/// Returns `None` for any other report; those belong to the event parser.
pub fn parse_rw_report(frame: &[u8]) -> Option<RwReport<'_>> {
    if frame.len() < 2 || frame[0] != INPUT_REPORT_HEADER {
        return None;
    }

    match frame[1] {
        RPT_READ_DATA if frame.len() >= READ_DATA_LEN => {
            let size = ((frame[4] >> 4) + 1) as usize;
            Some(RwReport::ReadData {
                error: frame[4] & 0x0F,
                offset: u16::from_be_bytes([frame[5], frame[6]]),
                data: &frame[7..7 + size],
            })
        }
        RPT_WRITE_ACK if frame.len() >= WRITE_ACK_LEN => Some(RwReport::WriteAck {
            report_id: frame[4],
            error: frame[5],
        }),
        _ => None,
    }
}
