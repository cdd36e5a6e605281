//! Register frames: `[address][function][payload...][crc lo][crc hi]`.

use crate::error::ProtocolError;

use super::crc::{append_crc, crc_pair};
use super::registers::{BAND_BASE, BAND_COUNT};

pub const FUNC_READ_HOLDING: u8 = 0x03;
pub const FUNC_WRITE_SINGLE: u8 = 0x06;
pub const FUNC_WRITE_MULTIPLE: u8 = 0x10;
pub const EXCEPTION_FLAG: u8 = 0x80;

pub const DEFAULT_ADDRESS: u8 = 0x01;

/// Modbus limit on registers per write-multiple request.
pub const MAX_WRITE_REGISTERS: usize = 123;

/// Header bytes of a write-multiple request before the register values.
pub const WRITE_MULTIPLE_HEADER: usize = 7;

/// Bytes added to every frame besides the function payload: CRC.
pub const CRC_LEN: usize = 2;

/// Notify data beyond this without a valid frame is discarded.
const MAX_ASSEMBLY: usize = 512;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireFrame(Vec<u8>);

impl WireFrame {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn address(&self) -> u8 {
        self.0[0]
    }

    pub fn function(&self) -> u8 {
        self.0[1]
    }

    /// True when the peripheral answers this request with a frame of its own.
    pub fn expects_response(&self) -> bool {
        self.function() == FUNC_READ_HOLDING
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    fn seal(mut body: Vec<u8>) -> Self {
        append_crc(&mut body);
        Self(body)
    }
}

impl AsRef<[u8]> for WireFrame {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Decoded reply from the lamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Registers(Vec<u16>),
    WroteSingle { register: u16, value: u16 },
    WroteMultiple { start: u16, count: u16 },
}

pub fn read_holding_registers(address: u8, start: u16, count: u16) -> WireFrame {
    let mut body = vec![address, FUNC_READ_HOLDING];
    body.extend_from_slice(&start.to_be_bytes());
    body.extend_from_slice(&count.to_be_bytes());
    WireFrame::seal(body)
}

pub fn write_single_register(address: u8, register: u16, value: u16) -> WireFrame {
    let mut body = vec![address, FUNC_WRITE_SINGLE];
    body.extend_from_slice(&register.to_be_bytes());
    body.extend_from_slice(&value.to_be_bytes());
    WireFrame::seal(body)
}

/// Write-multiple request; each value is clamped to `0..=65535`.
pub fn write_multiple_registers<T>(
    address: u8,
    start: u16,
    values: &[T],
) -> Result<WireFrame, ProtocolError>
where
    T: Copy + Into<i64>,
{
    if values.is_empty() || values.len() > MAX_WRITE_REGISTERS {
        return Err(ProtocolError::Malformed("register count must be 1..=123"));
    }
    Ok(encode_write_multiple(address, start, values, u16::MAX as i64))
}

/// Write-multiple request for all twelve band registers, each clamped to `0..=255`.
pub fn spectrum_frame<T>(address: u8, bands: &[T; BAND_COUNT]) -> WireFrame
where
    T: Copy + Into<i64>,
{
    encode_write_multiple(address, BAND_BASE, bands, 255)
}

pub(crate) fn encode_write_multiple<T>(address: u8, start: u16, values: &[T], max: i64) -> WireFrame
where
    T: Copy + Into<i64>,
{
    let count = values.len() as u16;
    let mut body = Vec::with_capacity(WRITE_MULTIPLE_HEADER + values.len() * 2 + CRC_LEN);
    body.push(address);
    body.push(FUNC_WRITE_MULTIPLE);
    body.extend_from_slice(&start.to_be_bytes());
    body.extend_from_slice(&count.to_be_bytes());
    body.push((values.len() * 2) as u8);
    for &v in values {
        let v = v.into().clamp(0, max) as u16;
        body.extend_from_slice(&v.to_be_bytes());
    }
    WireFrame::seal(body)
}

fn check_crc(frame: &[u8]) -> Result<(), ProtocolError> {
    match crc_pair(frame) {
        Some((expected, actual)) if expected == actual => Ok(()),
        Some((expected, actual)) => Err(ProtocolError::CrcMismatch { expected, actual }),
        None => Err(ProtocolError::ShortFrame {
            len: frame.len(),
            need: CRC_LEN,
        }),
    }
}

fn check_header(frame: &[u8], address: u8) -> Result<(), ProtocolError> {
    if frame.len() < 5 {
        return Err(ProtocolError::ShortFrame {
            len: frame.len(),
            need: 5,
        });
    }
    if frame[0] != address {
        return Err(ProtocolError::AddressMismatch {
            expected: address,
            actual: frame[0],
        });
    }
    if frame[1] & EXCEPTION_FLAG != 0 {
        check_crc(&frame[..5])?;
        return Err(ProtocolError::Exception {
            function: frame[1] & !EXCEPTION_FLAG,
            code: frame[2],
        });
    }
    Ok(())
}

/// Decode a read-holding-registers reply into its register values.
pub fn parse_read_response(frame: &[u8], address: u8) -> Result<Vec<u16>, ProtocolError> {
    check_header(frame, address)?;
    if frame[1] != FUNC_READ_HOLDING {
        return Err(ProtocolError::UnexpectedFunction(frame[1]));
    }
    let byte_count = frame[2] as usize;
    let need = 3 + byte_count + CRC_LEN;
    if frame.len() < need {
        return Err(ProtocolError::ShortFrame {
            len: frame.len(),
            need,
        });
    }
    if byte_count % 2 != 0 {
        return Err(ProtocolError::Malformed("odd byte count"));
    }
    let frame = &frame[..need];
    check_crc(frame)?;
    Ok(frame[3..3 + byte_count]
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect())
}

/// Decode any reply the lamp sends: register data or a write echo.
pub fn parse_response(frame: &[u8], address: u8) -> Result<Response, ProtocolError> {
    check_header(frame, address)?;
    match frame[1] {
        FUNC_READ_HOLDING => parse_read_response(frame, address).map(Response::Registers),
        func @ (FUNC_WRITE_SINGLE | FUNC_WRITE_MULTIPLE) => {
            if frame.len() < 8 {
                return Err(ProtocolError::ShortFrame {
                    len: frame.len(),
                    need: 8,
                });
            }
            check_crc(&frame[..8])?;
            let a = u16::from_be_bytes([frame[2], frame[3]]);
            let b = u16::from_be_bytes([frame[4], frame[5]]);
            Ok(if func == FUNC_WRITE_SINGLE {
                Response::WroteSingle {
                    register: a,
                    value: b,
                }
            } else {
                Response::WroteMultiple { start: a, count: b }
            })
        }
        other => Err(ProtocolError::UnexpectedFunction(other)),
    }
}

/// A complete candidate the assembler dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejected {
    /// Function byte from the candidate's header.
    pub function: u8,
    pub error: ProtocolError,
}

enum Need {
    More,
    Len(usize),
    Unknown,
}

fn frame_len(buf: &[u8]) -> Need {
    if buf.len() < 2 {
        return Need::More;
    }
    let func = buf[1];
    if func & EXCEPTION_FLAG != 0 {
        return Need::Len(5);
    }
    match func {
        FUNC_READ_HOLDING if buf.len() < 3 => Need::More,
        FUNC_READ_HOLDING => Need::Len(3 + buf[2] as usize + CRC_LEN),
        FUNC_WRITE_SINGLE | FUNC_WRITE_MULTIPLE => Need::Len(8),
        _ => Need::Unknown,
    }
}

/// Reassembles reply frames from notify fragments.
///
/// Bytes are buffered until the length implied by the header is available.
/// When a complete candidate fails its CRC, a valid frame starting inside it
/// wins and the bytes before it are skipped. Only when none can start there is
/// the candidate dropped and reported. Bytes that cannot start a frame are
/// skipped.
#[derive(Debug)]
pub struct FrameAssembler {
    address: u8,
    buf: Vec<u8>,
}

impl FrameAssembler {
    pub fn new(address: u8) -> Self {
        Self {
            address,
            buf: Vec::new(),
        }
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
        if self.buf.len() > MAX_ASSEMBLY {
            log::warn!("Discarding {} unframed notify bytes", self.buf.len());
            self.buf.clear();
        }
    }

    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Next complete frame, `None` when more bytes are needed.
    pub fn next_frame(&mut self) -> Option<Result<Vec<u8>, Rejected>> {
        loop {
            if self.buf.is_empty() {
                return None;
            }
            if self.buf[0] != self.address {
                log::trace!("Skipping stray notify byte {:#04x}", self.buf[0]);
                self.buf.remove(0);
                continue;
            }
            match frame_len(&self.buf) {
                Need::More => return None,
                Need::Unknown => {
                    self.buf.remove(0);
                }
                Need::Len(n) if self.buf.len() < n => return None,
                Need::Len(n) => {
                    let err = match check_crc(&self.buf[..n]) {
                        Ok(()) => return Some(Ok(self.buf.drain(..n).collect())),
                        Err(e) => e,
                    };
                    match self.resync(n) {
                        Resync::Found(skip) => {
                            log::debug!("Resynced past {} notify bytes", skip);
                            self.buf.drain(..skip);
                        }
                        Resync::Wait => return None,
                        Resync::None => {
                            let function = self.buf[1];
                            self.buf.drain(..n);
                            return Some(Err(Rejected { function, error: err }));
                        }
                    }
                }
            }
        }
    }

    /// Look for a frame starting inside a failed candidate of length `n`.
    fn resync(&self, n: usize) -> Resync {
        let mut wait = false;
        for k in 1..n {
            if self.buf[k] != self.address {
                continue;
            }
            let rest = &self.buf[k..];
            match frame_len(rest) {
                Need::More => wait = true,
                Need::Len(m) if rest.len() < m => wait = true,
                Need::Len(m) if check_crc(&rest[..m]).is_ok() => return Resync::Found(k),
                _ => {}
            }
        }
        if wait {
            Resync::Wait
        } else {
            Resync::None
        }
    }
}

enum Resync {
    /// A valid frame starts this many bytes in.
    Found(usize),
    /// A frame may start inside the candidate once more bytes arrive.
    Wait,
    None,
}
