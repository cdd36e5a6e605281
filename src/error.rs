use thiserror::Error;

/// Failures decoding or validating frames exchanged with the lamp.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("CRC mismatch: expected {expected:#06x}, got {actual:#06x}")]
    CrcMismatch { expected: u16, actual: u16 },

    #[error("address mismatch: expected {expected:#04x}, got {actual:#04x}")]
    AddressMismatch { expected: u8, actual: u8 },

    #[error("unexpected function code {0:#04x}")]
    UnexpectedFunction(u8),

    #[error("frame too short: {len} bytes (need {need})")]
    ShortFrame { len: usize, need: usize },

    #[error("malformed frame: {0}")]
    Malformed(&'static str),

    #[error("device exception {code:#04x} for function {function:#04x}")]
    Exception { function: u8, code: u8 },
}

/// Failures on the radio write path.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("write rejected: {0}")]
    WriteRejected(String),

    #[error("no completion after {0} ms")]
    Timeout(u64),

    #[error("frame of {frame} bytes does not fit payload ceiling {ceiling}")]
    MtuTooSmall { frame: usize, ceiling: usize },

    #[error("transport disconnected")]
    Disconnected,
}

/// Failures acquiring or decoding audio.
#[derive(Debug, Error)]
pub enum AudioError {
    #[error("capture device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("decode failed: {0}")]
    Decode(String),

    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("audio worker did not start")]
    WorkerStart,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Invalid numeric parameters.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("{name} out of range: {value} (expected {range})")]
    OutOfRange {
        name: &'static str,
        value: f64,
        range: &'static str,
    },

    #[error("cannot parse parameters: {0:?}")]
    Unparseable(String),
}

/// Invalid arguments to the DSP primitives.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DspError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Audio(#[from] AudioError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Dsp(#[from] DspError),
}

pub type Result<T> = std::result::Result<T, Error>;
