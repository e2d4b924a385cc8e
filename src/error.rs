//! Error types shared across the library.

/// All errors that can occur while talking to or describing a device.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The transport is not open; the operation was not attempted.
    #[error("not connected")]
    NotConnected,

    /// Fewer response bytes arrived than the request calls for.
    #[error("short response: expected {expected} bytes, received {received}")]
    ShortResponse { expected: usize, received: usize },

    /// The CRC trailer does not match the frame contents.
    #[error("CRC mismatch: calculated {calculated:#06X}, received {received:#06X}")]
    CrcMismatch { calculated: u16, received: u16 },

    /// The response carries a different function code than the request,
    /// including exception responses (requested code | 0x80).
    #[error("function code mismatch: expected {expected:#04X}, received {received:#04X}")]
    FunctionMismatch { expected: u8, received: u8 },

    /// The response was sent by a different slave than the one polled.
    #[error("slave address mismatch: expected {expected}, received {received}")]
    SlaveMismatch { expected: u8, received: u8 },

    /// A write response echoed different fields than the request.
    #[error("write echo mismatch: sent {expected:?}, device echoed {received:?}")]
    WriteEcho {
        expected: (u16, u16),
        received: (u16, u16),
    },

    /// Every attempt of a transaction failed; carries the last failure.
    #[error("transaction failed after {attempts} attempts: {source}")]
    TransactionFailed { attempts: u32, source: Box<Error> },

    /// No probed address holds the SunSpec marker.
    #[error("SunSpec marker not found at any probe address")]
    DiscoveryNotFound,

    /// The registry has no descriptor for this model id.
    #[error("unknown model {0}")]
    UnknownModel(u16),

    /// The model descriptor has no point of this name.
    #[error("model {model} has no point named {point:?}")]
    UnknownPoint { model: u16, point: String },

    /// The point is not writable.
    #[error("point {point:?} of model {model} is read-only")]
    ReadOnlyPoint { model: u16, point: String },

    /// A model descriptor violates the layout rules.
    #[error("model {model} has an invalid layout: {detail}")]
    InvalidLayout { model: u16, detail: String },

    /// The slave address is outside the RTU range 1..=247.
    #[error("slave address {0} out of range (1..=247)")]
    SlaveOutOfRange(u8),

    /// More registers were requested than one request may carry.
    #[error("register count {count} out of range (1..={max})")]
    CountOutOfRange { count: usize, max: u16 },

    /// The value does not fit the width of the addressed point.
    #[error("value {value} does not fit point {point:?}")]
    ValueTooWide { point: String, value: u64 },

    /// A register range runs past the end of the address space.
    #[error("register range {address:#06X}+{count} exceeds the address space")]
    AddressRangeOverflow { address: u16, count: u16 },

    /// A model descriptor file could not be parsed.
    #[error("model descriptor error: {0}")]
    Descriptor(#[from] serde_json::Error),

    /// An I/O failure on the underlying transport or file system.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// The result type used throughout this library.
pub type Result<T> = std::result::Result<T, Error>;
