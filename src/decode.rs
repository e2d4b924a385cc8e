//! Typed decoding of raw register words.
//!
//! SunSpec packs every point into big-endian 16-bit registers; multi-word
//! values put the most significant word first and strings carry two
//! characters per word, high byte first.

use serde::Deserialize;
use std::fmt;

/// Point data types understood by the decoder.
///
/// Descriptor tags outside this list deserialize to [`PointType::Unknown`]
/// and decode as a single unsigned word, so one exotic point cannot sink a
/// whole model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PointType {
    Uint16,
    Int16,
    Uint32,
    Int32,
    Enum16,
    Bitfield32,
    /// Scale-factor exponent; decodes like [`PointType::Int16`].
    Sunssf,
    #[serde(rename = "string")]
    Str,
    #[serde(other)]
    Unknown,
}

impl PointType {
    /// Number of registers a point of this type occupies. Strings have no
    /// inherent width and take it from the descriptor.
    pub fn words(&self, declared_size: u16) -> u16 {
        match self {
            PointType::Uint16
            | PointType::Int16
            | PointType::Enum16
            | PointType::Sunssf
            | PointType::Unknown => 1,
            PointType::Uint32 | PointType::Int32 | PointType::Bitfield32 => 2,
            PointType::Str => declared_size,
        }
    }

    /// Whether the descriptor must spell out a size for this type.
    pub fn needs_size(&self) -> bool {
        matches!(self, PointType::Str)
    }
}

impl fmt::Display for PointType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            PointType::Uint16 => "uint16",
            PointType::Int16 => "int16",
            PointType::Uint32 => "uint32",
            PointType::Int32 => "int32",
            PointType::Enum16 => "enum16",
            PointType::Bitfield32 => "bitfield32",
            PointType::Sunssf => "sunssf",
            PointType::Str => "string",
            PointType::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// A decoded register value before any scale factor is applied.
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    /// Any integer-backed type, wide enough for both `u32` and `i32`.
    Number(i64),
    /// A string point, NUL-terminated and stripped of padding.
    Text(String),
}

impl RawValue {
    /// The numeric value, if this is not a string point.
    pub fn as_number(&self) -> Option<i64> {
        match self {
            RawValue::Number(n) => Some(*n),
            RawValue::Text(_) => None,
        }
    }
}

impl fmt::Display for RawValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RawValue::Number(n) => write!(f, "{n}"),
            RawValue::Text(s) => f.write_str(s),
        }
    }
}

/// Decodes one point from `words` according to its type.
///
/// Returns `None` when fewer words are available than the point needs;
/// callers skip the point and keep decoding its siblings.
pub fn decode_point(words: &[u16], point_type: PointType, size: u16) -> Option<RawValue> {
    let need = point_type.words(size) as usize;
    if need == 0 || words.len() < need {
        return None;
    }
    let value = match point_type {
        PointType::Uint16 | PointType::Enum16 | PointType::Unknown => {
            RawValue::Number(i64::from(words[0]))
        }
        PointType::Int16 | PointType::Sunssf => RawValue::Number(i64::from(words[0] as i16)),
        PointType::Uint32 | PointType::Bitfield32 => {
            RawValue::Number(i64::from((u32::from(words[0]) << 16) | u32::from(words[1])))
        }
        PointType::Int32 => {
            RawValue::Number(i64::from(
                ((u32::from(words[0]) << 16) | u32::from(words[1])) as i32,
            ))
        }
        PointType::Str => RawValue::Text(decode_string(&words[..need])),
    };
    Some(value)
}

/// Unpacks a string point: two bytes per word, high byte first, cut at the
/// first NUL and stripped of surrounding whitespace.
fn decode_string(words: &[u16]) -> String {
    let bytes: Vec<u8> = words.iter().flat_map(|word| word.to_be_bytes()).collect();
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).trim().to_string()
}

/// Applies a power-of-ten scale factor to a raw value.
///
/// Text values never scale.
pub fn apply_scale(raw: &RawValue, exponent: i16) -> Option<f64> {
    match raw {
        RawValue::Number(n) => Some(*n as f64 * 10f64.powi(i32::from(exponent))),
        RawValue::Text(_) => None,
    }
}
