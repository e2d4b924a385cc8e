//! Modbus RTU frame construction and validation.
//!
//! A frame is the slave address, the function code, the function-specific
//! payload and a CRC-16 trailer in little-endian byte order. Register
//! addresses, counts and values travel big-endian inside the payload.

use crate::crc::crc16;
use crate::error::{Error, Result};

/// Function code: read holding registers.
pub const FC_READ_HOLDING_REGISTERS: u8 = 0x03;
/// Function code: read input registers.
pub const FC_READ_INPUT_REGISTERS: u8 = 0x04;
/// Function code: write single register.
pub const FC_WRITE_SINGLE_REGISTER: u8 = 0x06;
/// Function code: write multiple registers.
pub const FC_WRITE_MULTIPLE_REGISTERS: u8 = 0x10;

/// Lowest valid slave address; 0 is the broadcast address.
pub const SLAVE_MIN: u8 = 1;
/// Highest valid slave address.
pub const SLAVE_MAX: u8 = 247;

/// Most registers a single read request may ask for.
pub const MAX_READ_COUNT: u16 = 125;
/// Most registers a single write-multiple request may carry.
pub const MAX_WRITE_COUNT: u16 = 123;

/// Length of a write-single or write-multiple response frame.
pub const WRITE_RESPONSE_LEN: usize = 8;
/// Length of an exception response frame.
pub const EXCEPTION_RESPONSE_LEN: usize = 5;

/// Length of the response frame for a read of `count` registers.
pub fn read_response_len(count: u16) -> usize {
    5 + 2 * count as usize
}

fn check_slave(slave: u8) -> Result<()> {
    if !(SLAVE_MIN..=SLAVE_MAX).contains(&slave) {
        return Err(Error::SlaveOutOfRange(slave));
    }
    Ok(())
}

/// Appends the CRC trailer, low byte first.
fn finish(mut frame: Vec<u8>) -> Vec<u8> {
    let crc = crc16(&frame);
    frame.extend_from_slice(&crc.to_le_bytes());
    frame
}

fn read_request(slave: u8, function: u8, address: u16, count: u16) -> Result<Vec<u8>> {
    check_slave(slave)?;
    if !(1..=MAX_READ_COUNT).contains(&count) {
        return Err(Error::CountOutOfRange {
            count: count as usize,
            max: MAX_READ_COUNT,
        });
    }
    let mut frame = Vec::with_capacity(8);
    frame.push(slave);
    frame.push(function);
    frame.extend_from_slice(&address.to_be_bytes());
    frame.extend_from_slice(&count.to_be_bytes());
    Ok(finish(frame))
}

/// Builds a read-holding-registers request.
pub fn build_read_request(slave: u8, address: u16, count: u16) -> Result<Vec<u8>> {
    read_request(slave, FC_READ_HOLDING_REGISTERS, address, count)
}

/// Builds a read-input-registers request.
pub fn build_read_input_request(slave: u8, address: u16, count: u16) -> Result<Vec<u8>> {
    read_request(slave, FC_READ_INPUT_REGISTERS, address, count)
}

/// Builds a write-single-register request.
pub fn build_write_single(slave: u8, address: u16, value: u16) -> Result<Vec<u8>> {
    check_slave(slave)?;
    let mut frame = Vec::with_capacity(8);
    frame.push(slave);
    frame.push(FC_WRITE_SINGLE_REGISTER);
    frame.extend_from_slice(&address.to_be_bytes());
    frame.extend_from_slice(&value.to_be_bytes());
    Ok(finish(frame))
}

/// Builds a write-multiple-registers request.
pub fn build_write_multiple(slave: u8, address: u16, values: &[u16]) -> Result<Vec<u8>> {
    check_slave(slave)?;
    if values.is_empty() || values.len() > MAX_WRITE_COUNT as usize {
        return Err(Error::CountOutOfRange {
            count: values.len(),
            max: MAX_WRITE_COUNT,
        });
    }
    let count = values.len() as u16;
    let mut frame = Vec::with_capacity(9 + values.len() * 2);
    frame.push(slave);
    frame.push(FC_WRITE_MULTIPLE_REGISTERS);
    frame.extend_from_slice(&address.to_be_bytes());
    frame.extend_from_slice(&count.to_be_bytes());
    frame.push((values.len() * 2) as u8);
    for value in values {
        frame.extend_from_slice(&value.to_be_bytes());
    }
    Ok(finish(frame))
}

fn check_crc(frame: &[u8]) -> Result<()> {
    let (body, trailer) = frame.split_at(frame.len() - 2);
    let calculated = crc16(body);
    let received = u16::from_le_bytes([trailer[0], trailer[1]]);
    if calculated != received {
        return Err(Error::CrcMismatch {
            calculated,
            received,
        });
    }
    Ok(())
}

/// Validates a response frame and returns its payload.
///
/// The payload is everything between the function code and the CRC
/// trailer: the byte count plus register bytes for reads, the echoed
/// address and value words for writes.
///
/// An exception response is complete at five bytes even when a longer
/// frame was expected, so it is recognized before the length is judged
/// and surfaces as [`Error::FunctionMismatch`].
pub fn validate_response<'a>(
    frame: &'a [u8],
    slave: u8,
    function: u8,
    expected_len: usize,
) -> Result<&'a [u8]> {
    if frame.len() == EXCEPTION_RESPONSE_LEN
        && frame[1] == function | 0x80
        && check_crc(frame).is_ok()
    {
        return Err(Error::FunctionMismatch {
            expected: function,
            received: frame[1],
        });
    }
    if frame.len() < expected_len {
        return Err(Error::ShortResponse {
            expected: expected_len,
            received: frame.len(),
        });
    }
    let frame = &frame[..expected_len];
    check_crc(frame)?;
    if frame[0] != slave {
        return Err(Error::SlaveMismatch {
            expected: slave,
            received: frame[0],
        });
    }
    if frame[1] != function {
        return Err(Error::FunctionMismatch {
            expected: function,
            received: frame[1],
        });
    }
    Ok(&frame[2..expected_len - 2])
}

/// Extracts register words from a read-response payload.
///
/// The first payload byte declares how many register bytes follow; the
/// registers themselves are two big-endian bytes each.
pub fn registers_from_payload(payload: &[u8]) -> Result<Vec<u16>> {
    match payload.split_first() {
        Some((&byte_count, data))
            if byte_count as usize == data.len() && data.len() % 2 == 0 =>
        {
            Ok(data
                .chunks_exact(2)
                .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                .collect())
        }
        _ => Err(Error::ShortResponse {
            expected: payload.first().map_or(5, |&n| n as usize + 5),
            received: payload.len() + 4,
        }),
    }
}

/// Extracts the echoed (address, value-or-count) pair from a write-response
/// payload.
pub fn echo_from_payload(payload: &[u8]) -> Result<(u16, u16)> {
    if payload.len() != 4 {
        return Err(Error::ShortResponse {
            expected: WRITE_RESPONSE_LEN,
            received: payload.len() + 4,
        });
    }
    Ok((
        u16::from_be_bytes([payload[0], payload[1]]),
        u16::from_be_bytes([payload[2], payload[3]]),
    ))
}
