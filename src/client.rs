//! Modbus RTU transaction runner.

use crate::error::{Error, Result};
use crate::frame;
use crate::model::{Access, DecodeOptions, DecodedModel, ModelRegistry};
use crate::transport::Transport;
use log::{trace, warn};
use std::time::{Duration, Instant};

/// Default per-attempt response timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);
/// Default number of attempts per transaction.
pub const DEFAULT_RETRIES: u32 = 3;
/// Default pause between attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Synchronous Modbus RTU client for SunSpec devices.
///
/// The serial link is half-duplex and responses carry no transaction
/// identifiers, so exactly one request may be outstanding; every
/// operation takes `&mut self` and runs to completion before the next
/// one starts. Failed transactions are retried with a fixed pause, and
/// the last failure is reported when all attempts are spent.
///
/// # Examples
///
/// ```no_run
/// use sunspec_rtu_lib::client::RtuClient;
/// use sunspec_rtu_lib::serial::SerialTransport;
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let transport = SerialTransport::new("/dev/ttyUSB0", 9600);
///     let mut client = RtuClient::new(Box::new(transport), 1)?;
///     client.connect()?;
///     let registers = client.read_holding_registers(40000, 2)?;
///     println!("marker registers: {registers:04X?}");
///     Ok(())
/// }
/// ```
pub struct RtuClient {
    transport: Box<dyn Transport>,
    slave: u8,
    timeout: Duration,
    retries: u32,
    retry_delay: Duration,
}

impl std::fmt::Debug for RtuClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RtuClient")
            .field("transport", &self.transport.describe())
            .field("slave", &self.slave)
            .field("timeout", &self.timeout)
            .field("retries", &self.retries)
            .field("retry_delay", &self.retry_delay)
            .finish()
    }
}

impl RtuClient {
    /// Creates a client for the given transport and slave address.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SlaveOutOfRange`] for addresses outside 1..=247.
    pub fn new(transport: Box<dyn Transport>, slave: u8) -> Result<Self> {
        if !(frame::SLAVE_MIN..=frame::SLAVE_MAX).contains(&slave) {
            return Err(Error::SlaveOutOfRange(slave));
        }
        Ok(Self {
            transport,
            slave,
            timeout: DEFAULT_TIMEOUT,
            retries: DEFAULT_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
        })
    }

    /// Opens the underlying transport.
    pub fn connect(&mut self) -> Result<()> {
        self.transport.open()
    }

    /// Closes the underlying transport.
    ///
    /// Discovered instance addresses describe the device that was just
    /// polled; call [`ModelRegistry::clear_instances`] before reusing a
    /// registry with a different device.
    pub fn disconnect(&mut self) {
        self.transport.close();
    }

    /// Whether the underlying transport is open.
    pub fn is_connected(&self) -> bool {
        self.transport.is_open()
    }

    /// Human-readable description of the link, for logs and prompts.
    pub fn connection_info(&self) -> String {
        format!("{}, slave {}", self.transport.describe(), self.slave)
    }

    /// The polled slave address.
    pub fn slave(&self) -> u8 {
        self.slave
    }

    /// Sets the per-attempt response timeout.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// The per-attempt response timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Sets how many attempts a transaction gets. Values below 1 are
    /// treated as 1.
    pub fn set_retries(&mut self, retries: u32) {
        self.retries = retries;
    }

    /// Sets the pause between attempts.
    pub fn set_retry_delay(&mut self, delay: Duration) {
        self.retry_delay = delay;
    }

    /// Reads `count` holding registers starting at `address`.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::NotConnected`] when the transport is closed,
    /// [`Error::CountOutOfRange`] for counts outside 1..=125, and
    /// [`Error::TransactionFailed`] when every attempt on the wire failed.
    pub fn read_holding_registers(&mut self, address: u16, count: u16) -> Result<Vec<u16>> {
        let request = frame::build_read_request(self.slave, address, count)?;
        self.transact(
            &request,
            frame::FC_READ_HOLDING_REGISTERS,
            frame::read_response_len(count),
            frame::registers_from_payload,
        )
    }

    /// Reads `count` input registers starting at `address`.
    pub fn read_input_registers(&mut self, address: u16, count: u16) -> Result<Vec<u16>> {
        let request = frame::build_read_input_request(self.slave, address, count)?;
        self.transact(
            &request,
            frame::FC_READ_INPUT_REGISTERS,
            frame::read_response_len(count),
            frame::registers_from_payload,
        )
    }

    /// Writes a single holding register and checks the echoed response.
    pub fn write_register(&mut self, address: u16, value: u16) -> Result<()> {
        let request = frame::build_write_single(self.slave, address, value)?;
        self.transact(
            &request,
            frame::FC_WRITE_SINGLE_REGISTER,
            frame::WRITE_RESPONSE_LEN,
            |payload| {
                let echoed = frame::echo_from_payload(payload)?;
                if echoed != (address, value) {
                    return Err(Error::WriteEcho {
                        expected: (address, value),
                        received: echoed,
                    });
                }
                Ok(())
            },
        )
    }

    /// Writes a block of consecutive holding registers and checks the
    /// echoed address and count.
    pub fn write_registers(&mut self, address: u16, values: &[u16]) -> Result<()> {
        let request = frame::build_write_multiple(self.slave, address, values)?;
        let count = values.len() as u16;
        self.transact(
            &request,
            frame::FC_WRITE_MULTIPLE_REGISTERS,
            frame::WRITE_RESPONSE_LEN,
            |payload| {
                let echoed = frame::echo_from_payload(payload)?;
                if echoed != (address, count) {
                    return Err(Error::WriteEcho {
                        expected: (address, count),
                        received: echoed,
                    });
                }
                Ok(())
            },
        )
    }

    /// Reads and decodes one model block.
    ///
    /// The block is read from the discovered instance address when
    /// discovery has run, else from the descriptor's nominal base. Models
    /// wider than a single request allows are read in slices.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use sunspec_rtu_lib::client::RtuClient;
    /// use sunspec_rtu_lib::model::{DecodeOptions, ModelRegistry};
    /// use sunspec_rtu_lib::serial::SerialTransport;
    ///
    /// fn main() -> Result<(), Box<dyn std::error::Error>> {
    ///     let transport = SerialTransport::new("/dev/ttyUSB0", 9600);
    ///     let mut client = RtuClient::new(Box::new(transport), 1)?;
    ///     client.connect()?;
    ///
    ///     let registry = ModelRegistry::builtin();
    ///     let controls = client.read_model(&registry, 802, DecodeOptions::default())?;
    ///     for point in &controls.points {
    ///         println!("{}: {}", point.name, point.raw);
    ///     }
    ///     Ok(())
    /// }
    /// ```
    pub fn read_model(
        &mut self,
        registry: &ModelRegistry,
        model_id: u16,
        options: DecodeOptions,
    ) -> Result<DecodedModel> {
        let model = registry
            .model(model_id)
            .ok_or(Error::UnknownModel(model_id))?;
        let base = registry.model_address(model_id)?;
        let words = self.read_block(base, model.length)?;
        registry.decode_model(model_id, &words, options)
    }

    /// Writes one writable point of a model, routed through the registry
    /// layout. The point's access mode and width are checked before
    /// anything touches the wire.
    pub fn write_point(
        &mut self,
        registry: &ModelRegistry,
        model_id: u16,
        point_name: &str,
        value: u64,
    ) -> Result<()> {
        let model = registry
            .model(model_id)
            .ok_or(Error::UnknownModel(model_id))?;
        let point = model.point(point_name).ok_or_else(|| Error::UnknownPoint {
            model: model_id,
            point: point_name.into(),
        })?;
        if point.access != Access::Rw {
            return Err(Error::ReadOnlyPoint {
                model: model_id,
                point: point_name.into(),
            });
        }
        let address = registry.field_address(model_id, point_name)?;
        match point.size {
            1 => {
                let value = u16::try_from(value).map_err(|_| Error::ValueTooWide {
                    point: point_name.into(),
                    value,
                })?;
                self.write_register(address, value)
            }
            2 => {
                let value = u32::try_from(value).map_err(|_| Error::ValueTooWide {
                    point: point_name.into(),
                    value,
                })?;
                self.write_registers(address, &[(value >> 16) as u16, value as u16])
            }
            _ => Err(Error::ValueTooWide {
                point: point_name.into(),
                value,
            }),
        }
    }

    /// Reads `count` registers starting at `address`, splitting the read
    /// into request-sized slices.
    fn read_block(&mut self, address: u16, count: u16) -> Result<Vec<u16>> {
        let mut words = Vec::with_capacity(count as usize);
        let mut offset = 0u16;
        while offset < count {
            let slice = (count - offset).min(frame::MAX_READ_COUNT);
            let at = address
                .checked_add(offset)
                .ok_or(Error::AddressRangeOverflow { address, count })?;
            words.extend(self.read_holding_registers(at, slice)?);
            offset += slice;
        }
        Ok(words)
    }

    /// Runs one request/response exchange with bounded retries.
    ///
    /// `parse` judges the validated payload; its verdict counts as part
    /// of the attempt, so a byte-count or echo mismatch is retried like
    /// any other wire failure.
    fn transact<T>(
        &mut self,
        request: &[u8],
        function: u8,
        expected_len: usize,
        parse: impl Fn(&[u8]) -> Result<T>,
    ) -> Result<T> {
        if !self.transport.is_open() {
            return Err(Error::NotConnected);
        }
        let attempts = self.retries.max(1);
        let mut last_error = match self.attempt(request, function, expected_len, &parse) {
            Ok(value) => return Ok(value),
            Err(Error::NotConnected) => return Err(Error::NotConnected),
            Err(err) => {
                warn!("attempt 1/{attempts} failed: {err}");
                err
            }
        };
        for attempt in 2..=attempts {
            std::thread::sleep(self.retry_delay);
            match self.attempt(request, function, expected_len, &parse) {
                Ok(value) => return Ok(value),
                Err(Error::NotConnected) => return Err(Error::NotConnected),
                Err(err) => {
                    warn!("attempt {attempt}/{attempts} failed: {err}");
                    last_error = err;
                }
            }
        }
        Err(Error::TransactionFailed {
            attempts,
            source: Box::new(last_error),
        })
    }

    fn attempt<T>(
        &mut self,
        request: &[u8],
        function: u8,
        expected_len: usize,
        parse: &impl Fn(&[u8]) -> Result<T>,
    ) -> Result<T> {
        trace!("sent: {}", hex::encode(request));
        self.transport.write(request)?;
        let mut buf = vec![0u8; expected_len];
        let received = self.read_until_deadline(&mut buf)?;
        let response = &buf[..received];
        trace!("received: {}", hex::encode(response));
        let payload = frame::validate_response(response, self.slave, function, expected_len)?;
        parse(payload)
    }

    /// Accumulates bytes until the buffer is full or the per-attempt
    /// deadline passes.
    fn read_until_deadline(&mut self, buf: &mut [u8]) -> Result<usize> {
        let deadline = Instant::now() + self.timeout;
        let mut filled = 0;
        while filled < buf.len() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            let n = self.transport.read(&mut buf[filled..], remaining)?;
            if n == 0 {
                // The transport hit the deadline with nothing further.
                break;
            }
            filled += n;
        }
        Ok(filled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::testing::MockDevice;
    use assert_matches::assert_matches;

    fn connected_client(device: &MockDevice) -> RtuClient {
        let mut client = RtuClient::new(Box::new(device.clone()), 1).unwrap();
        client.set_retry_delay(Duration::ZERO);
        client.connect().unwrap();
        client
    }

    #[test]
    fn rejects_invalid_slave_addresses() {
        let device = MockDevice::new(1);
        assert_matches!(
            RtuClient::new(Box::new(device), 0),
            Err(Error::SlaveOutOfRange(0))
        );
    }

    #[test]
    fn read_holding_registers_round_trip() {
        let device = MockDevice::new(1);
        device.set_registers(0, &[1, 2]);
        let mut client = connected_client(&device);

        assert_eq!(client.read_holding_registers(0, 2).unwrap(), [1, 2]);
        assert_eq!(
            device.requests()[0],
            [0x01, 0x03, 0x00, 0x00, 0x00, 0x02, 0xC4, 0x0B]
        );
    }

    #[test]
    fn read_input_registers_uses_function_four() {
        let device = MockDevice::new(1);
        device.set_registers(30000, &[7]);
        let mut client = connected_client(&device);

        assert_eq!(client.read_input_registers(30000, 1).unwrap(), [7]);
        assert_eq!(device.requests()[0][1], 0x04);
    }

    #[test]
    fn operations_require_a_connection() {
        let device = MockDevice::new(1);
        let mut client = RtuClient::new(Box::new(device.clone()), 1).unwrap();

        assert_matches!(
            client.read_holding_registers(0, 1),
            Err(Error::NotConnected)
        );
        assert_matches!(client.write_register(0, 1), Err(Error::NotConnected));
        assert_eq!(device.request_count(), 0);
    }

    #[test]
    fn disconnect_closes_the_transport() {
        let device = MockDevice::new(1);
        device.set_register(0, 1);
        let mut client = connected_client(&device);
        assert!(client.is_connected());

        client.disconnect();
        assert!(!client.is_connected());
        assert_matches!(
            client.read_holding_registers(0, 1),
            Err(Error::NotConnected)
        );
    }

    #[test]
    fn corrupted_replies_are_retried() {
        let device = MockDevice::new(1);
        device.set_registers(0, &[5]);
        device.corrupt_next_replies(2);
        let mut client = connected_client(&device);

        assert_eq!(client.read_holding_registers(0, 1).unwrap(), [5]);
        assert_eq!(device.request_count(), 3);
    }

    #[test]
    fn all_attempts_spent_reports_the_last_failure() {
        let device = MockDevice::new(1);
        device.set_registers(0, &[5]);
        device.drop_next_replies(10);
        let mut client = connected_client(&device);

        let err = client.read_holding_registers(0, 1).unwrap_err();
        assert_matches!(
            err,
            Error::TransactionFailed { attempts: 3, source }
                if matches!(source.as_ref(), Error::ShortResponse { .. })
        );
        assert_eq!(device.request_count(), 3);
    }

    #[test]
    fn exception_responses_surface_as_function_mismatch() {
        let device = MockDevice::new(1);
        let mut client = connected_client(&device);

        // Nothing mapped at address 0, so the device raises an exception.
        let err = client.read_holding_registers(0, 2).unwrap_err();
        assert_matches!(
            err,
            Error::TransactionFailed { source, .. }
                if matches!(source.as_ref(), Error::FunctionMismatch { received: 0x83, .. })
        );
    }

    #[test]
    fn write_register_applies_and_checks_the_echo() {
        let device = MockDevice::new(1);
        let mut client = connected_client(&device);

        client.write_register(1, 3).unwrap();
        assert_eq!(device.register(1), Some(3));
        assert_eq!(
            device.requests()[0],
            [0x01, 0x06, 0x00, 0x01, 0x00, 0x03, 0x98, 0x0B]
        );
    }

    #[test]
    fn write_registers_updates_the_whole_block() {
        let device = MockDevice::new(1);
        let mut client = connected_client(&device);

        client.write_registers(10, &[0x1234, 0x5678]).unwrap();
        assert_eq!(device.register(10), Some(0x1234));
        assert_eq!(device.register(11), Some(0x5678));
        assert_eq!(
            device.requests()[0],
            [0x01, 0x10, 0x00, 0x0A, 0x00, 0x02, 0x04, 0x12, 0x34, 0x56, 0x78, 0x08, 0xE4]
        );
    }

    #[test]
    fn read_model_decodes_a_whole_block() {
        let device = MockDevice::new(1);
        let mut block = vec![0u16; 55];
        block[0] = 802;
        block[1] = 55;
        block[6] = 9500;
        block[46] = (-2i16) as u16;
        device.set_registers(40000, &block);

        let registry = crate::model::ModelRegistry::builtin();
        let mut client = connected_client(&device);
        let decoded = client
            .read_model(&registry, 802, DecodeOptions::default())
            .unwrap();

        assert_eq!(decoded.points.len(), 55);
        let limit = decoded.point("WMaxLimPct").unwrap();
        assert_eq!(limit.value, Some(95.0));
        // 55 registers fit one request.
        assert_eq!(device.request_count(), 1);
    }

    #[test]
    fn read_model_honors_discovered_instances() {
        let device = MockDevice::new(1);
        let mut block = vec![0u16; 55];
        block[0] = 802;
        block[5] = 1;
        device.set_registers(40002, &block);

        let mut registry = crate::model::ModelRegistry::builtin();
        registry.record_instance(802, 40002);

        let mut client = connected_client(&device);
        let decoded = client
            .read_model(&registry, 802, DecodeOptions::default())
            .unwrap();
        assert_eq!(decoded.point("Conn").unwrap().raw.as_number(), Some(1));
    }

    #[test]
    fn read_model_slices_blocks_wider_than_one_request() {
        let registry = crate::model::ModelRegistry::from_json(
            r#"{"models": [{"id": 1, "name": "wide", "base_address": 100, "length": 150,
                "points": [{"name": "Blob", "type": "string", "size": 150, "access": "r"}]}]}"#,
        )
        .unwrap();
        let device = MockDevice::new(1);
        device.set_registers(100, &[0x4142; 150]);

        let mut client = connected_client(&device);
        let decoded = client
            .read_model(&registry, 1, DecodeOptions::default())
            .unwrap();

        assert_eq!(device.request_count(), 2);
        let requests = device.requests();
        assert_eq!(u16::from_be_bytes([requests[0][4], requests[0][5]]), 125);
        assert_eq!(u16::from_be_bytes([requests[1][4], requests[1][5]]), 25);
        match &decoded.point("Blob").unwrap().raw {
            crate::decode::RawValue::Text(text) => assert_eq!(text.len(), 300),
            other => panic!("expected text, got {other:?}"),
        }
    }

    #[test]
    fn write_point_routes_through_the_layout() {
        let device = MockDevice::new(1);
        let registry = crate::model::ModelRegistry::builtin();
        let mut client = connected_client(&device);

        client.write_point(&registry, 802, "WMaxLimPct", 9500).unwrap();
        assert_eq!(device.register(40006), Some(9500));
    }

    #[test]
    fn write_point_honors_discovered_instances() {
        let device = MockDevice::new(1);
        let mut registry = crate::model::ModelRegistry::builtin();
        registry.record_instance(802, 40002);
        let mut client = connected_client(&device);

        client.write_point(&registry, 802, "Conn", 1).unwrap();
        assert_eq!(device.register(40007), Some(1));
    }

    #[test]
    fn write_point_rejects_read_only_points() {
        let device = MockDevice::new(1);
        let registry = crate::model::ModelRegistry::builtin();
        let mut client = connected_client(&device);

        assert_matches!(
            client.write_point(&registry, 802, "ID", 1),
            Err(Error::ReadOnlyPoint { model: 802, .. })
        );
        assert_eq!(device.request_count(), 0);
    }

    #[test]
    fn write_point_rejects_values_wider_than_the_point() {
        let device = MockDevice::new(1);
        let registry = crate::model::ModelRegistry::builtin();
        let mut client = connected_client(&device);

        assert_matches!(
            client.write_point(&registry, 802, "Conn", 70000),
            Err(Error::ValueTooWide { value: 70000, .. })
        );
        assert_eq!(device.request_count(), 0);
    }

    #[test]
    fn write_point_splits_two_word_values() {
        let registry = crate::model::ModelRegistry::from_json(
            r#"{"models": [{"id": 2, "name": "wide", "base_address": 0, "length": 2,
                "points": [{"name": "X", "type": "uint32", "access": "rw"}]}]}"#,
        )
        .unwrap();
        let device = MockDevice::new(1);
        let mut client = connected_client(&device);

        client.write_point(&registry, 2, "X", 0x1234_5678).unwrap();
        assert_eq!(device.register(0), Some(0x1234));
        assert_eq!(device.register(1), Some(0x5678));
        assert_eq!(device.requests()[0][1], 0x10);
    }

    #[test]
    fn unknown_models_and_points_fail_before_the_wire() {
        let device = MockDevice::new(1);
        let registry = crate::model::ModelRegistry::builtin();
        let mut client = connected_client(&device);

        assert_matches!(
            client.read_model(&registry, 123, DecodeOptions::default()),
            Err(Error::UnknownModel(123))
        );
        assert_matches!(
            client.write_point(&registry, 802, "Nope", 1),
            Err(Error::UnknownPoint { .. })
        );
        assert_eq!(device.request_count(), 0);
    }

    #[test]
    fn connection_info_names_the_endpoint() {
        let device = MockDevice::new(1);
        let client = RtuClient::new(Box::new(device), 7).unwrap();
        assert_eq!(client.connection_info(), "mock device, slave 7");
    }
}
