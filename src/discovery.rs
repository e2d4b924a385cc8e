//! SunSpec device discovery.
//!
//! Finds the "SunS" marker and walks the (model id, length) header chain
//! behind it to map where each model actually lives on a device. Vendors
//! disagree on the base address and on which models they stack where, so
//! nothing beyond the marker is assumed.

use crate::client::RtuClient;
use crate::decode::{self, PointType, RawValue};
use crate::error::{Error, Result};
use crate::model::ModelRegistry;
use log::{debug, info, warn};

/// Register contents of the "SunS" marker.
pub const SUNSPEC_MARKER: [u16; 2] = [0x5375, 0x6E53];

/// Base addresses probed for the marker, in order.
pub const PROBE_ADDRESSES: [u16; 3] = [0, 40000, 50000];

/// Model id terminating the header chain.
const END_MARKER_ID: u16 = 0xFFFF;

/// One model header encountered during the walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscoveredModel {
    pub model_id: u16,
    /// Length the device declares, which may differ from the descriptor.
    pub length: u16,
    /// Absolute register address of the header.
    pub address: u16,
}

/// Result of a discovery run.
#[derive(Debug, Clone)]
pub struct DiscoveryReport {
    /// Address where the marker was found.
    pub base_address: u16,
    /// Every model header encountered, known or not.
    pub models: Vec<DiscoveredModel>,
    /// False when the walk stopped before the end marker; instances
    /// recorded up to that point remain usable.
    pub complete: bool,
}

/// Scans for the SunSpec marker and walks the model chain.
///
/// Models the registry knows get their instance address recorded;
/// everything else is reported and skipped over. Returns
/// [`Error::DiscoveryNotFound`] when no probe address holds the marker.
pub fn discover(client: &mut RtuClient, registry: &mut ModelRegistry) -> Result<DiscoveryReport> {
    let base = find_base(client)?;
    info!("SunSpec marker found at register {base}");
    let mut report = DiscoveryReport {
        base_address: base,
        models: Vec::new(),
        complete: false,
    };
    let mut address = base + 2;
    loop {
        let header = match client.read_holding_registers(address, 2) {
            Ok(words) => words,
            Err(err) => {
                warn!("model walk stopped at register {address}: {err}");
                return Ok(report);
            }
        };
        let (model_id, length) = (header[0], header[1]);
        if model_id == END_MARKER_ID {
            if length != 0 {
                warn!("end marker at register {address} declares length {length}");
                return Ok(report);
            }
            report.complete = true;
            return Ok(report);
        }
        debug!("model {model_id} (length {length}) at register {address}");
        if registry.model(model_id).is_some() {
            registry.record_instance(model_id, address);
        }
        report.models.push(DiscoveredModel {
            model_id,
            length,
            address,
        });
        let next = u32::from(address) + 2 + u32::from(length);
        address = match u16::try_from(next) {
            Ok(next) => next,
            Err(_) => {
                warn!("model chain at register {address} runs past the register space");
                return Ok(report);
            }
        };
    }
}

/// Tries each probe address in turn for the marker.
fn find_base(client: &mut RtuClient) -> Result<u16> {
    for &candidate in &PROBE_ADDRESSES {
        debug!("probing register {candidate} for the SunSpec marker");
        match client.read_holding_registers(candidate, 2) {
            Ok(words) if is_marker(&words) => return Ok(candidate),
            Ok(words) => debug!("no marker at register {candidate}: {words:04X?}"),
            Err(err) => debug!("probe at register {candidate} failed: {err}"),
        }
    }
    Err(Error::DiscoveryNotFound)
}

fn is_marker(words: &[u16]) -> bool {
    matches!(
        decode::decode_point(words, PointType::Str, 2),
        Some(RawValue::Text(text)) if text == "SunS"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::testing::MockDevice;
    use assert_matches::assert_matches;
    use std::time::Duration;

    fn fast_client(device: &MockDevice) -> RtuClient {
        let mut client = RtuClient::new(Box::new(device.clone()), 1).unwrap();
        client.set_retries(1);
        client.set_retry_delay(Duration::ZERO);
        client.connect().unwrap();
        client
    }

    /// Lays out a marker at 40000 followed by model 802 and a terminator.
    fn standard_device() -> MockDevice {
        let device = MockDevice::new(1);
        device.set_registers(40000, &SUNSPEC_MARKER);
        device.set_registers(40002, &[802, 60]);
        device.set_registers(40064, &[0xFFFF, 0]);
        device
    }

    #[test]
    fn walks_the_chain_and_records_instances() {
        let device = standard_device();
        let mut registry = ModelRegistry::builtin();
        let mut client = fast_client(&device);

        let report = discover(&mut client, &mut registry).unwrap();
        assert_eq!(report.base_address, 40000);
        assert!(report.complete);
        assert_eq!(
            report.models,
            [DiscoveredModel {
                model_id: 802,
                length: 60,
                address: 40002
            }]
        );
        assert_eq!(registry.instance(802), Some(40002));
    }

    #[test]
    fn unknown_models_are_reported_but_not_recorded() {
        let device = MockDevice::new(1);
        device.set_registers(40000, &SUNSPEC_MARKER);
        device.set_registers(40002, &[802, 60]);
        device.set_registers(40064, &[64123, 10]);
        device.set_registers(40076, &[0xFFFF, 0]);
        let mut registry = ModelRegistry::builtin();
        let mut client = fast_client(&device);

        let report = discover(&mut client, &mut registry).unwrap();
        assert!(report.complete);
        assert_eq!(report.models.len(), 2);
        assert_eq!(report.models[1].model_id, 64123);
        assert_eq!(registry.instance(802), Some(40002));
        assert_eq!(registry.instance(64123), None);
    }

    #[test]
    fn probes_fall_through_to_later_addresses() {
        let device = MockDevice::new(1);
        // Registers exist at 0 but hold no marker.
        device.set_registers(0, &[0x0001, 0x0002]);
        device.set_registers(50000, &SUNSPEC_MARKER);
        device.set_registers(50002, &[0xFFFF, 0]);
        let mut registry = ModelRegistry::builtin();
        let mut client = fast_client(&device);

        let report = discover(&mut client, &mut registry).unwrap();
        assert_eq!(report.base_address, 50000);
        assert!(report.complete);
        assert!(report.models.is_empty());
    }

    #[test]
    fn missing_marker_reports_not_found() {
        let device = MockDevice::new(1);
        let mut registry = ModelRegistry::builtin();
        let mut client = fast_client(&device);

        assert_matches!(
            discover(&mut client, &mut registry),
            Err(Error::DiscoveryNotFound)
        );
    }

    #[test]
    fn walk_failures_keep_the_partial_report() {
        let device = standard_device();
        // Serve the empty probe at 0, the real probe and the first header,
        // then go silent.
        device.fail_after_replies(3);
        let mut registry = ModelRegistry::builtin();
        let mut client = fast_client(&device);

        let report = discover(&mut client, &mut registry).unwrap();
        assert!(!report.complete);
        assert_eq!(report.models.len(), 1);
        assert_eq!(registry.instance(802), Some(40002));
    }

    #[test]
    fn nonzero_end_marker_length_stops_the_walk_as_incomplete() {
        let device = MockDevice::new(1);
        device.set_registers(40000, &SUNSPEC_MARKER);
        device.set_registers(40002, &[0xFFFF, 5]);
        let mut registry = ModelRegistry::builtin();
        let mut client = fast_client(&device);

        let report = discover(&mut client, &mut registry).unwrap();
        assert!(!report.complete);
        assert!(report.models.is_empty());
    }
}
