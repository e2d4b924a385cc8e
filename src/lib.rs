//! A library for polling and controlling SunSpec-compliant solar inverters
//! over Modbus RTU.
//!
//! This crate provides two main ways to interact with an inverter:
//!
//! 1.  **Model-Level Operations**: Discover where the device's SunSpec
//!     models live, read a whole model and get back named, typed, scaled
//!     points, or write a single point by name. This is the recommended
//!     approach for most users. See [`client::RtuClient`],
//!     [`discovery::discover`] and [`model::ModelRegistry`].
//!
//! 2.  **Register-Level Operations**: Plain Modbus reads and writes of
//!     holding and input registers, with the same framing, validation and
//!     retry discipline underneath. See the register methods on
//!     [`client::RtuClient`].
//!
//! ## Features
//!
//! - **Modbus RTU Framing**: CRC-16 checked frames for the read and write
//!   function codes an inverter needs, with exception responses surfaced
//!   as typed errors.
//! - **SunSpec Discovery**: Probes the well-known base addresses for the
//!   "SunS" marker and walks the model chain, so nominal descriptor
//!   addresses never have to be trusted.
//! - **Model Descriptors**: Built-in descriptors for the inverter-control
//!   models 802, 805 and 899, plus JSON loading for everything else.
//! - **Thread-Safe Sharing**: [`safe_client::SafeClient`] serializes
//!   concurrent callers onto the half-duplex bus.
//!
//! ## Quick Start
//!
//! ```no_run
//! use sunspec_rtu_lib::client::RtuClient;
//! use sunspec_rtu_lib::model::{DecodeOptions, ModelRegistry};
//! use sunspec_rtu_lib::serial::SerialTransport;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Open the serial link and create a client for slave 1.
//!     let transport = SerialTransport::new("/dev/ttyUSB0", 9600);
//!     let mut client = RtuClient::new(Box::new(transport), 1)?;
//!     client.connect()?;
//!
//!     // Find out where the models actually live on this device.
//!     let mut registry = ModelRegistry::builtin();
//!     let report = sunspec_rtu_lib::discovery::discover(&mut client, &mut registry)?;
//!     println!("SunSpec base address: {}", report.base_address);
//!
//!     // Read the immediate-controls model and print its points.
//!     let controls = client.read_model(&registry, 802, DecodeOptions::default())?;
//!     for point in &controls.points {
//!         match point.value {
//!             Some(value) => println!("{}: {}", point.name, value),
//!             None => println!("{}: {}", point.name, point.raw),
//!         }
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! For more details, see the documentation of the individual modules.

pub mod client;
pub mod crc;
pub mod decode;
pub mod discovery;
pub mod error;
pub mod frame;
pub mod model;
pub mod safe_client;
pub mod transport;

#[cfg_attr(docsrs, doc(cfg(feature = "serial")))]
#[cfg(feature = "serial")]
pub mod serial;

pub use error::{Error, Result};
