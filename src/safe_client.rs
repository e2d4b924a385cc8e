//! A thread-safe wrapper around [`RtuClient`].

use crate::client::RtuClient;
use crate::error::Result;
use crate::model::{DecodeOptions, DecodedModel, ModelRegistry};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Shares one [`RtuClient`] between threads.
///
/// The bus allows a single outstanding request, so every operation takes
/// the lock for its whole transaction; concurrent callers queue up rather
/// than interleave frames.
#[derive(Clone)]
pub struct SafeClient {
    inner: Arc<Mutex<RtuClient>>,
}

impl SafeClient {
    /// Wraps a client for shared use.
    pub fn new(client: RtuClient) -> Self {
        Self {
            inner: Arc::new(Mutex::new(client)),
        }
    }

    /// Wraps an already shared client.
    pub fn from_shared(inner: Arc<Mutex<RtuClient>>) -> Self {
        Self { inner }
    }

    /// The shared handle, for callers that need the client directly.
    pub fn clone_shared(&self) -> Arc<Mutex<RtuClient>> {
        self.inner.clone()
    }

    /// See [`RtuClient::connect`].
    pub fn connect(&self) -> Result<()> {
        self.inner.lock().unwrap().connect()
    }

    /// See [`RtuClient::disconnect`].
    pub fn disconnect(&self) {
        self.inner.lock().unwrap().disconnect();
    }

    /// See [`RtuClient::is_connected`].
    pub fn is_connected(&self) -> bool {
        self.inner.lock().unwrap().is_connected()
    }

    /// See [`RtuClient::connection_info`].
    pub fn connection_info(&self) -> String {
        self.inner.lock().unwrap().connection_info()
    }

    /// See [`RtuClient::set_timeout`].
    pub fn set_timeout(&self, timeout: Duration) {
        self.inner.lock().unwrap().set_timeout(timeout);
    }

    /// See [`RtuClient::read_holding_registers`].
    pub fn read_holding_registers(&self, address: u16, count: u16) -> Result<Vec<u16>> {
        self.inner.lock().unwrap().read_holding_registers(address, count)
    }

    /// See [`RtuClient::read_input_registers`].
    pub fn read_input_registers(&self, address: u16, count: u16) -> Result<Vec<u16>> {
        self.inner.lock().unwrap().read_input_registers(address, count)
    }

    /// See [`RtuClient::write_register`].
    pub fn write_register(&self, address: u16, value: u16) -> Result<()> {
        self.inner.lock().unwrap().write_register(address, value)
    }

    /// See [`RtuClient::write_registers`].
    pub fn write_registers(&self, address: u16, values: &[u16]) -> Result<()> {
        self.inner.lock().unwrap().write_registers(address, values)
    }

    /// See [`RtuClient::read_model`].
    pub fn read_model(
        &self,
        registry: &ModelRegistry,
        model_id: u16,
        options: DecodeOptions,
    ) -> Result<DecodedModel> {
        self.inner.lock().unwrap().read_model(registry, model_id, options)
    }

    /// See [`RtuClient::write_point`].
    pub fn write_point(
        &self,
        registry: &ModelRegistry,
        model_id: u16,
        point_name: &str,
        value: u64,
    ) -> Result<()> {
        self.inner
            .lock()
            .unwrap()
            .write_point(registry, model_id, point_name, value)
    }
}
