use crate::error::ReadError;
use crate::register_reader::{to_raw_registers, RawRegister, RegisterReader};
use async_trait::async_trait;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::net::lookup_host;
use tokio_modbus::prelude::*;

type SharedConnection = Arc<tokio::sync::Mutex<Option<client::Context>>>;

/// Reads holding registers from devices over Modbus TCP.
///
/// One connection is kept per `host:port` and reused across reads. A failed
/// read drops that connection so the next read reconnects.
#[derive(Default)]
pub struct ModbusTcpReader {
    connections: Mutex<HashMap<String, SharedConnection>>,
}

impl ModbusTcpReader {
    pub fn new() -> Self {
        Self::default()
    }

    fn connection_for(&self, endpoint: &str) -> SharedConnection {
        let mut connections = self.connections.lock().unwrap_or_else(|e| e.into_inner());
        connections
            .entry(endpoint.to_string())
            .or_default()
            .clone()
    }

    async fn resolve(host: &str, port: u16) -> Result<SocketAddr, ReadError> {
        lookup_host((host, port))
            .await
            .map_err(|e| ReadError::Connection(format!("cannot resolve {host}:{port}: {e}")))?
            .next()
            .ok_or_else(|| ReadError::Connection(format!("no address for {host}:{port}")))
    }
}

#[async_trait]
impl RegisterReader for ModbusTcpReader {
    async fn read(
        &self,
        host: &str,
        port: u16,
        start_address: u16,
        count: u16,
    ) -> Result<Vec<RawRegister>, ReadError> {
        let endpoint = format!("{host}:{port}");
        let shared = self.connection_for(&endpoint);
        let mut connection = shared.lock().await;

        if connection.is_none() {
            let socket_addr = Self::resolve(host, port).await?;
            tracing::debug!(%endpoint, "connecting to modbus device");
            let context = tcp::connect(socket_addr)
                .await
                .map_err(|e| ReadError::Connection(format!("connect to {endpoint}: {e}")))?;
            *connection = Some(context);
        }
        let Some(context) = connection.as_mut() else {
            return Err(ReadError::Connection(format!("no connection to {endpoint}")));
        };

        // tokio-modbus returns Result<Result<Vec<u16>, ExceptionCode>, Error>
        let words = match context.read_holding_registers(start_address, count).await {
            Ok(Ok(words)) => words,
            Ok(Err(exception)) => {
                return Err(ReadError::Protocol(format!(
                    "modbus exception: {exception:?}"
                )))
            }
            Err(error) => {
                *connection = None;
                return Err(ReadError::Connection(format!("modbus transport: {error}")));
            }
        };

        if words.len() != count as usize {
            return Err(ReadError::Protocol(format!(
                "expected {count} registers, got {}",
                words.len()
            )));
        }
        Ok(to_raw_registers(start_address, &words))
    }
}
