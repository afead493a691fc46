use crate::error::ReadError;
use crate::register_reader::{RawRegister, RegisterReader};
use async_trait::async_trait;
use serde_derive::{Deserialize, Serialize};

/// Reads registers through an HTTP device gateway that speaks Modbus on our behalf.
pub struct GatewayReader {
    endpoint_url: String,
    client: reqwest::Client,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayReadRequest {
    pub host: String,
    pub port: u16,
    pub start_address: u16,
    pub register_count: u16,
}

#[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayReadResponse {
    pub ok: bool,
    #[serde(default)]
    pub registers: Vec<GatewayRegister>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayRegister {
    pub index: usize,
    pub address: u16,
    pub value: u16,
}

impl GatewayReader {
    pub fn new(endpoint_url: impl Into<String>) -> Self {
        Self {
            endpoint_url: endpoint_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    fn check_registers(
        request: &GatewayReadRequest,
        registers: Vec<GatewayRegister>,
    ) -> Result<Vec<RawRegister>, ReadError> {
        if registers.len() != request.register_count as usize {
            return Err(ReadError::Protocol(format!(
                "expected {} registers, gateway returned {}",
                request.register_count,
                registers.len()
            )));
        }
        registers
            .into_iter()
            .enumerate()
            .map(|(index, register)| {
                let expected = request.start_address as usize + index;
                if register.address as usize != expected {
                    return Err(ReadError::Protocol(format!(
                        "register {index} has address {}, expected {expected}",
                        register.address
                    )));
                }
                Ok(RawRegister {
                    index,
                    address: register.address,
                    raw_value: register.value,
                })
            })
            .collect()
    }
}

#[async_trait]
impl RegisterReader for GatewayReader {
    async fn read(
        &self,
        host: &str,
        port: u16,
        start_address: u16,
        count: u16,
    ) -> Result<Vec<RawRegister>, ReadError> {
        if self.endpoint_url.is_empty() {
            return Err(ReadError::Connection("no gateway configured".to_string()));
        }
        let request = GatewayReadRequest {
            host: host.to_string(),
            port,
            start_address,
            register_count: count,
        };

        let response = self
            .client
            .post(format!("{}/api/modbus/read", self.endpoint_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| ReadError::Connection(format!("gateway unreachable: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ReadError::Protocol(format!("gateway returned {status}")));
        }
        let body: GatewayReadResponse = response
            .json()
            .await
            .map_err(|e| ReadError::Protocol(format!("malformed gateway response: {e}")))?;

        if !body.ok {
            let message = body.error.unwrap_or_else(|| "unknown gateway error".to_string());
            return Err(ReadError::Connection(message));
        }
        Self::check_registers(&request, body.registers)
    }
}

#[cfg(test)]
mod test_gateway_reader {
    use super::*;

    #[tokio::test]
    async fn test_gateway_read() {
        let mut server = mockito::Server::new_async().await;

        let mock = server
            .mock("POST", "/api/modbus/read")
            .match_body(mockito::Matcher::Json(serde_json::json!({
                "host": "10.0.0.5",
                "port": 502,
                "startAddress": 100,
                "registerCount": 3
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"
                {
                    "ok": true,
                    "registers": [
                        { "index": 0, "address": 100, "value": 10 },
                        { "index": 1, "address": 101, "value": 20 },
                        { "index": 2, "address": 102, "value": 30 }
                    ]
                }
            "#,
            )
            .create_async()
            .await;

        let reader = GatewayReader::new(server.url());
        let registers = reader.read("10.0.0.5", 502, 100, 3).await.unwrap();

        assert_eq!(registers.len(), 3);
        assert_eq!(registers[1].address, 101);
        assert_eq!(registers[1].raw_value, 20);
        assert_eq!(registers[2].index, 2);

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_gateway_reported_failure_is_connection_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/api/modbus/read")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{ "ok": false, "error": "timeout talking to 10.0.0.5:502" }"#)
            .create_async()
            .await;

        let reader = GatewayReader::new(server.url());
        let result = reader.read("10.0.0.5", 502, 100, 3).await;
        assert_eq!(
            result,
            Err(ReadError::Connection(
                "timeout talking to 10.0.0.5:502".to_string()
            ))
        );
    }

    #[tokio::test]
    async fn test_gateway_malformed_responses_are_protocol_errors() {
        let mut server = mockito::Server::new_async().await;
        let _short = server
            .mock("POST", "/api/modbus/read")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{ "ok": true, "registers": [ { "index": 0, "address": 100, "value": 1 } ] }"#)
            .create_async()
            .await;

        let reader = GatewayReader::new(server.url());
        let result = reader.read("10.0.0.5", 502, 100, 3).await;
        assert!(matches!(result, Err(ReadError::Protocol(_))));

        let mut server = mockito::Server::new_async().await;
        let _broken = server
            .mock("POST", "/api/modbus/read")
            .with_status(500)
            .create_async()
            .await;
        let reader = GatewayReader::new(server.url());
        let result = reader.read("10.0.0.5", 502, 100, 3).await;
        assert!(matches!(result, Err(ReadError::Protocol(_))));
    }

    #[tokio::test]
    async fn test_gateway_not_configured() {
        let reader = GatewayReader::new("");
        let result = reader.read("10.0.0.5", 502, 100, 3).await;
        assert_eq!(
            result.unwrap_err().to_string(),
            "connection error: no gateway configured"
        );
    }
}
