/// CT log submission client and the SCT wire form.
use crate::config::CtLogConfig;
use crate::error::{CaError, Result};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A Signed Certificate Timestamp as returned by a log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sct {
    /// v1 = 0
    pub version: u8,
    /// SHA-256 of the log's public key
    pub log_id: Vec<u8>,
    /// Milliseconds since the epoch
    pub timestamp: u64,
    /// CT extensions, usually empty
    pub extensions: Vec<u8>,
    /// digitally-signed struct, opaque to us
    pub signature: Vec<u8>,
}

impl Sct {
    /// RFC 6962 TLS encoding of one SCT
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(43 + self.extensions.len() + self.signature.len());
        out.push(self.version);
        out.extend_from_slice(&self.log_id);
        out.extend_from_slice(&self.timestamp.to_be_bytes());
        out.extend_from_slice(&(self.extensions.len() as u16).to_be_bytes());
        out.extend_from_slice(&self.extensions);
        out.extend_from_slice(&self.signature);
        out
    }
}

/// TLS encoding of a SignedCertificateTimestampList: a length-prefixed
/// list of length-prefixed SCTs.
pub fn encode_sct_list(scts: &[Sct]) -> Vec<u8> {
    let mut body = Vec::new();
    for sct in scts {
        let encoded = sct.encode();
        body.extend_from_slice(&(encoded.len() as u16).to_be_bytes());
        body.extend_from_slice(&encoded);
    }
    let mut out = Vec::with_capacity(body.len() + 2);
    out.extend_from_slice(&(body.len() as u16).to_be_bytes());
    out.extend(body);
    out
}

/// The add-chain request body
#[derive(Debug, Serialize)]
struct AddChainRequest {
    chain: Vec<String>,
}

/// The add-chain response body
#[derive(Debug, Deserialize)]
struct AddChainResponse {
    sct_version: u8,
    id: String,
    timestamp: u64,
    #[serde(default)]
    extensions: String,
    signature: String,
}

/// Submission surface of one CT log
#[async_trait]
pub trait LogClient: Send + Sync {
    /// POST a precertificate chain to /ct/v1/add-pre-chain
    async fn submit_precert(&self, log: &CtLogConfig, chain: &[Vec<u8>]) -> Result<Sct>;

    /// POST a final chain to /ct/v1/add-chain
    async fn submit_final(&self, log: &CtLogConfig, chain: &[Vec<u8>]) -> Result<Sct>;
}

/// HTTP log client
pub struct HttpLogClient {
    http: reqwest::Client,
}

impl HttpLogClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CaError::internal(format!("building CT client: {}", e)))?;
        Ok(Self { http })
    }

    async fn submit(&self, url: String, chain: &[Vec<u8>]) -> Result<Sct> {
        let body = AddChainRequest {
            chain: chain.iter().map(|der| STANDARD.encode(der)).collect(),
        };
        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| CaError::connection(format!("submitting to {}: {}", url, e)))?;
        if !response.status().is_success() {
            return Err(CaError::connection(format!(
                "log {} answered {}",
                url,
                response.status()
            )));
        }
        let parsed: AddChainResponse = response
            .json()
            .await
            .map_err(|e| CaError::connection(format!("decoding SCT from {}: {}", url, e)))?;

        let decode = |field: &str, value: &str| {
            STANDARD
                .decode(value)
                .map_err(|e| CaError::connection(format!("log {} sent bad {}: {}", url, field, e)))
        };
        Ok(Sct {
            version: parsed.sct_version,
            log_id: decode("id", &parsed.id)?,
            timestamp: parsed.timestamp,
            extensions: decode("extensions", &parsed.extensions)?,
            signature: decode("signature", &parsed.signature)?,
        })
    }
}

#[async_trait]
impl LogClient for HttpLogClient {
    async fn submit_precert(&self, log: &CtLogConfig, chain: &[Vec<u8>]) -> Result<Sct> {
        self.submit(
            format!("{}/ct/v1/add-pre-chain", log.url.trim_end_matches('/')),
            chain,
        )
        .await
    }

    async fn submit_final(&self, log: &CtLogConfig, chain: &[Vec<u8>]) -> Result<Sct> {
        self.submit(
            format!("{}/ct/v1/add-chain", log.url.trim_end_matches('/')),
            chain,
        )
        .await
    }
}

/// Scriptable log client for tests: per-log delays and failures, with
/// SCTs whose log id is derived from the submission URL.
#[derive(Default)]
pub struct MockLogClient {
    delays: std::collections::HashMap<String, Duration>,
    failing: std::collections::HashSet<String>,
}

impl MockLogClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay responses from the given log URL
    pub fn delay(mut self, url: &str, delay: Duration) -> Self {
        self.delays.insert(url.to_string(), delay);
        self
    }

    /// Make submissions to the given log URL fail
    pub fn fail(mut self, url: &str) -> Self {
        self.failing.insert(url.to_string());
        self
    }

    fn respond(&self, log: &CtLogConfig) -> Result<Sct> {
        if self.failing.contains(&log.url) {
            return Err(CaError::connection(format!("log {} refused", log.url)));
        }
        let log_id: [u8; 32] = {
            use sha2::{Digest, Sha256};
            Sha256::digest(log.url.as_bytes()).into()
        };
        Ok(Sct {
            version: 0,
            log_id: log_id.to_vec(),
            timestamp: 1_700_000_000_000,
            extensions: vec![],
            signature: vec![0x04, 0x03, 0x00, 0x01, 0xAA],
        })
    }
}

#[async_trait]
impl LogClient for MockLogClient {
    async fn submit_precert(&self, log: &CtLogConfig, _chain: &[Vec<u8>]) -> Result<Sct> {
        if let Some(delay) = self.delays.get(&log.url) {
            tokio::time::sleep(*delay).await;
        }
        self.respond(log)
    }

    async fn submit_final(&self, log: &CtLogConfig, _chain: &[Vec<u8>]) -> Result<Sct> {
        if let Some(delay) = self.delays.get(&log.url) {
            tokio::time::sleep(*delay).await;
        }
        self.respond(log)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sct(id_byte: u8) -> Sct {
        Sct {
            version: 0,
            log_id: vec![id_byte; 32],
            timestamp: 1_700_000_000_000,
            extensions: vec![],
            signature: vec![0x04, 0x03, 0x00, 0x01, 0xAA],
        }
    }

    #[test]
    fn single_sct_encoding() {
        let encoded = sct(0x11).encode();
        assert_eq!(encoded[0], 0); // v1
        assert_eq!(&encoded[1..33], &[0x11; 32]);
        // extensions length is zero
        assert_eq!(&encoded[41..43], &[0, 0]);
    }

    #[test]
    fn list_encoding_is_length_prefixed() {
        let list = encode_sct_list(&[sct(0x11), sct(0x22)]);
        let total = u16::from_be_bytes([list[0], list[1]]) as usize;
        assert_eq!(total, list.len() - 2);

        let first_len = u16::from_be_bytes([list[2], list[3]]) as usize;
        assert_eq!(first_len, sct(0x11).encode().len());
    }
}
