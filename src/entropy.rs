//! Client-seed source backed by a public block-hash endpoint.
//!
//! The external response is normalized to a single shape before use; any
//! network failure, non-success status, or shape mismatch falls back to
//! locally generated randomness. Seed acquisition never fails and never
//! blocks round creation on a broken upstream.

use crate::config::EntropyConfig;
use rand::RngCore;
use tracing::{debug, warn};

/// Typed adapter over the configured block-hash endpoint.
pub struct ClientSeedSource {
    endpoint: Option<String>,
    client: Option<reqwest::Client>,
}

impl ClientSeedSource {
    pub fn new(config: &EntropyConfig) -> Self {
        let client = config
            .endpoint
            .is_some()
            .then(|| reqwest::Client::builder().timeout(config.timeout()).build())
            .and_then(|built| built.ok());

        Self {
            endpoint: config.endpoint.clone(),
            client,
        }
    }

    /// Fetch a client seed, falling back to local randomness on any failure.
    pub async fn next_seed(&self) -> String {
        if let (Some(endpoint), Some(client)) = (&self.endpoint, &self.client) {
            match fetch_block_hash(client, endpoint).await {
                Ok(hash) => {
                    debug!(endpoint = %endpoint, "Client seed taken from block hash");
                    return hash;
                }
                Err(reason) => {
                    warn!(
                        endpoint = %endpoint,
                        reason = %reason,
                        "Entropy source unavailable, using local random seed"
                    );
                }
            }
        }
        local_seed()
    }
}

async fn fetch_block_hash(client: &reqwest::Client, endpoint: &str) -> Result<String, String> {
    let response = client
        .get(endpoint)
        .send()
        .await
        .map_err(|e| e.to_string())?;

    let status = response.status();
    if !status.is_success() {
        return Err(format!("status {}", status));
    }

    let value: serde_json::Value = response.json().await.map_err(|e| e.to_string())?;
    normalize(&value).ok_or_else(|| "unrecognized response shape".to_string())
}

/// Normalize the upstream response into a bare block-hash string. Accepts the
/// canonical `{"blockHash": ".."}` shape plus the field spellings seen from
/// public explorers.
pub(crate) fn normalize(value: &serde_json::Value) -> Option<String> {
    let hash = value
        .get("blockHash")
        .or_else(|| value.get("block_hash"))
        .or_else(|| value.get("hash"))
        .and_then(|v| v.as_str())?;

    let hash = hash.trim().trim_start_matches("0x");
    if hash.is_empty() {
        return None;
    }
    Some(hash.to_string())
}

/// 32 bytes of local randomness, hex encoded.
pub(crate) fn local_seed() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_normalize_accepts_known_shapes() {
        assert_eq!(
            normalize(&json!({"blockHash": "abc123"})),
            Some("abc123".to_string())
        );
        assert_eq!(
            normalize(&json!({"block_hash": "0xdeadbeef"})),
            Some("deadbeef".to_string())
        );
        assert_eq!(
            normalize(&json!({"hash": "ff00"})),
            Some("ff00".to_string())
        );
    }

    #[test]
    fn test_normalize_rejects_bad_shapes() {
        assert_eq!(normalize(&json!({"height": 12})), None);
        assert_eq!(normalize(&json!({"blockHash": 42})), None);
        assert_eq!(normalize(&json!({"blockHash": ""})), None);
        assert_eq!(normalize(&json!({"blockHash": "0x"})), None);
        assert_eq!(normalize(&json!("abc")), None);
    }

    #[tokio::test]
    async fn test_disabled_endpoint_uses_local_seed() {
        let source = ClientSeedSource::new(&EntropyConfig {
            endpoint: None,
            timeout_ms: 100,
        });

        let seed = source.next_seed().await;
        assert_eq!(seed.len(), 64);
        assert!(seed.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_falls_back() {
        let source = ClientSeedSource::new(&EntropyConfig {
            endpoint: Some("http://127.0.0.1:1/block".to_string()),
            timeout_ms: 100,
        });

        let seed = source.next_seed().await;
        assert_eq!(seed.len(), 64);
    }
}
