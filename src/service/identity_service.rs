//! Identity Resolver
//!
//! Maps a player id (Farcaster fid) to a payable wallet address through an
//! external user directory. Results, including misses, are cached for a
//! bounded time. Every failure resolves to `None`; a missing address only
//! ever excludes that one winner from a settlement.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("Directory request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    #[error("Directory returned HTTP {0}")]
    HttpStatus(u16),

    #[error("Invalid user id: {0}")]
    InvalidUserId(String),
}

/// External directory of verified wallet addresses
#[async_trait]
pub trait WalletDirectory: Send + Sync {
    /// Verified addresses for a user, in the directory's order
    async fn verified_addresses(&self, user_id: &str) -> Result<Vec<String>, IdentityError>;
}

/// Neynar Farcaster directory client
#[derive(Clone)]
pub struct NeynarDirectory {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct BulkUsersResponse {
    #[serde(default)]
    users: Vec<DirectoryUser>,
}

#[derive(Debug, Deserialize)]
struct DirectoryUser {
    #[serde(default)]
    verified_addresses: VerifiedAddresses,
}

#[derive(Debug, Default, Deserialize)]
struct VerifiedAddresses {
    #[serde(default)]
    eth_addresses: Vec<String>,
}

impl NeynarDirectory {
    pub fn new(api_url: String, api_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url: api_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }
}

#[async_trait]
impl WalletDirectory for NeynarDirectory {
    async fn verified_addresses(&self, user_id: &str) -> Result<Vec<String>, IdentityError> {
        let fid = user_id.trim_start_matches("fid:");
        if fid.is_empty() || !fid.chars().all(|c| c.is_ascii_digit()) {
            return Err(IdentityError::InvalidUserId(user_id.to_string()));
        }

        let response = self
            .client
            .get(format!("{}/v2/farcaster/user/bulk", self.api_url))
            .query(&[("fids", fid)])
            .header("x-api-key", &self.api_key)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(IdentityError::HttpStatus(status.as_u16()));
        }

        let body: BulkUsersResponse = response.json().await?;
        Ok(body
            .users
            .into_iter()
            .flat_map(|u| u.verified_addresses.eth_addresses)
            .collect())
    }
}

#[derive(Debug, Clone)]
struct CachedAddress {
    address: Option<String>,
    cached_at: Instant,
}

/// Caching resolver in front of a [`WalletDirectory`]
pub struct IdentityResolver {
    directory: Arc<dyn WalletDirectory>,
    cache: RwLock<HashMap<String, CachedAddress>>,
    ttl: Duration,
}

impl IdentityResolver {
    pub fn new(directory: Arc<dyn WalletDirectory>, ttl: Duration) -> Self {
        Self {
            directory,
            cache: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// First verified address of the user, or `None` if there is none or the
    /// lookup failed. Only answers from the directory are cached.
    pub async fn resolve_wallet_address(&self, user_id: &str) -> Option<String> {
        if let Some(hit) = self.cached(user_id).await {
            debug!(user_id = user_id, found = hit.is_some(), "Wallet address cache hit");
            return hit;
        }

        let addresses = match self.directory.verified_addresses(user_id).await {
            Ok(addresses) => addresses,
            Err(e) => {
                // Not cached; the next lookup asks the directory again
                warn!(user_id = user_id, error = %e, "Wallet address lookup failed");
                return None;
            }
        };

        let address = addresses.into_iter().find(|a| !a.trim().is_empty());
        if address.is_none() {
            warn!(user_id = user_id, "No verified wallet address for user");
        }

        self.cache.write().await.insert(
            user_id.to_string(),
            CachedAddress {
                address: address.clone(),
                cached_at: Instant::now(),
            },
        );

        address
    }

    /// Drop every expired cache entry
    pub async fn purge_expired(&self) -> usize {
        let mut cache = self.cache.write().await;
        let before = cache.len();
        cache.retain(|_, entry| entry.cached_at.elapsed() < self.ttl);
        before - cache.len()
    }

    async fn cached(&self, user_id: &str) -> Option<Option<String>> {
        let cache = self.cache.read().await;
        cache
            .get(user_id)
            .filter(|entry| entry.cached_at.elapsed() < self.ttl)
            .map(|entry| entry.address.clone())
    }
}
