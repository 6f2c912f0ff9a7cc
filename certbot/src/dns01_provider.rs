//! The DNS-01 challenge provider.
//!
//! [`DnsChallengeProvider`] publishes the `_acme-challenge` TXT record an ACME
//! server asks for and removes it again once the server is done validating.
//! Each domain gets its own [`ChallengeState`], so one provider can serve
//! several validations of a multi-domain order at the same time. Domains that
//! share a record name (`example.com` and `*.example.com`) are serialized on
//! that name: the second one sees the first one's record and is refused.

use std::{collections::BTreeMap, sync::Arc};

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use crate::acme_client::ChallengeSolver;
use crate::dns01_client::{Dns01Api, Dns01Client};
use crate::error::{CertbotError, Result};

pub use guard::ensure_record_absent;
pub use zone::{root_domain, ZoneResolver};

mod guard;
mod zone;

/// TTL of the challenge TXT records, in seconds.
pub const CHALLENGE_TTL: u32 = 120;

const ACME_CHALLENGE_LABEL: &str = "_acme-challenge";

/// Name of the TXT record validated for `domain`.
pub fn challenge_record_name(domain: &str) -> String {
    let domain = domain.trim_end_matches('.');
    let domain = domain.strip_prefix("*.").unwrap_or(domain);
    format!("{ACME_CHALLENGE_LABEL}.{domain}")
}

/// TXT value for a key authorization: base64url(SHA-256(key_authorization)).
pub fn challenge_value(key_authorization: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(key_authorization.as_bytes()))
}

/// Bookkeeping for the challenge of a single domain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChallengeState {
    pub zone_id: Option<String>,
    pub record_id: Option<String>,
    pub created: bool,
}

impl ChallengeState {
    pub fn is_idle(&self) -> bool {
        !self.created && self.record_id.is_none()
    }
}

/// Serves DNS-01 challenges through a [`Dns01Api`] provider.
#[derive(Debug)]
pub struct DnsChallengeProvider<D = Dns01Client> {
    client: D,
    ttl: u32,
    zones: ZoneResolver,
    challenges: Mutex<BTreeMap<String, ChallengeState>>,
    record_locks: Mutex<BTreeMap<String, Arc<Mutex<()>>>>,
}

impl<D: Dns01Api> DnsChallengeProvider<D> {
    pub fn new(client: D) -> Self {
        Self::with_ttl(client, CHALLENGE_TTL)
    }

    pub fn with_ttl(client: D, ttl: u32) -> Self {
        Self {
            client,
            ttl,
            zones: ZoneResolver::new(),
            challenges: Mutex::new(BTreeMap::new()),
            record_locks: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn zones(&self) -> &ZoneResolver {
        &self.zones
    }

    /// Snapshot of the challenge state of `domain`. Domains never presented
    /// report the idle default.
    pub async fn challenge_state(&self, domain: &str) -> ChallengeState {
        self.challenges
            .lock()
            .await
            .get(domain)
            .cloned()
            .unwrap_or_default()
    }

    async fn record_lock(&self, record_name: &str) -> Arc<Mutex<()>> {
        self.record_locks
            .lock()
            .await
            .entry(record_name.to_string())
            .or_default()
            .clone()
    }

    /// Publishes the challenge TXT record for `domain`.
    pub async fn present(&self, domain: &str, key_authorization: &str) -> Result<()> {
        let zone_id = self.zones.zone_id(&self.client, domain).await?;
        let record_name = challenge_record_name(domain);
        let value = challenge_value(key_authorization);

        // The existence check and the create must not interleave with another
        // domain publishing under the same name.
        let lock = self.record_lock(&record_name).await;
        let _guard = lock.lock().await;

        ensure_record_absent(&self.client, domain, &zone_id, &record_name).await?;

        debug!(domain, zone_id = %zone_id, "creating dns record {record_name}");
        let record_id = self
            .client
            .create_txt_record(&zone_id, &record_name, &value, self.ttl)
            .await
            .map_err(|source| CertbotError::RecordCreate {
                domain: domain.to_string(),
                zone_id: zone_id.clone(),
                record_name: record_name.clone(),
                source,
            })?;
        info!(domain, zone_id = %zone_id, record_id = %record_id, "created challenge record");

        self.challenges.lock().await.insert(
            domain.to_string(),
            ChallengeState {
                zone_id: Some(zone_id),
                record_id: Some(record_id),
                created: true,
            },
        );
        Ok(())
    }

    /// Removes the challenge TXT record created by [`Self::present`].
    ///
    /// The state is taken out while the record is deleted, so a concurrent
    /// cleanup of the same domain finds nothing to do. A failed delete puts
    /// it back so the call can be retried.
    pub async fn cleanup(&self, domain: &str) -> Result<()> {
        let zone_id = self.zones.zone_id(&self.client, domain).await?;

        let lock = self.record_lock(&challenge_record_name(domain)).await;
        let _guard = lock.lock().await;

        let state = {
            let mut challenges = self.challenges.lock().await;
            let ready = matches!(
                challenges.get(domain),
                Some(ChallengeState {
                    created: true,
                    record_id: Some(record_id),
                    ..
                }) if !record_id.is_empty()
            );
            if ready {
                challenges.remove(domain)
            } else {
                None
            }
        };
        let Some(state) = state else {
            return Err(CertbotError::CleanupNotReady {
                domain: domain.to_string(),
            });
        };
        let record_id = state.record_id.clone().unwrap_or_default();
        let zone_id = state.zone_id.clone().unwrap_or(zone_id);

        debug!(domain, zone_id = %zone_id, "removing dns record {record_id}");
        if let Err(source) = self.client.delete_record(&zone_id, &record_id).await {
            error!(domain, zone_id = %zone_id, record_id = %record_id, "failed to remove dns record: {source:#}");
            self.challenges
                .lock()
                .await
                .insert(domain.to_string(), state);
            return Err(CertbotError::RecordDelete {
                domain: domain.to_string(),
                zone_id,
                record_id,
                source,
            });
        }

        self.challenges.lock().await.insert(
            domain.to_string(),
            ChallengeState {
                zone_id: Some(zone_id.clone()),
                record_id: None,
                created: false,
            },
        );
        info!(domain, zone_id = %zone_id, record_id = %record_id, "removed challenge record");
        Ok(())
    }
}

impl<D: Dns01Api> ChallengeSolver for DnsChallengeProvider<D> {
    async fn present(&self, domain: &str, _token: &str, key_authorization: &str) -> Result<()> {
        DnsChallengeProvider::present(self, domain, key_authorization).await
    }

    async fn cleanup(&self, domain: &str, _token: &str, _key_authorization: &str) -> Result<()> {
        DnsChallengeProvider::cleanup(self, domain).await
    }
}

#[cfg(test)]
mod tests;
