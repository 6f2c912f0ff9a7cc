use std::{collections::BTreeMap, sync::Arc};

use tokio::sync::{Mutex, OnceCell};
use tracing::debug;

use crate::dns01_client::Dns01Api;
use crate::error::{CertbotError, Result};

/// Reduces a domain to the zone it is assumed to live in.
///
/// A leading `*.` is dropped and the last two labels are kept. Multi-label
/// public suffixes are not recognised: `foo.co.uk` yields `co.uk`.
pub fn root_domain(domain: &str) -> &str {
    let domain = domain.trim_end_matches('.');
    let domain = domain.strip_prefix("*.").unwrap_or(domain);
    match domain.rmatch_indices('.').nth(1) {
        Some((idx, _)) => &domain[idx + 1..],
        None => domain,
    }
}

/// Caches zone ids per root domain for the lifetime of a challenge provider.
///
/// Concurrent lookups of the same root share one provider request.
#[derive(Debug, Default)]
pub struct ZoneResolver {
    zones: Mutex<BTreeMap<String, Arc<OnceCell<String>>>>,
}

impl ZoneResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the zone id for `domain`, asking the provider only on the first
    /// lookup of its root domain. A failed lookup is retried by the next call.
    pub async fn zone_id<D: Dns01Api>(&self, client: &D, domain: &str) -> Result<String> {
        let root = root_domain(domain);
        let cell = self
            .zones
            .lock()
            .await
            .entry(root.to_string())
            .or_default()
            .clone();
        let zone_id = cell
            .get_or_try_init(|| async {
                let zone_id = client.resolve_zone_id(root).await.map_err(|source| {
                    CertbotError::ZoneResolution {
                        domain: domain.to_string(),
                        root_domain: root.to_string(),
                        source,
                    }
                })?;
                debug!(domain, root_domain = root, zone_id = %zone_id, "resolved zone");
                Ok::<_, CertbotError>(zone_id)
            })
            .await?;
        Ok(zone_id.clone())
    }

    /// Returns the cached zone id of a root domain, if it was resolved before.
    pub async fn cached(&self, root_domain: &str) -> Option<String> {
        self.zones
            .lock()
            .await
            .get(root_domain)
            .and_then(|cell| cell.get().cloned())
    }
}
