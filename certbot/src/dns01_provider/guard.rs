use tracing::warn;

use crate::dns01_client::Dns01Api;
use crate::error::{CertbotError, Result};

/// Fails with [`CertbotError::RecordConflict`] when any TXT record already
/// exists at `record_name`. Existing records are never overwritten.
pub async fn ensure_record_absent<D: Dns01Api>(
    client: &D,
    domain: &str,
    zone_id: &str,
    record_name: &str,
) -> Result<()> {
    let existing = client
        .list_txt_records(zone_id, record_name)
        .await
        .map_err(|source| CertbotError::RecordQuery {
            record_name: record_name.to_string(),
            zone_id: zone_id.to_string(),
            source,
        })?;
    if existing.is_empty() {
        return Ok(());
    }
    let existing_ids: Vec<String> = existing.into_iter().map(|r| r.id).collect();
    warn!(
        domain,
        zone_id,
        record_name,
        ?existing_ids,
        "challenge record already present"
    );
    Err(CertbotError::RecordConflict {
        domain: domain.to_string(),
        zone_id: zone_id.to_string(),
        record_name: record_name.to_string(),
        existing_ids,
    })
}
