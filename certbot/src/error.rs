use thiserror::Error;

/// Errors surfaced by a renewal attempt.
///
/// Every variant names the stage that failed and carries the identifiers
/// needed to diagnose it without retrying blindly.
#[derive(Debug, Error)]
pub enum CertbotError {
    #[error("failed to resolve zone id for {domain} (root domain {root_domain})")]
    ZoneResolution {
        domain: String,
        root_domain: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("TXT record {record_name} already exists in zone {zone_id}, refusing to overwrite")]
    RecordConflict {
        domain: String,
        zone_id: String,
        record_name: String,
        existing_ids: Vec<String>,
    },

    #[error("failed to query TXT records for {record_name} in zone {zone_id}")]
    RecordQuery {
        record_name: String,
        zone_id: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to create TXT record {record_name} in zone {zone_id}")]
    RecordCreate {
        domain: String,
        zone_id: String,
        record_name: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to delete TXT record {record_id} in zone {zone_id} for {domain}")]
    RecordDelete {
        domain: String,
        zone_id: String,
        record_id: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("no challenge record was created for {domain}, nothing to clean up")]
    CleanupNotReady { domain: String },

    #[error("invalid DNS-01 solver settings: {0}")]
    ChallengeSetup(String),

    #[error("failed to register ACME account {email} at {directory_url}")]
    AccountRegistration {
        email: String,
        directory_url: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to obtain certificate for {} ({stage})", domains.join(", "))]
    CertificateObtain {
        domains: Vec<String>,
        stage: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to build certificate archive {location}")]
    Archive {
        location: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to configure object storage")]
    Storage(#[source] anyhow::Error),

    #[error("failed to upload {object_name} to bucket {bucket}")]
    PublishUpload {
        bucket: String,
        object_name: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to presign download url for {object_name} in bucket {bucket}")]
    Presign {
        bucket: String,
        object_name: String,
        #[source]
        source: anyhow::Error,
    },
}

pub type Result<T, E = CertbotError> = std::result::Result<T, E>;

impl CertbotError {
    pub(crate) fn obtain(
        domains: &[String],
        stage: &'static str,
        source: impl Into<anyhow::Error>,
    ) -> Self {
        Self::CertificateObtain {
            domains: domains.to_vec(),
            stage,
            source: source.into(),
        }
    }
}
