//! A certbot for issuing certificates through ACME DNS-01 challenges on Cloudflare.
//!
//! This library registers an ACME account, proves control of the requested domains by
//! publishing `_acme-challenge` TXT records, and packages the issued certificate into a
//! zip archive that can be uploaded to S3 compatible storage.
//!
//! # Features
//!
//! - DNS-01 challenge provider with per-domain challenge bookkeeping
//! - Zone lookup by root domain, cached per provider
//! - Refuses to overwrite existing challenge records
//! - Wildcard and multi-domain (SAN) certificates
//! - Zip packaging on disk or in memory, upload with a 15 minute download url
//!
//! # Usage
//!
//! ```rust,no_run
//! use cf_certbot::{CertBot, CertificateRenewalRequest, Dns01Client};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let dns01_client = Dns01Client::new_cloudflare("your_cloudflare_api_token".into());
//!     let bot = CertBot::new(dns01_client);
//!
//!     let request = CertificateRenewalRequest::builder()
//!         .domain_names(vec!["*.example.com".into()])
//!         .acme_email("admin@example.com")
//!         .acme_url("https://acme-staging-v02.api.letsencrypt.org/directory")
//!         .build();
//!     let cert = bot.renew(&request).await?;
//!
//!     println!("New certificate obtained: {}", cert.fullchain_pem);
//!     Ok(())
//! }
//! ```
//!
//! For more detailed information on the available methods and their usage, please refer
//! to the documentation of individual structs and functions.

pub use acme_client::{
    AcmeAccount, AcmeApi, ChallengeSolver, Dns01Solver, InstantAcme, IssuedCertificate,
    RegisteredAccount, Registration,
};
pub use archive::{
    archive_to_buffer, read_archive, write_archive, ArchiveContents, CERTIFICATE_ENTRY,
    ISSUER_CA_ENTRY, PRIVATE_KEY_ENTRY,
};
pub use bot::{CertBot, CertificateRenewalRequest, DEFAULT_NAMESERVERS, DEFAULT_PROPAGATION_TIMEOUT};
pub use certificate::CertificateData;
pub use dns01_client::{
    CloudflareClient, CreateRecordRequest, Dns01Api, Dns01Client, Record, RecordChange,
    UpdateRecordRequest,
};
pub use dns01_provider::{
    challenge_record_name, challenge_value, ensure_record_absent, root_domain, ChallengeState,
    DnsChallengeProvider, ZoneResolver, CHALLENGE_TTL,
};
pub use error::{CertbotError, Result};
pub use publisher::{ObjectStore, Published, Publisher, S3Config, S3Store, DOWNLOAD_URL_EXPIRY};

mod acme_client;
mod archive;
mod bot;
mod certificate;
mod dns01_client;
mod dns01_provider;
mod error;
mod publisher;

#[cfg(test)]
mod testing;
