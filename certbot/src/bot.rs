use std::{path::PathBuf, time::Duration};

use tracing::{error, info};

use crate::acme_client::{AcmeAccount, AcmeApi, Dns01Solver, InstantAcme};
use crate::certificate::CertificateData;
use crate::dns01_client::{Dns01Api, Dns01Client};
use crate::dns01_provider::DnsChallengeProvider;
use crate::error::{CertbotError, Result};
use crate::publisher::{ObjectStore, Publisher, S3Store};

/// Public resolvers asked to confirm the challenge record.
pub const DEFAULT_NAMESERVERS: [&str; 2] = ["1.1.1.1:53", "1.0.0.1:53"];

/// Maximum time for the challenge record to become visible.
pub const DEFAULT_PROPAGATION_TIMEOUT: Duration = Duration::from_secs(60);

fn default_nameservers() -> Vec<String> {
    DEFAULT_NAMESERVERS.iter().map(|ns| ns.to_string()).collect()
}

/// Everything a single renewal attempt needs to know.
#[allow(clippy::duplicated_attributes)]
#[derive(Clone, Debug, bon::Builder)]
#[builder(on(String, into))]
pub struct CertificateRenewalRequest {
    /// Names on the certificate. Wildcards (`*.example.com`) are allowed.
    pub domain_names: Vec<String>,
    pub acme_email: String,
    /// ACME directory url
    pub acme_url: String,
    #[builder(default)]
    pub save_zip: bool,
    /// Where to write the archive; defaults to `<object name>` in the
    /// current directory.
    pub zip_path: Option<PathBuf>,
    #[builder(default)]
    pub push_s3: bool,
    /// Object name of the uploaded archive
    pub object_name: Option<String>,
    #[builder(default = default_nameservers())]
    pub recursive_nameservers: Vec<String>,
    #[builder(default = DEFAULT_PROPAGATION_TIMEOUT)]
    pub propagation_timeout: Duration,
}

impl CertificateRenewalRequest {
    /// The object name to publish under, derived from the first domain when
    /// none was given.
    pub fn archive_name(&self) -> String {
        if let Some(name) = &self.object_name {
            return name.clone();
        }
        let domain = self
            .domain_names
            .first()
            .map(|d| d.trim_start_matches("*.").replace('*', "wildcard"))
            .unwrap_or_else(|| "certificate".into());
        format!("{domain}-{}.zip", time::OffsetDateTime::now_utc().unix_timestamp())
    }
}

/// Drives renewals: ACME registration, DNS-01 validation, packaging and
/// publishing.
pub struct CertBot<F, D = Dns01Client, O = S3Store> {
    connect: F,
    dns01_client: D,
    publisher: Option<Publisher<O>>,
}

impl<D> CertBot<fn(&str) -> InstantAcme, D, S3Store> {
    /// A bot talking to real ACME servers through `instant-acme`.
    pub fn new(dns01_client: D) -> Self {
        Self::with_acme(|url: &str| InstantAcme::new(url), dns01_client)
    }
}

impl<F, D, O> CertBot<F, D, O> {
    /// A bot building its ACME client with `connect`, which receives the
    /// directory url of each request.
    pub fn with_acme(connect: F, dns01_client: D) -> Self {
        Self {
            connect,
            dns01_client,
            publisher: None,
        }
    }

    pub fn with_publisher(mut self, publisher: Publisher<O>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn publisher(&self) -> Option<&Publisher<O>> {
        self.publisher.as_ref()
    }
}

impl<F, A, D, O> CertBot<F, D, O>
where
    F: Fn(&str) -> A,
    A: AcmeApi,
    D: Dns01Api + Clone,
    O: ObjectStore,
{
    /// Run one renewal attempt.
    ///
    /// Every failure up to and including packaging aborts the attempt.
    /// Publishing failures are recorded in
    /// [`CertificateData::publish_error`] instead.
    pub async fn renew(&self, request: &CertificateRenewalRequest) -> Result<CertificateData> {
        if request.push_s3 && self.publisher.is_none() {
            return Err(CertbotError::Storage(anyhow::anyhow!(
                "publishing requested but no object store is configured"
            )));
        }
        info!(
            "renewing certificate for {} at {}",
            request.domain_names.join(", "),
            request.acme_url
        );

        let account = AcmeAccount::new(&request.acme_email);
        let acme = (self.connect)(&request.acme_url);
        let provider = DnsChallengeProvider::new(self.dns01_client.clone());
        let solver = Dns01Solver::new(
            provider,
            &request.recursive_nameservers,
            request.propagation_timeout,
        )?;

        let registered = acme.register(account).await?;
        let issued = acme
            .obtain_certificate(&registered, &solver, &request.domain_names)
            .await?;
        let mut data = CertificateData::new(&request.domain_names, issued);
        info!("obtained certificate for {}", request.domain_names.join(", "));

        let object_name = request.archive_name();
        if request.save_zip {
            let path = request
                .zip_path
                .clone()
                .unwrap_or_else(|| PathBuf::from(&object_name));
            data.save_archive(&path)?;
            info!("saved certificate archive to {}", path.display());
        }

        if let (true, Some(publisher)) = (request.push_s3, &self.publisher) {
            if let Err(err) = data.publish(publisher, &object_name).await {
                let err = anyhow::Error::from(err);
                error!("failed to publish certificate archive: {err:#}");
                data.publish_error = Some(format!("{err:#}"));
            }
        }
        Ok(data)
    }
}
