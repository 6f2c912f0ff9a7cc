use std::{
    net::{IpAddr, SocketAddr},
    time::Duration,
};

use anyhow::{bail, Context};
use hickory_resolver::{
    config::{NameServerConfig, Protocol, ResolverConfig, ResolverOpts},
    error::ResolveErrorKind,
    TokioAsyncResolver,
};
use instant_acme::{
    Account, AuthorizationStatus, ChallengeType, Identifier, NewAccount, NewOrder, Order,
    OrderStatus,
};
use rcgen::{CertificateParams, DistinguishedName, KeyPair};
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};
use x509_parser::prelude::Pem;

use crate::dns01_provider::challenge_record_name;
use crate::error::{CertbotError, Result};

/// The contract an ACME client drives during DNS-01 validation.
#[allow(async_fn_in_trait)]
pub trait ChallengeSolver {
    /// Publish the validation record for `domain`.
    async fn present(&self, domain: &str, token: &str, key_authorization: &str) -> Result<()>;

    /// Remove the validation record published by `present`.
    async fn cleanup(&self, domain: &str, token: &str, key_authorization: &str) -> Result<()>;
}

/// A [`ChallengeSolver`] bound to the resolvers used to confirm propagation.
#[derive(Debug)]
pub struct Dns01Solver<S> {
    solver: S,
    nameservers: Vec<SocketAddr>,
    propagation_timeout: Duration,
}

impl<S: ChallengeSolver> Dns01Solver<S> {
    /// Attach `solver` with the recursive nameservers (`ip` or `ip:port`) that
    /// must see the record, and the maximum time to wait for them.
    pub fn new(
        solver: S,
        recursive_nameservers: &[String],
        propagation_timeout: Duration,
    ) -> Result<Self> {
        if propagation_timeout.is_zero() {
            return Err(CertbotError::ChallengeSetup(
                "propagation timeout must be positive".into(),
            ));
        }
        let nameservers = recursive_nameservers
            .iter()
            .map(|ns| parse_nameserver(ns))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            solver,
            nameservers,
            propagation_timeout,
        })
    }

    pub fn solver(&self) -> &S {
        &self.solver
    }

    pub fn nameservers(&self) -> &[SocketAddr] {
        &self.nameservers
    }

    pub fn propagation_timeout(&self) -> Duration {
        self.propagation_timeout
    }

    fn resolver(&self) -> anyhow::Result<TokioAsyncResolver> {
        if self.nameservers.is_empty() {
            return TokioAsyncResolver::tokio_from_system_conf()
                .context("failed to create dns resolver");
        }
        let mut config = ResolverConfig::new();
        for addr in &self.nameservers {
            config.add_name_server(NameServerConfig::new(*addr, Protocol::Udp));
        }
        let mut opts = ResolverOpts::default();
        opts.cache_size = 0;
        Ok(TokioAsyncResolver::tokio(config, opts))
    }

    /// Wait until the recursive nameservers return `dns_value` for `record_name`.
    pub async fn wait_for_propagation(
        &self,
        record_name: &str,
        dns_value: &str,
    ) -> anyhow::Result<()> {
        let deadline = Instant::now() + self.propagation_timeout;
        let mut delay = Duration::from_millis(250);
        let mut tries = 0u32;
        loop {
            sleep(delay).await;
            tries += 1;

            let dns_resolver = self.resolver()?;
            let settled = match dns_resolver.txt_lookup(record_name).await {
                Ok(record) => record.iter().any(|txt| txt.to_string() == dns_value),
                Err(err) => {
                    let ResolveErrorKind::NoRecordsFound { .. } = err.kind() else {
                        bail!("failed to lookup dns record {record_name}: {err}");
                    };
                    false
                }
            };
            if settled {
                debug!(tries, record_name, "challenge record is visible");
                return Ok(());
            }
            let now = Instant::now();
            if now >= deadline {
                bail!(
                    "dns record {record_name} not visible after {:?}",
                    self.propagation_timeout
                );
            }
            delay = (delay * 2).min(deadline - now);
            debug!(tries, record_name, "challenge not found, waiting {delay:?}");
        }
    }
}

fn parse_nameserver(ns: &str) -> Result<SocketAddr> {
    if let Ok(addr) = ns.parse::<SocketAddr>() {
        return Ok(addr);
    }
    ns.parse::<IpAddr>()
        .map(|ip| SocketAddr::new(ip, 53))
        .map_err(|_| CertbotError::ChallengeSetup(format!("invalid nameserver address: {ns}")))
}

/// An ACME account before registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcmeAccount {
    pub email: String,
}

impl AcmeAccount {
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
        }
    }

    /// Contact URIs sent with the registration.
    pub fn contact(&self) -> Vec<String> {
        if self.email.is_empty() {
            return vec![];
        }
        vec![format!("mailto:{}", self.email)]
    }
}

/// The registration resource returned by the CA.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub uri: String,
    pub terms_of_service_agreed: bool,
}

/// An account the CA has accepted. Replaces the [`AcmeAccount`] it was made from.
#[derive(Debug)]
pub struct RegisteredAccount<A> {
    pub email: String,
    pub registration: Registration,
    pub account: A,
}

/// Material returned by a successful order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedCertificate {
    /// Leaf certificate PEM
    pub certificate: String,
    /// Private key PEM of the leaf certificate
    pub private_key: String,
    /// Issuer chain PEM
    pub issuer_certificate: String,
}

/// The operations the renewal needs from an ACME client.
#[allow(async_fn_in_trait)]
pub trait AcmeApi {
    type Account;

    /// Register a new account, agreeing to the terms of service.
    async fn register(&self, account: AcmeAccount) -> Result<RegisteredAccount<Self::Account>>;

    /// Order one certificate covering every name in `domains`.
    async fn obtain_certificate<S: ChallengeSolver>(
        &self,
        account: &RegisteredAccount<Self::Account>,
        solver: &Dns01Solver<S>,
        domains: &[String],
    ) -> Result<IssuedCertificate>;
}

/// [`AcmeApi`] over `instant-acme`.
#[derive(Debug, Clone)]
pub struct InstantAcme {
    directory_url: String,
}

impl InstantAcme {
    pub fn new(directory_url: impl Into<String>) -> Self {
        Self {
            directory_url: directory_url.into(),
        }
    }
}

impl AcmeApi for InstantAcme {
    type Account = Account;

    async fn register(&self, account: AcmeAccount) -> Result<RegisteredAccount<Account>> {
        let contact = account.contact();
        let contact: Vec<&str> = contact.iter().map(String::as_str).collect();
        let (acme_account, _credentials) = Account::create(
            &NewAccount {
                contact: &contact,
                terms_of_service_agreed: true,
                only_return_existing: false,
            },
            &self.directory_url,
            None,
        )
        .await
        .map_err(|err| CertbotError::AccountRegistration {
            email: account.email.clone(),
            directory_url: self.directory_url.clone(),
            source: err.into(),
        })?;
        let registration = Registration {
            uri: acme_account.id().to_string(),
            terms_of_service_agreed: true,
        };
        info!("registered ACME account {}", registration.uri);
        Ok(RegisteredAccount {
            email: account.email,
            registration,
            account: acme_account,
        })
    }

    async fn obtain_certificate<S: ChallengeSolver>(
        &self,
        account: &RegisteredAccount<Account>,
        solver: &Dns01Solver<S>,
        domains: &[String],
    ) -> Result<IssuedCertificate> {
        info!("requesting new certificate for {}", domains.join(", "));
        let identifiers = domains
            .iter()
            .map(|name| Identifier::Dns(name.clone()))
            .collect::<Vec<_>>();
        let mut order = account
            .account
            .new_order(&NewOrder {
                identifiers: &identifiers,
            })
            .await
            .map_err(|e| CertbotError::obtain(domains, "create order", e))?;

        let key = KeyPair::generate().map_err(|e| CertbotError::obtain(domains, "generate key", e))?;
        let mut poll = OrderPoll::new(ORDER_WAIT_TIMEOUT, Duration::from_secs(2));
        let mut authorized = false;
        loop {
            order
                .refresh()
                .await
                .map_err(|e| CertbotError::obtain(domains, "refresh order", e))?;
            match order.state().status {
                // Need to accept the challenge
                OrderStatus::Pending => {
                    if authorized {
                        debug!("challenges are ready, waiting for order to be ready");
                        poll.wait(domains, "pending").await?;
                        continue;
                    }
                    debug!("order is pending, waiting for authorization");
                    authorize(&mut order, solver, domains).await?;
                    authorized = true;
                    poll.restart();
                }
                // To upload CSR
                OrderStatus::Ready => {
                    debug!("order is ready, uploading CSR");
                    let csr = make_csr(&key, domains)
                        .map_err(|e| CertbotError::obtain(domains, "build csr", e))?;
                    order
                        .finalize(&csr)
                        .await
                        .map_err(|e| CertbotError::obtain(domains, "finalize order", e))?;
                    poll.restart();
                }
                // Need to wait for the CSR to be accepted
                OrderStatus::Processing => {
                    debug!("order is processing, waiting for the CSR to be accepted");
                    poll.wait(domains, "processing").await?;
                }
                // Certificate is ready
                OrderStatus::Valid => {
                    debug!("order is valid, getting certificate");
                    let chain = extract_certificate(order)
                        .await
                        .map_err(|e| CertbotError::obtain(domains, "download certificate", e))?;
                    let (certificate, issuer_certificate) = split_chain(&chain)
                        .map_err(|e| CertbotError::obtain(domains, "parse certificate", e))?;
                    return Ok(IssuedCertificate {
                        certificate,
                        private_key: key.serialize_pem(),
                        issuer_certificate,
                    });
                }
                // Something went wrong
                OrderStatus::Invalid => {
                    return Err(CertbotError::obtain(
                        domains,
                        "order",
                        anyhow::anyhow!("order is invalid"),
                    ))
                }
            }
        }
    }
}

/// How long an order may sit in `pending` or `processing` once we are only
/// waiting on the CA.
const ORDER_WAIT_TIMEOUT: Duration = Duration::from_secs(300);

/// Bounds the polling of an order that is waiting on the CA.
#[derive(Debug)]
struct OrderPoll {
    timeout: Duration,
    interval: Duration,
    deadline: Instant,
}

impl OrderPoll {
    fn new(timeout: Duration, interval: Duration) -> Self {
        Self {
            timeout,
            interval,
            deadline: Instant::now() + timeout,
        }
    }

    /// Start a new waiting period, after the order made progress.
    fn restart(&mut self) {
        self.deadline = Instant::now() + self.timeout;
    }

    /// Sleep before the next refresh, or fail once the deadline has passed.
    async fn wait(&self, domains: &[String], status: &str) -> Result<()> {
        let now = Instant::now();
        if now >= self.deadline {
            return Err(CertbotError::obtain(
                domains,
                "wait for order",
                anyhow::anyhow!("order still {status} after {:?}", self.timeout),
            ));
        }
        sleep(self.interval.min(self.deadline - now)).await;
        Ok(())
    }
}

/// Validate every pending authorization, one at a time.
///
/// `example.com` and `*.example.com` share a challenge record name, so each
/// record is removed before the next one is presented.
async fn authorize<S: ChallengeSolver>(
    order: &mut Order,
    solver: &Dns01Solver<S>,
    domains: &[String],
) -> Result<()> {
    let authorizations = order
        .authorizations()
        .await
        .map_err(|e| CertbotError::obtain(domains, "get authorizations", e))?;
    if authorizations.is_empty() {
        return Err(CertbotError::obtain(
            domains,
            "get authorizations",
            anyhow::anyhow!("no authorizations found"),
        ));
    }
    for (index, authz) in authorizations.iter().enumerate() {
        match authz.status {
            AuthorizationStatus::Pending => {}
            AuthorizationStatus::Valid => continue,
            _ => {
                return Err(CertbotError::obtain(
                    domains,
                    "authorize",
                    anyhow::anyhow!("unsupported authorization status: {:?}", authz.status),
                ))
            }
        }

        let challenge = authz
            .challenges
            .iter()
            .find(|c| c.r#type == ChallengeType::Dns01)
            .context("no dns01 challenge found")
            .map_err(|e| CertbotError::obtain(domains, "authorize", e))?;

        let Identifier::Dns(identifier) = &authz.identifier;
        let key_authorization = order.key_authorization(challenge);
        let record_name = challenge_record_name(identifier);

        solver
            .solver()
            .present(identifier, &challenge.token, key_authorization.as_str())
            .await?;

        let validated = validate(
            order,
            solver,
            index,
            &challenge.url,
            &record_name,
            &key_authorization.dns_value(),
        )
        .await
        .map_err(|e| CertbotError::obtain(domains, "validate challenge", e));

        if let Err(err) = solver
            .solver()
            .cleanup(identifier, &challenge.token, key_authorization.as_str())
            .await
        {
            error!("failed to clean up challenge for {identifier}: {err:#}");
        }
        validated?;
    }
    Ok(())
}

async fn validate<S: ChallengeSolver>(
    order: &mut Order,
    solver: &Dns01Solver<S>,
    index: usize,
    challenge_url: &str,
    record_name: &str,
    dns_value: &str,
) -> anyhow::Result<()> {
    solver
        .wait_for_propagation(record_name, dns_value)
        .await
        .context("failed to check dns")?;
    debug!("setting challenge ready for {challenge_url}");
    order
        .set_challenge_ready(challenge_url)
        .await
        .context("failed to set challenge ready")?;

    let deadline = Instant::now() + solver.propagation_timeout() + Duration::from_secs(60);
    loop {
        sleep(Duration::from_secs(2)).await;
        let authorizations = order
            .authorizations()
            .await
            .context("failed to refresh authorizations")?;
        let authz = authorizations
            .get(index)
            .context("authorization disappeared from order")?;
        match authz.status {
            AuthorizationStatus::Pending => {
                if Instant::now() >= deadline {
                    bail!("authorization for {record_name} still pending");
                }
                debug!("waiting for the CA to validate {record_name}");
            }
            AuthorizationStatus::Valid => {
                info!("{record_name} validated");
                return Ok(());
            }
            _ => {
                let problem = authz
                    .challenges
                    .iter()
                    .find(|c| c.r#type == ChallengeType::Dns01)
                    .and_then(|c| c.error.as_ref());
                warn!(?problem, "validation of {record_name} failed");
                bail!(
                    "authorization for {record_name} is {:?}: {problem:?}",
                    authz.status
                );
            }
        }
    }
}

fn make_csr(key: &KeyPair, names: &[String]) -> anyhow::Result<Vec<u8>> {
    let mut params =
        CertificateParams::new(names).context("failed to create certificate params")?;
    params.distinguished_name = DistinguishedName::new();
    let csr = params
        .serialize_request(key)
        .context("failed to serialize certificate request")?;
    Ok(csr.der().as_ref().to_vec())
}

async fn extract_certificate(mut order: Order) -> anyhow::Result<String> {
    let mut tries = 0;
    let cert_chain_pem = loop {
        tries += 1;
        if tries > 5 {
            bail!("failed to get certificate");
        }
        match order
            .certificate()
            .await
            .context("failed to get certificate")?
        {
            Some(cert_chain_pem) => break cert_chain_pem,
            None => sleep(Duration::from_secs(1)).await,
        }
    };
    Ok(cert_chain_pem)
}

pub(crate) fn read_pem(cert_pem: &str) -> anyhow::Result<Pem> {
    Pem::iter_from_buffer(cert_pem.as_bytes())
        .next()
        .transpose()
        .context("Invalid pem")?
        .context("no certificate in pem")
}

/// Split a full chain into the leaf certificate and the issuer chain.
pub(crate) fn split_chain(chain_pem: &str) -> anyhow::Result<(String, String)> {
    const END_MARKER: &str = "-----END CERTIFICATE-----";
    let end = chain_pem
        .find(END_MARKER)
        .context("no certificate in chain")?
        + END_MARKER.len();
    let leaf = format!("{}\n", chain_pem[..end].trim_start());
    let issuer = chain_pem[end..].trim_start().to_string();

    let pem = read_pem(&leaf)?;
    let cert = pem.parse_x509().context("Invalid x509 certificate")?;
    debug!(
        "issued certificate valid until {}",
        cert.validity().not_after.to_datetime()
    );
    Ok((leaf, issuer))
}
