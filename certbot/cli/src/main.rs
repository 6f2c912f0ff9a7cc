use std::{path::PathBuf, time::Duration};

use anyhow::{Context, Result};
use cf_certbot::{
    root_domain, CertBot, CertificateRenewalRequest, Dns01Api, Dns01Client, Publisher,
    RecordChange, S3Config, S3Store, UpdateRecordRequest,
};
use clap::{Parser, Subcommand};
use documented::DocumentedFields;
use fs_err as fs;
use serde::{Deserialize, Serialize};
use toml_edit::ser::to_document;
use tracing::info;

const CF_TOKEN_ENV: &str = "CLOUDFLARE_DNS_API_TOKEN";
const S3_ACCESS_KEY_ENV: &str = "S3_ACCESS_KEY";
const S3_SECRET_KEY_ENV: &str = "S3_SECRET_KEY";

#[derive(Parser)]
enum Command {
    /// Request a certificate and package it
    Renew {
        /// Path to the configuration file
        #[arg(short, long, default_value = "certbot.toml")]
        config: PathBuf,
    },
    /// Inspect and edit DNS records of a Cloudflare zone
    Dns {
        /// Path to the configuration file
        #[arg(short, long, default_value = "certbot.toml")]
        config: PathBuf,
        #[command(subcommand)]
        command: DnsCommand,
    },
    /// Generate configuration template
    Cfg {
        /// Write to file
        #[arg(short, long)]
        write_to: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum DnsCommand {
    /// Print the zone id of a domain
    Zone { domain: String },
    /// List the records in the zone of a domain
    List { domain: String },
    /// Update an existing record
    Update {
        /// Any domain in the zone
        domain: String,
        /// Id of the record to update
        record_id: String,
        /// New content
        #[arg(long)]
        content: Option<String>,
        /// New record name
        #[arg(long)]
        name: Option<String>,
        /// New record type
        #[arg(long = "type")]
        r#type: Option<String>,
        /// New TTL in seconds
        #[arg(long)]
        ttl: Option<u32>,
        /// Whether the record is proxied
        #[arg(long)]
        proxied: Option<bool>,
        /// New comment
        #[arg(long)]
        comment: Option<String>,
    },
    /// Delete a record
    Delete {
        /// Any domain in the zone
        domain: String,
        /// Id of the record to delete
        record_id: String,
    },
}

#[derive(Parser)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Deserialize, Serialize, DocumentedFields)]
#[serde(default)]
struct Config {
    /// ACME directory URL
    acme_url: String,
    /// Email registered with the ACME account
    acme_email: String,
    /// Cloudflare API token. Falls back to $CLOUDFLARE_DNS_API_TOKEN when empty
    cf_api_token: String,
    /// Domains to issue the certificate for. Wildcards are allowed
    domains: Vec<String>,
    /// Write the certificate archive to disk
    save_zip: bool,
    /// Path of the archive. Empty for `<object name>` in the working directory
    zip_path: String,
    /// Upload the certificate archive to S3
    push_s3: bool,
    /// Object name of the archive. Empty for `<domain>-<timestamp>.zip`
    object_name: String,
    /// S3 endpoint URL
    s3_endpoint: String,
    /// S3 region
    s3_region: String,
    /// S3 bucket
    s3_bucket: String,
    /// S3 access key. Falls back to $S3_ACCESS_KEY when empty
    s3_access_key: String,
    /// S3 secret key. Falls back to $S3_SECRET_KEY when empty
    s3_secret_key: String,
    /// Recursive nameservers used to check the challenge record
    recursive_nameservers: Vec<String>,
    /// Maximum time in seconds to wait for the challenge record to propagate
    propagation_timeout: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            acme_url: "https://acme-staging-v02.api.letsencrypt.org/directory".into(),
            acme_email: "admin@example.com".into(),
            cf_api_token: "".into(),
            domains: vec!["example.com".into(), "*.example.com".into()],
            save_zip: true,
            zip_path: "".into(),
            push_s3: false,
            object_name: "".into(),
            s3_endpoint: "".into(),
            s3_region: "us-east-1".into(),
            s3_bucket: "".into(),
            s3_access_key: "".into(),
            s3_secret_key: "".into(),
            recursive_nameservers: cf_certbot::DEFAULT_NAMESERVERS
                .iter()
                .map(|ns| ns.to_string())
                .collect(),
            propagation_timeout: cf_certbot::DEFAULT_PROPAGATION_TIMEOUT.as_secs(),
        }
    }
}

fn or_env(value: String, var: &str) -> String {
    if !value.is_empty() {
        return value;
    }
    std::env::var(var).unwrap_or_default()
}

fn non_empty(value: String) -> Option<String> {
    (!value.is_empty()).then_some(value)
}

impl Config {
    fn load(path: &PathBuf) -> Result<Self> {
        let config: Self = toml_edit::de::from_str(&fs::read_to_string(path)?)?;
        Ok(config.with_env())
    }

    fn with_env(mut self) -> Self {
        self.cf_api_token = or_env(self.cf_api_token, CF_TOKEN_ENV);
        self.s3_access_key = or_env(self.s3_access_key, S3_ACCESS_KEY_ENV);
        self.s3_secret_key = or_env(self.s3_secret_key, S3_SECRET_KEY_ENV);
        self
    }

    fn dns01_client(&self) -> Result<Dns01Client> {
        if self.cf_api_token.is_empty() {
            anyhow::bail!("no Cloudflare API token, set cf_api_token or ${CF_TOKEN_ENV}");
        }
        Ok(Dns01Client::new_cloudflare(self.cf_api_token.clone()))
    }

    fn s3_config(&self) -> S3Config {
        S3Config {
            endpoint: self.s3_endpoint.clone(),
            region: self.s3_region.clone(),
            bucket: self.s3_bucket.clone(),
            access_key: self.s3_access_key.clone(),
            secret_key: self.s3_secret_key.clone(),
        }
    }

    fn renewal_request(&self) -> CertificateRenewalRequest {
        CertificateRenewalRequest::builder()
            .domain_names(self.domains.clone())
            .acme_email(self.acme_email.clone())
            .acme_url(self.acme_url.clone())
            .save_zip(self.save_zip)
            .maybe_zip_path(non_empty(self.zip_path.clone()).map(PathBuf::from))
            .push_s3(self.push_s3)
            .maybe_object_name(non_empty(self.object_name.clone()))
            .recursive_nameservers(self.recursive_nameservers.clone())
            .propagation_timeout(Duration::from_secs(self.propagation_timeout))
            .build()
    }

    fn to_commented_toml(&self) -> Result<String> {
        let mut doc = to_document(self)?;

        for (i, (mut key, _value)) in doc.iter_mut().enumerate() {
            let decor = key.leaf_decor_mut();
            let docstring = Self::FIELD_DOCS[i];

            let mut comment = String::new();
            for line in docstring.lines() {
                let line = if line.is_empty() {
                    String::from("#\n")
                } else {
                    format!("# {line}\n")
                };
                comment.push_str(&line);
            }
            decor.set_prefix(comment);
        }
        Ok(doc.to_string())
    }
}

async fn renew(config: &PathBuf) -> Result<()> {
    let config = Config::load(config).context("Failed to load configuration")?;
    let mut bot = CertBot::new(config.dns01_client()?);
    if config.push_s3 {
        let store = S3Store::new(&config.s3_config()).context("Failed to configure S3")?;
        bot = bot.with_publisher(Publisher::new(store, config.s3_bucket.clone()));
    }
    let cert = bot
        .renew(&config.renewal_request())
        .await
        .context("Failed to renew certificate")?;
    if let Some(zip_dir) = &cert.zip_dir {
        info!("certificate archive written to {}", zip_dir.display());
    }
    println!("{}", serde_json::to_string_pretty(&cert)?);
    Ok(())
}

async fn zone_of(client: &Dns01Client, domain: &str) -> Result<String> {
    let root = root_domain(domain);
    client
        .resolve_zone_id(root)
        .await
        .with_context(|| format!("Failed to resolve zone of {root}"))
}

async fn dns(config: &PathBuf, command: DnsCommand) -> Result<()> {
    let config = Config::load(config).context("Failed to load configuration")?;
    let client = config.dns01_client()?;
    match command {
        DnsCommand::Zone { domain } => {
            println!("{}", zone_of(&client, &domain).await?);
        }
        DnsCommand::List { domain } => {
            let zone_id = zone_of(&client, &domain).await?;
            let records = client
                .list_records(&zone_id)
                .await
                .context("Failed to list records")?;
            println!("{:<34} {:<6} {:<40} {:>6} CONTENT", "ID", "TYPE", "NAME", "TTL");
            for record in records {
                println!(
                    "{:<34} {:<6} {:<40} {:>6} {}",
                    record.id, record.r#type, record.name, record.ttl, record.content
                );
            }
        }
        DnsCommand::Update {
            domain,
            record_id,
            content,
            name,
            r#type,
            ttl,
            proxied,
            comment,
        } => {
            let zone_id = zone_of(&client, &domain).await?;
            let change = RecordChange::Update(UpdateRecordRequest {
                id: record_id,
                r#type,
                name,
                content,
                ttl,
                proxied,
                comment,
            });
            let record = client
                .apply_record(&zone_id, change)
                .await
                .context("Failed to update record")?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        DnsCommand::Delete { domain, record_id } => {
            let zone_id = zone_of(&client, &domain).await?;
            client
                .delete_record(&zone_id, &record_id)
                .await
                .context("Failed to delete record")?;
            info!("deleted record {record_id} from zone {zone_id}");
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    {
        use tracing_subscriber::{fmt, EnvFilter};
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
    }
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install default crypto provider"))?;

    let args = Args::parse();
    match args.command {
        Command::Renew { config } => {
            renew(&config).await?;
        }
        Command::Dns { config, command } => {
            dns(&config, command).await?;
        }
        Command::Cfg { write_to } => {
            let toml_str = Config::default().to_commented_toml()?;
            match write_to {
                Some(path) => fs::write(path, toml_str)?,
                None => println!("{}", toml_str),
            }
        }
    }
    Ok(())
}
