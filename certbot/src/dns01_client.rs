use anyhow::Result;
pub use cloudflare::CloudflareClient;
use enum_dispatch::enum_dispatch;
use serde::{Deserialize, Serialize};

mod cloudflare;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
/// Represents a DNS record
pub struct Record {
    /// Unique identifier for the record
    pub id: String,
    /// The name of the DNS record (e.g., "_acme-challenge.example.com")
    pub name: String,
    /// The content of the DNS record (e.g., the TXT value for ACME challenges)
    pub content: String,
    /// The type of DNS record (e.g., "TXT" for ACME challenges)
    pub r#type: String,
    #[serde(default)]
    pub ttl: u32,
    #[serde(default)]
    pub proxied: bool,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub created_on: Option<String>,
    #[serde(default)]
    pub modified_on: Option<String>,
}

/// Parameters of a record to be created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreateRecordRequest {
    pub r#type: String,
    pub name: String,
    pub content: String,
    pub ttl: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxied: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl CreateRecordRequest {
    pub fn txt(name: impl Into<String>, content: impl Into<String>, ttl: u32) -> Self {
        Self {
            r#type: "TXT".into(),
            name: name.into(),
            content: content.into(),
            ttl,
            proxied: None,
            comment: None,
        }
    }
}

/// A partial update of an existing record. Unset fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UpdateRecordRequest {
    #[serde(skip)]
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub r#type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxied: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

/// A write against a zone: either a new record or a patch of an existing one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordChange {
    Create(CreateRecordRequest),
    Update(UpdateRecordRequest),
}

#[allow(async_fn_in_trait)]
#[enum_dispatch]
pub trait Dns01Api {
    /// Looks up the provider-side zone id of a registrable domain.
    async fn resolve_zone_id(&self, root_domain: &str) -> Result<String>;

    /// Get all records in a zone.
    async fn list_records(&self, zone_id: &str) -> Result<Vec<Record>>;

    /// Creates or updates a record, returning the record as stored by the provider.
    async fn apply_record(&self, zone_id: &str, change: RecordChange) -> Result<Record>;

    /// Remove a DNS record.
    ///
    /// Deletes a DNS record using its unique identifier.
    async fn delete_record(&self, zone_id: &str, record_id: &str) -> Result<()>;

    /// Get the TXT records with exactly the given name.
    async fn list_txt_records(&self, zone_id: &str, name: &str) -> Result<Vec<Record>> {
        Ok(self
            .list_records(zone_id)
            .await?
            .into_iter()
            .filter(|r| r.r#type == "TXT" && r.name == name)
            .collect())
    }

    /// Creates a TXT DNS record with the given name and content.
    ///
    /// Returns the ID of the created record.
    async fn create_txt_record(
        &self,
        zone_id: &str,
        name: &str,
        content: &str,
        ttl: u32,
    ) -> Result<String> {
        let change = RecordChange::Create(CreateRecordRequest::txt(name, content, ttl));
        Ok(self.apply_record(zone_id, change).await?.id)
    }
}

/// A DNS-01 client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[enum_dispatch(Dns01Api)]
#[serde(rename_all = "lowercase")]
pub enum Dns01Client {
    Cloudflare(CloudflareClient),
}

impl Dns01Client {
    pub fn new_cloudflare(api_token: String) -> Self {
        Self::Cloudflare(CloudflareClient::new(api_token))
    }
}
