use anyhow::{Context, Result};
use reqwest::{Client, RequestBuilder, Response};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::debug;

use crate::dns01_client::Record;

use super::{Dns01Api, RecordChange};

const CLOUDFLARE_API_URL: &str = "https://api.cloudflare.com/client/v4";
const PAGE_SIZE: u32 = 100;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudflareClient {
    api_token: String,
}

#[derive(Deserialize)]
struct CloudflareResponse<T> {
    result: T,
    #[serde(default)]
    result_info: Option<ResultInfo>,
}

#[derive(Deserialize)]
struct ResultInfo {
    #[serde(default)]
    total_pages: u32,
}

impl CloudflareClient {
    pub fn new(api_token: String) -> Self {
        Self { api_token }
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request.header("Authorization", format!("Bearer {}", self.api_token))
    }

    async fn parse<T: DeserializeOwned>(
        response: Response,
        action: &str,
    ) -> Result<CloudflareResponse<T>> {
        if !response.status().is_success() {
            anyhow::bail!("failed to {action}: {}", response.text().await?);
        }
        response.json().await.context("failed to parse response")
    }

    async fn list_records_page(
        &self,
        zone_id: &str,
        query: &[(&str, &str)],
        page: u32,
    ) -> Result<CloudflareResponse<Vec<Record>>> {
        let url = format!("{CLOUDFLARE_API_URL}/zones/{zone_id}/dns_records");
        let page = page.to_string();
        let per_page = PAGE_SIZE.to_string();
        let response = self
            .authorized(Client::new().get(&url))
            .query(query)
            .query(&[("page", page.as_str()), ("per_page", per_page.as_str())])
            .send()
            .await?;
        Self::parse(response, "get dns records").await
    }

    async fn list_records_matching(
        &self,
        zone_id: &str,
        query: &[(&str, &str)],
    ) -> Result<Vec<Record>> {
        let mut records = Vec::new();
        let mut page = 1;
        loop {
            let response = self.list_records_page(zone_id, query, page).await?;
            records.extend(response.result);
            let total_pages = response.result_info.map_or(1, |info| info.total_pages);
            if page >= total_pages {
                break;
            }
            page += 1;
        }
        Ok(records)
    }
}

impl Dns01Api for CloudflareClient {
    async fn resolve_zone_id(&self, root_domain: &str) -> Result<String> {
        #[derive(Deserialize)]
        struct Zone {
            id: String,
            name: String,
        }

        let url = format!("{CLOUDFLARE_API_URL}/zones");
        let response = self
            .authorized(Client::new().get(&url))
            .query(&[("name", root_domain)])
            .send()
            .await?;
        let response: CloudflareResponse<Vec<Zone>> = Self::parse(response, "look up zone").await?;
        let zone = response
            .result
            .into_iter()
            .find(|zone| zone.name == root_domain)
            .with_context(|| format!("no zone named {root_domain}"))?;
        debug!(zone_id = %zone.id, "resolved zone for {root_domain}");
        Ok(zone.id)
    }

    async fn list_records(&self, zone_id: &str) -> Result<Vec<Record>> {
        self.list_records_matching(zone_id, &[]).await
    }

    async fn list_txt_records(&self, zone_id: &str, name: &str) -> Result<Vec<Record>> {
        Ok(self
            .list_records_matching(zone_id, &[("type", "TXT"), ("name", name)])
            .await?
            .into_iter()
            .filter(|r| r.r#type == "TXT" && r.name == name)
            .collect())
    }

    async fn apply_record(&self, zone_id: &str, change: RecordChange) -> Result<Record> {
        let client = Client::new();
        let request = match &change {
            RecordChange::Create(params) => {
                let url = format!("{CLOUDFLARE_API_URL}/zones/{zone_id}/dns_records");
                client.post(&url).json(params)
            }
            RecordChange::Update(params) => {
                let url = format!(
                    "{CLOUDFLARE_API_URL}/zones/{zone_id}/dns_records/{}",
                    params.id
                );
                client.patch(&url).json(params)
            }
        };
        let response = self
            .authorized(request)
            .header("Content-Type", "application/json")
            .send()
            .await?;
        let action = match change {
            RecordChange::Create(_) => "create dns record",
            RecordChange::Update(_) => "update dns record",
        };
        let response: CloudflareResponse<Record> = Self::parse(response, action).await?;
        Ok(response.result)
    }

    async fn delete_record(&self, zone_id: &str, record_id: &str) -> Result<()> {
        let url = format!("{CLOUDFLARE_API_URL}/zones/{zone_id}/dns_records/{record_id}");
        let response = self.authorized(Client::new().delete(&url)).send().await?;

        if !response.status().is_success() {
            anyhow::bail!("failed to remove dns record: {}", response.text().await?);
        }

        Ok(())
    }
}
