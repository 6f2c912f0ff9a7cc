//! Upload of certificate archives to object storage.

use std::{path::Path, time::Duration};

use anyhow::{bail, Context};
use fs_err as fs;
use s3::{creds::Credentials, Bucket, Region};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::error::{CertbotError, Result};

/// Lifetime of the presigned download urls.
pub const DOWNLOAD_URL_EXPIRY: Duration = Duration::from_secs(15 * 60);

/// Object storage operations used by the [`Publisher`].
#[allow(async_fn_in_trait)]
pub trait ObjectStore {
    async fn put_object(&self, bucket: &str, object_name: &str, data: &[u8])
        -> anyhow::Result<()>;

    async fn presigned_download_url(
        &self,
        bucket: &str,
        object_name: &str,
        expiry: Duration,
    ) -> anyhow::Result<String>;
}

/// Connection settings of an S3 compatible store (AWS, MinIO, ...).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct S3Config {
    /// Endpoint url, e.g. `https://minio.example.com`
    pub endpoint: String,
    /// Region name, `us-east-1` for MinIO
    pub region: String,
    /// Bucket the archives are uploaded to
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
}

/// [`ObjectStore`] over the `rust-s3` client, using path-style addressing.
#[derive(Debug, Clone)]
pub struct S3Store {
    region: Region,
    credentials: Credentials,
}

impl S3Store {
    pub fn new(config: &S3Config) -> Result<Self> {
        let credentials = Credentials::new(
            Some(config.access_key.as_str()),
            Some(config.secret_key.as_str()),
            None,
            None,
            None,
        )
        .context("invalid S3 credentials")
        .map_err(CertbotError::Storage)?;
        let region = Region::Custom {
            region: config.region.clone(),
            endpoint: config.endpoint.clone(),
        };
        Ok(Self {
            region,
            credentials,
        })
    }

    fn bucket(&self, name: &str) -> anyhow::Result<Box<Bucket>> {
        let bucket = Bucket::new(name, self.region.clone(), self.credentials.clone())
            .with_context(|| format!("invalid bucket {name}"))?;
        Ok(bucket.with_path_style())
    }
}

impl ObjectStore for S3Store {
    async fn put_object(
        &self,
        bucket: &str,
        object_name: &str,
        data: &[u8],
    ) -> anyhow::Result<()> {
        let response = self
            .bucket(bucket)?
            .put_object(object_name, data)
            .await
            .context("failed to put object")?;
        let status = response.status_code();
        if !(200..300).contains(&status) {
            bail!(
                "object store returned {status}: {}",
                String::from_utf8_lossy(response.as_slice())
            );
        }
        Ok(())
    }

    async fn presigned_download_url(
        &self,
        bucket: &str,
        object_name: &str,
        expiry: Duration,
    ) -> anyhow::Result<String> {
        let expiry_secs = u32::try_from(expiry.as_secs()).context("expiry too long")?;
        self.bucket(bucket)?
            .presign_get(object_name, expiry_secs, None)
            .await
            .context("failed to presign url")
    }
}

/// Outcome of a publish: the upload and the url minting fail independently.
#[derive(Debug)]
pub struct Published {
    pub object_name: String,
    /// Empty when presigning failed.
    pub download_url: String,
    pub presign_error: Option<CertbotError>,
}

/// Uploads archives into a default bucket.
#[derive(Debug)]
pub struct Publisher<O> {
    store: O,
    bucket: String,
    expiry: Duration,
}

impl<O: ObjectStore> Publisher<O> {
    pub fn new(store: O, bucket: impl Into<String>) -> Self {
        Self {
            store,
            bucket: bucket.into(),
            expiry: DOWNLOAD_URL_EXPIRY,
        }
    }

    /// Uploads the archive at `path` as `object_name`.
    pub async fn publish_file(&self, path: impl AsRef<Path>, object_name: &str) -> Result<Published> {
        let path = path.as_ref();
        let data = fs::read(path)
            .map_err(anyhow::Error::from)
            .map_err(|source| CertbotError::PublishUpload {
                bucket: self.bucket.clone(),
                object_name: object_name.to_string(),
                source,
            })?;
        self.publish_buffer(&data, object_name).await
    }

    /// Uploads `data` as `object_name`, then mints a download url for it.
    ///
    /// Only a failed upload is an `Err`. A failed presign is reported in
    /// [`Published::presign_error`] and leaves the upload in place.
    pub async fn publish_buffer(&self, data: &[u8], object_name: &str) -> Result<Published> {
        if let Err(source) = self.store.put_object(&self.bucket, object_name, data).await {
            error!(bucket = %self.bucket, object_name, "failed to upload archive: {source:#}");
            return Err(CertbotError::PublishUpload {
                bucket: self.bucket.clone(),
                object_name: object_name.to_string(),
                source,
            });
        }
        info!(bucket = %self.bucket, object_name, "uploaded archive");

        let (download_url, presign_error) = match self
            .store
            .presigned_download_url(&self.bucket, object_name, self.expiry)
            .await
        {
            Ok(url) => (url, None),
            Err(source) => {
                error!(bucket = %self.bucket, object_name, "failed to presign download url: {source:#}");
                let err = CertbotError::Presign {
                    bucket: self.bucket.clone(),
                    object_name: object_name.to_string(),
                    source,
                };
                (String::new(), Some(err))
            }
        };
        Ok(Published {
            object_name: object_name.to_string(),
            download_url,
            presign_error,
        })
    }
}

#[cfg(test)]
mod tests;
