use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::acme_client::IssuedCertificate;
use crate::archive::{archive_to_buffer, write_archive, ArchiveContents};
use crate::error::Result;
use crate::publisher::{ObjectStore, Publisher};

/// Certificate material produced by a renewal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateData {
    pub domain_names: Vec<String>,
    pub cert_pem: String,
    pub chain_pem: String,
    pub fullchain_pem: String,
    pub fullchain_and_key: String,
    pub priv_key: String,
    /// Location of the archive, if one was written to disk
    pub zip_dir: Option<PathBuf>,
    pub s3_download_url: Option<String>,
    /// Why publishing failed, when it did
    pub publish_error: Option<String>,
}

impl CertificateData {
    pub fn new(domain_names: &[String], issued: IssuedCertificate) -> Self {
        let fullchain_pem = format!("{}{}", issued.certificate, issued.issuer_certificate);
        let fullchain_and_key = format!("{fullchain_pem}{}", issued.private_key);
        Self {
            domain_names: domain_names.to_vec(),
            cert_pem: issued.certificate,
            chain_pem: issued.issuer_certificate,
            fullchain_pem,
            fullchain_and_key,
            priv_key: issued.private_key,
            zip_dir: None,
            s3_download_url: None,
            publish_error: None,
        }
    }

    pub fn archive_contents(&self) -> ArchiveContents<'_> {
        ArchiveContents {
            certificate: self.cert_pem.as_bytes(),
            private_key: self.priv_key.as_bytes(),
            issuer_ca: self.chain_pem.as_bytes(),
        }
    }

    /// Writes the archive to `path` and remembers its location.
    pub fn save_archive(&mut self, path: impl AsRef<Path>) -> Result<()> {
        write_archive(path.as_ref(), &self.archive_contents())?;
        self.zip_dir = Some(path.as_ref().to_path_buf());
        Ok(())
    }

    pub fn archive_buffer(&self) -> Result<Vec<u8>> {
        archive_to_buffer(&self.archive_contents())
    }

    /// Uploads the archive and records the download url.
    ///
    /// The archive on disk is uploaded when there is one, otherwise it is
    /// built in memory. Certificate fields are never touched; on a failed
    /// presign the url stays unset and the error is returned.
    pub async fn publish<O: ObjectStore>(
        &mut self,
        publisher: &Publisher<O>,
        object_name: &str,
    ) -> Result<()> {
        let published = match &self.zip_dir {
            Some(path) => publisher.publish_file(path, object_name).await?,
            None => {
                let buffer = self.archive_buffer()?;
                publisher.publish_buffer(&buffer, object_name).await?
            }
        };
        if !published.download_url.is_empty() {
            self.s3_download_url = Some(published.download_url);
        }
        match published.presign_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
