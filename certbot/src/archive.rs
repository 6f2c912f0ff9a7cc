//! Zip bundle of issued certificate material.

use std::{
    collections::BTreeMap,
    io::{Cursor, Read, Seek, Write},
    path::Path,
};

use anyhow::Context;
use fs_err as fs;
use tracing::debug;
use zip::{write::SimpleFileOptions, CompressionMethod, DateTime, ZipArchive, ZipWriter};

use crate::error::{CertbotError, Result};

pub const CERTIFICATE_ENTRY: &str = "certificate.pem";
pub const PRIVATE_KEY_ENTRY: &str = "private_key.pem";
pub const ISSUER_CA_ENTRY: &str = "issuer_ca.pem";

/// The three files that make up a certificate bundle.
#[derive(Debug, Clone, Copy)]
pub struct ArchiveContents<'a> {
    pub certificate: &'a [u8],
    pub private_key: &'a [u8],
    pub issuer_ca: &'a [u8],
}

impl ArchiveContents<'_> {
    fn entries(&self) -> [(&'static str, &[u8]); 3] {
        [
            (CERTIFICATE_ENTRY, self.certificate),
            (PRIVATE_KEY_ENTRY, self.private_key),
            (ISSUER_CA_ENTRY, self.issuer_ca),
        ]
    }
}

// Fixed timestamps keep the output byte-for-byte reproducible.
fn entry_options() -> SimpleFileOptions {
    SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(DateTime::default())
        .unix_permissions(0o600)
}

fn write_entries<W: Write + Seek>(writer: W, contents: &ArchiveContents) -> anyhow::Result<W> {
    let mut zip = ZipWriter::new(writer);
    for (name, content) in contents.entries() {
        zip.start_file(name, entry_options())
            .with_context(|| format!("failed to create zip entry {name}"))?;
        zip.write_all(content)
            .with_context(|| format!("failed to write zip entry {name}"))?;
    }
    zip.finish().context("failed to close zip writer")
}

/// Writes the bundle to `path`, creating parent directories as needed.
pub fn write_archive(path: impl AsRef<Path>, contents: &ArchiveContents) -> Result<()> {
    let path = path.as_ref();
    let result = (|| {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file = fs::File::create(path)?;
        write_entries(file, contents)?;
        anyhow::Ok(())
    })();
    result.map_err(|source| CertbotError::Archive {
        location: path.display().to_string(),
        source,
    })?;
    debug!("wrote certificate archive to {}", path.display());
    Ok(())
}

/// Builds the bundle in memory.
pub fn archive_to_buffer(contents: &ArchiveContents) -> Result<Vec<u8>> {
    write_entries(Cursor::new(Vec::new()), contents)
        .map(Cursor::into_inner)
        .map_err(|source| CertbotError::Archive {
            location: "<memory>".into(),
            source,
        })
}

/// Unpacks an archive into a map of entry name to content.
pub fn read_archive(bytes: &[u8]) -> anyhow::Result<BTreeMap<String, Vec<u8>>> {
    let mut archive = ZipArchive::new(Cursor::new(bytes)).context("invalid zip archive")?;
    let mut entries = BTreeMap::new();
    for index in 0..archive.len() {
        let mut file = archive.by_index(index)?;
        let mut content = Vec::new();
        file.read_to_end(&mut content)?;
        entries.insert(file.name().to_string(), content);
    }
    Ok(entries)
}
