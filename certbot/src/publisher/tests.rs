use super::*;
use crate::testing::MemoryStore;

#[tokio::test]
async fn publish_uploads_and_presigns() {
    let store = MemoryStore::default();
    let publisher = Publisher::new(store.clone(), "certs");

    let published = publisher
        .publish_buffer(b"archive", "example.com.zip")
        .await
        .unwrap();
    assert_eq!(published.object_name, "example.com.zip");
    assert_eq!(
        published.download_url,
        "https://storage.test/certs/example.com.zip?X-Amz-Expires=900"
    );
    assert!(published.presign_error.is_none());
    assert_eq!(
        store.object("certs", "example.com.zip").as_deref(),
        Some(&b"archive"[..])
    );
}

#[tokio::test]
async fn failed_upload_is_an_error() {
    let publisher = Publisher::new(MemoryStore::failing_put(), "certs");
    let err = publisher
        .publish_buffer(b"archive", "example.com.zip")
        .await
        .unwrap_err();
    match err {
        CertbotError::PublishUpload {
            bucket,
            object_name,
            ..
        } => {
            assert_eq!(bucket, "certs");
            assert_eq!(object_name, "example.com.zip");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn failed_presign_keeps_the_upload() {
    let store = MemoryStore::failing_presign();
    let publisher = Publisher::new(store.clone(), "certs");

    let published = publisher
        .publish_buffer(b"archive", "example.com.zip")
        .await
        .unwrap();
    assert!(published.download_url.is_empty());
    assert!(matches!(
        published.presign_error,
        Some(CertbotError::Presign { .. })
    ));
    assert!(store.object("certs", "example.com.zip").is_some());
}

#[tokio::test]
async fn publish_file_reads_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bundle.zip");
    fs::write(&path, b"from disk").unwrap();

    let store = MemoryStore::default();
    let publisher = Publisher::new(store.clone(), "certs");
    publisher.publish_file(&path, "bundle.zip").await.unwrap();
    assert_eq!(
        store.object("certs", "bundle.zip").as_deref(),
        Some(&b"from disk"[..])
    );

    let err = publisher
        .publish_file(dir.path().join("missing.zip"), "missing.zip")
        .await
        .unwrap_err();
    assert!(matches!(err, CertbotError::PublishUpload { .. }));
}

#[test]
fn s3_store_accepts_custom_endpoint() {
    let store = S3Store::new(&S3Config {
        endpoint: "http://127.0.0.1:9000".into(),
        region: "us-east-1".into(),
        bucket: "certs".into(),
        access_key: "minio".into(),
        secret_key: "minio123".into(),
    });
    assert!(store.is_ok());
}
