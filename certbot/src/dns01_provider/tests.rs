use super::*;
use crate::testing::MemoryDns;

fn provider() -> (MemoryDns, DnsChallengeProvider<MemoryDns>) {
    let dns = MemoryDns::with_zone("example.com", "zone-1");
    (dns.clone(), DnsChallengeProvider::new(dns))
}

#[test]
fn root_domain_keeps_last_two_labels() {
    assert_eq!(root_domain("*.sub.example.com"), "example.com");
    assert_eq!(root_domain("a.b.example.com."), "example.com");
    assert_eq!(root_domain("example.com"), "example.com");
    assert_eq!(root_domain("localhost"), "localhost");
    assert_eq!(root_domain("foo.co.uk"), "co.uk");
}

#[test]
fn challenge_names_and_values() {
    assert_eq!(
        challenge_record_name("*.example.com"),
        "_acme-challenge.example.com"
    );
    assert_eq!(
        challenge_record_name("www.example.com."),
        "_acme-challenge.www.example.com"
    );
    let value = challenge_value("token.thumbprint");
    assert_eq!(value.len(), 43);
    assert!(!value.contains('='));
    assert_eq!(value, challenge_value("token.thumbprint"));
    assert_ne!(value, challenge_value("token.other"));
}

#[tokio::test]
async fn present_then_cleanup_leaves_no_record() {
    let (dns, provider) = provider();

    provider.present("example.com", "key-auth").await.unwrap();
    let records = dns.txt_records("_acme-challenge.example.com");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].content, challenge_value("key-auth"));
    assert_eq!(records[0].ttl, CHALLENGE_TTL);

    let state = provider.challenge_state("example.com").await;
    assert!(state.created);
    assert_eq!(state.zone_id.as_deref(), Some("zone-1"));
    assert_eq!(state.record_id.as_deref(), Some(records[0].id.as_str()));

    provider.cleanup("example.com").await.unwrap();
    assert!(dns.txt_records("_acme-challenge.example.com").is_empty());
    assert!(provider.challenge_state("example.com").await.is_idle());
}

#[tokio::test]
async fn second_present_is_a_conflict() {
    let (dns, provider) = provider();

    provider.present("example.com", "first").await.unwrap();
    let err = provider.present("example.com", "second").await.unwrap_err();
    match err {
        CertbotError::RecordConflict {
            record_name,
            zone_id,
            existing_ids,
            ..
        } => {
            assert_eq!(record_name, "_acme-challenge.example.com");
            assert_eq!(zone_id, "zone-1");
            assert_eq!(existing_ids.len(), 1);
        }
        other => panic!("unexpected error: {other:?}"),
    }
    let records = dns.txt_records("_acme-challenge.example.com");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].content, challenge_value("first"));
}

#[tokio::test]
async fn foreign_record_is_never_overwritten() {
    let (dns, provider) = provider();
    dns.insert_txt("zone-1", "_acme-challenge.example.com", "someone else");

    let err = provider.present("*.example.com", "key-auth").await.unwrap_err();
    assert!(matches!(err, CertbotError::RecordConflict { .. }));
    let records = dns.txt_records("_acme-challenge.example.com");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].content, "someone else");
    assert!(provider.challenge_state("*.example.com").await.is_idle());
}

#[tokio::test]
async fn cleanup_without_present_is_rejected() {
    let (_dns, provider) = provider();
    let err = provider.cleanup("example.com").await.unwrap_err();
    assert!(matches!(err, CertbotError::CleanupNotReady { domain } if domain == "example.com"));
}

#[tokio::test]
async fn unknown_zone_fails_resolution() {
    let provider = DnsChallengeProvider::new(MemoryDns::default());
    let err = provider.present("www.example.org", "key-auth").await.unwrap_err();
    match err {
        CertbotError::ZoneResolution {
            domain,
            root_domain,
            ..
        } => {
            assert_eq!(domain, "www.example.org");
            assert_eq!(root_domain, "example.org");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn failed_create_keeps_state_idle() {
    let (dns, provider) = provider();
    dns.set_fail_create(true);

    let err = provider.present("example.com", "key-auth").await.unwrap_err();
    assert!(matches!(err, CertbotError::RecordCreate { .. }));
    assert!(provider.challenge_state("example.com").await.is_idle());
}

#[tokio::test]
async fn zone_is_resolved_once_per_root() {
    let (dns, provider) = provider();

    provider.present("a.example.com", "a").await.unwrap();
    provider.present("b.example.com", "b").await.unwrap();
    provider.cleanup("a.example.com").await.unwrap();
    provider.cleanup("b.example.com").await.unwrap();

    assert_eq!(dns.zone_lookups(), 1);
    assert_eq!(
        provider.zones().cached("example.com").await.as_deref(),
        Some("zone-1")
    );
}

#[tokio::test]
async fn failed_delete_can_be_retried() {
    let (dns, provider) = provider();
    provider.present("example.com", "key-auth").await.unwrap();

    dns.set_fail_delete(true);
    let err = provider.cleanup("example.com").await.unwrap_err();
    assert!(matches!(err, CertbotError::RecordDelete { .. }));
    let state = provider.challenge_state("example.com").await;
    assert!(state.created);
    assert!(state.record_id.is_some());

    dns.set_fail_delete(false);
    provider.cleanup("example.com").await.unwrap();
    assert!(provider.challenge_state("example.com").await.is_idle());
    assert!(dns.txt_records("_acme-challenge.example.com").is_empty());
}

#[tokio::test]
async fn domains_are_tracked_independently() {
    let (dns, provider) = provider();
    dns.add_zone("example.net", "zone-2");

    let (a, b) = tokio::join!(
        provider.present("www.example.com", "a"),
        provider.present("www.example.net", "b"),
    );
    a.unwrap();
    b.unwrap();

    provider.cleanup("www.example.com").await.unwrap();
    assert!(provider.challenge_state("www.example.com").await.is_idle());
    let other = provider.challenge_state("www.example.net").await;
    assert!(other.created);
    assert_eq!(other.zone_id.as_deref(), Some("zone-2"));
    assert_eq!(dns.txt_records("_acme-challenge.www.example.net").len(), 1);
}

#[tokio::test]
async fn concurrent_lookups_share_one_zone_request() {
    let (dns, provider) = provider();

    let (a, b) = tokio::join!(
        provider.present("a.example.com", "a"),
        provider.present("b.example.com", "b"),
    );
    a.unwrap();
    b.unwrap();
    assert_eq!(dns.zone_lookups(), 1);
}

#[tokio::test]
async fn failed_zone_lookup_is_retried() {
    let dns = MemoryDns::default();
    let provider = DnsChallengeProvider::new(dns.clone());

    let err = provider.present("example.com", "key-auth").await.unwrap_err();
    assert!(matches!(err, CertbotError::ZoneResolution { .. }));
    assert!(provider.zones().cached("example.com").await.is_none());

    dns.add_zone("example.com", "zone-1");
    provider.present("example.com", "key-auth").await.unwrap();
    assert_eq!(dns.zone_lookups(), 2);
}

#[tokio::test]
async fn concurrent_presents_on_one_name_conflict() {
    let (dns, provider) = provider();

    let (a, b) = tokio::join!(
        provider.present("example.com", "a"),
        provider.present("*.example.com", "b"),
    );
    let results = [a, b];
    let created = results.iter().filter(|r| r.is_ok()).count();
    let conflicts = results
        .iter()
        .filter(|r| matches!(r, Err(CertbotError::RecordConflict { .. })))
        .count();
    assert_eq!(created, 1);
    assert_eq!(conflicts, 1);
    assert_eq!(dns.txt_records("_acme-challenge.example.com").len(), 1);
}

#[tokio::test]
async fn concurrent_cleanups_delete_once() {
    let (dns, provider) = provider();
    provider.present("example.com", "key-auth").await.unwrap();

    let (a, b) = tokio::join!(
        provider.cleanup("example.com"),
        provider.cleanup("example.com"),
    );
    let results = [a, b];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert_eq!(
        results
            .iter()
            .filter(|r| matches!(r, Err(CertbotError::CleanupNotReady { .. })))
            .count(),
        1
    );
    assert!(dns.txt_records("_acme-challenge.example.com").is_empty());
    assert!(provider.challenge_state("example.com").await.is_idle());
}
