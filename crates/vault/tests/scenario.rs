//! End-to-end behaviour of the vault over in-memory stores.

use std::sync::Arc;

use common::certificate::{DeletionMethod, VerificationStatus};
use common::protocol::{Combine, MatchMode, QueryField, ShredScope};
use common::record::FieldType;
use common::VaultError;
use tokio_util::sync::CancellationToken;
use vault::audit::MemoryAuditStore;
use vault::config::Secret;
use vault::shred::DeletionRequest;
use vault::store::MemoryRecordStore;
use vault::{Config, Context, Vault};

fn config(install_id: &str) -> Config {
    Config {
        master_secret: Secret::new("correct horse battery staple, twice over"),
        install_id: install_id.into(),
        active_key_version: 1,
        kdf_time_cost: 1,
        kdf_memory_kib: 64,
        search_hash_iterations: 10,
        default_country_code: "1".into(),
        max_search_tokens: 64,
        partial_search_fields: "first_name,last_name,email".into(),
        cache_ttl_secs: 300,
        cache_capacity: 64,
        cache_purge_interval_secs: 60,
        subject_key_cache_capacity: 64,
        subject_key_cache_ttl_secs: 300,
        key_retention: 3,
        key_rotation_interval_secs: None,
        overwrite_passes: 3,
        overwrite_tombstone: true,
        verification_sample_rate: 1.0,
        certificate_validity_days: 2557,
        audit_signing_secret: Some(Secret::new("audit-signing-secret")),
        certificate_signing_secret: None,
        listen_port: 8443,
        tls_cert_path: None,
        tls_key_path: None,
        otel_exporter_otlp_endpoint: None,
        log_level: "info".into(),
    }
}

#[tokio::test]
async fn jane_doe_lifecycle() {
    let vault = Vault::from_config(&config("install-a")).unwrap();
    let ctx = Context::new("acme");
    let system = Context::system(ctx.correlation_id);

    // Version 1: first name.
    let jane = vault
        .protect_field(&ctx, "cust-42", "first_name", FieldType::FirstName, "Jane")
        .await
        .unwrap();
    assert_eq!(jane.record.key_version(), 1);
    let plain = vault.reveal_field(&ctx, "cust-42", &jane.record).await.unwrap();
    assert_eq!(plain.as_str(), "Jane");

    // The stored hash matches a case-insensitive query computed independently.
    let query_hash = vault
        .search_index()
        .exact_hash(FieldType::FirstName, "jane")
        .unwrap();
    assert_eq!(jane.search.exact, query_hash);
    let hits = vault
        .search(
            &ctx,
            vec![QueryField {
                field_type: FieldType::FirstName,
                value: "JANE".into(),
                mode: MatchMode::Exact,
            }],
            None,
            Combine::All,
        )
        .await
        .unwrap();
    assert_eq!(hits, vec!["cust-42".to_owned()]);

    // Version 2: last name.
    assert_eq!(vault.rotate_keys(&ctx).await.unwrap(), 2);
    let doe = vault
        .protect_field(&ctx, "cust-42", "last_name", FieldType::LastName, "Doe")
        .await
        .unwrap();
    assert_eq!(doe.record.key_version(), 2);

    // The version 1 record still opens after rotation, even from a cold cache.
    vault.clear_cache(&system).await.unwrap();
    let plain = vault.reveal_field(&ctx, "cust-42", &jane.record).await.unwrap();
    assert_eq!(plain.as_str(), "Jane");

    // Shred the customer; both retained records are now unreadable.
    let outcome = vault
        .delete_subjects(
            &ctx,
            DeletionRequest::new(vec!["cust-42".into()], DeletionMethod::CryptoShred),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(outcome.certificate.verification, VerificationStatus::Verified);
    assert!(vault.certificate_signer().verify(&outcome.certificate));

    for record in [&jane.record, &doe.record] {
        let err = vault.reveal_field(&ctx, "cust-42", record).await.unwrap_err();
        assert!(
            matches!(err, VaultError::KeyUnavailable(_) | VaultError::DecryptionFailed),
            "unexpected error: {err}"
        );
    }

    let report = vault.verify_audit_chain(&ctx, None, None).await.unwrap();
    assert!(report.verified);
    assert!(report.unchecked_signatures.is_empty());
}

#[tokio::test]
async fn hashes_are_stable_across_instances_of_one_install() {
    let a = Vault::from_config(&config("install-a")).unwrap();
    let b = Vault::from_config(&config("install-a")).unwrap();
    let other = Vault::from_config(&config("install-b")).unwrap();

    let hash = |v: &Vault, value: &str| {
        v.search_index()
            .exact_hash(FieldType::Email, value)
            .unwrap()
    };
    assert_eq!(hash(&a, "Jane@Example.com"), hash(&b, " jane@example.com "));
    assert_ne!(hash(&a, "jane@example.com"), hash(&a, "john@example.com"));
    assert_ne!(hash(&a, "jane@example.com"), hash(&other, "jane@example.com"));
}

#[tokio::test]
async fn restart_reads_data_from_before_the_restart() {
    let store = Arc::new(MemoryRecordStore::new());
    let audit = Arc::new(MemoryAuditStore::new());
    let ctx = Context::new("acme");

    let before = Vault::with_stores(&config("install-a"), store.clone(), audit.clone()).unwrap();
    before.rotate_keys(&ctx).await.unwrap();
    let field = before
        .protect_field(&ctx, "cust-1", "email", FieldType::Email, "jane@example.com")
        .await
        .unwrap();
    assert_eq!(field.record.key_version(), 2);

    // Same configuration as before: the rotated version is remembered.
    let after = Vault::with_stores(&config("install-a"), store, audit).unwrap();
    assert_eq!(after.current_key_version("acme").await.unwrap(), 2);
    let plain = after.reveal_stored(&ctx, "cust-1", "email").await.unwrap();
    assert_eq!(plain.as_str(), "jane@example.com");
    let next = after
        .protect_field(&ctx, "cust-2", "email", FieldType::Email, "john@example.com")
        .await
        .unwrap();
    assert_eq!(next.record.key_version(), 2);

    // The chain continues where the first process left off.
    let report = after.verify_audit_chain(&ctx, None, None).await.unwrap();
    assert!(report.verified);
}

#[tokio::test]
async fn tampering_with_a_stored_event_is_detected() {
    let audit = Arc::new(MemoryAuditStore::new());
    let vault = Vault::with_stores(
        &config("install-a"),
        Arc::new(MemoryRecordStore::new()),
        audit.clone(),
    )
    .unwrap();
    let ctx = Context::new("acme");
    for i in 0..4 {
        vault
            .protect_field(&ctx, &format!("cust-{i}"), "email", FieldType::Email, "a@b.co")
            .await
            .unwrap();
    }

    assert!(audit.rewrite_row("acme", 1, |e| e.description = "nothing to see".into()));

    let report = vault.verify_audit_chain(&ctx, None, None).await.unwrap();
    assert!(!report.verified);
    assert_eq!(report.corrupt_events, vec![1]);
    assert_eq!(report.broken_links.len(), 1);
    assert_eq!(report.broken_links[0].sequence, 2);

    let err = vault::audit::ensure_intact(&report).unwrap_err();
    assert!(matches!(err, VaultError::ChainIntegrityViolation { .. }));
}

#[tokio::test]
async fn key_version_shred_spares_nothing_under_that_version() {
    let vault = Vault::from_config(&config("install-a")).unwrap();
    let ctx = Context::new("acme");
    let a = vault
        .protect_field(&ctx, "cust-1", "email", FieldType::Email, "a@example.com")
        .await
        .unwrap();
    let b = vault
        .protect_field(&ctx, "cust-2", "email", FieldType::Email, "b@example.com")
        .await
        .unwrap();

    vault
        .delete_subjects(
            &ctx,
            DeletionRequest::new(vec!["cust-1".into()], DeletionMethod::Hybrid)
                .scope(ShredScope::KeyVersions),
            &CancellationToken::new(),
        )
        .await
        .unwrap()
        .ensure_verified()
        .unwrap();

    assert!(vault.reveal_field(&ctx, "cust-1", &a.record).await.is_err());
    assert!(vault.reveal_field(&ctx, "cust-2", &b.record).await.is_err());
    assert_eq!(vault.current_key_version("acme").await.unwrap(), 2);
}

#[tokio::test]
async fn key_version_shred_is_confined_to_its_tenant() {
    let vault = Vault::from_config(&config("install-a")).unwrap();
    let acme = Context::new("acme");
    let other = Context::new("other");
    vault
        .protect_field(&acme, "cust-1", "email", FieldType::Email, "a@example.com")
        .await
        .unwrap();
    let theirs = vault
        .protect_field(&other, "cust-1", "email", FieldType::Email, "o@example.com")
        .await
        .unwrap();

    vault
        .delete_subjects(
            &acme,
            DeletionRequest::new(vec!["cust-1".into()], DeletionMethod::CryptoShred)
                .scope(ShredScope::KeyVersions),
            &CancellationToken::new(),
        )
        .await
        .unwrap()
        .ensure_verified()
        .unwrap();

    let plain = vault.reveal_field(&other, "cust-1", &theirs.record).await.unwrap();
    assert_eq!(plain.as_str(), "o@example.com");
    assert_eq!(vault.current_key_version("other").await.unwrap(), 1);
}

#[tokio::test]
async fn destroyed_key_version_stays_destroyed_after_restart() {
    let store = Arc::new(MemoryRecordStore::new());
    let audit = Arc::new(MemoryAuditStore::new());
    let ctx = Context::new("acme");

    let before = Vault::with_stores(&config("install-a"), store.clone(), audit.clone()).unwrap();
    let kept = before
        .protect_field(&ctx, "cust-2", "email", FieldType::Email, "b@example.com")
        .await
        .unwrap();
    before
        .protect_field(&ctx, "cust-1", "email", FieldType::Email, "a@example.com")
        .await
        .unwrap();
    before
        .delete_subjects(
            &ctx,
            DeletionRequest::new(vec!["cust-1".into()], DeletionMethod::CryptoShred)
                .scope(ShredScope::KeyVersions),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    let after = Vault::with_stores(&config("install-a"), store, audit).unwrap();
    let err = after.reveal_field(&ctx, "cust-2", &kept.record).await.unwrap_err();
    assert!(matches!(err, VaultError::KeyUnavailable(_)));
    assert_eq!(after.current_key_version("acme").await.unwrap(), 2);
}
