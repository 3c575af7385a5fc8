//! Integration tests for config encryption through the store.
//!
//! These verify that sealed configs only open with the key that sealed them
//! and that legacy plaintext rows stay readable once a key is configured.

use extsvc::crypto::{CryptoError, EncryptedConfigCodec};
use extsvc::error::StoreError;
use extsvc::repositories::ExternalServiceStore;

mod test_utils;

#[tokio::test]
async fn sealed_configs_require_the_sealing_key() {
    let test_db = test_utils::setup_test_db().await.unwrap();
    let sealing = test_utils::store(&test_db.db);
    let service = test_utils::create_github_service(&sealing, "Sealed")
        .await
        .unwrap();

    let keyless = ExternalServiceStore::new(test_db.db.clone(), EncryptedConfigCodec::plaintext());
    let err = keyless.get_by_id(service.id).await.unwrap_err();
    assert!(matches!(err, StoreError::Crypto(CryptoError::MissingKey(_))));

    let rotated = ExternalServiceStore::new(
        test_db.db.clone(),
        EncryptedConfigCodec::from_key_bytes(Some(&[9u8; 32][..])).unwrap(),
    );
    let err = rotated.get_by_id(service.id).await.unwrap_err();
    assert!(matches!(
        err,
        StoreError::Crypto(CryptoError::KeyMismatch { .. })
    ));

    let reopened = sealing.get_by_id(service.id).await.unwrap();
    assert_eq!(reopened.config, service.config);
}

#[tokio::test]
async fn plaintext_rows_stay_readable_after_a_key_is_configured() {
    let test_db = test_utils::setup_test_db().await.unwrap();
    let legacy = ExternalServiceStore::new(test_db.db.clone(), EncryptedConfigCodec::plaintext());
    let service = test_utils::create_github_service(&legacy, "Legacy")
        .await
        .unwrap();

    let encrypting = test_utils::store(&test_db.db);
    let loaded = encrypting.get_by_id(service.id).await.unwrap();
    assert_eq!(loaded.config, service.config);
}
