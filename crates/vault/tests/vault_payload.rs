//! Integration tests for vault instances carrying real sealed envelopes.

use munkey_core::{Error, Nickname};
use munkey_payload::{derive_key, open_payload, seal_payload, VaultKeys};
use munkey_store::{Database, LocalDatabase};
use munkey_vault::{DatabaseFactory, VaultRegistry};
use std::sync::Arc;

fn memory_factory() -> DatabaseFactory {
    Arc::new(|name: &Nickname| {
        Ok(Arc::new(LocalDatabase::in_memory(name.as_str())) as Arc<dyn Database>)
    })
}

fn name(s: &str) -> Nickname {
    Nickname::new(s.to_string()).unwrap()
}

/// A wrong password fails with `BadKey` and leaves the stored envelope
/// byte-identical.
#[tokio::test]
async fn bad_password_leaves_envelope_untouched() {
    let keys = VaultKeys::generate();
    let id = keys.vault_id().unwrap();
    let key = derive_key(b"correct horse", id.as_bytes());

    let registry = VaultRegistry::new(memory_factory());
    let envelope = seal_payload(&keys, &key, b"{}").unwrap();
    let vault = registry
        .create_vault(name("alpha"), id.clone(), &envelope)
        .await
        .unwrap();

    // Store an entry under the right password
    let stored = vault.get_content().await.unwrap();
    let (_, data) = open_payload(&id, &key, &stored).unwrap();
    let mut map: serde_json::Map<String, serde_json::Value> =
        serde_json::from_slice(&data).unwrap();
    map.insert("a".to_string(), serde_json::Value::String("1".to_string()));
    let updated = seal_payload(&keys, &key, &serde_json::to_vec(&map).unwrap()).unwrap();
    vault.set_content(updated.clone()).await.unwrap();

    // A wrong password cannot open it, and nothing was mutated
    let before = vault.get_content().await.unwrap();
    let wrong = derive_key(b"Tr0ub4dor", id.as_bytes());
    assert!(matches!(
        open_payload(&id, &wrong, &before),
        Err(Error::BadKey) | Err(Error::MalformedEnvelope(_))
    ));
    let after = vault.get_content().await.unwrap();
    assert_eq!(before, after);

    // The right password still reads the entry
    let (_, data) = open_payload(&id, &key, &after).unwrap();
    let map: serde_json::Map<String, serde_json::Value> =
        serde_json::from_slice(&data).unwrap();
    assert_eq!(map["a"], "1");
}

/// Envelopes written through the registry verify against the vault id
/// they were created under.
#[tokio::test]
async fn registry_round_trips_verifiable_envelopes() {
    let keys = VaultKeys::generate();
    let id = keys.vault_id().unwrap();
    let key = derive_key(b"pw", id.as_bytes());
    let envelope = seal_payload(&keys, &key, b"{\"site\":\"secret\"}").unwrap();

    let registry = VaultRegistry::new(memory_factory());
    registry
        .create_vault(name("alpha"), id.clone(), &envelope)
        .await
        .unwrap();

    let vault = registry.get_by_id(&id).await.unwrap();
    let content = vault.get_content().await.unwrap();
    let (_, data) = open_payload(&id, &key, &content).unwrap();
    assert_eq!(data, b"{\"site\":\"secret\"}");

    // Forged content under a different signer does not verify
    let forger = VaultKeys::generate();
    let forged = seal_payload(&forger, &key, b"{}").unwrap();
    assert!(matches!(
        open_payload(&id, &key, &forged),
        Err(Error::InvalidSignature)
    ));
}
