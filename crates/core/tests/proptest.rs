//! Property-based tests for core types.

use munkey_core::{DeviceKey, Nickname, PeerAddr, PeerIdentity, VaultId, VaultSummary};
use proptest::prelude::*;

// Property: every accepted vault id round-trips through serde as itself
proptest! {
    #[test]
    fn prop_vault_id_serde_roundtrip(raw in "[A-Za-z0-9_-]{1,64}") {
        let id = VaultId::new(raw.clone()).unwrap();
        let json = serde_json::to_string(&id).unwrap();
        prop_assert_eq!(json, format!("\"{}\"", raw));
        let back: VaultId = serde_json::from_str(&format!("\"{}\"", raw)).unwrap();
        prop_assert_eq!(back, id);
    }
}

// Property: ids containing non-base64url bytes are rejected
proptest! {
    #[test]
    fn prop_vault_id_rejects_foreign_chars(raw in "[A-Za-z0-9_-]{0,8}[+/=. ][A-Za-z0-9_-]{0,8}") {
        prop_assert!(VaultId::new(raw).is_err());
    }
}

// Property: nicknames never accept path separators
proptest! {
    #[test]
    fn prop_nickname_rejects_separators(prefix in "[a-z]{0,8}", suffix in "[a-z]{0,8}") {
        let with_slash = format!("{}/{}", prefix, suffix);
        prop_assert!(Nickname::new(with_slash).is_err());
        let with_backslash = format!("{}\\{}", prefix, suffix);
        prop_assert!(Nickname::new(with_backslash).is_err());
    }
}

// Property: identity documents survive a serde round trip unchanged
proptest! {
    #[test]
    fn prop_peer_identity_roundtrip(
        uuid in "[a-f0-9-]{8,36}",
        nickname in "[a-z][a-z0-9]{0,16}",
        id in "[A-Za-z0-9_-]{4,44}",
        host in "[0-9]{1,3}\\.[0-9]{1,3}\\.[0-9]{1,3}\\.[0-9]{1,3}",
        port in 1u16..,
    ) {
        let identity = PeerIdentity {
            unique_id: uuid,
            vaults: vec![VaultSummary {
                nickname,
                vault_id: VaultId::new(id).unwrap(),
            }],
            active_peer_list: vec![PeerAddr { hostname: host, port_num: port }],
        };

        let json = serde_json::to_string(&identity).unwrap();
        let back: PeerIdentity = serde_json::from_str(&json).unwrap();
        prop_assert_eq!(back, identity);
    }
}

// Property: device keys convert losslessly to wire addresses and back
proptest! {
    #[test]
    fn prop_device_key_addr_roundtrip(host in "[a-z0-9.]{1,32}", port: u16) {
        let key = DeviceKey::new(host, port);
        let addr = PeerAddr::from(&key);
        prop_assert_eq!(DeviceKey::from(&addr), key);
    }
}
