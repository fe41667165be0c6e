//! Peer lifecycle events emitted by the discovery browser
//!
//! The mDNS browse task publishes these onto an mpsc queue; the activity
//! component consumes them so that probe recursion never re-enters the
//! browser callback.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::IpAddr;

/// Events produced by the mDNS browser
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PeerEvent {
    /// A service instance was resolved on the local network
    Up {
        /// mDNS instance name (e.g. `Munkey Vault[<uuid>]`)
        instance: String,
        /// All addresses the instance resolved to
        addresses: Vec<IpAddr>,
        /// Advertised service port
        port: u16,
        /// TXT record key/value pairs
        txt: HashMap<String, String>,
    },

    /// A previously-seen service instance went away
    Down {
        instance: String,
        addresses: Vec<IpAddr>,
        port: u16,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_serde_tagging() {
        let event = PeerEvent::Up {
            instance: "Munkey Vault[abc]".to_string(),
            addresses: vec!["192.168.1.9".parse().unwrap()],
            port: 8000,
            txt: HashMap::new(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "Up");
        assert_eq!(json["port"], 8000);
    }
}
