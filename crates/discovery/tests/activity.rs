//! Transitive discovery behavior against a mocked probe graph.

use async_trait::async_trait;
use munkey_core::{DeviceKey, Nickname, PeerAddr, PeerIdentity, VaultSummary};
use munkey_discovery::{LinkProbe, PeerActivity};
use munkey_identity::NodeIdentity;
use munkey_replication::ConnectionManager;
use munkey_store::{Database, LocalDatabase};
use munkey_vault::{DatabaseFactory, VaultRegistry};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Probe over a fixed peer graph, counting probes per endpoint.
struct GraphProbe {
    graph: HashMap<DeviceKey, PeerIdentity>,
    counts: Mutex<HashMap<DeviceKey, usize>>,
}

impl GraphProbe {
    fn new(graph: HashMap<DeviceKey, PeerIdentity>) -> Self {
        Self {
            graph,
            counts: Mutex::new(HashMap::new()),
        }
    }

    async fn probe_count(&self, device: &DeviceKey) -> usize {
        *self.counts.lock().await.get(device).unwrap_or(&0)
    }

    async fn total_probes(&self) -> usize {
        self.counts.lock().await.values().sum()
    }
}

#[async_trait]
impl LinkProbe for GraphProbe {
    async fn probe(&self, host: &str, port: u16) -> Option<PeerIdentity> {
        let device = DeviceKey::new(host, port);
        *self.counts.lock().await.entry(device.clone()).or_insert(0) += 1;
        self.graph.get(&device).cloned()
    }
}

fn device(n: u8) -> DeviceKey {
    DeviceKey::new(format!("10.0.0.{}", n), 8000)
}

fn identity(uuid: &str, peers: &[DeviceKey]) -> PeerIdentity {
    PeerIdentity {
        unique_id: uuid.to_string(),
        vaults: Vec::<VaultSummary>::new(),
        active_peer_list: peers.iter().map(PeerAddr::from).collect(),
    }
}

fn activity(probe: Arc<GraphProbe>, node: NodeIdentity) -> Arc<PeerActivity> {
    let factory: DatabaseFactory = Arc::new(|name: &Nickname| {
        Ok(Arc::new(LocalDatabase::in_memory(name.as_str())) as Arc<dyn Database>)
    });
    let registry = Arc::new(VaultRegistry::new(factory));
    let connections = ConnectionManager::with_poll_interval(Duration::from_secs(60)).unwrap();
    Arc::new(PeerActivity::new(node, probe, registry, connections))
}

/// A↔B and B↔C linked; publishing B from A discovers C exactly once.
#[tokio::test]
async fn transitive_discovery_reaches_c_once() {
    let b = device(2);
    let c = device(3);
    let graph = HashMap::from([
        (b.clone(), identity("uuid-b", &[c.clone()])),
        (c.clone(), identity("uuid-c", &[b.clone()])),
    ]);
    let probe = Arc::new(GraphProbe::new(graph));
    let activity = activity(Arc::clone(&probe), NodeIdentity::generate());

    let mut visited = HashSet::new();
    let published = activity.publish_device(b.clone(), &mut visited).await;

    let identity_b = published.expect("B answers");
    assert_eq!(identity_b.unique_id, "uuid-b");
    assert!(identity_b
        .active_peer_list
        .contains(&PeerAddr::from(&c)));

    let apl = activity.apl();
    assert!(apl.contains(&b).await);
    assert!(apl.contains(&c).await);
    assert_eq!(probe.probe_count(&c).await, 1);
    assert_eq!(probe.probe_count(&b).await, 1);
}

/// Arbitrary fan-out with cycles terminates after at most n distinct probes.
#[tokio::test]
async fn cycle_graph_probes_each_device_at_most_once() {
    // Fully connected 5-node graph: every identity advertises every device
    let devices: Vec<DeviceKey> = (1..=5).map(device).collect();
    let graph: HashMap<DeviceKey, PeerIdentity> = devices
        .iter()
        .enumerate()
        .map(|(index, key)| {
            (
                key.clone(),
                identity(&format!("uuid-{}", index), &devices),
            )
        })
        .collect();
    let probe = Arc::new(GraphProbe::new(graph));
    let activity = activity(Arc::clone(&probe), NodeIdentity::generate());

    let mut visited = HashSet::new();
    activity
        .publish_device(devices[0].clone(), &mut visited)
        .await;

    assert_eq!(probe.total_probes().await, devices.len());
    for key in &devices {
        assert_eq!(probe.probe_count(key).await, 1);
    }
    assert_eq!(activity.apl().len().await, devices.len());
}

/// A probe that answers with our own uuid never lands in the APL.
#[tokio::test]
async fn own_uuid_is_filtered() {
    let node = NodeIdentity::generate();
    let me = device(9);
    let graph = HashMap::from([(me.clone(), identity(&node.uuid().to_uppercase(), &[]))]);
    let probe = Arc::new(GraphProbe::new(graph));
    let activity = activity(probe, node);

    let mut visited = HashSet::new();
    let published = activity.publish_device(me.clone(), &mut visited).await;

    assert!(published.is_none());
    assert_eq!(activity.apl().len().await, 0);
}

/// Browse events carrying our own uuid or lacking the validation flag
/// leave the APL untouched and trigger no probes.
#[tokio::test]
async fn browse_filter_drops_own_and_unvalidated_services() {
    use munkey_core::PeerEvent;
    use munkey_discovery::{TXT_UUID_KEY, TXT_VALIDATE_KEY, TXT_VALIDATE_VALUE};

    let node = NodeIdentity::generate();
    let target = device(2);
    let graph = HashMap::from([(target.clone(), identity("uuid-b", &[]))]);
    let probe = Arc::new(GraphProbe::new(graph));
    let activity = activity(Arc::clone(&probe), node.clone());

    let (tx, rx) = tokio::sync::mpsc::channel(8);
    let listener = tokio::spawn(Arc::clone(&activity).listen(rx));

    // Own broadcast echoed back (uuid casing differs)
    tx.send(PeerEvent::Up {
        instance: "Munkey Vault[self]".to_string(),
        addresses: vec![target.host.parse().unwrap()],
        port: target.port,
        txt: HashMap::from([
            (TXT_VALIDATE_KEY.to_string(), TXT_VALIDATE_VALUE.to_string()),
            (TXT_UUID_KEY.to_string(), node.uuid().to_uppercase()),
        ]),
    })
    .await
    .unwrap();

    // Foreign service without the validation flag
    tx.send(PeerEvent::Up {
        instance: "SomethingElse".to_string(),
        addresses: vec![target.host.parse().unwrap()],
        port: target.port,
        txt: HashMap::from([(TXT_UUID_KEY.to_string(), "uuid-b".to_string())]),
    })
    .await
    .unwrap();

    drop(tx);
    listener.await.unwrap();

    assert_eq!(activity.apl().len().await, 0);
    assert_eq!(probe.total_probes().await, 0);
}

/// A failed probe erases any stale APL entry for that endpoint.
#[tokio::test]
async fn failed_probe_erases_the_apl_entry() {
    let alive = device(2);
    let dead = device(4);
    let graph = HashMap::from([(alive.clone(), identity("uuid-b", &[]))]);
    let probe = Arc::new(GraphProbe::new(graph));
    let activity = activity(probe, NodeIdentity::generate());

    // Seed a stale entry for the dead endpoint
    activity
        .apl()
        .insert(dead.clone(), identity("uuid-stale", &[]))
        .await;

    let mut visited = HashSet::new();
    assert!(activity.publish_device(dead.clone(), &mut visited).await.is_none());
    assert!(!activity.apl().contains(&dead).await);

    let mut visited = HashSet::new();
    assert!(activity
        .publish_device(alive.clone(), &mut visited)
        .await
        .is_some());
}
