#![allow(dead_code)]

use peerlink::memory::{MemoryNetwork, MemoryTransport};
use peerlink::{Config, GenerationTag, Node, PeerEvent, PeerIdentifier, Watchdog};

pub const WAIT: std::time::Duration = std::time::Duration::from_secs(5);

pub struct TestNode {
    pub node: Node,
    pub events: tokio::sync::mpsc::Receiver<PeerEvent>,
    pub transport: std::sync::Arc<MemoryTransport>,
}

#[derive(Default)]
pub struct CountingWatchdog {
    resets: std::sync::atomic::AtomicUsize,
}

impl CountingWatchdog {
    pub fn resets(&self) -> usize {
        self.resets.load(std::sync::atomic::Ordering::SeqCst)
    }
}

impl Watchdog for CountingWatchdog {
    fn reset(&self) {
        self.resets.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
    }
}

pub fn id(s: &str) -> PeerIdentifier {
    s.parse().unwrap()
}

pub fn spawn_node(
    network: &MemoryNetwork,
    identifier: &str,
    application_port: Option<u16>,
    watchdog: std::sync::Arc<dyn Watchdog>,
) -> TestNode {
    let config = Config {
        peer_identifier: Some(id(identifier)),
        application_port,
        invite_timeout_secs: 5,
        ..Config::default()
    };
    let (transport, transport_events) = network.transport(64);
    let (node, events) = Node::spawn(config, transport.clone(), transport_events, watchdog);
    TestNode {
        node,
        events,
        transport,
    }
}

pub async fn started(network: &MemoryNetwork, identifier: &str, application_port: Option<u16>) -> TestNode {
    let node = spawn_node(
        network,
        identifier,
        application_port,
        std::sync::Arc::new(peerlink::NoopWatchdog),
    );
    node.node.start().await.unwrap();
    node
}

/// Wait for the next `Found` event for `peer`, skipping everything else.
pub async fn found(events: &mut tokio::sync::mpsc::Receiver<PeerEvent>, peer: &PeerIdentifier) -> GenerationTag {
    tokio::time::timeout(WAIT, async {
        loop {
            match events.recv().await {
                Some(PeerEvent::Found {
                    peer_identifier,
                    generation,
                }) if &peer_identifier == peer => return generation,
                Some(_) => continue,
                None => panic!("peer event channel closed"),
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("{peer} was not found in time"))
}

pub async fn lost(events: &mut tokio::sync::mpsc::Receiver<PeerEvent>, peer: &PeerIdentifier) {
    tokio::time::timeout(WAIT, async {
        loop {
            match events.recv().await {
                Some(PeerEvent::Lost { peer_identifier }) if &peer_identifier == peer => return,
                Some(_) => continue,
                None => panic!("peer event channel closed"),
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("{peer} was not lost in time"))
}

pub async fn eventually(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + WAIT;
    while !condition() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
}

/// Local TCP echo server; returns its port.
pub async fn echo_server() -> u16 {
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let (mut reader, mut writer) = socket.split();
                let _ = tokio::io::copy(&mut reader, &mut writer).await;
            });
        }
    });
    port
}
