mod common;

use common::{echo_server, eventually, found, id, lost, started};
use peerlink::memory::MemoryNetwork;
use peerlink::{ConnectError, PeerEvent, RadioState, SessionRole, SessionState};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

#[tokio::test]
async fn connect_relays_to_the_accepting_application() {
    let echo_port = echo_server().await;
    let network = MemoryNetwork::new();
    let mut alpha = started(&network, "alpha", None).await;
    let bravo = started(&network, "bravo", Some(echo_port)).await;

    found(&mut alpha.events, &id("bravo")).await;
    let port = alpha.node.connect(&id("bravo")).await.unwrap();

    let client_session = alpha.node.session(&id("bravo")).unwrap();
    assert_eq!(client_session.role(), SessionRole::Client);
    assert_eq!(client_session.state(), SessionState::Connected);
    assert_eq!(client_session.application_port(), Some(port));

    let mut socket = tokio::net::TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    socket.write_all(b"hello over peerlink").await.unwrap();
    let mut echoed = [0u8; 19];
    socket.read_exact(&mut echoed).await.unwrap();
    assert_eq!(&echoed, b"hello over peerlink");

    let server_session = bravo.node.session(&id("alpha")).unwrap();
    assert_eq!(server_session.role(), SessionRole::Server);
    assert_eq!(server_session.state(), SessionState::Connected);
    assert_eq!(server_session.application_port(), Some(echo_port));

    // Asking again hands out the same relay.
    assert_eq!(alpha.node.connect(&id("bravo")).await.unwrap(), port);
    assert_eq!(alpha.node.open_relay(&id("bravo")).await.unwrap(), port);
}

#[tokio::test]
async fn closing_the_local_client_releases_both_sessions() {
    let echo_port = echo_server().await;
    let network = MemoryNetwork::new();
    let mut alpha = started(&network, "alpha", None).await;
    let bravo = started(&network, "bravo", Some(echo_port)).await;

    found(&mut alpha.events, &id("bravo")).await;
    let port = alpha.node.connect(&id("bravo")).await.unwrap();
    let session = alpha.node.session(&id("bravo")).unwrap();

    let socket = tokio::net::TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    eventually("relay attached", || {
        session.relay().is_some_and(|relay| relay.virtual_socket_count() == 1)
    })
    .await;
    drop(socket);

    eventually("alpha released its session", || alpha.node.session(&id("bravo")).is_none()).await;
    assert_eq!(session.state(), SessionState::NotConnected);
    eventually("bravo released its session", || bravo.node.session(&id("alpha")).is_none()).await;
}

#[tokio::test]
async fn close_relay_disconnects_the_session() {
    let echo_port = echo_server().await;
    let network = MemoryNetwork::new();
    let mut alpha = started(&network, "alpha", None).await;
    let bravo = started(&network, "bravo", Some(echo_port)).await;

    found(&mut alpha.events, &id("bravo")).await;
    let port = alpha.node.connect(&id("bravo")).await.unwrap();
    let session = alpha.node.session(&id("bravo")).unwrap();
    let relay = session.relay().unwrap();

    assert!(alpha.node.close_relay(&id("bravo")));
    assert!(!alpha.node.close_relay(&id("bravo")));
    assert!(alpha.node.session(&id("bravo")).is_none());
    assert_eq!(session.state(), SessionState::NotConnected);

    relay.closed().await;
    assert!(tokio::net::TcpStream::connect(("127.0.0.1", port)).await.is_err());
    eventually("bravo released its session", || bravo.node.session(&id("alpha")).is_none()).await;
}

#[tokio::test]
async fn accepted_session_listens_without_application_port() {
    let network = MemoryNetwork::new();
    let mut alpha = started(&network, "alpha", None).await;
    let bravo = started(&network, "bravo", None).await;

    found(&mut alpha.events, &id("bravo")).await;
    let alpha_port = alpha.node.connect(&id("bravo")).await.unwrap();

    let bravo_port = bravo.node.open_relay(&id("alpha")).await.unwrap();
    let session = bravo.node.session(&id("alpha")).unwrap();
    assert_eq!(session.state(), SessionState::Connected);
    assert_eq!(session.application_port(), Some(bravo_port));

    let mut a = tokio::net::TcpStream::connect(("127.0.0.1", alpha_port)).await.unwrap();
    let mut b = tokio::net::TcpStream::connect(("127.0.0.1", bravo_port)).await.unwrap();

    a.write_all(b"ping").await.unwrap();
    let mut buf = [0u8; 4];
    b.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"ping");

    b.write_all(b"pong").await.unwrap();
    a.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"pong");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_open_relay_calls_share_one_relay() {
    let network = MemoryNetwork::new();
    let mut alpha = started(&network, "alpha", None).await;
    let bravo = started(&network, "bravo", None).await;

    found(&mut alpha.events, &id("bravo")).await;
    alpha.node.connect(&id("bravo")).await.unwrap();
    eventually("bravo connected", || {
        bravo
            .node
            .session(&id("alpha"))
            .is_some_and(|session| session.state() == SessionState::Connected)
    })
    .await;

    let openers: Vec<_> = (0..4)
        .map(|_| {
            let node = bravo.node.clone();
            tokio::spawn(async move { node.open_relay(&id("alpha")).await })
        })
        .collect();
    let mut ports = Vec::new();
    for opener in openers {
        ports.push(opener.await.unwrap().unwrap());
    }

    ports.dedup();
    assert_eq!(ports.len(), 1);
    assert_eq!(bravo.node.session(&id("alpha")).unwrap().application_port(), Some(ports[0]));
}

#[tokio::test]
async fn remote_drop_before_any_local_client_releases_the_session() {
    let network = MemoryNetwork::new();
    let mut alpha = started(&network, "alpha", None).await;
    let bravo = started(&network, "bravo", None).await;

    found(&mut alpha.events, &id("bravo")).await;
    let port = alpha.node.connect(&id("bravo")).await.unwrap();
    let session = alpha.node.session(&id("bravo")).unwrap();
    eventually("bravo has a session", || bravo.node.session(&id("alpha")).is_some()).await;

    // Nobody ever connects to either relay.
    assert!(bravo.node.close_relay(&id("alpha")));

    eventually("alpha noticed the remote drop", || alpha.node.session(&id("bravo")).is_none()).await;
    assert_eq!(session.state(), SessionState::NotConnected);
    assert!(tokio::net::TcpStream::connect(("127.0.0.1", port)).await.is_err());
}

#[tokio::test]
async fn connect_requires_a_started_node_and_a_discovered_peer() {
    let network = MemoryNetwork::new();
    let alpha = common::spawn_node(&network, "alpha", None, std::sync::Arc::new(peerlink::NoopWatchdog));

    assert!(matches!(
        alpha.node.connect(&id("bravo")).await,
        Err(ConnectError::NotStarted)
    ));

    alpha.node.start().await.unwrap();
    assert!(matches!(
        alpha.node.connect(&id("bravo")).await,
        Err(ConnectError::UnknownPeer { .. })
    ));
    assert!(matches!(
        alpha.node.open_relay(&id("bravo")).await,
        Err(ConnectError::NoSession { .. })
    ));
}

#[tokio::test]
async fn restart_advertises_a_new_generation() {
    let network = MemoryNetwork::new();
    let mut alpha = started(&network, "alpha", None).await;
    let bravo = started(&network, "bravo", None).await;

    let first = found(&mut alpha.events, &id("bravo")).await;
    assert_eq!(Some(first.clone()), bravo.node.generation());

    bravo.node.restart().await.unwrap();
    let second = bravo.node.generation().unwrap();
    assert_ne!(first, second);
    assert_eq!(second.peer_identifier(), &id("bravo"));

    lost(&mut alpha.events, &id("bravo")).await;
    assert_eq!(found(&mut alpha.events, &id("bravo")).await, second);
    assert_eq!(
        alpha.node.discovered_peer(&id("bravo")).map(|peer| peer.generation),
        Some(second)
    );
}

#[tokio::test]
async fn restart_of_the_remote_disconnects_the_old_session() {
    let echo_port = echo_server().await;
    let network = MemoryNetwork::new();
    let mut alpha = started(&network, "alpha", None).await;
    let bravo = started(&network, "bravo", Some(echo_port)).await;

    found(&mut alpha.events, &id("bravo")).await;
    alpha.node.connect(&id("bravo")).await.unwrap();
    let old = alpha.node.session(&id("bravo")).unwrap();

    bravo.node.restart().await.unwrap();
    found(&mut alpha.events, &id("bravo")).await;

    eventually("old session disconnected", || old.state() == SessionState::NotConnected).await;
    eventually("old session removed", || alpha.node.session(&id("bravo")).is_none()).await;

    // The new generation can be connected to again.
    alpha.node.connect(&id("bravo")).await.unwrap();
    let new = alpha.node.session(&id("bravo")).unwrap();
    assert!(!new.is_same(&old));
    assert_eq!(new.remote_generation(), &bravo.node.generation().unwrap());
}

#[tokio::test]
async fn leaving_peer_is_reported_lost() {
    let network = MemoryNetwork::new();
    let mut alpha = started(&network, "alpha", None).await;
    let bravo = started(&network, "bravo", None).await;

    found(&mut alpha.events, &id("bravo")).await;
    assert_eq!(alpha.node.discovered_peers(), vec![id("bravo")]);

    bravo.transport.leave().await;
    lost(&mut alpha.events, &id("bravo")).await;

    assert!(alpha.node.discovered_peer(&id("bravo")).is_none());
    assert!(matches!(
        alpha.node.connect(&id("bravo")).await,
        Err(ConnectError::UnknownPeer { .. })
    ));
}

#[tokio::test]
async fn stop_disconnects_every_session() {
    let network = MemoryNetwork::new();
    let mut alpha = started(&network, "alpha", None).await;
    let _bravo = started(&network, "bravo", None).await;
    let _charlie = started(&network, "charlie", None).await;

    found(&mut alpha.events, &id("bravo")).await;
    found(&mut alpha.events, &id("charlie")).await;
    alpha.node.connect(&id("bravo")).await.unwrap();
    alpha.node.connect(&id("charlie")).await.unwrap();

    let sessions = alpha.node.sessions();
    assert_eq!(sessions.len(), 2);

    alpha.node.stop().await.unwrap();
    assert!(!alpha.node.is_started());
    assert!(alpha.node.sessions().is_empty());
    assert!(alpha.node.discovered_peers().is_empty());
    for session in sessions {
        assert_eq!(session.state(), SessionState::NotConnected);
    }
}

#[tokio::test]
async fn radio_switched_off_forgets_peers_until_it_is_back() {
    let network = MemoryNetwork::new();
    let mut alpha = started(&network, "alpha", None).await;
    let bravo = started(&network, "bravo", None).await;

    let generation = found(&mut alpha.events, &id("bravo")).await;
    assert_eq!(alpha.node.radio_state(), RadioState::On);

    alpha.transport.set_radio_state(RadioState::Off).await.unwrap();
    lost(&mut alpha.events, &id("bravo")).await;
    assert_eq!(alpha.node.radio_state(), RadioState::Off);
    assert!(alpha.node.discovered_peers().is_empty());
    assert!(alpha.node.is_started());
    assert!(matches!(
        alpha.node.connect(&id("bravo")).await,
        Err(ConnectError::UnknownPeer { .. })
    ));

    alpha.transport.set_radio_state(RadioState::On).await.unwrap();
    assert_eq!(found(&mut alpha.events, &id("bravo")).await, generation);
    assert_eq!(alpha.node.radio_state(), RadioState::On);
    alpha.node.connect(&id("bravo")).await.unwrap();
    drop(bravo);
}

#[tokio::test]
async fn radio_changes_reach_the_application_once() {
    let network = MemoryNetwork::new();
    let mut alpha = started(&network, "alpha", None).await;

    alpha.transport.set_radio_state(RadioState::Unavailable).await.unwrap();
    alpha.transport.set_radio_state(RadioState::Unavailable).await.unwrap();
    alpha.transport.set_radio_state(RadioState::On).await.unwrap();

    let mut states = Vec::new();
    while states.len() < 2 {
        match tokio::time::timeout(common::WAIT, alpha.events.recv()).await.unwrap() {
            Some(PeerEvent::RadioStateChanged { state }) => states.push(state),
            Some(_) => continue,
            None => panic!("peer event channel closed"),
        }
    }
    assert_eq!(states, vec![RadioState::Unavailable, RadioState::On]);
    eventually("radio back on", || alpha.node.radio_state() == RadioState::On).await;
    assert!(alpha.events.try_recv().is_err());
}
