//! Two in-process nodes, one echo server, and a byte round-trip through both relays.
//!
//! ```text
//! client ─► relay(alpha) ─► memory transport ─► relay(bravo) ─► echo server
//! ```

use tokio::io::{AsyncReadExt, AsyncWriteExt};

pub async fn run(config: peerlink::Config, bytes: usize) -> eyre::Result<()> {
    let echo = tokio::net::TcpListener::bind(("127.0.0.1", 0)).await?;
    let echo_port = echo.local_addr()?.port();
    tokio::spawn(serve_echo(echo));
    println!("🔁 Echo server on 127.0.0.1:{echo_port}");

    let network = peerlink::memory::MemoryNetwork::new();
    let inviter = spawn_node(&network, &config, "alpha", None)?;
    let acceptor = spawn_node(&network, &config, "bravo", Some(echo_port))?;
    let (alpha, mut alpha_events) = inviter;
    let (bravo, _bravo_events) = acceptor;

    alpha.start().await?;
    bravo.start().await?;
    println!("📡 {} and {} advertising", alpha.local_identifier(), bravo.local_identifier());

    let target = bravo.local_identifier().clone();
    let found = tokio::time::timeout(std::time::Duration::from_secs(5), async {
        while let Some(event) = alpha_events.recv().await {
            if let peerlink::PeerEvent::Found { peer_identifier, generation } = event
                && peer_identifier == target
            {
                return Some(generation);
            }
        }
        None
    })
    .await
    .ok()
    .flatten()
    .ok_or_else(|| eyre::eyre!("{} never discovered {}", alpha.local_identifier(), target))?;
    println!("🔍 Discovered {found}");

    let port = alpha.connect(&target).await?;
    println!("🔗 Relay for {target} on 127.0.0.1:{port}");

    let payload: Vec<u8> = (0..bytes).map(|i| (i % 251) as u8).collect();
    let started = std::time::Instant::now();

    let socket = tokio::net::TcpStream::connect(("127.0.0.1", port)).await?;
    let (mut reader, mut writer) = socket.into_split();
    let send = {
        let payload = payload.clone();
        tokio::spawn(async move {
            // No half-close: end-of-stream on either side ends the relay.
            writer.write_all(&payload).await?;
            Ok::<_, std::io::Error>(writer)
        })
    };

    let mut echoed = vec![0u8; payload.len()];
    reader.read_exact(&mut echoed).await?;
    drop(send.await??);

    if echoed != payload {
        eyre::bail!("echoed bytes differ from the payload");
    }
    println!(
        "✅ {} bytes round-tripped in {:?}",
        payload.len(),
        started.elapsed()
    );

    alpha.close_relay(&target);
    alpha.shutdown().await;
    bravo.shutdown().await;
    println!("👋 Done");
    Ok(())
}

fn spawn_node(
    network: &peerlink::memory::MemoryNetwork,
    base: &peerlink::Config,
    identifier: &str,
    application_port: Option<u16>,
) -> eyre::Result<(peerlink::Node, tokio::sync::mpsc::Receiver<peerlink::PeerEvent>)> {
    let config = peerlink::Config {
        peer_identifier: Some(identifier.parse()?),
        application_port,
        ..base.clone()
    };
    let (transport, events) = network.transport(config.event_buffer);
    Ok(peerlink::Node::spawn(
        config,
        transport,
        events,
        std::sync::Arc::new(peerlink::NoopWatchdog),
    ))
}

async fn serve_echo(listener: tokio::net::TcpListener) {
    loop {
        let (mut socket, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                tracing::warn!(error = %e, "echo server accept failed");
                return;
            }
        };
        tokio::spawn(async move {
            let (mut reader, mut writer) = socket.split();
            if let Err(e) = tokio::io::copy(&mut reader, &mut writer).await {
                tracing::debug!(%peer, error = %e, "echo connection ended");
            }
        });
    }
}
