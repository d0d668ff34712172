//! In-process discovery transport.
//!
//! [`MemoryNetwork`] connects any number of nodes living in the same process.
//! Advertisements are visible to every member browsing the same service id,
//! invitations are delivered as [`TransportEvent::InvitationReceived`] and an
//! accepted invitation yields the two halves of a [`tokio::io::duplex`] pipe.
//!
//! ```no_run
//! # async fn demo() {
//! let network = peerlink::memory::MemoryNetwork::new();
//! let (transport, events) = network.transport(64);
//! let (node, _peer_events) = peerlink::Node::spawn(
//!     peerlink::Config::default(),
//!     transport,
//!     events,
//!     std::sync::Arc::new(peerlink::NoopWatchdog),
//! );
//! node.start().await.unwrap();
//! # }
//! ```

use peerlink_net::{
    BoxedStream, DiscoveryInfo, DiscoveryTransport, InvitationReply, RadioState, TransportError,
    TransportEvent, TransportHandle,
};

/// Buffer of each direction of an accepted invitation's pipe.
const PIPE_CAPACITY: usize = 64 * 1024;

/// Shared medium all memory transports of one network talk through.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    members: std::sync::Arc<std::sync::Mutex<Members>>,
}

#[derive(Default)]
struct Members {
    next_id: u64,
    by_id: std::collections::HashMap<u64, Member>,
}

struct Member {
    events: tokio::sync::mpsc::Sender<TransportEvent>,
    advertising: Option<Advert>,
    browsing: Option<String>,
}

#[derive(Clone)]
struct Advert {
    service_id: String,
    handle: TransportHandle,
    info: DiscoveryInfo,
}

impl Members {
    /// Event senders of every other member browsing `service_id`.
    fn browsers(&self, except: u64, service_id: &str) -> Vec<tokio::sync::mpsc::Sender<TransportEvent>> {
        self.by_id
            .iter()
            .filter(|(id, member)| **id != except && member.browsing.as_deref() == Some(service_id))
            .map(|(_, member)| member.events.clone())
            .collect()
    }

    /// Advertisements of every other member for `service_id`.
    fn visible(&self, except: u64, service_id: &str) -> Vec<Advert> {
        self.by_id
            .iter()
            .filter(|(id, _)| **id != except)
            .filter_map(|(_, member)| member.advertising.clone())
            .filter(|advert| advert.service_id == service_id)
            .collect()
    }
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Members> {
        self.members
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Join the network. Events for the new member arrive on the returned
    /// receiver, which holds up to `buffer` undelivered events.
    pub fn transport(
        &self,
        buffer: usize,
    ) -> (
        std::sync::Arc<MemoryTransport>,
        tokio::sync::mpsc::Receiver<TransportEvent>,
    ) {
        let (events, receiver) = tokio::sync::mpsc::channel(buffer.max(1));
        let mut members = self.lock();
        let id = members.next_id;
        members.next_id += 1;
        members.by_id.insert(
            id,
            Member {
                events,
                advertising: None,
                browsing: None,
            },
        );

        let transport = MemoryTransport {
            id,
            network: self.clone(),
        };
        (std::sync::Arc::new(transport), receiver)
    }

    pub fn member_count(&self) -> usize {
        self.lock().by_id.len()
    }
}

async fn deliver(targets: Vec<tokio::sync::mpsc::Sender<TransportEvent>>, event: impl Fn() -> TransportEvent) {
    for target in targets {
        // A member that went away simply misses the event.
        let _ = target.send(event()).await;
    }
}

/// One member of a [`MemoryNetwork`].
pub struct MemoryTransport {
    id: u64,
    network: MemoryNetwork,
}

impl MemoryTransport {
    /// Leave the network, as if the device went out of range.
    pub async fn leave(&self) {
        let (lost, browsers) = {
            let mut members = self.network.lock();
            let Some(member) = members.by_id.remove(&self.id) else {
                return;
            };
            match member.advertising {
                Some(advert) => {
                    let browsers = members.browsers(self.id, &advert.service_id);
                    (Some(advert.handle), browsers)
                }
                None => (None, Vec::new()),
            }
        };

        if let Some(handle) = lost {
            deliver(browsers, || TransportEvent::PeerLost {
                handle: handle.clone(),
            })
            .await;
        }
    }

    /// Push an arbitrary invitation to the member advertising `peer`, with
    /// `from` as the claimed sender handle. The reply is returned to the
    /// caller instead of being interpreted.
    pub async fn send_raw_invitation(
        &self,
        peer: &TransportHandle,
        from: TransportHandle,
        context: &[u8],
    ) -> Result<tokio::sync::oneshot::Receiver<Option<tokio::io::DuplexStream>>, TransportError> {
        let target = self.advertiser(peer)?;
        let (reply, answer) = tokio::sync::oneshot::channel();
        target
            .send(TransportEvent::InvitationReceived {
                from,
                context: context.to_vec(),
                reply: Box::new(MemoryInvitation { reply }),
            })
            .await
            .map_err(|_| TransportError::Closed)?;
        Ok(answer)
    }

    /// Report a radio state change to this member's own node, as a device
    /// would when its radio is toggled. Advertisements are left alone; when
    /// the radio comes back `On` every visible advertiser is reported again.
    pub async fn set_radio_state(&self, state: RadioState) -> Result<(), TransportError> {
        let (events, visible) = {
            let members = self.network.lock();
            let member = members.by_id.get(&self.id).ok_or(TransportError::Closed)?;
            let visible = match (&member.browsing, state) {
                (Some(service_id), RadioState::On) => members.visible(self.id, service_id),
                _ => Vec::new(),
            };
            (member.events.clone(), visible)
        };

        events
            .send(TransportEvent::RadioStateChanged { state })
            .await
            .map_err(|_| TransportError::Closed)?;
        for advert in visible {
            let _ = events
                .send(TransportEvent::PeerFound {
                    handle: advert.handle,
                    info: advert.info,
                })
                .await;
        }
        Ok(())
    }

    /// Handle this member currently advertises under.
    pub fn advertised_handle(&self) -> Option<TransportHandle> {
        self.network
            .lock()
            .by_id
            .get(&self.id)
            .and_then(|member| member.advertising.as_ref())
            .map(|advert| advert.handle.clone())
    }

    fn advertiser(
        &self,
        peer: &TransportHandle,
    ) -> Result<tokio::sync::mpsc::Sender<TransportEvent>, TransportError> {
        self.network
            .lock()
            .by_id
            .iter()
            .find(|(id, member)| {
                **id != self.id
                    && member
                        .advertising
                        .as_ref()
                        .is_some_and(|advert| &advert.handle == peer)
            })
            .map(|(_, member)| member.events.clone())
            .ok_or_else(|| TransportError::UnknownPeer {
                handle: peer.clone(),
            })
    }
}

#[async_trait::async_trait]
impl DiscoveryTransport for MemoryTransport {
    async fn start_advertising(
        &self,
        service_id: &str,
        handle: &TransportHandle,
        info: &DiscoveryInfo,
    ) -> Result<(), TransportError> {
        let (replaced, browsers) = {
            let mut members = self.network.lock();
            let member = members.by_id.get_mut(&self.id).ok_or(TransportError::Closed)?;
            let replaced = member.advertising.replace(Advert {
                service_id: service_id.to_string(),
                handle: handle.clone(),
                info: info.clone(),
            });
            (replaced, members.browsers(self.id, service_id))
        };

        if let Some(old) = replaced {
            deliver(members_of(&self.network, self.id, &old.service_id), || {
                TransportEvent::PeerLost {
                    handle: old.handle.clone(),
                }
            })
            .await;
        }

        deliver(browsers, || TransportEvent::PeerFound {
            handle: handle.clone(),
            info: info.clone(),
        })
        .await;
        Ok(())
    }

    async fn stop_advertising(&self) -> Result<(), TransportError> {
        let stopped = {
            let mut members = self.network.lock();
            members
                .by_id
                .get_mut(&self.id)
                .and_then(|member| member.advertising.take())
        };

        if let Some(advert) = stopped {
            deliver(members_of(&self.network, self.id, &advert.service_id), || {
                TransportEvent::PeerLost {
                    handle: advert.handle.clone(),
                }
            })
            .await;
        }
        Ok(())
    }

    async fn start_browsing(&self, service_id: &str) -> Result<(), TransportError> {
        let (events, visible) = {
            let mut members = self.network.lock();
            let member = members.by_id.get_mut(&self.id).ok_or(TransportError::Closed)?;
            member.browsing = Some(service_id.to_string());
            let events = member.events.clone();
            (events, members.visible(self.id, service_id))
        };

        for advert in visible {
            let _ = events
                .send(TransportEvent::PeerFound {
                    handle: advert.handle,
                    info: advert.info,
                })
                .await;
        }
        Ok(())
    }

    async fn stop_browsing(&self) -> Result<(), TransportError> {
        if let Some(member) = self.network.lock().by_id.get_mut(&self.id) {
            member.browsing = None;
        }
        Ok(())
    }

    async fn invite(
        &self,
        peer: &TransportHandle,
        context: &[u8],
        timeout: std::time::Duration,
    ) -> Result<BoxedStream, TransportError> {
        let from = self.advertised_handle().ok_or(TransportError::NotAdvertising)?;
        let answer = self.send_raw_invitation(peer, from, context).await?;

        match tokio::time::timeout(timeout, answer).await {
            Err(_) => Err(TransportError::Timeout { timeout }),
            Ok(Ok(Some(stream))) => Ok(Box::new(stream)),
            Ok(Ok(None)) | Ok(Err(_)) => Err(TransportError::Rejected),
        }
    }
}

fn members_of(
    network: &MemoryNetwork,
    except: u64,
    service_id: &str,
) -> Vec<tokio::sync::mpsc::Sender<TransportEvent>> {
    network.lock().browsers(except, service_id)
}

/// Reply slot of an invitation delivered through a [`MemoryNetwork`].
struct MemoryInvitation {
    reply: tokio::sync::oneshot::Sender<Option<tokio::io::DuplexStream>>,
}

#[async_trait::async_trait]
impl InvitationReply for MemoryInvitation {
    async fn accept(self: Box<Self>) -> Result<BoxedStream, TransportError> {
        let (ours, theirs) = tokio::io::duplex(PIPE_CAPACITY);
        self.reply
            .send(Some(theirs))
            .map_err(|_| TransportError::Closed)?;
        Ok(Box::new(ours))
    }

    fn reject(self: Box<Self>) {
        let _ = self.reply.send(None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(peer: &str) -> DiscoveryInfo {
        let mut info = DiscoveryInfo::new();
        info.insert(peerlink_net::PEER_IDENTIFIER_KEY.to_string(), peer.to_string());
        info
    }

    #[tokio::test]
    async fn browsers_see_advertisers_of_their_service_only() {
        let network = MemoryNetwork::new();
        let (a, _a_events) = network.transport(8);
        let (b, mut b_events) = network.transport(8);
        let (c, mut c_events) = network.transport(8);

        b.start_browsing("chat").await.unwrap();
        c.start_browsing("other").await.unwrap();

        let handle = TransportHandle::from("a-1");
        a.start_advertising("chat", &handle, &info("a")).await.unwrap();

        match b_events.recv().await.unwrap() {
            TransportEvent::PeerFound { handle: found, info } => {
                assert_eq!(found, handle);
                assert_eq!(info[peerlink_net::PEER_IDENTIFIER_KEY], "a");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(c_events.try_recv().is_err());

        a.stop_advertising().await.unwrap();
        assert!(matches!(
            b_events.recv().await.unwrap(),
            TransportEvent::PeerLost { handle: lost } if lost == handle
        ));
    }

    #[tokio::test]
    async fn late_browsers_see_existing_advertisers() {
        let network = MemoryNetwork::new();
        let (a, _a_events) = network.transport(8);
        let (b, mut b_events) = network.transport(8);

        a.start_advertising("chat", &TransportHandle::from("a-1"), &info("a"))
            .await
            .unwrap();
        b.start_browsing("chat").await.unwrap();

        assert!(matches!(
            b_events.recv().await.unwrap(),
            TransportEvent::PeerFound { .. }
        ));
    }

    #[tokio::test]
    async fn accepted_invitation_connects_both_ends() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let network = MemoryNetwork::new();
        let (a, _a_events) = network.transport(8);
        let (b, mut b_events) = network.transport(8);

        let a_handle = TransportHandle::from("a-1");
        let b_handle = TransportHandle::from("b-1");
        a.start_advertising("chat", &a_handle, &info("a")).await.unwrap();
        b.start_advertising("chat", &b_handle, &info("b")).await.unwrap();

        let acceptor = tokio::spawn(async move {
            match b_events.recv().await.unwrap() {
                TransportEvent::InvitationReceived { from, context, reply } => {
                    assert_eq!(from, TransportHandle::from("a-1"));
                    assert_eq!(context, b"hello");
                    let mut stream = reply.accept().await.unwrap();
                    stream.write_all(b"pong").await.unwrap();
                }
                other => panic!("unexpected {other:?}"),
            }
        });

        let mut stream = a
            .invite(&b_handle, b"hello", std::time::Duration::from_secs(5))
            .await
            .unwrap();
        let mut buf = [0u8; 4];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong");
        acceptor.await.unwrap();
    }

    #[tokio::test]
    async fn rejected_and_unanswered_invitations_fail() {
        let network = MemoryNetwork::new();
        let (a, _a_events) = network.transport(8);
        let (b, mut b_events) = network.transport(8);

        let b_handle = TransportHandle::from("b-1");
        a.start_advertising("chat", &TransportHandle::from("a-1"), &info("a"))
            .await
            .unwrap();
        b.start_advertising("chat", &b_handle, &info("b")).await.unwrap();

        let rejecter = tokio::spawn(async move {
            if let Some(TransportEvent::InvitationReceived { reply, .. }) = b_events.recv().await {
                reply.reject();
            }
            // Hold the second invitation without answering.
            let pending = b_events.recv().await;
            tokio::time::sleep(std::time::Duration::from_millis(300)).await;
            drop(pending);
        });

        assert!(matches!(
            a.invite(&b_handle, b"x", std::time::Duration::from_secs(5)).await,
            Err(TransportError::Rejected)
        ));
        assert!(matches!(
            a.invite(&b_handle, b"x", std::time::Duration::from_millis(50)).await,
            Err(TransportError::Timeout { .. })
        ));
        rejecter.await.unwrap();
    }

    #[tokio::test]
    async fn inviting_requires_advertising_and_a_known_peer() {
        let network = MemoryNetwork::new();
        let (a, _a_events) = network.transport(8);

        assert!(matches!(
            a.invite(&TransportHandle::from("nobody"), b"x", std::time::Duration::from_secs(1)).await,
            Err(TransportError::NotAdvertising)
        ));

        a.start_advertising("chat", &TransportHandle::from("a-1"), &info("a"))
            .await
            .unwrap();
        assert!(matches!(
            a.invite(&TransportHandle::from("nobody"), b"x", std::time::Duration::from_secs(1)).await,
            Err(TransportError::UnknownPeer { .. })
        ));
    }

    #[tokio::test]
    async fn leaving_announces_loss() {
        let network = MemoryNetwork::new();
        let (a, _a_events) = network.transport(8);
        let (b, mut b_events) = network.transport(8);

        b.start_browsing("chat").await.unwrap();
        a.start_advertising("chat", &TransportHandle::from("a-1"), &info("a"))
            .await
            .unwrap();
        let _ = b_events.recv().await;

        a.leave().await;
        assert_eq!(network.member_count(), 1);
        assert!(matches!(
            b_events.recv().await.unwrap(),
            TransportEvent::PeerLost { .. }
        ));
    }
}
