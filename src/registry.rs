//! Connection registry: identity → currently open push channels.
//!
//! Both transports (WebSocket live channel and event stream) register here.
//! Registration hands back an RAII guard; dropping it unregisters exactly that
//! channel, so every exit path of a channel task (close, error, timeout,
//! client disconnect, panic unwind) releases its entry.
//!
//! Channel lifecycle per identity: NO CHANNEL → REGISTERED (1..n) → NO CHANNEL

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::mpsc;

use crate::models::Message;

/// Buffered pushes per channel before further pushes are dropped.
const CHANNEL_BUFFER: usize = 64;

pub type ChannelId = u64;

/// Event pushed from the dispatcher to an open channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Message(Message),
    Typing { from: String, to: String },
}

/// Which pushes a registered channel accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelScope {
    /// Everything addressed to the owning identity.
    Identity,
    /// Only traffic between the owning identity and this peer.
    Pair(String),
}

impl ChannelScope {
    fn admits(&self, owner: &str, event: &ChannelEvent) -> bool {
        match (self, event) {
            (ChannelScope::Identity, _) => true,
            (ChannelScope::Pair(peer), ChannelEvent::Message(msg)) => msg.is_between(owner, peer),
            (ChannelScope::Pair(peer), ChannelEvent::Typing { from, .. }) => from == peer,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    Live,
    EventStream,
}

impl ChannelKind {
    fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::Live => "live",
            ChannelKind::EventStream => "event_stream",
        }
    }
}

struct ChannelEntry {
    kind: ChannelKind,
    scope: ChannelScope,
    tx: mpsc::Sender<ChannelEvent>,
}

/// Process-wide registry of open channels, owned by `CoreState`.
#[derive(Default)]
pub struct ConnectionRegistry {
    channels: Mutex<HashMap<String, HashMap<ChannelId, ChannelEntry>>>,
    next_id: AtomicU64,
}

impl ConnectionRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Open a channel for `identity`. Pushes arrive on the returned receiver
    /// until the `Registration` is dropped.
    pub fn register(
        self: &Arc<Self>,
        identity: &str,
        kind: ChannelKind,
        scope: ChannelScope,
    ) -> (Registration, mpsc::Receiver<ChannelEvent>) {
        let (tx, rx) = mpsc::channel(CHANNEL_BUFFER);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;

        match self.channels.lock() {
            Ok(mut channels) => {
                channels
                    .entry(identity.to_string())
                    .or_default()
                    .insert(id, ChannelEntry { kind, scope, tx });
            }
            Err(_) => {
                // Receiver sees an immediately closed channel.
                tracing::error!(identity, "Registry lock poisoned, channel not registered");
            }
        }

        tracing::debug!(identity, channel_id = id, kind = kind.as_str(), "Channel registered");

        (
            Registration {
                registry: Arc::downgrade(self),
                identity: identity.to_string(),
                id,
            },
            rx,
        )
    }

    /// Remove exactly one channel. Returns `false` when it was already gone.
    pub fn unregister(&self, identity: &str, id: ChannelId) -> bool {
        let Ok(mut channels) = self.channels.lock() else {
            return false;
        };
        let Some(set) = channels.get_mut(identity) else {
            return false;
        };
        let removed = set.remove(&id).is_some();
        if set.is_empty() {
            channels.remove(identity);
        }
        if removed {
            tracing::debug!(identity, channel_id = id, "Channel unregistered");
        }
        removed
    }

    /// Change the scope of an open channel. Returns `false` if it is not registered.
    pub fn rescope(&self, identity: &str, id: ChannelId, scope: ChannelScope) -> bool {
        let Ok(mut channels) = self.channels.lock() else {
            return false;
        };
        match channels.get_mut(identity).and_then(|set| set.get_mut(&id)) {
            Some(entry) => {
                entry.scope = scope;
                true
            }
            None => false,
        }
    }

    /// Push a persisted message to every matching channel of its receiver.
    ///
    /// Best effort: full or closed channels are skipped. Returns the number of
    /// channels the message was handed to.
    pub fn dispatch(&self, message: &Message) -> usize {
        self.push(
            &message.receiver_id,
            ChannelEvent::Message(message.clone()),
        )
    }

    /// Tell `to` that `from` is typing.
    pub fn notify_typing(&self, from: &str, to: &str) -> usize {
        self.push(
            to,
            ChannelEvent::Typing {
                from: from.to_string(),
                to: to.to_string(),
            },
        )
    }

    fn push(&self, identity: &str, event: ChannelEvent) -> usize {
        let Ok(channels) = self.channels.lock() else {
            tracing::error!(identity, "Registry lock poisoned, push skipped");
            return 0;
        };
        let Some(set) = channels.get(identity) else {
            return 0;
        };

        let mut delivered = 0;
        for (id, entry) in set {
            if !entry.scope.admits(identity, &event) {
                continue;
            }
            match entry.tx.try_send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!(
                        identity,
                        channel_id = id,
                        kind = entry.kind.as_str(),
                        "Channel buffer full, push dropped"
                    );
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    tracing::debug!(identity, channel_id = id, "Channel closed, push dropped");
                }
            }
        }
        delivered
    }

    pub fn connection_count(&self, identity: &str) -> usize {
        self.channels
            .lock()
            .map(|c| c.get(identity).map(|s| s.len()).unwrap_or(0))
            .unwrap_or(0)
    }

    pub fn is_reachable(&self, identity: &str) -> bool {
        self.connection_count(identity) > 0
    }

    pub fn total_connections(&self) -> usize {
        self.channels
            .lock()
            .map(|c| c.values().map(|s| s.len()).sum())
            .unwrap_or(0)
    }

    /// Drop every registration. Open channels observe a closed receiver.
    pub fn reset(&self) {
        if let Ok(mut channels) = self.channels.lock() {
            channels.clear();
        }
    }
}

/// Guard for one registered channel. Unregisters on drop.
#[derive(Debug)]
pub struct Registration {
    registry: Weak<ConnectionRegistry>,
    identity: String,
    id: ChannelId,
}

impl Registration {
    pub fn id(&self) -> ChannelId {
        self.id
    }

    pub fn rescope(&self, scope: ChannelScope) -> bool {
        self.registry
            .upgrade()
            .map(|r| r.rescope(&self.identity, self.id, scope))
            .unwrap_or(false)
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.unregister(&self.identity, self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn message(from: &str, to: &str, text: &str) -> Message {
        Message {
            id: uuid::Uuid::new_v4().to_string(),
            sender_id: from.into(),
            receiver_id: to.into(),
            content: text.into(),
            created_at: Utc::now(),
            seq: 1,
        }
    }

    fn received_text(rx: &mut mpsc::Receiver<ChannelEvent>) -> Option<String> {
        match rx.try_recv().ok()? {
            ChannelEvent::Message(m) => Some(m.content),
            ChannelEvent::Typing { from, .. } => Some(format!("typing:{from}")),
        }
    }

    #[test]
    fn fan_out_reaches_every_channel_of_identity() {
        let registry = ConnectionRegistry::new();
        let (_tab1, mut rx1) = registry.register("pat", ChannelKind::Live, ChannelScope::Identity);
        let (_tab2, mut rx2) = registry.register("pat", ChannelKind::Live, ChannelScope::Identity);

        assert_eq!(registry.dispatch(&message("doc", "pat", "hello")), 2);
        assert_eq!(received_text(&mut rx1).as_deref(), Some("hello"));
        assert_eq!(received_text(&mut rx2).as_deref(), Some("hello"));
    }

    #[test]
    fn unregistering_one_keeps_the_other() {
        let registry = ConnectionRegistry::new();
        let (tab1, mut rx1) = registry.register("pat", ChannelKind::Live, ChannelScope::Identity);
        let (_tab2, mut rx2) = registry.register("pat", ChannelKind::Live, ChannelScope::Identity);

        assert!(registry.unregister("pat", tab1.id()));
        assert_eq!(registry.dispatch(&message("doc", "pat", "after")), 1);
        assert!(received_text(&mut rx1).is_none());
        assert_eq!(received_text(&mut rx2).as_deref(), Some("after"));
    }

    #[test]
    fn unregister_is_idempotent() {
        let registry = ConnectionRegistry::new();
        let (tab1, _rx1) = registry.register("pat", ChannelKind::Live, ChannelScope::Identity);
        let (_tab2, mut rx2) = registry.register("pat", ChannelKind::Live, ChannelScope::Identity);

        assert!(registry.unregister("pat", tab1.id()));
        assert!(!registry.unregister("pat", tab1.id()));
        drop(tab1); // guard's own unregister is a no-op now

        assert_eq!(registry.connection_count("pat"), 1);
        registry.dispatch(&message("doc", "pat", "still here"));
        assert_eq!(received_text(&mut rx2).as_deref(), Some("still here"));
    }

    #[test]
    fn dropping_registration_unregisters() {
        let registry = ConnectionRegistry::new();
        let (reg, _rx) = registry.register("pat", ChannelKind::EventStream, ChannelScope::Identity);
        assert!(registry.is_reachable("pat"));
        drop(reg);
        assert!(!registry.is_reachable("pat"));
        assert_eq!(registry.total_connections(), 0);
    }

    #[test]
    fn dispatch_without_channels_is_noop() {
        let registry = ConnectionRegistry::new();
        assert_eq!(registry.dispatch(&message("doc", "pat", "nobody home")), 0);
    }

    #[test]
    fn pair_scope_filters_other_peers() {
        let registry = ConnectionRegistry::new();
        let (_with_doc, mut rx_doc) = registry.register(
            "pat",
            ChannelKind::EventStream,
            ChannelScope::Pair("doc".into()),
        );
        let (_with_other, mut rx_other) = registry.register(
            "pat",
            ChannelKind::EventStream,
            ChannelScope::Pair("pharm".into()),
        );

        assert_eq!(registry.dispatch(&message("doc", "pat", "Hello")), 1);
        assert_eq!(received_text(&mut rx_doc).as_deref(), Some("Hello"));
        assert!(received_text(&mut rx_other).is_none());
    }

    #[test]
    fn rescope_changes_what_is_received() {
        let registry = ConnectionRegistry::new();
        let (reg, mut rx) = registry.register("pat", ChannelKind::Live, ChannelScope::Identity);

        assert!(reg.rescope(ChannelScope::Pair("doc".into())));
        registry.dispatch(&message("pharm", "pat", "ignored"));
        registry.dispatch(&message("doc", "pat", "kept"));
        assert_eq!(received_text(&mut rx).as_deref(), Some("kept"));
        assert!(received_text(&mut rx).is_none());

        assert!(reg.rescope(ChannelScope::Identity));
        registry.dispatch(&message("pharm", "pat", "now visible"));
        assert_eq!(received_text(&mut rx).as_deref(), Some("now visible"));
    }

    #[test]
    fn typing_respects_scope() {
        let registry = ConnectionRegistry::new();
        let (_bound, mut rx_bound) =
            registry.register("pat", ChannelKind::Live, ChannelScope::Pair("doc".into()));
        let (_broad, mut rx_broad) =
            registry.register("pat", ChannelKind::Live, ChannelScope::Identity);

        assert_eq!(registry.notify_typing("pharm", "pat"), 1);
        assert!(received_text(&mut rx_bound).is_none());
        assert_eq!(received_text(&mut rx_broad).as_deref(), Some("typing:pharm"));
    }

    #[test]
    fn closed_receiver_is_swallowed() {
        let registry = ConnectionRegistry::new();
        let (_reg, rx) = registry.register("pat", ChannelKind::Live, ChannelScope::Identity);
        drop(rx);
        assert_eq!(registry.dispatch(&message("doc", "pat", "lost push")), 0);
    }

    #[test]
    fn full_buffer_drops_excess_without_blocking() {
        let registry = ConnectionRegistry::new();
        let (_reg, mut rx) = registry.register("pat", ChannelKind::Live, ChannelScope::Identity);

        for i in 0..CHANNEL_BUFFER + 5 {
            registry.dispatch(&message("doc", "pat", &format!("m{i}")));
        }
        let mut count = 0;
        while rx.try_recv().is_ok() {
            count += 1;
        }
        assert_eq!(count, CHANNEL_BUFFER);
    }

    #[test]
    fn reset_clears_everything() {
        let registry = ConnectionRegistry::new();
        let (_a, mut rx) = registry.register("pat", ChannelKind::Live, ChannelScope::Identity);
        let (_b, _rx2) = registry.register("doc", ChannelKind::Live, ChannelScope::Identity);

        registry.reset();
        assert_eq!(registry.total_connections(), 0);
        assert!(matches!(
            rx.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }
}
