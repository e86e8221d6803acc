//! Contact list aggregation.
//!
//! A peer is a contact of the viewer as soon as one message exists between
//! them, whoever sent it. Each contact carries the single most recent message
//! of the pair and the viewer-relative direction of that message.

use std::cmp::Ordering;

use crate::db::{DatabaseError, MessageStore};
use crate::models::{Contact, LastMessage, UserProfile};

/// Build the viewer's contact list, most recent conversation first.
pub fn aggregate_contacts(
    store: &dyn MessageStore,
    viewer: &str,
) -> Result<Vec<Contact>, DatabaseError> {
    let peers = store.peers_of(viewer)?;
    let mut contacts = Vec::with_capacity(peers.len());

    for peer_id in peers {
        let last_message = store
            .latest_between(viewer, &peer_id)?
            .map(|msg| LastMessage {
                direction: msg.direction_for(viewer),
                content: msg.content,
                timestamp: msg.created_at,
                seq: msg.seq,
            });
        let profile = store.profile(&peer_id)?;
        contacts.push(build_contact(peer_id, profile, last_message));
    }

    sort_contacts(&mut contacts);
    Ok(contacts)
}

fn build_contact(
    peer_id: String,
    profile: Option<UserProfile>,
    last_message: Option<LastMessage>,
) -> Contact {
    match profile {
        Some(p) => Contact {
            peer_id,
            display_name: p.display_name,
            avatar_ref: p.avatar_ref,
            role: Some(p.role),
            last_message,
        },
        None => Contact {
            display_name: peer_id.clone(),
            peer_id,
            avatar_ref: None,
            role: None,
            last_message,
        },
    }
}

/// Descending by last message `(timestamp, seq)`, contacts without one last,
/// ties by peer id.
pub fn sort_contacts(contacts: &mut [Contact]) {
    contacts.sort_by(|a, b| {
        let recency = match (&a.last_message, &b.last_message) {
            (Some(x), Some(y)) => (y.timestamp, y.seq).cmp(&(x.timestamp, x.seq)),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        };
        recency.then_with(|| a.peer_id.cmp(&b.peer_id))
    });
}
