use std::cmp::Ordering;
use std::collections::HashSet;

use crate::server::ConnectionId;

const ROOM_KEY_DELIMITER: char = '_';

/// Canonical room key for a conversation between two participants.
///
/// Both identifiers are trimmed, sorted and joined with `_`, so either side
/// computes the same key without a lookup. Sorting compares UTF-16 code
/// units, the order browsers use for `Array.prototype.sort`.
pub fn room_key(a: &str, b: &str) -> String {
    let (a, b) = (a.trim(), b.trim());
    let (first, second) = match a.encode_utf16().cmp(b.encode_utf16()) {
        Ordering::Greater => (b, a),
        _ => (a, b),
    };
    format!("{first}{ROOM_KEY_DELIMITER}{second}")
}

#[derive(Clone, Debug)]
pub struct Room {
    key: String,
    members: HashSet<ConnectionId>,
}

impl Room {
    pub fn new(key: impl Into<String>) -> Self {
        Room {
            key: key.into(),
            members: HashSet::new(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Returns `false` if the connection was already a member.
    pub fn join(&mut self, connection_id: ConnectionId) -> bool {
        self.members.insert(connection_id)
    }

    pub fn leave(&mut self, connection_id: &ConnectionId) -> bool {
        self.members.remove(connection_id)
    }

    pub fn members(&self) -> impl Iterator<Item = &ConnectionId> {
        self.members.iter()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}
