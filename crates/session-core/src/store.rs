//! Session state store: the participant view the UI renders.
//!
//! Holds metadata and flags only. Connection objects live in the mesh.

use chrono::{DateTime, Utc};
use common::types::{MediaFlags, ParticipantId, Role, UserId};
use signal_protocol::ParticipantAnnouncement;
use std::collections::BTreeMap;

/// A remote member of the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    pub id: ParticipantId,
    pub name: String,
    pub role: Role,
    pub user_id: Option<UserId>,
    pub flags: MediaFlags,
}

impl From<ParticipantAnnouncement> for Participant {
    fn from(announcement: ParticipantAnnouncement) -> Self {
        Self {
            id: announcement.participant_id,
            name: announcement.name,
            role: announcement.role,
            user_id: announcement.user_id,
            flags: announcement.flags,
        }
    }
}

/// Remote participants keyed by connection id, plus session timing.
#[derive(Debug, Default)]
pub struct SessionStateStore {
    participants: BTreeMap<ParticipantId, Participant>,
    started_at: Option<DateTime<Utc>>,
}

impl SessionStateStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.participants.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    #[must_use]
    pub fn get(&self, id: &ParticipantId) -> Option<&Participant> {
        self.participants.get(id)
    }

    #[must_use]
    pub fn contains(&self, id: &ParticipantId) -> bool {
        self.participants.contains_key(id)
    }

    /// Participants ordered by connection id.
    pub fn participants(&self) -> impl Iterator<Item = &Participant> {
        self.participants.values()
    }

    /// Add a participant unless already present. Returns `true` if added.
    pub fn insert_if_absent(&mut self, participant: Participant) -> bool {
        if self.participants.contains_key(&participant.id) {
            return false;
        }
        self.participants.insert(participant.id.clone(), participant);
        true
    }

    /// Refresh name and role from a signal envelope.
    pub fn update_identity(&mut self, id: &ParticipantId, name: &str, role: Role) {
        if let Some(participant) = self.participants.get_mut(id) {
            if !name.is_empty() {
                participant.name = name.to_string();
            }
            participant.role = role;
        }
    }

    /// Apply a broadcast flag set.
    ///
    /// Hand state travels on its own event, so it is kept as stored.
    /// Returns `false` for unknown participants.
    pub fn apply_stream_state(&mut self, id: &ParticipantId, flags: MediaFlags) -> bool {
        let Some(participant) = self.participants.get_mut(id) else {
            return false;
        };
        participant.flags = MediaFlags {
            hand_raised: participant.flags.hand_raised,
            ..flags
        };
        true
    }

    /// Returns `false` for unknown participants.
    pub fn set_hand_raised(&mut self, id: &ParticipantId, raised: bool) -> bool {
        let Some(participant) = self.participants.get_mut(id) else {
            return false;
        };
        participant.flags.hand_raised = raised;
        true
    }

    pub fn remove(&mut self, id: &ParticipantId) -> Option<Participant> {
        self.participants.remove(id)
    }

    /// Drop every participant. Session timing is kept.
    pub fn clear(&mut self) {
        self.participants.clear();
    }

    #[must_use]
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn set_started_at(&mut self, started_at: DateTime<Utc>) {
        self.started_at = Some(started_at);
    }

    /// Time since the session started, as of `now`. Never negative.
    #[must_use]
    pub fn elapsed(&self, now: DateTime<Utc>) -> Option<chrono::Duration> {
        self.started_at
            .map(|start| (now - start).max(chrono::Duration::zero()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn participant(id: &str) -> Participant {
        Participant {
            id: ParticipantId::new(id),
            name: format!("user-{id}"),
            role: Role::Student,
            user_id: None,
            flags: MediaFlags::default(),
        }
    }

    #[test]
    fn test_insert_is_idempotent() {
        let mut store = SessionStateStore::new();
        assert!(store.insert_if_absent(participant("a1")));

        let mut renamed = participant("a1");
        renamed.name = "other".to_string();
        assert!(!store.insert_if_absent(renamed));

        assert_eq!(store.len(), 1);
        assert_eq!(store.get(&ParticipantId::new("a1")).unwrap().name, "user-a1");
    }

    #[test]
    fn test_stream_state_keeps_hand_raised() {
        let mut store = SessionStateStore::new();
        store.insert_if_absent(participant("a1"));
        let id = ParticipantId::new("a1");

        assert!(store.set_hand_raised(&id, true));
        assert!(store.apply_stream_state(
            &id,
            MediaFlags {
                video_on: true,
                audio_on: true,
                ..MediaFlags::default()
            }
        ));

        let flags = store.get(&id).unwrap().flags;
        assert!(flags.video_on);
        assert!(flags.hand_raised);
    }

    #[test]
    fn test_updates_for_unknown_participants_are_ignored() {
        let mut store = SessionStateStore::new();
        let ghost = ParticipantId::new("ghost");
        assert!(!store.apply_stream_state(&ghost, MediaFlags::default()));
        assert!(!store.set_hand_raised(&ghost, true));
        assert!(store.remove(&ghost).is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_participants_are_ordered() {
        let mut store = SessionStateStore::new();
        for id in ["c3", "a1", "b2"] {
            store.insert_if_absent(participant(id));
        }
        let ids: Vec<_> = store.participants().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["a1", "b2", "c3"]);
    }

    #[test]
    fn test_clear_keeps_start_time() {
        let mut store = SessionStateStore::new();
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
        store.set_started_at(start);
        store.insert_if_absent(participant("a1"));

        store.clear();
        assert!(store.is_empty());
        assert_eq!(store.started_at(), Some(start));
    }

    #[test]
    fn test_elapsed() {
        let mut store = SessionStateStore::new();
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
        assert!(store.elapsed(start).is_none());

        store.set_started_at(start);
        let later = start + chrono::Duration::minutes(90);
        assert_eq!(store.elapsed(later), Some(chrono::Duration::minutes(90)));
        assert_eq!(
            store.elapsed(start - chrono::Duration::seconds(5)),
            Some(chrono::Duration::zero())
        );
    }
}
