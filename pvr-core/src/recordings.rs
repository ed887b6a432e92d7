use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;

use crate::clients::ClientSet;
use crate::models::EpgTag;
use crate::models::Recording;

/// Recordings collected from backend clients.
#[derive(Clone, Debug, Default)]
pub struct SharedRecordings {
    recordings: Arc<Mutex<Vec<Arc<Recording>>>>,
}

impl SharedRecordings {
    pub fn new() -> Self {
        Default::default()
    }

    /// Reloads recordings from the clients.
    ///
    /// Recordings of clients which failed to respond are kept.  Returns
    /// `true` if the recordings changed.
    pub async fn update_from(&self, clients: &ClientSet) -> bool {
        let (fetched, failed) = clients.list_recordings().await;
        let mut recordings = self.lock_recordings();
        let mut merged: Vec<Arc<Recording>> = recordings
            .iter()
            .filter(|recording| failed.contains(&recording.client_id))
            .cloned()
            .collect();
        merged.extend(fetched.into_iter().map(Arc::new));
        merged.sort_by(|a, b| {
            (a.start, a.client_id, &a.id).cmp(&(b.start, b.client_id, &b.id))
        });
        if *recordings == merged {
            return false;
        }
        tracing::debug!(num_recordings = merged.len(), "Updated");
        *recordings = merged;
        true
    }

    pub fn all(&self) -> Vec<Arc<Recording>> {
        self.lock_recordings().clone()
    }

    pub fn recording_for_epg_tag(&self, tag: &EpgTag) -> Option<Arc<Recording>> {
        self.lock_recordings()
            .iter()
            .find(|recording| {
                recording.channel == Some(tag.channel)
                    && match recording.epg_uid {
                        Some(uid) => uid == tag.uid,
                        None => recording.start == tag.start && recording.end == tag.end,
                    }
            })
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.lock_recordings().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock_recordings().is_empty()
    }

    pub fn clear(&self) {
        self.lock_recordings().clear();
    }

    fn lock_recordings(&self) -> MutexGuard<'_, Vec<Arc<Recording>>> {
        self.recordings
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

// <coverage:exclude>
#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::stub::ClientStub;
    use crate::models::ChannelId;
    use crate::models::ClientId;
    use pretty_assertions::assert_eq;

    fn recording(client: i32, id: &str, channel: u32, uid: Option<u32>) -> Recording {
        Recording {
            client_id: ClientId::new(client),
            id: id.to_string(),
            title: id.to_string(),
            channel: Some(ChannelId::new(channel)),
            start: datetime!("2026-01-01T00:00:00Z"),
            end: datetime!("2026-01-01T01:00:00Z"),
            epg_uid: uid,
        }
    }

    #[tokio::test]
    async fn test_update_from_keeps_failed_clients() {
        let client1 = ClientStub::new(1);
        client1.set_recordings(vec![recording(1, "a", 1, None)]);
        let client2 = ClientStub::new(2);
        client2.set_recordings(vec![recording(2, "b", 2, None)]);
        let clients = ClientSet::new([client1.clone().into_dyn(), client2.clone().into_dyn()]);

        let recordings = SharedRecordings::new();
        assert!(recordings.update_from(&clients).await);
        assert_eq!(recordings.len(), 2);
        assert!(!recordings.update_from(&clients).await);

        client2.set_available(false);
        client1.set_recordings(vec![]);
        assert!(recordings.update_from(&clients).await);
        let ids: Vec<_> = recordings.all().iter().map(|r| r.id.clone()).collect();
        assert_eq!(ids, vec!["b"]);

        recordings.clear();
        assert!(recordings.is_empty());
    }

    #[tokio::test]
    async fn test_recording_for_epg_tag() {
        let client = ClientStub::new(1);
        client.set_recordings(vec![
            recording(1, "a", 1, Some(100)),
            recording(1, "b", 2, None),
        ]);
        let clients = ClientSet::new([client.into_dyn()]);
        let recordings = SharedRecordings::new();
        recordings.update_from(&clients).await;

        let start = datetime!("2026-01-01T00:00:00Z");
        let tag = epg_tag!(100, 1, start, "1h");
        assert_eq!(recordings.recording_for_epg_tag(&tag).unwrap().id, "a");

        let tag = epg_tag!(200, 2, start, "1h");
        assert_eq!(recordings.recording_for_epg_tag(&tag).unwrap().id, "b");

        let tag = epg_tag!(300, 1, start, "1h");
        assert!(recordings.recording_for_epg_tag(&tag).is_none());
    }
}
// </coverage:exclude>
