use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;

use crate::error::Error;
use crate::models::ClientId;
use crate::models::Recording;
use crate::models::Timer;
use crate::models::TimerOperationResult;

/// A backend providing timers and recordings.
///
/// Errors are reported per call.  Each call is scoped to this backend.
#[async_trait]
pub trait PvrClient: Send + Sync {
    fn id(&self) -> ClientId;
    fn name(&self) -> &str;
    async fn list_timers(&self) -> Result<Vec<Timer>, Error>;
    async fn list_recordings(&self) -> Result<Vec<Recording>, Error>;
    async fn add_timer(&self, timer: &Timer) -> Result<(), Error>;
    async fn delete_timer(
        &self,
        timer: &Timer,
        force: bool,
        cascade: bool,
    ) -> Result<TimerOperationResult, Error>;
    async fn rename_timer(&self, timer: &Timer, name: &str) -> Result<(), Error>;
    async fn update_timer(&self, timer: &Timer) -> Result<(), Error>;
}

/// Backend clients ordered by their ids.
#[derive(Clone, Default)]
pub struct ClientSet {
    clients: Arc<IndexMap<ClientId, Arc<dyn PvrClient>>>,
}

impl ClientSet {
    pub fn new<I>(clients: I) -> Self
    where
        I: IntoIterator<Item = Arc<dyn PvrClient>>,
    {
        let mut clients: IndexMap<ClientId, Arc<dyn PvrClient>> = clients
            .into_iter()
            .map(|client| (client.id(), client))
            .collect();
        clients.sort_keys();
        ClientSet {
            clients: Arc::new(clients),
        }
    }

    pub fn get(&self, id: ClientId) -> Result<Arc<dyn PvrClient>, Error> {
        self.clients
            .get(&id)
            .cloned()
            .ok_or(Error::ClientNotFound(id))
    }

    pub fn ids(&self) -> Vec<ClientId> {
        self.clients.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Collects timers from all clients.
    ///
    /// Returns the collected timers and the ids of clients which failed.
    pub async fn list_timers(&self) -> (Vec<Timer>, Vec<ClientId>) {
        let mut timers = vec![];
        let mut failed = vec![];
        for (&id, client) in self.clients.iter() {
            match client.list_timers().await {
                Ok(list) => {
                    tracing::trace!(client.id = %id, num_timers = list.len());
                    // Entries always belong to the client which provides them.
                    timers.extend(list.into_iter().map(|mut timer| {
                        timer.client_id = id;
                        timer.id = None;
                        timer
                    }));
                }
                Err(err) => {
                    tracing::warn!(%err, client.id = %id, client.name = client.name(), "Failed to list timers");
                    failed.push(id);
                }
            }
        }
        (timers, failed)
    }

    /// Collects recordings from all clients.
    ///
    /// Returns the collected recordings and the ids of clients which failed.
    pub async fn list_recordings(&self) -> (Vec<Recording>, Vec<ClientId>) {
        let mut recordings = vec![];
        let mut failed = vec![];
        for (&id, client) in self.clients.iter() {
            match client.list_recordings().await {
                Ok(list) => {
                    tracing::trace!(client.id = %id, num_recordings = list.len());
                    recordings.extend(list.into_iter().map(|mut recording| {
                        recording.client_id = id;
                        recording
                    }));
                }
                Err(err) => {
                    tracing::warn!(%err, client.id = %id, client.name = client.name(), "Failed to list recordings");
                    failed.push(id);
                }
            }
        }
        (recordings, failed)
    }
}

// <coverage:exclude>
#[cfg(test)]
mod tests {
    use super::*;
    use super::stub::*;
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_client_set_ordered_by_id() {
        let clients = ClientSet::new([
            ClientStub::new(3).into_dyn(),
            ClientStub::new(1).into_dyn(),
            ClientStub::new(2).into_dyn(),
        ]);
        assert_eq!(
            clients.ids(),
            vec![ClientId::new(1), ClientId::new(2), ClientId::new(3)]
        );
        assert!(clients.get(ClientId::new(2)).is_ok());
        assert_matches!(clients.get(ClientId::new(4)).err(), Some(Error::ClientNotFound(id)) => {
            assert_eq!(id, ClientId::new(4));
        });
    }

    #[tokio::test]
    async fn test_list_timers_collects_failed_clients() {
        let start = datetime!("2026-01-01T00:00:00Z");
        let client1 = ClientStub::new(1);
        client1.set_timers(vec![timer!(1, 1, start), timer!(1, 2, start)]);
        let client2 = ClientStub::new(2);
        client2.set_timers(vec![timer!(2, 1, start)]);
        client2.set_available(false);
        let client3 = ClientStub::new(3);
        // Wrong client id must be corrected.
        client3.set_timers(vec![timer!(9, 1, start)]);

        let clients = ClientSet::new([
            client1.into_dyn(),
            client2.into_dyn(),
            client3.into_dyn(),
        ]);
        let (timers, failed) = clients.list_timers().await;
        let keys: Vec<_> = timers.iter().map(|timer| timer.key()).collect();
        assert_eq!(keys, vec![key!(1, 1), key!(1, 2), key!(3, 1)]);
        assert_eq!(failed, vec![ClientId::new(2)]);
    }
}

// </coverage:exclude>
