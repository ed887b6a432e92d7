use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;

use crate::error::Error;
use crate::models::Channel;
use crate::models::ChannelGroup;
use crate::models::EpgTag;

/// Provides channels and programs.
#[async_trait]
pub trait EpgSource: Send + Sync {
    async fn channel_groups(&self) -> Result<Vec<ChannelGroup>, Error>;

    async fn channels_in_group(&self, group: &ChannelGroup) -> Result<Vec<Channel>, Error>;

    /// Returns programs of the channel overlapping with `[from, to]`, sorted
    /// by the start time.
    async fn epg_entries_for_channel(
        &self,
        channel: &Channel,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<EpgTag>, Error>;
}

// <coverage:exclude>
#[cfg(test)]
pub(crate) mod stub {
    use super::*;
    use std::collections::HashMap;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicBool;
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;

    use crate::models::ChannelGroupId;
    use crate::models::ChannelId;

    #[derive(Clone, Default)]
    pub(crate) struct EpgSourceStub {
        inner: Arc<EpgSourceStubInner>,
    }

    #[derive(Default)]
    struct EpgSourceStubInner {
        unavailable: AtomicBool,
        groups: Mutex<Vec<ChannelGroup>>,
        channels: Mutex<HashMap<ChannelGroupId, Vec<Channel>>>,
        entries: Mutex<HashMap<ChannelId, Vec<EpgTag>>>,
        failing_channels: Mutex<HashSet<ChannelId>>,
        num_fetches: AtomicUsize,
    }

    impl EpgSourceStub {
        pub(crate) fn new() -> Self {
            Default::default()
        }

        pub(crate) fn set_unavailable(&self, unavailable: bool) {
            self.inner.unavailable.store(unavailable, Ordering::SeqCst);
        }

        pub(crate) fn add_group(&self, group: ChannelGroup, channels: Vec<Channel>) {
            self.inner.channels.lock().unwrap().insert(group.id, channels);
            self.inner.groups.lock().unwrap().push(group);
        }

        pub(crate) fn set_entries(&self, channel: u32, entries: Vec<EpgTag>) {
            self.inner
                .entries
                .lock()
                .unwrap()
                .insert(ChannelId::new(channel), entries);
        }

        pub(crate) fn fail_channel(&self, channel: u32) {
            self.inner
                .failing_channels
                .lock()
                .unwrap()
                .insert(ChannelId::new(channel));
        }

        pub(crate) fn num_fetches(&self) -> usize {
            self.inner.num_fetches.load(Ordering::SeqCst)
        }

        fn check_available(&self) -> Result<(), Error> {
            if self.inner.unavailable.load(Ordering::SeqCst) {
                Err(anyhow::anyhow!("epg source unavailable").into())
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl EpgSource for EpgSourceStub {
        async fn channel_groups(&self) -> Result<Vec<ChannelGroup>, Error> {
            self.check_available()?;
            Ok(self.inner.groups.lock().unwrap().clone())
        }

        async fn channels_in_group(&self, group: &ChannelGroup) -> Result<Vec<Channel>, Error> {
            self.check_available()?;
            Ok(self
                .inner
                .channels
                .lock()
                .unwrap()
                .get(&group.id)
                .cloned()
                .unwrap_or_default())
        }

        async fn epg_entries_for_channel(
            &self,
            channel: &Channel,
            from: DateTime<Utc>,
            to: DateTime<Utc>,
        ) -> Result<Vec<EpgTag>, Error> {
            self.check_available()?;
            self.inner.num_fetches.fetch_add(1, Ordering::SeqCst);
            if self.inner.failing_channels.lock().unwrap().contains(&channel.id) {
                return Err(anyhow::anyhow!("channel#{} broken", channel.id).into());
            }
            let entries = self
                .inner
                .entries
                .lock()
                .unwrap()
                .get(&channel.id)
                .map(|entries| {
                    entries
                        .iter()
                        .filter(|tag| tag.end > from && tag.start < to)
                        .cloned()
                        .collect()
                })
                .unwrap_or_default();
            Ok(entries)
        }
    }
}
// </coverage:exclude>
