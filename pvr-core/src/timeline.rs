use std::cmp::Ordering;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::Weak;
use std::sync::atomic;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::time::Duration;

use chrono::DateTime;
use chrono::Utc;
use itertools::Itertools;
use serde::Deserialize;
use serde::Serialize;
use tokio::sync::Notify;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::config::GuideConfig;
use crate::epg::EpgSource;
use crate::error::Error;
use crate::events::EventBus;
use crate::events::PvrEvent;
use crate::events::SubscriberId;
use crate::manager::StateCell;
use crate::models::Channel;
use crate::models::ChannelGroup;
use crate::models::ChannelId;
use crate::models::EpgTag;
use crate::models::Recording;
use crate::models::Timer;
use crate::recordings::SharedRecordings;
use crate::timers::SharedTimers;

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TimelineSort {
    #[default]
    ChannelNumber,
    ChannelName,
    LastPlayed,
}

impl TimelineSort {
    fn compare(&self, a: &Channel, b: &Channel) -> Ordering {
        let ordering = match self {
            Self::ChannelNumber => a.number.cmp(&b.number),
            Self::ChannelName => a.name.cmp(&b.name).then(a.number.cmp(&b.number)),
            // Recently played first, never played last.
            Self::LastPlayed => {
                let ordering = match (a.last_played, b.last_played) {
                    (Some(a), Some(b)) => b.cmp(&a),
                    (Some(_), None) => Ordering::Less,
                    (None, Some(_)) => Ordering::Greater,
                    (None, None) => Ordering::Equal,
                };
                ordering.then(a.number.cmp(&b.number))
            }
        };
        ordering.then(a.id.cmp(&b.id))
    }
}

/// An entry in the guide grid.
///
/// `epg` is `None` for a gap entry.
#[derive(Clone, Debug, PartialEq)]
pub struct TimelineItem {
    pub channel: Arc<Channel>,
    pub epg: Option<EpgTag>,
}

impl TimelineItem {
    fn gap(channel: Arc<Channel>) -> Self {
        TimelineItem { channel, epg: None }
    }

    pub fn is_gap(&self) -> bool {
        self.epg.is_none()
    }
}

/// An immutable timeline handed over to the display surface.
#[derive(Debug)]
pub struct TimelineSnapshot {
    pub items: Vec<TimelineItem>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimelineSnapshot {
    fn new(items: Vec<TimelineItem>, now: DateTime<Utc>, horizon: &Horizon) -> Self {
        let first = items.iter().filter_map(|item| item.epg.as_ref()).map(|tag| tag.start).min();
        let last = items.iter().filter_map(|item| item.epg.as_ref()).map(|tag| tag.end).max();
        let (start, end) = timeline_window(first, last, now, horizon);
        TimelineSnapshot { items, start, end }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn num_gaps(&self) -> usize {
        self.items.iter().filter(|item| item.is_gap()).count()
    }
}

#[derive(Clone, Copy, Debug)]
pub struct Horizon {
    pub past: chrono::Duration,
    pub future: chrono::Duration,
}

impl Horizon {
    pub fn from_config(config: &GuideConfig) -> Self {
        Horizon {
            past: config.past_horizon(),
            future: config.future_horizon(),
        }
    }
}

/// Computes the window of a timeline from the range of its EPG data.
///
/// The window collapses to `[now, now]` when there is no EPG data.
pub fn timeline_window(
    first: Option<DateTime<Utc>>,
    last: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    horizon: &Horizon,
) -> (DateTime<Utc>, DateTime<Utc>) {
    match (first, last) {
        (Some(first), Some(last)) => (
            first.max(now - horizon.past),
            last.min(now + horizon.future),
        ),
        _ => (now, now),
    }
}

/// Chooses the sleep interval between refresh cycles.
#[derive(Debug)]
pub struct Pacer {
    boosted: Duration,
    steady: Duration,
    threshold: usize,
    last_count: Option<usize>,
    unchanged: usize,
}

impl Pacer {
    pub fn new(config: &GuideConfig) -> Self {
        Pacer {
            boosted: config.boosted_interval,
            steady: config.steady_interval,
            threshold: config.boosted_threshold,
            last_count: None,
            unchanged: 0,
        }
    }

    /// Records the number of items built in a cycle.
    pub fn record(&mut self, count: usize) {
        if self.last_count == Some(count) {
            self.unchanged = self.unchanged.saturating_add(1);
        } else {
            self.unchanged = 0;
        }
        self.last_count = Some(count);
    }

    pub fn interval(&self) -> Duration {
        if self.unchanged >= self.threshold {
            self.steady
        } else {
            self.boosted
        }
    }

    pub fn is_boosted(&self) -> bool {
        self.unchanged < self.threshold
    }
}

// display surface

/// The consumer of timelines.
#[cfg_attr(test, mockall::automock)]
pub trait DisplaySurface: Send + Sync {
    /// Called outside any lock held by the view.
    fn set_timeline(&self, snapshot: Arc<TimelineSnapshot>);

    fn has_data(&self) -> bool;

    fn selected_channel(&self) -> Option<ChannelId>;

    /// Returns `false` if the channel is not shown.
    fn select_channel(&self, channel: ChannelId) -> bool;
}

// timeline view

/// A guide view refreshing its timeline in background.
pub struct TimelineView {
    shared: Arc<Shared>,
    worker: Mutex<Option<Worker>>,
    bus: EventBus,
    subscription: SubscriberId,
}

struct Worker {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

struct Shared {
    config: Arc<Config>,
    epg: Arc<dyn EpgSource>,
    display: Arc<dyn DisplaySurface>,
    manager_state: StateCell,
    state: Mutex<ViewState>,
    // Serializes cycles between the worker and synchronous callers.
    building: tokio::sync::Mutex<()>,
    wake: Notify,
    // A deferred refresh has been requested.
    refresh: AtomicBool,
    // The next `fetch()` has to refresh synchronously.
    sync_refresh: AtomicBool,
    // Tickets of synchronous refresh requests.
    requested: AtomicU64,
    completed: watch::Sender<u64>,
}

#[derive(Default)]
struct ViewState {
    group: Option<ChannelGroup>,
    cached_group: Option<ChannelGroup>,
    new_timeline: Option<Arc<TimelineSnapshot>>,
    last_timeline: Option<Arc<TimelineSnapshot>>,
    first_build: bool,
    selected_channel: Option<ChannelId>,
}

impl TimelineView {
    pub fn new(
        config: Arc<Config>,
        epg: Arc<dyn EpgSource>,
        bus: &EventBus,
        manager_state: StateCell,
        display: Arc<dyn DisplaySurface>,
    ) -> Self {
        let (completed, _) = watch::channel(0);
        let shared = Arc::new(Shared {
            config,
            epg,
            display,
            manager_state,
            state: Mutex::new(ViewState {
                first_build: true,
                ..Default::default()
            }),
            building: Default::default(),
            wake: Notify::new(),
            refresh: AtomicBool::new(false),
            sync_refresh: AtomicBool::new(false),
            requested: AtomicU64::new(0),
            completed,
        });
        let subscription = {
            let shared = Arc::downgrade(&shared);
            bus.subscribe(move |event| {
                if let Some(shared) = Weak::upgrade(&shared) {
                    shared.notify_event(*event);
                }
            })
        };
        TimelineView {
            shared,
            worker: Default::default(),
            bus: bus.clone(),
            subscription,
        }
    }

    pub fn is_open(&self) -> bool {
        self.lock_worker().is_some()
    }

    /// Opens the view and starts the background refresh.
    pub async fn open(&self, group: ChannelGroup) {
        if self.is_open() {
            self.set_channel_group(group);
            return;
        }
        tracing::debug!(group.id = %group.id, "Open timeline view");
        let (kept, selected) = {
            let mut state = self.shared.lock_state();
            let kept = match state.cached_group {
                Some(ref cached) if *cached == group => state.last_timeline.clone(),
                _ => None,
            };
            state.group = Some(group);
            (kept, state.selected_channel)
        };

        if !self.shared.display.has_data() {
            match kept {
                Some(snapshot) => {
                    tracing::debug!("Reuse the last timeline");
                    self.shared.display.set_timeline(snapshot);
                }
                None => {
                    self.shared.run_cycle().await;
                }
            }
        }
        if let Some(channel) = selected {
            if !self.shared.display.select_channel(channel) {
                tracing::debug!(%channel, "Channel no longer shown");
            }
        }

        let token = CancellationToken::new();
        let handle = tokio::spawn(self.shared.clone().run(token.clone()));
        *self.lock_worker() = Some(Worker { token, handle });
    }

    /// Changes the active channel group.
    ///
    /// The next `fetch()` rebuilds the timeline synchronously.
    pub fn set_channel_group(&self, group: ChannelGroup) {
        let changed = {
            let mut state = self.shared.lock_state();
            let changed = state.group.as_ref() != Some(&group);
            state.group = Some(group);
            changed
        };
        if changed {
            self.shared.request_deferred_refresh();
        }
    }

    /// Takes the newest timeline built since the last call.
    pub async fn fetch(&self) -> Option<Arc<TimelineSnapshot>> {
        let group_changed = {
            let state = self.shared.lock_state();
            state.group.is_some() && state.cached_group != state.group
        };
        if group_changed {
            self.shared.sync_refresh.store(true, atomic::Ordering::SeqCst);
        }
        if self.shared.sync_refresh.swap(false, atomic::Ordering::SeqCst) {
            if !self.refresh_sync().await {
                tracing::warn!("Synchronous refresh timed out");
            }
        }
        self.shared.lock_state().new_timeline.take()
    }

    /// Requests a refresh.
    ///
    /// With `wait`, returns after a cycle started after this request has
    /// finished.  Returns `false` if the wait timed out.
    pub async fn request_refresh(&self, wait: bool) -> bool {
        if wait {
            self.refresh_sync().await
        } else {
            self.shared.request_deferred_refresh();
            true
        }
    }

    pub fn notify_event(&self, event: PvrEvent) {
        self.shared.notify_event(event);
    }

    /// Stops the background refresh.
    ///
    /// The last timeline and the selected channel are kept for `open()`.
    pub async fn close(&self) {
        let worker = self.lock_worker().take();
        let Some(worker) = worker else {
            return;
        };
        tracing::debug!("Close timeline view");
        let selected = self.shared.display.selected_channel();
        self.shared.lock_state().selected_channel = selected;
        worker.token.cancel();
        if let Err(err) = worker.handle.await {
            tracing::error!(%err, "Timeline worker failed");
        }
    }

    /// Drops the cached group and timelines.
    pub fn clear(&self) {
        let mut state = self.shared.lock_state();
        state.cached_group = None;
        state.new_timeline = None;
        state.last_timeline = None;
        state.first_build = true;
    }

    async fn refresh_sync(&self) -> bool {
        if !self.is_open() {
            self.shared.run_cycle().await;
            return true;
        }
        let ticket = self.shared.requested.fetch_add(1, atomic::Ordering::SeqCst) + 1;
        let mut completed = self.shared.completed.subscribe();
        self.shared.wake.notify_waiters();
        let timeout = self.shared.config.guide.sync_refresh_timeout;
        matches!(
            tokio::time::timeout(timeout, completed.wait_for(|done| *done >= ticket)).await,
            Ok(Ok(_))
        )
    }

    fn lock_worker(&self) -> MutexGuard<'_, Option<Worker>> {
        self.worker
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for TimelineView {
    fn drop(&mut self) {
        self.bus.unsubscribe(self.subscription);
        if let Some(worker) = self.lock_worker().take() {
            worker.token.cancel();
        }
    }
}

impl Shared {
    async fn run(self: Arc<Self>, token: CancellationToken) {
        tracing::debug!("Timeline worker started");
        let mut pacer = Pacer::new(&self.config.guide);
        loop {
            let covered = self.requested.load(atomic::Ordering::SeqCst);
            self.refresh.store(false, atomic::Ordering::SeqCst);
            if let Some(count) = self.run_cycle().await {
                pacer.record(count);
            }
            self.complete(covered);
            if token.is_cancelled() {
                break;
            }
            let notified = self.wake.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            // Requested while building.
            if self.refresh.load(atomic::Ordering::SeqCst)
                || self.requested.load(atomic::Ordering::SeqCst) > covered
            {
                continue;
            }
            let interval = pacer.interval();
            tokio::select! {
                _ = token.cancelled() => break,
                _ = &mut notified => (),
                _ = tokio::time::sleep(interval) => (),
            }
        }
        // Release all waiters.
        self.complete(self.requested.load(atomic::Ordering::SeqCst));
        tracing::debug!("Timeline worker stopped");
    }

    fn complete(&self, ticket: u64) {
        self.completed.send_if_modified(|done| {
            if *done < ticket {
                *done = ticket;
                true
            } else {
                false
            }
        });
    }

    // Returns the number of items, or `None` if nothing has been built.
    async fn run_cycle(&self) -> Option<usize> {
        let _building = self.building.lock().await;

        if !self.manager_state.get().is_active() {
            tracing::debug!(state = ?self.manager_state.get(), "Not active, skip");
            return None;
        }

        let (group, first_build) = {
            let mut state = self.lock_state();
            let first_build = state.first_build;
            state.first_build = false;
            (state.group.clone(), first_build)
        };
        let group = group?;

        let now = Utc::now();
        let horizon = Horizon::from_config(&self.config.guide);
        let items = match self.build_items(&group, first_build, now, &horizon).await {
            Ok(items) => items,
            Err(err) => {
                tracing::warn!(%err, group.id = %group.id, "Failed to build timeline");
                if first_build {
                    self.lock_state().first_build = true;
                }
                return None;
            }
        };
        if first_build {
            // Fetch EPG data in the next cycle.
            self.request_deferred_refresh();
        }

        let snapshot = Arc::new(TimelineSnapshot::new(items, now, &horizon));
        let count = snapshot.len();
        let elapsed = Utc::now() - now;
        tracing::debug!(
            group.id = %group.id,
            timeline.len = count,
            timeline.gaps = snapshot.num_gaps(),
            ?elapsed,
            "Built timeline",
        );
        self.display.set_timeline(snapshot.clone());

        let mut state = self.lock_state();
        state.new_timeline = Some(snapshot.clone());
        state.last_timeline = Some(snapshot);
        state.cached_group = Some(group);
        Some(count)
    }

    async fn build_items(
        &self,
        group: &ChannelGroup,
        first_build: bool,
        now: DateTime<Utc>,
        horizon: &Horizon,
    ) -> Result<Vec<TimelineItem>, Error> {
        let channels = self.epg.channels_in_group(group).await?;
        let channels = channels
            .into_iter()
            .filter(|channel| !channel.hidden)
            .map(Arc::new);

        if first_build {
            return Ok(self.sort_items(channels.map(TimelineItem::gap)));
        }

        let from = now - horizon.past;
        let to = now + horizon.future;
        let mut items = vec![];
        for channel in channels {
            match self.epg.epg_entries_for_channel(&channel, from, to).await {
                Ok(entries) if entries.is_empty() => items.push(TimelineItem::gap(channel)),
                Ok(entries) => items.extend(entries.into_iter().map(|tag| TimelineItem {
                    channel: channel.clone(),
                    epg: Some(tag),
                })),
                Err(err) => {
                    tracing::warn!(%err, channel.id = %channel.id, "Failed to fetch EPG entries");
                    items.push(TimelineItem::gap(channel));
                }
            }
        }
        Ok(self.sort_items(items))
    }

    fn sort_items<I>(&self, items: I) -> Vec<TimelineItem>
    where
        I: IntoIterator<Item = TimelineItem>,
    {
        let sort = self.config.guide.sort;
        items
            .into_iter()
            .sorted_by(|a, b| {
                sort.compare(&a.channel, &b.channel).then_with(|| {
                    let a = a.epg.as_ref().map(|tag| tag.start);
                    let b = b.epg.as_ref().map(|tag| tag.start);
                    a.cmp(&b)
                })
            })
            .collect()
    }

    fn request_deferred_refresh(&self) {
        self.refresh.store(true, atomic::Ordering::SeqCst);
        self.wake.notify_waiters();
    }

    fn notify_event(&self, event: PvrEvent) {
        match event {
            PvrEvent::Epg
            | PvrEvent::EpgContainer
            | PvrEvent::ChannelGroup
            | PvrEvent::ChannelGroupInvalidated => {
                tracing::debug!(%event, "Refresh timeline");
                self.request_deferred_refresh();
            }
            PvrEvent::ChannelPlaybackStopped
                if self.config.guide.sort == TimelineSort::LastPlayed =>
            {
                tracing::debug!(%event, "Refresh timeline synchronously");
                self.sync_refresh.store(true, atomic::Ordering::SeqCst);
                self.wake.notify_waiters();
            }
            _ => {}
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, ViewState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

// smart select

/// What to do when a program in the guide is selected.
#[derive(Clone, Debug, PartialEq)]
pub enum SmartSelect {
    SwitchToChannel,
    EditTimer(Arc<Timer>),
    /// Whether to record or to switch is up to the consumer.
    RecordOrSwitch,
    PlayRecording(Arc<Recording>),
    ShowInfo,
}

pub fn smart_select(
    tag: &EpgTag,
    now: DateTime<Utc>,
    timers: &SharedTimers,
    recordings: &SharedRecordings,
) -> SmartSelect {
    if tag.is_active_at(now) {
        SmartSelect::SwitchToChannel
    } else if tag.is_upcoming_at(now) {
        match timers.timer_for_epg_tag(tag) {
            Some(timer) => SmartSelect::EditTimer(timer),
            None => SmartSelect::RecordOrSwitch,
        }
    } else {
        match recordings.recording_for_epg_tag(tag) {
            Some(recording) => SmartSelect::PlayRecording(recording),
            None => SmartSelect::ShowInfo,
        }
    }
}

// <coverage:exclude>
#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::ClientSet;
    use crate::clients::stub::ClientStub;
    use crate::epg::stub::EpgSourceStub;
    use crate::manager::ManagerState;
    use crate::models::ChannelGroupId;
    use crate::models::ClientId;
    use assert_matches::assert_matches;
    use maplit::hashset;
    use pretty_assertions::assert_eq;
    use std::collections::HashSet;
    use test_log::test;

    macro_rules! group {
        ($id:expr) => {
            ChannelGroup {
                id: ChannelGroupId::new($id),
                name: format!("group#{}", $id),
                is_radio: false,
            }
        };
    }

    #[derive(Default)]
    struct DisplayStub {
        timelines: Mutex<Vec<Arc<TimelineSnapshot>>>,
        selected: Mutex<Option<ChannelId>>,
    }

    impl DisplayStub {
        fn count(&self) -> usize {
            self.timelines.lock().unwrap().len()
        }

        fn last(&self) -> Option<Arc<TimelineSnapshot>> {
            self.timelines.lock().unwrap().last().cloned()
        }

        fn reset(&self) {
            self.timelines.lock().unwrap().clear();
        }

        async fn wait_for(&self, count: usize) {
            let result = tokio::time::timeout(Duration::from_secs(5), async {
                while self.count() < count {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            })
            .await;
            assert!(result.is_ok(), "timed out waiting for {count} timelines");
        }
    }

    impl DisplaySurface for DisplayStub {
        fn set_timeline(&self, snapshot: Arc<TimelineSnapshot>) {
            self.timelines.lock().unwrap().push(snapshot);
        }

        fn has_data(&self) -> bool {
            self.count() > 0
        }

        fn selected_channel(&self) -> Option<ChannelId> {
            *self.selected.lock().unwrap()
        }

        fn select_channel(&self, channel: ChannelId) -> bool {
            *self.selected.lock().unwrap() = Some(channel);
            true
        }
    }

    struct Fixture {
        bus: EventBus,
        state: StateCell,
        epg: EpgSourceStub,
        config: Arc<Config>,
        group: ChannelGroup,
        now: DateTime<Utc>,
    }

    impl Fixture {
        fn new() -> Self {
            Self::with_sort(TimelineSort::ChannelNumber)
        }

        fn with_sort(sort: TimelineSort) -> Self {
            let bus = EventBus::new();
            let state = StateCell::new(bus.clone());
            state.transition(ManagerState::Starting).unwrap();
            state.transition(ManagerState::Started).unwrap();

            let now = Utc::now();
            let epg = EpgSourceStub::new();
            let group = group!(1);
            let mut hidden = channel!(4, 4, "ch4");
            hidden.hidden = true;
            epg.add_group(
                group.clone(),
                vec![
                    channel!(3, 3, "ch3"),
                    channel!(1, 1, "ch1"),
                    channel!(2, 2, "ch2"),
                    hidden,
                ],
            );
            epg.set_entries(
                1,
                vec![
                    epg_tag!(11, 1, now - chrono::Duration::minutes(30), "1h"),
                    epg_tag!(12, 1, now + chrono::Duration::minutes(30), "1h"),
                ],
            );
            epg.set_entries(4, vec![epg_tag!(41, 4, now, "1h")]);
            epg.fail_channel(3);
            epg.add_group(group!(2), vec![channel!(5, 5, "ch5")]);

            let mut config = Config::default();
            config.guide.boosted_interval = Duration::from_secs(3600);
            config.guide.steady_interval = Duration::from_secs(3600);
            config.guide.sort = sort;

            Fixture {
                bus,
                state,
                epg,
                config: Arc::new(config),
                group,
                now,
            }
        }

        fn view(&self, display: Arc<dyn DisplaySurface>) -> TimelineView {
            TimelineView::new(
                self.config.clone(),
                Arc::new(self.epg.clone()),
                &self.bus,
                self.state.clone(),
                display,
            )
        }
    }

    fn channel_ids(snapshot: &TimelineSnapshot) -> Vec<u32> {
        snapshot
            .items
            .iter()
            .map(|item| item.channel.id.value())
            .collect()
    }

    #[test]
    fn test_timeline_window() {
        let now = datetime!("2026-01-02T00:00:00Z");
        let horizon = Horizon {
            past: chrono::Duration::days(1),
            future: chrono::Duration::days(3),
        };

        assert_eq!(timeline_window(None, None, now, &horizon), (now, now));

        let first = datetime!("2026-01-01T12:00:00Z");
        let last = datetime!("2026-01-03T00:00:00Z");
        assert_eq!(
            timeline_window(Some(first), Some(last), now, &horizon),
            (first, last)
        );

        let first = datetime!("2025-12-01T00:00:00Z");
        let last = datetime!("2026-02-01T00:00:00Z");
        assert_eq!(
            timeline_window(Some(first), Some(last), now, &horizon),
            (
                datetime!("2026-01-01T00:00:00Z"),
                datetime!("2026-01-05T00:00:00Z")
            )
        );
    }

    #[test]
    fn test_pacer() {
        let mut config = GuideConfig::default();
        config.boosted_interval = Duration::from_secs(1);
        config.steady_interval = Duration::from_secs(5);
        config.boosted_threshold = 2;
        let mut pacer = Pacer::new(&config);
        assert_eq!(pacer.interval(), Duration::from_secs(1));

        pacer.record(10);
        assert!(pacer.is_boosted());
        pacer.record(10);
        assert!(pacer.is_boosted());
        pacer.record(10);
        assert!(!pacer.is_boosted());
        assert_eq!(pacer.interval(), Duration::from_secs(5));
        pacer.record(10);
        assert_eq!(pacer.interval(), Duration::from_secs(5));

        // Back to the boosted interval when the count changes.
        pacer.record(11);
        assert_eq!(pacer.interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_timeline_sort() {
        let mut a = channel!(1, 2, "b");
        let mut b = channel!(2, 1, "c");
        let c = channel!(3, 3, "a");
        a.last_played = Some(datetime!("2026-01-01T00:00:00Z"));
        b.last_played = Some(datetime!("2026-01-02T00:00:00Z"));

        let sorted = |sort: TimelineSort| -> Vec<u32> {
            [&a, &b, &c]
                .into_iter()
                .sorted_by(|x, y| sort.compare(x, y))
                .map(|channel| channel.id.value())
                .collect()
        };
        assert_eq!(sorted(TimelineSort::ChannelNumber), vec![2, 1, 3]);
        assert_eq!(sorted(TimelineSort::ChannelName), vec![3, 1, 2]);
        assert_eq!(sorted(TimelineSort::LastPlayed), vec![2, 1, 3]);
    }

    #[test(tokio::test)]
    async fn test_first_build_then_epg() {
        let fixture = Fixture::new();
        let display = Arc::new(DisplayStub::default());
        let view = fixture.view(display.clone());

        view.open(fixture.group.clone()).await;
        // Gaps are shown without fetching EPG data.
        assert!(display.count() >= 1);
        let first = display.timelines.lock().unwrap()[0].clone();
        assert_eq!(channel_ids(&first), vec![1, 2, 3]);
        assert_eq!(first.num_gaps(), 3);
        assert_eq!(first.start, first.end);

        display.wait_for(2).await;
        let snapshot = display.last().unwrap();
        assert_eq!(channel_ids(&snapshot), vec![1, 1, 2, 3]);
        assert_matches!(snapshot.items[0].epg, Some(ref tag) => assert_eq!(tag.uid, 11));
        assert_matches!(snapshot.items[1].epg, Some(ref tag) => assert_eq!(tag.uid, 12));
        // No entries or failed to fetch.
        let gaps: HashSet<u32> = snapshot
            .items
            .iter()
            .filter(|item| item.is_gap())
            .map(|item| item.channel.id.value())
            .collect();
        assert_eq!(gaps, hashset! {2, 3});
        assert_eq!(snapshot.start, fixture.now - chrono::Duration::minutes(30));
        assert_eq!(snapshot.end, fixture.now + chrono::Duration::minutes(90));

        view.close().await;
        assert!(!view.is_open());
    }

    #[test(tokio::test)]
    async fn test_fetch() {
        let fixture = Fixture::new();
        let display = Arc::new(DisplayStub::default());
        let view = fixture.view(display.clone());

        view.open(fixture.group.clone()).await;
        display.wait_for(2).await;
        assert!(view.request_refresh(true).await);
        let snapshot = view.fetch().await.unwrap();
        assert_eq!(snapshot.len(), 4);
        assert!(Arc::ptr_eq(&snapshot, &display.last().unwrap()));
        // Already taken.
        assert_matches!(view.fetch().await, None);

        view.close().await;
    }

    #[test(tokio::test)]
    async fn test_fetch_after_group_changed() {
        let fixture = Fixture::new();
        let display = Arc::new(DisplayStub::default());
        let view = fixture.view(display.clone());

        view.open(fixture.group.clone()).await;
        display.wait_for(2).await;

        view.set_channel_group(group!(2));
        let snapshot = view.fetch().await.unwrap();
        assert_eq!(channel_ids(&snapshot), vec![5]);

        view.close().await;
    }

    #[test(tokio::test)]
    async fn test_reopen_reuses_last_timeline() {
        let fixture = Fixture::new();
        let display = Arc::new(DisplayStub::default());
        let view = fixture.view(display.clone());

        view.open(fixture.group.clone()).await;
        display.wait_for(2).await;
        view.close().await;
        let last = display.last().unwrap();

        display.reset();
        view.open(fixture.group.clone()).await;
        let reused = display.timelines.lock().unwrap()[0].clone();
        assert!(Arc::ptr_eq(&reused, &last));
        view.close().await;

        // Built from scratch after clear().
        view.clear();
        display.reset();
        view.open(fixture.group.clone()).await;
        let rebuilt = display.timelines.lock().unwrap()[0].clone();
        assert_eq!(rebuilt.num_gaps(), 3);
        view.close().await;
    }

    #[test(tokio::test)]
    async fn test_reopen_restores_selection() {
        let fixture = Fixture::new();
        let mut display = MockDisplaySurface::new();
        display.expect_has_data().return_const(true);
        display.expect_set_timeline().return_const(());
        display
            .expect_selected_channel()
            .times(2)
            .return_const(Some(ChannelId::new(2)));
        display
            .expect_select_channel()
            .withf(|channel| *channel == ChannelId::new(2))
            .times(1)
            .return_const(true);
        let view = fixture.view(Arc::new(display));

        view.open(fixture.group.clone()).await;
        view.close().await;
        view.open(fixture.group.clone()).await;
        view.close().await;
    }

    #[test(tokio::test)]
    async fn test_inactive_manager() {
        let fixture = Fixture::new();
        fixture.state.transition(ManagerState::Stopping).unwrap();
        let display = Arc::new(DisplayStub::default());
        let view = fixture.view(display.clone());

        view.open(fixture.group.clone()).await;
        assert!(view.request_refresh(true).await);
        assert_matches!(view.fetch().await, None);
        assert_eq!(display.count(), 0);
        assert_eq!(fixture.epg.num_fetches(), 0);
        view.close().await;
    }

    #[test(tokio::test)]
    async fn test_refresh_on_events() {
        let fixture = Fixture::new();
        let display = Arc::new(DisplayStub::default());
        let view = fixture.view(display.clone());

        view.open(fixture.group.clone()).await;
        display.wait_for(2).await;
        assert!(view.request_refresh(true).await);

        let count = display.count();
        fixture.bus.publish(PvrEvent::Epg);
        display.wait_for(count + 1).await;

        let count = display.count();
        fixture.bus.publish(PvrEvent::ChannelGroupInvalidated);
        display.wait_for(count + 1).await;

        // Not related.
        fixture.bus.publish(PvrEvent::Timers);
        assert!(!view.shared.refresh.load(atomic::Ordering::SeqCst));
        view.close().await;
    }

    #[test(tokio::test)]
    async fn test_playback_stopped() {
        let fixture = Fixture::new();
        let view = fixture.view(Arc::new(DisplayStub::default()));
        view.notify_event(PvrEvent::ChannelPlaybackStopped);
        assert!(!view.shared.sync_refresh.load(atomic::Ordering::SeqCst));

        let fixture = Fixture::with_sort(TimelineSort::LastPlayed);
        let display = Arc::new(DisplayStub::default());
        let view = fixture.view(display.clone());
        fixture.bus.publish(PvrEvent::ChannelPlaybackStopped);
        assert!(view.shared.sync_refresh.load(atomic::Ordering::SeqCst));
        // Not opened yet, refreshed inline.
        view.set_channel_group(fixture.group.clone());
        assert_matches!(view.fetch().await, Some(_));
        assert!(!view.shared.sync_refresh.load(atomic::Ordering::SeqCst));
    }

    #[test(tokio::test)]
    async fn test_drop_unsubscribes() {
        let fixture = Fixture::new();
        let num_subscribers = fixture.bus.num_subscribers();
        let view = fixture.view(Arc::new(DisplayStub::default()));
        assert_eq!(fixture.bus.num_subscribers(), num_subscribers + 1);
        view.open(fixture.group.clone()).await;
        drop(view);
        assert_eq!(fixture.bus.num_subscribers(), num_subscribers);
    }

    #[test(tokio::test)]
    async fn test_smart_select() {
        let now = datetime!("2026-01-01T12:00:00Z");
        let live = epg_tag!(1, 1, now - chrono::Duration::minutes(10), "1h");
        let future = epg_tag!(2, 1, now + chrono::Duration::hours(1), "1h");
        let scheduled = epg_tag!(3, 1, now + chrono::Duration::hours(2), "1h");
        let past = epg_tag!(4, 1, now - chrono::Duration::hours(2), "1h");
        let recorded = epg_tag!(5, 1, now - chrono::Duration::hours(3), "1h");

        let timers = SharedTimers::new();
        let mut timer = timer!(1, 1, scheduled.start);
        timer.channel = Some(ChannelId::new(1));
        timer.epg_uid = Some(3);
        timers.write(|container| container.upsert(timer));

        let client = ClientStub::new(1);
        client.set_recordings(vec![Recording {
            client_id: ClientId::new(1),
            id: "rec#5".to_string(),
            title: "program#5".to_string(),
            channel: Some(ChannelId::new(1)),
            start: recorded.start,
            end: recorded.end,
            epg_uid: None,
        }]);
        let recordings = SharedRecordings::new();
        recordings
            .update_from(&ClientSet::new([client.into_dyn()]))
            .await;

        assert_eq!(
            smart_select(&live, now, &timers, &recordings),
            SmartSelect::SwitchToChannel
        );
        assert_eq!(
            smart_select(&future, now, &timers, &recordings),
            SmartSelect::RecordOrSwitch
        );
        assert_matches!(
            smart_select(&scheduled, now, &timers, &recordings),
            SmartSelect::EditTimer(timer) => assert_eq!(timer.key(), key!(1, 1))
        );
        assert_eq!(
            smart_select(&past, now, &timers, &recordings),
            SmartSelect::ShowInfo
        );
        assert_matches!(
            smart_select(&recorded, now, &timers, &recordings),
            SmartSelect::PlayRecording(recording) => assert_eq!(recording.id, "rec#5")
        );
    }
}
// </coverage:exclude>
