use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::time::Duration;

use actlet::prelude::*;
use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::clients::ClientSet;
use crate::config::Config;
use crate::epg::EpgSource;
use crate::error::Error;
use crate::events::EventBus;
use crate::events::PvrEvent;
use crate::events::SubscriberId;
use crate::jobs::Job;
use crate::jobs::JobQueue;
use crate::models::ChannelGroup;
use crate::models::ChannelId;
use crate::models::Timer;
use crate::models::TimerKey;
use crate::models::TimerOperationResult;
use crate::recordings::SharedRecordings;
use crate::timeline::DisplaySurface;
use crate::timeline::TimelineView;
use crate::timers;
use crate::timers::LocalTimerStore;
use crate::timers::ReminderQueue;
use crate::timers::SharedTimers;
use crate::timers::TimerSynchronizer;

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ManagerState {
    Error,
    Stopped,
    Starting,
    Stopping,
    Interrupted,
    Started,
}

impl ManagerState {
    /// PVR data can be accessed only in active states.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Starting | Self::Started | Self::Interrupted)
    }

    /// Timers are synchronized with clients only in these states.
    pub fn is_syncing(&self) -> bool {
        matches!(self, Self::Starting | Self::Started)
    }

    pub fn can_transition_to(&self, to: ManagerState) -> bool {
        use ManagerState::*;
        match (*self, to) {
            (Interrupted, Interrupted) => false,
            (_, Interrupted) => true,
            // Resuming restores the state before the interruption.
            (Interrupted, _) => true,
            (Stopped | Error, Starting) => true,
            (Starting, Started | Error) => true,
            (Error | Starting | Started, Stopping) => true,
            (Stopping, Stopped) => true,
            _ => false,
        }
    }

    fn event(&self) -> PvrEvent {
        match self {
            Self::Error => PvrEvent::ManagerError,
            Self::Stopped => PvrEvent::ManagerStopped,
            Self::Starting => PvrEvent::ManagerStarting,
            Self::Stopping => PvrEvent::ManagerStopping,
            Self::Interrupted => PvrEvent::ManagerInterrupted,
            Self::Started => PvrEvent::ManagerStarted,
        }
    }
}

/// The single accessor of the manager state.
///
/// Every accepted transition is published on the event bus after the state
/// has been updated.
#[derive(Clone)]
pub struct StateCell {
    sender: Arc<watch::Sender<ManagerState>>,
    bus: EventBus,
}

impl StateCell {
    pub fn new(bus: EventBus) -> Self {
        let (sender, _) = watch::channel(ManagerState::Stopped);
        StateCell {
            sender: Arc::new(sender),
            bus,
        }
    }

    pub fn get(&self) -> ManagerState {
        *self.sender.borrow()
    }

    /// Changes the state and returns the previous one.
    pub fn transition(&self, to: ManagerState) -> Result<ManagerState, Error> {
        let from = self.try_transition(to)?;
        self.publish(to);
        Ok(from)
    }

    /// Waits until the state satisfies `pred`.
    ///
    /// Returns `false` if the timeout elapsed.
    pub async fn wait_for<F>(&self, pred: F, timeout: Duration) -> bool
    where
        F: FnMut(&ManagerState) -> bool,
    {
        let mut receiver = self.sender.subscribe();
        matches!(
            tokio::time::timeout(timeout, receiver.wait_for(pred)).await,
            Ok(Ok(_))
        )
    }

    // Changes the state without publishing the event.
    fn try_transition(&self, to: ManagerState) -> Result<ManagerState, Error> {
        let mut from = to;
        let mut accepted = false;
        self.sender.send_if_modified(|state| {
            from = *state;
            accepted = state.can_transition_to(to);
            if accepted {
                *state = to;
            }
            accepted
        });
        if accepted {
            tracing::info!(state = ?to, prev = ?from, "State changed");
            Ok(from)
        } else {
            Err(Error::InvalidTransition { from, to })
        }
    }

    fn publish(&self, state: ManagerState) {
        self.bus.publish(state.event());
    }
}

/// Owns the lifecycle of the PVR components.
#[derive(Clone)]
pub struct PvrManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    config: Arc<Config>,
    clients: ClientSet,
    epg: Arc<dyn EpgSource>,
    bus: EventBus,
    jobs: JobQueue,
    state: StateCell,
    timers: SharedTimers,
    reminders: ReminderQueue,
    recordings: SharedRecordings,
    channel_groups: SharedChannelGroups,
    synchronizer: Address<TimerSynchronizer>,
    lifecycle: tokio::sync::Mutex<Option<Lifecycle>>,
    // The state before `on_sleep()`.
    interrupted: Mutex<Option<ManagerState>>,
    subscription: SubscriberId,
}

struct Lifecycle {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl PvrManager {
    pub async fn new<S: Spawn>(
        spawner: &S,
        config: Arc<Config>,
        clients: ClientSet,
        epg: Arc<dyn EpgSource>,
        store: Arc<dyn LocalTimerStore>,
    ) -> Self {
        let bus = EventBus::new();
        let jobs = JobQueue::new();
        let state = StateCell::new(bus.clone());
        let timers = SharedTimers::new();
        let reminders = ReminderQueue::new();
        let recordings = SharedRecordings::new();
        let channel_groups = SharedChannelGroups::default();

        let synchronizer = spawner
            .spawn_actor(TimerSynchronizer::new(
                config.clone(),
                state.clone(),
                clients.clone(),
                store,
                timers.clone(),
                reminders.clone(),
                bus.clone(),
            ))
            .await;

        let subscription = {
            let jobs = jobs.clone();
            let timers_job = UpdateTimersJob {
                synchronizer: synchronizer.clone(),
            };
            let channel_groups_job = UpdateChannelGroupsJob {
                epg: epg.clone(),
                channel_groups: channel_groups.clone(),
                bus: bus.clone(),
            };
            bus.subscribe(move |event| match event {
                PvrEvent::TimersInvalidated => {
                    jobs.submit(timers_job.clone());
                }
                PvrEvent::ChannelGroupsInvalidated => {
                    jobs.submit(channel_groups_job.clone());
                }
                _ => {}
            })
        };

        PvrManager {
            inner: Arc::new(ManagerInner {
                config,
                clients,
                epg,
                bus,
                jobs,
                state,
                timers,
                reminders,
                recordings,
                channel_groups,
                synchronizer,
                lifecycle: Default::default(),
                interrupted: Default::default(),
                subscription,
            }),
        }
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.inner.config
    }

    pub fn bus(&self) -> &EventBus {
        &self.inner.bus
    }

    pub fn jobs(&self) -> &JobQueue {
        &self.inner.jobs
    }

    pub fn epg(&self) -> &Arc<dyn EpgSource> {
        &self.inner.epg
    }

    pub fn state(&self) -> ManagerState {
        self.inner.state.get()
    }

    pub fn state_cell(&self) -> &StateCell {
        &self.inner.state
    }

    pub fn is_started(&self) -> bool {
        self.state() == ManagerState::Started
    }

    /// Starts loading data in background.
    ///
    /// The manager goes to `Started` when loading finishes successfully,
    /// otherwise `Error`.
    pub async fn start(&self) -> Result<(), Error> {
        let mut lifecycle = self.inner.lifecycle.lock().await;
        match self.state() {
            ManagerState::Starting | ManagerState::Started => {
                tracing::debug!("Already started");
                return Ok(());
            }
            ManagerState::Stopped | ManagerState::Error => (),
            state => {
                return Err(Error::InvalidTransition {
                    from: state,
                    to: ManagerState::Starting,
                });
            }
        }
        // A previous task which failed to load has already finished.
        if let Some(prev) = lifecycle.take() {
            prev.token.cancel();
            if let Err(err) = prev.handle.await {
                tracing::error!(%err, "Lifecycle task failed");
            }
        }
        self.inner.state.transition(ManagerState::Starting)?;
        self.inner.jobs.start();
        let token = CancellationToken::new();
        let handle = tokio::spawn(self.inner.clone().run_lifecycle(token.clone()));
        *lifecycle = Some(Lifecycle { token, handle });
        Ok(())
    }

    /// Stops the lifecycle task and unloads data.
    pub async fn stop(&self) {
        let mut lifecycle = self.inner.lifecycle.lock().await;
        if self.state() == ManagerState::Stopped {
            return;
        }
        // Never resumed after stopping.
        self.lock_interrupted().take();
        if let Err(err) = self.inner.state.transition(ManagerState::Stopping) {
            tracing::warn!(%err);
        }
        self.inner.jobs.stop();
        if let Some(lifecycle) = lifecycle.take() {
            lifecycle.token.cancel();
            if let Err(err) = lifecycle.handle.await {
                tracing::error!(%err, "Lifecycle task failed");
            }
        }
        if let Err(err) = self.inner.synchronizer.call(timers::UnloadTimers).await {
            tracing::error!(%err, "Failed to unload timers");
        }
        self.inner.recordings.clear();
        self.inner.channel_groups.clear();
        if let Err(err) = self.inner.state.transition(ManagerState::Stopped) {
            tracing::warn!(%err);
        }
    }

    /// Handles a system suspend.
    pub fn on_sleep(&self) {
        let result = {
            let mut interrupted = self.lock_interrupted();
            let result = self.inner.state.try_transition(ManagerState::Interrupted);
            if let Ok(prev) = result {
                *interrupted = Some(prev);
            }
            result
        };
        match result {
            Ok(_) => self.inner.state.publish(ManagerState::Interrupted),
            Err(err) => tracing::debug!(%err, "Already interrupted"),
        }
    }

    /// Handles a system resume.
    pub fn on_wake(&self) {
        let result = {
            let mut interrupted = self.lock_interrupted();
            // A stale state saved while stopping is discarded.
            let prev = interrupted.take();
            prev.map(|prev| self.inner.state.try_transition(prev).map(|_| prev))
        };
        match result {
            Some(Ok(state)) => {
                self.inner.state.publish(state);
                if state == ManagerState::Started {
                    self.trigger_timers_update();
                    self.trigger_recordings_update();
                    self.trigger_channel_groups_update();
                }
            }
            Some(Err(err)) => tracing::error!(%err, "Failed to resume"),
            None => tracing::debug!("Not interrupted"),
        }
    }

    // data access

    pub fn timers(&self) -> Result<SharedTimers, Error> {
        self.ensure_active()?;
        Ok(self.inner.timers.clone())
    }

    pub fn recordings(&self) -> Result<SharedRecordings, Error> {
        self.ensure_active()?;
        Ok(self.inner.recordings.clone())
    }

    pub fn channel_groups(&self) -> Result<Vec<ChannelGroup>, Error> {
        self.ensure_active()?;
        Ok(self.inner.channel_groups.get())
    }

    /// Returns the next due reminder.  Each reminder is returned once.
    pub fn next_reminder_to_announce(&self) -> Option<Arc<Timer>> {
        if !self.state().is_active() {
            return None;
        }
        self.inner.reminders.pop_next()
    }

    /// Creates a guide view bound to this manager.
    pub fn timeline_view(&self, display: Arc<dyn DisplaySurface>) -> TimelineView {
        TimelineView::new(
            self.inner.config.clone(),
            self.inner.epg.clone(),
            &self.inner.bus,
            self.inner.state.clone(),
            display,
        )
    }

    // timer operations

    pub async fn add_timer(&self, timer: Timer) -> TimerOperationResult {
        self.call_synchronizer(timers::AddTimer { timer }).await
    }

    pub async fn delete_timer(&self, key: TimerKey, force: bool, cascade: bool) -> TimerOperationResult {
        self.call_synchronizer(timers::DeleteTimer { key, force, cascade })
            .await
    }

    pub async fn rename_timer(&self, key: TimerKey, name: String) -> TimerOperationResult {
        self.call_synchronizer(timers::RenameTimer { key, name }).await
    }

    pub async fn update_timer(&self, timer: Timer) -> TimerOperationResult {
        self.call_synchronizer(timers::UpdateTimer { timer }).await
    }

    pub async fn delete_timers_on_channel(
        &self,
        channel: ChannelId,
        delete_rules: bool,
        currently_active_only: bool,
    ) -> bool {
        if self.ensure_active().is_err() {
            return false;
        }
        let msg = timers::DeleteTimersOnChannel {
            channel,
            delete_rules,
            currently_active_only,
        };
        self.inner
            .synchronizer
            .call(msg)
            .await
            .unwrap_or_else(|err| {
                tracing::error!(%err, "Failed to delete timers on channel");
                false
            })
    }

    // jobs

    pub fn trigger_timers_update(&self) -> bool {
        self.inner.jobs.submit(UpdateTimersJob {
            synchronizer: self.inner.synchronizer.clone(),
        })
    }

    pub fn trigger_recordings_update(&self) -> bool {
        self.inner.jobs.submit(UpdateRecordingsJob {
            clients: self.inner.clients.clone(),
            recordings: self.inner.recordings.clone(),
            bus: self.inner.bus.clone(),
        })
    }

    pub fn trigger_channel_groups_update(&self) -> bool {
        self.inner.jobs.submit(UpdateChannelGroupsJob {
            epg: self.inner.epg.clone(),
            channel_groups: self.inner.channel_groups.clone(),
            bus: self.inner.bus.clone(),
        })
    }

    /// Updates timers and waits for the completion.
    ///
    /// Returns `false` if the manager is not active or the timeout elapsed.
    pub async fn refresh_timers(&self, timeout: Duration) -> bool {
        if self.ensure_active().is_err() {
            return false;
        }
        self.trigger_timers_update();
        self.inner.jobs.await_idle(timeout).await
    }

    /// Waits until the manager gets started or fails to start.
    pub async fn wait_until_settled(&self, timeout: Duration) -> ManagerState {
        self.inner
            .state
            .wait_for(
                |state| matches!(state, ManagerState::Started | ManagerState::Error),
                timeout,
            )
            .await;
        self.state()
    }

    fn ensure_active(&self) -> Result<(), Error> {
        if self.state().is_active() {
            Ok(())
        } else {
            Err(Error::ManagerNotActive)
        }
    }

    async fn call_synchronizer<M>(&self, msg: M) -> TimerOperationResult
    where
        M: Action<Reply = TimerOperationResult> + 'static,
        TimerSynchronizer: Handler<M>,
    {
        if self.ensure_active().is_err() {
            tracing::warn!(state = ?self.state(), "Not active, rejected");
            return TimerOperationResult::Failed;
        }
        self.inner.synchronizer.call(msg).await.unwrap_or_else(|err| {
            tracing::error!(%err, "Timer synchronizer stopped");
            TimerOperationResult::Failed
        })
    }

    fn lock_interrupted(&self) -> MutexGuard<'_, Option<ManagerState>> {
        self.inner.lock_interrupted()
    }
}

impl ManagerInner {
    async fn run_lifecycle(self: Arc<Self>, token: CancellationToken) {
        tracing::debug!("Lifecycle task started");
        let result = tokio::select! {
            result = self.load() => result,
            _ = token.cancelled() => {
                tracing::debug!("Cancelled while loading");
                return;
            }
        };
        if let Err(err) = result {
            tracing::error!(%err, "Failed to start");
            self.fail_start();
            return;
        }
        if !self.complete_start() {
            tracing::debug!("Stopped while loading");
            return;
        }
        self.bus.publish(PvrEvent::ChannelGroupsLoaded);

        let poll_interval = self.config.jobs.poll_interval;
        loop {
            // Pending jobs are kept until resumed.
            if self.state.get() != ManagerState::Started {
                let resumed = self
                    .state
                    .wait_for(|state| *state == ManagerState::Started, poll_interval);
                tokio::select! {
                    _ = resumed => (),
                    _ = token.cancelled() => break,
                }
                continue;
            }
            tokio::select! {
                _ = self.jobs.wait_for_jobs(poll_interval) => (),
                _ = token.cancelled() => break,
            }
            if token.is_cancelled() {
                break;
            }
            if self.state.get() == ManagerState::Started {
                self.jobs.run_pending().await;
            }
        }
        tracing::debug!("Lifecycle task stopped");
    }

    async fn load(&self) -> Result<(), Error> {
        if self.clients.is_empty() {
            return Err(Error::NoClients);
        }
        let groups = self.epg.channel_groups().await?;
        tracing::info!(num_groups = groups.len(), "Loaded channel groups");
        self.channel_groups.set(groups);
        if !self.synchronizer.call(timers::LoadTimers).await? {
            return Err(anyhow::anyhow!("Failed to load timers").into());
        }
        tracing::info!(num_timers = self.timers.len(), "Loaded timers");
        self.recordings.update_from(&self.clients).await;
        tracing::info!(num_recordings = self.recordings.len(), "Loaded recordings");
        Ok(())
    }

    fn fail_start(&self) {
        self.jobs.stop();
        let result = {
            let mut interrupted = self.lock_interrupted();
            match self.state.get() {
                // Resumed later by `on_wake()`.
                ManagerState::Interrupted => {
                    *interrupted = Some(ManagerState::Error);
                    return;
                }
                _ => self.state.try_transition(ManagerState::Error),
            }
        };
        match result {
            Ok(_) => self.state.publish(ManagerState::Error),
            Err(err) => tracing::warn!(%err),
        }
    }

    // Returns `false` if the manager has been stopped while loading.
    fn complete_start(&self) -> bool {
        let result = {
            let mut interrupted = self.lock_interrupted();
            match self.state.get() {
                // Resumed later by `on_wake()`.
                ManagerState::Interrupted => {
                    *interrupted = Some(ManagerState::Started);
                    return true;
                }
                _ => self.state.try_transition(ManagerState::Started),
            }
        };
        match result {
            Ok(_) => {
                self.state.publish(ManagerState::Started);
                true
            }
            Err(_) => false,
        }
    }

    fn lock_interrupted(&self) -> MutexGuard<'_, Option<ManagerState>> {
        self.interrupted
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for ManagerInner {
    fn drop(&mut self) {
        self.bus.unsubscribe(self.subscription);
    }
}

#[derive(Clone, Default)]
struct SharedChannelGroups(Arc<Mutex<Vec<ChannelGroup>>>);

impl SharedChannelGroups {
    fn get(&self) -> Vec<ChannelGroup> {
        self.lock().clone()
    }

    // Returns `true` if changed.
    fn set(&self, groups: Vec<ChannelGroup>) -> bool {
        let mut current = self.lock();
        if *current == groups {
            return false;
        }
        *current = groups;
        true
    }

    fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> MutexGuard<'_, Vec<ChannelGroup>> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

// jobs

#[derive(Clone)]
struct UpdateTimersJob {
    synchronizer: Address<TimerSynchronizer>,
}

#[async_trait]
impl Job for UpdateTimersJob {
    fn name(&self) -> &'static str {
        "update-timers"
    }

    async fn run(&self) {
        if let Err(err) = self.synchronizer.call(timers::UpdateTimers).await {
            tracing::error!(%err, "Failed to update timers");
        }
    }
}

struct UpdateRecordingsJob {
    clients: ClientSet,
    recordings: SharedRecordings,
    bus: EventBus,
}

#[async_trait]
impl Job for UpdateRecordingsJob {
    fn name(&self) -> &'static str {
        "update-recordings"
    }

    async fn run(&self) {
        if self.recordings.update_from(&self.clients).await {
            self.bus.publish(PvrEvent::RecordingsInvalidated);
        }
    }
}

#[derive(Clone)]
struct UpdateChannelGroupsJob {
    epg: Arc<dyn EpgSource>,
    channel_groups: SharedChannelGroups,
    bus: EventBus,
}

#[async_trait]
impl Job for UpdateChannelGroupsJob {
    fn name(&self) -> &'static str {
        "update-channel-groups"
    }

    async fn run(&self) {
        match self.epg.channel_groups().await {
            Ok(groups) => {
                if self.channel_groups.set(groups) {
                    self.bus.publish(PvrEvent::ChannelGroup);
                }
            }
            Err(err) => tracing::warn!(%err, "Failed to update channel groups"),
        }
    }
}

// </coverage:exclude>
