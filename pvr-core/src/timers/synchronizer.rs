use std::collections::BTreeMap;
use std::collections::HashSet;
use std::sync::Arc;

use actlet::prelude::*;
use chrono::DateTime;
use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::clients::ClientSet;
use crate::config::Config;
use crate::events::EventBus;
use crate::events::PvrEvent;
use crate::manager::StateCell;
use crate::models::ChannelId;
use crate::models::ClientId;
use crate::models::ClientIndex;
use crate::models::Timer;
use crate::models::TimerKey;
use crate::models::TimerOperationResult;
use crate::models::TimerState;

use super::LocalTimerStore;
use super::ReminderQueue;
use super::SharedTimers;

/// Keeps the timers container in sync with the backend clients and the
/// local timer store.
pub struct TimerSynchronizer {
    config: Arc<Config>,
    state: StateCell,
    clients: ClientSet,
    store: Arc<dyn LocalTimerStore>,
    timers: SharedTimers,
    reminders: ReminderQueue,
    bus: EventBus,
    local_timers: BTreeMap<ClientIndex, Timer>,
    // Indexes of deleted local timers are never reused.
    last_local_index: u32,
    announced: HashSet<TimerKey>,
    timer_token: Option<CancellationToken>,
}

impl TimerSynchronizer {
    pub fn new(
        config: Arc<Config>,
        state: StateCell,
        clients: ClientSet,
        store: Arc<dyn LocalTimerStore>,
        timers: SharedTimers,
        reminders: ReminderQueue,
        bus: EventBus,
    ) -> Self {
        TimerSynchronizer {
            config,
            state,
            clients,
            store,
            timers,
            reminders,
            bus,
            local_timers: Default::default(),
            last_local_index: 0,
            announced: Default::default(),
            timer_token: None,
        }
    }

    fn set_timer(&mut self, ctx: &Context<Self>) {
        self.clear_timer();
        let addr = ctx.address().clone();
        let interval = self.config.timers.update_interval;
        let token = ctx.spawn_task(async move {
            tokio::time::sleep(interval).await;
            addr.emit(TimerExpired).await;
        });
        self.timer_token = Some(token);
    }

    fn clear_timer(&mut self) {
        if let Some(token) = self.timer_token.take() {
            token.cancel();
        }
    }

    // Returns `true` if the timers container changed.
    async fn synchronize(&mut self) -> bool {
        if !self.state.get().is_syncing() {
            tracing::debug!(state = ?self.state.get(), "Not syncing, skip");
            return false;
        }

        let (mut entries, failed) = self.clients.list_timers().await;
        if !self.state.get().is_syncing() {
            tracing::debug!("Stopped while listing timers, discard results");
            return false;
        }

        // Keep entries of clients which failed to respond.
        let retained: Vec<Timer> = self.timers.read(|container| {
            container
                .iter()
                .filter(|timer| !timer.is_local() && failed.contains(&timer.client_id))
                .map(|timer| Timer::clone(timer))
                .collect()
        });
        if !retained.is_empty() {
            tracing::debug!(?failed, num_retained = retained.len(), "Retained timers of failed clients");
        }
        entries.extend(retained);

        let now = Utc::now();
        self.expire_local_timers(now);
        entries.extend(self.local_timers.values().cloned());
        resolve_parents(&mut entries);

        let changed = self.timers.write(|container| container.reconcile(entries));
        self.queue_due_reminders(now);
        if changed {
            tracing::info!(num_timers = self.timers.len(), "Timers changed");
            self.bus.publish(PvrEvent::Timers);
        }
        changed
    }

    // Applies changes of local timers to the container.
    fn apply_local_timers(&mut self) {
        let mut local: Vec<Timer> = self.local_timers.values().cloned().collect();
        let rules: HashSet<TimerKey> = local
            .iter()
            .filter(|timer| timer.is_rule)
            .map(Timer::key)
            .collect();
        for timer in local.iter_mut() {
            if timer.parent_key().is_some_and(|key| !rules.contains(&key)) {
                timer.parent = None;
            }
        }
        let changed = self.timers.write(|container| {
            let obsolete: Vec<TimerKey> = container
                .iter()
                .filter(|timer| timer.is_local() && !self.local_timers.contains_key(&timer.client_index))
                .map(|timer| timer.key())
                .collect();
            let mut changed = false;
            for key in obsolete.iter() {
                changed |= container.remove(key);
            }
            for timer in local.into_iter() {
                changed |= container.upsert(timer);
            }
            changed
        });
        self.queue_due_reminders(Utc::now());
        if changed {
            self.bus.publish(PvrEvent::Timers);
        }
    }

    fn expire_local_timers(&mut self, now: DateTime<Utc>) {
        for timer in self.local_timers.values_mut() {
            if timer.is_active() && !timer.is_rule && timer.end <= now {
                timer.state = TimerState::Completed;
                tracing::info!(timer.key = %timer.key(), "Expired");
                if let Err(err) = self.store.save(timer) {
                    tracing::error!(%err, timer.key = %timer.key(), "Failed to save");
                }
            }
        }
    }

    fn queue_due_reminders(&mut self, now: DateTime<Utc>) {
        let window = chrono::Duration::from_std(self.config.timers.reminder_announce_window)
            .unwrap_or_else(|_| chrono::Duration::zero());
        let horizon = now + window;
        let announced = &mut self.announced;
        let due: Vec<Arc<Timer>> = self.timers.read(|container| {
            // Forget reminders which no longer exist.
            announced.retain(|key| container.contains(key));
            container
                .iter()
                .filter(|timer| timer.is_reminder && !timer.is_rule)
                .filter(|timer| timer.state == TimerState::Scheduled)
                .filter(|timer| timer.start <= horizon && now < timer.end)
                .filter(|timer| announced.insert(timer.key()))
                .cloned()
                .collect()
        });
        if due.is_empty() {
            return;
        }
        for timer in due.into_iter() {
            self.reminders.push(timer);
        }
        self.bus.publish(PvrEvent::AnnounceReminder);
    }

    fn next_local_index(&mut self) -> ClientIndex {
        self.last_local_index += 1;
        ClientIndex::new(self.last_local_index)
    }

    fn save_local(&self, timer: &Timer) -> bool {
        match self.store.save(timer) {
            Ok(_) => true,
            Err(err) => {
                tracing::error!(%err, timer.key = %timer.key(), "Failed to save");
                false
            }
        }
    }

    fn delete_local(&mut self, timer: &Timer, cascade: bool) -> TimerOperationResult {
        let index = timer.client_index;
        // Nothing changes unless the timer has been deleted from the store.
        if let Some(target) = self.local_timers.get(&index) {
            if let Err(err) = self.store.delete(target) {
                tracing::error!(%err, timer.key = %target.key(), "Failed to delete");
                return TimerOperationResult::Failed;
            }
        }
        self.local_timers.remove(&index);
        let instances: Vec<ClientIndex> = self
            .local_timers
            .values()
            .filter(|t| t.parent == Some(index))
            .map(|t| t.client_index)
            .collect();
        for instance in instances.into_iter() {
            if cascade {
                if let Some(removed) = self.local_timers.remove(&instance) {
                    if let Err(err) = self.store.delete(&removed) {
                        tracing::error!(%err, timer.key = %removed.key(), "Failed to delete");
                    }
                }
            } else if let Some(orphan) = self.local_timers.get_mut(&instance) {
                orphan.parent = None;
                if let Err(err) = self.store.save(orphan) {
                    tracing::error!(%err, timer.key = %orphan.key(), "Failed to save");
                }
            }
        }
        self.apply_local_timers();
        TimerOperationResult::Ok
    }

    async fn delete_remote(&mut self, timer: &Timer, force: bool, cascade: bool) -> TimerOperationResult {
        let client = match self.clients.get(timer.client_id) {
            Ok(client) => client,
            Err(err) => {
                tracing::error!(%err, timer.key = %timer.key());
                return TimerOperationResult::Failed;
            }
        };
        match client.delete_timer(timer, force, cascade).await {
            Ok(TimerOperationResult::Ok) => {
                self.synchronize().await;
                TimerOperationResult::Ok
            }
            Ok(result) => result,
            Err(err) => {
                tracing::error!(%err, timer.key = %timer.key(), "Failed to delete");
                TimerOperationResult::Failed
            }
        }
    }

    async fn delete_timer(&mut self, key: TimerKey, force: bool, cascade: bool) -> TimerOperationResult {
        let timer = match self.timers.get(&key) {
            Some(timer) => timer,
            None => {
                tracing::warn!(timer.key = %key, "No such timer");
                return TimerOperationResult::Failed;
            }
        };
        if timer.is_recording() && !force {
            tracing::info!(timer.key = %key, "Recording, not deleted");
            return TimerOperationResult::Recording;
        }
        if timer.is_local() {
            self.delete_local(&timer, cascade)
        } else {
            self.delete_remote(&timer, force, cascade).await
        }
    }
}

// Clears parent references which do not resolve to a rule of the same
// client.
fn resolve_parents(entries: &mut [Timer]) {
    let rules: HashSet<TimerKey> = entries
        .iter()
        .filter(|timer| timer.is_rule)
        .map(Timer::key)
        .collect();
    for timer in entries.iter_mut() {
        if let Some(parent) = timer.parent_key() {
            if !rules.contains(&parent) {
                tracing::warn!(timer.key = %timer.key(), timer.parent = %parent, "Orphan, parent cleared");
                timer.parent = None;
            }
        }
    }
}

// actor

#[async_trait]
impl Actor for TimerSynchronizer {
    async fn started(&mut self, _ctx: &mut Context<Self>) {
        tracing::debug!("Started");
    }

    async fn stopped(&mut self, _ctx: &mut Context<Self>) {
        self.clear_timer();
        tracing::debug!("Stopped");
    }
}

// load timers

#[derive(Message)]
#[reply(bool)]
pub struct LoadTimers;

#[async_trait]
impl Handler<LoadTimers> for TimerSynchronizer {
    async fn handle(&mut self, _msg: LoadTimers, ctx: &mut Context<Self>) -> bool {
        tracing::debug!(msg.name = "LoadTimers");
        let local_timers = match self.store.load_all() {
            Ok(timers) => timers,
            Err(err) => {
                tracing::error!(%err, "Failed to load local timers");
                return false;
            }
        };
        self.local_timers = local_timers
            .into_iter()
            .map(|mut timer| {
                timer.client_id = ClientId::LOCAL;
                (timer.client_index, timer)
            })
            .collect();
        if let Some(last) = self.local_timers.keys().last() {
            self.last_local_index = self.last_local_index.max(last.value());
        }
        tracing::info!(num_local_timers = self.local_timers.len(), "Loaded local timers");
        self.synchronize().await;
        self.set_timer(ctx);
        true
    }
}

// unload timers

#[derive(Message)]
#[reply]
pub struct UnloadTimers;

#[async_trait]
impl Handler<UnloadTimers> for TimerSynchronizer {
    async fn handle(&mut self, _msg: UnloadTimers, _ctx: &mut Context<Self>) {
        tracing::debug!(msg.name = "UnloadTimers");
        self.clear_timer();
        self.timers.write(|container| container.clear());
        self.reminders.clear();
        self.local_timers.clear();
        self.announced.clear();
    }
}

// update timers

#[derive(Message)]
#[reply(bool)]
pub struct UpdateTimers;

#[async_trait]
impl Handler<UpdateTimers> for TimerSynchronizer {
    async fn handle(&mut self, _msg: UpdateTimers, _ctx: &mut Context<Self>) -> bool {
        tracing::debug!(msg.name = "UpdateTimers");
        self.synchronize().await
    }
}

// add timer

#[derive(Message)]
#[reply(TimerOperationResult)]
pub struct AddTimer {
    pub timer: Timer,
}

#[async_trait]
impl Handler<AddTimer> for TimerSynchronizer {
    async fn handle(&mut self, msg: AddTimer, _ctx: &mut Context<Self>) -> TimerOperationResult {
        tracing::debug!(msg.name = "AddTimer", timer.client.id = %msg.timer.client_id);
        let mut timer = msg.timer;
        timer.id = None;
        if timer.is_local() {
            timer.client_index = self.next_local_index();
            if !self.save_local(&timer) {
                return TimerOperationResult::Failed;
            }
            tracing::info!(timer.key = %timer.key(), "Added local timer");
            self.local_timers.insert(timer.client_index, timer);
            self.apply_local_timers();
            return TimerOperationResult::Ok;
        }
        let client = match self.clients.get(timer.client_id) {
            Ok(client) => client,
            Err(err) => {
                tracing::error!(%err);
                return TimerOperationResult::Failed;
            }
        };
        match client.add_timer(&timer).await {
            Ok(_) => {
                self.synchronize().await;
                TimerOperationResult::Ok
            }
            Err(err) => {
                tracing::error!(%err, client.id = %timer.client_id, "Failed to add a timer");
                TimerOperationResult::Failed
            }
        }
    }
}

// delete timer

#[derive(Message)]
#[reply(TimerOperationResult)]
pub struct DeleteTimer {
    pub key: TimerKey,
    pub force: bool,
    // Deletes instances generated by the rule as well.
    pub cascade: bool,
}

#[async_trait]
impl Handler<DeleteTimer> for TimerSynchronizer {
    async fn handle(&mut self, msg: DeleteTimer, _ctx: &mut Context<Self>) -> TimerOperationResult {
        tracing::debug!(msg.name = "DeleteTimer", timer.key = %msg.key, msg.force, msg.cascade);
        self.delete_timer(msg.key, msg.force, msg.cascade).await
    }
}

// rename timer

#[derive(Message)]
#[reply(TimerOperationResult)]
pub struct RenameTimer {
    pub key: TimerKey,
    pub name: String,
}

#[async_trait]
impl Handler<RenameTimer> for TimerSynchronizer {
    async fn handle(&mut self, msg: RenameTimer, _ctx: &mut Context<Self>) -> TimerOperationResult {
        tracing::debug!(msg.name = "RenameTimer", timer.key = %msg.key, timer.name = %msg.name);
        let Some(timer) = self.timers.get(&msg.key) else {
            tracing::warn!(timer.key = %msg.key, "No such timer");
            return TimerOperationResult::Failed;
        };
        if timer.is_local() {
            let Some(mut renamed) = self.local_timers.get(&timer.client_index).cloned() else {
                return TimerOperationResult::Failed;
            };
            renamed.title = msg.name;
            if !self.save_local(&renamed) {
                return TimerOperationResult::Failed;
            }
            self.local_timers.insert(renamed.client_index, renamed);
            self.apply_local_timers();
            return TimerOperationResult::Ok;
        }
        let client = match self.clients.get(timer.client_id) {
            Ok(client) => client,
            Err(err) => {
                tracing::error!(%err);
                return TimerOperationResult::Failed;
            }
        };
        match client.rename_timer(&timer, &msg.name).await {
            Ok(_) => {
                self.synchronize().await;
                TimerOperationResult::Ok
            }
            Err(err) => {
                tracing::error!(%err, timer.key = %msg.key, "Failed to rename");
                TimerOperationResult::Failed
            }
        }
    }
}

// update timer

#[derive(Message)]
#[reply(TimerOperationResult)]
pub struct UpdateTimer {
    pub timer: Timer,
}

#[async_trait]
impl Handler<UpdateTimer> for TimerSynchronizer {
    async fn handle(&mut self, msg: UpdateTimer, _ctx: &mut Context<Self>) -> TimerOperationResult {
        let key = msg.timer.key();
        tracing::debug!(msg.name = "UpdateTimer", timer.key = %key);
        if !self.timers.read(|container| container.contains(&key)) {
            tracing::warn!(timer.key = %key, "No such timer");
            return TimerOperationResult::Failed;
        }
        let mut timer = msg.timer;
        timer.id = None;
        if timer.is_local() {
            if !self.save_local(&timer) {
                return TimerOperationResult::Failed;
            }
            self.local_timers.insert(timer.client_index, timer);
            self.apply_local_timers();
            return TimerOperationResult::Ok;
        }
        let client = match self.clients.get(timer.client_id) {
            Ok(client) => client,
            Err(err) => {
                tracing::error!(%err);
                return TimerOperationResult::Failed;
            }
        };
        match client.update_timer(&timer).await {
            Ok(_) => {
                self.synchronize().await;
                TimerOperationResult::Ok
            }
            Err(err) => {
                tracing::error!(%err, timer.key = %key, "Failed to update");
                TimerOperationResult::Failed
            }
        }
    }
}

// delete timers on channel

#[derive(Message)]
#[reply(bool)]
pub struct DeleteTimersOnChannel {
    pub channel: ChannelId,
    pub delete_rules: bool,
    pub currently_active_only: bool,
}

#[async_trait]
impl Handler<DeleteTimersOnChannel> for TimerSynchronizer {
    async fn handle(&mut self, msg: DeleteTimersOnChannel, _ctx: &mut Context<Self>) -> bool {
        tracing::debug!(
            msg.name = "DeleteTimersOnChannel",
            %msg.channel,
            msg.delete_rules,
            msg.currently_active_only,
        );
        let now = Utc::now();
        let targets: Vec<TimerKey> = self.timers.read(|container| {
            container
                .iter()
                .filter(|timer| timer.channel == Some(msg.channel))
                .filter(|timer| msg.delete_rules || !timer.is_rule)
                .filter(|timer| {
                    !msg.currently_active_only
                        || timer.is_recording()
                        || (timer.start <= now && now < timer.end)
                })
                .map(|timer| timer.key())
                .collect()
        });
        let mut deleted = false;
        for key in targets.into_iter() {
            // A previous deletion may have removed this one already.
            if self.timers.get(&key).is_none() {
                continue;
            }
            if self.delete_timer(key, true, false).await == TimerOperationResult::Ok {
                deleted = true;
            }
        }
        deleted
    }
}

// timer expired

#[derive(Message)]
struct TimerExpired;

#[async_trait]
impl Handler<TimerExpired> for TimerSynchronizer {
    async fn handle(&mut self, _msg: TimerExpired, ctx: &mut Context<Self>) {
        tracing::debug!(msg.name = "TimerExpired");
        self.synchronize().await;
        self.set_timer(ctx);
    }
}

// </coverage:exclude>
