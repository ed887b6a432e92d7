mod container;
mod reminders;
mod store;
mod synchronizer;

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;

use chrono::DateTime;
use chrono::Utc;

use crate::models::ChannelId;
use crate::models::EpgTag;
use crate::models::Timer;
use crate::models::TimerId;
use crate::models::TimerKey;
use crate::models::TimerKind;

pub use container::TimersContainer;
pub use reminders::ReminderQueue;
pub use store::JsonTimerStore;
pub use store::LocalTimerStore;
pub use store::MemoryTimerStore;
pub use synchronizer::AddTimer;
pub use synchronizer::DeleteTimer;
pub use synchronizer::DeleteTimersOnChannel;
pub use synchronizer::LoadTimers;
pub use synchronizer::RenameTimer;
pub use synchronizer::TimerSynchronizer;
pub use synchronizer::UnloadTimers;
pub use synchronizer::UpdateTimer;
pub use synchronizer::UpdateTimers;

/// A shared handle of the timers container.
///
/// Everyone can read.  Only the synchronizer mutates it.
#[derive(Clone, Debug, Default)]
pub struct SharedTimers {
    container: Arc<Mutex<TimersContainer>>,
}

impl SharedTimers {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn get(&self, key: &TimerKey) -> Option<Arc<Timer>> {
        self.lock().lookup_by_backend_key(key).cloned()
    }

    pub fn get_by_id(&self, id: TimerId) -> Option<Arc<Timer>> {
        self.lock().lookup_by_local_id(id).cloned()
    }

    pub fn all(&self) -> Vec<Arc<Timer>> {
        self.lock().all_ordered_by_start()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Returns the active timer which starts first.
    ///
    /// `kind` limits the result to timers of that kind.
    pub fn next_active_timer(&self, kind: Option<TimerKind>, ignore_reminders: bool) -> Option<Arc<Timer>> {
        self.lock()
            .iter()
            .filter(|timer| is_active_instance(timer) && matches_kind(timer, kind))
            .find(|timer| !(ignore_reminders && timer.is_reminder))
            .cloned()
    }

    pub fn active_timers(&self) -> Vec<Arc<Timer>> {
        self.lock()
            .iter()
            .filter(|timer| is_active_instance(timer))
            .cloned()
            .collect()
    }

    pub fn count_active_timers(&self, kind: Option<TimerKind>) -> usize {
        self.lock()
            .iter()
            .filter(|timer| is_active_instance(timer) && matches_kind(timer, kind))
            .count()
    }

    pub fn active_recordings(&self, kind: Option<TimerKind>) -> Vec<Arc<Timer>> {
        self.lock()
            .iter()
            .filter(|timer| is_recording_instance(timer) && matches_kind(timer, kind))
            .cloned()
            .collect()
    }

    pub fn count_active_recordings(&self, kind: Option<TimerKind>) -> usize {
        self.lock()
            .iter()
            .filter(|timer| is_recording_instance(timer) && matches_kind(timer, kind))
            .count()
    }

    pub fn is_recording(&self) -> bool {
        self.lock().iter().any(|timer| is_recording_instance(timer))
    }

    pub fn is_recording_on_channel(&self, channel: ChannelId) -> bool {
        self.active_timer_for_channel(channel).is_some()
    }

    /// Returns the timer recording on the channel.
    pub fn active_timer_for_channel(&self, channel: ChannelId) -> Option<Arc<Timer>> {
        self.lock()
            .iter()
            .find(|timer| is_recording_instance(timer) && timer.channel == Some(channel))
            .cloned()
    }

    /// Returns the timer scheduled for the program.
    pub fn timer_for_epg_tag(&self, tag: &EpgTag) -> Option<Arc<Timer>> {
        self.lock()
            .iter()
            .filter(|timer| !timer.is_rule && timer.channel == Some(tag.channel))
            .find(|timer| match timer.epg_uid {
                Some(uid) => uid == tag.uid,
                None => timer.start == tag.start && timer.end == tag.end,
            })
            .cloned()
    }

    /// Returns the rule which generated the timer.
    pub fn timer_rule(&self, timer: &Timer) -> Option<Arc<Timer>> {
        self.lock().rule_for(timer).cloned()
    }

    /// Returns the start time of the first active timer starting after
    /// `now`.
    pub fn next_event_time(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.lock()
            .iter()
            .filter(|timer| is_active_instance(timer) && timer.start > now)
            .map(|timer| timer.start)
            .next()
    }

    pub(crate) fn write<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut TimersContainer) -> R,
    {
        f(&mut self.lock())
    }

    pub(crate) fn read<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&TimersContainer) -> R,
    {
        f(&self.lock())
    }

    fn lock(&self) -> MutexGuard<'_, TimersContainer> {
        self.container
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn is_active_instance(timer: &Timer) -> bool {
    timer.is_active() && !timer.is_rule
}

fn is_recording_instance(timer: &Timer) -> bool {
    timer.is_recording() && !timer.is_rule && !timer.is_reminder
}

fn matches_kind(timer: &Timer, kind: Option<TimerKind>) -> bool {
    kind.map(|kind| timer.kind == kind).unwrap_or(true)
}

// </coverage:exclude>
