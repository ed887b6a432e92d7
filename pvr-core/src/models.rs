use std::fmt;

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

// identifiers

#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct ClientId(i32);

impl ClientId {
    /// Owner of timers which are not affiliated with any backend.
    pub const LOCAL: ClientId = ClientId(-2);

    pub fn new(value: i32) -> Self {
        ClientId(value)
    }

    pub fn value(&self) -> i32 {
        self.0
    }

    pub fn is_local(&self) -> bool {
        *self == Self::LOCAL
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_local() {
            write!(f, "local")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

impl From<i32> for ClientId {
    fn from(value: i32) -> Self {
        ClientId(value)
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct ClientIndex(u32);

impl ClientIndex {
    pub fn new(value: u32) -> Self {
        ClientIndex(value)
    }

    pub fn value(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for ClientIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for ClientIndex {
    fn from(value: u32) -> Self {
        ClientIndex(value)
    }
}

/// Identifies a timer entry inside the timers container.
///
/// Assigned when an entry is inserted and never reused.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct TimerId(u64);

impl TimerId {
    pub fn new(value: u64) -> Self {
        TimerId(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct ChannelId(u32);

impl ChannelId {
    pub fn new(value: u32) -> Self {
        ChannelId(value)
    }

    pub fn value(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for ChannelId {
    fn from(value: u32) -> Self {
        ChannelId(value)
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct ChannelGroupId(u32);

impl ChannelGroupId {
    pub fn new(value: u32) -> Self {
        ChannelGroupId(value)
    }

    pub fn value(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for ChannelGroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for ChannelGroupId {
    fn from(value: u32) -> Self {
        ChannelGroupId(value)
    }
}

/// The natural key of a timer: the owning client and the index assigned by
/// it.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerKey {
    pub client_id: ClientId,
    pub client_index: ClientIndex,
}

impl TimerKey {
    pub fn new(client_id: ClientId, client_index: ClientIndex) -> Self {
        TimerKey {
            client_id,
            client_index,
        }
    }
}

impl fmt::Display for TimerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.client_id, self.client_index)
    }
}

// timer

#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TimerKind {
    Tv,
    Radio,
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TimerState {
    Scheduled,
    Recording,
    Completed,
    Aborted,
    Cancelled,
    Conflict,
    Error,
    Disabled,
}

impl TimerState {
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Scheduled | Self::Recording | Self::Conflict)
    }
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Timer {
    // Assigned by the timers container.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<TimerId>,
    pub client_id: ClientId,
    pub client_index: ClientIndex,
    // The rule which generated this timer.  Always a timer of the same client.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<ClientIndex>,
    pub kind: TimerKind,
    pub state: TimerState,
    #[serde(default)]
    pub is_rule: bool,
    #[serde(default)]
    pub is_reminder: bool,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<ChannelId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub epg_uid: Option<u32>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Timer {
    pub fn key(&self) -> TimerKey {
        TimerKey {
            client_id: self.client_id,
            client_index: self.client_index,
        }
    }

    pub fn parent_key(&self) -> Option<TimerKey> {
        self.parent.map(|client_index| TimerKey {
            client_id: self.client_id,
            client_index,
        })
    }

    pub fn is_local(&self) -> bool {
        self.client_id.is_local()
    }

    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }

    pub fn is_recording(&self) -> bool {
        self.state == TimerState::Recording
    }

    pub fn is_tv(&self) -> bool {
        self.kind == TimerKind::Tv
    }

    pub fn is_radio(&self) -> bool {
        self.kind == TimerKind::Radio
    }

    /// Returns `true` if both have the same contents other than the local id.
    pub fn same_contents(&self, other: &Timer) -> bool {
        self.client_id == other.client_id
            && self.client_index == other.client_index
            && self.parent == other.parent
            && self.kind == other.kind
            && self.state == other.state
            && self.is_rule == other.is_rule
            && self.is_reminder == other.is_reminder
            && self.title == other.title
            && self.channel == other.channel
            && self.epg_uid == other.epg_uid
            && self.start == other.start
            && self.end == other.end
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TimerOperationResult {
    Ok,
    // The timer is recording and has not been changed.
    Recording,
    Failed,
}

// channels

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct ChannelNumber {
    pub major: u32,
    #[serde(default)]
    pub minor: u32,
}

impl fmt::Display for ChannelNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.minor == 0 {
            write!(f, "{}", self.major)
        } else {
            write!(f, "{}.{}", self.major, self.minor)
        }
    }
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Channel {
    pub id: ChannelId,
    pub client_id: ClientId,
    pub number: ChannelNumber,
    pub name: String,
    #[serde(default)]
    pub is_radio: bool,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_played: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelGroup {
    pub id: ChannelGroupId,
    pub name: String,
    #[serde(default)]
    pub is_radio: bool,
}

// epg

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EpgTag {
    pub uid: u32,
    pub channel: ChannelId,
    pub title: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl EpgTag {
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.start <= now && now < self.end
    }

    pub fn is_upcoming_at(&self, now: DateTime<Utc>) -> bool {
        now < self.start
    }
}

// recordings

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Recording {
    pub client_id: ClientId,
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<ChannelId>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub epg_uid: Option<u32>,
}

// <coverage:exclude>
#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_client_id() {
        assert!(ClientId::LOCAL.is_local());
        assert!(!ClientId::new(1).is_local());
        assert_eq!(ClientId::LOCAL.to_string(), "local");
        assert_eq!(ClientId::new(1).to_string(), "1");
    }

    #[test]
    fn test_timer_key() {
        assert_eq!(key!(1, 7).to_string(), "1:7");
        assert_eq!(key!(local, 1).to_string(), "local:1");
    }

    #[test]
    fn test_timer_state_is_active() {
        assert!(TimerState::Scheduled.is_active());
        assert!(TimerState::Recording.is_active());
        assert!(TimerState::Conflict.is_active());
        assert!(!TimerState::Completed.is_active());
        assert!(!TimerState::Disabled.is_active());
    }

    #[test]
    fn test_timer_serde() {
        let timer: Timer = serde_json::from_str(
            r#"{
                "clientId": 1,
                "clientIndex": 7,
                "kind": "tv",
                "state": "scheduled",
                "title": "news",
                "start": "2026-01-01T00:00:00Z",
                "end": "2026-01-01T01:00:00Z"
            }"#,
        )
        .unwrap();
        assert_eq!(timer.key(), key!(1, 7));
        assert_eq!(timer.id, None);
        assert_eq!(timer.parent, None);
        assert!(!timer.is_rule);
        assert!(timer.is_tv());

        let json = serde_json::to_value(&timer).unwrap();
        assert!(json.get("id").is_none());
        assert_eq!(json["clientIndex"], 7);
    }

    #[test]
    fn test_channel_number() {
        assert_eq!(ChannelNumber { major: 5, minor: 0 }.to_string(), "5");
        assert_eq!(ChannelNumber { major: 5, minor: 1 }.to_string(), "5.1");
        assert!(ChannelNumber { major: 5, minor: 1 } < ChannelNumber { major: 6, minor: 0 });
    }
}
// </coverage:exclude>
