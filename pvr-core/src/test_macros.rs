macro_rules! datetime {
    ($rfc3339:literal) => {
        chrono::DateTime::parse_from_rfc3339($rfc3339)
            .unwrap()
            .with_timezone(&chrono::Utc)
    };
}

macro_rules! key {
    (local, $index:expr) => {
        crate::models::TimerKey::new(
            crate::models::ClientId::LOCAL,
            crate::models::ClientIndex::new($index),
        )
    };
    ($client:expr, $index:expr) => {
        crate::models::TimerKey::new(
            crate::models::ClientId::new($client),
            crate::models::ClientIndex::new($index),
        )
    };
}

macro_rules! timer {
    (local, $index:expr, $start:expr) => {
        timer!(local, $index, $start, "1h")
    };
    (local, $index:expr, $start:expr, $duration:literal) => {{
        let mut timer = timer!(0, $index, $start, $duration);
        timer.client_id = crate::models::ClientId::LOCAL;
        timer.is_reminder = true;
        timer
    }};
    ($client:expr, $index:expr, $start:expr) => {
        timer!($client, $index, $start, "1h")
    };
    ($client:expr, $index:expr, $start:expr, $duration:literal) => {{
        let start: chrono::DateTime<chrono::Utc> = $start;
        let duration = humantime::parse_duration($duration).unwrap();
        crate::models::Timer {
            id: None,
            client_id: crate::models::ClientId::new($client),
            client_index: crate::models::ClientIndex::new($index),
            parent: None,
            kind: crate::models::TimerKind::Tv,
            state: crate::models::TimerState::Scheduled,
            is_rule: false,
            is_reminder: false,
            title: format!("timer#{}", $index),
            channel: None,
            epg_uid: None,
            start,
            end: start + chrono::Duration::from_std(duration).unwrap(),
        }
    }};
}

macro_rules! channel {
    ($id:expr, $number:expr, $name:expr) => {
        crate::models::Channel {
            id: crate::models::ChannelId::new($id),
            client_id: crate::models::ClientId::new(1),
            number: crate::models::ChannelNumber {
                major: $number,
                minor: 0,
            },
            name: $name.to_string(),
            is_radio: false,
            hidden: false,
            last_played: None,
        }
    };
}

macro_rules! epg_tag {
    ($uid:expr, $channel:expr, $start:expr, $duration:literal) => {{
        let start: chrono::DateTime<chrono::Utc> = $start;
        let duration = humantime::parse_duration($duration).unwrap();
        crate::models::EpgTag {
            uid: $uid,
            channel: crate::models::ChannelId::new($channel),
            title: format!("program#{}", $uid),
            start,
            end: start + chrono::Duration::from_std(duration).unwrap(),
        }
    }};
}
