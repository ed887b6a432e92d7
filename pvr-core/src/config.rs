use std::fs::File;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::error::Error;
use crate::timeline::TimelineSort;

pub fn load<P: AsRef<Path>>(config_path: P) -> Result<Arc<Config>, Error> {
    let config_path = config_path.as_ref();
    let reader = File::open(config_path)?;
    let config: Config = serde_yaml::from_reader(reader)?;
    config.validate();
    tracing::debug!(config.path = %config_path.display(), "Loaded");
    Ok(Arc::new(config))
}

// result

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub timers: TimersConfig,
    #[serde(default)]
    pub jobs: JobsConfig,
    #[serde(default)]
    pub guide: GuideConfig,
}

impl Config {
    pub fn validate(&self) {
        self.timers.validate();
        self.jobs.validate();
        self.guide.validate();
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct TimersConfig {
    #[serde(default = "TimersConfig::default_update_interval")]
    #[serde(with = "humantime_serde")]
    pub update_interval: Duration,
    #[serde(default = "TimersConfig::default_reminder_announce_window")]
    #[serde(with = "humantime_serde")]
    pub reminder_announce_window: Duration,
    // Local timers are kept only in memory when this is not specified.
    #[serde(default)]
    pub store_dir: Option<PathBuf>,
}

impl TimersConfig {
    fn default_update_interval() -> Duration {
        Duration::from_secs(5)
    }

    fn default_reminder_announce_window() -> Duration {
        Duration::from_secs(10 * 60)
    }

    fn validate(&self) {
        assert!(
            !self.update_interval.is_zero(),
            "config.timers: `update-interval` must be larger than 0"
        );
        if let Some(store_dir) = self.store_dir.as_ref() {
            assert!(
                store_dir.is_absolute(),
                "config.timers: `store-dir` must be an absolute path"
            );
        }
    }
}

impl Default for TimersConfig {
    fn default() -> Self {
        TimersConfig {
            update_interval: Self::default_update_interval(),
            reminder_announce_window: Self::default_reminder_announce_window(),
            store_dir: None,
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct JobsConfig {
    #[serde(default = "JobsConfig::default_poll_interval")]
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
}

impl JobsConfig {
    fn default_poll_interval() -> Duration {
        Duration::from_secs(1)
    }

    fn validate(&self) {
        assert!(
            !self.poll_interval.is_zero(),
            "config.jobs: `poll-interval` must be larger than 0"
        );
    }
}

impl Default for JobsConfig {
    fn default() -> Self {
        JobsConfig {
            poll_interval: Self::default_poll_interval(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct GuideConfig {
    #[serde(default = "GuideConfig::default_past_days")]
    pub past_days: u32,
    #[serde(default = "GuideConfig::default_future_days")]
    pub future_days: u32,
    #[serde(default = "GuideConfig::default_boosted_interval")]
    #[serde(with = "humantime_serde")]
    pub boosted_interval: Duration,
    #[serde(default = "GuideConfig::default_steady_interval")]
    #[serde(with = "humantime_serde")]
    pub steady_interval: Duration,
    #[serde(default = "GuideConfig::default_boosted_threshold")]
    pub boosted_threshold: usize,
    #[serde(default = "GuideConfig::default_sync_refresh_timeout")]
    #[serde(with = "humantime_serde")]
    pub sync_refresh_timeout: Duration,
    #[serde(default)]
    pub sort: TimelineSort,
}

impl GuideConfig {
    fn default_past_days() -> u32 {
        1
    }

    fn default_future_days() -> u32 {
        3
    }

    fn default_boosted_interval() -> Duration {
        Duration::from_secs(1)
    }

    fn default_steady_interval() -> Duration {
        Duration::from_secs(5)
    }

    fn default_boosted_threshold() -> usize {
        4
    }

    fn default_sync_refresh_timeout() -> Duration {
        Duration::from_secs(10)
    }

    pub fn past_horizon(&self) -> chrono::Duration {
        chrono::Duration::days(self.past_days as i64)
    }

    pub fn future_horizon(&self) -> chrono::Duration {
        chrono::Duration::days(self.future_days as i64)
    }

    fn validate(&self) {
        assert!(
            !self.boosted_interval.is_zero(),
            "config.guide: `boosted-interval` must be larger than 0"
        );
        assert!(
            self.boosted_interval <= self.steady_interval,
            "config.guide: `boosted-interval` must not be larger than `steady-interval`"
        );
        assert!(
            !self.sync_refresh_timeout.is_zero(),
            "config.guide: `sync-refresh-timeout` must be larger than 0"
        );
    }
}

impl Default for GuideConfig {
    fn default() -> Self {
        GuideConfig {
            past_days: Self::default_past_days(),
            future_days: Self::default_future_days(),
            boosted_interval: Self::default_boosted_interval(),
            steady_interval: Self::default_steady_interval(),
            boosted_threshold: Self::default_boosted_threshold(),
            sync_refresh_timeout: Self::default_sync_refresh_timeout(),
            sort: Default::default(),
        }
    }
}

// </coverage:exclude>
