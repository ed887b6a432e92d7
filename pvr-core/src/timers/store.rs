use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Mutex;

use crate::error::Error;
use crate::models::ClientIndex;
use crate::models::Timer;

/// Persistent storage of local timers.
pub trait LocalTimerStore: Send + Sync {
    fn save(&self, timer: &Timer) -> Result<(), Error>;
    fn delete(&self, timer: &Timer) -> Result<(), Error>;
    fn load_all(&self) -> Result<Vec<Timer>, Error>;
}

/// Saves each timer to `<index>.timer.json` in a directory.
pub struct JsonTimerStore {
    dir: PathBuf,
}

impl JsonTimerStore {
    const SUFFIX: &'static str = ".timer.json";

    pub fn new<P: AsRef<Path>>(dir: P) -> Result<Self, Error> {
        let dir = dir.as_ref().to_owned();
        std::fs::create_dir_all(&dir)?;
        Ok(JsonTimerStore { dir })
    }

    fn make_path(&self, index: ClientIndex) -> PathBuf {
        self.dir.join(format!("{}{}", index, Self::SUFFIX))
    }
}

impl LocalTimerStore for JsonTimerStore {
    fn save(&self, timer: &Timer) -> Result<(), Error> {
        let path = self.make_path(timer.client_index);
        // Serialize in advance in order to keep the existing file when it fails.
        let data = serde_json::to_vec(timer)?;
        // Write to <path>.new, then rename it to <path>.
        let new_path = path.with_extension("json.new");
        {
            let mut file = std::fs::File::create(&new_path)?;
            file.write_all(&data)?;
            file.sync_all()?;
        }
        std::fs::rename(&new_path, &path)?;
        tracing::debug!(timer.key = %timer.key(), ?path, "Saved");
        Ok(())
    }

    fn delete(&self, timer: &Timer) -> Result<(), Error> {
        let path = self.make_path(timer.client_index);
        match std::fs::remove_file(&path) {
            Ok(_) => {
                tracing::debug!(timer.key = %timer.key(), ?path, "Deleted");
                Ok(())
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn load_all(&self) -> Result<Vec<Timer>, Error> {
        let mut timers = vec![];
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let is_timer_file = path
                .file_name()
                .and_then(|name| name.to_str())
                .map(|name| name.ends_with(Self::SUFFIX))
                .unwrap_or(false);
            if !is_timer_file {
                continue;
            }
            // A broken file must not prevent loading the others.
            let timer = std::fs::read(&path)
                .map_err(Error::from)
                .and_then(|data| serde_json::from_slice::<Timer>(&data).map_err(Error::from));
            match timer {
                Ok(mut timer) => {
                    timer.id = None;
                    timers.push(timer);
                }
                Err(err) => tracing::warn!(%err, ?path, "Failed to load a timer"),
            }
        }
        timers.sort_by_key(|timer| timer.client_index);
        tracing::debug!(dir = ?self.dir, num_timers = timers.len(), "Loaded");
        Ok(timers)
    }
}

/// Keeps local timers only in memory.
#[derive(Default)]
pub struct MemoryTimerStore {
    timers: Mutex<BTreeMap<ClientIndex, Timer>>,
}

impl MemoryTimerStore {
    pub fn new() -> Self {
        Default::default()
    }

    fn lock_timers(&self) -> std::sync::MutexGuard<'_, BTreeMap<ClientIndex, Timer>> {
        self.timers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl LocalTimerStore for MemoryTimerStore {
    fn save(&self, timer: &Timer) -> Result<(), Error> {
        self.lock_timers().insert(timer.client_index, timer.clone());
        Ok(())
    }

    fn delete(&self, timer: &Timer) -> Result<(), Error> {
        self.lock_timers().remove(&timer.client_index);
        Ok(())
    }

    fn load_all(&self) -> Result<Vec<Timer>, Error> {
        Ok(self.lock_timers().values().cloned().collect())
    }
}

// <coverage:exclude>
#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TimerState;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_json_timer_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonTimerStore::new(dir.path().join("timers")).unwrap();
        assert!(store.load_all().unwrap().is_empty());

        let start = datetime!("2026-01-01T00:00:00Z");
        let timer1 = timer!(local, 1, start);
        let mut timer2 = timer!(local, 2, start);
        timer2.id = Some(crate::models::TimerId::new(10));
        store.save(&timer2).unwrap();
        store.save(&timer1).unwrap();
        assert!(dir.path().join("timers/1.timer.json").is_file());

        let loaded = store.load_all().unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0], timer1);
        // Local ids are not persisted.
        assert_eq!(loaded[1].id, None);

        let mut updated = timer1.clone();
        updated.state = TimerState::Completed;
        store.save(&updated).unwrap();
        assert_eq!(store.load_all().unwrap()[0].state, TimerState::Completed);

        store.delete(&timer1).unwrap();
        store.delete(&timer1).unwrap();
        assert_eq!(store.load_all().unwrap().len(), 1);
    }

    #[test]
    fn test_json_timer_store_skips_broken_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonTimerStore::new(dir.path()).unwrap();
        store
            .save(&timer!(local, 1, datetime!("2026-01-01T00:00:00Z")))
            .unwrap();
        std::fs::write(dir.path().join("2.timer.json"), "{").unwrap();
        std::fs::write(dir.path().join("readme.txt"), "").unwrap();
        assert_eq!(store.load_all().unwrap().len(), 1);
    }

    #[test]
    fn test_memory_timer_store() {
        let store = MemoryTimerStore::new();
        let timer = timer!(local, 1, datetime!("2026-01-01T00:00:00Z"));
        store.save(&timer).unwrap();
        assert_eq!(store.load_all().unwrap(), vec![timer.clone()]);
        store.delete(&timer).unwrap();
        assert!(store.load_all().unwrap().is_empty());
    }
}
// </coverage:exclude>
