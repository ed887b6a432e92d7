use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

use pvr_core::clients::PvrClient;
use pvr_core::epg::EpgSource;
use pvr_core::error::Error;
use pvr_core::models::Channel;
use pvr_core::models::ChannelGroup;
use pvr_core::models::ChannelId;
use pvr_core::models::ClientId;
use pvr_core::models::ClientIndex;
use pvr_core::models::EpgTag;
use pvr_core::models::Recording;
use pvr_core::models::Timer;
use pvr_core::models::TimerOperationResult;

/// A backend reading everything from a JSON file.
///
/// The file is read on every request so that changes made by other programs
/// are visible.  Timer operations write the file back.
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    id: ClientId,
    name: String,
    // Serializes modifications of the file.
    write_lock: Mutex<()>,
}

#[derive(Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
#[serde(deny_unknown_fields)]
struct BackendData {
    #[serde(default = "BackendData::default_client_id")]
    client_id: ClientId,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    groups: Vec<GroupData>,
    #[serde(default)]
    channels: Vec<Channel>,
    #[serde(default)]
    programs: Vec<EpgTag>,
    #[serde(default)]
    timers: Vec<Timer>,
    #[serde(default)]
    recordings: Vec<Recording>,
}

impl BackendData {
    fn default_client_id() -> ClientId {
        ClientId::new(1)
    }
}

#[derive(Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
struct GroupData {
    #[serde(flatten)]
    group: ChannelGroup,
    // Channels in the display order.
    channels: Vec<ChannelId>,
}

impl FileBackend {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref().to_owned();
        let data = Self::read(&path)?;
        let name = data.name.clone().unwrap_or_else(|| "file".to_string());
        tracing::debug!(?path, client.id = %data.client_id, client.name = %name, "Loaded");
        Ok(FileBackend {
            path,
            id: data.client_id,
            name,
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(path: &Path) -> Result<BackendData, Error> {
        let file = std::fs::File::open(path)?;
        Ok(serde_json::from_reader(std::io::BufReader::new(file))?)
    }

    fn load(&self) -> Result<BackendData, Error> {
        Self::read(&self.path)
    }

    fn modify<F, R>(&self, f: F) -> Result<R, Error>
    where
        F: FnOnce(&mut BackendData) -> Result<R, Error>,
    {
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut data = self.load()?;
        let result = f(&mut data)?;
        // Write to <path>.new, then rename it to <path>.
        let json = serde_json::to_vec_pretty(&data)?;
        let new_path = self.path.with_extension("json.new");
        {
            let mut file = std::fs::File::create(&new_path)?;
            file.write_all(&json)?;
            file.sync_all()?;
        }
        std::fs::rename(&new_path, &self.path)?;
        Ok(result)
    }

    fn find_timer<'a>(data: &'a mut BackendData, timer: &Timer) -> Result<&'a mut Timer, Error> {
        data.timers
            .iter_mut()
            .find(|t| t.client_index == timer.client_index)
            .ok_or(Error::TimerNotFound(timer.key()))
    }
}

#[async_trait]
impl PvrClient for FileBackend {
    fn id(&self) -> ClientId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn list_timers(&self) -> Result<Vec<Timer>, Error> {
        Ok(self.load()?.timers)
    }

    async fn list_recordings(&self) -> Result<Vec<Recording>, Error> {
        Ok(self.load()?.recordings)
    }

    async fn add_timer(&self, timer: &Timer) -> Result<(), Error> {
        let index = self.modify(|data| {
            let index = data
                .timers
                .iter()
                .map(|t| t.client_index.value())
                .max()
                .unwrap_or(0)
                + 1;
            let mut timer = timer.clone();
            timer.id = None;
            timer.client_id = self.id;
            timer.client_index = ClientIndex::new(index);
            data.timers.push(timer);
            Ok(index)
        })?;
        tracing::info!(client.id = %self.id, timer.index = index, "Added timer");
        Ok(())
    }

    async fn delete_timer(
        &self,
        timer: &Timer,
        force: bool,
        cascade: bool,
    ) -> Result<TimerOperationResult, Error> {
        self.modify(|data| {
            let target = Self::find_timer(data, timer)?;
            if target.is_recording() && !force {
                return Ok(TimerOperationResult::Recording);
            }
            let index = timer.client_index;
            data.timers.retain(|t| t.client_index != index);
            if cascade {
                data.timers.retain(|t| t.parent != Some(index));
            } else {
                for t in data.timers.iter_mut().filter(|t| t.parent == Some(index)) {
                    t.parent = None;
                }
            }
            Ok(TimerOperationResult::Ok)
        })
    }

    async fn rename_timer(&self, timer: &Timer, name: &str) -> Result<(), Error> {
        self.modify(|data| {
            Self::find_timer(data, timer)?.title = name.to_string();
            Ok(())
        })
    }

    async fn update_timer(&self, timer: &Timer) -> Result<(), Error> {
        self.modify(|data| {
            let target = Self::find_timer(data, timer)?;
            *target = timer.clone();
            target.id = None;
            target.client_id = self.id;
            Ok(())
        })
    }
}

#[async_trait]
impl EpgSource for FileBackend {
    async fn channel_groups(&self) -> Result<Vec<ChannelGroup>, Error> {
        Ok(self
            .load()?
            .groups
            .into_iter()
            .map(|data| data.group)
            .collect())
    }

    async fn channels_in_group(&self, group: &ChannelGroup) -> Result<Vec<Channel>, Error> {
        let data = self.load()?;
        let Some(group) = data.groups.iter().find(|data| data.group.id == group.id) else {
            return Ok(vec![]);
        };
        Ok(group
            .channels
            .iter()
            .filter_map(|id| data.channels.iter().find(|channel| channel.id == *id))
            .cloned()
            .collect())
    }

    async fn epg_entries_for_channel(
        &self,
        channel: &Channel,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<EpgTag>, Error> {
        let mut entries: Vec<EpgTag> = self
            .load()?
            .programs
            .into_iter()
            .filter(|tag| tag.channel == channel.id)
            .filter(|tag| tag.end > from && tag.start < to)
            .collect();
        entries.sort_by_key(|tag| tag.start);
        Ok(entries)
    }
}

// </coverage:exclude>
