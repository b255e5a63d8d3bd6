//! Alarm store.
//!
//! A small record store of [`AlarmDefinition`]s kept in memory and,
//! unless created with [`AlarmStore::in_memory`], mirrored to a JSON
//! file after every change. The scheduling core only reads from it.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use chrono::NaiveTime;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::alarm::{AlarmDefinition, AlarmId, AlarmPatch, NewAlarm, ValidationError, WeekdaySet};
use crate::config::Config;
use crate::tracing::prelude::*;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("alarm {0} not found")]
    NotFound(AlarmId),

    #[error(transparent)]
    Invalid(#[from] ValidationError),

    #[error("I/O on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("decoding {path}: {source}")]
    Decode {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// On-disk layout.
#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreFile {
    next_id: u64,
    alarms: Vec<AlarmDefinition>,
}

#[derive(Debug, Default)]
struct Records {
    next_id: u64,
    alarms: BTreeMap<AlarmId, AlarmDefinition>,
}

#[derive(Debug)]
pub struct AlarmStore {
    path: Option<PathBuf>,
    records: RwLock<Records>,
}

impl AlarmStore {
    pub fn in_memory() -> Self {
        Self {
            path: None,
            records: RwLock::new(Records {
                next_id: 1,
                alarms: BTreeMap::new(),
            }),
        }
    }

    /// Open the store at `path`, starting empty if the file does not exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let file = match std::fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str::<StoreFile>(&text).map_err(|source| {
                StoreError::Decode {
                    path: path.clone(),
                    source,
                }
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "Alarm store not found, starting empty");
                StoreFile::default()
            }
            Err(source) => return Err(StoreError::Io { path, source }),
        };

        let alarms: BTreeMap<_, _> = file.alarms.into_iter().map(|a| (a.id, a)).collect();
        // Never reuse an identifier, even if the file's counter is stale.
        let next_id = alarms
            .keys()
            .map(|id| id.0 + 1)
            .max()
            .unwrap_or(1)
            .max(file.next_id);

        debug!(path = %path.display(), count = alarms.len(), "Alarm store opened");
        Ok(Self {
            path: Some(path),
            records: RwLock::new(Records { next_id, alarms }),
        })
    }

    pub fn list(&self) -> Vec<AlarmDefinition> {
        self.records.read().alarms.values().cloned().collect()
    }

    pub fn list_enabled(&self) -> Vec<AlarmDefinition> {
        self.records
            .read()
            .alarms
            .values()
            .filter(|a| a.enabled)
            .cloned()
            .collect()
    }

    pub fn get(&self, id: AlarmId) -> Option<AlarmDefinition> {
        self.records.read().alarms.get(&id).cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().alarms.is_empty()
    }

    pub fn create(&self, new: NewAlarm) -> Result<AlarmDefinition, StoreError> {
        let mut records = self.records.write();
        let alarm = new.into_definition(AlarmId(records.next_id));
        alarm.validate()?;

        records.next_id += 1;
        records.alarms.insert(alarm.id, alarm.clone());
        self.persist(&records)?;

        info!(alarm_id = %alarm.id, name = %alarm.name, "Alarm created");
        Ok(alarm)
    }

    pub fn update(&self, id: AlarmId, patch: AlarmPatch) -> Result<AlarmDefinition, StoreError> {
        let mut records = self.records.write();
        let mut alarm = records
            .alarms
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound(id))?;
        patch.apply(&mut alarm);
        alarm.validate()?;

        records.alarms.insert(id, alarm.clone());
        self.persist(&records)?;

        info!(alarm_id = %id, "Alarm updated");
        Ok(alarm)
    }

    pub fn delete(&self, id: AlarmId) -> Result<(), StoreError> {
        let mut records = self.records.write();
        if records.alarms.remove(&id).is_none() {
            return Err(StoreError::NotFound(id));
        }
        self.persist(&records)?;

        info!(alarm_id = %id, "Alarm deleted");
        Ok(())
    }

    /// Create the default weekday and weekend alarms if the store is empty.
    ///
    /// Returns the alarms created.
    pub fn seed_defaults(&self, config: &Config) -> Result<Vec<AlarmDefinition>, StoreError> {
        if !self.is_empty() {
            debug!("Alarm store already populated, not seeding");
            return Ok(Vec::new());
        }

        let seed = |name: &str, hour, days, media: &str| NewAlarm {
            name: name.to_string(),
            time: NaiveTime::from_hms_opt(hour, 0, 0).unwrap_or_default(),
            days,
            enabled: true,
            media_url: media.to_string(),
            media_kind: crate::alarm::DEFAULT_MEDIA_KIND.to_string(),
            volume_steps: config.volume_steps.clone(),
            step_delay_secs: config.volume_step_delay_secs,
            presence_subject: Some(config.person_entity.clone()),
        };

        let created = vec![
            self.create(seed(
                "Weekday Alarm",
                7,
                WeekdaySet::WEEKDAYS,
                "/media/audio/wake_up.mp3",
            ))?,
            self.create(seed(
                "Weekend Alarm",
                9,
                WeekdaySet::WEEKEND,
                "/media/audio/weekend_wakeup.mp3",
            ))?,
        ];
        info!(count = created.len(), "Seeded default alarms");
        Ok(created)
    }

    /// Write the records to disk via a temporary file and rename.
    fn persist(&self, records: &Records) -> Result<(), StoreError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let io_err = |source| StoreError::Io {
            path: path.clone(),
            source,
        };

        let file = StoreFile {
            next_id: records.next_id,
            alarms: records.alarms.values().cloned().collect(),
        };
        let text = serde_json::to_string_pretty(&file).map_err(|source| StoreError::Decode {
            path: path.clone(),
            source,
        })?;

        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(io_err)?;
        }
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, text).map_err(io_err)?;
        std::fs::rename(&tmp, path).map_err(io_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alarm::parse_time;

    fn new_alarm(name: &str) -> NewAlarm {
        NewAlarm {
            name: name.to_string(),
            time: parse_time("06:30").unwrap(),
            days: WeekdaySet::WEEKDAYS,
            enabled: true,
            media_url: "wake.mp3".to_string(),
            media_kind: "music".to_string(),
            volume_steps: vec![0.3, 0.6],
            step_delay_secs: 10,
            presence_subject: None,
        }
    }

    #[test]
    fn create_assigns_increasing_ids() {
        let store = AlarmStore::in_memory();
        let a = store.create(new_alarm("a")).unwrap();
        let b = store.create(new_alarm("b")).unwrap();
        assert_eq!(a.id, AlarmId(1));
        assert_eq!(b.id, AlarmId(2));
        assert_eq!(store.list().len(), 2);
    }

    #[test]
    fn create_rejects_invalid_alarm() {
        let store = AlarmStore::in_memory();
        let mut bad = new_alarm("bad");
        bad.volume_steps = vec![2.0];
        assert!(matches!(
            store.create(bad),
            Err(StoreError::Invalid(ValidationError::VolumeOutOfRange(_)))
        ));
        assert!(store.is_empty());
    }

    #[test]
    fn list_enabled_filters_disabled() {
        let store = AlarmStore::in_memory();
        let a = store.create(new_alarm("a")).unwrap();
        store.create(new_alarm("b")).unwrap();
        store.update(a.id, AlarmPatch::enable(false)).unwrap();

        let enabled = store.list_enabled();
        assert_eq!(enabled.len(), 1);
        assert_eq!(enabled[0].name, "b");
    }

    #[test]
    fn update_and_delete_unknown_alarm() {
        let store = AlarmStore::in_memory();
        assert!(matches!(
            store.update(AlarmId(9), AlarmPatch::default()),
            Err(StoreError::NotFound(AlarmId(9)))
        ));
        assert!(matches!(
            store.delete(AlarmId(9)),
            Err(StoreError::NotFound(AlarmId(9)))
        ));
    }

    #[test]
    fn file_store_survives_reopen_without_reusing_ids() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("alarms.json");

        let store = AlarmStore::open(&path).unwrap();
        let first = store.create(new_alarm("first")).unwrap();
        let second = store.create(new_alarm("second")).unwrap();
        store.delete(second.id).unwrap();
        drop(store);

        let store = AlarmStore::open(&path).unwrap();
        assert_eq!(store.get(first.id).unwrap().name, "first");
        assert!(store.get(second.id).is_none());

        let third = store.create(new_alarm("third")).unwrap();
        assert_eq!(third.id, AlarmId(3));
    }

    #[test]
    fn corrupt_file_is_a_decode_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alarms.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(
            AlarmStore::open(&path),
            Err(StoreError::Decode { .. })
        ));
    }

    #[test]
    fn seeds_only_an_empty_store() {
        let store = AlarmStore::in_memory();
        let config = Config::default();

        let seeded = store.seed_defaults(&config).unwrap();
        assert_eq!(seeded.len(), 2);
        assert_eq!(seeded[0].days, WeekdaySet::WEEKDAYS);
        assert_eq!(seeded[1].days, WeekdaySet::WEEKEND);
        assert_eq!(seeded[0].presence_subject.as_deref(), Some("person.user"));

        assert!(store.seed_defaults(&config).unwrap().is_empty());
        assert_eq!(store.list().len(), 2);
    }
}
