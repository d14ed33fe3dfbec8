//! # Credential Storage
//!
//! The device keeps exactly one record: the WiFi network to join and where the
//! user lives. Its presence decides the boot path:
//!
//! - **Present and readable**: try to join the network
//! - **Absent or corrupt**: start the captive portal
//!
//! [`FileCredentialStore`] writes the record as JSON through a temp file and a
//! rename, so a power cut or reboot can never leave a half-written record
//! behind.

use crate::{Credentials, TrackerError, TrackerResult};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Owner of the persisted [`Credentials`] record.
pub trait CredentialStore {
    /// `Ok(None)` when there is no usable record.
    fn load(&self) -> TrackerResult<Option<Credentials>>;

    fn save(&mut self, credentials: &Credentials) -> TrackerResult<()>;

    /// Removing a record that does not exist is not an error.
    fn delete(&mut self) -> TrackerResult<()>;

    /// Like [`CredentialStore::load`], but a missing record is
    /// [`TrackerError::CredentialsMissing`].
    fn require(&self) -> TrackerResult<Credentials> {
        self.load()?.ok_or(TrackerError::CredentialsMissing)
    }
}

impl<S: CredentialStore + ?Sized> CredentialStore for &mut S {
    fn load(&self) -> TrackerResult<Option<Credentials>> {
        (**self).load()
    }

    fn save(&mut self, credentials: &Credentials) -> TrackerResult<()> {
        (**self).save(credentials)
    }

    fn delete(&mut self) -> TrackerResult<()> {
        (**self).delete()
    }
}

/// JSON record at a fixed path, `wifi.json` by default.
#[derive(Clone, Debug)]
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn staging_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl CredentialStore for FileCredentialStore {
    fn load(&self) -> TrackerResult<Option<Credentials>> {
        let data = match fs::read(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_slice::<Credentials>(&data) {
            Ok(credentials) => Ok(Some(credentials)),
            Err(e) => {
                // Same outcome as a missing file: the user re-runs setup.
                warn!(path = %self.path.display(), "unreadable credential record: {}", e);
                Ok(None)
            }
        }
    }

    fn save(&mut self, credentials: &Credentials) -> TrackerResult<()> {
        let data = serde_json::to_vec(credentials)?;
        let staging = self.staging_path();
        // On disk before the rename, since a reboot follows right after
        let mut file = File::create(&staging)?;
        file.write_all(&data)?;
        file.sync_all()?;
        drop(file);
        fs::rename(&staging, &self.path)?;
        debug!(path = %self.path.display(), ssid = %credentials.ssid, "credentials saved");
        Ok(())
    }

    fn delete(&mut self) -> TrackerResult<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                debug!(path = %self.path.display(), "credentials deleted");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample() -> Credentials {
        Credentials {
            ssid: "HomeNet".to_string(),
            password: "hunter22".to_string(),
            latitude: 35.78,
            longitude: -78.64,
        }
    }

    fn store_in(dir: &TempDir) -> FileCredentialStore {
        FileCredentialStore::new(dir.path().join("wifi.json"))
    }

    #[test]
    fn missing_file_is_no_record() {
        let dir = TempDir::new().unwrap();
        assert!(store_in(&dir).load().unwrap().is_none());
    }

    #[test]
    fn save_then_load_returns_the_record() {
        let dir = TempDir::new().unwrap();
        let mut store = store_in(&dir);
        store.save(&sample()).unwrap();

        assert_eq!(store.load().unwrap(), Some(sample()));
        assert!(!dir.path().join("wifi.json.tmp").exists());
    }

    #[test]
    fn record_uses_form_field_names() {
        let dir = TempDir::new().unwrap();
        let mut store = store_in(&dir);
        store.save(&sample()).unwrap();

        let raw: serde_json::Value =
            serde_json::from_slice(&fs::read(store.path()).unwrap()).unwrap();
        assert_eq!(raw["ssid"], "HomeNet");
        assert_eq!(raw["lat"], 35.78);
        assert_eq!(raw["lng"], -78.64);
    }

    #[test]
    fn string_coordinates_from_older_records_are_accepted() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        fs::write(
            store.path(),
            r#"{"ssid":"HomeNet","password":"hunter22","lat":"35.78","lng":" -78.64"}"#,
        )
        .unwrap();

        assert_eq!(store.load().unwrap(), Some(sample()));
    }

    #[test]
    fn corrupt_record_is_treated_as_missing() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        fs::write(store.path(), b"{\"ssid\": ").unwrap();
        assert!(store.load().unwrap().is_none());

        fs::write(store.path(), br#"{"ssid":"x","password":"y","lat":"north","lng":1}"#).unwrap();
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn saving_again_replaces_record_without_leftovers() {
        let dir = TempDir::new().unwrap();
        let mut store = store_in(&dir);
        store.save(&sample()).unwrap();

        let updated = Credentials {
            password: "new-password".to_string(),
            ..sample()
        };
        store.save(&updated).unwrap();

        assert_eq!(store.require().unwrap(), updated);
        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("wifi.json")]);
    }

    #[test]
    fn require_reports_missing_record() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            store_in(&dir).require(),
            Err(TrackerError::CredentialsMissing)
        ));
    }

    #[test]
    fn delete_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let mut store = store_in(&dir);
        store.save(&sample()).unwrap();

        store.delete().unwrap();
        assert!(!store.path().exists());
        store.delete().unwrap();
    }

    #[test]
    fn debug_output_hides_the_password() {
        let shown = format!("{:?}", sample());
        assert!(shown.contains("HomeNet"));
        assert!(!shown.contains("hunter22"));
    }
}
