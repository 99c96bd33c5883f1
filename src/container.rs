use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::cluster::{ClusterLevel, DataUsagePreferences};
use crate::error::{ContainerError, Result};
use crate::metadata::MetadataStore;
use crate::payload::PayloadStore;
use crate::resources::{ContainerInner, Resources};
use crate::time::now;
use crate::tree::{Element, Folder};

const PREFERENCES_LEN: usize = 2;

fn payload_path(metadata_path: &Path) -> PathBuf {
    let mut name = metadata_path.as_os_str().to_owned();
    name.push(".payload");
    PathBuf::from(name)
}

/// On-disk locations a [`Container`] was opened from (§6).
#[derive(Debug, Clone)]
pub struct ContainerInfo {
    pub metadata_path: PathBuf,
    pub payload_path: PathBuf,
}

/// A single-file encrypted container (C6): owns the metadata connection and
/// payload store, and hands out [`Folder`]/[`crate::tree::File`] handles
/// that reach back to them through a [`Resources`] weak reference.
pub struct Container {
    inner: Arc<ContainerInner>,
    resources: Resources,
    info: ContainerInfo,
}

impl Container {
    /// Creates a new container at `path` (and a derived payload sibling),
    /// refusing if either already exists. Cluster size defaults to
    /// [`ClusterLevel::Min`]; use [`Self::create_with_level`] to pick another.
    pub fn create(path: impl AsRef<Path>, password: &str) -> Result<Self> {
        Self::create_with_level(path, password, ClusterLevel::Min)
    }

    pub fn create_with_level(path: impl AsRef<Path>, password: &str, cluster_level: ClusterLevel) -> Result<Self> {
        let metadata_path = path.as_ref().to_path_buf();
        let payload_path = payload_path(&metadata_path);

        let metadata = MetadataStore::open(&metadata_path, true).map_err(ContainerError::wrap_create)?;
        let payload = PayloadStore::create(&payload_path, password, cluster_level.bytes())
            .map_err(ContainerError::wrap_create)?;

        let preferences = DataUsagePreferences::new(false, cluster_level);
        metadata
            .set_settings(&Self::settings_blob(&payload, preferences))
            .map_err(ContainerError::wrap_create)?;
        metadata.insert_root(now()).map_err(ContainerError::wrap_create)?;

        let inner = Arc::new(ContainerInner {
            metadata,
            payload: Mutex::new(payload),
            preferences: Mutex::new(preferences),
        });
        let resources = Resources::new(&inner);

        tracing::info!(path = %metadata_path.display(), "container created");
        Ok(Self { inner, resources, info: ContainerInfo { metadata_path, payload_path } })
    }

    /// Opens an existing container. The schema is validated (§4.6), then
    /// settings are loaded and handed to the payload store along with
    /// `password` to unwrap its data key.
    pub fn open(path: impl AsRef<Path>, password: &str) -> Result<Self> {
        let metadata_path = path.as_ref().to_path_buf();
        let payload_path = payload_path(&metadata_path);

        let metadata = MetadataStore::open(&metadata_path, false).map_err(ContainerError::wrap_open)?;
        let settings = metadata
            .get_settings()
            .map_err(ContainerError::wrap_open)?
            .ok_or(ContainerError::IsDamaged)
            .map_err(ContainerError::wrap_open)?;

        let (cluster_level, preferences) = Self::parse_preferences(&settings)?;
        let payload = PayloadStore::open(&payload_path, password, &settings[PREFERENCES_LEN..], cluster_level.bytes())
            .map_err(ContainerError::wrap_open)?;

        let inner = Arc::new(ContainerInner {
            metadata,
            payload: Mutex::new(payload),
            preferences: Mutex::new(preferences),
        });
        let resources = Resources::new(&inner);

        tracing::info!(path = %metadata_path.display(), "container opened");
        Ok(Self { inner, resources, info: ContainerInfo { metadata_path, payload_path } })
    }

    pub fn info(&self) -> &ContainerInfo {
        &self.info
    }

    pub fn get_root(&self) -> Result<Folder> {
        let row = self.inner.metadata.get_element(1)?;
        Element::from_row(row, self.resources.clone())
            .as_folder()
            .ok_or_else(|| ContainerError::Internal("root element is not a Folder".into()))
    }

    /// Resolves an absolute path through the namespace tree (§4.3).
    pub fn resolve(&self, path: &str) -> Result<Option<Element>> {
        crate::tree::resolve_path(&self.inner, &self.resources, path)
    }

    pub fn get_data_usage_preferences(&self) -> DataUsagePreferences {
        *self.inner.preferences.lock().unwrap()
    }

    /// Only `TransactionalWrite` is mutable after creation; the cluster
    /// level is fixed for the container's lifetime (§4.4, §9).
    pub fn set_transactional_write(&self, transactional_write: bool) -> Result<()> {
        let mut preferences = self.inner.preferences.lock().unwrap();
        preferences.set_transactional_write(transactional_write);
        let payload = self.inner.payload.lock().unwrap();
        let blob = Self::settings_blob(&payload, *preferences);
        drop(payload);
        self.inner.metadata.set_settings(&blob)?;
        Ok(())
    }

    /// Drops and recreates the metadata tables and clears the payload file,
    /// then rebuilds the root with its well-known id (§4.6).
    pub fn clear(&self) -> Result<()> {
        self.inner.metadata.clear()?;
        self.inner.payload.lock().unwrap().clear_data()?;
        self.inner.metadata.insert_root(now())?;

        let preferences = *self.inner.preferences.lock().unwrap();
        let payload = self.inner.payload.lock().unwrap();
        self.inner.metadata.set_settings(&Self::settings_blob(&payload, preferences))?;
        tracing::info!("container cleared");
        Ok(())
    }

    /// Delegates to the payload store; metadata (and thus file contents)
    /// are unaffected (§4.6).
    pub fn reset_password(&self, new_password: &str) -> Result<()> {
        let mut payload = self.inner.payload.lock().unwrap();
        payload.reset_password(new_password)?;
        let preferences = *self.inner.preferences.lock().unwrap();
        let blob = Self::settings_blob(&payload, preferences);
        drop(payload);
        self.inner.metadata.set_settings(&blob)?;
        Ok(())
    }

    fn settings_blob(payload: &PayloadStore, preferences: DataUsagePreferences) -> Vec<u8> {
        let mut blob = Vec::new();
        blob.extend_from_slice(&preferences.to_bytes());
        blob.extend_from_slice(&payload.get_data_to_save());
        blob
    }

    fn parse_preferences(settings: &[u8]) -> Result<(ClusterLevel, DataUsagePreferences)> {
        if settings.len() < PREFERENCES_LEN {
            return Err(ContainerError::IsDamaged);
        }
        let preferences = DataUsagePreferences::from_bytes([settings[0], settings[1]]).ok_or(ContainerError::IsDamaged)?;
        Ok((preferences.cluster_level(), preferences))
    }
}
