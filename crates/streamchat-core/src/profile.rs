//! Locally persisted user avatar.
//!
//! The avatar lives in a small key/value store next to the config file,
//! stored as a `data:` URI under a fixed key. Nothing here touches the
//! transcript.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use tracing::debug;

use crate::error::ProfileError;

pub const PROFILE_IMAGE_KEY: &str = "chatProfileImage";

/// Largest image accepted as an avatar (5 MiB)
pub const MAX_IMAGE_BYTES: u64 = 5 * 1024 * 1024;

/// String key/value store persisted as JSON, written through on every change
#[derive(Debug)]
pub struct LocalStore {
    path: PathBuf,
    entries: BTreeMap<String, String>,
}

impl LocalStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ProfileError> {
        let path = path.into();
        let entries = if path.exists() {
            serde_json::from_str(&fs::read_to_string(&path)?)?
        } else {
            BTreeMap::new()
        };
        Ok(Self { path, entries })
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: &str, value: String) -> Result<(), ProfileError> {
        self.entries.insert(key.to_string(), value);
        self.persist()
    }

    /// Returns whether the key was present.
    pub fn remove(&mut self, key: &str) -> Result<bool, ProfileError> {
        let existed = self.entries.remove(key).is_some();
        if existed {
            self.persist()?;
        }
        Ok(existed)
    }

    fn persist(&self) -> Result<(), ProfileError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, serde_json::to_string_pretty(&self.entries)?)?;
        debug!(path = %self.path.display(), keys = self.entries.len(), "local store saved");
        Ok(())
    }
}

pub fn load_profile_image(store: &LocalStore) -> Option<String> {
    store
        .get(PROFILE_IMAGE_KEY)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Save the avatar, or remove it when `image` is `None`.
pub fn store_profile_image(
    store: &mut LocalStore,
    image: Option<String>,
) -> Result<(), ProfileError> {
    match image {
        Some(uri) => store.set(PROFILE_IMAGE_KEY, uri),
        None => store.remove(PROFILE_IMAGE_KEY).map(|_| ()),
    }
}

/// Read an image file and encode it as a `data:` URI.
pub fn image_data_uri(path: &Path) -> Result<String, ProfileError> {
    let mime = image_mime(path).ok_or_else(|| ProfileError::NotAnImage(path.display().to_string()))?;

    let size = fs::metadata(path)?.len();
    if size > MAX_IMAGE_BYTES {
        return Err(ProfileError::TooLarge {
            size,
            limit: MAX_IMAGE_BYTES,
        });
    }

    let bytes = fs::read(path)?;
    Ok(format!("data:{};base64,{}", mime, STANDARD.encode(bytes)))
}

fn image_mime(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        "svg" => Some("image/svg+xml"),
        "bmp" => Some("image/bmp"),
        _ => None,
    }
}
