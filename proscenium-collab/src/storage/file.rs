//! File-backed scene store.
//!
//! Layout:
//! - one file per scene under `config.path`
//! - file name = escaped scene id + `.json.lz4` (or `.json` when
//!   compression is off)
//! - payload = persistable JSON, LZ4 block-compressed with the
//!   uncompressed size prepended
//!
//! Writes go to a `.tmp` sibling first and are renamed into place, so a
//! crash mid-save leaves the previous version readable.

use async_trait::async_trait;
use proscenium_core::PersistedScene;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;

use super::{SceneStore, StoreError};

const COMPRESSED_EXT: &str = ".json.lz4";
const PLAIN_EXT: &str = ".json";
const TEMP_EXT: &str = ".tmp";

/// Store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Directory holding one file per scene
    pub path: PathBuf,
    /// LZ4-compress payloads (default: true)
    pub compression: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("proscenium_data"),
            compression: true,
        }
    }
}

impl StoreConfig {
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug)]
pub struct FileStore {
    config: StoreConfig,
}

impl FileStore {
    /// Open the store, creating its directory if needed.
    pub async fn open(config: StoreConfig) -> Result<Self, StoreError> {
        fs::create_dir_all(&config.path).await?;
        log::info!("Scene store opened at {}", config.path.display());
        Ok(Self { config })
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }

    /// Ids of every scene with a payload on disk.
    pub async fn scene_ids(&self) -> Result<Vec<String>, StoreError> {
        let ext = self.extension();
        let mut ids = Vec::new();
        let mut entries = fs::read_dir(&self.config.path).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(stem) = name.to_str().and_then(|name| name.strip_suffix(ext)) else {
                continue;
            };
            match unescape(stem) {
                Some(id) => ids.push(id),
                None => log::warn!("Ignoring unrecognized file {:?} in scene store", name),
            }
        }
        ids.sort();
        Ok(ids)
    }

    fn extension(&self) -> &'static str {
        if self.config.compression {
            COMPRESSED_EXT
        } else {
            PLAIN_EXT
        }
    }

    fn scene_path(&self, scene_id: &str) -> PathBuf {
        self.config
            .path
            .join(format!("{}{}", escape(scene_id), self.extension()))
    }

    fn encode(&self, scene: &PersistedScene) -> Result<Vec<u8>, StoreError> {
        let json = serde_json::to_vec(scene)?;
        Ok(if self.config.compression {
            lz4_flex::compress_prepend_size(&json)
        } else {
            json
        })
    }

    fn decode(&self, bytes: &[u8]) -> Result<PersistedScene, StoreError> {
        if self.config.compression {
            let json = lz4_flex::decompress_size_prepended(bytes)?;
            Ok(serde_json::from_slice(&json)?)
        } else {
            Ok(serde_json::from_slice(bytes)?)
        }
    }
}

#[async_trait]
impl SceneStore for FileStore {
    async fn load(&self, scene_id: &str) -> Result<Option<PersistedScene>, StoreError> {
        let path = self.scene_path(scene_id);
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let scene = self.decode(&bytes)?;
        log::debug!("Loaded scene {scene_id} at version {} ({} bytes)", scene.version(), bytes.len());
        Ok(Some(scene))
    }

    async fn save(&self, scene: &PersistedScene) -> Result<(), StoreError> {
        let path = self.scene_path(scene.scene_id());
        let mut temp = path.clone().into_os_string();
        temp.push(TEMP_EXT);

        let bytes = self.encode(scene)?;
        fs::write(&temp, &bytes).await?;
        fs::rename(&temp, &path).await?;
        log::debug!(
            "Saved scene {} at version {} ({} bytes)",
            scene.scene_id(),
            scene.version(),
            bytes.len()
        );
        Ok(())
    }
}

/// Map a scene id to a portable file stem: `[A-Za-z0-9_-]` pass through,
/// every other byte becomes `%XX`.
fn escape(scene_id: &str) -> String {
    let mut out = String::with_capacity(scene_id.len());
    for byte in scene_id.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'_' || byte == b'-' {
            out.push(char::from(byte));
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

fn unescape(stem: &str) -> Option<String> {
    let mut bytes = Vec::with_capacity(stem.len());
    let mut rest = stem.as_bytes();
    while let Some((&byte, tail)) = rest.split_first() {
        if byte == b'%' {
            let hex = tail.get(..2)?;
            let hex = std::str::from_utf8(hex).ok()?;
            bytes.push(u8::from_str_radix(hex, 16).ok()?);
            rest = &tail[2..];
        } else {
            bytes.push(byte);
            rest = tail;
        }
    }
    String::from_utf8(bytes).ok()
}
