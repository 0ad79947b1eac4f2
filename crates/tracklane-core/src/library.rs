//! Local sound library: uploaded blobs under `uploads/` plus a JSON index.

use std::{
    collections::BTreeSet,
    fs,
    path::{Path, PathBuf},
};

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use walkdir::WalkDir;

use crate::{decode::load_sound, decode::supported_audio_extensions, persistence::write_atomic};

pub const MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

const INDEX_FILE_NAME: &str = "sounds.json";
const UPLOADS_DIR_NAME: &str = "uploads";

#[derive(Debug, Error)]
pub enum LibraryError {
    #[error("{0} is required")]
    MissingField(&'static str),
    #[error("unsupported audio type: {0}")]
    UnsupportedType(String),
    #[error("upload is {bytes} bytes, limit is {limit}")]
    TooLarge { bytes: usize, limit: usize },
    #[error("sound {0} not found")]
    NotFound(u64),
    #[error("sound index {} is corrupt", path.display())]
    CorruptIndex {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SoundRecord {
    pub id: u64,
    pub title: String,
    pub category: String,
    pub duration: f64,
    pub tags: Vec<String>,
    pub filename: String,
    pub original_name: String,
    pub upload_date: DateTime<Utc>,
}

impl SoundRecord {
    /// Name offered when the original file is downloaded.
    #[must_use]
    pub fn download_name(&self) -> String {
        match Path::new(&self.original_name).extension() {
            Some(extension) => format!("{}.{}", self.title, extension.to_string_lossy()),
            None => format!("{}.mp3", self.title),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewSound {
    pub title: String,
    pub category: String,
    pub tags: Vec<String>,
    pub original_name: String,
}

impl NewSound {
    /// Splits a comma-separated tag list, dropping blanks.
    #[must_use]
    pub fn parse_tags(raw: &str) -> Vec<String> {
        raw.split(',')
            .map(str::trim)
            .filter(|tag| !tag.is_empty())
            .map(str::to_string)
            .collect()
    }
}

/// Where the engine gets sound bytes from and sends new uploads to.
pub trait SoundSource {
    fn fetch(&self, id: u64) -> Result<Vec<u8>, LibraryError>;
    fn store(&mut self, sound: NewSound, bytes: &[u8]) -> Result<SoundRecord, LibraryError>;
}

#[derive(Debug, Clone)]
pub struct DirectoryLibrary {
    root: PathBuf,
    records: Vec<SoundRecord>,
}

impl DirectoryLibrary {
    /// Opens (creating if needed) a library rooted at `root`. A missing
    /// index starts the library empty. An index that does not parse is an
    /// error and is left on disk untouched.
    #[instrument(fields(root = %root.as_ref().display()))]
    pub fn open(root: impl AsRef<Path>) -> Result<Self, LibraryError> {
        let root = root.as_ref().to_path_buf();
        let uploads = root.join(UPLOADS_DIR_NAME);
        fs::create_dir_all(&uploads).with_context(|| {
            format!("failed to create uploads directory: {}", uploads.display())
        })?;

        let index_path = root.join(INDEX_FILE_NAME);
        let records = match fs::read(&index_path) {
            Ok(content) => serde_json::from_slice(&content).map_err(|source| {
                warn!(%source, path = %index_path.display(), "sound index does not parse");
                LibraryError::CorruptIndex {
                    path: index_path.clone(),
                    source,
                }
            })?,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(error) => {
                return Err(anyhow::Error::new(error)
                    .context(format!("failed to read index: {}", index_path.display()))
                    .into());
            }
        };

        debug!(sounds = records.len(), "sound library opened");
        Ok(Self { root, records })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn list(&self) -> &[SoundRecord] {
        &self.records
    }

    #[must_use]
    pub fn get(&self, id: u64) -> Option<&SoundRecord> {
        self.records.iter().find(|record| record.id == id)
    }

    #[must_use]
    pub fn file_path(&self, record: &SoundRecord) -> PathBuf {
        self.root.join(UPLOADS_DIR_NAME).join(&record.filename)
    }

    #[instrument(skip(self))]
    pub fn delete(&mut self, id: u64) -> Result<SoundRecord, LibraryError> {
        let position = self
            .records
            .iter()
            .position(|record| record.id == id)
            .ok_or(LibraryError::NotFound(id))?;
        let record = self.records.remove(position);

        let path = self.file_path(&record);
        if let Err(error) = fs::remove_file(&path) {
            warn!(path = %path.display(), %error, "sound file already gone");
        }
        self.save_index()?;
        info!(id, title = %record.title, "sound deleted");
        Ok(record)
    }

    /// Audio files in `uploads/` that no record points at.
    pub fn unindexed_files(&self) -> Vec<PathBuf> {
        let known: BTreeSet<&str> = self
            .records
            .iter()
            .map(|record| record.filename.as_str())
            .collect();
        let extensions = supported_audio_extensions();
        let mut orphans = Vec::new();

        for entry in WalkDir::new(self.root.join(UPLOADS_DIR_NAME)).max_depth(1) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(error) => {
                    warn!(?error, "ignoring unreadable entry while scanning uploads");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let supported = path
                .extension()
                .and_then(|value| value.to_str())
                .is_some_and(|value| extensions.contains(value.to_ascii_lowercase().as_str()));
            let indexed = path
                .file_name()
                .and_then(|value| value.to_str())
                .is_some_and(|name| known.contains(name));
            if supported && !indexed {
                orphans.push(path.to_path_buf());
            }
        }

        orphans.sort();
        orphans
    }

    fn next_id(&self) -> u64 {
        self.records
            .iter()
            .map(|record| record.id)
            .max()
            .map_or(1, |id| id + 1)
    }

    fn save_index(&self) -> Result<(), LibraryError> {
        let json =
            serde_json::to_vec_pretty(&self.records).context("failed to encode sound index")?;
        write_atomic(&self.root.join(INDEX_FILE_NAME), &json)?;
        Ok(())
    }
}

impl SoundSource for DirectoryLibrary {
    #[instrument(skip(self))]
    fn fetch(&self, id: u64) -> Result<Vec<u8>, LibraryError> {
        let record = self.get(id).ok_or(LibraryError::NotFound(id))?;
        let path = self.file_path(record);
        let bytes = fs::read(&path)
            .with_context(|| format!("failed to read sound file: {}", path.display()))?;
        Ok(bytes)
    }

    #[instrument(skip(self, sound, bytes), fields(title = %sound.title, bytes = bytes.len()))]
    fn store(&mut self, sound: NewSound, bytes: &[u8]) -> Result<SoundRecord, LibraryError> {
        if sound.title.trim().is_empty() {
            return Err(LibraryError::MissingField("title"));
        }
        if sound.category.trim().is_empty() {
            return Err(LibraryError::MissingField("category"));
        }
        if bytes.len() > MAX_UPLOAD_BYTES {
            return Err(LibraryError::TooLarge {
                bytes: bytes.len(),
                limit: MAX_UPLOAD_BYTES,
            });
        }

        let extension = Path::new(&sound.original_name)
            .extension()
            .and_then(|value| value.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        if !supported_audio_extensions().contains(extension.as_str()) {
            return Err(LibraryError::UnsupportedType(sound.original_name));
        }

        let id = self.next_id();
        let now = Utc::now();
        let filename = format!(
            "audio-{}-{}.{extension}",
            now.timestamp_millis(),
            fastrand::u32(..1_000_000_000)
        );
        let duration = load_sound(&id.to_string(), bytes.to_vec(), Some(&extension))
            .duration_seconds();

        let record = SoundRecord {
            id,
            title: sound.title.trim().to_string(),
            category: sound.category.trim().to_string(),
            duration,
            tags: sound.tags,
            filename,
            original_name: sound.original_name,
            upload_date: now,
        };

        write_atomic(&self.file_path(&record), bytes)?;
        self.records.push(record.clone());
        if let Err(error) = self.save_index() {
            self.records.pop();
            let _ = fs::remove_file(self.file_path(&record));
            return Err(error);
        }

        info!(id, filename = %record.filename, duration, "sound stored");
        Ok(record)
    }
}
