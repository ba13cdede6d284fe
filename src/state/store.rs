//! On-disk layout of sessions and checkpoints
//!
//! ```text
//! <root>/<session_id>/state.json
//! <root>/<session_id>/checkpoints/<checkpoint_id>.json.gz
//! ```
//!
//! Every file is written to a dot-prefixed temp file in the same directory,
//! fsynced, then renamed into place.

use super::session::{SearchSession, SessionMetadata};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

/// Schema version of checkpoint artifacts
pub const FORMAT_VERSION: u32 = 1;

const METADATA_FILE: &str = "state.json";
const CHECKPOINT_DIR: &str = "checkpoints";
const CHECKPOINT_EXT: &str = ".json.gz";

/// Serialized form of a checkpoint, borrowed for writing
#[derive(Serialize)]
struct CheckpointRecord<'a> {
    format_version: u32,
    checkpoint_id: &'a str,
    label: &'a str,
    session_id: &'a str,
    created_at: DateTime<Utc>,
    session: &'a SearchSession,
}

/// A decoded checkpoint artifact
#[derive(Debug, Clone, Deserialize)]
pub struct Checkpoint {
    pub format_version: u32,
    pub checkpoint_id: String,
    pub label: String,
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub session: SearchSession,
}

/// Listing entry for one checkpoint file
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckpointInfo {
    pub checkpoint_id: String,
    pub label: String,
    pub created_at: Option<DateTime<Utc>>,
    pub size_bytes: u64,
}

/// `[A-Za-z0-9_-]+`, so ids are always safe path components
pub fn is_valid_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 128
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Label part of a `<timestamp>_<seq>_<label>` checkpoint id
pub fn label_of(checkpoint_id: &str) -> &str {
    checkpoint_id.splitn(3, '_').nth(2).unwrap_or_default()
}

/// Filesystem store rooted at the sessions directory
#[derive(Debug, Clone)]
pub struct SessionStore {
    root: PathBuf,
}

impl SessionStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn session_dir(&self, session_id: &str) -> PathBuf {
        self.root.join(session_id)
    }

    fn metadata_path(&self, session_id: &str) -> PathBuf {
        self.session_dir(session_id).join(METADATA_FILE)
    }

    fn checkpoint_dir(&self, session_id: &str) -> PathBuf {
        self.session_dir(session_id).join(CHECKPOINT_DIR)
    }

    fn checkpoint_path(&self, session_id: &str, checkpoint_id: &str) -> PathBuf {
        self.checkpoint_dir(session_id)
            .join(format!("{checkpoint_id}{CHECKPOINT_EXT}"))
    }

    pub fn exists(&self, session_id: &str) -> bool {
        is_valid_id(session_id) && self.metadata_path(session_id).is_file()
    }

    /// Create the session directory tree
    pub fn prepare(&self, session_id: &str) -> Result<()> {
        fs::create_dir_all(self.checkpoint_dir(session_id))?;
        Ok(())
    }

    pub fn write_metadata(&self, metadata: &SessionMetadata) -> Result<()> {
        let json = serde_json::to_vec_pretty(metadata)?;
        write_atomic(&self.metadata_path(&metadata.session_id), &json)
    }

    pub fn read_metadata(&self, session_id: &str) -> Result<SessionMetadata> {
        if !self.exists(session_id) {
            return Err(Error::SessionNotFound(session_id.to_string()));
        }
        let content = fs::read(self.metadata_path(session_id))?;
        Ok(serde_json::from_slice(&content)?)
    }

    /// Ids of every directory holding session metadata
    pub fn session_ids(&self) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let Ok(entry) = entry else {
                continue;
            };
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if self.exists(&name) {
                ids.push(name);
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Write a new checkpoint; an existing artifact is never replaced
    pub fn write_checkpoint(
        &self,
        session: &SearchSession,
        checkpoint_id: &str,
        label: &str,
    ) -> Result<PathBuf> {
        let path = self.checkpoint_path(&session.session_id, checkpoint_id);
        if path.exists() {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("checkpoint {checkpoint_id} already exists"),
            )));
        }

        let record = CheckpointRecord {
            format_version: FORMAT_VERSION,
            checkpoint_id,
            label,
            session_id: &session.session_id,
            created_at: Utc::now(),
            session,
        };
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        serde_json::to_writer(&mut encoder, &record)?;
        let bytes = encoder.finish()?;

        fs::create_dir_all(self.checkpoint_dir(&session.session_id))?;
        write_atomic(&path, &bytes)?;
        Ok(path)
    }

    pub fn read_checkpoint(&self, session_id: &str, checkpoint_id: &str) -> Result<Checkpoint> {
        let path = self.checkpoint_path(session_id, checkpoint_id);
        if !is_valid_id(session_id) || !is_valid_id(checkpoint_id) || !path.is_file() {
            return Err(Error::CheckpointNotFound {
                session_id: session_id.to_string(),
                checkpoint_id: checkpoint_id.to_string(),
            });
        }

        let corrupt = |reason: String| Error::CheckpointCorrupt {
            session_id: session_id.to_string(),
            checkpoint_id: checkpoint_id.to_string(),
            reason,
        };

        let mut json = Vec::new();
        GzDecoder::new(fs::File::open(&path)?)
            .read_to_end(&mut json)
            .map_err(|e| corrupt(format!("decompression failed: {e}")))?;

        let value: serde_json::Value =
            serde_json::from_slice(&json).map_err(|e| corrupt(format!("invalid JSON: {e}")))?;
        let version = value
            .get("format_version")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| corrupt("missing format_version".to_string()))?;
        if version != u64::from(FORMAT_VERSION) {
            return Err(corrupt(format!("unsupported format version {version}")));
        }

        let checkpoint: Checkpoint =
            serde_json::from_value(value).map_err(|e| corrupt(format!("invalid schema: {e}")))?;
        if checkpoint.session.session_id != session_id {
            return Err(corrupt(format!(
                "belongs to session {}",
                checkpoint.session.session_id
            )));
        }
        Ok(checkpoint)
    }

    /// Checkpoint ids of a session, oldest first
    pub fn checkpoint_ids(&self, session_id: &str) -> Result<Vec<String>> {
        Ok(self
            .checkpoint_files(session_id)?
            .into_iter()
            .map(|(id, _)| id)
            .collect())
    }

    pub fn checkpoint_infos(&self, session_id: &str) -> Result<Vec<CheckpointInfo>> {
        let mut infos = Vec::new();
        for (checkpoint_id, path) in self.checkpoint_files(session_id)? {
            let metadata = fs::metadata(&path)?;
            infos.push(CheckpointInfo {
                label: label_of(&checkpoint_id).to_string(),
                created_at: metadata.modified().ok().map(DateTime::<Utc>::from),
                size_bytes: metadata.len(),
                checkpoint_id,
            });
        }
        Ok(infos)
    }

    fn checkpoint_files(&self, session_id: &str) -> Result<Vec<(String, PathBuf)>> {
        if !self.exists(session_id) {
            return Err(Error::SessionNotFound(session_id.to_string()));
        }
        let dir = self.checkpoint_dir(session_id);
        if !dir.is_dir() {
            return Ok(vec![]);
        }

        let mut files = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let Ok(entry) = entry else {
                continue;
            };
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') {
                continue;
            }
            if let Some(id) = name.strip_suffix(CHECKPOINT_EXT) {
                files.push((id.to_string(), entry.path()));
            }
        }
        files.sort();
        Ok(files)
    }

    /// Remove a session and all of its checkpoints
    pub fn delete(&self, session_id: &str) -> Result<bool> {
        if !is_valid_id(session_id) {
            return Ok(false);
        }
        let dir = self.session_dir(session_id);
        if !dir.exists() {
            return Ok(false);
        }
        fs::remove_dir_all(dir)?;
        Ok(true)
    }
}

/// Temp file, fsync, rename
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp_path = dir.join(format!(".{file_name}.tmp"));

    let mut file = fs::File::create(&tmp_path)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    drop(file);

    fs::rename(&tmp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::session::SessionFlags;

    fn store() -> (tempfile::TempDir, SessionStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path().join("sessions")).unwrap();
        (dir, store)
    }

    fn saved_session(store: &SessionStore, id: &str) -> SearchSession {
        let session = SearchSession::new(id, "query", vec!["a".into()], SessionFlags::default());
        store.prepare(id).unwrap();
        store.write_metadata(&session.summary()).unwrap();
        session
    }

    #[test]
    fn id_validation() {
        assert!(is_valid_id("abc_123-XYZ"));
        assert!(!is_valid_id(""));
        assert!(!is_valid_id("../etc"));
        assert!(!is_valid_id("a b"));
        assert_eq!(label_of("20240101T000000000_0001_paused_tier2"), "paused_tier2");
        assert_eq!(label_of("nolabel"), "");
    }

    #[test]
    fn metadata_round_trip() {
        let (_dir, store) = store();
        let session = saved_session(&store, "s1");
        assert_eq!(store.read_metadata("s1").unwrap(), session.summary());
        assert_eq!(store.session_ids().unwrap(), vec!["s1"]);
        assert!(matches!(
            store.read_metadata("missing"),
            Err(Error::SessionNotFound(_))
        ));
    }

    #[test]
    fn checkpoint_round_trip_and_no_overwrite() {
        let (_dir, store) = store();
        let session = saved_session(&store, "s1");
        store.write_checkpoint(&session, "20240101T000000000_0001_auto", "auto").unwrap();

        let checkpoint = store.read_checkpoint("s1", "20240101T000000000_0001_auto").unwrap();
        assert_eq!(checkpoint.format_version, FORMAT_VERSION);
        assert_eq!(checkpoint.label, "auto");
        assert_eq!(checkpoint.session, session);

        assert!(store
            .write_checkpoint(&session, "20240101T000000000_0001_auto", "auto")
            .is_err());

        let infos = store.checkpoint_infos("s1").unwrap();
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].label, "auto");
        assert!(infos[0].size_bytes > 0);
    }

    #[test]
    fn missing_and_corrupt_checkpoints() {
        let (_dir, store) = store();
        let session = saved_session(&store, "s1");
        store.write_checkpoint(&session, "20240101T000000000_0001_good", "good").unwrap();

        assert!(matches!(
            store.read_checkpoint("s1", "nope"),
            Err(Error::CheckpointNotFound { .. })
        ));

        let bad = store.checkpoint_path("s1", "20240101T000000001_0002_bad");
        fs::write(&bad, b"definitely not gzip").unwrap();
        assert!(matches!(
            store.read_checkpoint("s1", "20240101T000000001_0002_bad"),
            Err(Error::CheckpointCorrupt { .. })
        ));

        // a future schema version is refused
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(br#"{"format_version": 99}"#).unwrap();
        let future = store.checkpoint_path("s1", "20240101T000000002_0003_future");
        fs::write(&future, encoder.finish().unwrap()).unwrap();
        match store.read_checkpoint("s1", "20240101T000000002_0003_future") {
            Err(Error::CheckpointCorrupt { reason, .. }) => assert!(reason.contains("99")),
            other => panic!("expected corrupt checkpoint, got {other:?}"),
        }

        // the good checkpoint is unaffected
        assert!(store.read_checkpoint("s1", "20240101T000000000_0001_good").is_ok());
    }

    #[test]
    fn temp_files_are_not_listed() {
        let (_dir, store) = store();
        saved_session(&store, "s1");
        fs::write(
            store.checkpoint_dir("s1").join(".x.json.gz.tmp"),
            b"partial",
        )
        .unwrap();
        assert!(store.checkpoint_ids("s1").unwrap().is_empty());
    }

    #[test]
    fn delete_removes_everything() {
        let (_dir, store) = store();
        let session = saved_session(&store, "s1");
        store.write_checkpoint(&session, "20240101T000000000_0001_x", "x").unwrap();
        assert!(store.delete("s1").unwrap());
        assert!(!store.exists("s1"));
        assert!(!store.delete("s1").unwrap());
    }
}
