//! File-based state storage for Grind.
//!
//! Each editing session gets a directory under `~/.grind/state/`, and each
//! key is stored in its own JSON file inside it. One file per key keeps
//! resources independent: two processes evaluating different files never
//! rewrite each other's counters. Atomic writes use temp file + rename.
//! The session directory is created by the first write, so read-only use
//! leaves nothing behind.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::config::state_dir;
use crate::error::{GrindError, Result};
use crate::storage::StateStore;

/// Session used when the host does not supply one.
pub const DEFAULT_SESSION_ID: &str = "default";

/// Longest encoded name kept verbatim; NAME_MAX is 255 on common filesystems.
const MAX_ENCODED_LEN: usize = 150;

/// Encoded bytes kept in front of the hash for longer names.
const HASHED_PREFIX_LEN: usize = 100;

/// On-disk record for a single key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct StoredValue {
    key: String,
    value: Value,
    updated_at: DateTime<Utc>,
}

/// File-based state storage scoped to one editing session.
#[derive(Debug, Clone)]
pub struct FileStateStore {
    /// Directory holding this session's key files.
    session_dir: PathBuf,
}

impl FileStateStore {
    /// Open the store for a session under the default state directory.
    ///
    /// Uses `~/.grind/state/<session>/` or `$GRIND_HOME/state/<session>/`.
    pub fn for_session(session_id: &str) -> Result<Self> {
        let dir = state_dir().ok_or_else(|| {
            GrindError::config("Could not determine state directory (no home directory)")
        })?;
        Self::with_dir(dir.join(sanitize_session_id(session_id)))
    }

    /// Open a store rooted at a specific session directory.
    ///
    /// The directory need not exist yet.
    pub fn with_dir(session_dir: impl Into<PathBuf>) -> Result<Self> {
        Ok(Self {
            session_dir: session_dir.into(),
        })
    }

    /// The directory this store writes to.
    pub fn dir(&self) -> &Path {
        &self.session_dir
    }

    fn value_path(&self, key: &str) -> PathBuf {
        self.session_dir.join(format!("{}.json", encode_key(key)))
    }

    fn temp_path(&self, key: &str) -> PathBuf {
        self.session_dir.join(format!(".{}.json.tmp", encode_key(key)))
    }

    fn atomic_write(&self, record: &StoredValue) -> Result<()> {
        let final_path = self.value_path(&record.key);
        let temp_path = self.temp_path(&record.key);

        let json = serde_json::to_string_pretty(record)?;

        fs::create_dir_all(&self.session_dir)
            .map_err(|e| GrindError::storage(&self.session_dir, e))?;

        {
            let mut file =
                fs::File::create(&temp_path).map_err(|e| GrindError::storage(&temp_path, e))?;
            file.write_all(json.as_bytes())
                .map_err(|e| GrindError::storage(&temp_path, e))?;
            file.sync_all()
                .map_err(|e| GrindError::storage(&temp_path, e))?;
        }

        fs::rename(&temp_path, &final_path).map_err(|e| GrindError::storage(&final_path, e))?;

        Ok(())
    }

    fn read_record(path: &Path) -> Result<StoredValue> {
        let content = fs::read_to_string(path).map_err(|e| GrindError::storage(path, e))?;
        serde_json::from_str(&content).map_err(|e| {
            GrindError::invalid_state(format!("corrupt state file {}: {}", path.display(), e))
        })
    }
}

impl StateStore for FileStateStore {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        let path = self.value_path(key);

        match fs::metadata(&path) {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(GrindError::storage(&path, e)),
        }

        let record = Self::read_record(&path)?;
        if record.key != key {
            return Err(GrindError::invalid_state(format!(
                "state file {} holds key '{}', expected '{}'",
                path.display(),
                record.key,
                key
            )));
        }

        Ok(Some(record.value))
    }

    fn set(&self, key: &str, value: Value) -> Result<()> {
        self.atomic_write(&StoredValue {
            key: key.to_string(),
            value,
            updated_at: Utc::now(),
        })
    }

    fn entries(&self) -> Result<Vec<(String, Value)>> {
        let entries = match fs::read_dir(&self.session_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(GrindError::storage(&self.session_dir, e)),
        };

        let mut result = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| GrindError::storage(&self.session_dir, e))?;
            let path = entry.path();

            // Skip non-JSON files and temp files
            if path.extension().map(|e| e != "json").unwrap_or(true) {
                continue;
            }
            if path
                .file_name()
                .map(|n| n.to_string_lossy().starts_with('.'))
                .unwrap_or(true)
            {
                continue;
            }

            let record = Self::read_record(&path)?;
            result.push((record.key, record.value));
        }

        Ok(result)
    }
}

/// Map a session id onto a single safe path component.
///
/// Uses the same injective encoding as key filenames, so distinct ids never
/// share counters.
pub fn sanitize_session_id(session_id: &str) -> String {
    if session_id.is_empty() {
        DEFAULT_SESSION_ID.to_string()
    } else {
        encode_key(session_id)
    }
}

/// Injective filename encoding: `[A-Za-z0-9_-]` pass through, every other
/// byte becomes `%XX`.
///
/// Names longer than `MAX_ENCODED_LEN` become a readable prefix plus `~`
/// and the SHA-256 of the full key. `~` never appears in the short form.
fn encode_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for byte in key.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{:02X}", byte));
        }
    }

    if out.len() <= MAX_ENCODED_LEN {
        return out;
    }

    // The encoding is pure ASCII, so any byte index is a char boundary
    let mut prefix_len = HASHED_PREFIX_LEN;
    // Do not split a %XX escape
    while out.as_bytes()[prefix_len - 1] == b'%' || out.as_bytes()[prefix_len - 2] == b'%' {
        prefix_len -= 1;
    }

    let digest = Sha256::digest(key.as_bytes());
    let hash: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
    format!("{}~{}", &out[..prefix_len], hash)
}
