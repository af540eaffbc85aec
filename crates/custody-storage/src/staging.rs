use std::{
    fs::{self, File, OpenOptions},
    io::{self, BufReader, BufWriter, Read},
    path::{Path, PathBuf},
};

use tempfile::TempDir;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::encryptor::{CryptoError, Encryptor};

const DIR_PREFIX: &str = "custody-";
const ORIGINAL_FILE: &str = "original";
const ENCRYPTED_FILE: &str = "original.enc";

#[derive(Debug, Error)]
pub enum StagingError {
    #[error("staging i/o failure: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// Local scratch space for files mid-pipeline.
///
/// Every [`StagingArea::stage`] call gets its own randomly named directory,
/// so concurrent uploads of the same file name never share a path.
#[derive(Debug, Clone)]
pub struct StagingArea {
    root: PathBuf,
}

impl StagingArea {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Stage under the system temp directory.
    pub fn in_temp_dir() -> Self {
        Self::new(std::env::temp_dir())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Copy the incoming upload into a fresh staging directory.
    #[instrument(skip_all, fields(root = %self.root.display()))]
    pub fn stage<R: Read>(&self, mut content: R) -> Result<StagedUpload, StagingError> {
        fs::create_dir_all(&self.root)?;
        let dir = tempfile::Builder::new()
            .prefix(DIR_PREFIX)
            .tempdir_in(&self.root)?;

        let original = dir.path().join(ORIGINAL_FILE);
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&original)?;
        let mut writer = BufWriter::new(file);
        let original_len = io::copy(&mut content, &mut writer)?;
        let file = writer.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;

        debug!(path = %dir.path().display(), bytes = original_len, "staged upload");
        Ok(StagedUpload {
            dir,
            original,
            encrypted: None,
            original_len,
        })
    }

    /// Remove everything staged for `handle`. Failures are logged, never returned.
    pub fn release(&self, handle: StagedUpload) {
        handle.release();
    }

    /// Staging directories currently present under the root.
    pub fn pending(&self) -> io::Result<Vec<PathBuf>> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err),
        };
        let mut pending = Vec::new();
        for entry in entries {
            let entry = entry?;
            if entry.file_name().to_string_lossy().starts_with(DIR_PREFIX) {
                pending.push(entry.path());
            }
        }
        Ok(pending)
    }
}

/// Ciphertext written next to a staged original.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedArtifact {
    pub path: PathBuf,
    pub len: u64,
}

/// Handle to one invocation's staged files. Dropping it removes them.
#[derive(Debug)]
pub struct StagedUpload {
    dir: TempDir,
    original: PathBuf,
    encrypted: Option<PathBuf>,
    original_len: u64,
}

impl StagedUpload {
    /// Unique name of this staging directory.
    pub fn token(&self) -> String {
        self.dir
            .path()
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    pub fn original_path(&self) -> &Path {
        &self.original
    }

    pub fn original_len(&self) -> u64 {
        self.original_len
    }

    pub fn encrypted_path(&self) -> Option<&Path> {
        self.encrypted.as_deref()
    }

    /// Encrypt the staged original into a sibling file.
    #[instrument(skip_all, fields(token = %self.token()))]
    pub fn materialize_encrypted(
        &mut self,
        encryptor: &Encryptor,
    ) -> Result<EncryptedArtifact, StagingError> {
        let target = self.dir.path().join(ENCRYPTED_FILE);
        let reader = BufReader::new(File::open(&self.original)?);
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&target)?;
        let mut writer = BufWriter::new(file);
        encryptor.encrypt(reader, &mut writer)?;
        let file = writer.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;

        let len = file.metadata()?.len();
        debug!(bytes = len, "materialized ciphertext");
        self.encrypted = Some(target.clone());
        Ok(EncryptedArtifact { path: target, len })
    }

    fn release(self) {
        let path = self.dir.path().to_path_buf();
        match self.dir.close() {
            Ok(()) => debug!(path = %path.display(), "released staging directory"),
            Err(err) => warn!(
                path = %path.display(),
                error = %err,
                "failed to remove staging directory"
            ),
        }
    }
}
