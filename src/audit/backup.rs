//! Periodic audit log backup with integrity verification.
//!
//! Produces a dated copy of the audit log next to a SHA-256 manifest and
//! verifies the copy before reporting success. Running twice on the same day
//! is a no-op when the existing backup still verifies.

use std::path::{Path, PathBuf};

use chrono::Utc;
use sha2::{Digest, Sha256};

use crate::error::GateError;

use super::log::AuditLog;

/// Backup handle for an audit log.
pub struct AuditBackup {
    backup_dir: PathBuf,
}

/// Outcome of one backup run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackupOutcome {
    /// A fresh backup was written and verified.
    Written(PathBuf),
    /// Today's backup already existed and still verifies.
    UpToDate(PathBuf),
}

impl AuditBackup {
    /// Create a backup handle writing into `backup_dir`.
    #[must_use]
    pub fn new(backup_dir: impl Into<PathBuf>) -> Self {
        Self {
            backup_dir: backup_dir.into(),
        }
    }

    /// Back up the audit log, verifying the copy against its digest.
    ///
    /// # Errors
    ///
    /// Returns an internal error when the copy cannot be written or the
    /// verification digest does not match.
    pub fn run(&self, log: &AuditLog) -> Result<BackupOutcome, GateError> {
        std::fs::create_dir_all(&self.backup_dir)
            .map_err(|e| GateError::internal(format!("cannot create backup dir: {e}")))?;

        let date = Utc::now().format("%Y%m%d");
        let backup_path = self.backup_dir.join(format!("audit-{date}.jsonl"));
        let digest_path = self.backup_dir.join(format!("audit-{date}.sha256"));

        let source = std::fs::read(log.path())
            .map_err(|e| GateError::internal(format!("cannot read audit log: {e}")))?;
        let source_digest = hex_digest(&source);

        // Idempotent: an existing, still-valid backup of today's log is kept.
        if backup_path.exists()
            && digest_path.exists()
            && Self::verify(&backup_path, &digest_path).is_ok()
            && std::fs::read_to_string(&digest_path)
                .map(|d| d.trim() == source_digest)
                .unwrap_or(false)
        {
            return Ok(BackupOutcome::UpToDate(backup_path));
        }

        std::fs::write(&backup_path, &source)
            .map_err(|e| GateError::internal(format!("backup write failed: {e}")))?;
        std::fs::write(&digest_path, format!("{source_digest}\n"))
            .map_err(|e| GateError::internal(format!("digest write failed: {e}")))?;

        Self::verify(&backup_path, &digest_path)?;
        tracing::info!(path = %backup_path.display(), "audit backup written");
        Ok(BackupOutcome::Written(backup_path))
    }

    /// Verify a backup file against its digest manifest.
    ///
    /// # Errors
    ///
    /// Returns an internal error when the digest does not match the file.
    pub fn verify(backup_path: &Path, digest_path: &Path) -> Result<(), GateError> {
        let content = std::fs::read(backup_path)
            .map_err(|e| GateError::internal(format!("cannot read backup: {e}")))?;
        let expected = std::fs::read_to_string(digest_path)
            .map_err(|e| GateError::internal(format!("cannot read digest: {e}")))?;
        let actual = hex_digest(&content);
        if actual == expected.trim() {
            Ok(())
        } else {
            Err(GateError::internal("backup integrity check failed")
                .with_context("path", backup_path.display().to_string()))
        }
    }
}

fn hex_digest(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    hex::encode(hasher.finalize())
}
