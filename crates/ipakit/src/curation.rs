//! Curation sessions.
//!
//! A [`CurationSession`] holds the records produced by one staging call and
//! the user's keep/discard selection over them. Every record starts out kept.
//! [`finalize`](CurationSession::finalize) deletes the staged copies the user
//! discarded; [`cancel`](CurationSession::cancel) throws the whole staging
//! directory away. Both consume the session.
//!
//! A session only acts on the staging call it was created from. Once the same
//! app and kind are staged again, finalizing or cancelling the older session
//! logs a warning and leaves the directory untouched.

use crate::staging::{clear_generation, discard_dir, read_generation, AssetKind, AssetRecord};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use uuid::Uuid;

/// Staged assets awaiting the user's decision.
#[derive(Debug)]
pub struct CurationSession {
    app_name: String,
    kind: AssetKind,
    staging_dir: PathBuf,
    records: Vec<AssetRecord>,
    kept: HashSet<Uuid>,
    generation: Option<Uuid>,
}

impl CurationSession {
    pub fn new(
        app_name: impl Into<String>,
        kind: AssetKind,
        staging_dir: impl AsRef<Path>,
        records: Vec<AssetRecord>,
    ) -> Self {
        let kept = records.iter().map(|r| r.id).collect();
        let staging_dir = staging_dir.as_ref().to_path_buf();
        Self {
            app_name: app_name.into(),
            kind,
            generation: read_generation(&staging_dir),
            staging_dir,
            records,
            kept,
        }
    }

    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    pub fn kind(&self) -> AssetKind {
        self.kind
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    /// All staged records, in staging order.
    pub fn records(&self) -> &[AssetRecord] {
        &self.records
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn is_kept(&self, id: Uuid) -> bool {
        self.kept.contains(&id)
    }

    /// Flip whether a record is kept. Unknown ids are ignored.
    pub fn toggle(&mut self, id: Uuid) {
        if !self.records.iter().any(|r| r.id == id) {
            return;
        }
        if !self.kept.remove(&id) {
            self.kept.insert(id);
        }
    }

    /// Replace the selection. Ids not belonging to this session are ignored.
    pub fn set_kept(&mut self, ids: impl IntoIterator<Item = Uuid>) {
        let known: HashSet<Uuid> = self.records.iter().map(|r| r.id).collect();
        self.kept = ids.into_iter().filter(|id| known.contains(id)).collect();
    }

    /// Records currently selected, in staging order.
    pub fn kept_records(&self) -> impl Iterator<Item = &AssetRecord> {
        self.records.iter().filter(|r| self.kept.contains(&r.id))
    }

    /// Whether the staging directory still holds this session's content.
    pub fn is_current(&self) -> bool {
        self.generation.is_some() && read_generation(&self.staging_dir) == self.generation
    }

    /// Delete the staged copy of every record not kept and return the kept ones.
    ///
    /// Deletion failures are logged; they never abort finalization. A session
    /// that is no longer current deletes nothing and returns no records.
    pub fn finalize(self) -> Vec<AssetRecord> {
        if !self.is_current() {
            warn!(
                "{} curation for {} was superseded, leaving {} untouched",
                self.kind,
                self.app_name,
                self.staging_dir.display()
            );
            return Vec::new();
        }

        let (kept, discarded): (Vec<_>, Vec<_>) = self
            .records
            .into_iter()
            .partition(|r| self.kept.contains(&r.id));

        for record in &discarded {
            if let Err(e) = fs::remove_file(&record.staged_location) {
                warn!(
                    "failed to remove unselected {}: {}",
                    record.staged_location.display(),
                    e
                );
            }
        }

        info!(
            "finalized {} {} asset(s) for {}, discarded {}",
            kept.len(),
            self.kind,
            self.app_name,
            discarded.len()
        );
        kept
    }

    /// Delete the whole staging directory, unless it was staged again since.
    pub fn cancel(self) {
        if !self.is_current() {
            warn!(
                "{} curation for {} was superseded, leaving {} untouched",
                self.kind,
                self.app_name,
                self.staging_dir.display()
            );
            return;
        }
        info!("cancelled {} curation for {}", self.kind, self.app_name);
        clear_generation(&self.staging_dir);
        discard_dir(&self.staging_dir);
    }
}
