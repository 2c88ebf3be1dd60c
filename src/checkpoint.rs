//! Checkpoint persistence.
//!
//! A checkpoint is the whole [`ProgressiveSchema`] as pretty-printed JSON.
//! Saves are atomic: the schema is written to a temporary file in the target
//! directory, synced, then renamed over the old checkpoint, so a crash never
//! leaves a half-written file behind.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tempfile::NamedTempFile;

use crate::error::{Error, Result};
use crate::model::{ProgressiveSchema, SCHEMA_VERSION};
use crate::stage::Stage;

/// File name suffix of checkpoints.
pub const CHECKPOINT_SUFFIX: &str = ".checkpoint.json";

/// Stores checkpoints under a root directory, one file per document.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    root: PathBuf,
}

impl CheckpointStore {
    /// Create a store rooted at `root`. The directory is created on first save.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Checkpoint path for `document_id`.
    pub fn location_for(&self, document_id: &str) -> PathBuf {
        self.root.join(format!("{}{}", document_id, CHECKPOINT_SUFFIX))
    }

    /// Save `schema` and return where it was written.
    pub fn save(&self, schema: &ProgressiveSchema) -> Result<PathBuf> {
        let path = self.location_for(&schema.document_id);
        save_to(&path, schema)?;
        Ok(path)
    }

    /// Load the checkpoint of `document_id`, if one exists.
    pub fn load_document(&self, document_id: &str) -> Result<Option<ProgressiveSchema>> {
        let path = self.location_for(document_id);
        if !path.exists() {
            return Ok(None);
        }
        load(path).map(Some)
    }

    /// Load a checkpoint from `path`.
    pub fn load<P: AsRef<Path>>(&self, path: P) -> Result<ProgressiveSchema> {
        load(path)
    }
}

/// Atomically write `schema` to `path`.
pub fn save_to<P: AsRef<Path>>(path: P, schema: &ProgressiveSchema) -> Result<()> {
    let path = path.as_ref();
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let json = serde_json::to_vec_pretty(schema)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(&json)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| Error::Io(e.error))?;

    log::debug!("Saved checkpoint {}", path.display());
    Ok(())
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct VersionHeader {
    schema_version: String,
}

/// Load a checkpoint.
///
/// The schema version is checked before the body is deserialized; a
/// checkpoint with a different major version fails with
/// [`Error::CheckpointVersion`]. The loaded schema is re-validated.
pub fn load<P: AsRef<Path>>(path: P) -> Result<ProgressiveSchema> {
    let path = path.as_ref();
    let text = fs::read_to_string(path)?;

    let header: VersionHeader = serde_json::from_str(&text)?;
    check_version(&header.schema_version)?;

    let schema: ProgressiveSchema = serde_json::from_str(&text)?;
    schema.validate()?;
    Ok(schema)
}

/// Check that a checkpoint written with `found` can be read by this build.
pub fn check_version(found: &str) -> Result<()> {
    let incompatible = || Error::CheckpointVersion {
        found: found.to_string(),
        supported: SCHEMA_VERSION.to_string(),
    };
    let found_version = semver::Version::parse(found).map_err(|_| incompatible())?;
    let supported = semver::Version::parse(SCHEMA_VERSION)
        .map_err(|e| Error::Other(format!("invalid built-in schema version: {}", e)))?;

    if found_version.major != supported.major {
        return Err(incompatible());
    }
    Ok(())
}

/// Whether the fields `stage` is responsible for are populated.
///
/// Looks at data only, never at `processingStatus`, so a schema saved after a
/// failure still reports the stages that really finished.
pub fn is_stage_complete(schema: &ProgressiveSchema, stage: Stage) -> bool {
    let summary = &schema.document_summary;
    match stage {
        Stage::Populate => {
            summary.page_count > 0
                && summary.units.len() == summary.page_count as usize
                && (1..=summary.page_count).all(|i| {
                    summary.unit(i).is_some_and(|u| {
                        u.raw_text.is_some() || u.error.as_ref().is_some_and(|e| !e.is_timeout())
                    })
                })
        }
        Stage::UnitRepair => summary.available_units().all(|u| u.cleaned_text.is_some()),
        Stage::StructureRecognition => summary.outline.is_some(),
        Stage::ContentChunking => summary.available_units().all(|u| u.chunk_ids.is_some()),
        Stage::ElementDescription => schema.media().all(|e| e.description.is_some()),
        Stage::StructureAssignment => schema.elements().all(|e| e.structural_id.is_some()),
        Stage::ChapterSummary => schema.top_level_nodes().iter().all(|node| {
            schema
                .chapter_summaries
                .iter()
                .any(|s| s.structural_id == node.structural_id)
        }),
    }
}

/// Whether every stage before `stage` is complete.
///
/// Stages with nothing to do are trivially complete, so checking only the
/// direct predecessor is not enough.
pub fn earlier_stages_complete(schema: &ProgressiveSchema, stage: Stage) -> bool {
    Stage::ALL
        .iter()
        .take_while(|s| **s < stage)
        .all(|s| is_stage_complete(schema, *s))
}

/// Whether a run can start at `from` using the checkpoint at `path`.
///
/// True when the checkpoint loads and every stage before `from` is complete.
pub fn can_resume<P: AsRef<Path>>(path: P, from: Stage) -> bool {
    match load(path.as_ref()) {
        Ok(schema) => earlier_stages_complete(&schema, from),
        Err(e) => {
            log::debug!("Cannot resume from {}: {}", path.as_ref().display(), e);
            false
        }
    }
}
