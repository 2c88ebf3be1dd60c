//! Completion computed from populated fields.

use serde::Serialize;

use super::Stage;
use crate::checkpoint::{earlier_stages_complete, is_stage_complete};
use crate::model::ProgressiveSchema;

/// Progress of one stage.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageProgress {
    /// Stage
    #[serde(serialize_with = "serialize_stage")]
    pub stage: Stage,
    /// Whether the stage's fields are all populated
    pub complete: bool,
    /// Share of the stage's items that are done (0.0-1.0)
    pub fraction: f64,
}

fn serialize_stage<S: serde::Serializer>(stage: &Stage, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(stage.name())
}

/// Share of the items of `stage` that are populated.
///
/// Extraction counts available units against all units, so a document with
/// failed units never reaches 1.0 for that stage. A stage with nothing to do
/// counts as done once every earlier stage is complete.
pub fn stage_fraction(schema: &ProgressiveSchema, stage: Stage) -> f64 {
    let summary = &schema.document_summary;
    let (done, total) = match stage {
        Stage::Populate => (
            summary.available_units().count(),
            summary.page_count as usize,
        ),
        Stage::UnitRepair => (
            summary
                .available_units()
                .filter(|u| u.cleaned_text.is_some())
                .count(),
            summary.available_units().count(),
        ),
        Stage::StructureRecognition => (usize::from(summary.outline.is_some()), 1),
        Stage::ContentChunking => (
            summary
                .available_units()
                .filter(|u| u.chunk_ids.is_some())
                .count(),
            summary.available_units().count(),
        ),
        Stage::ElementDescription => (
            schema.media().filter(|e| e.description.is_some()).count(),
            schema.media().count(),
        ),
        Stage::StructureAssignment => (
            schema.elements().filter(|e| e.structural_id.is_some()).count(),
            schema.element_count(),
        ),
        Stage::ChapterSummary => {
            let nodes = schema.top_level_nodes();
            let done = nodes
                .iter()
                .filter(|n| {
                    schema
                        .chapter_summaries
                        .iter()
                        .any(|s| s.structural_id == n.structural_id)
                })
                .count();
            (done, nodes.len())
        }
    };

    if total == 0 {
        let ready = stage != Stage::Populate && earlier_stages_complete(schema, stage);
        return if ready { 1.0 } else { 0.0 };
    }
    done as f64 / total as f64
}

/// Overall completion, 0-100: the mean of all stage fractions.
pub fn completion_percentage(schema: &ProgressiveSchema) -> f64 {
    let sum: f64 = Stage::ALL.iter().map(|&s| stage_fraction(schema, s)).sum();
    let percentage = sum / Stage::ALL.len() as f64 * 100.0;
    (percentage * 100.0).round() / 100.0
}

/// Progress of every stage.
pub fn stage_progress(schema: &ProgressiveSchema) -> Vec<StageProgress> {
    Stage::ALL
        .iter()
        .map(|&stage| StageProgress {
            stage,
            complete: is_stage_complete(schema, stage),
            fraction: stage_fraction(schema, stage),
        })
        .collect()
}
