//! Stages 2, 3 and 5-7: collaborator-driven enrichment.
//!
//! Each stage only touches fields that are still empty, so a stage that failed
//! half way picks up where it stopped. Collaborator calls go through the
//! context's retry policy; failed items are logged, left empty and reported
//! together once the good results are recorded.

use std::sync::Arc;

use super::{sub_task_failure, Stage, StageContext, StageWork};
use crate::assign::StructuralAssigner;
use crate::collab::{
    ChapterDigest, ChapterSummarizer, MediaDescriber, OutlineExtractor, TextRepairer,
};
use crate::error::{Error, Result};
use crate::model::{
    validate_outline, ChapterSummary, DerivedQuestion, MediaDescription, ProgressiveSchema,
    StructuralNode, SubElement,
};

/// Stage 2: repair the raw text of every available unit.
pub struct RepairStage {
    repairer: Arc<dyn TextRepairer>,
}

impl RepairStage {
    /// Stage using `repairer`.
    pub fn new(repairer: Arc<dyn TextRepairer>) -> Self {
        Self { repairer }
    }
}

impl StageWork for RepairStage {
    fn stage(&self) -> Stage {
        Stage::UnitRepair
    }

    fn run(&self, schema: &mut ProgressiveSchema, ctx: &StageContext) -> Result<()> {
        let pending: Vec<(u32, String)> = schema
            .document_summary
            .available_units()
            .filter(|u| u.cleaned_text.is_none())
            .filter_map(|u| u.raw_text.clone().map(|raw| (u.index, raw)))
            .collect();
        let total = pending.len();
        let indices: Vec<u32> = pending.iter().map(|(index, _)| *index).collect();

        let results = ctx.pool.map_isolated(pending, |(_, raw)| {
            ctx.retry.execute(
                || self.repairer.repair(raw),
                Error::class,
                // Blank pages legitimately repair to nothing.
                |cleaned: &String| raw.trim().is_empty() || !cleaned.trim().is_empty(),
            )
        });

        let mut failures = Vec::new();
        for (index, result) in indices.into_iter().zip(results) {
            match result {
                Ok(cleaned) => {
                    if let Some(record) = schema.document_summary.unit_mut(index) {
                        record.cleaned_text = Some(cleaned);
                    }
                }
                Err(e) => failures.push((format!("unit {}", index), e)),
            }
        }
        sub_task_failure("unit repairs", total, failures)
    }
}

/// Stage 3: extract the document outline.
pub struct OutlineStage {
    outliner: Arc<dyn OutlineExtractor>,
}

impl OutlineStage {
    /// Stage using `outliner`.
    pub fn new(outliner: Arc<dyn OutlineExtractor>) -> Self {
        Self { outliner }
    }
}

impl StageWork for OutlineStage {
    fn stage(&self) -> Stage {
        Stage::StructureRecognition
    }

    fn run(&self, schema: &mut ProgressiveSchema, ctx: &StageContext) -> Result<()> {
        let text = schema.full_text();
        let nodes: Vec<StructuralNode> = ctx.retry.execute(
            || self.outliner.extract_outline(&schema.document_id, &text),
            Error::class,
            |nodes: &Vec<StructuralNode>| validate_outline(nodes).is_ok(),
        )?;
        validate_outline(&nodes)?;

        log::info!("Outline has {} nodes", nodes.len());
        schema.document_summary.outline = Some(nodes);
        Ok(())
    }
}

/// Stage 5: describe every image and table.
pub struct DescriptionStage {
    describer: Arc<dyn MediaDescriber>,
}

impl DescriptionStage {
    /// Stage using `describer`.
    pub fn new(describer: Arc<dyn MediaDescriber>) -> Self {
        Self { describer }
    }

    fn describe_one(&self, element: &SubElement, ctx: &StageContext) -> Result<MediaDescription> {
        let workdir = ctx.unit_workdir(element.unit_index);
        let payload = element.payload.resolve(&workdir);
        ctx.retry.execute(
            || {
                self.describer
                    .describe(payload.as_deref(), element, &element.context_snippet)
            },
            Error::class,
            |d: &MediaDescription| !d.summary.trim().is_empty(),
        )
    }
}

impl StageWork for DescriptionStage {
    fn stage(&self) -> Stage {
        Stage::ElementDescription
    }

    fn run(&self, schema: &mut ProgressiveSchema, ctx: &StageContext) -> Result<()> {
        let pending: Vec<SubElement> = schema
            .media()
            .filter(|e| e.description.is_none())
            .cloned()
            .collect();
        let total = pending.len();
        let ids: Vec<String> = pending.iter().map(|e| e.content_id.clone()).collect();

        let results = ctx.pool.map_isolated(pending, |element| self.describe_one(element, ctx));

        let mut failures = Vec::new();
        let mut described = 0;
        for (id, result) in ids.into_iter().zip(results) {
            match result {
                Ok(description) => {
                    if let Some(element) = schema.media_mut().find(|e| e.content_id == id) {
                        element.describe(description);
                        described += 1;
                    }
                }
                Err(e) => failures.push((id, e)),
            }
        }
        log::info!("Described {} of {} elements", described, total);
        sub_task_failure("element descriptions", total, failures)
    }
}

/// Stage 6: link every element to an outline node.
#[derive(Debug, Clone, Copy, Default)]
pub struct AssignmentStage;

impl StageWork for AssignmentStage {
    fn stage(&self) -> Stage {
        Stage::StructureAssignment
    }

    fn run(&self, schema: &mut ProgressiveSchema, _ctx: &StageContext) -> Result<()> {
        StructuralAssigner::assign(schema);
        Ok(())
    }
}

/// Stage 7: summarize each top-level node and derive questions.
pub struct SummaryStage {
    summarizer: Arc<dyn ChapterSummarizer>,
}

impl SummaryStage {
    /// Stage using `summarizer`.
    pub fn new(summarizer: Arc<dyn ChapterSummarizer>) -> Self {
        Self { summarizer }
    }
}

/// Text of the chunks assigned to `node` or anything below it.
fn section_text(schema: &ProgressiveSchema, node: &StructuralNode) -> String {
    let ids = schema.subtree_ids(&node.structural_id);
    schema
        .text_chunks
        .iter()
        .filter(|e| e.structural_id.as_ref().is_some_and(|id| ids.contains(id)))
        .filter_map(SubElement::inline_content)
        .collect::<Vec<_>>()
        .join("\n\n")
}

impl StageWork for SummaryStage {
    fn stage(&self) -> Stage {
        Stage::ChapterSummary
    }

    fn run(&self, schema: &mut ProgressiveSchema, ctx: &StageContext) -> Result<()> {
        let pending: Vec<(StructuralNode, String)> = schema
            .top_level_nodes()
            .into_iter()
            .filter(|node| {
                !schema
                    .chapter_summaries
                    .iter()
                    .any(|s| s.structural_id == node.structural_id)
            })
            .map(|node| {
                let text = section_text(schema, &node);
                (node, text)
            })
            .collect();
        let total = pending.len();
        let nodes: Vec<StructuralNode> = pending.iter().map(|(n, _)| n.clone()).collect();

        let results = ctx.pool.map_isolated(pending, |(node, text)| {
            ctx.retry.execute(
                || self.summarizer.summarize(&node.title, text),
                Error::class,
                |d: &ChapterDigest| !d.summary.trim().is_empty(),
            )
        });

        let mut failures = Vec::new();
        for (node, result) in nodes.into_iter().zip(results) {
            match result {
                Ok(digest) => {
                    for (n, question) in digest.questions.into_iter().enumerate() {
                        schema.derived_questions.push(DerivedQuestion {
                            question_id: format!("{}-q{}", node.structural_id, n + 1),
                            structural_id: node.structural_id.clone(),
                            question,
                        });
                    }
                    schema.chapter_summaries.push(ChapterSummary {
                        structural_id: node.structural_id,
                        title: node.title,
                        summary: digest.summary,
                    });
                }
                Err(e) => failures.push((node.structural_id, e)),
            }
        }
        sub_task_failure("chapter summaries", total, failures)
    }
}
