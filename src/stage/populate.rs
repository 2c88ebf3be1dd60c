//! Stage 1: split the source and extract every unit.

use std::sync::Arc;

use super::{Stage, StageContext, StageWork};
use crate::error::{Error, Result};
use crate::model::{ProgressiveSchema, Unit, UnitFailure};
use crate::pool::UnitWorker;
use crate::split::split_source;

/// Splits the source and runs the extractor over units not yet recorded.
///
/// Units recorded by an earlier run are left alone; timed-out units are
/// dispatched again.
pub struct PopulateStage {
    extractor: Arc<dyn UnitWorker>,
}

impl PopulateStage {
    /// Stage using `extractor` for every unit.
    pub fn new(extractor: Arc<dyn UnitWorker>) -> Self {
        Self { extractor }
    }
}

impl StageWork for PopulateStage {
    fn stage(&self) -> Stage {
        Stage::Populate
    }

    fn run(&self, schema: &mut ProgressiveSchema, ctx: &StageContext) -> Result<()> {
        let source = schema.document_summary.source_path.clone();
        let units = split_source(&source, &schema.document_id)?;
        let count = units.len() as u32;

        let known = schema.document_summary.page_count;
        if known != 0 && known != count {
            return Err(Error::FatalSplit(format!(
                "{} now splits into {} units, checkpoint has {}",
                source.display(),
                count,
                known
            )));
        }
        schema.document_summary.page_count = count;

        let pending: Vec<Unit> = units
            .into_iter()
            .filter(|unit| {
                schema
                    .document_summary
                    .unit(unit.index)
                    .map_or(true, |r| r.error.as_ref().is_some_and(UnitFailure::is_timeout))
            })
            .map(|unit| unit.with_workdir(ctx.output_root()))
            .collect();
        if pending.is_empty() {
            return Ok(());
        }
        log::info!("Extracting {} of {} units", pending.len(), count);

        let fallbacks: Vec<Unit> = pending
            .iter()
            .map(|u| Unit::new(u.index, &u.document_id, u.source.clone()))
            .collect();
        let processed = ctx.extraction_pool().run(pending, self.extractor.clone())?;

        for (unit, mut fallback) in processed.into_iter().zip(fallbacks) {
            let index = unit.index;
            if let Err(e) = schema.absorb_unit(unit) {
                // Output that breaks schema invariants is recorded as a failure.
                log::warn!("Unit {} output rejected: {}", index, e);
                fallback.fail(UnitFailure::failed(e.to_string()));
                schema.absorb_unit(fallback)?;
            }
        }
        Ok(())
    }
}
