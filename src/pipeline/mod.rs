mod config;
mod fill;
mod gate;
mod prompts;
mod refine;
mod trace;
mod translate;

pub use config::{
    init_default_config, CliOverrides, FillOptions, GateOptions, ModelTiers, PipelineConfig,
    RefineOptions,
};
pub use fill::{FillPipeline, FillReport, FILL_LOG_LIMIT};
pub use gate::{GatePipeline, GateReport, PassReport, GATE_LOG_LIMIT};
pub use prompts::{render_template, PromptCatalog};
pub use refine::{JudgeIssue, JudgeReport, RefinePipeline, RefineReport, REFINE_LOG_LIMIT};
pub use trace::TraceWriter;
pub use translate::{
    normalize_response, BatchTask, NormalizedResult, ResultMap, ResultShape, TranslationClient,
};

use crate::models::ChatBackend;
use crate::progress::ConsoleProgress;

/// Collaborators shared by every pipeline run.
#[derive(Clone, Copy)]
pub struct PipelineContext<'a> {
    pub backend: &'a dyn ChatBackend,
    pub cfg: &'a PipelineConfig,
    pub trace: &'a TraceWriter,
    pub progress: &'a ConsoleProgress,
}

impl<'a> PipelineContext<'a> {
    pub fn translation_client(&self) -> TranslationClient<'a> {
        TranslationClient::new(self.backend, &self.cfg.prompts, self.trace, self.cfg.style.en_max)
    }
}
