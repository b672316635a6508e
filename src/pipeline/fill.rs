//! One-shot batch translation. Fills placeholder lines, or with `force` rewrites every line of the
//! selected records. No style gate: replies are applied line by line after an `orig` check.

use tracing::{info, warn};

use crate::corpus::{is_placeholder_en, is_placeholder_ja, LineRecord, PoemRecord};
use crate::pipeline::config::FillOptions;
use crate::pipeline::translate::BatchTask;
use crate::pipeline::PipelineContext;

pub const FILL_LOG_LIMIT: usize = 40;

#[derive(Clone, Debug, Default)]
pub struct FillReport {
    pub selected: usize,
    pub changed_poems: usize,
    pub failed: Vec<u32>,
    pub log: Vec<String>,
}

impl FillReport {
    fn push(&mut self, line: String) {
        info!(target: "fill", "{line}");
        self.log.push(line);
    }

    #[must_use]
    pub fn nothing_to_do(&self) -> bool {
        self.selected == 0
    }
}

pub struct FillPipeline<'a> {
    ctx: PipelineContext<'a>,
    opts: &'a FillOptions,
}

impl<'a> FillPipeline<'a> {
    pub fn new(ctx: PipelineContext<'a>, opts: &'a FillOptions) -> Self {
        Self { ctx, opts }
    }

    fn needs_work(&self, record: &PoemRecord) -> bool {
        if !self.opts.ids.is_empty() && !self.opts.ids.contains(&record.id) {
            return false;
        }
        (self.opts.force || record.has_placeholder()) && record.is_well_formed()
    }

    /// Apply one reply to `record`; lines whose `orig` differs are skipped.
    fn apply(&self, record: &mut PoemRecord, lines_out: &[LineRecord], report: &mut FillReport) {
        let id = record.id;
        for (i, (line, out)) in record.lines.iter_mut().zip(lines_out).enumerate() {
            let n = i + 1;
            if line.orig != out.orig {
                report.push(format!("[WARN] id={id} line{n}: orig mismatch -> SKIP"));
                continue;
            }
            if self.opts.force || is_placeholder_ja(&line.ja) {
                line.ja = out.ja.clone();
                report.push(format!(" id={id} line{n} JA updated"));
            }
            if self.opts.force || is_placeholder_en(&line.en) {
                line.en = out.en.clone();
                report.push(format!(" id={id} line{n} EN updated"));
            }
        }
    }

    pub fn run(&self, records: &mut [PoemRecord]) -> FillReport {
        let cfg = self.ctx.cfg;
        let mut report = FillReport::default();
        let targets: Vec<usize> = records
            .iter()
            .enumerate()
            .filter(|(_, r)| self.needs_work(r))
            .map(|(i, _)| i)
            .collect();
        report.selected = targets.len();
        self.ctx.progress.info(format!(
            "[INFO] total poems: {}, selected: {}, force={}, ids_filter={}",
            records.len(),
            targets.len(),
            self.opts.force,
            if self.opts.ids.is_empty() { "no" } else { "yes" }
        ));
        if targets.is_empty() {
            return report;
        }

        let client = self.ctx.translation_client();
        let chunks: Vec<&[usize]> = targets.chunks(cfg.batch.max(1)).collect();
        let total = chunks.len();
        for (ci, chunk) in chunks.iter().enumerate() {
            let tasks: Vec<BatchTask> = chunk.iter().map(|&i| BatchTask::from_record(&records[i])).collect();
            self.ctx.progress.progress("fill batch", ci + 1, total);
            match client.translate_with_retry(&tasks, &cfg.models.base, cfg.temperature, &cfg.retry) {
                Ok(mut map) => {
                    for &i in chunk.iter() {
                        let id = records[i].id;
                        let Some(result) = map.remove(&id) else {
                            report.failed.push(id);
                            report.push(format!("[WARN] id={id} missing in result; skip"));
                            continue;
                        };
                        let before = records[i].lines.clone();
                        self.apply(&mut records[i], &result.lines, &mut report);
                        if records[i].lines != before {
                            report.changed_poems += 1;
                        }
                    }
                }
                Err(err) => {
                    warn!(chunk = ci + 1, error = %err, "fill batch failed");
                    for t in &tasks {
                        report.failed.push(t.id);
                        report.push(format!("[ERR] id={} API failed: {err}", t.id));
                    }
                }
            }
            if ci + 1 < total && !cfg.batch_delay.is_zero() {
                std::thread::sleep(cfg.batch_delay);
            }
        }
        self.ctx
            .progress
            .info(format!("[INFO] poems updated: {}", report.changed_poems));
        self.ctx
            .progress
            .report(report.log.iter().take(FILL_LOG_LIMIT));
        report
    }
}
