//! Placeholder-fill gate.
//!
//! One pass: select records that still hold placeholders (or the `--ids` filter), translate them
//! in batches, normalize and validate each candidate, re-ask singly on failure, and commit only
//! placeholder lines. Candidates that keep failing, or that would break an already clean tone,
//! go to a force queue where the whole quatrain is regenerated (base tier, then hard tier) and
//! all four lines are replaced.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{info, warn};

use crate::corpus::{count_remaining_placeholders, is_placeholder_en, is_placeholder_ja, LineRecord, PoemRecord};
use crate::error::GateError;
use crate::pipeline::config::GateOptions;
use crate::pipeline::translate::{BatchTask, TranslationClient};
use crate::pipeline::PipelineContext;

pub const GATE_LOG_LIMIT: usize = 120;

#[derive(Clone, Debug, Default)]
pub struct PassReport {
    pub selected: usize,
    /// Ids whose lines changed this pass (placeholder fill or force).
    pub committed: BTreeSet<u32>,
    pub force_queued: Vec<u32>,
    pub failed: Vec<u32>,
    pub log: Vec<String>,
}

impl PassReport {
    fn push(&mut self, line: String) {
        info!(target: "gate", "{line}");
        self.log.push(line);
    }
}

#[derive(Clone, Debug, Default)]
pub struct GateReport {
    pub passes: Vec<PassReport>,
    /// Ids that failed and were not committed by a later pass.
    pub failed: BTreeSet<u32>,
    pub remaining: usize,
}

impl GateReport {
    #[must_use]
    pub fn committed(&self) -> BTreeSet<u32> {
        self.passes
            .iter()
            .flat_map(|p| p.committed.iter().copied())
            .collect()
    }

    #[must_use]
    pub fn summary_line(&self) -> String {
        format!(
            "[SUMMARY] committed={}, failed={}, remaining={}",
            self.committed().len(),
            self.failed.len(),
            self.remaining
        )
    }
}

pub struct GatePipeline<'a> {
    ctx: PipelineContext<'a>,
    opts: &'a GateOptions,
    client: TranslationClient<'a>,
}

impl<'a> GatePipeline<'a> {
    pub fn new(ctx: PipelineContext<'a>, opts: &'a GateOptions) -> Self {
        Self {
            client: ctx.translation_client(),
            ctx,
            opts,
        }
    }

    fn select(&self, records: &[PoemRecord], report: &mut PassReport) -> Vec<usize> {
        let mut out = Vec::new();
        for (i, rec) in records.iter().enumerate() {
            let wanted = if self.opts.ids.is_empty() {
                rec.has_placeholder()
            } else {
                self.opts.ids.contains(&rec.id)
            };
            if !wanted {
                continue;
            }
            if !rec.is_well_formed() {
                report.push(format!("[SKIP] id={} malformed (need 4 lines with orig)", rec.id));
                continue;
            }
            out.push(i);
        }
        out
    }

    fn normalize(&self, lines: &mut [LineRecord]) {
        for x in lines.iter_mut() {
            x.en = self.ctx.cfg.style.normalize_en(&x.en);
        }
    }

    /// Ask for `record` alone at temperature 0 until a candidate validates or attempts run out.
    /// On failure returns the last validation errors (or the transport error).
    fn regenerate(&self, record: &PoemRecord, model: &str) -> Result<Vec<LineRecord>, Vec<String>> {
        let task = BatchTask::from_record(record);
        let mut last_errs: Vec<String> = Vec::new();
        let res = self.ctx.cfg.retry.run("gate regenerate", |_| {
            let attempt = self
                .client
                .translate_batch(std::slice::from_ref(&task), model, 0.0)
                .and_then(|mut map| {
                    map.remove(&record.id)
                        .map(|n| n.lines)
                        .ok_or_else(|| GateError::ShapeMismatch(format!("id={} missing in result", record.id)))
                });
            let mut lines = match attempt {
                Ok(lines) => lines,
                Err(err) => {
                    last_errs.clear();
                    return Err(err);
                }
            };
            self.normalize(&mut lines);
            let rep = self.ctx.cfg.style.validate(record, &lines);
            if rep.ok {
                Ok(lines)
            } else {
                last_errs = rep.errors.clone();
                Err(GateError::Validation(rep.errors))
            }
        });
        match res {
            Ok(lines) => Ok(lines),
            Err(err) if last_errs.is_empty() => Err(vec![err.to_string()]),
            Err(_) => Err(last_errs),
        }
    }

    fn call_batches(
        &self,
        records: &[PoemRecord],
        targets: &[usize],
        report: &mut PassReport,
    ) -> BTreeMap<u32, Vec<LineRecord>> {
        let cfg = self.ctx.cfg;
        let mut results: BTreeMap<u32, Vec<LineRecord>> = BTreeMap::new();
        let chunks: Vec<&[usize]> = targets.chunks(cfg.batch.max(1)).collect();
        let total = chunks.len();
        for (ci, chunk) in chunks.iter().enumerate() {
            let tasks: Vec<BatchTask> = chunk.iter().map(|&i| BatchTask::from_record(&records[i])).collect();
            let ids: Vec<u32> = tasks.iter().map(|t| t.id).collect();
            self.ctx
                .progress
                .info(format!("[CALL] chunk {}/{} -> ids={ids:?}", ci + 1, total));

            let mut pending: Vec<&BatchTask> = Vec::new();
            match self
                .client
                .translate_with_retry(&tasks, &cfg.models.base, cfg.temperature, &cfg.retry)
            {
                Ok(mut map) => {
                    for t in &tasks {
                        match map.remove(&t.id) {
                            Some(n) => {
                                results.insert(t.id, n.lines);
                            }
                            None => pending.push(t),
                        }
                    }
                }
                Err(err) => {
                    warn!(chunk = ci + 1, error = %err, "batch failed; falling back to single calls");
                    pending.extend(tasks.iter());
                }
            }

            for t in pending {
                match self.client.translate_one(t, &cfg.models.base, &cfg.retry) {
                    Ok(lines) => {
                        results.insert(t.id, lines);
                    }
                    Err(err) => {
                        report.failed.push(t.id);
                        report.push(format!("[ERR] id={} API failed: {err}", t.id));
                    }
                }
            }

            if ci + 1 < total && !cfg.batch_delay.is_zero() {
                std::thread::sleep(cfg.batch_delay);
            }
        }
        results
    }

    pub fn one_pass(&self, records: &mut [PoemRecord]) -> PassReport {
        let cfg = self.ctx.cfg;
        let style = &cfg.style;
        let mut report = PassReport::default();

        let targets = self.select(records, &mut report);
        report.selected = targets.len();
        self.ctx.progress.info(format!(
            "[INFO] poems total={}, selected={}, model={}, hard={}",
            records.len(),
            targets.len(),
            cfg.models.base,
            cfg.models.hard
        ));
        if targets.is_empty() {
            self.flush_log(&report);
            return report;
        }

        let mut results = self.call_batches(records, &targets, &mut report);

        let mut force_queue: Vec<usize> = Vec::new();
        for &i in &targets {
            let id = records[i].id;
            let Some(mut lines) = results.remove(&id) else {
                continue;
            };
            self.normalize(&mut lines);

            let first = style.validate(&records[i], &lines);
            if !first.ok {
                match self.regenerate(&records[i], &cfg.models.base) {
                    Ok(better) => lines = better,
                    Err(errs) => {
                        if self.opts.auto_force {
                            force_queue.push(i);
                            report.push(format!("[GATE1->FORCE] id={id} errs={errs:?}"));
                        } else {
                            report.failed.push(id);
                            report.push(format!("[FAIL] id={id} gate1 errs={errs:?}"));
                        }
                        continue;
                    }
                }
            }

            if style.tone_breaks(&records[i], &lines) {
                if self.opts.auto_force {
                    force_queue.push(i);
                    report.push(format!("[GATE2->FORCE] id={id} tone break"));
                } else {
                    warn!(error = %GateError::ToneBreak(id), "candidate rejected");
                    report.failed.push(id);
                    report.push(format!("[FAIL] id={id} tone break (no_auto_force)"));
                }
                continue;
            }

            let before = records[i].lines.clone();
            for (line, cand) in records[i].lines.iter_mut().zip(&lines) {
                if is_placeholder_ja(&line.ja) {
                    line.ja = cand.ja.clone();
                }
                if is_placeholder_en(&line.en) {
                    line.en = cand.en.clone();
                }
            }
            if records[i].lines == before {
                report.push(format!("[OK] id={id} no placeholder lines"));
                continue;
            }
            report.committed.insert(id);
            report.push(format!("[OK] id={id} placeholders filled"));
        }

        for i in force_queue {
            let id = records[i].id;
            report.force_queued.push(id);
            let mut done = false;
            for model in [&cfg.models.base, &cfg.models.hard] {
                match self.regenerate(&records[i], model) {
                    Ok(lines) => {
                        for (line, cand) in records[i].lines.iter_mut().zip(&lines) {
                            line.ja = cand.ja.clone();
                            line.en = cand.en.clone();
                        }
                        report.committed.insert(id);
                        report.push(format!("[FORCE-OK] id={id} model={model}"));
                        done = true;
                        break;
                    }
                    Err(errs) => warn!(id = id, model = %model, errs = ?errs, "force attempt failed"),
                }
            }
            if !done {
                report.failed.push(id);
                report.push(format!("[FORCE-FAIL] id={id}"));
            }
        }

        self.flush_log(&report);
        report
    }

    fn flush_log(&self, report: &PassReport) {
        self.ctx
            .progress
            .report(report.log.iter().take(GATE_LOG_LIMIT));
    }

    /// Single pass, or up to `max_passes` when auto-complete is on.
    pub fn run(&self, records: &mut [PoemRecord]) -> GateReport {
        let mut out = GateReport::default();
        if !self.opts.auto_complete {
            let pass = self.one_pass(records);
            out.failed.extend(pass.failed.iter().copied());
            out.passes.push(pass);
            out.remaining = count_remaining_placeholders(records);
            return out;
        }

        let progress = self.ctx.progress;
        let mut prev_remaining = count_remaining_placeholders(records);
        for p in 1..=self.opts.max_passes.max(1) {
            progress.info(format!("[AUTO] pass {p} start (remaining={prev_remaining})"));
            let pass = self.one_pass(records);
            let remaining = count_remaining_placeholders(records);
            progress.info(format!(
                "[AUTO] pass {p} end   (remaining={remaining}, ok={}, force_q={}, failed={})",
                pass.committed.len(),
                pass.force_queued.len(),
                pass.failed.len()
            ));
            for id in &pass.committed {
                out.failed.remove(id);
            }
            out.failed.extend(pass.failed.iter().copied());
            let nothing_selected = pass.selected == 0;
            let nothing_committed = pass.committed.is_empty();
            out.passes.push(pass);
            out.remaining = remaining;

            if remaining == 0 || nothing_selected {
                break;
            }
            if self.opts.stop_if_unchanged && (nothing_committed || remaining == prev_remaining) {
                progress.info("[AUTO] no further progress; stopping");
                break;
            }
            prev_remaining = remaining;
        }
        out.remaining = count_remaining_placeholders(records);
        out
    }
}
