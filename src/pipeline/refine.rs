//! Grade-and-refine: lint, score with the judge tier, and if below target let the model rewrite
//! the quatrain from the judge's issues for a bounded number of passes. A record that never
//! reaches the target is restored to its state before this run touched it.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::corpus::{LineRecord, PoemRecord, LINES_PER_POEM};
use crate::error::{GateError, GateResult};
use crate::models::{ChatMessage, ChatRequest};
use crate::pipeline::config::RefineOptions;
use crate::pipeline::prompts::render_template;
use crate::pipeline::translate::call_json;
use crate::pipeline::PipelineContext;

pub const REFINE_LOG_LIMIT: usize = 200;

#[derive(Clone, Debug, Deserialize, Default, Serialize, PartialEq)]
pub struct JudgeIssue {
    #[serde(default, deserialize_with = "lenient_u32")]
    pub line: u32,
    #[serde(default)]
    pub ja: String,
    #[serde(default)]
    pub en: String,
    #[serde(default)]
    pub hint: String,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct JudgeReport {
    #[serde(default, deserialize_with = "lenient_u32")]
    pub score: u32,
    #[serde(default)]
    pub subscores: BTreeMap<String, Value>,
    #[serde(default)]
    pub pass: bool,
    #[serde(default, deserialize_with = "lenient_issues")]
    pub issues: Vec<JudgeIssue>,
    #[serde(default)]
    pub summary: String,
}

impl JudgeReport {
    /// The numeric score decides; the model's own `pass` flag is advisory.
    #[must_use]
    pub fn meets(&self, target: u32) -> bool {
        self.score >= target
    }
}

/// Accepts `87`, `87.4`, `"87"`; anything else reads as 0.
fn lenient_u32<'de, D: Deserializer<'de>>(d: D) -> Result<u32, D::Error> {
    let v = Value::deserialize(d)?;
    let n = match &v {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s.trim().parse::<f64>().unwrap_or(0.0),
        _ => 0.0,
    };
    Ok(n.clamp(0.0, u32::MAX as f64).round() as u32)
}

/// Issues that are not objects are dropped rather than failing the whole report.
fn lenient_issues<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<JudgeIssue>, D::Error> {
    let v = Value::deserialize(d)?;
    let Value::Array(items) = v else {
        return Ok(Vec::new());
    };
    Ok(items
        .into_iter()
        .filter_map(|x| serde_json::from_value::<JudgeIssue>(x).ok())
        .collect())
}

#[derive(Debug, Deserialize)]
struct ImproveReply {
    lines: Vec<ImprovedLine>,
}

#[derive(Debug, Deserialize)]
struct ImprovedLine {
    #[serde(default)]
    ja: Option<String>,
    #[serde(default)]
    en: Option<String>,
}

#[derive(Serialize)]
struct JudgePayload<'a> {
    id: u32,
    orig: Vec<&'a str>,
    ja: Vec<&'a str>,
    en: Vec<&'a str>,
    glossary: &'a str,
}

#[derive(Serialize)]
struct CurrentLine<'a> {
    ja: &'a str,
    en: &'a str,
}

#[derive(Serialize)]
struct ImprovePayload<'a> {
    id: u32,
    orig: Vec<&'a str>,
    current: Vec<CurrentLine<'a>>,
    issues: &'a [JudgeIssue],
    glossary: &'a str,
}

#[derive(Clone, Debug, Default)]
pub struct RefineReport {
    pub ok: usize,
    pub improved: usize,
    pub failed: Vec<u32>,
    pub skipped: Vec<u32>,
    pub total: usize,
    pub log: Vec<String>,
}

impl RefineReport {
    fn push(&mut self, line: String) {
        info!(target: "refine", "{line}");
        self.log.push(line);
    }

    #[must_use]
    pub fn summary_line(&self) -> String {
        format!(
            "[SUMMARY] ok={}, improved={}, failed={}, total={}",
            self.ok,
            self.improved,
            self.failed.len(),
            self.total
        )
    }
}

pub struct RefinePipeline<'a> {
    ctx: PipelineContext<'a>,
    opts: &'a RefineOptions,
    glossary_note: String,
}

impl<'a> RefinePipeline<'a> {
    pub fn new(ctx: PipelineContext<'a>, opts: &'a RefineOptions) -> Self {
        Self {
            glossary_note: ctx.cfg.style.glossary().render_note(),
            ctx,
            opts,
        }
    }

    fn judge(&self, record: &PoemRecord) -> GateResult<JudgeReport> {
        let cfg = self.ctx.cfg;
        let target = self.opts.target.to_string();
        let en_max = cfg.style.en_max.to_string();
        let system = render_template(
            &cfg.prompts.judge_system,
            &[("target", target.as_str()), ("en_max", en_max.as_str())],
        );
        let payload = JudgePayload {
            id: record.id,
            orig: record.lines.iter().map(|l| l.orig.as_str()).collect(),
            ja: record.lines.iter().map(|l| l.ja.as_str()).collect(),
            en: record.lines.iter().map(|l| l.en.as_str()).collect(),
            glossary: &self.glossary_note,
        };
        let user = serde_json::to_string(&payload).map_err(|e| GateError::parse("judge payload", e))?;
        let request = ChatRequest::json(
            &cfg.models.judge,
            vec![ChatMessage::system(system), ChatMessage::user(user)],
            0.0,
        );
        cfg.retry.run("judge", |_| {
            let obj = call_json(self.ctx.backend, self.ctx.trace, "judge", &request)?;
            serde_json::from_value::<JudgeReport>(obj).map_err(|e| GateError::parse("judge reply", e))
        })
    }

    /// Rewritten `(ja, en)` pairs for the four lines.
    fn improve(
        &self,
        record: &PoemRecord,
        report: &JudgeReport,
        escalate: bool,
    ) -> GateResult<Vec<(String, String)>> {
        let cfg = self.ctx.cfg;
        let model = if escalate {
            &cfg.models.judge
        } else {
            &cfg.models.base
        };
        let en_max = cfg.style.en_max.to_string();
        let system = render_template(&cfg.prompts.improve_system, &[("en_max", en_max.as_str())]);
        let payload = ImprovePayload {
            id: record.id,
            orig: record.lines.iter().map(|l| l.orig.as_str()).collect(),
            current: record
                .lines
                .iter()
                .map(|l| CurrentLine {
                    ja: &l.ja,
                    en: &l.en,
                })
                .collect(),
            issues: &report.issues,
            glossary: &self.glossary_note,
        };
        let user = serde_json::to_string(&payload).map_err(|e| GateError::parse("improve payload", e))?;
        let request = ChatRequest::json(
            model,
            vec![ChatMessage::system(system), ChatMessage::user(user)],
            0.0,
        );
        cfg.retry.run("improve", |_| {
            let obj = call_json(self.ctx.backend, self.ctx.trace, "improve", &request)?;
            let reply: ImproveReply =
                serde_json::from_value(obj).map_err(|e| GateError::parse("improve reply", e))?;
            if reply.lines.len() != LINES_PER_POEM {
                return Err(GateError::ShapeMismatch(format!(
                    "improve: expected {LINES_PER_POEM} lines, got {}",
                    reply.lines.len()
                )));
            }
            Ok(reply
                .lines
                .into_iter()
                .map(|x| {
                    (
                        x.ja.unwrap_or_default().trim().to_string(),
                        x.en.unwrap_or_default().trim().to_string(),
                    )
                })
                .collect())
        })
    }

    fn lint(&self, lines: &mut [LineRecord], id: u32) {
        let lint = self.ctx.cfg.style.lint_lines(lines);
        if !lint.is_clean() {
            warn!(id = id, remaining = ?lint.remaining, "lint left issues for the judge");
        }
        if !lint.found.is_empty() || !lint.warnings.is_empty() {
            debug!(id = id, found = ?lint.found, warnings = ?lint.warnings, "lint");
        }
    }

    /// Refine one record in place, restoring `snapshot` unless the target is reached.
    fn refine_record(&self, record: &mut PoemRecord, report: &mut RefineReport) {
        let id = record.id;
        let snapshot: Vec<LineRecord> = record.lines.clone();
        let target = self.opts.target;

        self.lint(&mut record.lines, id);

        let mut judged = match self.judge(record) {
            Ok(j) => j,
            Err(err) => {
                record.lines = snapshot;
                report.failed.push(id);
                report.push(format!("[ERR] id={id} judge failed: {err}"));
                return;
            }
        };
        if judged.meets(target) {
            report.ok += 1;
            report.push(format!("[OK] id={id} score={}", judged.score));
            return;
        }

        let passes = self.opts.passes.max(1);
        for p in 1..=passes {
            let escalate = p == passes;
            let rewritten = match self.improve(record, &judged, escalate) {
                Ok(r) => r,
                Err(err) => {
                    warn!(id = id, pass = p, error = %err, "improve failed");
                    continue;
                }
            };
            for (line, (ja, en)) in record.lines.iter_mut().zip(rewritten) {
                line.ja = ja;
                line.en = en;
            }
            self.lint(&mut record.lines, id);

            match self.judge(record) {
                Ok(j) => judged = j,
                Err(err) => {
                    warn!(id = id, pass = p, error = %err, "re-judge failed");
                    continue;
                }
            }
            if judged.meets(target) {
                report.improved += 1;
                report.push(format!(
                    "[FIXED] id={id} pass={p} score={} escalate={escalate}",
                    judged.score
                ));
                return;
            }
        }

        record.lines = snapshot;
        report.failed.push(id);
        report.push(format!(
            "[FAIL] id={id} last_score={} issues={}",
            judged.score,
            judged.issues.len()
        ));
    }

    pub fn run(&self, records: &mut [PoemRecord]) -> RefineReport {
        let mut report = RefineReport {
            total: records.len(),
            ..RefineReport::default()
        };
        let selected: Vec<usize> = records
            .iter()
            .enumerate()
            .filter(|(_, r)| self.opts.ids.is_empty() || self.opts.ids.contains(&r.id))
            .map(|(i, _)| i)
            .collect();
        self.ctx.progress.info(format!(
            "[INFO] poems total={}, selected={}, model={}, judge={}, target={}, passes={}",
            records.len(),
            selected.len(),
            self.ctx.cfg.models.base,
            self.ctx.cfg.models.judge,
            self.opts.target,
            self.opts.passes
        ));

        for (n, &i) in selected.iter().enumerate() {
            let rec = &mut records[i];
            if !rec.is_well_formed() || rec.has_placeholder() {
                report.skipped.push(rec.id);
                report.push(format!("[SKIP] id={} not fully translated", rec.id));
                continue;
            }
            self.refine_record(rec, &mut report);
            self.ctx.progress.progress("refine", n + 1, selected.len());
        }

        self.ctx
            .progress
            .report(report.log.iter().take(REFINE_LOG_LIMIT));
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn judge_report_is_lenient() {
        let r: JudgeReport = serde_json::from_str(
            r#"{"score":"87.6","subscores":{"fidelity":35},"pass":false,
                "issues":[{"line":"2","hint":"tighten"},"stray text",{"line":4.0,"en":"x"}],
                "summary":"ok"}"#,
        )
        .unwrap();
        assert_eq!(r.score, 88);
        assert!(r.meets(88));
        assert!(!r.meets(89));
        assert_eq!(r.issues.len(), 2);
        assert_eq!(r.issues[0].line, 2);
        assert_eq!(r.issues[1].line, 4);

        let empty: JudgeReport = serde_json::from_str("{}").unwrap();
        assert_eq!(empty.score, 0);
        assert!(empty.issues.is_empty());
    }
}
