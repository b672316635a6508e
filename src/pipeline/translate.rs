//! Translation client: one chat call per batch of quatrains, reply normalized to
//! `id -> 4 LineRecord`.
//!
//! Replies are accepted in three shapes, tried in order:
//! - `{"id":1,"lines":[{"orig","ja","en"} x4]}`
//! - `{"id":1,"ja":[..4],"en":[..4]}` zipped against the request's source lines
//! - `{"id":1,"lines":[..]}` where the first four entries can be salvaged (objects with
//!   `ja`/`en`, or `"ja|en"` strings), all non-empty
//!
//! Anything else drops that record from the result map.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::corpus::{LineRecord, PoemRecord, LINES_PER_POEM};
use crate::error::{GateError, GateResult};
use crate::models::{ChatBackend, ChatMessage, ChatRequest};
use crate::pipeline::prompts::{render_template, PromptCatalog};
use crate::pipeline::trace::TraceWriter;
use crate::retry::RetryPolicy;
use crate::textutil::{cleanup_model_text, must_extract_json_obj};

/// Source lines of one poem as sent to the service.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct BatchTask {
    pub id: u32,
    #[serde(rename = "lines")]
    pub orig_lines: Vec<String>,
}

impl BatchTask {
    #[must_use]
    pub fn from_record(record: &PoemRecord) -> Self {
        Self {
            id: record.id,
            orig_lines: record.origs(),
        }
    }
}

#[derive(Serialize)]
struct TasksPayload<'a> {
    tasks: &'a [BatchTask],
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResultShape {
    Shaped,
    Parallel,
    Salvaged,
}

#[derive(Clone, Debug, PartialEq)]
pub struct NormalizedResult {
    pub shape: ResultShape,
    pub lines: Vec<LineRecord>,
}

pub type ResultMap = BTreeMap<u32, NormalizedResult>;

#[derive(Debug, Deserialize)]
struct WireEnvelope {
    results: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct WireLine {
    #[serde(default)]
    orig: Option<String>,
    #[serde(deserialize_with = "crate::corpus::text_or_null")]
    ja: String,
    #[serde(deserialize_with = "crate::corpus::text_or_null")]
    en: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireResult {
    Shaped {
        id: u32,
        lines: [WireLine; LINES_PER_POEM],
    },
    Parallel {
        id: u32,
        ja: [Option<String>; LINES_PER_POEM],
        en: [Option<String>; LINES_PER_POEM],
    },
    Loose {
        id: u32,
        lines: Vec<Value>,
    },
}

impl WireResult {
    fn id(&self) -> u32 {
        match self {
            Self::Shaped { id, .. } | Self::Parallel { id, .. } | Self::Loose { id, .. } => *id,
        }
    }
}

fn pick_orig(reply: Option<&str>, request: &str) -> String {
    match reply.map(str::trim) {
        Some(o) if !o.is_empty() => o.to_string(),
        _ => request.to_string(),
    }
}

fn salvage_entry(entry: &Value) -> Option<(Option<String>, String, String)> {
    match entry {
        Value::Object(map) => {
            let text = |k: &str| match map.get(k) {
                Some(Value::String(s)) => Some(s.trim().to_string()),
                Some(Value::Null) => Some(String::new()),
                _ => None,
            };
            let orig = map.get("orig").and_then(Value::as_str).map(str::to_string);
            Some((orig, text("ja")?, text("en")?))
        }
        Value::String(s) => {
            let (ja, en) = s.split_once('|')?;
            Some((None, ja.trim().to_string(), en.trim().to_string()))
        }
        _ => None,
    }
}

fn normalize_entry(wire: WireResult, origs: &[String]) -> Result<NormalizedResult, String> {
    if origs.len() != LINES_PER_POEM {
        return Err(format!("request has {} source lines", origs.len()));
    }
    match wire {
        WireResult::Shaped { lines, .. } => Ok(NormalizedResult {
            shape: ResultShape::Shaped,
            lines: lines
                .iter()
                .zip(origs)
                .map(|(x, o)| LineRecord::new(&pick_orig(x.orig.as_deref(), o), x.ja.trim(), x.en.trim()))
                .collect(),
        }),
        WireResult::Parallel { ja, en, .. } => Ok(NormalizedResult {
            shape: ResultShape::Parallel,
            lines: (0..LINES_PER_POEM)
                .map(|i| {
                    LineRecord::new(
                        &origs[i],
                        ja[i].as_deref().unwrap_or_default().trim(),
                        en[i].as_deref().unwrap_or_default().trim(),
                    )
                })
                .collect(),
        }),
        WireResult::Loose { lines, .. } => {
            let mut fixed = Vec::with_capacity(LINES_PER_POEM);
            for (entry, o) in lines.iter().take(LINES_PER_POEM).zip(origs) {
                let Some((orig, ja, en)) = salvage_entry(entry) else {
                    break;
                };
                if ja.is_empty() || en.is_empty() {
                    break;
                }
                fixed.push(LineRecord::new(&pick_orig(orig.as_deref(), o), &ja, &en));
            }
            if fixed.len() == LINES_PER_POEM {
                Ok(NormalizedResult {
                    shape: ResultShape::Salvaged,
                    lines: fixed,
                })
            } else {
                Err(format!("unsupported result shape ({} usable lines)", fixed.len()))
            }
        }
    }
}

/// Map a parsed reply onto the request. Fails only when the top-level `results` array is absent;
/// individual unusable entries are logged and left out.
pub fn normalize_response(obj: &Value, tasks: &[BatchTask]) -> GateResult<ResultMap> {
    let envelope: WireEnvelope = serde_json::from_value(obj.clone())
        .map_err(|_| GateError::ShapeMismatch("missing 'results' array".to_string()))?;
    let origs_by_id: BTreeMap<u32, &[String]> = tasks
        .iter()
        .map(|t| (t.id, t.orig_lines.as_slice()))
        .collect();

    let mut out = ResultMap::new();
    for entry in envelope.results {
        let raw_id = entry.get("id").cloned();
        let wire: WireResult = match serde_json::from_value(entry) {
            Ok(w) => w,
            Err(_) => {
                warn!(id = ?raw_id, "unusable result entry");
                continue;
            }
        };
        let id = wire.id();
        let Some(origs) = origs_by_id.get(&id) else {
            warn!(id = id, "result for an id that was not requested");
            continue;
        };
        match normalize_entry(wire, origs) {
            Ok(n) => {
                debug!(id = id, shape = ?n.shape, "normalized result");
                out.insert(id, n);
            }
            Err(why) => warn!(id = id, why = %why, "dropping result"),
        }
    }
    Ok(out)
}

/// Send `request`, tracing prompt and reply, and parse the first JSON object of the reply.
pub(crate) fn call_json(
    backend: &dyn ChatBackend,
    trace: &TraceWriter,
    stage: &str,
    request: &ChatRequest,
) -> GateResult<Value> {
    let call = trace.next_call();
    if trace.enabled() {
        let dump = request
            .messages
            .iter()
            .map(|m| format!("[{}]\n{}", m.role, m.content))
            .collect::<Vec<_>>()
            .join("\n\n");
        if let Err(err) = trace.write_call_text(call, stage, "prompt", &dump) {
            warn!(error = %err, "trace write failed");
        }
    }
    let raw = backend.chat(request)?;
    if let Err(err) = trace.write_call_text(call, stage, "raw", &raw) {
        warn!(error = %err, "trace write failed");
    }
    must_extract_json_obj(&cleanup_model_text(&raw))
}

pub struct TranslationClient<'a> {
    backend: &'a dyn ChatBackend,
    prompts: &'a PromptCatalog,
    trace: &'a TraceWriter,
    en_hint: usize,
}

impl<'a> TranslationClient<'a> {
    /// `en_max` is the validator budget; the prompt asks for a little less to leave headroom.
    pub fn new(
        backend: &'a dyn ChatBackend,
        prompts: &'a PromptCatalog,
        trace: &'a TraceWriter,
        en_max: usize,
    ) -> Self {
        Self {
            backend,
            prompts,
            trace,
            en_hint: en_max.saturating_sub(8).max(1),
        }
    }

    pub fn build_messages(&self, tasks: &[BatchTask]) -> GateResult<Vec<ChatMessage>> {
        let tasks_json = serde_json::to_string(&TasksPayload { tasks })
            .map_err(|e| GateError::parse("serialize tasks", e))?;
        let en_hint = self.en_hint.to_string();
        let vars = [("en_hint", en_hint.as_str()), ("tasks_json", tasks_json.as_str())];
        Ok(vec![
            ChatMessage::system(render_template(&self.prompts.translate_system, &vars)),
            ChatMessage::user(render_template(&self.prompts.translate_user, &vars)),
        ])
    }

    /// One request for all `tasks`, no retry.
    pub fn translate_batch(
        &self,
        tasks: &[BatchTask],
        model: &str,
        temperature: f32,
    ) -> GateResult<ResultMap> {
        let request = ChatRequest::json(model, self.build_messages(tasks)?, temperature);
        let obj = call_json(self.backend, self.trace, "translate", &request)?;
        normalize_response(&obj, tasks)
    }

    /// Batch call under `policy`: the first attempt uses `temperature`, retries use 0.
    pub fn translate_with_retry(
        &self,
        tasks: &[BatchTask],
        model: &str,
        temperature: f32,
        policy: &RetryPolicy,
    ) -> GateResult<ResultMap> {
        policy.run("translate batch", |attempt| {
            let t = if attempt == 0 { temperature } else { 0.0 };
            self.translate_batch(tasks, model, t)
        })
    }

    /// Single poem at temperature 0. A reply without this id counts as a failed attempt.
    pub fn translate_one(
        &self,
        task: &BatchTask,
        model: &str,
        policy: &RetryPolicy,
    ) -> GateResult<Vec<LineRecord>> {
        policy.run("translate single", |_| {
            let mut map = self.translate_batch(std::slice::from_ref(task), model, 0.0)?;
            map.remove(&task.id)
                .map(|n| n.lines)
                .ok_or_else(|| GateError::ShapeMismatch(format!("id={} missing in result", task.id)))
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn tasks() -> Vec<BatchTask> {
        vec![BatchTask {
            id: 7,
            orig_lines: ["一一一一一", "二二二二二", "三三三三三", "四四四四四"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }]
    }

    #[test]
    fn shaped_reply_backfills_missing_orig() {
        let obj = json!({"results":[{"id":7,"lines":[
            {"orig":"一一一一一","ja":" 春 ","en":"spring"},
            {"ja":"夏","en":"summer"},
            {"orig":"","ja":"秋","en":"autumn"},
            {"orig":"違う","ja":"冬","en":null}
        ]}]});
        let map = normalize_response(&obj, &tasks()).unwrap();
        let r = &map[&7];
        assert_eq!(r.shape, ResultShape::Shaped);
        assert_eq!(r.lines[0].ja, "春");
        assert_eq!(r.lines[1].orig, "二二二二二");
        assert_eq!(r.lines[2].orig, "三三三三三");
        assert_eq!(r.lines[3].orig, "違う");
        assert_eq!(r.lines[3].en, "");
    }

    #[test]
    fn parallel_arrays_zip_with_request() {
        let obj = json!({"results":[{"id":7,"ja":["a","b","c","d"],"en":["e","f","g","h"]}]});
        let map = normalize_response(&obj, &tasks()).unwrap();
        assert_eq!(map[&7].shape, ResultShape::Parallel);
        assert_eq!(map[&7].lines[3].orig, "四四四四四");
        assert_eq!(map[&7].lines[3].en, "h");
    }

    #[test]
    fn salvages_overlong_and_piped_lines() {
        let obj = json!({"results":[{"id":7,"lines":[
            {"ja":"a","en":"e"},
            "b|f",
            {"ja":"c","en":"g"},
            {"ja":"d","en":"h"},
            {"ja":"extra","en":"extra"}
        ]}]});
        let map = normalize_response(&obj, &tasks()).unwrap();
        assert_eq!(map[&7].shape, ResultShape::Salvaged);
        assert_eq!(map[&7].lines[1].ja, "b");
        assert_eq!(map[&7].lines[1].en, "f");
    }

    #[test]
    fn short_or_unknown_results_are_dropped() {
        let obj = json!({"results":[
            {"id":7,"lines":[{"ja":"a","en":"e"},{"ja":"b","en":"f"}]},
            {"id":99,"ja":["a","b","c","d"],"en":["e","f","g","h"]},
            {"id":"seven","lines":[]}
        ]});
        assert!(normalize_response(&obj, &tasks()).unwrap().is_empty());
    }

    #[test]
    fn missing_results_is_malformed() {
        let err = normalize_response(&json!({"data":[]}), &tasks()).unwrap_err();
        assert!(matches!(err, GateError::ShapeMismatch(_)));
    }
}
