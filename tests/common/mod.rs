#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::VecDeque;
use std::time::Duration;

use serde_json::{json, Map, Value};

use omikuji_gate::corpus::{LineRecord, PoemRecord};
use omikuji_gate::models::{ChatBackend, ChatRequest};
use omikuji_gate::pipeline::{PipelineConfig, PipelineContext, TraceWriter};
use omikuji_gate::progress::ConsoleProgress;
use omikuji_gate::retry::RetryPolicy;
use omikuji_gate::{GateError, GateResult};

pub const ORIGS: [&str; 4] = ["七寶浮圖塔", "高峰頂上安", "眾人皆仰望", "莫作等閑看"];

/// Replays scripted replies in order and records every request. An empty queue answers with a
/// service error, like an unreachable endpoint.
#[derive(Default)]
pub struct ScriptedBackend {
    replies: RefCell<VecDeque<String>>,
    pub requests: RefCell<Vec<ChatRequest>>,
}

impl ScriptedBackend {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            replies: RefCell::new(replies.into_iter().map(Into::into).collect()),
            requests: RefCell::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.requests.borrow().len()
    }

    pub fn models(&self) -> Vec<String> {
        self.requests.borrow().iter().map(|r| r.model.clone()).collect()
    }

    pub fn left(&self) -> usize {
        self.replies.borrow().len()
    }
}

impl ChatBackend for ScriptedBackend {
    fn chat(&self, request: &ChatRequest) -> GateResult<String> {
        self.requests.borrow_mut().push(request.clone());
        self.replies
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| GateError::ServiceCall("no scripted reply".to_string()))
    }
}

/// Defaults with a single attempt and no sleeping.
pub fn test_config() -> PipelineConfig {
    let mut cfg = PipelineConfig::default();
    cfg.models.base = "base-model".to_string();
    cfg.models.hard = "hard-model".to_string();
    cfg.models.judge = "judge-model".to_string();
    cfg.retry = RetryPolicy::new(1, Duration::ZERO);
    cfg.batch_delay = Duration::ZERO;
    cfg
}

pub struct Harness {
    pub cfg: PipelineConfig,
    pub trace: TraceWriter,
    pub progress: ConsoleProgress,
}

impl Harness {
    pub fn new(cfg: PipelineConfig) -> Self {
        Self {
            cfg,
            trace: TraceWriter::disabled(),
            progress: ConsoleProgress::new(false),
        }
    }

    pub fn ctx<'a>(&'a self, backend: &'a ScriptedBackend) -> PipelineContext<'a> {
        PipelineContext {
            backend,
            cfg: &self.cfg,
            trace: &self.trace,
            progress: &self.progress,
        }
    }
}

pub fn poem(id: u32, lines: [(&str, &str); 4]) -> PoemRecord {
    PoemRecord {
        id,
        lines: ORIGS
            .iter()
            .zip(lines)
            .map(|(o, (ja, en))| LineRecord::new(o, ja, en))
            .collect(),
        extra: Map::new(),
    }
}

pub fn placeholder_poem(id: u32) -> PoemRecord {
    poem(id, [("訳準備中", "TBD"); 4])
}

pub fn line(ja: &str, en: &str) -> Value {
    json!({ "ja": ja, "en": en })
}

/// `{"results":[{"id":..,"lines":[..]}]}` with `orig` echoed from [`ORIGS`].
pub fn shaped_reply(items: &[(u32, [(&str, &str); 4])]) -> String {
    let results: Vec<Value> = items
        .iter()
        .map(|(id, lines)| {
            let lines: Vec<Value> = ORIGS
                .iter()
                .zip(lines)
                .map(|(o, (ja, en))| json!({ "orig": o, "ja": ja, "en": en }))
                .collect();
            json!({ "id": id, "lines": lines })
        })
        .collect();
    json!({ "results": results }).to_string()
}

pub const GOOD: [(&str, &str); 4] = [
    ("七宝の塔", "a seven-jeweled pagoda stands"),
    ("高き峰の頂に安らぐ", "calm upon the highest peak"),
    ("人みな仰ぎ見る", "all people gaze up in awe"),
    ("等閑に見るなかれ", "never regard it lightly"),
];

pub const OTHER: [(&str, &str); 4] = [
    ("宝の塔", "a jeweled tower rises"),
    ("峰の上に据わる", "set firm on the summit"),
    ("衆人が見上げる", "crowds look upward"),
    ("軽んずるなかれ", "hold it in respect"),
];
