mod common;

use serde_json::{json, Value};

use common::*;
use omikuji_gate::pipeline::{RefineOptions, RefinePipeline};

fn judge(score: u32) -> String {
    json!({
        "score": score,
        "subscores": { "fidelity": 30, "style": 20 },
        "pass": score >= 90,
        "issues": [{ "line": 2, "ja": "", "en": "too flat", "hint": "keep the image of the peak" }],
        "summary": "needs work"
    })
    .to_string()
}

fn improved(lines: [(&str, &str); 4]) -> String {
    let lines: Vec<Value> = lines.iter().map(|(ja, en)| line(ja, en)).collect();
    json!({ "lines": lines }).to_string()
}

fn opts(passes: usize) -> RefineOptions {
    RefineOptions {
        passes,
        ..RefineOptions::default()
    }
}

#[test]
fn record_at_target_is_kept_with_lint_fixes() {
    let h = Harness::new(test_config());
    let backend = ScriptedBackend::new([judge(92)]);
    let mut lines = GOOD;
    lines[1].1 = "my heart, at peace.";
    let mut records = vec![poem(1, lines)];

    let report = RefinePipeline::new(h.ctx(&backend), &opts(3)).run(&mut records);

    assert_eq!(report.ok, 1);
    assert_eq!(records[0].lines[1].en, "heart at peace");
    assert!(report.log.iter().any(|l| l == "[OK] id=1 score=92"));
    assert_eq!(backend.models(), vec!["judge-model"]);
    assert_eq!(backend.requests.borrow()[0].temperature, 0.0);
}

#[test]
fn improved_record_is_committed_after_lint() {
    let h = Harness::new(test_config());
    let mut rewrite = OTHER;
    rewrite[0].1 = "a jeweled tower, rises.";
    let backend = ScriptedBackend::new([judge(40), improved(rewrite), judge(95)]);
    let mut records = vec![poem(1, GOOD)];

    let report = RefinePipeline::new(h.ctx(&backend), &opts(3)).run(&mut records);

    assert_eq!(report.improved, 1);
    assert!(report
        .log
        .iter()
        .any(|l| l == "[FIXED] id=1 pass=1 score=95 escalate=false"));
    assert_eq!(records[0].lines[0].en, "a jeweled tower rises");
    assert_eq!(records[0].lines[3].ja, OTHER[3].0);
    assert_eq!(records[0].lines[2].orig, ORIGS[2]);
    assert_eq!(backend.models(), vec!["judge-model", "base-model", "judge-model"]);
}

#[test]
fn record_below_target_rolls_back_to_its_input() {
    let h = Harness::new(test_config());
    let backend = ScriptedBackend::new([
        judge(50),
        improved(OTHER),
        judge(60),
        improved(OTHER),
        judge(70),
    ]);
    let mut lines = GOOD;
    lines[0].1 = "a seven-jeweled pagoda, stands";
    let mut records = vec![poem(1, lines)];
    let before = records.clone();

    let report = RefinePipeline::new(h.ctx(&backend), &opts(2)).run(&mut records);

    assert_eq!(records, before);
    assert_eq!(report.failed, vec![1]);
    assert!(report.log.iter().any(|l| l == "[FAIL] id=1 last_score=70 issues=1"));
    // The last rewrite escalates to the judge tier.
    assert_eq!(
        backend.models(),
        vec!["judge-model", "base-model", "judge-model", "judge-model", "judge-model"]
    );
    assert_eq!(backend.left(), 0);
}

#[test]
fn judge_failure_restores_the_record() {
    let h = Harness::new(test_config());
    let backend = ScriptedBackend::new(Vec::<String>::new());
    let mut lines = GOOD;
    lines[2].1 = "all people gaze up, in awe";
    let mut records = vec![poem(4, lines)];
    let before = records.clone();

    let report = RefinePipeline::new(h.ctx(&backend), &opts(3)).run(&mut records);

    assert_eq!(records, before);
    assert_eq!(report.failed, vec![4]);
    assert!(report.log.iter().any(|l| l.starts_with("[ERR] id=4 judge failed:")));
}

#[test]
fn malformed_improve_reply_consumes_a_pass() {
    let h = Harness::new(test_config());
    let three = json!({ "lines": [line("a", "b"), line("c", "d"), line("e", "f")] }).to_string();
    let backend = ScriptedBackend::new([judge(30), three, improved(OTHER), judge(91)]);
    let mut records = vec![poem(6, GOOD)];

    let report = RefinePipeline::new(h.ctx(&backend), &opts(2)).run(&mut records);

    assert_eq!(report.improved, 1);
    assert!(report
        .log
        .iter()
        .any(|l| l == "[FIXED] id=6 pass=2 score=91 escalate=true"));
    assert_eq!(records[0].lines[1].en, OTHER[1].1);
}

#[test]
fn untranslated_records_are_skipped() {
    let h = Harness::new(test_config());
    let backend = ScriptedBackend::new([judge(99)]);
    let mut short = poem(3, GOOD);
    short.lines.truncate(3);
    let mut records = vec![placeholder_poem(2), short, poem(5, GOOD)];
    let refine_opts = RefineOptions {
        ids: [2, 3].into_iter().collect(),
        ..RefineOptions::default()
    };

    let report = RefinePipeline::new(h.ctx(&backend), &refine_opts).run(&mut records);

    assert_eq!(report.skipped, vec![2, 3]);
    assert_eq!(backend.calls(), 0);
    assert!(report.log.iter().any(|l| l == "[SKIP] id=2 not fully translated"));
    assert_eq!(report.summary_line(), "[SUMMARY] ok=0, improved=0, failed=0, total=3");
}
