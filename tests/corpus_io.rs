use std::fs;

use omikuji_gate::corpus::{self, count_remaining_placeholders};
use omikuji_gate::GateError;

const SAMPLE: &str = r#"[
  {
    "id": 7,
    "rank": "大吉",
    "lines": [
      {"orig": "七寶浮圖塔", "ja": "訳準備中", "en": "TBD", "note": "keep"},
      {"orig": "高峰頂上安", "ja": "高き峰", "en": "the highest peak"},
      {"orig": "眾人皆仰望", "ja": "（訳準備中）", "en": "crowds look up"},
      {"orig": "莫作等閑看", "ja": "軽んずるなかれ", "en": "tbd"}
    ]
  }
]"#;

#[test]
fn save_backs_up_and_keeps_unknown_fields() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("omikuji.json");
    fs::write(&path, format!("\u{feff}{SAMPLE}")).unwrap();

    let mut records = corpus::load(&path).unwrap();
    assert_eq!(count_remaining_placeholders(&records), 3);
    records[0].lines[0].ja = "七宝の塔".to_string();

    let outcome = corpus::save(&path, &records).unwrap();

    let bak = outcome.backup.expect("backup written");
    assert!(bak.to_string_lossy().ends_with(".bak"));
    assert_eq!(fs::read_to_string(&bak).unwrap(), format!("\u{feff}{SAMPLE}"));

    let reread = corpus::load(&path).unwrap();
    assert_eq!(reread, records);
    let raw: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(raw[0]["rank"], "大吉");
    assert_eq!(raw[0]["lines"][0]["note"], "keep");
    assert_eq!(raw[0]["lines"][0]["ja"], "七宝の塔");
}

#[test]
fn save_to_a_new_path_needs_no_backup() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("in.json");
    fs::write(&src, SAMPLE).unwrap();
    let records = corpus::load(&src).unwrap();

    let out = dir.path().join("nested").join("out.json");
    let outcome = corpus::save(&out, &records).unwrap();

    assert!(outcome.backup.is_none());
    assert_eq!(corpus::load(&out).unwrap(), records);
}

#[test]
fn missing_input_maps_to_exit_code_one() {
    let dir = tempfile::tempdir().unwrap();
    let err = corpus::load(&dir.path().join("absent.json")).unwrap_err();
    assert!(matches!(err, GateError::InputNotFound(_)));
    assert_eq!(err.exit_code(), 1);
}
