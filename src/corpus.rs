//! On-disk poem corpus: a JSON array of records, read whole and written whole.

use std::collections::BTreeSet;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::error::{GateError, GateResult};

pub const LINES_PER_POEM: usize = 4;

pub const JA_PLACEHOLDERS: [&str; 2] = ["訳準備中", "（訳準備中）"];
pub const EN_PLACEHOLDER: &str = "TBD";

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LineRecord {
    #[serde(default, deserialize_with = "text_or_null")]
    pub orig: String,
    #[serde(default, deserialize_with = "text_or_null")]
    pub ja: String,
    #[serde(default, deserialize_with = "text_or_null")]
    pub en: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Absent and `null` both read as an empty string.
pub(crate) fn text_or_null<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    Ok(Option::<String>::deserialize(d)?.unwrap_or_default())
}

impl LineRecord {
    #[must_use]
    pub fn new(orig: &str, ja: &str, en: &str) -> Self {
        Self {
            orig: orig.to_string(),
            ja: ja.to_string(),
            en: en.to_string(),
            extra: Map::new(),
        }
    }

    #[must_use]
    pub fn has_placeholder(&self) -> bool {
        is_placeholder_ja(&self.ja) || is_placeholder_en(&self.en)
    }
}

/// One fortune slip. Rank/category metadata is opaque and carried through untouched.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PoemRecord {
    pub id: u32,
    #[serde(default)]
    pub lines: Vec<LineRecord>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PoemRecord {
    #[must_use]
    pub fn has_placeholder(&self) -> bool {
        self.lines.iter().any(LineRecord::has_placeholder)
    }

    #[must_use]
    pub fn placeholder_count(&self) -> usize {
        self.lines.iter().filter(|l| l.has_placeholder()).count()
    }

    /// Exactly four lines, each carrying a non-empty `orig`.
    #[must_use]
    pub fn is_well_formed(&self) -> bool {
        self.lines.len() == LINES_PER_POEM && self.lines.iter().all(|l| !l.orig.trim().is_empty())
    }

    #[must_use]
    pub fn origs(&self) -> Vec<String> {
        self.lines.iter().map(|l| l.orig.clone()).collect()
    }
}

#[must_use]
pub fn is_placeholder_ja(s: &str) -> bool {
    JA_PLACEHOLDERS.contains(&s.trim())
}

#[must_use]
pub fn is_placeholder_en(s: &str) -> bool {
    s.trim().eq_ignore_ascii_case(EN_PLACEHOLDER)
}

/// Number of lines across the corpus still holding a placeholder in `ja` or `en`.
#[must_use]
pub fn count_remaining_placeholders(records: &[PoemRecord]) -> usize {
    records.iter().map(PoemRecord::placeholder_count).sum()
}

/// Parse a comma-separated id filter such as `"1, 2,17"`. Empty input means "no filter".
pub fn parse_ids(raw: &str) -> anyhow::Result<BTreeSet<u32>> {
    let mut out = BTreeSet::new();
    for part in raw.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let id: u32 = part
            .parse()
            .map_err(|_| anyhow!("--ids must be comma-separated integers (got {part:?})"))?;
        out.insert(id);
    }
    Ok(out)
}

pub fn load(path: &Path) -> GateResult<Vec<PoemRecord>> {
    if !path.exists() {
        return Err(GateError::InputNotFound(path.to_path_buf()));
    }
    let text = std::fs::read_to_string(path)?;
    let text = text.trim_start_matches('\u{FEFF}');
    let records: Vec<PoemRecord> = serde_json::from_str(text)
        .map_err(|e| GateError::parse(format!("corpus {}", path.display()), e))?;
    info!(path = %path.display(), records = records.len(), "loaded corpus");
    Ok(records)
}

pub fn to_pretty_json(records: &[PoemRecord]) -> anyhow::Result<String> {
    serde_json::to_string_pretty(records).context("serialize corpus")
}

#[derive(Clone, Debug, Default)]
pub struct SaveOutcome {
    pub backup: Option<PathBuf>,
    pub backup_error: Option<String>,
}

/// `<path>.<unix-seconds>.bak`
#[must_use]
pub fn backup_path_for(path: &Path, unix_secs: i64) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_owned();
    name.push(format!(".{unix_secs}.bak"));
    PathBuf::from(name)
}

/// Write the full corpus, copying any existing file at `path` aside first.
/// A failed backup is reported in the outcome but does not stop the write.
pub fn save(path: &Path, records: &[PoemRecord]) -> anyhow::Result<SaveOutcome> {
    let json = to_pretty_json(records)?;
    let mut outcome = SaveOutcome::default();
    if path.exists() {
        let bak = backup_path_for(path, chrono::Utc::now().timestamp());
        match std::fs::copy(path, &bak) {
            Ok(_) => outcome.backup = Some(bak),
            Err(err) => {
                warn!(path = %bak.display(), error = %err, "backup failed");
                outcome.backup_error = Some(format!("{}: {err}", bak.display()));
            }
        }
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create output dir: {}", parent.display()))?;
    }
    std::fs::write(path, json).with_context(|| format!("write corpus: {}", path.display()))?;
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn poem(id: u32, ja: &str, en: &str) -> PoemRecord {
        PoemRecord {
            id,
            lines: (0..4)
                .map(|i| LineRecord::new(&format!("句{i}句句句"), ja, en))
                .collect(),
            extra: Map::new(),
        }
    }

    #[test]
    fn placeholder_sentinels() {
        assert!(is_placeholder_ja("訳準備中"));
        assert!(is_placeholder_ja(" （訳準備中） "));
        assert!(!is_placeholder_ja("春の風"));
        assert!(is_placeholder_en("tbd"));
        assert!(is_placeholder_en(" TBD\n"));
        assert!(!is_placeholder_en("TBD soon"));
    }

    #[test]
    fn counts_placeholder_lines() {
        let mut recs = vec![poem(1, "訳準備中", "TBD"), poem(2, "春", "spring")];
        assert_eq!(count_remaining_placeholders(&recs), 4);
        recs[0].lines[0].ja = "花".into();
        assert_eq!(count_remaining_placeholders(&recs), 4);
        recs[0].lines[0].en = "flower".into();
        assert_eq!(count_remaining_placeholders(&recs), 3);
    }

    #[test]
    fn parse_ids_accepts_spaces_and_blanks() {
        let ids = parse_ids(" 3, 1,,7 ").unwrap();
        assert_eq!(ids.into_iter().collect::<Vec<_>>(), vec![1, 3, 7]);
        assert!(parse_ids("").unwrap().is_empty());
        assert!(parse_ids("1,x").is_err());
    }

    #[test]
    fn metadata_passes_through() {
        let raw = r#"[{"id":5,"rank":"大吉","lines":[{"orig":"a","ja":"b","en":"c","note":1}]}]"#;
        let recs: Vec<PoemRecord> = serde_json::from_str(raw).unwrap();
        assert_eq!(recs[0].extra.get("rank").and_then(|v| v.as_str()), Some("大吉"));
        let back = to_pretty_json(&recs).unwrap();
        assert!(back.contains("\"rank\": \"大吉\""));
        assert!(back.contains("\"note\": 1"));
    }

    #[test]
    fn extra_keys_keep_their_order() {
        let raw = r#"[{"id":5,"rank":"大吉","category":"願望","lines":[],"alpha":0}]"#;
        let recs: Vec<PoemRecord> = serde_json::from_str(raw).unwrap();
        let back = to_pretty_json(&recs).unwrap();
        let pos = |k: &str| back.find(&format!("\"{k}\"")).unwrap();
        assert!(pos("rank") < pos("category"));
        assert!(pos("category") < pos("alpha"));
    }

    #[test]
    fn missing_orig_and_null_text_still_load() {
        let raw = r#"[{"id":2,"lines":[{"ja":"x","en":"y"},{"orig":"句","ja":null,"en":null}]}]"#;
        let recs: Vec<PoemRecord> = serde_json::from_str(raw).unwrap();
        assert_eq!(recs[0].lines[0].orig, "");
        assert_eq!(recs[0].lines[1].ja, "");
        assert_eq!(recs[0].lines[1].en, "");
        assert!(!recs[0].is_well_formed());
    }

    #[test]
    fn backup_suffix_is_appended() {
        let p = backup_path_for(Path::new("dist/omikuji.json"), 1700000000);
        assert_eq!(p, PathBuf::from("dist/omikuji.json.1700000000.bak"));
    }
}
