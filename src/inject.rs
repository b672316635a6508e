//! Line-translation injector for the plain-text bundles.
//!
//! Each numbered block of `ja.txt` / `en.txt` is rebuilt as its header line, then the four poem
//! lines from `core.json` each followed by its translation, then whatever the block carried after
//! the poem (explanations, labels). Lines with no translation are reported in
//! `line_translation_missing.json`.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::corpus::LINES_PER_POEM;
use crate::error::{GateError, GateResult};

pub const DEFAULT_DATA_DIR: &str = "src/data/omikuji";
pub const DEFAULT_TRANSLATIONS_DIR: &str = "scripts/omikuji";

const JA_IN: &str = "ja.txt";
const EN_IN: &str = "en.txt";
const CORE: &str = "core.json";
const JA_OUT: &str = "ja.with_trans.txt";
const EN_OUT: &str = "en.with_trans.txt";
const MISSING: &str = "line_translation_missing.json";
const TRANS_JA: &str = "translations_ja.json";
const TRANS_EN: &str = "translations_en.json";

/// Block header: `第十二　...` or `Twenty-Third: ...` at line start.
static HEADER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?m)^(?:第[一二三四五六七八九十百]+\x{3000}|(?:First|Second|Third|Fourth|Fifth|Sixth|Seventh|Eighth|Ninth|Tenth|Eleven|Twelve|Thirteen|Fourteen|Fifteen|Sixteen|Seventeen|Eighteen|Nineteen|(?:Twenty|Thirty|Forty|Fifty|Sixty|Seventy|Eighty|Ninety)(?:-(?:First|Second|Third|Fourth|Fifth|Sixth|Seventh|Eighth|Ninth))?):\s)",
    )
    .expect("header regex")
});

static SPACES_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\x{3000} ]").expect("spaces regex"));

static FIVE_CJK_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[\x{3400}-\x{9FFF}\x{F900}-\x{FAFF}]{5}$").expect("five cjk regex")
});

static LABEL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([^：:]+)\s*[:：]\s*(.*)$").expect("label regex"));

#[derive(Clone, Debug)]
pub struct InjectPaths {
    pub data_dir: PathBuf,
    pub translations_dir: PathBuf,
}

impl Default for InjectPaths {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            translations_dir: PathBuf::from(DEFAULT_TRANSLATIONS_DIR),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct MissingLines {
    pub ja: Vec<String>,
    pub en: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct InjectOutcome {
    pub ja_out: PathBuf,
    pub en_out: PathBuf,
    pub missing_path: PathBuf,
    pub missing: MissingLines,
}

#[derive(Debug, Deserialize)]
struct CoreEntry {
    id: Value,
    #[serde(default)]
    poem_kanji: Option<Vec<Value>>,
}

/// Drop ASCII and ideographic spaces.
#[must_use]
pub fn normalize_key(s: &str) -> String {
    SPACES_RE.replace_all(s, "").into_owned()
}

fn strip_bom(s: &str) -> String {
    s.replace('\u{feff}', "")
}

/// Split at every header line; text before the first header is kept as its own block.
/// Blank segments are dropped.
#[must_use]
pub fn split_blocks(text: &str) -> Vec<&str> {
    let mut starts: Vec<usize> = HEADER_RE.find_iter(text).map(|m| m.start()).collect();
    if starts.first() != Some(&0) {
        starts.insert(0, 0);
    }
    starts.push(text.len());
    starts
        .windows(2)
        .map(|w| &text[w[0]..w[1]])
        .filter(|b| !b.trim().is_empty())
        .collect()
}

/// What follows the poem inside `block`: skips the header, each matched poem line and the free
/// translation line right after it if there is one.
#[must_use]
pub fn tail_keep(block: &str, poems: &[String]) -> String {
    let lines: Vec<&str> = block.lines().collect();
    let mut i = 1;
    let mut m = 0;
    while i < lines.len() && m < LINES_PER_POEM {
        let Some(want) = poems.get(m) else {
            break;
        };
        let k = normalize_key(lines[i].trim());
        if !k.is_empty() && &k == want {
            i += 1;
            let next = lines.get(i).map_or("", |s| s.trim());
            let is_poem = FIVE_CJK_RE.is_match(&normalize_key(next));
            let is_label = LABEL_RE.is_match(next);
            if !next.is_empty() && !is_poem && !is_label {
                i += 1;
            }
            m += 1;
            continue;
        }
        i += 1;
    }
    lines.get(i..).map(|rest| rest.join("\n")).unwrap_or_default().trim().to_string()
}

/// Rebuild every block of `text`; block N (1-based) takes its poem from `core[N]`.
/// Returns the new text and the sorted poem lines that had no translation.
#[must_use]
pub fn inject_by_core(
    text: &str,
    translations: &HashMap<String, String>,
    core: &BTreeMap<u32, Vec<String>>,
) -> (String, Vec<String>) {
    let empty: Vec<String> = Vec::new();
    let mut out: Vec<String> = Vec::new();
    let mut missing: BTreeSet<String> = BTreeSet::new();
    for (idx, block) in split_blocks(text).into_iter().enumerate() {
        let bid = u32::try_from(idx + 1).unwrap_or(u32::MAX);
        let poems = core.get(&bid).unwrap_or(&empty);
        let header = block.lines().next().unwrap_or("");
        let tail = tail_keep(block, poems);

        let mut parts: Vec<String> = vec![header.to_string()];
        for p in poems {
            parts.push(p.clone());
            let t = translations.get(p).map_or("", |s| s.trim());
            if t.is_empty() {
                missing.insert(p.clone());
            }
            parts.push(t.to_string());
        }
        if !tail.is_empty() {
            parts.push(tail);
        }
        out.push(parts.join("\n"));
    }
    (out.join("\n") + "\n", missing.into_iter().collect())
}

fn read_text(path: &Path) -> GateResult<String> {
    Ok(strip_bom(&fs::read_to_string(path)?))
}

fn id_of(v: &Value) -> Option<u32> {
    match v {
        Value::Number(n) => n.as_u64().and_then(|x| u32::try_from(x).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// `id -> space-free poem lines` from `core.json`.
pub fn load_core(path: &Path) -> GateResult<BTreeMap<u32, Vec<String>>> {
    let raw = read_text(path)?;
    let entries: Vec<CoreEntry> =
        serde_json::from_str(&raw).map_err(|e| GateError::parse(path.display().to_string(), e))?;
    let mut out = BTreeMap::new();
    for e in entries {
        let Some(id) = id_of(&e.id) else {
            debug!(id = %e.id, "core entry without usable id");
            continue;
        };
        let poems = e
            .poem_kanji
            .unwrap_or_default()
            .iter()
            .map(|v| match v {
                Value::String(s) => normalize_key(s),
                other => normalize_key(&other.to_string()),
            })
            .collect();
        out.insert(id, poems);
    }
    Ok(out)
}

/// Translation map with normalized keys; non-string values count as missing.
pub fn load_translations(path: &Path) -> GateResult<HashMap<String, String>> {
    if !path.exists() {
        return Err(GateError::InputNotFound(path.to_path_buf()));
    }
    let raw = read_text(path)?;
    let map: BTreeMap<String, Value> =
        serde_json::from_str(&raw).map_err(|e| GateError::parse(path.display().to_string(), e))?;
    Ok(map
        .into_iter()
        .filter_map(|(k, v)| v.as_str().map(|s| (normalize_key(&k), s.to_string())))
        .collect())
}

pub fn run(paths: &InjectPaths) -> GateResult<InjectOutcome> {
    let ja_in = paths.data_dir.join(JA_IN);
    let en_in = paths.data_dir.join(EN_IN);
    let core_path = paths.data_dir.join(CORE);
    for p in [&ja_in, &en_in, &core_path] {
        if !p.exists() {
            return Err(GateError::RequiredFileMissing(p.clone()));
        }
    }

    let core = load_core(&core_path)?;
    let tja = load_translations(&paths.translations_dir.join(TRANS_JA))?;
    let ten = load_translations(&paths.translations_dir.join(TRANS_EN))?;

    let (ja_text, miss_ja) = inject_by_core(&read_text(&ja_in)?, &tja, &core);
    let (en_text, miss_en) = inject_by_core(&read_text(&en_in)?, &ten, &core);

    let ja_out = paths.data_dir.join(JA_OUT);
    let en_out = paths.data_dir.join(EN_OUT);
    let missing_path = paths.data_dir.join(MISSING);
    fs::write(&ja_out, strip_bom(&ja_text))?;
    fs::write(&en_out, strip_bom(&en_text))?;

    let missing = MissingLines {
        ja: miss_ja,
        en: miss_en,
    };
    let json = serde_json::to_string_pretty(&missing).map_err(|e| GateError::parse("missing report", e))?;
    fs::write(&missing_path, json)?;
    info!(
        ja_missing = missing.ja.len(),
        en_missing = missing.en.len(),
        "line translations injected"
    );

    Ok(InjectOutcome {
        ja_out,
        en_out,
        missing_path,
        missing,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn core_one() -> BTreeMap<u32, Vec<String>> {
        let mut m = BTreeMap::new();
        m.insert(
            1,
            ["七寶浮圖塔", "高峰頂上安", "眾人皆仰望", "莫作等閑看"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        );
        m
    }

    #[test]
    fn split_on_headers() {
        let text = "第一　大吉\na\n第二　凶\nb\n";
        let blocks = split_blocks(text);
        assert_eq!(blocks, vec!["第一　大吉\na\n", "第二　凶\nb\n"]);

        let en = "intro\nFirst: Great\nx\nTwenty-Third: Bad\ny";
        let blocks = split_blocks(en);
        assert_eq!(blocks.len(), 3);
        assert!(blocks[2].starts_with("Twenty-Third: "));
    }

    #[test]
    fn tail_skips_poem_and_old_translations() {
        let poems = core_one()[&1].clone();
        let block = "第一　大吉\n七寶 浮圖塔\nold translation\n高峰頂上安\n眾人皆仰望\n莫作等閑看\n願望：叶う\n病気：治る";
        assert_eq!(tail_keep(block, &poems), "願望：叶う\n病気：治る");
    }

    #[test]
    fn inject_rebuilds_block_and_reports_missing() {
        let core = core_one();
        let mut tr = HashMap::new();
        tr.insert("七寶浮圖塔".to_string(), "宝の塔".to_string());
        tr.insert("高峰頂上安".to_string(), "  峰の頂に ".to_string());
        let text = "第一　大吉\n七寶浮圖塔\n高峰頂上安\n眾人皆仰望\n莫作等閑看\n願望：叶う\n";
        let (out, missing) = inject_by_core(text, &tr, &core);
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[0], "第一　大吉");
        assert_eq!(lines[1], "七寶浮圖塔");
        assert_eq!(lines[2], "宝の塔");
        assert_eq!(lines[4], "峰の頂に");
        assert_eq!(lines.last(), Some(&"願望：叶う"));
        assert_eq!(missing, vec!["眾人皆仰望".to_string(), "莫作等閑看".to_string()]);
        assert!(out.ends_with('\n'));
    }

    #[test]
    fn missing_required_file_exits_two() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(JA_IN), "第一　大吉\n").unwrap();
        let err = run(&InjectPaths {
            data_dir: dir.path().to_path_buf(),
            translations_dir: dir.path().to_path_buf(),
        })
        .unwrap_err();
        assert!(matches!(err, GateError::RequiredFileMissing(_)));
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn full_run_writes_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let d = dir.path();
        fs::write(d.join(JA_IN), "\u{feff}第一　大吉\n七寶浮圖塔\n").unwrap();
        fs::write(d.join(EN_IN), "First: Great Luck\n").unwrap();
        fs::write(
            d.join(CORE),
            r#"[{"id":"1","poem_kanji":["七寶　浮圖塔","高峰頂上安","眾人皆仰望","莫作等閑看"]}]"#,
        )
        .unwrap();
        fs::write(d.join(TRANS_JA), r#"{"七寶 浮圖塔":"宝の塔"}"#).unwrap();
        fs::write(d.join(TRANS_EN), "{}").unwrap();

        let out = run(&InjectPaths {
            data_dir: d.to_path_buf(),
            translations_dir: d.to_path_buf(),
        })
        .unwrap();
        let ja = fs::read_to_string(&out.ja_out).unwrap();
        assert!(ja.starts_with("第一　大吉\n七寶浮圖塔\n宝の塔\n"));
        assert_eq!(out.missing.ja.len(), 3);
        assert_eq!(out.missing.en.len(), 4);
        let written: Value = serde_json::from_str(&fs::read_to_string(&out.missing_path).unwrap()).unwrap();
        assert_eq!(written["en"].as_array().map(Vec::len), Some(4));
    }
}
