use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context};

use crate::config::PromptsSection;

pub const DEFAULT_PROMPTS_DIR: &str = "prompts";

pub const DEFAULT_TRANSLATE_SYSTEM: &str = "translate_system.txt";
pub const DEFAULT_TRANSLATE_USER: &str = "translate_user.txt";
pub const DEFAULT_JUDGE_SYSTEM: &str = "judge_system.txt";
pub const DEFAULT_IMPROVE_SYSTEM: &str = "improve_system.txt";

/// Prompt texts with `{{name}}` placeholders, built-in unless a file override is configured.
#[derive(Clone, Debug)]
pub struct PromptCatalog {
    pub translate_system: String,
    pub translate_user: String,
    pub judge_system: String,
    pub improve_system: String,
}

impl Default for PromptCatalog {
    fn default() -> Self {
        Self {
            translate_system: DEFAULT_TRANSLATE_SYSTEM_TEXT.to_string(),
            translate_user: DEFAULT_TRANSLATE_USER_TEXT.to_string(),
            judge_system: DEFAULT_JUDGE_SYSTEM_TEXT.to_string(),
            improve_system: DEFAULT_IMPROVE_SYSTEM_TEXT.to_string(),
        }
    }
}

impl PromptCatalog {
    /// Relative override paths resolve against `config_dir`.
    pub fn load(config_dir: &Path, p: &PromptsSection) -> anyhow::Result<Self> {
        let d = Self::default();
        Ok(Self {
            translate_system: read_override(config_dir, "translate_system", p.translate_system.as_deref())?
                .unwrap_or(d.translate_system),
            translate_user: read_override(config_dir, "translate_user", p.translate_user.as_deref())?
                .unwrap_or(d.translate_user),
            judge_system: read_override(config_dir, "judge_system", p.judge_system.as_deref())?
                .unwrap_or(d.judge_system),
            improve_system: read_override(config_dir, "improve_system", p.improve_system.as_deref())?
                .unwrap_or(d.improve_system),
        })
    }
}

fn read_override(config_dir: &Path, key: &str, path: Option<&str>) -> anyhow::Result<Option<String>> {
    let Some(raw) = path.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(None);
    };
    let mut p = PathBuf::from(raw);
    if p.is_relative() {
        p = config_dir.join(&p);
    }
    if !p.exists() {
        return Err(anyhow!(
            "prompt file not found for {key}: {} (run: omikuji-gate init-config)",
            p.display()
        ));
    }
    let text = std::fs::read_to_string(&p).with_context(|| format!("read prompt: {}", p.display()))?;
    Ok(Some(text))
}

pub fn render_template(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (k, v) in vars {
        let pat = format!("{{{{{k}}}}}");
        out = out.replace(&pat, v);
    }
    out
}

pub fn default_prompt_files() -> Vec<(&'static str, &'static str)> {
    vec![
        (DEFAULT_TRANSLATE_SYSTEM, DEFAULT_TRANSLATE_SYSTEM_TEXT),
        (DEFAULT_TRANSLATE_USER, DEFAULT_TRANSLATE_USER_TEXT),
        (DEFAULT_JUDGE_SYSTEM, DEFAULT_JUDGE_SYSTEM_TEXT),
        (DEFAULT_IMPROVE_SYSTEM, DEFAULT_IMPROVE_SYSTEM_TEXT),
    ]
}

pub const DEFAULT_TRANSLATE_SYSTEM_TEXT: &str = "You translate Classical Chinese five-character quatrains faithfully. \
Read each poem as a whole, then output per-line JA/EN. \
No added subjects, no invented proper nouns, no explanations. \
Return ONLY JSON. \
Each EN line MUST contain NO punctuation (no comma/period/question/exclamation/ellipsis/em-dash/colon/semicolon). \
Hyphen is allowed (e.g., cloud-ladder). Keep each EN line <= {{en_hint}} characters.";

pub const DEFAULT_TRANSLATE_USER_TEXT: &str = r#"Translate faithfully from Classical Chinese five-character quatrains into Japanese and English.
- Read each 4-line poem as a whole (imagery + causality), then output per-line translations.
- DO NOT add subjects (I/you/we), invented proper nouns, or explanations.
- Keep classical imagery. Be concise.
- Return ONLY JSON as specified below.
- Each EN line MUST contain NO punctuation (no comma/period/question/exclamation/ellipsis/em-dash/colon/semicolon). Hyphen is allowed (e.g., cloud-ladder). Keep each EN line <= {{en_hint}} characters.

OUTPUT_SCHEMA_EXAMPLE:
{"results":[{"id":123,"lines":[
  {"orig":"AAAAA","ja":"…","en":"…"},
  {"orig":"BBBBB","ja":"…","en":"…"},
  {"orig":"CCCCC","ja":"…","en":"…"},
  {"orig":"DDDDD","ja":"…","en":"…"}
]}]}

INPUT_TASKS:
{{tasks_json}}"#;

pub const DEFAULT_JUDGE_SYSTEM_TEXT: &str = "You are a strict reviewer for translations of Classical Chinese five-character quatrains (omikuji). \
Score 0-100 with this rubric: fidelity(0-40), JA naturalness(0-15), EN poetic naturalness(0-20), \
imagery preservation(0-10), style compliance(0-10), glossary consistency(0-5). \
Style rules: EN has no punctuation (, . ? ! … — ; :), no personal pronouns (I/you/we), EN line<={{en_max}} chars; \
JA concise; preserve imagery; follow glossary hints if relevant. \
Return ONLY JSON: {\"score\":int, \"subscores\":{\"fidelity\":int,...}, \
\"pass\":bool, \"issues\":[{\"line\":1..4, \"ja\":\"...\", \"en\":\"...\", \"hint\":\"...\"}], \
\"summary\":\"...\" } \
Threshold is {{target}}.";

pub const DEFAULT_IMPROVE_SYSTEM_TEXT: &str = "You are a careful fixer. Improve the 4 lines faithfully based on the judge issues. \
Do not add explanations. Keep classical imagery. EN: no punctuation (, . ? ! … — ; :), \
no personal pronouns, per-line <={{en_max}} chars. JA concise. \
Output ONLY JSON: {\"lines\":[{\"ja\":\"...\",\"en\":\"...\"}×4]}";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_all_occurrences() {
        let out = render_template("{{a}}-{{b}}-{{a}}", &[("a", "1"), ("b", "2")]);
        assert_eq!(out, "1-2-1");
    }

    #[test]
    fn override_files_resolve_against_config_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("judge.txt"), "custom judge {{target}}").unwrap();
        let section = PromptsSection {
            judge_system: Some("judge.txt".into()),
            ..PromptsSection::default()
        };
        let cat = PromptCatalog::load(dir.path(), &section).unwrap();
        assert_eq!(cat.judge_system, "custom judge {{target}}");
        assert_eq!(cat.translate_user, DEFAULT_TRANSLATE_USER_TEXT);

        let missing = PromptsSection {
            improve_system: Some("nope.txt".into()),
            ..PromptsSection::default()
        };
        assert!(PromptCatalog::load(dir.path(), &missing).is_err());
    }
}
