//! Style rubric for translated quatrain lines.
//!
//! English lines carry no punctuation except hyphens, no first/second-person pronouns and stay
//! within `en_max` characters; Japanese lines stay within `ja_max`. Lengths count Unicode scalar
//! values, not bytes.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::corpus::{is_placeholder_en, LineRecord, PoemRecord, LINES_PER_POEM};
use crate::terminology::Glossary;
use crate::textutil::{char_len, truncate_at_word};

pub const JA_MAX: usize = 28;
pub const EN_MAX: usize = 48;

static PRONOUN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:I|me|my|mine|we|us|our|ours|you|your|yours)\b").expect("pronoun regex")
});
static PRONOUN_STRIP_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:I|me|my|mine|we|us|our|ours|you|your|yours)\b\s*")
        .expect("pronoun strip regex")
});
// , ? ! … — ; : .
static PUNCT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[,?!\x{2026}\x{2014};:.]").expect("punct regex"));
static WS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("ws regex"));

/// Low-information words dropped, in this order, while a line is over budget.
pub const FILLER_WORDS: [&str; 6] = ["that", "the", "and", "then", "so", "will"];

static FILLER_RES: Lazy<Vec<Regex>> = Lazy::new(|| {
    FILLER_WORDS
        .iter()
        .map(|w| Regex::new(&format!(r"(?i)\b{w}\b")).expect("filler regex"))
        .collect()
});

const SANITIZE_MAX_ROUNDS: usize = 6;

#[must_use]
pub fn has_banned_pronoun(text: &str) -> bool {
    PRONOUN_RE.is_match(text)
}

#[must_use]
pub fn has_banned_punct(text: &str) -> bool {
    PUNCT_RE.is_match(text)
}

fn collapse_ws(text: &str) -> String {
    WS_RE.replace_all(text, " ").trim().to_string()
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ValidationReport {
    pub ok: bool,
    pub errors: Vec<String>,
}

impl ValidationReport {
    fn from_errors(errors: Vec<String>) -> Self {
        Self {
            ok: errors.is_empty(),
            errors,
        }
    }
}

/// Outcome of the deterministic lint pass used before judging.
#[derive(Clone, Debug, Default)]
pub struct LintReport {
    /// Issues seen before sanitizing.
    pub found: Vec<String>,
    /// Issues still present after sanitizing.
    pub remaining: Vec<String>,
    /// Glossary terms that survived sanitizing.
    pub warnings: Vec<String>,
}

impl LintReport {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.remaining.is_empty()
    }
}

/// Punctuation/pronoun profile of a set of English lines.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ToneProfile {
    pub has_punct: bool,
    pub has_pronoun: bool,
}

impl ToneProfile {
    pub fn of<'a>(lines: impl IntoIterator<Item = &'a str>) -> Self {
        let mut p = Self::default();
        for en in lines {
            p.has_punct |= has_banned_punct(en);
            p.has_pronoun |= has_banned_pronoun(en);
        }
        p
    }
}

#[derive(Clone, Debug)]
pub struct StyleRules {
    pub ja_max: usize,
    pub en_max: usize,
    glossary: Glossary,
}

impl Default for StyleRules {
    fn default() -> Self {
        Self::new(JA_MAX, EN_MAX, Glossary::default())
    }
}

impl StyleRules {
    #[must_use]
    pub fn new(ja_max: usize, en_max: usize, glossary: Glossary) -> Self {
        Self {
            ja_max: ja_max.max(1),
            en_max: en_max.max(1),
            glossary,
        }
    }

    #[must_use]
    pub fn glossary(&self) -> &Glossary {
        &self.glossary
    }

    /// Light normalization applied to freshly generated lines before gating:
    /// punctuation stripped, whitespace collapsed, trimmed to budget.
    /// Pronouns are left in place so the gate can reject them.
    #[must_use]
    pub fn normalize_en(&self, text: &str) -> String {
        if text.is_empty() {
            return String::new();
        }
        let s = collapse_ws(&PUNCT_RE.replace_all(text, ""));
        self.fit_budget(s)
    }

    /// Full deterministic cleanup: punctuation, whitespace, pronouns, glossary, length.
    /// Idempotent: `sanitize_en(sanitize_en(x)) == sanitize_en(x)`.
    #[must_use]
    pub fn sanitize_en(&self, text: &str) -> String {
        let mut cur = text.to_string();
        for _ in 0..SANITIZE_MAX_ROUNDS {
            let next = self.sanitize_round(&cur);
            if next == cur {
                break;
            }
            cur = next;
        }
        cur
    }

    fn sanitize_round(&self, text: &str) -> String {
        if text.is_empty() {
            return String::new();
        }
        let mut s = collapse_ws(&PUNCT_RE.replace_all(text, ""));
        if has_banned_pronoun(&s) {
            s = collapse_ws(&PRONOUN_STRIP_RE.replace_all(&s, ""));
        }
        s = self.glossary.apply_fixes(&s);
        self.fit_budget(s)
    }

    fn fit_budget(&self, mut s: String) -> String {
        if char_len(&s) > self.en_max {
            for re in FILLER_RES.iter() {
                let shorter = collapse_ws(&re.replace_all(&s, ""));
                if char_len(&shorter) < char_len(&s) {
                    s = shorter;
                }
                if char_len(&s) <= self.en_max {
                    break;
                }
            }
        }
        truncate_at_word(&s, self.en_max)
    }

    /// Check a candidate quatrain against the record it is meant for.
    #[must_use]
    pub fn validate(&self, record: &PoemRecord, candidate: &[LineRecord]) -> ValidationReport {
        if candidate.len() != LINES_PER_POEM {
            return ValidationReport::from_errors(vec![format!(
                "shape: lines != {LINES_PER_POEM} (got {})",
                candidate.len()
            )]);
        }
        let mut errors: Vec<String> = Vec::new();
        for (i, x) in candidate.iter().enumerate() {
            if x.ja.trim().is_empty()
                || x.en.trim().is_empty()
                || x.orig.trim().is_empty()
                || x.has_placeholder()
            {
                errors.push(format!("line{}: empty field", i + 1));
            }
        }
        for (i, x) in candidate.iter().enumerate() {
            let expected = record.lines.get(i).map(|l| l.orig.as_str());
            if expected != Some(x.orig.as_str()) {
                errors.push(format!("line{}: orig mismatch", i + 1));
            }
        }
        for (i, x) in candidate.iter().enumerate() {
            let n = i + 1;
            if has_banned_pronoun(&x.en) {
                errors.push(format!("line{n}: banned pronoun in EN"));
            }
            if has_banned_punct(&x.en) {
                errors.push(format!("line{n}: banned punctuation in EN"));
            }
            let en_len = char_len(&x.en);
            if en_len > self.en_max {
                errors.push(format!("line{n}: EN too long ({en_len})"));
            }
            let ja_len = char_len(&x.ja);
            if ja_len > self.ja_max {
                errors.push(format!("line{n}: JA too long ({ja_len})"));
            }
            for fix in self.glossary.residual_terms(&x.en) {
                errors.push(format!(
                    "line{n}: use '{}' instead of '{}' (glossary)",
                    fix.replacement, fix.wrong
                ));
            }
        }
        ValidationReport::from_errors(errors)
    }

    /// Sanitize `en` in place and report what was found before and after.
    pub fn lint_lines(&self, lines: &mut [LineRecord]) -> LintReport {
        let mut report = LintReport {
            found: self.surface_issues(lines),
            ..LintReport::default()
        };
        for x in lines.iter_mut() {
            x.en = self.sanitize_en(&x.en);
        }
        report.remaining = self.surface_issues(lines);
        for (i, x) in lines.iter().enumerate() {
            for fix in self.glossary.residual_terms(&x.en) {
                report
                    .warnings
                    .push(format!("line{}: glossary term '{}' remains", i + 1, fix.wrong));
            }
        }
        report
    }

    fn surface_issues(&self, lines: &[LineRecord]) -> Vec<String> {
        let mut errs = Vec::new();
        for (i, x) in lines.iter().enumerate() {
            let n = i + 1;
            let (ja, en) = (x.ja.trim(), x.en.trim());
            if ja.is_empty() || en.is_empty() {
                errs.push(format!("line{n}: empty"));
            }
            let ja_len = char_len(ja);
            if ja_len > self.ja_max {
                errs.push(format!("line{n}: JA too long ({ja_len})"));
            }
            if has_banned_pronoun(en) {
                errs.push(format!("line{n}: pronoun in EN"));
            }
            if has_banned_punct(en) {
                errs.push(format!("line{n}: punctuation in EN"));
            }
            let en_len = char_len(en);
            if en_len > self.en_max {
                errs.push(format!("line{n}: EN too long ({en_len})"));
            }
        }
        errs
    }

    /// True when the stored, already-translated English was free of punctuation (or pronouns)
    /// and the candidate would introduce them.
    #[must_use]
    pub fn tone_breaks(&self, record: &PoemRecord, candidate: &[LineRecord]) -> bool {
        let existing: Vec<&str> = record
            .lines
            .iter()
            .map(|l| l.en.as_str())
            .filter(|en| !is_placeholder_en(en))
            .collect();
        if existing.is_empty() {
            return false;
        }
        let before = ToneProfile::of(existing);
        let after = ToneProfile::of(candidate.iter().map(|l| l.en.as_str()));
        (!before.has_punct && after.has_punct) || (!before.has_pronoun && after.has_pronoun)
    }
}
