use anyhow::Context;
use once_cell::sync::Lazy;
use regex::Regex;

#[derive(Clone, Debug)]
pub struct GlossaryTerm {
    pub src: String,
    pub tgt: String,
    pub note: Option<String>,
}

/// A known mistranslation and its deterministic correction.
#[derive(Clone, Debug)]
pub struct GlossaryFix {
    pub wrong: String,
    pub replacement: String,
    pattern: Regex,
}

impl GlossaryFix {
    pub fn new(wrong: &str, replacement: &str) -> anyhow::Result<Self> {
        let pattern = phrase_regex(wrong).with_context(|| format!("glossary phrase: {wrong}"))?;
        Ok(Self {
            wrong: wrong.trim().to_string(),
            replacement: replacement.trim().to_string(),
            pattern,
        })
    }

    #[must_use]
    pub fn is_match(&self, text: &str) -> bool {
        self.pattern.is_match(text)
    }

    #[must_use]
    pub fn apply(&self, text: &str) -> String {
        self.pattern
            .replace_all(text, regex::NoExpand(&self.replacement))
            .into_owned()
    }
}

/// Case-insensitive whole-phrase matcher; inner whitespace may vary.
fn phrase_regex(phrase: &str) -> Result<Regex, regex::Error> {
    let words: Vec<String> = phrase.split_whitespace().map(regex::escape).collect();
    Regex::new(&format!(r"(?i)\b{}\b", words.join(r"\s+")))
}

const BUILTIN_FIXES: [(&str, &str); 4] = [
    ("Lord Yin", "hidden grace"),
    ("stupa", "pagoda"),
    ("family path", "family fortunes"),
    ("one stick of incense", "a single prayer"),
];

const BUILTIN_TERMS: [(&str, &str, Option<&str>); 8] = [
    ("陰公/隂公", "hidden grace/hidden aid", None),
    ("浮圖", "pagoda", None),
    ("青霄", "azure sky", None),
    ("雲梯", "cloud ladder", None),
    ("東君", "the Lord of Spring", None),
    ("祿馬", "fortune and steed", None),
    ("侯手印", "marquis seal", None),
    ("禾刀", "profit", Some("ideographic hint")),
];

static BUILTIN: Lazy<Glossary> = Lazy::new(|| {
    let fixes = BUILTIN_FIXES
        .iter()
        .map(|(w, r)| GlossaryFix::new(w, r).expect("builtin glossary fix"))
        .collect();
    let terms = BUILTIN_TERMS
        .iter()
        .map(|(s, t, n)| GlossaryTerm {
            src: s.to_string(),
            tgt: t.to_string(),
            note: n.map(|n| n.to_string()),
        })
        .collect();
    Glossary {
        fixes,
        terms,
        note_override: None,
    }
});

#[derive(Clone, Debug)]
pub struct Glossary {
    fixes: Vec<GlossaryFix>,
    terms: Vec<GlossaryTerm>,
    note_override: Option<String>,
}

impl Default for Glossary {
    fn default() -> Self {
        BUILTIN.clone()
    }
}

impl Glossary {
    /// Append user-configured fixes after the built-in table.
    pub fn with_extra_fixes<'a>(
        mut self,
        extra: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> anyhow::Result<Self> {
        for (wrong, replacement) in extra {
            if wrong.trim().is_empty() {
                continue;
            }
            self.fixes.push(GlossaryFix::new(wrong, replacement)?);
        }
        Ok(self)
    }

    #[must_use]
    pub fn with_note(mut self, note: Option<String>) -> Self {
        self.note_override = note.map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
        self
    }

    #[must_use]
    pub fn apply_fixes(&self, text: &str) -> String {
        let mut out = text.to_string();
        for fix in &self.fixes {
            if fix.is_match(&out) {
                out = fix.apply(&out);
            }
        }
        out
    }

    /// Wrong terms still present in `text`.
    #[must_use]
    pub fn residual_terms(&self, text: &str) -> Vec<&GlossaryFix> {
        self.fixes.iter().filter(|f| f.is_match(text)).collect()
    }

    /// One-line hint for judge/fixer prompts, e.g. `浮圖=pagoda; 禾刀=profit (ideographic hint).`
    #[must_use]
    pub fn render_note(&self) -> String {
        if let Some(n) = self.note_override.as_deref() {
            return n.to_string();
        }
        let mut parts: Vec<String> = Vec::with_capacity(self.terms.len());
        for t in &self.terms {
            match t.note.as_deref() {
                Some(note) if !note.trim().is_empty() => {
                    parts.push(format!("{}={} ({})", t.src, t.tgt, note.trim()))
                }
                _ => parts.push(format!("{}={}", t.src, t.tgt)),
            }
        }
        if parts.is_empty() {
            return String::new();
        }
        format!("{}.", parts.join("; "))
    }
}
