use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;

pub const DEFAULT_CONFIG_FILENAME: &str = "omikuji-gate.toml";
pub const CONFIG_ENV_VAR: &str = "OMIKUJI_GATE_CONFIG";

#[derive(Clone, Debug, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub service: ServiceSection,
    #[serde(default)]
    pub models: ModelsSection,
    #[serde(default)]
    pub pipeline: PipelineSection,
    #[serde(default)]
    pub style: StyleSection,
    #[serde(default)]
    pub glossary: GlossarySection,
    #[serde(default)]
    pub prompts: PromptsSection,
}

/// OpenAI-compatible chat completion endpoint.
#[derive(Clone, Debug, Deserialize, Default)]
pub struct ServiceSection {
    #[serde(default)]
    pub base_url: Option<String>,
    /// Name of the environment variable holding the bearer token.
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct ModelsSection {
    #[serde(default)]
    pub base: Option<String>,
    /// Stronger tier used for force rewrites.
    #[serde(default)]
    pub hard: Option<String>,
    /// Scoring tier for refine; also the escalation tier on the last improve pass.
    #[serde(default)]
    pub judge: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct PipelineSection {
    #[serde(default)]
    pub batch: Option<usize>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub retry_backoff_ms: Option<u64>,
    #[serde(default)]
    pub batch_delay_ms: Option<u64>,

    #[serde(default)]
    pub trace_dir: Option<String>,
    #[serde(default)]
    pub trace_prompts: Option<bool>,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct StyleSection {
    #[serde(default)]
    pub ja_max: Option<usize>,
    #[serde(default)]
    pub en_max: Option<usize>,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct GlossarySection {
    /// Replaces the generated glossary hint sent to the judge and fixer.
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub fixes: Vec<GlossaryFixEntry>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct GlossaryFixEntry {
    pub pattern: String,
    pub replacement: String,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct PromptsSection {
    #[serde(default)]
    pub translate_system: Option<String>,
    #[serde(default)]
    pub translate_user: Option<String>,
    #[serde(default)]
    pub judge_system: Option<String>,
    #[serde(default)]
    pub improve_system: Option<String>,
}

pub fn find_file_upwards(start_dir: &Path, filename: &str, max_levels: usize) -> Option<PathBuf> {
    let mut dir = start_dir;
    for _ in 0..=max_levels {
        let candidate = dir.join(filename);
        if candidate.exists() {
            return Some(candidate);
        }
        dir = dir.parent()?;
    }
    None
}

pub fn find_default_config(workdir: &Path, filename: &str) -> Option<PathBuf> {
    if let Ok(cwd) = std::env::current_dir() {
        if let Some(p) = find_file_upwards(&cwd, filename, 8) {
            return Some(p);
        }
    }
    find_file_upwards(workdir, filename, 8)
}

/// `--config` wins, then the environment variable, then an upward search.
pub fn locate_config(explicit: Option<&Path>, workdir: &Path) -> Option<PathBuf> {
    explicit
        .map(Path::to_path_buf)
        .or_else(|| std::env::var(CONFIG_ENV_VAR).ok().map(PathBuf::from))
        .or_else(|| find_default_config(workdir, DEFAULT_CONFIG_FILENAME))
}

pub fn load_config(path: &Path) -> anyhow::Result<AppConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("read config: {}", path.display()))?;
    let cfg: AppConfig = toml::from_str(&text).context("parse config toml")?;
    Ok(cfg)
}
