use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;

use crate::config::{load_config, locate_config, AppConfig, DEFAULT_CONFIG_FILENAME};
use crate::models::http::{ServiceSettings, DEFAULT_API_KEY_ENV, DEFAULT_BASE_URL, DEFAULT_TIMEOUT_SECS};
use crate::pipeline::prompts::{default_prompt_files, PromptCatalog, DEFAULT_PROMPTS_DIR};
use crate::retry::RetryPolicy;
use crate::style::{StyleRules, EN_MAX, JA_MAX};
use crate::terminology::Glossary;

pub const DEFAULT_BASE_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_HARD_MODEL: &str = "gpt-4.1";
pub const DEFAULT_JUDGE_MODEL: &str = "gpt-4.1";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModelTiers {
    pub base: String,
    pub hard: String,
    pub judge: String,
}

impl Default for ModelTiers {
    fn default() -> Self {
        Self {
            base: DEFAULT_BASE_MODEL.to_string(),
            hard: DEFAULT_HARD_MODEL.to_string(),
            judge: DEFAULT_JUDGE_MODEL.to_string(),
        }
    }
}

/// Values given on the command line; `None` falls back to the config file, then defaults.
#[derive(Clone, Debug, Default)]
pub struct CliOverrides {
    pub model: Option<String>,
    pub hard_model: Option<String>,
    pub judge_model: Option<String>,
    pub batch: Option<usize>,
    pub temperature: Option<f32>,
    pub max_retries: Option<u32>,
}

/// Everything a pipeline run needs besides the corpus and the chat backend.
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub config_path: Option<PathBuf>,
    pub service: ServiceSettings,
    pub models: ModelTiers,

    pub batch: usize,
    pub temperature: f32,
    pub retry: RetryPolicy,
    pub batch_delay: Duration,

    pub trace_dir: PathBuf,
    pub trace_prompts: bool,

    pub style: StyleRules,
    pub prompts: PromptCatalog,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            config_path: None,
            service: ServiceSettings::default(),
            models: ModelTiers::default(),
            batch: 20,
            temperature: 0.1,
            retry: RetryPolicy::default(),
            batch_delay: Duration::from_millis(100),
            trace_dir: PathBuf::from("_trace"),
            trace_prompts: false,
            style: StyleRules::default(),
            prompts: PromptCatalog::default(),
        }
    }
}

impl PipelineConfig {
    pub fn from_paths_and_args(
        input: &Path,
        output: &Path,
        config_path: Option<&Path>,
        cli: &CliOverrides,
    ) -> anyhow::Result<Self> {
        let workdir = input
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let workdir = workdir.canonicalize().unwrap_or(workdir);

        let cfg_file = locate_config(config_path, &workdir);
        let mut file_cfg = AppConfig::default();
        if let Some(p) = cfg_file.as_ref() {
            if p.exists() {
                file_cfg = load_config(p)?;
            } else if config_path.is_some() {
                anyhow::bail!("config not found: {}", p.display());
            }
        }
        let config_dir = cfg_file
            .as_deref()
            .and_then(Path::parent)
            .map(Path::to_path_buf)
            .unwrap_or_else(|| workdir.clone());

        let d = Self::default();

        let service = ServiceSettings {
            base_url: file_cfg
                .service
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            api_key_env: file_cfg
                .service
                .api_key_env
                .clone()
                .unwrap_or_else(|| DEFAULT_API_KEY_ENV.to_string()),
            timeout: Duration::from_secs(
                file_cfg.service.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS).max(1),
            ),
        };

        let pick = |cli: &Option<String>, file: &Option<String>, default: &str| {
            cli.clone()
                .or_else(|| file.clone())
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| default.to_string())
        };
        let models = ModelTiers {
            base: pick(&cli.model, &file_cfg.models.base, DEFAULT_BASE_MODEL),
            hard: pick(&cli.hard_model, &file_cfg.models.hard, DEFAULT_HARD_MODEL),
            judge: pick(&cli.judge_model, &file_cfg.models.judge, DEFAULT_JUDGE_MODEL),
        };

        let batch = cli.batch.or(file_cfg.pipeline.batch).unwrap_or(d.batch).max(1);
        let temperature = cli
            .temperature
            .or(file_cfg.pipeline.temperature)
            .unwrap_or(d.temperature)
            .clamp(0.0, 2.0);
        let max_retries = cli
            .max_retries
            .or(file_cfg.pipeline.max_retries)
            .unwrap_or(d.retry.max_attempts);
        let backoff = file_cfg
            .pipeline
            .retry_backoff_ms
            .map(Duration::from_millis)
            .unwrap_or(d.retry.backoff);
        let batch_delay = file_cfg
            .pipeline
            .batch_delay_ms
            .map(Duration::from_millis)
            .unwrap_or(d.batch_delay);

        let output_dir = output
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| workdir.clone());
        let trace_dir = file_cfg
            .pipeline
            .trace_dir
            .clone()
            .unwrap_or_else(|| "_trace".to_string());
        let trace_dir = if Path::new(&trace_dir).is_absolute() {
            PathBuf::from(trace_dir)
        } else {
            output_dir.join(trace_dir)
        };
        let trace_prompts = file_cfg.pipeline.trace_prompts.unwrap_or(false);

        let glossary = Glossary::default()
            .with_extra_fixes(
                file_cfg
                    .glossary
                    .fixes
                    .iter()
                    .map(|f| (f.pattern.as_str(), f.replacement.as_str())),
            )
            .context("load glossary fixes")?
            .with_note(file_cfg.glossary.note.clone());
        let style = StyleRules::new(
            file_cfg.style.ja_max.unwrap_or(JA_MAX),
            file_cfg.style.en_max.unwrap_or(EN_MAX),
            glossary,
        );

        let prompts = PromptCatalog::load(&config_dir, &file_cfg.prompts).context("load prompts")?;

        Ok(Self {
            config_path: cfg_file.filter(|p| p.exists()),
            service,
            models,
            batch,
            temperature,
            retry: RetryPolicy::new(max_retries, backoff),
            batch_delay,
            trace_dir,
            trace_prompts,
            style,
            prompts,
        })
    }
}

/// Options specific to the gate run.
#[derive(Clone, Debug)]
pub struct GateOptions {
    pub ids: BTreeSet<u32>,
    pub auto_force: bool,
    pub auto_complete: bool,
    pub max_passes: usize,
    pub stop_if_unchanged: bool,
}

impl Default for GateOptions {
    fn default() -> Self {
        Self {
            ids: BTreeSet::new(),
            auto_force: true,
            auto_complete: false,
            max_passes: 4,
            stop_if_unchanged: false,
        }
    }
}

#[derive(Clone, Debug)]
pub struct RefineOptions {
    pub ids: BTreeSet<u32>,
    pub passes: usize,
    pub target: u32,
}

impl Default for RefineOptions {
    fn default() -> Self {
        Self {
            ids: BTreeSet::new(),
            passes: 3,
            target: 90,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct FillOptions {
    pub ids: BTreeSet<u32>,
    pub force: bool,
}

pub fn init_default_config(dir: &Path, force: bool) -> anyhow::Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("create config dir: {}", dir.display()))?;
    let cfg_path = dir.join(DEFAULT_CONFIG_FILENAME);

    let prompts_dir = dir.join(DEFAULT_PROMPTS_DIR);
    std::fs::create_dir_all(&prompts_dir)
        .with_context(|| format!("create prompts dir: {}", prompts_dir.display()))?;

    for (fname, body) in default_prompt_files() {
        let p = prompts_dir.join(fname);
        if p.exists() && !force {
            continue;
        }
        std::fs::write(&p, body).with_context(|| format!("write prompt: {}", p.display()))?;
    }

    if cfg_path.exists() && !force {
        return Ok(cfg_path);
    }
    std::fs::write(&cfg_path, DEFAULT_CONFIG_TOML)
        .with_context(|| format!("write config: {}", cfg_path.display()))?;
    Ok(cfg_path)
}

const DEFAULT_CONFIG_TOML: &str = r#"[service]
base_url = "https://api.openai.com/v1"
# Bearer token is read from this environment variable.
api_key_env = "OPENAI_API_KEY"
timeout_secs = 60

[models]
base = "gpt-4o-mini"
# Force rewrites fall back to this tier.
hard = "gpt-4.1"
# Refine scores with this tier and escalates to it on the last pass.
judge = "gpt-4.1"

[pipeline]
batch = 20
temperature = 0.1
max_retries = 3
retry_backoff_ms = 400
batch_delay_ms = 100

trace_dir = "_trace"
trace_prompts = false

[style]
ja_max = 28
en_max = 48

[glossary]
# note = "浮圖=pagoda; 青霄=azure sky."

# [[glossary.fixes]]
# pattern = "jade rabbit"
# replacement = "moon"

[prompts]
# Paths are relative to this file. Remove an entry to use the built-in text.
translate_system = "prompts/translate_system.txt"
translate_user = "prompts/translate_user.txt"
judge_system = "prompts/judge_system.txt"
improve_system = "prompts/improve_system.txt"
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_overrides_file_values() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = dir.path().join("custom.toml");
        std::fs::write(
            &cfg,
            "[models]\nbase = \"file-model\"\nhard = \"file-hard\"\n[pipeline]\nbatch = 7\nretry_backoff_ms = 0\n[style]\nen_max = 40\n",
        )
        .unwrap();
        let input = dir.path().join("omikuji.json");
        let cli = CliOverrides {
            model: Some("cli-model".into()),
            ..CliOverrides::default()
        };
        let pc = PipelineConfig::from_paths_and_args(&input, &input, Some(&cfg), &cli).unwrap();
        assert_eq!(pc.models.base, "cli-model");
        assert_eq!(pc.models.hard, "file-hard");
        assert_eq!(pc.models.judge, DEFAULT_JUDGE_MODEL);
        assert_eq!(pc.batch, 7);
        assert_eq!(pc.retry.backoff, Duration::ZERO);
        assert_eq!(pc.retry.max_attempts, 3);
        assert_eq!(pc.style.en_max, 40);
        assert_eq!(pc.config_path.as_deref(), Some(cfg.as_path()));
    }

    #[test]
    fn explicit_missing_config_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("omikuji.json");
        let missing = dir.path().join("nope.toml");
        assert!(PipelineConfig::from_paths_and_args(&input, &input, Some(&missing), &CliOverrides::default()).is_err());
    }

    #[test]
    fn init_writes_config_that_parses() {
        let dir = tempfile::tempdir().unwrap();
        let p = init_default_config(dir.path(), false).unwrap();
        let cfg = load_config(&p).unwrap();
        assert_eq!(cfg.models.base.as_deref(), Some(DEFAULT_BASE_MODEL));
        assert_eq!(cfg.style.ja_max, Some(JA_MAX));
        assert!(dir.path().join("prompts/judge_system.txt").exists());

        std::fs::write(&p, "# edited\n").unwrap();
        init_default_config(dir.path(), false).unwrap();
        assert_eq!(std::fs::read_to_string(&p).unwrap(), "# edited\n");
        init_default_config(dir.path(), true).unwrap();
        assert!(std::fs::read_to_string(&p).unwrap().contains("[service]"));
    }

    #[test]
    fn generated_prompt_files_are_the_ones_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = init_default_config(dir.path(), false).unwrap();
        std::fs::write(dir.path().join("prompts/judge_system.txt"), "edited judge {{target}}").unwrap();

        let input = dir.path().join("omikuji.json");
        let pc = PipelineConfig::from_paths_and_args(&input, &input, Some(&cfg), &CliOverrides::default()).unwrap();
        assert_eq!(pc.prompts.judge_system, "edited judge {{target}}");
        assert_eq!(pc.prompts.translate_user, PromptCatalog::default().translate_user);
    }
}
