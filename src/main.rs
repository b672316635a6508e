use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use omikuji_gate::corpus::{self, parse_ids, PoemRecord};
use omikuji_gate::inject::{self, InjectPaths, DEFAULT_DATA_DIR, DEFAULT_TRANSLATIONS_DIR};
use omikuji_gate::models::http::HttpChatBackend;
use omikuji_gate::pipeline::{
    init_default_config, CliOverrides, FillOptions, FillPipeline, GateOptions, GatePipeline,
    PipelineConfig, PipelineContext, RefineOptions, RefinePipeline, TraceWriter,
};
use omikuji_gate::progress::ConsoleProgress;
use omikuji_gate::GateError;

#[derive(Parser, Debug)]
#[command(name = "omikuji-gate")]
#[command(about = "Translate and grade the omikuji poem corpus with chat-completion models", long_about = None)]
struct Cli {
    /// Config file path (default: search for omikuji-gate.toml upwards, or OMIKUJI_GATE_CONFIG)
    #[arg(long, global = true, value_name = "TOML")]
    config: Option<PathBuf>,

    /// More diagnostics on stderr (-v info, -vv debug)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fill placeholder lines behind the style gate
    Gate(GateArgs),
    /// Judge translations and rewrite the ones scoring below target
    Refine(RefineArgs),
    /// One-shot batch translation of placeholder (or all, with --force) lines
    Fill(FillArgs),
    /// Inject line translations into the ja/en text bundles
    Inject(InjectArgs),
    /// Generate default config + prompt files, then exit
    InitConfig(InitConfigArgs),
}

#[derive(Args, Debug)]
struct ModelArgs {
    /// Base model for translation
    #[arg(long)]
    model: Option<String>,

    /// Batch size (records per request)
    #[arg(long)]
    batch: Option<usize>,

    /// Sampling temperature for the first attempt
    #[arg(long)]
    temperature: Option<f32>,

    /// Attempts per request before giving up
    #[arg(long)]
    max_retries: Option<u32>,

    /// Comma-separated ids to restrict the run to
    #[arg(long, value_name = "IDS")]
    ids: Option<String>,

    /// Run without writing the output file
    #[arg(long)]
    dry_run: bool,
}

#[derive(Args, Debug)]
struct GateArgs {
    /// Corpus JSON to read
    #[arg(long)]
    input: PathBuf,

    /// Corpus JSON to write
    #[arg(long)]
    output: PathBuf,

    /// Model for the last force attempt
    #[arg(long)]
    hard_model: Option<String>,

    /// Fail records instead of regenerating them when the gate rejects a candidate
    #[arg(long)]
    no_auto_force: bool,

    /// Repeat passes until no placeholders remain or no progress is made
    #[arg(long)]
    auto_complete: bool,

    /// Upper bound on passes with --auto-complete
    #[arg(long, default_value_t = 4)]
    max_passes: usize,

    /// Stop the auto-complete loop after a pass that commits nothing
    #[arg(long)]
    stop_if_unchanged: bool,

    #[command(flatten)]
    common: ModelArgs,
}

#[derive(Args, Debug)]
struct RefineArgs {
    #[arg(long)]
    input: PathBuf,

    #[arg(long)]
    output: PathBuf,

    /// Model for scoring and the escalated last rewrite
    #[arg(long)]
    judge_model: Option<String>,

    /// Rewrite passes per record
    #[arg(long, default_value_t = 3)]
    passes: usize,

    /// Score a record must reach (0..100)
    #[arg(long, default_value_t = 90)]
    target: u32,

    #[command(flatten)]
    common: ModelArgs,
}

#[derive(Args, Debug)]
struct FillArgs {
    #[arg(long)]
    input: PathBuf,

    /// Output corpus (default: overwrite input, after a backup)
    #[arg(long)]
    output: Option<PathBuf>,

    /// Overwrite every line of the selected records, not only placeholders
    #[arg(long)]
    force: bool,

    #[command(flatten)]
    common: ModelArgs,
}

#[derive(Args, Debug)]
struct InjectArgs {
    /// Directory holding ja.txt, en.txt and core.json
    #[arg(long, default_value = DEFAULT_DATA_DIR)]
    data_dir: PathBuf,

    /// Directory holding translations_ja.json and translations_en.json
    #[arg(long, default_value = DEFAULT_TRANSLATIONS_DIR)]
    translations_dir: PathBuf,
}

#[derive(Args, Debug)]
struct InitConfigArgs {
    /// Directory to write config/prompt files (default: current directory)
    #[arg(long, value_name = "DIR")]
    dir: Option<PathBuf>,

    /// Overwrite existing config/prompt files
    #[arg(long)]
    force: bool,
}

impl ModelArgs {
    fn overrides(&self) -> CliOverrides {
        CliOverrides {
            model: self.model.clone(),
            batch: self.batch,
            temperature: self.temperature,
            max_retries: self.max_retries,
            ..CliOverrides::default()
        }
    }

    fn ids(&self) -> anyhow::Result<std::collections::BTreeSet<u32>> {
        match self.ids.as_deref() {
            Some(raw) => parse_ids(raw),
            None => Ok(Default::default()),
        }
    }
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Shared setup for the model-backed subcommands: config, backend, trace, corpus.
struct Session {
    cfg: PipelineConfig,
    backend: HttpChatBackend,
    trace: TraceWriter,
    records: Vec<PoemRecord>,
}

impl Session {
    fn open(input: &Path, output: &Path, config: Option<&Path>, cli: &CliOverrides) -> anyhow::Result<Self> {
        let records = corpus::load(input)?;
        let cfg = PipelineConfig::from_paths_and_args(input, output, config, cli).context("build config")?;
        if let Some(p) = cfg.config_path.as_ref() {
            tracing::info!(path = %p.display(), "using config");
        }
        let backend = HttpChatBackend::new(&cfg.service).context("create chat backend")?;
        let trace = TraceWriter::new(cfg.trace_dir.clone(), cfg.trace_prompts)?;
        if trace.enabled() {
            tracing::info!(dir = %trace.dir().display(), "tracing prompts");
        }
        Ok(Self {
            cfg,
            backend,
            trace,
            records,
        })
    }

    fn ctx<'a>(&'a self, progress: &'a ConsoleProgress) -> PipelineContext<'a> {
        PipelineContext {
            backend: &self.backend,
            cfg: &self.cfg,
            trace: &self.trace,
            progress,
        }
    }
}

fn write_or_skip(
    progress: &ConsoleProgress,
    output: &Path,
    records: &[PoemRecord],
    dry_run: bool,
) -> anyhow::Result<()> {
    if dry_run {
        progress.report(["[DRY-RUN] no write."]);
        return Ok(());
    }
    let outcome = corpus::save(output, records)?;
    let mut lines = Vec::new();
    if let Some(bak) = outcome.backup {
        lines.push(format!("[BACKUP] -> {}", bak.display()));
    }
    if let Some(err) = outcome.backup_error {
        lines.push(format!("[WARN] backup failed: {err}"));
    }
    lines.push(format!("[DONE] wrote -> {}", output.display()));
    progress.report(lines);
    Ok(())
}

fn run_gate(args: GateArgs, config: Option<&Path>, progress: &ConsoleProgress) -> anyhow::Result<()> {
    let mut cli = args.common.overrides();
    cli.hard_model = args.hard_model.clone();
    let opts = GateOptions {
        ids: args.common.ids()?,
        auto_force: !args.no_auto_force,
        auto_complete: args.auto_complete,
        max_passes: args.max_passes,
        stop_if_unchanged: args.stop_if_unchanged,
    };
    let mut session = Session::open(&args.input, &args.output, config, &cli)?;
    let mut records = std::mem::take(&mut session.records);
    let report = GatePipeline::new(session.ctx(progress), &opts).run(&mut records);
    progress.report([report.summary_line()]);
    write_or_skip(progress, &args.output, &records, args.common.dry_run)
}

fn run_refine(args: RefineArgs, config: Option<&Path>, progress: &ConsoleProgress) -> anyhow::Result<()> {
    let mut cli = args.common.overrides();
    cli.judge_model = args.judge_model.clone();
    let opts = RefineOptions {
        ids: args.common.ids()?,
        passes: args.passes,
        target: args.target.min(100),
    };
    let mut session = Session::open(&args.input, &args.output, config, &cli)?;
    let mut records = std::mem::take(&mut session.records);
    let report = RefinePipeline::new(session.ctx(progress), &opts).run(&mut records);
    progress.report([report.summary_line()]);
    write_or_skip(progress, &args.output, &records, args.common.dry_run)
}

fn run_fill(args: FillArgs, config: Option<&Path>, progress: &ConsoleProgress) -> anyhow::Result<()> {
    let output = args.output.clone().unwrap_or_else(|| args.input.clone());
    let opts = FillOptions {
        ids: args.common.ids()?,
        force: args.force,
    };
    let mut session = Session::open(&args.input, &output, config, &args.common.overrides())?;
    let mut records = std::mem::take(&mut session.records);
    let report = FillPipeline::new(session.ctx(progress), &opts).run(&mut records);
    if report.nothing_to_do() {
        progress.report(["[OK] nothing to do."]);
        return Ok(());
    }
    if !report.failed.is_empty() {
        progress.report([format!("[WARN] failed ids: {:?}", report.failed)]);
    }
    write_or_skip(progress, &output, &records, args.common.dry_run)
}

fn run_inject(args: InjectArgs, progress: &ConsoleProgress) -> anyhow::Result<()> {
    let outcome = inject::run(&InjectPaths {
        data_dir: args.data_dir,
        translations_dir: args.translations_dir,
    })?;
    progress.report([
        format!(
            "[INJECT] wrote: {} {}",
            outcome.ja_out.display(),
            outcome.en_out.display()
        ),
        format!(
            "[MISSING] ja={} en={} -> {}",
            outcome.missing.ja.len(),
            outcome.missing.en.len(),
            outcome.missing_path.display()
        ),
    ]);
    Ok(())
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let progress = ConsoleProgress::new(true);
    let config = cli.config.as_deref();
    match cli.command {
        Command::Gate(args) => run_gate(args, config, &progress),
        Command::Refine(args) => run_refine(args, config, &progress),
        Command::Fill(args) => run_fill(args, config, &progress),
        Command::Inject(args) => run_inject(args, &progress),
        Command::InitConfig(args) => {
            let dir = args
                .dir
                .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
            let cfg_path = init_default_config(&dir, args.force).context("init default config")?;
            eprintln!("Wrote config: {}", cfg_path.display());
            Ok(())
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("[ERROR] {err:#}");
            let code = err.downcast_ref::<GateError>().map_or(1, GateError::exit_code);
            ExitCode::from(u8::try_from(code).unwrap_or(1))
        }
    }
}
