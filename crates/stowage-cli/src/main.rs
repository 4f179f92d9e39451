//! stowage - validate and build container images across a monorepo
//!
//! ## Commands
//!
//! - `discover`: List the build units the configuration resolves to
//! - `parse`: Print a descriptor's instructions as JSON
//! - `validate`: Parse, resolve and check every unit without building
//! - `build`: Validate, build, push and verify every unit
//!
//! Exit status is 0 when the run has no blocking problems, 1 when it does and
//! 2 when the run could not be carried out at all.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn, Level};

use stowage_build::{DockerBuildx, DockerImagetools, Pipeline};
use stowage_core::{
    cancellation, discover, load_or_default, CachePolicy, ConfigOverrides, Descriptor,
    PolicyMode, ResolutionMode, RunConfig, RunContext, RunMode, RunReport,
};

#[derive(Parser)]
#[command(name = "stowage")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Validate and build multi-platform container images", long_about = None)]
struct Cli {
    /// Enable verbose output (debug logs, streamed builder output)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Repository root holding stowage.toml
    #[arg(long, global = true, default_value = ".", env = "STOWAGE_ROOT")]
    root: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the build units discovered under the root
    Discover,

    /// Parse a single descriptor and print its instructions as JSON
    Parse {
        /// Path to the descriptor
        descriptor: PathBuf,
    },

    /// Discovery, parsing, source resolution and policy checks; nothing is built
    Validate {
        #[command(flatten)]
        run: RunArgs,
    },

    /// Validate, then build every unit that passed
    Build {
        #[command(flatten)]
        run: RunArgs,

        #[command(flatten)]
        build: BuildArgs,
    },
}

/// Flags shared by `validate` and `build`.
#[derive(Args, Debug, Default)]
struct RunArgs {
    /// Policy enforcement
    #[arg(long, value_enum)]
    policy: Option<PolicyArg>,

    /// Directory relative copy sources resolve against
    #[arg(long, value_enum)]
    resolution: Option<ResolutionArg>,

    /// Only run the named unit (repeatable)
    #[arg(long = "unit")]
    units: Vec<String>,

    /// Write the JSON run report to this file
    #[arg(long)]
    report: Option<PathBuf>,
}

#[derive(Args, Debug, Default)]
struct BuildArgs {
    /// Build locally without pushing (skips manifest verification)
    #[arg(long, conflicts_with = "push")]
    no_push: bool,

    /// Push even when stowage.toml sets `push = false`
    #[arg(long)]
    push: bool,

    /// Disable the builder cache (same as `--cache none`)
    #[arg(long, conflicts_with = "cache")]
    no_cache: bool,

    /// Builder cache policy
    #[arg(long, value_enum)]
    cache: Option<CacheArg>,

    /// Failure handling
    #[arg(long, value_enum)]
    mode: Option<ModeArg>,

    /// Image tag applied to every unit
    #[arg(long)]
    tag: Option<String>,

    /// Target platforms, comma separated
    #[arg(long, value_delimiter = ',')]
    platforms: Option<Vec<String>>,

    /// Concurrent builds in continue mode
    #[arg(long)]
    workers: Option<usize>,

    /// Per-unit build timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Registry host
    #[arg(long, env = "STOWAGE_REGISTRY")]
    registry: Option<String>,

    /// Repository path under the registry
    #[arg(long, env = "STOWAGE_REPOSITORY")]
    repository: Option<String>,

    /// Named buildx builder instance
    #[arg(long)]
    builder: Option<String>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ModeArg {
    FailFast,
    Continue,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum CacheArg {
    None,
    Default,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum PolicyArg {
    Enforce,
    ReportOnly,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ResolutionArg {
    Descriptor,
    ContextRoot,
}

impl From<ModeArg> for RunMode {
    fn from(arg: ModeArg) -> Self {
        match arg {
            ModeArg::FailFast => RunMode::FailFast,
            ModeArg::Continue => RunMode::Continue,
        }
    }
}

impl From<CacheArg> for CachePolicy {
    fn from(arg: CacheArg) -> Self {
        match arg {
            CacheArg::None => CachePolicy::None,
            CacheArg::Default => CachePolicy::Default,
        }
    }
}

impl From<PolicyArg> for PolicyMode {
    fn from(arg: PolicyArg) -> Self {
        match arg {
            PolicyArg::Enforce => PolicyMode::Enforce,
            PolicyArg::ReportOnly => PolicyMode::ReportOnly,
        }
    }
}

impl From<ResolutionArg> for ResolutionMode {
    fn from(arg: ResolutionArg) -> Self {
        match arg {
            ResolutionArg::Descriptor => ResolutionMode::Descriptor,
            ResolutionArg::ContextRoot => ResolutionMode::ContextRoot,
        }
    }
}

fn overrides(verbose: bool, run: &RunArgs, build: Option<&BuildArgs>) -> ConfigOverrides {
    let mut o = ConfigOverrides {
        policy: run.policy.map(Into::into),
        resolution: run.resolution.map(Into::into),
        verbose: verbose.then_some(true),
        ..ConfigOverrides::default()
    };
    if let Some(b) = build {
        o.registry = b.registry.clone();
        o.repository = b.repository.clone();
        o.tag = b.tag.clone();
        o.platforms = b.platforms.clone();
        o.push = match (b.push, b.no_push) {
            (true, _) => Some(true),
            (_, true) => Some(false),
            _ => None,
        };
        o.cache = b
            .cache
            .map(Into::into)
            .or(b.no_cache.then_some(CachePolicy::None));
        o.mode = b.mode.map(Into::into);
        o.workers = b.workers;
        o.timeout_secs = b.timeout;
    } else {
        // Nothing is pushed by a validate-only run.
        o.push = Some(false);
    }
    o
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    stowage_core::init_tracing(cli.json, level);

    match dispatch(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            error!(error = %e, "run aborted");
            eprintln!("error: {:#}", e);
            ExitCode::from(2)
        }
    }
}

/// Exit status of a completed command.
async fn dispatch(cli: Cli) -> Result<u8> {
    match cli.command {
        Commands::Discover => cmd_discover(&cli.root),
        Commands::Parse { descriptor } => cmd_parse(&descriptor),
        Commands::Validate { run } => {
            let config = load_config(&cli.root, overrides(cli.verbose, &run, None))?;
            cmd_run(&cli.root, config, &run, None).await
        }
        Commands::Build { run, build } => {
            let config = load_config(&cli.root, overrides(cli.verbose, &run, Some(&build)))?;
            cmd_run(&cli.root, config, &run, Some(&build)).await
        }
    }
}

fn load_config(root: &Path, overrides: ConfigOverrides) -> Result<RunConfig> {
    let config = load_or_default(root)
        .with_context(|| format!("Failed to load configuration from {:?}", root))?;
    Ok(config.with_overrides(overrides))
}

fn cmd_discover(root: &Path) -> Result<u8> {
    let config = load_or_default(root)
        .with_context(|| format!("Failed to load configuration from {:?}", root))?;
    let units = discover(root, &config.units, config.scan.as_ref())
        .context("Failed to discover build units")?;

    for unit in units.units() {
        println!(
            "{:<24} {:<12} {}  (context {})",
            unit.name(),
            unit.tier().as_str(),
            unit.descriptor().display(),
            unit.context().display()
        );
    }
    info!(units = units.len(), "discovery complete");
    Ok(0)
}

fn cmd_parse(path: &Path) -> Result<u8> {
    let descriptor = Descriptor::load(path)
        .with_context(|| format!("Failed to parse descriptor {:?}", path))?;
    let json = serde_json::to_string_pretty(descriptor.instructions())
        .context("Failed to serialize instructions")?;
    println!("{}", json);
    Ok(0)
}

async fn cmd_run(
    root: &Path,
    config: RunConfig,
    run: &RunArgs,
    build: Option<&BuildArgs>,
) -> Result<u8> {
    let (handle, signal) = cancellation();
    let ctx = RunContext::new(root, config, signal).context("Invalid run configuration")?;

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling run");
            handle.cancel();
        }
    });

    let mut builder = DockerBuildx::new();
    if let Some(name) = build.and_then(|b| b.builder.as_deref()) {
        builder = builder.with_builder_instance(name);
    }
    let pipeline = Pipeline::new(Arc::new(builder), Arc::new(DockerImagetools::new()))
        .with_selection(run.units.clone());

    let report = match build {
        Some(_) => pipeline.run(&ctx).await,
        None => pipeline.validate(&ctx).await,
    }
    .context("Run failed")?;

    write_report(&report, run.report.as_deref())?;
    Ok(report.exit_code() as u8)
}

fn write_report(report: &RunReport, path: Option<&Path>) -> Result<()> {
    print!("{}", report.render_summary());
    if let Some(path) = path {
        let json = report.to_json().context("Failed to serialize run report")?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write run report to {:?}", path))?;
        info!(path = %path.display(), "run report written");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(root: &Path, rel: &str, contents: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }

    #[test]
    fn test_build_flags_become_overrides() {
        let cli = Cli::try_parse_from([
            "stowage",
            "build",
            "--no-push",
            "--mode",
            "continue",
            "--policy",
            "report-only",
            "--platforms",
            "linux/amd64,linux/arm64/v8",
            "--workers",
            "4",
            "--unit",
            "api",
            "--unit",
            "worker",
        ])
        .unwrap();

        let Commands::Build { run, build } = cli.command else {
            panic!("expected build");
        };
        assert_eq!(run.units, vec!["api", "worker"]);

        let o = overrides(false, &run, Some(&build));
        assert_eq!(o.push, Some(false));
        assert_eq!(o.mode, Some(RunMode::Continue));
        assert_eq!(o.policy, Some(PolicyMode::ReportOnly));
        assert_eq!(o.workers, Some(4));
        assert_eq!(
            o.platforms,
            Some(vec!["linux/amd64".to_string(), "linux/arm64/v8".to_string()])
        );
        assert_eq!(o.verbose, None);
        assert_eq!(o.cache, None);
    }

    #[test]
    fn test_unset_flags_leave_file_values() {
        let config = RunConfig {
            workers: 8,
            push: false,
            ..RunConfig::default()
        };
        let merged = config.clone().with_overrides(overrides(
            false,
            &RunArgs::default(),
            Some(&BuildArgs::default()),
        ));
        assert_eq!(merged, config);
    }

    #[test]
    fn test_push_and_cache_can_be_turned_back_on() {
        let config = RunConfig {
            registry: Some("ghcr.io".into()),
            push: false,
            cache: CachePolicy::None,
            ..RunConfig::default()
        };
        let cli = Cli::try_parse_from(["stowage", "build", "--push", "--cache", "default"]).unwrap();
        let Commands::Build { run, build } = cli.command else {
            panic!("expected build");
        };
        let merged = config.with_overrides(overrides(false, &run, Some(&build)));
        assert!(merged.push);
        assert_eq!(merged.cache, CachePolicy::Default);

        assert!(Cli::try_parse_from(["stowage", "build", "--push", "--no-push"]).is_err());
        assert!(Cli::try_parse_from(["stowage", "build", "--no-cache", "--cache", "default"]).is_err());
    }

    #[test]
    fn test_rejects_unknown_mode() {
        assert!(Cli::try_parse_from(["stowage", "build", "--mode", "yolo"]).is_err());
    }

    #[test]
    fn test_cmd_parse_reports_parse_errors() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "Dockerfile", "COPY app /app\n");
        let err = cmd_parse(&tmp.path().join("Dockerfile")).unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to parse descriptor"));
    }

    #[tokio::test]
    async fn test_validate_writes_report() {
        let tmp = tempfile::tempdir().unwrap();
        write(
            tmp.path(),
            "stowage.toml",
            "push = false\n\n[[units]]\nname = \"api\"\ndescriptor = \"api/Dockerfile\"\n",
        );
        write(
            tmp.path(),
            "api/Dockerfile",
            "FROM gcr.io/distroless/static:nonroot\nCOPY ./server /server\n",
        );
        write(tmp.path(), "api/server", "");
        let report_path = tmp.path().join("report.json");

        let run = RunArgs {
            report: Some(report_path.clone()),
            ..RunArgs::default()
        };
        let config = load_config(tmp.path(), overrides(false, &run, None)).unwrap();
        let code = cmd_run(tmp.path(), config, &run, None).await.unwrap();

        assert_eq!(code, 0);
        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(report_path).unwrap()).unwrap();
        assert_eq!(json["units"][0]["unit"], "api");
        assert_eq!(json["summary"]["blocking"], false);
    }
}
