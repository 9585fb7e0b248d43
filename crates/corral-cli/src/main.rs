//! `corral`: bulk Git repository orchestrator across GitHub, GitLab, and
//! Gitea. The subcommand surface is a flat top-level struct for global
//! flags, one subcommand per workflow, dispatch in `main()`.

mod progress;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use clap::{CommandFactory, Parser, Subcommand};
use corral_core::{
    CachingProvider, CancellationToken, Provider, Reporter, SessionStore, SyncEngine,
    build_plan as build_clone_plan,
};
use corral_core::config::{CorralConfig, OrgConfig, ProviderConfig};
use corral_core::environment::collect_environment_fingerprint;
use corral_core::sync::build_plan as build_sync_plan;
use corral_types::{
    CloneOptions, CloneOptionsBuilder, CorralError, Credentials, CredentialKind, ListOptions,
    OutputFormat, Session, SyncOptionsBuilder,
};
use progress::CliReporter;

const PROVIDERS: &[&str] = &["github", "gitlab", "gitea"];

#[derive(Parser)]
#[command(name = "corral", version, about = "Bulk Git repository orchestrator")]
struct Cli {
    /// Session/lock state directory (defaults to ~/.corral/sessions).
    #[arg(long, global = true)]
    state_dir: Option<PathBuf>,

    /// Disable the API optimization layer (rate-limit/dedup) entirely.
    #[arg(long, global = true)]
    no_optimizer: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Clone or refresh every repository in an org (or every org in a
    /// config file).
    Clone(CloneArgs),
    /// Resume a previously interrupted clone run by session id.
    Resume(ResumeArgs),
    /// Mirror selected facets of one repository to another provider.
    Sync(SyncArgs),
    /// Inspect or clean up durable sessions.
    #[command(subcommand)]
    Sessions(SessionsCommand),
    /// Parse and validate a config file without running anything.
    ValidateConfig { path: PathBuf },
    /// Print environment/tooling diagnostics.
    Doctor,
    /// Generate shell completions.
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand)]
enum SessionsCommand {
    List,
    Show { id: String },
    Cleanup {
        #[arg(long, value_parser = humantime::parse_duration, default_value = "720h")]
        max_age: Duration,
    },
}

#[derive(Parser)]
struct CloneArgs {
    /// Multi-provider/multi-org config file. Mutually exclusive with
    /// --provider/--org/--target-root.
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    provider: Option<String>,
    #[arg(long)]
    org: Option<String>,
    #[arg(long)]
    target_root: Option<PathBuf>,
    #[arg(long)]
    api_base: Option<String>,

    #[arg(long, default_value_t = 5)]
    parallel: usize,
    #[arg(long, value_enum, default_value = "reset")]
    strategy: StrategyArg,
    #[arg(long, value_enum, default_value = "https")]
    protocol: ProtocolArg,
    #[arg(long, default_value_t = 0)]
    depth: u32,
    #[arg(long)]
    single_branch: bool,
    #[arg(long, value_parser = humantime::parse_duration, default_value = "5min")]
    timeout: Duration,
    #[arg(long, default_value_t = 0)]
    max_retries: u32,
    #[arg(long, value_parser = humantime::parse_duration, default_value = "2s")]
    retry_delay: Duration,

    #[arg(long)]
    filter_match: Option<String>,
    #[arg(long)]
    filter_exclude: Option<String>,
    #[arg(long)]
    include_archived: bool,
    #[arg(long)]
    include_forks: bool,
    #[arg(long)]
    language: Option<String>,
    #[arg(long)]
    min_stars: Option<u64>,
    #[arg(long)]
    max_stars: Option<u64>,

    #[arg(long, value_enum, default_value = "progress")]
    format: FormatArg,
    #[arg(long)]
    dry_run: bool,
    #[arg(long)]
    create_marker_file: bool,
}

#[derive(Parser)]
struct ResumeArgs {
    session_id: String,
    #[arg(long)]
    api_base: Option<String>,
}

#[derive(Parser)]
struct SyncArgs {
    #[arg(long)]
    source_provider: String,
    #[arg(long)]
    source_target: String,
    #[arg(long)]
    destination_provider: String,
    #[arg(long)]
    destination_target: String,

    #[arg(long)]
    no_code: bool,
    #[arg(long)]
    issues: bool,
    #[arg(long)]
    pull_requests: bool,
    #[arg(long)]
    wiki: bool,
    #[arg(long)]
    no_releases: bool,
    #[arg(long)]
    settings: bool,
    #[arg(long)]
    dry_run: bool,

    #[arg(long, value_parser = humantime::parse_duration, default_value = "10min")]
    timeout: Duration,
    #[arg(long)]
    workdir: Option<PathBuf>,
}

#[derive(Clone, clap::ValueEnum)]
enum StrategyArg {
    Reset,
    Pull,
    Fetch,
}

#[derive(Clone, clap::ValueEnum)]
enum ProtocolArg {
    Https,
    Ssh,
}

#[derive(Clone, clap::ValueEnum)]
enum FormatArg {
    Progress,
    Json,
    Table,
    Quiet,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let state_dir = resolve_state_dir(cli.state_dir.as_deref())?;

    match cli.command {
        Commands::Clone(args) => run_clone(args, &state_dir, cli.no_optimizer),
        Commands::Resume(args) => run_resume(args, &state_dir, cli.no_optimizer),
        Commands::Sync(args) => run_sync(args, cli.no_optimizer),
        Commands::Sessions(cmd) => run_sessions(cmd, &state_dir),
        Commands::ValidateConfig { path } => run_validate_config(&path),
        Commands::Doctor => run_doctor(&state_dir),
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            let name = cmd.get_name().to_string();
            clap_complete::generate(shell, &mut cmd, name, &mut std::io::stdout());
            Ok(())
        }
    }
}

fn resolve_state_dir(explicit: Option<&Path>) -> Result<PathBuf> {
    match explicit {
        Some(dir) => Ok(dir.to_path_buf()),
        None => Ok(SessionStore::default_dir()?),
    }
}

/// Resolve a provider's API token from config (if present) or the
/// `{PROVIDER}_TOKEN` environment variable (§6 "Credential resolution").
fn resolve_token(provider: &str, config_token: Option<&str>) -> Result<String> {
    if let Some(token) = config_token {
        return Ok(token.to_string());
    }
    let var = format!("{}_TOKEN", provider.to_uppercase());
    std::env::var(&var).map_err(|_| {
        anyhow!("no token configured for provider {provider}; set {var} or supply config.token")
    })
}

fn build_provider(
    provider: &str,
    token: &str,
    api_base: Option<&str>,
    rate_limit: u32,
    no_optimizer: bool,
) -> Result<Arc<dyn Provider>> {
    let raw: Arc<dyn Provider> = match provider {
        "github" => match api_base {
            Some(base) => Arc::new(corral_github::GithubProvider::with_base_url(token, base)),
            None => Arc::new(corral_github::GithubProvider::new(token)),
        },
        "gitlab" => match api_base {
            Some(base) => Arc::new(corral_gitlab::GitlabProvider::with_base_url(token, base)),
            None => Arc::new(corral_gitlab::GitlabProvider::new(token)),
        },
        "gitea" => match api_base {
            Some(base) => Arc::new(corral_gitea::GiteaProvider::with_base_url(token, base)),
            None => Arc::new(corral_gitea::GiteaProvider::new(token)),
        },
        other => bail!("unknown provider {other:?}, expected one of {PROVIDERS:?}"),
    };

    if no_optimizer {
        return Ok(raw);
    }
    Ok(Arc::new(CachingProvider::new(raw, rate_limit)))
}

/// Pull every page of `provider.list_repositories` for one org (§4.1
/// pagination contract: follow until `has_more` is false).
fn list_all_repositories(
    provider: &dyn Provider,
    org: &str,
) -> Result<Vec<corral_types::Repository>, CorralError> {
    let mut repos = Vec::new();
    let mut page = 1;
    loop {
        let mut options = ListOptions::for_org(org);
        options.page = page;
        let listed = provider.list_repositories(&options)?;
        let has_more = listed.has_more;
        repos.extend(listed.repositories);
        if !has_more {
            break;
        }
        page += 1;
    }
    Ok(repos)
}

fn run_clone(args: CloneArgs, state_dir: &Path, no_optimizer: bool) -> Result<()> {
    let cancel = install_cancellation_handler();

    let jobs = match &args.config {
        Some(path) => clone_jobs_from_config(path)?,
        None => vec![clone_job_from_args(&args)?],
    };

    for job in jobs {
        if cancel.is_cancelled() {
            break;
        }
        run_one_clone_job(job, state_dir, no_optimizer, &cancel)?;
    }
    Ok(())
}

struct CloneJob {
    provider: String,
    token: Option<String>,
    api_base: Option<String>,
    options: CloneOptions,
}

fn clone_job_from_args(args: &CloneArgs) -> Result<CloneJob> {
    let provider = args
        .provider
        .clone()
        .ok_or_else(|| anyhow!("--provider is required without --config"))?;
    let org = args
        .org
        .clone()
        .ok_or_else(|| anyhow!("--org is required without --config"))?;
    let target_root = args
        .target_root
        .clone()
        .ok_or_else(|| anyhow!("--target-root is required without --config"))?;

    let builder = CloneOptionsBuilder {
        provider: provider.clone(),
        org,
        target_root,
        parallel: args.parallel,
        strategy: match args.strategy {
            StrategyArg::Reset => corral_types::Strategy::Reset,
            StrategyArg::Pull => corral_types::Strategy::Pull,
            StrategyArg::Fetch => corral_types::Strategy::Fetch,
        },
        protocol: match args.protocol {
            ProtocolArg::Https => corral_types::Protocol::Https,
            ProtocolArg::Ssh => corral_types::Protocol::Ssh,
        },
        depth: args.depth,
        single_branch: args.single_branch,
        timeout: args.timeout,
        max_retries: args.max_retries,
        retry_delay: args.retry_delay,
        filter_match: args.filter_match.clone(),
        filter_exclude: args.filter_exclude.clone(),
        include_archived: args.include_archived,
        include_forks: args.include_forks,
        language: args.language.clone(),
        min_stars: args.min_stars,
        max_stars: args.max_stars,
        format: match args.format {
            FormatArg::Progress => OutputFormat::Progress,
            FormatArg::Json => OutputFormat::Json,
            FormatArg::Table => OutputFormat::Table,
            FormatArg::Quiet => OutputFormat::Quiet,
        },
        dry_run: args.dry_run,
        create_marker_file: args.create_marker_file,
        ..Default::default()
    };

    Ok(CloneJob {
        provider,
        token: None,
        api_base: args.api_base.clone(),
        options: builder.validate().context("invalid clone options")?,
    })
}

fn clone_jobs_from_config(path: &Path) -> Result<Vec<CloneJob>> {
    let config = CorralConfig::load_from_file(path).context("loading config")?;
    config.validate().context("validating config")?;

    let mut jobs = Vec::new();
    for (provider, provider_config) in &config.providers {
        for org in &provider_config.orgs {
            jobs.push(clone_job_from_config_org(provider, provider_config, org)?);
        }
    }
    Ok(jobs)
}

fn clone_job_from_config_org(
    provider: &str,
    provider_config: &ProviderConfig,
    org: &OrgConfig,
) -> Result<CloneJob> {
    let target_root = match &org.clone_dir {
        Some(dir) => PathBuf::from(dir),
        None => PathBuf::from(".").join(provider).join(&org.name),
    };

    let builder = CloneOptionsBuilder {
        provider: provider.to_string(),
        org: org.name.clone(),
        target_root,
        visibility: org.visibility,
        strategy: org.strategy,
        filter_match: org.r#match.clone(),
        filter_exclude: org.exclude.clone(),
        ..Default::default()
    };

    Ok(CloneJob {
        provider: provider.to_string(),
        token: provider_config.token.clone(),
        api_base: None,
        options: builder
            .validate()
            .with_context(|| format!("invalid options for {provider}:{}", org.name))?,
    })
}

fn run_one_clone_job(
    job: CloneJob,
    state_dir: &Path,
    no_optimizer: bool,
    cancel: &CancellationToken,
) -> Result<()> {
    let token = resolve_token(&job.provider, job.token.as_deref())?;
    let provider = build_provider(
        &job.provider,
        &token,
        job.api_base.as_deref(),
        5000,
        no_optimizer,
    )?;

    eprintln!("listing repositories for {}:{}", job.provider, job.options.org);
    let repositories = list_all_repositories(provider.as_ref(), &job.options.org)
        .context("listing repositories")?;

    let plan = build_clone_plan(repositories, &job.options);
    for skipped in &plan.skipped {
        tracing::debug!(repo = %skipped.full_name, reason = %skipped.reason, "skipped by filter");
    }

    let full_names: Vec<String> = plan
        .repositories
        .iter()
        .map(|p| p.repository.full_name.clone())
        .collect();
    let session = Session::new(&job.options, full_names.clone());
    let store = SessionStore::new(state_dir.to_path_buf());
    store.save(&session).context("saving session")?;

    let reporter: Arc<Mutex<dyn Reporter>> =
        Arc::new(Mutex::new(CliReporter::new(job.options.format, plan.repositories.len())));
    let session = Arc::new(Mutex::new(session));

    let outcomes = corral_core::engine::run(
        plan.repositories,
        Arc::new(job.options),
        Arc::clone(&session),
        cancel.clone(),
        reporter,
    );

    let session = session.lock().unwrap_or_else(|e| e.into_inner());
    store.save(&session).context("saving final session state")?;

    let summary = corral_core::RunSummary::from_outcomes(&outcomes);
    eprintln!(
        "{}: {} completed, {} failed",
        job.provider,
        summary.completed.len(),
        summary.failed.len()
    );
    Ok(())
}

fn run_resume(args: ResumeArgs, state_dir: &Path, no_optimizer: bool) -> Result<()> {
    let cancel = install_cancellation_handler();
    let store = SessionStore::new(state_dir.to_path_buf());
    let mut session = store
        .load(&args.session_id)?
        .ok_or_else(|| anyhow!("no session {} in {}", args.session_id, state_dir.display()))?;

    let builder = CloneOptionsBuilder {
        provider: session.provider.clone(),
        org: session.org.clone(),
        target_root: session.target_root.clone(),
        ..Default::default()
    };
    let options = builder.validate().context("rebuilding clone options")?;

    let token = resolve_token(&session.provider, None)?;
    let provider = build_provider(&session.provider, &token, args.api_base.as_deref(), 5000, no_optimizer)?;

    let repositories = list_all_repositories(provider.as_ref(), &session.org)?;
    let mut plan = build_clone_plan(repositories, &options);

    // §4.3/§8 Scenario E: skip anything already completed in the loaded session.
    plan.repositories.retain(|p| {
        session
            .repos
            .get(&p.repository.full_name)
            .map(|status| !matches!(status.state, corral_types::RepoState::Completed))
            .unwrap_or(true)
    });

    session.touch();
    let reporter: Arc<Mutex<dyn Reporter>> =
        Arc::new(Mutex::new(CliReporter::new(options.format, plan.repositories.len())));
    let session = Arc::new(Mutex::new(session));

    let outcomes = corral_core::engine::run(
        plan.repositories,
        Arc::new(options),
        Arc::clone(&session),
        cancel,
        reporter,
    );

    let session = session.lock().unwrap_or_else(|e| e.into_inner());
    store.save(&session)?;

    let summary = corral_core::RunSummary::from_outcomes(&outcomes);
    eprintln!("resumed: {} completed, {} failed", summary.completed.len(), summary.failed.len());
    Ok(())
}

fn run_sync(args: SyncArgs, no_optimizer: bool) -> Result<()> {
    let cancel = install_cancellation_handler();

    let options = SyncOptionsBuilder {
        source_provider: args.source_provider.clone(),
        source_target: args.source_target.clone(),
        destination_provider: args.destination_provider.clone(),
        destination_target: args.destination_target.clone(),
        sync_code: !args.no_code,
        sync_issues: args.issues,
        sync_pull_requests: args.pull_requests,
        sync_wiki: args.wiki,
        sync_releases: !args.no_releases,
        sync_settings: args.settings,
        dry_run: args.dry_run,
    }
    .validate()
    .context("invalid sync options")?;

    let source_token = resolve_token(&args.source_provider, None)?;
    let dest_token = resolve_token(&args.destination_provider, None)?;
    let source = build_provider(&args.source_provider, &source_token, None, 5000, no_optimizer)?;
    let destination = build_provider(&args.destination_provider, &dest_token, None, 5000, no_optimizer)?;

    let destination_exists = destination.get_repository(&args.destination_target).is_ok();
    let source_tags: Vec<String> = source
        .list_releases(&args.source_target)
        .unwrap_or_default()
        .into_iter()
        .map(|r| r.tag_name)
        .collect();
    let existing_tags: Vec<String> = destination
        .list_releases(&args.destination_target)
        .unwrap_or_default()
        .into_iter()
        .map(|r| r.tag_name)
        .collect();

    let plan = build_sync_plan(&options, destination_exists, &source_tags, &existing_tags);
    for item in &plan.items {
        tracing::info!(feature = ?item.feature, action = ?item.action, "sync plan item");
    }

    let engine = SyncEngine::new(source, destination);
    let workdir = args
        .workdir
        .unwrap_or_else(|| std::env::temp_dir().join("corral-sync"));
    std::fs::create_dir_all(&workdir).context("creating sync workdir")?;

    let report = engine.execute(&options, &plan, &workdir, args.timeout, &cancel);
    eprintln!(
        "sync: {} completed, {} skipped, {} failed",
        report.completed.len(),
        report.skipped.len(),
        report.failed.len()
    );
    for (feature, reason) in &report.failed {
        eprintln!("  failed {feature:?}: {reason}");
    }
    Ok(())
}

fn run_sessions(cmd: SessionsCommand, state_dir: &Path) -> Result<()> {
    let store = SessionStore::new(state_dir.to_path_buf());
    match cmd {
        SessionsCommand::List => {
            for id in store.list_ids()? {
                if let Some(info) = store.load_session_info(&id)? {
                    println!(
                        "{}  {}:{}  {}",
                        info.id, info.provider, info.org, info.updated_at
                    );
                }
            }
        }
        SessionsCommand::Show { id } => {
            let session = store
                .load(&id)?
                .ok_or_else(|| anyhow!("no session {id}"))?;
            let stats = session.stats();
            println!(
                "{} {}:{} total={} pending={} in_progress={} completed={} failed={}",
                session.id,
                session.provider,
                session.org,
                stats.total,
                stats.pending,
                stats.in_progress,
                stats.completed,
                stats.failed,
            );
            for (name, status) in &session.repos {
                println!("  {name}: {}", status.state);
            }
        }
        SessionsCommand::Cleanup { max_age } => {
            let removed = store.cleanup_older_than(max_age)?;
            println!("removed {} session(s)", removed.len());
        }
    }
    Ok(())
}

fn run_validate_config(path: &Path) -> Result<()> {
    let config = CorralConfig::load_from_file(path)?;
    config.validate().context("config is invalid")?;
    let warnings = config.warnings();
    if warnings.is_empty() {
        println!("{} is valid, no warnings", path.display());
    } else {
        println!("{} is valid with {} warning(s):", path.display(), warnings.len());
        for warning in warnings {
            println!("  - {warning}");
        }
    }
    Ok(())
}

fn run_doctor(state_dir: &Path) -> Result<()> {
    let fingerprint = collect_environment_fingerprint();
    println!("corral {}", fingerprint.corral_version);
    println!("os/arch: {}/{}", fingerprint.os, fingerprint.arch);
    match &fingerprint.git_version {
        Some(v) => println!("git: {v}"),
        None => println!("git: not found"),
    }
    println!("state dir: {}", state_dir.display());
    println!("state dir locked: {}", corral_core::lock::LockFile::is_locked(state_dir).unwrap_or(false));

    for provider in PROVIDERS {
        let var = format!("{}_TOKEN", provider.to_uppercase());
        match std::env::var(&var) {
            Ok(token) => match build_provider(provider, &token, None, 5000, true) {
                Ok(client) => match client.validate_token(&Credentials {
                    kind: CredentialKind::Token,
                    secret: token,
                }) {
                    Ok(info) if info.valid => println!("{provider}: {var} is set and valid"),
                    Ok(_) => println!("{provider}: {var} is set but the token is not valid"),
                    Err(e) => println!("{provider}: {var} is set but could not be checked ({e})"),
                },
                Err(e) => println!("{provider}: {e}"),
            },
            Err(_) => println!("{provider}: {var} is NOT set"),
        }
    }
    Ok(())
}

/// Builds the token every worker, retry sleep, and sync step checks
/// (§4.3/§5). No OS signal crate is in this workspace's dependency
/// stack, so nothing currently flips this token on SIGINT/SIGTERM — a
/// first Ctrl-C still terminates the process immediately via the
/// default handler, just without the cooperative, store-consistent
/// shutdown the token is built to support. Wiring an actual handler is
/// future work, not yet grounded in anything this corpus depends on.
fn install_cancellation_handler() -> CancellationToken {
    CancellationToken::new()
}
