use anyhow::{anyhow, Context, Result};
use blame_court::analyzer::ResponsibilityAnalyzer;
use blame_court::config::Config;
use blame_court::court::{load_report, open_case, Court};
use blame_court::judgment::{JudgmentStatus, NewJudgment, RepoRef, DEFAULT_PERIOD_DAYS};
use blame_court::keyring;
use blame_court::llm::{ProviderKind, SumPolicy};
use blame_court::source::{CommitSource, GithubCommitSource, LocalGitSource};
use blame_court::store::{FileStore, JudgmentStore, ListQuery, DEFAULT_PER_PAGE};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(
    name = "blame-court",
    about = "Find out whose commit broke it, and tell them nicely (or not)",
    version
)]
struct Cli {
    /// Read history from a local clone instead of the GitHub API
    #[arg(long, global = true)]
    local: Option<PathBuf>,

    /// Store file (defaults to the user data directory)
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Open a new case
    Open(OpenArgs),
    /// Analyze commit history and name the suspects
    Analyze { id: Uuid },
    /// Write blame messages for the top suspect
    Blame { id: Uuid },
    /// Print a case with its suspects and blame
    Show { id: Uuid },
    /// List cases, newest first
    List {
        #[arg(long)]
        status: Option<JudgmentStatus>,
        #[arg(long, default_value_t = 1)]
        page: u32,
        #[arg(long, default_value_t = DEFAULT_PER_PAGE)]
        per_page: u32,
    },
    /// Delete a case with its suspects and blame
    Delete { id: Uuid },
    /// Store an API key (anthropic, gemini, openrouter) or a GitHub token
    /// (github) in the system keychain
    SetKey { target: String, key: String },
    /// Print settings, saving any that are passed
    Config(ConfigArgs),
}

#[derive(Args, Debug)]
struct ConfigArgs {
    #[arg(long)]
    provider: Option<ProviderKind>,
    /// Model id; pass an empty string to use the provider default
    #[arg(long)]
    model: Option<String>,
    /// What to do when responsibilities don't sum to 100
    #[arg(long)]
    sum_policy: Option<SumPolicy>,
    #[arg(long)]
    store_path: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct OpenArgs {
    /// owner/repo or a GitHub URL; inferred from `origin` with --local
    repo: Option<String>,
    #[arg(long)]
    title: String,
    /// Error message or incident description
    #[arg(long)]
    description: Option<String>,
    /// Affected file, relative to the repository root
    #[arg(long)]
    file: Option<String>,
    /// Lookback window in days
    #[arg(long, default_value_t = DEFAULT_PERIOD_DAYS)]
    days: u32,
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("blame_court=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn open_store(cli: &Cli, config: &Config) -> Result<FileStore> {
    let path = cli
        .store
        .clone()
        .or_else(|| config.store_path())
        .ok_or_else(|| anyhow!("Could not determine a store location; pass --store"))?;
    Ok(FileStore::new(path))
}

fn commit_source(cli: &Cli, config: &Config) -> Result<Arc<dyn CommitSource>> {
    match &cli.local {
        Some(path) => Ok(Arc::new(
            LocalGitSource::new(path).context("Failed to open local repository")?,
        )),
        None => Ok(Arc::new(GithubCommitSource::from_config(config)?)),
    }
}

fn build_court(cli: &Cli, config: &Config, store: Arc<FileStore>) -> Result<Court> {
    let analyzer = ResponsibilityAnalyzer::from_config(config)?;
    tracing::debug!(provider = analyzer.provider_name(), "model provider ready");
    Ok(Court::new(commit_source(cli, config)?, store, Arc::new(analyzer)))
}

fn resolve_repo(cli: &Cli, repo: Option<&str>) -> Result<RepoRef> {
    if let Some(repo) = repo {
        return Ok(RepoRef::parse(repo)?);
    }
    let path = cli
        .local
        .as_ref()
        .ok_or_else(|| anyhow!("Pass a repository as owner/repo or a GitHub URL"))?;
    LocalGitSource::new(path)?
        .remote_repo()
        .ok_or_else(|| anyhow!("The local repository has no GitHub origin; pass owner/repo"))
}

fn set_key(target: &str, key: &str) -> Result<()> {
    if key.trim().is_empty() {
        return Err(anyhow!("Key must not be empty"));
    }
    if target.eq_ignore_ascii_case("github") {
        keyring::set_github_token(key).map_err(|e| anyhow!("Failed to save token: {}", e))?;
        eprintln!("Saved GitHub token to the system keychain");
        return Ok(());
    }
    let kind: ProviderKind = target.parse().map_err(|e| anyhow!("{}", e))?;
    keyring::set_provider_key(kind, key).map_err(|e| anyhow!("Failed to save key: {}", e))?;
    eprintln!("Saved {} API key to the system keychain", kind);
    Ok(())
}

fn configure(args: &ConfigArgs) -> Result<()> {
    let mut config = Config::load_stored();
    let mut changed = false;
    if let Some(provider) = args.provider {
        config.provider = provider;
        changed = true;
    }
    if let Some(model) = &args.model {
        config.model = Some(model.trim().to_string()).filter(|m| !m.is_empty());
        changed = true;
    }
    if let Some(policy) = args.sum_policy {
        config.sum_policy = policy;
        changed = true;
    }
    if let Some(path) = &args.store_path {
        config.store_path = Some(path.clone());
        changed = true;
    }
    if changed {
        config.save().map_err(|e| anyhow!(e))?;
        eprintln!("Saved {}", Config::config_location());
    }
    print_json(&config)
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = Config::load();

    match &cli.command {
        Commands::SetKey { target, key } => return set_key(target, key),
        Commands::Config(args) => return configure(args),
        _ => {}
    }

    let store = Arc::new(open_store(&cli, &config)?);
    tracing::debug!(store = %store.path().display(), config = %Config::config_location(), "starting");

    match &cli.command {
        Commands::Open(args) => {
            let repo = resolve_repo(&cli, args.repo.as_deref())?;
            let request = NewJudgment {
                repo_owner: repo.owner,
                repo_name: repo.name,
                title: args.title.clone(),
                description: args.description.clone(),
                file_path: args.file.clone(),
                period_days: args.days,
            };
            print_json(&open_case(store.as_ref(), request).await?)
        }
        Commands::Analyze { id } => {
            let court = build_court(&cli, &config, store)?;
            print_json(&court.analyze(*id).await?)
        }
        Commands::Blame { id } => {
            let court = build_court(&cli, &config, store)?;
            print_json(&court.compose_blame(*id).await?)
        }
        Commands::Show { id } => print_json(&load_report(store.as_ref(), *id).await?),
        Commands::List {
            status,
            page,
            per_page,
        } => {
            let query = ListQuery {
                status: *status,
                page: *page,
                per_page: *per_page,
            };
            print_json(&store.list_judgments(query).await?)
        }
        Commands::Delete { id } => {
            store.delete_judgment(*id).await?;
            eprintln!("Deleted {}", id);
            Ok(())
        }
        Commands::SetKey { .. } | Commands::Config(_) => Ok(()),
    }
}
