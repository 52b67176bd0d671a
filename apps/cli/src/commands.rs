//! CLI command definitions, routing, and tracing setup.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

use linkenrich_cache::ResolutionCache;
use linkenrich_core::{LinkEnricher, PassReport};
use linkenrich_shared::{AppConfig, EnrichConfig, init_config, load_config};
use linkenrich_tree::{MatchKind, Node, ScanOptions, Scanner, WarningSuppressions};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// linkenrich: decorate GitHub issue links and @mentions in document trees.
#[derive(Parser)]
#[command(
    name = "linkenrich",
    version,
    about = "Resolve GitHub issue links and @mentions in mdast JSON trees.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Enrich one or more JSON document trees.
    Enrich {
        /// Input tree files (mdast JSON).
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Write results here instead of overwriting the inputs.
        #[arg(short, long)]
        out_dir: Option<PathBuf>,

        /// Override the persisted cache location.
        #[arg(long, conflicts_with = "no_cache")]
        cache_file: Option<PathBuf>,

        /// Keep the cache in memory only for this run.
        #[arg(long)]
        no_cache: bool,

        /// Bibliography key that `cite` nodes may legitimately refer to
        /// (repeatable). Matching citations are left alone.
        #[arg(long = "cite-key")]
        cite_keys: Vec<String>,
    },
    /// List the references found in a tree without contacting GitHub.
    Scan {
        /// Input tree file (mdast JSON).
        file: PathBuf,

        /// Bibliography key to ignore (repeatable).
        #[arg(long = "cite-key")]
        cite_keys: Vec<String>,
    },
    /// Manage configuration.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
///
/// Logs go to stderr so `scan` output and progress bars stay separate.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "linkenrich=info",
        1 => "linkenrich=debug",
        _ => "linkenrich=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .with_target(false)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Enrich {
            files,
            out_dir,
            cache_file,
            no_cache,
            cite_keys,
        } => {
            let opts = EnrichArgs {
                out_dir,
                cache_file,
                no_cache,
                cite_keys: cite_keys.into_iter().collect(),
            };
            cmd_enrich(&files, opts).await
        }
        Command::Scan { file, cite_keys } => {
            cmd_scan(&file, cite_keys.into_iter().collect()).await
        }
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show().await,
        },
    }
}

// ---------------------------------------------------------------------------
// enrich
// ---------------------------------------------------------------------------

struct EnrichArgs {
    out_dir: Option<PathBuf>,
    cache_file: Option<PathBuf>,
    no_cache: bool,
    cite_keys: HashSet<String>,
}

/// Running totals across every document in one invocation.
#[derive(Default)]
struct Totals {
    documents: usize,
    references: usize,
    requests: usize,
    unresolved: usize,
    links: usize,
    mentions: usize,
    citations: usize,
    demoted: usize,
}

impl Totals {
    fn add(&mut self, report: &PassReport) {
        self.documents += 1;
        self.references += report.references;
        self.requests += report.stats.requests();
        self.unresolved += report.stats.unresolved;
        self.links += report.rewrite.links_decorated;
        self.mentions += report.rewrite.mentions_linked;
        self.citations += report.rewrite.citations_linked;
        self.demoted += report.rewrite.citations_demoted;
    }
}

async fn cmd_enrich(files: &[PathBuf], args: EnrichArgs) -> Result<()> {
    let app = load_config()?;
    let mut config = EnrichConfig::resolve(&app)?;
    if let Some(path) = args.cache_file {
        config.cache_file = Some(path);
    }
    if args.no_cache {
        config.cache_file = None;
    }
    if config.token.is_none() {
        warn!(
            token_env = %app.github.token_env,
            "no GitHub token set; using unauthenticated REST lookups"
        );
    }

    let cache = Arc::new(ResolutionCache::with_path(config.cache_file.clone()));
    let enricher = LinkEnricher::from_config(&config, cache, args.cite_keys)?;

    if let Some(dir) = &args.out_dir {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| eyre!("cannot create output directory '{}': {e}", dir.display()))?;
    }

    let bar = ProgressBar::new(files.len() as u64);
    bar.set_style(ProgressStyle::with_template(
        "{spinner:.cyan} [{bar:30.cyan/blue}] {pos}/{len} {msg}",
    )?);

    let mut totals = Totals::default();
    for file in files {
        bar.set_message(file.display().to_string());
        let mut root = read_tree(file).await?;

        let mut report = enricher.enrich(&mut root).await;
        settle_citation_warnings(file, &mut report.rewrite.suppressions);
        totals.add(&report);

        let dest = output_path(file, args.out_dir.as_deref())?;
        let json = serde_json::to_string_pretty(&root)?;
        tokio::fs::write(&dest, format!("{json}\n"))
            .await
            .map_err(|e| eyre!("cannot write '{}': {e}", dest.display()))?;
        bar.inc(1);
    }
    bar.finish_and_clear();

    println!();
    println!("  Enrichment complete");
    println!("  Documents:   {}", totals.documents);
    println!("  References:  {}", totals.references);
    println!("  Requests:    {}", totals.requests);
    println!("  Links:       {}", totals.links);
    println!("  Mentions:    {}", totals.mentions);
    println!("  Citations:   {} linked, {} demoted", totals.citations, totals.demoted);
    println!("  Unresolved:  {}", totals.unresolved);
    println!();
    Ok(())
}

/// Act as the warning sink for demoted citations: every demotion silences the
/// "unresolved citation" warning for its label once, and is logged instead.
/// Returns the number of warnings consumed.
fn settle_citation_warnings(file: &Path, suppressions: &mut WarningSuppressions) -> usize {
    let labels: Vec<String> = suppressions.labels().map(str::to_string).collect();
    let mut settled = 0;
    for label in labels {
        let mut count = 0;
        while suppressions.take(&label) {
            count += 1;
        }
        info!(
            file = %file.display(),
            label = %label,
            count,
            "demoted citation to plain text, unresolved-citation warning suppressed"
        );
        settled += count;
    }
    settled
}

async fn read_tree(file: &Path) -> Result<Node> {
    let raw = tokio::fs::read_to_string(file)
        .await
        .map_err(|e| eyre!("cannot read '{}': {e}", file.display()))?;
    serde_json::from_str(&raw).map_err(|e| eyre!("invalid JSON tree in '{}': {e}", file.display()))
}

fn output_path(file: &Path, out_dir: Option<&Path>) -> Result<PathBuf> {
    match out_dir {
        None => Ok(file.to_path_buf()),
        Some(dir) => {
            let name = file
                .file_name()
                .ok_or_else(|| eyre!("'{}' has no file name", file.display()))?;
            Ok(dir.join(name))
        }
    }
}

// ---------------------------------------------------------------------------
// scan
// ---------------------------------------------------------------------------

async fn cmd_scan(file: &Path, cite_keys: HashSet<String>) -> Result<()> {
    let app = load_config()?;
    let scanner = Scanner::new(&ScanOptions {
        web_url: app.github.web_url.clone(),
        known_citations: cite_keys,
    })?;
    let root = read_tree(file).await?;
    let scan = scanner.scan(&root);

    for m in &scan.matches {
        let at = format_path(&m.path);
        match &m.kind {
            MatchKind::IssueLink(identity) => println!("{at}\tissue\t{identity}"),
            MatchKind::Mentions(spans) => {
                for span in spans {
                    println!("{at}\tmention\t{}", span.identity);
                }
            }
            MatchKind::Citation { identity, .. } => println!("{at}\tcite\t{identity}"),
            MatchKind::InvalidCitation { label } => println!("{at}\tcite\t@{label} (not a handle)"),
        }
    }
    println!();
    println!(
        "  {} references, {} unique",
        scan.occurrences(),
        scan.identities().len()
    );
    Ok(())
}

fn format_path(path: &[usize]) -> String {
    let parts: Vec<String> = path.iter().map(usize::to_string).collect();
    format!("/{}", parts.join("/"))
}

// ---------------------------------------------------------------------------
// config
// ---------------------------------------------------------------------------

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");

    let resolved = EnrichConfig::resolve(&config)?;
    let cache = resolved
        .cache_file
        .as_deref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "(memory only)".into());
    println!("# resolved");
    println!("cache_file = {cache:?}");
    println!("api_url = {:?}", resolved.api_url);
    println!(
        "token = {:?}",
        if resolved.token.is_some() { "set" } else { "unset" }
    );
    Ok(())
}
