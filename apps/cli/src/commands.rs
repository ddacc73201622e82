//! CLI command definitions, routing, and tracing setup.

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

use pagewise_core::progress::{
    ANSWER_READY_MESSAGE, EXECUTION_MESSAGE, crawled_message, decision_message,
};
use pagewise_core::{
    Agent, DecisionTag, OpenRouterOracle, ProgressReporter, SessionState, TurnOutcome,
};
use pagewise_crawler::{HttpFetcher, domains_of};
use pagewise_sandbox::Sandbox;
use pagewise_shared::{
    AppConfig, CrawlConfig, SandboxConfig, SessionConfig, init_config, load_config,
};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// Pagewise: ask a website a question.
#[derive(Parser)]
#[command(
    name = "pagewise",
    version,
    about = "Answer questions about a website by crawling it with a language model choosing the links.",
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
    /// Ask a question about a website, then read follow-ups from stdin.
    Ask {
        /// Start URL(s) to crawl first.
        #[arg(required = true)]
        start_urls: Vec<String>,

        /// The first question.
        #[arg(short, long)]
        question: String,

        /// Extra guidance for the assistant (tone, focus, format).
        #[arg(short, long)]
        instruction: Option<String>,

        /// Maximum explore rounds per question.
        #[arg(long)]
        max_iterations: Option<usize>,

        /// Maximum pages crawled per session.
        #[arg(long)]
        max_pages: Option<usize>,

        /// Allow-list entry: a URL prefix or a domain. Repeatable.
        /// Defaults to the start URLs' hosts.
        #[arg(long = "allow")]
        allow: Vec<String>,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
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
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "pagewise=warn",
        1 => "pagewise=info",
        2 => "pagewise=debug",
        _ => "pagewise=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
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
        Command::Ask {
            start_urls,
            question,
            instruction,
            max_iterations,
            max_pages,
            allow,
        } => {
            let overrides = SessionOverrides {
                instruction,
                max_iterations,
                max_pages,
                allow,
            };
            cmd_ask(&start_urls, &question, overrides).await
        }
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show().await,
        },
    }
}

// ---------------------------------------------------------------------------
// ask
// ---------------------------------------------------------------------------

/// Flag values that override the config file.
struct SessionOverrides {
    instruction: Option<String>,
    max_iterations: Option<usize>,
    max_pages: Option<usize>,
    allow: Vec<String>,
}

/// Merge config file values, flag overrides, and the start-URL fallback for
/// an empty allow-list.
fn session_config(config: &AppConfig, start_urls: &[String], overrides: SessionOverrides) -> SessionConfig {
    let mut session = SessionConfig::from(config);

    if let Some(instruction) = overrides.instruction {
        session.instruction = instruction;
    }
    if let Some(n) = overrides.max_iterations {
        session.max_iterations = n;
    }
    if let Some(n) = overrides.max_pages {
        session.max_pages = n;
    }
    if !overrides.allow.is_empty() {
        session.allowed = overrides.allow;
    }
    if session.allowed.is_empty() {
        session.allowed = domains_of(start_urls);
    }

    session
}

async fn cmd_ask(start_urls: &[String], question: &str, overrides: SessionOverrides) -> Result<()> {
    let config = load_config()?;
    let oracle = OpenRouterOracle::from_config(&config)?;

    let session_config = session_config(&config, start_urls, overrides);
    info!(
        start_urls = start_urls.len(),
        allowed = ?session_config.allowed,
        model = oracle.model(),
        "starting session"
    );

    let mut state = SessionState::new(start_urls, session_config)?;
    let agent = Agent::new(
        Arc::new(HttpFetcher::new()?),
        Arc::new(oracle),
        Sandbox::new(SandboxConfig::from(&config)),
        CrawlConfig::from(&config),
    );

    ask_and_print(&agent, &mut state, question).await?;

    println!("Ask a follow-up question (Ctrl-D to quit):");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let follow_up = line.trim();
        if follow_up.is_empty() {
            continue;
        }
        ask_and_print(&agent, &mut state, follow_up).await?;
        println!("Ask a follow-up question (Ctrl-D to quit):");
    }

    Ok(())
}

/// Run one turn with a spinner and print the answer and exploration summary.
async fn ask_and_print(agent: &Agent, state: &mut SessionState, question: &str) -> Result<()> {
    let reporter = CliProgress::new();
    let outcome = agent.run_turn(state, question, &reporter).await;
    reporter.finish();
    let outcome = outcome?;

    println!();
    println!("{}", outcome.answer);
    println!();
    print_summary(state, &outcome);
    Ok(())
}

fn print_summary(state: &SessionState, outcome: &TurnOutcome) {
    let registry = state.registry();
    println!("  Decision:    {}", outcome.decision);
    println!("  Iterations:  {}", outcome.iterations);
    println!("  Visited:     {} page(s)", registry.visited_count());
    println!("  Discovered:  {} URL(s)", registry.len());
    if outcome.used_fallback {
        println!("  Note:        the assistant fell back to answering from the pages it had");
    }
    for index in registry.visited_indices() {
        if let Some(url) = registry.url(index) {
            println!("    [{index}] {url}");
        }
    }
    println!();
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        spinner.set_style(style);
        spinner.set_message("Crawling start pages...");
        spinner.enable_steady_tick(Duration::from_millis(80));
        Self { spinner }
    }

    fn finish(&self) {
        self.spinner.finish_and_clear();
    }
}

impl ProgressReporter for CliProgress {
    fn batch_crawled(&self, urls: &[String]) {
        self.spinner.println(crawled_message(urls));
        self.spinner.set_message("Deciding what to do next...");
    }

    fn decision_made(&self, decision: DecisionTag) {
        self.spinner.println(decision_message(decision));
        let next = match decision {
            DecisionTag::Explore => "Crawling selected pages...",
            DecisionTag::Answer => "Writing the answer...",
            DecisionTag::Execute => "Generating code...",
        };
        self.spinner.set_message(next);
    }

    fn execution_started(&self) {
        self.spinner.set_message(EXECUTION_MESSAGE);
    }

    fn answer_ready(&self) {
        self.spinner.println(ANSWER_READY_MESSAGE);
    }
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
    let toml_str = toml::to_string_pretty(&config).map_err(|e| eyre!("failed to render config: {e}"))?;
    println!("{toml_str}");
    Ok(())
}
