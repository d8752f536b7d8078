use clap::{Parser, Subcommand};
use std::process::ExitCode;
use tokio::runtime::Runtime;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use chainsift::cli::commands::{self, discover::DiscoverArgs, resolve::ResolveArgs};

#[derive(Parser)]
#[command(name = "chainsift")]
#[command(
    version,
    about = "Cost-aware LLM fallback chains and crawl orchestration for structured web extraction"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(long, global = true)]
    verbose: bool,

    #[arg(long, short, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve the model chain for a caller
    Resolve {
        #[arg(long, short, default_value = "free", help = "Caller tier")]
        tier: String,
        #[arg(long, default_value = "cli", help = "Caller identity")]
        identity: String,
        #[arg(long, help = "Caller may bring their own keys")]
        byok: bool,
        #[arg(long = "custom-models", help = "Caller may use their own model chain")]
        custom_models: bool,
        #[arg(
            short = 'f',
            long,
            default_value = "text",
            help = "Output format: text, json"
        )]
        format: String,
    },

    /// Estimate the cost of a model call
    Estimate {
        #[arg(long, help = "Provider name")]
        provider: String,
        #[arg(long, help = "Model id")]
        model: String,
        #[arg(long, default_value = "0", help = "Input tokens")]
        input: u64,
        #[arg(long, default_value = "0", help = "Output tokens")]
        output: u64,
    },

    /// Discover crawlable URLs from seed pages
    Discover {
        #[arg(required = true, help = "Seed URLs")]
        seeds: Vec<String>,
        #[arg(long, help = "Maximum link depth")]
        max_depth: Option<u32>,
        #[arg(long, help = "Maximum URLs returned")]
        max_pages: Option<usize>,
        #[arg(long, help = "Regex a link must match")]
        pattern: Option<String>,
        #[arg(long, help = "CSS selector for links")]
        selector: Option<String>,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration (merged from all sources)
    Show {
        #[arg(
            short = 'f',
            long,
            default_value = "toml",
            help = "Output format: toml, json"
        )]
        format: String,
    },
    /// Show configuration file paths
    Path,
}

fn main() -> ExitCode {
    match run_cli() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("\x1b[31mError:\x1b[0m {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run_cli() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match cli.command {
        Commands::Resolve {
            tier,
            identity,
            byok,
            custom_models,
            format,
        } => {
            let rt = Runtime::new()?;
            rt.block_on(commands::resolve::run(ResolveArgs {
                tier,
                identity,
                byok,
                custom_models,
                format,
            }))?;
        }
        Commands::Estimate {
            provider,
            model,
            input,
            output,
        } => {
            let rt = Runtime::new()?;
            rt.block_on(commands::estimate::run(&provider, &model, input, output))?;
        }
        Commands::Discover {
            seeds,
            max_depth,
            max_pages,
            pattern,
            selector,
        } => {
            let rt = Runtime::new()?;
            rt.block_on(commands::discover::run(DiscoverArgs {
                seeds,
                max_depth,
                max_pages,
                pattern,
                selector,
            }))?;
        }
        Commands::Config { action } => match action {
            ConfigAction::Show { format } => commands::config::show(&format)?,
            ConfigAction::Path => commands::config::path()?,
        },
    }

    Ok(())
}
