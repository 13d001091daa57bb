//! # gymcraft CLI
//!
//! Command-line interface for the environments and the policy agent.
//!
//! Usage:
//!   gymcraft random --env maze --episodes 3 --render
//!   gymcraft run <policy.json> --env grid
//!   gymcraft control --provider deepseek --episodes 50 --reward-log rewards.jsonl
//!   gymcraft schema
//!
//! API keys are read from the environment (or a `.env` file):
//! `OPENAI_API_KEY`, `AZURE_ENDPOINT` + `AZURE_API_KEY` + `AZURE_DEPLOYMENT`,
//! `DEEPSEEK_API_KEY`, `HF_TOKEN`, `LOCAL_BASE_URL` + `LOCAL_MODEL`.

use clap::{Args, Parser, Subcommand, ValueEnum};
use gymcraft_agent::{
    AgentConfig, Controller, EpisodeReport, PolicyAgent, ProgramController, RandomController,
    RewardLog, Trainer,
};
use gymcraft_env::{Environment, GridConfig, GridWorld, MazeConfig, SimpleMaze, TerminalRenderer};
use gymcraft_vm::{
    Error, ExecutionLimits, OpenAIProvider, PolicyModule, PolicySchema, ProviderConfig,
    ProviderType, Result, DEFAULT_ENTRY,
};
use ratatui::backend::CrosstermBackend;
use std::io::Stdout;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "gymcraft")]
#[command(author, version, about = "gymcraft - LLM-written policies for small grid environments")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log every step and every policy LOG instruction
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Play episodes with uniformly random actions
    Random {
        #[command(flatten)]
        env: EnvArgs,
    },
    /// Run a policy module from a JSON file
    Run {
        /// Path to the policy module
        #[arg(required = true)]
        file: PathBuf,

        /// Function called with [observation, memory]
        #[arg(long, default_value = DEFAULT_ENTRY)]
        entry: String,

        /// Instruction budget per invocation
        #[arg(long, default_value = "10000")]
        max_instructions: usize,

        #[command(flatten)]
        env: EnvArgs,
    },
    /// Let a language model write, repair and refine the policy
    Control {
        #[command(flatten)]
        env: EnvArgs,

        #[command(flatten)]
        llm: LlmArgs,
    },
    /// Show the policy language reference sent to the model
    Schema {
        /// Print the machine-readable form instead
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum EnvKind {
    Grid,
    Maze,
}

#[derive(Args, Debug, Clone)]
struct EnvArgs {
    /// Environment to play
    #[arg(long, value_enum, default_value_t = EnvKind::Grid)]
    env: EnvKind,

    /// Grid side length (grid default 5, maze default 10)
    #[arg(long)]
    size: Option<usize>,

    /// Steps before the episode ends (grid default 50, maze default 100)
    #[arg(long)]
    max_steps: Option<usize>,

    /// Maze walls toggle after every step
    #[arg(long)]
    dynamic: bool,

    #[arg(long)]
    seed: Option<u64>,

    #[arg(long, default_value = "50")]
    episodes: usize,

    /// Draw every frame to the terminal (q or Esc stops drawing)
    #[arg(long)]
    render: bool,

    /// Pause between rendered frames, in milliseconds
    #[arg(long, default_value = "0")]
    delay_ms: u64,
}

#[derive(Args, Debug, Clone)]
struct LlmArgs {
    /// openai, azure, deepseek, huggingface or local
    #[arg(long, env = "GYMCRAFT_PROVIDER", default_value = "openai")]
    provider: String,

    /// Model override (provider preset when omitted)
    #[arg(long, env = "GYMCRAFT_MODEL")]
    model: Option<String>,

    /// Base URL override for OpenAI-compatible servers
    #[arg(long, env = "GYMCRAFT_BASE_URL")]
    base_url: Option<String>,

    #[arg(long)]
    temperature: Option<f32>,

    /// HTTP timeout per collaborator request, in seconds
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Policy invocations per step before giving up
    #[arg(long, default_value = "5")]
    max_attempts: usize,

    /// Write one JSON line per episode
    #[arg(long)]
    reward_log: Option<PathBuf>,

    /// Print the whole conversation at the end
    #[arg(long)]
    show_conversation: bool,
}

impl EnvArgs {
    fn grid_world(&self) -> Result<GridWorld> {
        let defaults = GridConfig::default();
        let env = GridWorld::new(GridConfig {
            size: self.size.unwrap_or(defaults.size),
            max_steps: self.max_steps.unwrap_or(defaults.max_steps),
            seed: self.seed,
        })?;
        Ok(if self.render { env.with_renderer(self.renderer()?) } else { env })
    }

    fn simple_maze(&self) -> Result<SimpleMaze> {
        let defaults = MazeConfig::default();
        let env = SimpleMaze::new(MazeConfig {
            rows: self.size.unwrap_or(defaults.rows),
            cols: self.size.unwrap_or(defaults.cols),
            dynamic: self.dynamic,
            time_limit: self.max_steps.unwrap_or(defaults.time_limit),
            seed: self.seed,
        })?;
        Ok(if self.render { env.with_renderer(self.renderer()?) } else { env })
    }

    fn renderer(&self) -> Result<TerminalRenderer<CrosstermBackend<Stdout>>> {
        Ok(TerminalRenderer::stdout()?.with_delay(Duration::from_millis(self.delay_ms)))
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "gymcraft=debug" } else { "gymcraft=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

fn print_summary(reports: &[EpisodeReport]) {
    if reports.is_empty() {
        return;
    }
    println!("\n--- SUMMARY ---\n");
    for report in reports {
        println!(
            "  episode {:>3}  steps {:>4}  reward {:>8.3}  {}",
            report.episode,
            report.steps,
            report.total_reward,
            if report.terminated { "terminated" } else { "truncated" }
        );
    }
    let mean = reports.iter().map(|r| r.total_reward).sum::<f64>() / reports.len() as f64;
    println!("\n  mean reward over {} episodes: {:.3}", reports.len(), mean);
}

async fn train<E, C>(env: &mut E, controller: &mut C, args: &EnvArgs, log: Option<RewardLog>) -> Result<Vec<EpisodeReport>>
where
    E: Environment,
    C: Controller,
{
    let mut trainer = Trainer::new(args.episodes).with_render(args.render);
    if let Some(log) = log {
        trainer = trainer.with_reward_log(log);
    }
    let result = trainer.run(env, controller).await;
    env.close();
    result
}

async fn play_random<E: Environment>(mut env: E, args: &EnvArgs) -> Result<()> {
    let mut controller = RandomController::new(env.action_count(), args.seed);
    let reports = train(&mut env, &mut controller, args, None).await?;
    print_summary(&reports);
    Ok(())
}

async fn play_program<E: Environment>(
    mut env: E,
    args: &EnvArgs,
    source: &str,
    entry: &str,
    limits: ExecutionLimits,
) -> Result<()> {
    let mut controller =
        ProgramController::from_source(source, entry, env.action_count(), args.seed)?.with_limits(limits);
    let reports = train(&mut env, &mut controller, args, None).await?;
    print_summary(&reports);
    Ok(())
}

async fn play_llm<E: Environment>(mut env: E, args: &EnvArgs, llm: &LlmArgs) -> Result<()> {
    let provider_type: ProviderType = llm.provider.parse()?;
    let mut provider_config = ProviderConfig::from_env(provider_type)?;
    if let Some(model) = &llm.model {
        provider_config = provider_config.with_model(model.as_str());
    }
    if let Some(base_url) = &llm.base_url {
        provider_config = provider_config.with_base_url(base_url.as_str());
    }
    if let Some(secs) = llm.timeout_secs {
        provider_config = provider_config.with_timeout(secs);
    }
    let provider = OpenAIProvider::new(provider_config)?;

    let config = AgentConfig {
        max_attempts: llm.max_attempts,
        temperature: llm.temperature,
        seed: args.seed,
        action_count: env.action_count(),
        ..Default::default()
    };

    let log = match &llm.reward_log {
        Some(path) => Some(RewardLog::create(path)?),
        None => None,
    };

    tracing::info!(provider = %provider_type, env = env.name(), episodes = args.episodes, "requesting initial policy");
    let mut agent = PolicyAgent::connect(provider, config, &env.describe()).await?;
    let result = train(&mut env, &mut agent, args, log).await;

    if llm.show_conversation {
        for message in agent.messages() {
            message.pretty_print();
        }
    }
    tracing::info!(
        requests = agent.requests(),
        total_tokens = agent.usage().total_tokens(),
        "collaborator usage"
    );

    let reports = result?;
    print_summary(&reports);
    Ok(())
}

async fn run_policy_file(file: &PathBuf, entry: &str, max_instructions: usize, args: &EnvArgs) -> Result<()> {
    let source = std::fs::read_to_string(file).map_err(|e| {
        Error::from(e)
            .with_operation("cli::run")
            .with_context("path", file.display().to_string())
    })?;

    if let Ok(module) = PolicyModule::parse(&source) {
        tracing::debug!("policy module:\n{}", module.listing());
    }

    let limits = ExecutionLimits {
        max_instructions,
        ..Default::default()
    };
    match args.env {
        EnvKind::Grid => play_program(args.grid_world()?, args, &source, entry, limits).await,
        EnvKind::Maze => play_program(args.simple_maze()?, args, &source, entry, limits).await,
    }
}

fn show_schema(json: bool) {
    let schema = PolicySchema::default();
    if json {
        println!("{}", schema.to_json());
    } else {
        println!("{}", schema.to_prompt());
    }
}

async fn dispatch(command: Commands) -> Result<()> {
    match command {
        Commands::Random { env } => match env.env {
            EnvKind::Grid => play_random(env.grid_world()?, &env).await,
            EnvKind::Maze => play_random(env.simple_maze()?, &env).await,
        },
        Commands::Run { file, entry, max_instructions, env } => {
            run_policy_file(&file, &entry, max_instructions, &env).await
        }
        Commands::Control { env, llm } => match env.env {
            EnvKind::Grid => play_llm(env.grid_world()?, &env, &llm).await,
            EnvKind::Maze => play_llm(env.simple_maze()?, &env, &llm).await,
        },
        Commands::Schema { json } => {
            show_schema(json);
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = dispatch(cli.command).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
