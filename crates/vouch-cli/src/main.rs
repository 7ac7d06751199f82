//! `vouch`: run invoices through the decision pipeline and manage the
//! proposal queue from the command line.
//!
//! The catalog lives in a YAML file (`--catalog`). Commands that change
//! state only write it back when `--save` is given.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use vouch_core::eval::{EvalCase, EvalReport};
use vouch_core::{Decision, ProposalStatus};
use vouch_runtime::prompts::JUDGE_SYSTEM_PROMPT;
use vouch_runtime::providers::ProviderRegistry;
use vouch_runtime::{
    BootstrapJob, CatalogStore, ErrorResponse, FeedbackRequest, InMemoryCatalogStore, JobContext,
    Pipeline, PipelineConfig, RelearnJob, ResilientCompletion, SafetyScanJob, TextCompletionPort,
};

#[derive(Parser)]
#[command(name = "vouch", version, about = "Invoice line-item decision pipeline")]
struct Cli {
    /// Catalog YAML (items, synonyms, bands, rules, proposals, ...)
    #[arg(long, global = true, value_name = "PATH")]
    catalog: Option<PathBuf>,

    /// Pipeline config YAML; environment variables are used when absent
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Write the catalog back to --catalog after the command
    #[arg(long, global = true)]
    save: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decide an invoice request (JSON file, or - for stdin)
    Run {
        #[arg(value_name = "REQUEST")]
        input: PathBuf,
    },

    /// Record reviewer feedback, optionally approving a proposal
    Feedback {
        #[arg(long)]
        invoice: String,
        #[arg(long)]
        line_item: Option<String>,
        #[arg(long, value_parser = parse_decision)]
        decision: Decision,
        #[arg(long)]
        reason: Option<String>,
        #[arg(long = "by")]
        by_user: String,
        /// Proposal to approve along with the feedback
        #[arg(long, value_name = "PROPOSAL_ID")]
        approve: Option<String>,
    },

    /// Approve a pending proposal
    Approve {
        proposal_id: String,
        #[arg(long = "by")]
        approved_by: String,
    },

    /// List proposals
    Proposals {
        #[arg(long, value_enum)]
        status: Option<StatusArg>,
    },

    /// Propose price bands from recent observations
    Relearn,

    /// Seed price bands from historical observations
    Bootstrap,

    /// Scan the catalog for broken bands, orphans and rule conflicts
    SafetyScan,

    /// Rank catalog items for a free-text description
    Suggest {
        query: String,
        #[arg(short, long, default_value_t = 5)]
        k: usize,
    },

    /// Score labelled predictions (YAML or JSON list of cases)
    Eval {
        #[arg(value_name = "CASES")]
        cases: PathBuf,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum StatusArg {
    Pending,
    Approved,
}

impl From<StatusArg> for ProposalStatus {
    fn from(status: StatusArg) -> Self {
        match status {
            StatusArg::Pending => ProposalStatus::Pending,
            StatusArg::Approved => ProposalStatus::Approved,
        }
    }
}

fn parse_decision(value: &str) -> std::result::Result<Decision, String> {
    Decision::parse(value).ok_or_else(|| {
        format!(
            "unknown decision '{}', expected ALLOW, DENY or NEEDS_MORE_INFO",
            value
        )
    })
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match execute(cli).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, "command failed");
            print_json(&ErrorResponse::new(format!("{:#}", e), None));
            ExitCode::FAILURE
        }
    }
}

async fn execute(cli: Cli) -> Result<ExitCode> {
    let config = match &cli.config {
        Some(path) => PipelineConfig::from_yaml_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => PipelineConfig::from_env().context("reading configuration from environment")?,
    };

    let store = Arc::new(match &cli.catalog {
        Some(path) => InMemoryCatalogStore::from_yaml_file(path)
            .with_context(|| format!("loading catalog {}", path.display()))?,
        None => InMemoryCatalogStore::new(),
    });

    let mut builder = Pipeline::builder()
        .config(config.clone())
        .store(store.clone() as Arc<dyn CatalogStore>);
    if let Some(completion) = judge_completion(&config) {
        builder = builder.completion(completion);
    }
    let pipeline = builder.build()?;

    let code = match cli.command {
        Commands::Run { input } => {
            let request = read_input(&input)?;
            match pipeline.run_json(&request).await {
                Ok(result) => {
                    print_json(&result);
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    let invoice_id = serde_json::from_str::<serde_json::Value>(&request)
                        .ok()
                        .and_then(|v| v["invoice_id"].as_str().map(str::to_string));
                    print_json(&ErrorResponse::new(&e, invoice_id.as_deref()));
                    ExitCode::FAILURE
                }
            }
        }
        Commands::Feedback {
            invoice,
            line_item,
            decision,
            reason,
            by_user,
            approve,
        } => {
            let response = pipeline
                .proposals()
                .record_feedback(FeedbackRequest {
                    invoice_id: invoice,
                    line_item_id: line_item,
                    decision,
                    reason,
                    by_user,
                    approve_proposal_id: approve,
                })
                .await?;
            print_json(&response);
            ExitCode::SUCCESS
        }
        Commands::Approve {
            proposal_id,
            approved_by,
        } => {
            let response = pipeline.proposals().approve(&proposal_id, &approved_by).await?;
            print_json(&response);
            ExitCode::SUCCESS
        }
        Commands::Proposals { status } => {
            let proposals = pipeline.proposals().list(status.map(Into::into)).await?;
            print_json(&proposals);
            ExitCode::SUCCESS
        }
        Commands::Relearn => {
            let report = RelearnJob::new(JobContext::from_pipeline(&pipeline)).run().await?;
            print_json(&report);
            ExitCode::SUCCESS
        }
        Commands::Bootstrap => {
            let report = BootstrapJob::new(JobContext::from_pipeline(&pipeline)).run().await?;
            print_json(&report);
            ExitCode::SUCCESS
        }
        Commands::SafetyScan => {
            let report = SafetyScanJob::new(JobContext::from_pipeline(&pipeline)).run().await?;
            print_json(&report);
            ExitCode::SUCCESS
        }
        Commands::Suggest { query, k } => {
            print_json(&pipeline.suggest(&query, k).await?);
            ExitCode::SUCCESS
        }
        Commands::Eval { cases } => {
            let content = std::fs::read_to_string(&cases)
                .with_context(|| format!("reading {}", cases.display()))?;
            let cases: Vec<EvalCase> = serde_yaml::from_str(&content)
                .with_context(|| format!("parsing {}", cases.display()))?;
            print_json(&EvalReport::from_cases(&cases));
            ExitCode::SUCCESS
        }
    };

    if cli.save {
        let path = cli
            .catalog
            .as_deref()
            .context("--save needs --catalog")?;
        store
            .save_yaml_file(path)
            .with_context(|| format!("saving catalog {}", path.display()))?;
        tracing::info!(path = %path.display(), "catalog saved");
    }

    Ok(code)
}

/// LLM for the explanation judge, if the mode wants one and a provider
/// can be built. Anything missing degrades to heuristic scoring.
fn judge_completion(config: &PipelineConfig) -> Option<Arc<dyn TextCompletionPort>> {
    if !config.judge.enabled || !config.judge.mode.uses_llm() {
        return None;
    }

    let registry = ProviderRegistry::with_defaults();
    let provider_config = serde_json::json!({});
    let provider = registry
        .validate(&config.llm.provider, &provider_config)
        .and_then(|_| registry.create(&config.llm.provider, &provider_config));

    match provider {
        Ok(provider) => Some(Arc::new(
            ResilientCompletion::new(provider, config.llm.clone()).with_system_prompt(JUDGE_SYSTEM_PROMPT),
        )),
        Err(e) => {
            tracing::warn!(
                provider = %config.llm.provider,
                error = %e,
                "LLM judge unavailable, scoring explanations heuristically"
            );
            None
        }
    }
}

fn read_input(path: &Path) -> Result<String> {
    if path.as_os_str() == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("reading request from stdin")?;
        Ok(buf)
    } else {
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
    }
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => tracing::error!(error = %e, "failed to serialize output"),
    }
}
