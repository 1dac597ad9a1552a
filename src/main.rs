use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use secrecy::SecretString;
use tokio_util::sync::CancellationToken;
use tracing::{info, Instrument};
use uuid::Uuid;

use gradebatch::batch::RunReport;
use gradebatch::commands::{self, CategorySource, ContextSource, JoinSource, RunRequest};
use gradebatch::config::{
    RunConfig, RunMode, ServiceSettings, UnresolvedPolicy, DEFAULT_PAGE_SIZE,
    DEFAULT_REQUEST_TIMEOUT_SECS,
};
use gradebatch::dataset::parse_rule;
use gradebatch::logging::init_tracing;
use gradebatch::text_service::HttpConnector;
use gradebatch::AppError;

#[derive(Parser)]
#[command(author, version, about = "Paginated, resumable batch prompting over a CSV", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send every row to the text service, checkpointing page by page
    Run(RunArgs),

    /// Check an input CSV without contacting the service
    Validate {
        #[arg(long)]
        input: PathBuf,

        /// Columns that must be present
        #[arg(long = "require", value_delimiter = ',')]
        required: Vec<String>,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Input CSV
    #[arg(long)]
    input: PathBuf,

    /// Directory for checkpoints and the final output
    #[arg(long)]
    output_dir: PathBuf,

    /// Prompt template file with {Column Name} placeholders
    #[arg(long)]
    template: PathBuf,

    #[arg(long, default_value = "Index")]
    key_column: String,

    #[arg(long, default_value = "Response")]
    result_column: String,

    /// File name prefix distinguishing runs that share an output directory
    #[arg(long, default_value = "labels")]
    mode_prefix: String,

    #[arg(long, default_value_t = DEFAULT_PAGE_SIZE)]
    page_size: usize,

    /// Pages below this index are not processed
    #[arg(long, default_value_t = 0)]
    starting_page: usize,

    /// Delay after each request
    #[arg(long, default_value_t = 500)]
    pacing_ms: u64,

    /// Wait after capacity exhaustion before the single retry
    #[arg(long, default_value_t = 4000)]
    cooldown_secs: u64,

    /// Only send rows where COLUMN equals VALUE; others are skipped
    #[arg(long, value_name = "COLUMN=VALUE")]
    only_when: Option<String>,

    /// Two-column text,category CSV used to derive a category column
    #[arg(long, requires = "category_source_column")]
    category_table: Option<PathBuf>,

    /// Column whose text is looked up in the category table
    #[arg(long, requires = "category_table")]
    category_source_column: Option<String>,

    /// Name of the derived category column
    #[arg(long, default_value = "Category")]
    category_column: String,

    /// CSV whose other columns are joined onto each row by --join-on
    #[arg(long, requires = "join_on")]
    join_table: Option<PathBuf>,

    /// Key column shared by the join table and the input (or the category column)
    #[arg(long, requires = "join_table")]
    join_on: Option<String>,

    /// CSV rendered in full into the --context-placeholder placeholder
    #[arg(long)]
    context_table: Option<PathBuf>,

    #[arg(long, default_value = "Context")]
    context_placeholder: String,

    /// Drop records still unresolved after the leftover pass instead of failing
    #[arg(long)]
    allow_unresolved: bool,

    #[arg(long, env = "GRADEBATCH_BASE_URL", default_value = "https://api.openai.com")]
    base_url: String,

    #[arg(long, env = "GRADEBATCH_MODEL", default_value = "gpt-4o-mini")]
    model: String,

    #[arg(long, env = "GRADEBATCH_API_KEY", hide_env_values = true)]
    api_key: String,

    #[arg(long, default_value_t = DEFAULT_REQUEST_TIMEOUT_SECS)]
    timeout_secs: u64,
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run(args) => run(args).await,
        Commands::Validate { input, required } => validate(input, required).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let presentation = e.to_presentation();
            eprintln!("{}: {}", presentation.title, presentation.message);
            if let Some(action) = presentation.action {
                eprintln!("  -> {}", action);
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(args: RunArgs) -> Result<(), AppError> {
    let mode = RunMode::new(&args.mode_prefix)?;
    let policy = if args.allow_unresolved {
        UnresolvedPolicy::Drop
    } else {
        UnresolvedPolicy::Fail
    };
    let config = RunConfig::new(&args.output_dir, mode)
        .page_size(args.page_size)
        .starting_page(args.starting_page)
        .pacing(Duration::from_millis(args.pacing_ms))
        .cooldown(Duration::from_secs(args.cooldown_secs))
        .key_column(&args.key_column)
        .result_column(&args.result_column)
        .unresolved_policy(policy);

    let only_when = args.only_when.as_deref().map(parse_rule).transpose()?;
    let category = match (args.category_table, args.category_source_column) {
        (Some(table_path), Some(source_column)) => Some(CategorySource {
            table_path,
            source_column,
            target_column: args.category_column,
        }),
        _ => None,
    };
    let join = match (args.join_table, args.join_on) {
        (Some(table_path), Some(on_column)) => Some(JoinSource {
            table_path,
            on_column,
        }),
        _ => None,
    };
    let context = args.context_table.map(|table_path| ContextSource {
        table_path,
        placeholder: args.context_placeholder,
    });

    let request = RunRequest {
        input: args.input,
        template: commands::load_template(&args.template).await?,
        config,
        only_when,
        category,
        join,
        context,
    };

    let settings = ServiceSettings {
        base_url: args.base_url,
        model: args.model,
        api_key: SecretString::from(args.api_key),
        timeout_secs: args.timeout_secs,
    };
    let connector = Arc::new(HttpConnector::new(settings));

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, stopping after the current page");
            on_signal.cancel();
        }
    });

    let run_id = Uuid::new_v4();
    let span = tracing::info_span!("run", id = %run_id);
    let report = commands::run_batch(request, connector, cancel)
        .instrument(span)
        .await?;

    print_report(&report);
    Ok(())
}

async fn validate(input: PathBuf, required: Vec<String>) -> Result<(), AppError> {
    let required: Vec<&str> = required.iter().map(String::as_str).collect();
    let validation = commands::validate_input(&input, &required).await?;
    println!(
        "OK: {} columns, {} rows sampled",
        validation.headers.len(),
        validation.sampled_rows
    );
    Ok(())
}

fn print_report(report: &RunReport) {
    let sweep = &report.sweep;
    let output = &report.output;
    println!(
        "Pages: {} processed, {} resumed, {} before start, {} retried (of {})",
        sweep.pages_processed,
        sweep.pages_resumed,
        sweep.pages_before_start,
        sweep.retries,
        sweep.pages_total
    );
    println!(
        "Leftover pass: {} attempted, {} recovered",
        output.leftover_attempted, output.recovered
    );
    println!("Final output: {} ({} rows)", output.path.display(), output.rows);
    if let Some(report_path) = &output.unresolved_report {
        println!(
            "Dropped {} unresolved records, listed in {}",
            output.unresolved.len(),
            report_path.display()
        );
    }
}
