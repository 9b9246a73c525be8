use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use clap::Parser as _;

use shelfsync::cli::{CascadeArgs, Cli, Command, ImportArgs, UpsertArgs, WebhookArgs};
use shelfsync::config::Config;
use shelfsync::directory::HttpDirectory;
use shelfsync::metadata::HintResolver;
use shelfsync::model::{CascadeInput, ImportRow};
use shelfsync::status::BookStatus;
use shelfsync::store::{LocalFsBookStore, LocalFsSeriesStore};
use shelfsync::workflow::{Workflow, load_import_rows};

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(err) = try_main().await {
        eprintln!("{err:#}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

async fn try_main() -> anyhow::Result<()> {
    shelfsync::logging::init().context("init logging")?;

    let cli = Cli::parse();
    tracing::debug!(?cli, "parsed cli");

    let config = Config::from_env().context("load config")?;
    let workflow = build_workflow(&config).context("build workflow")?;

    match cli.command {
        Command::Import(args) => run_import(&workflow, args).await.context("import")?,
        Command::Upsert(args) => run_upsert(&workflow, args).await.context("upsert")?,
        Command::Webhook(args) => run_webhook(&workflow, args).await.context("webhook")?,
        Command::Cascade(args) => run_cascade(&workflow, args).await.context("cascade")?,
    }

    Ok(())
}

fn build_workflow(config: &Config) -> anyhow::Result<Workflow> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .context("build http client")?;
    let directory = Arc::new(HttpDirectory::new(
        client,
        &config.directory_base_url,
        config.directory_token.clone(),
    ));

    let books = Arc::new(LocalFsBookStore::new(&config.data_dir));
    let series = Arc::new(LocalFsSeriesStore::new(&config.data_dir));

    Ok(Workflow::new(
        books,
        series,
        directory,
        Arc::new(HintResolver),
        config.books_database_id.clone(),
        config.series_database_id.clone(),
    ))
}

async fn run_import(workflow: &Workflow, args: ImportArgs) -> anyhow::Result<()> {
    let rows = load_import_rows(&args.file).await.context("load import rows")?;
    let summary = workflow.import_batch(&rows).await;

    println!("imported {} row(s), {} failed", summary.imported, summary.failed);
    anyhow::ensure!(summary.failed == 0, "{} import row(s) failed", summary.failed);
    Ok(())
}

async fn run_upsert(workflow: &Workflow, args: UpsertArgs) -> anyhow::Result<()> {
    let status_default = args.status.as_deref().map(parse_status).transpose()?;
    let row = ImportRow {
        title: args.title,
        author: args.author,
        asin: args.asin,
        purchased_at: args.purchased_at,
        status_default,
        source: args.source,
        series_name_hint: args.series,
        series_sequence_hint: args.series_order,
    };

    let outcome = workflow.import_row(&row).await?;
    println!("{} -> {} ({})", outcome.asin, outcome.page_id, outcome.status);
    Ok(())
}

async fn run_webhook(workflow: &Workflow, args: WebhookArgs) -> anyhow::Result<()> {
    let default_status = parse_status(&args.default_status)?;

    let raw = if args.payload == "-" {
        let mut buffer = String::new();
        std::io::Read::read_to_string(&mut std::io::stdin(), &mut buffer)
            .context("read payload from stdin")?;
        buffer
    } else {
        tokio::fs::read_to_string(&args.payload)
            .await
            .with_context(|| format!("read payload file: {}", args.payload))?
    };

    let payload: serde_json::Value = serde_json::from_str(&raw).unwrap_or(serde_json::Value::Null);
    let outcome = workflow.handle_status_event(&payload, default_status).await?;

    match outcome.cascade {
        Some(cascade) => println!(
            "{}: applied={} series status {} ({} book(s) updated)",
            outcome.asin, outcome.applied, cascade.series_status, cascade.updated_books
        ),
        None => println!("{}: unknown book, skipped", outcome.asin),
    }
    Ok(())
}

async fn run_cascade(workflow: &Workflow, args: CascadeArgs) -> anyhow::Result<()> {
    let status = parse_status(&args.status)?;

    let outcome = workflow
        .run_cascade(&CascadeInput {
            asin: args.asin,
            series_key: args.series_key,
            status,
            series_match: None,
        })
        .await?;

    println!(
        "series status {} ({} book(s) updated)",
        outcome.series_status, outcome.updated_books
    );
    Ok(())
}

fn parse_status(raw: &str) -> anyhow::Result<BookStatus> {
    BookStatus::parse(raw).ok_or_else(|| anyhow::anyhow!("unknown status: {raw}"))
}
