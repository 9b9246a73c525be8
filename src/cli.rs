use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Import a batch of books from a JSON Lines file.
    Import(ImportArgs),
    /// Reconcile a single book observation.
    Upsert(UpsertArgs),
    /// Apply an inbound status webhook payload.
    Webhook(WebhookArgs),
    /// Recompute a series from one book's status.
    Cascade(CascadeArgs),
}

#[derive(Debug, Args)]
pub struct ImportArgs {
    /// Input path to a JSON Lines file of import rows.
    #[arg(long)]
    pub file: String,
}

#[derive(Debug, Args)]
pub struct UpsertArgs {
    /// Stable item identifier (ASIN).
    #[arg(long)]
    pub asin: String,

    /// Book title.
    #[arg(long)]
    pub title: String,

    /// Author name.
    #[arg(long)]
    pub author: String,

    /// Series name; omit for standalone books.
    #[arg(long)]
    pub series: Option<String>,

    /// Position within the series.
    #[arg(long)]
    pub series_order: Option<u32>,

    /// Initial status (e.g. "not started", "finished").
    #[arg(long)]
    pub status: Option<String>,

    /// Acquisition source recorded on the page.
    #[arg(long)]
    pub source: Option<String>,

    /// Purchase date (YYYY-MM-DD).
    #[arg(long)]
    pub purchased_at: Option<chrono::NaiveDate>,
}

#[derive(Debug, Args)]
pub struct WebhookArgs {
    /// Path to the raw payload JSON, or '-' for stdin.
    #[arg(long)]
    pub payload: String,

    /// Status applied when the payload does not carry one.
    #[arg(long, default_value = "finished")]
    pub default_status: String,
}

#[derive(Debug, Args)]
pub struct CascadeArgs {
    /// Item identifier of the triggering book.
    #[arg(long)]
    pub asin: Option<String>,

    /// Series key, when known up front.
    #[arg(long)]
    pub series_key: Option<String>,

    /// New status of the triggering book.
    #[arg(long)]
    pub status: String,
}
