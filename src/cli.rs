use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

#[derive(Debug, Parser)]
#[command(
    name = "faqmatch",
    about = "Answer questions from a FAQ corpus with hybrid retrieval"
)]
pub struct Cli {
    /// Override the XDG data directory
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// JSON configuration file (defaults to <data-dir>/config.json)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Increase log verbosity (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Build the index from a corpus file and save it
    Index(IndexArgs),
    /// Find answers with hybrid retrieval and relevance filtering
    Search(SearchArgs),
    /// Vector-only similarity search over the questions
    Similar(SimilarArgs),
    /// List indexed entries by category
    List(ListArgs),
    /// Show the data directory and saved index
    Status(StatusArgs),
    /// Generate shell completions
    #[command(hide = true)]
    Completions(CompletionsArgs),
}

// -- Index --

#[derive(Debug, Parser)]
pub struct IndexArgs {
    /// CSV or TSV file with question and answer columns
    pub corpus: PathBuf,
}

// -- Search --

#[derive(Debug, Parser)]
pub struct SearchArgs {
    /// The question to answer
    pub query: String,

    /// Number of results to return (defaults to the configured top_k)
    #[arg(short = 'n', long)]
    pub count: Option<usize>,

    /// Minimum combined score (defaults to the configured threshold)
    #[arg(long)]
    pub threshold: Option<f32>,

    /// Output results as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Similar --

#[derive(Debug, Parser)]
pub struct SimilarArgs {
    /// The query text
    pub query: String,

    /// Number of results to return
    #[arg(short = 'n', long, default_value = "5")]
    pub count: usize,

    /// Output results as JSON
    #[arg(long)]
    pub json: bool,
}

// -- List --

#[derive(Debug, Parser)]
pub struct ListArgs {
    /// Only list entries in this category
    #[arg(long)]
    pub category: Option<String>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Status --

#[derive(Debug, Parser)]
pub struct StatusArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Completions --

#[derive(Debug, Parser)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,
}

impl CompletionsArgs {
    /// Generate shell completions and print to stdout.
    pub fn generate(&self) {
        let mut cmd = Cli::command();
        clap_complete::generate(
            self.shell,
            &mut cmd,
            "faqmatch",
            &mut std::io::stdout(),
        );
    }
}
