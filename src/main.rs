use std::{path::Path, sync::Arc};

use clap::Parser;
use faqmatch::{
    Categorizer,
    Config,
    DataDir,
    FaqIndex,
    HybridRetriever,
    corpus,
    error::{self, Error},
    search,
};
use tracing_subscriber::EnvFilter;

mod cli;

use cli::{Cli, Command};

fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if let Ok(env) = std::env::var("FAQMATCH_LOG") {
        EnvFilter::new(env)
    } else if quiet {
        EnvFilter::new("warn")
    } else {
        match verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

fn main() -> error::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    if let Command::Completions(args) = &cli.command {
        args.generate();
        return Ok(());
    }

    let data_dir = DataDir::resolve(cli.data_dir.as_deref())?;
    let config = Config::resolve(cli.config.as_deref(), &data_dir)?;
    let index = FaqIndex::for_data_dir(&data_dir, config);

    match cli.command {
        Command::Index(args) => cmd_index(&index, &args.corpus)?,
        Command::Search(args) => {
            let index = Arc::new(load_index(index)?);
            let retriever = HybridRetriever::new(index);
            let results = retriever.try_retrieve(
                &args.query,
                args.count,
                args.threshold,
            )?;
            let ranked = search::rank(results);

            if args.json {
                search::format_json(&ranked, &args.query)?;
            } else {
                search::format_human(&ranked);
            }
        }
        Command::Similar(args) => {
            let index = load_index(index)?;
            let ranked =
                search::rank(index.similarity_search(&args.query, args.count));

            if args.json {
                search::format_json(&ranked, &args.query)?;
            } else {
                search::format_human(&ranked);
            }
        }
        Command::List(args) => {
            cmd_list(load_index(index)?, args.category.as_deref(), args.json)?
        }
        Command::Status(args) => cmd_status(&data_dir, index, args.json)?,
        Command::Completions(_) => {}
    }

    Ok(())
}

fn load_index(index: FaqIndex) -> error::Result<FaqIndex> {
    if index.try_load()? {
        Ok(index)
    } else {
        Err(Error::NotFound {
            kind: "index",
            name: format!(
                "{} (run `faqmatch index <corpus>` first)",
                index.store_file().display()
            ),
        })
    }
}

fn cmd_index(index: &FaqIndex, corpus_path: &Path) -> error::Result<()> {
    let documents = corpus::load_corpus(corpus_path)?;
    let count = index.try_create_index(documents)?;
    index.try_save()?;

    let snapshot = index.snapshot();
    let strategy = snapshot
        .as_ref()
        .map(|s| s.embedder().strategy().to_string())
        .unwrap_or_default();
    println!(
        "Indexed {count} document(s) from {} ({strategy} embeddings)",
        corpus_path.display()
    );
    println!("Saved to {}", index.store_file().display());
    Ok(())
}

fn cmd_list(
    index: FaqIndex,
    category: Option<&str>,
    json: bool,
) -> error::Result<()> {
    let Some(snapshot) = index.snapshot() else {
        return Ok(());
    };
    let categorizer = Categorizer::new(&index.config().keywords.categories);
    let counts = categorizer.counts(snapshot.documents());
    let entries: Vec<_> = snapshot
        .documents()
        .iter()
        .enumerate()
        .map(|(doc_id, doc)| (doc_id, categorizer.categorize(doc), doc))
        .filter(|(_, label, _)| category.is_none_or(|c| c == *label))
        .collect();

    if json {
        let output = serde_json::json!({
            "total": snapshot.len(),
            "categories": counts
                .iter()
                .map(|(name, count)| {
                    serde_json::json!({ "category": name, "count": count })
                })
                .collect::<Vec<_>>(),
            "entries": entries
                .iter()
                .map(|(doc_id, label, doc)| {
                    serde_json::json!({
                        "doc_id": doc_id,
                        "category": label,
                        "question": doc.question,
                        "answer": doc.answer,
                    })
                })
                .collect::<Vec<_>>(),
        });
        println!("{output}");
        return Ok(());
    }

    println!("{} entries", snapshot.len());
    for (name, count) in &counts {
        println!("  {name}\t{count}");
    }
    if entries.is_empty() {
        if let Some(category) = category {
            println!("No entries in category '{category}'.");
        }
        return Ok(());
    }
    println!();
    for (doc_id, label, doc) in &entries {
        println!("#{doc_id} [{label}] {}", doc.question);
        println!("    {}", doc.answer);
    }
    Ok(())
}

fn cmd_status(
    data_dir: &DataDir,
    index: FaqIndex,
    json: bool,
) -> error::Result<()> {
    let store_file = index.store_file();
    let loaded = index.try_load()?;
    let snapshot = index.snapshot();
    let documents = snapshot.as_ref().map_or(0, |s| s.len());
    let strategy = snapshot
        .as_ref()
        .map(|s| s.embedder().strategy().to_string());

    if json {
        let status = serde_json::json!({
            "data_dir": data_dir.root().display().to_string(),
            "index_file": store_file.display().to_string(),
            "indexed": loaded,
            "documents": documents,
            "strategy": strategy,
        });
        println!("{status}");
    } else {
        println!("Data directory: {}", data_dir.root().display());
        println!("Index file: {}", store_file.display());
        if loaded {
            println!("Documents: {documents}");
            if let Some(strategy) = strategy {
                println!("Embedding strategy: {strategy}");
            }
        } else {
            println!("No index saved yet.");
        }
    }
    Ok(())
}
