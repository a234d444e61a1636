use std::{env, fs, process::ExitCode, rc::Rc, time::Instant};

use rusqlite::Connection;
use topic_index::{
    logging::init_logging, store::documents::DocumentStore, ConfiguredChunker, HashEmbedder, KMeansClusterer,
    Pipeline, PipelineConfig, Result,
};
use tracing::{error, info};

fn usage() -> ExitCode {
    eprintln!("usage: topic-index <config.toml> <documents.txt> [query words...]");
    ExitCode::from(2)
}

fn run(config: &PipelineConfig, documents_path: &str, query: &str) -> Result<()> {
    let conn = Rc::new(Connection::open(&config.database_path)?);

    // one document per non-empty line, only loaded into an empty database
    if DocumentStore::open(&conn)?.count(&conn)? == 0 {
        let text = fs::read_to_string(documents_path)?;
        let lines: Vec<&str> = text.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
        DocumentStore.ingest(&conn, &lines)?;
        info!(documents = lines.len(), "documents ingested");
    }

    let mut pipeline = Pipeline::open(
        conn,
        config,
        ConfiguredChunker::from(config.strategies.chunking),
        HashEmbedder::new(config.strategies.embedding_dimension)?,
        KMeansClusterer::from_config(config)?,
    )?;

    let start = Instant::now();
    pipeline.run()?;
    info!(elapsed_ms = start.elapsed().as_millis() as u64, "pipeline finished");

    if query.is_empty() {
        return Ok(());
    }
    let hits = pipeline.search(query)?;
    for hit in &hits.list {
        println!("{}\t{}\t{:.3}", hit.document_id, hit.matched_topics, hit.relevance);
    }
    Ok(())
}

fn main() -> ExitCode {
    let args: Vec<String> = env::args().collect();
    if args.len() < 3 {
        return usage();
    }
    let config = match PipelineConfig::load(&args[1]) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("failed to load {}: {e}", args[1]);
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = init_logging(&config.log) {
        eprintln!("failed to initialize logging: {e}");
    }

    let query = args[3..].join(" ");
    match run(&config, &args[2], &query) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "pipeline failed, re-run to resume from the last checkpoint");
            ExitCode::FAILURE
        }
    }
}
