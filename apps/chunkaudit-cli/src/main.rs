use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use chunkaudit_core::config::{resolve_with_base, Config, Settings};
use chunkaudit_core::export::{export_to_path, import_from_path};
use chunkaudit_core::metadata::{CHUNK_INDEX, FILESET, SOURCE_FILE};
use chunkaudit_core::{Chunk, CollectionHealth, OpReport, Selection, ViewKind};
use chunkaudit_pipeline::{ingest_file, ChatScope, PipelineClient};
use chunkaudit_store::grouping;
use chunkaudit_store::{ConnectOptions, Store};

const PREVIEW_CHARS: usize = 80;

#[derive(Parser)]
#[command(name = "chunkaudit", about = "Inspect and edit chunks in a vector store", version)]
struct Cli {
    /// Store directory; overrides store.path
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Collection to work on; overrides store.default_collection
    #[arg(long, global = true)]
    collection: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
#[group(multiple = false)]
struct ViewArgs {
    #[arg(long)]
    file: Option<String>,
    #[arg(long)]
    fileset: Option<String>,
}

impl ViewArgs {
    fn kind(&self) -> ViewKind {
        match (&self.file, &self.fileset) {
            (Some(f), _) => ViewKind::File(f.clone()),
            (None, Some(s)) => ViewKind::FileSet(s.clone()),
            (None, None) => ViewKind::Collection,
        }
    }
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct ScopeArgs {
    #[arg(long)]
    file: Option<String>,
    #[arg(long)]
    fileset: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Create the store and the default collection if missing
    Init,
    Collections,
    /// Row count, vector width and version of the collection
    Info,
    Create {
        name: String,
        #[arg(long)]
        dim: Option<i32>,
    },
    Drop {
        name: String,
    },
    Files,
    Filesets,
    /// List chunks of the collection, a file, or a file set in reading order
    Show {
        #[command(flatten)]
        view: ViewArgs,
    },
    Tag {
        #[arg(long)]
        key: String,
        #[arg(long)]
        value: String,
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Remove a key, or one value of a multi-value key
    Untag {
        #[arg(long)]
        key: String,
        #[arg(long)]
        value: Option<String>,
        #[arg(required = true)]
        ids: Vec<String>,
    },
    Delete {
        #[arg(required = true)]
        ids: Vec<String>,
    },
    Export {
        #[arg(long)]
        out: PathBuf,
        #[command(flatten)]
        view: ViewArgs,
        /// Ids to mark as selected in the sheet
        #[arg(long, num_args = 1..)]
        select: Vec<String>,
    },
    /// Re-apply the metadata column of an exported sheet
    Import {
        csv: PathBuf,
    },
    Ingest {
        path: PathBuf,
        #[arg(long)]
        fileset: Option<String>,
    },
    Chat {
        question: String,
        #[command(flatten)]
        scope: ScopeArgs,
    },
    Check,
    /// Finish a recreation interrupted by a crash
    Repair,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = Config::load().map_err(|e| { eprintln!("Error loading config: {}", e); e })?;
    let mut settings = config.settings()?;
    if let Some(db) = &cli.db {
        let cwd = std::env::current_dir()?;
        settings.store.path = resolve_with_base(&cwd, db.to_string_lossy());
    }
    let collection = cli.collection.clone().unwrap_or_else(|| settings.store.default_collection.clone());
    tracing::debug!(store = %settings.store.path.display(), collection, "resolved settings");
    run(cli.command, &settings, &collection).await
}

async fn open(settings: &Settings) -> anyhow::Result<Store> {
    Store::connect_with(&settings.store.path, ConnectOptions::from(&settings.store))
        .await
        .with_context(|| format!("opening {}", settings.store.path.display()))
}

async fn run(command: Command, settings: &Settings, collection: &str) -> anyhow::Result<()> {
    let opts = ConnectOptions::from(&settings.store);
    match command {
        Command::Init => {
            let store = Store::initialize(&settings.store.path, collection, opts).await?;
            let info = store.collection_info(collection).await?;
            println!("Store ready at {} ({} chunks in '{}')", store.root().display(), info.count, info.name);
        }
        Command::Collections => {
            let store = open(settings).await?;
            for name in store.list_collections().await? {
                println!("{name}");
            }
        }
        Command::Info => {
            let info = open(settings).await?.collection_info(collection).await?;
            println!("name:      {}", info.name);
            println!("chunks:    {}", info.count);
            println!("dimension: {}", info.dimension);
            println!("version:   {}", info.version);
        }
        Command::Create { name, dim } => {
            open(settings).await?.create_collection(&name, dim).await?;
            println!("Created collection '{name}'");
        }
        Command::Drop { name } => {
            let mut store = open(settings).await?;
            store.drop_collection(&name).await?;
            println!("Dropped collection '{name}'");
            if store.list_collections().await?.is_empty() {
                println!("The store has no collections left; run `chunkaudit init` before using it again");
            }
        }
        Command::Files => {
            for f in grouping::list_files(&open(settings).await?, collection).await? {
                println!("{f}");
            }
        }
        Command::Filesets => {
            for s in grouping::list_filesets(&open(settings).await?, collection).await? {
                println!("{s}");
            }
        }
        Command::Show { view } => {
            let chunks = grouping::load_view(&open(settings).await?, collection, &view.kind()).await?;
            for c in &chunks {
                print_chunk(c);
            }
            println!("{} chunks", chunks.len());
        }
        Command::Tag { key, value, ids } => {
            let report = open(settings).await?.upsert_metadata(collection, &ids, &key, &value).await?;
            print_report("Tagged", &report);
        }
        Command::Untag { key, value, ids } => {
            let report = open(settings)
                .await?
                .delete_metadata_key(collection, &ids, &key, value.as_deref())
                .await?;
            print_report("Updated", &report);
        }
        Command::Delete { ids } => {
            let report = open(settings).await?.delete_chunks(collection, &ids).await?;
            print_report("Deleted", &report.op);
            if report.recreated {
                println!("Collection '{collection}' was left empty and has been recreated");
            }
        }
        Command::Export { out, view, select } => {
            let chunks = grouping::load_view(&open(settings).await?, collection, &view.kind()).await?;
            let selection = Selection::from_ids(&chunks, &select);
            let rows = export_to_path(&out, &chunks, &selection)?;
            println!("Exported {rows} chunks ({} selected) to {}", selection.len(), out.display());
        }
        Command::Import { csv } => {
            let rows = import_from_path(&csv)?;
            let report = open(settings)
                .await?
                .replace_metadata(collection, rows.into_iter().map(|r| (r.id, r.metadata)).collect())
                .await?;
            print_report("Re-applied metadata to", &report);
        }
        Command::Ingest { path, fileset } => {
            let client = PipelineClient::new(&settings.pipeline)?;
            let mut store = open(settings).await?;
            let outcome = ingest_file(&client, &mut store, collection, &path, fileset.as_deref()).await?;
            if outcome.new_chunks == 0 {
                println!("File processed but no new chunks were created");
            } else {
                print!("File processed into {} chunks", outcome.new_chunks);
                match fileset {
                    Some(s) => println!(" and stored in file set '{s}'"),
                    None => println!(),
                }
            }
        }
        Command::Chat { question, scope } => {
            let scope = match (scope.file, scope.fileset) {
                (Some(f), _) => Some(ChatScope::File(f)),
                (None, Some(s)) => Some(ChatScope::FileSet(s)),
                (None, None) => None,
            };
            let client = PipelineClient::new(&settings.pipeline)?;
            let answer = client
                .chat(&question, scope.as_ref(), collection, &settings.store.path)
                .await?;
            println!("{}", answer.text);
            for r in &answer.references {
                println!("\nSource: {}\nChunk: {}...", r.source_file, r.excerpt);
            }
        }
        Command::Check => {
            let health = grouping::check_collection(&open(settings).await?, collection).await?;
            match health {
                CollectionHealth::Empty => println!("Collection '{collection}' is empty"),
                CollectionHealth::NoFiles { chunks } => {
                    println!("Collection '{collection}' has {chunks} chunks but none carries a source file");
                }
                CollectionHealth::HasFiles { chunks, files } => {
                    println!("Collection '{collection}' has {chunks} chunks from {files} files");
                }
            }
        }
        Command::Repair => {
            let repaired = Store::repair(&settings.store.path, opts).await?;
            if repaired.is_empty() {
                println!("Nothing to repair");
            }
            for name in repaired {
                println!("Recreated collection '{name}'");
            }
        }
    }
    Ok(())
}

fn print_report(verb: &str, report: &OpReport) {
    println!("{verb} {} of {} chunks", report.applied, report.requested);
    if !report.missing.is_empty() {
        println!("Not found: {}", report.missing.join(", "));
    }
}

fn print_chunk(c: &Chunk) {
    let field = |k: &str| c.metadata.get(k).map(ToString::to_string).unwrap_or_default();
    let preview: String = c.document.chars().take(PREVIEW_CHARS).collect::<String>().replace('\n', " ");
    println!(
        "{}  [{} #{}] {{{}}}  {}",
        c.id,
        field(SOURCE_FILE),
        field(CHUNK_INDEX),
        field(FILESET),
        preview
    );
}
