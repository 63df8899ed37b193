use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use repolens::config;
use repolens::context;
use repolens::db;
use repolens::extraction::{self, IndexPhase, IndexProgress};
use repolens::retrieval::{HybridRetriever, Retrieval};
use repolens::types::{ContextFormat, Diagnostic, IssueContext, ProjectConfig, ProjectGraph};
use repolens::vectors::{Embedder, OllamaEmbedder, VectorStore};

use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

#[derive(Debug, Parser)]
#[command(name = "repolens")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Dependency graph and hybrid code retrieval for a source repository")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Init(InitArgs),
    Index(IndexArgs),
    Status(StatusArgs),
    Query(QueryArgs),
    Context(ContextArgs),
}

#[derive(Debug, Args)]
struct InitArgs {
    path: Option<PathBuf>,
    #[arg(short = 'i', long = "index")]
    index: bool,
    #[arg(long = "include")]
    include: Vec<String>,
    #[arg(long = "exclude")]
    exclude: Vec<String>,
}

#[derive(Debug, Args)]
struct IndexArgs {
    path: Option<PathBuf>,
    /// Build the graph only, leave the embedding table untouched.
    #[arg(long = "no-embed")]
    no_embed: bool,
    #[arg(short = 'q', long = "quiet")]
    quiet: bool,
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,
}

#[derive(Debug, Args)]
struct StatusArgs {
    path: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct IssueArgs {
    #[arg(long = "issue-title")]
    issue_title: Option<String>,
    #[arg(long = "issue-body")]
    issue_body: Option<String>,
}

impl IssueArgs {
    fn issue(&self) -> Option<IssueContext> {
        if self.issue_title.is_none() && self.issue_body.is_none() {
            return None;
        }
        Some(IssueContext {
            title: self.issue_title.clone().unwrap_or_default(),
            body: self.issue_body.clone().unwrap_or_default(),
        })
    }
}

#[derive(Debug, Args)]
struct QueryArgs {
    search: String,
    #[arg(short = 'p', long = "path")]
    path: Option<PathBuf>,
    #[arg(short = 'k', long = "top-k")]
    top_k: Option<usize>,
    #[arg(short = 'j', long = "json")]
    json: bool,
    #[command(flatten)]
    issue: IssueArgs,
}

#[derive(Debug, Args)]
struct ContextArgs {
    task: String,
    #[arg(short = 'p', long = "path")]
    path: Option<PathBuf>,
    #[arg(short = 'k', long = "top-k")]
    top_k: Option<usize>,
    #[arg(short = 'f', long = "format", value_enum, default_value_t = ContextFormat::Markdown)]
    format: ContextFormat,
    #[command(flatten)]
    issue: IssueArgs,
}

fn main() {
    let cli = Cli::parse();
    let project_root = match &cli.command {
        Command::Init(args) => resolve_project_root(args.path.clone()),
        Command::Index(args) => resolve_project_root(args.path.clone()),
        Command::Status(args) => resolve_project_root(args.path.clone()),
        Command::Query(args) => resolve_project_root(args.path.clone()),
        Command::Context(args) => resolve_project_root(args.path.clone()),
    };
    let _log_guard = init_tracing(&project_root);

    match cli.command {
        Command::Init(args) => run_init(project_root, args),
        Command::Index(args) => run_index(&project_root, &args),
        Command::Status(_) => run_status(&project_root),
        Command::Query(args) => run_query(&project_root, &args),
        Command::Context(args) => run_context(&project_root, &args),
    }
}

/// Logs to stderr (`RUST_LOG`, default `warn`) and, once the project is
/// initialized, to `.repolens/repolens.log`.
fn init_tracing(project_root: &Path) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(filter());

    let data_dir = config::data_dir(project_root);
    let (file_layer, guard) = if data_dir.is_dir() {
        let appender = tracing_appender::rolling::never(&data_dir, "repolens.log");
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(writer)
            .with_filter(filter());
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .init();
    guard
}

fn run_init(project_root: PathBuf, args: InitArgs) {
    if is_initialized(&project_root) {
        eprintln!("Repolens already initialized in {}", project_root.display());
        return;
    }

    if let Err(err) = create_data_dir(&project_root) {
        eprintln!("Failed to create .repolens directory: {err}");
        std::process::exit(1);
    }

    let mut cfg = config::create_default_config(&project_root);
    config::add_include_patterns(&mut cfg, &args.include);
    config::add_exclude_patterns(&mut cfg, &args.exclude);
    if let Err(err) = config::save_config(&project_root, &cfg) {
        eprintln!("Failed to write config: {err}");
        std::process::exit(1);
    }

    if let Err(err) = db::initialize_database(&project_root) {
        eprintln!("Failed to initialize database: {err}");
        std::process::exit(1);
    }

    println!("Initialized Repolens in {}", project_root.display());

    if args.index {
        run_index(
            &project_root,
            &IndexArgs {
                path: None,
                no_embed: false,
                quiet: false,
                verbose: false,
            },
        );
    }
}

fn run_index(project_root: &Path, args: &IndexArgs) {
    require_initialized(project_root);
    let cfg = load_config_or_exit(project_root);

    let embedder = OllamaEmbedder::new(&cfg.embedding);
    let embedder: Option<&dyn Embedder> = if args.no_embed { None } else { Some(&embedder) };

    let bar = if args.quiet {
        ProgressBar::hidden()
    } else {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template("{msg:>10} [{bar:40}] {pos}/{len}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> "),
        );
        bar
    };
    let on_progress = |progress: IndexProgress| report_progress(&bar, &progress);

    let result = extraction::index_all(project_root, &cfg, embedder, Some(&on_progress))
        .unwrap_or_else(|err| {
            bar.abandon();
            eprintln!("Indexing failed: {err}");
            std::process::exit(1);
        });
    bar.finish_and_clear();

    if args.quiet {
        return;
    }
    println!("Scanned {} files, analyzed {}", result.files_scanned, result.files_analyzed);
    println!(
        "Created {} nodes, {} edges, {} chunks",
        result.nodes_created, result.edges_created, result.chunks_created
    );
    match result.embeddings_stored {
        Some(count) => println!("Stored {count} embeddings"),
        None => println!("Embeddings skipped"),
    }
    print_diagnostic_summary(&result.diagnostics, args.verbose);
    println!("Completed in {}ms", result.duration_ms);
}

fn report_progress(bar: &ProgressBar, progress: &IndexProgress) {
    let phase = match progress.phase {
        IndexPhase::Scanning => "Scanning",
        IndexPhase::Analyzing => "Analyzing",
        IndexPhase::Linking => "Linking",
        IndexPhase::Embedding => "Embedding",
        IndexPhase::Storing => "Storing",
    };
    bar.set_message(phase);
    bar.set_length(progress.total as u64);
    bar.set_position(progress.current as u64);
}

fn print_diagnostic_summary(diagnostics: &[Diagnostic], verbose: bool) {
    if diagnostics.is_empty() {
        return;
    }
    let mut by_kind: BTreeMap<String, usize> = BTreeMap::new();
    for diagnostic in diagnostics {
        *by_kind.entry(format!("{:?}", diagnostic.kind)).or_default() += 1;
    }
    println!("Diagnostics:");
    for (kind, count) in by_kind {
        println!("  {kind}: {count}");
    }
    if verbose {
        for diagnostic in diagnostics {
            println!("  - [{:?}] {}: {}", diagnostic.kind, diagnostic.subject, diagnostic.message);
        }
    }
}

fn run_status(project_root: &Path) {
    println!("Repolens Status\n");
    println!("Project: {}", project_root.display());

    if !is_initialized(project_root) {
        println!("Not initialized. Run `repolens init`.");
        return;
    }

    println!("Config:   {}", config::config_path(project_root).display());
    let graph = db::load_graph(project_root);
    match &graph {
        Ok(Some(graph)) => println!(
            "Graph:    {} files, {} nodes, {} edges",
            graph.file_count(),
            graph.nodes.len(),
            graph.edges.len()
        ),
        Ok(None) => println!("Graph:    not built. Run `repolens index`."),
        Err(err) => println!("Graph:    unreadable ({err})"),
    }

    let db_path = db::database_path(project_root);
    let db_size = std::fs::metadata(&db_path).map(|m| m.len()).unwrap_or(0);
    let vectors = db::open_database(project_root)
        .and_then(|conn| Ok((db::vector_count(&conn)?, db::stored_model(&conn)?)));
    match vectors {
        Ok((count, model)) => {
            let model = model.unwrap_or_else(|| "-".to_string());
            println!("Vectors:  {count} ({model}, {db_size} bytes)");
            if let Ok(cfg) = config::load_config(project_root)
                && count > 0
                && model != cfg.embedding.model
            {
                println!(
                    "          built with a different model than `{}`. Run `repolens index`.",
                    cfg.embedding.model
                );
            }
        }
        Err(err) => println!("Vectors:  unreadable ({err})"),
    }
    if let Ok(Some(graph)) = &graph
        && let Ok(vector_files) = db::open_database(project_root).and_then(|conn| db::vector_file_ids(&conn))
    {
        let stale = vector_files.iter().filter(|id| graph.node(id).is_none()).count();
        if stale > 0 {
            println!("          {stale} embedded files are no longer in the graph. Run `repolens index`.");
        }
    }
}

fn run_query(project_root: &Path, args: &QueryArgs) {
    let issue = args.issue.issue();
    let retrieval = retrieve(project_root, &args.search, issue.as_ref(), args.top_k);

    if args.json {
        let json = serde_json::to_string_pretty(&retrieval).unwrap_or_default();
        println!("{json}");
        return;
    }

    for diagnostic in &retrieval.diagnostics {
        eprintln!("note: {}", diagnostic.message);
    }

    if retrieval.is_empty() {
        println!("No results found for \"{}\"", args.search);
        return;
    }

    println!("Results for \"{}\":\n", args.search);
    for file in &retrieval.files {
        println!("{}", file.file_id);
        for found in &file.matches {
            let preview = found.text.lines().next().unwrap_or_default();
            println!(
                "  #{:<3} {:<13} {:>4.0}%  {preview}",
                found.chunk_index,
                found.method.as_str(),
                found.similarity * 100.0
            );
        }
        println!();
    }
}

fn run_context(project_root: &Path, args: &ContextArgs) {
    let issue = args.issue.issue();
    let retrieval = retrieve(project_root, &args.task, issue.as_ref(), args.top_k);

    let output = context::build_context(&retrieval, &args.task, issue.as_ref(), args.format)
        .unwrap_or_else(|err| {
            eprintln!("Failed to build context: {err}");
            std::process::exit(1);
        });
    println!("{output}");
}

fn retrieve(
    project_root: &Path,
    query: &str,
    issue: Option<&IssueContext>,
    top_k: Option<usize>,
) -> Retrieval {
    require_initialized(project_root);
    let cfg = load_config_or_exit(project_root);

    let graph: ProjectGraph = match db::load_graph(project_root) {
        Ok(Some(graph)) => graph,
        Ok(None) => {
            eprintln!("No index found. Run `repolens index` first.");
            std::process::exit(1);
        }
        Err(err) => {
            eprintln!("Failed to load graph: {err}");
            std::process::exit(1);
        }
    };
    let (store, model_mismatch): (VectorStore, _) = db::open_database(project_root)
        .and_then(|conn| db::load_vectors_for_model(&conn, &cfg.embedding.model))
        .unwrap_or_else(|err| {
            eprintln!("Failed to load vectors: {err}");
            std::process::exit(1);
        });

    let embedder = OllamaEmbedder::new(&cfg.embedding);
    let retriever = HybridRetriever::new(&graph, &store, &embedder).unwrap_or_else(|err| {
        eprintln!("Failed to prepare retriever: {err}");
        std::process::exit(1);
    });
    let mut retrieval = retriever.retrieve(query, issue, top_k.unwrap_or(cfg.top_k));
    if let Some(diagnostic) = model_mismatch {
        retrieval.diagnostics.insert(0, diagnostic);
    }
    retrieval
}

fn load_config_or_exit(project_root: &Path) -> ProjectConfig {
    config::load_config(project_root).unwrap_or_else(|err| {
        eprintln!("Failed to load config: {err}");
        std::process::exit(1);
    })
}

fn resolve_project_root(path: Option<PathBuf>) -> PathBuf {
    path.unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
}

fn is_initialized(project_root: &Path) -> bool {
    config::data_dir(project_root).is_dir()
}

fn require_initialized(project_root: &Path) {
    if !is_initialized(project_root) {
        eprintln!("Repolens not initialized in {}", project_root.display());
        std::process::exit(1);
    }
}

fn create_data_dir(project_root: &Path) -> std::io::Result<()> {
    let dir = config::data_dir(project_root);
    std::fs::create_dir_all(&dir)?;
    let gitignore_path = dir.join(".gitignore");
    if !gitignore_path.exists() {
        let content = "# Repolens index files\n# Local to each machine, do not commit\n\n*.db\n*.db-wal\n*.db-shm\ngraph.json\n*.log\n";
        std::fs::write(gitignore_path, content)?;
    }
    Ok(())
}
