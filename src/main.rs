use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{Shell, generate};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use robotcode_imports::config::{Config, find_config_file};
use robotcode_imports::error::ToolDiagnostic;

#[derive(Parser)]
#[command(name = "robotcode-ls", version, about = "Robot Framework Imports Manager language server")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the language server over stdio
    Server(ServerArgs),

    /// Inspect or clear the on-disk artifact cache
    Cache {
        #[command(subcommand)]
        command: CacheCommands,
    },

    /// Inspect robotcode-imports-ls configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
}

#[derive(Subcommand)]
enum CacheCommands {
    /// Remove every cached artifact under the cache root
    Clear(CacheArgs),

    /// Print a summary of what's currently cached
    Info(CacheArgs),
}

#[derive(clap::Args)]
struct CacheArgs {
    /// Cache root (defaults to the workspace storage directory, same
    /// default the server uses)
    #[arg(short = 'r', long)]
    root: Option<PathBuf>,
}

#[derive(clap::Args)]
struct ServerArgs {
    /// Cache root the server persists artifacts under (defaults to the
    /// workspace storage directory)
    #[arg(short = 'r', long)]
    cache_root: Option<PathBuf>,
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print the resolved configuration
    Print(ConfigPrintArgs),

    /// Print the JSON Schema for robotcode.json config files
    Schema,
}

#[derive(clap::Args)]
struct ConfigPrintArgs {
    /// Path to config file
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.command {
        Commands::Server(args) => run_server(args),
        Commands::Cache { command } => match command {
            CacheCommands::Clear(args) => run_cache_clear(args),
            CacheCommands::Info(args) => run_cache_info(args),
        },
        Commands::Config { command } => match command {
            ConfigCommands::Print(args) => run_config_print(args),
            ConfigCommands::Schema => run_config_schema(),
        },
        Commands::Completions { shell } => {
            generate(shell, &mut Cli::command(), "robotcode-ls", &mut std::io::stdout());
            ExitCode::SUCCESS
        }
    }
}

fn run_server(args: ServerArgs) -> ExitCode {
    let cache_root = args.cache_root.unwrap_or_else(default_cache_root);

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            print_diagnostic(ToolDiagnostic::error(format!("failed to start async runtime: {e}")));
            return ExitCode::from(2);
        }
    };
    runtime.block_on(robotcode_imports::lsp::run_server(cache_root));
    ExitCode::SUCCESS
}

fn run_cache_clear(args: CacheArgs) -> ExitCode {
    let root = args.root.unwrap_or_else(default_cache_root);
    match robotcode_imports::store::clear(&root) {
        Ok(()) => {
            println!("cleared cache at {}", root.display());
            ExitCode::SUCCESS
        }
        Err(e) => {
            print_diagnostic(ToolDiagnostic::error(e.to_string()));
            ExitCode::from(2)
        }
    }
}

fn run_cache_info(args: CacheArgs) -> ExitCode {
    let root = args.root.unwrap_or_else(default_cache_root);
    let dir = root.join(".robotcode_cache");

    if !dir.exists() {
        println!("no cache at {}", dir.display());
        return ExitCode::SUCCESS;
    }

    let (entries, bytes) = walk_cache_dir(&dir);
    println!("cache root: {}", dir.display());
    println!("entries: {entries}");
    println!("size: {bytes} bytes");
    ExitCode::SUCCESS
}

/// Recursively counts files and total bytes under a cache directory. The
/// layout is shallow (`<runtime>/<version>/<kind>/*.{meta,spec}.json`) so a
/// plain `read_dir` walk is enough; no need to pull in the `ignore` crate's
/// gitignore-aware walker for this.
fn walk_cache_dir(dir: &Path) -> (usize, u64) {
    let mut entries = 0usize;
    let mut bytes = 0u64;

    let Ok(read_dir) = std::fs::read_dir(dir) else {
        return (0, 0);
    };

    for entry in read_dir.flatten() {
        let path = entry.path();
        let Ok(meta) = entry.metadata() else { continue };
        if meta.is_dir() {
            let (sub_entries, sub_bytes) = walk_cache_dir(&path);
            entries += sub_entries;
            bytes += sub_bytes;
        } else {
            entries += 1;
            bytes += meta.len();
        }
    }

    (entries, bytes)
}

/// Default cache root for standalone CLI use: a server-managed directory
/// outside the project tree, matching `CacheSaveLocation::WorkspaceStorage`
/// (§6's default). `lsp.rs`'s `Backend` picks the same root so `cache
/// clear`/`cache info` inspect what the server actually wrote.
fn default_cache_root() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("robotcode-imports-ls")
}

fn run_config_print(args: ConfigPrintArgs) -> ExitCode {
    let mut stderr = std::io::stderr().lock();

    let cwd = match std::env::current_dir() {
        Ok(dir) => dir,
        Err(e) => {
            let diag = ToolDiagnostic::error(format!("cannot determine current directory: {e}"));
            let _ = writeln!(stderr, "{:?}", miette::Report::new(diag));
            return ExitCode::from(2);
        }
    };

    let path = args.config.or_else(|| find_config_file(&cwd));
    let config = match path {
        Some(path) => match Config::load(&path) {
            Ok(config) => config,
            Err(e) => {
                let diag = ToolDiagnostic::error(format!("failed to load config: {e}"));
                let _ = writeln!(stderr, "{:?}", miette::Report::new(diag));
                return ExitCode::from(2);
            }
        },
        None => Config::default(),
    };

    println!("{}", serde_json::to_string_pretty(&config).unwrap());
    ExitCode::SUCCESS
}

fn run_config_schema() -> ExitCode {
    let schema = schemars::schema_for!(Config);
    let mut value = serde_json::to_value(&schema).unwrap();

    // Rename definitions → $defs (2020-12 convention) and update $refs.
    rename_definitions(&mut value);

    if let Some(obj) = value.as_object_mut() {
        // Override the draft-07 meta-schema URI with 2020-12.
        obj.insert(
            "$schema".to_string(),
            serde_json::json!("https://json-schema.org/draft/2020-12/schema"),
        );
        obj.insert(
            "$id".to_string(),
            serde_json::json!("https://robotcode.io/schemas/robotcode-imports-ls.schema.json"),
        );
    }

    println!("{}", serde_json::to_string_pretty(&value).unwrap());
    ExitCode::SUCCESS
}

fn rename_definitions(value: &mut serde_json::Value) {
    match value {
        serde_json::Value::Object(map) => {
            if let Some(defs) = map.remove("definitions") {
                map.insert("$defs".to_string(), defs);
            }
            if let Some(serde_json::Value::String(ref_str)) = map.get_mut("$ref")
                && let Some(name) = ref_str.strip_prefix("#/definitions/")
            {
                *ref_str = format!("#/$defs/{name}");
            }
            for v in map.values_mut() {
                rename_definitions(v);
            }
        }
        serde_json::Value::Array(arr) => {
            for v in arr {
                rename_definitions(v);
            }
        }
        _ => {}
    }
}

fn print_diagnostic(diag: ToolDiagnostic) {
    let mut stderr = std::io::stderr().lock();
    let _ = writeln!(stderr, "{:?}", miette::Report::new(diag));
}
