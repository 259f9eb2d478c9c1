use clap::{Parser, Subcommand};
use std::path::Path;

use folio_core::config::{config_path, load_config, session_options_from_config, FolioConfig};
use folio_core::navigation::build_outline_tree;
use folio_core::progress::{ProgressEvent, ProgressHandler};
use folio_core::session::ReadingSession;

#[derive(Parser)]
#[command(name = "folio")]
#[command(about = "Inspect and read EPUB books from the terminal")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Show book metadata
    Info {
        /// Input file
        #[arg(required = true)]
        input: String,
    },

    /// Print the table of contents
    Toc {
        /// Input file
        #[arg(required = true)]
        input: String,

        /// Emit nested entries instead of a depth-annotated list (JSON only)
        #[arg(long)]
        tree: bool,
    },

    /// List the reading order
    Spine {
        /// Input file
        #[arg(required = true)]
        input: String,
    },

    /// Render a chapter for display
    Read {
        /// Input file
        #[arg(required = true)]
        input: String,

        /// Spine index (0-based)
        #[arg(short, long, default_value = "0")]
        chapter: usize,

        /// Anchor to position at within the chapter
        #[arg(short, long)]
        fragment: Option<String>,

        /// Follow a link (as written in the chapter) after opening it
        #[arg(long)]
        link: Option<String>,
    },

    /// Extract the cover image
    Cover {
        /// Input file
        #[arg(required = true)]
        input: String,

        /// Output image path
        #[arg(short, long)]
        output: Option<String>,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Initialize default config file
    Init,
    /// Show current configuration
    Show,
    /// Set a configuration value
    Set {
        /// Key (dot-separated path)
        key: String,
        /// Value
        value: String,
    },
}

type CliResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Forwards load progress to the log.
struct LogProgress;

impl ProgressHandler for LogProgress {
    fn on_progress(&self, event: ProgressEvent) {
        tracing::debug!(
            "[{}/{}] {}{}",
            event.current,
            event.total,
            event.stage,
            event.message.map(|m| format!(": {m}")).unwrap_or_default()
        );
    }
}

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let result = match &cli.command {
        Commands::Info { input } => run_info(input, cli.json),
        Commands::Toc { input, tree } => run_toc(input, *tree, cli.json),
        Commands::Spine { input } => run_spine(input, cli.json),
        Commands::Read {
            input,
            chapter,
            fragment,
            link,
        } => run_read(input, *chapter, fragment.as_deref(), link.as_deref(), cli.json),
        Commands::Cover { input, output } => run_cover(input, output.as_deref(), cli.json),
        Commands::Config { action } => run_config(action, cli.json),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn open_session(input: &str) -> Result<ReadingSession, Box<dyn std::error::Error + Send + Sync>> {
    let path = Path::new(input);
    if !path.exists() {
        return Err(format!("Input file not found: {}", path.display()).into());
    }
    let bytes = std::fs::read(path)?;
    let mut session = ReadingSession::new(session_options_from_config(&load_config()));
    session.load_book_with_progress(&bytes, Some(&LogProgress as &dyn ProgressHandler))?;
    Ok(session)
}

fn run_info(input: &str, json: bool) -> CliResult {
    let session = open_session(input)?;
    let metadata = session.metadata().ok_or("No book is loaded")?;
    let cover = session.package().and_then(|p| p.cover_path());

    if json {
        let info = serde_json::json!({
            "metadata": metadata,
            "chapters": session.spine().len(),
            "outline_entries": session.outline().len(),
            "cover": cover,
            "version": session.package().and_then(|p| p.version.clone()),
        });
        println!("{}", serde_json::to_string_pretty(&info)?);
    } else {
        println!("Title: {}", metadata.display_title());
        println!("Author: {}", metadata.display_creator());
        if !metadata.language.is_empty() {
            println!("Language: {}", metadata.language);
        }
        if !metadata.publisher.is_empty() {
            println!("Publisher: {}", metadata.publisher);
        }
        if !metadata.description.is_empty() {
            println!("Description: {}", metadata.description);
        }
        println!("Chapters: {}", session.spine().len());
        println!("Outline entries: {}", session.outline().len());
        if let Some(cover) = cover {
            println!("Cover: {}", cover);
        }
    }

    Ok(())
}

fn run_toc(input: &str, tree: bool, json: bool) -> CliResult {
    let session = open_session(input)?;
    let outline = session.outline();

    if json {
        if tree {
            println!("{}", serde_json::to_string_pretty(&build_outline_tree(outline))?);
        } else {
            println!("{}", serde_json::to_string_pretty(outline)?);
        }
        return Ok(());
    }

    for entry in outline {
        let indent = "  ".repeat(entry.depth.saturating_sub(1) as usize);
        match &entry.fragment {
            Some(fragment) => println!(
                "{}{} [{}#{}]",
                indent, entry.title, entry.spine_index, fragment
            ),
            None => println!("{}{} [{}]", indent, entry.title, entry.spine_index),
        }
    }
    Ok(())
}

fn run_spine(input: &str, json: bool) -> CliResult {
    let session = open_session(input)?;

    if json {
        println!("{}", serde_json::to_string_pretty(session.spine())?);
    } else {
        for (i, item) in session.spine().iter().enumerate() {
            println!("{:>3}  {}  ({})", i, item.resolved_href, item.media_type);
        }
    }
    Ok(())
}

fn run_read(
    input: &str,
    chapter: usize,
    fragment: Option<&str>,
    link: Option<&str>,
    json: bool,
) -> CliResult {
    let mut session = open_session(input)?;
    session.go_to_chapter(chapter, fragment)?;
    if let Some(href) = link {
        if !session.follow_link(href)? {
            tracing::warn!("Link {} does not lead anywhere in this book", href);
        }
    }

    let position = session.position().cloned().unwrap_or_default();
    let rendered = session.current_chapter().ok_or("No chapter is displayed")?;

    if json {
        let resources: Vec<_> = rendered
            .resources
            .iter()
            .map(|r| {
                serde_json::json!({
                    "handle": r.handle,
                    "path": r.archive_path,
                    "media_type": r.media_type,
                    "size": r.data.len(),
                })
            })
            .collect();
        let out = serde_json::json!({
            "path": rendered.path,
            "position": position,
            "state": session.state(),
            "markup": rendered.markup,
            "resources": resources,
            "anchors": rendered.anchors,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!("{}", rendered.markup);
    }
    Ok(())
}

fn run_cover(input: &str, output: Option<&str>, json: bool) -> CliResult {
    let session = open_session(input)?;
    let cover = session.cover().ok_or("Book has no cover image")?;

    let out_path = match output {
        Some(o) => Path::new(o).to_path_buf(),
        None => {
            let stem = Path::new(input)
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("cover");
            let ext = Path::new(&cover.archive_path)
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or("img");
            Path::new(input)
                .parent()
                .unwrap_or(Path::new("."))
                .join(format!("{}-cover.{}", stem, ext))
        }
    };
    std::fs::write(&out_path, &*cover.data)?;

    if json {
        let out = serde_json::json!({
            "output": out_path.display().to_string(),
            "source": cover.archive_path,
            "media_type": cover.media_type,
            "size": cover.data.len(),
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!("Cover written to {}", out_path.display());
    }
    Ok(())
}

fn run_config(action: &ConfigAction, json: bool) -> CliResult {
    match action {
        ConfigAction::Init => {
            let path = config_path().ok_or("Could not determine config directory")?;
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let toml = toml::to_string_pretty(&FolioConfig::default())?;
            std::fs::write(&path, toml)?;
            println!("Wrote default config to {}", path.display());
        }
        ConfigAction::Show => {
            let cfg = load_config();
            if json {
                println!("{}", serde_json::to_string_pretty(&cfg)?);
            } else {
                println!("{}", toml::to_string_pretty(&cfg)?);
            }
        }
        ConfigAction::Set { key, value } => {
            let path = config_path().ok_or("Could not determine config directory")?;
            let mut cfg = load_config();

            set_config_key(&mut cfg, key, value)?;

            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let toml = toml::to_string_pretty(&cfg)?;
            std::fs::write(&path, toml)?;
            if !json {
                println!("Updated {}", key);
            }
        }
    }
    Ok(())
}

fn set_config_key(cfg: &mut FolioConfig, key: &str, value: &str) -> CliResult {
    let parse_u64 = |v: &str| -> Result<u64, Box<dyn std::error::Error + Send + Sync>> {
        v.parse().map_err(|_| format!("Expected a number for {}, got '{}'", key, v).into())
    };
    let parse_bool = |v: &str| -> Result<bool, Box<dyn std::error::Error + Send + Sync>> {
        v.parse().map_err(|_| format!("Expected true or false for {}, got '{}'", key, v).into())
    };

    match key.split_once('.') {
        Some(("security", sub)) => match sub {
            "max_file_size_mb" => cfg.security.max_file_size_mb = Some(parse_u64(value)?),
            "max_resource_size_mb" => cfg.security.max_resource_size_mb = Some(parse_u64(value)?),
            "max_compression_ratio" => cfg.security.max_compression_ratio = Some(parse_u64(value)?),
            "max_file_count" => cfg.security.max_file_count = Some(parse_u64(value)?),
            _ => return Err(format!("Unknown key: {}", key).into()),
        },
        Some(("render", sub)) => match sub {
            "inline_images" => cfg.render.inline_images = Some(parse_bool(value)?),
            "keep_head_styles" => cfg.render.keep_head_styles = Some(parse_bool(value)?),
            _ => return Err(format!("Unknown key: {}", key).into()),
        },
        _ => return Err(format!("Unknown key: {}", key).into()),
    }
    Ok(())
}
