use std::path::PathBuf;
use std::process;

use chrono::Utc;
use clap::{Parser, Subcommand};
use rusqlite::Connection;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use cloth_stock::config::{AppPaths, Settings};
use cloth_stock::errors::{ClothError, Result};
use cloth_stock::gallery::GalleryQuery;
use cloth_stock::photo::{ImportOutcome, catalogue_photo};
use cloth_stock::repository::ClothRepository;
use cloth_stock::storage::models::{ClothItem, ItemFilter, TagData};
use cloth_stock::storage::sqlite::SqliteStorage;
use cloth_stock::{tui, watcher};

type Repo = ClothRepository<SqliteStorage>;

#[derive(Parser)]
#[command(name = "cloth-stock", version, about = "Catalogue your clothes by photo, tags and memo")]
struct Cli {
    /// Output results as JSON
    #[arg(short = 'j', long = "json", global = true)]
    json: bool,

    /// Data directory (defaults to ~/.cloth-stock)
    #[arg(long, global = true, env = "CLOTH_STOCK_HOME")]
    home: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Add a photo to the catalogue
    Add {
        /// Image file (png or jpeg)
        photo: PathBuf,

        #[arg(short, long)]
        size: Option<i32>,

        #[arg(short, long)]
        color: Option<String>,

        #[arg(short = 'k', long)]
        category: Option<String>,

        #[arg(short, long)]
        memo: Option<String>,
    },

    /// List items, newest first
    List {
        /// Maximum number of items, at least 1 (defaults to list_limit from config)
        #[arg(short, long)]
        limit: Option<i64>,

        /// Offset for pagination
        #[arg(short, long, default_value = "0")]
        offset: i64,

        /// Exact category
        #[arg(short = 'k', long)]
        category: Option<String>,

        /// Smallest size, inclusive
        #[arg(long)]
        min_size: Option<i32>,

        /// Largest size, inclusive
        #[arg(long)]
        max_size: Option<i32>,
    },

    /// Search tags and memos (case-insensitive, partial match)
    Search {
        query: String,

        /// Narrow to one category
        #[arg(short = 'k', long)]
        category: Option<String>,
    },

    /// Show one item
    Show { id: i64 },

    /// Change an item's tags; fields not given stay as they are
    Tag {
        id: i64,

        #[arg(short, long)]
        size: Option<i32>,

        #[arg(short, long)]
        color: Option<String>,

        #[arg(short = 'k', long)]
        category: Option<String>,
    },

    /// Set or clear an item's memo
    Memo {
        id: i64,

        /// New memo text (at most 1000 characters)
        text: Option<String>,

        /// Remove the memo
        #[arg(long, conflicts_with = "text")]
        clear: bool,
    },

    /// Delete an item and its stored photo
    Delete {
        id: i64,

        /// Leave the photo file on disk
        #[arg(long)]
        keep_file: bool,
    },

    /// Show catalogue statistics
    Stats,

    /// List categories with item counts
    Categories,

    /// Show effective settings and paths
    Config {
        /// Write config.toml with the current settings
        #[arg(long)]
        init: bool,
    },

    /// Interactive gallery
    Tui,

    /// Manage the inbox watcher
    Watch {
        #[command(subcommand)]
        action: WatchAction,
    },
}

#[derive(Subcommand)]
enum WatchAction {
    /// Start importing photos dropped into the inbox
    Start,
    /// Stop the watcher
    Stop,
    /// Check watcher status
    Status,
    /// Run watcher in foreground (used internally)
    #[command(hide = true)]
    Run,
}

#[derive(Serialize)]
struct StatusResponse {
    success: bool,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<i64>,
}

fn main() {
    let cli = Cli::parse();
    let json = cli.json;

    if let Err(e) = run(cli) {
        if json {
            eprintln!("{}", serde_json::json!({"error": e.to_string()}));
        } else {
            eprintln!("error: {}", e);
        }
        process::exit(1);
    }
}

fn init_logging(default_filter: &str) {
    let filter = EnvFilter::try_from_env("CLOTH_STOCK_LOG")
        .unwrap_or_else(|_| EnvFilter::new(default_filter));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn run(cli: Cli) -> Result<()> {
    let paths = AppPaths::resolve(cli.home.clone())?;
    let json = cli.json;

    match cli.command {
        // Terminal UI owns the screen, no log output.
        Some(Commands::Tui) => return tui::run(&paths),
        Some(Commands::Watch { action: WatchAction::Run }) => init_logging("info"),
        _ => init_logging("warn"),
    }

    let settings = Settings::load(&paths.config_file)?;

    match cli.command {
        None => cmd_list(
            &paths,
            ItemFilter {
                limit: Some(settings.list_limit),
                ..Default::default()
            },
            json,
        ),
        Some(Commands::Add {
            photo,
            size,
            color,
            category,
            memo,
        }) => {
            let defaults = settings.default_tags();
            let tags = TagData {
                size: size.unwrap_or(defaults.size),
                color: color.unwrap_or(defaults.color),
                category: category.unwrap_or(defaults.category),
            };
            cmd_add(&paths, &photo, tags, memo, json)
        }
        Some(Commands::List {
            limit,
            offset,
            category,
            min_size,
            max_size,
        }) => cmd_list(
            &paths,
            ItemFilter {
                query: None,
                category,
                min_size,
                max_size,
                limit: Some(limit.unwrap_or(settings.list_limit)),
                offset,
            },
            json,
        ),
        Some(Commands::Search { query, category }) => {
            let mut gallery = GalleryQuery::default();
            gallery.set_text(query);
            gallery.set_category(category);
            cmd_search(&paths, &gallery, json)
        }
        Some(Commands::Show { id }) => cmd_show(&paths, id, json),
        Some(Commands::Tag {
            id,
            size,
            color,
            category,
        }) => cmd_tag(&paths, id, size, color, category, json),
        Some(Commands::Memo { id, text, clear }) => cmd_memo(&paths, id, text, clear, json),
        Some(Commands::Delete { id, keep_file }) => cmd_delete(&paths, id, !keep_file, json),
        Some(Commands::Stats) => cmd_stats(&paths, json),
        Some(Commands::Categories) => cmd_categories(&paths, json),
        Some(Commands::Config { init }) => cmd_config(&paths, &settings, init, json),
        Some(Commands::Tui) => Ok(()),
        Some(Commands::Watch { action }) => {
            cmd_watch(&paths, &settings, cli.home.as_deref(), action, json)
        }
    }
}

fn open_repo(paths: &AppPaths) -> Result<Repo> {
    paths.ensure_dirs()?;
    let conn = Connection::open(&paths.db_path)?;
    Ok(ClothRepository::new(SqliteStorage::new(conn)?))
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string(value).map_err(std::io::Error::from)?
    );
    Ok(())
}

fn print_status(json: bool, success: bool, message: String, id: Option<i64>) -> Result<()> {
    if json {
        print_json(&StatusResponse {
            success,
            message,
            id,
        })
    } else {
        println!("{}", message);
        Ok(())
    }
}

fn cmd_add(
    paths: &AppPaths,
    photo: &std::path::Path,
    tags: TagData,
    memo: Option<String>,
    json: bool,
) -> Result<()> {
    let repo = open_repo(paths)?;
    let outcome = catalogue_photo(&repo, photo, &paths.images_dir, tags, memo)?;
    let (success, message) = match outcome {
        ImportOutcome::Added(ref item) => (true, format!("Added item #{}.", item.id)),
        ImportOutcome::AlreadyCatalogued(ref item) => (
            false,
            format!("This photo is already catalogued as item #{}.", item.id),
        ),
    };
    print_status(json, success, message, Some(outcome.item().id))
}

fn print_items(items: &[ClothItem], json: bool, empty_message: &str) -> Result<()> {
    if json {
        return print_json(items);
    }
    if items.is_empty() {
        println!("{}", empty_message);
        return Ok(());
    }
    for item in items {
        print_item_row(item);
    }
    Ok(())
}

fn cmd_list(paths: &AppPaths, filter: ItemFilter, json: bool) -> Result<()> {
    filter.validate()?;
    let repo = open_repo(paths)?;
    let items = repo.filtered(&filter)?;
    print_items(&items, json, "No items found.")
}

fn cmd_search(paths: &AppPaths, gallery: &GalleryQuery, json: bool) -> Result<()> {
    let repo = open_repo(paths)?;
    let items = gallery.fetch(&repo)?;
    print_items(
        &items,
        json,
        &format!("No results for {}.", gallery.describe()),
    )
}

fn cmd_show(paths: &AppPaths, id: i64, json: bool) -> Result<()> {
    let repo = open_repo(paths)?;
    let item = repo.get(id)?;
    if json {
        return print_json(&item);
    }
    print_item_detail(&item);
    Ok(())
}

fn cmd_tag(
    paths: &AppPaths,
    id: i64,
    size: Option<i32>,
    color: Option<String>,
    category: Option<String>,
    json: bool,
) -> Result<()> {
    if size.is_none() && color.is_none() && category.is_none() {
        return Err(ClothError::InvalidInput(
            "Give at least one of --size, --color, --category".to_string(),
        ));
    }
    let repo = open_repo(paths)?;
    let current = repo.get(id)?.tags;
    let tags = TagData {
        size: size.unwrap_or(current.size),
        color: color.unwrap_or(current.color),
        category: category.unwrap_or(current.category),
    };
    let updated = repo.update_tags(id, tags)?;
    if json {
        return print_json(&updated);
    }
    println!(
        "Item #{} is now size {}, {}, {}.",
        updated.id,
        updated.tags.size,
        or_dash(&updated.tags.color),
        or_dash(&updated.tags.category)
    );
    Ok(())
}

fn cmd_memo(paths: &AppPaths, id: i64, text: Option<String>, clear: bool, json: bool) -> Result<()> {
    if text.is_none() && !clear {
        return Err(ClothError::InvalidInput(
            "Give the memo text or --clear".to_string(),
        ));
    }
    let repo = open_repo(paths)?;
    let updated = repo.update_memo(id, if clear { None } else { text })?;
    let message = match updated.memo {
        Some(ref memo) => format!("Memo of item #{} set ({} characters).", id, memo.chars().count()),
        None => format!("Memo of item #{} cleared.", id),
    };
    print_status(json, true, message, Some(id))
}

fn cmd_delete(paths: &AppPaths, id: i64, remove_file: bool, json: bool) -> Result<()> {
    let repo = open_repo(paths)?;
    let found = repo.delete(id, remove_file)?;
    let message = if found {
        format!("Deleted item #{}.", id)
    } else {
        format!("Item #{} not found.", id)
    };
    print_status(json, found, message, Some(id))
}

fn cmd_stats(paths: &AppPaths, json: bool) -> Result<()> {
    let repo = open_repo(paths)?;
    let stats = repo.stats()?;
    let watcher_pid = watcher::watcher_status(paths).ok().flatten();

    if json {
        let mut obj = serde_json::to_value(&stats).map_err(std::io::Error::from)?;
        if let Some(m) = obj.as_object_mut() {
            m.insert("watcher_running".into(), serde_json::json!(watcher_pid.is_some()));
            m.insert("watcher_pid".into(), serde_json::json!(watcher_pid));
        }
        return print_json(&obj);
    }

    println!("Catalogue Statistics");
    println!("────────────────────");
    println!("Items:        {}", stats.total_items);
    println!("  with memo:  {}", stats.items_with_memo);
    if let (Some(min), Some(max)) = (stats.smallest_size, stats.largest_size) {
        println!("Sizes:        {} – {}", min, max);
    }
    if let Some(oldest) = stats.oldest {
        println!("Oldest:       {}", oldest.format("%Y-%m-%d %H:%M"));
    }
    if let Some(newest) = stats.newest {
        println!("Newest:       {}", newest.format("%Y-%m-%d %H:%M"));
    }
    for cat in &stats.categories {
        println!("  {:<12} {}", or_dash(&cat.category), cat.count);
    }
    match watcher_pid {
        Some(pid) => println!("Watcher:      running (pid {})", pid),
        None => println!("Watcher:      not running"),
    }
    Ok(())
}

fn cmd_categories(paths: &AppPaths, json: bool) -> Result<()> {
    let repo = open_repo(paths)?;
    let categories = repo.categories()?;
    if json {
        return print_json(&categories);
    }
    if categories.is_empty() {
        println!("No categories yet.");
    }
    for cat in &categories {
        println!("{:>4}  {}", cat.count, or_dash(&cat.category));
    }
    Ok(())
}

fn cmd_config(paths: &AppPaths, settings: &Settings, init: bool, json: bool) -> Result<()> {
    if init {
        settings.save(&paths.config_file)?;
    }
    if json {
        return print_json(&serde_json::json!({
            "settings": settings,
            "paths": {
                "base_dir": paths.base_dir,
                "db_path": paths.db_path,
                "images_dir": paths.images_dir,
                "inbox_dir": settings.inbox(paths),
                "config_file": paths.config_file,
            },
        }));
    }
    let toml_string = toml::to_string_pretty(settings)
        .map_err(|e| ClothError::Config(e.to_string()))?;
    println!("# {}", paths.config_file.display());
    print!("{}", toml_string);
    println!();
    println!("# database: {}", paths.db_path.display());
    println!("# images:   {}", paths.images_dir.display());
    println!("# inbox:    {}", settings.inbox(paths).display());
    if init {
        println!("# written");
    }
    Ok(())
}

fn cmd_watch(
    paths: &AppPaths,
    settings: &Settings,
    home: Option<&std::path::Path>,
    action: WatchAction,
    json: bool,
) -> Result<()> {
    match action {
        WatchAction::Start => {
            if let Some(pid) = watcher::watcher_status(paths)? {
                return print_status(
                    json,
                    true,
                    format!("Watcher already running (pid {}).", pid),
                    None,
                );
            }
            let pid = watcher::spawn_watcher(paths, home)?;
            print_status(
                json,
                true,
                format!(
                    "Started watcher (pid {}), drop photos into {}.",
                    pid,
                    settings.inbox(paths).display()
                ),
                None,
            )
        }
        WatchAction::Stop => {
            let stopped = watcher::stop_watcher(paths)?;
            let message = if stopped {
                "Stopped watcher."
            } else {
                "Watcher is not running."
            };
            print_status(json, stopped, message.to_string(), None)
        }
        WatchAction::Status => {
            let pid = watcher::watcher_status(paths)?;
            if json {
                return print_json(&serde_json::json!({
                    "running": pid.is_some(),
                    "pid": pid,
                }));
            }
            match pid {
                Some(pid) => println!("Watcher running (pid {}).", pid),
                None => println!("Watcher is not running."),
            }
            Ok(())
        }
        WatchAction::Run => watcher::run_watcher(paths, settings),
    }
}

fn or_dash(s: &str) -> &str {
    if s.is_empty() { "-" } else { s }
}

fn print_item_row(item: &ClothItem) {
    let memo = match item.memo {
        Some(ref memo) => {
            let oneline = memo.replace('\n', " ");
            let preview: String = oneline.chars().take(40).collect();
            if oneline.chars().count() > 40 {
                format!("  \"{}...\"", preview)
            } else {
                format!("  \"{}\"", preview)
            }
        }
        None => String::new(),
    };
    println!(
        "{:>4} {:>6}  {:>4}  {:<10} {:<12}{}",
        item.id,
        format_age(item.created_at),
        item.tags.size,
        or_dash(&item.tags.color),
        or_dash(&item.tags.category),
        memo
    );
}

fn print_item_detail(item: &ClothItem) {
    println!("ID:       {}", item.id);
    println!("Size:     {}", item.tags.size);
    println!("Color:    {}", or_dash(&item.tags.color));
    println!("Category: {}", or_dash(&item.tags.category));
    println!("Added:    {}", item.created_at.format("%Y-%m-%d %H:%M:%S"));
    println!("Photo:    {}", item.image_path);
    if let Some(ref memo) = item.memo {
        println!("─────────────────────────");
        println!("{}", memo);
    }
}

fn format_age(dt: chrono::DateTime<Utc>) -> String {
    let dur = Utc::now() - dt;
    if dur.num_seconds() < 60 {
        "now".to_string()
    } else if dur.num_minutes() < 60 {
        format!("{}m", dur.num_minutes())
    } else if dur.num_hours() < 24 {
        format!("{}h", dur.num_hours())
    } else {
        format!("{}d", dur.num_days())
    }
}
