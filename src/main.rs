// Copyright (c) 2024-2025 Jesse Morgan
// Licensed under the MIT License. See LICENSE file for details.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};

use offshelf::catalog::Catalog;
use offshelf::cart::Cart;
use offshelf::download::{
    ContentStatus, DownloadHandle, DownloadManager, DownloadPhase, ProgressPhase,
};
use offshelf::error::StoreError;
use offshelf::store::{JsonFileStore, KeyValueStore};
use offshelf::types::{ContentId, ContentItem};
use offshelf::wishlist::Wishlist;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "offshelf", version = VERSION, about = "Local-first content storefront")]
struct Cli {
    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Override the data directory (default: ~/.offshelf)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Browse the content catalog
    Catalog {
        #[command(subcommand)]
        command: CatalogCommand,
    },
    /// Manage downloads and offline content
    Download {
        #[command(subcommand)]
        command: DownloadCommand,
    },
    /// Manage the shopping cart
    Cart {
        #[command(subcommand)]
        command: CartCommand,
    },
    /// Manage the wishlist
    Wishlist {
        #[command(subcommand)]
        command: WishlistCommand,
    },
    /// Show storefront statistics
    Stats,
}

#[derive(Subcommand)]
enum CatalogCommand {
    /// List catalog items
    List {
        /// Only items in this section
        #[arg(long)]
        section: Option<String>,
    },
    /// Show one item in detail
    Show { id: ContentId },
    /// Search title, author, description and category
    Search { query: String },
}

#[derive(Subcommand)]
enum DownloadCommand {
    /// Start downloading an item
    Start {
        id: ContentId,
        /// Stay attached and render a progress bar
        #[arg(long)]
        watch: bool,
    },
    /// List active downloads and offline content
    List,
    /// Cancel an active download
    Cancel { id: ContentId },
    /// Retry a failed download
    Retry {
        id: ContentId,
        #[arg(long)]
        watch: bool,
    },
    /// Remove offline content
    Remove { id: ContentId },
}

#[derive(Subcommand)]
enum CartCommand {
    /// Add an item to the cart
    Add { id: ContentId },
    /// Remove an item from the cart
    Remove { id: ContentId },
    /// Show the cart
    List,
    /// Empty the cart
    Clear,
}

#[derive(Subcommand)]
enum WishlistCommand {
    /// Add an item to the wishlist
    Add { id: ContentId },
    /// Remove an item from the wishlist
    Remove { id: ContentId },
    /// Show the wishlist
    List,
    /// Empty the wishlist
    Clear,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .init();

    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    runtime.block_on(run(cli))
}

/// Shared handles for every subcommand.
struct App {
    catalog: Catalog,
    downloads: DownloadManager,
    cart: Cart,
    wishlist: Wishlist,
}

impl App {
    fn new(data_dir: Option<PathBuf>) -> Result<Self> {
        let store: Arc<dyn KeyValueStore> = match data_dir {
            Some(dir) => Arc::new(JsonFileStore::with_dir(dir)),
            None => Arc::new(JsonFileStore::new()),
        };
        Ok(Self {
            catalog: Catalog::builtin()?,
            downloads: DownloadManager::new(Arc::clone(&store)),
            cart: Cart::new(Arc::clone(&store)),
            wishlist: Wishlist::new(store),
        })
    }
}

async fn run(cli: Cli) -> Result<()> {
    let app = App::new(cli.data_dir)?;

    match cli.command {
        Command::Catalog { command } => run_catalog(&app, command).await,
        Command::Download { command } => run_download(&app, command).await,
        Command::Cart { command } => run_cart(&app, command).await,
        Command::Wishlist { command } => run_wishlist(&app, command).await,
        Command::Stats => run_stats(&app).await,
    }
}

// =============================================================================
// Catalog commands
// =============================================================================

async fn run_catalog(app: &App, command: CatalogCommand) -> Result<()> {
    match command {
        CatalogCommand::List { section } => {
            let items = match &section {
                Some(section) => app.catalog.get_by_section(section).await,
                None => app.catalog.get_all().await,
            };
            if items.is_empty() {
                println!("{}", "No items found.".dimmed());
                return Ok(());
            }
            for item in items {
                print_item_line(app, &item);
            }
        }
        CatalogCommand::Show { id } => match app.catalog.get_by_id(id).await {
            Ok(item) => print_item_detail(app, &item),
            Err(e) => return render_benign(e),
        },
        CatalogCommand::Search { query } => {
            let items = app.catalog.search(&query).await;
            if items.is_empty() {
                println!("{}", format!("Nothing matched '{}'.", query).dimmed());
                return Ok(());
            }
            println!("{} result(s) for '{}':", items.len(), query.bold());
            for item in items {
                print_item_line(app, &item);
            }
        }
    }
    Ok(())
}

fn print_item_line(app: &App, item: &ContentItem) {
    let status = status_tag(&app.downloads.content_status(item.id));
    println!(
        "{:>4}  {:<40}  {:<18}  {:<8}  {:>8}  {}",
        item.id.to_string().dimmed(),
        item.title.bold(),
        item.author,
        item.kind.as_str().cyan(),
        format!("${:.2}", item.price),
        status
    );
}

fn print_item_detail(app: &App, item: &ContentItem) {
    println!("{} {}", item.title.bold(), format!("#{}", item.id).dimmed());
    println!("  by {}", item.author);
    println!(
        "  {} / {} / section '{}'",
        item.kind.as_str().cyan(),
        item.category,
        item.section
    );
    println!("  {}", format!("${:.2}", item.price).green());
    if !item.description.is_empty() {
        println!("\n  {}", item.description);
    }
    println!("\n  status: {}", status_tag(&app.downloads.content_status(item.id)));
    if app.cart.is_in_cart(item.id) {
        println!("  {}", "in your cart".yellow());
    }
}

fn status_tag(status: &ContentStatus) -> String {
    match status {
        ContentStatus::Available => "available".dimmed().to_string(),
        ContentStatus::Downloading { progress, .. } => {
            format!("downloading {}%", progress).cyan().to_string()
        }
        ContentStatus::Failed { .. } => "failed".red().to_string(),
        ContentStatus::Offline { .. } => "offline".green().to_string(),
    }
}

// =============================================================================
// Download commands
// =============================================================================

async fn run_download(app: &App, command: DownloadCommand) -> Result<()> {
    match command {
        DownloadCommand::Start { id, watch } => {
            let item = match app.catalog.get_by_id(id).await {
                Ok(item) => item,
                Err(e) => return render_benign(e),
            };
            match app.downloads.start(&item) {
                Some(handle) => report_or_watch(&item.title, handle, watch).await?,
                None => println!(
                    "{} '{}' is already downloading or offline.",
                    "[!]".yellow(),
                    item.title
                ),
            }
        }
        DownloadCommand::List => {
            let active = app.downloads.active_downloads();
            let offline = app.downloads.offline_content();
            if active.is_empty() && offline.is_empty() {
                println!("{}", "Nothing downloading, nothing offline.".dimmed());
                return Ok(());
            }
            if !active.is_empty() {
                println!("{}", "Active".bold());
                for record in active {
                    let phase = match &record.phase {
                        DownloadPhase::Downloading => format!("{}%", record.progress).cyan(),
                        DownloadPhase::Failed { error } => format!("failed: {}", error).red(),
                    };
                    println!(
                        "  {:>4}  {:<40}  {:>3}/{} MB  {}",
                        record.content_id, record.title, record.downloaded, record.total_size, phase
                    );
                }
            }
            if !offline.is_empty() {
                println!("{}", "Offline".bold());
                for record in offline {
                    println!(
                        "  {:>4}  {:<40}  {:>3} MB  {}",
                        record.content_id,
                        record.title,
                        record.total_size,
                        record.completed_at.format("%Y-%m-%d %H:%M").to_string().dimmed()
                    );
                }
            }
        }
        DownloadCommand::Cancel { id } => {
            if app.downloads.cancel(id) {
                println!("{} Download cancelled.", "[ok]".green());
            } else {
                println!("{} No active download for content {}.", "[!]".yellow(), id);
            }
        }
        DownloadCommand::Retry { id, watch } => match app.downloads.retry(id) {
            Ok(handle) => {
                let item = app.catalog.get_by_id(id).await.ok();
                let title = item.map(|i| i.title).unwrap_or_else(|| format!("content {}", id));
                report_or_watch(&title, handle, watch).await?;
            }
            Err(e) => return render_benign(e),
        },
        DownloadCommand::Remove { id } => {
            if app.downloads.remove_offline(id) {
                println!("{} Offline copy removed.", "[ok]".green());
            } else {
                println!("{} Content {} is not offline.", "[!]".yellow(), id);
            }
        }
    }
    Ok(())
}

async fn report_or_watch(title: &str, mut handle: DownloadHandle, watch: bool) -> Result<()> {
    if !watch {
        println!(
            "{} Downloading '{}' ({})...",
            "[ok]".green(),
            title,
            handle.download_id.dimmed()
        );
        // The driver dies with the process, so the CLI always sees the
        // transfer through; a long-lived embedder would drop the handle here
        let final_update = handle.wait().await;
        match final_update.phase {
            ProgressPhase::Failed { error } => {
                println!("{} Download failed: {}", "[x]".red(), error);
            }
            _ => println!("{} '{}' is now available offline.", "[ok]".green(), title),
        }
        return Ok(());
    }

    let bar = ProgressBar::new(100);
    bar.set_style(
        ProgressStyle::with_template("{msg:<40} [{bar:40.cyan/blue}] {pos:>3}%")
            .context("Invalid progress bar template")?
            .progress_chars("=> "),
    );
    bar.set_message(title.to_string());

    let mut rx = handle.watch();
    loop {
        let update = rx.borrow().clone();
        match update.phase {
            ProgressPhase::Downloading { progress, .. } => {
                bar.set_position(progress as u64);
            }
            ProgressPhase::Completed { total_size } => {
                bar.set_position(100);
                bar.finish_with_message(format!("{} ({} MB offline)", title, total_size));
                println!("{} '{}' is now available offline.", "[ok]".green(), title);
                break;
            }
            ProgressPhase::Failed { error } => {
                bar.abandon_with_message(format!("{} (failed)", title));
                println!("{} Download failed: {}", "[x]".red(), error);
                break;
            }
        }
        if rx.changed().await.is_err() {
            break;
        }
    }
    Ok(())
}

// =============================================================================
// Cart commands
// =============================================================================

async fn run_cart(app: &App, command: CartCommand) -> Result<()> {
    match command {
        CartCommand::Add { id } => {
            let item = match app.catalog.get_by_id(id).await {
                Ok(item) => item,
                Err(e) => return render_benign(e),
            };
            if app.cart.add(&item)? {
                println!("{} '{}' added to cart.", "[ok]".green(), item.title);
            } else {
                println!("{} '{}' is already in your cart.", "[i]".blue(), item.title);
            }
        }
        CartCommand::Remove { id } => {
            if app.cart.remove(id)? {
                println!("{} Removed from cart.", "[ok]".green());
            } else {
                println!("{} Content {} is not in your cart.", "[!]".yellow(), id);
            }
        }
        CartCommand::List => {
            let items = app.cart.items();
            if items.is_empty() {
                println!("{}", "Your cart is empty.".dimmed());
                return Ok(());
            }
            for item in &items {
                println!(
                    "  {:>4}  {:<40}  {:>8}",
                    item.id,
                    item.title,
                    format!("${:.2}", item.price)
                );
            }
            println!(
                "  {} item(s), total {}",
                app.cart.total_items(),
                format!("${:.2}", app.cart.total_price()).green().bold()
            );
        }
        CartCommand::Clear => {
            app.cart.clear()?;
            println!("{} Cart emptied.", "[ok]".green());
        }
    }
    Ok(())
}

// =============================================================================
// Wishlist commands
// =============================================================================

async fn run_wishlist(app: &App, command: WishlistCommand) -> Result<()> {
    match command {
        WishlistCommand::Add { id } => {
            let item = match app.catalog.get_by_id(id).await {
                Ok(item) => item,
                Err(e) => return render_benign(e),
            };
            match app.wishlist.add(&item).await {
                Ok(entry) => println!(
                    "{} '{}' added to wishlist (entry {}).",
                    "[ok]".green(),
                    item.title,
                    entry.id
                ),
                // Duplicate is information, not an error
                Err(e @ StoreError::AlreadyExists { .. }) => {
                    println!("{} '{}' is already on your wishlist.", "[i]".blue(), item.title);
                    tracing::debug!("wishlist add rejected: {}", e);
                }
                Err(e) => return render_benign(e),
            }
        }
        WishlistCommand::Remove { id } => match app.wishlist.remove(id).await {
            Ok(entry) => println!("{} '{}' removed from wishlist.", "[ok]".green(), entry.title),
            Err(e) => return render_benign(e),
        },
        WishlistCommand::List => {
            let entries = app.wishlist.all().await;
            if entries.is_empty() {
                println!("{}", "Your wishlist is empty.".dimmed());
                return Ok(());
            }
            for entry in entries {
                println!(
                    "  {:>4}  {:<40}  {:<18}  {:>8}  {}",
                    entry.content_id,
                    entry.title,
                    entry.author,
                    format!("${:.2}", entry.price),
                    entry.added_at.format("%Y-%m-%d").to_string().dimmed()
                );
            }
        }
        WishlistCommand::Clear => {
            app.wishlist.clear().await?;
            println!("{} Wishlist emptied.", "[ok]".green());
        }
    }
    Ok(())
}

// =============================================================================
// Stats
// =============================================================================

async fn run_stats(app: &App) -> Result<()> {
    let stats = app.downloads.stats();
    println!("{}", "Downloads".bold());
    println!("  active:    {}", stats.active);
    println!("  completed: {}", stats.completed);
    println!("  on disk:   {} MB", stats.total_size);
    println!("{}", "Cart".bold());
    println!("  items: {}", app.cart.total_items());
    println!("  total: ${:.2}", app.cart.total_price());
    println!("{}", "Wishlist".bold());
    println!("  items: {}", app.wishlist.len());
    Ok(())
}

// =============================================================================
// Error rendering
// =============================================================================

/// Benign domain conditions become user messages; anything else escalates.
fn render_benign(e: StoreError) -> Result<()> {
    if e.is_benign() {
        println!("{} {}", "[!]".yellow(), e);
        Ok(())
    } else {
        Err(e.into())
    }
}
