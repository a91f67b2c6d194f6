use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use newsfeed_curator::models::{Article, ArticleSource, ArticlesFilter};
use newsfeed_curator::services::{Imported, LogNotifier, RunOutcome, Scheduler};
use newsfeed_curator::{App, AppError, Config, Result};

const USAGE: &str = "Usage: newsfeed [--refresh | --page N [feed|bookmarks|history] | --import PATH | --export PATH | --export-opml PATH | --subscribe URL | --background]";

enum Command {
    Refresh,
    Page(usize, ArticleSource),
    Import(PathBuf),
    Export(PathBuf),
    ExportOpml(PathBuf),
    Subscribe(String),
    Background,
}

fn parse_args(args: &[String]) -> Option<Command> {
    let flag = args.get(1)?.as_str();
    let value = args.get(2);
    match (flag, value) {
        ("--refresh", _) => Some(Command::Refresh),
        ("--background", _) => Some(Command::Background),
        ("--page", Some(n)) => {
            let source = match args.get(3) {
                Some(s) => s.parse().ok()?,
                None => ArticleSource::Feed,
            };
            n.parse().ok().map(|n| Command::Page(n, source))
        }
        ("--import", Some(path)) => Some(Command::Import(PathBuf::from(path))),
        ("--export", Some(path)) => Some(Command::Export(PathBuf::from(path))),
        ("--export-opml", Some(path)) => Some(Command::ExportOpml(PathBuf::from(path))),
        ("--subscribe", Some(url)) => Some(Command::Subscribe(url.clone())),
        _ => None,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Only warnings and errors unless RUST_LOG says otherwise
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    let Some(command) = parse_args(&args) else {
        eprintln!("{}", USAGE);
        return Ok(());
    };

    let config = Config::load()?;
    let app = App::new(&config).await?;

    let cancel = CancellationToken::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_ctrl_c.cancel();
        }
    });

    let result = run(command, app, &config, &cancel).await;
    match result {
        Err(e) if e.is_aborted() => {
            eprintln!("Cancelled");
            Ok(())
        }
        other => other,
    }
}

async fn run(
    command: Command,
    mut app: App,
    config: &Config,
    cancel: &CancellationToken,
) -> Result<()> {
    match command {
        Command::Refresh => {
            let pages = app.refresh(cancel).await?;
            let total: usize = pages.iter().map(Vec::len).sum();
            println!("Loaded {} articles from {} feeds", total, app.settings().feeds.len());
        }
        Command::Page(n, source) => {
            let pages = app
                .get_articles_paginated(source, &ArticlesFilter::default(), cancel)
                .await?;
            let page = n
                .checked_sub(1)
                .and_then(|i| pages.get(i))
                .ok_or_else(|| AppError::from(anyhow::anyhow!("Page {} of {} does not exist", n, pages.len())))?;
            print_page(page);
        }
        Command::Import(path) => {
            let text = tokio::fs::read_to_string(&path).await?;
            match app.try_load_backup(&text).await? {
                Imported::Backup => println!("Restored backup from {:?}", path),
                Imported::Opml(added) => println!("Imported {} feeds from {:?}", added, path),
            }
        }
        Command::Export(path) => {
            tokio::fs::write(&path, app.create_backup().await?).await?;
            println!("Backup written to {:?}", path);
        }
        Command::ExportOpml(path) => {
            tokio::fs::write(&path, app.export_opml()?).await?;
            println!("Exported {} feeds to {:?}", app.settings().feeds.len(), path);
        }
        Command::Subscribe(input) => {
            let url = app.guess_feed_url(&input).await?.unwrap_or(input);
            let feed = app.subscribe(&url).await?;
            println!("Subscribed to {} ({})", feed.name, feed.url);
        }
        Command::Background => {
            let scheduler = Scheduler::new(Arc::new(LogNotifier), &config.backup_dir);
            let outcome = scheduler.run(&Mutex::new(app), cancel).await?;
            match outcome {
                RunOutcome::Completed(report) => println!(
                    "Background run finished: {} articles, notification: {}, backup: {}",
                    report.articles,
                    report.notified.as_deref().unwrap_or("none"),
                    if report.backup_written { "written" } else { "not due" }
                ),
                RunOutcome::Disabled => println!("Background tasks are disabled"),
                RunOutcome::AlreadyRunning => println!("A background run is already in progress"),
            }
        }
    }
    Ok(())
}

fn print_page(page: &[Article]) {
    for article in page {
        let date = article
            .date
            .map(|d| d.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_default();
        println!("[{}] {} ({}) {}", article.id, article.title, article.source, date);
        println!("    {}", article.url);
    }
}
