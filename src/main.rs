use std::path::PathBuf;
use std::sync::Arc;

mod ai;
mod config;
mod db;
mod enrichment;
mod error;
mod models;

use ai::{OpenAiClient, TextGenerator};
use config::Config;
use db::Repository;
use enrichment::{ArticleLifecycleHooks, EnrichmentScheduler, SchedulerConfig};
use error::Result;
use models::{Article, ArticleUpdate, NewArticleRequest};

const USAGE: &str = "usage: article-enricher [--list | --create <title> <content-file> | \
--update-title <id> <title> | --update-content <id> <content-file> | \
--regenerate-slug <id> | --regenerate-summary <id> | --publish <id> | --archive <id> | --delete <id>]";

#[derive(Debug, PartialEq)]
enum Command {
    List,
    Create { title: String, content_file: PathBuf },
    UpdateTitle { id: i64, title: String },
    UpdateContent { id: i64, content_file: PathBuf },
    RegenerateSlug(i64),
    RegenerateSummary(i64),
    Publish(i64),
    Archive(i64),
    Delete(i64),
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = parse_args(&args)?;

    let config = Config::load()?;
    let repository = Arc::new(Repository::new(&config.db_path).await?);

    let client = OpenAiClient::from_config(&config)?;
    if client.is_configured() {
        tracing::info!(model = client.model_version(), "AI enrichment enabled");
    } else {
        tracing::warn!("No OpenAI API key configured, only fallback values will be written");
    }

    let scheduler = EnrichmentScheduler::start(
        SchedulerConfig::from(&config),
        Arc::new(client),
        repository.clone(),
    );
    let mut reports = scheduler.subscribe();
    let hooks = ArticleLifecycleHooks::new(repository.clone(), scheduler.queue());

    run_command(&hooks, command).await?;

    let pending = scheduler.queue().pending();
    if pending > 0 {
        tracing::info!(pending, "Waiting for enrichment tasks");
    }
    scheduler.shutdown().await;

    while let Ok(report) = reports.try_recv() {
        println!(
            "#{} {}: {:?} after {} attempt(s){}",
            report.article_id,
            report.kind,
            report.state,
            report.attempts,
            report.value.map(|v| format!(" -> {}", v)).unwrap_or_default()
        );
    }

    for article in repository.list_articles().await? {
        print_article(&article);
    }

    Ok(())
}

fn parse_args(args: &[String]) -> Result<Command> {
    let command = match args {
        [] => Command::List,
        [flag] if flag == "--list" => Command::List,
        [flag, title, file] if flag == "--create" => Command::Create {
            title: title.clone(),
            content_file: PathBuf::from(file),
        },
        [flag, id, title] if flag == "--update-title" => Command::UpdateTitle {
            id: parse_id(id)?,
            title: title.clone(),
        },
        [flag, id, file] if flag == "--update-content" => Command::UpdateContent {
            id: parse_id(id)?,
            content_file: PathBuf::from(file),
        },
        [flag, id] => {
            let id = parse_id(id)?;
            match flag.as_str() {
                "--regenerate-slug" => Command::RegenerateSlug(id),
                "--regenerate-summary" => Command::RegenerateSummary(id),
                "--publish" => Command::Publish(id),
                "--archive" => Command::Archive(id),
                "--delete" => Command::Delete(id),
                _ => return Err(anyhow::anyhow!(USAGE).into()),
            }
        }
        _ => return Err(anyhow::anyhow!(USAGE).into()),
    };
    Ok(command)
}

fn parse_id(raw: &str) -> Result<i64> {
    raw.parse()
        .map_err(|_| anyhow::anyhow!("invalid article id: {}", raw).into())
}

async fn run_command(hooks: &ArticleLifecycleHooks, command: Command) -> Result<()> {
    match command {
        Command::List => {}
        Command::Create {
            title,
            content_file,
        } => {
            let content = std::fs::read_to_string(&content_file)?;
            let article = hooks
                .create_article(NewArticleRequest {
                    title,
                    content,
                    ..NewArticleRequest::default()
                })
                .await?;
            println!("Created article #{} ({})", article.id, article.slug);
        }
        Command::UpdateTitle { id, title } => {
            let update = ArticleUpdate {
                title: Some(title),
                ..ArticleUpdate::default()
            };
            report_found(id, hooks.update_article(id, update).await?.is_some());
        }
        Command::UpdateContent { id, content_file } => {
            let update = ArticleUpdate {
                content: Some(std::fs::read_to_string(&content_file)?),
                ..ArticleUpdate::default()
            };
            report_found(id, hooks.update_article(id, update).await?.is_some());
        }
        Command::RegenerateSlug(id) => report_found(id, hooks.regenerate_slug(id).await?),
        Command::RegenerateSummary(id) => report_found(id, hooks.regenerate_summary(id).await?),
        Command::Publish(id) => report_found(id, hooks.publish(id).await?.is_some()),
        Command::Archive(id) => report_found(id, hooks.archive(id).await?.is_some()),
        Command::Delete(id) => report_found(id, hooks.delete_article(id).await?),
    }
    Ok(())
}

fn report_found(id: i64, found: bool) {
    if !found {
        eprintln!("Article #{} not found", id);
    }
}

fn print_article(article: &Article) {
    let published = article
        .published_at
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string());
    println!(
        "#{} [{}] {} ({})\n    slug: {}\n    summary: {}",
        article.id, article.status, article.title, published, article.slug, article.summary
    );
}
