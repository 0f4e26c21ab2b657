//! Salesdesk - client, opportunity and task tracking

use clap::Parser;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use salesdesk::{
    config::{Args, Command, LogFormat},
    csv::{collection_to_csv, read_import},
    drafting::FollowUpContext,
    records::RecordKind,
    server, App,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    // Logs go to stderr so command output stays clean on stdout
    let log_level = args.log_level.clone();
    let (text, json) = match args.log_format {
        LogFormat::Text => (
            Some(tracing_subscriber::fmt::layer().with_writer(std::io::stderr)),
            None,
        ),
        LogFormat::Json => (
            None,
            Some(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            ),
        ),
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("salesdesk={},info", log_level).into()),
        )
        .with(text)
        .with(json)
        .init();

    info!("======================================");
    info!("  Salesdesk v{}", env!("CARGO_PKG_VERSION"));
    info!("======================================");
    info!("Mode: {}", if args.dev_mode { "DEVELOPMENT" } else { "PRODUCTION" });
    info!("Backend: {}", args.backend_url.as_deref().unwrap_or("(in-process)"));
    info!("Sync strategy: {:?}", args.sync_strategy);
    info!("Generation API: {} ({})", args.llm_base_url, args.llm_model);
    info!("Preferences: {}", args.preferences_path.display());
    info!("======================================");

    let command = args.command();
    let app = match App::build(args).await {
        Ok(app) => Arc::new(app),
        Err(e) => {
            error!("Startup failed: {}", e);
            std::process::exit(1);
        }
    };

    match command {
        Command::Serve => server::run(app).await?,

        Command::Export { kind, out } => {
            app.sign_in_from_args().await?;
            let collections = app.collections().await?;
            let csv = match kind {
                RecordKind::Clients => collection_to_csv(&collections.clients)?,
                RecordKind::Interactions => collection_to_csv(&collections.interactions)?,
                RecordKind::Opportunities => collection_to_csv(&collections.opportunities)?,
                RecordKind::Tasks => collection_to_csv(&collections.tasks)?,
            };
            match out {
                Some(path) => {
                    std::fs::write(&path, csv)?;
                    info!("Exported {} to {}", kind, path.display());
                }
                None => println!("{}", csv),
            }
            app.identity.sign_out().await?;
        }

        Command::Import { file } => {
            let text = read_import(&file)?;
            println!("{}", text);
        }

        Command::Draft {
            client_id,
            language,
        } => {
            app.sign_in_from_args().await?;
            let collections = app.collections().await?;
            let context = FollowUpContext::from_collections(&client_id, &collections)?;
            let language = language.unwrap_or_else(|| app.localizer.language());
            let draft = app
                .drafting
                .draft_follow_up(
                    &context.client_name,
                    &context.interaction_summary,
                    &context.stage,
                    &context.salesperson,
                    &language,
                )
                .await?;
            println!("{}", draft);
            app.identity.sign_out().await?;
        }

        Command::Translate {
            key,
            params,
            language,
        } => {
            if let Some(language) = language {
                app.localizer.set_language(&language)?;
            }
            let params = salesdesk::i18n::params_from_pairs(&params)?;
            println!("{}", app.localizer.resolve(&key, Some(&params)));
        }
    }

    Ok(())
}
