use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use fcm_sync::FacultyService;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_LOG_FILTER: &str =
    "fcm_cli=info,fcm_sync=info,fcm_fetch=info,fcm_storage=info,fcm_web=info,tower_http=info";

#[derive(Debug, Parser)]
#[command(name = "fcm-cli")]
#[command(about = "Faculty citation metrics: web UI and table refresh")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
    #[command(flatten)]
    serve: ServeArgs,
}

#[derive(Debug, Clone, Args)]
struct ServeArgs {
    #[arg(long, env = "FCM_WEB_PORT", default_value_t = 8000)]
    port: u16,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Serve the web UI (default).
    Serve(ServeArgs),
    /// Refresh every faculty row and write the updated table.
    Sync,
    /// Refresh one faculty row by name.
    Fetch { name: String },
    /// List faculty names.
    Names,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let service = FacultyService::from_env()?;

    let command = cli.command.unwrap_or(Commands::Serve(cli.serve));
    match command {
        Commands::Serve(args) => fcm_web::serve(service, args.port).await?,
        Commands::Sync => {
            let summary = service.sync_all().await?;
            println!(
                "sync complete: run_id={} updated={}/{} failed={} snapshot={}",
                summary.run_id,
                summary.updated,
                summary.total,
                summary.failed.len(),
                service.config().updated_path.display()
            );
            for name in &summary.failed {
                println!("  failed: {name}");
            }
        }
        Commands::Fetch { name } => {
            let outcome = service.sync_one(&name).await?;
            let m = &outcome.metrics;
            println!(
                "{} -> citations={} h-index={} i10-index={}",
                m.name, m.citations, m.h_index, m.i10_index
            );
        }
        Commands::Names => {
            for name in service.faculty_names().await {
                println!("{name}");
            }
        }
    }

    Ok(())
}
