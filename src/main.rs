use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use workboard::api::{self, AppState};
use workboard_core::assist::{AssistModel, GeminiClient};
use workboard_core::auth::{IdentityProvider, LocalAuth};
use workboard_core::models::{Role, User};
use workboard_core::score::ScoreWeights;
use workboard_core::session::SessionManager;
use workboard_core::store::{Collection, DocumentStore, SqliteStore};

const DEMO_MANAGER_EMAIL: &str = "manager1@demo.ai";
const DEMO_MANAGER_PASSWORD: &str = "demo1234";

#[derive(Parser)]
#[command(name = "workboard")]
#[command(about = "Team task-visibility board with live sync and priority ranking")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the WorkBoard server
    Serve {
        /// Port for HTTP API
        #[arg(short, long, default_value = "3000")]
        port: u16,

        /// Path to the document-store database (platform default otherwise)
        #[arg(long)]
        db: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "workboard=debug,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Serve { port, db }) => serve(port, db).await,
        None => serve(3000, None).await,
    }
}

async fn serve(port: u16, db: Option<PathBuf>) -> anyhow::Result<()> {
    tracing::info!("Starting WorkBoard server on port {}", port);

    let store: Arc<dyn DocumentStore> = match db {
        Some(path) => Arc::new(SqliteStore::open(path)?),
        None => Arc::new(SqliteStore::open_default()?),
    };

    // The server runs as one demo-manager session: signing in drives
    // seeding and opens the live mirrors the API serves from.
    let auth = Arc::new(LocalAuth::new());
    let identity = auth
        .sign_in_or_create(DEMO_MANAGER_EMAIL, DEMO_MANAGER_PASSWORD)
        .await?;
    if store
        .get(Collection::Users, &identity.user_id)
        .await?
        .is_none()
    {
        let profile = User {
            id: identity.user_id.clone(),
            name: "Demo Manager".into(),
            email: identity.email.clone(),
            role: Role::Manager,
            today_status: "office".into(),
            scheduled_status: None,
            updated_at: Utc::now(),
        };
        store
            .set(Collection::Users, &profile.id, profile.to_data())
            .await?;
    }

    let (active_tx, active_rx) = watch::channel(None);
    let manager = SessionManager::new(store.clone(), ScoreWeights::default());
    tokio::spawn(manager.run(auth.auth_state(), active_tx));

    let assist: Option<Arc<dyn AssistModel>> = match std::env::var("GEMINI_API_KEY") {
        Ok(key) if !key.is_empty() => Some(Arc::new(GeminiClient::new(key))),
        _ => {
            tracing::info!("GEMINI_API_KEY not set; assist endpoints disabled");
            None
        }
    };

    let app = api::create_router(AppState {
        store,
        active: active_rx,
        assist,
    });

    let listener = tokio::net::TcpListener::bind(format!("127.0.0.1:{}", port)).await?;
    tracing::info!("WorkBoard server listening on http://127.0.0.1:{}", port);

    axum::serve(listener, app).await?;
    Ok(())
}
