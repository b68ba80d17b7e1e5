use anyhow::Context;
use axum::serve;
use chrono::Utc;
use clap::Parser;
use std::future::IntoFuture;
use std::sync::Arc;
use tim::api::{self, AppState};
use tim::config::{Args, Config};
use tim_core::auth::Hs256Verifier;
use tim_core::db::TimDb;
use tim_core::events::EventBus;
use tim_core::plugin::HttpPluginClient;
use tim_core::snapshot::{snapshot_task, SnapshotManager};
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tokio::task::LocalSet;
use tokio::time::Duration;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Make sure every configured administrator exists and belongs to the
/// administrators group.
fn bootstrap_admins(db: &mut TimDb, names: &[String]) -> anyhow::Result<()> {
    let now = Utc::now();
    for name in names {
        let id = match db.users.user_by_name(name) {
            Some(user) => user.id,
            None => db.create_user(name, None, None, now)?,
        };
        db.make_admin(id, now)?;
        info!(user = %name, "administrator ready");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let mut config = Config::load(args.config.as_deref()).context("reading configuration")?;
    config.trust_user_header |= args.trust_user_header;

    let mut db = TimDb::open(&args.data_dir).context("opening database")?;
    // snapshots commit the data directory itself
    let snapshot_mgr = SnapshotManager::new(&args.data_dir)?;
    if args.list_snapshots {
        for snap in snapshot_mgr.list()? {
            println!("{} {} {}", snap.id, snap.time.to_rfc3339(), snap.message.trim());
        }
        return Ok(());
    }
    config.check_auth(&args.jwt_secret)?;
    if config.trust_user_header {
        tracing::warn!("X-User-Id is trusted as the caller's identity");
    }
    if let Some(rev) = &args.restore {
        snapshot_mgr.restore(&mut db, rev)?;
        info!(%rev, "snapshot restored");
    }
    bootstrap_admins(&mut db, &config.admins)?;
    let db = Arc::new(RwLock::new(db));

    let plugins = HttpPluginClient::new(
        config.plugins.clone(),
        config.plugin_timeout(),
        config.answer_timeout(),
    );
    let state = AppState {
        db: db.clone(),
        plugins: Arc::new(plugins),
        events: EventBus::new(),
        verifier: Arc::new(Hs256Verifier::new(&args.jwt_secret)),
        config: Arc::new(config),
    };
    let app = api::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any));

    // git2 handles are not Send, so the snapshot loop runs on a LocalSet
    let local = LocalSet::new();
    local.spawn_local(snapshot_task(
        db.clone(),
        snapshot_mgr,
        Duration::from_secs(args.snapshot_interval.max(1)),
    ));

    let listener = TcpListener::bind(&args.addr).await?;
    info!(addr = %args.addr, data_dir = %args.data_dir.display(), "listening");
    local
        .run_until(serve(listener, app.into_make_service()).into_future())
        .await?;
    Ok(())
}
