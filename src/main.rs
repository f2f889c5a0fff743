use std::{sync::Arc, time::Duration};

use clinic_booking::{
    config::Config,
    db,
    gateway::{PaymentGateway, StripeGateway},
    models::AppState,
    reminders::{PgReminders, Reminders},
    routes,
    services::lifecycle::LifecycleService,
    store::{PgStore, Store},
};

use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use axum::http::header;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let cfg = Config::from_env()?;
    let pool = db::connect_pg(&cfg.database_url).await?;

    let store = Arc::new(PgStore::new(pool.clone()));
    let gateway: Arc<dyn PaymentGateway> = Arc::new(StripeGateway::new(&cfg.payment));
    let reminders: Arc<dyn Reminders> =
        Arc::new(PgReminders::new(pool, cfg.reminder_lead_minutes));

    let state = AppState::new(
        store,
        gateway,
        reminders,
        &cfg.payment,
        cfg.reminder_lead_minutes,
    );

    spawn_archiver(
        state.lifecycle.clone(),
        Duration::from_secs(cfg.archive_interval_secs.max(1)),
    );

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            header::ACCEPT,
        ]);

    let app = routes::router(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    tracing::info!("Listening on http://{}", cfg.bind_addr);
    let listener = tokio::net::TcpListener::bind(&cfg.bind_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

/// Periodically flags finished appointments as archived.
fn spawn_archiver<S: Store>(lifecycle: Arc<LifecycleService<S>>, every: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            match lifecycle.archive_elapsed(chrono::Utc::now()).await {
                Ok(0) => {}
                Ok(n) => tracing::info!(archived = n, "archived finished appointments"),
                Err(e) => tracing::error!(error = %e, "archive sweep failed"),
            }
        }
    });
}
