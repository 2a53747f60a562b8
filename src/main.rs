use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{middleware::Compress, web, App, HttpServer};
use anyhow::Context;
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::{info, Level};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::EnvFilter;
use utoipa::OpenApi; // bring trait into scope for ApiDoc::openapi()
use utoipa_swagger_ui::SwaggerUi;

use civic_feed::accounts;
use civic_feed::openapi::ApiDoc;
use civic_feed::opendata::OpenDataClient;
use civic_feed::rate_limit::{InMemoryRateLimiter, RateLimitConfig, RateLimiterFacade};
use civic_feed::repo::Repo;
use civic_feed::{config, AppConfig, AppState, SecurityHeaders};

#[cfg(feature = "postgres-store")]
use civic_feed::repo::pg::PgRepo;

/// The chosen store plus whatever needs closing on shutdown.
struct Store {
    repo: Arc<dyn Repo>,
    #[cfg(feature = "postgres-store")]
    pg: Option<PgRepo>,
}

#[cfg(feature = "postgres-store")]
async fn open_pg_store(url: &str, cfg: &AppConfig) -> anyhow::Result<Store> {
    let pg = PgRepo::connect(url, cfg.db_max_connections)
        .await
        .context("connecting to Postgres")?;
    pg.migrate().await.context("running migrations")?;
    info!("Using Postgres repository backend");
    Ok(Store { repo: Arc::new(pg.clone()), pg: Some(pg) })
}

#[cfg(not(feature = "postgres-store"))]
async fn open_pg_store(_url: &str, _cfg: &AppConfig) -> anyhow::Result<Store> {
    anyhow::bail!("DATABASE_URL is set but the postgres-store feature is disabled")
}

#[cfg(feature = "inmem-store")]
fn open_memory_store(cfg: &AppConfig) -> anyhow::Result<Store> {
    use civic_feed::repo::inmem::InMemRepo;
    let repo = match &cfg.data_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
            info!(dir = %dir.display(), "Using in-memory repository with snapshot");
            InMemRepo::with_snapshot(dir)
        }
        None => {
            info!("Using in-memory repository backend");
            InMemRepo::new()
        }
    };
    Ok(Store {
        repo: Arc::new(repo),
        #[cfg(feature = "postgres-store")]
        pg: None,
    })
}

#[cfg(not(feature = "inmem-store"))]
fn open_memory_store(_cfg: &AppConfig) -> anyhow::Result<Store> {
    anyhow::bail!("DATABASE_URL must be set when the inmem-store feature is disabled")
}

async fn open_store(cfg: &AppConfig) -> anyhow::Result<Store> {
    match &cfg.database_url {
        Some(url) => open_pg_store(url, cfg).await,
        None => open_memory_store(cfg),
    }
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Load .env automatically only in debug builds.
    if cfg!(debug_assertions) {
        let _ = dotenv::dotenv();
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    let cfg = AppConfig::from_env()?;
    info!("Bootstrapping civic-feed server");
    info!(open_data_url = %cfg.open_data_url, token = cfg.open_data_app_token.is_some(), "Open data source configured");

    let store = open_store(&cfg).await?;
    if let Some(admin) = &cfg.admin {
        accounts::ensure_admin(store.repo.as_ref(), admin)
            .await
            .context("bootstrapping admin account")?;
    }
    let source = OpenDataClient::new(&cfg.open_data_url, cfg.open_data_app_token.clone(), cfg.open_data_timeout)
        .context("building open data client")?;
    let metrics = PrometheusBuilder::new()
        .install_recorder()
        .context("installing Prometheus recorder")?;
    let limiter = RateLimiterFacade::new(InMemoryRateLimiter::new(true), RateLimitConfig::from_env());

    let state = AppState::new(store.repo.clone(), Arc::new(source))
        .with_rate_limiter(limiter)
        .with_metrics(metrics);
    let openapi = ApiDoc::openapi();
    let frontend_url = cfg.frontend_url.clone();
    let enable_hsts = cfg.enable_hsts;

    let server = HttpServer::new(move || {
        let mut cors = Cors::default()
            // local Vite dev server
            .allowed_origin("http://localhost:5173")
            .allowed_origin("http://127.0.0.1:5173")
            .allow_any_header()
            .allowed_methods(["GET", "POST", "PUT", "OPTIONS"])
            .max_age(3600);
        if let Some(front) = &frontend_url {
            cors = cors.allowed_origin(front);
        }

        App::new()
            .wrap(TracingLogger::default())
            .wrap(Compress::default())
            .wrap(SecurityHeaders::new(enable_hsts))
            .wrap(cors)
            .app_data(web::Data::new(state.clone()))
            .configure(config)
            .service(SwaggerUi::new("/docs/{_:.*}").url("/docs/openapi.json", openapi.clone()))
    })
    .bind(&cfg.bind_addr)
    .with_context(|| format!("binding {}", cfg.bind_addr))?;

    info!("Listening on http://{}", cfg.bind_addr);
    server.run().await?;

    #[cfg(feature = "postgres-store")]
    if let Some(pg) = &store.pg {
        pg.close().await;
        info!("Postgres pool closed");
    }
    Ok(())
}
