use anyhow::Result;
use common::config::DashboardConfig;
use common::kv::KvStore;
use dashboard::api::{ApiClient, HttpTransport};
use dashboard::cli::{self, Context};
use dashboard::session::{CredentialStore, MemoryCredentialStore, SessionManager, SqliteCredentialStore};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = DashboardConfig::default_config_path();
    let config = DashboardConfig::load(&config_path)?;

    let (dispatch, _otel_guard) = common::observability::build_dispatch(
        "ethbot-dashboard",
        &config.general.log_level,
        config.general.log_format,
    );
    tracing::dispatcher::set_global_default(dispatch).map_err(anyhow::Error::msg)?;

    let cmd = cli::parse_args(std::env::args()).map_err(anyhow::Error::msg)?;
    info!(config = %config_path, base_url = %config.api.base_url, "ethbot dashboard starting");

    if let Some(port) = config.observability.prometheus_port {
        dashboard::metrics::install_prometheus(port)?;
        dashboard::metrics::describe();
        info!(port, "prometheus exporter listening");
    }

    let transport = HttpTransport::new(&config.api.base_url, config.api.request_timeout())?;
    let api = ApiClient::new(transport);

    match &config.session.store_path {
        Some(path) => {
            let kv = KvStore::open(path).await?;
            let store = SqliteCredentialStore::new(kv, config.session.storage_key.clone());
            run(&config, api, store, cmd).await
        }
        None => {
            info!("no session.store_path configured, credentials will not persist");
            run(&config, api, MemoryCredentialStore::new(), cmd).await
        }
    }
}

async fn run<S: CredentialStore>(
    config: &DashboardConfig,
    api: ApiClient<HttpTransport>,
    store: S,
    cmd: cli::Command,
) -> Result<()> {
    let session = SessionManager::startup(api.clone(), store).await;
    let ctx = Context {
        api,
        session,
        period: config.polling.interval(),
    };
    cli::run_command(&ctx, cmd).await
}
