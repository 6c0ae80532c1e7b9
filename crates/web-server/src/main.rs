use configuration::{DEFAULT_CONFIG_FILE, load_config, logging};
use std::path::Path;

// This main function is the entry point when running `cargo run -p web-server`.
// It serves the API against PostgreSQL with settings from `config.toml` and the environment.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let settings = load_config(Path::new(DEFAULT_CONFIG_FILE))?;
    let _log_guard = logging::init(&settings.logging)?;

    let store = web_server::postgres_store(&settings.database).await?;
    web_server::run_server(&settings, store).await
}
