use strata_node::app::MultiChainApp;
use strata_node::config::{NodeConfig, CONFIG_FILE_NAME};
use strata_node::logging;

#[tokio::main]
async fn main() {
    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| CONFIG_FILE_NAME.to_string());
    let config = match NodeConfig::load(&path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };
    logging::init(&config.logging);

    match MultiChainApp::from_config(&config) {
        Ok(app) => {
            let chains: Vec<&str> = app.chain_ids().collect();
            tracing::info!(?chains, "chains open; waiting for shutdown signal");
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("failed to listen for shutdown: {}", e);
            }
        }
        Err(e) => {
            tracing::error!("Fatal error: {}", e);
            std::process::exit(1);
        }
    }
}
