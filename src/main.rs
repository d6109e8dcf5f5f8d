use chat_relay::RelayConfig;
use log::{error, info, warn};

#[tokio::main(flavor = "current_thread")]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = match RelayConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {e}");
            std::process::exit(1);
        }
    };

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to install ctrl-c handler: {e}");
            std::future::pending::<()>().await;
        }
        info!("Shutting down chat relay");
    };

    if let Err(e) = chat_relay::run(config, shutdown).await {
        error!("Chat relay failed: {e}");
        std::process::exit(1);
    }
}
