use std::sync::Arc;

use dotenv::dotenv;
use rekishi_quiz::config::ServerConfig;
use rekishi_quiz::quiz::ai_helper::QuizHelper;
use rekishi_quiz::server::router;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    dotenv().ok();
    pretty_env_logger::init();

    let config = ServerConfig::from_env()?;
    let helper = Arc::new(QuizHelper::new(config.generation)?);

    let listener = tokio::net::TcpListener::bind(config.addr).await?;
    log::info!("Quiz server listening on {}", config.addr);

    axum::serve(listener, router(helper))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    log::info!("Quiz server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("Failed to listen for ctrl-c: {}", e);
        std::future::pending::<()>().await;
    }
    log::info!("Shutting down...");
}
