mod app;
mod commands;
mod config;
mod logging;
mod recording;
mod ui;

#[tokio::main]
async fn main() {
    if let Err(e) = app::run().await {
        tracing::error!("vmemo failed: {e:#}");
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
