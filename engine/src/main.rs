mod api;
mod app;
mod core;
mod data;
mod domain;

use app::EngineApp;

#[tokio::main]
async fn main() {
    if let Err(e) = EngineApp::run().await {
        eprintln!("\nError: {e:?}\n");
        std::process::exit(1);
    }
}
