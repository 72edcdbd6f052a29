mod app;
mod commands;
mod config;
mod events;
mod local_logger;
mod pagination;
mod prelude;
mod queries;
mod search_client;
mod tree;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let res = crate::app::run().await;
    if let Err(err) = res {
        eprintln!("Error: {}", err);
        std::process::exit(1);
    }
}
