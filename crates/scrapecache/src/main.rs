//! Scrapecache.
//!
//! Inspects and verifies the state persisted by collectors, and computes cache tags for
//! collector configurations.

mod cli;
mod output;

#[tokio::main]
async fn main() {
    match cli::execute().await {
        Ok(()) => std::process::exit(0),
        Err(error) => {
            scrapecache_service::logging::ensure_log_error(&error);
            std::process::exit(1);
        }
    }
}
