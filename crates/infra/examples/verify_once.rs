//! Example: running a single verification pass by hand
//!
//! Wires the document store, token cache, Graph client and scheduler the way
//! application bootstrap code would, then runs one pass instead of starting
//! the periodic loop.
//!
//! # Setup
//!
//! 1. Point the store at a data file: ```bash export
//!    MAILVAULT_DATA_FILE=data/data.json ```
//!
//! 2. Optionally set `MAILVAULT_TOKEN_ENC_KEY` if the stored credentials are
//!    sealed.
//!
//! 3. Run: ```bash cargo run -p mailvault-infra --example verify_once ```

use std::sync::Arc;

use mailvault_common::cache::TokenCache;
use mailvault_infra::{
    AccountVerifyScheduler, DocumentStore, GraphClient, GraphClientConfig, Settings,
    VerifySchedulerConfig,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let settings = Settings::from_env();
    println!("MailVault verification pass");
    println!("data file: {}\n", settings.data_file_path.display());

    let store = Arc::new(DocumentStore::new(&settings.data_file_path));
    store.ensure_initialized()?;

    let tokens = Arc::new(TokenCache::new());
    let client = GraphClient::new(
        GraphClientConfig { timeout: settings.request_timeout, ..Default::default() },
        Arc::clone(&tokens),
    )?;
    let cipher = Arc::new(settings.credential_cipher());

    let scheduler = AccountVerifyScheduler::new(
        store,
        Arc::new(client),
        cipher,
        VerifySchedulerConfig { interval: settings.verify_interval, ..Default::default() },
    );

    let summary = scheduler.run_pass().await?;
    println!(
        "✓ pass complete: {} valid, {} invalid, {} errors",
        summary.valid, summary.invalid, summary.errored
    );

    Ok(())
}
