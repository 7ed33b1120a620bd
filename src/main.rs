// deepchat - Multi-turn streaming chat client with response caching
// Author: kelexine (https://github.com/kelexine)

use anyhow::Result;
use clap::Parser;
use deepchat::cache::CacheStore;
use deepchat::cli::{resolve_credentials, Args, Session};
use deepchat::client::ChatClient;
use deepchat::config::AppConfig;
use deepchat::executor::CodeBlockRunner;
use deepchat::history::ConversationHistory;
use deepchat::utils::logging;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

fn main() -> Result<()> {
    // Parse CLI arguments
    let args = Args::parse();

    // Phase 1: Load configuration
    let mut config = AppConfig::load(args.config.as_deref())?;

    // Phase 2: Initialize logging
    logging::init(&config.logging)?;
    info!("Starting deepchat v{}", env!("CARGO_PKG_VERSION"));

    // Phase 3: Resolve API key and model
    resolve_credentials(&mut config, &args)?;

    // Phase 4: Open history, cache and code runner
    let history = ConversationHistory::new(&config.history);
    let cache = CacheStore::new(&config.cache.dir);
    let runner = CodeBlockRunner::new(&config.executor);
    let use_cache = config.cache.enabled && !args.no_cache;

    // Single-threaded scheduler: drives the async loop, or code execution in blocking mode
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    // Ctrl-C sets a flag; each loop checks it and ends the current turn
    let interrupted = Arc::new(AtomicBool::new(false));
    let handler_flag = interrupted.clone();
    ctrlc::set_handler(move || {
        handler_flag.store(true, Ordering::SeqCst);
    })?;

    // Phase 5: Run the conversation loop
    let client = ChatClient::new(&config.api, cache).with_interrupt(interrupted.clone());
    let session = Session::new(history, client, runner, use_cache, interrupted);

    let result = if args.use_async {
        info!("Running in async mode");
        runtime.block_on(session.run_async())
    } else {
        session.run_blocking(&runtime)
    };
    session.close();

    // A pending stdin read must not hold up shutdown
    runtime.shutdown_timeout(Duration::from_millis(100));

    println!("\nGoodbye! Resources released.");
    result?;
    Ok(())
}
