mod cli;
mod demo_backend;
mod demo_transport;
mod logging;

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use clap::Parser;

use cli::Cli;
use demo_backend::DemoBackend;
use dispatcher_core::Dispatcher;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();

    let cli = Cli::parse();
    let config = cli.dispatcher_config();
    config.validate().map_err(anyhow::Error::from)?;

    tracing::info!(?config, "starting dispatcher demo");

    let dispatcher = Dispatcher::new(DemoBackend, config);
    let request_sender = dispatcher.request_sender.clone();

    let reader_handle = tokio::spawn(dispatcher.reader.run());
    let engine_handle = tokio::spawn(dispatcher.engine.run(demo_backend::initial_state()));

    let forced_exit = Arc::new(AtomicU8::new(0));
    {
        let forced_exit = forced_exit.clone();
        tokio::spawn(async move {
            loop {
                if tokio::signal::ctrl_c().await.is_err() {
                    return;
                }
                let n = forced_exit.fetch_add(1, Ordering::SeqCst) + 1;
                if n == 1 {
                    tracing::warn!("ctrl-c received, shutting down after the current demo session");
                } else {
                    tracing::warn!("ctrl-c received again, exiting immediately");
                    std::process::exit(130);
                }
            }
        });
    }

    // Two concurrent sessions both ask for "compile" up front, demonstrating
    // that the Work Queue coalesces them into a single in-flight command.
    let session_a = demo_transport::spawn_demo_session(
        &uuid::Uuid::new_v4().to_string(),
        request_sender.clone(),
    );
    let session_b = demo_transport::spawn_demo_session(
        &uuid::Uuid::new_v4().to_string(),
        request_sender.clone(),
    );
    session_a.await.expect("demo session task should not panic");
    session_b.await.expect("demo session task should not panic");

    drop(request_sender);
    match tokio::time::timeout(Duration::from_secs(2), reader_handle).await {
        Ok(joined) => joined.expect("reader task should not panic"),
        Err(_) => tracing::warn!("reader did not exit within the shutdown grace period"),
    }

    // The Engine Loop only exits on `Work::EndOfWork`; nothing in this demo
    // schedules one, so once the reader has drained and the session is over
    // there is no more work for it to do. Aborting here is the same clean
    // teardown the dispatcher core's own integration test uses.
    engine_handle.abort();

    tracing::info!("dispatcher demo finished");
    Ok(())
}
