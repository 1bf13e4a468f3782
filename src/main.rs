use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;

use extraction_monitor::client::HttpTaskClient;
use extraction_monitor::config::MonitorConfig;
use extraction_monitor::jobs::RegistryEvent;
use extraction_monitor::notify::TracingSink;
use extraction_monitor::JobTracker;

const USAGE: &str = "usage: extraction-monitor <submit|watch> <id>...\n\
    \n  submit <record ids>  start an extraction per record and follow it\
    \n  watch <task ids>     follow already running extraction tasks";

enum Command {
    Submit(Vec<String>),
    Watch(Vec<String>),
}

fn parse_args() -> Option<Command> {
    let mut args = std::env::args().skip(1);
    let verb = args.next()?;
    let ids: Vec<String> = args.collect();
    if ids.is_empty() {
        return None;
    }
    match verb.as_str() {
        "submit" => Some(Command::Submit(ids)),
        "watch" => Some(Command::Watch(ids)),
        _ => None,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let Some(command) = parse_args() else {
        eprintln!("{USAGE}");
        std::process::exit(2);
    };

    let config = MonitorConfig::from_env()?;
    eprintln!("📡 Extraction monitor v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   API: {}", config.api_url);
    eprintln!(
        "   Poll every {}ms, {} ids per request\n",
        config.poll_interval.as_millis(),
        config.chunk_size
    );

    let backend = Arc::new(HttpTaskClient::new(&config)?);
    let tracker = JobTracker::new(config, backend, Arc::new(TracingSink));
    let mut events = tracker.subscribe();

    match command {
        Command::Submit(records) => {
            tracker.submit(&records).await?;
        }
        Command::Watch(task_ids) => {
            for id in task_ids {
                tracker.track(id, None).await;
            }
        }
    }

    // Finished jobs leave the registry after their grace period; once it is
    // empty there is nothing left to watch.
    while !tracker.is_empty().await {
        tokio::select! {
            event = events.recv() => match event {
                Ok(RegistryEvent::Removed { .. }) | Err(RecvError::Lagged(_)) => {}
                Ok(_) => continue,
                Err(RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                eprintln!("\nInterrupted, cancelling pending jobs...");
                if let Err(e) = tracker.cancel_pending().await {
                    tracing::error!(error = %e, "Cancel on interrupt failed");
                }
                break;
            }
        }
    }

    let counts = tracker.counts().await;
    tracker.shutdown();
    tracing::info!(remaining = counts.total(), "Extraction monitor exiting");
    Ok(())
}
