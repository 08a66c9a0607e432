use std::io::Write;
use std::path::Path;

use anyhow::Result;
use asset_import::progress::human_bytes;
use asset_import::{AssetManager, CancellationToken, CopyProgress, ImportError, ImportRequest};
use tokio::sync::broadcast::{self, error::RecvError};

/// Import `source`, print the local path to stdout, and progress to stderr.
///
/// Ctrl-C cancels the copy. A cancelled import is reported but is not an
/// error exit.
pub async fn run(manager: &AssetManager, source: &Path, show_progress: bool) -> Result<()> {
    let cancel = CancellationToken::new();
    let ctrl_c = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        })
    };

    let stop_printer = CancellationToken::new();
    let printer = tokio::spawn(print_progress(manager.subscribe(), stop_printer.clone()));

    let request = ImportRequest::new(source)
        .show_progress(show_progress)
        .with_cancel(cancel);
    let result = manager.import(request).await;

    stop_printer.cancel();
    let _ = printer.await;
    ctrl_c.abort();

    match result {
        Ok(outcome) => {
            if outcome.cache_hit {
                eprintln!("Using cached copy of {}.", source.display());
            } else {
                eprintln!(
                    "Copied {} ({} attempt(s)).",
                    human_bytes(outcome.bytes_copied),
                    outcome.attempts
                );
            }
            println!("{}", outcome.path.display());
            Ok(())
        }
        Err(ImportError::Cancelled) => {
            eprintln!("Import of {} cancelled.", source.display());
            Ok(())
        }
        Err(e) => Err(anyhow::anyhow!("import of {} failed: {e}", source.display())),
    }
}

async fn print_progress(mut rx: broadcast::Receiver<CopyProgress>, stop: CancellationToken) {
    let mut drew = false;
    loop {
        let progress = tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            msg = rx.recv() => match msg {
                Ok(progress) => progress,
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            },
        };
        let mut stderr = std::io::stderr().lock();
        let _ = write!(stderr, "\r\x1b[2K{progress}");
        let _ = stderr.flush();
        drew = true;
    }
    if drew {
        eprintln!();
    }
}
