use std::{future::Future, time::Duration};

use anyhow::{Error, Result, anyhow};
use tokio::{task::JoinHandle, time::interval};
use tracing::{error, info};

pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// A long running part of the gateway, isolated in its own task.
#[derive(Debug)]
pub struct Stage {
    name: &'static str,
    handle: JoinHandle<Result<()>>,
}

impl Stage {
    pub fn spawn<F>(name: &'static str, future: F) -> Self
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        info!(stage = name, "starting stage");

        Self {
            name,
            handle: tokio::spawn(future),
        }
    }
}

/// Waits for any stage to end, then stops the others.
///
/// Stages are expected to run forever, so this only returns the reason the
/// gateway has to stop. Nothing is restarted.
pub async fn supervise(mut stages: Vec<Stage>) -> Error {
    let mut ticker = interval(POLL_INTERVAL);

    let index = loop {
        ticker.tick().await;

        if let Some(index) = stages.iter().position(|s| s.handle.is_finished()) {
            break index;
        }
    };

    let Stage { name, handle } = stages.swap_remove(index);
    let err = match handle.await {
        Ok(Ok(())) => anyhow!("{name} stage exited"),
        Ok(Err(err)) => err.context(format!("{name} stage failed")),
        Err(err) if err.is_panic() => anyhow!("{name} stage panicked"),
        Err(err) => anyhow!("{name} stage was cancelled: {err}"),
    };

    error!("child stage died, terminating program: {err:#}");

    for stage in stages {
        stage.handle.abort();
        let _ = stage.handle.await;
    }

    err
}

#[cfg(test)]
mod tests {
    use anyhow::bail;
    use tokio::{
        sync::oneshot,
        time::{Instant, sleep},
    };

    use super::*;

    /// A stage that never ends; the receiver errors once it is dropped.
    fn forever(name: &'static str) -> (Stage, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel::<()>();
        let stage = Stage::spawn(name, async move {
            let _tx = tx;
            std::future::pending::<()>().await;
            Ok(())
        });
        (stage, rx)
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_stage_stops_the_others() {
        let (delivery, delivery_alive) = forever("delivery");
        let ingest = Stage::spawn("ingest", async {
            sleep(Duration::from_secs(3)).await;
            bail!("reading source ended")
        });

        let started = Instant::now();
        let err = supervise(vec![ingest, delivery]).await;

        assert_eq!(format!("{err:#}"), "ingest stage failed: reading source ended");
        assert!(started.elapsed() >= Duration::from_secs(3));
        assert!(started.elapsed() <= Duration::from_secs(3) + POLL_INTERVAL);
        assert!(delivery_alive.await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicked_stage() {
        let (ingest, ingest_alive) = forever("ingest");
        let delivery = Stage::spawn("delivery", async {
            sleep(Duration::from_secs(1)).await;
            panic!("boom");
        });

        let err = supervise(vec![ingest, delivery]).await;

        assert_eq!(err.to_string(), "delivery stage panicked");
        assert!(ingest_alive.await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_exited_stage() {
        let (ingest, _ingest_alive) = forever("ingest");
        let delivery = Stage::spawn("delivery", async { Ok(()) });

        let err = supervise(vec![ingest, delivery]).await;

        assert_eq!(err.to_string(), "delivery stage exited");
    }
}
