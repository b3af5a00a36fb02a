//! Poll loops for fetching and delivery.
//!
//! The two loops share a one-minute heartbeat but keep their own intervals,
//! so a slow fetch never delays a delivery check. Each heartbeat also
//! compares wall-clock time with the time that should have passed; a large
//! jump means the machine was asleep, and the loop waits for the network and
//! runs a catch-up cycle straight away.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::net::TcpStream;

use crate::app::App;
use crate::config::ScheduleConfig;
use crate::error::Result;

/// Poll interval for the scheduler heartbeat (1 minute)
const HEARTBEAT: Duration = Duration::from_secs(60);

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const RECONNECT_PAUSE: Duration = Duration::from_secs(2);

/// Detects suspend/resume from wall-clock jumps between heartbeats.
#[derive(Debug, Clone)]
pub struct WallClockWatch {
    last: DateTime<Utc>,
    expected: chrono::Duration,
    threshold: chrono::Duration,
}

impl WallClockWatch {
    pub fn new(start: DateTime<Utc>, expected: Duration, threshold: Duration) -> Self {
        Self {
            last: start,
            expected: chrono::Duration::from_std(expected).unwrap_or(chrono::Duration::zero()),
            threshold: chrono::Duration::from_std(threshold).unwrap_or(chrono::Duration::zero()),
        }
    }

    /// Records a heartbeat at `now`. Returns the elapsed wall-clock time when
    /// it exceeds the expected interval by more than the threshold.
    pub fn observe(&mut self, now: DateTime<Utc>) -> Option<chrono::Duration> {
        let elapsed = now - self.last;
        self.last = now;
        (elapsed - self.expected > self.threshold).then_some(elapsed)
    }
}

/// Waits until a TCP connection to `host` succeeds or `bound` runs out.
pub async fn wait_for_network(host: &str, bound: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + bound;
    loop {
        match tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(host)).await {
            Ok(Ok(_)) => return true,
            Ok(Err(e)) => tracing::debug!(host, error = %e, "network not ready"),
            Err(_) => tracing::debug!(host, "network check timed out"),
        }
        if tokio::time::Instant::now() + RECONNECT_PAUSE >= deadline {
            return false;
        }
        tokio::time::sleep(RECONNECT_PAUSE).await;
    }
}

struct LoopSettings {
    name: &'static str,
    every: Duration,
    wake_threshold: Duration,
    network_check_host: String,
    network_wait: Duration,
}

async fn poll_loop<F, Fut>(settings: LoopSettings, mut cycle: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    let every = chrono::Duration::from_std(settings.every).unwrap_or(chrono::Duration::minutes(15));
    let mut watch = WallClockWatch::new(Utc::now(), HEARTBEAT, settings.wake_threshold);

    cycle().await;
    let mut last_run = Utc::now();

    loop {
        tokio::time::sleep(HEARTBEAT).await;
        let now = Utc::now();

        if let Some(gap) = watch.observe(now) {
            tracing::info!(
                task = settings.name,
                gap_secs = gap.num_seconds(),
                "detected system wake, waiting for network before catching up"
            );
            if !wait_for_network(&settings.network_check_host, settings.network_wait).await {
                tracing::warn!(
                    task = settings.name,
                    host = %settings.network_check_host,
                    "network still unreachable, running catch-up anyway"
                );
            }
            cycle().await;
            last_run = Utc::now();
            continue;
        }

        if now - last_run >= every {
            cycle().await;
            last_run = now;
        }
    }
}

fn minutes(m: u32) -> Duration {
    Duration::from_secs(u64::from(m) * 60)
}

/// Runs the fetch and delivery loops until Ctrl-C.
pub async fn run(app: Arc<App>, config: &ScheduleConfig) -> Result<()> {
    let fetch_settings = LoopSettings {
        name: "fetch",
        every: minutes(config.fetch_interval_minutes),
        wake_threshold: minutes(config.wake_threshold_minutes),
        network_check_host: config.network_check_host.clone(),
        network_wait: Duration::from_secs(config.network_wait_secs),
    };
    let delivery_settings = LoopSettings {
        name: "delivery",
        every: minutes(config.poll_interval_minutes),
        wake_threshold: minutes(config.wake_threshold_minutes),
        network_check_host: config.network_check_host.clone(),
        network_wait: Duration::from_secs(config.network_wait_secs),
    };

    tracing::info!(
        fetch_every_min = config.fetch_interval_minutes,
        poll_every_min = config.poll_interval_minutes,
        "scheduler started"
    );

    let fetch_app = Arc::clone(&app);
    let fetch = tokio::spawn(poll_loop(fetch_settings, move || {
        let app = Arc::clone(&fetch_app);
        async move { app.fetch_cycle().await }
    }));

    let delivery_app = Arc::clone(&app);
    let delivery = tokio::spawn(poll_loop(delivery_settings, move || {
        let app = Arc::clone(&delivery_app);
        async move { app.delivery_cycle(false).await }
    }));

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down scheduler");
    fetch.abort();
    delivery.abort();
    Ok(())
}
