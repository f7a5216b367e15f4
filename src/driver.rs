//! Runs the receiver pump and the ticker loop concurrently for one process,
//! sharing the [`Machine`] behind a single [`std::sync::Mutex`] per §5.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::time::sleep;
use tracing::info;

use crate::config::Config;
use crate::coordinator::Coordinator;
use crate::net;
use crate::process::{self, Machine, StepOutcome};

/// Drives one process end to end: binds its transport, then runs the
/// receiver and ticker tasks until the watchdog fires or `terminate` is
/// raised from the outside (e.g. Ctrl-C in `main`).
pub async fn run(config: Config, terminate: Arc<AtomicBool>) -> anyhow::Result<()> {
    let self_id = config.id;
    let (transport, mut inbound) = net::bind(&config).await?;
    let coordinator = Coordinator::new(config.id, config.n(), config.houses, config.pasers, transport);
    let shared = Arc::new(Mutex::new(Machine::new(coordinator)));

    let receiver = {
        let shared = shared.clone();
        let terminate = terminate.clone();
        tokio::spawn(async move {
            while !terminate.load(Ordering::Relaxed) {
                match inbound.recv().await {
                    Some(msg) => {
                        let mut machine = shared.lock().unwrap();
                        machine.coordinator.clock.observe(msg.timestamp);
                        machine.coordinator.on_message(msg);
                    }
                    None => break,
                }
            }
        })
    };

    let ticker = {
        let shared = shared.clone();
        let terminate = terminate.clone();
        let tick_interval = config.tick_interval;
        let watchdog = config.watchdog;
        tokio::spawn(async move {
            let mut rng = StdRng::from_entropy();
            let start = Instant::now();
            while !terminate.load(Ordering::Relaxed) {
                sleep(tick_interval).await;

                let outcome = {
                    let mut machine = shared.lock().unwrap();
                    process::step(&mut machine, &mut rng)
                };

                if let StepOutcome::BeginWork(work_duration) = outcome {
                    sleep(work_duration).await;
                    let mut machine = shared.lock().unwrap();
                    machine.state = crate::process::ProcessState::Releasing;
                }

                if watchdog_elapsed(start, watchdog) {
                    info!(process = self_id, "watchdog expired, terminating");
                    terminate.store(true, Ordering::Relaxed);
                }
            }
        })
    };

    let receiver_abort = receiver.abort_handle();
    let ticker_abort = ticker.abort_handle();
    let result = tokio::select! {
        result = receiver => result.map_err(anyhow::Error::from),
        result = ticker => result.map_err(anyhow::Error::from),
    };
    // whichever task finished first (normally the ticker, on watchdog
    // expiry), the other is left polling a channel that will never produce
    // another message; abort it rather than leak it past `run`'s return.
    receiver_abort.abort();
    ticker_abort.abort();
    result
}

pub fn watchdog_elapsed(start: Instant, budget: Duration) -> bool {
    start.elapsed() > budget
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn watchdog_elapsed_is_monotone() {
        let start = Instant::now();
        assert!(!watchdog_elapsed(start, Duration::from_secs(600)));
        assert!(watchdog_elapsed(start, Duration::from_secs(0)));
    }
}
