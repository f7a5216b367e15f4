//! The per-process state machine: IDLE -> WANT_HOUSE -> HAVE_HOUSE_WANT_PASER
//! -> HAVE_BOTH -> RELEASING -> IDLE. One [`step`] call evaluates the
//! current state and performs at most one transition, matching the
//! tick-driven loop the driver runs every ~50ms.

use std::time::Duration;

use rand::Rng;
use tracing::{info, warn};

use crate::coordinator::Coordinator;

const CYCLE_START_PCT: u32 = 25;
const WORK_MIN_MILLIS: u64 = 4000;
const WORK_MAX_MILLIS: u64 = 5000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Idle,
    WantHouse,
    HaveHouseWantPaser,
    HaveBoth,
    Releasing,
}

/// The coordinator and the process state travel together behind the
/// driver's single guard, per §5's "shared state" requirement.
pub struct Machine {
    pub coordinator: Coordinator,
    pub state: ProcessState,
}

impl Machine {
    pub fn new(coordinator: Coordinator) -> Self {
        Self {
            coordinator,
            state: ProcessState::Idle,
        }
    }
}

/// What the driver must do after a `step`: either nothing further this
/// tick, or drop the guard and sleep for the returned bounded-work duration
/// before re-entering RELEASING.
#[derive(Debug, PartialEq, Eq)]
pub enum StepOutcome {
    Continue,
    BeginWork(Duration),
}

fn should_start_cycle(rng: &mut impl Rng) -> bool {
    rng.gen_range(1..=100) <= CYCLE_START_PCT
}

fn work_duration(rng: &mut impl Rng) -> Duration {
    Duration::from_millis(rng.gen_range(WORK_MIN_MILLIS..=WORK_MAX_MILLIS))
}

/// Evaluates `machine.state` and performs at most one transition.
pub fn step(machine: &mut Machine, rng: &mut impl Rng) -> StepOutcome {
    match machine.state {
        ProcessState::Idle => {
            if should_start_cycle(rng) {
                info!(process = machine.coordinator.self_id, "starting a new cycle");
                machine.state = ProcessState::WantHouse;
                machine.coordinator.request_house();
            }
        }

        ProcessState::WantHouse => {
            if machine.coordinator.house_ready() {
                match machine.coordinator.choose_free_house() {
                    Some(house_id) => {
                        machine.coordinator.acquire_house(house_id);
                        machine.state = ProcessState::HaveHouseWantPaser;
                    }
                    None => {
                        machine.coordinator.abort_house_request();
                        machine.state = ProcessState::Idle;
                    }
                }
            }
        }

        ProcessState::HaveHouseWantPaser => {
            if !machine.coordinator.is_requesting_paser() {
                if let Err(err) = machine.coordinator.request_paser() {
                    warn!(process = machine.coordinator.self_id, %err, "aborting cycle");
                    machine.state = ProcessState::Releasing;
                }
            } else if machine.coordinator.paser_ready() {
                machine.coordinator.acquire_paser();
                machine.state = ProcessState::HaveBoth;
                return StepOutcome::BeginWork(work_duration(rng));
            }
        }

        ProcessState::HaveBoth => {
            // Transient: entering this state always comes bundled with a
            // `StepOutcome::BeginWork` from the previous branch, so there is
            // nothing left to evaluate here until the driver's work phase
            // flips us to RELEASING.
        }

        ProcessState::Releasing => {
            if machine.coordinator.is_house_held() {
                machine.coordinator.release_house();
            } else if machine.coordinator.is_paser_held() {
                machine.coordinator.release_paser();
            } else {
                machine.state = ProcessState::Idle;
            }
        }
    }
    StepOutcome::Continue
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net;

    use rand::rngs::StdRng;
    use rand::SeedableRng;

    /// A lone process (N=1): every readiness predicate is satisfied the
    /// instant a request is made, since there are no peers to wait on.
    async fn solo_machine(d: i64, p: i64, port: u16) -> Machine {
        let config = crate::config::Config {
            id: 1,
            peers: vec![([127, 0, 0, 1], port).into()],
            houses: d,
            pasers: p,
            tick_interval: Duration::from_millis(50),
            watchdog: Duration::from_secs(600),
        };
        let (handle, _inbound) = net::bind(&config).await.unwrap();
        Machine::new(Coordinator::new(1, 1, d, p, handle))
    }

    #[tokio::test]
    async fn want_house_acquires_when_free_house_exists() {
        let mut machine = solo_machine(1, 1, 28901).await;
        let mut rng = StdRng::seed_from_u64(1);
        machine.coordinator.request_house();
        machine.state = ProcessState::WantHouse;
        assert!(machine.coordinator.house_ready());

        step(&mut machine, &mut rng);

        assert_eq!(machine.state, ProcessState::HaveHouseWantPaser);
        assert_eq!(machine.coordinator.held_house_id(), 1);
    }

    #[tokio::test]
    async fn want_house_aborts_without_free_house() {
        let mut machine = solo_machine(0, 1, 28902).await;
        let mut rng = StdRng::seed_from_u64(1);
        machine.coordinator.request_house();
        machine.state = ProcessState::WantHouse;
        assert!(machine.coordinator.house_ready());
        assert_eq!(machine.coordinator.choose_free_house(), None);

        step(&mut machine, &mut rng);

        assert_eq!(machine.state, ProcessState::Idle);
        assert!(!machine.coordinator.is_requesting_house());
    }

    #[tokio::test]
    async fn full_cycle_reaches_have_both_and_begins_work() {
        let mut machine = solo_machine(1, 1, 28903).await;
        let mut rng = StdRng::seed_from_u64(7);
        machine.coordinator.request_house();
        machine.state = ProcessState::WantHouse;
        step(&mut machine, &mut rng);
        assert_eq!(machine.state, ProcessState::HaveHouseWantPaser);

        // first step issues the paser request
        step(&mut machine, &mut rng);
        assert!(machine.coordinator.is_requesting_paser());

        // second step finds it ready (no peers) and begins work
        let outcome = step(&mut machine, &mut rng);
        assert_eq!(machine.state, ProcessState::HaveBoth);
        assert!(matches!(outcome, StepOutcome::BeginWork(_)));
        assert!(machine.coordinator.is_paser_held());
    }

    #[tokio::test]
    async fn paser_count_zero_skips_straight_to_releasing() {
        let mut machine = solo_machine(1, 0, 28904).await;
        let mut rng = StdRng::seed_from_u64(3);
        machine.coordinator.request_house();
        machine.state = ProcessState::WantHouse;
        step(&mut machine, &mut rng);
        assert_eq!(machine.state, ProcessState::HaveHouseWantPaser);

        step(&mut machine, &mut rng);

        assert_eq!(machine.state, ProcessState::Releasing);
        assert!(!machine.coordinator.is_requesting_paser());
    }
}
