//! [`TickScheduler`] – fixed-rate driver for the [`Agent`].
//!
//! Each tick runs [`Agent::step`] once and then spends the rest of the period
//! pumping inbound messages between short sleeps, so replies and signals are
//! absorbed as they arrive instead of piling up until the next step.
//!
//! The deadline of a tick is measured from its own start.  Overruns are not
//! compensated: a slow step simply makes that tick longer.

use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use teleo_middleware::Clock;
use tracing::{debug, info};

use crate::agent::{Agent, TickReport};

/// Default sleep between pumps while waiting out a tick.
pub const PUMP_INTERVAL: Duration = Duration::from_millis(5);

pub struct TickScheduler {
    period: Duration,
    pump_interval: Duration,
    clock: Rc<dyn Clock>,
}

impl TickScheduler {
    /// A scheduler running `steps_per_second` ticks per second.
    ///
    /// A rate of 0 is treated as 1.
    pub fn new(steps_per_second: u32, clock: Rc<dyn Clock>) -> Self {
        Self {
            period: Duration::from_secs(1) / steps_per_second.max(1),
            pump_interval: PUMP_INTERVAL,
            clock,
        }
    }

    pub fn with_pump_interval(mut self, pump_interval: Duration) -> Self {
        self.pump_interval = pump_interval;
        self
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Run one step, then pump until the tick's deadline.
    pub fn run_tick(&self, agent: &mut Agent) -> TickReport {
        let deadline = self.clock.now() + self.period;
        let report = agent.step();
        loop {
            let now = self.clock.now();
            if now >= deadline {
                break;
            }
            agent.pump();
            self.clock.sleep(self.pump_interval.min(deadline - now));
        }
        report
    }

    /// Tick until `shutdown` is set.  Returns the number of ticks run.
    pub fn run(&self, agent: &mut Agent, shutdown: &AtomicBool) -> u64 {
        info!(period_ms = self.period.as_millis() as u64, "tick loop started");
        let mut ticks = 0;
        while !shutdown.load(Ordering::SeqCst) {
            self.run_tick(agent);
            ticks += 1;
        }
        debug!(ticks, "tick loop stopped");
        ticks
    }
}
