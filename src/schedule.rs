//! Cooperative repeating timers.
//!
//! Every task is re-armed after it runs. Cancelling a task's [`CancelToken`]
//! means it is never run again; the transition is visible through
//! [`CancelToken::is_cancelled`] and takes effect before the next tick.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::debug;

#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

type TaskFn<C> = Box<dyn FnMut(&mut C)>;

struct Task<C> {
    name: &'static str,
    interval: Duration,
    next_due: Instant,
    token: CancelToken,
    run: TaskFn<C>,
}

/// Repeating tasks driven from one thread over a shared context `C`.
pub struct Scheduler<C> {
    tasks: Vec<Task<C>>,
}

impl<C> fmt::Debug for Scheduler<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.tasks.iter().map(|task| (task.name, task.interval)))
            .finish()
    }
}

impl<C> Default for Scheduler<C> {
    fn default() -> Self {
        Self { tasks: Vec::new() }
    }
}

impl<C> Scheduler<C> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a task first due one `interval` after `now`.
    pub fn every(
        &mut self,
        name: &'static str,
        interval: Duration,
        now: Instant,
        run: impl FnMut(&mut C) + 'static,
    ) -> CancelToken {
        let token = CancelToken::new();
        self.tasks.push(Task {
            name,
            interval,
            next_due: now + interval,
            token: token.clone(),
            run: Box::new(run),
        });
        token
    }

    /// Number of tasks that can still run.
    #[must_use]
    pub fn active(&self) -> usize {
        self.tasks
            .iter()
            .filter(|task| !task.token.is_cancelled())
            .count()
    }

    /// Earliest due time among live tasks.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.tasks
            .iter()
            .filter(|task| !task.token.is_cancelled())
            .map(|task| task.next_due)
            .min()
    }

    /// Runs every live task due at `now` once, in registration order, and
    /// re-arms it. Missed periods are not replayed. Returns the names run.
    pub fn run_due(&mut self, ctx: &mut C, now: Instant) -> Vec<&'static str> {
        self.tasks.retain(|task| !task.token.is_cancelled());

        let mut ran = Vec::new();
        for task in &mut self.tasks {
            // An earlier task may have cancelled this one.
            if task.token.is_cancelled() || task.next_due > now {
                continue;
            }
            (task.run)(ctx);
            task.next_due = now + task.interval;
            ran.push(task.name);
        }
        if !ran.is_empty() {
            debug!(tasks = ?ran, "scheduled tasks ran");
        }
        ran
    }

    /// Sleeps between deadlines and runs due tasks until `stop` is cancelled
    /// or no task is left.
    pub fn run_until(&mut self, ctx: &mut C, stop: &CancelToken) {
        while !stop.is_cancelled() {
            let Some(deadline) = self.next_deadline() else {
                break;
            };
            let now = Instant::now();
            if deadline > now {
                thread::sleep(deadline - now);
                continue;
            }
            self.run_due(ctx, now);
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[derive(Default)]
    struct Counters {
        fast: usize,
        slow: usize,
    }

    #[test]
    fn tasks_run_when_due_and_rearm() {
        let start = Instant::now();
        let mut scheduler = Scheduler::new();
        scheduler.every("fast", Duration::from_secs(1), start, |c: &mut Counters| c.fast += 1);
        scheduler.every("slow", Duration::from_secs(3), start, |c: &mut Counters| c.slow += 1);
        let mut counters = Counters::default();

        assert!(scheduler.run_due(&mut counters, start).is_empty());
        assert_eq!(
            scheduler.run_due(&mut counters, start + Duration::from_secs(1)),
            vec!["fast"]
        );
        assert_eq!(
            scheduler.run_due(&mut counters, start + Duration::from_secs(3)),
            vec!["fast", "slow"]
        );
        assert_eq!((counters.fast, counters.slow), (2, 1));
        assert_eq!(
            scheduler.next_deadline(),
            Some(start + Duration::from_secs(4))
        );
    }

    #[test]
    fn cancelled_task_is_never_run_again() {
        let start = Instant::now();
        let mut scheduler = Scheduler::new();
        let token = scheduler.every("fast", Duration::from_secs(1), start, |c: &mut Counters| {
            c.fast += 1
        });
        let mut counters = Counters::default();

        scheduler.run_due(&mut counters, start + Duration::from_secs(1));
        token.cancel();
        scheduler.run_due(&mut counters, start + Duration::from_secs(5));

        assert_eq!(counters.fast, 1);
        assert_eq!(scheduler.active(), 0);
        assert_eq!(scheduler.next_deadline(), None);
    }

    #[test]
    fn task_may_cancel_a_later_one_in_the_same_tick() {
        struct Ctx {
            victim: Option<CancelToken>,
            victim_runs: usize,
        }

        let start = Instant::now();
        let mut scheduler = Scheduler::new();
        scheduler.every("killer", Duration::from_secs(1), start, |ctx: &mut Ctx| {
            if let Some(victim) = &ctx.victim {
                victim.cancel();
            }
        });
        let victim = scheduler.every("victim", Duration::from_secs(1), start, |ctx: &mut Ctx| {
            ctx.victim_runs += 1
        });
        let mut ctx = Ctx {
            victim: Some(victim.clone()),
            victim_runs: 0,
        };

        let ran = scheduler.run_due(&mut ctx, start + Duration::from_secs(1));

        assert_eq!(ran, vec!["killer"]);
        assert!(victim.is_cancelled());
        assert_eq!(ctx.victim_runs, 0);
        assert_eq!(scheduler.active(), 1);
    }

    #[test]
    fn run_until_stops_when_the_stop_token_is_cancelled() {
        struct Ctx {
            ticks: usize,
            stop: CancelToken,
        }

        let stop = CancelToken::new();
        let mut scheduler = Scheduler::new();
        scheduler.every("tick", Duration::from_millis(5), Instant::now(), |ctx: &mut Ctx| {
            ctx.ticks += 1;
            if ctx.ticks == 3 {
                ctx.stop.cancel();
            }
        });
        let mut ctx = Ctx {
            ticks: 0,
            stop: stop.clone(),
        };

        scheduler.run_until(&mut ctx, &stop);

        assert_eq!(ctx.ticks, 3);
    }
}
