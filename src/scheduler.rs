//! Timing and scheduling.
//!
//! Simulated time is the CPU's t-state counter; real time is a
//! monotonic nanosecond clock. A small set of periodic timers (vertical
//! retrace, the ABC802 CTC tick) fire in real time, and when a target
//! CPU frequency is configured the scheduler paces the CPU by sleeping
//! whenever simulated time runs ahead of the next timer event.
//!
//! The CPU polls from its instruction loop via [`Scheduler::poll`]. The
//! fast path is two compares: nothing happens until the t-state counter
//! passes `next_check_tstate`, and the clock is only read once per poll
//! period. Missed timer ticks (host stalls, debugger stops) are
//! collapsed into a single callback with `last` realigned, so catch-up
//! is bounded.
//!
//! The host clock is behind [`TimeSource`] so the timer arithmetic and
//! the throttle can be driven deterministically in tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Periodic timer identity; the bus maps these to device actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerId {
    /// ABC80 50 Hz clock: vertical retrace plus the NMI tick.
    ClockTick,
    /// ABC802 93.75 Hz CTC channel 3 tick.
    CtcTick,
    /// ABC802 50 Hz vertical retrace.
    Vsync,
}

/// At most this many timers per model.
const MAX_TIMERS: usize = 2;

const MS: u64 = 1_000_000;

/// Poll at most once per this many t-states.
const MAX_TSTATE_PERIOD: u64 = 512;

/// Monotonic nanosecond clock, or a manually advanced one for tests.
pub enum TimeSource {
    Host { base: Instant },
    Manual { now: u64 },
}

impl TimeSource {
    pub fn host() -> Self {
        Self::Host {
            base: Instant::now(),
        }
    }

    pub fn manual() -> Self {
        Self::Manual { now: 0 }
    }

    /// Nanoseconds since an arbitrary epoch.
    pub fn now(&self) -> u64 {
        match self {
            Self::Host { base } => base.elapsed().as_nanos() as u64,
            Self::Manual { now } => *now,
        }
    }

    /// Sleep until the absolute deadline `until`; `since` is the
    /// current time already read by the caller.
    fn sleep_until(&mut self, until: u64, since: u64) {
        match self {
            Self::Host { .. } => {
                if until > since {
                    std::thread::sleep(std::time::Duration::from_nanos(until - since));
                }
            }
            Self::Manual { now } => {
                if until > *now {
                    *now = until;
                }
            }
        }
    }

    /// Advance a manual clock (no effect on the host clock).
    pub fn advance(&mut self, ns: u64) {
        if let Self::Manual { now } = self {
            *now += ns;
        }
    }
}

/// One periodic timer.
#[derive(Debug, Clone, Copy)]
pub struct PeriodicTimer {
    pub id: TimerId,
    /// Period in ns.
    pub period: u64,
    /// Last checkpoint in ns; always a multiple of `period` behind the
    /// next fire.
    pub last: u64,
    /// T-state counter value corresponding to `last`.
    pub ltst: u64,
}

/// The scheduler: timers plus the speed governor.
pub struct Scheduler {
    time: TimeSource,
    timers: Vec<PeriodicTimer>,

    limit_speed: bool,
    ns_per_tstate: f64,
    tstate_per_ns: f64,
    poll_tstate_period: u64,

    /// Time of the nearest timer event.
    next_ns: u64,
    /// Next t-state count at which poll does any work.
    next_check_tstate: u64,

    /// Reference pair tying the t-state counter to the clock; reset
    /// when drift exceeds the sanity window (suspend/resume, clock
    /// jumps).
    ref_time: u64,
    ref_tstate: u64,

    quit: Arc<AtomicBool>,
}

impl Scheduler {
    /// `mhz` outside (0.001, 1e6) disables speed limiting.
    pub fn new(mhz: f64, time: TimeSource, quit: Arc<AtomicBool>) -> Self {
        let (limit_speed, ns_per_tstate, tstate_per_ns) = if mhz <= 0.001 || mhz >= 1.0e6 {
            (false, 1000.0 / 3.0, 3.0 / 1000.0)
        } else {
            (true, 1000.0 / mhz, mhz / 1000.0)
        };

        // Limit polling to roughly once every microsecond of simulated
        // time, capped so unthrottled runs still poll often enough
        let mut poll_tstate_period = (1000.0 * ns_per_tstate) as u64;
        if !limit_speed || poll_tstate_period > MAX_TSTATE_PERIOD {
            poll_tstate_period = MAX_TSTATE_PERIOD;
        }

        Self {
            time,
            timers: Vec::with_capacity(MAX_TIMERS),
            limit_speed,
            ns_per_tstate,
            tstate_per_ns,
            poll_tstate_period,
            next_ns: 0,
            next_check_tstate: 0,
            ref_time: 0,
            ref_tstate: 0,
            quit,
        }
    }

    /// Register a periodic timer. Model selection registers a fixed
    /// set once; running out of slots is a programmer error.
    pub fn add_timer(&mut self, id: TimerId, period_ns: u64) {
        assert!(self.timers.len() < MAX_TIMERS, "too many timers");

        self.timers.push(PeriodicTimer {
            id,
            period: period_ns,
            last: 0,
            ltst: 0,
        });
        self.next_ns = 0;
    }

    pub fn timer(&self, id: TimerId) -> Option<&PeriodicTimer> {
        self.timers.iter().find(|t| t.id == id)
    }

    pub fn limit_speed(&self) -> bool {
        self.limit_speed
    }

    pub fn ns_per_tstate(&self) -> f64 {
        self.ns_per_tstate
    }

    pub fn now(&self) -> u64 {
        self.time.now()
    }

    #[cfg(test)]
    pub fn time_mut(&mut self) -> &mut TimeSource {
        &mut self.time
    }

    /// Poll for due timers and the quit flag; due timer ids are pushed
    /// onto `fired` for the bus to dispatch. Returns true when the CPU
    /// loop should terminate.
    ///
    /// `tc` is the CPU's current t-state counter.
    pub fn poll(&mut self, tc: u64, fired: &mut Vec<TimerId>) -> bool {
        if self.quit.load(Ordering::Acquire) {
            return true;
        }

        if tc < self.next_check_tstate {
            return false;
        }

        let now = self.time.now();
        let mut sleepy = self.limit_speed;

        if now >= self.next_ns {
            self.next_ns = u64::MAX;

            for t in &mut self.timers {
                if t.period == 0 {
                    continue;
                }

                let mut tnext = t.last + t.period;
                if now >= tnext {
                    t.last += t.period;
                    if now >= t.last + t.period {
                        // Missed tick(s); collapse them into this one
                        t.last = now - (now - t.last) % t.period;
                    }
                    tnext = t.last + t.period;

                    // T-state value corresponding to t.last
                    t.ltst = tc - ((now - t.last) as f64 * self.tstate_per_ns) as u64;
                    fired.push(t.id);
                    sleepy = false; // "now" may be stale after callbacks
                }

                if self.next_ns > tnext {
                    self.next_ns = tnext;
                }
            }
        }

        self.next_check_tstate = tc + self.poll_tstate_period;
        if self.limit_speed && self.next_ns != u64::MAX {
            let next_ev = tc + ((self.next_ns - now.min(self.next_ns)) as f64 * self.tstate_per_ns) as u64;
            if next_ev < self.next_check_tstate {
                self.next_check_tstate = next_ev;
            }
        }

        if sleepy {
            self.consider_napping(now, tc);
        }

        false
    }

    /// See if it is time to slow down a bit: compare real time against
    /// the time the t-state counter says it should be, and hold off
    /// until the next timer event when we are ahead.
    fn consider_napping(&mut self, now: u64, tc: u64) {
        let next = self.next_ns;

        if now < self.ref_time || tc <= self.ref_tstate {
            self.ref_time = now;
            self.ref_tstate = tc;
            return;
        }

        let when = self.ref_time + ((tc - self.ref_tstate) as f64 * self.ns_per_tstate) as u64;
        let behind = now as i64 - when as i64;
        let ahead = when as i64 - next as i64;

        // Sanity range: 200 ms behind or 100 ms ahead of schedule means
        // we got suspended or the clock jumped; resynchronize silently
        if behind >= (200 * MS) as i64 || ahead >= (100 * MS) as i64 {
            self.ref_time = now;
            self.ref_tstate = tc;
            return;
        }

        // Ahead of the next event: wait for it
        if ahead >= 0 {
            self.time.sleep_until(next, now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quit_flag() -> Arc<AtomicBool> {
        Arc::new(AtomicBool::new(false))
    }

    fn fired_after(sched: &mut Scheduler, tc: u64) -> Vec<TimerId> {
        let mut fired = Vec::new();
        sched.poll(tc, &mut fired);
        fired
    }

    #[test]
    fn test_timer_fires_when_due() {
        let mut sched = Scheduler::new(0.0, TimeSource::manual(), quit_flag());
        sched.add_timer(TimerId::ClockTick, 20 * MS);

        assert!(fired_after(&mut sched, 1024).is_empty());

        sched.time_mut().advance(20 * MS);
        let fired = fired_after(&mut sched, 2048);
        assert_eq!(fired, vec![TimerId::ClockTick]);
        assert_eq!(sched.timer(TimerId::ClockTick).unwrap().last, 20 * MS);
    }

    #[test]
    fn test_missed_ticks_collapse() {
        let mut sched = Scheduler::new(0.0, TimeSource::manual(), quit_flag());
        sched.add_timer(TimerId::ClockTick, 20 * MS);

        // Host stalled for 7 periods plus a bit: one callback, last
        // realigned to the most recent grid point
        sched.time_mut().advance(145 * MS);
        let fired = fired_after(&mut sched, 1024);
        assert_eq!(fired.len(), 1);
        assert_eq!(sched.timer(TimerId::ClockTick).unwrap().last, 140 * MS);
    }

    #[test]
    fn test_fast_path_skips_clock_reads() {
        let mut sched = Scheduler::new(0.0, TimeSource::manual(), quit_flag());
        sched.add_timer(TimerId::ClockTick, 20 * MS);

        let mut fired = Vec::new();
        sched.poll(1024, &mut fired);
        // Inside the poll period nothing happens even if time passed
        sched.time_mut().advance(100 * MS);
        sched.poll(1025, &mut fired);
        assert!(fired.is_empty());
    }

    #[test]
    fn test_quit_terminates() {
        let quit = quit_flag();
        let mut sched = Scheduler::new(3.0, TimeSource::manual(), Arc::clone(&quit));

        let mut fired = Vec::new();
        assert!(!sched.poll(0, &mut fired));
        quit.store(true, Ordering::Release);
        assert!(sched.poll(1, &mut fired));
    }

    #[test]
    fn test_throttle_paces_to_wall_clock() {
        // 3 MHz, manual clock: 1,000,000 t-states should land within
        // a timer period of 333 ms
        let mut sched = Scheduler::new(3.0, TimeSource::manual(), quit_flag());
        sched.add_timer(TimerId::ClockTick, 20 * MS);

        let mut fired = Vec::new();
        let mut tc: u64 = 0;
        while tc < 1_000_000 {
            tc += 16;
            sched.poll(tc, &mut fired);
        }

        let elapsed = sched.now();
        let expected = 1_000_000.0 * (1000.0 / 3.0);
        let slack = (20 * MS) as f64;
        assert!(
            (elapsed as f64) > expected - slack && (elapsed as f64) < expected + slack,
            "elapsed {} vs expected {}",
            elapsed,
            expected
        );
    }

    #[test]
    fn test_unlimited_speed_never_sleeps() {
        let mut sched = Scheduler::new(0.0, TimeSource::manual(), quit_flag());
        sched.add_timer(TimerId::ClockTick, 20 * MS);

        let mut fired = Vec::new();
        for i in 0..1000 {
            sched.poll(i * 600, &mut fired);
        }
        // A manual clock only moves when the throttle sleeps
        assert_eq!(sched.now(), 0);
    }
}
