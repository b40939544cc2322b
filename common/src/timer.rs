//! Non-blocking software timers over a fixed slot table. `run()` must be
//! polled every loop iteration; callbacks execute synchronously and must not
//! block. Elapsed time uses wrapping subtraction so a timestamp wraparound
//! cannot stall a timer.

use crate::config::MAX_TIMERS;

pub type TimerId = usize;

type TimerCallback = Box<dyn FnMut()>;

struct TimerSlot {
    callback: Option<TimerCallback>,
    interval_ms: u64,
    last_fired_ms: u64,
    run_count: u32,
    max_runs: Option<u32>,
    enabled: bool,
    in_use: bool,
}

impl TimerSlot {
    fn empty() -> Self {
        Self {
            callback: None,
            interval_ms: 0,
            last_fired_ms: 0,
            run_count: 0,
            max_runs: None,
            enabled: false,
            in_use: false,
        }
    }

    fn clear(&mut self) {
        *self = Self::empty();
    }
}

pub struct SoftTimer {
    slots: Vec<TimerSlot>,
    active: usize,
}

impl Default for SoftTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftTimer {
    pub fn new() -> Self {
        Self {
            slots: (0..MAX_TIMERS).map(|_| TimerSlot::empty()).collect(),
            active: 0,
        }
    }

    /// Repeating timer. Returns `None` when all slots are taken.
    pub fn set_interval(
        &mut self,
        interval_ms: u64,
        now_ms: u64,
        callback: impl FnMut() + 'static,
    ) -> Option<TimerId> {
        self.create(interval_ms, now_ms, None, Box::new(callback))
    }

    /// One-shot timer; the slot frees itself after firing.
    pub fn set_timeout(
        &mut self,
        timeout_ms: u64,
        now_ms: u64,
        callback: impl FnMut() + 'static,
    ) -> Option<TimerId> {
        self.create(timeout_ms, now_ms, Some(1), Box::new(callback))
    }

    /// Timer that fires `runs` times and then auto-deletes.
    pub fn set_times(
        &mut self,
        interval_ms: u64,
        runs: u32,
        now_ms: u64,
        callback: impl FnMut() + 'static,
    ) -> Option<TimerId> {
        if runs == 0 {
            return None;
        }
        self.create(interval_ms, now_ms, Some(runs), Box::new(callback))
    }

    pub fn delete(&mut self, id: TimerId) {
        if self.is_valid(id) {
            self.slots[id].clear();
            self.active -= 1;
        }
    }

    pub fn delete_all(&mut self) {
        for slot in &mut self.slots {
            slot.clear();
        }
        self.active = 0;
    }

    pub fn enable(&mut self, id: TimerId, now_ms: u64) {
        if self.is_valid(id) {
            self.slots[id].enabled = true;
            self.slots[id].last_fired_ms = now_ms;
        }
    }

    pub fn disable(&mut self, id: TimerId) {
        if self.is_valid(id) {
            self.slots[id].enabled = false;
        }
    }

    pub fn toggle(&mut self, id: TimerId, now_ms: u64) -> bool {
        if !self.is_valid(id) {
            return false;
        }
        if self.slots[id].enabled {
            self.slots[id].enabled = false;
        } else {
            self.slots[id].enabled = true;
            self.slots[id].last_fired_ms = now_ms;
        }
        self.slots[id].enabled
    }

    pub fn restart(&mut self, id: TimerId, now_ms: u64) {
        if self.is_valid(id) {
            self.slots[id].last_fired_ms = now_ms;
            self.slots[id].run_count = 0;
            self.slots[id].enabled = true;
        }
    }

    pub fn change_interval(&mut self, id: TimerId, interval_ms: u64, now_ms: u64) {
        if self.is_valid(id) {
            self.slots[id].interval_ms = interval_ms;
            self.slots[id].last_fired_ms = now_ms;
        }
    }

    /// Milliseconds until the next firing, 0 if disabled, due or invalid.
    pub fn remaining(&self, id: TimerId, now_ms: u64) -> u64 {
        if !self.is_valid(id) || !self.slots[id].enabled {
            return 0;
        }
        let elapsed = now_ms.wrapping_sub(self.slots[id].last_fired_ms);
        self.slots[id].interval_ms.saturating_sub(elapsed)
    }

    pub fn is_enabled(&self, id: TimerId) -> bool {
        self.is_valid(id) && self.slots[id].enabled
    }

    pub fn is_valid(&self, id: TimerId) -> bool {
        id < self.slots.len() && self.slots[id].in_use
    }

    pub fn active_count(&self) -> usize {
        self.active
    }

    pub fn available(&self) -> usize {
        MAX_TIMERS - self.active
    }

    pub fn capacity(&self) -> usize {
        MAX_TIMERS
    }

    /// Fire every due timer and auto-delete the ones that reached their run
    /// limit.
    pub fn run(&mut self, now_ms: u64) {
        for i in 0..self.slots.len() {
            if !self.slots[i].in_use || !self.slots[i].enabled {
                continue;
            }
            if now_ms.wrapping_sub(self.slots[i].last_fired_ms) < self.slots[i].interval_ms {
                continue;
            }

            self.slots[i].last_fired_ms = now_ms;
            self.slots[i].run_count += 1;

            if let Some(callback) = self.slots[i].callback.as_mut() {
                callback();
            }

            if let Some(max) = self.slots[i].max_runs {
                if self.slots[i].run_count >= max {
                    self.delete(i);
                }
            }
        }
    }

    fn create(
        &mut self,
        interval_ms: u64,
        now_ms: u64,
        max_runs: Option<u32>,
        callback: TimerCallback,
    ) -> Option<TimerId> {
        let id = self.slots.iter().position(|slot| !slot.in_use)?;
        let slot = &mut self.slots[id];
        slot.callback = Some(callback);
        slot.interval_ms = interval_ms;
        slot.last_fired_ms = now_ms;
        slot.run_count = 0;
        slot.max_runs = max_runs;
        slot.enabled = true;
        slot.in_use = true;
        self.active += 1;
        Some(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn counter() -> (Rc<RefCell<u32>>, impl FnMut()) {
        let count = Rc::new(RefCell::new(0));
        let inner = Rc::clone(&count);
        (count, move || *inner.borrow_mut() += 1)
    }

    #[test]
    fn interval_fires_on_cadence() {
        let mut timers = SoftTimer::new();
        let (count, callback) = counter();
        timers.set_interval(1_000, 0, callback).unwrap();

        timers.run(999);
        assert_eq!(*count.borrow(), 0);
        timers.run(1_000);
        assert_eq!(*count.borrow(), 1);
        timers.run(1_500);
        assert_eq!(*count.borrow(), 1);
        timers.run(2_000);
        assert_eq!(*count.borrow(), 2);
    }

    #[test]
    fn timeout_fires_once_and_frees_its_slot() {
        let mut timers = SoftTimer::new();
        let (count, callback) = counter();
        let id = timers.set_timeout(500, 0, callback).unwrap();

        timers.run(500);
        timers.run(1_000);
        assert_eq!(*count.borrow(), 1);
        assert!(!timers.is_valid(id));
        assert_eq!(timers.active_count(), 0);
    }

    #[test]
    fn set_times_runs_exactly_n_times() {
        let mut timers = SoftTimer::new();
        let (count, callback) = counter();
        let id = timers.set_times(100, 3, 0, callback).unwrap();

        for now in (100..=1_000).step_by(100) {
            timers.run(now);
        }
        assert_eq!(*count.borrow(), 3);
        assert!(!timers.is_valid(id));
    }

    #[test]
    fn zero_runs_is_rejected() {
        let mut timers = SoftTimer::new();
        assert!(timers.set_times(100, 0, 0, || {}).is_none());
    }

    #[test]
    fn disabled_timers_do_not_fire() {
        let mut timers = SoftTimer::new();
        let (count, callback) = counter();
        let id = timers.set_interval(100, 0, callback).unwrap();

        timers.disable(id);
        timers.run(1_000);
        assert_eq!(*count.borrow(), 0);

        timers.enable(id, 1_000);
        timers.run(1_100);
        assert_eq!(*count.borrow(), 1);
    }

    #[test]
    fn toggle_flips_and_resets_timing() {
        let mut timers = SoftTimer::new();
        let id = timers.set_interval(100, 0, || {}).unwrap();
        assert!(!timers.toggle(id, 0));
        assert!(timers.toggle(id, 50));
        assert!(!timers.toggle(usize::MAX, 0));
    }

    #[test]
    fn change_interval_resets_countdown() {
        let mut timers = SoftTimer::new();
        let (count, callback) = counter();
        let id = timers.set_interval(1_000, 0, callback).unwrap();

        timers.change_interval(id, 200, 900);
        timers.run(1_000);
        assert_eq!(*count.borrow(), 0);
        timers.run(1_100);
        assert_eq!(*count.borrow(), 1);
    }

    #[test]
    fn remaining_counts_down() {
        let mut timers = SoftTimer::new();
        let id = timers.set_interval(1_000, 0, || {}).unwrap();
        assert_eq!(timers.remaining(id, 250), 750);
        assert_eq!(timers.remaining(id, 1_500), 0);
        assert_eq!(timers.remaining(usize::MAX, 0), 0);
    }

    #[test]
    fn table_capacity_is_bounded() {
        let mut timers = SoftTimer::new();
        for _ in 0..MAX_TIMERS {
            assert!(timers.set_interval(10, 0, || {}).is_some());
        }
        assert!(timers.set_interval(10, 0, || {}).is_none());
        assert_eq!(timers.available(), 0);

        timers.delete(0);
        assert!(timers.set_interval(10, 0, || {}).is_some());
    }

    #[test]
    fn wraparound_does_not_stall() {
        let mut timers = SoftTimer::new();
        let (count, callback) = counter();
        // Timer armed just before the counter wraps.
        timers.set_interval(200, u64::MAX - 99, callback).unwrap();

        timers.run(50); // elapsed = 150, not yet due
        assert_eq!(*count.borrow(), 0);
        timers.run(100); // elapsed = 200
        assert_eq!(*count.borrow(), 1);
    }
}
