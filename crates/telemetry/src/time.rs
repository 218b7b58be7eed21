// Path: crates/telemetry/src/time.rs
//! A generic RAII timer: records the elapsed wall-clock duration of a scope
//! into whatever sink callback it is given when the timer is dropped.

use std::time::Instant;

/// Measures the lifetime of the value and reports it on drop.
pub struct Timer<'a> {
    start: Instant,
    on_drop: Box<dyn FnMut(f64) + 'a>,
}

impl<'a> Timer<'a> {
    /// Starts a timer that invokes `on_drop` with the elapsed seconds when dropped.
    pub fn new(on_drop: impl FnMut(f64) + 'a) -> Self {
        Self {
            start: Instant::now(),
            on_drop: Box::new(on_drop),
        }
    }
}

impl Drop for Timer<'_> {
    fn drop(&mut self) {
        (self.on_drop)(self.start.elapsed().as_secs_f64());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn timer_reports_on_drop() {
        let reported = Cell::new(false);
        {
            let _t = Timer::new(|_secs| reported.set(true));
        }
        assert!(reported.get());
    }
}
