//! Deterministic idle blinking.

use std::f32::consts::PI;

/// Periodic blink: eyes open for `interval` seconds, then a closing and
/// reopening arc lasting `close` seconds.
#[derive(Debug, Clone)]
pub struct AutoBlink {
    interval: f32,
    close: f32,
    clock: f32,
}

impl AutoBlink {
    pub fn new(interval: f32, close: f32) -> Self {
        Self {
            interval: interval.max(0.0),
            close: close.max(1e-3),
            clock: 0.0,
        }
    }

    pub fn tick(&mut self, dt: f32) {
        self.clock = (self.clock + dt).rem_euclid(self.interval + self.close);
    }

    /// Start over with the eyes open.
    pub fn reset(&mut self) {
        self.clock = 0.0;
    }

    /// Blink weight in [0, 1]; peaks halfway through the closed phase.
    pub fn value(&self) -> f32 {
        if self.clock < self.interval {
            return 0.0;
        }
        let phase = ((self.clock - self.interval) / self.close).clamp(0.0, 1.0);
        (PI * phase).sin().max(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blink_cycle() {
        let mut blink = AutoBlink::new(5.0, 0.12);
        assert_eq!(blink.value(), 0.0);

        blink.tick(4.9);
        assert_eq!(blink.value(), 0.0);

        blink.tick(0.16);
        assert!(blink.value() > 0.9);

        blink.tick(0.1);
        assert_eq!(blink.value(), 0.0);
    }

    #[test]
    fn test_reset_opens_eyes() {
        let mut blink = AutoBlink::new(1.0, 0.2);
        blink.tick(1.1);
        assert!(blink.value() > 0.0);
        blink.reset();
        assert_eq!(blink.value(), 0.0);
    }
}
