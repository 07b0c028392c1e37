use chrono::{Datelike, Local, Timelike};

/// Time values of one frame.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FrameTime {
    pub time: f64,
    pub delta: f64,
    pub frame: u64,
}

/// Turns host timestamps into frame time, delta and index.
#[derive(Debug, Clone, Default)]
pub(crate) struct FrameClock {
    next_frame: u64,
    last_timestamp: Option<f64>,
}

impl FrameClock {
    pub fn advance(&mut self, timestamp: f64) -> FrameTime {
        let delta = self
            .last_timestamp
            .map(|last| (timestamp - last).max(0.0))
            .unwrap_or(0.0);
        self.last_timestamp = Some(timestamp);
        let frame = self.next_frame;
        self.next_frame = self.next_frame.saturating_add(1);
        FrameTime {
            time: timestamp,
            delta,
            frame,
        }
    }

    pub fn frame(&self) -> u64 {
        self.next_frame
    }
}

/// `gDate`: year, month, day and seconds since local midnight.
pub(crate) fn date_uniform() -> [f32; 4] {
    let local_now = Local::now();
    let seconds_since_midnight = local_now.num_seconds_from_midnight() as f32
        + local_now.nanosecond() as f32 / 1_000_000_000.0;
    [
        local_now.year() as f32,
        local_now.month() as f32,
        local_now.day() as f32,
        seconds_since_midnight,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delta_is_measured_between_timestamps() {
        let mut clock = FrameClock::default();
        let first = clock.advance(10.0);
        assert_eq!(first, FrameTime { time: 10.0, delta: 0.0, frame: 0 });
        let second = clock.advance(10.25);
        assert_eq!(second.delta, 0.25);
        assert_eq!(second.frame, 1);
        let rewound = clock.advance(5.0);
        assert_eq!(rewound.delta, 0.0, "time going backwards never yields a negative delta");
    }

    #[test]
    fn date_uniform_is_plausible() {
        let [year, month, day, seconds] = date_uniform();
        assert!(year >= 2020.0);
        assert!((1.0..=12.0).contains(&month));
        assert!((1.0..=31.0).contains(&day));
        assert!((0.0..86_401.0).contains(&seconds));
    }
}
