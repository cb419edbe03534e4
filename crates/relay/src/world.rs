use std::time::{Instant, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

const SECONDS_PER_DAY: i64 = 24 * 60 * 60;
const NOON: u32 = 12 * 60 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Season {
    Winter = 0,
    #[default]
    Spring = 1,
    Summer = 2,
    Fall = 3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Weather {
    Clear = 0,
    Rain = 1,
    Snow = 2,
    Underwater = 3,
    #[default]
    Sunny = 4,
    Fog = 5,
    Thunderstorm = 6,
    Sandstorm = 7,
    Ash = 8,
    Blizzard = 9,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldConfig {
    pub season: Season,
    pub weather: Weather,
    pub day_cycle: bool,
    pub use_real_time: bool,
    /// Seconds after midnight the simulated clock starts at when real time is off.
    pub start_time: u32,
    /// Shift applied to the clock, in seconds.
    pub time_offset: i64,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            season: Season::default(),
            weather: Weather::default(),
            day_cycle: true,
            use_real_time: true,
            start_time: NOON,
            time_offset: 0,
        }
    }
}

/// Snapshot broadcast to every joined client once per world cadence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorldState {
    pub season: Season,
    pub weather: Weather,
    pub time: String,
}

#[derive(Debug)]
pub struct World {
    config: WorldConfig,
    started: Instant,
}

impl World {
    pub fn new(config: WorldConfig) -> Self {
        Self {
            config,
            started: Instant::now(),
        }
    }

    /// Seconds after midnight on the world clock.
    pub fn seconds_of_day(&self) -> u32 {
        if !self.config.day_cycle {
            return NOON;
        }
        let base = if self.config.use_real_time {
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs() as i64)
                .unwrap_or(0)
        } else {
            self.config.start_time as i64 + self.started.elapsed().as_secs() as i64
        };
        (base + self.config.time_offset).rem_euclid(SECONDS_PER_DAY) as u32
    }

    pub fn state(&self) -> WorldState {
        WorldState {
            season: self.config.season,
            weather: self.config.weather,
            time: format_time(self.seconds_of_day()),
        }
    }
}

impl Default for World {
    fn default() -> Self {
        Self::new(WorldConfig::default())
    }
}

/// Formats seconds after midnight as `H,M,S` without padding.
pub fn format_time(seconds: u32) -> String {
    format!("{},{},{}", seconds / 3600, seconds / 60 % 60, seconds % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_time() {
        assert_eq!(format_time(0), "0,0,0");
        assert_eq!(format_time(NOON), "12,0,0");
        assert_eq!(format_time(13 * 3600 + 5 * 60 + 9), "13,5,9");
    }

    #[test]
    fn test_day_cycle_off_is_noon() {
        let world = World::new(WorldConfig {
            day_cycle: false,
            ..Default::default()
        });
        assert_eq!(world.state().time, "12,0,0");
    }

    #[test]
    fn test_fixed_clock_with_negative_offset_wraps() {
        let world = World::new(WorldConfig {
            use_real_time: false,
            start_time: 0,
            time_offset: -60,
            ..Default::default()
        });
        let seconds = world.seconds_of_day();
        assert!(seconds >= 23 * 3600 + 59 * 60, "got {seconds}");
    }

    #[test]
    fn test_state_carries_settings() {
        let world = World::new(WorldConfig {
            season: Season::Winter,
            weather: Weather::Snow,
            ..Default::default()
        });
        let state = world.state();
        assert_eq!(state.season, Season::Winter);
        assert_eq!(state.weather as i32, 2);
    }
}
