use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::engine::Options;
use crate::model::Minute;
use crate::slots::parse_time;

pub const DEFAULT_ROOMS: [&str; 7] = [
    "Study Room 1",
    "Study Room 2",
    "Study Room 3",
    "Study Room 4",
    "Study Room 5",
    "Conference Room",
    "LRE Room",
];

/// Host settings, read from `ROOMBOOK_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub data_dir: PathBuf,
    /// Seeded when no room snapshot exists.
    pub rooms: Vec<String>,
    pub slot_minutes: i64,
    pub day_start: Minute,
    pub day_end: Minute,
    pub sweep_period: Duration,
    pub history_limit: Option<usize>,
    pub metrics_port: Option<u16>,
    pub admin_user: Option<String>,
    pub admin_password: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            rooms: DEFAULT_ROOMS.iter().map(|s| s.to_string()).collect(),
            slot_minutes: 60,
            day_start: 8 * 60,
            day_end: 23 * 60,
            sweep_period: Duration::from_secs(60),
            history_limit: None,
            metrics_port: None,
            admin_user: None,
            admin_password: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Unparseable values fall back to the default with a warning.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let rooms = match get("ROOMBOOK_ROOMS") {
            Some(list) => list
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect(),
            None => defaults.rooms,
        };
        let time = |key: &str, default: Minute| match get(key) {
            Some(v) => parse_time(&v).unwrap_or_else(|e| {
                warn!("{key}: {e}, using default");
                default
            }),
            None => default,
        };

        Self {
            data_dir: get("ROOMBOOK_DATA_DIR").map_or(defaults.data_dir, PathBuf::from),
            rooms,
            slot_minutes: parsed(&get, "ROOMBOOK_SLOT_MINUTES").unwrap_or(defaults.slot_minutes),
            day_start: time("ROOMBOOK_DAY_START", defaults.day_start),
            day_end: time("ROOMBOOK_DAY_END", defaults.day_end),
            sweep_period: parsed(&get, "ROOMBOOK_SWEEP_SECS")
                .filter(|s: &u64| *s > 0)
                .map_or(defaults.sweep_period, Duration::from_secs),
            history_limit: parsed(&get, "ROOMBOOK_HISTORY_LIMIT"),
            metrics_port: parsed(&get, "ROOMBOOK_METRICS_PORT"),
            admin_user: get("ROOMBOOK_ADMIN_USER"),
            admin_password: get("ROOMBOOK_ADMIN_PASSWORD"),
        }
    }

    pub fn engine_options(&self) -> Options {
        Options {
            seed_rooms: self.rooms.clone(),
            history_limit: self.history_limit,
        }
    }
}

fn parsed<T: FromStr>(get: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = get(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!("{key}: cannot parse {raw:?}, using default");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_map(pairs: &[(&str, &str)]) -> Config {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn defaults_match_the_campus_layout() {
        let cfg = from_map(&[]);
        assert_eq!(cfg.rooms.len(), 7);
        assert_eq!(cfg.rooms[5], "Conference Room");
        assert_eq!(cfg.slot_minutes, 60);
        assert_eq!((cfg.day_start, cfg.day_end), (480, 1380));
        assert_eq!(cfg.history_limit, None);
        assert_eq!(cfg, Config::default());
    }

    #[test]
    fn overrides() {
        let cfg = from_map(&[
            ("ROOMBOOK_DATA_DIR", "/var/lib/roombook"),
            ("ROOMBOOK_ROOMS", " Lab A , Lab B,,"),
            ("ROOMBOOK_SLOT_MINUTES", "30"),
            ("ROOMBOOK_DAY_START", "7:00 AM"),
            ("ROOMBOOK_DAY_END", "21:30"),
            ("ROOMBOOK_SWEEP_SECS", "5"),
            ("ROOMBOOK_HISTORY_LIMIT", "50"),
            ("ROOMBOOK_METRICS_PORT", "9100"),
            ("ROOMBOOK_ADMIN_USER", "root"),
            ("ROOMBOOK_ADMIN_PASSWORD", "rootpassword"),
        ]);
        assert_eq!(cfg.data_dir, PathBuf::from("/var/lib/roombook"));
        assert_eq!(cfg.rooms, vec!["Lab A", "Lab B"]);
        assert_eq!(cfg.slot_minutes, 30);
        assert_eq!((cfg.day_start, cfg.day_end), (420, 1290));
        assert_eq!(cfg.sweep_period, Duration::from_secs(5));
        assert_eq!(cfg.engine_options().history_limit, Some(50));
        assert_eq!(cfg.metrics_port, Some(9100));
        assert_eq!(cfg.admin_user.as_deref(), Some("root"));
    }

    #[test]
    fn garbage_falls_back_to_defaults() {
        let cfg = from_map(&[
            ("ROOMBOOK_SLOT_MINUTES", "hourly"),
            ("ROOMBOOK_DAY_START", "25:00"),
            ("ROOMBOOK_SWEEP_SECS", "0"),
            ("ROOMBOOK_METRICS_PORT", "99999"),
            ("ROOMBOOK_ADMIN_USER", "   "),
        ]);
        assert_eq!(cfg.slot_minutes, 60);
        assert_eq!(cfg.day_start, 480);
        assert_eq!(cfg.sweep_period, Duration::from_secs(60));
        assert_eq!(cfg.metrics_port, None);
        assert_eq!(cfg.admin_user, None);
    }
}
