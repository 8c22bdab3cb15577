// Copyright (c) 2025 Soumyadip Sarkar.
// All rights reserved.
//
// This source code is licensed under the license found in the
// LICENSE file in the root directory of this source tree.

//! Key/value configuration persisted in the `settings` table.

use anyhow::{Context, Result, anyhow};
use once_cell::sync::Lazy;
use regex::Regex;
use rusqlite::{Connection, OptionalExtension, params};

use crate::demand::DemandSettings;

pub const WU_KEY_ENV: &str = "UTILITYHQ_WU_API_KEY";

static STATION_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Z0-9]{4,16}$").expect("station id pattern"));

const DEFAULTS: &[(&str, &str, &str)] = &[
    ("weather_source", "open-meteo", "Weather data source: open-meteo or wu"),
    ("station_id", "", "Weather Underground PWS station id"),
    ("wu_api_key", "", "Weather Underground API key"),
    ("location_latitude", "35.3187", "Latitude for Open-Meteo"),
    ("location_longitude", "-82.4612", "Longitude for Open-Meteo"),
    ("location_name", "", "Location display name"),
    ("timezone", "America/New_York", "Timezone daily weather is aggregated in"),
    ("heating_min_temp", "15", "Low temperature (F) at which heating demand is 100%"),
    ("heating_max_temp", "54", "Low temperature (F) below which heating demand starts"),
    ("cooling_min_temp", "78", "High temperature (F) above which cooling demand starts"),
    ("cooling_max_temp", "96", "High temperature (F) at which cooling demand is 100%"),
    ("k_factor", "2.25", "Root used to compress demand deviation into expected cost deviation"),
    ("home_sqft", "1730", "Home square footage for cost per sqft"),
];

pub fn seed_defaults(conn: &Connection) -> Result<()> {
    for (k, v, d) in DEFAULTS {
        conn.execute(
            "INSERT OR IGNORE INTO settings(key, value, description) VALUES (?1, ?2, ?3)",
            params![k, v, d],
        )?;
    }
    Ok(())
}

pub fn is_known_key(key: &str) -> bool {
    DEFAULTS.iter().any(|(k, _, _)| *k == key)
}

pub fn get_setting(conn: &Connection, key: &str) -> Result<Option<String>> {
    let v: Option<String> = conn
        .query_row("SELECT value FROM settings WHERE key=?1", params![key], |r| {
            r.get(0)
        })
        .optional()?;
    Ok(v.filter(|s| !s.trim().is_empty()))
}

pub fn set_setting(conn: &Connection, key: &str, value: &str) -> Result<()> {
    if !is_known_key(key) {
        return Err(anyhow!("Unknown setting '{}'", key));
    }
    validate(key, value)?;
    conn.execute(
        "INSERT INTO settings(key, value) VALUES(?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value=excluded.value, updated_at=datetime('now')",
        params![key, value],
    )?;
    Ok(())
}

pub fn all_settings(conn: &Connection) -> Result<Vec<(String, String, String)>> {
    let mut stmt =
        conn.prepare("SELECT key, value, IFNULL(description,'') FROM settings ORDER BY key")?;
    let rows = stmt.query_map([], |r| {
        Ok((
            r.get::<_, String>(0)?,
            r.get::<_, String>(1)?,
            r.get::<_, String>(2)?,
        ))
    })?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

fn get_f64(conn: &Connection, key: &str, default: f64) -> Result<f64> {
    match get_setting(conn, key)? {
        Some(s) => s
            .trim()
            .parse::<f64>()
            .with_context(|| format!("Setting '{}' is not a number: '{}'", key, s)),
        None => Ok(default),
    }
}

fn validate(key: &str, value: &str) -> Result<()> {
    match key {
        "weather_source" => {
            WeatherSourceKind::parse(value)?;
        }
        "station_id" if !value.is_empty() => {
            if !STATION_ID.is_match(value) {
                return Err(anyhow!("Invalid station id '{}'", value));
            }
        }
        "heating_min_temp" | "heating_max_temp" | "cooling_min_temp" | "cooling_max_temp"
        | "k_factor" | "home_sqft" | "location_latitude" | "location_longitude" => {
            value
                .trim()
                .parse::<f64>()
                .with_context(|| format!("Setting '{}' must be numeric, got '{}'", key, value))?;
        }
        _ => {}
    }
    Ok(())
}

impl DemandSettings {
    pub fn load(conn: &Connection) -> Result<Self> {
        let d = DemandSettings::default();
        let s = DemandSettings {
            heating_min: get_f64(conn, "heating_min_temp", d.heating_min)?,
            heating_max: get_f64(conn, "heating_max_temp", d.heating_max)?,
            cooling_min: get_f64(conn, "cooling_min_temp", d.cooling_min)?,
            cooling_max: get_f64(conn, "cooling_max_temp", d.cooling_max)?,
            k_factor: get_f64(conn, "k_factor", d.k_factor)?,
        };
        s.validate()?;
        Ok(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeatherSourceKind {
    OpenMeteo,
    WeatherUnderground,
}

impl WeatherSourceKind {
    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "open-meteo" | "openmeteo" => Ok(Self::OpenMeteo),
            "wu" | "weather-underground" => Ok(Self::WeatherUnderground),
            other => Err(anyhow!(
                "Unknown weather source '{}', expected open-meteo|wu",
                other
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WeatherSettings {
    pub source: WeatherSourceKind,
    pub station_id: Option<String>,
    pub api_key: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    pub timezone: String,
}

impl WeatherSettings {
    pub fn load(conn: &Connection) -> Result<Self> {
        let source = match get_setting(conn, "weather_source")? {
            Some(s) => WeatherSourceKind::parse(&s)?,
            None => WeatherSourceKind::OpenMeteo,
        };
        let api_key = match std::env::var(WU_KEY_ENV) {
            Ok(k) if !k.trim().is_empty() => Some(k.trim().to_string()),
            _ => get_setting(conn, "wu_api_key")?,
        };
        Ok(Self {
            source,
            station_id: get_setting(conn, "station_id")?,
            api_key,
            latitude: get_f64(conn, "location_latitude", 35.3187)?,
            longitude: get_f64(conn, "location_longitude", -82.4612)?,
            timezone: get_setting(conn, "timezone")?
                .unwrap_or_else(|| "America/New_York".to_string()),
        })
    }
}

pub fn home_sqft(conn: &Connection) -> Result<Option<f64>> {
    let v = get_f64(conn, "home_sqft", 0.0)?;
    Ok(if v > 0.0 { Some(v) } else { None })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn station_ids_validate_against_shared_pattern() {
        for _ in 0..3 {
            assert!(validate("station_id", "KNCHEND12").is_ok());
        }
        assert!(validate("station_id", "knchend12").is_err());
        assert!(validate("station_id", "K1").is_err());
        assert!(validate("station_id", "").is_ok());
    }
}
