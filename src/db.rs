// Copyright (c) 2025 Soumyadip Sarkar.
// All rights reserved.
//
// This source code is licensed under the license found in the
// LICENSE file in the root directory of this source tree.

use anyhow::{Context, Result};
use directories::ProjectDirs;
use once_cell::sync::Lazy;
use rusqlite::Connection;
use std::fs;
use std::path::{Path, PathBuf};

static APP: Lazy<(&str, &str, &str)> =
    Lazy::new(|| ("com.alphavelocity", "UtilityHQ", "utilityhq"));

pub const DB_ENV: &str = "UTILITYHQ_DB";

/// Default database location: `$UTILITYHQ_DB` if set, else the platform data dir.
pub fn db_path() -> Result<PathBuf> {
    if let Some(p) = std::env::var_os(DB_ENV).filter(|p| !p.is_empty()) {
        return Ok(PathBuf::from(p));
    }
    let proj = ProjectDirs::from(APP.0, APP.1, APP.2)
        .context("Could not determine platform-specific data dir")?;
    let data_dir = proj.data_dir();
    fs::create_dir_all(data_dir).context("Failed to create data dir")?;
    Ok(data_dir.join("utilities.sqlite"))
}

pub fn open_at(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Create data dir {}", parent.display()))?;
    }
    let mut conn =
        Connection::open(path).with_context(|| format!("Open DB at {}", path.display()))?;
    init_schema(&mut conn).with_context(|| format!("Initialize schema in {}", path.display()))?;
    tracing::debug!(path = %path.display(), "database ready");
    Ok(conn)
}

pub fn init_schema(conn: &mut Connection) -> Result<()> {
    conn.execute_batch(
        r#"
    PRAGMA foreign_keys = ON;

    CREATE TABLE IF NOT EXISTS settings(
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL,
        description TEXT,
        updated_at TEXT NOT NULL DEFAULT (datetime('now'))
    );

    CREATE TABLE IF NOT EXISTS bills(
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        utility TEXT NOT NULL CHECK(utility IN ('electric','gas','water')),
        period_start TEXT NOT NULL,
        period_end TEXT NOT NULL,
        usage REAL NOT NULL,
        cost TEXT NOT NULL,
        meter_reading REAL,
        rate TEXT,
        taxes TEXT,
        service_charge TEXT,
        note TEXT,
        created_at TEXT NOT NULL DEFAULT (datetime('now')),
        updated_at TEXT NOT NULL DEFAULT (datetime('now')),
        UNIQUE(utility, period_start, period_end)
    );
    CREATE INDEX IF NOT EXISTS idx_bills_period ON bills(utility, period_end);

    CREATE TABLE IF NOT EXISTS weather_daily(
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        station TEXT NOT NULL,
        date TEXT NOT NULL,
        temp_high REAL,
        temp_avg REAL,
        temp_low REAL,
        dewpoint_high REAL,
        dewpoint_avg REAL,
        dewpoint_low REAL,
        humidity_high REAL,
        humidity_avg REAL,
        humidity_low REAL,
        wind_max REAL,
        wind_avg REAL,
        wind_gust REAL,
        pressure_max REAL,
        pressure_min REAL,
        rain_total REAL NOT NULL DEFAULT 0,
        cooling_demand REAL,
        heating_demand REAL,
        max_demand REAL,
        fetched_at TEXT NOT NULL DEFAULT (datetime('now')),
        UNIQUE(station, date)
    );
    CREATE INDEX IF NOT EXISTS idx_weather_date ON weather_daily(date);

    CREATE TABLE IF NOT EXISTS meter_readings(
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        utility TEXT NOT NULL CHECK(utility IN ('electric','gas','water')),
        reading_date TEXT NOT NULL,
        reading_value REAL NOT NULL,
        created_at TEXT NOT NULL DEFAULT (datetime('now'))
    );
    CREATE INDEX IF NOT EXISTS idx_meter_readings ON meter_readings(utility, reading_date);
    "#,
    )?;
    crate::settings::seed_defaults(conn)?;
    Ok(())
}
