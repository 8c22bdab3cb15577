// Copyright (c) 2025 Soumyadip Sarkar.
// All rights reserved.
//
// This source code is licensed under the license found in the
// LICENSE file in the root directory of this source tree.

//! Loads spreadsheet sheets exported as CSV.
//!
//! Bill sheets need a header row with `usage`, `cost` (or `total_cost`) and
//! either `period_start` + `period_end` or `bill_date` + `days`. Optional
//! columns: `utility`, `meter_reading`, `rate`, `taxes`, `service_charge`,
//! `note`. Weather sheets need `date`; every other observation column is
//! optional. Config sheets are `key`,`value` pairs.
//!
//! `import all` takes a directory holding one CSV per workbook sheet
//! (`Config.csv`, `ElecBill.csv`, `GasBill.csv`, `WaterBill.csv`,
//! `Weather.csv`) and loads whichever are present.

use anyhow::{Context, Result, anyhow};
use chrono::{Duration, NaiveDate};
use csv::{ReaderBuilder, StringRecord};
use rusqlite::Connection;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::demand::DemandSettings;
use crate::error::StoreError;
use crate::models::{NewBill, Utility, WeatherObservation};
use crate::settings::{self, WeatherSettings};
use crate::store;
use crate::utils::{arg, opt_arg, parse_date, parse_decimal, parse_f64, parse_utility};
use crate::weather::configured_station;

pub const IMPORT_STATION: &str = "import";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub inserted: usize,
    pub duplicates: usize,
    pub skipped: usize,
}

/// Workbook sheet names and the utility each bill sheet holds.
pub const BILL_SHEETS: [(&str, Utility); 3] = [
    ("ElecBill", Utility::Electric),
    ("GasBill", Utility::Gas),
    ("WaterBill", Utility::Water),
];
pub const WEATHER_SHEET: &str = "Weather";
pub const CONFIG_SHEET: &str = "Config";

pub fn handle(conn: &mut Connection, m: &clap::ArgMatches) -> Result<()> {
    match m.subcommand() {
        Some(("bills", sub)) => {
            let utility = opt_arg(sub, "utility").map(parse_utility).transpose()?;
            let path = arg(sub, "path")?;
            let s = import_bills(conn, utility, Path::new(path))?;
            println!(
                "Imported {} bills from {} ({} duplicates, {} skipped)",
                s.inserted, path, s.duplicates, s.skipped
            );
        }
        Some(("weather", sub)) => {
            let path = arg(sub, "path")?;
            let station = import_station(conn, opt_arg(sub, "station"));
            let s = import_weather(conn, &station, Path::new(path))?;
            println!(
                "Imported {} observations for {} from {} ({} skipped)",
                s.inserted, station, path, s.skipped
            );
        }
        Some(("config", sub)) => {
            let path = arg(sub, "path")?;
            let s = import_config(conn, Path::new(path))?;
            println!("Imported {} settings from {} ({} skipped)", s.inserted, path, s.skipped);
        }
        Some(("all", sub)) => {
            let dir = arg(sub, "dir")?;
            let station = opt_arg(sub, "station");
            let report = import_all(conn, Path::new(dir), station)?;
            if report.is_empty() {
                println!("No workbook sheets found in {}", dir);
            }
            for (sheet, s) in report {
                println!(
                    "{:<10} {} imported, {} duplicates, {} skipped",
                    sheet, s.inserted, s.duplicates, s.skipped
                );
            }
        }
        _ => {}
    }
    Ok(())
}

fn import_station(conn: &Connection, flag: Option<&str>) -> String {
    match flag {
        Some(s) => s.to_string(),
        None => WeatherSettings::load(conn)
            .ok()
            .and_then(|s| configured_station(&s))
            .unwrap_or_else(|| IMPORT_STATION.to_string()),
    }
}

struct Columns(HashMap<String, usize>);

impl Columns {
    fn new(headers: &StringRecord) -> Self {
        Columns(
            headers
                .iter()
                .enumerate()
                .map(|(i, h)| (h.trim().to_ascii_lowercase(), i))
                .collect(),
        )
    }

    fn has(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    /// Trimmed cell, `None` when absent, blank or a `-` placeholder.
    fn get<'a>(&self, rec: &'a StringRecord, names: &[&str]) -> Option<&'a str> {
        names
            .iter()
            .filter_map(|n| self.0.get(*n))
            .filter_map(|i| rec.get(*i))
            .map(str::trim)
            .find(|v| !v.is_empty() && *v != "-")
    }
}

fn is_blank(rec: &StringRecord) -> bool {
    rec.iter().all(|v| v.trim().is_empty())
}

fn period(cols: &Columns, rec: &StringRecord) -> Result<Option<(NaiveDate, NaiveDate)>> {
    if cols.has("period_end") {
        let (Some(s), Some(e)) = (
            cols.get(rec, &["period_start"]),
            cols.get(rec, &["period_end"]),
        ) else {
            return Ok(None);
        };
        return Ok(Some((parse_date(s)?, parse_date(e)?)));
    }
    let Some(end) = cols.get(rec, &["bill_date"]) else {
        return Ok(None);
    };
    let end = parse_date(end)?;
    let days = match cols.get(rec, &["days"]) {
        Some(d) => d
            .parse::<i64>()
            .with_context(|| format!("Invalid day count '{}'", d))?,
        None => 30,
    };
    Ok(Some((end - Duration::days(days), end)))
}

fn bill_from_record(
    utility: Option<Utility>,
    cols: &Columns,
    rec: &StringRecord,
) -> Result<Option<NewBill>> {
    let utility = match (cols.get(rec, &["utility"]), utility) {
        (Some(cell), Some(wanted)) => {
            // a combined sheet filtered to one utility
            if parse_utility(cell)? != wanted {
                return Ok(None);
            }
            wanted
        }
        (Some(cell), None) => parse_utility(cell)?,
        (None, Some(wanted)) => wanted,
        (None, None) => return Err(anyhow!("No utility in row and none given")),
    };
    let Some((start, end)) = period(cols, rec)? else {
        return Ok(None);
    };
    let (Some(usage), Some(cost)) = (
        cols.get(rec, &["usage"]),
        cols.get(rec, &["cost", "total_cost"]),
    ) else {
        return Ok(None);
    };
    let mut bill = NewBill::new(utility, start, end, parse_f64(usage)?, parse_decimal(cost)?);
    bill.meter_reading = cols.get(rec, &["meter_reading"]).map(parse_f64).transpose()?;
    bill.rate = cols.get(rec, &["rate"]).map(parse_decimal).transpose()?;
    bill.taxes = cols.get(rec, &["taxes"]).map(parse_decimal).transpose()?;
    bill.service_charge = cols.get(rec, &["service_charge"]).map(parse_decimal).transpose()?;
    bill.note = cols.get(rec, &["note"]).map(str::to_string);
    Ok(Some(bill))
}

/// Imports a bill sheet in a single transaction. Rows missing a date, usage
/// or cost are skipped; a malformed value aborts the whole import. Periods
/// already stored count as duplicates, so re-running is a no-op.
///
/// A `utility` column decides each row's utility. With `utility` given as
/// well, rows of other utilities are skipped; without the column, `utility`
/// is required.
pub fn import_bills(
    conn: &mut Connection,
    utility: Option<Utility>,
    path: &Path,
) -> Result<ImportSummary> {
    let mut rdr = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("Open CSV {}", path.display()))?;
    let cols = Columns::new(rdr.headers()?);
    if !cols.has("usage") || !(cols.has("cost") || cols.has("total_cost")) {
        return Err(anyhow!(
            "{} needs 'usage' and 'cost' columns",
            path.display()
        ));
    }
    if !cols.has("period_end") && !cols.has("bill_date") {
        return Err(anyhow!(
            "{} needs 'period_start'/'period_end' or 'bill_date' columns",
            path.display()
        ));
    }
    if utility.is_none() && !cols.has("utility") {
        return Err(anyhow!(
            "{} has no 'utility' column; pass --utility",
            path.display()
        ));
    }

    let tx = conn.transaction()?;
    let mut summary = ImportSummary::default();
    for (i, result) in rdr.records().enumerate() {
        // header is line 1
        let line = i + 2;
        let rec = result.with_context(|| format!("Read line {}", line))?;
        if is_blank(&rec) {
            summary.skipped += 1;
            continue;
        }
        let Some(bill) = bill_from_record(utility, &cols, &rec)
            .with_context(|| format!("{} line {}", path.display(), line))?
        else {
            summary.skipped += 1;
            continue;
        };
        match store::insert_bill(&tx, &bill) {
            Ok(_) => summary.inserted += 1,
            Err(StoreError::DuplicatePeriod { .. }) => {
                tracing::debug!(line, start = %bill.period_start, end = %bill.period_end, "duplicate bill skipped");
                summary.duplicates += 1;
            }
            Err(e) => {
                return Err(e).with_context(|| format!("{} line {}", path.display(), line));
            }
        }
    }
    tx.commit()?;
    tracing::info!(
        utility = ?utility,
        inserted = summary.inserted,
        duplicates = summary.duplicates,
        skipped = summary.skipped,
        "bill import finished"
    );
    Ok(summary)
}

fn observation_from_record(
    station: &str,
    cols: &Columns,
    rec: &StringRecord,
) -> Result<Option<WeatherObservation>> {
    let Some(date) = cols.get(rec, &["date"]) else {
        return Ok(None);
    };
    let mut o = WeatherObservation::new(station, parse_date(date)?);
    let num = |names: &[&str]| cols.get(rec, names).map(parse_f64).transpose();
    o.temp_high = num(&["temp_high", "high"])?;
    o.temp_avg = num(&["temp_avg", "avg"])?;
    o.temp_low = num(&["temp_low", "low"])?;
    o.dewpoint_high = num(&["dewpoint_high"])?;
    o.dewpoint_avg = num(&["dewpoint_avg"])?;
    o.dewpoint_low = num(&["dewpoint_low"])?;
    o.humidity_high = num(&["humidity_high"])?;
    o.humidity_avg = num(&["humidity_avg"])?;
    o.humidity_low = num(&["humidity_low"])?;
    o.wind_max = num(&["wind_max"])?;
    o.wind_avg = num(&["wind_avg"])?;
    o.wind_gust = num(&["wind_gust"])?;
    o.pressure_max = num(&["pressure_max"])?;
    o.pressure_min = num(&["pressure_min"])?;
    o.rain_total = num(&["rain_total", "rain", "precip"])?.unwrap_or(0.0);
    Ok(Some(o))
}

/// Imports a weather sheet under `station`, deriving demand from current
/// settings. Existing days are overwritten.
pub fn import_weather(conn: &mut Connection, station: &str, path: &Path) -> Result<ImportSummary> {
    let demand = DemandSettings::load(conn)?;
    let mut rdr = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("Open CSV {}", path.display()))?;
    let cols = Columns::new(rdr.headers()?);
    if !cols.has("date") {
        return Err(anyhow!("{} needs a 'date' column", path.display()));
    }

    let mut summary = ImportSummary::default();
    let mut rows = Vec::new();
    for (i, result) in rdr.records().enumerate() {
        let line = i + 2;
        let rec = result.with_context(|| format!("Read line {}", line))?;
        match observation_from_record(station, &cols, &rec)
            .with_context(|| format!("{} line {}", path.display(), line))?
        {
            Some(mut o) => {
                demand.apply(&mut o);
                rows.push(o);
            }
            None => summary.skipped += 1,
        }
    }
    summary.inserted = store::upsert_observations(conn, &rows)?;
    tracing::info!(station, inserted = summary.inserted, skipped = summary.skipped, "weather import finished");
    Ok(summary)
}

/// Applies a `key`,`value` sheet through the settings validators in one
/// transaction. Keys this tool does not know are skipped.
pub fn import_config(conn: &mut Connection, path: &Path) -> Result<ImportSummary> {
    let mut rdr = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("Open CSV {}", path.display()))?;
    let cols = Columns::new(rdr.headers()?);
    if !cols.has("value") || !(cols.has("key") || cols.has("setting")) {
        return Err(anyhow!("{} needs 'key' and 'value' columns", path.display()));
    }

    let tx = conn.transaction()?;
    let mut summary = ImportSummary::default();
    for (i, result) in rdr.records().enumerate() {
        let line = i + 2;
        let rec = result.with_context(|| format!("Read line {}", line))?;
        let (Some(key), Some(value)) = (
            cols.get(&rec, &["key", "setting"]),
            cols.get(&rec, &["value"]),
        ) else {
            summary.skipped += 1;
            continue;
        };
        let key = key.to_ascii_lowercase();
        if !settings::is_known_key(&key) {
            tracing::warn!(line, key = %key, "unknown setting skipped");
            summary.skipped += 1;
            continue;
        }
        settings::set_setting(&tx, &key, value)
            .with_context(|| format!("{} line {}", path.display(), line))?;
        summary.inserted += 1;
    }
    tx.commit()?;
    tracing::info!(inserted = summary.inserted, skipped = summary.skipped, "config import finished");
    Ok(summary)
}

/// Finds `<sheet>.csv` in `dir`, ignoring case.
fn sheet_path(dir: &Path, sheet: &str) -> Result<Option<PathBuf>> {
    let wanted = format!("{}.csv", sheet.to_ascii_lowercase());
    for entry in std::fs::read_dir(dir).with_context(|| format!("Read dir {}", dir.display()))? {
        let path = entry?.path();
        let name = path.file_name().and_then(|n| n.to_str()).map(str::to_ascii_lowercase);
        if path.is_file() && name.as_deref() == Some(wanted.as_str()) {
            return Ok(Some(path));
        }
    }
    Ok(None)
}

/// Migrates a workbook saved as one CSV per sheet. Config loads first so the
/// weather sheet's demand uses the migrated thresholds. Missing sheets are
/// skipped; the first failing sheet stops the run.
pub fn import_all(
    conn: &mut Connection,
    dir: &Path,
    station: Option<&str>,
) -> Result<Vec<(String, ImportSummary)>> {
    let mut out = Vec::new();
    if let Some(path) = sheet_path(dir, CONFIG_SHEET)? {
        out.push((CONFIG_SHEET.to_string(), import_config(conn, &path)?));
    }
    for (sheet, utility) in BILL_SHEETS {
        if let Some(path) = sheet_path(dir, sheet)? {
            out.push((sheet.to_string(), import_bills(conn, Some(utility), &path)?));
        }
    }
    if let Some(path) = sheet_path(dir, WEATHER_SHEET)? {
        let station = import_station(conn, station);
        out.push((WEATHER_SHEET.to_string(), import_weather(conn, &station, &path)?));
    }
    if out.is_empty() {
        tracing::warn!(dir = %dir.display(), "no workbook sheets found");
    }
    Ok(out)
}
