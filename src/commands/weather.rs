// Copyright (c) 2025 Soumyadip Sarkar.
// All rights reserved.
//
// This source code is licensed under the license found in the
// LICENSE file in the root directory of this source tree.

use anyhow::{Context, Result};
use chrono::{Duration, Local, NaiveDate};
use clap::ArgMatches;
use rusqlite::Connection;

use crate::demand::DemandSettings;
use crate::models::WeatherObservation;
use crate::settings::{WeatherSettings, WeatherSourceKind};
use crate::store;
use crate::utils::{arg, fmt_opt, maybe_print_json, opt_arg, parse_date, pretty_table};
use crate::weather::{self as client, WeatherSource};

const DEFAULT_BACKFILL_DAYS: i64 = 365;

pub fn handle(conn: &mut Connection, m: &ArgMatches) -> Result<()> {
    match m.subcommand() {
        Some(("fetch", sub)) => fetch(conn, sub)?,
        Some(("list", sub)) => list(conn, sub)?,
        Some(("rm", sub)) => {
            let date = parse_date(arg(sub, "date")?)?;
            let station = match opt_arg(sub, "station") {
                Some(s) => s.to_string(),
                None => client::configured_station(&WeatherSettings::load(conn)?)
                    .context("No station configured; pass --station")?,
            };
            if store::delete_observation(conn, &station, date)? {
                println!("Removed {} observation for {}", station, date);
            } else {
                println!("No {} observation for {}", station, date);
            }
        }
        Some(("demand", _)) => {
            let settings = DemandSettings::load(conn)?;
            let n = store::recompute_demand(conn, &settings)?;
            println!("Recomputed demand for {} observations", n);
        }
        _ => {}
    }
    Ok(())
}

fn fetch(conn: &mut Connection, sub: &ArgMatches) -> Result<()> {
    let mut settings = WeatherSettings::load(conn)?;
    if let Some(s) = opt_arg(sub, "source") {
        settings.source = WeatherSourceKind::parse(s)?;
    }
    let source = client::source_from_settings(&settings)?;
    let from = opt_arg(sub, "from").map(parse_date).transpose()?;
    let to = match opt_arg(sub, "to") {
        Some(s) => parse_date(s)?,
        None => Local::now().date_naive(),
    };
    let n = fetch_with(conn, source.as_ref(), from, to)?;
    println!("Stored {} observations for {}", n, source.station_id());
    Ok(())
}

/// Fetches `from..=to` into the database. Without `from`, resumes the day after
/// the station's last stored observation, or backfills a year.
pub fn fetch_with(
    conn: &mut Connection,
    source: &dyn WeatherSource,
    from: Option<NaiveDate>,
    to: NaiveDate,
) -> Result<usize> {
    let start = match from {
        Some(d) => d,
        None => match store::latest_weather_date(conn, &source.station_id())? {
            Some(last) => last + Duration::days(1),
            None => to - Duration::days(DEFAULT_BACKFILL_DAYS),
        },
    };
    if start > to {
        tracing::info!(station = %source.station_id(), "weather already up to date");
        return Ok(0);
    }
    let demand = DemandSettings::load(conn)?;
    client::refresh(conn, source, &demand, start, to)
}

/// Observations used for reports: the configured station when it has data,
/// otherwise the station with the most stored rows.
pub fn report_weather(conn: &Connection) -> Result<Vec<WeatherObservation>> {
    let configured = match WeatherSettings::load(conn) {
        Ok(s) => client::configured_station(&s),
        Err(e) => {
            tracing::warn!(error = %e, "weather settings unreadable; using stored stations");
            None
        }
    };
    if let Some(station) = configured {
        if store::latest_weather_date(conn, &station)?.is_some() {
            return Ok(store::all_weather(conn, Some(&station))?);
        }
    }
    match store::weather_stations(conn)?.into_iter().next() {
        Some(station) => Ok(store::all_weather(conn, Some(&station))?),
        None => Ok(Vec::new()),
    }
}

fn list(conn: &Connection, sub: &ArgMatches) -> Result<()> {
    let station = opt_arg(sub, "station");
    let from = opt_arg(sub, "from").map(parse_date).transpose()?;
    let to = opt_arg(sub, "to").map(parse_date).transpose()?;
    let limit = sub.get_one::<usize>("limit").copied().unwrap_or(31);
    let mut rows = match (from, to, station) {
        (None, None, None) => report_weather(conn)?,
        (from, to, station) => store::weather_range(
            conn,
            from.map_or_else(|| parse_date("1900-01-01"), Ok)?,
            to.map_or_else(|| parse_date("9999-12-31"), Ok)?,
            station,
        )
        .context("Load weather range")?,
    };
    if rows.len() > limit {
        rows.drain(..rows.len() - limit);
    }
    if maybe_print_json(sub.get_flag("json"), sub.get_flag("jsonl"), &rows)? {
        return Ok(());
    }
    let f1 = |v: Option<f64>| fmt_opt(v.map(|x| format!("{:.1}", x)));
    let data = rows
        .iter()
        .map(|o| {
            let d = o.demand.unwrap_or_default();
            vec![
                o.date.to_string(),
                o.station.clone(),
                f1(o.temp_high),
                f1(o.temp_avg),
                f1(o.temp_low),
                f1(o.humidity_avg),
                f1(o.wind_max),
                format!("{:.2}", o.rain_total),
                format!("{:.2}", d.cooling),
                format!("{:.2}", d.heating),
            ]
        })
        .collect();
    println!(
        "{}",
        pretty_table(
            &["Date", "Station", "High", "Avg", "Low", "Hum%", "Wind", "Rain", "Clg", "Htg"],
            data
        )
    );
    Ok(())
}
