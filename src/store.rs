// Copyright (c) 2025 Soumyadip Sarkar.
// All rights reserved.
//
// This source code is licensed under the license found in the
// LICENSE file in the root directory of this source tree.

//! Row-level access to bills, weather observations and meter readings.

use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension, Row, params};
use rust_decimal::Decimal;

use crate::demand::DemandSettings;
use crate::error::StoreError;
use crate::models::{Bill, BillPatch, Demand, MeterReading, NewBill, Utility, WeatherObservation};

const BILL_COLUMNS: &str = "id, utility, period_start, period_end, usage, cost, meter_reading, rate, taxes, service_charge, note";

const WEATHER_COLUMNS: &str = "station, date, temp_high, temp_avg, temp_low, dewpoint_high, dewpoint_avg, dewpoint_low, humidity_high, humidity_avg, humidity_low, wind_max, wind_avg, wind_gust, pressure_max, pressure_min, rain_total, cooling_demand, heating_demand, max_demand";

#[derive(Debug, Clone, Default)]
pub struct BillFilter {
    pub utility: Option<Utility>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub limit: Option<usize>,
}

fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(f, _)
            if f.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

fn validate_period(
    utility: Utility,
    start: NaiveDate,
    end: NaiveDate,
    usage: f64,
) -> Result<(), StoreError> {
    if end < start {
        return Err(StoreError::Invalid(format!(
            "{} period ends ({}) before it starts ({})",
            utility, end, start
        )));
    }
    if !usage.is_finite() || usage < 0.0 {
        return Err(StoreError::Invalid(format!(
            "{} usage must be a non-negative number, got {}",
            utility, usage
        )));
    }
    Ok(())
}

fn parse_decimal_col(column: &'static str, s: String) -> Result<Decimal, StoreError> {
    s.parse::<Decimal>()
        .map_err(|_| StoreError::Corrupt { column, value: s })
}

fn parse_opt_decimal_col(
    column: &'static str,
    s: Option<String>,
) -> Result<Option<Decimal>, StoreError> {
    s.map(|v| parse_decimal_col(column, v)).transpose()
}

fn parse_utility_col(s: String) -> Result<Utility, StoreError> {
    s.parse::<Utility>().map_err(|_| StoreError::Corrupt {
        column: "utility",
        value: s,
    })
}

struct RawBill {
    id: i64,
    utility: String,
    period_start: NaiveDate,
    period_end: NaiveDate,
    usage: f64,
    cost: String,
    meter_reading: Option<f64>,
    rate: Option<String>,
    taxes: Option<String>,
    service_charge: Option<String>,
    note: Option<String>,
}

fn raw_bill(r: &Row<'_>) -> rusqlite::Result<RawBill> {
    Ok(RawBill {
        id: r.get(0)?,
        utility: r.get(1)?,
        period_start: r.get(2)?,
        period_end: r.get(3)?,
        usage: r.get(4)?,
        cost: r.get(5)?,
        meter_reading: r.get(6)?,
        rate: r.get(7)?,
        taxes: r.get(8)?,
        service_charge: r.get(9)?,
        note: r.get(10)?,
    })
}

impl TryFrom<RawBill> for Bill {
    type Error = StoreError;

    fn try_from(r: RawBill) -> Result<Self, Self::Error> {
        Ok(Bill {
            id: r.id,
            utility: parse_utility_col(r.utility)?,
            period_start: r.period_start,
            period_end: r.period_end,
            usage: r.usage,
            cost: parse_decimal_col("cost", r.cost)?,
            meter_reading: r.meter_reading,
            rate: parse_opt_decimal_col("rate", r.rate)?,
            taxes: parse_opt_decimal_col("taxes", r.taxes)?,
            service_charge: parse_opt_decimal_col("service_charge", r.service_charge)?,
            note: r.note,
        })
    }
}

pub fn insert_bill(conn: &Connection, bill: &NewBill) -> Result<i64, StoreError> {
    validate_period(bill.utility, bill.period_start, bill.period_end, bill.usage)?;
    let res = conn.execute(
        "INSERT INTO bills(utility, period_start, period_end, usage, cost, meter_reading, rate, taxes, service_charge, note)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            bill.utility.as_str(),
            bill.period_start.to_string(),
            bill.period_end.to_string(),
            bill.usage,
            bill.cost.to_string(),
            bill.meter_reading,
            bill.rate.map(|d| d.to_string()),
            bill.taxes.map(|d| d.to_string()),
            bill.service_charge.map(|d| d.to_string()),
            bill.note.as_deref(),
        ],
    );
    match res {
        Ok(_) => Ok(conn.last_insert_rowid()),
        Err(e) if is_unique_violation(&e) => Err(StoreError::DuplicatePeriod {
            utility: bill.utility,
            start: bill.period_start,
            end: bill.period_end,
        }),
        Err(e) => Err(e.into()),
    }
}

pub fn get_bill(conn: &Connection, id: i64) -> Result<Bill, StoreError> {
    let raw = conn
        .query_row(
            &format!("SELECT {BILL_COLUMNS} FROM bills WHERE id=?1"),
            params![id],
            raw_bill,
        )
        .optional()?
        .ok_or(StoreError::NotFound(id))?;
    Bill::try_from(raw)
}

pub fn update_bill(conn: &Connection, id: i64, patch: &BillPatch) -> Result<Bill, StoreError> {
    let mut bill = get_bill(conn, id)?;
    if patch.is_empty() {
        return Ok(bill);
    }
    patch.apply(&mut bill);
    validate_period(bill.utility, bill.period_start, bill.period_end, bill.usage)?;
    let res = conn.execute(
        "UPDATE bills SET period_start=?1, period_end=?2, usage=?3, cost=?4, meter_reading=?5,
                rate=?6, taxes=?7, service_charge=?8, note=?9, updated_at=datetime('now')
         WHERE id=?10",
        params![
            bill.period_start.to_string(),
            bill.period_end.to_string(),
            bill.usage,
            bill.cost.to_string(),
            bill.meter_reading,
            bill.rate.map(|d| d.to_string()),
            bill.taxes.map(|d| d.to_string()),
            bill.service_charge.map(|d| d.to_string()),
            bill.note.as_deref(),
            id,
        ],
    );
    match res {
        Ok(_) => Ok(bill),
        Err(e) if is_unique_violation(&e) => Err(StoreError::DuplicatePeriod {
            utility: bill.utility,
            start: bill.period_start,
            end: bill.period_end,
        }),
        Err(e) => Err(e.into()),
    }
}

pub fn delete_bill(conn: &Connection, id: i64) -> Result<(), StoreError> {
    let n = conn.execute("DELETE FROM bills WHERE id=?1", params![id])?;
    if n == 0 {
        return Err(StoreError::NotFound(id));
    }
    Ok(())
}

/// Bills matching the filter, newest period first. Date bounds apply to `period_end`.
pub fn list_bills(conn: &Connection, filter: &BillFilter) -> Result<Vec<Bill>, StoreError> {
    let mut sql = format!("SELECT {BILL_COLUMNS} FROM bills WHERE 1=1");
    let mut params_vec: Vec<String> = Vec::new();
    if let Some(u) = filter.utility {
        sql.push_str(" AND utility=?");
        params_vec.push(u.as_str().to_string());
    }
    if let Some(from) = filter.from {
        sql.push_str(" AND period_end>=?");
        params_vec.push(from.to_string());
    }
    if let Some(to) = filter.to {
        sql.push_str(" AND period_end<=?");
        params_vec.push(to.to_string());
    }
    sql.push_str(" ORDER BY period_end DESC, id DESC");
    if let Some(limit) = filter.limit {
        sql.push_str(&format!(" LIMIT {}", limit));
    }

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(rusqlite::params_from_iter(params_vec.iter()), raw_bill)?;
    let mut out = Vec::new();
    for row in rows {
        out.push(Bill::try_from(row?)?);
    }
    Ok(out)
}

pub fn all_bills(conn: &Connection) -> Result<Vec<Bill>, StoreError> {
    list_bills(conn, &BillFilter::default())
}

pub fn latest_bill(conn: &Connection, utility: Utility) -> Result<Option<Bill>, StoreError> {
    let filter = BillFilter {
        utility: Some(utility),
        limit: Some(1),
        ..Default::default()
    };
    Ok(list_bills(conn, &filter)?.into_iter().next())
}

pub fn bill_exists(
    conn: &Connection,
    utility: Utility,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<bool, StoreError> {
    let hit: Option<i64> = conn
        .query_row(
            "SELECT id FROM bills WHERE utility=?1 AND period_start=?2 AND period_end=?3",
            params![utility.as_str(), start.to_string(), end.to_string()],
            |r| r.get(0),
        )
        .optional()?;
    Ok(hit.is_some())
}

fn weather_from_row(r: &Row<'_>) -> rusqlite::Result<WeatherObservation> {
    let cooling: Option<f64> = r.get(17)?;
    let heating: Option<f64> = r.get(18)?;
    let max: Option<f64> = r.get(19)?;
    let demand = match (cooling, heating, max) {
        (Some(c), Some(h), Some(m)) => Some(Demand {
            cooling: c,
            heating: h,
            max: m,
        }),
        _ => None,
    };
    Ok(WeatherObservation {
        station: r.get(0)?,
        date: r.get(1)?,
        temp_high: r.get(2)?,
        temp_avg: r.get(3)?,
        temp_low: r.get(4)?,
        dewpoint_high: r.get(5)?,
        dewpoint_avg: r.get(6)?,
        dewpoint_low: r.get(7)?,
        humidity_high: r.get(8)?,
        humidity_avg: r.get(9)?,
        humidity_low: r.get(10)?,
        wind_max: r.get(11)?,
        wind_avg: r.get(12)?,
        wind_gust: r.get(13)?,
        pressure_max: r.get(14)?,
        pressure_min: r.get(15)?,
        rain_total: r.get::<_, Option<f64>>(16)?.unwrap_or(0.0),
        demand,
    })
}

/// Insert or refresh the row for `(station, date)`.
pub fn upsert_observation(conn: &Connection, o: &WeatherObservation) -> Result<(), StoreError> {
    conn.execute(
        &format!(
            "INSERT INTO weather_daily({WEATHER_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20)
             ON CONFLICT(station, date) DO UPDATE SET
                temp_high=excluded.temp_high, temp_avg=excluded.temp_avg, temp_low=excluded.temp_low,
                dewpoint_high=excluded.dewpoint_high, dewpoint_avg=excluded.dewpoint_avg,
                dewpoint_low=excluded.dewpoint_low, humidity_high=excluded.humidity_high,
                humidity_avg=excluded.humidity_avg, humidity_low=excluded.humidity_low,
                wind_max=excluded.wind_max, wind_avg=excluded.wind_avg, wind_gust=excluded.wind_gust,
                pressure_max=excluded.pressure_max, pressure_min=excluded.pressure_min,
                rain_total=excluded.rain_total, cooling_demand=excluded.cooling_demand,
                heating_demand=excluded.heating_demand, max_demand=excluded.max_demand,
                fetched_at=datetime('now')"
        ),
        params![
            o.station,
            o.date.to_string(),
            o.temp_high,
            o.temp_avg,
            o.temp_low,
            o.dewpoint_high,
            o.dewpoint_avg,
            o.dewpoint_low,
            o.humidity_high,
            o.humidity_avg,
            o.humidity_low,
            o.wind_max,
            o.wind_avg,
            o.wind_gust,
            o.pressure_max,
            o.pressure_min,
            o.rain_total,
            o.demand.map(|d| d.cooling),
            o.demand.map(|d| d.heating),
            o.demand.map(|d| d.max),
        ],
    )?;
    Ok(())
}

pub fn upsert_observations(
    conn: &mut Connection,
    obs: &[WeatherObservation],
) -> Result<usize, StoreError> {
    let tx = conn.transaction()?;
    for o in obs {
        upsert_observation(&tx, o)?;
    }
    tx.commit()?;
    Ok(obs.len())
}

/// Removes one day's observation. Returns whether a row existed.
pub fn delete_observation(
    conn: &Connection,
    station: &str,
    date: NaiveDate,
) -> Result<bool, StoreError> {
    let n = conn.execute(
        "DELETE FROM weather_daily WHERE station=?1 AND date=?2",
        params![station, date.to_string()],
    )?;
    Ok(n > 0)
}

/// Observations with `start <= date <= end`, oldest first.
pub fn weather_range(
    conn: &Connection,
    start: NaiveDate,
    end: NaiveDate,
    station: Option<&str>,
) -> Result<Vec<WeatherObservation>, StoreError> {
    let mut sql = format!("SELECT {WEATHER_COLUMNS} FROM weather_daily WHERE date BETWEEN ?1 AND ?2");
    let mut params_vec = vec![start.to_string(), end.to_string()];
    if let Some(s) = station {
        sql.push_str(" AND station=?3");
        params_vec.push(s.to_string());
    }
    sql.push_str(" ORDER BY date, station");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(rusqlite::params_from_iter(params_vec.iter()), weather_from_row)?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

pub fn all_weather(
    conn: &Connection,
    station: Option<&str>,
) -> Result<Vec<WeatherObservation>, StoreError> {
    let mut sql = format!("SELECT {WEATHER_COLUMNS} FROM weather_daily");
    let mut params_vec = Vec::new();
    if let Some(s) = station {
        sql.push_str(" WHERE station=?1");
        params_vec.push(s.to_string());
    }
    sql.push_str(" ORDER BY date, station");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(rusqlite::params_from_iter(params_vec.iter()), weather_from_row)?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

pub fn latest_weather_date(
    conn: &Connection,
    station: &str,
) -> Result<Option<NaiveDate>, StoreError> {
    let d: Option<NaiveDate> = conn.query_row(
        "SELECT MAX(date) FROM weather_daily WHERE station=?1",
        params![station],
        |r| r.get(0),
    )?;
    Ok(d)
}

/// Stations that have stored observations, most rows first.
pub fn weather_stations(conn: &Connection) -> Result<Vec<String>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT station FROM weather_daily GROUP BY station ORDER BY COUNT(*) DESC, station",
    )?;
    let rows = stmt.query_map([], |r| r.get::<_, String>(0))?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

/// Re-derive demand columns for every stored observation from its temperatures.
pub fn recompute_demand(
    conn: &mut Connection,
    settings: &DemandSettings,
) -> Result<usize, StoreError> {
    let tx = conn.transaction()?;
    let rows: Vec<(i64, Option<f64>, Option<f64>)> = {
        let mut stmt = tx.prepare("SELECT id, temp_high, temp_low FROM weather_daily")?;
        let mapped = stmt.query_map([], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))?;
        let mut v = Vec::new();
        for row in mapped {
            v.push(row?);
        }
        v
    };
    for (id, high, low) in &rows {
        let d = settings.demand(*high, *low);
        tx.execute(
            "UPDATE weather_daily SET cooling_demand=?1, heating_demand=?2, max_demand=?3 WHERE id=?4",
            params![d.cooling, d.heating, d.max, id],
        )?;
    }
    tx.commit()?;
    Ok(rows.len())
}

pub fn add_meter_reading(
    conn: &Connection,
    utility: Utility,
    reading_date: NaiveDate,
    value: f64,
) -> Result<i64, StoreError> {
    if !value.is_finite() || value < 0.0 {
        return Err(StoreError::Invalid(format!(
            "{} meter reading must be a non-negative number, got {}",
            utility, value
        )));
    }
    conn.execute(
        "INSERT INTO meter_readings(utility, reading_date, reading_value) VALUES (?1, ?2, ?3)",
        params![utility.as_str(), reading_date.to_string(), value],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Most recent readings for a utility, newest first.
pub fn meter_readings(
    conn: &Connection,
    utility: Utility,
    limit: usize,
) -> Result<Vec<MeterReading>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT id, utility, reading_date, reading_value FROM meter_readings
         WHERE utility=?1 ORDER BY reading_date DESC, id DESC LIMIT ?2",
    )?;
    let rows = stmt.query_map(params![utility.as_str(), limit as i64], |r| {
        Ok((
            r.get::<_, i64>(0)?,
            r.get::<_, String>(1)?,
            r.get::<_, NaiveDate>(2)?,
            r.get::<_, f64>(3)?,
        ))
    })?;
    let mut out = Vec::new();
    for row in rows {
        let (id, u, reading_date, value) = row?;
        out.push(MeterReading {
            id,
            utility: parse_utility_col(u)?,
            reading_date,
            value,
        });
    }
    Ok(out)
}

pub fn last_meter_reading(
    conn: &Connection,
    utility: Utility,
) -> Result<Option<MeterReading>, StoreError> {
    Ok(meter_readings(conn, utility, 1)?.into_iter().next())
}
