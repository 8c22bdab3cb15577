// Copyright (c) 2025 Soumyadip Sarkar.
// All rights reserved.
//
// This source code is licensed under the license found in the
// LICENSE file in the root directory of this source tree.

use chrono::{Duration, NaiveDate};
use rusqlite::Connection;
use rust_decimal::Decimal;
use std::cell::Cell;
use utilityhq::aggregate;
use utilityhq::commands::{reports, weather as weather_cmd};
use utilityhq::error::WeatherError;
use utilityhq::models::{NewBill, Utility, WeatherObservation};
use utilityhq::weather::WeatherSource;
use utilityhq::{cli, db, store};

fn base_conn() -> Connection {
    let mut conn = Connection::open_in_memory().unwrap();
    db::init_schema(&mut conn).unwrap();
    conn
}

fn d(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

fn seed_bills(conn: &Connection) {
    for (u, s, e, usage, cost) in [
        (Utility::Electric, "2024-01-01", "2024-01-31", 1200.0, "150.10"),
        (Utility::Gas, "2024-01-03", "2024-01-30", 90.0, "110.25"),
        (Utility::Water, "2024-01-01", "2024-01-31", 3400.0, "42.00"),
        (Utility::Electric, "2024-01-31", "2024-03-01", 1000.0, "128.40"),
        (Utility::Electric, "2023-12-01", "2023-12-31", 1100.0, "139.99"),
    ] {
        store::insert_bill(
            conn,
            &NewBill::new(u, d(s), d(e), usage, cost.parse().unwrap()),
        )
        .unwrap();
    }
}

struct FailingSource;

impl WeatherSource for FailingSource {
    fn station_id(&self) -> String {
        "KFAIL1".into()
    }

    fn fetch_range(
        &self,
        _start: NaiveDate,
        _end: NaiveDate,
    ) -> Result<Vec<WeatherObservation>, WeatherError> {
        Err(WeatherError::Http {
            status: 503,
            body: "unavailable".into(),
        })
    }
}

/// Serves one observation per requested day with a fixed high/low.
struct FixedSource {
    calls: Cell<usize>,
}

impl WeatherSource for FixedSource {
    fn station_id(&self) -> String {
        "KFIXED1".into()
    }

    fn fetch_range(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<WeatherObservation>, WeatherError> {
        self.calls.set(self.calls.get() + 1);
        let mut out = Vec::new();
        let mut day = start;
        while day <= end {
            let mut o = WeatherObservation::new("KFIXED1", day);
            o.temp_high = Some(87.0);
            o.temp_low = Some(34.5);
            out.push(o);
            day += Duration::days(1);
        }
        Ok(out)
    }
}

#[test]
fn monthly_totals_equal_sum_of_bill_costs() {
    let conn = base_conn();
    seed_bills(&conn);
    let bills = store::all_bills(&conn).unwrap();
    let months = aggregate::monthly_totals(&bills);
    let total: Decimal = months.iter().map(|m| m.total).sum();
    let expected: Decimal = bills.iter().map(|b| b.cost).sum();
    assert_eq!(total, expected);

    let jan = months.iter().find(|m| m.key() == "2024-01").unwrap();
    assert_eq!(jan.total, "302.35".parse::<Decimal>().unwrap());
    assert_eq!(jan.get(Utility::Gas).usage, 90.0);
    // months come back oldest first
    assert_eq!(months[0].key(), "2023-12");
}

#[test]
fn breakdown_percentages_sum_to_100() {
    let conn = base_conn();
    seed_bills(&conn);
    let bills = store::all_bills(&conn).unwrap();
    let shares = aggregate::cost_breakdown(&bills, 2024);
    assert_eq!(shares.len(), 3);
    let sum: f64 = shares.iter().map(|s| s.percent).sum();
    assert!((sum - 100.0).abs() < 1e-9);

    let empty = aggregate::cost_breakdown(&bills, 1999);
    assert!(empty.iter().all(|s| s.percent == 0.0 && s.cost.is_zero()));
}

#[test]
fn yearly_summary_newest_first_with_monthly_average() {
    let conn = base_conn();
    seed_bills(&conn);
    let years = aggregate::yearly_summary(&store::all_bills(&conn).unwrap());
    assert_eq!(years.len(), 2);
    assert_eq!(years[0].year, 2024);
    assert_eq!(years[0].months, 2);
    assert_eq!(years[0].total, "430.75".parse::<Decimal>().unwrap());
    assert_eq!(years[0].avg_monthly, "215.38".parse::<Decimal>().unwrap());
}

#[test]
fn failing_weather_source_does_not_break_bill_reports() {
    let mut conn = base_conn();
    seed_bills(&conn);
    assert!(!reports::refresh_before_report(&mut conn, &FailingSource, d("2024-03-05")));

    for name in [
        "monthly", "yearly", "breakdown", "demand", "correlation", "forecast", "weather", "usage",
        "costs", "rainfall", "daily-demand", "outlook", "dashboard",
    ] {
        let matches = cli::build_cli().get_matches_from([
            "utilityhq",
            "report",
            name,
            "--refresh-weather",
            "--json",
        ]);
        let (_, report_m) = matches.subcommand().unwrap();
        reports::handle_with_source(&mut conn, report_m, Some(&FailingSource)).unwrap();
    }
    assert_eq!(store::weather_stations(&conn).unwrap().len(), 0);
}

#[test]
fn demand_results_are_empty_without_weather() {
    let conn = base_conn();
    seed_bills(&conn);
    let bills = store::all_bills(&conn).unwrap();
    assert!(aggregate::demand_matrix(&bills, &[], 2.25).is_empty());
    assert!(aggregate::demand_correlation(&bills, &[]).is_none());
    assert!(aggregate::monthly_demand(&[]).years.is_empty());
}

#[test]
fn fetch_resumes_after_last_stored_day() {
    let mut conn = base_conn();
    let source = FixedSource { calls: Cell::new(0) };
    let n = weather_cmd::fetch_with(&mut conn, &source, Some(d("2024-01-01")), d("2024-01-10")).unwrap();
    assert_eq!(n, 10);

    let n = weather_cmd::fetch_with(&mut conn, &source, None, d("2024-01-12")).unwrap();
    assert_eq!(n, 2);
    let n = weather_cmd::fetch_with(&mut conn, &source, None, d("2024-01-12")).unwrap();
    assert_eq!(n, 0);
    assert_eq!(source.calls.get(), 2);

    let rows = store::all_weather(&conn, Some("KFIXED1")).unwrap();
    assert_eq!(rows.len(), 12);
    let dm = rows[0].demand.unwrap();
    assert!((dm.cooling - 0.5).abs() < 1e-9);
    assert!((dm.heating + 0.5).abs() < 1e-9);
}

#[test]
fn correlation_tracks_demand_driven_costs() {
    let mut conn = base_conn();
    let mut weather = Vec::new();
    // monthly cost rises with the number of hot days
    for (month, hot_days, cost) in [(6u32, 5u32, "100"), (7, 15, "150"), (8, 25, "200"), (9, 10, "125")] {
        for day in 1..=28u32 {
            let mut o = WeatherObservation::new("KCORR1", NaiveDate::from_ymd_opt(2024, month, day).unwrap());
            o.temp_high = Some(if day <= hot_days { 96.0 } else { 70.0 });
            o.temp_low = Some(60.0);
            weather.push(o);
        }
        store::insert_bill(
            &conn,
            &NewBill::new(
                Utility::Electric,
                NaiveDate::from_ymd_opt(2024, month, 1).unwrap(),
                NaiveDate::from_ymd_opt(2024, month, 28).unwrap(),
                500.0,
                cost.parse().unwrap(),
            ),
        )
        .unwrap();
    }
    let settings = utilityhq::demand::DemandSettings::default();
    for o in weather.iter_mut() {
        settings.apply(o);
    }
    store::upsert_observations(&mut conn, &weather).unwrap();

    let bills = store::all_bills(&conn).unwrap();
    let stored = store::all_weather(&conn, Some("KCORR1")).unwrap();
    let c = aggregate::demand_correlation(&bills, &stored).unwrap();
    assert_eq!(c.months, 4);
    assert!((c.r - 1.0).abs() < 1e-9);
    assert!((c.cost_per_demand - 5.0).abs() < 1e-9);
}
