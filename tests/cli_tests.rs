// Copyright (c) 2025 Soumyadip Sarkar.
// All rights reserved.
//
// This source code is licensed under the license found in the
// LICENSE file in the root directory of this source tree.

use rusqlite::Connection;
use utilityhq::commands::{bills, config, doctor};
use utilityhq::demand::DemandSettings;
use utilityhq::models::Utility;
use utilityhq::settings::{self, WeatherSettings, WeatherSourceKind};
use utilityhq::{cli, db, store};

fn base_conn() -> Connection {
    let mut conn = Connection::open_in_memory().unwrap();
    db::init_schema(&mut conn).unwrap();
    conn
}

fn run_bill(conn: &Connection, args: &[&str]) -> anyhow::Result<()> {
    let mut argv = vec!["utilityhq", "bill"];
    argv.extend_from_slice(args);
    let matches = cli::build_cli().get_matches_from(argv);
    match matches.subcommand() {
        Some(("bill", bill_m)) => bills::handle(conn, bill_m),
        _ => panic!("no bill subcommand"),
    }
}

#[test]
fn bill_add_edit_and_list_through_cli() {
    let conn = base_conn();
    run_bill(
        &conn,
        &[
            "add", "--utility", "gas", "--start", " 2025-01-03 ", "--end", "2025-02-04",
            "--usage", "87.5", "--cost", "$123.45", "--service-charge", "12.50",
        ],
    )
    .unwrap();
    run_bill(
        &conn,
        &[
            "add", "--utility", "electric", "--start", "2025-01-01", "--end", "2025-01-31",
            "--usage", "900", "--cost", "110",
        ],
    )
    .unwrap();

    let dup = run_bill(
        &conn,
        &[
            "add", "--utility", "gas", "--start", "2025-01-03", "--end", "2025-02-04",
            "--usage", "1", "--cost", "1",
        ],
    );
    assert!(dup.unwrap_err().to_string().contains("already exists"));

    let gas = store::latest_bill(&conn, Utility::Gas).unwrap().unwrap();
    assert_eq!(gas.service_charge, Some("12.50".parse().unwrap()));
    run_bill(&conn, &["edit", "--id", &gas.id.to_string(), "--note", "estimated"]).unwrap();
    assert_eq!(
        store::get_bill(&conn, gas.id).unwrap().note.as_deref(),
        Some("estimated")
    );

    run_bill(
        &conn,
        &[
            "edit", "--id", &gas.id.to_string(), "--clear", "note", "--clear", "service-charge",
            "--taxes", "4.10",
        ],
    )
    .unwrap();
    let cleared = store::get_bill(&conn, gas.id).unwrap();
    assert!(cleared.note.is_none());
    assert!(cleared.service_charge.is_none());
    assert_eq!(cleared.taxes, Some("4.10".parse().unwrap()));
    assert_eq!(cleared.cost, gas.cost);

    let matches = cli::build_cli().get_matches_from(["utilityhq", "bill", "list", "--utility", "gas", "--limit", "5"]);
    let (_, bill_m) = matches.subcommand().unwrap();
    let (_, list_m) = bill_m.subcommand().unwrap();
    let rows = bills::query_bills(&conn, list_m).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].utility, Utility::Gas);

    run_bill(&conn, &["rm", "--id", &gas.id.to_string()]).unwrap();
    assert!(store::latest_bill(&conn, Utility::Gas).unwrap().is_none());
}

#[test]
fn bad_utility_is_rejected() {
    let conn = base_conn();
    let err = run_bill(
        &conn,
        &[
            "add", "--utility", "steam", "--start", "2025-01-01", "--end", "2025-01-31",
            "--usage", "1", "--cost", "1",
        ],
    )
    .unwrap_err();
    assert!(err.to_string().contains("Unknown utility"));
}

#[test]
fn settings_are_seeded_and_validated() {
    let conn = base_conn();
    let demand = DemandSettings::load(&conn).unwrap();
    assert_eq!(demand, DemandSettings::default());
    assert_eq!(settings::home_sqft(&conn).unwrap(), Some(1730.0));

    let ws = WeatherSettings::load(&conn).unwrap();
    assert_eq!(ws.source, WeatherSourceKind::OpenMeteo);
    assert!(ws.station_id.is_none());

    assert!(settings::set_setting(&conn, "k_factor", "abc").is_err());
    assert!(settings::set_setting(&conn, "station_id", "bad id").is_err());
    assert!(settings::set_setting(&conn, "weather_source", "noaa").is_err());
    assert!(settings::set_setting(&conn, "no_such_key", "1").is_err());

    let matches = cli::build_cli().get_matches_from(["utilityhq", "config", "set", "cooling_min_temp", "80"]);
    let (_, config_m) = matches.subcommand().unwrap();
    config::handle(&conn, config_m).unwrap();
    assert_eq!(DemandSettings::load(&conn).unwrap().cooling_min, 80.0);

    // inverted thresholds are stored but refused when loaded
    settings::set_setting(&conn, "cooling_max_temp", "70").unwrap();
    assert!(DemandSettings::load(&conn).is_err());
}

#[test]
fn doctor_reports_overlaps_and_missing_wu_key() {
    let conn = base_conn();
    run_bill(
        &conn,
        &[
            "add", "--utility", "water", "--start", "2025-01-01", "--end", "2025-02-01",
            "--usage", "3000", "--cost", "40",
        ],
    )
    .unwrap();
    run_bill(
        &conn,
        &[
            "add", "--utility", "water", "--start", "2025-01-20", "--end", "2025-02-20",
            "--usage", "3000", "--cost", "40",
        ],
    )
    .unwrap();
    settings::set_setting(&conn, "weather_source", "wu").unwrap();

    let issues = doctor::find_issues(&conn).unwrap();
    let kinds: Vec<&str> = issues.iter().map(|(k, _)| k.as_str()).collect();
    assert!(kinds.contains(&"overlapping_period"));
    assert!(kinds.contains(&"station_id_missing"));
}

#[test]
fn doctor_reports_every_bill_inside_a_long_period() {
    let conn = base_conn();
    for (start, end) in [
        ("2024-01-01", "2024-12-31"),
        ("2024-02-01", "2024-02-28"),
        ("2024-03-01", "2024-03-31"),
        ("2024-12-01", "2025-01-01"),
    ] {
        run_bill(
            &conn,
            &[
                "add", "--utility", "gas", "--start", start, "--end", end, "--usage", "50",
                "--cost", "60",
            ],
        )
        .unwrap();
    }
    let issues = doctor::find_issues(&conn).unwrap();
    let overlaps: Vec<&String> = issues
        .iter()
        .filter(|(k, _)| k == "overlapping_period")
        .map(|(_, detail)| detail)
        .collect();
    assert_eq!(overlaps.len(), 3);
    assert!(overlaps.iter().any(|d| d.contains("2024-03-01..2024-03-31")));
    // the long bill covers the stretch between March and December
    assert!(!issues.iter().any(|(k, _)| k == "period_gap"));
}

#[test]
fn open_at_creates_parent_dirs_and_schema() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("utilities.sqlite");
    let conn = db::open_at(&path).unwrap();
    assert!(path.exists());
    let n: i64 = conn
        .query_row("SELECT COUNT(*) FROM settings", [], |r| r.get(0))
        .unwrap();
    assert!(n >= 13);
    drop(conn);
    // reopening keeps user edits
    let conn = db::open_at(&path).unwrap();
    settings::set_setting(&conn, "home_sqft", "2000").unwrap();
    drop(conn);
    let conn = db::open_at(&path).unwrap();
    assert_eq!(settings::home_sqft(&conn).unwrap(), Some(2000.0));
}
