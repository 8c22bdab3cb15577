// Copyright (c) 2025 Soumyadip Sarkar.
// All rights reserved.
//
// This source code is licensed under the license found in the
// LICENSE file in the root directory of this source tree.

use chrono::NaiveDate;
use rusqlite::Connection;
use std::io::Write;
use tempfile::NamedTempFile;
use utilityhq::commands::importer::{self, ImportSummary};
use utilityhq::demand::DemandSettings;
use utilityhq::models::Utility;
use utilityhq::{cli, db, settings, store};

fn base_conn() -> Connection {
    let mut conn = Connection::open_in_memory().unwrap();
    db::init_schema(&mut conn).unwrap();
    conn
}

fn csv_file(body: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "{}", body).unwrap();
    file.flush().unwrap();
    file
}

fn bill_count(conn: &Connection) -> i64 {
    conn.query_row("SELECT COUNT(*) FROM bills", [], |r| r.get(0))
        .unwrap()
}

const ELECTRIC: &str = "period_start,period_end,usage,cost,meter_reading,note\n\
2024-01-02,2024-02-01,1210,151.20,40210,\n\
2024-02-01,2024-03-02,1105,139.75,41315,\n\
,,,,,\n\
2024-03-02,2024-04-01,-,-,,estimated\n\
2024-04-01,2024-05-01,880,\"$1,102.40\",42195,\"spring, mild\"\n";

#[test]
fn import_counts_rows_and_is_idempotent() {
    let mut conn = base_conn();
    let file = csv_file(ELECTRIC);

    let first = importer::import_bills(&mut conn, Some(Utility::Electric), file.path()).unwrap();
    assert_eq!(
        first,
        ImportSummary {
            inserted: 3,
            duplicates: 0,
            skipped: 2
        }
    );
    assert_eq!(bill_count(&conn), 3);

    let again = importer::import_bills(&mut conn, Some(Utility::Electric), file.path()).unwrap();
    assert_eq!(again.inserted, 0);
    assert_eq!(again.duplicates, 3);
    assert_eq!(bill_count(&conn), 3);
}

#[test]
fn import_keeps_money_and_optional_columns() {
    let mut conn = base_conn();
    let file = csv_file(ELECTRIC);
    importer::import_bills(&mut conn, Some(Utility::Electric), file.path()).unwrap();
    let latest = store::latest_bill(&conn, Utility::Electric).unwrap().unwrap();
    assert_eq!(latest.cost, "1102.40".parse::<rust_decimal::Decimal>().unwrap());
    assert_eq!(latest.meter_reading, Some(42195.0));
    assert_eq!(latest.note.as_deref(), Some("spring, mild"));
}

#[test]
fn malformed_value_rolls_back_whole_import() {
    let mut conn = base_conn();
    let file = csv_file(
        "period_start,period_end,usage,cost\n\
2024-01-02,2024-02-01,1210,151.20\n\
2024-02-01,2024-03-02,lots,139.75\n",
    );
    let err = importer::import_bills(&mut conn, Some(Utility::Electric), file.path()).unwrap_err();
    assert!(format!("{:#}", err).contains("line 3"));
    assert_eq!(bill_count(&conn), 0);
}

#[test]
fn bill_date_and_days_layout_derives_period() {
    let mut conn = base_conn();
    let file = csv_file(
        "bill_date,meter_reading,usage,days,total_cost\n\
2024-02-10,812,64.5,31,98.10\n\
2024-03-11,880,,29,87.00\n",
    );
    let s = importer::import_bills(&mut conn, Some(Utility::Gas), file.path()).unwrap();
    assert_eq!(s.inserted, 1);
    assert_eq!(s.skipped, 1);
    let b = store::latest_bill(&conn, Utility::Gas).unwrap().unwrap();
    assert_eq!(b.period_end, NaiveDate::from_ymd_opt(2024, 2, 10).unwrap());
    assert_eq!(b.period_start, NaiveDate::from_ymd_opt(2024, 1, 10).unwrap());
}

#[test]
fn missing_required_columns_is_an_error() {
    let mut conn = base_conn();
    let file = csv_file("date,amount\n2024-01-01,5\n");
    assert!(importer::import_bills(&mut conn, Some(Utility::Water), file.path()).is_err());
}

#[test]
fn importer_trims_cli_arguments() {
    let mut conn = base_conn();
    let file = csv_file(ELECTRIC);
    let path = file.path().to_str().unwrap().to_string();
    let padded = format!("  {}  ", path);

    let matches = cli::build_cli().get_matches_from([
        "utilityhq",
        "import",
        "bills",
        "--utility",
        " electric ",
        "--path",
        &padded,
    ]);
    if let Some(("import", import_m)) = matches.subcommand() {
        importer::handle(&mut conn, import_m).unwrap();
    } else {
        panic!("no import subcommand");
    }
    assert_eq!(bill_count(&conn), 3);
}

#[test]
fn weather_import_derives_demand_and_skips_undated_rows() {
    let mut conn = base_conn();
    let file = csv_file(
        "date,temp_high,temp_avg,temp_low,rain_total\n\
2024-01-15,40,30,15,0.25\n\
,50,45,40,0\n\
2024-07-15,87,78,70,-\n",
    );
    let s = importer::import_weather(&mut conn, "KNCHOME1", file.path()).unwrap();
    assert_eq!(s.inserted, 2);
    assert_eq!(s.skipped, 1);

    let rows = store::all_weather(&conn, Some("KNCHOME1")).unwrap();
    assert_eq!(rows.len(), 2);
    let winter = rows[0].demand.unwrap();
    assert_eq!(winter.heating, -1.0);
    assert_eq!(winter.max, 1.0);
    assert_eq!(rows[1].rain_total, 0.0);
    assert!((rows[1].demand.unwrap().cooling - 0.5).abs() < 1e-9);
}

#[test]
fn sheet_without_utility_needs_the_flag() {
    let mut conn = base_conn();
    let file = csv_file(ELECTRIC);
    let err = importer::import_bills(&mut conn, None, file.path()).unwrap_err();
    assert!(err.to_string().contains("utility"));
    assert_eq!(bill_count(&conn), 0);
}

#[test]
fn config_sheet_applies_known_settings() {
    let mut conn = base_conn();
    let file = csv_file(
        "key,value\n\
station_id,KNCHEND12\n\
Cooling_Min_Temp,80\n\
chart_theme,dark\n\
,\n",
    );
    let s = importer::import_config(&mut conn, file.path()).unwrap();
    assert_eq!(s.inserted, 2);
    assert_eq!(s.skipped, 2);
    assert_eq!(
        settings::get_setting(&conn, "station_id").unwrap().as_deref(),
        Some("KNCHEND12")
    );
    assert_eq!(DemandSettings::load(&conn).unwrap().cooling_min, 80.0);

    // a bad value rolls the whole sheet back
    let bad = csv_file("key,value\nhome_sqft,2100\nk_factor,abc\n");
    assert!(importer::import_config(&mut conn, bad.path()).is_err());
    assert_eq!(settings::home_sqft(&conn).unwrap(), Some(1730.0));
}

#[test]
fn workbook_directory_imports_every_sheet() {
    let mut conn = base_conn();
    let dir = tempfile::tempdir().unwrap();
    let write = |name: &str, body: &str| std::fs::write(dir.path().join(name), body).unwrap();
    write("Config.csv", "key,value\ncooling_min_temp,80\n");
    write("ElecBill.csv", ELECTRIC);
    write(
        "gasbill.csv",
        "bill_date,days,usage,total_cost\n2024-02-10,31,88,120.00\n",
    );
    write("Weather.csv", "date,temp_high,temp_low\n2024-07-15,89,70\n");
    write("notes.txt", "ignored");

    let report = importer::import_all(&mut conn, dir.path(), Some("KNCHOME1")).unwrap();
    let sheets: Vec<&str> = report.iter().map(|(s, _)| s.as_str()).collect();
    assert_eq!(sheets, vec!["Config", "ElecBill", "GasBill", "Weather"]);
    assert_eq!(bill_count(&conn), 4);
    assert!(store::latest_bill(&conn, Utility::Water).unwrap().is_none());

    // demand uses the migrated cooling threshold: (89 - 80) / (96 - 80)
    let rows = store::all_weather(&conn, Some("KNCHOME1")).unwrap();
    assert!((rows[0].demand.unwrap().cooling - 9.0 / 16.0).abs() < 1e-9);

    // running it again adds no bills
    importer::import_all(&mut conn, dir.path(), Some("KNCHOME1")).unwrap();
    assert_eq!(bill_count(&conn), 4);
}
