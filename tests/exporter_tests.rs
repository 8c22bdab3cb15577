// Copyright (c) 2025 Soumyadip Sarkar.
// All rights reserved.
//
// This source code is licensed under the license found in the
// LICENSE file in the root directory of this source tree.

use chrono::NaiveDate;
use rusqlite::Connection;
use tempfile::tempdir;
use utilityhq::commands::{exporter, importer};
use utilityhq::models::{NewBill, Utility};
use utilityhq::{cli, db, store};

fn base_conn() -> Connection {
    let mut conn = Connection::open_in_memory().unwrap();
    db::init_schema(&mut conn).unwrap();
    conn
}

fn seed(conn: &Connection) {
    let d = |s: &str| NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap();
    let mut a = NewBill::new(
        Utility::Electric,
        d("2025-01-02"),
        d("2025-02-01"),
        1210.0,
        "151.20".parse().unwrap(),
    );
    a.note = Some("Weekly, run".into());
    a.taxes = Some("9.07".parse().unwrap());
    store::insert_bill(conn, &a).unwrap();
    let b = NewBill::new(
        Utility::Gas,
        d("2025-01-05"),
        d("2025-02-04"),
        88.0,
        "120.00".parse().unwrap(),
    );
    store::insert_bill(conn, &b).unwrap();
}

#[test]
fn export_bills_writes_pretty_json() {
    let conn = base_conn();
    seed(&conn);
    let dir = tempdir().unwrap();
    let out_path = dir.path().join("bills.json");
    let out_str = out_path.to_string_lossy().to_string();

    let matches = cli::build_cli().get_matches_from([
        "utilityhq",
        "export",
        "bills",
        "--format",
        "json",
        "--out",
        &out_str,
    ]);
    if let Some(("export", export_m)) = matches.subcommand() {
        exporter::handle(&conn, export_m).unwrap();
    } else {
        panic!("no export subcommand");
    }

    let body = std::fs::read_to_string(&out_path).unwrap();
    assert!(body.contains("\n  {"));
    let v: serde_json::Value = serde_json::from_str(&body).unwrap();
    let arr = v.as_array().unwrap();
    assert_eq!(arr.len(), 2);
    assert_eq!(arr[0]["utility"], "electric");
    assert_eq!(arr[0]["note"], "Weekly, run");
}

#[test]
fn csv_export_reimports_into_fresh_database() {
    let conn = base_conn();
    seed(&conn);
    let dir = tempdir().unwrap();
    let out = dir.path().join("bills.csv");
    let n = exporter::export_bills(&conn, "csv", &out, None).unwrap();
    assert_eq!(n, 2);

    // each row keeps its own utility
    let mut fresh = base_conn();
    let s = importer::import_bills(&mut fresh, None, &out).unwrap();
    assert_eq!(s.inserted, 2);
    for u in [Utility::Electric, Utility::Gas] {
        let original = store::latest_bill(&conn, u).unwrap().unwrap();
        let copy = store::latest_bill(&fresh, u).unwrap().unwrap();
        assert_eq!(copy.period_start, original.period_start);
        assert_eq!(copy.period_end, original.period_end);
        assert_eq!(copy.cost, original.cost);
        assert_eq!(copy.taxes, original.taxes);
        assert_eq!(copy.note, original.note);
    }
    assert!(store::latest_bill(&fresh, Utility::Water).unwrap().is_none());
}

#[test]
fn utility_flag_filters_a_combined_export() {
    let conn = base_conn();
    seed(&conn);
    let dir = tempdir().unwrap();
    let out = dir.path().join("bills.csv");
    exporter::export_bills(&conn, "csv", &out, None).unwrap();

    let mut fresh = base_conn();
    let s = importer::import_bills(&mut fresh, Some(Utility::Electric), &out).unwrap();
    assert_eq!(s.inserted, 1);
    assert_eq!(s.skipped, 1);
    assert!(store::latest_bill(&fresh, Utility::Gas).unwrap().is_none());
    let elec = store::latest_bill(&fresh, Utility::Electric).unwrap().unwrap();
    assert_eq!(elec.usage, 1210.0);
}

#[test]
fn unknown_format_is_an_error() {
    let conn = base_conn();
    let dir = tempdir().unwrap();
    assert!(exporter::export_bills(&conn, "xml", &dir.path().join("x"), None).is_err());
}
