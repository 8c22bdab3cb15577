// Copyright (c) 2025 Soumyadip Sarkar.
// All rights reserved.
//
// This source code is licensed under the license found in the
// LICENSE file in the root directory of this source tree.

use anyhow::Result;
use rusqlite::Connection;

use crate::store;
use crate::utils::{arg, maybe_print_json, parse_date, parse_f64, parse_utility, pretty_table};

pub fn handle(conn: &Connection, m: &clap::ArgMatches) -> Result<()> {
    match m.subcommand() {
        Some(("add", sub)) => {
            let utility = parse_utility(arg(sub, "utility")?)?;
            let date = parse_date(arg(sub, "date")?)?;
            let value = parse_f64(arg(sub, "value")?)?;
            let previous = store::last_meter_reading(conn, utility)?;
            store::add_meter_reading(conn, utility, date, value)?;
            match previous {
                Some(p) if p.reading_date < date => println!(
                    "Recorded {} reading {} on {} ({:+.1} {} since {})",
                    utility,
                    value,
                    date,
                    value - p.value,
                    utility.unit(),
                    p.reading_date
                ),
                _ => println!("Recorded {} reading {} on {}", utility, value, date),
            }
        }
        Some(("list", sub)) => {
            let utility = parse_utility(arg(sub, "utility")?)?;
            let limit = sub.get_one::<usize>("limit").copied().unwrap_or(24);
            // one extra row so the oldest shown reading still gets a delta
            let readings = store::meter_readings(conn, utility, limit + 1)?;
            let shown: Vec<_> = readings.iter().take(limit).cloned().collect();
            if !maybe_print_json(sub.get_flag("json"), sub.get_flag("jsonl"), &shown)? {
                let data = shown
                    .iter()
                    .enumerate()
                    .map(|(i, r)| {
                        let delta = readings
                            .get(i + 1)
                            .map(|older| format!("{:+.1}", r.value - older.value))
                            .unwrap_or_default();
                        vec![r.reading_date.to_string(), format!("{:.1}", r.value), delta]
                    })
                    .collect();
                let header = format!("Reading ({})", utility.unit());
                println!(
                    "{}",
                    pretty_table(&["Date", header.as_str(), "Change"], data)
                );
            }
        }
        _ => {}
    }
    Ok(())
}
