// Copyright (c) AlphaVelocity.
// All rights reserved.
//
// This source code is licensed under the license found in the
// LICENSE file in the root directory of this source tree.

use anyhow::Result;
use rusqlite::Connection;
use std::collections::BTreeSet;

use crate::aggregate::overlapping_periods;
use crate::commands::weather::report_weather;
use crate::models::Utility;
use crate::settings::{WeatherSettings, WeatherSourceKind};
use crate::store;
use crate::utils::pretty_table;

/// Gap between consecutive bills of one utility worth reporting.
const MAX_GAP_DAYS: i64 = 7;

pub fn handle(conn: &Connection) -> Result<()> {
    let rows: Vec<Vec<String>> = find_issues(conn)?
        .into_iter()
        .map(|(issue, detail)| vec![issue, detail])
        .collect();
    if rows.is_empty() {
        println!("✅ doctor: no issues found");
    } else {
        println!("{}", pretty_table(&["Issue", "Detail"], rows));
    }
    Ok(())
}

pub fn find_issues(conn: &Connection) -> Result<Vec<(String, String)>> {
    let mut issues = Vec::new();
    let bills = store::all_bills(conn)?;

    // 1) Overlapping periods for one utility
    for (a, b) in overlapping_periods(&bills) {
        issues.push((
            "overlapping_period".to_string(),
            format!(
                "{} #{} {}..{} and #{} {}..{}",
                a.utility, a.id, a.period_start, a.period_end, b.id, b.period_start, b.period_end
            ),
        ));
    }

    // 2) Gaps between consecutive bills
    for u in Utility::ALL {
        let mut mine: Vec<_> = bills.iter().filter(|b| b.utility == u).collect();
        mine.sort_by_key(|b| b.period_start);
        let mut covered: Option<chrono::NaiveDate> = None;
        for b in mine {
            if let Some(end) = covered {
                let gap = (b.period_start - end).num_days();
                if gap > MAX_GAP_DAYS {
                    issues.push((
                        "period_gap".to_string(),
                        format!("{} {} days between {} and {}", u, gap, end, b.period_start),
                    ));
                }
            }
            covered = Some(covered.map_or(b.period_end, |end| end.max(b.period_end)));
        }
    }

    // 3) Bill periods without full weather coverage
    let weather = report_weather(conn)?;
    if !weather.is_empty() {
        let dates: BTreeSet<_> = weather.iter().map(|o| o.date).collect();
        for b in &bills {
            let missing = b
                .period_start
                .iter_days()
                .take_while(|d| *d <= b.period_end)
                .filter(|d| !dates.contains(d))
                .count();
            if missing > 0 {
                issues.push((
                    "missing_weather".to_string(),
                    format!(
                        "{} #{} {}..{}: {} days",
                        b.utility, b.id, b.period_start, b.period_end, missing
                    ),
                ));
            }
        }
    }

    // 4) Weather source configuration
    let ws = WeatherSettings::load(conn)?;
    if ws.source == WeatherSourceKind::WeatherUnderground {
        if ws.api_key.is_none() {
            issues.push((
                "wu_api_key_missing".to_string(),
                "set wu_api_key or UTILITYHQ_WU_API_KEY".to_string(),
            ));
        }
        if ws.station_id.is_none() {
            issues.push(("station_id_missing".to_string(), "set station_id".to_string()));
        }
    }

    Ok(issues)
}
