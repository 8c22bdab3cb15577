// Copyright (c) AlphaVelocity.
// All rights reserved.
//
// This source code is licensed under the license found in the
// LICENSE file in the root directory of this source tree.

use anyhow::{Context, Result, anyhow};
use rusqlite::Connection;
use std::path::Path;

use crate::models::Utility;
use crate::store::{self, BillFilter};
use crate::utils::{arg, fmt_opt, opt_arg, parse_utility};

pub fn handle(conn: &Connection, m: &clap::ArgMatches) -> Result<()> {
    match m.subcommand() {
        Some(("bills", sub)) => {
            let fmt = arg(sub, "format")?.to_lowercase();
            let out = arg(sub, "out")?;
            let utility = opt_arg(sub, "utility").map(parse_utility).transpose()?;
            let n = export_bills(conn, &fmt, Path::new(out), utility)?;
            println!("Exported {} bills to {}", n, out);
        }
        _ => {}
    }
    Ok(())
}

/// Writes bills oldest first. The CSV layout is the one `import bills` reads.
pub fn export_bills(
    conn: &Connection,
    fmt: &str,
    out: &Path,
    utility: Option<Utility>,
) -> Result<usize> {
    let mut bills = store::list_bills(
        conn,
        &BillFilter {
            utility,
            ..Default::default()
        },
    )?;
    bills.reverse();

    match fmt {
        "csv" => {
            let mut wtr = csv::Writer::from_path(out)
                .with_context(|| format!("Create {}", out.display()))?;
            wtr.write_record([
                "utility",
                "period_start",
                "period_end",
                "usage",
                "cost",
                "meter_reading",
                "rate",
                "taxes",
                "service_charge",
                "note",
            ])?;
            for b in &bills {
                wtr.write_record([
                    b.utility.to_string(),
                    b.period_start.to_string(),
                    b.period_end.to_string(),
                    b.usage.to_string(),
                    b.cost.to_string(),
                    fmt_opt(b.meter_reading),
                    fmt_opt(b.rate),
                    fmt_opt(b.taxes),
                    fmt_opt(b.service_charge),
                    b.note.clone().unwrap_or_default(),
                ])?;
            }
            wtr.flush()?;
        }
        "json" => {
            std::fs::write(out, serde_json::to_string_pretty(&bills)?)
                .with_context(|| format!("Write {}", out.display()))?;
        }
        other => return Err(anyhow!("Unknown format: {} (use csv|json)", other)),
    }
    tracing::info!(rows = bills.len(), path = %out.display(), "bills exported");
    Ok(bills.len())
}
