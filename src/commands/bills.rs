// Copyright (c) 2025 Soumyadip Sarkar.
// All rights reserved.
//
// This source code is licensed under the license found in the
// LICENSE file in the root directory of this source tree.

use anyhow::{Context, Result};
use clap::ArgMatches;
use rusqlite::Connection;

use crate::models::{Bill, BillPatch, NewBill};
use crate::store::{self, BillFilter};
use crate::utils::{
    arg, fmt_money, fmt_opt, maybe_print_json, opt_arg, parse_date, parse_decimal, parse_f64,
    parse_utility, pretty_table,
};

pub fn handle(conn: &Connection, m: &ArgMatches) -> Result<()> {
    match m.subcommand() {
        Some(("add", sub)) => {
            let bill = new_bill_from_args(sub)?;
            let id = store::insert_bill(conn, &bill)?;
            tracing::info!(id, utility = %bill.utility, "bill added");
            println!(
                "Added {} bill #{} for {}..{} ({})",
                bill.utility,
                id,
                bill.period_start,
                bill.period_end,
                fmt_money(&bill.cost)
            );
        }
        Some(("edit", sub)) => {
            let id = *sub.get_one::<i64>("id").context("--id is required")?;
            let patch = patch_from_args(sub)?;
            if patch.is_empty() {
                println!("Nothing to change for bill #{}", id);
                return Ok(());
            }
            let bill = store::update_bill(conn, id, &patch)?;
            println!(
                "Updated {} bill #{} ({}..{}, {})",
                bill.utility,
                bill.id,
                bill.period_start,
                bill.period_end,
                fmt_money(&bill.cost)
            );
        }
        Some(("rm", sub)) => {
            let id = *sub.get_one::<i64>("id").context("--id is required")?;
            store::delete_bill(conn, id)?;
            println!("Removed bill #{}", id);
        }
        Some(("list", sub)) => {
            let bills = query_bills(conn, sub)?;
            if !maybe_print_json(sub.get_flag("json"), sub.get_flag("jsonl"), &bills)? {
                let data = bills.iter().map(bill_row).collect();
                println!(
                    "{}",
                    pretty_table(
                        &["ID", "Utility", "Start", "End", "Days", "Usage", "Cost", "Per day", "Per unit", "Note"],
                        data
                    )
                );
            }
        }
        _ => {}
    }
    Ok(())
}

/// Bills selected by the `bill list` arguments.
pub fn query_bills(conn: &Connection, sub: &ArgMatches) -> Result<Vec<Bill>> {
    let filter = BillFilter {
        utility: opt_arg(sub, "utility").map(parse_utility).transpose()?,
        from: opt_arg(sub, "from").map(parse_date).transpose()?,
        to: opt_arg(sub, "to").map(parse_date).transpose()?,
        limit: sub.get_one::<usize>("limit").copied(),
    };
    Ok(store::list_bills(conn, &filter)?)
}

fn bill_row(b: &Bill) -> Vec<String> {
    vec![
        b.id.to_string(),
        b.utility.to_string(),
        b.period_start.to_string(),
        b.period_end.to_string(),
        b.days().to_string(),
        format!("{:.1} {}", b.usage, b.utility.unit()),
        fmt_money(&b.cost),
        format!("${:.2}", b.cost_per_day()),
        fmt_opt(b.cost_per_unit().map(|v| format!("${:.4}", v))),
        b.note.clone().unwrap_or_default(),
    ]
}

fn opt_decimal(sub: &ArgMatches, name: &str) -> Result<Option<rust_decimal::Decimal>> {
    opt_arg(sub, name)
        .map(|s| parse_decimal(s).with_context(|| format!("--{}", name)))
        .transpose()
}

fn opt_number(sub: &ArgMatches, name: &str) -> Result<Option<f64>> {
    opt_arg(sub, name)
        .map(|s| parse_f64(s).with_context(|| format!("--{}", name)))
        .transpose()
}

pub fn new_bill_from_args(sub: &ArgMatches) -> Result<NewBill> {
    let utility = parse_utility(arg(sub, "utility")?)?;
    let mut bill = NewBill::new(
        utility,
        parse_date(arg(sub, "start")?)?,
        parse_date(arg(sub, "end")?)?,
        parse_f64(arg(sub, "usage")?).context("--usage")?,
        parse_decimal(arg(sub, "cost")?).context("--cost")?,
    );
    bill.meter_reading = opt_number(sub, "meter")?;
    bill.rate = opt_decimal(sub, "rate")?;
    bill.taxes = opt_decimal(sub, "taxes")?;
    bill.service_charge = opt_decimal(sub, "service-charge")?;
    bill.note = opt_arg(sub, "note").map(str::to_string);
    Ok(bill)
}

fn patch_from_args(sub: &ArgMatches) -> Result<BillPatch> {
    let cleared: Vec<&str> = sub
        .get_many::<String>("clear")
        .map(|v| v.map(String::as_str).collect())
        .unwrap_or_default();
    // a set value wins over --clear of the same field
    fn field<T>(value: Option<T>, clear: bool) -> Option<Option<T>> {
        match value {
            Some(v) => Some(Some(v)),
            None if clear => Some(None),
            None => None,
        }
    }
    Ok(BillPatch {
        period_start: opt_arg(sub, "start").map(parse_date).transpose()?,
        period_end: opt_arg(sub, "end").map(parse_date).transpose()?,
        usage: opt_number(sub, "usage")?,
        cost: opt_decimal(sub, "cost")?,
        meter_reading: field(opt_number(sub, "meter")?, cleared.contains(&"meter")),
        rate: field(opt_decimal(sub, "rate")?, cleared.contains(&"rate")),
        taxes: field(opt_decimal(sub, "taxes")?, cleared.contains(&"taxes")),
        service_charge: field(
            opt_decimal(sub, "service-charge")?,
            cleared.contains(&"service-charge"),
        ),
        note: field(opt_arg(sub, "note").map(str::to_string), cleared.contains(&"note")),
    })
}
