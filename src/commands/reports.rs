// Copyright (c) AlphaVelocity.
// All rights reserved.
//
// This source code is licensed under the license found in the
// LICENSE file in the root directory of this source tree.

use anyhow::Result;
use chrono::{Datelike, Local, NaiveDate};
use clap::ArgMatches;
use rusqlite::Connection;
use rust_decimal::Decimal;
use serde::Serialize;

use crate::aggregate::{self, CostStat, DemandOutlook, DemandYear, MonthOutlook, UsageStats};
use crate::commands::weather::{fetch_with, report_weather};
use crate::demand::DemandSettings;
use crate::models::{Bill, Utility};
use crate::settings::{self, WeatherSettings};
use crate::store;
use crate::utils::{fmt_money, fmt_opt, maybe_print_json, opt_arg, parse_date, parse_month, pretty_table};
use crate::weather::{self as client, WeatherSource};

pub fn handle(conn: &mut Connection, m: &ArgMatches) -> Result<()> {
    let wants_refresh = m
        .subcommand()
        .map(|(_, sub)| sub.get_flag("refresh-weather"))
        .unwrap_or(false);
    let source = if wants_refresh {
        match WeatherSettings::load(conn)
            .and_then(|s| client::source_from_settings(&s).map_err(anyhow::Error::from))
        {
            Ok(s) => Some(s),
            Err(e) => {
                tracing::warn!(error = %format!("{:#}", e), "weather source unavailable; reporting from stored data");
                None
            }
        }
    } else {
        None
    };
    handle_with_source(conn, m, source.as_deref())
}

/// Runs a report, refreshing weather from `source` first when asked. A failed
/// refresh is logged and the report continues from stored rows.
pub fn handle_with_source(
    conn: &mut Connection,
    m: &ArgMatches,
    source: Option<&dyn WeatherSource>,
) -> Result<()> {
    let Some((name, sub)) = m.subcommand() else {
        return Ok(());
    };
    let today = Local::now().date_naive();
    if sub.get_flag("refresh-weather") {
        if let Some(src) = source {
            refresh_before_report(conn, src, today);
        }
    }
    match name {
        "monthly" => monthly(conn, sub)?,
        "yearly" => yearly(conn, sub)?,
        "breakdown" => breakdown(conn, sub, today)?,
        "demand" => demand(conn, sub, today)?,
        "correlation" => correlation(conn, sub)?,
        "forecast" => forecast(conn, sub, today)?,
        "weather" => weather_summary(conn, sub, today)?,
        "usage" => usage(conn, sub)?,
        "costs" => costs(conn, sub, today)?,
        "rainfall" => rainfall(conn, sub)?,
        "daily-demand" => daily_demand(conn, sub)?,
        "outlook" => outlook(conn, sub, today)?,
        "dashboard" => dashboard(conn, sub, today)?,
        _ => {}
    }
    Ok(())
}

/// Returns whether the refresh succeeded.
pub fn refresh_before_report(conn: &mut Connection, source: &dyn WeatherSource, today: NaiveDate) -> bool {
    match fetch_with(conn, source, None, today) {
        Ok(n) => {
            tracing::info!(rows = n, "weather refreshed");
            true
        }
        Err(e) => {
            tracing::warn!(error = %format!("{:#}", e), "weather refresh failed; reporting from stored data");
            false
        }
    }
}

fn flags(sub: &ArgMatches) -> (bool, bool) {
    (sub.get_flag("json"), sub.get_flag("jsonl"))
}

fn pct(f: f64) -> String {
    format!("{:+.1}%", f * 100.0)
}

fn f2(v: f64) -> String {
    format!("{:.2}", v)
}

fn bills(conn: &Connection) -> Result<Vec<Bill>> {
    Ok(store::all_bills(conn)?)
}

fn monthly(conn: &Connection, sub: &ArgMatches) -> Result<()> {
    let (json_flag, jsonl_flag) = flags(sub);
    let months = sub.get_one::<usize>("months").copied().unwrap_or(12);
    let mut rows = aggregate::monthly_totals(&bills(conn)?);
    rows.reverse();
    rows.truncate(months);
    if maybe_print_json(json_flag, jsonl_flag, &rows)? {
        return Ok(());
    }
    let data = rows
        .iter()
        .map(|m| {
            vec![
                m.key(),
                fmt_money(&m.electric.cost),
                format!("{:.0}", m.electric.usage),
                fmt_money(&m.gas.cost),
                format!("{:.1}", m.gas.usage),
                fmt_money(&m.water.cost),
                format!("{:.0}", m.water.usage),
                fmt_money(&m.total),
            ]
        })
        .collect();
    println!(
        "{}",
        pretty_table(
            &["Month", "Electric", "kWh", "Gas", "therms", "Water", "gal", "Total"],
            data
        )
    );
    Ok(())
}

fn yearly(conn: &Connection, sub: &ArgMatches) -> Result<()> {
    let (json_flag, jsonl_flag) = flags(sub);
    let rows = aggregate::yearly_summary(&bills(conn)?);
    if maybe_print_json(json_flag, jsonl_flag, &rows)? {
        return Ok(());
    }
    let data = rows
        .iter()
        .map(|y| {
            vec![
                y.year.to_string(),
                fmt_money(&y.electric.cost),
                fmt_money(&y.gas.cost),
                fmt_money(&y.water.cost),
                fmt_money(&y.total),
                y.months.to_string(),
                fmt_money(&y.avg_monthly),
            ]
        })
        .collect();
    println!(
        "{}",
        pretty_table(
            &["Year", "Electric", "Gas", "Water", "Total", "Months", "Avg/month"],
            data
        )
    );
    Ok(())
}

fn breakdown(conn: &Connection, sub: &ArgMatches, today: NaiveDate) -> Result<()> {
    let (json_flag, jsonl_flag) = flags(sub);
    let year = sub.get_one::<i32>("year").copied().unwrap_or(today.year());
    let shares = aggregate::cost_breakdown(&bills(conn)?, year);
    if maybe_print_json(json_flag, jsonl_flag, &shares)? {
        return Ok(());
    }
    let total: Decimal = shares.iter().map(|s| s.cost).sum();
    let mut data: Vec<Vec<String>> = shares
        .iter()
        .map(|s| {
            vec![
                s.utility.to_string(),
                fmt_money(&s.cost),
                format!("{:.1}%", s.percent),
            ]
        })
        .collect();
    data.push(vec!["total".into(), fmt_money(&total), String::new()]);
    println!("{} spend by utility", year);
    println!("{}", pretty_table(&["Utility", "Cost", "Share"], data));
    Ok(())
}

#[derive(Serialize)]
struct DemandReport {
    matrix: Vec<DemandYear>,
    outlook: Option<DemandOutlook>,
}

fn demand(conn: &Connection, sub: &ArgMatches, today: NaiveDate) -> Result<()> {
    let (json_flag, jsonl_flag) = flags(sub);
    let as_of = opt_arg(sub, "as-of").map(parse_date).transpose()?.unwrap_or(today);
    let settings = DemandSettings::load(conn)?;
    let bills = bills(conn)?;
    let weather = report_weather(conn)?;
    let matrix = aggregate::demand_matrix(&bills, &weather, settings.k_factor);
    let outlook = if weather.is_empty() {
        None
    } else {
        Some(aggregate::demand_outlook(&bills, &weather, settings.k_factor, as_of))
    };
    let report = DemandReport { matrix, outlook };
    if maybe_print_json(json_flag, jsonl_flag, &report)? {
        return Ok(());
    }
    if report.matrix.is_empty() {
        println!("No weather stored yet; run `utilityhq weather fetch` first");
        return Ok(());
    }
    let data = report
        .matrix
        .iter()
        .map(|r| {
            vec![
                r.year.to_string(),
                r.num_days.to_string(),
                r.cooling_days.to_string(),
                r.heating_days.to_string(),
                r.econ_days.to_string(),
                format!("{:.3}", r.avg_cooling),
                format!("{:.3}", r.avg_heating),
                format!("{:.3}", r.total_demand),
                format!("{:.1}", r.demand_index_total),
                format!("${:.2}", r.total_cost),
                format!("${:.2}", r.cost_per_day),
                f2(r.rainfall),
                pct(r.pct_avg_cost),
                pct(r.pct_avg_demand),
                pct(r.expected_cpd_pct),
            ]
        })
        .collect();
    println!(
        "{}",
        pretty_table(
            &[
                "Year", "Days", "Clg", "Htg", "Econ", "Avg clg", "Avg htg", "Demand", "Index",
                "Cost", "CPD", "Rain", "CPD vs avg", "Demand vs avg", "Expected CPD",
            ],
            data
        )
    );
    if let Some(o) = &report.outlook {
        println!(
            "Outlook {}: blended demand {:.3} vs average {:.3} ({}), expected CPD {}, actual CPD {}",
            as_of,
            o.blended.blended_total,
            o.blended.avg_total,
            pct(o.demand_pct),
            pct(o.expected_cpd_pct),
            pct(o.actual_cpd_pct)
        );
    }
    Ok(())
}

fn correlation(conn: &Connection, sub: &ArgMatches) -> Result<()> {
    let (json_flag, jsonl_flag) = flags(sub);
    let result = aggregate::demand_correlation(&bills(conn)?, &report_weather(conn)?);
    if maybe_print_json(json_flag, jsonl_flag, &result)? {
        return Ok(());
    }
    match result {
        Some(c) => println!(
            "{}",
            pretty_table(
                &["Months", "Pearson r", "Cost per demand unit"],
                vec![vec![c.months.to_string(), format!("{:.3}", c.r), format!("${:.2}", c.cost_per_demand)]]
            )
        ),
        None => println!("Not enough months with both bills and weather to correlate"),
    }
    Ok(())
}

fn forecast(conn: &Connection, sub: &ArgMatches, today: NaiveDate) -> Result<()> {
    let (json_flag, jsonl_flag) = flags(sub);
    let (year, month) = match opt_arg(sub, "month") {
        Some(s) => parse_month(s)?,
        None if today.month() == 12 => (today.year() + 1, 1),
        None => (today.year(), today.month() + 1),
    };
    let settings = DemandSettings::load(conn)?;
    let f = aggregate::forecast_month(
        &bills(conn)?,
        &report_weather(conn)?,
        settings.k_factor,
        year,
        month,
    );
    if maybe_print_json(json_flag, jsonl_flag, &f)? {
        return Ok(());
    }
    println!(
        "{}",
        pretty_table(
            &["Month", "Historical avg", "Avg daily demand", "Cost/demand", "Forecast", "Actual"],
            vec![vec![
                format!("{:04}-{:02}", f.year, f.month),
                format!("${:.2}", f.historical_avg),
                format!("{:.3}", f.avg_daily_demand),
                fmt_opt(f.cost_per_demand.map(|v| format!("${:.2}", v))),
                format!("${:.2}", f.forecast),
                fmt_opt(f.actual.as_ref().map(fmt_money)),
            ]]
        )
    );
    Ok(())
}

fn weather_summary(conn: &Connection, sub: &ArgMatches, today: NaiveDate) -> Result<()> {
    let (json_flag, jsonl_flag) = flags(sub);
    let year = sub.get_one::<i32>("year").copied().unwrap_or(today.year());
    let stats = aggregate::weather_stats(&report_weather(conn)?, year);
    if maybe_print_json(json_flag, jsonl_flag, &stats)? {
        return Ok(());
    }
    let f1 = |v: Option<f64>| fmt_opt(v.map(|x| format!("{:.1}", x)));
    let data = [
        ("Max temp (°F)", stats.max_temp),
        ("Min temp (°F)", stats.min_temp),
        ("Rainfall (in)", stats.rainfall),
    ]
    .into_iter()
    .map(|(label, s)| {
        vec![
            label.to_string(),
            f1(s.current),
            f1(s.last_year),
            f1(s.all_time),
            f1(s.average),
        ]
    })
    .collect();
    let this_year = year.to_string();
    let last_year = (year - 1).to_string();
    println!(
        "{}",
        pretty_table(
            &["", this_year.as_str(), last_year.as_str(), "All time", "Average"],
            data
        )
    );
    Ok(())
}

fn usage(conn: &Connection, sub: &ArgMatches) -> Result<()> {
    let (json_flag, jsonl_flag) = flags(sub);
    let bills = bills(conn)?;
    let stats: Vec<UsageStats> = Utility::ALL
        .iter()
        .map(|u| aggregate::usage_stats(&bills, *u))
        .collect();
    if maybe_print_json(json_flag, jsonl_flag, &stats)? {
        return Ok(());
    }
    let f1 = |v: Option<f64>| fmt_opt(v.map(|x| format!("{:.1}", x)));
    let money = |v: Option<f64>| fmt_opt(v.map(|x| format!("${:.2}", x)));
    let data = stats
        .iter()
        .map(|s| {
            vec![
                s.utility.to_string(),
                format!("{}/day", s.unit),
                s.bills.to_string(),
                f1(s.latest_per_day),
                f1(s.average_per_day),
                f1(s.min_per_day),
                f1(s.max_per_day),
                money(s.latest_cost_per_day),
                money(s.average_cost_per_day),
            ]
        })
        .collect();
    println!(
        "{}",
        pretty_table(
            &["Utility", "Unit", "Bills", "Latest", "Average", "Min", "Max", "Latest $/day", "Avg $/day"],
            data
        )
    );
    Ok(())
}

fn cost_stat_rows(stats: &[CostStat]) -> Vec<Vec<String>> {
    stats
        .iter()
        .map(|s| {
            let v = |x: f64| match s.unit {
                "$/sqft" => format!("${:.3}", x),
                _ => format!("${:.2}", x),
            };
            vec![
                s.kind.label().to_string(),
                v(s.current),
                v(s.last_year),
                v(s.average),
                v(s.min),
                v(s.max),
            ]
        })
        .collect()
}

fn costs(conn: &Connection, sub: &ArgMatches, today: NaiveDate) -> Result<()> {
    let (json_flag, jsonl_flag) = flags(sub);
    let year = sub.get_one::<i32>("year").copied().unwrap_or(today.year());
    let stats = aggregate::cost_stats(&bills(conn)?, year, settings::home_sqft(conn)?);
    if maybe_print_json(json_flag, jsonl_flag, &stats)? {
        return Ok(());
    }
    if stats.is_empty() {
        println!("No bills recorded yet");
        return Ok(());
    }
    let this_year = year.to_string();
    let last_year = (year - 1).to_string();
    println!(
        "{}",
        pretty_table(
            &["", this_year.as_str(), last_year.as_str(), "Average", "Min", "Max"],
            cost_stat_rows(&stats)
        )
    );
    Ok(())
}

const MONTHS: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

fn rainfall(conn: &Connection, sub: &ArgMatches) -> Result<()> {
    let (json_flag, jsonl_flag) = flags(sub);
    let r = aggregate::monthly_rainfall(&report_weather(conn)?);
    if maybe_print_json(json_flag, jsonl_flag, &r)? {
        return Ok(());
    }
    if r.years.is_empty() {
        println!("No weather stored yet; run `utilityhq weather fetch` first");
        return Ok(());
    }
    let mut headers = vec!["Month".to_string()];
    headers.extend(r.years.iter().map(|y| y.to_string()));
    headers.push("Average".into());
    let data = (0..12)
        .map(|i| {
            let mut row = vec![MONTHS[i].to_string()];
            row.extend(r.data.values().map(|months| fmt_opt(months[i].map(f2))));
            row.push(f2(r.averages[i]));
            row
        })
        .collect();
    let headers: Vec<&str> = headers.iter().map(String::as_str).collect();
    println!("{}", pretty_table(&headers, data));
    Ok(())
}

fn daily_demand(conn: &Connection, sub: &ArgMatches) -> Result<()> {
    let (json_flag, jsonl_flag) = flags(sub);
    let dd = aggregate::daily_demand(&report_weather(conn)?);
    if maybe_print_json(json_flag, jsonl_flag, &dd)? {
        return Ok(());
    }
    if dd.years.is_empty() {
        println!("No weather stored yet; run `utilityhq weather fetch` first");
        return Ok(());
    }
    let mut headers = vec!["Day".to_string()];
    headers.extend(dd.years.iter().map(|y| y.to_string()));
    headers.push("Average".into());
    let f3 = |v: f64| format!("{:.3}", v);
    let data = (0..aggregate::DAYS_OF_YEAR)
        .map(|i| {
            // day labels follow a leap-year calendar so index 59 is Feb 29
            let label = NaiveDate::from_yo_opt(2024, i as u32 + 1)
                .map(|d| d.format("%b %d").to_string())
                .unwrap_or_default();
            let mut row = vec![label];
            row.extend(dd.data.values().map(|days| fmt_opt(days[i].map(f3))));
            row.push(f3(dd.averages[i]));
            row
        })
        .collect();
    let headers: Vec<&str> = headers.iter().map(String::as_str).collect();
    println!("{}", pretty_table(&headers, data));
    Ok(())
}

fn outlook_rows(months: &[MonthOutlook]) -> Vec<Vec<String>> {
    months
        .iter()
        .map(|m| {
            vec![
                m.label.clone(),
                format!("${:.2}", m.value),
                if m.is_actual { "actual" } else { "forecast" }.to_string(),
                format!("${:.2}", m.last_yr),
                format!("${:.2}", m.avg),
                format!("${:.2}", m.min),
                format!("${:.2}", m.max),
            ]
        })
        .collect()
}

const OUTLOOK_HEADERS: [&str; 7] = ["Month", "Value", "Kind", "Last year", "Average", "Min", "Max"];

fn outlook(conn: &Connection, sub: &ArgMatches, today: NaiveDate) -> Result<()> {
    let (json_flag, jsonl_flag) = flags(sub);
    let k = DemandSettings::load(conn)?.k_factor;
    let months = aggregate::month_outlook(&bills(conn)?, &report_weather(conn)?, k, today);
    if maybe_print_json(json_flag, jsonl_flag, &months)? {
        return Ok(());
    }
    println!("{}", pretty_table(&OUTLOOK_HEADERS, outlook_rows(&months)));
    Ok(())
}

#[derive(Serialize)]
struct Dashboard {
    as_of: NaiveDate,
    latest: Vec<Bill>,
    ytd_cost: Decimal,
    cost_per_sqft: Option<f64>,
    cost_stats: Vec<CostStat>,
    months: Vec<MonthOutlook>,
    outlook: Option<DemandOutlook>,
}

fn dashboard(conn: &Connection, sub: &ArgMatches, today: NaiveDate) -> Result<()> {
    let (json_flag, jsonl_flag) = flags(sub);
    let bills = bills(conn)?;
    let weather = report_weather(conn)?;
    let mut latest = Vec::new();
    for u in Utility::ALL {
        if let Some(b) = store::latest_bill(conn, u)? {
            latest.push(b);
        }
    }
    let sqft = settings::home_sqft(conn)?;
    let k = DemandSettings::load(conn)?.k_factor;
    let ytd_cost = aggregate::ytd_cost(&bills, today);
    let cost_per_sqft = sqft.map(|sqft| {
        use rust_decimal::prelude::ToPrimitive;
        ytd_cost.to_f64().unwrap_or(0.0) / sqft
    });
    let outlook = if weather.is_empty() {
        None
    } else {
        Some(aggregate::demand_outlook(&bills, &weather, k, today))
    };
    let d = Dashboard {
        as_of: today,
        latest,
        ytd_cost,
        cost_per_sqft,
        cost_stats: aggregate::cost_stats(&bills, today.year(), sqft),
        months: aggregate::month_outlook(&bills, &weather, k, today),
        outlook,
    };
    if maybe_print_json(json_flag, jsonl_flag, &d)? {
        return Ok(());
    }
    let data = d
        .latest
        .iter()
        .map(|b| {
            vec![
                b.utility.to_string(),
                b.period_end.to_string(),
                fmt_money(&b.cost),
                format!("{:.1} {}/day", b.usage_per_day(), b.utility.unit()),
                format!("${:.2}", b.cost_per_day()),
            ]
        })
        .collect();
    println!(
        "{}",
        pretty_table(&["Utility", "Period end", "Cost", "Usage", "Per day"], data)
    );
    println!("Year to date: {}", fmt_money(&d.ytd_cost));
    if let Some(c) = d.cost_per_sqft {
        println!("Cost per sq ft: ${:.3}", c);
    }
    if !d.cost_stats.is_empty() {
        let this_year = today.year().to_string();
        let last_year = (today.year() - 1).to_string();
        println!(
            "{}",
            pretty_table(
                &["", this_year.as_str(), last_year.as_str(), "Average", "Min", "Max"],
                cost_stat_rows(&d.cost_stats)
            )
        );
    }
    println!("{}", pretty_table(&OUTLOOK_HEADERS, outlook_rows(&d.months)));
    if let Some(o) = &d.outlook {
        println!(
            "Demand {} vs average, expected cost/day {}, actual {}",
            pct(o.demand_pct),
            pct(o.expected_cpd_pct),
            pct(o.actual_cpd_pct)
        );
    }
    Ok(())
}
