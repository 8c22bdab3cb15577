// Copyright (c) 2025 Soumyadip Sarkar.
// All rights reserved.
//
// This source code is licensed under the license found in the
// LICENSE file in the root directory of this source tree.

use clap::{Arg, ArgAction, Command, arg, value_parser};

fn output_flags(cmd: Command) -> Command {
    cmd.arg(arg!(--json "Print JSON instead of a table"))
        .arg(arg!(--jsonl "Print one JSON object per line"))
}

fn refresh_flag(cmd: Command) -> Command {
    cmd.arg(arg!(--"refresh-weather" "Fetch recent weather before reporting"))
}

fn limit_arg() -> Arg {
    arg!(--limit <N> "Maximum rows to show").value_parser(value_parser!(usize))
}

fn year_arg() -> Arg {
    arg!(--year <YEAR> "Calendar year (defaults to the current year)")
        .value_parser(value_parser!(i32))
}

fn bill_cmd() -> Command {
    Command::new("bill")
        .about("Record and edit utility bills")
        .subcommand_required(true)
        .subcommand(
            Command::new("add")
                .about("Add a bill")
                .arg(arg!(--utility <UTILITY> "electric | gas | water").required(true))
                .arg(arg!(--start <DATE> "Period start, YYYY-MM-DD").required(true))
                .arg(arg!(--end <DATE> "Period end, YYYY-MM-DD").required(true))
                .arg(arg!(--usage <USAGE> "Usage in kWh, therms or gallons").required(true))
                .arg(arg!(--cost <COST> "Total cost").required(true))
                .arg(arg!(--meter <READING> "Meter reading"))
                .arg(arg!(--rate <RATE> "Cost per unit"))
                .arg(arg!(--taxes <TAXES> "Taxes included in cost"))
                .arg(arg!(--"service-charge" <AMOUNT> "Fixed service charge"))
                .arg(arg!(--note <NOTE>)),
        )
        .subcommand(
            Command::new("edit")
                .about("Change fields of an existing bill")
                .arg(arg!(--id <ID> "Bill id").required(true).value_parser(value_parser!(i64)))
                .arg(arg!(--start <DATE>))
                .arg(arg!(--end <DATE>))
                .arg(arg!(--usage <USAGE>))
                .arg(arg!(--cost <COST>))
                .arg(arg!(--meter <READING>))
                .arg(arg!(--rate <RATE>))
                .arg(arg!(--taxes <TAXES>))
                .arg(arg!(--"service-charge" <AMOUNT>))
                .arg(arg!(--note <NOTE>))
                .arg(
                    arg!(--clear <FIELD> "Blank an optional field (repeatable)")
                        .value_parser(["meter", "rate", "taxes", "service-charge", "note"])
                        .action(ArgAction::Append),
                ),
        )
        .subcommand(
            Command::new("rm")
                .about("Delete a bill")
                .arg(arg!(--id <ID> "Bill id").required(true).value_parser(value_parser!(i64))),
        )
        .subcommand(output_flags(
            Command::new("list")
                .about("List bills, newest first")
                .arg(arg!(--utility <UTILITY>))
                .arg(arg!(--from <DATE> "Earliest period end"))
                .arg(arg!(--to <DATE> "Latest period end"))
                .arg(limit_arg()),
        ))
}

fn weather_cmd() -> Command {
    Command::new("weather")
        .about("Fetch and inspect daily weather")
        .subcommand_required(true)
        .subcommand(
            Command::new("fetch")
                .about("Download observations and store them")
                .arg(arg!(--from <DATE> "First day (defaults to day after the last stored day)"))
                .arg(arg!(--to <DATE> "Last day (defaults to today)"))
                .arg(arg!(--source <SOURCE> "open-meteo | wu (defaults to the configured source)")),
        )
        .subcommand(output_flags(
            Command::new("list")
                .about("Show stored observations")
                .arg(arg!(--from <DATE>))
                .arg(arg!(--to <DATE>))
                .arg(arg!(--station <STATION>))
                .arg(limit_arg()),
        ))
        .subcommand(
            Command::new("rm")
                .about("Delete a stored observation")
                .arg(arg!(--date <DATE>).required(true))
                .arg(arg!(--station <STATION> "Defaults to the configured station")),
        )
        .subcommand(
            Command::new("demand")
                .about("Recompute heating/cooling demand from current settings"),
        )
}

fn meter_cmd() -> Command {
    Command::new("meter")
        .about("Meter reading log")
        .subcommand_required(true)
        .subcommand(
            Command::new("add")
                .arg(arg!(--utility <UTILITY>).required(true))
                .arg(arg!(--date <DATE>).required(true))
                .arg(arg!(--value <VALUE>).required(true)),
        )
        .subcommand(output_flags(
            Command::new("list")
                .arg(arg!(--utility <UTILITY>).required(true))
                .arg(limit_arg()),
        ))
}

fn report_cmd() -> Command {
    let sub = |c: Command| refresh_flag(output_flags(c));
    Command::new("report")
        .about("Summaries of bills and weather")
        .subcommand_required(true)
        .subcommand(sub(Command::new("monthly")
            .about("Cost and usage per month")
            .arg(arg!(--months <N> "Most recent months to show")
                .value_parser(value_parser!(usize)))))
        .subcommand(sub(Command::new("yearly").about("Totals per year")))
        .subcommand(sub(Command::new("breakdown")
            .about("Share of a year's spend per utility")
            .arg(year_arg())))
        .subcommand(sub(Command::new("demand")
            .about("Demand matrix and blended outlook")
            .arg(arg!(--"as-of" <DATE> "Reference date for the outlook"))))
        .subcommand(sub(Command::new("correlation")
            .about("Monthly cost vs weather demand")))
        .subcommand(sub(Command::new("forecast")
            .about("Estimated spend for a month")
            .arg(arg!(--month <MONTH> "YYYY-MM (defaults to next month)"))))
        .subcommand(sub(Command::new("weather")
            .about("Temperature and rainfall extremes")
            .arg(year_arg())))
        .subcommand(sub(Command::new("usage")
            .about("Usage per day statistics per utility")))
        .subcommand(sub(Command::new("costs")
            .about("Cost per day, per sq ft and year total against past years")
            .arg(year_arg())))
        .subcommand(sub(Command::new("rainfall")
            .about("Rain per month for each year")))
        .subcommand(sub(Command::new("daily-demand")
            .about("Max demand by day of year for each year")))
        .subcommand(sub(Command::new("outlook")
            .about("Last month's spend with this and next month's forecasts")))
        .subcommand(sub(Command::new("dashboard")
            .about("Latest bills, year-to-date spend and demand outlook")))
}

pub fn build_cli() -> Command {
    Command::new("utilityhq")
        .about("Home utility bills correlated with weather")
        .version(env!("CARGO_PKG_VERSION"))
        .arg(
            Arg::new("db")
                .long("db")
                .value_name("PATH")
                .global(true)
                .action(ArgAction::Set)
                .help("Database file (overrides UTILITYHQ_DB)"),
        )
        .subcommand(Command::new("init").about("Create the database and default settings"))
        .subcommand(bill_cmd())
        .subcommand(weather_cmd())
        .subcommand(meter_cmd())
        .subcommand(report_cmd())
        .subcommand(
            Command::new("import")
                .about("Load spreadsheet sheets exported as CSV")
                .subcommand_required(true)
                .subcommand(
                    Command::new("bills")
                        .arg(arg!(--utility <UTILITY> "Required unless the sheet has a utility column"))
                        .arg(arg!(--path <CSV>).required(true)),
                )
                .subcommand(
                    Command::new("weather")
                        .arg(arg!(--path <CSV>).required(true))
                        .arg(arg!(--station <STATION> "Station id to file rows under")),
                )
                .subcommand(
                    Command::new("config")
                        .about("Apply a key,value settings sheet")
                        .arg(arg!(--path <CSV>).required(true)),
                )
                .subcommand(
                    Command::new("all")
                        .about("Migrate a workbook saved as one CSV per sheet")
                        .arg(arg!(--dir <DIR>).required(true))
                        .arg(arg!(--station <STATION> "Station id for the weather sheet")),
                ),
        )
        .subcommand(
            Command::new("export")
                .about("Write bills to a file")
                .subcommand_required(true)
                .subcommand(
                    Command::new("bills")
                        .arg(
                            arg!(--format <FORMAT>)
                                .value_parser(["csv", "json"])
                                .default_value("csv"),
                        )
                        .arg(arg!(--out <PATH>).required(true))
                        .arg(arg!(--utility <UTILITY>)),
                ),
        )
        .subcommand(
            Command::new("config")
                .about("Read and change settings")
                .subcommand_required(true)
                .subcommand(Command::new("get").arg(arg!(<KEY>).id("key")))
                .subcommand(
                    Command::new("set")
                        .arg(arg!(<KEY>).id("key"))
                        .arg(arg!(<VALUE>).id("value")),
                )
                .subcommand(Command::new("list")),
        )
        .subcommand(Command::new("doctor").about("Check data for gaps and conflicts"))
}
