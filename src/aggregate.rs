// Copyright (c) 2025 Soumyadip Sarkar.
// All rights reserved.
//
// This source code is licensed under the license found in the
// LICENSE file in the root directory of this source tree.

//! Summaries derived from bills and weather rows. Nothing here touches the
//! database; callers load rows through `store` and pass slices in.

use chrono::{Datelike, NaiveDate};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::demand::expected_cpd_pct;
use crate::models::{Bill, Utility, WeatherObservation};
use crate::utils::month_end;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct UtilityAmount {
    pub cost: Decimal,
    pub usage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthlyTotal {
    pub year: i32,
    pub month: u32,
    pub electric: UtilityAmount,
    pub gas: UtilityAmount,
    pub water: UtilityAmount,
    pub total: Decimal,
}

impl MonthlyTotal {
    fn empty(year: i32, month: u32) -> Self {
        Self {
            year,
            month,
            electric: UtilityAmount::default(),
            gas: UtilityAmount::default(),
            water: UtilityAmount::default(),
            total: Decimal::ZERO,
        }
    }

    pub fn key(&self) -> String {
        format!("{:04}-{:02}", self.year, self.month)
    }

    pub fn get(&self, u: Utility) -> &UtilityAmount {
        match u {
            Utility::Electric => &self.electric,
            Utility::Gas => &self.gas,
            Utility::Water => &self.water,
        }
    }

    fn get_mut(&mut self, u: Utility) -> &mut UtilityAmount {
        match u {
            Utility::Electric => &mut self.electric,
            Utility::Gas => &mut self.gas,
            Utility::Water => &mut self.water,
        }
    }

    fn add(&mut self, b: &Bill) {
        let slot = self.get_mut(b.utility);
        slot.cost += b.cost;
        slot.usage += b.usage;
        self.total += b.cost;
    }
}

fn dec_f64(d: Decimal) -> f64 {
    d.to_f64().unwrap_or(0.0)
}

fn mean(xs: &[f64]) -> Option<f64> {
    if xs.is_empty() {
        None
    } else {
        Some(xs.iter().sum::<f64>() / xs.len() as f64)
    }
}

/// Per-month totals, oldest first. A bill counts toward the month its period ends in.
pub fn monthly_totals(bills: &[Bill]) -> Vec<MonthlyTotal> {
    let mut map: BTreeMap<(i32, u32), MonthlyTotal> = BTreeMap::new();
    for b in bills {
        let (y, m) = (b.period_end.year(), b.period_end.month());
        map.entry((y, m))
            .or_insert_with(|| MonthlyTotal::empty(y, m))
            .add(b);
    }
    map.into_values().collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct YearlySummary {
    pub year: i32,
    pub electric: UtilityAmount,
    pub gas: UtilityAmount,
    pub water: UtilityAmount,
    pub total: Decimal,
    pub months: usize,
    pub avg_monthly: Decimal,
}

/// Per-year totals, newest year first.
pub fn yearly_summary(bills: &[Bill]) -> Vec<YearlySummary> {
    let mut years: BTreeMap<i32, Vec<MonthlyTotal>> = BTreeMap::new();
    for m in monthly_totals(bills) {
        years.entry(m.year).or_default().push(m);
    }
    let mut out = Vec::new();
    for (year, months) in years.into_iter().rev() {
        let mut s = YearlySummary {
            year,
            electric: UtilityAmount::default(),
            gas: UtilityAmount::default(),
            water: UtilityAmount::default(),
            total: Decimal::ZERO,
            months: months.len(),
            avg_monthly: Decimal::ZERO,
        };
        for m in &months {
            for (dst, src) in [
                (&mut s.electric, &m.electric),
                (&mut s.gas, &m.gas),
                (&mut s.water, &m.water),
            ] {
                dst.cost += src.cost;
                dst.usage += src.usage;
            }
            s.total += m.total;
        }
        if s.months > 0 {
            s.avg_monthly = (s.total / Decimal::from(s.months as u64)).round_dp(2);
        }
        out.push(s);
    }
    out
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CostShare {
    pub utility: Utility,
    pub cost: Decimal,
    pub percent: f64,
}

/// Share of the year's spend per utility. Percentages sum to 100 unless
/// nothing was spent, in which case every share is 0.
pub fn cost_breakdown(bills: &[Bill], year: i32) -> Vec<CostShare> {
    let mut costs: BTreeMap<Utility, Decimal> =
        Utility::ALL.iter().map(|u| (*u, Decimal::ZERO)).collect();
    for b in bills.iter().filter(|b| b.period_end.year() == year) {
        *costs.entry(b.utility).or_insert(Decimal::ZERO) += b.cost;
    }
    let total: Decimal = costs.values().copied().sum();
    let total_f = dec_f64(total);
    costs
        .into_iter()
        .map(|(utility, cost)| CostShare {
            utility,
            cost,
            percent: if total.is_zero() {
                0.0
            } else {
                dec_f64(cost) / total_f * 100.0
            },
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DemandYear {
    pub year: i32,
    pub num_days: usize,
    pub cooling_days: usize,
    pub heating_days: usize,
    pub econ_days: usize,
    pub avg_cooling: f64,
    pub avg_heating: f64,
    pub total_demand: f64,
    pub demand_index_clg: f64,
    pub demand_index_htg: f64,
    pub demand_index_total: f64,
    pub total_cost: f64,
    pub cost_per_day: f64,
    pub rainfall: f64,
    pub pct_avg_cost: f64,
    pub pct_avg_demand: f64,
    pub expected_cpd_pct: f64,
}

fn weather_by_year(weather: &[WeatherObservation]) -> BTreeMap<i32, Vec<&WeatherObservation>> {
    let mut map: BTreeMap<i32, Vec<&WeatherObservation>> = BTreeMap::new();
    for o in weather {
        map.entry(o.date.year()).or_default().push(o);
    }
    map
}

fn cost_by_year(bills: &[Bill]) -> BTreeMap<i32, Decimal> {
    let mut map = BTreeMap::new();
    for b in bills {
        *map.entry(b.period_end.year()).or_insert(Decimal::ZERO) += b.cost;
    }
    map
}

/// One row per year that has weather data, relating demand to spend.
///
/// A day counts as a cooling day when cooling demand is positive, else a
/// heating day when heating demand is negative, else an economy day. Demand
/// averages are over all days of the year with weather.
pub fn demand_matrix(bills: &[Bill], weather: &[WeatherObservation], k_factor: f64) -> Vec<DemandYear> {
    let costs = cost_by_year(bills);
    let mut rows = Vec::new();
    for (year, days) in weather_by_year(weather) {
        let mut r = DemandYear {
            year,
            num_days: days.len(),
            cooling_days: 0,
            heating_days: 0,
            econ_days: 0,
            avg_cooling: 0.0,
            avg_heating: 0.0,
            total_demand: 0.0,
            demand_index_clg: 0.0,
            demand_index_htg: 0.0,
            demand_index_total: 0.0,
            total_cost: dec_f64(costs.get(&year).copied().unwrap_or(Decimal::ZERO)),
            cost_per_day: 0.0,
            rainfall: days.iter().map(|d| d.rain_total).sum(),
            pct_avg_cost: 0.0,
            pct_avg_demand: 0.0,
            expected_cpd_pct: 0.0,
        };
        let (mut total_cooling, mut total_heating) = (0.0, 0.0);
        for d in &days {
            let dm = d.demand.unwrap_or_default();
            if dm.cooling > 0.0 {
                r.cooling_days += 1;
                total_cooling += dm.cooling;
            } else if dm.heating < 0.0 {
                r.heating_days += 1;
                total_heating += dm.heating;
            } else {
                r.econ_days += 1;
            }
        }
        let n = r.num_days as f64;
        r.avg_cooling = total_cooling / n;
        r.avg_heating = total_heating / n;
        r.total_demand = r.avg_heating.abs() + r.avg_cooling;
        r.demand_index_clg = r.avg_cooling * r.cooling_days as f64;
        r.demand_index_htg = r.avg_heating.abs() * r.heating_days as f64;
        r.demand_index_total = r.demand_index_clg + r.demand_index_htg;
        r.cost_per_day = r.total_cost / n;
        rows.push(r);
    }

    let cpds: Vec<f64> = rows.iter().map(|r| r.cost_per_day).filter(|v| *v > 0.0).collect();
    let demands: Vec<f64> = rows.iter().map(|r| r.total_demand).filter(|v| *v > 0.0).collect();
    let avg_cpd = mean(&cpds).unwrap_or(0.0);
    let avg_demand = mean(&demands).unwrap_or(0.0);
    for r in rows.iter_mut() {
        if avg_cpd > 0.0 {
            r.pct_avg_cost = (r.cost_per_day - avg_cpd) / avg_cpd;
        }
        if avg_demand > 0.0 {
            r.pct_avg_demand = (r.total_demand - avg_demand) / avg_demand;
        }
        r.expected_cpd_pct = expected_cpd_pct(r.pct_avg_demand, k_factor);
    }
    rows
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BlendedDemand {
    pub year: i32,
    pub month: u32,
    pub month_fraction: f64,
    pub ytd_weight: f64,
    pub hist_weight: f64,
    pub ytd_cooling: f64,
    pub ytd_heating: f64,
    pub ytd_total: f64,
    pub avg_cooling: f64,
    pub avg_heating: f64,
    pub avg_total: f64,
    pub blended_cooling: f64,
    pub blended_heating: f64,
    pub blended_total: f64,
}

/// Projects this year's demand by blending year-to-date averages with prior
/// years. With m = month/12 the YTD weight is m² and the historical weight 1 - m,
/// so early in the year the projection leans on history.
pub fn blended_demand(
    matrix: &[DemandYear],
    weather: &[WeatherObservation],
    as_of: NaiveDate,
) -> BlendedDemand {
    let year = as_of.year();
    let month = as_of.month();
    let m = month as f64 / 12.0;
    let hist: Vec<&DemandYear> = matrix.iter().filter(|r| r.year < year).collect();
    let avg = |f: fn(&DemandYear) -> f64| -> f64 {
        mean(&hist.iter().map(|r| f(*r)).collect::<Vec<_>>()).unwrap_or(0.0)
    };
    let avg_cooling = avg(|r| r.avg_cooling);
    let avg_heating = avg(|r| r.avg_heating);
    let avg_total = avg(|r| r.total_demand);

    let ytd: Vec<_> = weather
        .iter()
        .filter(|o| o.date.year() == year && o.date <= as_of)
        .map(|o| o.demand.unwrap_or_default())
        .collect();
    let ytd_cooling = mean(&ytd.iter().map(|d| d.cooling).collect::<Vec<_>>()).unwrap_or(0.0);
    let ytd_heating = mean(&ytd.iter().map(|d| d.heating).collect::<Vec<_>>()).unwrap_or(0.0);
    let ytd_total = ytd_cooling + ytd_heating.abs();

    let ytd_weight = m * m;
    let hist_weight = 1.0 - m;
    BlendedDemand {
        year,
        month,
        month_fraction: m,
        ytd_weight,
        hist_weight,
        ytd_cooling,
        ytd_heating,
        ytd_total,
        avg_cooling,
        avg_heating,
        avg_total,
        blended_cooling: ytd_weight * ytd_cooling + hist_weight * avg_cooling,
        blended_heating: ytd_weight * ytd_heating + hist_weight * avg_heating,
        blended_total: ytd_weight * ytd_total + hist_weight * avg_total,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DemandOutlook {
    pub blended: BlendedDemand,
    /// Blended demand relative to the historical average, as a fraction.
    pub demand_pct: f64,
    pub expected_cpd_pct: f64,
    /// Cost-per-day deviation of the current year, or the latest prior year
    /// when the current year has no bills yet.
    pub actual_cpd_pct: f64,
}

pub fn demand_outlook(
    bills: &[Bill],
    weather: &[WeatherObservation],
    k_factor: f64,
    as_of: NaiveDate,
) -> DemandOutlook {
    let matrix = demand_matrix(bills, weather, k_factor);
    let blended = blended_demand(&matrix, weather, as_of);
    let demand_pct = if blended.avg_total > 0.0 {
        (blended.blended_total - blended.avg_total) / blended.avg_total
    } else {
        0.0
    };
    let year = as_of.year();
    let has_bills = bills.iter().any(|b| b.period_end.year() == year);
    let actual_cpd_pct = matrix
        .iter()
        .rev()
        .find(|r| (r.year == year && has_bills) || r.year < year)
        .map(|r| r.pct_avg_cost)
        .unwrap_or(0.0);
    DemandOutlook {
        expected_cpd_pct: expected_cpd_pct(demand_pct, k_factor),
        blended,
        demand_pct,
        actual_cpd_pct,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthlyDemand {
    pub years: Vec<i32>,
    /// Average daily max demand per month, `None` where a month has no data.
    pub data: BTreeMap<i32, [Option<f64>; 12]>,
    pub averages: [f64; 12],
}

pub fn monthly_demand(weather: &[WeatherObservation]) -> MonthlyDemand {
    let mut sums: BTreeMap<(i32, u32), (f64, usize)> = BTreeMap::new();
    for o in weather {
        let e = sums.entry((o.date.year(), o.date.month())).or_insert((0.0, 0));
        e.0 += o.max_demand();
        e.1 += 1;
    }
    let mut data: BTreeMap<i32, [Option<f64>; 12]> = BTreeMap::new();
    let mut per_month: [Vec<f64>; 12] = Default::default();
    for ((y, m), (sum, n)) in sums {
        let avg = sum / n as f64;
        data.entry(y).or_insert([None; 12])[(m - 1) as usize] = Some(avg);
        per_month[(m - 1) as usize].push(avg);
    }
    let mut averages = [0.0; 12];
    for (i, vals) in per_month.iter().enumerate() {
        averages[i] = mean(vals).unwrap_or(0.0);
    }
    MonthlyDemand {
        years: data.keys().copied().collect(),
        data,
        averages,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Correlation {
    pub months: usize,
    /// Pearson coefficient between monthly total cost and summed daily max demand.
    pub r: f64,
    /// Least-squares slope: extra cost per unit of monthly demand.
    pub cost_per_demand: f64,
}

pub fn pearson(xs: &[f64], ys: &[f64]) -> Option<f64> {
    if xs.len() != ys.len() || xs.len() < 3 {
        return None;
    }
    let mx = mean(xs)?;
    let my = mean(ys)?;
    let (mut sxy, mut sxx, mut syy) = (0.0, 0.0, 0.0);
    for (x, y) in xs.iter().zip(ys) {
        sxy += (x - mx) * (y - my);
        sxx += (x - mx).powi(2);
        syy += (y - my).powi(2);
    }
    if sxx == 0.0 || syy == 0.0 {
        return None;
    }
    Some(sxy / (sxx.sqrt() * syy.sqrt()))
}

/// Correlates monthly spend with monthly weather demand over months that have both.
pub fn demand_correlation(bills: &[Bill], weather: &[WeatherObservation]) -> Option<Correlation> {
    let mut demand: BTreeMap<(i32, u32), f64> = BTreeMap::new();
    for o in weather {
        *demand.entry((o.date.year(), o.date.month())).or_insert(0.0) += o.max_demand();
    }
    let (mut xs, mut ys) = (Vec::new(), Vec::new());
    for m in monthly_totals(bills) {
        if let Some(d) = demand.get(&(m.year, m.month)) {
            xs.push(*d);
            ys.push(dec_f64(m.total));
        }
    }
    let r = pearson(&xs, &ys)?;
    let mx = mean(&xs)?;
    let my = mean(&ys)?;
    let sxy: f64 = xs.iter().zip(&ys).map(|(x, y)| (x - mx) * (y - my)).sum();
    let sxx: f64 = xs.iter().map(|x| (x - mx).powi(2)).sum();
    Some(Correlation {
        months: xs.len(),
        r,
        cost_per_demand: sxy / sxx,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageStats {
    pub utility: Utility,
    pub unit: &'static str,
    pub bills: usize,
    pub latest_per_day: Option<f64>,
    pub average_per_day: Option<f64>,
    pub min_per_day: Option<f64>,
    pub max_per_day: Option<f64>,
    pub latest_cost_per_day: Option<f64>,
    pub average_cost_per_day: Option<f64>,
}

pub fn usage_stats(bills: &[Bill], utility: Utility) -> UsageStats {
    let mut mine: Vec<&Bill> = bills.iter().filter(|b| b.utility == utility).collect();
    mine.sort_by_key(|b| (b.period_end, b.id));
    let per_day: Vec<f64> = mine.iter().map(|b| b.usage_per_day()).collect();
    let cpd: Vec<f64> = mine.iter().map(|b| b.cost_per_day()).collect();
    UsageStats {
        utility,
        unit: utility.unit(),
        bills: mine.len(),
        latest_per_day: per_day.last().copied(),
        average_per_day: mean(&per_day),
        min_per_day: per_day.iter().copied().reduce(f64::min),
        max_per_day: per_day.iter().copied().reduce(f64::max),
        latest_cost_per_day: cpd.last().copied(),
        average_cost_per_day: mean(&cpd),
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct StatLine {
    pub current: Option<f64>,
    pub last_year: Option<f64>,
    pub all_time: Option<f64>,
    pub average: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeatherStats {
    pub year: i32,
    pub max_temp: StatLine,
    pub min_temp: StatLine,
    pub rainfall: StatLine,
}

/// Temperature extremes and rainfall for `year`, the prior year, all time,
/// and averaged over years. All-time rainfall is the wettest year's total.
pub fn weather_stats(weather: &[WeatherObservation], year: i32) -> WeatherStats {
    type Days<'a> = [&'a WeatherObservation];
    fn year_max(days: &Days<'_>) -> Option<f64> {
        days.iter().filter_map(|d| d.temp_high).reduce(f64::max)
    }
    fn year_min(days: &Days<'_>) -> Option<f64> {
        days.iter().filter_map(|d| d.temp_low).reduce(f64::min)
    }
    fn year_rain(days: &Days<'_>) -> Option<f64> {
        Some(days.iter().map(|d| d.rain_total).sum())
    }

    let by_year = weather_by_year(weather);
    let line = |f: fn(&Days<'_>) -> Option<f64>, all_time: Option<f64>| {
        let per_year: Vec<f64> = by_year.values().filter_map(|d| f(d.as_slice())).collect();
        StatLine {
            current: by_year.get(&year).and_then(|d| f(d.as_slice())),
            last_year: by_year.get(&(year - 1)).and_then(|d| f(d.as_slice())),
            all_time,
            average: mean(&per_year),
        }
    };

    let max_all = weather.iter().filter_map(|d| d.temp_high).reduce(f64::max);
    let min_all = weather.iter().filter_map(|d| d.temp_low).reduce(f64::min);
    let rain_all = by_year.values().filter_map(|d| year_rain(d.as_slice())).reduce(f64::max);
    WeatherStats {
        year,
        max_temp: line(year_max, max_all),
        min_temp: line(year_min, min_all),
        rainfall: line(year_rain, rain_all),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Forecast {
    pub year: i32,
    pub month: u32,
    pub historical_avg: f64,
    pub avg_daily_demand: f64,
    pub cost_per_demand: Option<f64>,
    pub forecast: f64,
    pub actual: Option<Decimal>,
}

/// Estimates a month's total spend from typical demand for that calendar month.
///
/// Cost per demand unit comes from the demand matrix (total cost over total
/// demand index). The demand estimate is blended 70/30 with the month's
/// historical average; without demand data the historical average is used.
///
/// The demand estimate scales by the target month's real day count rather
/// than dividing a 30-day total, so February and 31-day months differ.
pub fn forecast_month(
    bills: &[Bill],
    weather: &[WeatherObservation],
    k_factor: f64,
    year: i32,
    month: u32,
) -> Forecast {
    let months = monthly_totals(bills);
    let same_month: Vec<f64> = months
        .iter()
        .filter(|m| m.month == month && !m.total.is_zero())
        .map(|m| dec_f64(m.total))
        .collect();
    let historical_avg = mean(&same_month).unwrap_or(0.0);
    let actual = months
        .iter()
        .find(|m| m.year == year && m.month == month)
        .map(|m| m.total);

    let avg_daily_demand = if (1..=12).contains(&month) {
        monthly_demand(weather).averages[(month - 1) as usize]
    } else {
        0.0
    };
    let matrix = demand_matrix(bills, weather, k_factor);
    let cost: f64 = matrix.iter().map(|r| r.total_cost).sum();
    let index: f64 = matrix.iter().map(|r| r.demand_index_total).sum();
    let cost_per_demand = if index > 0.0 && cost > 0.0 {
        Some(cost / index)
    } else {
        None
    };

    let forecast = match cost_per_demand {
        Some(cpd) if avg_daily_demand > 0.0 => {
            let days = month_end(year, month).map(|d| d.day()).unwrap_or(30) as f64;
            let estimate = avg_daily_demand * days * cpd;
            if historical_avg > 0.0 {
                estimate * 0.7 + historical_avg * 0.3
            } else {
                estimate
            }
        }
        _ => historical_avg,
    };
    Forecast {
        year,
        month,
        historical_avg,
        avg_daily_demand,
        cost_per_demand,
        forecast,
        actual,
    }
}

/// Pairs of same-utility bills whose periods overlap by at least one day.
/// Periods that share only a boundary date (one ends, the next starts) are fine.
pub fn overlapping_periods(bills: &[Bill]) -> Vec<(Bill, Bill)> {
    let mut sorted: Vec<&Bill> = bills.iter().collect();
    sorted.sort_by_key(|b| (b.utility, b.period_start, b.period_end, b.id));
    let mut out = Vec::new();
    // bills of the current utility still open at the cursor
    let mut open: Vec<&Bill> = Vec::new();
    for b in sorted {
        open.retain(|a| a.utility == b.utility && a.period_end > b.period_start);
        for a in &open {
            out.push(((*a).clone(), b.clone()));
        }
        open.push(b);
    }
    out
}

/// Spend so far in `as_of`'s year, by bill period end.
pub fn ytd_cost(bills: &[Bill], as_of: NaiveDate) -> Decimal {
    bills
        .iter()
        .filter(|b| b.period_end.year() == as_of.year() && b.period_end <= as_of)
        .map(|b| b.cost)
        .sum()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CostStatKind {
    CostPerDay,
    CostPerSqft,
    YearTotal,
}

impl CostStatKind {
    pub fn label(&self) -> &'static str {
        match self {
            CostStatKind::CostPerDay => "Cost per day",
            CostStatKind::CostPerSqft => "Cost per sq ft",
            CostStatKind::YearTotal => "Year total",
        }
    }

    pub fn unit(&self) -> &'static str {
        match self {
            CostStatKind::CostPerDay => "$/day",
            CostStatKind::CostPerSqft => "$/sqft",
            CostStatKind::YearTotal => "$",
        }
    }
}

/// One headline figure for `year`, against last year and the spread over all
/// billed years. Years without bills read as 0.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CostStat {
    pub kind: CostStatKind,
    pub unit: &'static str,
    pub current: f64,
    pub last_year: f64,
    pub average: f64,
    pub min: f64,
    pub max: f64,
}

/// Spend and billed days per year. Billed days are the longest per-utility
/// coverage, so three utilities billing the same month count its days once.
fn billed_years(bills: &[Bill]) -> BTreeMap<i32, (f64, i64)> {
    let mut days: BTreeMap<(i32, Utility), i64> = BTreeMap::new();
    let mut out: BTreeMap<i32, (f64, i64)> = BTreeMap::new();
    for b in bills {
        let y = b.period_end.year();
        out.entry(y).or_insert((0.0, 0)).0 += b.cost_f64();
        *days.entry((y, b.utility)).or_insert(0) += b.days();
    }
    for ((y, _), n) in days {
        if let Some(e) = out.get_mut(&y) {
            e.1 = e.1.max(n);
        }
    }
    out
}

/// Cost per day, cost per square foot and year total for `year`. Cost per
/// square foot is left out without a positive `sqft`; no bills, no stats.
pub fn cost_stats(bills: &[Bill], year: i32, sqft: Option<f64>) -> Vec<CostStat> {
    let years = billed_years(bills);
    if years.is_empty() {
        return Vec::new();
    }
    let stat = |kind: CostStatKind, f: &dyn Fn(f64, i64) -> f64| {
        let values: Vec<f64> = years.values().map(|(t, d)| f(*t, *d)).collect();
        let at = |y: i32| years.get(&y).map(|(t, d)| f(*t, *d)).unwrap_or(0.0);
        CostStat {
            kind,
            unit: kind.unit(),
            current: at(year),
            last_year: at(year - 1),
            average: mean(&values).unwrap_or(0.0),
            min: values.iter().copied().reduce(f64::min).unwrap_or(0.0),
            max: values.iter().copied().reduce(f64::max).unwrap_or(0.0),
        }
    };
    let mut out = vec![stat(CostStatKind::CostPerDay, &|t: f64, d: i64| {
        if d > 0 { t / d as f64 } else { 0.0 }
    })];
    if let Some(sqft) = sqft.filter(|v| *v > 0.0) {
        out.push(stat(CostStatKind::CostPerSqft, &|t: f64, _: i64| t / sqft));
    }
    out.push(stat(CostStatKind::YearTotal, &|t: f64, _: i64| t));
    out
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthlyRainfall {
    pub years: Vec<i32>,
    /// Rain total per month, `None` where a month has no observations.
    pub data: BTreeMap<i32, [Option<f64>; 12]>,
    pub averages: [f64; 12],
}

pub fn monthly_rainfall(weather: &[WeatherObservation]) -> MonthlyRainfall {
    let mut data: BTreeMap<i32, [Option<f64>; 12]> = BTreeMap::new();
    for o in weather {
        let slot = &mut data.entry(o.date.year()).or_insert([None; 12])[o.date.month0() as usize];
        *slot = Some(slot.unwrap_or(0.0) + o.rain_total);
    }
    let mut averages = [0.0; 12];
    for (i, avg) in averages.iter_mut().enumerate() {
        let vals: Vec<f64> = data.values().filter_map(|months| months[i]).collect();
        *avg = mean(&vals).unwrap_or(0.0);
    }
    MonthlyRainfall {
        years: data.keys().copied().collect(),
        data,
        averages,
    }
}

pub const DAYS_OF_YEAR: usize = 366;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyDemand {
    pub years: Vec<i32>,
    /// Max demand by day of year (index 0 is Jan 1), `None` where missing.
    pub data: BTreeMap<i32, Vec<Option<f64>>>,
    pub averages: Vec<f64>,
}

pub fn daily_demand(weather: &[WeatherObservation]) -> DailyDemand {
    let mut data: BTreeMap<i32, Vec<Option<f64>>> = BTreeMap::new();
    for o in weather {
        data.entry(o.date.year())
            .or_insert_with(|| vec![None; DAYS_OF_YEAR])[o.date.ordinal0() as usize] =
            Some(o.max_demand());
    }
    let averages = (0..DAYS_OF_YEAR)
        .map(|i| {
            let vals: Vec<f64> = data.values().filter_map(|days| days[i]).collect();
            mean(&vals).unwrap_or(0.0)
        })
        .collect();
    DailyDemand {
        years: data.keys().copied().collect(),
        data,
        averages,
    }
}

/// A month's figure next to how that calendar month has gone before.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthOutlook {
    pub year: i32,
    pub month: u32,
    pub label: String,
    /// Actual spend for a past month, the forecast otherwise.
    pub value: f64,
    pub is_actual: bool,
    /// Same month one year earlier.
    pub last_yr: f64,
    pub min: f64,
    pub max: f64,
    pub avg: f64,
}

fn shift_month(year: i32, month: u32, delta: i32) -> (i32, u32) {
    let idx = year * 12 + month as i32 - 1 + delta;
    (idx.div_euclid(12), idx.rem_euclid(12) as u32 + 1)
}

/// Previous month's actual spend with this and next month's forecasts.
pub fn month_outlook(
    bills: &[Bill],
    weather: &[WeatherObservation],
    k_factor: f64,
    as_of: NaiveDate,
) -> Vec<MonthOutlook> {
    let months = monthly_totals(bills);
    let cost = |y: i32, m: u32| {
        months
            .iter()
            .find(|t| t.year == y && t.month == m)
            .map(|t| dec_f64(t.total))
            .unwrap_or(0.0)
    };
    [-1, 0, 1]
        .into_iter()
        .map(|delta| {
            let (year, month) = shift_month(as_of.year(), as_of.month(), delta);
            let history: Vec<f64> = months
                .iter()
                .filter(|t| t.month == month && !t.total.is_zero())
                .map(|t| dec_f64(t.total))
                .collect();
            let is_actual = delta < 0;
            let value = if is_actual {
                cost(year, month)
            } else {
                forecast_month(bills, weather, k_factor, year, month).forecast
            };
            MonthOutlook {
                year,
                month,
                label: NaiveDate::from_ymd_opt(year, month, 1)
                    .map(|d| d.format("%b %Y").to_string())
                    .unwrap_or_default(),
                value,
                is_actual,
                last_yr: cost(year - 1, month),
                min: history.iter().copied().reduce(f64::min).unwrap_or(0.0),
                max: history.iter().copied().reduce(f64::max).unwrap_or(0.0),
                avg: mean(&history).unwrap_or(0.0),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Demand, NewBill};

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn bill(id: i64, u: Utility, start: NaiveDate, end: NaiveDate, usage: f64, cost: &str) -> Bill {
        Bill::from_new(id, NewBill::new(u, start, end, usage, cost.parse().unwrap()))
    }

    fn obs(date: NaiveDate, cooling: f64, heating: f64) -> WeatherObservation {
        let mut o = WeatherObservation::new("TEST", date);
        o.demand = Some(Demand {
            cooling,
            heating,
            max: cooling.max(heating.abs()),
        });
        o
    }

    #[test]
    fn pearson_detects_perfect_and_degenerate_series() {
        let r = pearson(&[1.0, 2.0, 3.0, 4.0], &[2.0, 4.0, 6.0, 8.0]).unwrap();
        assert!((r - 1.0).abs() < 1e-12);
        let r = pearson(&[1.0, 2.0, 3.0], &[3.0, 2.0, 1.0]).unwrap();
        assert!((r + 1.0).abs() < 1e-12);
        assert!(pearson(&[1.0, 1.0, 1.0], &[1.0, 2.0, 3.0]).is_none());
        assert!(pearson(&[1.0, 2.0], &[1.0, 2.0]).is_none());
    }

    #[test]
    fn matrix_classifies_days_and_costs_per_day() {
        let weather = vec![
            obs(d(2024, 1, 1), 0.0, -0.5),
            obs(d(2024, 1, 2), 0.0, -1.0),
            obs(d(2024, 7, 1), 0.5, 0.0),
            obs(d(2024, 4, 1), 0.0, 0.0),
        ];
        let bills = vec![bill(1, Utility::Electric, d(2024, 1, 1), d(2024, 1, 31), 900.0, "100.00")];
        let m = demand_matrix(&bills, &weather, 2.25);
        assert_eq!(m.len(), 1);
        let r = &m[0];
        assert_eq!((r.cooling_days, r.heating_days, r.econ_days), (1, 2, 1));
        assert!((r.avg_heating + 0.375).abs() < 1e-12);
        assert!((r.avg_cooling - 0.125).abs() < 1e-12);
        assert!((r.total_demand - 0.5).abs() < 1e-12);
        assert!((r.demand_index_total - (0.125 + 0.75)).abs() < 1e-12);
        assert!((r.cost_per_day - 25.0).abs() < 1e-12);
        // a single year is its own average
        assert_eq!(r.pct_avg_cost, 0.0);
    }

    #[test]
    fn blended_weights_follow_month() {
        let weather = vec![obs(d(2023, 1, 1), 0.0, -0.4), obs(d(2024, 3, 1), 0.2, 0.0)];
        let matrix = demand_matrix(&[], &weather, 2.25);
        let b = blended_demand(&matrix, &weather, d(2024, 6, 15));
        assert!((b.month_fraction - 0.5).abs() < 1e-12);
        assert!((b.ytd_weight - 0.25).abs() < 1e-12);
        assert!((b.hist_weight - 0.5).abs() < 1e-12);
        assert!((b.avg_total - 0.4).abs() < 1e-12);
        assert!((b.ytd_total - 0.2).abs() < 1e-12);
        assert!((b.blended_total - (0.25 * 0.2 + 0.5 * 0.4)).abs() < 1e-12);
    }

    #[test]
    fn overlaps_ignore_shared_boundary() {
        let bills = vec![
            bill(1, Utility::Gas, d(2024, 1, 1), d(2024, 2, 1), 10.0, "1"),
            bill(2, Utility::Gas, d(2024, 2, 1), d(2024, 3, 1), 10.0, "1"),
            bill(3, Utility::Gas, d(2024, 2, 20), d(2024, 3, 20), 10.0, "1"),
            bill(4, Utility::Water, d(2024, 2, 20), d(2024, 3, 20), 10.0, "1"),
        ];
        let o = overlapping_periods(&bills);
        assert_eq!(o.len(), 1);
        assert_eq!((o[0].0.id, o[0].1.id), (2, 3));
    }

    #[test]
    fn overlaps_found_against_long_earlier_bill() {
        let bills = vec![
            bill(1, Utility::Gas, d(2024, 1, 1), d(2024, 12, 31), 10.0, "1"),
            bill(2, Utility::Gas, d(2024, 2, 1), d(2024, 2, 28), 10.0, "1"),
            bill(3, Utility::Gas, d(2024, 3, 1), d(2024, 3, 31), 10.0, "1"),
        ];
        let pairs: Vec<(i64, i64)> = overlapping_periods(&bills)
            .iter()
            .map(|(a, b)| (a.id, b.id))
            .collect();
        assert_eq!(pairs, vec![(1, 2), (1, 3)]);
    }

    #[test]
    fn forecast_scales_with_days_in_month() {
        let weather: Vec<_> = d(2023, 2, 1)
            .iter_days()
            .take_while(|day| *day <= d(2023, 3, 31))
            .map(|day| obs(day, 0.5, 0.0))
            .collect();
        let bills = vec![bill(1, Utility::Electric, d(2022, 12, 20), d(2023, 1, 20), 1.0, "100")];
        let feb = forecast_month(&bills, &weather, 2.25, 2025, 2);
        let mar = forecast_month(&bills, &weather, 2.25, 2025, 3);
        assert_eq!(feb.historical_avg, 0.0);
        let cpd = 100.0 / (0.5 * 59.0);
        assert!((feb.forecast - 0.5 * 28.0 * cpd).abs() < 1e-9);
        assert!((mar.forecast / feb.forecast - 31.0 / 28.0).abs() < 1e-12);
    }

    #[test]
    fn forecast_falls_back_to_history_without_weather() {
        let bills = vec![
            bill(1, Utility::Electric, d(2022, 12, 1), d(2023, 1, 2), 1.0, "120"),
            bill(2, Utility::Electric, d(2023, 12, 1), d(2024, 1, 2), 1.0, "80"),
        ];
        let f = forecast_month(&bills, &[], 2.25, 2025, 1);
        assert!((f.historical_avg - 100.0).abs() < 1e-9);
        assert!((f.forecast - 100.0).abs() < 1e-9);
        assert!(f.cost_per_demand.is_none());
        assert!(f.actual.is_none());
    }

    #[test]
    fn cost_stats_compare_year_with_history() {
        let bills = vec![
            bill(1, Utility::Electric, d(2023, 1, 1), d(2023, 12, 31), 1.0, "364"),
            bill(2, Utility::Gas, d(2023, 1, 1), d(2023, 12, 31), 1.0, "182"),
            bill(3, Utility::Electric, d(2024, 1, 1), d(2024, 1, 31), 1.0, "60"),
        ];
        let stats = cost_stats(&bills, 2024, Some(1000.0));
        let kinds: Vec<CostStatKind> = stats.iter().map(|s| s.kind).collect();
        assert_eq!(
            kinds,
            vec![CostStatKind::CostPerDay, CostStatKind::CostPerSqft, CostStatKind::YearTotal]
        );
        let cpd = &stats[0];
        assert!((cpd.current - 2.0).abs() < 1e-12);
        assert!((cpd.last_year - 1.5).abs() < 1e-12);
        assert!((cpd.average - 1.75).abs() < 1e-12);
        assert_eq!((cpd.min, cpd.max), (1.5, 2.0));
        assert!((stats[1].last_year - 0.546).abs() < 1e-12);
        assert_eq!((stats[2].current, stats[2].last_year), (60.0, 546.0));

        assert_eq!(cost_stats(&bills, 2030, None).len(), 2);
        assert_eq!(cost_stats(&bills, 2030, None)[0].current, 0.0);
        assert!(cost_stats(&[], 2024, Some(1000.0)).is_empty());
    }

    #[test]
    fn rainfall_sums_by_month() {
        let rain = |date: NaiveDate, inches: f64| {
            let mut o = WeatherObservation::new("TEST", date);
            o.rain_total = inches;
            o
        };
        let weather = vec![
            rain(d(2023, 1, 5), 0.5),
            rain(d(2023, 1, 20), 0.25),
            rain(d(2024, 1, 10), 1.0),
            rain(d(2024, 2, 1), 0.0),
        ];
        let r = monthly_rainfall(&weather);
        assert_eq!(r.years, vec![2023, 2024]);
        assert_eq!(r.data[&2023][0], Some(0.75));
        assert_eq!(r.data[&2023][1], None);
        assert_eq!(r.data[&2024][1], Some(0.0));
        assert!((r.averages[0] - 0.875).abs() < 1e-12);
        assert_eq!(r.averages[1], 0.0);
    }

    #[test]
    fn daily_demand_indexes_by_day_of_year() {
        let weather = vec![obs(d(2024, 3, 1), 0.5, 0.0), obs(d(2023, 3, 1), 0.25, -0.75)];
        let dd = daily_demand(&weather);
        assert_eq!(dd.years, vec![2023, 2024]);
        assert_eq!(dd.data[&2024].len(), DAYS_OF_YEAR);
        assert_eq!(dd.data[&2024][60], Some(0.5));
        assert_eq!(dd.data[&2023][59], Some(0.75));
        assert_eq!(dd.averages[59], 0.75);
        assert_eq!(dd.averages[0], 0.0);
    }

    #[test]
    fn month_outlook_spans_year_boundary() {
        let bills = vec![
            bill(1, Utility::Electric, d(2023, 12, 1), d(2023, 12, 31), 1.0, "80"),
            bill(2, Utility::Electric, d(2023, 12, 31), d(2024, 1, 31), 1.0, "120"),
            bill(3, Utility::Electric, d(2024, 12, 1), d(2024, 12, 31), 1.0, "100"),
        ];
        let o = month_outlook(&bills, &[], 2.25, d(2025, 1, 15));
        let labels: Vec<&str> = o.iter().map(|m| m.label.as_str()).collect();
        assert_eq!(labels, vec!["Dec 2024", "Jan 2025", "Feb 2025"]);

        let prev = &o[0];
        assert!(prev.is_actual);
        assert_eq!((prev.value, prev.last_yr), (100.0, 80.0));
        assert_eq!((prev.min, prev.max, prev.avg), (80.0, 100.0, 90.0));

        assert!(!o[1].is_actual);
        assert_eq!((o[1].value, o[1].last_yr), (120.0, 120.0));
        assert_eq!(o[2].value, 0.0);
        assert_eq!(shift_month(2025, 1, -1), (2024, 12));
        assert_eq!(shift_month(2024, 12, 1), (2025, 1));
    }
}
