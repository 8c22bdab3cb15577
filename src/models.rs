// Copyright (c) 2025 Soumyadip Sarkar.
// All rights reserved.
//
// This source code is licensed under the license found in the
// LICENSE file in the root directory of this source tree.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Utility {
    Electric,
    Gas,
    Water,
}

impl Utility {
    pub const ALL: [Utility; 3] = [Utility::Electric, Utility::Gas, Utility::Water];

    pub fn as_str(&self) -> &'static str {
        match self {
            Utility::Electric => "electric",
            Utility::Gas => "gas",
            Utility::Water => "water",
        }
    }

    /// Unit the usage column is recorded in.
    pub fn unit(&self) -> &'static str {
        match self {
            Utility::Electric => "kWh",
            Utility::Gas => "therms",
            Utility::Water => "gal",
        }
    }
}

impl fmt::Display for Utility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Utility {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "electric" | "elec" | "electricity" => Ok(Utility::Electric),
            "gas" => Ok(Utility::Gas),
            "water" => Ok(Utility::Water),
            other => Err(anyhow::anyhow!(
                "Unknown utility '{}', expected electric|gas|water",
                other
            )),
        }
    }
}

/// A bill as entered, before it has a row id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewBill {
    pub utility: Utility,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub usage: f64,
    pub cost: Decimal,
    pub meter_reading: Option<f64>,
    pub rate: Option<Decimal>,
    pub taxes: Option<Decimal>,
    pub service_charge: Option<Decimal>,
    pub note: Option<String>,
}

impl NewBill {
    pub fn new(
        utility: Utility,
        period_start: NaiveDate,
        period_end: NaiveDate,
        usage: f64,
        cost: Decimal,
    ) -> Self {
        Self {
            utility,
            period_start,
            period_end,
            usage,
            cost,
            meter_reading: None,
            rate: None,
            taxes: None,
            service_charge: None,
            note: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bill {
    pub id: i64,
    pub utility: Utility,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub usage: f64,
    pub cost: Decimal,
    pub meter_reading: Option<f64>,
    pub rate: Option<Decimal>,
    pub taxes: Option<Decimal>,
    pub service_charge: Option<Decimal>,
    pub note: Option<String>,
}

impl Bill {
    pub fn from_new(id: i64, b: NewBill) -> Self {
        Self {
            id,
            utility: b.utility,
            period_start: b.period_start,
            period_end: b.period_end,
            usage: b.usage,
            cost: b.cost,
            meter_reading: b.meter_reading,
            rate: b.rate,
            taxes: b.taxes,
            service_charge: b.service_charge,
            note: b.note,
        }
    }

    /// Length of the billing period in days, never less than one.
    pub fn days(&self) -> i64 {
        (self.period_end - self.period_start).num_days().max(1)
    }

    pub fn usage_per_day(&self) -> f64 {
        self.usage / self.days() as f64
    }

    pub fn cost_f64(&self) -> f64 {
        self.cost.to_f64().unwrap_or(0.0)
    }

    pub fn cost_per_day(&self) -> f64 {
        self.cost_f64() / self.days() as f64
    }

    /// Stored rate if present, else cost divided by usage.
    pub fn cost_per_unit(&self) -> Option<f64> {
        if let Some(r) = self.rate {
            return r.to_f64();
        }
        if self.usage > 0.0 {
            Some(self.cost_f64() / self.usage)
        } else {
            None
        }
    }

    /// Bills are attributed to the month their period ends in.
    pub fn month_key(&self) -> String {
        self.period_end.format("%Y-%m").to_string()
    }
}

/// Partial update for an existing bill; `None` keeps the stored value.
/// Optional columns take `Some(None)` to clear them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BillPatch {
    pub period_start: Option<NaiveDate>,
    pub period_end: Option<NaiveDate>,
    pub usage: Option<f64>,
    pub cost: Option<Decimal>,
    pub meter_reading: Option<Option<f64>>,
    pub rate: Option<Option<Decimal>>,
    pub taxes: Option<Option<Decimal>>,
    pub service_charge: Option<Option<Decimal>>,
    pub note: Option<Option<String>>,
}

impl BillPatch {
    pub fn is_empty(&self) -> bool {
        *self == BillPatch::default()
    }

    pub fn apply(&self, bill: &mut Bill) {
        if let Some(d) = self.period_start {
            bill.period_start = d;
        }
        if let Some(d) = self.period_end {
            bill.period_end = d;
        }
        if let Some(u) = self.usage {
            bill.usage = u;
        }
        if let Some(c) = self.cost {
            bill.cost = c;
        }
        if let Some(v) = self.meter_reading {
            bill.meter_reading = v;
        }
        if let Some(v) = self.rate {
            bill.rate = v;
        }
        if let Some(v) = self.taxes {
            bill.taxes = v;
        }
        if let Some(v) = self.service_charge {
            bill.service_charge = v;
        }
        if let Some(v) = &self.note {
            bill.note = v.clone();
        }
    }
}

/// Heating/cooling need for a day. Cooling is 0..=1, heating is -1..=0.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Demand {
    pub cooling: f64,
    pub heating: f64,
    pub max: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherObservation {
    pub station: String,
    pub date: NaiveDate,
    pub temp_high: Option<f64>,
    pub temp_avg: Option<f64>,
    pub temp_low: Option<f64>,
    pub dewpoint_high: Option<f64>,
    pub dewpoint_avg: Option<f64>,
    pub dewpoint_low: Option<f64>,
    pub humidity_high: Option<f64>,
    pub humidity_avg: Option<f64>,
    pub humidity_low: Option<f64>,
    pub wind_max: Option<f64>,
    pub wind_avg: Option<f64>,
    pub wind_gust: Option<f64>,
    pub pressure_max: Option<f64>,
    pub pressure_min: Option<f64>,
    pub rain_total: f64,
    pub demand: Option<Demand>,
}

impl WeatherObservation {
    pub fn new(station: &str, date: NaiveDate) -> Self {
        Self {
            station: station.to_string(),
            date,
            temp_high: None,
            temp_avg: None,
            temp_low: None,
            dewpoint_high: None,
            dewpoint_avg: None,
            dewpoint_low: None,
            humidity_high: None,
            humidity_avg: None,
            humidity_low: None,
            wind_max: None,
            wind_avg: None,
            wind_gust: None,
            pressure_max: None,
            pressure_min: None,
            rain_total: 0.0,
            demand: None,
        }
    }

    pub fn max_demand(&self) -> f64 {
        self.demand.map(|d| d.max).unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeterReading {
    pub id: i64,
    pub utility: Utility,
    pub reading_date: NaiveDate,
    pub value: f64,
}
