// Copyright (c) 2025 Soumyadip Sarkar.
// All rights reserved.
//
// This source code is licensed under the license found in the
// LICENSE file in the root directory of this source tree.

use chrono::NaiveDate;

use crate::models::Utility;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("A {utility} bill for {start}..{end} already exists")]
    DuplicatePeriod {
        utility: Utility,
        start: NaiveDate,
        end: NaiveDate,
    },
    #[error("Bill #{0} not found")]
    NotFound(i64),
    #[error("Invalid bill: {0}")]
    Invalid(String),
    #[error("Corrupt value '{value}' in column {column}")]
    Corrupt { column: &'static str, value: String },
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum WeatherError {
    #[error("Weather API rejected the credentials (HTTP {0})")]
    Auth(u16),
    #[error("Weather API returned HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("Weather API error: {0}")]
    Api(String),
    #[error("Weather source not configured: {0}")]
    Config(String),
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("Parse error: {0}")]
    Parse(String),
}

impl From<serde_json::Error> for WeatherError {
    fn from(e: serde_json::Error) -> Self {
        WeatherError::Parse(e.to_string())
    }
}
