// Copyright (c) 2025 Soumyadip Sarkar.
// All rights reserved.
//
// This source code is licensed under the license found in the
// LICENSE file in the root directory of this source tree.

//! Historical daily weather from Open-Meteo or a Weather Underground PWS.

use anyhow::Context;
use chrono::{Datelike, Duration, Local, NaiveDate};
use reqwest::blocking::{Client, Response};
use rusqlite::Connection;
use serde::Deserialize;
use std::collections::HashMap;

use crate::demand::DemandSettings;
use crate::error::WeatherError;
use crate::models::WeatherObservation;
use crate::settings::{WeatherSettings, WeatherSourceKind};
use crate::store;
use crate::utils::{http_client, month_end};

pub const OPEN_METEO_FORECAST_URL: &str = "https://api.open-meteo.com/v1/forecast";
pub const OPEN_METEO_ARCHIVE_URL: &str = "https://archive-api.open-meteo.com/v1/archive";
pub const WU_BASE_URL: &str = "https://api.weather.com/v2/pws";

/// The archive lags real time by a few days; newer ranges go to the forecast API.
const ARCHIVE_LAG_DAYS: i64 = 5;
const FORECAST_MAX_PAST_DAYS: i64 = 92;

const DAILY_FIELDS: &str = "temperature_2m_max,temperature_2m_min,temperature_2m_mean,\
precipitation_sum,rain_sum,wind_speed_10m_max,\
relative_humidity_2m_max,relative_humidity_2m_min,relative_humidity_2m_mean,\
dew_point_2m_max,dew_point_2m_min,dew_point_2m_mean,\
pressure_msl_max,pressure_msl_min";

pub trait WeatherSource {
    /// Identifier observations are stored under.
    fn station_id(&self) -> String;

    fn fetch_range(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<WeatherObservation>, WeatherError>;
}

fn read_body(resp: Response) -> Result<Option<String>, WeatherError> {
    let status = resp.status();
    if status.as_u16() == 204 {
        return Ok(None);
    }
    if status.as_u16() == 401 || status.as_u16() == 403 {
        return Err(WeatherError::Auth(status.as_u16()));
    }
    let body = resp.text()?;
    if !status.is_success() {
        return Err(WeatherError::Http {
            status: status.as_u16(),
            body: body.chars().take(200).collect(),
        });
    }
    Ok(Some(body))
}

pub struct OpenMeteo {
    pub latitude: f64,
    pub longitude: f64,
    pub timezone: String,
    client: Client,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OpenMeteoRequest {
    pub url: &'static str,
    pub params: Vec<(&'static str, String)>,
    /// Days of the asked-for range this request is responsible for.
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl OpenMeteo {
    pub fn new(latitude: f64, longitude: f64, timezone: &str) -> Result<Self, WeatherError> {
        if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
            return Err(WeatherError::Config(format!(
                "location {},{} is out of range",
                latitude, longitude
            )));
        }
        Ok(Self {
            latitude,
            longitude,
            timezone: timezone.to_string(),
            client: http_client()?,
        })
    }

    fn base_params(&self) -> Vec<(&'static str, String)> {
        vec![
            ("latitude", self.latitude.to_string()),
            ("longitude", self.longitude.to_string()),
            ("daily", DAILY_FIELDS.to_string()),
            ("temperature_unit", "fahrenheit".to_string()),
            ("wind_speed_unit", "mph".to_string()),
            ("precipitation_unit", "inch".to_string()),
            ("timezone", self.timezone.clone()),
        ]
    }

    /// Splits a range, as seen from `today`, into archive and forecast requests.
    ///
    /// Days older than the archive lag go to the archive endpoint; the recent
    /// tail goes to the forecast endpoint through `past_days`.
    pub fn plan_request(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        today: NaiveDate,
    ) -> Vec<OpenMeteoRequest> {
        let mut out = Vec::new();
        if start > end {
            return out;
        }
        let archive_end = today - Duration::days(ARCHIVE_LAG_DAYS + 1);
        if start <= archive_end {
            let chunk_end = end.min(archive_end);
            let mut params = self.base_params();
            params.push(("start_date", start.to_string()));
            params.push(("end_date", chunk_end.to_string()));
            out.push(OpenMeteoRequest {
                url: OPEN_METEO_ARCHIVE_URL,
                params,
                start,
                end: chunk_end,
            });
        }
        let tail_start = start.max(archive_end + Duration::days(1));
        if tail_start <= end {
            let past = ((today - tail_start).num_days() + 1).clamp(1, FORECAST_MAX_PAST_DAYS);
            let mut params = self.base_params();
            params.push(("past_days", past.to_string()));
            params.push(("forecast_days", "1".to_string()));
            out.push(OpenMeteoRequest {
                url: OPEN_METEO_FORECAST_URL,
                params,
                start: tail_start,
                end,
            });
        }
        out
    }

    fn send(&self, req: &OpenMeteoRequest) -> Result<Vec<WeatherObservation>, WeatherError> {
        tracing::info!(url = req.url, start = %req.start, end = %req.end, "open-meteo request");
        let resp = self.client.get(req.url).query(&req.params).send()?;
        match read_body(resp) {
            Ok(Some(body)) => parse_open_meteo(&self.station_id(), &body, req.start, req.end),
            Ok(None) => Ok(Vec::new()),
            // Open-Meteo reports bad requests as JSON with a reason.
            Err(WeatherError::Http { body, .. }) if body.contains("\"reason\"") => {
                parse_open_meteo(&self.station_id(), &body, req.start, req.end)
            }
            Err(e) => Err(e),
        }
    }
}

impl WeatherSource for OpenMeteo {
    fn station_id(&self) -> String {
        open_meteo_station(self.latitude, self.longitude)
    }

    fn fetch_range(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<WeatherObservation>, WeatherError> {
        let mut out = Vec::new();
        for req in self.plan_request(start, end, Local::now().date_naive()) {
            out.extend(self.send(&req)?);
        }
        Ok(out)
    }
}

#[derive(Debug, Deserialize)]
struct OpenMeteoResponse {
    #[serde(default)]
    error: bool,
    reason: Option<String>,
    daily: Option<OpenMeteoDaily>,
}

#[derive(Debug, Deserialize)]
struct OpenMeteoDaily {
    time: Vec<String>,
    #[serde(flatten)]
    series: HashMap<String, Vec<Option<f64>>>,
}

impl OpenMeteoDaily {
    fn value(&self, key: &str, i: usize) -> Option<f64> {
        self.series.get(key).and_then(|v| v.get(i).copied().flatten())
    }
}

/// Parses an Open-Meteo `daily` payload, keeping days within `start..=end`.
pub fn parse_open_meteo(
    station: &str,
    body: &str,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<Vec<WeatherObservation>, WeatherError> {
    let resp: OpenMeteoResponse = serde_json::from_str(body)?;
    if resp.error {
        return Err(WeatherError::Api(
            resp.reason.unwrap_or_else(|| "unknown error".to_string()),
        ));
    }
    let Some(daily) = resp.daily else {
        return Ok(Vec::new());
    };
    let mut out = Vec::new();
    for (i, t) in daily.time.iter().enumerate() {
        let Ok(date) = NaiveDate::parse_from_str(t, "%Y-%m-%d") else {
            continue;
        };
        if date < start || date > end {
            continue;
        }
        let mut o = WeatherObservation::new(station, date);
        o.temp_high = daily.value("temperature_2m_max", i);
        o.temp_low = daily.value("temperature_2m_min", i);
        o.temp_avg = daily.value("temperature_2m_mean", i);
        o.dewpoint_high = daily.value("dew_point_2m_max", i);
        o.dewpoint_low = daily.value("dew_point_2m_min", i);
        o.dewpoint_avg = daily.value("dew_point_2m_mean", i);
        o.humidity_high = daily.value("relative_humidity_2m_max", i);
        o.humidity_low = daily.value("relative_humidity_2m_min", i);
        o.humidity_avg = daily.value("relative_humidity_2m_mean", i);
        o.wind_max = daily.value("wind_speed_10m_max", i);
        o.pressure_max = daily.value("pressure_msl_max", i);
        o.pressure_min = daily.value("pressure_msl_min", i);
        o.rain_total = daily
            .value("precipitation_sum", i)
            .or_else(|| daily.value("rain_sum", i))
            .unwrap_or(0.0);
        out.push(o);
    }
    Ok(out)
}

pub struct WeatherUnderground {
    api_key: String,
    station: String,
    client: Client,
}

impl WeatherUnderground {
    pub fn new(api_key: &str, station: &str) -> Result<Self, WeatherError> {
        if api_key.trim().is_empty() {
            return Err(WeatherError::Config("wu_api_key is not set".into()));
        }
        if station.trim().is_empty() {
            return Err(WeatherError::Config("station_id is not set".into()));
        }
        Ok(Self {
            api_key: api_key.trim().to_string(),
            station: station.trim().to_string(),
            client: http_client()?,
        })
    }

    fn history_daily(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<WeatherObservation>, WeatherError> {
        let url = format!("{}/history/daily", WU_BASE_URL);
        tracing::info!(station = %self.station, %start, %end, "weather underground request");
        let start_s = start.format("%Y%m%d").to_string();
        let end_s = end.format("%Y%m%d").to_string();
        let resp = self
            .client
            .get(url)
            .query(&[
                ("stationId", self.station.as_str()),
                ("format", "json"),
                ("units", "e"),
                ("numericPrecision", "decimal"),
                ("startDate", start_s.as_str()),
                ("endDate", end_s.as_str()),
                ("apiKey", self.api_key.as_str()),
            ])
            .send()?;
        match read_body(resp)? {
            Some(body) => parse_wu_history(&self.station, &body),
            None => {
                tracing::warn!(%start, %end, "no weather data for range");
                Ok(Vec::new())
            }
        }
    }
}

impl WeatherSource for WeatherUnderground {
    fn station_id(&self) -> String {
        self.station.clone()
    }

    fn fetch_range(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<WeatherObservation>, WeatherError> {
        let mut out = Vec::new();
        for (s, e) in month_chunks(start, end) {
            out.extend(
                self.history_daily(s, e)?
                    .into_iter()
                    .filter(|o| o.date >= start && o.date <= end),
            );
        }
        Ok(out)
    }
}

/// Splits `start..=end` at calendar month boundaries.
pub fn month_chunks(start: NaiveDate, end: NaiveDate) -> Vec<(NaiveDate, NaiveDate)> {
    let mut out = Vec::new();
    let mut cur = start;
    while cur <= end {
        let last = month_end(cur.year(), cur.month()).unwrap_or(end).min(end);
        out.push((cur, last));
        match last.succ_opt() {
            Some(next) => cur = next,
            None => break,
        }
    }
    out
}

#[derive(Debug, Deserialize)]
struct WuHistory {
    #[serde(default)]
    observations: Vec<WuDaily>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WuDaily {
    obs_time_local: Option<String>,
    humidity_high: Option<f64>,
    humidity_low: Option<f64>,
    humidity_avg: Option<f64>,
    #[serde(default)]
    imperial: WuImperial,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WuImperial {
    temp_high: Option<f64>,
    temp_low: Option<f64>,
    temp_avg: Option<f64>,
    windspeed_high: Option<f64>,
    windspeed_avg: Option<f64>,
    windgust_high: Option<f64>,
    dewpt_high: Option<f64>,
    dewpt_low: Option<f64>,
    dewpt_avg: Option<f64>,
    pressure_max: Option<f64>,
    pressure_min: Option<f64>,
    precip_total: Option<f64>,
}

/// Parses a PWS `history/daily` payload. Rows without a readable date are dropped.
pub fn parse_wu_history(station: &str, body: &str) -> Result<Vec<WeatherObservation>, WeatherError> {
    let h: WuHistory = serde_json::from_str(body)?;
    let mut out = Vec::new();
    for d in h.observations {
        let Some(date) = d
            .obs_time_local
            .as_deref()
            .and_then(|s| s.get(..10))
            .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok())
        else {
            continue;
        };
        let mut o = WeatherObservation::new(station, date);
        o.temp_high = d.imperial.temp_high;
        o.temp_avg = d.imperial.temp_avg;
        o.temp_low = d.imperial.temp_low;
        o.dewpoint_high = d.imperial.dewpt_high;
        o.dewpoint_avg = d.imperial.dewpt_avg;
        o.dewpoint_low = d.imperial.dewpt_low;
        o.humidity_high = d.humidity_high;
        o.humidity_avg = d.humidity_avg;
        o.humidity_low = d.humidity_low;
        o.wind_max = d.imperial.windspeed_high;
        o.wind_avg = d.imperial.windspeed_avg;
        o.wind_gust = d.imperial.windgust_high;
        o.pressure_max = d.imperial.pressure_max;
        o.pressure_min = d.imperial.pressure_min;
        o.rain_total = d.imperial.precip_total.unwrap_or(0.0);
        out.push(o);
    }
    Ok(out)
}

pub fn open_meteo_station(latitude: f64, longitude: f64) -> String {
    format!("open-meteo:{:.4},{:.4}", latitude, longitude)
}

/// Station id the configured source stores rows under, without building a client.
pub fn configured_station(s: &WeatherSettings) -> Option<String> {
    match s.source {
        WeatherSourceKind::OpenMeteo => Some(open_meteo_station(s.latitude, s.longitude)),
        WeatherSourceKind::WeatherUnderground => s.station_id.clone(),
    }
}

pub fn source_from_settings(s: &WeatherSettings) -> Result<Box<dyn WeatherSource>, WeatherError> {
    match s.source {
        WeatherSourceKind::OpenMeteo => Ok(Box::new(OpenMeteo::new(
            s.latitude,
            s.longitude,
            &s.timezone,
        )?)),
        WeatherSourceKind::WeatherUnderground => Ok(Box::new(WeatherUnderground::new(
            s.api_key.as_deref().unwrap_or(""),
            s.station_id.as_deref().unwrap_or(""),
        )?)),
    }
}

/// Fetches a range, derives demand, and upserts the rows. Returns rows stored.
pub fn refresh(
    conn: &mut Connection,
    source: &dyn WeatherSource,
    demand: &DemandSettings,
    start: NaiveDate,
    end: NaiveDate,
) -> anyhow::Result<usize> {
    let mut obs = source
        .fetch_range(start, end)
        .with_context(|| format!("Fetch weather {}..{} for {}", start, end, source.station_id()))?;
    for o in obs.iter_mut() {
        demand.apply(o);
    }
    let n = store::upsert_observations(conn, &obs)?;
    tracing::info!(station = %source.station_id(), rows = n, "weather stored");
    Ok(n)
}
