// Copyright (c) 2025 Soumyadip Sarkar.
// All rights reserved.
//
// This source code is licensed under the license found in the
// LICENSE file in the root directory of this source tree.

//! Degree-day style heating and cooling demand.
//!
//! Cooling demand ramps linearly from 0 at `cooling_min` to 1 at `cooling_max`
//! on the daily high. Heating demand ramps from 0 at `heating_max` to -1 at
//! `heating_min` on the daily low.

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::models::{Demand, WeatherObservation};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DemandSettings {
    pub heating_min: f64,
    pub heating_max: f64,
    pub cooling_min: f64,
    pub cooling_max: f64,
    pub k_factor: f64,
}

impl Default for DemandSettings {
    fn default() -> Self {
        Self {
            heating_min: 15.0,
            heating_max: 54.0,
            cooling_min: 78.0,
            cooling_max: 96.0,
            k_factor: 2.25,
        }
    }
}

impl DemandSettings {
    pub fn validate(&self) -> Result<()> {
        if self.heating_min >= self.heating_max {
            return Err(anyhow!(
                "heating_min_temp ({}) must be below heating_max_temp ({})",
                self.heating_min,
                self.heating_max
            ));
        }
        if self.cooling_min >= self.cooling_max {
            return Err(anyhow!(
                "cooling_min_temp ({}) must be below cooling_max_temp ({})",
                self.cooling_min,
                self.cooling_max
            ));
        }
        if self.k_factor <= 0.0 {
            return Err(anyhow!("k_factor must be positive, got {}", self.k_factor));
        }
        Ok(())
    }

    pub fn cooling(&self, temp_high: Option<f64>) -> f64 {
        match temp_high {
            Some(t) if t > self.cooling_min => {
                if t >= self.cooling_max {
                    1.0
                } else {
                    (t - self.cooling_min) / (self.cooling_max - self.cooling_min)
                }
            }
            _ => 0.0,
        }
    }

    pub fn heating(&self, temp_low: Option<f64>) -> f64 {
        match temp_low {
            Some(t) if t < self.heating_max => {
                if t <= self.heating_min {
                    -1.0
                } else {
                    -(self.heating_max - t) / (self.heating_max - self.heating_min)
                }
            }
            _ => 0.0,
        }
    }

    pub fn demand(&self, temp_high: Option<f64>, temp_low: Option<f64>) -> Demand {
        let cooling = self.cooling(temp_high);
        let heating = self.heating(temp_low);
        Demand {
            cooling,
            heating,
            max: cooling.max(heating.abs()),
        }
    }

    pub fn apply(&self, obs: &mut WeatherObservation) {
        obs.demand = Some(self.demand(obs.temp_high, obs.temp_low));
    }
}

/// Expected cost-per-day deviation for a demand deviation, via a K-th root.
///
/// Both arguments and the result are fractions (0.05 = 5%). The root
/// compresses large swings: `sign(d) * |100 d|^(1/k) / 100`.
pub fn expected_cpd_pct(demand_pct: f64, k_factor: f64) -> f64 {
    if demand_pct == 0.0 || k_factor == 0.0 {
        return 0.0;
    }
    let sign = demand_pct.signum();
    sign * (demand_pct.abs() * 100.0).powf(1.0 / k_factor) / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn cooling_ramps_between_thresholds() {
        let s = DemandSettings::default();
        assert_eq!(s.cooling(Some(70.0)), 0.0);
        assert_eq!(s.cooling(Some(78.0)), 0.0);
        assert!(close(s.cooling(Some(87.0)), 0.5));
        assert_eq!(s.cooling(Some(96.0)), 1.0);
        assert_eq!(s.cooling(Some(104.0)), 1.0);
        assert_eq!(s.cooling(None), 0.0);
    }

    #[test]
    fn heating_is_negative_and_clamped() {
        let s = DemandSettings::default();
        assert_eq!(s.heating(Some(60.0)), 0.0);
        assert_eq!(s.heating(Some(54.0)), 0.0);
        assert!(close(s.heating(Some(34.5)), -0.5));
        assert_eq!(s.heating(Some(15.0)), -1.0);
        assert_eq!(s.heating(Some(-3.0)), -1.0);
        assert_eq!(s.heating(None), 0.0);
    }

    #[test]
    fn max_demand_takes_larger_magnitude() {
        let s = DemandSettings::default();
        let d = s.demand(Some(87.0), Some(24.75));
        assert!(close(d.cooling, 0.5));
        assert!(close(d.heating, -0.75));
        assert!(close(d.max, 0.75));
    }

    #[test]
    fn expected_cpd_uses_kth_root() {
        assert_eq!(expected_cpd_pct(0.0, 2.25), 0.0);
        assert_eq!(expected_cpd_pct(0.1, 0.0), 0.0);
        // 16% demand above average with k=2 -> 4% expected
        assert!(close(expected_cpd_pct(0.16, 2.0), 0.04));
        assert!(close(expected_cpd_pct(-0.16, 2.0), -0.04));
    }

    #[test]
    fn validate_rejects_inverted_ranges() {
        let s = DemandSettings {
            heating_min: 60.0,
            ..Default::default()
        };
        assert!(s.validate().is_err());
        assert!(DemandSettings::default().validate().is_ok());
    }
}
