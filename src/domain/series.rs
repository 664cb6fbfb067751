//! Price and probability series representation.

use chrono::NaiveDate;
use serde::Serialize;

use super::error::ProbtraderError;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PricePoint {
    pub date: NaiveDate,
    pub close: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbabilityPoint {
    pub date: NaiveDate,
    pub probability: f64,
}

/// Probabilities from one model, for one asset and horizon, ordered by date.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbabilitySeries {
    pub model: String,
    pub asset: String,
    pub horizon: u32,
    pub points: Vec<ProbabilityPoint>,
}

impl ProbabilitySeries {
    pub fn new(model: &str, asset: &str, horizon: u32, mut points: Vec<ProbabilityPoint>) -> Self {
        points.sort_by_key(|p| p.date);
        points.dedup_by_key(|p| p.date);
        Self {
            model: model.to_string(),
            asset: asset.to_string(),
            horizon,
            points,
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn get(&self, date: NaiveDate) -> Option<f64> {
        self.points
            .binary_search_by_key(&date, |p| p.date)
            .ok()
            .map(|i| self.points[i].probability)
    }
}

/// One simulator step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Observation {
    pub date: NaiveDate,
    pub price: f64,
    pub probability: f64,
}

impl Observation {
    pub fn new(date: NaiveDate, price: f64, probability: f64) -> Self {
        Self {
            date,
            price,
            probability,
        }
    }
}

pub fn validate_probability(probability: f64) -> Result<(), ProbtraderError> {
    if !probability.is_finite() || !(0.0..=1.0).contains(&probability) {
        return Err(ProbtraderError::data(format!(
            "probability {probability} outside [0, 1]"
        )));
    }
    Ok(())
}

/// Checks prices are positive, probabilities lie in [0, 1] and dates strictly increase.
pub fn validate_observations(observations: &[Observation]) -> Result<(), ProbtraderError> {
    let mut prev: Option<NaiveDate> = None;
    for obs in observations {
        if !obs.price.is_finite() || obs.price <= 0.0 {
            return Err(ProbtraderError::data(format!(
                "non-positive price {} on {}",
                obs.price, obs.date
            )));
        }
        validate_probability(obs.probability).map_err(|_| {
            ProbtraderError::data(format!(
                "probability {} outside [0, 1] on {}",
                obs.probability, obs.date
            ))
        })?;
        if let Some(p) = prev {
            if obs.date <= p {
                return Err(ProbtraderError::data(format!(
                    "dates out of order: {} follows {}",
                    obs.date, p
                )));
            }
        }
        prev = Some(obs.date);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, day).unwrap()
    }

    fn sample_series() -> ProbabilitySeries {
        ProbabilitySeries::new(
            "xgb",
            "AAPL",
            5,
            vec![
                ProbabilityPoint { date: d(3), probability: 0.7 },
                ProbabilityPoint { date: d(1), probability: 0.4 },
                ProbabilityPoint { date: d(2), probability: 0.55 },
            ],
        )
    }

    #[test]
    fn new_sorts_points_by_date() {
        let s = sample_series();
        let dates: Vec<_> = s.points.iter().map(|p| p.date).collect();
        assert_eq!(dates, vec![d(1), d(2), d(3)]);
    }

    #[test]
    fn get_finds_probability_by_date() {
        let s = sample_series();
        assert_eq!(s.get(d(2)), Some(0.55));
        assert_eq!(s.get(d(9)), None);
    }

    #[test]
    fn validate_rejects_non_positive_price() {
        let obs = vec![Observation::new(d(1), 0.0, 0.5)];
        assert!(matches!(
            validate_observations(&obs),
            Err(ProbtraderError::Data { .. })
        ));
    }

    #[test]
    fn validate_rejects_probability_out_of_range() {
        let obs = vec![Observation::new(d(1), 10.0, 1.2)];
        assert!(matches!(
            validate_observations(&obs),
            Err(ProbtraderError::Data { .. })
        ));
        let obs = vec![Observation::new(d(1), 10.0, f64::NAN)];
        assert!(validate_observations(&obs).is_err());
    }

    #[test]
    fn validate_rejects_unordered_dates() {
        let obs = vec![
            Observation::new(d(2), 10.0, 0.5),
            Observation::new(d(1), 10.0, 0.5),
        ];
        assert!(validate_observations(&obs).is_err());
    }

    #[test]
    fn validate_accepts_boundaries() {
        let obs = vec![
            Observation::new(d(1), 10.0, 0.0),
            Observation::new(d(2), 10.0, 1.0),
        ];
        assert!(validate_observations(&obs).is_ok());
    }
}
