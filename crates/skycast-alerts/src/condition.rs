//! Threshold conditions of the form `<metric> <operator> <number>`.
//!
//! Conditions are parsed once when a job is scheduled and evaluated by
//! matching on the parsed enums at every firing.

use std::fmt;
use std::str::FromStr;

use skycast_weather::Observation;

use crate::error::AlertError;

/// Observation field a condition looks at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Metric {
    /// Temperature in °C
    Temp,
    /// Relative humidity in percent
    Humidity,
    /// Wind speed in km/h
    Wind,
}

impl Metric {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Temp => "temp",
            Self::Humidity => "humidity",
            Self::Wind => "wind",
        }
    }

    pub fn value_of(&self, observation: &Observation) -> f64 {
        match self {
            Self::Temp => observation.temp_c,
            Self::Humidity => observation.humidity,
            Self::Wind => observation.wind_speed_kmph,
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    GreaterThan,
    LessThan,
    Equal,
}

impl Operator {
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::GreaterThan => ">",
            Self::LessThan => "<",
            Self::Equal => "==",
        }
    }

    pub fn holds(&self, value: f64, threshold: f64) -> bool {
        match self {
            Self::GreaterThan => value > threshold,
            Self::LessThan => value < threshold,
            Self::Equal => value == threshold,
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// A parsed alert predicate such as `temp > 30`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Condition {
    pub metric: Metric,
    pub operator: Operator,
    pub threshold: f64,
}

impl Condition {
    /// The observed value when the condition holds for `observation`.
    pub fn evaluate(&self, observation: &Observation) -> Option<f64> {
        let value = self.metric.value_of(observation);
        self.operator.holds(value, self.threshold).then_some(value)
    }
}

impl FromStr for Condition {
    type Err = AlertError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split_whitespace().collect();
        let [metric, operator, threshold] = parts.as_slice() else {
            return Err(AlertError::invalid_condition(
                s,
                "expected `<metric> <operator> <number>`",
            ));
        };

        let metric = match *metric {
            "temp" => Metric::Temp,
            "humidity" => Metric::Humidity,
            "wind" => Metric::Wind,
            other => {
                return Err(AlertError::invalid_condition(
                    s,
                    format!("unknown metric {other:?}, expected temp, humidity or wind"),
                ))
            }
        };

        let operator = match *operator {
            ">" => Operator::GreaterThan,
            "<" => Operator::LessThan,
            "==" => Operator::Equal,
            other => {
                return Err(AlertError::invalid_condition(
                    s,
                    format!("unknown operator {other:?}, expected >, < or =="),
                ))
            }
        };

        let threshold = threshold
            .parse::<f64>()
            .ok()
            .filter(|t| t.is_finite())
            .ok_or_else(|| AlertError::invalid_condition(s, format!("{threshold:?} is not a number")))?;

        Ok(Self {
            metric,
            operator,
            threshold,
        })
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.metric, self.operator, self.threshold)
    }
}
