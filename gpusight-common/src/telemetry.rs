use serde::{Deserialize, Serialize};

/// Marker the GPU utility prints for a metric it cannot report.
pub const ABSENT_MARKER: &str = "-";

/// A single metric reading as published in a device state payload.
///
/// Serializes untagged, so a state payload reads as plain JSON numbers,
/// strings and `null`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum MetricValue {
    /// Integral reading (clocks, utilisation percentages, temperatures).
    Integer(i64),

    /// Fractional reading.
    Float(f64),

    /// Anything that is not a number.
    Text(String),

    /// The utility reported the absent marker.
    Absent,
}

impl MetricValue {
    /// Interpret a raw, already-trimmed column value.
    pub fn parse(raw: &str) -> Self {
        if raw == ABSENT_MARKER {
            return MetricValue::Absent;
        }
        if let Ok(v) = raw.parse::<i64>() {
            return MetricValue::Integer(v);
        }
        match raw.parse::<f64>() {
            Ok(v) if v.is_finite() => MetricValue::Float(v),
            _ => MetricValue::Text(raw.to_string()),
        }
    }
}

/// Bridge availability as seen by subscribers of the availability topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Availability {
    Online,
    Offline,
}

impl Availability {
    /// Payload string published on the availability topic.
    pub fn as_str(&self) -> &'static str {
        match self {
            Availability::Online => "online",
            Availability::Offline => "offline",
        }
    }
}

impl std::fmt::Display for Availability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_values() {
        assert_eq!(MetricValue::parse("42"), MetricValue::Integer(42));
        assert_eq!(MetricValue::parse("-3"), MetricValue::Integer(-3));
        assert_eq!(MetricValue::parse("71.25"), MetricValue::Float(71.25));
        assert_eq!(MetricValue::parse("-"), MetricValue::Absent);
        assert_eq!(MetricValue::parse("N/A"), MetricValue::Text("N/A".to_string()));
        assert_eq!(MetricValue::parse("nan"), MetricValue::Text("nan".to_string()));
    }

    #[test]
    fn test_value_serialization() {
        let values = vec![
            MetricValue::Integer(7),
            MetricValue::Float(1.5),
            MetricValue::Text("x".to_string()),
            MetricValue::Absent,
        ];
        let json = serde_json::to_string(&values).unwrap();
        assert_eq!(json, r#"[7,1.5,"x",null]"#);
    }

    #[test]
    fn test_availability_display() {
        assert_eq!(Availability::Online.as_str(), "online");
        assert_eq!(format!("{}", Availability::Offline), "offline");
    }
}
