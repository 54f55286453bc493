use serde::{Deserialize, Serialize};

use crate::numeric::{format_number, round_half_up};

pub const DEFAULT_MAX_DECIMALS: u32 = 6;

/// Text encoding of a sampling ratio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SamplingRatioFormat {
    /// `50%`
    #[default]
    #[serde(rename = "%")]
    Percent,
    /// `1/2`, the inverse of the ratio as a coefficient.
    #[serde(rename = "1/w")]
    InverseCoefficient,
}

impl SamplingRatioFormat {
    pub fn symbol(&self) -> &'static str {
        match self {
            SamplingRatioFormat::Percent => "%",
            SamplingRatioFormat::InverseCoefficient => "1/w",
        }
    }

    /// Guess the format of a text, falling back to `default`.
    pub fn detect(text: Option<&str>, default: SamplingRatioFormat) -> SamplingRatioFormat {
        match text.map(str::trim) {
            Some(t) if t.ends_with('%') => SamplingRatioFormat::Percent,
            Some(t) if t.starts_with("1/") => SamplingRatioFormat::InverseCoefficient,
            _ => default,
        }
    }

    /// Form value shown to the user for a model ratio (0..1).
    pub fn to_form_value(&self, ratio: f64, max_decimals: u32) -> Option<f64> {
        match self {
            SamplingRatioFormat::Percent => {
                let decimals = max_decimals.saturating_sub(2);
                Some(round_half_up(ratio * 100.0, decimals).min(100.0))
            }
            SamplingRatioFormat::InverseCoefficient => {
                if ratio <= 0.0 {
                    None
                } else {
                    Some(round_half_up(1.0 / ratio, 0))
                }
            }
        }
    }

    /// Model ratio (0..1) for a form value.
    pub fn to_model_value(&self, form_value: f64, max_decimals: u32) -> Option<f64> {
        match self {
            SamplingRatioFormat::Percent => {
                Some(round_half_up(form_value / 100.0, max_decimals).min(1.0))
            }
            SamplingRatioFormat::InverseCoefficient => {
                if form_value <= 0.0 {
                    None
                } else {
                    Some(round_half_up(1.0 / form_value, max_decimals).min(1.0))
                }
            }
        }
    }

    /// Text encoding of a model ratio.
    pub fn format(&self, ratio: f64, max_decimals: u32) -> Option<String> {
        let value = self.to_form_value(ratio, max_decimals)?;
        Some(match self {
            SamplingRatioFormat::Percent => format!("{}%", format_number(value)),
            SamplingRatioFormat::InverseCoefficient => format!("1/{}", format_number(value)),
        })
    }

    /// Parse a ratio text: `n/d` fractions, `x%` percents, or a bare number
    /// interpreted in this format.
    pub fn parse(&self, text: &str, max_decimals: u32) -> Option<f64> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        if let Some((num, den)) = text.split_once('/') {
            let num: f64 = num.trim().parse().ok()?;
            let den: f64 = den.trim().parse().ok()?;
            if den == 0.0 {
                return None;
            }
            return Some(round_half_up(num / den, max_decimals));
        }
        if let Some(percent) = text.strip_suffix('%') {
            let value: f64 = percent.trim().parse().ok()?;
            return SamplingRatioFormat::Percent.to_model_value(value, max_decimals);
        }
        let value: f64 = text.parse().ok()?;
        self.to_model_value(value, max_decimals)
    }

    /// A ratio text was produced by the engine, not typed in this format.
    pub fn is_computed_text(&self, text: Option<&str>) -> bool {
        let Some(text) = text.map(str::trim).filter(|t| !t.is_empty()) else {
            return false;
        };
        match self {
            SamplingRatioFormat::Percent => !text.ends_with('%') || text.contains('/'),
            SamplingRatioFormat::InverseCoefficient => !text.starts_with("1/"),
        }
    }
}

/// `"<samplingWeight>/<totalWeight>"`
pub fn fraction_text(sampling_weight: f64, total_weight: f64) -> String {
    format!("{}/{}", format_number(sampling_weight), format_number(total_weight))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn percent_round_trip() {
        let f = SamplingRatioFormat::Percent;
        assert_eq!(f.format(0.5, DEFAULT_MAX_DECIMALS).as_deref(), Some("50%"));
        assert_relative_eq!(f.parse("50%", DEFAULT_MAX_DECIMALS).unwrap(), 0.5);
        assert_relative_eq!(f.parse("12.5", DEFAULT_MAX_DECIMALS).unwrap(), 0.125);
        assert_eq!(f.to_form_value(1.2, DEFAULT_MAX_DECIMALS), Some(100.0));
    }

    #[test]
    fn inverse_coefficient() {
        let f = SamplingRatioFormat::InverseCoefficient;
        assert_eq!(f.format(0.25, DEFAULT_MAX_DECIMALS).as_deref(), Some("1/4"));
        assert_relative_eq!(f.parse("1/4", DEFAULT_MAX_DECIMALS).unwrap(), 0.25);
        assert_relative_eq!(f.parse("8", DEFAULT_MAX_DECIMALS).unwrap(), 0.125);
        assert_eq!(f.format(0.0, DEFAULT_MAX_DECIMALS), None);
    }

    #[test]
    fn fraction_texts() {
        assert_eq!(fraction_text(5.0, 10.0), "5/10");
        let ratio = SamplingRatioFormat::Percent.parse("12/34", DEFAULT_MAX_DECIMALS).unwrap();
        assert_relative_eq!(ratio, 0.352941);
        assert_eq!(SamplingRatioFormat::Percent.parse("3/0", 6), None);
    }

    #[test]
    fn computed_text_detection() {
        let pct = SamplingRatioFormat::Percent;
        assert!(!pct.is_computed_text(Some("50%")));
        assert!(pct.is_computed_text(Some("5/10")));
        assert!(!pct.is_computed_text(None));
        let inv = SamplingRatioFormat::InverseCoefficient;
        assert!(!inv.is_computed_text(Some("1/3")));
        assert!(inv.is_computed_text(Some("2/7")));
    }

    #[test]
    fn detects_format() {
        use SamplingRatioFormat::*;
        assert_eq!(SamplingRatioFormat::detect(Some("30%"), InverseCoefficient), Percent);
        assert_eq!(SamplingRatioFormat::detect(Some("1/3"), Percent), InverseCoefficient);
        assert_eq!(SamplingRatioFormat::detect(None, InverseCoefficient), InverseCoefficient);
    }
}
