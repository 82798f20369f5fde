use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Voxel counts scored against the ground truth at one reconstruction step.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Confusion {
    pub tp: f64,
    pub tn: f64,
    pub fp: f64,
    pub fn_: f64,
}

/// `num / den`, or NaN when the denominator is zero.
fn ratio(num: f64, den: f64) -> f64 {
    if den == 0.0 {
        f64::NAN
    } else {
        num / den
    }
}

impl Confusion {
    pub fn new(tp: f64, tn: f64, fp: f64, fn_: f64) -> Self {
        Self { tp, tn, fp, fn_ }
    }

    pub fn accuracy(&self) -> f64 {
        ratio(self.tp + self.tn, self.tp + self.tn + self.fp + self.fn_)
    }

    pub fn precision(&self) -> f64 {
        ratio(self.tp, self.tp + self.fp)
    }

    /// True positive rate.
    pub fn sensitivity(&self) -> f64 {
        ratio(self.tp, self.tp + self.fn_)
    }

    /// True negative rate.
    pub fn specificity(&self) -> f64 {
        ratio(self.tn, self.tn + self.fp)
    }

    pub fn balanced_accuracy(&self) -> f64 {
        0.5 * (self.sensitivity() + self.specificity())
    }

    /// False positive rate.
    pub fn fall_out(&self) -> f64 {
        ratio(self.fp, self.fp + self.tn)
    }

    /// False negative rate.
    pub fn miss_rate(&self) -> f64 {
        ratio(self.fn_, self.fn_ + self.tp)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Metric {
    Accuracy,
    Precision,
    Sensitivity,
    Specificity,
    BalancedAccuracy,
    FallOut,
    MissRate,
    TruePositive,
    TrueNegative,
    FalsePositive,
    FalseNegative,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("The option {name} is not a valid plotting option. Expected one of: {expected}")]
pub struct MetricParseError {
    pub name: String,
    pub expected: String,
}

impl Metric {
    pub const ALL: [Metric; 11] = [
        Metric::Accuracy,
        Metric::Precision,
        Metric::Sensitivity,
        Metric::Specificity,
        Metric::BalancedAccuracy,
        Metric::FallOut,
        Metric::MissRate,
        Metric::TruePositive,
        Metric::TrueNegative,
        Metric::FalsePositive,
        Metric::FalseNegative,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::Accuracy => "accuracy",
            Metric::Precision => "precision",
            Metric::Sensitivity => "sensitivity",
            Metric::Specificity => "specificity",
            Metric::BalancedAccuracy => "balanced-accuracy",
            Metric::FallOut => "fall-out",
            Metric::MissRate => "miss-rate",
            Metric::TruePositive => "true-positive",
            Metric::TrueNegative => "true-negative",
            Metric::FalsePositive => "false-positive",
            Metric::FalseNegative => "false-negative",
        }
    }

    /// Ratios are drawn on a fixed 0..1.1 axis, counts on an axis fitted to the data.
    pub fn is_ratio(&self) -> bool {
        !matches!(
            self,
            Metric::TruePositive | Metric::TrueNegative | Metric::FalsePositive | Metric::FalseNegative
        )
    }

    pub fn evaluate(&self, c: &Confusion) -> f64 {
        match self {
            Metric::Accuracy => c.accuracy(),
            Metric::Precision => c.precision(),
            Metric::Sensitivity => c.sensitivity(),
            Metric::Specificity => c.specificity(),
            Metric::BalancedAccuracy => c.balanced_accuracy(),
            Metric::FallOut => c.fall_out(),
            Metric::MissRate => c.miss_rate(),
            Metric::TruePositive => c.tp,
            Metric::TrueNegative => c.tn,
            Metric::FalsePositive => c.fp,
            Metric::FalseNegative => c.fn_,
        }
    }

    /// Name as it appears in figure file names: first letter upper case,
    /// the rest lower case (`Balanced-accuracy`).
    pub fn file_label(&self) -> String {
        let name = self.as_str();
        let mut chars = name.chars();
        match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect(),
            None => String::new(),
        }
    }

    pub fn names() -> String {
        Self::ALL
            .iter()
            .map(|m| m.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Metric {
    type Err = MetricParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| MetricParseError {
                name: s.to_string(),
                expected: Self::names(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-3
    }

    #[test]
    fn reference_confusion_values() {
        let c = Confusion::new(80.0, 10.0, 5.0, 5.0);
        assert!(close(c.accuracy(), 0.9));
        assert!(close(c.precision(), 80.0 / 85.0));
        assert!(close(c.precision(), 0.941));
        assert!(close(c.sensitivity(), 0.941));
        assert!(close(c.specificity(), 10.0 / 15.0));
        assert!(close(c.balanced_accuracy(), 0.804));
        assert!(close(c.fall_out(), 5.0 / 15.0));
        assert!(close(c.miss_rate(), 5.0 / 85.0));
        assert!(close(c.fall_out(), 1.0 - c.specificity()));
        assert!(close(c.miss_rate(), 1.0 - c.sensitivity()));
    }

    #[test]
    fn zero_denominator_is_nan() {
        let empty = Confusion::default();
        for metric in Metric::ALL.iter().filter(|m| m.is_ratio()) {
            assert!(metric.evaluate(&empty).is_nan(), "{}", metric);
        }
        let no_negatives = Confusion::new(10.0, 0.0, 0.0, 0.0);
        assert!(no_negatives.specificity().is_nan());
        assert!(no_negatives.balanced_accuracy().is_nan());
        assert_eq!(no_negatives.sensitivity(), 1.0);
    }

    #[test]
    fn counts_pass_through() {
        let c = Confusion::new(1.0, 2.0, 3.0, 4.0);
        let counts: Vec<_> = Metric::ALL
            .iter()
            .filter(|m| !m.is_ratio())
            .map(|m| m.evaluate(&c))
            .collect();
        assert_eq!(counts, vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn metric_names_round_trip_and_reject_unknown() {
        for metric in Metric::ALL {
            assert_eq!(metric.as_str().parse::<Metric>(), Ok(metric));
        }
        let err = "recall".parse::<Metric>().expect_err("unknown");
        assert!(err.to_string().contains("not a valid plotting option"));
        assert!(err.expected.contains("balanced-accuracy"));
    }

    #[test]
    fn file_label_capitalizes_first_letter_only() {
        assert_eq!(Metric::Accuracy.file_label(), "Accuracy");
        assert_eq!(Metric::BalancedAccuracy.file_label(), "Balanced-accuracy");
        assert_eq!(Metric::FalseNegative.file_label(), "False-negative");
    }
}
