use std::fmt;
use std::str::FromStr;

/// A summary statistic computed over the values of a distribution.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Statistic {
    /// The smallest value.
    Min,
    /// The largest value.
    Max,
    /// The arithmetic mean.
    Mean,
    /// The 50th percentile.
    Median,
    /// The sum of all values.
    Sum,
    /// The number of values.
    Count,
    /// The last value in observation order.
    Last,
    /// A percentile between 1 and 99, using the nearest-rank method.
    Percentile(u8),
}

impl Statistic {
    /// The statistics reported for distributions unless configured otherwise.
    pub const DEFAULT: &'static [Statistic] = &[
        Statistic::Min,
        Statistic::Median,
        Statistic::Percentile(95),
        Statistic::Percentile(99),
        Statistic::Max,
        Statistic::Mean,
        Statistic::Count,
        Statistic::Sum,
    ];

    /// Returns the default list of statistics as an owned vector.
    pub fn defaults() -> Vec<Statistic> {
        Self::DEFAULT.to_vec()
    }
}

impl fmt::Display for Statistic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Min => f.write_str("min"),
            Self::Max => f.write_str("max"),
            Self::Mean => f.write_str("mean"),
            Self::Median => f.write_str("median"),
            Self::Sum => f.write_str("sum"),
            Self::Count => f.write_str("count"),
            Self::Last => f.write_str("last"),
            Self::Percentile(p) => write!(f, "p{p}"),
        }
    }
}

/// An error returned when parsing an unknown [`Statistic`].
#[derive(Clone, Copy, Debug)]
pub struct ParseStatisticError(());

impl fmt::Display for ParseStatisticError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("unknown statistic")
    }
}

impl std::error::Error for ParseStatisticError {}

impl FromStr for Statistic {
    type Err = ParseStatisticError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "min" => Self::Min,
            "max" => Self::Max,
            "mean" => Self::Mean,
            "median" => Self::Median,
            "sum" => Self::Sum,
            "count" => Self::Count,
            "last" => Self::Last,
            other => {
                let percentile = other
                    .strip_prefix('p')
                    .filter(|digits| digits.bytes().all(|b| b.is_ascii_digit()))
                    .and_then(|digits| digits.parse::<u8>().ok())
                    .filter(|p| (1..=99).contains(p))
                    .ok_or(ParseStatisticError(()))?;
                Self::Percentile(percentile)
            }
        })
    }
}

tally_common::impl_str_serde!(Statistic, "a statistic such as `mean` or `p95`");

/// Precomputed view over the values of a distribution.
///
/// Values are sorted once, so any number of statistics can be read without re-sorting.
#[derive(Clone, Debug)]
pub struct Summary {
    sorted: Vec<f64>,
    last: f64,
    sum: f64,
}

impl Summary {
    /// Creates a summary of values given in observation order.
    ///
    /// Returns `None` if there are no values.
    pub fn new(values: &[f64]) -> Option<Self> {
        let last = *values.last()?;

        let mut sorted = values.to_vec();
        sorted.sort_unstable_by(f64::total_cmp);

        Some(Self {
            sum: sorted.iter().sum(),
            sorted,
            last,
        })
    }

    /// Returns the value of the given statistic.
    pub fn get(&self, statistic: Statistic) -> f64 {
        let count = self.sorted.len();
        match statistic {
            Statistic::Min => self.sorted[0],
            Statistic::Max => self.sorted[count - 1],
            Statistic::Mean => self.sum / count as f64,
            Statistic::Median => self.percentile(50),
            Statistic::Sum => self.sum,
            Statistic::Count => count as f64,
            Statistic::Last => self.last,
            Statistic::Percentile(p) => self.percentile(p),
        }
    }

    /// Nearest-rank percentile: the smallest value such that at least `p` percent of all values
    /// are less than or equal to it.
    fn percentile(&self, p: u8) -> f64 {
        let count = self.sorted.len();
        let rank = (usize::from(p) * count).div_ceil(100).clamp(1, count);
        self.sorted[rank - 1]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_statistics() {
        let parsed: Vec<Statistic> =
            serde_json::from_str(r#"["min","median","p95","p99","max","mean","count","sum"]"#)
                .unwrap();
        assert_eq!(parsed, Statistic::defaults());

        assert_eq!("last".parse::<Statistic>().unwrap(), Statistic::Last);
        assert_eq!("p5".parse::<Statistic>().unwrap(), Statistic::Percentile(5));
    }

    #[test]
    fn test_parse_invalid_statistics() {
        for input in ["p0", "p100", "p", "p+5", "avg", "P95"] {
            assert!(input.parse::<Statistic>().is_err(), "{input}");
        }
    }

    #[test]
    fn test_statistic_display() {
        let names: Vec<String> = Statistic::DEFAULT.iter().map(ToString::to_string).collect();
        assert_eq!(
            names,
            ["min", "median", "p95", "p99", "max", "mean", "count", "sum"]
        );
    }

    #[test]
    fn test_summary_empty() {
        assert!(Summary::new(&[]).is_none());
    }

    #[test]
    fn test_summary_small() {
        let summary = Summary::new(&[3.0, 1.0, 4.0, 2.0]).unwrap();

        assert_eq!(summary.get(Statistic::Min), 1.0);
        assert_eq!(summary.get(Statistic::Max), 4.0);
        assert_eq!(summary.get(Statistic::Mean), 2.5);
        assert_eq!(summary.get(Statistic::Median), 2.0);
        assert_eq!(summary.get(Statistic::Sum), 10.0);
        assert_eq!(summary.get(Statistic::Count), 4.0);
        assert_eq!(summary.get(Statistic::Last), 2.0);
        assert_eq!(summary.get(Statistic::Percentile(95)), 4.0);
        assert_eq!(summary.get(Statistic::Percentile(99)), 4.0);
        assert_eq!(summary.get(Statistic::Percentile(25)), 1.0);
    }

    #[test]
    fn test_summary_percentiles() {
        let values: Vec<f64> = (1..=100).map(f64::from).collect();
        let summary = Summary::new(&values).unwrap();

        assert_eq!(summary.get(Statistic::Percentile(1)), 1.0);
        assert_eq!(summary.get(Statistic::Median), 50.0);
        assert_eq!(summary.get(Statistic::Percentile(95)), 95.0);
        assert_eq!(summary.get(Statistic::Percentile(99)), 99.0);
    }

    #[test]
    fn test_summary_single_value() {
        let summary = Summary::new(&[7.0]).unwrap();
        for statistic in [Statistic::Min, Statistic::Median, Statistic::Percentile(99)] {
            assert_eq!(summary.get(statistic), 7.0);
        }
    }
}
