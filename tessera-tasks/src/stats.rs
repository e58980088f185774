use serde::{Deserialize, Serialize};

/// Welford accumulator.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunningStats {
    count: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
}

impl RunningStats {
    pub fn push(&mut self, value: f64) {
        if self.count == 0 {
            self.min = value;
            self.max = value;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);
        }

        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn finish(&self) -> Option<BandStatistics> {
        (self.count > 0).then(|| BandStatistics {
            min: self.min,
            max: self.max,
            mean: self.mean,
            std_dev: (self.m2 / self.count as f64).sqrt(),
            count: self.count,
        })
    }
}

/// Population statistics over the valid samples of a band.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BandStatistics {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std_dev: f64,
    pub count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_closed_form() {
        let mut stats = RunningStats::default();
        for v in [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0] {
            stats.push(v);
        }
        let result = stats.finish().unwrap();
        assert_eq!(result.min, 2.0);
        assert_eq!(result.max, 9.0);
        assert!((result.mean - 5.0).abs() < 1e-12);
        assert!((result.std_dev - 2.0).abs() < 1e-12);
        assert_eq!(result.count, 8);
    }

    #[test]
    fn empty_has_no_statistics() {
        assert_eq!(RunningStats::default().finish(), None);
    }
}
