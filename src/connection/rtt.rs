//! Round-trip time estimation (Jacobson/Karels), as described in spec §4.3.

use std::time::Duration;

use crate::config::Config;

#[derive(Debug, Clone)]
pub struct RttEstimator {
    estimated_rtt: Option<Duration>,
    dev_rtt: Duration,
    rto: Duration,
    min_rto: Duration,
    max_rto: Duration,
}

impl RttEstimator {
    pub fn new(config: &Config) -> Self {
        RttEstimator {
            estimated_rtt: None,
            dev_rtt: Duration::ZERO,
            rto: config.initial_rto,
            min_rto: config.min_rto,
            max_rto: config.max_rto,
        }
    }

    pub fn rto(&self) -> Duration {
        self.rto
    }

    /// Folds one RTT sample into the estimator and recomputes `rto`.
    pub fn sample(&mut self, r: Duration) {
        match self.estimated_rtt {
            None => {
                self.estimated_rtt = Some(r);
                self.dev_rtt = r / 2;
            }
            Some(estimated) => {
                let diff = if r > estimated {
                    r - estimated
                } else {
                    estimated - r
                };
                self.dev_rtt = self.dev_rtt.mul_f64(0.75) + diff.mul_f64(0.25);
                self.estimated_rtt = Some(estimated.mul_f64(0.875) + r.mul_f64(0.125));
            }
        }

        let estimated = self.estimated_rtt.unwrap();
        let rto = estimated + self.dev_rtt * 4;
        self.rto = rto.clamp(self.min_rto, self.max_rto);
    }
}
