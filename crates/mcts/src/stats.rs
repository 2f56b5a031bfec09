//! Running min-max value normalization.

/// Running (min, max) over backed-up values for one (lane, batch element).
///
/// A fresh tracker has `min = +inf` and `max = -inf`, so `normalize` passes
/// values through until at least two distinct values were seen.
#[derive(Clone, Debug, PartialEq)]
pub struct MinMaxStats {
    minimum: f32,
    maximum: f32,
    value_delta_max: f32,
}

impl MinMaxStats {
    pub fn new(value_delta_max: f32) -> Self {
        Self {
            minimum: f32::INFINITY,
            maximum: f32::NEG_INFINITY,
            value_delta_max,
        }
    }

    pub fn update(&mut self, value: f32) {
        if value > self.maximum {
            self.maximum = value;
        }
        if value < self.minimum {
            self.minimum = value;
        }
    }

    /// Rescale `value` into the observed range.
    ///
    /// Returns `value` unchanged while the range is empty or degenerate;
    /// otherwise `(value - min) / max(max - min, value_delta_max)`.
    pub fn normalize(&self, value: f32) -> f32 {
        let delta = self.maximum - self.minimum;
        if delta > 0.0 {
            (value - self.minimum) / delta.max(self.value_delta_max)
        } else {
            value
        }
    }

    pub fn min(&self) -> f32 {
        self.minimum
    }

    pub fn max(&self) -> f32 {
        self.maximum
    }

    pub fn is_empty(&self) -> bool {
        self.maximum < self.minimum
    }
}

/// One tracker per (lane, batch element), stored lane-major.
#[derive(Clone, Debug)]
pub struct MinMaxStatsGrid {
    num: usize,
    stats: Vec<MinMaxStats>,
}

impl MinMaxStatsGrid {
    pub fn new(searches: usize, num: usize, value_delta_max: f32) -> Self {
        Self {
            num,
            stats: vec![MinMaxStats::new(value_delta_max); searches * num],
        }
    }

    pub fn get(&self, lane: usize, batch: usize) -> &MinMaxStats {
        &self.stats[lane * self.num + batch]
    }

    pub fn get_mut(&mut self, lane: usize, batch: usize) -> &mut MinMaxStats {
        &mut self.stats[lane * self.num + batch]
    }

    pub fn len(&self) -> usize {
        self.stats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stats.is_empty()
    }
}
