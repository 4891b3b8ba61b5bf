use rand::Rng;
use std::{error::Error, fmt};

/// Table-plus-rejection sampler for an arbitrary discrete distribution.
///
/// Index `i` gets `ceil(w[i] / bin_size)` table cells and a per-index
/// acceptance probability `w[i] / (cells[i] * bin_size)`. A draw picks a
/// uniform cell and accepts with that probability, retrying on rejection.
/// With the default bin size (the smallest positive weight) the expected
/// number of iterations per draw stays close to one for realistic weight
/// vectors.
#[derive(Clone, Debug)]
pub struct DiscreteDistribution {
    table: Vec<u32>,
    p_accept: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DistError {
    Empty,
    InvalidWeight { index: usize },
    NoPositiveWeight,
}

impl fmt::Display for DistError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DistError::Empty => write!(f, "weight vector is empty"),
            DistError::InvalidWeight { index } => {
                write!(f, "weight at index {index} is negative or not finite")
            }
            DistError::NoPositiveWeight => write!(f, "weight vector has no positive entry"),
        }
    }
}

impl Error for DistError {}

impl DiscreteDistribution {
    /// Build a sampler using the smallest positive weight as the bin size.
    pub fn new(weights: &[f64]) -> Result<Self, DistError> {
        Self::with_bin_size(weights, None)
    }

    pub fn with_bin_size(weights: &[f64], bin_size: Option<f64>) -> Result<Self, DistError> {
        if weights.is_empty() {
            return Err(DistError::Empty);
        }
        for (index, &w) in weights.iter().enumerate() {
            if !w.is_finite() || w < 0.0 {
                return Err(DistError::InvalidWeight { index });
            }
        }
        let min_positive = weights
            .iter()
            .copied()
            .filter(|&w| w > 0.0)
            .fold(f64::INFINITY, f64::min);
        if !min_positive.is_finite() {
            return Err(DistError::NoPositiveWeight);
        }
        let bin_size = bin_size.unwrap_or(min_positive);

        let mut table = Vec::new();
        let mut p_accept = vec![0.0; weights.len()];
        for (index, &w) in weights.iter().enumerate() {
            let n_cells = (w / bin_size).ceil() as usize;
            if n_cells == 0 {
                continue;
            }
            p_accept[index] = w / (n_cells as f64 * bin_size);
            table.extend(std::iter::repeat(index as u32).take(n_cells));
        }
        Ok(Self { table, p_accept })
    }

    /// Draw an index with probability proportional to its weight.
    pub fn next_discrete<R: Rng + ?Sized>(&self, rng: &mut R) -> usize {
        loop {
            let value = self.table[rng.random_range(0..self.table.len())] as usize;
            if rng.random::<f64>() < self.p_accept[value] {
                return value;
            }
        }
    }

    /// Draw an index, then spread it uniformly over the unit interval above it.
    pub fn next_continuous<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        self.next_discrete(rng) as f64 + rng.random::<f64>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha12Rng;

    #[test]
    fn rejects_degenerate_weight_vectors() {
        assert_eq!(DiscreteDistribution::new(&[]).unwrap_err(), DistError::Empty);
        assert_eq!(
            DiscreteDistribution::new(&[0.0, 0.0]).unwrap_err(),
            DistError::NoPositiveWeight
        );
        assert_eq!(
            DiscreteDistribution::new(&[1.0, -0.5]).unwrap_err(),
            DistError::InvalidWeight { index: 1 }
        );
    }

    #[test]
    fn zero_weight_indices_are_never_drawn() {
        let dist = DiscreteDistribution::new(&[1.0, 0.0, 3.0]).unwrap();
        let mut rng = ChaCha12Rng::seed_from_u64(7);
        for _ in 0..2_000 {
            assert_ne!(dist.next_discrete(&mut rng), 1);
        }
    }

    #[test]
    fn draw_frequencies_match_weights() {
        let weights = [1.0, 2.0, 4.0, 1.0];
        let dist = DiscreteDistribution::new(&weights).unwrap();
        let mut rng = ChaCha12Rng::seed_from_u64(42);
        let n = 80_000;
        let mut counts = [0usize; 4];
        for _ in 0..n {
            counts[dist.next_discrete(&mut rng)] += 1;
        }
        let total: f64 = weights.iter().sum();
        for (i, &w) in weights.iter().enumerate() {
            let expected = w / total;
            let observed = counts[i] as f64 / n as f64;
            assert!(
                (observed - expected).abs() < 0.01,
                "index {i}: observed {observed}, expected {expected}"
            );
        }
    }

    #[test]
    fn continuous_draws_stay_within_the_drawn_year() {
        let dist = DiscreteDistribution::new(&[0.0, 1.0]).unwrap();
        let mut rng = ChaCha12Rng::seed_from_u64(9);
        for _ in 0..500 {
            let x = dist.next_continuous(&mut rng);
            assert!((1.0..2.0).contains(&x));
        }
    }
}
