/// Isolation forest outlier model.
///
/// Each tree is grown on a random subsample (without replacement) by picking
/// a random feature and a uniform split between that feature's min and max,
/// until a node holds one row or the height limit ceil(log2(psi)) is reached.
/// Anomalous rows isolate in fewer splits, so their mean path length is short.

use rand::rngs::StdRng;
use rand::seq::index;
use rand::{Rng, SeedableRng};

const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

#[derive(Debug, Clone)]
enum Node {
    Leaf {
        size: usize,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

#[derive(Debug, Clone)]
struct Tree {
    nodes: Vec<Node>,
}

impl Tree {
    fn path_length(&self, x: &[f64]) -> f64 {
        let mut idx = 0;
        let mut depth = 0.0;
        loop {
            match &self.nodes[idx] {
                Node::Leaf { size } => return depth + average_path_length(*size),
                Node::Split { feature, threshold, left, right } => {
                    idx = if x[*feature] < *threshold { *left } else { *right };
                    depth += 1.0;
                }
            }
        }
    }
}

/// Average path length of an unsuccessful BST search over `n` points, c(n).
pub fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

struct TreeBuilder<'a> {
    data: &'a [Vec<f64>],
    n_features: usize,
    max_depth: usize,
    nodes: Vec<Node>,
}

impl TreeBuilder<'_> {
    fn grow(&mut self, rows: &[usize], depth: usize, rng: &mut StdRng) -> usize {
        let id = self.nodes.len();
        self.nodes.push(Node::Leaf { size: rows.len() });
        if rows.len() <= 1 || depth >= self.max_depth {
            return id;
        }

        // Only features that still vary within this node can split it.
        let ranges: Vec<(usize, f64, f64)> = (0..self.n_features)
            .filter_map(|f| {
                let (lo, hi) = rows.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &r| {
                    let v = self.data[r][f];
                    (lo.min(v), hi.max(v))
                });
                (hi > lo).then_some((f, lo, hi))
            })
            .collect();
        if ranges.is_empty() {
            return id;
        }

        let (feature, lo, hi) = ranges[rng.random_range(0..ranges.len())];
        let threshold = rng.random_range(lo..hi);
        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) =
            rows.iter().copied().partition(|&r| self.data[r][feature] < threshold);

        let left = self.grow(&left_rows, depth + 1, rng);
        let right = self.grow(&right_rows, depth + 1, rng);
        self.nodes[id] = Node::Split { feature, threshold, left, right };
        id
    }
}

#[derive(Debug, Clone)]
pub struct IsolationForest {
    trees: Vec<Tree>,
    sample_size: usize,
    n_features: usize,
}

impl IsolationForest {
    /// Fit on a row-major matrix. `None` for an empty or ragged matrix.
    pub fn fit(data: &[Vec<f64>], n_trees: usize, sample_size: usize, seed: u64) -> Option<Self> {
        let n_features = data.first()?.len();
        if n_features == 0 || data.iter().any(|row| row.len() != n_features) {
            return None;
        }
        let psi = sample_size.clamp(1, data.len());
        let max_depth = (psi as f64).log2().ceil().max(1.0) as usize;
        let mut rng = StdRng::seed_from_u64(seed);

        let trees = (0..n_trees.max(1))
            .map(|_| {
                let rows = index::sample(&mut rng, data.len(), psi).into_vec();
                let mut builder = TreeBuilder {
                    data,
                    n_features,
                    max_depth,
                    nodes: Vec::new(),
                };
                builder.grow(&rows, 0, &mut rng);
                Tree { nodes: builder.nodes }
            })
            .collect();

        Some(Self {
            trees,
            sample_size: psi,
            n_features,
        })
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    /// Anomaly score 2^(-E[h(x)] / c(psi)) in (0, 1]; higher is more anomalous.
    pub fn anomaly_score(&self, x: &[f64]) -> f64 {
        let mean_path = self.trees.iter().map(|t| t.path_length(x)).sum::<f64>()
            / self.trees.len() as f64;
        let c = average_path_length(self.sample_size);
        if c <= 0.0 {
            return 0.5;
        }
        2f64.powf(-mean_path / c)
    }

    /// Normality measure, the negated anomaly score (higher = more normal).
    pub fn score_samples(&self, rows: &[Vec<f64>]) -> Vec<f64> {
        rows.iter().map(|x| -self.anomaly_score(x)).collect()
    }
}
