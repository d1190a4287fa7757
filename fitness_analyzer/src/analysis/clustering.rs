//! Agglomerative clustering of gene fitness profiles.
//!
//! Only used to order heatmap and dot-plot axes so that genes with similar
//! profiles sit next to each other. Distances are Euclidean over the raw,
//! unclamped condition vector; merges follow the Lance–Williams recurrence.

use std::collections::{HashMap, HashSet};

use ndarray::{Array2, ArrayView1};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::analysis::pivot::{to_wide, WideMatrix};
use crate::error::{PipelineError, PipelineResult};
use crate::models::{AnnotatedGeneFitness, Field, Measure};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Linkage {
    /// Minimum variance increase, heights on the distance scale (Ward.D2).
    #[default]
    Ward,
    Complete,
    Average,
    Single,
}

/// One agglomeration step. Ids below `n` are leaves, `n + i` is the cluster
/// formed by merge `i`.
#[derive(Debug, Clone, PartialEq)]
pub struct Merge {
    pub left: usize,
    pub right: usize,
    pub height: f64,
    pub size: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Dendrogram {
    pub leaves: usize,
    pub merges: Vec<Merge>,
}

pub fn euclidean_distances(data: &Array2<f64>) -> Array2<f64> {
    let n = data.nrows();
    let mut d = Array2::<f64>::zeros((n, n));
    for i in 0..n {
        for j in (i + 1)..n {
            let dist = euclidean(data.row(i), data.row(j));
            d[[i, j]] = dist;
            d[[j, i]] = dist;
        }
    }
    d
}

fn euclidean(a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f64>()
        .sqrt()
}

impl Linkage {
    /// Distance from cluster `k` to the union of `a` and `b`. For Ward the
    /// inputs and output are squared distances.
    fn update(self, d_ka: f64, d_kb: f64, d_ab: f64, n_k: f64, n_a: f64, n_b: f64) -> f64 {
        match self {
            Linkage::Ward => ((n_k + n_a) * d_ka + (n_k + n_b) * d_kb - n_k * d_ab) / (n_k + n_a + n_b),
            Linkage::Complete => d_ka.max(d_kb),
            Linkage::Single => d_ka.min(d_kb),
            Linkage::Average => (n_a * d_ka + n_b * d_kb) / (n_a + n_b),
        }
    }
}

/// Clusters the rows behind a symmetric distance matrix.
///
/// Ties are broken towards the lowest pair of positions, so the result depends
/// only on the input and its row order.
pub fn hierarchical(distances: &Array2<f64>, linkage: Linkage) -> Dendrogram {
    let n = distances.nrows();
    let mut d = distances.clone();
    if linkage == Linkage::Ward {
        d.mapv_inplace(|v| v * v);
    }

    // slot i holds cluster `ids[i]` while `active[i]`
    let mut ids: Vec<usize> = (0..n).collect();
    let mut sizes: Vec<usize> = vec![1; n];
    let mut active: Vec<bool> = vec![true; n];
    let mut merges = Vec::with_capacity(n.saturating_sub(1));

    for step in 0..n.saturating_sub(1) {
        let mut best: Option<(usize, usize, f64)> = None;
        for a in (0..n).filter(|&a| active[a]) {
            for b in ((a + 1)..n).filter(|&b| active[b]) {
                let dist = d[[a, b]];
                if best.map_or(true, |(_, _, current)| dist < current) {
                    best = Some((a, b, dist));
                }
            }
        }
        let Some((a, b, d_ab)) = best else { break };

        let (n_a, n_b) = (sizes[a] as f64, sizes[b] as f64);
        for k in (0..n).filter(|&k| active[k] && k != a && k != b) {
            let updated = linkage.update(d[[k, a]], d[[k, b]], d_ab, sizes[k] as f64, n_a, n_b);
            d[[k, a]] = updated;
            d[[a, k]] = updated;
        }

        let height = if linkage == Linkage::Ward { d_ab.sqrt() } else { d_ab };
        // leaves sort before clusters, older clusters before newer ones
        merges.push(Merge {
            left: ids[a].min(ids[b]),
            right: ids[a].max(ids[b]),
            height,
            size: sizes[a] + sizes[b],
        });

        ids[a] = n + step;
        sizes[a] += sizes[b];
        active[b] = false;
    }

    Dendrogram { leaves: n, merges }
}

impl Dendrogram {
    /// Leaf indices left to right.
    pub fn leaf_order(&self) -> Vec<usize> {
        if self.leaves == 0 {
            return Vec::new();
        }
        let root = self.leaves + self.merges.len() - 1;
        let mut order = Vec::with_capacity(self.leaves);
        let mut stack = vec![root];
        while let Some(node) = stack.pop() {
            if node < self.leaves {
                order.push(node);
            } else {
                let merge = &self.merges[node - self.leaves];
                stack.push(merge.right);
                stack.push(merge.left);
            }
        }
        order
    }

    /// Flat cluster label per leaf after undoing the last `k - 1` merges.
    /// Labels are numbered by first appearance in leaf index order.
    pub fn cut(&self, k: usize) -> Vec<usize> {
        let n = self.leaves;
        let mut parent: Vec<usize> = (0..n).collect();
        fn find(parent: &mut [usize], mut x: usize) -> usize {
            while parent[x] != x {
                parent[x] = parent[parent[x]];
                x = parent[x];
            }
            x
        }

        // representative leaf of every node id
        let mut representative: Vec<usize> = (0..n).collect();
        let keep = n.saturating_sub(k.max(1)).min(self.merges.len());
        for merge in &self.merges[..keep] {
            let (l, r) = (representative[merge.left], representative[merge.right]);
            let (rl, rr) = (find(&mut parent, l), find(&mut parent, r));
            parent[rr] = rl;
            representative.push(rl);
        }

        let mut labels = HashMap::new();
        (0..n)
            .map(|leaf| {
                let root = find(&mut parent, leaf);
                let next = labels.len();
                *labels.entry(root).or_insert(next)
            })
            .collect()
    }
}

// ─── gene subsets ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct ClusterOrder {
    /// Row labels in dendrogram leaf order.
    pub labels: Vec<String>,
    pub dendrogram: Dendrogram,
    /// The pivoted profiles, rows in input order.
    pub matrix: WideMatrix,
}

impl ClusterOrder {
    /// Matrix row indices in leaf order.
    pub fn row_order(&self) -> Vec<usize> {
        self.dendrogram.leaf_order()
    }
}

/// Rows whose `label` has a value for every `grouping` level present in the
/// subset. Clustering is undefined on gapped profiles.
pub fn complete_cases(
    rows: &[AnnotatedGeneFitness],
    label: Field,
    grouping: Field,
    value: Measure,
) -> Vec<AnnotatedGeneFitness> {
    let levels: HashSet<&str> = rows.iter().filter_map(|r| grouping.value(r)).collect();
    let mut observed: HashMap<Option<&str>, HashSet<&str>> = HashMap::new();
    for row in rows {
        if let (Some(level), Some(_)) = (grouping.value(row), value.value(row)) {
            observed.entry(label.value(row)).or_default().insert(level);
        }
    }
    let complete: HashSet<Option<&str>> = observed
        .into_iter()
        .filter(|(_, seen)| seen.len() == levels.len())
        .map(|(key, _)| key)
        .collect();

    let kept: Vec<AnnotatedGeneFitness> = rows
        .iter()
        .filter(|r| value.value(r).is_some() && complete.contains(&label.value(r)))
        .cloned()
        .collect();
    debug!("{} of {} rows belong to complete profiles", kept.len(), rows.len());
    kept
}

/// Orders the genes of a subset by the similarity of their fitness profiles.
///
/// The subset must already be complete: a missing (gene, condition) cell is
/// reported instead of silently imputed.
pub fn cluster_order(
    rows: &[AnnotatedGeneFitness],
    label: Field,
    grouping: Field,
    value: Measure,
    linkage: Linkage,
) -> PipelineResult<ClusterOrder> {
    let matrix = to_wide(rows, &[label], grouping, value)?;

    let n = matrix.rows.len();
    let m = matrix.conditions.len();
    let mut data = Array2::<f64>::zeros((n, m));
    for (r, row) in matrix.rows.iter().enumerate() {
        for (c, cell) in row.values.iter().enumerate() {
            match cell {
                Some(v) => data[[r, c]] = *v,
                None => {
                    return Err(PipelineError::IncompleteProfile {
                        gene: matrix.row_label(r),
                        condition: matrix.conditions[c].clone(),
                    })
                }
            }
        }
    }

    let dendrogram = hierarchical(&euclidean_distances(&data), linkage);
    let labels = dendrogram
        .leaf_order()
        .into_iter()
        .map(|r| matrix.row_label(r))
        .collect();
    debug!("Clustered {} genes over {} conditions ({:?} linkage)", n, m, linkage);

    Ok(ClusterOrder {
        labels,
        dendrogram,
        matrix,
    })
}
