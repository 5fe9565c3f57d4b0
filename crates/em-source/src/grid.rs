//! Lazily-filled three-axis tabulation cache with trilinear interpolation.
//!
//! The generalized stable radial density has no closed form and one node
//! evaluation costs a full Monte-Carlo generation, while a fit sweeps tens of
//! thousands of (radius, scale, stability) queries. The grid tabulates node
//! values on demand: a query resolves the 3×3×3 node neighborhood around the
//! query point, filling any unresolved node exactly once, then interpolates.
//!
//! Fill-on-miss is the one path expected to run under heavy many-threads /
//! many-nodes contention, so mutual exclusion is per node (`OnceLock`), not a
//! single grid lock: concurrent readers of disjoint neighborhoods never
//! serialize against each other, and a reader can never observe a partially
//! written or double-computed node.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

use em_core::{Error, Result};
use serde::{Deserialize, Serialize};

/// One tabulation axis: `points` node coordinates evenly spaced on
/// `[min, max]`. A single-point axis degenerates to the fixed coordinate
/// `min` and is skipped during interpolation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AxisSpec {
    /// Number of tabulation nodes (>= 1).
    pub points: usize,
    /// Lower coordinate bound.
    pub min: f64,
    /// Upper coordinate bound.
    pub max: f64,
}

impl AxisSpec {
    /// Fixed-coordinate (degenerate) axis.
    pub fn fixed(value: f64) -> Self {
        Self { points: 1, min: value, max: value }
    }
}

/// Axis configuration of a [`LazyGrid3d`] over (radius, scale, stability).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridConfig {
    /// Radius axis.
    pub radius: AxisSpec,
    /// Scale axis.
    pub scale: AxisSpec,
    /// Stability axis.
    pub stability: AxisSpec,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            radius: AxisSpec { points: 128, min: 0.0, max: 32.0 },
            scale: AxisSpec { points: 16, min: 0.25, max: 4.0 },
            stability: AxisSpec { points: 11, min: 1.0, max: 2.0 },
        }
    }
}

#[derive(Debug)]
struct Axis {
    nodes: Vec<f64>,
}

impl Axis {
    fn new(name: &str, spec: AxisSpec) -> Result<Self> {
        if spec.points == 0 {
            return Err(Error::Validation(format!("{name} axis needs at least 1 point")));
        }
        if !(spec.min.is_finite() && spec.max.is_finite()) {
            return Err(Error::Validation(format!(
                "{name} axis bounds must be finite, got [{}, {}]",
                spec.min, spec.max
            )));
        }
        if spec.points == 1 {
            return Ok(Self { nodes: vec![spec.min] });
        }
        if spec.min >= spec.max {
            return Err(Error::Validation(format!(
                "{name} axis needs min < max, got [{}, {}]",
                spec.min, spec.max
            )));
        }
        let step = (spec.max - spec.min) / (spec.points - 1) as f64;
        let mut nodes: Vec<f64> = (0..spec.points).map(|i| spec.min + step * i as f64).collect();
        // `min + step·(points-1)` can land a ulp off the bound; downstream
        // exact-value short circuits compare node coordinates bitwise.
        nodes[spec.points - 1] = spec.max;
        Ok(Self { nodes })
    }

    fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Clamp a query coordinate onto the axis range.
    fn clamp(&self, q: f64) -> f64 {
        let lo = self.nodes[0];
        let hi = *self.nodes.last().unwrap_or(&lo);
        if q.is_nan() {
            lo
        } else {
            q.clamp(lo, hi)
        }
    }

    /// Enclosing node pair: lower index `i` and interpolation weight
    /// `t ∈ [0, 1]` toward node `i+1`. Degenerate axes return `(0, 0)`.
    fn bracket(&self, q: f64) -> (usize, f64) {
        let n = self.nodes.len();
        if n == 1 {
            return (0, 0.0);
        }
        let q = self.clamp(q);
        // Number of nodes <= q, so the lower bracket index is k-1.
        let k = self.nodes.partition_point(|x| *x <= q);
        let i = k.saturating_sub(1).min(n - 2);
        let lo = self.nodes[i];
        let hi = self.nodes[i + 1];
        let t = ((q - lo) / (hi - lo)).clamp(0.0, 1.0);
        (i, t)
    }

    /// 3-wide neighborhood of a bracket index, clamped at the axis edges.
    fn neighborhood(&self, i: usize) -> std::ops::RangeInclusive<usize> {
        let lo = i.saturating_sub(1);
        let hi = (i + 1).min(self.nodes.len() - 1);
        lo..=hi
    }
}

/// Fill callback: density at a node's (radius, scale, stability) coordinates.
pub type FillFn = dyn Fn(f64, f64, f64) -> f64 + Send + Sync;

/// Lazily-filled tabulation cache over (radius, scale, stability).
pub struct LazyGrid3d {
    axes: [Axis; 3],
    cells: Vec<OnceLock<f64>>,
    fill: Box<FillFn>,
    fills: AtomicU64,
}

impl LazyGrid3d {
    /// Build an empty grid; no fill callback runs until the first query.
    pub fn new(config: GridConfig, fill: Box<FillFn>) -> Result<Self> {
        let axes = [
            Axis::new("radius", config.radius)?,
            Axis::new("scale", config.scale)?,
            Axis::new("stability", config.stability)?,
        ];
        let n = axes[0].len() * axes[1].len() * axes[2].len();
        let mut cells = Vec::with_capacity(n);
        cells.resize_with(n, OnceLock::new);
        Ok(Self { axes, cells, fill, fills: AtomicU64::new(0) })
    }

    /// Total node count.
    pub fn n_nodes(&self) -> usize {
        self.cells.len()
    }

    /// Number of fill-callback invocations so far (exactly one per resolved
    /// node, regardless of query or thread count).
    pub fn fill_count(&self) -> u64 {
        self.fills.load(Ordering::Relaxed)
    }

    fn cell_index(&self, ir: usize, is: usize, ia: usize) -> usize {
        (ia * self.axes[1].len() + is) * self.axes[0].len() + ir
    }

    /// Node value, computing it on first access.
    fn node_value(&self, ir: usize, is: usize, ia: usize) -> f64 {
        let idx = self.cell_index(ir, is, ia);
        *self.cells[idx].get_or_init(|| {
            self.fills.fetch_add(1, Ordering::Relaxed);
            (self.fill)(
                self.axes[0].nodes[ir],
                self.axes[1].nodes[is],
                self.axes[2].nodes[ia],
            )
        })
    }

    /// Interpolated density at the exact query coordinates.
    ///
    /// Out-of-range coordinates clamp onto the axis ranges. The full 3×3×3
    /// node neighborhood is resolved before interpolation so that nearby
    /// follow-up queries hit only computed nodes.
    pub fn evaluate(&self, radius: f64, scale: f64, stability: f64) -> f64 {
        let (ir, tr) = self.axes[0].bracket(radius);
        let (is, ts) = self.axes[1].bracket(scale);
        let (ia, ta) = self.axes[2].bracket(stability);

        // Radius varies innermost: consecutive fills share (scale, stability)
        // so a sampler-backed fill callback regenerates per parameter pair,
        // not per node.
        for a in self.axes[2].neighborhood(ia) {
            for s in self.axes[1].neighborhood(is) {
                for r in self.axes[0].neighborhood(ir) {
                    let _ = self.node_value(r, s, a);
                }
            }
        }

        let mut acc = 0.0;
        for (da, wa) in Self::corner_weights(self.axes[2].len(), ta) {
            for (ds, ws) in Self::corner_weights(self.axes[1].len(), ts) {
                for (dr, wr) in Self::corner_weights(self.axes[0].len(), tr) {
                    let w = wa * ws * wr;
                    if w > 0.0 {
                        acc += w * self.node_value(ir + dr, is + ds, ia + da);
                    }
                }
            }
        }
        acc
    }

    /// Interpolation corners on one axis: `(offset, weight)` pairs.
    /// Degenerate axes contribute the single node with full weight.
    fn corner_weights(axis_len: usize, t: f64) -> [(usize, f64); 2] {
        if axis_len == 1 {
            [(0, 1.0), (0, 0.0)]
        } else {
            [(0, 1.0 - t), (1, t)]
        }
    }
}
