//! Process grid and cell grid layout.
//!
//! The box is split into `node_grid` rectangular subdomains, one per rank, and
//! each subdomain into `cell_grid` inner cells whose sides are at least
//! `cutoff + skin`. Interactions are then fully captured by searching a cell
//! and its 26 neighbours.

use crate::{MdError, Result};
use lbmd_math::{Int3, OrthorhombicBox, Vec3, volume};
use serde::{Deserialize, Serialize};

/// Factorise `n_ranks` into the most cubic process grid (smallest surface).
pub fn node_grid(n_ranks: usize) -> Int3 {
    let n = n_ranks.max(1);
    let mut best = [1, 1, n];
    let mut best_surface = usize::MAX;

    for a in 1..=n {
        if n % a != 0 {
            continue;
        }
        let rest = n / a;
        for b in a..=rest {
            if rest % b != 0 {
                continue;
            }
            let c = rest / b;
            if c < b {
                continue;
            }
            let surface = a * b + b * c + a * c;
            if surface < best_surface {
                best_surface = surface;
                best = [a, b, c];
            }
        }
    }
    best
}

/// Largest per-rank inner cell counts with cell side >= `cutoff + skin`.
pub fn cell_grid(bc: &OrthorhombicBox, node_grid: Int3, cutoff: f64, skin: f64) -> Result<Int3> {
    let rc = cutoff + skin;
    if !(rc > 0.0) {
        return Err(MdError::InvalidParameter(format!(
            "cutoff + skin must be positive, got {rc}"
        )));
    }

    let mut cells = [0; 3];
    for d in 0..3 {
        let local = bc.size[d] / node_grid[d] as f64;
        cells[d] = (local / rc).floor() as usize;
        if cells[d] == 0 {
            return Err(MdError::InvalidDecomposition(format!(
                "subdomain length {local:.4} in dimension {d} is smaller than cutoff + skin = {rc:.4}"
            )));
        }
    }
    Ok(cells)
}

/// Direction of a neighbour along one dimension.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}

/// Immutable layout of the decomposition: which rank owns which region and how
/// each rank's region is cut into cells.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CellGrid {
    /// Simulation box.
    pub bc: OrthorhombicBox,
    /// Ranks per dimension.
    pub node_grid: Int3,
    /// Inner cells per rank per dimension.
    pub cell_grid: Int3,
    /// Cell edge lengths.
    pub cell_size: Vec3,
    /// Interaction cutoff.
    pub cutoff: f64,
    /// Verlet skin.
    pub skin: f64,
}

impl CellGrid {
    /// Build and validate a layout.
    pub fn new(
        bc: OrthorhombicBox,
        node_grid: Int3,
        cell_grid: Int3,
        cutoff: f64,
        skin: f64,
    ) -> Result<Self> {
        if cutoff <= 0.0 || skin < 0.0 {
            return Err(MdError::InvalidParameter(format!(
                "cutoff must be positive and skin non-negative (cutoff = {cutoff}, skin = {skin})"
            )));
        }
        let rc = cutoff + skin;
        let mut cell_size = Vec3::zeros();

        for d in 0..3 {
            if node_grid[d] == 0 || cell_grid[d] == 0 {
                return Err(MdError::InvalidDecomposition(format!(
                    "empty grid in dimension {d}: node grid {node_grid:?}, cell grid {cell_grid:?}"
                )));
            }
            let global = node_grid[d] * cell_grid[d];
            if global < 2 {
                return Err(MdError::InvalidDecomposition(format!(
                    "dimension {d} needs at least two cells globally, box length {} allows {global}",
                    bc.size[d]
                )));
            }
            cell_size[d] = bc.size[d] / global as f64;
            if cell_size[d] < rc {
                return Err(MdError::InvalidDecomposition(format!(
                    "cell side {:.4} in dimension {d} is smaller than cutoff + skin = {rc:.4}",
                    cell_size[d]
                )));
            }
        }

        Ok(Self {
            bc,
            node_grid,
            cell_grid,
            cell_size,
            cutoff,
            skin,
        })
    }

    /// Pick node and cell grids automatically for `n_ranks` ranks.
    pub fn auto(bc: OrthorhombicBox, n_ranks: usize, cutoff: f64, skin: f64) -> Result<Self> {
        let nodes = node_grid(n_ranks);
        let cells = cell_grid(&bc, nodes, cutoff, skin)?;
        Self::new(bc, nodes, cells, cutoff, skin)
    }

    /// Number of ranks the layout was built for.
    pub fn n_ranks(&self) -> usize {
        volume(self.node_grid)
    }

    /// Cells per dimension over the whole box.
    pub fn global_cells(&self) -> Int3 {
        [
            self.node_grid[0] * self.cell_grid[0],
            self.node_grid[1] * self.cell_grid[1],
            self.node_grid[2] * self.cell_grid[2],
        ]
    }

    /// Local cells per dimension including the one-cell ghost frame.
    pub fn frame_grid(&self) -> Int3 {
        [
            self.cell_grid[0] + 2,
            self.cell_grid[1] + 2,
            self.cell_grid[2] + 2,
        ]
    }

    /// Number of local cells including the ghost frame.
    pub fn n_local_cells(&self) -> usize {
        volume(self.frame_grid())
    }

    /// Position of `rank` in the process grid (x fastest).
    pub fn node_position(&self, rank: usize) -> Int3 {
        let [nx, ny, _] = self.node_grid;
        [rank % nx, (rank / nx) % ny, rank / (nx * ny)]
    }

    /// Rank at a process grid position.
    pub fn rank_of(&self, node: Int3) -> usize {
        node[0] + self.node_grid[0] * (node[1] + self.node_grid[1] * node[2])
    }

    /// Periodic neighbour of `rank` along `dim`.
    pub fn neighbor_rank(&self, rank: usize, dim: usize, side: Side) -> usize {
        let mut node = self.node_position(rank);
        let n = self.node_grid[dim];
        node[dim] = match side {
            Side::Left => (node[dim] + n - 1) % n,
            Side::Right => (node[dim] + 1) % n,
        };
        self.rank_of(node)
    }

    /// Lower and upper corner of the subdomain owned by `rank`.
    pub fn domain_bounds(&self, rank: usize) -> (Vec3, Vec3) {
        let node = self.node_position(rank);
        let mut lo = Vec3::zeros();
        let mut hi = Vec3::zeros();
        for d in 0..3 {
            let width = self.cell_size[d] * self.cell_grid[d] as f64;
            lo[d] = node[d] as f64 * width;
            hi[d] = lo[d] + width;
        }
        (lo, hi)
    }

    /// Global cell coordinates of a position inside the box.
    pub fn global_cell_of(&self, x: &Vec3) -> Int3 {
        let global = self.global_cells();
        let mut c = [0; 3];
        for d in 0..3 {
            let i = (x[d] / self.cell_size[d]).floor();
            c[d] = if i <= 0.0 {
                0
            } else {
                (i as usize).min(global[d] - 1)
            };
        }
        c
    }

    /// Process grid position owning a global cell.
    pub fn node_of_cell(&self, cell: Int3) -> Int3 {
        [
            cell[0] / self.cell_grid[0],
            cell[1] / self.cell_grid[1],
            cell[2] / self.cell_grid[2],
        ]
    }

    /// Flat index of frame coordinates.
    #[inline]
    pub fn local_index(&self, c: Int3) -> usize {
        let [fx, fy, _] = self.frame_grid();
        c[0] + fx * (c[1] + fy * c[2])
    }

    /// Frame coordinates of a flat index.
    #[inline]
    pub fn local_coords(&self, idx: usize) -> Int3 {
        let [fx, fy, _] = self.frame_grid();
        [idx % fx, (idx / fx) % fy, idx / (fx * fy)]
    }

    /// True if the frame cell holds real particles.
    pub fn is_inner(&self, idx: usize) -> bool {
        let c = self.local_coords(idx);
        (0..3).all(|d| c[d] >= 1 && c[d] <= self.cell_grid[d])
    }

    /// Flat indices of all inner cells, z slowest.
    pub fn inner_cells(&self) -> Vec<usize> {
        let [cx, cy, cz] = self.cell_grid;
        let mut out = Vec::with_capacity(cx * cy * cz);
        for z in 1..=cz {
            for y in 1..=cy {
                for x in 1..=cx {
                    out.push(self.local_index([x, y, z]));
                }
            }
        }
        out
    }

    /// All frame cells whose coordinate along `dim` equals `layer`, in a fixed
    /// order that is identical on every rank.
    pub fn plane(&self, dim: usize, layer: usize) -> Vec<usize> {
        let f = self.frame_grid();
        let mut out = Vec::new();
        for z in 0..f[2] {
            for y in 0..f[1] {
                for x in 0..f[0] {
                    let c = [x, y, z];
                    if c[dim] == layer {
                        out.push(self.local_index(c));
                    }
                }
            }
        }
        out
    }

    /// Frame index of the global cell `global`, seen from `rank`.
    pub fn local_index_of_global(&self, rank: usize, global: Int3) -> Option<usize> {
        let node = self.node_position(rank);
        let mut c = [0; 3];
        for d in 0..3 {
            let offset = node[d] * self.cell_grid[d];
            if global[d] < offset || global[d] >= offset + self.cell_grid[d] {
                return None;
            }
            c[d] = global[d] - offset + 1;
        }
        Some(self.local_index(c))
    }

    /// Global coordinates of an inner frame cell of `rank`.
    pub fn global_of_local(&self, rank: usize, idx: usize) -> Int3 {
        let node = self.node_position(rank);
        let c = self.local_coords(idx);
        [
            node[0] * self.cell_grid[0] + c[0] - 1,
            node[1] * self.cell_grid[1] + c[1] - 1,
            node[2] * self.cell_grid[2] + c[2] - 1,
        ]
    }

    /// Largest periodic distance, in cells, between two global cells.
    pub fn cell_distance(&self, a: Int3, b: Int3) -> usize {
        let global = self.global_cells();
        (0..3)
            .map(|d| {
                let diff = a[d].abs_diff(b[d]);
                diff.min(global[d] - diff)
            })
            .max()
            .unwrap_or(0)
    }

    /// Offsets of the 13 forward neighbour cells plus the cell itself
    /// (half shell), expressed as flat index deltas in the frame.
    pub fn half_shell(&self) -> Vec<isize> {
        let [fx, fy, _] = self.frame_grid();
        let (fx, fy) = (fx as isize, fy as isize);
        let mut out = vec![0];
        for dz in -1..=1_isize {
            for dy in -1..=1_isize {
                for dx in -1..=1_isize {
                    let forward = dz > 0 || (dz == 0 && dy > 0) || (dz == 0 && dy == 0 && dx > 0);
                    if forward {
                        out.push(dx + fx * (dy + fy * dz));
                    }
                }
            }
        }
        out
    }
}
