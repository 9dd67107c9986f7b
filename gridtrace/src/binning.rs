//! Host side of the triangle-cell binning:
//!
//! 1. count overlapped cells per triangle (`cells_counting` kernel),
//! 2. prefix-sum the counts into per-triangle offsets,
//! 3. emit (triangle, cell) pairs at those offsets (`cells_overlapping`
//!    kernel),
//! 4. sort the pairs by cell id,
//! 5. compact them into the index list and the cell table.

use std::fmt;

use glam::uvec3;
use log::debug;

use crate::utils::measure;
use crate::{
    gpu, Backend, BackendExt, Binding, BuildError, CancelToken, Config, Kernel,
    SortStrategy,
};

pub trait PrefixSum: Send + Sync {
    /// Returns the exclusive prefix sum of `counts`, with the grand total
    /// appended (so the result is one item longer than the input).
    fn exclusive_scan(&self, counts: &[u32]) -> Vec<u64>;
}

pub trait PairSort: Send + Sync {
    /// Sorts pairs by ascending cell id; stability is not required.
    fn sort(&self, pairs: &mut [gpu::TriangleCellPair]);
}

#[derive(Clone, Copy, Debug, Default)]
pub struct HostPrefixSum;

impl PrefixSum for HostPrefixSum {
    fn exclusive_scan(&self, counts: &[u32]) -> Vec<u64> {
        let mut sums = Vec::with_capacity(counts.len() + 1);
        let mut sum = 0u64;

        sums.push(sum);

        for &count in counts {
            sum += count as u64;
            sums.push(sum);
        }

        sums
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ComparisonSort;

impl PairSort for ComparisonSort {
    fn sort(&self, pairs: &mut [gpu::TriangleCellPair]) {
        pairs.sort_unstable_by_key(|pair| pair.cell_id);
    }
}

/// Least-significant-digit radix sort with 8-bit digits; passes over digits
/// that are zero for every cell id are skipped.
#[derive(Clone, Copy, Debug, Default)]
pub struct RadixSort;

impl PairSort for RadixSort {
    fn sort(&self, pairs: &mut [gpu::TriangleCellPair]) {
        let max_cell_id = pairs.iter().map(|pair| pair.cell_id).max();

        let Some(max_cell_id) = max_cell_id else {
            return;
        };

        let mut scratch = vec![gpu::TriangleCellPair::default(); pairs.len()];
        let mut in_scratch = false;
        let mut shift = 0;

        while shift < u32::BITS && (max_cell_id >> shift) > 0 {
            let (src, dst) = if in_scratch {
                (&scratch[..], &mut *pairs)
            } else {
                (&*pairs, &mut scratch[..])
            };

            let digit = |pair: &gpu::TriangleCellPair| {
                ((pair.cell_id >> shift) & 0xff) as usize
            };

            let mut offsets = [0usize; 256];

            for pair in src.iter() {
                offsets[digit(pair)] += 1;
            }

            let mut sum = 0;

            for offset in offsets.iter_mut() {
                sum += *offset;
                *offset = sum - *offset;
            }

            for pair in src.iter() {
                let offset = &mut offsets[digit(pair)];

                dst[*offset] = *pair;
                *offset += 1;
            }

            in_scratch = !in_scratch;
            shift += 8;
        }

        if in_scratch {
            pairs.copy_from_slice(&scratch);
        }
    }
}

/// Output of the binning: the flat index list and the per-cell table.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BinnedGrid {
    /// Triangle ids grouped by cell, cells ordered by ascending id
    pub indices: Vec<u32>,

    /// One entry per cell, pointing into `indices`
    pub cells: Vec<gpu::GridCell>,
}

pub struct BinningPipeline {
    prefix_sum: Box<dyn PrefixSum>,
    sort: Box<dyn PairSort>,
}

impl BinningPipeline {
    pub fn new(
        prefix_sum: impl PrefixSum + 'static,
        sort: impl PairSort + 'static,
    ) -> Self {
        Self {
            prefix_sum: Box::new(prefix_sum),
            sort: Box::new(sort),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        match config.sort {
            SortStrategy::Radix => Self::new(HostPrefixSum, RadixSort),
            SortStrategy::Comparison => Self::new(HostPrefixSum, ComparisonSort),
        }
    }

    /// Bins `triangle_count` triangles (whose [`gpu::TriangleVertices`] live
    /// in `vertices`) into given grid.
    pub fn bin<B>(
        &self,
        backend: &B,
        vertices: &B::Buffer,
        triangle_count: u32,
        grid: &gpu::GridInfo,
        config: &Config,
        cancel: &CancelToken,
    ) -> Result<BinnedGrid, BuildError>
    where
        B: Backend,
    {
        let params = gpu::BinningPassParams::new(*grid, triangle_count);
        let workgroups = Kernel::CellsCounting.workgroups(uvec3(triangle_count, 1, 1));
        let len = triangle_count as usize;

        // ---
        // Stage 1: Counting

        let counts = measure("binning.counting", || {
            let counts = backend.create_buffer("gridtrace_cell_counts", len * 4)?;

            backend.dispatch(
                Kernel::CellsCounting,
                &[
                    Binding::params(&params),
                    Binding::Buffer(vertices),
                    Binding::Buffer(&counts),
                ],
                workgroups,
            )?;

            backend.read_buffer_as::<u32>(&counts, len)
        })?;

        cancel.check()?;

        // ---
        // Stage 2: Prefix sum

        let offsets = measure("binning.prefix_sum", || {
            self.prefix_sum.exclusive_scan(&counts)
        });

        let pair_count = offsets.last().copied().unwrap_or_default();

        debug!("Counted {pair_count} triangle-cell pairs");

        if pair_count > config.max_pairs || pair_count > u32::MAX as u64 {
            return Err(BuildError::TooManyPairs {
                count: pair_count,
                max: config.max_pairs.min(u32::MAX as u64),
            });
        }

        let offsets: Vec<u32> =
            offsets.into_iter().map(|offset| offset as u32).collect();

        cancel.check()?;

        // ---
        // Stage 3: Emission

        let mut pairs = measure("binning.emission", || {
            let offsets =
                backend.create_buffer_init("gridtrace_pair_offsets", &offsets)?;

            let pairs = backend.create_buffer_init(
                "gridtrace_pairs",
                &vec![gpu::TriangleCellPair::UNWRITTEN; pair_count as usize],
            )?;

            if pair_count > 0 {
                backend.dispatch(
                    Kernel::CellsOverlapping,
                    &[
                        Binding::params(&params),
                        Binding::Buffer(vertices),
                        Binding::Buffer(&offsets),
                        Binding::Buffer(&pairs),
                    ],
                    workgroups,
                )?;
            }

            backend.read_buffer_as::<gpu::TriangleCellPair>(
                &pairs,
                pair_count as usize,
            )
        })?;

        validate_pairs(&pairs, triangle_count, grid.cell_count())?;
        cancel.check()?;

        // ---
        // Stage 4: Sorting

        measure("binning.sorting", || self.sort.sort(&mut pairs));

        cancel.check()?;

        // ---
        // Stage 5: Compaction

        measure("binning.compaction", || compact(&pairs, grid.cell_count()))
    }
}

impl Default for BinningPipeline {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl fmt::Debug for BinningPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BinningPipeline").finish_non_exhaustive()
    }
}

/// Makes sure that every emitted pair has been written and points at an
/// existing triangle and cell.
fn validate_pairs(
    pairs: &[gpu::TriangleCellPair],
    triangle_count: u32,
    cell_count: u32,
) -> Result<(), BuildError> {
    let invalid = pairs.iter().position(|pair| {
        pair.triangle_id >= triangle_count || pair.cell_id >= cell_count
    });

    if let Some(idx) = invalid {
        let pair = pairs[idx];

        return Err(BuildError::Corrupted(if pair
            == gpu::TriangleCellPair::UNWRITTEN
        {
            format!("pair #{idx} hasn't been written")
        } else {
            format!(
                "pair #{idx} is out of range (triangle_id={}, cell_id={})",
                pair.triangle_id, pair.cell_id
            )
        }));
    }

    Ok(())
}

/// Compacts pairs sorted by cell id into the index list and the cell table.
///
/// Every cell gets an entry; empty cells point at where their triangles
/// would start, with a count of zero.
pub fn compact(
    pairs: &[gpu::TriangleCellPair],
    cell_count: u32,
) -> Result<BinnedGrid, BuildError> {
    let mut cells = Vec::with_capacity(cell_count as usize);
    let mut cursor = 0;

    for cell_id in 0..cell_count {
        let offset = cursor;

        while cursor < pairs.len() && pairs[cursor].cell_id == cell_id {
            cursor += 1;
        }

        cells.push(gpu::GridCell::new(offset as u32, (cursor - offset) as u32));
    }

    if cursor != pairs.len() {
        return Err(BuildError::Corrupted(format!(
            "pair #{cursor} (cell_id={}) is either unsorted or out of range",
            pairs[cursor].cell_id
        )));
    }

    let indices = pairs.iter().map(|pair| pair.triangle_id).collect();

    Ok(BinnedGrid { indices, cells })
}
