/// Knobs of the acceleration-structure build.
#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    /// Average number of triangles per cell the grid planner aims for (the
    /// `k` constant from Wald et al.'s heuristic).
    pub density: f32,

    /// Per-axis margin, in scene units, the scene bounds get expanded by, so
    /// that no triangle lies exactly on the grid's boundary.
    pub bounds_margin: f32,

    pub max_triangles: usize,
    pub max_cells: u64,
    pub max_pairs: u64,

    /// Strategy used to sort triangle-cell pairs by cell id.
    pub sort: SortStrategy,
}

impl Config {
    pub fn with_density(mut self, density: f32) -> Self {
        self.density = density;
        self
    }

    pub fn with_bounds_margin(mut self, bounds_margin: f32) -> Self {
        self.bounds_margin = bounds_margin;
        self
    }

    pub fn with_max_triangles(mut self, max_triangles: usize) -> Self {
        self.max_triangles = max_triangles;
        self
    }

    pub fn with_max_cells(mut self, max_cells: u64) -> Self {
        self.max_cells = max_cells;
        self
    }

    pub fn with_max_pairs(mut self, max_pairs: u64) -> Self {
        self.max_pairs = max_pairs;
        self
    }

    pub fn with_sort(mut self, sort: SortStrategy) -> Self {
        self.sort = sort;
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            density: 5.0,
            bounds_margin: 0.1,
            max_triangles: 1024 * 1024,
            max_cells: 16 * 1024 * 1024,
            max_pairs: 64 * 1024 * 1024,
            sort: Default::default(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SortStrategy {
    /// Least-significant-digit radix sort over the cell ids; linear in the
    /// number of pairs.
    #[default]
    Radix,

    /// Unstable comparison sort.
    Comparison,
}
