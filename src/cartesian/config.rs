use anyhow::anyhow;
use log::error;

/// How blocks of vertex ids are assigned to grid columns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColumnLayout {
    /// block `b` goes to column `b % columns`; matches the processor grid
    #[default]
    RoundRobin,
    /// contiguous groups of blocks per column (checkerboard partitioning)
    Blocked,
}

/// How the global id ranges are split among virtual hosts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Balance {
    /// same number of vertices per virtual host
    Nodes,
    /// same share of vertices plus edges, weighted by the scale factors
    #[default]
    NodesAndEdges,
}

/// Everything that selects a variant of the cartesian cut
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CartesianConfig {
    pub layout: ColumnLayout,
    pub more_column_hosts: bool,
    pub decompose_factor: usize,
    pub balance: Balance,
    /// relative capacity of every real host, empty means all equal
    pub scale_factors: Vec<u32>,
    pub transpose: bool,
}

impl Default for CartesianConfig {
    fn default() -> Self {
        Self {
            layout: ColumnLayout::default(),
            more_column_hosts: false,
            decompose_factor: 1,
            balance: Balance::default(),
            scale_factors: Vec::new(),
            transpose: false,
        }
    }
}

impl CartesianConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn layout(mut self, layout: ColumnLayout) -> Self {
        self.layout = layout;
        self
    }

    pub fn more_column_hosts(mut self, more_column_hosts: bool) -> Self {
        self.more_column_hosts = more_column_hosts;
        self
    }

    pub fn decompose_factor(mut self, decompose_factor: usize) -> Self {
        self.decompose_factor = decompose_factor;
        self
    }

    pub fn balance(mut self, balance: Balance) -> Self {
        self.balance = balance;
        self
    }

    pub fn scale_factors(mut self, scale_factors: Vec<u32>) -> Self {
        self.scale_factors = scale_factors;
        self
    }

    pub fn transpose(mut self, transpose: bool) -> Self {
        self.transpose = transpose;
        self
    }

    pub fn is_column_blocked(&self) -> bool {
        self.layout == ColumnLayout::Blocked
    }

    /// Scale factors for `num_hosts` real hosts, defaulting to all ones
    pub fn scale_factors_for(&self, num_hosts: usize) -> Vec<u32> {
        if self.scale_factors.is_empty() {
            vec![1; num_hosts]
        } else {
            self.scale_factors.clone()
        }
    }

    /// Reject mode combinations the cartesian cut does not support. Runs
    /// before any communication so every host fails the same way.
    pub fn validate(&self, num_hosts: usize) -> anyhow::Result<()> {
        let problem = if self.transpose {
            Some(anyhow!("Transpose not supported for cartesian vertex-cuts"))
        } else if self.decompose_factor == 0 {
            Some(anyhow!("Decomposition factor must be at least 1"))
        } else if !self.scale_factors.is_empty() && self.scale_factors.len() != num_hosts {
            Some(anyhow!(
                "Got {} scale factors for {} hosts",
                self.scale_factors.len(),
                num_hosts
            ))
        } else {
            None
        };

        match problem {
            Some(err) => {
                error!("{}", err);
                Err(err)
            }
            None => Ok(()),
        }
    }
}
