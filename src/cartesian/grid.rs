use anyhow::anyhow;
use log::{error, info};

/// Arrangement of hosts into a row x column grid.
///
/// Rows absorb the decomposition factor: a host owns `decompose_factor`
/// virtual hosts `host, host + num_hosts, host + 2 * num_hosts, ...`, each in
/// its own virtual row but always in the same column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridGeometry {
    num_hosts: usize,
    decompose_factor: usize,
    num_row_hosts: usize,
    num_column_hosts: usize,
    more_column_hosts: bool,
}

impl GridGeometry {
    pub fn new(
        num_hosts: usize,
        decompose_factor: usize,
        more_column_hosts: bool,
    ) -> anyhow::Result<Self> {
        if num_hosts == 0 {
            let err = anyhow!("Cartesian grid needs at least one host");
            error!("{}", err);
            return Err(err);
        }
        if decompose_factor == 0 {
            let err = anyhow!("Decomposition factor must be at least 1");
            error!("{}", err);
            return Err(err);
        }

        let mut num_column_hosts = integer_sqrt(num_hosts);
        while num_hosts % num_column_hosts != 0 {
            num_column_hosts -= 1;
        }
        let mut num_row_hosts = num_hosts / num_column_hosts;
        debug_assert!(num_row_hosts >= num_column_hosts);

        if more_column_hosts {
            std::mem::swap(&mut num_row_hosts, &mut num_column_hosts);
        }

        Ok(Self {
            num_hosts,
            decompose_factor,
            num_row_hosts: num_row_hosts * decompose_factor,
            num_column_hosts,
            more_column_hosts,
        })
    }

    pub fn log_layout(&self) {
        info!(
            "Cartesian grid: {} x {}, decomposition factor {}",
            self.num_row_hosts, self.num_column_hosts, self.decompose_factor
        );
    }

    pub fn num_hosts(&self) -> usize {
        self.num_hosts
    }

    pub fn decompose_factor(&self) -> usize {
        self.decompose_factor
    }

    /// number of rows, including the virtual rows added by decomposition
    pub fn num_row_hosts(&self) -> usize {
        self.num_row_hosts
    }

    pub fn num_column_hosts(&self) -> usize {
        self.num_column_hosts
    }

    pub fn num_virtual_hosts(&self) -> usize {
        self.num_hosts * self.decompose_factor
    }

    /// grid row of a (virtual or real) host id
    pub fn row_id(&self, host: usize) -> usize {
        host / self.num_column_hosts
    }

    /// grid column of a (virtual or real) host id
    pub fn column_id(&self, host: usize) -> usize {
        host % self.num_column_hosts
    }

    pub fn virtual_to_real(&self, vhost: usize) -> usize {
        vhost % self.num_hosts
    }

    /// virtual host that `host` owns for decomposition slice `slice`
    pub fn virtual_host(&self, host: usize, slice: usize) -> usize {
        debug_assert!(slice < self.decompose_factor);
        host + slice * self.num_hosts
    }

    /// first host in the grid row of `host`
    pub fn row_leader(&self, host: usize) -> usize {
        self.row_id(host) * self.num_column_hosts
    }

    /// all hosts of the grid row of `host`, `host` included, in column order
    pub fn row_members(&self, host: usize) -> std::ops::Range<usize> {
        let leader = self.row_leader(host);
        leader..leader + self.num_column_hosts
    }

    /// A grid with a single row or column is an incoming or outgoing edge
    /// cut, not a vertex cut.
    pub fn is_vertex_cut(&self) -> bool {
        if self.more_column_hosts {
            !(self.num_row_hosts == 1 && self.num_column_hosts == 1)
        } else {
            !(self.num_row_hosts == 1 || self.num_column_hosts == 1)
        }
    }
}

/// largest `r` with `r * r <= n`, for `n >= 1`
fn integer_sqrt(n: usize) -> usize {
    let mut r = (n as f64).sqrt() as usize;
    while r * r > n {
        r -= 1;
    }
    while (r + 1) * (r + 1) <= n {
        r += 1;
    }
    r.max(1)
}
