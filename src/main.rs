use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use anyhow::anyhow;
use clap::{Parser, ValueEnum};
use distributed_cartesian::{
    init_logging, Balance, CartesianConfig, CartesianGraph, ColumnLayout, FileGraph, GrGraph,
    LocalTransport, MessageManager, PartitionSummary, Payload, Transport,
};
use log::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Layout {
    RoundRobin,
    Blocked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Balancing {
    /// same number of nodes per block
    Nodes,
    /// same number of nodes plus edges per block
    NodesAndEdges,
}

/// Partition a .gr graph over a cartesian grid of hosts
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// graph file in the binary .gr format
    graph: PathBuf,

    /// hosts simulated as threads, ignored with --mpi
    #[arg(long, default_value = "4")]
    hosts: NonZeroUsize,

    /// node ranges per host
    #[arg(long, default_value = "1")]
    decompose: NonZeroUsize,

    #[arg(long, value_enum, default_value_t = Layout::RoundRobin)]
    layout: Layout,

    #[arg(long, value_enum, default_value_t = Balancing::NodesAndEdges)]
    balance: Balancing,

    /// relative capacity of every host, comma separated
    #[arg(long, value_delimiter = ',')]
    scale_factors: Vec<u32>,

    /// put more hosts in a row than in a column
    #[arg(long)]
    more_columns: bool,

    /// read u32 edge weights
    #[arg(long)]
    weighted: bool,

    /// run one host per MPI rank
    #[arg(long)]
    mpi: bool,
}

impl Args {
    fn config(&self) -> CartesianConfig {
        CartesianConfig::new()
            .layout(match self.layout {
                Layout::RoundRobin => ColumnLayout::RoundRobin,
                Layout::Blocked => ColumnLayout::Blocked,
            })
            .balance(match self.balance {
                Balancing::Nodes => Balance::Nodes,
                Balancing::NodesAndEdges => Balance::NodesAndEdges,
            })
            .decompose_factor(self.decompose.get())
            .more_column_hosts(self.more_columns)
            .scale_factors(self.scale_factors.clone())
    }
}

/// Load this host's rows of the file and build its partition
fn partition_host<E: Payload, T: Transport>(
    path: &Path,
    transport: T,
    config: &CartesianConfig,
) -> anyhow::Result<PartitionSummary> {
    let mut file = GrGraph::<E>::open(path)?;
    let ranges = CartesianGraph::<E>::range_table(&file, transport.num_hosts(), config)?;
    file.load_ranges(ranges.host_ranges(transport.host_id(), transport.num_hosts()))?;

    let mut manager = MessageManager::new(transport);
    let graph = CartesianGraph::build_with_ranges(&file, &mut manager, config, ranges)?;
    Ok(graph.summary())
}

/// Run every host on its own thread of this process
fn simulate<E: Payload>(
    path: &Path,
    hosts: usize,
    config: &CartesianConfig,
) -> anyhow::Result<Vec<PartitionSummary>> {
    std::thread::scope(|s| {
        let handles: Vec<_> = LocalTransport::network(hosts)
            .into_iter()
            .map(|transport| {
                s.spawn(move || {
                    init_logging(transport.host_id());
                    partition_host::<E, _>(path, transport, config)
                })
            })
            .collect();

        handles
            .into_iter()
            .map(|h| h.join().map_err(|_| anyhow!("a host thread panicked"))?)
            .collect()
    })
}

#[cfg(feature = "mpi")]
fn run_mpi<E: Payload>(
    path: &Path,
    config: &CartesianConfig,
) -> anyhow::Result<Vec<PartitionSummary>> {
    let (_universe, transport) = distributed_cartesian::init()?;
    Ok(vec![partition_host::<E, _>(path, transport, config)?])
}

#[cfg(not(feature = "mpi"))]
fn run_mpi<E: Payload>(
    _path: &Path,
    _config: &CartesianConfig,
) -> anyhow::Result<Vec<PartitionSummary>> {
    anyhow::bail!("built without the mpi feature")
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = args.config();
    let (path, hosts) = (args.graph.as_path(), args.hosts.get());

    let summaries = match (args.mpi, args.weighted) {
        (false, false) => simulate::<()>(path, hosts, &config)?,
        (false, true) => simulate::<u32>(path, hosts, &config)?,
        (true, false) => run_mpi::<()>(path, &config)?,
        (true, true) => run_mpi::<u32>(path, &config)?,
    };

    // a simulation sees every host, report the whole partition
    if summaries.len() > 1 {
        let global_nodes = GrGraph::<()>::open(path)?.node_count();
        let stored: usize = summaries.iter().map(|s| s.num_nodes).sum();
        let edges: usize = summaries.iter().map(|s| s.num_edges).sum();
        let max_edges = summaries.iter().map(|s| s.num_edges).max().unwrap_or(0);
        info!(
            "{} hosts: replication factor {:.3}, {} edges, max {} per host",
            summaries.len(),
            stored as f64 / global_nodes.max(1) as f64,
            edges,
            max_edges
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_command_is_well_formed() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_defaults() {
        let args = Args::try_parse_from(["cartesian-cut", "graph.gr"]).unwrap();
        assert_eq!(args.hosts.get(), 4);
        assert_eq!(args.config(), CartesianConfig::new());
    }

    #[test]
    fn test_options_reach_the_config() {
        let args = Args::try_parse_from([
            "cartesian-cut",
            "graph.gr",
            "--hosts",
            "6",
            "--decompose",
            "2",
            "--layout",
            "blocked",
            "--balance",
            "nodes",
            "--scale-factors",
            "1,2,1,1,3,1",
            "--more-columns",
        ])
        .unwrap();
        let config = args.config();
        assert_eq!(config.layout, ColumnLayout::Blocked);
        assert_eq!(config.balance, Balance::Nodes);
        assert_eq!(config.decompose_factor, 2);
        assert_eq!(config.scale_factors, vec![1, 2, 1, 1, 3, 1]);
        assert!(config.more_column_hosts);
        assert!(config.validate(args.hosts.get()).is_ok());
    }

    #[test]
    fn test_zero_hosts_rejected() {
        assert!(Args::try_parse_from(["cartesian-cut", "graph.gr", "--hosts", "0"]).is_err());
        assert!(Args::try_parse_from(["cartesian-cut", "graph.gr", "--decompose", "0"]).is_err());
        assert!(Args::try_parse_from(["cartesian-cut", "graph.gr", "--layout", "diagonal"]).is_err());
    }
}
