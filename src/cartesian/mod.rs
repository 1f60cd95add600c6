mod addressing;
mod bitset;
mod config;
mod csr;
mod edges;
mod gr;
mod graph;
mod grid;
mod messagemanager;
mod mirrors;
#[cfg(feature = "mpi")]
mod mpicommlayer;
mod partner;
mod ranges;
mod statistics;
mod traits;
mod transport;
mod wire;

pub use addressing::*;
pub use bitset::*;
pub use config::*;
pub use csr::*;
pub use gr::*;
pub use graph::*;
pub use grid::*;
pub use messagemanager::*;
#[cfg(feature = "mpi")]
pub use mpicommlayer::*;
pub use partner::*;
pub use ranges::*;
pub use traits::*;
pub use transport::*;
pub use wire::*;
