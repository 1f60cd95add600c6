mod cartesian;
pub use cartesian::*;

mod logger;
pub use logger::{init_logging, set_log_level};

/// Initializes MPI and Logging
#[cfg(feature = "mpi")]
pub fn init() -> anyhow::Result<(mpi::environment::Universe, MpiTransport)> {
    use mpi::traits::Communicator;

    let universe = mpi::initialize().ok_or(anyhow::anyhow!("MPI Not Initialized"))?;
    let world = universe.world();

    logger::init_logging(world.rank() as usize);

    Ok((universe, MpiTransport::new(world)))
}
