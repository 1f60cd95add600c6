use anyhow::anyhow;
use log::{debug, error};

use super::{statistics::NodeSet, Addressing, MessageManager, SendBuffer, Transport};

/// idx = real host, element = global ids stored here that the host owns.
///
/// Row peers' ranges are scanned first, slice by slice, then the blocks of this
/// column that only contribute edge destinations.
pub(crate) fn build_mirror_lists(addr: &Addressing, nodes: &NodeSet) -> Vec<Vec<u64>> {
    let grid = addr.grid();
    let mut mirrors = vec![Vec::new(); grid.num_hosts()];

    let mut collect = |block: usize| {
        let owner = grid.virtual_to_real(block);
        mirrors[owner].extend(
            addr.ranges()
                .range(block)
                .filter(|gid| nodes.local_ids.contains(gid)),
        );
    };

    for slice in 0..grid.decompose_factor() {
        for peer in addr.row_peers() {
            collect(grid.virtual_host(peer, slice));
        }
    }
    for block in addr.incoming_only_blocks() {
        collect(block);
    }

    debug!(
        "Mirror counts per host: {:?}",
        mirrors.iter().map(Vec::len).collect::<Vec<_>>()
    );
    mirrors
}

/// Send every host the list of its nodes mirrored here; what comes back are
/// the nodes owned here that each host mirrors.
pub(crate) fn exchange_master_lists<T: Transport>(
    addr: &Addressing,
    mirrors: &[Vec<u64>],
    manager: &mut MessageManager<T>,
) -> anyhow::Result<Vec<Vec<u64>>> {
    let host = addr.host_id();
    let num_hosts = addr.grid().num_hosts();

    for (peer, list) in mirrors.iter().enumerate() {
        if peer == host {
            continue;
        }
        let mut buf = SendBuffer::with_capacity(8 + 8 * list.len());
        buf.push(list);
        manager.send(peer, buf);
    }
    manager.flush();

    let mut masters: Vec<Option<Vec<u64>>> = vec![None; num_hosts];
    manager.receive_messages(num_hosts - 1, |sender, mut buf| {
        if sender >= num_hosts || sender == host || masters[sender].is_some() {
            let err = anyhow!("Unexpected master list from host {}", sender);
            error!("{}", err);
            return Err(err);
        }
        let list: Vec<u64> = buf.pop()?;
        if let Some(&gid) = list.iter().find(|&&gid| !addr.is_owned(gid)) {
            let err = anyhow!(
                "Host {} mirrors node {} which host {} does not own",
                sender,
                gid,
                host
            );
            error!("{}", err);
            return Err(err);
        }
        masters[sender] = Some(list);
        Ok(())
    })?;
    manager.finish_round();

    Ok(masters.into_iter().map(Option::unwrap_or_default).collect())
}
