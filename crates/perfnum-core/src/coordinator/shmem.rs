//! SHMEM coordinator: create the region, then idle — workers pull their
//! own work, so the coordinator has no work items to hand out.

use std::time::Duration;

use perfnum_config::Settings;

use crate::error::PerfResult;
use crate::shm::ShmRegion;
use crate::signal;

/// Create the shared-memory region for `limit` and idle until a
/// termination signal is caught, then signal every live worker and tear
/// the region down.
pub fn run(limit: i64, settings: &Settings) -> PerfResult<()> {
    let region = ShmRegion::create(limit, settings)?;
    tracing::info!(limit, pid = region.manage_pid(), "shmem region created");

    while !signal::shutdown_requested() {
        std::thread::sleep(Duration::from_millis(100));
    }

    tracing::info!("shutdown signal observed, tearing down shmem region");
    region.teardown();
    Ok(())
}
