//! Recovery of orphaned permits
//!
//! A process killed between acquiring and releasing a permit leaves its task
//! `doing` forever. The sweep hands every such permit back. It must only run
//! while no peer is executing, otherwise it would release live permits.

use tracing::info;

use crate::database::repositories::TaskSeaOrmRepository;
use crate::errors::RepositoryResult;

pub struct RecoverySweep {
    tasks: TaskSeaOrmRepository,
}

impl RecoverySweep {
    pub fn new(tasks: TaskSeaOrmRepository) -> Self {
        Self { tasks }
    }

    /// Reset every valid `doing` task to `ready`; returns how many were reset
    pub async fn run(&self) -> RepositoryResult<u64> {
        let reset = self.tasks.reset_orphaned_permits().await?;
        info!(reset, "recovery sweep finished");
        Ok(reset)
    }
}
