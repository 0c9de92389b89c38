use crate::directory::Directory;
use anyhow::Result;
use std::sync::Arc;

/// Liveness probe behind `/health`: the process is healthy when its
/// directory store answers.
pub async fn health_check(directory: &Arc<dyn Directory>) -> Result<()> {
    directory.ping().await?;
    Ok(())
}
