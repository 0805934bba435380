use async_trait::async_trait;

use super::Deployer;
use crate::error::{Error, Result};

/// Deployer used when no deployment target is configured. Every deploy
/// fails, which the executor records as a non-fatal action failure.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnconfiguredDeployer;

#[async_trait]
impl Deployer for UnconfiguredDeployer {
    async fn deploy(&self, target: &str) -> Result<String> {
        Err(Error::DeployUnavailable(target.to_string()))
    }
}
