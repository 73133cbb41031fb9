//! Inline node lists

use async_trait::async_trait;

use super::{NodeProvider, ProviderBase, ProviderError};
use crate::node::NodeConfig;

/// Serves the `node-list` written in the configuration file
pub struct CustomProvider {
    base: ProviderBase,
}

impl CustomProvider {
    pub fn new(base: ProviderBase) -> Self {
        Self { base }
    }
}

#[async_trait]
impl NodeProvider for CustomProvider {
    fn base(&self) -> &ProviderBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ProviderBase {
        &mut self.base
    }

    async fn get_node_list(
        &mut self,
        _request_user_agent: Option<&str>,
    ) -> Result<Vec<NodeConfig>, ProviderError> {
        let raw = self.base.config.node_list.clone().unwrap_or_default();

        // Decode everything first so a bad entry leaves the port counter alone
        let mut nodes = raw
            .into_iter()
            .enumerate()
            .map(|(index, value)| {
                serde_json::from_value::<NodeConfig>(value).map_err(|e| ProviderError::InvalidNode {
                    provider: self.base.name.clone(),
                    message: format!("node-list[{}]: {}", index, e),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        for node in nodes.iter_mut() {
            self.base.attach_external_client(node);
        }
        Ok(nodes)
    }
}
