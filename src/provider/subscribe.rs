//! Remote subscription providers
//!
//! Every kind except `custom` fetches its URL through the shared
//! [`ResourceLoader`](super::ResourceLoader) and parses the body according
//! to the provider kind.

use async_trait::async_trait;
use tracing::debug;

use super::subscription::{
    parse_shadowsocks_json, parse_shadowsocks_subscription, parse_shadowsocksr_subscription,
    parse_ssd, parse_trojan_subscription, parse_v2rayn_subscription, ParseHints,
};
use super::{clash, relay_url, NodeProvider, ProviderBase, ProviderError, ProviderKind};
use crate::cache::SubscriptionCacheItem;
use crate::node::NodeConfig;
use crate::provider::SubscriptionUserinfo;

/// Parse a fetched body for the given provider kind
pub fn parse_body(
    kind: ProviderKind,
    body: &str,
    hints: &ParseHints,
) -> Result<Vec<NodeConfig>, String> {
    match kind {
        ProviderKind::Clash => clash::parse_clash_config(body, hints),
        ProviderKind::ShadowsocksSubscribe => Ok(parse_shadowsocks_subscription(body, hints)),
        ProviderKind::ShadowsocksrSubscribe => Ok(parse_shadowsocksr_subscription(body, hints)),
        ProviderKind::ShadowsocksJsonSubscribe => parse_shadowsocks_json(body, hints),
        ProviderKind::V2rayNSubscribe => Ok(parse_v2rayn_subscription(body, hints)),
        ProviderKind::Ssd => parse_ssd(body, hints),
        ProviderKind::Trojan => Ok(parse_trojan_subscription(body, hints)),
        ProviderKind::Custom => Err("custom providers have no subscription body".to_string()),
    }
}

pub struct SubscribeProvider {
    base: ProviderBase,
}

impl SubscribeProvider {
    pub fn new(base: ProviderBase) -> Self {
        Self { base }
    }

    /// Subscription URL after the relay rewrite
    pub fn url(&self) -> String {
        let url = self.base.config.url.as_deref().unwrap_or_default();
        relay_url(url, self.base.config.relay_url.as_ref())
    }

    async fn fetch(
        &self,
        request_user_agent: Option<&str>,
    ) -> Result<SubscriptionCacheItem, ProviderError> {
        let agent = request_user_agent.or(self.base.config.request_user_agent.as_deref());
        let item = self
            .base
            .loader
            .request_cacheable_resource(&self.url(), agent)
            .await?;
        Ok(item)
    }
}

#[async_trait]
impl NodeProvider for SubscribeProvider {
    fn base(&self) -> &ProviderBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ProviderBase {
        &mut self.base
    }

    fn supports_subscription_userinfo(&self) -> bool {
        true
    }

    async fn get_subscription_userinfo(
        &self,
        request_user_agent: Option<&str>,
    ) -> Result<Option<SubscriptionUserinfo>, ProviderError> {
        Ok(self.fetch(request_user_agent).await?.subscription_userinfo)
    }

    async fn get_node_list(
        &mut self,
        request_user_agent: Option<&str>,
    ) -> Result<Vec<NodeConfig>, ProviderError> {
        let item = self.fetch(request_user_agent).await?;
        let kind = self.base.config.kind;

        let mut nodes =
            parse_body(kind, &item.body, &self.base.hints()).map_err(|message| ProviderError::Parse {
                provider: self.base.name.clone(),
                kind,
                message,
            })?;
        debug!("{} parsed {} nodes from {}", self.base.name, nodes.len(), kind);

        for node in nodes.iter_mut() {
            self.base.attach_external_client(node);
        }
        Ok(nodes)
    }
}
