//! # 授权地址构建

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::{RngCore, rngs::OsRng};
use serde::Serialize;
use std::sync::Arc;
use url::Url;

use super::{PendingStateStore, ProviderExtra, ProviderId, ProviderRegistry};
use crate::error::{HubError, Result};
use crate::linfo;
use crate::logging::{LogComponent, LogStage};

/// state 令牌的随机字节数
const STATE_BYTES: usize = 32;

/// 生成不可预测的 state 令牌（URL 安全）
#[must_use]
pub fn generate_state_token() -> String {
    let mut bytes = [0u8; STATE_BYTES];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// 发起授权的结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthorizationUrl {
    pub url: String,
    pub state: String,
}

/// 授权地址构建器
#[derive(Debug, Clone)]
pub struct AuthorizationRequestBuilder {
    registry: Arc<ProviderRegistry>,
    states: Arc<PendingStateStore>,
    public_base_url: String,
    api_prefix: String,
}

impl AuthorizationRequestBuilder {
    #[must_use]
    pub fn new(
        registry: Arc<ProviderRegistry>,
        states: Arc<PendingStateStore>,
        public_base_url: &str,
        api_prefix: &str,
    ) -> Self {
        Self {
            registry,
            states,
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
            api_prefix: api_prefix.trim_end_matches('/').to_string(),
        }
    }

    /// 默认回调地址 `{public_base_url}{api_prefix}/oauth/{provider}/callback`
    #[must_use]
    pub fn default_redirect_uri(&self, provider: ProviderId) -> String {
        format!(
            "{}{}/oauth/{provider}/callback",
            self.public_base_url, self.api_prefix
        )
    }

    /// 构建授权地址并记录待完成授权
    pub async fn build_auth_url(
        &self,
        user_id: i32,
        provider: ProviderId,
        redirect_uri: Option<&str>,
        extra: &ProviderExtra,
    ) -> Result<AuthorizationUrl> {
        let descriptor = self.registry.describe(provider)?;
        let extra = descriptor.normalize_extra(extra)?;

        let redirect_uri = match redirect_uri.map(str::trim).filter(|uri| !uri.is_empty()) {
            Some(uri) => {
                Url::parse(uri).map_err(|_| HubError::missing_parameter("redirect_uri"))?;
                uri.to_string()
            }
            None => self.default_redirect_uri(provider),
        };

        let state = generate_state_token();
        let url = descriptor.authorization_url(&state, &redirect_uri, &extra)?;
        self.states
            .insert(&state, user_id, provider, &redirect_uri, &extra)
            .await?;

        linfo!(
            "system",
            LogStage::Authorization,
            LogComponent::AuthorizeBuilder,
            "auth_url_built",
            "已生成授权地址",
            user_id = user_id,
            provider = %provider
        );

        Ok(AuthorizationUrl {
            url: url.into(),
            state,
        })
    }
}
