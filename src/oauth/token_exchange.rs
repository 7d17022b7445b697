//! # 令牌交换客户端
//!
//! 授权码换令牌、刷新令牌、撤销令牌。只有网络层失败（连接失败、超时、5xx、429）才会重试；
//! 提供商明确拒绝时直接返回，授权码只能使用一次。

use reqwest::{StatusCode, header};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::providers::{SHOP_PARAM, TokenRequestFormat, extract_error};
use super::{ProviderDescriptor, ProviderExtra, ProviderId, ProviderRegistry, TokenResult};
use crate::config::OAuthConfig;
use crate::error::{HubError, Result};
use crate::logging::{LogComponent, LogStage};
use crate::{ldebug, linfo, lwarn};

/// 错误响应体在错误信息中保留的最大长度
const MAX_ERROR_BODY_CHARS: usize = 256;

/// 重试策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    #[must_use]
    pub fn from_config(config: &OAuthConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.retry_base_delay_ms),
        }
    }

    /// 第 attempt 次失败后的退避时间（指数增长）
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

/// 令牌交换客户端
#[derive(Debug, Clone)]
pub struct TokenExchangeClient {
    http_client: reqwest::Client,
    registry: Arc<ProviderRegistry>,
    retry: RetryPolicy,
}

impl TokenExchangeClient {
    /// 按配置创建客户端
    pub fn new(registry: Arc<ProviderRegistry>, config: &OAuthConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_seconds))
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| HubError::config_with_source("HTTP 客户端创建失败", e))?;

        Ok(Self {
            http_client,
            registry,
            retry: RetryPolicy::from_config(config),
        })
    }

    #[must_use]
    pub const fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// 授权码换取令牌
    pub async fn exchange(
        &self,
        provider: ProviderId,
        code: &str,
        redirect_uri: &str,
        extra: &ProviderExtra,
        cancel: &CancellationToken,
    ) -> Result<TokenResult> {
        let descriptor = self.registry.describe(provider)?;
        let url = descriptor.token_endpoint(extra)?;
        let params = descriptor.exchange_params(code, redirect_uri);

        let mut token = self
            .send_with_retry(&descriptor, "exchange", &url, &params, cancel)
            .await?;
        if provider.is_shop_scoped() {
            if let Some(shop) = extra.get(SHOP_PARAM) {
                token.extra.insert(SHOP_PARAM.to_string(), shop.clone());
            }
        }

        linfo!(
            "system",
            LogStage::TokenExchange,
            LogComponent::TokenExchange,
            "code_exchanged",
            "授权码交换成功",
            provider = %provider,
            has_refresh_token = token.refresh_token.is_some()
        );
        Ok(token)
    }

    /// 使用刷新令牌换取新令牌
    pub async fn refresh(
        &self,
        provider: ProviderId,
        refresh_token: &str,
        extra: &ProviderExtra,
        cancel: &CancellationToken,
    ) -> Result<TokenResult> {
        let descriptor = self.registry.describe(provider)?;
        let Some(params) = descriptor.refresh_params(refresh_token) else {
            return Err(HubError::upstream_rejected(
                provider.as_str(),
                "unsupported_grant_type",
                Some("提供商不支持刷新令牌".to_string()),
            ));
        };
        let url = descriptor.token_endpoint(extra)?;
        self.send_with_retry(&descriptor, "refresh", &url, &params, cancel)
            .await
    }

    /// 撤销令牌，提供商不支持时返回 `Ok(false)`
    pub async fn revoke(
        &self,
        provider: ProviderId,
        token: &str,
        extra: &ProviderExtra,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        let descriptor = self.registry.describe(provider)?;
        let Some(url) = descriptor.revoke_endpoint(extra)? else {
            ldebug!(
                "system",
                LogStage::Revocation,
                LogComponent::TokenExchange,
                "revoke_unsupported",
                "提供商不支持撤销令牌",
                provider = %provider
            );
            return Ok(false);
        };

        let params = descriptor.revoke_params(token);
        let response = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(HubError::Cancelled),
            response = self.http_client.post(&url).form(&params).send() => response
                .map_err(|e| HubError::upstream_unreachable_with_source(provider.as_str(), "撤销请求失败", e))?,
        };

        let status = response.status();
        if status.is_success() {
            return Ok(true);
        }
        if status.is_server_error() {
            return Err(HubError::upstream_unreachable(
                provider.as_str(),
                format!("撤销请求返回 HTTP {status}"),
            ));
        }
        Err(HubError::upstream_rejected(
            provider.as_str(),
            format!("http_{}", status.as_u16()),
            None,
        ))
    }

    async fn send_with_retry(
        &self,
        descriptor: &ProviderDescriptor,
        operation: &str,
        url: &str,
        params: &[(String, String)],
        cancel: &CancellationToken,
    ) -> Result<TokenResult> {
        let mut attempt = 1;
        loop {
            match self.send_once(descriptor, url, params, cancel).await {
                Err(error) if error.is_retryable() && attempt < self.retry.max_attempts => {
                    let delay = self.retry.backoff(attempt);
                    lwarn!(
                        "system",
                        LogStage::TokenExchange,
                        LogComponent::TokenExchange,
                        "retrying",
                        "令牌请求失败，准备重试",
                        provider = %descriptor.id,
                        operation = operation,
                        attempt = attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %error
                    );
                    tokio::select! {
                        biased;
                        () = cancel.cancelled() => return Err(HubError::Cancelled),
                        () = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    async fn send_once(
        &self,
        descriptor: &ProviderDescriptor,
        url: &str,
        params: &[(String, String)],
        cancel: &CancellationToken,
    ) -> Result<TokenResult> {
        let provider = descriptor.id.as_str();
        let request = self
            .http_client
            .post(url)
            .header(header::ACCEPT, "application/json");
        let request = match descriptor.id.token_format() {
            TokenRequestFormat::Form => request.form(params),
            TokenRequestFormat::Json => request.json(
                &params
                    .iter()
                    .map(|(key, value)| (key.clone(), Value::String(value.clone())))
                    .collect::<Map<_, _>>(),
            ),
        };

        let response = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(HubError::Cancelled),
            response = request.send() => response
                .map_err(|e| HubError::upstream_unreachable_with_source(provider, "令牌请求发送失败", e))?,
        };

        let status = response.status();
        let body = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(HubError::Cancelled),
            body = response.text() => body
                .map_err(|e| HubError::upstream_unreachable_with_source(provider, "读取令牌响应失败", e))?,
        };

        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(HubError::upstream_unreachable(
                provider,
                format!("HTTP {status}"),
            ));
        }

        let value: Value = match serde_json::from_str(&body) {
            Ok(value) => value,
            Err(_) if status.is_success() => {
                return Err(HubError::malformed(provider, "令牌响应不是有效的 JSON"));
            }
            Err(_) => {
                return Err(HubError::upstream_rejected(
                    provider,
                    format!("http_{}", status.as_u16()),
                    Some(truncate(&body)),
                ));
            }
        };

        if !status.is_success() {
            let (error, description) = extract_error(&value)
                .unwrap_or_else(|| (format!("http_{}", status.as_u16()), None));
            ldebug!(
                "system",
                LogStage::TokenExchange,
                LogComponent::TokenExchange,
                "token_rejected",
                "提供商拒绝令牌请求",
                provider = provider,
                status = status.as_u16(),
                error = %error
            );
            return Err(HubError::upstream_rejected(provider, error, description));
        }

        descriptor.parse_token_response(&value)
    }
}

fn truncate(body: &str) -> String {
    body.chars().take(MAX_ERROR_BODY_CHARS).collect()
}
