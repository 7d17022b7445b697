//! # 提供商描述注册表
//!
//! 启动时由配置构建，之后只读。每个提供商的差异集中在 `ProviderId` 的匹配分支中：
//! 授权参数、令牌请求体格式、scope 分隔符、响应解析。

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use url::Url;

use super::{ProviderExtra, TokenResult};
use crate::config::{OAuthConfig, ProviderSettings};
use crate::error::{HubError, Result};
use crate::linfo;
use crate::logging::{LogComponent, LogStage};

/// Shopify 店铺参数名
pub const SHOP_PARAM: &str = "shop";

/// 支持的提供商
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderId {
    Google,
    Facebook,
    Instagram,
    #[serde(rename = "linkedin")]
    LinkedIn,
    Shopify,
    Snapchat,
    #[serde(rename = "tiktok")]
    TikTok,
}

/// 令牌请求体格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenRequestFormat {
    Form,
    Json,
}

/// 内置默认端点
struct DefaultEndpoints {
    authorize: &'static str,
    token: &'static str,
    revoke: Option<&'static str>,
}

impl ProviderId {
    pub const ALL: [Self; 7] = [
        Self::Google,
        Self::Facebook,
        Self::Instagram,
        Self::LinkedIn,
        Self::Shopify,
        Self::Snapchat,
        Self::TikTok,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Google => "google",
            Self::Facebook => "facebook",
            Self::Instagram => "instagram",
            Self::LinkedIn => "linkedin",
            Self::Shopify => "shopify",
            Self::Snapchat => "snapchat",
            Self::TikTok => "tiktok",
        }
    }

    /// 是否需要店铺域名
    #[must_use]
    pub const fn is_shop_scoped(self) -> bool {
        matches!(self, Self::Shopify)
    }

    #[must_use]
    pub const fn token_format(self) -> TokenRequestFormat {
        match self {
            Self::Shopify => TokenRequestFormat::Json,
            _ => TokenRequestFormat::Form,
        }
    }

    #[must_use]
    pub const fn scope_separator(self) -> &'static str {
        match self {
            Self::Facebook | Self::Instagram | Self::Shopify | Self::TikTok => ",",
            Self::Google | Self::LinkedIn | Self::Snapchat => " ",
        }
    }

    /// 客户端 ID 的参数名，TikTok 使用 `client_key`
    #[must_use]
    pub const fn client_id_param(self) -> &'static str {
        match self {
            Self::TikTok => "client_key",
            _ => "client_id",
        }
    }

    /// 是否支持 refresh_token 授权类型
    #[must_use]
    pub const fn supports_refresh(self) -> bool {
        !matches!(self, Self::Shopify | Self::Facebook)
    }

    const fn default_endpoints(self) -> DefaultEndpoints {
        match self {
            Self::Google => DefaultEndpoints {
                authorize: "https://accounts.google.com/o/oauth2/v2/auth",
                token: "https://oauth2.googleapis.com/token",
                revoke: Some("https://oauth2.googleapis.com/revoke"),
            },
            Self::Facebook => DefaultEndpoints {
                authorize: "https://www.facebook.com/v19.0/dialog/oauth",
                token: "https://graph.facebook.com/v19.0/oauth/access_token",
                revoke: None,
            },
            Self::Instagram => DefaultEndpoints {
                authorize: "https://api.instagram.com/oauth/authorize",
                token: "https://api.instagram.com/oauth/access_token",
                revoke: None,
            },
            Self::LinkedIn => DefaultEndpoints {
                authorize: "https://www.linkedin.com/oauth/v2/authorization",
                token: "https://www.linkedin.com/oauth/v2/accessToken",
                revoke: Some("https://www.linkedin.com/oauth/v2/revoke"),
            },
            Self::Shopify => DefaultEndpoints {
                authorize: "https://{shop}/admin/oauth/authorize",
                token: "https://{shop}/admin/oauth/access_token",
                revoke: None,
            },
            Self::Snapchat => DefaultEndpoints {
                authorize: "https://accounts.snapchat.com/login/oauth2/authorize",
                token: "https://accounts.snapchat.com/login/oauth2/access_token",
                revoke: None,
            },
            Self::TikTok => DefaultEndpoints {
                authorize: "https://www.tiktok.com/v2/auth/authorize/",
                token: "https://open.tiktokapis.com/v2/oauth/token/",
                revoke: Some("https://open.tiktokapis.com/v2/oauth/revoke/"),
            },
        }
    }

    fn default_scopes(self) -> Vec<String> {
        let scopes: &[&str] = match self {
            Self::Google => &["openid", "email", "profile"],
            Self::Facebook => &["public_profile", "email", "pages_show_list"],
            Self::Instagram => &["user_profile", "user_media"],
            Self::LinkedIn => &["openid", "profile", "email"],
            Self::Shopify => &["read_products", "read_orders"],
            Self::Snapchat => &["https://auth.snapchat.com/oauth2/api/snapchat-marketing-api"],
            Self::TikTok => &["user.info.basic", "video.list"],
        };
        scopes.iter().map(ToString::to_string).collect()
    }

    /// 授权地址上的固定参数
    fn fixed_auth_params(self) -> &'static [(&'static str, &'static str)] {
        match self {
            // 没有 offline + consent，Google 只在首次授权时下发 refresh_token
            Self::Google => &[
                ("access_type", "offline"),
                ("prompt", "consent"),
                ("include_granted_scopes", "true"),
            ],
            _ => &[],
        }
    }

    /// 令牌响应中需要保留的附加字段
    const fn extra_response_fields(self) -> &'static [&'static str] {
        match self {
            Self::Instagram => &["user_id"],
            Self::TikTok => &["open_id", "refresh_expires_in"],
            Self::LinkedIn => &["refresh_token_expires_in"],
            Self::Google | Self::Snapchat | Self::Facebook | Self::Shopify => &[],
        }
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderId {
    type Err = HubError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|id| id.as_str() == normalized)
            .ok_or_else(|| HubError::unknown_provider(s))
    }
}

/// 校验并规范化店铺域名：`demo` → `demo.myshopify.com`
pub fn normalize_shop_domain(raw: &str) -> Result<String> {
    let shop = raw.trim().to_ascii_lowercase();
    let valid = !shop.is_empty()
        && !shop.starts_with(['.', '-'])
        && !shop.ends_with(['.', '-'])
        && !shop.contains("..")
        && shop
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.');
    if !valid {
        return Err(HubError::missing_parameter(SHOP_PARAM));
    }
    if shop.contains('.') {
        Ok(shop)
    } else {
        Ok(format!("{shop}.myshopify.com"))
    }
}

/// 提供商描述
#[derive(Clone)]
pub struct ProviderDescriptor {
    pub id: ProviderId,
    /// 可包含 `{shop}` 占位符
    pub authorize_url: String,
    /// 可包含 `{shop}` 占位符
    pub token_url: String,
    pub revoke_url: Option<String>,
    pub client_id: String,
    pub client_secret: String,
    pub scopes: Vec<String>,
    pub extra_params: BTreeMap<String, String>,
}

impl fmt::Debug for ProviderDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderDescriptor")
            .field("id", &self.id)
            .field("authorize_url", &self.authorize_url)
            .field("token_url", &self.token_url)
            .field("revoke_url", &self.revoke_url)
            .field("client_id", &self.client_id)
            .field("scopes", &self.scopes)
            .finish_non_exhaustive()
    }
}

/// 对外展示的提供商信息
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderSummary {
    pub provider: ProviderId,
    pub scopes: Vec<String>,
    pub shop_scoped: bool,
}

impl ProviderDescriptor {
    /// 由配置合并内置默认值
    #[must_use]
    pub fn from_settings(id: ProviderId, settings: &ProviderSettings) -> Self {
        let defaults = id.default_endpoints();
        Self {
            id,
            authorize_url: settings
                .authorize_url
                .clone()
                .unwrap_or_else(|| defaults.authorize.to_string()),
            token_url: settings
                .token_url
                .clone()
                .unwrap_or_else(|| defaults.token.to_string()),
            revoke_url: settings
                .revoke_url
                .clone()
                .or_else(|| defaults.revoke.map(ToString::to_string)),
            client_id: settings.client_id.clone(),
            client_secret: settings.client_secret.clone(),
            scopes: settings
                .scopes
                .clone()
                .unwrap_or_else(|| id.default_scopes()),
            extra_params: settings.extra_params.clone(),
        }
    }

    /// 店铺范围提供商必须带 `shop`，返回规范化后的参数
    pub fn normalize_extra(&self, extra: &ProviderExtra) -> Result<ProviderExtra> {
        let mut normalized = extra.clone();
        if self.id.is_shop_scoped() {
            let shop = extra
                .get(SHOP_PARAM)
                .filter(|shop| !shop.trim().is_empty())
                .ok_or_else(|| HubError::missing_parameter(SHOP_PARAM))?;
            normalized.insert(SHOP_PARAM.to_string(), normalize_shop_domain(shop)?);
        }
        Ok(normalized)
    }

    fn expand_template(&self, template: &str, extra: &ProviderExtra) -> Result<String> {
        if !template.contains("{shop}") {
            return Ok(template.to_string());
        }
        let shop = extra
            .get(SHOP_PARAM)
            .ok_or_else(|| HubError::missing_parameter(SHOP_PARAM))?;
        Ok(template.replace("{shop}", shop))
    }

    /// 解析后的令牌端点
    pub fn token_endpoint(&self, extra: &ProviderExtra) -> Result<String> {
        self.expand_template(&self.token_url, extra)
    }

    /// 解析后的撤销端点
    pub fn revoke_endpoint(&self, extra: &ProviderExtra) -> Result<Option<String>> {
        self.revoke_url
            .as_deref()
            .map(|url| self.expand_template(url, extra))
            .transpose()
    }

    /// 授权地址查询参数，店铺参数由调用方先行校验
    #[must_use]
    pub fn build_auth_params(&self, state: &str, redirect_uri: &str) -> Vec<(String, String)> {
        let mut params = vec![
            (self.id.client_id_param().to_string(), self.client_id.clone()),
            ("redirect_uri".to_string(), redirect_uri.to_string()),
            ("state".to_string(), state.to_string()),
        ];
        if !matches!(self.id, ProviderId::Shopify) {
            params.push(("response_type".to_string(), "code".to_string()));
        }
        if !self.scopes.is_empty() {
            params.push((
                "scope".to_string(),
                self.scopes.join(self.id.scope_separator()),
            ));
        }
        for (key, value) in self.id.fixed_auth_params() {
            params.push(((*key).to_string(), (*value).to_string()));
        }
        for (key, value) in &self.extra_params {
            params.push((key.clone(), value.clone()));
        }
        params
    }

    /// 完整的授权地址
    pub fn authorization_url(
        &self,
        state: &str,
        redirect_uri: &str,
        extra: &ProviderExtra,
    ) -> Result<Url> {
        let extra = self.normalize_extra(extra)?;
        let base = self.expand_template(&self.authorize_url, &extra)?;
        let mut url = Url::parse(&base).map_err(|e| {
            HubError::config_with_source(format!("{} 授权地址无效: {base}", self.id), e)
        })?;
        url.query_pairs_mut()
            .extend_pairs(self.build_auth_params(state, redirect_uri));
        Ok(url)
    }

    /// 授权码换取令牌的请求参数
    #[must_use]
    pub fn exchange_params(&self, code: &str, redirect_uri: &str) -> Vec<(String, String)> {
        match self.id {
            ProviderId::Shopify => vec![
                ("client_id".to_string(), self.client_id.clone()),
                ("client_secret".to_string(), self.client_secret.clone()),
                ("code".to_string(), code.to_string()),
            ],
            _ => vec![
                ("grant_type".to_string(), "authorization_code".to_string()),
                ("code".to_string(), code.to_string()),
                ("redirect_uri".to_string(), redirect_uri.to_string()),
                (self.id.client_id_param().to_string(), self.client_id.clone()),
                ("client_secret".to_string(), self.client_secret.clone()),
            ],
        }
    }

    /// 刷新令牌请求参数，不支持刷新的提供商返回 None
    #[must_use]
    pub fn refresh_params(&self, refresh_token: &str) -> Option<Vec<(String, String)>> {
        if !self.id.supports_refresh() {
            return None;
        }
        Some(vec![
            ("grant_type".to_string(), "refresh_token".to_string()),
            ("refresh_token".to_string(), refresh_token.to_string()),
            (self.id.client_id_param().to_string(), self.client_id.clone()),
            ("client_secret".to_string(), self.client_secret.clone()),
        ])
    }

    /// 撤销请求参数
    #[must_use]
    pub fn revoke_params(&self, token: &str) -> Vec<(String, String)> {
        match self.id {
            ProviderId::Google => vec![("token".to_string(), token.to_string())],
            _ => vec![
                ("token".to_string(), token.to_string()),
                (self.id.client_id_param().to_string(), self.client_id.clone()),
                ("client_secret".to_string(), self.client_secret.clone()),
            ],
        }
    }

    /// 将提供商响应标准化为 `TokenResult`
    pub fn parse_token_response(&self, body: &Value) -> Result<TokenResult> {
        if let Some((error, description)) = extract_error(body) {
            return Err(HubError::upstream_rejected(self.id.as_str(), error, description));
        }

        let object = body
            .as_object()
            .ok_or_else(|| HubError::malformed(self.id.as_str(), "响应不是 JSON 对象"))?;
        // 旧版 TikTok 接口把令牌包在 data 里
        let object = match object.get("data").and_then(Value::as_object) {
            Some(data) if data.contains_key("access_token") => data,
            _ => object,
        };

        let access_token = string_field(object, "access_token")
            .ok_or_else(|| HubError::malformed(self.id.as_str(), "缺少 access_token"))?;
        let refresh_token = string_field(object, "refresh_token");
        // 0 表示不过期
        let expires_at = match seconds_field(object, "expires_in") {
            None | Some(0) => None,
            Some(seconds) => Some(expiry_from_now(seconds).ok_or_else(|| {
                HubError::malformed(self.id.as_str(), format!("expires_in 超出范围: {seconds}"))
            })?),
        };
        let scope = match object.get("scope") {
            Some(Value::Array(items)) => Some(
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .collect::<Vec<_>>()
                    .join(self.id.scope_separator()),
            ),
            _ => string_field(object, "scope"),
        };

        let extra = self
            .id
            .extra_response_fields()
            .iter()
            .filter_map(|field| {
                scalar_to_string(object.get(*field)?).map(|value| ((*field).to_string(), value))
            })
            .collect();

        Ok(TokenResult {
            access_token,
            refresh_token,
            expires_at,
            scope,
            extra,
        })
    }
}

/// 从各种错误负载中提取 (error, description)
#[must_use]
pub fn extract_error(body: &Value) -> Option<(String, Option<String>)> {
    let object = body.as_object()?;

    match object.get("error") {
        // OAuth2 标准 / TikTok v2
        Some(Value::String(error)) if !error.is_empty() => {
            return Some((error.clone(), string_field(object, "error_description")));
        }
        // Facebook Graph
        Some(Value::Object(error)) => {
            let code = string_field(error, "type")
                .or_else(|| error.get("code").and_then(scalar_to_string))
                .unwrap_or_else(|| "error".to_string());
            return Some((code, string_field(error, "message")));
        }
        _ => {}
    }

    // Instagram Basic Display
    if let Some(error_type) = string_field(object, "error_type") {
        return Some((error_type, string_field(object, "error_message")));
    }

    // 旧版 TikTok：data.error_code 非 0
    let data = object.get("data").and_then(Value::as_object)?;
    match data.get("error_code").and_then(Value::as_i64) {
        Some(code) if code != 0 => Some((code.to_string(), string_field(data, "description"))),
        _ => None,
    }
}

fn string_field(object: &Map<String, Value>, key: &str) -> Option<String> {
    object
        .get(key)
        .and_then(Value::as_str)
        .filter(|value| !value.is_empty())
        .map(ToString::to_string)
}

/// 令牌有效期上限：十年
const MAX_EXPIRES_IN_SECONDS: i64 = 10 * 365 * 24 * 3600;

/// 兼容数字与数字字符串；浮点数截断，超出 i64 的值饱和到边界
#[allow(clippy::cast_possible_truncation)]
fn seconds_field(object: &Map<String, Value>, key: &str) -> Option<i64> {
    match object.get(key)? {
        Value::Number(number) => number
            .as_i64()
            .or_else(|| number.as_f64().filter(|f| f.is_finite()).map(|f| f as i64)),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

/// 负数或超过上限时返回 None
fn expiry_from_now(seconds: i64) -> Option<DateTime<Utc>> {
    if !(1..=MAX_EXPIRES_IN_SECONDS).contains(&seconds) {
        return None;
    }
    Utc::now().checked_add_signed(Duration::try_seconds(seconds)?)
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        _ => None,
    }
}

/// 提供商注册表
#[derive(Debug, Default)]
pub struct ProviderRegistry {
    descriptors: HashMap<ProviderId, Arc<ProviderDescriptor>>,
}

impl ProviderRegistry {
    /// 由配置构建注册表，未知的提供商键视为配置错误
    pub fn from_config(config: &OAuthConfig) -> Result<Self> {
        let mut descriptors = HashMap::new();
        for (name, settings) in &config.providers {
            let id = ProviderId::from_str(name)
                .map_err(|_| crate::config_error!("不支持的提供商配置: oauth.providers.{}", name))?;
            descriptors.insert(id, Arc::new(ProviderDescriptor::from_settings(id, settings)));
        }

        linfo!(
            "system",
            LogStage::Startup,
            LogComponent::Registry,
            "registry_loaded",
            "提供商注册表加载完成",
            providers = ?descriptors.keys().map(|id| id.as_str()).collect::<Vec<_>>()
        );

        Ok(Self { descriptors })
    }

    /// 由已构建的描述创建（测试与嵌入场景）
    #[must_use]
    pub fn from_descriptors(descriptors: impl IntoIterator<Item = ProviderDescriptor>) -> Self {
        Self {
            descriptors: descriptors
                .into_iter()
                .map(|descriptor| (descriptor.id, Arc::new(descriptor)))
                .collect(),
        }
    }

    /// 获取提供商描述，未配置时返回 `UnknownProvider`
    pub fn describe(&self, id: ProviderId) -> Result<Arc<ProviderDescriptor>> {
        self.descriptors
            .get(&id)
            .cloned()
            .ok_or_else(|| HubError::unknown_provider(id.as_str()))
    }

    /// 已配置的提供商列表
    #[must_use]
    pub fn list(&self) -> Vec<ProviderSummary> {
        let mut summaries: Vec<_> = self
            .descriptors
            .values()
            .map(|descriptor| ProviderSummary {
                provider: descriptor.id,
                scopes: descriptor.scopes.clone(),
                shop_scoped: descriptor.id.is_shop_scoped(),
            })
            .collect();
        summaries.sort_by_key(|summary| summary.provider);
        summaries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use serde_json::json;

    fn descriptor(id: ProviderId) -> ProviderDescriptor {
        ProviderDescriptor::from_settings(
            id,
            &ProviderSettings {
                client_id: "client-123".to_string(),
                client_secret: "secret-456".to_string(),
                ..ProviderSettings::default()
            },
        )
    }

    fn query_map(url: &Url) -> HashMap<String, String> {
        url.query_pairs().into_owned().collect()
    }

    #[rstest]
    #[case("google", ProviderId::Google)]
    #[case("LinkedIn", ProviderId::LinkedIn)]
    #[case(" TikTok ", ProviderId::TikTok)]
    #[case("shopify", ProviderId::Shopify)]
    fn test_parse_provider_id(#[case] raw: &str, #[case] expected: ProviderId) {
        assert_eq!(raw.parse::<ProviderId>().unwrap(), expected);
    }

    #[test]
    fn test_unknown_provider() {
        let error = "myspace".parse::<ProviderId>().unwrap_err();
        assert_eq!(error.code(), "UNKNOWN_PROVIDER");
    }

    #[rstest]
    #[case(ProviderId::Google, " ", "client_id")]
    #[case(ProviderId::Facebook, ",", "client_id")]
    #[case(ProviderId::Instagram, ",", "client_id")]
    #[case(ProviderId::LinkedIn, " ", "client_id")]
    #[case(ProviderId::Snapchat, " ", "client_id")]
    #[case(ProviderId::TikTok, ",", "client_key")]
    fn test_authorization_url(
        #[case] id: ProviderId,
        #[case] separator: &str,
        #[case] client_param: &str,
    ) {
        let descriptor = descriptor(id);
        let url = descriptor
            .authorization_url("state-1", "https://app.example.com/cb", &ProviderExtra::new())
            .unwrap();
        let query = query_map(&url);

        assert_eq!(query[client_param], "client-123");
        assert_eq!(query["state"], "state-1");
        assert_eq!(query["redirect_uri"], "https://app.example.com/cb");
        assert_eq!(query["response_type"], "code");
        assert_eq!(query["scope"], descriptor.scopes.join(separator));
        assert!(!url.as_str().contains("secret-456"));
    }

    #[test]
    fn test_google_requests_offline_access() {
        let url = descriptor(ProviderId::Google)
            .authorization_url("s", "https://app/cb", &ProviderExtra::new())
            .unwrap();
        let query = query_map(&url);
        assert_eq!(query["access_type"], "offline");
        assert_eq!(query["prompt"], "consent");
    }

    #[test]
    fn test_shopify_requires_shop() {
        let descriptor = descriptor(ProviderId::Shopify);
        let error = descriptor
            .authorization_url("s", "https://app/cb", &ProviderExtra::new())
            .unwrap_err();
        assert_eq!(error.code(), "MISSING_REQUIRED_PARAMETER");

        let extra = ProviderExtra::from([(SHOP_PARAM.to_string(), "demo".to_string())]);
        let url = descriptor
            .authorization_url("s", "https://app/cb", &extra)
            .unwrap();
        assert_eq!(url.host_str(), Some("demo.myshopify.com"));
        assert_eq!(url.path(), "/admin/oauth/authorize");
        assert!(!query_map(&url).contains_key("response_type"));

        let extra = ProviderExtra::from([(SHOP_PARAM.to_string(), " Demo-Store ".to_string())]);
        let url = descriptor
            .authorization_url("s", "https://app/cb", &extra)
            .unwrap();
        assert_eq!(url.host_str(), Some("demo-store.myshopify.com"));
        assert!(
            descriptor
                .build_auth_params("s", "https://app/cb")
                .iter()
                .all(|(key, _)| key != SHOP_PARAM)
        );
    }

    #[rstest]
    #[case("demo.myshopify.com", Some("demo.myshopify.com"))]
    #[case("Demo-Store", Some("demo-store.myshopify.com"))]
    #[case("evil.com/path", None)]
    #[case("..", None)]
    #[case("-bad", None)]
    fn test_normalize_shop_domain(#[case] raw: &str, #[case] expected: Option<&str>) {
        assert_eq!(normalize_shop_domain(raw).ok().as_deref(), expected);
    }

    #[test]
    fn test_parse_standard_response() {
        let token = descriptor(ProviderId::Google)
            .parse_token_response(&json!({
                "access_token": "a",
                "refresh_token": "r",
                "expires_in": 3600,
                "scope": "openid email",
                "token_type": "Bearer"
            }))
            .unwrap();

        assert_eq!(token.access_token, "a");
        assert_eq!(token.refresh_token.as_deref(), Some("r"));
        assert_eq!(token.scope.as_deref(), Some("openid email"));
        let remaining = token.expires_at.unwrap() - Utc::now();
        assert!((3590..=3600).contains(&remaining.num_seconds()));
    }

    #[test]
    fn test_parse_string_expires_in_and_extras() {
        let token = descriptor(ProviderId::TikTok)
            .parse_token_response(&json!({
                "access_token": "act.1",
                "refresh_token": "rft.1",
                "expires_in": "86400",
                "open_id": "open-1",
                "refresh_expires_in": 31_536_000,
                "scope": "user.info.basic,video.list"
            }))
            .unwrap();

        assert!(token.expires_at.is_some());
        assert_eq!(token.extra["open_id"], "open-1");
        assert_eq!(token.extra["refresh_expires_in"], "31536000");
    }

    #[rstest]
    #[case(json!(1e300))]
    #[case(json!(9_000_000_000_000_i64))]
    #[case(json!(i64::MAX))]
    #[case(json!(-3600))]
    #[case(json!("-1"))]
    fn test_out_of_range_expires_in_is_malformed(#[case] expires_in: Value) {
        let error = descriptor(ProviderId::Google)
            .parse_token_response(&json!({"access_token": "a", "expires_in": expires_in}))
            .unwrap_err();
        assert_eq!(error.code(), "MALFORMED_RESPONSE");
    }

    #[test]
    fn test_zero_expires_in_means_no_expiry() {
        let token = descriptor(ProviderId::Facebook)
            .parse_token_response(&json!({"access_token": "a", "expires_in": 0}))
            .unwrap();
        assert!(token.expires_at.is_none());
    }

    #[test]
    fn test_google_id_token_is_not_kept() {
        let token = descriptor(ProviderId::Google)
            .parse_token_response(&json!({
                "access_token": "a",
                "id_token": "eyJhbGciOiJSUzI1NiJ9.payload.signature"
            }))
            .unwrap();
        assert!(token.extra.is_empty());
    }

    #[test]
    fn test_parse_non_expiring_shopify_token() {
        let token = descriptor(ProviderId::Shopify)
            .parse_token_response(&json!({
                "access_token": "shpat_1",
                "scope": "read_products,read_orders"
            }))
            .unwrap();
        assert!(token.expires_at.is_none());
        assert!(token.refresh_token.is_none());
    }

    #[rstest]
    #[case(json!({"error": "invalid_grant", "error_description": "Bad code"}), "invalid_grant")]
    #[case(json!({"error": {"message": "Invalid verification code", "type": "OAuthException", "code": 100}}), "OAuthException")]
    #[case(json!({"error_type": "OAuthException", "code": 400, "error_message": "Invalid code"}), "OAuthException")]
    #[case(json!({"data": {"error_code": 10007, "description": "code expired"}}), "10007")]
    fn test_error_payloads_are_rejections(#[case] body: Value, #[case] expected: &str) {
        let error = descriptor(ProviderId::Facebook)
            .parse_token_response(&body)
            .unwrap_err();
        match error {
            HubError::UpstreamRejected { error, .. } => assert_eq!(error, expected),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_missing_access_token_is_malformed() {
        let error = descriptor(ProviderId::LinkedIn)
            .parse_token_response(&json!({"token_type": "Bearer"}))
            .unwrap_err();
        assert_eq!(error.code(), "MALFORMED_RESPONSE");

        let error = descriptor(ProviderId::LinkedIn)
            .parse_token_response(&json!(["not", "an", "object"]))
            .unwrap_err();
        assert_eq!(error.code(), "MALFORMED_RESPONSE");
    }

    #[test]
    fn test_request_params_per_provider() {
        let tiktok = descriptor(ProviderId::TikTok).exchange_params("c", "https://app/cb");
        assert!(tiktok.iter().any(|(k, v)| k == "client_key" && v == "client-123"));

        let shopify = descriptor(ProviderId::Shopify).exchange_params("c", "https://app/cb");
        assert_eq!(shopify.len(), 3);
        assert!(descriptor(ProviderId::Shopify).refresh_params("r").is_none());

        let google = descriptor(ProviderId::Google).revoke_params("tok");
        assert_eq!(google, vec![("token".to_string(), "tok".to_string())]);
    }

    #[test]
    fn test_registry() {
        let registry = ProviderRegistry::from_descriptors([
            descriptor(ProviderId::Shopify),
            descriptor(ProviderId::Google),
        ]);

        assert_eq!(registry.describe(ProviderId::Google).unwrap().id, ProviderId::Google);
        assert_eq!(
            registry.describe(ProviderId::TikTok).unwrap_err().code(),
            "UNKNOWN_PROVIDER"
        );

        let listed: Vec<_> = registry.list().into_iter().map(|s| s.provider).collect();
        assert_eq!(listed, vec![ProviderId::Google, ProviderId::Shopify]);
    }

    #[test]
    fn test_registry_rejects_unknown_config_key() {
        let mut config = OAuthConfig::default();
        config
            .providers
            .insert("myspace".to_string(), ProviderSettings::default());
        assert_eq!(
            ProviderRegistry::from_config(&config).unwrap_err().code(),
            "CONFIG_ERROR"
        );
    }
}
