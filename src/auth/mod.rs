//! # 用户认证模块
//!
//! 调用方通过 HS256 签名的 JWT 标识用户，`sub` 为用户ID

pub mod jwt;
pub mod types;

pub use jwt::JwtManager;
pub use types::JwtClaims;

/// 从 `Authorization` 头中提取 Bearer 令牌
#[must_use]
pub fn extract_bearer_token(header_value: &str) -> Option<&str> {
    let (scheme, token) = header_value.trim().split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

/// 从 `Cookie` 头中提取指定名称的值
#[must_use]
pub fn extract_cookie<'a>(header_value: &'a str, name: &str) -> Option<&'a str> {
    header_value.split(';').find_map(|pair| {
        let (key, value) = pair.trim().split_once('=')?;
        (key == name && !value.is_empty()).then_some(value)
    })
}
