//! # 令牌加密模块
//!
//! 访问令牌与刷新令牌落库前使用 AES-256-GCM 加密，每次加密使用新的随机数

use aes_gcm::{
    Aes256Gcm,
    aead::{Aead, AeadCore, KeyInit, OsRng},
};
use base64::{Engine as _, engine::general_purpose};
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::error::{HubError, Result};

/// 加密密钥所在的环境变量
pub const TOKEN_KEY_ENV: &str = "CONNECTION_HUB_TOKEN_KEY";

/// 加密后的值
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedValue {
    /// Base64编码的加密数据
    pub data: String,
    /// Base64编码的随机数
    pub nonce: String,
}

/// 令牌加密器
#[derive(Clone)]
pub struct TokenCipher {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for TokenCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCipher").finish_non_exhaustive()
    }
}

impl TokenCipher {
    /// 创建新的加密器
    #[must_use]
    pub fn new(key: &[u8; 32]) -> Self {
        let key: [u8; 32] = *key;
        let key = key.into();
        let cipher = Aes256Gcm::new(&key);
        Self { cipher }
    }

    /// 从64位十六进制字符串创建
    pub fn from_hex(key_str: &str) -> Result<Self> {
        crate::ensure_config!(
            key_str.len() == 64,
            "令牌加密密钥必须是64个字符的十六进制字符串（32字节）"
        );

        let key_bytes = hex::decode(key_str)
            .map_err(|e| HubError::config_with_source("令牌加密密钥格式错误", e))?;

        let key: [u8; 32] = key_bytes
            .try_into()
            .map_err(|_| HubError::config("令牌加密密钥必须是32字节"))?;
        Ok(Self::new(&key))
    }

    /// 从环境变量创建，没有默认密钥
    pub fn from_env() -> Result<Self> {
        let key_str = std::env::var(TOKEN_KEY_ENV)
            .map_err(|_| crate::config_error!("未设置环境变量 {}", TOKEN_KEY_ENV))?;
        Self::from_hex(key_str.trim())
    }

    /// 加密字符串
    pub fn encrypt(&self, plaintext: &str) -> Result<EncryptedValue> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| {
                HubError::crypto_with_source(
                    "令牌加密失败",
                    anyhow::anyhow!("AES-GCM encryption failed: {e}"),
                )
            })?;

        Ok(EncryptedValue {
            data: general_purpose::STANDARD.encode(&ciphertext),
            nonce: general_purpose::STANDARD.encode(nonce),
        })
    }

    /// 解密字符串
    pub fn decrypt(&self, encrypted: &EncryptedValue) -> Result<String> {
        let ciphertext = general_purpose::STANDARD
            .decode(&encrypted.data)
            .map_err(|e| HubError::crypto_with_source("加密数据格式错误", e))?;

        let nonce_bytes = general_purpose::STANDARD
            .decode(&encrypted.nonce)
            .map_err(|e| HubError::crypto_with_source("加密随机数格式错误", e))?;

        let nonce_bytes: [u8; 12] = nonce_bytes
            .try_into()
            .map_err(|_| HubError::crypto("加密随机数长度错误"))?;
        let nonce = nonce_bytes.into();

        let plaintext = self
            .cipher
            .decrypt(&nonce, ciphertext.as_ref())
            .map_err(|e| {
                HubError::crypto_with_source(
                    "令牌解密失败",
                    anyhow::anyhow!("AES-GCM decryption failed: {e}"),
                )
            })?;

        String::from_utf8(plaintext)
            .map_err(|e| HubError::crypto_with_source("解密后的数据不是有效的UTF-8字符串", e))
    }

    /// 生成新的加密密钥
    #[must_use]
    pub fn generate_key() -> String {
        let mut key = [0u8; 32];
        OsRng.fill_bytes(&mut key);
        hex::encode(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_decrypt() {
        let cipher = TokenCipher::new(&[7u8; 32]);

        let plaintext = "ya29.a0AfH6SMBx";
        let encrypted = cipher.encrypt(plaintext).unwrap();
        assert_ne!(encrypted.data, plaintext);
        assert_eq!(cipher.decrypt(&encrypted).unwrap(), plaintext);
    }

    #[test]
    fn test_nonce_is_fresh_per_encryption() {
        let cipher = TokenCipher::new(&[1u8; 32]);
        let a = cipher.encrypt("same").unwrap();
        let b = cipher.encrypt("same").unwrap();
        assert_ne!(a.nonce, b.nonce);
        assert_ne!(a.data, b.data);
    }

    #[test]
    fn test_wrong_key_fails() {
        let encrypted = TokenCipher::new(&[1u8; 32]).encrypt("secret").unwrap();
        let error = TokenCipher::new(&[2u8; 32]).decrypt(&encrypted).unwrap_err();
        assert_eq!(error.code(), "CRYPTO_ERROR");
    }

    #[test]
    fn test_generate_key() {
        let key1 = TokenCipher::generate_key();
        let key2 = TokenCipher::generate_key();

        assert_eq!(key1.len(), 64);
        assert_ne!(key1, key2);
        assert!(TokenCipher::from_hex(&key1).is_ok());
    }

    #[test]
    fn test_from_hex_rejects_bad_input() {
        assert!(TokenCipher::from_hex("abcd").is_err());
        assert!(TokenCipher::from_hex(&"zz".repeat(32)).is_err());
    }
}
