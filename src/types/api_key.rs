// ABOUTME: Vendor credential shape validation.
// ABOUTME: Checks Google, OpenAI, Anthropic, and Telegram token formats before use.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ApiKeyError {
    #[error("Google API key must be 'AIza' followed by 35 characters")]
    BadGoogleKey,

    #[error("OpenAI API key must be 'sk-' followed by at least 48 alphanumerics")]
    BadOpenAiKey,

    #[error("Anthropic API key must be 'sk-ant-' followed by at least 95 characters")]
    BadAnthropicKey,

    #[error("Telegram bot token must be 8-10 digits, a colon, and a 35-character secret")]
    BadTelegramToken,
}

fn is_token_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_'
}

/// `AIza` followed by exactly 35 of `[0-9A-Za-z_-]`.
pub fn validate_google_key(key: &str) -> Result<(), ApiKeyError> {
    let rest = key.strip_prefix("AIza").ok_or(ApiKeyError::BadGoogleKey)?;
    if rest.len() == 35 && rest.chars().all(is_token_char) {
        Ok(())
    } else {
        Err(ApiKeyError::BadGoogleKey)
    }
}

/// `sk-` followed by at least 48 ASCII alphanumerics.
pub fn validate_openai_key(key: &str) -> Result<(), ApiKeyError> {
    let rest = key.strip_prefix("sk-").ok_or(ApiKeyError::BadOpenAiKey)?;
    // An `sk-ant-` key is not an OpenAI key even though the prefix matches.
    if rest.starts_with("ant-") {
        return Err(ApiKeyError::BadOpenAiKey);
    }
    if rest.len() >= 48 && rest.chars().all(|c| c.is_ascii_alphanumeric()) {
        Ok(())
    } else {
        Err(ApiKeyError::BadOpenAiKey)
    }
}

/// `sk-ant-` followed by at least 95 of `[A-Za-z0-9_-]`.
pub fn validate_anthropic_key(key: &str) -> Result<(), ApiKeyError> {
    let rest = key.strip_prefix("sk-ant-").ok_or(ApiKeyError::BadAnthropicKey)?;
    if rest.len() >= 95 && rest.chars().all(is_token_char) {
        Ok(())
    } else {
        Err(ApiKeyError::BadAnthropicKey)
    }
}

/// 8-10 digits, `:`, then exactly 35 of `[A-Za-z0-9_-]`.
pub fn validate_telegram_token(token: &str) -> Result<(), ApiKeyError> {
    let (bot_id, secret) = token
        .split_once(':')
        .ok_or(ApiKeyError::BadTelegramToken)?;
    if !(8..=10).contains(&bot_id.len()) || !bot_id.chars().all(|c| c.is_ascii_digit()) {
        return Err(ApiKeyError::BadTelegramToken);
    }
    if secret.len() == 35 && secret.chars().all(is_token_char) {
        Ok(())
    } else {
        Err(ApiKeyError::BadTelegramToken)
    }
}
