/// Moonshot open platform endpoint.
pub const MOONSHOT_CHAT_URL: &str = "https://api.moonshot.cn/v1/chat/completions";
/// Kimi coding plan endpoint.
pub const KIMI_CODE_CHAT_URL: &str = "https://api.kimi.com/coding/v1/chat/completions";

pub const DEFAULT_CHAT_URL: &str = MOONSHOT_CHAT_URL;

/// Endpoint template for a known provider id.
pub fn endpoint_for_provider(provider: &str) -> Option<&'static str> {
    match provider.trim().to_ascii_lowercase().as_str() {
        "moonshot" => Some(MOONSHOT_CHAT_URL),
        "kimicode" | "kimi-code" | "kimi_code" => Some(KIMI_CODE_CHAT_URL),
        _ => None,
    }
}

/// Normalize a base URL to a chat completions endpoint.
///
/// Normalization rules:
/// 1) keep `/chat/completions` unchanged
/// 2) append `/chat/completions` when path ends in `/v1`
/// 3) append `/v1/chat/completions` otherwise
pub fn normalize_chat_url(input: &str) -> String {
    let base = if input.trim().is_empty() {
        DEFAULT_CHAT_URL
    } else {
        input.trim()
    };

    let trimmed = base.trim_end_matches('/');
    if trimmed.ends_with("/chat/completions") {
        return trimmed.to_string();
    }
    if trimmed.ends_with("/v1") {
        return format!("{trimmed}/chat/completions");
    }
    format!("{trimmed}/v1/chat/completions")
}
