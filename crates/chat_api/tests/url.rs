use chat_api::url::{KIMI_CODE_CHAT_URL, MOONSHOT_CHAT_URL};
use chat_api::{endpoint_for_provider, normalize_chat_url};

#[test]
fn url_normalization_keeps_existing_completions_endpoint() {
    assert_eq!(
        normalize_chat_url("https://api.moonshot.cn/v1/chat/completions/"),
        "https://api.moonshot.cn/v1/chat/completions"
    );
}

#[test]
fn url_normalization_appends_completions_to_v1_base() {
    assert_eq!(
        normalize_chat_url("https://api.kimi.com/coding/v1"),
        "https://api.kimi.com/coding/v1/chat/completions"
    );
}

#[test]
fn url_normalization_appends_full_path_to_generic_base() {
    assert_eq!(
        normalize_chat_url("http://127.0.0.1:9000"),
        "http://127.0.0.1:9000/v1/chat/completions"
    );
    assert_eq!(normalize_chat_url("  "), MOONSHOT_CHAT_URL);
}

#[test]
fn provider_templates_resolve_known_ids() {
    assert_eq!(endpoint_for_provider("moonshot"), Some(MOONSHOT_CHAT_URL));
    assert_eq!(endpoint_for_provider("KimiCode"), Some(KIMI_CODE_CHAT_URL));
    assert_eq!(endpoint_for_provider("other"), None);
}
