use chat_api::{normalize_chat_url, ChatApiClient, ChatApiConfig, ChatApiError, ChatRequest};

#[test]
fn http_request_builds_completions_endpoint() {
    let config = ChatApiConfig::new("sk-test").with_base_url("https://api.kimi.com/coding/v1");
    let client = ChatApiClient::new(config).expect("client");
    let request = client.prompt_request("payload");

    let http_request = client
        .build_request(&request)
        .expect("build request")
        .build()
        .expect("request");

    assert_eq!(
        http_request.url().as_str(),
        normalize_chat_url("https://api.kimi.com/coding/v1")
    );
    assert_eq!(http_request.method(), "POST");
    assert_eq!(
        http_request
            .headers()
            .get("authorization")
            .and_then(|value| value.to_str().ok()),
        Some("Bearer sk-test")
    );
}

#[test]
fn client_rejects_missing_key_and_bad_url() {
    assert!(matches!(
        ChatApiClient::new(ChatApiConfig::new("")),
        Err(ChatApiError::MissingApiKey)
    ));
    assert!(matches!(
        ChatApiClient::new(ChatApiConfig::new("k").with_base_url("not a url")),
        Err(ChatApiError::InvalidBaseUrl(_))
    ));
}

#[test]
fn build_request_rejects_empty_message_list() {
    let client = ChatApiClient::new(ChatApiConfig::new("k")).expect("client");
    let mut request = ChatRequest::user_prompt("m", "p", 10, 0.3);
    request.messages.clear();

    assert!(matches!(
        client.build_request(&request),
        Err(ChatApiError::Runtime(_))
    ));
}
