//! Summarizer against the mock gateway.

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use toolhub_executor::{
    estimate_tokens, GatewayClient, GatewayConfig, OutputSummarizer, SummarizerConfig,
    TRUNCATION_MARKER,
};
use toolhub_test_utils::MockGateway;

fn summarizer(gateway: &MockGateway) -> OutputSummarizer {
    OutputSummarizer::new(
        Arc::new(GatewayClient::new(
            reqwest::Client::new(),
            GatewayConfig {
                base_url: gateway.url(),
                ..Default::default()
            },
        )),
        SummarizerConfig {
            timeout: Duration::from_secs(5),
            ..Default::default()
        },
    )
}

#[tokio::test]
async fn oversized_output_is_summarized_via_gateway() {
    let gateway = MockGateway::spawn().await;
    gateway.set_reply("summary: 20k characters of noise, ids 1-3 preserved");
    let summarizer = summarizer(&gateway);

    let blob = json!({"payload": "n".repeat(20_000)});
    let (text, was_summarized) = summarizer
        .summarize_if_needed(&blob, 500, Some("find the ids"), Some("dump_tool"))
        .await;

    assert!(was_summarized);
    assert!(text.starts_with("summary:"));
    assert!(estimate_tokens(&text) <= 750);

    let requests = gateway.chat_requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0]["temperature"], 0.1);
    // summary budget = max(500, 500 / 2)
    assert_eq!(requests[0]["max_tokens"], 500);
    let user = requests[0]["messages"][1]["content"].as_str().unwrap();
    assert!(user.contains("dump_tool"));
    assert!(user.contains("find the ids"));
}

#[tokio::test]
async fn gateway_outage_still_reports_summarized_with_marker() {
    let gateway = MockGateway::spawn().await;
    gateway.set_failing(true);
    let summarizer = summarizer(&gateway);

    let blob = json!({"payload": "n".repeat(20_000)});
    let (text, was_summarized) = summarizer.summarize_if_needed(&blob, 500, None, None).await;

    assert!(was_summarized);
    assert!(text.ends_with(TRUNCATION_MARKER));
}

#[tokio::test]
async fn output_under_budget_never_reaches_gateway() {
    let gateway = MockGateway::spawn().await;
    let summarizer = summarizer(&gateway);

    let small = json!({"ok": true});
    let (_, was_summarized) = summarizer.summarize_if_needed(&small, 500, None, None).await;
    assert!(!was_summarized);
    assert!(gateway.chat_requests().is_empty());
}
