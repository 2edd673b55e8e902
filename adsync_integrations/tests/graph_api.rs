use adsync_core::models::{parse_date, DateWindow, InsightLevel};
use adsync_core::{AdsSource, Error};
use adsync_integrations::{GraphApiClient, GraphApiConfig};
use serde_json::json;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, Respond, ResponseTemplate};

/// Serves `pages` in order, then empty pages.
struct PaginatedResponder {
    pages: Vec<serde_json::Value>,
    current_page: Arc<AtomicU32>,
}

impl Respond for PaginatedResponder {
    fn respond(&self, _request: &wiremock::Request) -> ResponseTemplate {
        let page_idx = self.current_page.fetch_add(1, Ordering::SeqCst) as usize;
        match self.pages.get(page_idx) {
            Some(page) => ResponseTemplate::new(200).set_body_json(page.clone()),
            None => ResponseTemplate::new(200).set_body_json(json!({"data": []})),
        }
    }
}

fn client(server: &MockServer) -> GraphApiClient {
    let cfg = GraphApiConfig::new("test-token").with_base_url(format!("{}/v21.0", server.uri()));
    GraphApiClient::new(cfg).unwrap()
}

fn campaign_page(server: &MockServer, ids: &[&str], next: Option<&str>) -> serde_json::Value {
    let data: Vec<_> = ids
        .iter()
        .map(|id| json!({"id": id, "name": format!("Campaign {id}"), "status": "ACTIVE"}))
        .collect();
    match next {
        Some(cursor) => json!({
            "data": data,
            "paging": {
                "cursors": {"after": cursor},
                "next": format!("{}/v21.0/act_1/campaigns?after={cursor}&limit=500", server.uri()),
            }
        }),
        None => json!({"data": data, "paging": {"cursors": {"after": "end"}}}),
    }
}

#[tokio::test]
async fn listing_follows_next_links_across_pages() {
    let server = MockServer::start().await;
    let counter = Arc::new(AtomicU32::new(0));
    let pages = vec![
        campaign_page(&server, &["c1", "c2"], Some("p2")),
        campaign_page(&server, &["c3", "c4"], Some("p3")),
        campaign_page(&server, &["c5"], None),
    ];

    Mock::given(method("GET"))
        .and(path("/v21.0/act_1/campaigns"))
        .and(header("authorization", "Bearer test-token"))
        .respond_with(PaginatedResponder {
            pages,
            current_page: counter.clone(),
        })
        .mount(&server)
        .await;

    let records = client(&server).list_campaigns("act_1").await.unwrap();
    let ids: Vec<_> = records.iter().map(|r| r["id"].as_str().unwrap()).collect();
    assert_eq!(ids, vec!["c1", "c2", "c3", "c4", "c5"]);
    assert_eq!(counter.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn first_page_requests_field_list_and_limit() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v21.0/act_1/ads"))
        .and(query_param("limit", "500"))
        .and(query_param(
            "fields",
            "id,adset_id,campaign_id,name,status,effective_status,creative{id,thumbnail_url},preview_shareable_link,created_time",
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": [{"id": "a1"}]})))
        .expect(1)
        .mount(&server)
        .await;

    let records = client(&server).list_ads("act_1").await.unwrap();
    assert_eq!(records.len(), 1);
}

#[tokio::test]
async fn non_success_status_carries_provider_body() {
    let server = MockServer::start().await;
    let body = json!({"error": {"message": "Invalid OAuth access token.", "code": 190}});
    Mock::given(method("GET"))
        .and(path("/v21.0/act_1/adsets"))
        .respond_with(ResponseTemplate::new(400).set_body_json(body))
        .mount(&server)
        .await;

    let err = client(&server).list_adsets("act_1").await.unwrap_err();
    match err {
        Error::Upstream { status, body } => {
            assert_eq!(status, 400);
            assert!(body.contains("Invalid OAuth access token."));
        }
        other => panic!("expected upstream error, got {other:?}"),
    }
}

#[tokio::test]
async fn page_without_data_array_is_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v21.0/act_1/campaigns"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"result": "ok"})))
        .mount(&server)
        .await;

    let err = client(&server).list_campaigns("act_1").await.unwrap_err();
    assert!(matches!(err, Error::UpstreamMessage(_)), "{err:?}");
}

#[tokio::test]
async fn repeated_next_link_stops_pagination() {
    let server = MockServer::start().await;
    let looping = json!({
        "data": [{"id": "c1"}],
        "paging": {"next": format!("{}/v21.0/act_1/campaigns?after=same", server.uri())}
    });
    Mock::given(method("GET"))
        .and(path("/v21.0/act_1/campaigns"))
        .respond_with(ResponseTemplate::new(200).set_body_json(looping))
        .mount(&server)
        .await;

    let err = client(&server).list_campaigns("act_1").await.unwrap_err();
    assert!(err.to_string().contains("repeated"), "{err}");
}

#[tokio::test]
async fn page_cap_bounds_a_listing() {
    let server = MockServer::start().await;
    let counter = Arc::new(AtomicU32::new(0));
    let pages = (0..5)
        .map(|i| campaign_page(&server, &["c"], Some(&format!("p{i}"))))
        .collect();
    Mock::given(method("GET"))
        .and(path("/v21.0/act_1/campaigns"))
        .respond_with(PaginatedResponder {
            pages,
            current_page: counter.clone(),
        })
        .mount(&server)
        .await;

    let mut cfg =
        GraphApiConfig::new("test-token").with_base_url(format!("{}/v21.0", server.uri()));
    cfg.max_pages = 3;
    let err = GraphApiClient::new(cfg)
        .unwrap()
        .list_campaigns("act_1")
        .await
        .unwrap_err();
    assert!(err.to_string().contains("exceeded 3 pages"), "{err}");
    assert_eq!(counter.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn insights_request_daily_rows_for_the_window() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v21.0/act_1/insights"))
        .and(query_param("level", "campaign"))
        .and(query_param("time_increment", "1"))
        .and(query_param("limit", "1000"))
        .and(query_param(
            "time_range",
            r#"{"since":"2024-01-01","until":"2024-01-02"}"#,
        ))
        .and(query_param("fields", "spend,actions,campaign_id,adset_id,ad_id"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [
                {"campaign_id": "c1", "date_start": "2024-01-01", "spend": "1.50"},
                {"campaign_id": "c1", "date_start": "2024-01-02", "spend": "2.25"}
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let window = DateWindow::new(
        parse_date("2024-01-01").unwrap(),
        parse_date("2024-01-02").unwrap(),
    )
    .unwrap();
    let metrics = vec!["spend".to_string(), "actions".to_string()];
    let rows = client(&server)
        .list_insights("act_1", InsightLevel::Campaign, window, &metrics)
        .await
        .unwrap();
    assert_eq!(rows.len(), 2);
}

#[tokio::test]
async fn single_account_lookup_uses_account_path() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v21.0/act_42"))
        .and(query_param("fields", "id,name,currency,timezone_name,account_status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "act_42", "name": "Main", "currency": "USD", "account_status": 1
        })))
        .mount(&server)
        .await;

    let account = client(&server).get_ad_account("act_42").await.unwrap();
    assert_eq!(account["name"], "Main");
}

#[tokio::test]
async fn token_exchange_uses_app_credentials() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v21.0/oauth/access_token"))
        .and(query_param("grant_type", "fb_exchange_token"))
        .and(query_param("client_id", "app-1"))
        .and(query_param("client_secret", "shh"))
        .and(query_param("fb_exchange_token", "short-lived"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "long-lived",
            "token_type": "bearer",
            "expires_in": 5183944
        })))
        .mount(&server)
        .await;

    let mut cfg =
        GraphApiConfig::new("short-lived").with_base_url(format!("{}/v21.0", server.uri()));
    cfg.app_id = Some("app-1".into());
    cfg.app_secret = Some("shh".into());
    let exchanged = GraphApiClient::new(cfg).unwrap().exchange_token().await.unwrap();
    assert_eq!(exchanged.access_token, "long-lived");
    assert_eq!(exchanged.expires_in, Some(5183944));
}

#[tokio::test]
async fn token_exchange_requires_app_credentials() {
    let server = MockServer::start().await;
    let err = client(&server).exchange_token().await.unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
}
