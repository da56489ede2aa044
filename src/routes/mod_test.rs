use crate::test_support::{MockGateway, TestApp, user};

use axum::http::StatusCode;

#[tokio::test]
async fn healthz_ok_without_session() {
    let app = TestApp::new(MockGateway::down());
    assert_eq!(app.get("/healthz", None).await.status(), StatusCode::OK);
}

#[tokio::test]
async fn serves_site_files_behind_guard() {
    let app = TestApp::new(MockGateway::default().with_token("tok-1", user("u1")));
    let response = app.get("/products", Some("tok-1")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&body[..], b"<h1>products</h1>");
}

#[tokio::test]
async fn missing_page_is_404_once_signed_in() {
    let app = TestApp::new(MockGateway::default().with_token("tok-1", user("u1")));
    assert_eq!(app.get("/no-such-page", Some("tok-1")).await.status(), StatusCode::NOT_FOUND);
}
