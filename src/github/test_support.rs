//! Helpers for exercising GitHub clients against a local stand-in server.

use axum::Router;

pub(crate) const TEST_PRIVATE_KEY: &str = include_str!("../../testdata/github-app-test-key.pem");
pub(crate) const TEST_PUBLIC_KEY: &str = include_str!("../../testdata/github-app-test-key.pub.pem");

/// Serve `router` on an ephemeral local port and return its base URL.
pub(crate) async fn spawn_server(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}
