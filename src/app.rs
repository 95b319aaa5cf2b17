use std::net::SocketAddr;

use axum::{routing::get, Router};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::state::AppState;
use crate::{auth, panoramas};

pub fn build_app(state: AppState) -> Router {
    Router::new()
        .merge(auth::router())
        .merge(panoramas::router())
        .route("/health", get(|| async { "ok" }))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    let method = req.method().clone();
                    let uri = req.uri().clone();
                    tracing::info_span!("http_request", %method, uri = %uri)
                })
                .on_response(
                    |res: &axum::http::Response<_>,
                     latency: std::time::Duration,
                     _span: &tracing::Span| {
                        let status = res.status();
                        let latency_ms = latency.as_millis() as u64;
                        if status.is_server_error() {
                            tracing::error!(%status, latency_ms, "response");
                        } else {
                            tracing::info!(%status, latency_ms, "response");
                        }
                    },
                ),
        )
}

pub async fn serve(app: Router) -> anyhow::Result<()> {
    let addr: SocketAddr = format!(
        "{}:{}",
        std::env::var("APP_HOST").unwrap_or_else(|_| "0.0.0.0".into()),
        std::env::var("APP_PORT").unwrap_or_else(|_| "8080".into())
    )
    .parse()?;

    tracing::info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{header, Method, Request, StatusCode},
    };
    use base64ct::{Base64, Encoding};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    async fn call(
        app: &Router,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        if let Some(t) = token {
            req = req.header("X-Session-Token", t);
        }
        let body = match body {
            Some(v) => {
                req = req.header(header::CONTENT_TYPE, "application/json");
                Body::from(v.to_string())
            }
            None => Body::empty(),
        };
        let res = app.clone().oneshot(req.body(body).unwrap()).await.unwrap();
        let status = res.status();
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    async fn registered(app: &Router, email: &str) -> String {
        let (status, body) = call(
            app,
            Method::POST,
            "/auth/register",
            None,
            Some(json!({ "email": email, "password": "secret1", "name": "Ann" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        body["session_token"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn health_is_ok() {
        let app = build_app(AppState::fake().state);
        let res = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn register_profile_logout_flow() {
        let app = build_app(AppState::fake().state);
        let token = registered(&app, "ann@example.com").await;

        let (status, body) = call(&app, Method::GET, "/auth/profile", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["user"]["email"], "ann@example.com");
        assert!(body["user"].get("password_hash").is_none());

        let (status, body) = call(
            &app,
            Method::PUT,
            "/auth/profile",
            Some(&token),
            Some(json!({ "name": "Annie" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["user"]["name"], "Annie");

        let (status, _) = call(&app, Method::POST, "/auth/logout", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = call(&app, Method::POST, "/auth/logout", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = call(&app, Method::GET, "/auth/profile", Some(&token), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn auth_status_classes() {
        let app = build_app(AppState::fake().state);
        registered(&app, "ann@example.com").await;

        let (status, _) = call(
            &app,
            Method::POST,
            "/auth/register",
            None,
            Some(json!({ "email": "ann@example.com", "password": "secret1", "name": "Ann" })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, _) = call(
            &app,
            Method::POST,
            "/auth/register",
            None,
            Some(json!({ "email": "bad", "password": "secret1", "name": "Ann" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = call(
            &app,
            Method::POST,
            "/auth/login",
            None,
            Some(json!({ "email": "ann@example.com", "password": "wrong!" })),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "invalid email or password");

        let (status, _) = call(
            &app,
            Method::POST,
            "/auth/login",
            None,
            Some(json!({ "email": "ann@example.com", "password": "secret1" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = call(
            &app,
            Method::POST,
            "/auth/oauth",
            None,
            Some(json!({ "provider": "github", "oauth_id": "1", "email": "new@example.com", "name": "Neo" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["is_new_user"], true);
    }

    #[tokio::test]
    async fn malformed_json_is_bad_request() {
        let app = build_app(AppState::fake().state);
        let req = Request::post("/auth/login")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let res = app.oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn upload_list_delete_flow() {
        let app = build_app(AppState::fake().state);
        let token = registered(&app, "ann@example.com").await;

        let (status, _) = call(&app, Method::GET, "/upload/my-panoramas", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let upload = json!({
            "title": "Lake",
            "file_data": "data:image/jpeg;base64,/9j/4AAQSkZJRg==",
            "file_type": "image/jpeg",
            "tags": ["lake", "lake", "summer"],
        });
        let (status, body) =
            call(&app, Method::POST, "/upload", Some(&token), Some(upload.clone())).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["remaining_uploads"], 4);
        assert_eq!(body["panorama"]["file_size"], 10);
        let id = body["panorama"]["id"].as_i64().unwrap();

        let (status, body) = call(&app, Method::POST, "/upload", Some(&token), Some(upload)).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["existing_title"], "Lake");

        let (status, body) =
            call(&app, Method::GET, "/upload/my-panoramas", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total"], 1);
        assert_eq!(body["limit"], 5);
        assert_eq!(body["panoramas"][0]["tags"], json!(["lake", "summer"]));

        let other = registered(&app, "bob@example.com").await;
        let (status, _) =
            call(&app, Method::DELETE, &format!("/upload/{id}"), Some(&other), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) =
            call(&app, Method::DELETE, &format!("/upload?id={id}"), Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);

        let (_, body) = call(&app, Method::GET, "/upload/my-panoramas", Some(&token), None).await;
        assert_eq!(body["total"], 0);
        assert_eq!(body["panoramas"][0]["deleted"], true);
        assert!(body["panoramas"][0]["image_url"].is_null());

        let (status, _) =
            call(&app, Method::DELETE, "/upload/not-a-number", Some(&token), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn upload_rejects_non_images_and_reports_quota() {
        let app = build_app(AppState::fake().state);
        let token = registered(&app, "ann@example.com").await;

        let (status, _) = call(
            &app,
            Method::POST,
            "/upload",
            Some(&token),
            Some(json!({ "title": "doc", "file_data": "YWJj", "file_type": "text/plain" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        for i in 0..5 {
            let data = Base64::encode_string(format!("image-{i}").as_bytes());
            let (status, _) = call(
                &app,
                Method::POST,
                "/upload",
                Some(&token),
                Some(json!({ "title": format!("p{i}"), "file_data": data, "file_type": "image/png" })),
            )
            .await;
            assert_eq!(status, StatusCode::CREATED);
        }

        let data = Base64::encode_string(b"image-5");
        let (status, body) = call(
            &app,
            Method::POST,
            "/upload",
            Some(&token),
            Some(json!({ "title": "p5", "file_data": data, "file_type": "image/png" })),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["limit"], 5);
        assert_eq!(body["limit_reached"], true);
    }
}
