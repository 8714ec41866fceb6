use std::net::SocketAddr;

use axum::{middleware, routing::get, Json, Router};
use serde_json::{json, Value};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{auth, auth::authenticator::authenticate, state::AppState, users};

async fn healthcheck() -> Json<Value> {
    Json(json!({
        "status": "available",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

pub fn build_app(state: AppState) -> Router {
    Router::new()
        .nest(
            "/v1",
            Router::new()
                .merge(users::router())
                .merge(auth::router())
                .route("/healthcheck", get(healthcheck)),
        )
        .layer(middleware::from_fn_with_state(state.clone(), authenticate))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    let method = req.method().clone();
                    let uri = req.uri().clone();
                    tracing::info_span!("http_request", %method, uri = %uri, status = tracing::field::Empty)
                })
                .on_response(
                    |res: &axum::http::Response<_>,
                     _latency: std::time::Duration,
                     span: &tracing::Span| {
                        let status = res.status();
                        span.record("status", tracing::field::display(status));
                        if status.is_server_error() {
                            tracing::error!(%status, "response");
                        } else {
                            tracing::info!(%status, "response");
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
    use crate::{
        auth::password::Password,
        memory::MemoryStore,
        tokens::{model::Scope, store::TokenStore},
        users::{
            model::{Role, User},
            store::UserStore,
        },
    };
    use axum::{
        body::Body,
        http::{header, Method, Request, StatusCode},
    };
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    async fn call(app: &Router, method: Method, uri: &str, token: Option<&str>, body: Value) -> (StatusCode, Value) {
        let mut req = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(token) = token {
            req = req.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let res = app
            .clone()
            .oneshot(req.body(Body::from(body.to_string())).unwrap())
            .await
            .unwrap();
        let status = res.status();
        let bytes = res.into_body().collect().await.unwrap().to_bytes();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    async fn seed(store: &MemoryStore, username: &str, role: Role) -> (User, String) {
        let password = Password::derive("secret123".into()).await.unwrap();
        let mut user = User::new(username, &format!("{username}@x.com"), password);
        user.activated = true;
        user.role = role;
        UserStore::insert(store, &mut user).await.unwrap();
        let token = store
            .new_token(user.id, time::Duration::hours(1), Scope::Session)
            .await
            .unwrap();
        (user, token.plaintext)
    }

    #[tokio::test]
    async fn healthcheck_is_public() {
        let (state, _) = AppState::fake();
        let app = build_app(state);
        let (status, body) = call(&app, Method::GET, "/v1/healthcheck", None, Value::Null).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "available");
    }

    #[tokio::test]
    async fn register_activate_login_flow() {
        let (state, store) = AppState::fake();
        let app = build_app(state);

        let (status, body) = call(
            &app,
            Method::POST,
            "/v1/users",
            None,
            json!({"username": "alice", "email": "Alice@x.com", "password": "secret123"}),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["user"]["email"], "alice@x.com");
        assert_eq!(body["user"]["activated"], false);
        assert!(body["user"].get("password").is_none());
        let activation = body["activation_token"]["token"].as_str().unwrap().to_string();

        let (status, body) = call(
            &app,
            Method::POST,
            "/v1/users",
            None,
            json!({"username": "other", "email": "alice@X.com", "password": "secret123"}),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["error"]["email"], "a user with this email already exists");

        let (status, body) = call(
            &app,
            Method::POST,
            "/v1/users/activate",
            None,
            json!({ "token": activation }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["user"]["activated"], true);
        assert_eq!(store.token_count(), 0);

        let (status, body) = call(
            &app,
            Method::POST,
            "/v1/users/activate",
            None,
            json!({ "token": activation }),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["error"]["token"], "invalid or expired activation token");

        let (status, body) = call(
            &app,
            Method::POST,
            "/v1/tokens/session",
            None,
            json!({"email": "alice@x.com", "password": "secret123"}),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let session = body["authentication_token"]["token"].as_str().unwrap().to_string();

        let (status, body) = call(&app, Method::GET, "/v1/users/1", Some(&session), Value::Null).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["user"]["username"], "alice");

        let (status, _) = call(
            &app,
            Method::DELETE,
            "/v1/tokens/session",
            Some(&session),
            Value::Null,
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = call(&app, Method::GET, "/v1/users/1", Some(&session), Value::Null).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn failed_logins_share_one_response() {
        let (state, store) = AppState::fake();
        seed(&store, "alice", Role::User).await;
        let app = build_app(state);

        let mut responses = Vec::new();
        for (email, password) in [
            ("alice@x.com", "wrong-pass-1"),
            ("alice@x.com", "wrong-pass-2"),
            ("alice@x.com", "wrong-pass-3"),
            ("ghost@x.com", "secret123"),
        ] {
            responses.push(
                call(
                    &app,
                    Method::POST,
                    "/v1/tokens/session",
                    None,
                    json!({ "email": email, "password": password }),
                )
                .await,
            );
        }
        for (status, body) in &responses {
            assert_eq!(*status, StatusCode::UNAUTHORIZED);
            assert_eq!(body, &responses[0].1);
        }

        let (status, _) = call(
            &app,
            Method::POST,
            "/v1/tokens/session",
            None,
            json!({"email": "alice@x.com", "password": "secret123"}),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    #[tokio::test]
    async fn invalid_bearer_is_rejected_not_anonymous() {
        let (state, _) = AppState::fake();
        let app = build_app(state);
        let (status, body) = call(
            &app,
            Method::GET,
            "/v1/healthcheck",
            Some("not-a-real-token"),
            Value::Null,
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "invalid or missing authentication token");
    }

    #[tokio::test]
    async fn responses_vary_on_authorization() {
        let (state, _) = AppState::fake();
        let app = build_app(state);

        for authorization in [None, Some("Bearer not-a-real-token"), Some("Basic abc")] {
            let mut req = Request::builder().uri("/v1/healthcheck");
            if let Some(value) = authorization {
                req = req.header(header::AUTHORIZATION, value);
            }
            let res = app
                .clone()
                .oneshot(req.body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(
                res.headers().get(header::VARY).map(|v| v.to_str().unwrap()),
                Some("Authorization"),
                "missing Vary for {authorization:?}"
            );
            if authorization.is_some() {
                assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
                assert_eq!(res.headers()[header::WWW_AUTHENTICATE], "Bearer");
            }
        }
    }

    #[tokio::test]
    async fn permissions() {
        let (state, store) = AppState::fake();
        let (alice, alice_token) = seed(&store, "alice", Role::User).await;
        let (bob, _) = seed(&store, "bob", Role::User).await;
        let (_, admin_token) = seed(&store, "root", Role::Admin).await;
        let app = build_app(state);

        let (status, _) = call(&app, Method::GET, "/v1/users", None, Value::Null).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = call(&app, Method::GET, "/v1/users", Some(&alice_token), Value::Null).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = call(
            &app,
            Method::GET,
            &format!("/v1/users/{}", bob.id),
            Some(&alice_token),
            Value::Null,
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = call(
            &app,
            Method::GET,
            "/v1/users?username=al&page_size=5",
            Some(&admin_token),
            Value::Null,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["metadata"]["total_records"], 1);
        assert_eq!(body["users"][0]["id"], alice.id);

        let (status, body) = call(
            &app,
            Method::PATCH,
            &format!("/v1/users/{}/role", alice.id),
            Some(&admin_token),
            json!({ "role": "admin" }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["user"]["role"], "admin");
    }

    #[tokio::test]
    async fn last_admin_cannot_be_demoted() {
        let (state, store) = AppState::fake();
        let (admin, admin_token) = seed(&store, "root", Role::Admin).await;
        let app = build_app(state);

        let (status, body) = call(
            &app,
            Method::PATCH,
            &format!("/v1/users/{}/role", admin.id),
            Some(&admin_token),
            json!({ "role": "user" }),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["error"]["role"], "cannot remove the last admin");
    }

    #[tokio::test]
    async fn unactivated_users_are_refused() {
        let (state, store) = AppState::fake();
        let password = Password::derive("secret123".into()).await.unwrap();
        let mut user = User::new("carol", "carol@x.com", password);
        UserStore::insert(&store, &mut user).await.unwrap();
        let token = store
            .new_token(user.id, time::Duration::hours(1), Scope::Session)
            .await
            .unwrap();
        let app = build_app(state);

        let (status, _) = call(
            &app,
            Method::GET,
            &format!("/v1/users/{}", user.id),
            Some(&token.plaintext),
            Value::Null,
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn update_and_password_reset() {
        let (state, store) = AppState::fake();
        let (alice, alice_token) = seed(&store, "alice", Role::User).await;
        let app = build_app(state);

        let (status, body) = call(
            &app,
            Method::PATCH,
            &format!("/v1/users/{}", alice.id),
            Some(&alice_token),
            json!({ "username": "Alicia" }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["user"]["username"], "alicia");
        assert_eq!(store.get_by_id(alice.id).await.unwrap().version, 2);

        let (status, body) = call(
            &app,
            Method::POST,
            "/v1/tokens/password-reset",
            None,
            json!({ "email": "alice@x.com" }),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let reset = body["password_reset_token"]["token"].as_str().unwrap().to_string();

        let (status, _) = call(
            &app,
            Method::POST,
            "/v1/users/reset-password",
            None,
            json!({ "token": reset, "password": "another-secret" }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = call(
            &app,
            Method::POST,
            "/v1/tokens/session",
            None,
            json!({"email": "alice@x.com", "password": "another-secret"}),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    #[tokio::test]
    async fn delete_user_removes_sessions() {
        let (state, store) = AppState::fake();
        let (alice, alice_token) = seed(&store, "alice", Role::User).await;
        let app = build_app(state);

        let (status, _) = call(
            &app,
            Method::DELETE,
            &format!("/v1/users/{}", alice.id),
            Some(&alice_token),
            Value::Null,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(store.token_count(), 0);

        let (status, _) = call(&app, Method::GET, "/v1/healthcheck", Some(&alice_token), Value::Null).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
}
