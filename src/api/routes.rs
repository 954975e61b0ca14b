use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, patch, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use super::handlers;
use crate::AppState;

/// Headroom over the file size limit for the multipart envelope and tag field.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

pub fn create_router(state: Arc<AppState>) -> Router {
    let upload_limit =
        (state.config.uploads.max_upload_size as usize).saturating_add(MULTIPART_OVERHEAD);

    let mut router = Router::new()
        // Files (owner-scoped)
        .route(
            "/files",
            get(handlers::list_files)
                .post(handlers::upload_file)
                .layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route(
            "/files/:id",
            get(handlers::get_file).delete(handlers::delete_file),
        )
        .route("/files/:id/position", patch(handlers::move_file))
        .route(
            "/files/:id/tags",
            patch(handlers::replace_tags).post(handlers::add_tag),
        )
        .route("/files/:id/tags/:tag", delete(handlers::remove_tag))
        .route("/files/:id/share", post(handlers::share_file))
        // Public
        .route("/files/shared/:share_link", get(handlers::get_shared_file))
        .route("/uploads/:stored_name", get(handlers::serve_upload))
        // Internal
        .route("/_internal/health", get(handlers::health));

    // Test-only routes
    if state.config.test_mode {
        tracing::warn!("Test mode enabled; purge route is available.");
        router = router.route("/admin/purge", delete(handlers::admin_purge));
    }

    router.layer(TraceLayer::new_for_http()).with_state(state)
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{header, Method, Request, StatusCode};
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::*;
    use crate::api::owner::OWNER_HEADER;
    use crate::testutil::test_state;

    const BOUNDARY: &str = "file-share-test-boundary";

    async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
        let resp = app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        // Blob downloads are not JSON; callers only check their status.
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    fn json_request(method: Method, uri: &str, owner: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(OWNER_HEADER, owner)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn owner_request(method: Method, uri: &str, owner: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(OWNER_HEADER, owner)
            .body(Body::empty())
            .unwrap()
    }

    fn public_get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn upload_request(
        owner: Option<&str>,
        filename: &str,
        content_type: &str,
        data: &[u8],
        tags: Option<&str>,
    ) -> Request<Body> {
        let mut body = Vec::new();
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\nContent-Type: {content_type}\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(data);
        body.extend_from_slice(b"\r\n");
        if let Some(tags) = tags {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"tags\"\r\n\r\n{tags}\r\n"
                )
                .as_bytes(),
            );
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

        let mut builder = Request::builder()
            .method(Method::POST)
            .uri("/files")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            );
        if let Some(owner) = owner {
            builder = builder.header(OWNER_HEADER, owner);
        }
        builder.body(Body::from(body)).unwrap()
    }

    async fn upload(app: &Router, owner: &str, filename: &str) -> Value {
        let req = upload_request(Some(owner), filename, "image/png", b"\x89PNG fake", None);
        let (status, body) = send(app, req).await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        body["data"].clone()
    }

    fn names(list: &Value) -> Vec<(String, u64)> {
        list.as_array()
            .unwrap()
            .iter()
            .map(|f| {
                (
                    f["name"].as_str().unwrap().to_string(),
                    f["position"].as_u64().unwrap(),
                )
            })
            .collect()
    }

    fn expected(order: &[&str]) -> Vec<(String, u64)> {
        order
            .iter()
            .enumerate()
            .map(|(i, n)| (n.to_string(), i as u64))
            .collect()
    }

    async fn seed_abcd(app: &Router, owner: &str) -> Vec<String> {
        let mut ids = Vec::new();
        for name in ["A.png", "B.png", "C.png", "D.png"] {
            let file = upload(app, owner, name).await;
            ids.push(file["id"].as_str().unwrap().to_string());
        }
        ids
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let dir = tempfile::tempdir().unwrap();
        let app = create_router(test_state(&dir));

        let (status, body) = send(&app, public_get("/_internal/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "success");
        assert_eq!(body["data"]["status"], "ok");
    }

    #[tokio::test]
    async fn owner_routes_require_owner_header() {
        let dir = tempfile::tempdir().unwrap();
        let app = create_router(test_state(&dir));

        let req = upload_request(None, "a.png", "image/png", b"data", None);
        let (status, body) = send(&app, req).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["status"], "fail");

        let (status, _) = send(&app, public_get("/files")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn uploads_append_to_owner_ordering() {
        let dir = tempfile::tempdir().unwrap();
        let app = create_router(test_state(&dir));

        let first = upload(&app, "alice", "first.png").await;
        let second = upload(&app, "alice", "second.png").await;
        let other = upload(&app, "bob", "other.png").await;

        assert_eq!(first["position"], 0);
        assert_eq!(second["position"], 1);
        assert_eq!(other["position"], 0);
        assert_eq!(first["media_type"], "image");
        assert_eq!(first["views"], 0);
        assert!(first["url"].as_str().unwrap().starts_with("/uploads/"));
        assert!(first["url"].as_str().unwrap().ends_with(".png"));

        let (status, body) = send(&app, owner_request(Method::GET, "/files", "alice")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(names(&body["data"]), expected(&["first.png", "second.png"]));
    }

    #[tokio::test]
    async fn upload_rejects_disallowed_type() {
        let dir = tempfile::tempdir().unwrap();
        let app = create_router(test_state(&dir));

        let req = upload_request(Some("alice"), "notes.txt", "text/plain", b"hello", None);
        let (status, body) = send(&app, req).await;
        assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
        assert_eq!(body["status"], "fail");
    }

    #[tokio::test]
    async fn upload_ignores_content_type_parameters() {
        let dir = tempfile::tempdir().unwrap();
        let app = create_router(test_state(&dir));

        let req = upload_request(
            Some("alice"),
            "photo.jpg",
            "Image/JPEG; charset=binary",
            b"\xff\xd8 fake",
            None,
        );
        let (status, body) = send(&app, req).await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        assert_eq!(body["data"]["mime_type"], "image/jpeg");
        assert_eq!(body["data"]["media_type"], "image");
    }

    #[tokio::test]
    async fn upload_guesses_type_from_filename() {
        let dir = tempfile::tempdir().unwrap();
        let app = create_router(test_state(&dir));

        let req = upload_request(
            Some("alice"),
            "clip.mp4",
            "application/octet-stream",
            b"not really a video",
            Some("travel, 2024"),
        );
        let (status, body) = send(&app, req).await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        assert_eq!(body["data"]["mime_type"], "video/mp4");
        assert_eq!(body["data"]["media_type"], "video");
        assert_eq!(body["data"]["tags"], json!(["2024", "travel"]));
    }

    #[tokio::test]
    async fn upload_rejects_oversized_file() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(&dir);
        let limit = state.config.uploads.max_upload_size as usize;
        let app = create_router(state);

        let data = vec![0u8; limit + 1];
        let req = upload_request(Some("alice"), "big.png", "image/png", &data, None);
        let (status, _) = send(&app, req).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn move_up_and_down() {
        let dir = tempfile::tempdir().unwrap();
        let app = create_router(test_state(&dir));
        let ids = seed_abcd(&app, "alice").await;

        let uri = format!("/files/{}/position", ids[2]);
        let req = json_request(Method::PATCH, &uri, "alice", json!({ "position": 0 }));
        let (status, body) = send(&app, req).await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(
            names(&body["data"]),
            expected(&["C.png", "A.png", "B.png", "D.png"])
        );

        // A is now at 1; move it to the end.
        let uri = format!("/files/{}/position", ids[0]);
        let req = json_request(Method::PATCH, &uri, "alice", json!({ "position": 3 }));
        let (status, body) = send(&app, req).await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(
            names(&body["data"]),
            expected(&["C.png", "B.png", "D.png", "A.png"])
        );
    }

    #[tokio::test]
    async fn move_of_foreign_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let app = create_router(test_state(&dir));
        let ids = seed_abcd(&app, "alice").await;
        upload(&app, "bob", "bob.png").await;

        let uri = format!("/files/{}/position", ids[3]);
        let req = json_request(Method::PATCH, &uri, "bob", json!({ "position": 0 }));
        let (status, body) = send(&app, req).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["data"]["message"], "File not found");

        let (_, body) = send(&app, owner_request(Method::GET, "/files", "alice")).await;
        assert_eq!(
            names(&body["data"]),
            expected(&["A.png", "B.png", "C.png", "D.png"])
        );
    }

    #[tokio::test]
    async fn move_rejects_invalid_positions() {
        let dir = tempfile::tempdir().unwrap();
        let app = create_router(test_state(&dir));
        let ids = seed_abcd(&app, "alice").await;
        let uri = format!("/files/{}/position", ids[0]);

        for body in [
            json!({ "position": 4 }),
            json!({ "position": -1 }),
            json!({ "position": 1.5 }),
            json!({ "position": "2" }),
            json!({}),
        ] {
            let req = json_request(Method::PATCH, &uri, "alice", body.clone());
            let (status, resp) = send(&app, req).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{body} -> {resp}");
            assert_eq!(resp["status"], "fail");
        }

        let (_, body) = send(&app, owner_request(Method::GET, "/files", "alice")).await;
        assert_eq!(
            names(&body["data"]),
            expected(&["A.png", "B.png", "C.png", "D.png"])
        );
    }

    #[tokio::test]
    async fn reading_a_file_counts_views() {
        let dir = tempfile::tempdir().unwrap();
        let app = create_router(test_state(&dir));
        let file = upload(&app, "alice", "a.png").await;
        let uri = format!("/files/{}", file["id"].as_str().unwrap());

        let (status, body) = send(&app, public_get(&uri)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["views"], 1);

        let (_, body) = send(&app, public_get(&uri)).await;
        assert_eq!(body["data"]["views"], 2);

        let (status, _) = send(&app, public_get("/files/missing")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn share_link_is_stable_and_counts_views() {
        let dir = tempfile::tempdir().unwrap();
        let app = create_router(test_state(&dir));
        let file = upload(&app, "alice", "a.png").await;
        let uri = format!("/files/{}/share", file["id"].as_str().unwrap());

        let (status, body) = send(&app, owner_request(Method::POST, &uri, "alice")).await;
        assert_eq!(status, StatusCode::OK);
        let token = body["data"]["share_link"].as_str().unwrap().to_string();
        assert_eq!(body["data"]["url"], format!("/files/shared/{token}"));

        let (_, again) = send(&app, owner_request(Method::POST, &uri, "alice")).await;
        assert_eq!(again["data"]["share_link"], token.as_str());

        let (status, _) = send(&app, owner_request(Method::POST, &uri, "mallory")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let shared = format!("/files/shared/{token}");
        let (status, body) = send(&app, public_get(&shared)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["views"], 1);
        assert_eq!(body["data"]["name"], "a.png");
        assert!(body["data"].get("share_link").is_none());

        let (status, _) = send(&app, public_get("/files/shared/not-a-token")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn tag_management() {
        let dir = tempfile::tempdir().unwrap();
        let app = create_router(test_state(&dir));
        let file = upload(&app, "alice", "a.png").await;
        upload(&app, "alice", "b.png").await;
        let id = file["id"].as_str().unwrap();
        let tags_uri = format!("/files/{id}/tags");

        let req = json_request(Method::POST, &tags_uri, "alice", json!({ "tag": " beach " }));
        let (status, body) = send(&app, req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["tags"], json!(["beach"]));

        let req = json_request(Method::POST, &tags_uri, "alice", json!({ "tag": "beach" }));
        let (_, body) = send(&app, req).await;
        assert_eq!(body["data"]["tags"], json!(["beach"]));

        let req = json_request(Method::POST, &tags_uri, "alice", json!({ "tag": "  " }));
        let (status, _) = send(&app, req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let req = json_request(
            Method::PATCH,
            &tags_uri,
            "alice",
            json!({ "tags": ["sun", "sea", "sun", ""] }),
        );
        let (_, body) = send(&app, req).await;
        assert_eq!(body["data"]["tags"], json!(["sea", "sun"]));

        let uri = format!("/files/{id}/tags/sun");
        let (status, body) = send(&app, owner_request(Method::DELETE, &uri, "alice")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["tags"], json!(["sea"]));

        let (_, body) = send(&app, owner_request(Method::GET, "/files?tag=sea", "alice")).await;
        assert_eq!(names(&body["data"]), vec![("a.png".to_string(), 0)]);

        let req = json_request(Method::POST, &tags_uri, "bob", json!({ "tag": "x" }));
        let (status, _) = send(&app, req).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn delete_compacts_positions_and_removes_content() {
        let dir = tempfile::tempdir().unwrap();
        let app = create_router(test_state(&dir));
        let ids = seed_abcd(&app, "alice").await;

        let (_, body) = send(&app, owner_request(Method::GET, "/files", "alice")).await;
        let b_url = body["data"][1]["url"].as_str().unwrap().to_string();

        let (status, _) = send(&app, public_get(&b_url)).await;
        assert_eq!(status, StatusCode::OK);

        let uri = format!("/files/{}", ids[1]);
        let (status, _) = send(&app, owner_request(Method::DELETE, &uri, "bob")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = send(&app, owner_request(Method::DELETE, &uri, "alice")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "success");

        let (_, body) = send(&app, owner_request(Method::GET, "/files", "alice")).await;
        assert_eq!(names(&body["data"]), expected(&["A.png", "C.png", "D.png"]));

        let (status, body) = send(&app, public_get(&b_url)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["status"], "fail");

        // New uploads still land at the end.
        let e = upload(&app, "alice", "E.png").await;
        assert_eq!(e["position"], 3);
    }

    #[tokio::test]
    async fn serves_uploaded_content() {
        let dir = tempfile::tempdir().unwrap();
        let app = create_router(test_state(&dir));
        let file = upload(&app, "alice", "a.png").await;

        let resp = app
            .clone()
            .oneshot(public_get(file["url"].as_str().unwrap()))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()[header::CONTENT_TYPE], "image/png");
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&bytes[..], b"\x89PNG fake");

        let (status, _) = send(&app, public_get("/uploads/..")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn purge_clears_everything_in_test_mode() {
        let dir = tempfile::tempdir().unwrap();
        let app = create_router(test_state(&dir));
        seed_abcd(&app, "alice").await;

        let req = Request::builder()
            .method(Method::DELETE)
            .uri("/admin/purge")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(&app, req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["files_deleted"], 4);

        let (_, body) = send(&app, owner_request(Method::GET, "/files", "alice")).await;
        assert_eq!(body["data"], json!([]));
    }
}
