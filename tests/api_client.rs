use std::io::Read;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use blogfeed::api::{ApiErrorKind, Client, ClientConfig, Registration, Subject};
use blogfeed::session::Manager;
use blogfeed::storage::MemoryStore;
use crossbeam_channel::{unbounded, Receiver};
use tiny_http::{Header, Response, Server};

#[derive(Debug)]
struct Recorded {
    method: String,
    url: String,
    authorization: Option<String>,
    body: String,
}

/// Answers one request per canned response, in order, and records what came in.
fn serve(responses: Vec<(u16, &'static str)>) -> (String, Receiver<Recorded>) {
    let server = Server::http("127.0.0.1:0").expect("bind test server");
    let addr = server.server_addr().to_ip().expect("ip listen address");
    let (tx, rx) = unbounded();
    thread::spawn(move || {
        for (status, body) in responses {
            let Ok(mut req) = server.recv() else {
                return;
            };
            let mut content = String::new();
            let _ = req.as_reader().read_to_string(&mut content);
            let authorization = req
                .headers()
                .iter()
                .find(|h| h.field.equiv("Authorization"))
                .map(|h| h.value.as_str().to_string());
            let _ = tx.send(Recorded {
                method: req.method().to_string(),
                url: req.url().to_string(),
                authorization,
                body: content,
            });
            let response = Response::from_string(body)
                .with_status_code(status)
                .with_header(
                    Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..])
                        .expect("content type header"),
                );
            let _ = req.respond(response);
        }
    });
    (format!("http://{addr}/api"), rx)
}

fn session(signed_in: bool) -> Arc<Manager> {
    let manager = Manager::restore(Arc::new(MemoryStore::new())).expect("restore session");
    if signed_in {
        manager.login("carol", "abc").expect("login");
    }
    Arc::new(manager)
}

fn client(base_url: &str, session: Arc<Manager>) -> Client {
    Client::new(
        session,
        ClientConfig {
            base_url: base_url.to_string(),
            auth_scheme: "Token".into(),
            user_agent: "blogfeed-tests".into(),
            timeout: Some(Duration::from_secs(5)),
            http_client: None,
        },
    )
    .expect("client")
}

fn next(rx: &Receiver<Recorded>) -> Recorded {
    rx.recv_timeout(Duration::from_secs(5))
        .expect("request reached the server")
}

#[test]
fn list_posts_sends_page_query_with_credential_when_signed_in() {
    let body = r#"{"count": 6, "results": [
        {"id": 9, "author": "bob", "title": "Six", "content": "c",
         "image": "http://img/1.png", "created_at": "2024-01-31T08:00:00Z", "likes_count": 2}
    ]}"#;
    let (base, rx) = serve(vec![(200, body)]);
    let api = client(&base, session(true));

    let page = api.list_posts(2, 5).expect("page");
    assert_eq!(page.count, 6);
    assert_eq!(page.results[0].image.as_deref(), Some("http://img/1.png"));
    assert_eq!(page.results[0].created_label(), "January 31, 2024");

    let req = next(&rx);
    assert_eq!(req.method, "GET");
    assert_eq!(req.url, "/api/posts/?page=2&page_size=5");
    assert_eq!(req.authorization.as_deref(), Some("Token abc"));
}

#[test]
fn reads_go_out_without_credential_when_signed_out() {
    let (base, rx) = serve(vec![(200, r#"{"count": 0, "results": []}"#), (200, "[]")]);
    let api = client(&base, session(false));

    assert_eq!(api.list_posts(1, 5).expect("page").count, 0);
    assert!(api.list_comments().expect("comments").is_empty());
    assert_eq!(next(&rx).authorization, None);
    assert_eq!(next(&rx).authorization, None);
}

#[test]
fn like_carries_token_header_and_subject_body() {
    let (base, rx) = serve(vec![(201, "{}")]);
    let api = client(&base, session(true));

    api.like(Subject::Comment(12)).expect("like");

    let req = next(&rx);
    assert_eq!(req.method, "POST");
    assert_eq!(req.url, "/api/likes/create/");
    assert_eq!(req.authorization.as_deref(), Some("Token abc"));
    let body: serde_json::Value = serde_json::from_str(&req.body).expect("json body");
    assert_eq!(body, serde_json::json!({"comment": 12}));
}

#[test]
fn signed_out_mutation_never_reaches_the_server() {
    let (base, rx) = serve(vec![(201, "{}")]);
    let api = client(&base, session(false));

    let err = api.like(Subject::Post(42)).unwrap_err();
    assert_eq!(err.kind, ApiErrorKind::Unauthenticated);
    let err = api.delete_post(42).unwrap_err();
    assert_eq!(err.kind, ApiErrorKind::Unauthenticated);
    assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
}

#[test]
fn forbidden_delete_is_unauthorized_with_detail() {
    let (base, rx) = serve(vec![(
        403,
        r#"{"detail": "You do not have permission to perform this action."}"#,
    )]);
    let api = client(&base, session(true));

    let err = api.delete_post(5).unwrap_err();
    assert_eq!(err.kind, ApiErrorKind::Unauthorized);
    assert_eq!(
        err.detail,
        "You do not have permission to perform this action."
    );
    let req = next(&rx);
    assert_eq!(req.method, "DELETE");
    assert_eq!(req.url, "/api/posts/5/");
}

#[test]
fn comment_returns_server_copy() {
    let (base, rx) = serve(vec![(
        201,
        r#"{"id": 99, "post": 7, "author": "carol", "content": "nice post", "likes_count": 0}"#,
    )]);
    let api = client(&base, session(true));

    let comment = api.create_comment(7, "nice post").expect("comment");
    assert_eq!(comment.id, 99);
    assert_eq!(comment.author, "carol");

    let req = next(&rx);
    let body: serde_json::Value = serde_json::from_str(&req.body).expect("json body");
    assert_eq!(body, serde_json::json!({"post": 7, "content": "nice post"}));
}

#[test]
fn login_accepts_key_or_token() {
    let (base, _rx) = serve(vec![(200, r#"{"key": "k1"}"#), (200, r#"{"token": "t2"}"#)]);
    let api = client(&base, session(false));

    assert_eq!(api.login("carol", "pw").expect("login"), "k1");
    assert_eq!(api.login("carol", "pw").expect("login"), "t2");
}

#[test]
fn bad_login_is_a_validation_error() {
    let (base, _rx) = serve(vec![(
        400,
        r#"{"non_field_errors": ["Unable to log in with provided credentials."]}"#,
    )]);
    let api = client(&base, session(false));

    let err = api.login("carol", "wrong").unwrap_err();
    assert_eq!(err.kind, ApiErrorKind::Validation);
    assert_eq!(err.detail, "Unable to log in with provided credentials.");
}

#[test]
fn mismatched_passwords_fail_locally() {
    let (base, rx) = serve(vec![(201, "{}")]);
    let api = client(&base, session(false));

    let err = api
        .register(&Registration {
            username: "dave".into(),
            email: "dave@example.com".into(),
            password1: "one".into(),
            password2: "two".into(),
        })
        .unwrap_err();
    assert_eq!(err.kind, ApiErrorKind::Validation);
    assert_eq!(err.detail, "Passwords do not match");
    assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
}

#[test]
fn liked_users_reads_usernames() {
    let (base, rx) = serve(vec![(
        200,
        r#"{"results": [{"username": "alice"}, {"username": "bob"}]}"#,
    )]);
    let api = client(&base, session(false));

    let users = api.liked_users(7).expect("liked users");
    let names: Vec<_> = users.into_iter().map(|u| u.username).collect();
    assert_eq!(names, ["alice", "bob"]);
    assert_eq!(next(&rx).url, "/api/likes/?post=7");
}

#[test]
fn garbage_body_is_a_server_error() {
    let (base, _rx) = serve(vec![(200, "<html>oops</html>")]);
    let api = client(&base, session(false));

    let err = api.list_comments().unwrap_err();
    assert_eq!(err.kind, ApiErrorKind::Server);
}
