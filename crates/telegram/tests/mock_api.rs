#![allow(clippy::unwrap_used, clippy::expect_used)]
//! End-to-end dispatch against a local stand-in for the Bot API.

use std::{
    collections::BTreeMap,
    net::SocketAddr,
    sync::{
        Arc, Mutex,
        atomic::{AtomicU32, Ordering},
    },
    time::{Duration, Instant},
};

use {
    axum::{Json, Router, body::Bytes, extract::State, http::Uri, routing::post},
    chrono::Utc,
    secrecy::Secret,
    serde_json::{Value, json},
    tokio::{net::TcpListener, sync::oneshot},
};

use {
    skillbox_config::TelegramConfig,
    skillbox_dispatch::{CallRequest, DispatchConfig, ErrorKind},
    skillbox_telegram::{
        TelegramCall, TelegramDispatcher, connect,
        skill::{
            DownloadOptions, FetchOptions, SendOptions, download_media, fetch_recent, fetch_unread,
            list_chats, send, send_batch,
        },
    },
};

#[derive(Clone, Default)]
struct MockApi {
    calls: Arc<Mutex<Vec<(String, Value)>>>,
    /// SendMessage calls still to be answered with a 429.
    throttle_sends: Arc<AtomicU32>,
    /// GetUpdates calls still to be answered with a 429.
    throttle_updates: Arc<AtomicU32>,
    forbid_sends: bool,
    updates: Arc<Vec<Value>>,
}

impl MockApi {
    fn with_updates(updates: Vec<Value>) -> Self {
        Self {
            updates: Arc::new(updates),
            ..Default::default()
        }
    }

    fn calls_to(&self, method: &str) -> Vec<Value> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(m, _)| m == method)
            .map(|(_, body)| body.clone())
            .collect()
    }

    fn take_throttle(counter: &AtomicU32) -> Option<Value> {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
            .then(|| {
                json!({
                    "ok": false,
                    "error_code": 429,
                    "description": "Too Many Requests: retry after 1",
                    "parameters": { "retry_after": 1 }
                })
            })
    }

    fn send_message(&self, body: &Value) -> Value {
        if self.forbid_sends {
            return json!({
                "ok": false,
                "error_code": 403,
                "description": "Forbidden: bot was blocked by the user"
            });
        }
        if let Some(throttled) = Self::take_throttle(&self.throttle_sends) {
            return throttled;
        }

        let sent = self.calls_to("sendmessage").len();
        json!({
            "ok": true,
            "result": {
                "message_id": 100 + sent,
                "date": 1_700_000_000,
                "chat": { "id": body["chat_id"], "type": "private", "first_name": "Alice" },
                "text": body["text"]
            }
        })
    }

    fn get_updates(&self, body: &Value) -> Value {
        if let Some(throttled) = Self::take_throttle(&self.throttle_updates) {
            return throttled;
        }
        let offset = body["offset"].as_i64().unwrap_or(0);
        let limit = body["limit"].as_u64().unwrap_or(100) as usize;
        let page: Vec<_> = self
            .updates
            .iter()
            .filter(|u| u["update_id"].as_i64().unwrap_or(0) >= offset)
            .take(limit)
            .cloned()
            .collect();
        json!({ "ok": true, "result": page })
    }

    fn get_file(body: &Value) -> Value {
        let file_id = body["file_id"].as_str().unwrap_or_default();
        json!({
            "ok": true,
            "result": {
                "file_id": file_id,
                "file_unique_id": format!("u-{file_id}"),
                "file_size": 64,
                "file_path": format!("files/{file_id}.jpg")
            }
        })
    }
}

async fn bot_api(State(api): State<MockApi>, uri: Uri, body: Bytes) -> Json<Value> {
    let method = uri
        .path()
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase();
    let body: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    api.calls.lock().unwrap().push((method.clone(), body.clone()));

    Json(match method.as_str() {
        "sendmessage" => api.send_message(&body),
        "getupdates" => api.get_updates(&body),
        "getfile" => MockApi::get_file(&body),
        _ => json!({ "ok": false, "error_code": 400, "description": "Bad Request: chat not found" }),
    })
}

/// File bodies served from `/file/bot<token>/<path>`.
async fn file_body(State(api): State<MockApi>, uri: Uri) -> Vec<u8> {
    let name = uri.path().rsplit('/').next().unwrap_or_default().to_string();
    api.calls
        .lock()
        .unwrap()
        .push(("file".into(), Value::String(name.clone())));
    format!("contents of {name}").into_bytes()
}

struct Harness {
    api: MockApi,
    dispatcher: TelegramDispatcher,
    _shutdown: oneshot::Sender<()>,
}

async fn start(api: MockApi, aliases: &[(&str, i64)]) -> Harness {
    let app = Router::new()
        .route("/{*path}", post(bot_api).get(file_body))
        .with_state(api.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
            .expect("serve mock bot api");
    });

    let config = TelegramConfig {
        token: Secret::new("123:test".into()),
        api_url: Some(format!("http://{addr}/")),
        chats: aliases
            .iter()
            .map(|(name, id)| (name.to_string(), *id))
            .collect::<BTreeMap<_, _>>(),
        ..Default::default()
    };
    let dispatch = DispatchConfig {
        min_spacing_ms: 10,
        safety_margin_ms: 0,
        ..Default::default()
    };

    Harness {
        api,
        dispatcher: connect(&config, dispatch).unwrap(),
        _shutdown: shutdown_tx,
    }
}

/// An update whose message carries `media` under `key` instead of text.
fn media_update(id: i64, chat_id: i64, key: &str, media: Value) -> Value {
    let mut update = update(id, chat_id, "Alice", "");
    let message = update["message"].as_object_mut().unwrap();
    message.remove("text");
    message.insert(key.to_string(), media);
    update
}

fn update(id: i64, chat_id: i64, name: &str, text: &str) -> Value {
    json!({
        "update_id": id,
        "message": {
            "message_id": id,
            "date": Utc::now().timestamp(),
            "chat": { "id": chat_id, "type": "private", "first_name": name },
            "from": { "id": chat_id, "is_bot": false, "first_name": name },
            "text": text
        }
    })
}

#[tokio::test]
async fn send_to_numeric_id_with_reply() {
    let h = start(MockApi::default(), &[]).await;

    let report = send(&h.dispatcher, &SendOptions {
        chat: "42".into(),
        text: Some("hello".into()),
        reply_to: Some(7),
        ..Default::default()
    })
    .await;

    assert!(report.sent, "{report:?}");
    assert_eq!(report.message_id, Some(101));
    assert_eq!(report.reply_to, Some(7));

    let sends = h.api.calls_to("sendmessage");
    assert_eq!(sends.len(), 1);
    assert_eq!(sends[0]["chat_id"], 42);
    assert_eq!(sends[0]["text"], "hello");
    assert_eq!(sends[0]["reply_parameters"]["message_id"], 7);
}

#[tokio::test]
async fn alias_resolves_to_configured_chat() {
    let h = start(MockApi::default(), &[("Mom", 4242)]).await;

    let report = send(&h.dispatcher, &SendOptions {
        chat: "mom".into(),
        text: Some("dinner?".into()),
        ..Default::default()
    })
    .await;

    assert!(report.sent, "{report:?}");
    assert_eq!(report.chat.as_deref(), Some("Mom"));
    assert_eq!(h.api.calls_to("sendmessage")[0]["chat_id"], 4242);
    assert!(h.api.calls_to("getupdates").is_empty());
}

#[tokio::test]
async fn retry_after_is_honored_before_resending() {
    let api = MockApi::default();
    api.throttle_sends.store(1, Ordering::SeqCst);
    let h = start(api, &[]).await;

    let started = Instant::now();
    let report = send(&h.dispatcher, &SendOptions {
        chat: "42".into(),
        text: Some("patience".into()),
        ..Default::default()
    })
    .await;

    assert!(report.sent, "{report:?}");
    assert_eq!(report.calls, 2);
    assert!(started.elapsed() >= Duration::from_secs(1));
    assert_eq!(h.api.calls_to("sendmessage").len(), 2);
}

#[tokio::test]
async fn unknown_chat_never_reaches_send() {
    let h = start(MockApi::with_updates(vec![update(1, 5, "Bob", "hi")]), &[]).await;

    let report = send(&h.dispatcher, &SendOptions {
        chat: "Nobody Here".into(),
        text: Some("hello?".into()),
        ..Default::default()
    })
    .await;

    assert!(!report.sent);
    assert_eq!(report.error_kind, Some(ErrorKind::Resolution));
    assert_eq!(report.calls, 0);
    assert!(h.api.calls_to("sendmessage").is_empty());
}

#[tokio::test]
async fn blocked_bot_is_a_permanent_failure() {
    let api = MockApi {
        forbid_sends: true,
        ..Default::default()
    };
    let h = start(api, &[]).await;

    let report = send(&h.dispatcher, &SendOptions {
        chat: "42".into(),
        text: Some("hello".into()),
        ..Default::default()
    })
    .await;

    assert!(!report.sent);
    assert_eq!(report.error_kind, Some(ErrorKind::Permanent));
    assert_eq!(report.calls, 1);
}

#[tokio::test]
async fn batch_sends_in_order_and_reports_each() {
    let h = start(MockApi::default(), &[]).await;

    let reports = send_batch(&h.dispatcher, "42", ["one", "two", "", "three"].map(String::from)).await;

    assert_eq!(reports.len(), 4);
    let sent: Vec<_> = reports.iter().map(|r| r.sent).collect();
    assert_eq!(sent, [true, true, false, true]);
    assert_eq!(reports[2].error.as_deref(), Some("Message text is empty"));
    assert_eq!(reports[2].calls, 0);
    assert_eq!(reports[3].message_id, Some(103));

    let texts: Vec<_> = h
        .api
        .calls_to("sendmessage")
        .iter()
        .map(|b| b["text"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(texts, ["one", "two", "three"]);
}

#[tokio::test]
async fn malformed_reply_id_is_rejected_without_sending() {
    let h = start(MockApi::default(), &[]).await;

    let request = CallRequest::new("42", TelegramCall::SendText {
        text: "hello".into(),
    })
    .reply_to("not-a-message");
    let result = h.dispatcher.submit(request).await;

    assert_eq!(result.error().map(|e| e.kind()), Some(ErrorKind::Permanent));
    assert!(h.api.calls_to("sendmessage").is_empty());
}

#[tokio::test]
async fn throttled_name_lookup_waits_before_sending() {
    let api = MockApi::with_updates(vec![update(1, 5, "Bob", "hi")]);
    api.throttle_updates.store(1, Ordering::SeqCst);
    let h = start(api, &[]).await;

    let started = Instant::now();
    let report = send(&h.dispatcher, &SendOptions {
        chat: "Bob".into(),
        text: Some("hello bob".into()),
        ..Default::default()
    })
    .await;

    assert!(report.sent, "{report:?}");
    assert_eq!(report.calls, 1);
    assert!(started.elapsed() >= Duration::from_secs(1));
    assert_eq!(h.api.calls_to("getupdates").len(), 2);
    assert_eq!(h.api.calls_to("sendmessage")[0]["chat_id"], 5);
}

#[tokio::test]
async fn recent_filters_by_chat_name_without_confirming() {
    let h = start(
        MockApi::with_updates(vec![
            update(10, 1, "Alice", "hi from alice"),
            update(11, 2, "Bob", "hi from bob"),
            update(12, 1, "Alice", "again"),
        ]),
        &[],
    )
    .await;

    let messages = fetch_recent(
        &h.dispatcher,
        100,
        &FetchOptions {
            chat: Some("alice".into()),
            ..Default::default()
        },
        Utc::now(),
    )
    .await
    .unwrap();

    assert_eq!(messages.len(), 2);
    assert!(messages.iter().all(|m| m.chat == "Alice"));
    assert_eq!(messages[1].text, "again");
    assert!(
        h.api
            .calls_to("getupdates")
            .iter()
            .all(|b| b.get("offset").is_none_or(Value::is_null))
    );
}

#[tokio::test]
async fn unread_pages_through_and_confirms() {
    let h = start(
        MockApi::with_updates(vec![
            update(10, 1, "Alice", "a"),
            update(11, 2, "Bob", "b"),
            update(12, 1, "Alice", "c"),
        ]),
        &[],
    )
    .await;

    let messages = fetch_unread(&h.dispatcher, 2, None).await.unwrap();

    let texts: Vec<_> = messages.iter().map(|m| m.text.as_str()).collect();
    assert_eq!(texts, ["a", "b", "c"]);

    let fetches = h.api.calls_to("getupdates");
    assert_eq!(fetches.len(), 3);
    assert_eq!(fetches[1]["offset"], 12);
    assert_eq!(fetches[2]["offset"], 13);
}

#[tokio::test]
async fn recent_reads_only_the_oldest_page() {
    let updates = (1..=150)
        .map(|i| update(i, 1, "Alice", &format!("m{i}")))
        .collect();
    let h = start(MockApi::with_updates(updates), &[]).await;

    let messages = fetch_recent(
        &h.dispatcher,
        100,
        &FetchOptions {
            limit: 500,
            ..Default::default()
        },
        Utc::now(),
    )
    .await
    .unwrap();

    assert_eq!(messages.len(), 100);
    assert_eq!(messages[0].text, "m1");
    assert_eq!(messages[99].text, "m100");
    let fetches = h.api.calls_to("getupdates");
    assert_eq!(fetches.len(), 1);
    assert!(fetches[0].get("offset").is_none_or(Value::is_null));
}

#[tokio::test]
async fn download_saves_newest_attachments_first() {
    let h = start(
        MockApi::with_updates(vec![
            media_update(
                10,
                1,
                "photo",
                json!([{ "file_id": "photo1", "file_unique_id": "p", "width": 90, "height": 90 }]),
            ),
            update(11, 1, "Alice", "no attachment"),
            media_update(
                12,
                1,
                "document",
                json!({ "file_id": "doc1", "file_unique_id": "d", "file_name": "minutes.pdf" }),
            ),
            media_update(
                13,
                2,
                "document",
                json!({ "file_id": "elsewhere", "file_unique_id": "e", "file_name": "x.pdf" }),
            ),
        ]),
        &[],
    )
    .await;
    let out = tempfile::tempdir().unwrap();

    let reports = download_media(&h.dispatcher, 100, &DownloadOptions {
        chat: "1".into(),
        limit: 5,
        output_dir: out.path().join("attachments"),
        message_id: None,
    })
    .await
    .unwrap();

    assert_eq!(reports.len(), 2);
    assert!(reports.iter().all(|r| r.downloaded), "{reports:?}");
    assert_eq!(reports[0].message_id, 12);
    assert_eq!(reports[0].file.as_deref(), Some("12_minutes.pdf"));
    assert_eq!(reports[1].file.as_deref(), Some("1_10.jpg"));

    let saved = std::fs::read_to_string(out.path().join("attachments/12_minutes.pdf")).unwrap();
    assert_eq!(saved, "contents of doc1.jpg");
    assert_eq!(reports[0].size, Some(saved.len() as u64));

    let requested: Vec<_> = h
        .api
        .calls_to("getfile")
        .iter()
        .map(|b| b["file_id"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(requested, ["doc1", "photo1"]);
    assert!(
        h.api
            .calls_to("getupdates")
            .iter()
            .all(|b| b.get("offset").is_none_or(Value::is_null))
    );
}

#[tokio::test]
async fn download_from_a_text_message_reports_no_media() {
    let h = start(MockApi::with_updates(vec![update(11, 1, "Alice", "just text")]), &[]).await;
    let out = tempfile::tempdir().unwrap();

    let reports = download_media(&h.dispatcher, 100, &DownloadOptions {
        chat: "1".into(),
        limit: 5,
        output_dir: out.path().to_path_buf(),
        message_id: Some(11),
    })
    .await
    .unwrap();

    assert_eq!(reports.len(), 1);
    assert!(!reports[0].downloaded);
    assert_eq!(reports[0].error.as_deref(), Some("No media in message"));
    assert!(h.api.calls_to("getfile").is_empty());
}

#[tokio::test]
async fn list_shows_active_chats_then_aliases() {
    let h = start(
        MockApi::with_updates(vec![
            update(10, 1, "Alice", "a"),
            update(11, 2, "Bob", "b"),
            update(12, 1, "Alice", "c"),
        ]),
        &[("Mom", 4242)],
    )
    .await;

    let chats = list_chats(&h.dispatcher, 100, None, 30).await.unwrap();

    let names: Vec<_> = chats.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, ["Alice", "Bob", "Mom"]);
    assert_eq!(chats[0].pending, 2);
    assert_eq!(chats[2].id, 4242);

    let searched = list_chats(&h.dispatcher, 100, Some("bo"), 30).await.unwrap();
    assert_eq!(searched.len(), 1);
    assert_eq!(searched[0].id, 2);
}
