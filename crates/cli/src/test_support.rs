// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test infrastructure: token builders and a scripted transport.

use std::collections::VecDeque;
use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use parking_lot::Mutex;

use crate::credential::oauth::{FormFuture, FormReply, FormTransport};
use crate::credential::Credentials;

/// Build an unsigned compact JWT carrying `claims` as its payload.
pub fn fake_jwt(claims: serde_json::Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{header}.{payload}.sig")
}

/// A form reply with a JSON body.
pub fn json_reply(status: u16, body: serde_json::Value) -> FormReply {
    FormReply { status, body: body.to_string() }
}

/// An OAuth error reply (`400 {"error": code}`).
pub fn oauth_error(code: &str) -> FormReply {
    json_reply(400, serde_json::json!({ "error": code }))
}

/// Minimal credentials record for store and coordinator tests.
pub fn credentials(access_token: &str, expires_at: u64, refresh_token: Option<&str>) -> Credentials {
    Credentials {
        access_token: access_token.to_owned(),
        refresh_token: refresh_token.map(str::to_owned),
        expires_at,
        user_id: "user_123".to_owned(),
        email: Some("a@b.com".to_owned()),
        staging_cache: None,
    }
}

/// One scripted outcome for a form post.
#[derive(Debug, Clone)]
pub enum Step {
    Reply(FormReply),
    /// Reply after the given delay (observes tokio's clock).
    Delayed(Duration, FormReply),
    /// No response at all.
    Fail(String),
}

/// A form post observed by [`ScriptedTransport`].
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub url: String,
    pub form: Vec<(String, String)>,
    pub at: tokio::time::Instant,
}

impl RecordedCall {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.form.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str())
    }
}

/// In-memory [`FormTransport`] replaying a fixed script.
///
/// Once the script runs dry the fallback reply is used; without one,
/// further posts fail as transport errors.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    steps: Mutex<VecDeque<Step>>,
    fallback: Option<FormReply>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedTransport {
    pub fn new(steps: impl IntoIterator<Item = Step>) -> Self {
        Self { steps: Mutex::new(steps.into_iter().collect()), ..Default::default() }
    }

    pub fn replies(replies: impl IntoIterator<Item = FormReply>) -> Self {
        Self::new(replies.into_iter().map(Step::Reply))
    }

    pub fn with_fallback(mut self, reply: FormReply) -> Self {
        self.fallback = Some(reply);
        self
    }

    pub fn push(&self, step: Step) {
        self.steps.lock().push_back(step);
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

impl FormTransport for ScriptedTransport {
    fn post_form<'a>(&'a self, url: &'a str, form: &'a [(&'a str, &'a str)]) -> FormFuture<'a> {
        self.calls.lock().push(RecordedCall {
            url: url.to_owned(),
            form: form.iter().map(|(k, v)| ((*k).to_owned(), (*v).to_owned())).collect(),
            at: tokio::time::Instant::now(),
        });
        let step = self.steps.lock().pop_front();
        let step = step.or_else(|| self.fallback.clone().map(Step::Reply));
        Box::pin(async move {
            match step {
                Some(Step::Reply(reply)) => Ok(reply),
                Some(Step::Delayed(delay, reply)) => {
                    tokio::time::sleep(delay).await;
                    Ok(reply)
                }
                Some(Step::Fail(msg)) => Err(anyhow::anyhow!(msg)),
                None => Err(anyhow::anyhow!("script exhausted")),
            }
        })
    }
}

/// Assert that an expression returns `Err` whose message contains a substring.
#[macro_export]
macro_rules! assert_err_contains {
    ($expr:expr, $substr:expr) => {{
        let result = $expr;
        let err = result.expect_err(concat!("expected Err for: ", stringify!($expr)));
        let msg = err.to_string();
        assert!(msg.contains($substr), "expected error containing {:?}, got: {msg:?}", $substr);
    }};
}
