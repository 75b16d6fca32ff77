/*
 * http.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of Magma, a multi-protocol mail server.
 *
 * Magma is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Magma is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Magma.  If not, see <http://www.gnu.org/licenses/>.
 */

//! HTTP/1.1 pre-parse and the JSON-RPC 2.0 portal endpoint. Only the
//! request line, headers, and a Content-Length body are parsed here;
//! the interesting surface is `POST /portal/v1`. The safeguard policy
//! refuses plaintext requests unless they come from loopback.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Deserialize;
use serde_json::{json, Value};

use crate::meta::{self, FetchMask, MetaCache, Protocol};
use crate::server::{CommandTable, Connection, Magma, MatchKind};

/// Cap on request bodies and on header blocks.
const MAX_BODY: usize = 1024 * 1024;
const MAX_HEADERS: usize = 64;

/// One authenticated portal session, held against the meta-user cache.
struct WebSession {
    usernum: u64,
    username: String,
    created: Instant,
}

/// Token-keyed portal sessions. Pruned before the meta cache so expired
/// sessions release their user references first.
#[derive(Default)]
pub struct WebSessions {
    sessions: Mutex<HashMap<String, WebSession>>,
}

impl WebSessions {
    pub fn new() -> Self {
        Self::default()
    }

    fn create(&self, usernum: u64, username: &str) -> Result<String, String> {
        let mut raw = [0u8; 24];
        getrandom::getrandom(&mut raw).map_err(|e| e.to_string())?;
        let token: String = raw.iter().map(|b| format!("{:02x}", b)).collect();
        self.sessions.lock().unwrap().insert(
            token.clone(),
            WebSession { usernum, username: username.to_string(), created: Instant::now() },
        );
        Ok(token)
    }

    fn find(&self, token: &str) -> Option<(u64, String)> {
        self.sessions
            .lock()
            .unwrap()
            .get(token)
            .map(|s| (s.usernum, s.username.clone()))
    }

    fn remove(&self, token: &str) -> Option<u64> {
        self.sessions.lock().unwrap().remove(token).map(|s| s.usernum)
    }

    pub fn count(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    /// Expire sessions older than `max_age`, releasing their meta-user
    /// references.
    pub fn prune(&self, meta: &MetaCache, max_age: Duration) -> usize {
        let mut sessions = self.sessions.lock().unwrap();
        let expired: Vec<String> = sessions
            .iter()
            .filter(|(_, s)| s.created.elapsed() > max_age)
            .map(|(t, _)| t.clone())
            .collect();
        for token in &expired {
            if let Some(session) = sessions.remove(token) {
                meta.meta_release(session.usernum, Protocol::Web);
            }
        }
        expired.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RpcMethod {
    Auth,
    FoldersList,
    MessagesList,
    Logout,
}

fn method_table() -> CommandTable<RpcMethod> {
    CommandTable::new(&[
        ("auth", MatchKind::Exact, RpcMethod::Auth),
        ("folders.list", MatchKind::Exact, RpcMethod::FoldersList),
        ("messages.list", MatchKind::Exact, RpcMethod::MessagesList),
        ("logout", MatchKind::Exact, RpcMethod::Logout),
    ])
}

#[derive(Debug, Deserialize)]
struct RpcRequest {
    #[serde(default)]
    jsonrpc: String,
    #[serde(default)]
    id: Value,
    method: String,
    #[serde(default)]
    params: Value,
}

struct Request {
    method: String,
    target: String,
    headers: Vec<(String, String)>,
}

impl Request {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Session token from a `magma-session` cookie.
    fn cookie_session(&self) -> Option<String> {
        let cookies = self.header("cookie")?;
        for pair in cookies.split(';') {
            let pair = pair.trim();
            if let Some(value) = pair.strip_prefix("magma-session=") {
                return Some(value.to_string());
            }
        }
        None
    }
}

pub async fn run(ctx: Arc<Magma>, mut con: Connection) {
    loop {
        if !ctx.status.online() {
            break;
        }

        let request = match read_request(&mut con).await {
            Ok(Some(request)) => request,
            Ok(None) | Err(_) => break,
        };

        // Safeguard: no plaintext API access except from loopback.
        if !con.is_secure() && !con.peer.ip().is_loopback() {
            let _ = write_response(
                &mut con,
                403,
                "Forbidden",
                "text/plain",
                b"TLS required\n",
                true,
            )
            .await;
            break;
        }

        let close = request
            .header("connection")
            .map(|v| v.eq_ignore_ascii_case("close"))
            .unwrap_or(false);

        let handled = match (request.method.as_str(), request.target.as_str()) {
            ("POST", "/portal/v1") => handle_rpc(&ctx, &mut con, &request, close).await,
            ("GET", "/") => {
                write_response(&mut con, 200, "OK", "text/plain", b"magma\n", close).await
            }
            _ => {
                write_response(&mut con, 404, "Not Found", "text/plain", b"not found\n", close)
                    .await
            }
        };

        if handled.is_err() || close {
            break;
        }
    }
    con.shutdown().await;
}

/// Parse the request line and headers; `Ok(None)` means the peer closed
/// between requests.
async fn read_request(con: &mut Connection) -> Result<Option<Request>, ()> {
    let line = match con.read_line().await {
        Ok(line) => line,
        Err(_) => return Ok(None),
    };
    let mut parts = line.split_whitespace();
    let (Some(method), Some(target), Some(version)) = (parts.next(), parts.next(), parts.next())
    else {
        return Err(());
    };
    if !version.starts_with("HTTP/1.") {
        return Err(());
    }

    let mut headers = Vec::new();
    loop {
        let header = con.read_line().await.map_err(|_| ())?;
        if header.is_empty() {
            break;
        }
        if headers.len() >= MAX_HEADERS {
            return Err(());
        }
        if let Some((name, value)) = header.split_once(':') {
            headers.push((name.trim().to_string(), value.trim().to_string()));
        }
    }

    Ok(Some(Request {
        method: method.to_string(),
        target: target.to_string(),
        headers,
    }))
}

async fn write_response(
    con: &mut Connection,
    code: u16,
    reason: &str,
    content_type: &str,
    body: &[u8],
    close: bool,
) -> Result<(), ()> {
    let head = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: {}\r\n\r\n",
        code,
        reason,
        content_type,
        body.len(),
        if close { "close" } else { "keep-alive" },
    );
    con.write_raw(head.as_bytes()).await.map_err(|_| ())?;
    con.write_raw(body).await.map_err(|_| ())
}

fn rpc_error(id: &Value, code: i64, message: &str) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "error": { "code": code, "message": message } })
}

fn rpc_result(id: &Value, result: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "result": result })
}

async fn handle_rpc(
    ctx: &Arc<Magma>,
    con: &mut Connection,
    request: &Request,
    close: bool,
) -> Result<(), ()> {
    let length: usize = request
        .header("content-length")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    if length == 0 || length > MAX_BODY {
        return write_response(con, 411, "Length Required", "text/plain", b"length\n", close)
            .await;
    }
    let body = con.read_exact(length).await.map_err(|_| ())?;

    let response = match serde_json::from_slice::<RpcRequest>(&body) {
        Ok(rpc) => {
            if rpc.jsonrpc != "2.0" {
                rpc_error(&rpc.id, -32600, "invalid request")
            } else {
                dispatch_rpc(ctx, request, rpc).await
            }
        }
        Err(_) => rpc_error(&Value::Null, -32700, "parse error"),
    };

    let payload = serde_json::to_vec(&response).map_err(|_| ())?;
    write_response(con, 200, "OK", "application/json", &payload, close).await
}

async fn dispatch_rpc(ctx: &Arc<Magma>, request: &Request, rpc: RpcRequest) -> Value {
    let table = method_table();
    let Some((entry, _)) = table.lookup(&rpc.method) else {
        return rpc_error(&rpc.id, -32601, "method not found");
    };

    match entry.handler {
        RpcMethod::Auth => rpc_auth(ctx, &rpc).await,
        RpcMethod::FoldersList => rpc_folders(ctx, request, &rpc).await,
        RpcMethod::MessagesList => rpc_messages(ctx, request, &rpc).await,
        RpcMethod::Logout => rpc_logout(ctx, request, &rpc).await,
    }
}

fn param_str<'a>(params: &'a Value, key: &str) -> Option<&'a str> {
    params.get(key).and_then(|v| v.as_str())
}

/// Resolve the caller's session from the params or the cookie.
fn session_of(ctx: &Magma, request: &Request, params: &Value) -> Option<(u64, String)> {
    let token = param_str(params, "session")
        .map(|s| s.to_string())
        .or_else(|| request.cookie_session())?;
    ctx.web_sessions.find(&token)
}

async fn rpc_auth(ctx: &Arc<Magma>, rpc: &RpcRequest) -> Value {
    let (Some(username), Some(password)) =
        (param_str(&rpc.params, "username"), param_str(&rpc.params, "password"))
    else {
        return rpc_error(&rpc.id, -32602, "auth requires username and password");
    };
    match meta::login(&ctx.meta, username, password, Protocol::Web, FetchMask::ALL).await {
        Ok(outcome) => match ctx.web_sessions.create(outcome.user.usernum, username) {
            Ok(token) => rpc_result(&rpc.id, json!({ "session": token })),
            Err(e) => {
                tracing::error!(error = %e, "session token generation failed");
                ctx.meta.meta_release(outcome.user.usernum, Protocol::Web);
                rpc_error(&rpc.id, -32603, "internal error")
            }
        },
        Err(meta::AuthError::Transient(_)) => rpc_error(&rpc.id, -32003, "temporary failure"),
        Err(_) => rpc_error(&rpc.id, -32001, "authentication failed"),
    }
}

async fn rpc_folders(ctx: &Arc<Magma>, request: &Request, rpc: &RpcRequest) -> Value {
    let Some((usernum, username)) = session_of(ctx, request, &rpc.params) else {
        return rpc_error(&rpc.id, -32002, "session required");
    };
    let Some(user) = ctx.meta.peek(usernum) else {
        tracing::warn!(usernum, username, "portal session outlived the cached user");
        return rpc_error(&rpc.id, -32002, "session expired");
    };
    let _snapshot = user.read_lock().await;
    let mut folders = Vec::new();
    let mut cursor = user.message_folders.cursor();
    while let Some(folder) = cursor.next_value() {
        folders.push(json!({
            "foldernum": folder.foldernum,
            "parent": folder.parent,
            "name": folder.name,
        }));
    }
    rpc_result(&rpc.id, json!({ "folders": folders }))
}

async fn rpc_messages(ctx: &Arc<Magma>, request: &Request, rpc: &RpcRequest) -> Value {
    let Some((usernum, _)) = session_of(ctx, request, &rpc.params) else {
        return rpc_error(&rpc.id, -32002, "session required");
    };
    let Some(user) = ctx.meta.peek(usernum) else {
        return rpc_error(&rpc.id, -32002, "session expired");
    };
    let folder = rpc.params.get("folder").and_then(|v| v.as_u64());

    let _snapshot = user.read_lock().await;
    let mut messages = Vec::new();
    let mut cursor = user.messages.cursor();
    while let Some(message) = cursor.next_value() {
        if folder.map(|f| message.foldernum == f).unwrap_or(true) {
            messages.push(json!({
                "messagenum": message.messagenum,
                "foldernum": message.foldernum,
                "size": message.size,
                "status": message.status,
                "created": message.created,
            }));
        }
    }
    rpc_result(&rpc.id, json!({ "messages": messages }))
}

async fn rpc_logout(ctx: &Arc<Magma>, request: &Request, rpc: &RpcRequest) -> Value {
    let token = param_str(&rpc.params, "session")
        .map(|s| s.to_string())
        .or_else(|| request.cookie_session());
    let Some(token) = token else {
        return rpc_error(&rpc.id, -32002, "session required");
    };
    match ctx.web_sessions.remove(&token) {
        Some(usernum) => {
            ctx.meta.meta_release(usernum, Protocol::Web);
            rpc_result(&rpc.id, json!({ "ok": true }))
        }
        None => rpc_error(&rpc.id, -32002, "no such session"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cookie_extraction() {
        let request = Request {
            method: "POST".into(),
            target: "/portal/v1".into(),
            headers: vec![(
                "Cookie".into(),
                "theme=dark; magma-session=abc123; lang=en".into(),
            )],
        };
        assert_eq!(request.cookie_session(), Some("abc123".to_string()));
        assert_eq!(request.header("cookie").is_some(), true);
        assert_eq!(request.header("COOKIE").is_some(), true);
    }

    #[test]
    fn rpc_error_shapes() {
        let err = rpc_error(&Value::Null, -32700, "parse error");
        assert_eq!(err["error"]["code"], -32700);
        assert_eq!(err["jsonrpc"], "2.0");
        let ok = rpc_result(&json!(7), json!({"x": 1}));
        assert_eq!(ok["id"], 7);
        assert_eq!(ok["result"]["x"], 1);
    }

    #[test]
    fn method_table_resolves() {
        let table = method_table();
        assert_eq!(table.lookup("auth").unwrap().0.handler, RpcMethod::Auth);
        assert_eq!(table.lookup("folders.list").unwrap().0.handler, RpcMethod::FoldersList);
        assert!(table.lookup("shutdown").is_none());
    }
}
