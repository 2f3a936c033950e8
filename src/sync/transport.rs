//! Graph store transport over the Neo4j Query API v2.
//!
//! Uses `ureq` for synchronous HTTP. Every logical operation is one POST of
//! `{statement, parameters}` with basic authentication. Explicit transactions
//! use the `/tx` family of endpoints and echo the cluster-affinity header the
//! server hands out when the transaction is opened.
//!
//! Transport-level failures (DNS, connect, reset) are retried with bounded
//! exponential backoff, except on commit. HTTP status errors are never
//! retried.

use std::time::Duration;

use serde::Serialize;
use serde_json::Value;

use super::SyncPhase;
use crate::error::{SyncError, SyncResult};

/// Header that pins follow-up transaction requests to the same cluster member.
const AFFINITY_HEADER: &str = "neo4j-cluster-affinity";

/// One Cypher statement with its parameters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Statement {
    pub statement: String,
    pub parameters: Value,
}

impl Statement {
    pub fn new(statement: impl Into<String>, parameters: Value) -> Self {
        Self {
            statement: statement.into(),
            parameters,
        }
    }

    /// Statement without parameters.
    pub fn bare(statement: impl Into<String>) -> Self {
        Self::new(statement, Value::Object(Default::default()))
    }
}

/// Handle of an open explicit transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub id: String,
    pub affinity: Option<String>,
}

/// How statements reach the graph store.
pub trait GraphTransport {
    /// Run one statement in an implicit (auto-commit) transaction.
    fn run(&self, phase: SyncPhase, statement: &Statement) -> SyncResult<Value>;

    /// Open an explicit transaction, running `first` inside it.
    fn begin(&self, phase: SyncPhase, first: &Statement) -> SyncResult<Transaction>;

    /// Run a statement inside an open transaction.
    fn run_in(&self, tx: &Transaction, phase: SyncPhase, statement: &Statement)
    -> SyncResult<Value>;

    fn commit(&self, tx: Transaction) -> SyncResult<()>;

    fn rollback(&self, tx: Transaction) -> SyncResult<()>;
}

/// Retry budget for transport-level failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Retries allowed for a request made during `phase`.
    ///
    /// A commit is sent once. If its response is lost the transaction may
    /// already be committed, and a resend would only see it as unknown.
    pub fn max_retries_for(&self, phase: SyncPhase) -> u32 {
        match phase {
            SyncPhase::Committing => 0,
            _ => self.max_retries,
        }
    }

    /// Delay before retry number `attempt` (1-based): `base · 2^(attempt-1)`.
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
    }
}

/// Derive the Query API root from a connection URI.
///
/// `neo4j+s://abcd.databases.neo4j.io` becomes `https://abcd.databases.neo4j.io`;
/// explicit `http(s)://` URIs are kept as given.
pub fn http_base(uri: &str) -> String {
    let uri = uri.trim().trim_end_matches('/');
    if uri.starts_with("http://") || uri.starts_with("https://") {
        return uri.to_string();
    }
    let host = uri.rsplit("//").next().unwrap_or(uri);
    format!("https://{host}")
}

/// HTTP transport against one database of a Neo4j server.
pub struct HttpTransport {
    query_url: String,
    authorization: String,
    agent: ureq::Agent,
    retry: RetryPolicy,
}

impl HttpTransport {
    pub fn new(uri: &str, database: &str, user: &str, password: &str, timeout: Duration) -> Self {
        Self {
            query_url: format!("{}/db/{}/query/v2", http_base(uri), database),
            authorization: basic_auth(user, password),
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn query_url(&self) -> &str {
        &self.query_url
    }

    fn tx_url(&self, tx: &Transaction) -> String {
        format!("{}/tx/{}", self.query_url, tx.id)
    }

    /// Send one request, retrying transport failures. Returns the parsed body
    /// and the affinity header, if any.
    fn send(
        &self,
        phase: SyncPhase,
        method: &str,
        url: &str,
        body: Option<&Statement>,
        affinity: Option<&str>,
    ) -> SyncResult<(Value, Option<String>)> {
        let max_retries = self.retry.max_retries_for(phase);
        let mut attempt = 0u32;
        loop {
            let mut request = self
                .agent
                .request(method, url)
                .set("Authorization", &self.authorization)
                .set("Accept", "application/json");
            if let Some(affinity) = affinity {
                request = request.set(AFFINITY_HEADER, affinity);
            }

            let result = match body {
                Some(statement) => request.send_json(statement),
                None => request.call(),
            };

            match result {
                Ok(response) => {
                    let affinity = response.header(AFFINITY_HEADER).map(str::to_string);
                    let text = response.into_string().map_err(|e| SyncError::Response {
                        phase,
                        message: format!("read body: {e}"),
                    })?;
                    let value = parse_body(phase, &text)?;
                    return Ok((value, affinity));
                }
                Err(ureq::Error::Status(status, response)) => {
                    let text = response.into_string().unwrap_or_default();
                    return Err(SyncError::Rejected {
                        phase,
                        status,
                        message: error_message(&text),
                    });
                }
                Err(ureq::Error::Transport(transport)) => {
                    attempt += 1;
                    if attempt > max_retries {
                        return Err(SyncError::Transport {
                            phase,
                            attempts: attempt,
                            message: transport.to_string(),
                        });
                    }
                    let delay = self.retry.delay(attempt);
                    tracing::warn!(
                        %phase,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %transport,
                        "graph store unreachable, retrying"
                    );
                    std::thread::sleep(delay);
                }
            }
        }
    }
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("query_url", &self.query_url)
            .field("retry", &self.retry)
            .finish()
    }
}

impl GraphTransport for HttpTransport {
    fn run(&self, phase: SyncPhase, statement: &Statement) -> SyncResult<Value> {
        self.send(phase, "POST", &self.query_url, Some(statement), None)
            .map(|(v, _)| v)
    }

    fn begin(&self, phase: SyncPhase, first: &Statement) -> SyncResult<Transaction> {
        let url = format!("{}/tx", self.query_url);
        let (body, affinity) = self.send(phase, "POST", &url, Some(first), None)?;
        let id = body["transaction"]["id"]
            .as_str()
            .ok_or_else(|| SyncError::Response {
                phase,
                message: "transaction id missing from response".into(),
            })?
            .to_string();
        Ok(Transaction { id, affinity })
    }

    fn run_in(
        &self,
        tx: &Transaction,
        phase: SyncPhase,
        statement: &Statement,
    ) -> SyncResult<Value> {
        self.send(
            phase,
            "POST",
            &self.tx_url(tx),
            Some(statement),
            tx.affinity.as_deref(),
        )
        .map(|(v, _)| v)
    }

    fn commit(&self, tx: Transaction) -> SyncResult<()> {
        let url = format!("{}/commit", self.tx_url(&tx));
        self.send(SyncPhase::Committing, "POST", &url, None, tx.affinity.as_deref())
            .map(|_| ())
    }

    fn rollback(&self, tx: Transaction) -> SyncResult<()> {
        let url = self.tx_url(&tx);
        self.send(SyncPhase::Idle, "DELETE", &url, None, tx.affinity.as_deref())
            .map(|_| ())
    }
}

/// Parse a 2xx body; surface an `errors` array as a query failure.
fn parse_body(phase: SyncPhase, text: &str) -> SyncResult<Value> {
    if text.trim().is_empty() {
        return Ok(Value::Null);
    }
    let value: Value = serde_json::from_str(text).map_err(|e| SyncError::Response {
        phase,
        message: format!("invalid JSON: {e}"),
    })?;
    if let Some(first) = value["errors"].as_array().and_then(|errs| errs.first()) {
        return Err(SyncError::Query {
            phase,
            code: first["code"].as_str().unwrap_or("unknown").to_string(),
            message: first["message"].as_str().unwrap_or("").to_string(),
        });
    }
    Ok(value)
}

/// Best-effort message from an error body.
fn error_message(text: &str) -> String {
    serde_json::from_str::<Value>(text)
        .ok()
        .and_then(|v| {
            v["errors"].as_array().and_then(|errs| errs.first()).map(|e| {
                format!(
                    "{}: {}",
                    e["code"].as_str().unwrap_or("unknown"),
                    e["message"].as_str().unwrap_or("")
                )
            })
        })
        .unwrap_or_else(|| text.chars().take(500).collect())
}

fn basic_auth(user: &str, pass: &str) -> String {
    format!("Basic {}", base64_encode(format!("{user}:{pass}").as_bytes()))
}

/// Minimal base64 encoder (avoids adding a base64 crate dependency).
fn base64_encode(input: &[u8]) -> String {
    const CHARS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";
    let mut result = String::with_capacity(input.len().div_ceil(3) * 4);
    for chunk in input.chunks(3) {
        let b0 = chunk[0] as u32;
        let b1 = chunk.get(1).copied().unwrap_or(0) as u32;
        let b2 = chunk.get(2).copied().unwrap_or(0) as u32;
        let n = (b0 << 16) | (b1 << 8) | b2;
        result.push(CHARS[((n >> 18) & 0x3F) as usize] as char);
        result.push(CHARS[((n >> 12) & 0x3F) as usize] as char);
        result.push(if chunk.len() > 1 {
            CHARS[((n >> 6) & 0x3F) as usize] as char
        } else {
            '='
        });
        result.push(if chunk.len() > 2 {
            CHARS[(n & 0x3F) as usize] as char
        } else {
            '='
        });
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_auth_header() {
        assert_eq!(basic_auth("user", "pass"), "Basic dXNlcjpwYXNz");
        assert_eq!(basic_auth("neo4j", "secret!"), "Basic bmVvNGo6c2VjcmV0IQ==");
    }

    #[test]
    fn base64_padding() {
        assert_eq!(base64_encode(b"f"), "Zg==");
        assert_eq!(base64_encode(b"fo"), "Zm8=");
        assert_eq!(base64_encode(b"foo"), "Zm9v");
        assert_eq!(base64_encode(b""), "");
    }

    #[test]
    fn aura_uri_becomes_https_base() {
        assert_eq!(
            http_base("neo4j+s://abcd1234.databases.neo4j.io"),
            "https://abcd1234.databases.neo4j.io"
        );
        assert_eq!(http_base("http://localhost:7474/"), "http://localhost:7474");
        let t = HttpTransport::new(
            "neo4j+s://abcd1234.databases.neo4j.io",
            "neo4j",
            "u",
            "p",
            Duration::from_secs(1),
        );
        assert_eq!(
            t.query_url(),
            "https://abcd1234.databases.neo4j.io/db/neo4j/query/v2"
        );
    }

    #[test]
    fn retry_delay_doubles() {
        let policy = RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
        };
        assert_eq!(policy.delay(1), Duration::from_millis(100));
        assert_eq!(policy.delay(2), Duration::from_millis(200));
        assert_eq!(policy.delay(3), Duration::from_millis(400));
    }

    #[test]
    fn errors_array_in_success_body_is_query_error() {
        let body = r#"{"errors":[{"code":"Neo.ClientError.Procedure.ProcedureNotFound","message":"apoc missing"}]}"#;
        let err = parse_body(SyncPhase::BatchUpserting, body).unwrap_err();
        match err {
            SyncError::Query { code, message, .. } => {
                assert_eq!(code, "Neo.ClientError.Procedure.ProcedureNotFound");
                assert_eq!(message, "apoc missing");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(parse_body(SyncPhase::Done, "").unwrap(), Value::Null);
        assert!(parse_body(SyncPhase::Done, r#"{"data":{},"errors":[]}"#).is_ok());
    }

    #[test]
    fn error_message_prefers_structured_errors() {
        let body = r#"{"errors":[{"code":"Neo.ClientError.Security.Unauthorized","message":"bad creds"}]}"#;
        assert_eq!(
            error_message(body),
            "Neo.ClientError.Security.Unauthorized: bad creds"
        );
        assert_eq!(error_message("gateway timeout"), "gateway timeout");
    }

    #[test]
    fn unreachable_store_exhausts_retries() {
        let transport = HttpTransport::new(
            "http://127.0.0.1:9",
            "neo4j",
            "u",
            "p",
            Duration::from_millis(500),
        )
        .with_retry(RetryPolicy {
            max_retries: 2,
            base_delay: Duration::ZERO,
        });
        let err = transport
            .run(SyncPhase::BatchUpserting, &Statement::bare("RETURN 1"))
            .unwrap_err();
        assert!(matches!(err, SyncError::Transport { attempts: 3, .. }));
    }

    #[test]
    fn commit_is_never_retried() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries_for(SyncPhase::Committing), 0);
        assert_eq!(policy.max_retries_for(SyncPhase::BatchUpserting), 3);
        assert_eq!(policy.max_retries_for(SyncPhase::Clearing), 3);
    }

    #[test]
    fn unreachable_commit_fails_after_one_attempt() {
        let transport = HttpTransport::new(
            "http://127.0.0.1:9",
            "neo4j",
            "u",
            "p",
            Duration::from_millis(500),
        )
        .with_retry(RetryPolicy {
            max_retries: 2,
            base_delay: Duration::ZERO,
        });
        let tx = Transaction {
            id: "7".into(),
            affinity: None,
        };
        let err = transport.commit(tx).unwrap_err();
        assert!(matches!(
            err,
            SyncError::Transport {
                phase: SyncPhase::Committing,
                attempts: 1,
                ..
            }
        ));
    }
}
