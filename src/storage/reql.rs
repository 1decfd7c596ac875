//! Minimal ReQL client
//!
//! Speaks the RethinkDB JSON wire protocol over one TCP connection. Only the
//! terms the annotation store needs are exposed.
//!
//! # Wire format
//!
//! ```text
//! Handshake: V0_4 magic | auth key len | auth key | JSON magic  →  "SUCCESS\0"
//! Query:     token (u64 LE) | length (u32 LE) | [START, term, {}]
//! Response:  token (u64 LE) | length (u32 LE) | {"t": type, "r": [...]}
//! ```
//!
//! Terms are JSON arrays `[term_type, [args...], {optargs}]`. A literal JSON
//! array inside a term must be wrapped as `[MAKE_ARRAY, [...]]`.

use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufStream};
use tokio::net::TcpStream;

use crate::storage::error::{StorageError, StorageResult};

const V0_4: u32 = 0x400c_2d20;
const PROTOCOL_JSON: u32 = 0x7e69_70c7;

const QUERY_START: u8 = 1;
const QUERY_CONTINUE: u8 = 2;

const SUCCESS_ATOM: i64 = 1;
const SUCCESS_SEQUENCE: i64 = 2;
const SUCCESS_PARTIAL: i64 = 3;
const CLIENT_ERROR: i64 = 16;
const COMPILE_ERROR: i64 = 17;
const RUNTIME_ERROR: i64 = 18;

/// Term type numbers from the ReQL protocol definition
#[derive(Debug, Clone, Copy)]
#[repr(u16)]
enum TermType {
    MakeArray = 2,
    Var = 10,
    Db = 14,
    Table = 15,
    GetField = 31,
    Pluck = 33,
    Filter = 39,
    Insert = 56,
    DbCreate = 57,
    DbDrop = 58,
    DbList = 59,
    TableCreate = 60,
    TableList = 62,
    Func = 69,
    IndexCreate = 75,
    IndexList = 77,
    Contains = 93,
    IndexWait = 140,
    Between = 182,
}

/// A ReQL term, ready to be sent
#[derive(Debug, Clone, PartialEq)]
pub struct Term(Value);

impl Term {
    fn new(kind: TermType, args: Vec<Value>) -> Self {
        Term(json!([kind as u16, args]))
    }

    fn with_optargs(kind: TermType, args: Vec<Value>, optargs: Value) -> Self {
        Term(json!([kind as u16, args, optargs]))
    }

    /// `[MAKE_ARRAY, [...]]` for literal string lists
    pub fn array(items: &[String]) -> Value {
        json!([TermType::MakeArray as u16, items])
    }

    pub fn db(name: &str) -> Self {
        Self::new(TermType::Db, vec![json!(name)])
    }

    pub fn db_list() -> Self {
        Self::new(TermType::DbList, Vec::new())
    }

    pub fn db_create(name: &str) -> Self {
        Self::new(TermType::DbCreate, vec![json!(name)])
    }

    pub fn db_drop(name: &str) -> Self {
        Self::new(TermType::DbDrop, vec![json!(name)])
    }

    pub fn table(&self, name: &str) -> Self {
        Self::new(TermType::Table, vec![self.0.clone(), json!(name)])
    }

    pub fn table_list(&self) -> Self {
        Self::new(TermType::TableList, vec![self.0.clone()])
    }

    pub fn table_create(&self, name: &str) -> Self {
        Self::new(TermType::TableCreate, vec![self.0.clone(), json!(name)])
    }

    pub fn index_list(&self) -> Self {
        Self::new(TermType::IndexList, vec![self.0.clone()])
    }

    pub fn index_create(&self, name: &str) -> Self {
        Self::new(TermType::IndexCreate, vec![self.0.clone(), json!(name)])
    }

    pub fn index_wait(&self, name: &str) -> Self {
        Self::new(TermType::IndexWait, vec![self.0.clone(), json!(name)])
    }

    pub fn insert(&self, document: Value) -> Self {
        Self::new(TermType::Insert, vec![self.0.clone(), document])
    }

    /// Rows whose `index` value lies in `[lower, upper]`
    pub fn between(&self, lower: i64, upper: i64, index: &str) -> Self {
        Self::with_optargs(
            TermType::Between,
            vec![self.0.clone(), json!(lower), json!(upper)],
            json!({"index": index, "left_bound": "closed", "right_bound": "closed"}),
        )
    }

    /// `filter(row => row(field).contains(value))`
    pub fn filter_contains(&self, field: &str, value: &str) -> Self {
        let row = json!([TermType::Var as u16, [1]]);
        let body = json!([
            TermType::Contains as u16,
            [[TermType::GetField as u16, [row, field]], value]
        ]);
        let func = json!([TermType::Func as u16, [[TermType::MakeArray as u16, [1]], body]]);
        Self::new(TermType::Filter, vec![self.0.clone(), func])
    }

    pub fn pluck(&self, field: &str) -> Self {
        Self::new(TermType::Pluck, vec![self.0.clone(), json!(field)])
    }

    pub fn into_json(self) -> Value {
        self.0
    }
}

#[derive(Debug, Deserialize)]
struct Response {
    t: i64,
    #[serde(default)]
    r: Vec<Value>,
}

/// One authenticated connection; queries run one at a time
pub struct Connection {
    addr: String,
    stream: BufStream<TcpStream>,
    next_token: u64,
}

impl Connection {
    /// Connect and complete the V0_4 handshake
    pub async fn connect(addr: &str, auth_key: &str) -> StorageResult<Self> {
        let connection_error = |e: std::io::Error| StorageError::Connection(format!("{}: {}", addr, e));

        let stream = TcpStream::connect(addr).await.map_err(connection_error)?;
        stream.set_nodelay(true).map_err(connection_error)?;
        let mut stream = BufStream::new(stream);

        let mut hello = Vec::with_capacity(12 + auth_key.len());
        hello.extend_from_slice(&V0_4.to_le_bytes());
        hello.extend_from_slice(&(auth_key.len() as u32).to_le_bytes());
        hello.extend_from_slice(auth_key.as_bytes());
        hello.extend_from_slice(&PROTOCOL_JSON.to_le_bytes());
        stream.write_all(&hello).await.map_err(connection_error)?;
        stream.flush().await.map_err(connection_error)?;

        let mut reply = Vec::new();
        stream
            .read_until(0, &mut reply)
            .await
            .map_err(connection_error)?;
        if reply.last() == Some(&0) {
            reply.pop();
        }
        let reply = String::from_utf8_lossy(&reply);
        if reply != "SUCCESS" {
            return Err(StorageError::Connection(format!(
                "{}: handshake rejected: {}",
                addr, reply
            )));
        }

        tracing::debug!(addr = %addr, "ReQL handshake complete");

        Ok(Self {
            addr: addr.to_string(),
            stream,
            next_token: 1,
        })
    }

    /// Run a query to completion
    ///
    /// Atoms come back as-is, sequences (including streamed partial
    /// batches) as one JSON array.
    pub async fn run(&mut self, term: Term) -> StorageResult<Value> {
        let token = self.next_token;
        self.next_token += 1;

        self.send(token, &json!([QUERY_START, term.into_json(), {}]))
            .await?;

        let mut rows = Vec::new();
        loop {
            let response = self.receive(token).await?;
            match response.t {
                SUCCESS_ATOM => {
                    return Ok(response.r.into_iter().next().unwrap_or(Value::Null));
                }
                SUCCESS_SEQUENCE => {
                    rows.extend(response.r);
                    return Ok(Value::Array(rows));
                }
                SUCCESS_PARTIAL => {
                    rows.extend(response.r);
                    self.send(token, &json!([QUERY_CONTINUE])).await?;
                }
                CLIENT_ERROR | COMPILE_ERROR | RUNTIME_ERROR => {
                    let message = response
                        .r
                        .first()
                        .and_then(Value::as_str)
                        .unwrap_or("unknown error");
                    return Err(StorageError::Transaction(format!(
                        "ReQL error {}: {}",
                        response.t, message
                    )));
                }
                other => {
                    return Err(StorageError::Transaction(format!(
                        "unexpected ReQL response type {}",
                        other
                    )))
                }
            }
        }
    }

    pub async fn shutdown(mut self) {
        if let Err(e) = self.stream.shutdown().await {
            tracing::debug!(addr = %self.addr, "ReQL shutdown: {}", e);
        }
    }

    async fn send(&mut self, token: u64, query: &Value) -> StorageResult<()> {
        let body = serde_json::to_vec(query)?;

        let mut frame = Vec::with_capacity(12 + body.len());
        frame.extend_from_slice(&token.to_le_bytes());
        frame.extend_from_slice(&(body.len() as u32).to_le_bytes());
        frame.extend_from_slice(&body);

        self.stream.write_all(&frame).await?;
        self.stream.flush().await?;
        Ok(())
    }

    async fn receive(&mut self, token: u64) -> StorageResult<Response> {
        loop {
            let got = self.stream.read_u64_le().await?;
            let len = self.stream.read_u32_le().await? as usize;
            let mut body = vec![0; len];
            self.stream.read_exact(&mut body).await?;

            // Leftovers from a query whose caller went away
            if got < token {
                tracing::debug!(token = got, "Discarding stale ReQL response");
                continue;
            }
            if got != token {
                return Err(StorageError::Transaction(format!(
                    "ReQL response for token {} while waiting for {}",
                    got, token
                )));
            }

            return Ok(serde_json::from_slice(&body)?);
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::scripted_server;
    use super::*;

    #[test]
    fn test_term_encoding() {
        let table = Term::db("notes").table("annotations");
        assert_eq!(
            table.clone().into_json(),
            json!([15, [[14, ["notes"]], "annotations"]])
        );

        let filtered = table.between(10, 20, "created_at").filter_contains("tags", "deploy");
        assert_eq!(
            filtered.into_json(),
            json!([39, [
                [182, [[15, [[14, ["notes"]], "annotations"]], 10, 20],
                    {"index": "created_at", "left_bound": "closed", "right_bound": "closed"}],
                [69, [[2, [1]], [93, [[31, [[10, [1]], "tags"]], "deploy"]]]]
            ]])
        );

        assert_eq!(
            Term::array(&["a".to_string(), "b".to_string()]),
            json!([2, ["a", "b"]])
        );
    }

    #[tokio::test]
    async fn test_atom_query() {
        let (addr, server) =
            scripted_server(b"SUCCESS\0", vec![json!({"t": 1, "r": [["notes"]]})]).await;

        let mut conn = Connection::connect(&addr, "").await.unwrap();
        let dbs = conn.run(Term::db_list()).await.unwrap();
        assert_eq!(dbs, json!(["notes"]));
        conn.shutdown().await;

        let seen = server.await.unwrap();
        assert_eq!(seen, vec![json!([1, [59, []], {}])]);
    }

    #[tokio::test]
    async fn test_partial_sequence_is_continued() {
        let (addr, server) = scripted_server(
            b"SUCCESS\0",
            vec![
                json!({"t": 3, "r": [1, 2]}),
                json!({"t": 2, "r": [3]}),
            ],
        )
        .await;

        let mut conn = Connection::connect(&addr, "secret").await.unwrap();
        let rows = conn
            .run(Term::db("notes").table("annotations").pluck("tags"))
            .await
            .unwrap();
        assert_eq!(rows, json!([1, 2, 3]));

        let seen = server.await.unwrap();
        assert_eq!(seen[1], json!([2]));
    }

    #[tokio::test]
    async fn test_runtime_error() {
        let (addr, _server) = scripted_server(
            b"SUCCESS\0",
            vec![json!({"t": 18, "r": ["Table `notes.x` does not exist."]})],
        )
        .await;

        let mut conn = Connection::connect(&addr, "").await.unwrap();
        let err = conn
            .run(Term::db("notes").table("x").pluck("tags"))
            .await
            .unwrap_err();
        assert!(
            matches!(err, StorageError::Transaction(ref msg) if msg.contains("does not exist")),
            "{}",
            err
        );
    }

    #[tokio::test]
    async fn test_rejected_handshake() {
        let (addr, _server) = scripted_server(b"ERROR: Incorrect authorization key.\0", vec![]).await;

        let err = Connection::connect(&addr, "wrong").await.err().unwrap();
        assert!(matches!(err, StorageError::Connection(ref msg) if msg.contains("authorization")));
    }
}
