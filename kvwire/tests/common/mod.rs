//! Shared test harness
//!
//! [`MockServer`] is an in-process peer speaking the wire protocol through
//! the crate's own codec. Each test supplies a handler that maps a received
//! command to the frames written back. [`MemoryStore`] is a handler that
//! keeps just enough state to run the list, geo and function scenarios.

#![allow(dead_code)]

use bytes::{Bytes, BytesMut};
use futures_util::FutureExt;
use kvwire::{
    Address, Client, ConnectionConfig, Endpoint, FrameDecoder, FrameEncoder, KvResult,
    ReconnectConfig, WireValue,
};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// What the mock writes back for one command
pub enum Reply {
    /// Frames written back to back
    Frames(Vec<WireValue>),
    /// Frames written after a pause
    Delayed(Duration, Vec<WireValue>),
    /// Bytes written as they are
    Raw(Bytes),
    /// Nothing at all
    Silent,
    /// Drop the connection without answering
    Hangup,
}

impl Reply {
    pub fn one(value: impl Into<WireValue>) -> Self {
        Self::Frames(vec![value.into()])
    }

    pub fn ok() -> Self {
        Self::Frames(vec![WireValue::SimpleString("OK".to_string())])
    }

    pub fn error(message: &str) -> Self {
        Self::Frames(vec![WireValue::Error(message.to_string())])
    }
}

/// Per-connection state visible to handlers
#[derive(Debug)]
pub struct Peer {
    pub id: usize,
    pub resp3: bool,
}

pub type Handler = Arc<dyn Fn(&mut Peer, &[String]) -> Reply + Send + Sync>;

pub struct MockServer {
    endpoint: Endpoint,
    received: Arc<Mutex<Vec<Vec<String>>>>,
    connections: Arc<AtomicUsize>,
    task: Option<JoinHandle<()>>,
}

impl MockServer {
    pub async fn start<F>(handler: F) -> Self
    where
        F: Fn(&mut Peer, &[String]) -> Reply + Send + Sync + 'static,
    {
        let handler: Handler = Arc::new(handler);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let received = Arc::new(Mutex::new(Vec::new()));
        let connections = Arc::new(AtomicUsize::new(0));

        let task = tokio::spawn({
            let received = Arc::clone(&received);
            let connections = Arc::clone(&connections);
            async move {
                while let Ok((socket, _)) = listener.accept().await {
                    let id = connections.fetch_add(1, Ordering::SeqCst);
                    tokio::spawn(serve(
                        socket,
                        Peer { id, resp3: false },
                        Arc::clone(&handler),
                        Arc::clone(&received),
                    ));
                }
            }
        });

        Self {
            endpoint: Endpoint::new("127.0.0.1", port),
            received,
            connections,
            task: Some(task),
        }
    }

    pub fn endpoint(&self) -> Endpoint {
        self.endpoint.clone()
    }

    /// Configuration pointing at this server, with reconnection off
    pub fn config(&self) -> ConnectionConfig {
        ConnectionConfig::from_address(Address::Tcp(self.endpoint()))
            .with_reconnect(ReconnectConfig::disabled())
    }

    pub async fn client(&self) -> Client {
        Client::connect(self.config()).await.unwrap()
    }

    /// Every command received so far, across all connections
    pub fn received(&self) -> Vec<Vec<String>> {
        self.received.lock().unwrap().clone()
    }

    /// Received commands whose name is `name`
    pub fn received_named(&self, name: &str) -> Vec<Vec<String>> {
        self.received()
            .into_iter()
            .filter(|args| args.first().is_some_and(|n| n.eq_ignore_ascii_case(name)))
            .collect()
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Stop accepting connections; the port is free once this returns
    pub async fn shutdown(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            let _ = task.await;
        }
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        if let Some(task) = &self.task {
            task.abort();
        }
    }
}

async fn serve(
    mut socket: TcpStream,
    mut peer: Peer,
    handler: Handler,
    received: Arc<Mutex<Vec<Vec<String>>>>,
) {
    let mut decoder = FrameDecoder::new();
    loop {
        while let Ok(Some(frame)) = decoder.next_frame() {
            let Ok(parts) = frame.decode::<Vec<Bytes>>() else {
                return;
            };
            let args: Vec<String> = parts
                .iter()
                .map(|p| String::from_utf8_lossy(p).into_owned())
                .collect();
            received.lock().unwrap().push(args.clone());

            let mut out = BytesMut::new();
            match handler(&mut peer, &args) {
                Reply::Frames(frames) => {
                    for frame in &frames {
                        FrameEncoder::encode_value(frame, &mut out);
                    }
                }
                Reply::Delayed(pause, frames) => {
                    tokio::time::sleep(pause).await;
                    for frame in &frames {
                        FrameEncoder::encode_value(frame, &mut out);
                    }
                }
                Reply::Raw(bytes) => out.extend_from_slice(&bytes),
                Reply::Silent => {}
                Reply::Hangup => return,
            }
            if !out.is_empty() && socket.write_all(&out).await.is_err() {
                return;
            }
        }

        match socket.read_buf(decoder.buffer_mut()).await {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }
    }
}

/// Run `op`, then delete `keys` whether it succeeded, failed or panicked
pub async fn with_keys<F, Fut, T>(client: &Client, keys: &[&str], op: F) -> T
where
    F: FnOnce(Client) -> Fut,
    Fut: Future<Output = T>,
{
    let _ = client.del(keys.iter().copied()).await;
    let outcome = AssertUnwindSafe(op(client.clone())).catch_unwind().await;
    let _ = client.del(keys.iter().copied()).await;
    match outcome {
        Ok(value) => value,
        Err(panic) => std::panic::resume_unwind(panic),
    }
}

/// Connect to the server named by `REDIS_URL`
pub async fn live_client() -> KvResult<Client> {
    let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());
    Client::connect(ConnectionConfig::new(url)).await
}

pub fn bulk(s: &str) -> WireValue {
    WireValue::BulkString(Bytes::copy_from_slice(s.as_bytes()))
}

fn text(s: &str) -> WireValue {
    WireValue::SimpleString(s.to_string())
}

fn double(peer: &Peer, value: f64) -> WireValue {
    if peer.resp3 {
        WireValue::Double(value)
    } else {
        bulk(&format!("{value:.6}"))
    }
}

fn map(peer: &Peer, pairs: Vec<(WireValue, WireValue)>) -> WireValue {
    if peer.resp3 {
        WireValue::Map(pairs)
    } else {
        WireValue::Array(pairs.into_iter().flat_map(|(k, v)| [k, v]).collect())
    }
}

enum Entry {
    List(VecDeque<String>),
    Geo(Vec<(String, f64, f64)>),
}

struct Library {
    engine: String,
    code: String,
    functions: Vec<String>,
}

#[derive(Default)]
struct State {
    keys: HashMap<String, Entry>,
    libraries: BTreeMap<String, Library>,
}

const WRONGTYPE: &str = "WRONGTYPE Operation against a key holding the wrong kind of value";
const SYNTAX: &str = "ERR syntax error";

/// In-memory handler for the commands the scenarios use
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn serve(&self) -> MockServer {
        let store = self.clone();
        MockServer::start(move |peer, args| store.handle(peer, args)).await
    }

    pub fn handle(&self, peer: &mut Peer, args: &[String]) -> Reply {
        let Some(name) = args.first() else {
            return Reply::error("ERR empty command");
        };
        let mut state = self.state.lock().unwrap();
        let state = &mut *state;
        match name.to_ascii_uppercase().as_str() {
            "HELLO" => {
                peer.resp3 = args.get(1).map(String::as_str) == Some("3");
                Reply::one(map(
                    peer,
                    vec![
                        (text("server"), bulk("mock")),
                        (text("proto"), WireValue::Integer(if peer.resp3 { 3 } else { 2 })),
                    ],
                ))
            }
            "SELECT" | "CLIENT" => Reply::ok(),
            "PING" => Reply::one(text("PONG")),
            "DEL" => {
                let removed = args[1..]
                    .iter()
                    .filter(|k| state.keys.remove(*k).is_some())
                    .count();
                Reply::one(removed as i64)
            }
            "EXISTS" => {
                let found = args[1..]
                    .iter()
                    .filter(|k| state.keys.contains_key(*k))
                    .count();
                Reply::one(found as i64)
            }
            "LPUSH" | "RPUSH" => {
                let front = name.eq_ignore_ascii_case("LPUSH");
                match list_mut(state, &args[1], true) {
                    Ok(Some(list)) => {
                        for value in &args[2..] {
                            if front {
                                list.push_front(value.clone());
                            } else {
                                list.push_back(value.clone());
                            }
                        }
                        Reply::one(list.len() as i64)
                    }
                    Ok(None) => Reply::one(0_i64),
                    Err(reply) => reply,
                }
            }
            "LLEN" => match list_mut(state, &args[1], false) {
                Ok(list) => Reply::one(list.map_or(0, |l| l.len()) as i64),
                Err(reply) => reply,
            },
            "LRANGE" => {
                let (Ok(start), Ok(stop)) = (args[2].parse::<i64>(), args[3].parse::<i64>()) else {
                    return Reply::error("ERR value is not an integer or out of range");
                };
                match list_mut(state, &args[1], false) {
                    Ok(Some(list)) => {
                        let len = list.len() as i64;
                        let start = if start < 0 { (len + start).max(0) } else { start };
                        let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
                        let items = (start..=stop)
                            .filter_map(|i| list.get(i as usize))
                            .map(|s| bulk(s))
                            .collect::<Vec<_>>();
                        Reply::one(WireValue::Array(items))
                    }
                    Ok(None) => Reply::one(WireValue::Array(vec![])),
                    Err(reply) => reply,
                }
            }
            "LMPOP" => lmpop(state, args),
            "LMOVE" => lmove(state, args),
            "GEOADD" => geoadd(state, args),
            "GEOSEARCH" => geosearch(state, peer, args),
            "FUNCTION" => function(state, peer, args),
            _ => Reply::error(&format!("ERR unknown command '{name}'")),
        }
    }
}

fn list_mut<'a>(
    state: &'a mut State,
    key: &str,
    create: bool,
) -> Result<Option<&'a mut VecDeque<String>>, Reply> {
    if create && !state.keys.contains_key(key) {
        state.keys.insert(key.to_string(), Entry::List(VecDeque::new()));
    }
    match state.keys.get_mut(key) {
        Some(Entry::List(list)) => Ok(Some(list)),
        Some(_) => Err(Reply::error(WRONGTYPE)),
        None => Ok(None),
    }
}

fn drop_if_empty(state: &mut State, key: &str) {
    if matches!(state.keys.get(key), Some(Entry::List(l)) if l.is_empty()) {
        state.keys.remove(key);
    }
}

fn pop(list: &mut VecDeque<String>, side: &str) -> Option<String> {
    if side.eq_ignore_ascii_case("LEFT") {
        list.pop_front()
    } else {
        list.pop_back()
    }
}

fn lmpop(state: &mut State, args: &[String]) -> Reply {
    let Ok(numkeys) = args[1].parse::<usize>() else {
        return Reply::error(SYNTAX);
    };
    let keys = &args[2..2 + numkeys];
    let side = &args[2 + numkeys];
    let count = match args.get(3 + numkeys) {
        Some(flag) if flag.eq_ignore_ascii_case("COUNT") => {
            args.get(4 + numkeys).and_then(|c| c.parse().ok()).unwrap_or(1)
        }
        _ => 1,
    };

    for key in keys {
        let popped: Vec<WireValue> = match list_mut(state, key, false) {
            Ok(Some(list)) => (0..count)
                .map_while(|_| pop(list, side))
                .map(|s| bulk(&s))
                .collect(),
            Ok(None) => continue,
            Err(reply) => return reply,
        };
        if popped.is_empty() {
            continue;
        }
        drop_if_empty(state, key);
        return Reply::one(WireValue::Array(vec![bulk(key), WireValue::Array(popped)]));
    }
    Reply::one(WireValue::Null)
}

fn lmove(state: &mut State, args: &[String]) -> Reply {
    let (source, destination, from, to) = (&args[1], &args[2], &args[3], &args[4]);
    let element = match list_mut(state, source, false) {
        Ok(Some(list)) => pop(list, from),
        Ok(None) => None,
        Err(reply) => return reply,
    };
    let Some(element) = element else {
        return Reply::one(WireValue::Null);
    };
    drop_if_empty(state, source);
    match list_mut(state, destination, true) {
        Ok(Some(list)) => {
            if to.eq_ignore_ascii_case("LEFT") {
                list.push_front(element.clone());
            } else {
                list.push_back(element.clone());
            }
            Reply::one(bulk(&element))
        }
        Ok(None) => Reply::one(WireValue::Null),
        Err(reply) => reply,
    }
}

fn geoadd(state: &mut State, args: &[String]) -> Reply {
    let key = &args[1];
    let entry = state
        .keys
        .entry(key.clone())
        .or_insert_with(|| Entry::Geo(Vec::new()));
    let Entry::Geo(points) = entry else {
        return Reply::error(WRONGTYPE);
    };
    let mut added = 0_i64;
    for triple in args[2..].chunks(3) {
        let [lon, lat, member] = triple else {
            return Reply::error(SYNTAX);
        };
        let (Ok(lon), Ok(lat)) = (lon.parse::<f64>(), lat.parse::<f64>()) else {
            return Reply::error("ERR value is not a valid float");
        };
        match points.iter_mut().find(|(m, _, _)| m == member) {
            Some(point) => *point = (member.clone(), lon, lat),
            None => {
                points.push((member.clone(), lon, lat));
                added += 1;
            }
        }
    }
    Reply::one(added)
}

/// Great-circle distance in meters, on the same sphere the server uses
fn haversine(lon1: f64, lat1: f64, lon2: f64, lat2: f64) -> f64 {
    const EARTH_RADIUS_M: f64 = 6_372_797.560_856;
    let (lat1, lat2) = (lat1.to_radians(), lat2.to_radians());
    let dlat = lat2 - lat1;
    let dlon = (lon2 - lon1).to_radians();
    let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * a.sqrt().asin()
}

fn unit_factor(unit: &str) -> Option<f64> {
    match unit.to_ascii_lowercase().as_str() {
        "m" => Some(1.0),
        "km" => Some(1000.0),
        "mi" => Some(1609.34),
        "ft" => Some(0.3048),
        _ => None,
    }
}

/// Interleaved bits of the scaled coordinates, enough to be stable per point
fn geohash(lon: f64, lat: f64) -> i64 {
    let x = ((lon + 180.0) / 360.0 * f64::from(1_u32 << 26)) as u64;
    let y = ((lat + 90.0) / 180.0 * f64::from(1_u32 << 26)) as u64;
    let mut hash = 0_u64;
    for bit in (0..26).rev() {
        hash = (hash << 2) | (((x >> bit) & 1) << 1) | ((y >> bit) & 1);
    }
    hash as i64
}

fn geosearch(state: &mut State, peer: &Peer, args: &[String]) -> Reply {
    // key FROMLONLAT lon lat BYRADIUS radius unit [ASC|DESC] [COUNT n] [WITH...]
    if args.len() < 8
        || !args[2].eq_ignore_ascii_case("FROMLONLAT")
        || !args[5].eq_ignore_ascii_case("BYRADIUS")
    {
        return Reply::error(SYNTAX);
    }
    let (Ok(lon), Ok(lat), Ok(radius)) = (
        args[3].parse::<f64>(),
        args[4].parse::<f64>(),
        args[6].parse::<f64>(),
    ) else {
        return Reply::error("ERR value is not a valid float");
    };
    let Some(factor) = unit_factor(&args[7]) else {
        return Reply::error("ERR unsupported unit provided. please use M, KM, FT, MI");
    };

    let flags: Vec<String> = args[8..].iter().map(|a| a.to_ascii_uppercase()).collect();
    let has = |flag: &str| flags.iter().any(|f| f == flag);
    let count = flags
        .iter()
        .position(|f| f == "COUNT")
        .and_then(|i| flags.get(i + 1))
        .and_then(|c| c.parse::<usize>().ok());

    let points = match state.keys.get(&args[1]) {
        Some(Entry::Geo(points)) => points.as_slice(),
        Some(Entry::List(_)) => return Reply::error(WRONGTYPE),
        None => &[],
    };
    let mut matches: Vec<(&String, f64, f64, f64)> = points
        .iter()
        .map(|(m, plon, plat)| (m, haversine(lon, lat, *plon, *plat) / factor, *plon, *plat))
        .filter(|(_, dist, _, _)| *dist <= radius)
        .collect();
    if has("ASC") {
        matches.sort_by(|a, b| a.1.total_cmp(&b.1));
    } else if has("DESC") {
        matches.sort_by(|a, b| b.1.total_cmp(&a.1));
    }
    if let Some(count) = count {
        matches.truncate(count);
    }

    let attributes = has("WITHDIST") || has("WITHHASH") || has("WITHCOORD");
    let items = matches
        .into_iter()
        .map(|(member, dist, plon, plat)| {
            if !attributes {
                return bulk(member);
            }
            let mut item = vec![bulk(member)];
            if has("WITHDIST") {
                item.push(bulk(&format!("{dist:.4}")));
            }
            if has("WITHHASH") {
                item.push(WireValue::Integer(geohash(plon, plat)));
            }
            if has("WITHCOORD") {
                item.push(WireValue::Array(vec![double(peer, plon), double(peer, plat)]));
            }
            WireValue::Array(item)
        })
        .collect();
    Reply::one(WireValue::Array(items))
}

/// Minimal glob supporting `*` and `?`
fn glob_match(pattern: &[u8], name: &[u8]) -> bool {
    match (pattern.first(), name.first()) {
        (None, None) => true,
        (Some(b'*'), _) => {
            glob_match(&pattern[1..], name) || (!name.is_empty() && glob_match(pattern, &name[1..]))
        }
        (Some(b'?'), Some(_)) => glob_match(&pattern[1..], &name[1..]),
        (Some(p), Some(n)) if p == n => glob_match(&pattern[1..], &name[1..]),
        _ => false,
    }
}

/// `#!<engine> name=<library>` header plus every `register_function('<name>'`
fn parse_library(code: &str) -> Result<(String, Library), Reply> {
    let header = code.lines().next().unwrap_or_default();
    let Some(rest) = header.strip_prefix("#!") else {
        return Err(Reply::error("ERR Missing library metadata"));
    };
    let mut parts = rest.split_whitespace();
    let engine = parts.next().unwrap_or_default().to_ascii_uppercase();
    let Some(name) = parts.find_map(|p| p.strip_prefix("name=")) else {
        return Err(Reply::error("ERR Library name was not given"));
    };

    let functions = code
        .split("register_function(")
        .skip(1)
        .filter_map(|tail| {
            let quote = |c: char| c == '\'' || c == '"';
            let tail = tail.trim_start().strip_prefix(quote)?;
            let end = tail.find(quote)?;
            Some(tail[..end].to_string())
        })
        .collect::<Vec<_>>();
    if functions.is_empty() {
        return Err(Reply::error("ERR No functions registered"));
    }

    Ok((
        name.to_string(),
        Library {
            engine,
            code: code.to_string(),
            functions,
        },
    ))
}

fn function(state: &mut State, peer: &Peer, args: &[String]) -> Reply {
    let Some(sub) = args.get(1) else {
        return Reply::error(SYNTAX);
    };
    match sub.to_ascii_uppercase().as_str() {
        "LOAD" => {
            let replace = args.get(2).is_some_and(|a| a.eq_ignore_ascii_case("REPLACE"));
            let Some(code) = args.last() else {
                return Reply::error(SYNTAX);
            };
            let (name, library) = match parse_library(code) {
                Ok(parsed) => parsed,
                Err(reply) => return reply,
            };
            if !replace && state.libraries.contains_key(&name) {
                return Reply::error(&format!("ERR Library '{name}' already exists"));
            }
            state.libraries.insert(name.clone(), library);
            Reply::one(bulk(&name))
        }
        "LIST" => {
            let flags: Vec<String> = args[2..].iter().map(|a| a.to_ascii_uppercase()).collect();
            let pattern = flags
                .iter()
                .position(|f| f == "LIBRARYNAME")
                .and_then(|i| args.get(i + 3))
                .map(String::as_str)
                .unwrap_or("*");
            let with_code = flags.iter().any(|f| f == "WITHCODE");

            let libraries = state
                .libraries
                .iter()
                .filter(|(name, _)| glob_match(pattern.as_bytes(), name.as_bytes()))
                .map(|(name, library)| {
                    let functions = library
                        .functions
                        .iter()
                        .map(|f| {
                            map(
                                peer,
                                vec![
                                    (text("name"), bulk(f)),
                                    (text("description"), WireValue::Null),
                                    (text("flags"), WireValue::Array(vec![])),
                                ],
                            )
                        })
                        .collect();
                    let mut pairs = vec![
                        (text("library_name"), bulk(name)),
                        (text("engine"), bulk(&library.engine)),
                        (text("functions"), WireValue::Array(functions)),
                    ];
                    if with_code {
                        pairs.push((text("library_code"), bulk(&library.code)));
                    }
                    map(peer, pairs)
                })
                .collect();
            Reply::one(WireValue::Array(libraries))
        }
        "DELETE" => match args.get(2).and_then(|name| state.libraries.remove(name)) {
            Some(_) => Reply::ok(),
            None => Reply::error("ERR Library not found"),
        },
        "FLUSH" => {
            state.libraries.clear();
            Reply::ok()
        }
        _ => Reply::error(SYNTAX),
    }
}
