// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Connection URI surface: `tcp://`, `ssl://` and `failover:` schemes,
//! query options, and `${NAME}` environment substitution in query
//! values.
//!
//! Failover URIs accept both the parenthesized form
//! `failover:(tcp://a:61616,tcp://b:61616)?initialReconnectDelay=10`
//! and the bare list `failover:tcp://a:61616,tcp://b:61616`. Group
//! options (after the parentheses) configure the supervisor; options on
//! the component URIs configure each socket.

use std::time::Duration;

use openwire::wireformat::WireFormatOptions;

use crate::error::{Error, Result};
use crate::policy::{PrefetchPolicy, RedeliveryPolicy};

pub const DEFAULT_PORT: u16 = 61616;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Tcp,
    Ssl,
}

/// One broker endpoint with its socket-level options.
#[derive(Debug, Clone, PartialEq)]
pub struct BrokerUri {
    pub scheme: Scheme,
    pub host: String,
    pub port: u16,
    pub options: Vec<(String, String)>,
}

impl BrokerUri {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl std::fmt::Display for BrokerUri {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let scheme = match self.scheme {
            Scheme::Tcp => "tcp",
            Scheme::Ssl => "ssl",
        };
        write!(f, "{scheme}://{}:{}", self.host, self.port)
    }
}

/// A parsed connection URI: one broker, or a failover group.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionUri {
    Direct(BrokerUri),
    Failover { uris: Vec<BrokerUri>, options: Vec<(String, String)> },
}

impl ConnectionUri {
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        if let Some(rest) = input.strip_prefix("failover:") {
            return Self::parse_failover(rest);
        }
        Ok(Self::Direct(parse_broker_uri(input)?))
    }

    fn parse_failover(rest: &str) -> Result<Self> {
        let (list, group_query) = if let Some(inner) = rest.strip_prefix('(') {
            let close = inner.rfind(')').ok_or_else(|| {
                Error::illegal_state(format!("unbalanced parentheses in failover uri {rest:?}"))
            })?;
            let list = &inner[..close];
            let tail = &inner[close + 1..];
            let query = match tail.strip_prefix('?') {
                Some(q) => q,
                None if tail.is_empty() => "",
                None => {
                    return Err(Error::illegal_state(format!(
                        "unexpected trailing {tail:?} in failover uri"
                    )))
                }
            };
            (list, query)
        } else {
            (rest, "")
        };

        let mut uris = Vec::new();
        for component in split_uri_list(list) {
            uris.push(parse_broker_uri(component.trim())?);
        }
        if uris.is_empty() {
            return Err(Error::illegal_state("failover uri with no broker uris"));
        }
        Ok(Self::Failover { uris, options: parse_query(group_query)? })
    }

    /// All query pairs, group options first for failover URIs.
    pub fn all_options(&self) -> Vec<(String, String)> {
        match self {
            Self::Direct(uri) => uri.options.clone(),
            Self::Failover { uris, options } => {
                let mut merged = options.clone();
                for uri in uris {
                    merged.extend(uri.options.iter().cloned());
                }
                merged
            }
        }
    }
}

/// Split a comma-separated URI list; commas inside `(...)` are not
/// separators.
fn split_uri_list(list: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    for (index, ch) in list.char_indices() {
        match ch {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.push(&list[start..index]);
                start = index + 1;
            }
            _ => {}
        }
    }
    parts.push(&list[start..]);
    parts.into_iter().filter(|p| !p.trim().is_empty()).collect()
}

fn parse_broker_uri(input: &str) -> Result<BrokerUri> {
    let (scheme, rest) = match input.split_once("://") {
        Some(("tcp", rest)) => (Scheme::Tcp, rest),
        Some(("ssl", rest)) => (Scheme::Ssl, rest),
        Some((other, _)) => {
            return Err(Error::unsupported(format!("unsupported uri scheme {other:?}")))
        }
        None => return Err(Error::illegal_state(format!("not a broker uri: {input:?}"))),
    };

    let (authority, query) = match rest.split_once('?') {
        Some((a, q)) => (a, q),
        None => (rest, ""),
    };

    let (host, port) = match authority.rsplit_once(':') {
        Some((host, port)) => {
            let port = port
                .parse::<u16>()
                .map_err(|_| Error::illegal_state(format!("invalid port in {input:?}")))?;
            (host, port)
        }
        None => (authority, DEFAULT_PORT),
    };
    if host.is_empty() {
        return Err(Error::illegal_state(format!("empty host in {input:?}")));
    }

    Ok(BrokerUri {
        scheme,
        host: host.to_owned(),
        port,
        options: parse_query(query)?,
    })
}

/// Parse `k=v&k2=v2`, applying `${NAME}` environment substitution to
/// values.
fn parse_query(query: &str) -> Result<Vec<(String, String)>> {
    let mut pairs = Vec::new();
    for piece in query.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = piece
            .split_once('=')
            .ok_or_else(|| Error::illegal_state(format!("malformed query option {piece:?}")))?;
        pairs.push((key.to_owned(), substitute_env(value)?));
    }
    Ok(pairs)
}

/// Replace each `${NAME}` with the value of the environment variable.
fn substitute_env(value: &str) -> Result<String> {
    if !value.contains("${") {
        return Ok(value.to_owned());
    }
    let mut result = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(start) = rest.find("${") {
        result.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after
            .find('}')
            .ok_or_else(|| Error::illegal_state(format!("unterminated ${{}} in {value:?}")))?;
        let name = &after[..end];
        let substituted = std::env::var(name).map_err(|_| {
            Error::illegal_state(format!("environment variable {name:?} is not set"))
        })?;
        result.push_str(&substituted);
        rest = &after[end + 1..];
    }
    result.push_str(rest);
    Ok(result)
}

/// Socket-level options (`transport.*`, `socket.*`).
#[derive(Debug, Clone, PartialEq)]
pub struct TransportOptions {
    pub so_linger: Option<i32>,
    pub tcp_no_delay: bool,
    pub so_keep_alive: bool,
    pub connect_timeout: Duration,
    pub so_receive_buffer_size: Option<usize>,
    pub so_send_buffer_size: Option<usize>,
    pub verify_host_name: bool,
    pub disable_peer_verification: bool,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            so_linger: None,
            tcp_no_delay: true,
            so_keep_alive: false,
            connect_timeout: Duration::from_secs(15),
            so_receive_buffer_size: None,
            so_send_buffer_size: None,
            verify_host_name: true,
            disable_peer_verification: false,
        }
    }
}

/// `connection.*` options.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionOptions {
    pub use_async_send: bool,
    pub always_sync_send: bool,
    pub dispatch_async: bool,
    pub use_compression: bool,
    pub compression_level: u32,
    pub close_timeout: Duration,
    pub connect_response_timeout: Duration,
    pub producer_window_size: i32,
    pub optimize_acknowledge: bool,
    pub optimize_acknowledge_timeout: Duration,
    pub optimized_ack_scheduled_interval: Duration,
    pub watch_topic_advisories: bool,
    pub message_priority_supported: bool,
    pub check_for_duplicates: bool,
    pub client_id: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            use_async_send: false,
            always_sync_send: false,
            dispatch_async: true,
            use_compression: false,
            compression_level: 6,
            close_timeout: Duration::from_secs(15),
            connect_response_timeout: Duration::from_secs(10),
            producer_window_size: 0,
            optimize_acknowledge: false,
            optimize_acknowledge_timeout: Duration::from_millis(300),
            optimized_ack_scheduled_interval: Duration::ZERO,
            watch_topic_advisories: true,
            message_priority_supported: false,
            check_for_duplicates: true,
            client_id: None,
            username: None,
            password: None,
        }
    }
}

/// Failover supervisor options (spec'd group parameters).
#[derive(Debug, Clone, PartialEq)]
pub struct FailoverOptions {
    /// -1 = unlimited.
    pub max_reconnect_attempts: i32,
    pub startup_max_reconnect_attempts: i32,
    pub initial_reconnect_delay: Duration,
    pub max_reconnect_delay: Duration,
    pub use_exponential_back_off: bool,
    pub back_off_multiplier: f64,
    pub randomize: bool,
    pub track_messages: bool,
    /// Upper bound on buffered commands while disconnected.
    pub max_cache_size: usize,
}

impl Default for FailoverOptions {
    fn default() -> Self {
        Self {
            max_reconnect_attempts: -1,
            startup_max_reconnect_attempts: -1,
            initial_reconnect_delay: Duration::from_millis(10),
            max_reconnect_delay: Duration::from_millis(30_000),
            use_exponential_back_off: true,
            back_off_multiplier: 2.0,
            randomize: true,
            track_messages: true,
            max_cache_size: 4096,
        }
    }
}

/// Everything a connection needs, assembled from URI query options.
#[derive(Debug, Clone, Default)]
pub struct ConnectionConfig {
    pub transport: TransportOptions,
    pub wireformat: WireFormatOptions,
    pub connection: ConnectionOptions,
    pub prefetch: PrefetchPolicy,
    pub redelivery: RedeliveryPolicy,
    pub failover: FailoverOptions,
}

impl ConnectionConfig {
    pub fn from_uri(uri: &ConnectionUri) -> Result<Self> {
        let mut config = Self::default();
        config.apply(&uri.all_options())?;
        Ok(config)
    }

    pub fn apply(&mut self, pairs: &[(String, String)]) -> Result<()> {
        for (key, value) in pairs {
            self.apply_one(key, value)?;
        }
        Ok(())
    }

    fn apply_one(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            // transport.* / socket.*
            "transport.soLinger" => self.transport.so_linger = Some(parse_i32(key, value)?),
            "transport.tcpNoDelay" => self.transport.tcp_no_delay = parse_bool(key, value)?,
            "transport.soKeepAlive" => self.transport.so_keep_alive = parse_bool(key, value)?,
            "transport.connectTimeout" => {
                self.transport.connect_timeout = parse_millis(key, value)?
            }
            "transport.soReceiveBufferSize" => {
                self.transport.so_receive_buffer_size = Some(parse_usize(key, value)?)
            }
            "transport.soSendBufferSize" => {
                self.transport.so_send_buffer_size = Some(parse_usize(key, value)?)
            }
            "transport.verifyHostName" => {
                self.transport.verify_host_name = parse_bool(key, value)?
            }
            "socket.disablePeerVerification" => {
                self.transport.disable_peer_verification = parse_bool(key, value)?
            }

            // wireFormat.*
            "wireFormat.cacheEnabled" => self.wireformat.cache_enabled = parse_bool(key, value)?,
            "wireFormat.cacheSize" => self.wireformat.cache_size = parse_u32(key, value)?,
            "wireFormat.tightEncodingEnabled" => {
                self.wireformat.tight_encoding_enabled = parse_bool(key, value)?
            }
            "wireFormat.sizePrefixDisabled" => {
                self.wireformat.size_prefix_disabled = parse_bool(key, value)?
            }
            "wireFormat.maxInactivityDuration" => {
                self.wireformat.max_inactivity_duration = parse_i64(key, value)?
            }
            "wireFormat.maxInactivityDurationInitialDelay" => {
                self.wireformat.max_inactivity_duration_initial_delay = parse_i64(key, value)?
            }

            // connection.*
            "connection.useAsyncSend" => self.connection.use_async_send = parse_bool(key, value)?,
            "connection.alwaysSyncSend" => {
                self.connection.always_sync_send = parse_bool(key, value)?
            }
            "connection.dispatchAsync" => self.connection.dispatch_async = parse_bool(key, value)?,
            "connection.useCompression" => {
                self.connection.use_compression = parse_bool(key, value)?
            }
            "connection.compressionLevel" => {
                self.connection.compression_level = parse_u32(key, value)?.min(9)
            }
            "connection.closeTimeout" => self.connection.close_timeout = parse_millis(key, value)?,
            "connection.connectResponseTimeout" => {
                self.connection.connect_response_timeout = parse_millis(key, value)?
            }
            "connection.producerWindowSize" => {
                self.connection.producer_window_size = parse_i32(key, value)?
            }
            "connection.optimizeAcknowledge" => {
                self.connection.optimize_acknowledge = parse_bool(key, value)?
            }
            "connection.optimizeAcknowledgeTimeOut" => {
                self.connection.optimize_acknowledge_timeout = parse_millis(key, value)?
            }
            "connection.optimizedAckScheduledAckInterval" => {
                self.connection.optimized_ack_scheduled_interval = parse_millis(key, value)?
            }
            "connection.watchTopicAdvisories" => {
                self.connection.watch_topic_advisories = parse_bool(key, value)?
            }
            "connection.messagePrioritySupported" => {
                self.connection.message_priority_supported = parse_bool(key, value)?
            }
            "connection.checkForDuplicates" => {
                self.connection.check_for_duplicates = parse_bool(key, value)?
            }
            "connection.clientId" => self.connection.client_id = Some(value.to_owned()),
            "connection.username" => self.connection.username = Some(value.to_owned()),
            "connection.password" => self.connection.password = Some(value.to_owned()),

            // cms.prefetchPolicy.*
            "cms.prefetchPolicy.all" => self.prefetch.set_all(parse_i32(key, value)?),
            "cms.prefetchPolicy.queue" => self.prefetch.queue = parse_i32(key, value)?,
            "cms.prefetchPolicy.topic" => self.prefetch.topic = parse_i32(key, value)?,
            "cms.prefetchPolicy.durableTopic" => {
                self.prefetch.durable_topic = parse_i32(key, value)?
            }
            "cms.prefetchPolicy.queueBrowser" => {
                self.prefetch.queue_browser = parse_i32(key, value)?
            }
            "cms.prefetchPolicy.optimizeDurableTopic" => {
                self.prefetch.optimize_durable_topic = parse_i32(key, value)?
            }

            // cms.redeliveryPolicy.*
            "cms.redeliveryPolicy.maximumRedeliveries" => {
                self.redelivery.maximum_redeliveries = parse_i32(key, value)?
            }
            "cms.redeliveryPolicy.initialRedeliveryDelay" => {
                self.redelivery.initial_redelivery_delay = parse_millis(key, value)?
            }
            "cms.redeliveryPolicy.useExponentialBackOff" => {
                self.redelivery.use_exponential_back_off = parse_bool(key, value)?
            }
            "cms.redeliveryPolicy.backOffMultiplier" => {
                self.redelivery.back_off_multiplier = parse_f64(key, value)?
            }

            // failover group parameters (unprefixed, on the group query)
            "maxReconnectAttempts" => {
                self.failover.max_reconnect_attempts = parse_i32(key, value)?
            }
            "startupMaxReconnectAttempts" => {
                self.failover.startup_max_reconnect_attempts = parse_i32(key, value)?
            }
            "initialReconnectDelay" => {
                self.failover.initial_reconnect_delay = parse_millis(key, value)?
            }
            "maxReconnectDelay" => self.failover.max_reconnect_delay = parse_millis(key, value)?,
            "useExponentialBackOff" => {
                self.failover.use_exponential_back_off = parse_bool(key, value)?
            }
            "backOffMultiplier" => self.failover.back_off_multiplier = parse_f64(key, value)?,
            "randomize" => self.failover.randomize = parse_bool(key, value)?,
            "trackMessages" => self.failover.track_messages = parse_bool(key, value)?,
            "maxCacheSize" => self.failover.max_cache_size = parse_usize(key, value)?,

            other => {
                tracing::warn!(option = other, "ignoring unknown uri option");
            }
        }
        Ok(())
    }
}

/// Per-destination consumer options parsed from a destination string
/// (`Q?consumer.exclusive=true`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DestinationOptions {
    pub exclusive: bool,
    pub retroactive: bool,
    pub priority: u8,
    pub no_local: bool,
    pub selector: Option<String>,
}

impl DestinationOptions {
    /// Split a destination string into the bare name and its options.
    pub fn split(input: &str) -> Result<(String, Self)> {
        let (name, query) = match input.split_once('?') {
            Some((n, q)) => (n, q),
            None => (input, ""),
        };
        let mut options = Self::default();
        for (key, value) in parse_query(query)? {
            match key.as_str() {
                "consumer.exclusive" => options.exclusive = parse_bool(&key, &value)?,
                "consumer.retroactive" => options.retroactive = parse_bool(&key, &value)?,
                "consumer.priority" => options.priority = parse_u32(&key, &value)? as u8,
                "consumer.noLocal" => options.no_local = parse_bool(&key, &value)?,
                "consumer.selector" => options.selector = Some(value),
                other => {
                    tracing::warn!(option = other, "ignoring unknown destination option");
                }
            }
        }
        Ok((name.to_owned(), options))
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    value
        .parse::<bool>()
        .map_err(|_| Error::illegal_state(format!("option {key}: {value:?} is not a bool")))
}

fn parse_i32(key: &str, value: &str) -> Result<i32> {
    value
        .parse::<i32>()
        .map_err(|_| Error::illegal_state(format!("option {key}: {value:?} is not an integer")))
}

fn parse_u32(key: &str, value: &str) -> Result<u32> {
    value
        .parse::<u32>()
        .map_err(|_| Error::illegal_state(format!("option {key}: {value:?} is not an integer")))
}

fn parse_i64(key: &str, value: &str) -> Result<i64> {
    value
        .parse::<i64>()
        .map_err(|_| Error::illegal_state(format!("option {key}: {value:?} is not an integer")))
}

fn parse_usize(key: &str, value: &str) -> Result<usize> {
    value
        .parse::<usize>()
        .map_err(|_| Error::illegal_state(format!("option {key}: {value:?} is not an integer")))
}

fn parse_f64(key: &str, value: &str) -> Result<f64> {
    value
        .parse::<f64>()
        .map_err(|_| Error::illegal_state(format!("option {key}: {value:?} is not a number")))
}

fn parse_millis(key: &str, value: &str) -> Result<Duration> {
    Ok(Duration::from_millis(parse_i64(key, value)?.max(0) as u64))
}

#[cfg(test)]
#[path = "uri_tests.rs"]
mod tests;
