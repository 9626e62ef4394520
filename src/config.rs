//! Engine configuration and runtime tunables.
//!
//! [`EngineConfig`] is fixed when the engine is built. [`Tunables`] lives in
//! the engine behind a lock: connections copy it out (it is `Copy`) whenever
//! they need a decision, and only the built-in `tune` method changes it.
//!
//! ```
//! use xic::config::EngineConfig;
//!
//! let config = EngineConfig::from_json(r#"{
//!     "server_pool_size": 64,
//!     "tunables": { "timeout": { "message": 5000 } }
//! }"#).unwrap();
//! assert_eq!(config.server_pool_size, 64);
//! assert_eq!(config.tunables.timeout.message, 5000);
//! assert_eq!(config.tunables.timeout.connect, 60_000);
//! ```

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::codec::{Map, Value};
use crate::error::{Result, XicError};
use crate::protocol::DEFAULT_MESSAGE_SIZE;
use crate::transport::EndpointTimeouts;

/// Default connect timeout in milliseconds.
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 60_000;

/// Close timeout used when nothing else is configured, in milliseconds.
pub const DEFAULT_CLOSE_TIMEOUT_MS: u64 = 900_000;

/// Default size of each task pool.
pub const DEFAULT_POOL_SIZE: usize = 10_000;

/// Diagnostic log switches, one per record tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DlogFlags {
    /// Server side quest.
    pub sq: bool,
    /// Server side answer.
    pub sa: bool,
    /// Server side failure answer.
    pub sae: bool,
    /// Client side quest.
    pub cq: bool,
    /// Client side answer.
    pub ca: bool,
    /// Client side failure answer.
    pub cae: bool,
    pub warning: bool,
    pub debug: bool,
}

impl Default for DlogFlags {
    fn default() -> Self {
        Self {
            sq: false,
            sa: false,
            sae: false,
            cq: false,
            ca: false,
            cae: false,
            warning: true,
            debug: false,
        }
    }
}

/// Process-wide timeouts in milliseconds. 0 means unset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutSettings {
    pub connect: u64,
    pub close: u64,
    pub message: u64,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            connect: DEFAULT_CONNECT_TIMEOUT_MS,
            close: DEFAULT_CLOSE_TIMEOUT_MS,
            message: 0,
        }
    }
}

/// Idle connection reaping, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcmSettings {
    pub server: u64,
    pub client: u64,
}

impl Default for AcmSettings {
    fn default() -> Self {
        Self {
            server: 0,
            client: 300,
        }
    }
}

/// Slow-call log thresholds in milliseconds, -1 disables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlowSettings {
    pub server: i64,
    pub client: i64,
}

impl Default for SlowSettings {
    fn default() -> Self {
        Self {
            server: -1,
            client: -1,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SampleSettings {
    pub server: i64,
    pub client: i64,
}

/// Log handler failures (server) or failure answers (client).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExceptSettings {
    pub server: bool,
    pub client: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RlimitSettings {
    pub nofile: i64,
}

/// Runtime-adjustable engine settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Tunables {
    pub dlog: DlogFlags,
    pub timeout: TimeoutSettings,
    pub acm: AcmSettings,
    pub slow: SlowSettings,
    pub sample: SampleSettings,
    pub except: ExceptSettings,
    pub rlimit: RlimitSettings,
    /// Largest accepted message body in bytes.
    pub message_size: usize,
}

impl Default for Tunables {
    fn default() -> Self {
        Self {
            dlog: DlogFlags::default(),
            timeout: TimeoutSettings::default(),
            acm: AcmSettings::default(),
            slow: SlowSettings::default(),
            sample: SampleSettings::default(),
            except: ExceptSettings::default(),
            rlimit: RlimitSettings::default(),
            message_size: DEFAULT_MESSAGE_SIZE,
        }
    }
}

/// Section names accepted by [`Tunables::tune`], in reporting order.
pub const TUNABLE_SECTIONS: [&str; 7] =
    ["dlog", "timeout", "acm", "slow", "sample", "except", "rlimit"];

impl Tunables {
    /// One section rendered as a map, `None` for an unknown name.
    pub fn section(&self, name: &str) -> Option<Map> {
        let d = &self.dlog;
        let map = match name {
            "dlog" => Map::from([
                ("sq", d.sq),
                ("sa", d.sa),
                ("sae", d.sae),
                ("cq", d.cq),
                ("ca", d.ca),
                ("cae", d.cae),
                ("warning", d.warning),
                ("debug", d.debug),
            ]),
            "timeout" => Map::from([
                ("connect", self.timeout.connect),
                ("close", self.timeout.close),
                ("message", self.timeout.message),
            ]),
            "acm" => Map::from([("server", self.acm.server), ("client", self.acm.client)]),
            "slow" => Map::from([("server", self.slow.server), ("client", self.slow.client)]),
            "sample" => Map::from([
                ("server", self.sample.server),
                ("client", self.sample.client),
            ]),
            "except" => Map::from([
                ("server", self.except.server),
                ("client", self.except.client),
            ]),
            "rlimit" => Map::from([("nofile", self.rlimit.nofile)]),
            _ => return None,
        };
        Some(map)
    }

    /// Apply the sub-keys present in `args` and return the changed sections.
    ///
    /// Unknown sections and sub-keys are ignored. Nothing is applied when
    /// any present value has the wrong type.
    pub fn tune(&mut self, args: &Map) -> Result<Map> {
        let mut next = *self;
        let mut touched = Vec::new();

        for name in TUNABLE_SECTIONS {
            let Some(section) = args.get(name) else {
                continue;
            };
            let section = section.as_map().ok_or_else(|| XicError::ParameterType {
                name: name.to_string(),
                expected: "dict",
            })?;
            next.apply_section(name, section)?;
            touched.push(name);
        }

        *self = next;
        let mut out = Map::new();
        for name in touched {
            if let Some(map) = self.section(name) {
                out.insert(name, map);
            }
        }
        Ok(out)
    }

    fn apply_section(&mut self, name: &str, section: &Map) -> Result<()> {
        match name {
            "dlog" => {
                let d = &mut self.dlog;
                set_bool(section, "sq", &mut d.sq)?;
                set_bool(section, "sa", &mut d.sa)?;
                set_bool(section, "sae", &mut d.sae)?;
                set_bool(section, "cq", &mut d.cq)?;
                set_bool(section, "ca", &mut d.ca)?;
                set_bool(section, "cae", &mut d.cae)?;
                set_bool(section, "warning", &mut d.warning)?;
                set_bool(section, "debug", &mut d.debug)?;
            }
            "timeout" => {
                set_u64(section, "connect", &mut self.timeout.connect)?;
                set_u64(section, "close", &mut self.timeout.close)?;
                set_u64(section, "message", &mut self.timeout.message)?;
            }
            "acm" => {
                set_u64(section, "server", &mut self.acm.server)?;
                set_u64(section, "client", &mut self.acm.client)?;
            }
            "slow" => {
                set_i64(section, "server", &mut self.slow.server)?;
                set_i64(section, "client", &mut self.slow.client)?;
            }
            "sample" => {
                set_i64(section, "server", &mut self.sample.server)?;
                set_i64(section, "client", &mut self.sample.client)?;
                self.sample.server = self.sample.server.max(0);
                self.sample.client = self.sample.client.max(0);
            }
            "except" => {
                set_bool(section, "server", &mut self.except.server)?;
                set_bool(section, "client", &mut self.except.client)?;
            }
            "rlimit" => set_i64(section, "nofile", &mut self.rlimit.nofile)?,
            _ => {}
        }
        Ok(())
    }
}

fn set_bool(section: &Map, key: &str, slot: &mut bool) -> Result<()> {
    match section.get(key) {
        None => Ok(()),
        Some(Value::Bool(b)) => {
            *slot = *b;
            Ok(())
        }
        Some(v) => match v.as_i64() {
            Some(n) => {
                *slot = n != 0;
                Ok(())
            }
            None => Err(XicError::ParameterType {
                name: key.to_string(),
                expected: "bool",
            }),
        },
    }
}

fn set_i64(section: &Map, key: &str, slot: &mut i64) -> Result<()> {
    if section.contains_key(key) {
        *slot = section.want_int(key)?;
    }
    Ok(())
}

fn set_u64(section: &Map, key: &str, slot: &mut u64) -> Result<()> {
    if section.contains_key(key) {
        let n = section.want_int(key)?;
        *slot = u64::try_from(n).map_err(|_| XicError::ParameterData(key.to_string()))?;
    }
    Ok(())
}

/// Timeouts in effect for one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionTimeouts {
    /// Bound on waiting for a message while answers are pending.
    pub message: Option<Duration>,
    /// Graceful close drain limit.
    pub close: Duration,
    /// Connect plus hello limit.
    pub connect: Duration,
}

impl ConnectionTimeouts {
    /// Resolve endpoint overrides against the process-wide settings.
    ///
    /// Close and connect each fall back through their own setting, then the
    /// message timeout, then a constant.
    pub fn resolve(endpoint: &EndpointTimeouts, global: &TimeoutSettings) -> Self {
        let pick = |v: u64| (v > 0).then_some(v);
        let message = pick(endpoint.message).or(pick(global.message));
        let close = pick(endpoint.close)
            .or(pick(global.close))
            .or(message)
            .unwrap_or(DEFAULT_CLOSE_TIMEOUT_MS);
        let connect = pick(endpoint.connect)
            .or(pick(global.connect))
            .or(message)
            .unwrap_or(DEFAULT_CONNECT_TIMEOUT_MS);

        Self {
            message: message.map(Duration::from_millis),
            close: Duration::from_millis(close),
            connect: Duration::from_millis(connect),
        }
    }
}

/// Settings fixed when the engine is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Identity used in diagnostic log records.
    pub identity: String,
    /// Task pool for inbound connection work.
    pub server_pool_size: usize,
    /// Task pool for outbound connection work.
    pub client_pool_size: usize,
    /// Endpoints per adapter name, used when an adapter is created without any.
    pub adapter_endpoints: HashMap<String, String>,
    pub tunables: Tunables,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            identity: String::new(),
            server_pool_size: DEFAULT_POOL_SIZE,
            client_pool_size: DEFAULT_POOL_SIZE,
            adapter_endpoints: HashMap::new(),
            tunables: Tunables::default(),
        }
    }
}

impl EngineConfig {
    /// Parse a JSON document. Absent fields keep their defaults.
    pub fn from_json(s: &str) -> std::result::Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let t = Tunables::default();
        assert!(t.dlog.warning);
        assert!(!t.dlog.sq);
        assert_eq!(t.acm.client, 300);
        assert_eq!(t.slow.server, -1);
        assert_eq!(t.message_size, 16 * 1024 * 1024);
    }

    #[test]
    fn test_tune_applies_only_present_keys() {
        let mut t = Tunables::default();
        let args = Map::from([("dlog", Map::from([("sq", true)]))]);
        let changed = t.tune(&args).unwrap();

        assert!(t.dlog.sq);
        assert!(t.dlog.warning);
        assert_eq!(changed.len(), 1);
        assert_eq!(changed.get_map("dlog").unwrap().get_bool("sq"), Some(true));
    }

    #[test]
    fn test_tune_clamps_sample() {
        let mut t = Tunables::default();
        let args = Map::from([("sample", Map::from([("server", -5), ("client", 3)]))]);
        t.tune(&args).unwrap();
        assert_eq!(t.sample.server, 0);
        assert_eq!(t.sample.client, 3);
    }

    #[test]
    fn test_tune_rejects_bad_types_atomically() {
        let mut t = Tunables::default();
        let mut args = Map::new();
        args.insert("dlog", Map::from([("sq", true)]));
        args.insert("timeout", Map::from([("message", "soon")]));

        assert!(matches!(t.tune(&args), Err(XicError::ParameterType { .. })));
        assert!(!t.dlog.sq);
    }

    #[test]
    fn test_timeout_fallback_chain() {
        let global = TimeoutSettings {
            connect: 0,
            close: 0,
            message: 0,
        };
        let none = EndpointTimeouts::default();
        let t = ConnectionTimeouts::resolve(&none, &global);
        assert_eq!(t.message, None);
        assert_eq!(t.close, Duration::from_millis(DEFAULT_CLOSE_TIMEOUT_MS));
        assert_eq!(t.connect, Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS));

        let msg_only = EndpointTimeouts {
            message: 2000,
            close: 0,
            connect: 0,
        };
        let t = ConnectionTimeouts::resolve(&msg_only, &global);
        assert_eq!(t.message, Some(Duration::from_millis(2000)));
        assert_eq!(t.close, Duration::from_millis(2000));
        assert_eq!(t.connect, Duration::from_millis(2000));

        let explicit = EndpointTimeouts {
            message: 2000,
            close: 50,
            connect: 70,
        };
        let t = ConnectionTimeouts::resolve(&explicit, &TimeoutSettings::default());
        assert_eq!(t.close, Duration::from_millis(50));
        assert_eq!(t.connect, Duration::from_millis(70));
    }

    #[test]
    fn test_default_timeouts_are_reported() {
        let t = Tunables::default();
        let section = t.section("timeout").unwrap();
        assert_eq!(section.get_int("close"), Some(DEFAULT_CLOSE_TIMEOUT_MS as i64));
        assert_eq!(section.get_int("connect"), Some(DEFAULT_CONNECT_TIMEOUT_MS as i64));
        assert_eq!(section.get_int("message"), Some(0));
    }

    #[test]
    fn test_global_close_beats_endpoint_message() {
        let t = ConnectionTimeouts::resolve(
            &EndpointTimeouts {
                message: 2000,
                close: 0,
                connect: 0,
            },
            &TimeoutSettings::default(),
        );
        assert_eq!(t.close, Duration::from_millis(DEFAULT_CLOSE_TIMEOUT_MS));
    }

    #[test]
    fn test_global_connect_beats_endpoint_message() {
        let t = ConnectionTimeouts::resolve(
            &EndpointTimeouts {
                message: 2000,
                close: 0,
                connect: 0,
            },
            &TimeoutSettings::default(),
        );
        assert_eq!(t.connect, Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS));
    }

    #[test]
    fn test_from_json_partial() {
        let config = EngineConfig::from_json(r#"{"adapter_endpoints": {"xic": "tcp++4000"}}"#)
            .unwrap();
        assert_eq!(config.adapter_endpoints["xic"], "tcp++4000");
        assert_eq!(config.client_pool_size, DEFAULT_POOL_SIZE);
    }
}
