//! Quest and answer messages.
//!
//! A quest body is the vbs sequence `(txid, service, method, context, args)`,
//! an answer body is `(txid, status, args)`. Bodies must be consumed exactly:
//! trailing bytes after the last field are a marshal error.

use bytes::Bytes;

use super::wire_format::{Header, MessageType};
use crate::codec::{unpack, Map, Packer, Value};
use crate::error::{RemoteException, Result, XicError, FAILURE_STATUS};

/// Txid asking the connection to assign one on send.
pub const TXID_ASSIGN: i32 = -1;

/// Txid of a oneway quest.
pub const TXID_ONEWAY: i32 = 0;

/// A request.
#[derive(Debug, Clone, PartialEq)]
pub struct Quest {
    /// Transaction id: -1 assign on send, 0 oneway, positive assigned.
    pub txid: i32,
    pub service: String,
    pub method: String,
    /// Side-channel metadata.
    pub context: Map,
    pub args: Map,
}

impl Quest {
    /// Twoway quest. The txid is assigned when sent.
    pub fn new(service: impl Into<String>, method: impl Into<String>, args: Map) -> Self {
        Self {
            txid: TXID_ASSIGN,
            service: service.into(),
            method: method.into(),
            context: Map::new(),
            args,
        }
    }

    /// Oneway quest: no answer is produced.
    pub fn oneway(service: impl Into<String>, method: impl Into<String>, args: Map) -> Self {
        Self {
            txid: TXID_ONEWAY,
            ..Self::new(service, method, args)
        }
    }

    pub fn with_context(mut self, context: Map) -> Self {
        self.context = context;
        self
    }

    #[inline]
    pub fn is_oneway(&self) -> bool {
        self.txid == TXID_ONEWAY
    }

    pub fn encode_body(&self) -> Bytes {
        let mut p = Packer::with_capacity(64);
        p.pack_i64(i64::from(self.txid));
        p.pack_str(&self.service);
        p.pack_str(&self.method);
        p.pack_map(&self.context);
        p.pack_map(&self.args);
        p.into_bytes()
    }

    pub fn decode_body(body: &[u8]) -> Result<Self> {
        let [txid, service, method, context, args] = decode_fields::<5>(body)?;
        Ok(Self {
            txid: field_txid(txid)?,
            service: field_string(service, "service")?,
            method: field_string(method, "method")?,
            context: field_map(context, "context")?,
            args: field_map(args, "args")?,
        })
    }
}

/// A reply to a twoway quest.
#[derive(Debug, Clone, PartialEq)]
pub struct Answer {
    pub txid: i32,
    /// 0 on success.
    pub status: i32,
    /// Return values, or the exception payload on failure.
    pub args: Map,
}

impl Answer {
    /// Successful answer. The txid is filled in when it is sent.
    pub fn ok(args: Map) -> Self {
        Self {
            txid: 0,
            status: 0,
            args,
        }
    }

    /// Failure answer carrying the exception payload for `err`.
    pub fn failure(err: &XicError, raiser: &str) -> Self {
        let status = match err {
            XicError::Remote(re) if re.status != 0 => re.status,
            _ => FAILURE_STATUS,
        };
        Self {
            txid: 0,
            status,
            args: err.to_answer_args(raiser),
        }
    }

    #[inline]
    pub fn is_ok(&self) -> bool {
        self.status == 0
    }

    /// Arguments on success, the remote exception otherwise.
    pub fn into_result(self) -> Result<Map> {
        if self.status == 0 {
            Ok(self.args)
        } else {
            Err(XicError::Remote(RemoteException::new(self.status, self.args)))
        }
    }

    pub fn encode_body(&self) -> Bytes {
        let mut p = Packer::with_capacity(32);
        p.pack_i64(i64::from(self.txid));
        p.pack_i64(i64::from(self.status));
        p.pack_map(&self.args);
        p.into_bytes()
    }

    pub fn decode_body(body: &[u8]) -> Result<Self> {
        let [txid, status, args] = decode_fields::<3>(body)?;
        Ok(Self {
            txid: field_txid(txid)?,
            status: field_i32(status, "status")?,
            args: field_map(args, "args")?,
        })
    }
}

/// Any message read off a connection.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Hello,
    Bye,
    Quest(Quest),
    Answer(Answer),
}

impl Message {
    pub fn msg_type(&self) -> MessageType {
        match self {
            Message::Hello => MessageType::Hello,
            Message::Bye => MessageType::Bye,
            Message::Quest(_) => MessageType::Quest,
            Message::Answer(_) => MessageType::Answer,
        }
    }

    /// Encoded body, empty for control messages.
    pub fn encode_body(&self) -> Bytes {
        match self {
            Message::Hello | Message::Bye => Bytes::new(),
            Message::Quest(q) => q.encode_body(),
            Message::Answer(a) => a.encode_body(),
        }
    }

    /// Decode the body of a validated header.
    pub fn decode(header: &Header, body: &[u8]) -> Result<Self> {
        if body.len() != header.body_len() {
            return Err(XicError::Marshal(format!(
                "header declares {} bytes, body has {}",
                header.body_len(),
                body.len()
            )));
        }
        Ok(match header.msg_type {
            MessageType::Hello => Message::Hello,
            MessageType::Bye => Message::Bye,
            MessageType::Quest => Message::Quest(Quest::decode_body(body)?),
            MessageType::Answer => Message::Answer(Answer::decode_body(body)?),
        })
    }
}

fn decode_fields<const N: usize>(body: &[u8]) -> Result<[Value; N]> {
    let (values, consumed) = unpack(body, 0, Some(N))?;
    if consumed != body.len() {
        return Err(XicError::Marshal(format!(
            "body has {} bytes, fields end at {}",
            body.len(),
            consumed
        )));
    }
    values
        .try_into()
        .map_err(|_| XicError::Protocol("wrong field count".into()))
}

fn field_i32(v: Value, name: &str) -> Result<i32> {
    v.as_i64()
        .and_then(|n| i32::try_from(n).ok())
        .ok_or_else(|| XicError::Protocol(format!("{} is not an int32", name)))
}

fn field_txid(v: Value) -> Result<i32> {
    let txid = field_i32(v, "txid")?;
    if txid < 0 {
        return Err(XicError::Protocol(format!("negative txid {} on the wire", txid)));
    }
    Ok(txid)
}

fn field_string(v: Value, name: &str) -> Result<String> {
    match v {
        Value::String(s) => Ok(s),
        other => Err(XicError::Protocol(format!(
            "{} should be a string, got {}",
            name,
            other.kind_name()
        ))),
    }
}

fn field_map(v: Value, name: &str) -> Result<Map> {
    match v {
        Value::Map(m) => Ok(m),
        other => Err(XicError::Protocol(format!(
            "{} should be a dict, got {}",
            name,
            other.kind_name()
        ))),
    }
}
