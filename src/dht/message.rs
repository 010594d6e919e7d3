use super::error::DhtError;
use super::node::{parse_compact_nodes, parse_compact_peer, Node, NodeId};
use crate::bencode::{decode, encode, Value};
use bytes::Bytes;
use std::collections::BTreeMap;
use std::net::SocketAddr;

pub type TransactionId = Bytes;

/// The queries this client sends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DhtQuery {
    Ping,
    GetPeers { info_hash: [u8; 20] },
}

impl DhtQuery {
    pub fn name(&self) -> &'static str {
        match self {
            DhtQuery::Ping => "ping",
            DhtQuery::GetPeers { .. } => "get_peers",
        }
    }

    fn args(&self, our_id: &NodeId) -> BTreeMap<Bytes, Value> {
        let mut args = BTreeMap::new();
        args.insert(
            Bytes::from_static(b"id"),
            Value::Bytes(Bytes::copy_from_slice(our_id.as_bytes())),
        );

        if let DhtQuery::GetPeers { info_hash } = self {
            args.insert(
                Bytes::from_static(b"info_hash"),
                Value::Bytes(Bytes::copy_from_slice(info_hash)),
            );
        }

        args
    }
}

/// The three KRPC message kinds, keyed by `y`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DhtMessageKind {
    Query {
        name: String,
        args: BTreeMap<Bytes, Value>,
    },
    Response(BTreeMap<Bytes, Value>),
    Error {
        code: i64,
        message: String,
    },
}

/// A KRPC message (BEP-5).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhtMessage {
    pub transaction_id: TransactionId,
    pub kind: DhtMessageKind,
    /// BEP-43 read-only flag.
    pub read_only: bool,
}

impl DhtMessage {
    pub fn query(
        transaction_id: TransactionId,
        our_id: &NodeId,
        query: &DhtQuery,
        read_only: bool,
    ) -> Self {
        Self {
            transaction_id,
            kind: DhtMessageKind::Query {
                name: query.name().to_string(),
                args: query.args(our_id),
            },
            read_only,
        }
    }

    pub fn response(transaction_id: TransactionId, values: BTreeMap<Bytes, Value>) -> Self {
        Self {
            transaction_id,
            kind: DhtMessageKind::Response(values),
            read_only: false,
        }
    }

    pub fn error(transaction_id: TransactionId, code: i64, message: &str) -> Self {
        Self {
            transaction_id,
            kind: DhtMessageKind::Error {
                code,
                message: message.to_string(),
            },
            read_only: false,
        }
    }

    pub fn parse(data: &[u8]) -> Result<Self, DhtError> {
        let dict = decode(data)?
            .into_dict()
            .ok_or_else(|| DhtError::InvalidMessage("expected dict".into()))?;

        let transaction_id = dict
            .get(b"t".as_slice())
            .and_then(|v| v.as_bytes())
            .cloned()
            .ok_or_else(|| DhtError::InvalidMessage("missing transaction id".into()))?;

        let msg_type = dict
            .get(b"y".as_slice())
            .and_then(|v| v.as_str())
            .ok_or_else(|| DhtError::InvalidMessage("missing message type".into()))?;

        let read_only = dict.get(b"ro".as_slice()).and_then(|v| v.as_integer()) == Some(1);

        let kind = match msg_type {
            "q" => {
                let name = dict
                    .get(b"q".as_slice())
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| DhtError::InvalidMessage("missing query name".into()))?;
                let args = dict
                    .get(b"a".as_slice())
                    .and_then(|v| v.as_dict())
                    .cloned()
                    .unwrap_or_default();
                DhtMessageKind::Query {
                    name: name.to_string(),
                    args,
                }
            }
            "r" => {
                let values = dict
                    .get(b"r".as_slice())
                    .and_then(|v| v.as_dict())
                    .cloned()
                    .ok_or_else(|| DhtError::InvalidMessage("missing response dict".into()))?;
                DhtMessageKind::Response(values)
            }
            "e" => {
                let error = dict
                    .get(b"e".as_slice())
                    .and_then(|v| v.as_list())
                    .ok_or_else(|| DhtError::InvalidMessage("missing error list".into()))?;

                let code = error.first().and_then(|v| v.as_integer()).unwrap_or(0);
                let message = error
                    .get(1)
                    .and_then(|v| v.as_str())
                    .unwrap_or("unknown error")
                    .to_string();

                DhtMessageKind::Error { code, message }
            }
            other => {
                return Err(DhtError::InvalidMessage(format!(
                    "unknown message type: {}",
                    other
                )))
            }
        };

        Ok(Self {
            transaction_id,
            kind,
            read_only,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut dict = BTreeMap::new();

        dict.insert(
            Bytes::from_static(b"t"),
            Value::Bytes(self.transaction_id.clone()),
        );

        match &self.kind {
            DhtMessageKind::Query { name, args } => {
                dict.insert(Bytes::from_static(b"y"), Value::string("q"));
                dict.insert(Bytes::from_static(b"q"), Value::string(name));
                dict.insert(Bytes::from_static(b"a"), Value::Dict(args.clone()));
            }
            DhtMessageKind::Response(values) => {
                dict.insert(Bytes::from_static(b"y"), Value::string("r"));
                dict.insert(Bytes::from_static(b"r"), Value::Dict(values.clone()));
            }
            DhtMessageKind::Error { code, message } => {
                dict.insert(Bytes::from_static(b"y"), Value::string("e"));
                dict.insert(
                    Bytes::from_static(b"e"),
                    Value::List(vec![Value::Integer(*code), Value::string(message)]),
                );
            }
        }

        if self.read_only {
            dict.insert(Bytes::from_static(b"ro"), Value::Integer(1));
        }

        encode(&Value::Dict(dict))
    }
}

/// Reads the responder's id from a response dictionary.
pub fn response_node_id(values: &BTreeMap<Bytes, Value>) -> Result<NodeId, DhtError> {
    let id = values
        .get(b"id".as_slice())
        .and_then(|v| v.as_bytes())
        .ok_or_else(|| DhtError::InvalidMessage("missing id in response".into()))?;
    NodeId::from_bytes(id)
}

/// The useful parts of a `get_peers` response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GetPeersResponse {
    /// Peers for the info hash (`values`), IPv4 and IPv6.
    pub peers: Vec<SocketAddr>,
    /// Closer nodes to ask next (`nodes`).
    pub nodes: Vec<Node>,
    /// Announce token; unused by this client.
    pub token: Option<Bytes>,
}

impl GetPeersResponse {
    /// Extracts peers and referrals; malformed entries are skipped.
    pub fn from_response(values: &BTreeMap<Bytes, Value>) -> Self {
        let peers = values
            .get(b"values".as_slice())
            .and_then(|v| v.as_list())
            .map(|list| {
                list.iter()
                    .filter_map(|v| v.as_bytes())
                    .filter_map(|b| parse_compact_peer(b))
                    .collect()
            })
            .unwrap_or_default();

        let nodes = values
            .get(b"nodes".as_slice())
            .and_then(|v| v.as_bytes())
            .map(|data| parse_compact_nodes(data))
            .unwrap_or_default();

        let token = values
            .get(b"token".as_slice())
            .and_then(|v| v.as_bytes())
            .cloned();

        Self {
            peers,
            nodes,
            token,
        }
    }
}
