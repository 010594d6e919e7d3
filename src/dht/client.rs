use super::error::DhtError;
use super::message::{
    response_node_id, DhtMessage, DhtMessageKind, DhtQuery, GetPeersResponse,
};
use super::node::NodeId;
use crate::bencode::Value;
use crate::config::DhtConfig;
use crate::constants::{DHT_MAX_DATAGRAM, MAX_LOOKUP_QUERIES, MAX_PENDING_QUERIES};
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};

type Reply = Result<BTreeMap<Bytes, Value>, DhtError>;

/// Identifies a query in flight: the node it went to and its token.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct QueryKey {
    addr: SocketAddr,
    token: Bytes,
}

struct PendingQuery {
    seq: u64,
    sender: oneshot::Sender<Reply>,
}

#[derive(Default)]
struct State {
    pending: HashMap<QueryKey, PendingQuery>,
    /// Nodes that have answered us, in the order they first did.
    known_good: Vec<SocketAddr>,
    next_seq: u64,
    closed: bool,
}

struct Inner {
    socket: Arc<UdpSocket>,
    node_id: NodeId,
    config: DhtConfig,
    state: Mutex<State>,
    next_token: AtomicU8,
}

impl Inner {
    fn mark_good(&self, addr: SocketAddr) {
        let mut state = self.state.lock();
        if !state.known_good.contains(&addr) {
            state.known_good.push(addr);
        }
    }

    fn handle_datagram(&self, data: &[u8], from: SocketAddr) {
        let msg = match DhtMessage::parse(data) {
            Ok(msg) => msg,
            Err(e) => {
                debug!("Failed to parse DHT message from {}: {}", from, e);
                return;
            }
        };

        let reply = match msg.kind {
            DhtMessageKind::Response(values) => Ok(values),
            DhtMessageKind::Error { code, message } => Err(DhtError::PeerError { code, message }),
            DhtMessageKind::Query { name, .. } => {
                trace!("Ignoring {} query from {}", name, from);
                return;
            }
        };

        let key = QueryKey {
            addr: from,
            token: msg.transaction_id,
        };

        let pending = self.state.lock().pending.remove(&key);
        match pending {
            // The caller may have gone away; nothing to do then.
            Some(query) => {
                let _ = query.sender.send(reply);
            }
            None => debug!(
                "Discarding unsolicited DHT reply from {} (token {:02x?})",
                from,
                key.token.as_ref()
            ),
        }
    }

    fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        state.pending.clear();
    }
}

/// Removes a pending entry when the awaiting call finishes or is cancelled.
struct PendingGuard<'a> {
    inner: &'a Inner,
    key: QueryKey,
    seq: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.inner.state.lock();
        if state
            .pending
            .get(&self.key)
            .is_some_and(|query| query.seq == self.seq)
        {
            state.pending.remove(&self.key);
        }
    }
}

/// A passive DHT client for peer discovery.
///
/// `DhtClient` sends `ping` and `get_peers` queries ([BEP-5]) and matches
/// replies to callers by source address and transaction token. It never
/// answers queries from other nodes.
///
/// # Examples
///
/// ```no_run
/// use swarmwire::config::DhtConfig;
/// use swarmwire::dht::DhtClient;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let dht = DhtClient::bind(DhtConfig::default()).await?;
///
/// // Seed the known-good set from the bootstrap routers
/// let answered = dht.bootstrap().await;
/// println!("{} bootstrap nodes answered", answered);
///
/// // Find peers for a torrent
/// let info_hash = [0u8; 20];
/// let peers = dht.get_peers(info_hash).await?;
/// # Ok(())
/// # }
/// ```
///
/// [BEP-5]: http://bittorrent.org/beps/bep_0005.html
pub struct DhtClient {
    inner: Arc<Inner>,
    local_addr: SocketAddr,
    receive_task: JoinHandle<()>,
}

impl DhtClient {
    /// Binds the UDP socket and starts the receive loop.
    pub async fn bind(config: DhtConfig) -> Result<Self, DhtError> {
        let socket = Arc::new(UdpSocket::bind(config.bind_addr).await?);
        let local_addr = socket.local_addr()?;
        let node_id = NodeId::generate();

        info!("DHT client bound to {} with id {}", local_addr, node_id);

        let inner = Arc::new(Inner {
            socket,
            node_id,
            config,
            state: Mutex::new(State::default()),
            next_token: AtomicU8::new(0),
        });

        let receive_task = tokio::spawn(receive_loop(Arc::clone(&inner)));

        Ok(Self {
            inner,
            local_addr,
            receive_task,
        })
    }

    pub fn node_id(&self) -> NodeId {
        self.inner.node_id
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Nodes that have answered a query, in first-answer order.
    pub fn known_nodes(&self) -> Vec<SocketAddr> {
        self.inner.state.lock().known_good.clone()
    }

    /// Number of queries still waiting for a reply.
    pub fn pending_queries(&self) -> usize {
        self.inner.state.lock().pending.len()
    }

    /// Pings every configured bootstrap router and returns how many answered.
    pub async fn bootstrap(&self) -> usize {
        info!("Starting DHT bootstrap");
        let mut answered = 0;

        for host in &self.inner.config.bootstrap_nodes {
            let addr = match tokio::net::lookup_host(host.as_str()).await {
                Ok(mut addrs) => match addrs.find(|a| a.is_ipv4() == self.local_addr.is_ipv4()) {
                    Some(addr) => addr,
                    None => continue,
                },
                Err(e) => {
                    warn!("Failed to resolve bootstrap node {}: {}", host, e);
                    continue;
                }
            };

            match self.ping(addr).await {
                Ok(id) => {
                    debug!("Bootstrap node {} ({}) answered with id {}", host, addr, id);
                    answered += 1;
                }
                Err(e) => debug!("Bootstrap node {} ({}) failed: {}", host, addr, e),
            }
        }

        info!(
            "DHT bootstrap complete, {} of {} nodes answered",
            answered,
            self.inner.config.bootstrap_nodes.len()
        );
        answered
    }

    /// Pings `addr` and returns its node id. A node that answers becomes
    /// known-good.
    pub async fn ping(&self, addr: SocketAddr) -> Result<NodeId, DhtError> {
        let reply = self.query(addr, DhtQuery::Ping).await?;
        let id = response_node_id(&reply)?;
        self.inner.mark_good(addr);
        Ok(id)
    }

    /// Looks up peers for `info_hash`, starting from the known-good nodes
    /// and following `nodes` referrals closest-first up to the hop limit.
    pub async fn get_peers(&self, info_hash: [u8; 20]) -> Result<Vec<SocketAddr>, DhtError> {
        let seeds = self.known_nodes();
        if seeds.is_empty() {
            return Err(DhtError::NoGoodNodes);
        }

        let target = NodeId(info_hash);
        let max_hops = self.inner.config.max_hops;
        let mut queue: VecDeque<(SocketAddr, usize)> =
            seeds.into_iter().map(|addr| (addr, 0)).collect();
        let mut queried = HashSet::new();

        while let Some((addr, hop)) = queue.pop_front() {
            if queried.len() >= MAX_LOOKUP_QUERIES {
                debug!("get_peers gave up after {} queries", queried.len());
                break;
            }
            if !queried.insert(addr) {
                continue;
            }

            let reply = match self.query(addr, DhtQuery::GetPeers { info_hash }).await {
                Ok(reply) => reply,
                Err(e) => {
                    debug!("get_peers query to {} failed: {}", addr, e);
                    continue;
                }
            };
            self.inner.mark_good(addr);

            let response = GetPeersResponse::from_response(&reply);
            if !response.peers.is_empty() {
                info!(
                    "DHT get_peers found {} peers at {} after querying {} nodes",
                    response.peers.len(),
                    addr,
                    queried.len()
                );
                return Ok(response.peers);
            }

            if hop + 1 > max_hops {
                continue;
            }

            let mut nodes = response.nodes;
            nodes.sort_by_key(|node| node.id.distance(&target));
            for node in nodes {
                if !queried.contains(&node.addr) {
                    queue.push_back((node.addr, hop + 1));
                }
            }
        }

        Err(DhtError::NoPeersFound)
    }

    async fn query(&self, addr: SocketAddr, query: DhtQuery) -> Reply {
        let token = Bytes::copy_from_slice(&[self.inner.next_token.fetch_add(1, Ordering::Relaxed)]);
        let key = QueryKey {
            addr,
            token: token.clone(),
        };
        let (tx, rx) = oneshot::channel();

        let seq = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return Err(DhtError::Shutdown);
            }
            if state.pending.len() >= MAX_PENDING_QUERIES {
                return Err(DhtError::RateLimited);
            }
            if state.pending.contains_key(&key) {
                return Err(DhtError::DuplicateQuery);
            }

            let seq = state.next_seq;
            state.next_seq += 1;
            state.pending.insert(key.clone(), PendingQuery { seq, sender: tx });
            seq
        };

        let _guard = PendingGuard {
            inner: &self.inner,
            key,
            seq,
        };

        let msg = DhtMessage::query(
            token,
            &self.inner.node_id,
            &query,
            self.inner.config.read_only,
        );
        self.inner.socket.send_to(&msg.encode(), addr).await?;
        debug!("Sent {} query to {}", query.name(), addr);

        match timeout(self.inner.config.query_timeout, rx).await {
            Ok(Ok(reply)) => {
                debug!("{} query to {} resolved", query.name(), addr);
                reply
            }
            Ok(Err(_)) => Err(DhtError::Shutdown),
            Err(_) => {
                debug!("{} query to {} timed out", query.name(), addr);
                Err(DhtError::QueryTimeout)
            }
        }
    }
}

impl Drop for DhtClient {
    fn drop(&mut self) {
        self.receive_task.abort();
        self.inner.close();
    }
}

async fn receive_loop(inner: Arc<Inner>) {
    let mut buf = vec![0u8; DHT_MAX_DATAGRAM];

    loop {
        match inner.socket.recv_from(&mut buf).await {
            Ok((n, from)) => inner.handle_datagram(&buf[..n], from),
            // ICMP unreachable surfacing on some platforms
            Err(e)
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::ConnectionReset | std::io::ErrorKind::ConnectionRefused
                ) =>
            {
                debug!("DHT socket error ignored: {}", e);
            }
            Err(e) => {
                warn!("DHT receive loop stopped: {}", e);
                inner.close();
                return;
            }
        }
    }
}
