//! Banking server
//!
//! A single cooperative receive loop: sweep expired state, receive one
//! datagram, apply the simulated-loss draws, answer duplicates from the
//! reply cache, otherwise dispatch to the bank and fan out callbacks to
//! registered monitors. One datagram is handled at a time, which is the
//! serialization point for all account state.

use std::net::SocketAddr;

use rand::Rng;
use thiserror::Error;
use tokio::net::UdpSocket;

use super::dedup::DedupCache;
use super::monitor::MonitorRegistry;
use super::ServerConfig;
use crate::bank::Bank;
use crate::protocol::{
    self, AmountRequest, BalanceReply, CallbackUpdate, CloseRequest, Currency, InfoReply, Message,
    MonitorRequest, MsgType, OpCode, OpenReply, OpenRequest, QueryReply, QueryRequest, Status,
    TransferReply, TransferRequest, PROTOCOL_VERSION,
};

/// Receive buffer size; comfortably above any valid request datagram.
const RECV_BUF_SIZE: usize = 2048;

/// Server errors
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Bind failed: {0}")]
    BindFailed(String),
}

pub type ServerResult<T> = Result<T, ServerError>;

/// An account update produced by a successful mutating operation, queued
/// for fan-out to every registered monitor.
struct CallbackEvent {
    update_type: OpCode,
    account_no: i32,
    currency: Currency,
    new_balance: f64,
    info: String,
}

/// The banking server: socket, account store, reply cache, monitors.
pub struct Server {
    socket: UdpSocket,
    config: ServerConfig,
    bank: Bank,
    dedup: DedupCache,
    monitors: MonitorRegistry,
}

impl Server {
    /// Bind the server socket. Fails with [`ServerError::BindFailed`] when
    /// the port is taken.
    pub async fn bind(config: ServerConfig, bank: Bank) -> ServerResult<Self> {
        let bind_addr = format!("0.0.0.0:{}", config.port);
        let socket = UdpSocket::bind(&bind_addr).await.map_err(|e| {
            ServerError::BindFailed(format!("Failed to bind to {}: {}", bind_addr, e))
        })?;

        tracing::info!(
            "listening on {} lossReq={} lossRep={} dedupTtl={:?}",
            socket.local_addr()?,
            config.loss_req,
            config.loss_rep,
            config.dedup_ttl
        );

        let dedup = DedupCache::new(config.dedup_ttl);
        Ok(Server {
            socket,
            config,
            bank,
            dedup,
            monitors: MonitorRegistry::new(),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Run the receive loop forever.
    pub async fn run(mut self) -> ServerResult<()> {
        let mut buf = [0u8; RECV_BUF_SIZE];
        loop {
            self.monitors.sweep();
            self.dedup.sweep();

            let (len, peer) = match self.socket.recv_from(&mut buf).await {
                Ok(v) => v,
                Err(e) => {
                    tracing::warn!("receive error: {}", e);
                    continue;
                }
            };

            self.handle_datagram(&buf[..len], peer).await;
        }
    }

    async fn handle_datagram(&mut self, raw: &[u8], peer: SocketAddr) {
        if self.draw() < self.config.loss_req {
            tracing::info!("DROP request from {} (simulated)", peer);
            return;
        }

        let req = match protocol::decode(raw) {
            Ok(m) => m,
            Err(e) => {
                tracing::debug!("Bad request from {}: {}", peer, e);
                return;
            }
        };
        if req.version != PROTOCOL_VERSION || req.msg_type != MsgType::Request as u8 {
            tracing::debug!(
                "Bad request from {}: version={} msgType={}",
                peer,
                req.version,
                req.msg_type
            );
            return;
        }

        let at_most_once = req.is_at_most_once();
        let dedup_key = DedupCache::key(peer, req.request_id);

        if at_most_once {
            if let Some(cached) = self.dedup.get(&dedup_key) {
                tracing::info!(
                    "DUP reqId={} from {} => replay cached reply",
                    req.request_id,
                    peer
                );
                let cached = cached.to_vec();
                if self.draw() < self.config.loss_rep {
                    tracing::info!("DROP reply to {} (simulated)", peer);
                    return;
                }
                if let Err(e) = self.socket.send_to(&cached, peer).await {
                    tracing::warn!("failed to resend cached reply to {}: {}", peer, e);
                }
                return;
            }
        }

        tracing::info!(
            "recv op={} reqId={} from {} ({})",
            OpCode::from_u16(req.op_code).map_or_else(|| req.op_code.to_string(), |op| op.to_string()),
            req.request_id,
            peer,
            if at_most_once { "at-most-once" } else { "at-least-once" }
        );

        let (reply, events) = self.dispatch(&req, peer);
        let reply_bytes = protocol::encode(&reply);

        // Cache before the loss draw: even when every reply transmission is
        // dropped, retries within the window must replay these exact bytes.
        if at_most_once {
            self.dedup.insert(dedup_key, reply_bytes.clone());
        }

        // Callbacks are independent of the reply-loss simulation.
        self.fan_out(&events).await;

        if self.draw() < self.config.loss_rep {
            tracing::info!("DROP reply to {} (simulated)", peer);
            return;
        }
        if let Err(e) = self.socket.send_to(&reply_bytes, peer).await {
            tracing::warn!("failed to send reply to {}: {}", peer, e);
        }
    }

    /// Route one valid request to its handler and build the reply.
    fn dispatch(&mut self, req: &Message, peer: SocketAddr) -> (Message, Vec<CallbackEvent>) {
        let mut events = Vec::new();
        let (status, body) = match OpCode::from_u16(req.op_code) {
            Some(OpCode::Open) => self.handle_open(&req.body, &mut events),
            Some(OpCode::Close) => self.handle_close(&req.body, &mut events),
            Some(OpCode::Deposit) => self.handle_deposit(&req.body, &mut events),
            Some(OpCode::Withdraw) => self.handle_withdraw(&req.body, &mut events),
            Some(OpCode::QueryBalance) => self.handle_query_balance(&req.body),
            Some(OpCode::Transfer) => self.handle_transfer(&req.body, &mut events),
            Some(OpCode::MonitorRegister) => self.handle_monitor_register(&req.body, peer),
            Some(OpCode::CallbackUpdate) | None => {
                tracing::debug!("unknown opCode={} from {}", req.op_code, peer);
                (Status::BadRequest, Vec::new())
            }
        };
        (Message::reply_to(req, status, body), events)
    }

    fn handle_open(&mut self, body: &[u8], events: &mut Vec<CallbackEvent>) -> (Status, Vec<u8>) {
        let req = match OpenRequest::decode(body) {
            Ok(r) => r,
            Err(e) => {
                tracing::debug!("malformed OPEN body: {}", e);
                return (Status::BadRequest, Vec::new());
            }
        };

        match self.bank.open(&req.name, &req.password, req.currency, req.initial) {
            Ok((account_no, balance)) => {
                tracing::info!(
                    "OPEN: accountNo={} name={} currency={} balance={}",
                    account_no,
                    req.name,
                    req.currency,
                    balance
                );
                events.push(CallbackEvent {
                    update_type: OpCode::Open,
                    account_no,
                    currency: req.currency,
                    new_balance: balance,
                    info: format!("OPEN by {}", req.name),
                });
                (Status::Ok, OpenReply { account_no, balance }.encode())
            }
            Err(e) => (e.status(), Vec::new()),
        }
    }

    fn handle_close(&mut self, body: &[u8], events: &mut Vec<CallbackEvent>) -> (Status, Vec<u8>) {
        let req = match CloseRequest::decode(body) {
            Ok(r) => r,
            Err(e) => {
                tracing::debug!("malformed CLOSE body: {}", e);
                return (Status::BadRequest, Vec::new());
            }
        };

        match self.bank.close(&req.name, req.account_no, &req.password) {
            Ok((currency, balance)) => {
                tracing::info!("CLOSE: accountNo={} name={}", req.account_no, req.name);
                events.push(CallbackEvent {
                    update_type: OpCode::Close,
                    account_no: req.account_no,
                    currency,
                    new_balance: balance,
                    info: format!("CLOSE by {}", req.name),
                });
                self.encode_info(Status::Ok, "account closed")
            }
            Err(e) => (e.status(), Vec::new()),
        }
    }

    fn handle_deposit(&mut self, body: &[u8], events: &mut Vec<CallbackEvent>) -> (Status, Vec<u8>) {
        let req = match AmountRequest::decode(body) {
            Ok(r) => r,
            Err(e) => {
                tracing::debug!("malformed DEPOSIT body: {}", e);
                return (Status::BadRequest, Vec::new());
            }
        };

        match self.bank.deposit(
            &req.name,
            req.account_no,
            &req.password,
            req.currency,
            req.amount,
        ) {
            Ok(new_balance) => {
                tracing::info!(
                    "DEPOSIT: accountNo={} amount={} newBalance={}",
                    req.account_no,
                    req.amount,
                    new_balance
                );
                events.push(CallbackEvent {
                    update_type: OpCode::Deposit,
                    account_no: req.account_no,
                    currency: req.currency,
                    new_balance,
                    info: format!("DEPOSIT {} by {}", req.amount, req.name),
                });
                (Status::Ok, BalanceReply { new_balance }.encode())
            }
            Err(e) => (e.status(), Vec::new()),
        }
    }

    fn handle_withdraw(&mut self, body: &[u8], events: &mut Vec<CallbackEvent>) -> (Status, Vec<u8>) {
        let req = match AmountRequest::decode(body) {
            Ok(r) => r,
            Err(e) => {
                tracing::debug!("malformed WITHDRAW body: {}", e);
                return (Status::BadRequest, Vec::new());
            }
        };

        match self.bank.withdraw(
            &req.name,
            req.account_no,
            &req.password,
            req.currency,
            req.amount,
        ) {
            Ok(new_balance) => {
                tracing::info!(
                    "WITHDRAW: accountNo={} amount={} newBalance={}",
                    req.account_no,
                    req.amount,
                    new_balance
                );
                events.push(CallbackEvent {
                    update_type: OpCode::Withdraw,
                    account_no: req.account_no,
                    currency: req.currency,
                    new_balance,
                    info: format!("WITHDRAW {} by {}", req.amount, req.name),
                });
                (Status::Ok, BalanceReply { new_balance }.encode())
            }
            Err(e) => (e.status(), Vec::new()),
        }
    }

    fn handle_query_balance(&mut self, body: &[u8]) -> (Status, Vec<u8>) {
        let req = match QueryRequest::decode(body) {
            Ok(r) => r,
            Err(e) => {
                tracing::debug!("malformed QUERY_BALANCE body: {}", e);
                return (Status::BadRequest, Vec::new());
            }
        };

        match self
            .bank
            .query_balance(&req.name, req.account_no, &req.password)
        {
            Ok((currency, balance)) => {
                tracing::info!(
                    "QUERY_BALANCE: accountNo={} currency={} balance={}",
                    req.account_no,
                    currency,
                    balance
                );
                (Status::Ok, QueryReply { currency, balance }.encode())
            }
            Err(e) => (e.status(), Vec::new()),
        }
    }

    fn handle_transfer(&mut self, body: &[u8], events: &mut Vec<CallbackEvent>) -> (Status, Vec<u8>) {
        let req = match TransferRequest::decode(body) {
            Ok(r) => r,
            Err(e) => {
                tracing::debug!("malformed TRANSFER body: {}", e);
                return (Status::BadRequest, Vec::new());
            }
        };

        match self.bank.transfer(
            &req.name,
            req.from_account,
            &req.password,
            req.to_account,
            req.currency,
            req.amount,
        ) {
            Ok((from_balance, to_balance)) => {
                tracing::info!(
                    "TRANSFER: from={} to={} amount={} fromNewBal={} toNewBal={}",
                    req.from_account,
                    req.to_account,
                    req.amount,
                    from_balance,
                    to_balance
                );
                // Two callbacks, source account first.
                events.push(CallbackEvent {
                    update_type: OpCode::Transfer,
                    account_no: req.from_account,
                    currency: req.currency,
                    new_balance: from_balance,
                    info: format!(
                        "TRANSFER out {} to {} by {}",
                        req.amount, req.to_account, req.name
                    ),
                });
                events.push(CallbackEvent {
                    update_type: OpCode::Transfer,
                    account_no: req.to_account,
                    currency: req.currency,
                    new_balance: to_balance,
                    info: format!("TRANSFER in {} from {}", req.amount, req.from_account),
                });
                (
                    Status::Ok,
                    TransferReply {
                        from_balance,
                        to_balance,
                    }
                    .encode(),
                )
            }
            Err(e) => (e.status(), Vec::new()),
        }
    }

    fn handle_monitor_register(&mut self, body: &[u8], peer: SocketAddr) -> (Status, Vec<u8>) {
        let req = match MonitorRequest::decode(body) {
            Ok(r) => r,
            Err(e) => {
                tracing::debug!("malformed MONITOR_REGISTER body: {}", e);
                return (Status::BadRequest, Vec::new());
            }
        };
        if req.seconds == 0 {
            return (Status::BadRequest, Vec::new());
        }

        self.monitors
            .register(peer, std::time::Duration::from_secs(u64::from(req.seconds)));
        tracing::info!("MONITOR_REGISTER: {} for {}s", peer, req.seconds);
        self.encode_info(Status::Ok, &format!("monitor registered for {}s", req.seconds))
    }

    fn encode_info(&self, status: Status, info: &str) -> (Status, Vec<u8>) {
        match (InfoReply { info: info.to_owned() }).encode() {
            Ok(body) => (status, body),
            Err(e) => {
                tracing::warn!("failed to encode info reply: {}", e);
                (Status::BadRequest, Vec::new())
            }
        }
    }

    /// Send one CALLBACK_UPDATE datagram per event per surviving monitor
    /// entry. Best-effort: never cached, never retried.
    async fn fan_out(&mut self, events: &[CallbackEvent]) {
        if events.is_empty() {
            return;
        }
        let peers: Vec<SocketAddr> = self.monitors.peers().collect();
        if peers.is_empty() {
            return;
        }

        for event in events {
            let update = CallbackUpdate {
                update_type: event.update_type as u16,
                account_no: event.account_no,
                currency: event.currency,
                new_balance: event.new_balance,
                info: event.info.clone(),
            };
            let body = match update.encode() {
                Ok(b) => b,
                Err(e) => {
                    tracing::warn!("failed to encode callback: {}", e);
                    continue;
                }
            };
            let bytes = protocol::encode(&Message::callback(body));

            for peer in &peers {
                match self.socket.send_to(&bytes, peer).await {
                    Ok(_) => tracing::info!(
                        "CALLBACK sent to {}: {} acc={}",
                        peer,
                        event.update_type,
                        event.account_no
                    ),
                    Err(e) => tracing::warn!("failed to send callback to {}: {}", peer, e),
                }
            }
        }
    }

    fn draw(&self) -> f64 {
        rand::thread_rng().gen::<f64>()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::net::UdpSocket;
    use tokio::time::timeout;

    use super::*;
    use crate::network::{Client, ClientConfig, ClientError, Semantics};
    use crate::protocol::{BalanceReply, FLAG_AT_MOST_ONCE};

    async fn spawn_server(config: ServerConfig) -> SocketAddr {
        let server = Server::bind(config, Bank::new()).await.unwrap();
        let port = server.local_addr().unwrap().port();
        tokio::spawn(server.run());
        format!("127.0.0.1:{}", port).parse().unwrap()
    }

    async fn connect(addr: SocketAddr, semantics: Semantics) -> Client {
        Client::connect(ClientConfig {
            server_addr: addr,
            semantics,
            timeout: Duration::from_millis(500),
            retry: 3,
        })
        .await
        .unwrap()
    }

    async fn send_recv_bytes(sock: &UdpSocket, datagram: &[u8]) -> Vec<u8> {
        sock.send(datagram).await.unwrap();
        let mut buf = [0u8; RECV_BUF_SIZE];
        let len = timeout(Duration::from_secs(2), sock.recv(&mut buf))
            .await
            .expect("no reply within 2s")
            .unwrap();
        buf[..len].to_vec()
    }

    fn deposit_request(request_id: u64, flags: u16, amount: f64) -> Vec<u8> {
        let body = AmountRequest {
            name: "alice".into(),
            account_no: 10001,
            password: "secret".into(),
            currency: Currency::Cny,
            amount,
        }
        .encode()
        .unwrap();
        protocol::encode(&Message::request(OpCode::Deposit, flags, request_id, body))
    }

    #[tokio::test]
    async fn open_then_query_balance() {
        let addr = spawn_server(ServerConfig { port: 0, ..Default::default() }).await;
        let client = connect(addr, Semantics::AtLeastOnce).await;

        let opened = client
            .open("alice", "secret", Currency::Cny, 100.0)
            .await
            .unwrap();
        assert_eq!(opened.account_no, 10001);
        assert_eq!(opened.balance, 100.0);

        let q = client.query_balance("alice", 10001, "secret").await.unwrap();
        assert_eq!(q.currency, Currency::Cny);
        assert_eq!(q.balance, 100.0);
    }

    #[tokio::test]
    async fn overdraft_is_rejected_and_balance_unchanged() {
        let addr = spawn_server(ServerConfig { port: 0, ..Default::default() }).await;
        let client = connect(addr, Semantics::AtMostOnce).await;
        client
            .open("alice", "secret", Currency::Cny, 100.0)
            .await
            .unwrap();

        let err = client
            .withdraw("alice", 10001, "secret", Currency::Cny, 150.0)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ClientError::Status(Status::InsufficientFunds)
        ));

        let q = client.query_balance("alice", 10001, "secret").await.unwrap();
        assert_eq!(q.balance, 100.0);
    }

    #[tokio::test]
    async fn at_most_once_retransmit_executes_once_and_replays_identical_bytes() {
        let addr = spawn_server(ServerConfig { port: 0, ..Default::default() }).await;
        let client = connect(addr, Semantics::AtMostOnce).await;
        client
            .open("alice", "secret", Currency::Cny, 100.0)
            .await
            .unwrap();

        let sock = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        sock.connect(addr).await.unwrap();
        let datagram = deposit_request(777, FLAG_AT_MOST_ONCE, 10.0);

        let first = send_recv_bytes(&sock, &datagram).await;
        let second = send_recv_bytes(&sock, &datagram).await;
        assert_eq!(first, second, "replay must be bit-identical");

        let rep = protocol::decode(&first).unwrap();
        assert_eq!(rep.status, Status::Ok as u16);
        assert_eq!(rep.request_id, 777);
        assert_eq!(BalanceReply::decode(&rep.body).unwrap().new_balance, 110.0);

        // The deposit applied exactly once.
        let q = client.query_balance("alice", 10001, "secret").await.unwrap();
        assert_eq!(q.balance, 110.0);
    }

    #[tokio::test]
    async fn at_least_once_retransmit_executes_again() {
        let addr = spawn_server(ServerConfig { port: 0, ..Default::default() }).await;
        let client = connect(addr, Semantics::AtLeastOnce).await;
        client
            .open("alice", "secret", Currency::Cny, 100.0)
            .await
            .unwrap();

        let sock = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        sock.connect(addr).await.unwrap();
        let datagram = deposit_request(778, 0, 10.0);

        let first = protocol::decode(&send_recv_bytes(&sock, &datagram).await).unwrap();
        let second = protocol::decode(&send_recv_bytes(&sock, &datagram).await).unwrap();
        assert_eq!(BalanceReply::decode(&first.body).unwrap().new_balance, 110.0);
        assert_eq!(BalanceReply::decode(&second.body).unwrap().new_balance, 120.0);

        let q = client.query_balance("alice", 10001, "secret").await.unwrap();
        assert_eq!(q.balance, 120.0);
    }

    #[tokio::test]
    async fn retransmit_after_dedup_ttl_expiry_re_executes() {
        let addr = spawn_server(ServerConfig {
            port: 0,
            dedup_ttl: Duration::from_millis(200),
            ..Default::default()
        })
        .await;
        let client = connect(addr, Semantics::AtMostOnce).await;
        client
            .open("alice", "secret", Currency::Cny, 100.0)
            .await
            .unwrap();

        let sock = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        sock.connect(addr).await.unwrap();
        let datagram = deposit_request(779, FLAG_AT_MOST_ONCE, 10.0);

        let first = protocol::decode(&send_recv_bytes(&sock, &datagram).await).unwrap();
        assert_eq!(BalanceReply::decode(&first.body).unwrap().new_balance, 110.0);

        tokio::time::sleep(Duration::from_millis(400)).await;

        // Outside the window at-most-once degrades to re-execution.
        let second = protocol::decode(&send_recv_bytes(&sock, &datagram).await).unwrap();
        assert_eq!(BalanceReply::decode(&second.body).unwrap().new_balance, 120.0);
    }

    #[tokio::test]
    async fn transfer_sends_two_callbacks_per_monitor_in_order() {
        let addr = spawn_server(ServerConfig { port: 0, ..Default::default() }).await;
        let a = connect(addr, Semantics::AtMostOnce).await;
        a.open("alice", "secret", Currency::Cny, 100.0).await.unwrap();
        a.open("bob", "hunter2", Currency::Cny, 50.0).await.unwrap();

        let b = connect(addr, Semantics::AtMostOnce).await;
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let watcher = tokio::spawn(async move {
            b.monitor(2, |update| {
                let _ = tx.send(update);
            })
            .await
            .unwrap();
        });
        // Let the registration land before mutating.
        tokio::time::sleep(Duration::from_millis(300)).await;

        let rep = a
            .transfer("alice", 10001, "secret", 10002, Currency::Cny, 25.0)
            .await
            .unwrap();
        assert_eq!(rep.from_balance, 75.0);
        assert_eq!(rep.to_balance, 75.0);

        watcher.await.unwrap();

        let mut updates = Vec::new();
        while let Ok(u) = rx.try_recv() {
            updates.push(u);
        }
        assert_eq!(updates.len(), 2);
        assert!(updates.iter().all(|u| u.update_type == OpCode::Transfer as u16));
        assert_eq!(updates[0].account_no, 10001);
        assert_eq!(updates[0].new_balance, 75.0);
        assert_eq!(updates[1].account_no, 10002);
        assert_eq!(updates[1].new_balance, 75.0);
    }

    #[tokio::test]
    async fn no_callbacks_after_the_monitor_window() {
        let addr = spawn_server(ServerConfig { port: 0, ..Default::default() }).await;
        let a = connect(addr, Semantics::AtMostOnce).await;
        a.open("alice", "secret", Currency::Cny, 100.0).await.unwrap();

        let b = connect(addr, Semantics::AtMostOnce).await;
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let watcher = tokio::spawn(async move {
            b.monitor(1, |update| {
                let _ = tx.send(update);
            })
            .await
            .unwrap();
        });
        watcher.await.unwrap();

        // The window is over; this deposit must not reach the monitor.
        a.deposit("alice", 10001, "secret", Currency::Cny, 5.0)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn bad_magic_is_dropped_silently() {
        let addr = spawn_server(ServerConfig { port: 0, ..Default::default() }).await;

        let sock = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        sock.connect(addr).await.unwrap();
        let mut garbage = protocol::encode(&Message::request(OpCode::QueryBalance, 0, 1, Vec::new()));
        garbage[..4].copy_from_slice(&[0, 0, 0, 0]);
        sock.send(&garbage).await.unwrap();

        let mut buf = [0u8; 64];
        assert!(
            timeout(Duration::from_millis(400), sock.recv(&mut buf))
                .await
                .is_err(),
            "server must send nothing for a foreign datagram"
        );

        // The loop is still alive.
        let client = connect(addr, Semantics::AtLeastOnce).await;
        client.open("alice", "secret", Currency::Cny, 0.0).await.unwrap();
    }

    #[tokio::test]
    async fn unknown_opcode_yields_bad_request_with_empty_body() {
        let addr = spawn_server(ServerConfig { port: 0, ..Default::default() }).await;
        let sock = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        sock.connect(addr).await.unwrap();

        let req = Message {
            version: PROTOCOL_VERSION,
            msg_type: MsgType::Request as u8,
            op_code: 42,
            flags: 0,
            status: 0,
            request_id: 5,
            body: Vec::new(),
        };
        let rep = protocol::decode(&send_recv_bytes(&sock, &protocol::encode(&req)).await).unwrap();
        assert_eq!(rep.status, Status::BadRequest as u16);
        assert_eq!(rep.op_code, 42);
        assert_eq!(rep.request_id, 5);
        assert!(rep.body.is_empty());
    }

    #[tokio::test]
    async fn non_request_messages_are_ignored() {
        let addr = spawn_server(ServerConfig { port: 0, ..Default::default() }).await;
        let sock = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        sock.connect(addr).await.unwrap();

        let not_a_request = Message {
            version: PROTOCOL_VERSION,
            msg_type: MsgType::Reply as u8,
            op_code: OpCode::Deposit as u16,
            flags: 0,
            status: 0,
            request_id: 9,
            body: Vec::new(),
        };
        sock.send(&protocol::encode(&not_a_request)).await.unwrap();

        let mut buf = [0u8; 64];
        assert!(timeout(Duration::from_millis(400), sock.recv(&mut buf))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn monitor_register_rejects_zero_seconds() {
        let addr = spawn_server(ServerConfig { port: 0, ..Default::default() }).await;
        let sock = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        sock.connect(addr).await.unwrap();

        let body = MonitorRequest { seconds: 0 }.encode();
        let req = Message::request(OpCode::MonitorRegister, 0, 11, body);
        let rep = protocol::decode(&send_recv_bytes(&sock, &protocol::encode(&req)).await).unwrap();
        assert_eq!(rep.status, Status::BadRequest as u16);
        assert!(rep.body.is_empty());
    }

    #[tokio::test]
    async fn full_request_loss_exhausts_client_retries() {
        let addr = spawn_server(ServerConfig {
            port: 0,
            loss_req: 1.0,
            ..Default::default()
        })
        .await;
        let client = Client::connect(ClientConfig {
            server_addr: addr,
            semantics: Semantics::AtMostOnce,
            timeout: Duration::from_millis(100),
            retry: 2,
        })
        .await
        .unwrap();

        let err = client
            .query_balance("alice", 10001, "secret")
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Exhausted(2)));
    }
}
