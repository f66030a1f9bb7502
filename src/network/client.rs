//! Banking client
//!
//! The invoker builds a request with a fresh random request id, sends it,
//! and waits up to the configured timeout for a matching reply, retrying
//! up to the configured attempt count. Replies are matched on message type
//! and request id: UDP gives no ordering, at-least-once retries can
//! duplicate replies, and monitor callbacks arrive on the same socket, so
//! the request id is the only reliable discriminator.

use std::time::{Duration, Instant};

use rand::Rng;
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::time::timeout;

use super::{ClientConfig, Semantics};
use crate::protocol::{
    self, AmountRequest, BalanceReply, CallbackUpdate, CloseRequest, CodecError, Currency,
    InfoReply, Message, MonitorRequest, MsgType, OpCode, OpenReply, OpenRequest, QueryReply,
    QueryRequest, Status, TransferReply, TransferRequest, FLAG_AT_MOST_ONCE,
};

/// Receive buffer size, matching the server's.
const RECV_BUF_SIZE: usize = 2048;

/// Poll interval while waiting for monitor callbacks.
const MONITOR_POLL_TIMEOUT: Duration = Duration::from_secs(1);

/// Client errors
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Codec(#[from] CodecError),

    #[error("No reply after {0} attempts")]
    Exhausted(u32),

    #[error("Server returned: {0}")]
    Status(Status),

    #[error("Server returned unknown status code {0}")]
    UnknownStatus(u16),
}

pub type ClientResult<T> = Result<T, ClientError>;

/// One client endpoint talking to one server.
///
/// The monitor receiver reuses this same socket, which is why [`call`]
/// filters what it receives instead of trusting the next datagram.
///
/// [`call`]: Client::call
pub struct Client {
    socket: UdpSocket,
    config: ClientConfig,
}

impl Client {
    /// Bind an ephemeral local port and aim it at the server.
    pub async fn connect(config: ClientConfig) -> ClientResult<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.connect(config.server_addr).await?;
        tracing::debug!(
            "client {} -> {} sem={} timeout={:?} retry={}",
            socket.local_addr()?,
            config.server_addr,
            config.semantics,
            config.timeout,
            config.retry
        );
        Ok(Client { socket, config })
    }

    /// Send one request and wait for its reply.
    ///
    /// Returns the reply even when its status is non-OK; operation-level
    /// failures are surfaced, not retried. Only timeouts consume attempts.
    pub async fn call(&self, op_code: OpCode, body: Vec<u8>) -> ClientResult<Message> {
        let request_id: u64 = rand::thread_rng().gen();
        let flags = match self.config.semantics {
            Semantics::AtMostOnce => FLAG_AT_MOST_ONCE,
            Semantics::AtLeastOnce => 0,
        };
        let req = Message::request(op_code, flags, request_id, body);
        let datagram = protocol::encode(&req);
        tracing::debug!(
            "sending request op={} reqId={} totalLen={}",
            op_code,
            request_id,
            datagram.len()
        );

        for attempt in 1..=self.config.retry {
            self.socket.send(&datagram).await?;

            let mut buf = [0u8; RECV_BUF_SIZE];
            match timeout(self.config.timeout, self.socket.recv(&mut buf)).await {
                Err(_) => {
                    tracing::debug!(
                        "timeout waiting for reply, retry {}/{}",
                        attempt,
                        self.config.retry
                    );
                    continue;
                }
                Ok(Err(e)) => return Err(ClientError::Io(e)),
                Ok(Ok(len)) => {
                    let rep = match protocol::decode(&buf[..len]) {
                        Ok(m) => m,
                        Err(e) => {
                            tracing::debug!("ignoring undecodable datagram: {}", e);
                            continue;
                        }
                    };
                    if rep.msg_type != MsgType::Reply as u8 {
                        tracing::debug!("ignoring non-reply msgType={}", rep.msg_type);
                        continue;
                    }
                    if rep.request_id != request_id {
                        tracing::debug!(
                            "ignoring reply for other reqId={} (expect {})",
                            rep.request_id,
                            request_id
                        );
                        continue;
                    }
                    tracing::debug!(
                        "got reply op={} status={} reqId={}",
                        op_code,
                        status_name(rep.status),
                        rep.request_id
                    );
                    return Ok(rep);
                }
            }
        }

        Err(ClientError::Exhausted(self.config.retry))
    }

    // ==================== Typed operations ====================

    pub async fn open(
        &self,
        name: &str,
        password: &str,
        currency: Currency,
        initial: f64,
    ) -> ClientResult<OpenReply> {
        let body = OpenRequest {
            name: name.to_owned(),
            password: password.to_owned(),
            currency,
            initial,
        }
        .encode()?;
        let rep = self.call(OpCode::Open, body).await?;
        expect_ok(&rep)?;
        Ok(OpenReply::decode(&rep.body)?)
    }

    pub async fn close(
        &self,
        name: &str,
        account_no: i32,
        password: &str,
    ) -> ClientResult<InfoReply> {
        let body = CloseRequest {
            name: name.to_owned(),
            account_no,
            password: password.to_owned(),
        }
        .encode()?;
        let rep = self.call(OpCode::Close, body).await?;
        expect_ok(&rep)?;
        Ok(InfoReply::decode(&rep.body)?)
    }

    pub async fn deposit(
        &self,
        name: &str,
        account_no: i32,
        password: &str,
        currency: Currency,
        amount: f64,
    ) -> ClientResult<BalanceReply> {
        self.amount_op(OpCode::Deposit, name, account_no, password, currency, amount)
            .await
    }

    pub async fn withdraw(
        &self,
        name: &str,
        account_no: i32,
        password: &str,
        currency: Currency,
        amount: f64,
    ) -> ClientResult<BalanceReply> {
        self.amount_op(OpCode::Withdraw, name, account_no, password, currency, amount)
            .await
    }

    async fn amount_op(
        &self,
        op_code: OpCode,
        name: &str,
        account_no: i32,
        password: &str,
        currency: Currency,
        amount: f64,
    ) -> ClientResult<BalanceReply> {
        let body = AmountRequest {
            name: name.to_owned(),
            account_no,
            password: password.to_owned(),
            currency,
            amount,
        }
        .encode()?;
        let rep = self.call(op_code, body).await?;
        expect_ok(&rep)?;
        Ok(BalanceReply::decode(&rep.body)?)
    }

    pub async fn query_balance(
        &self,
        name: &str,
        account_no: i32,
        password: &str,
    ) -> ClientResult<QueryReply> {
        let body = QueryRequest {
            name: name.to_owned(),
            account_no,
            password: password.to_owned(),
        }
        .encode()?;
        let rep = self.call(OpCode::QueryBalance, body).await?;
        expect_ok(&rep)?;
        Ok(QueryReply::decode(&rep.body)?)
    }

    pub async fn transfer(
        &self,
        name: &str,
        from_account: i32,
        password: &str,
        to_account: i32,
        currency: Currency,
        amount: f64,
    ) -> ClientResult<TransferReply> {
        let body = TransferRequest {
            name: name.to_owned(),
            from_account,
            password: password.to_owned(),
            to_account,
            currency,
            amount,
        }
        .encode()?;
        let rep = self.call(OpCode::Transfer, body).await?;
        expect_ok(&rep)?;
        Ok(TransferReply::decode(&rep.body)?)
    }

    /// Register as a monitor for `seconds`, then surface every
    /// CALLBACK_UPDATE received on this socket until the window closes.
    ///
    /// The receive loop polls with a short timeout so the deadline is
    /// honored even when no callbacks arrive; everything that is not a
    /// callback is dropped. No other requests run on this socket while
    /// monitoring.
    pub async fn monitor(
        &self,
        seconds: u16,
        mut on_update: impl FnMut(CallbackUpdate),
    ) -> ClientResult<()> {
        let rep = self
            .call(OpCode::MonitorRegister, MonitorRequest { seconds }.encode())
            .await?;
        expect_ok(&rep)?;
        let ack = InfoReply::decode(&rep.body)?;
        tracing::info!("monitor registered: {}", ack.info);

        let deadline = Instant::now() + Duration::from_secs(u64::from(seconds));
        while Instant::now() < deadline {
            let mut buf = [0u8; RECV_BUF_SIZE];
            match timeout(MONITOR_POLL_TIMEOUT, self.socket.recv(&mut buf)).await {
                Err(_) => continue,
                Ok(Err(e)) => return Err(ClientError::Io(e)),
                Ok(Ok(len)) => {
                    let msg = match protocol::decode(&buf[..len]) {
                        Ok(m) => m,
                        Err(_) => continue,
                    };
                    if msg.msg_type != MsgType::Callback as u8
                        || msg.op_code != OpCode::CallbackUpdate as u16
                    {
                        continue;
                    }
                    match CallbackUpdate::decode(&msg.body) {
                        Ok(update) => on_update(update),
                        Err(e) => tracing::debug!("malformed callback body: {}", e),
                    }
                }
            }
        }
        Ok(())
    }
}

fn expect_ok(rep: &Message) -> ClientResult<()> {
    match Status::from_u16(rep.status) {
        Some(Status::Ok) => Ok(()),
        Some(status) => Err(ClientError::Status(status)),
        None => Err(ClientError::UnknownStatus(rep.status)),
    }
}

fn status_name(raw: u16) -> String {
    Status::from_u16(raw).map_or_else(|| format!("status={}", raw), |s| s.to_string())
}
