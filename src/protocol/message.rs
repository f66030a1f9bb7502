//! Protocol message definitions
//!
//! The [`Message`] header enums plus the typed request/reply/callback
//! bodies for every operation. Bodies encode and decode themselves with
//! the primitives from the codec; field order is wire order.

use std::fmt;
use std::str::FromStr;

use bytes::{Buf, BufMut, BytesMut};

use super::codec::{
    self, try_get_f64, try_get_i32, try_get_u16, CodecError,
};
use super::{FLAG_AT_MOST_ONCE, PROTOCOL_VERSION};

/// The defined message-type values for the header discriminator.
///
/// The header field itself travels as a raw byte (see [`Message`]); like
/// the opcode, it is judged by the receiver rather than by the codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MsgType {
    Request = 1,
    Reply = 2,
    Callback = 3,
}

/// Operation codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum OpCode {
    Open = 1,
    Close = 2,
    Deposit = 3,
    Withdraw = 4,
    MonitorRegister = 5,
    QueryBalance = 6,
    Transfer = 7,
    CallbackUpdate = 100,
}

impl OpCode {
    pub fn from_u16(v: u16) -> Option<Self> {
        match v {
            1 => Some(OpCode::Open),
            2 => Some(OpCode::Close),
            3 => Some(OpCode::Deposit),
            4 => Some(OpCode::Withdraw),
            5 => Some(OpCode::MonitorRegister),
            6 => Some(OpCode::QueryBalance),
            7 => Some(OpCode::Transfer),
            100 => Some(OpCode::CallbackUpdate),
            _ => None,
        }
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OpCode::Open => "OPEN",
            OpCode::Close => "CLOSE",
            OpCode::Deposit => "DEPOSIT",
            OpCode::Withdraw => "WITHDRAW",
            OpCode::MonitorRegister => "MONITOR_REGISTER",
            OpCode::QueryBalance => "QUERY_BALANCE",
            OpCode::Transfer => "TRANSFER",
            OpCode::CallbackUpdate => "CALLBACK_UPDATE",
        };
        f.write_str(name)
    }
}

/// Result codes carried in the reply header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Status {
    Ok = 0,
    BadRequest = 1,
    Auth = 2,
    NotFound = 3,
    Currency = 4,
    InsufficientFunds = 5,
    PasswordFormat = 6,
}

impl Status {
    pub fn from_u16(v: u16) -> Option<Self> {
        match v {
            0 => Some(Status::Ok),
            1 => Some(Status::BadRequest),
            2 => Some(Status::Auth),
            3 => Some(Status::NotFound),
            4 => Some(Status::Currency),
            5 => Some(Status::InsufficientFunds),
            6 => Some(Status::PasswordFormat),
            _ => None,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Status::Ok => "OK",
            Status::BadRequest => "Request format error (BAD_REQUEST)",
            Status::Auth => "Authentication failed: name/account/password mismatch (AUTH)",
            Status::NotFound => "Account not found or already closed (NOT_FOUND)",
            Status::Currency => "Currency mismatch (CURRENCY)",
            Status::InsufficientFunds => "Insufficient funds (INSUFFICIENT_FUNDS)",
            Status::PasswordFormat => "Password format error: must be 1..16 bytes (PASSWORD_FORMAT)",
        };
        f.write_str(text)
    }
}

/// Account currencies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Currency {
    Cny = 0,
    Sgd = 1,
}

impl Currency {
    pub fn from_u16(v: u16) -> Option<Self> {
        match v {
            0 => Some(Currency::Cny),
            1 => Some(Currency::Sgd),
            _ => None,
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Currency::Cny => "CNY",
            Currency::Sgd => "SGD",
        })
    }
}

impl FromStr for Currency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "CNY" => Ok(Currency::Cny),
            "SGD" => Ok(Currency::Sgd),
            other => Err(format!("unknown currency '{other}' (expected CNY or SGD)")),
        }
    }
}

/// One protocol datagram, header fields plus opaque body bytes.
///
/// A reply echoes the request's opcode, flags and request id; a callback
/// always carries `request_id = 0`.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub version: u8,
    pub msg_type: u8,
    pub op_code: u16,
    pub flags: u16,
    pub status: u16,
    pub request_id: u64,
    pub body: Vec<u8>,
}

impl Message {
    pub fn request(op_code: OpCode, flags: u16, request_id: u64, body: Vec<u8>) -> Self {
        Message {
            version: PROTOCOL_VERSION,
            msg_type: MsgType::Request as u8,
            op_code: op_code as u16,
            flags,
            status: Status::Ok as u16,
            request_id,
            body,
        }
    }

    pub fn reply_to(req: &Message, status: Status, body: Vec<u8>) -> Self {
        Message {
            version: PROTOCOL_VERSION,
            msg_type: MsgType::Reply as u8,
            op_code: req.op_code,
            flags: req.flags,
            status: status as u16,
            request_id: req.request_id,
            body,
        }
    }

    pub fn callback(body: Vec<u8>) -> Self {
        Message {
            version: PROTOCOL_VERSION,
            msg_type: MsgType::Callback as u8,
            op_code: OpCode::CallbackUpdate as u16,
            flags: 0,
            status: Status::Ok as u16,
            request_id: 0,
            body,
        }
    }

    pub fn is_at_most_once(&self) -> bool {
        self.flags & FLAG_AT_MOST_ONCE != 0
    }
}

fn get_currency(buf: &mut impl Buf) -> Result<Currency, CodecError> {
    let raw = try_get_u16(buf)?;
    Currency::from_u16(raw).ok_or(CodecError::UnknownCurrency(raw))
}

// ==================== Request bodies ====================

/// OPEN request: name, password, currency, initial balance
#[derive(Debug, Clone, PartialEq)]
pub struct OpenRequest {
    pub name: String,
    pub password: String,
    pub currency: Currency,
    pub initial: f64,
}

impl OpenRequest {
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        let mut buf = BytesMut::new();
        codec::put_string(&mut buf, &self.name)?;
        codec::put_password16(&mut buf, &self.password)?;
        buf.put_u16(self.currency as u16);
        buf.put_f64(self.initial);
        Ok(buf.to_vec())
    }

    pub fn decode(mut body: &[u8]) -> Result<Self, CodecError> {
        Ok(OpenRequest {
            name: codec::get_string(&mut body)?,
            password: codec::get_password16(&mut body)?,
            currency: get_currency(&mut body)?,
            initial: try_get_f64(&mut body)?,
        })
    }
}

/// CLOSE request: name, account number, password
#[derive(Debug, Clone, PartialEq)]
pub struct CloseRequest {
    pub name: String,
    pub account_no: i32,
    pub password: String,
}

impl CloseRequest {
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        let mut buf = BytesMut::new();
        codec::put_string(&mut buf, &self.name)?;
        buf.put_i32(self.account_no);
        codec::put_password16(&mut buf, &self.password)?;
        Ok(buf.to_vec())
    }

    pub fn decode(mut body: &[u8]) -> Result<Self, CodecError> {
        Ok(CloseRequest {
            name: codec::get_string(&mut body)?,
            account_no: try_get_i32(&mut body)?,
            password: codec::get_password16(&mut body)?,
        })
    }
}

/// DEPOSIT / WITHDRAW request: name, account number, password, currency, amount
#[derive(Debug, Clone, PartialEq)]
pub struct AmountRequest {
    pub name: String,
    pub account_no: i32,
    pub password: String,
    pub currency: Currency,
    pub amount: f64,
}

impl AmountRequest {
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        let mut buf = BytesMut::new();
        codec::put_string(&mut buf, &self.name)?;
        buf.put_i32(self.account_no);
        codec::put_password16(&mut buf, &self.password)?;
        buf.put_u16(self.currency as u16);
        buf.put_f64(self.amount);
        Ok(buf.to_vec())
    }

    pub fn decode(mut body: &[u8]) -> Result<Self, CodecError> {
        Ok(AmountRequest {
            name: codec::get_string(&mut body)?,
            account_no: try_get_i32(&mut body)?,
            password: codec::get_password16(&mut body)?,
            currency: get_currency(&mut body)?,
            amount: try_get_f64(&mut body)?,
        })
    }
}

/// QUERY_BALANCE request: name, account number, password
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    pub name: String,
    pub account_no: i32,
    pub password: String,
}

impl QueryRequest {
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        let mut buf = BytesMut::new();
        codec::put_string(&mut buf, &self.name)?;
        buf.put_i32(self.account_no);
        codec::put_password16(&mut buf, &self.password)?;
        Ok(buf.to_vec())
    }

    pub fn decode(mut body: &[u8]) -> Result<Self, CodecError> {
        Ok(QueryRequest {
            name: codec::get_string(&mut body)?,
            account_no: try_get_i32(&mut body)?,
            password: codec::get_password16(&mut body)?,
        })
    }
}

/// TRANSFER request: name, source account, password, destination account,
/// currency, amount
#[derive(Debug, Clone, PartialEq)]
pub struct TransferRequest {
    pub name: String,
    pub from_account: i32,
    pub password: String,
    pub to_account: i32,
    pub currency: Currency,
    pub amount: f64,
}

impl TransferRequest {
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        let mut buf = BytesMut::new();
        codec::put_string(&mut buf, &self.name)?;
        buf.put_i32(self.from_account);
        codec::put_password16(&mut buf, &self.password)?;
        buf.put_i32(self.to_account);
        buf.put_u16(self.currency as u16);
        buf.put_f64(self.amount);
        Ok(buf.to_vec())
    }

    pub fn decode(mut body: &[u8]) -> Result<Self, CodecError> {
        Ok(TransferRequest {
            name: codec::get_string(&mut body)?,
            from_account: try_get_i32(&mut body)?,
            password: codec::get_password16(&mut body)?,
            to_account: try_get_i32(&mut body)?,
            currency: get_currency(&mut body)?,
            amount: try_get_f64(&mut body)?,
        })
    }
}

/// MONITOR_REGISTER request: subscription length in seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorRequest {
    pub seconds: u16,
}

impl MonitorRequest {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();
        buf.put_u16(self.seconds);
        buf.to_vec()
    }

    pub fn decode(mut body: &[u8]) -> Result<Self, CodecError> {
        Ok(MonitorRequest {
            seconds: try_get_u16(&mut body)?,
        })
    }
}

// ==================== Reply bodies ====================

/// OPEN reply: assigned account number and balance
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OpenReply {
    pub account_no: i32,
    pub balance: f64,
}

impl OpenReply {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();
        buf.put_i32(self.account_no);
        buf.put_f64(self.balance);
        buf.to_vec()
    }

    pub fn decode(mut body: &[u8]) -> Result<Self, CodecError> {
        Ok(OpenReply {
            account_no: try_get_i32(&mut body)?,
            balance: try_get_f64(&mut body)?,
        })
    }
}

/// Informational reply (CLOSE, MONITOR_REGISTER)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfoReply {
    pub info: String,
}

impl InfoReply {
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        let mut buf = BytesMut::new();
        codec::put_string(&mut buf, &self.info)?;
        Ok(buf.to_vec())
    }

    pub fn decode(mut body: &[u8]) -> Result<Self, CodecError> {
        Ok(InfoReply {
            info: codec::get_string(&mut body)?,
        })
    }
}

/// DEPOSIT / WITHDRAW reply: the new balance
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BalanceReply {
    pub new_balance: f64,
}

impl BalanceReply {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();
        buf.put_f64(self.new_balance);
        buf.to_vec()
    }

    pub fn decode(mut body: &[u8]) -> Result<Self, CodecError> {
        Ok(BalanceReply {
            new_balance: try_get_f64(&mut body)?,
        })
    }
}

/// QUERY_BALANCE reply: currency and balance
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QueryReply {
    pub currency: Currency,
    pub balance: f64,
}

impl QueryReply {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();
        buf.put_u16(self.currency as u16);
        buf.put_f64(self.balance);
        buf.to_vec()
    }

    pub fn decode(mut body: &[u8]) -> Result<Self, CodecError> {
        Ok(QueryReply {
            currency: get_currency(&mut body)?,
            balance: try_get_f64(&mut body)?,
        })
    }
}

/// TRANSFER reply: new balances of both affected accounts
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransferReply {
    pub from_balance: f64,
    pub to_balance: f64,
}

impl TransferReply {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();
        buf.put_f64(self.from_balance);
        buf.put_f64(self.to_balance);
        buf.to_vec()
    }

    pub fn decode(mut body: &[u8]) -> Result<Self, CodecError> {
        Ok(TransferReply {
            from_balance: try_get_f64(&mut body)?,
            to_balance: try_get_f64(&mut body)?,
        })
    }
}

// ==================== Callback body ====================

/// CALLBACK_UPDATE body announcing an account state change.
///
/// `update_type` is the opcode of the triggering operation.
#[derive(Debug, Clone, PartialEq)]
pub struct CallbackUpdate {
    pub update_type: u16,
    pub account_no: i32,
    pub currency: Currency,
    pub new_balance: f64,
    pub info: String,
}

impl CallbackUpdate {
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        let mut buf = BytesMut::new();
        buf.put_u16(self.update_type);
        buf.put_i32(self.account_no);
        buf.put_u16(self.currency as u16);
        buf.put_f64(self.new_balance);
        codec::put_string(&mut buf, &self.info)?;
        Ok(buf.to_vec())
    }

    pub fn decode(mut body: &[u8]) -> Result<Self, CodecError> {
        Ok(CallbackUpdate {
            update_type: try_get_u16(&mut body)?,
            account_no: try_get_i32(&mut body)?,
            currency: get_currency(&mut body)?,
            new_balance: try_get_f64(&mut body)?,
            info: codec::get_string(&mut body)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_request_round_trip() {
        let req = OpenRequest {
            name: "alice".into(),
            password: "secret".into(),
            currency: Currency::Cny,
            initial: 100.0,
        };
        let body = req.encode().unwrap();
        // 2 + 5 name bytes, 16 password, 2 currency, 8 initial
        assert_eq!(body.len(), 2 + 5 + 16 + 2 + 8);
        assert_eq!(OpenRequest::decode(&body).unwrap(), req);
    }

    #[test]
    fn transfer_request_round_trip() {
        let req = TransferRequest {
            name: "alice".into(),
            from_account: 10001,
            password: "secret".into(),
            to_account: 10002,
            currency: Currency::Sgd,
            amount: 25.0,
        };
        let body = req.encode().unwrap();
        assert_eq!(TransferRequest::decode(&body).unwrap(), req);
    }

    #[test]
    fn callback_update_round_trip() {
        let update = CallbackUpdate {
            update_type: OpCode::Transfer as u16,
            account_no: 10001,
            currency: Currency::Cny,
            new_balance: 75.0,
            info: "TRANSFER out 25 to 10002 by alice".into(),
        };
        let body = update.encode().unwrap();
        assert_eq!(CallbackUpdate::decode(&body).unwrap(), update);
    }

    #[test]
    fn amount_request_rejects_unknown_currency() {
        let req = AmountRequest {
            name: "alice".into(),
            account_no: 10001,
            password: "secret".into(),
            currency: Currency::Cny,
            amount: 1.0,
        };
        let mut body = req.encode().unwrap();
        // Currency field sits right after the name and password fields.
        let off = 2 + 5 + 4 + 16;
        body[off] = 0xff;
        body[off + 1] = 0xff;
        assert!(matches!(
            AmountRequest::decode(&body),
            Err(CodecError::UnknownCurrency(0xffff))
        ));
    }

    #[test]
    fn truncated_body_fails() {
        let req = QueryRequest {
            name: "alice".into(),
            account_no: 10001,
            password: "secret".into(),
        };
        let body = req.encode().unwrap();
        assert!(matches!(
            QueryRequest::decode(&body[..body.len() - 3]),
            Err(CodecError::Truncated)
        ));
    }

    #[test]
    fn reply_echoes_request_header() {
        let req = Message::request(OpCode::Deposit, FLAG_AT_MOST_ONCE, 42, Vec::new());
        let rep = Message::reply_to(&req, Status::InsufficientFunds, Vec::new());
        assert_eq!(rep.msg_type, MsgType::Reply as u8);
        assert_eq!(rep.op_code, req.op_code);
        assert_eq!(rep.flags, req.flags);
        assert_eq!(rep.request_id, req.request_id);
        assert_eq!(rep.status, Status::InsufficientFunds as u16);
    }

    #[test]
    fn callback_carries_zero_request_id() {
        let cb = Message::callback(Vec::new());
        assert_eq!(cb.msg_type, MsgType::Callback as u8);
        assert_eq!(cb.request_id, 0);
        assert_eq!(cb.op_code, OpCode::CallbackUpdate as u16);
        assert_eq!(cb.flags, 0);
    }

    #[test]
    fn semantics_flag_detection() {
        let plain = Message::request(OpCode::Open, 0, 1, Vec::new());
        assert!(!plain.is_at_most_once());
        let flagged = Message::request(OpCode::Open, FLAG_AT_MOST_ONCE, 1, Vec::new());
        assert!(flagged.is_at_most_once());
    }
}
