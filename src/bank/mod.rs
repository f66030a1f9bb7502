//! Bank module - the in-memory account store
//!
//! Owns every account and applies the operation contract: failures are
//! checked in a fixed priority order (existence, authentication, currency,
//! argument sanity, funds) so that, for example, a wrong password against a
//! missing account reports NOT_FOUND rather than AUTH. The server loop is
//! the sole owner, so no internal locking is needed.

use std::collections::HashMap;

use thiserror::Error;

use crate::protocol::{Currency, Status};

/// First account number handed out; numbers grow monotonically and are
/// never reused, even after a close.
const FIRST_ACCOUNT_NO: i32 = 10001;

/// Typed operation failures, each mapping onto one wire status code.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BankError {
    #[error("Account not found or already closed")]
    NotFound,

    #[error("Authentication failed")]
    AuthFailed,

    #[error("Currency mismatch")]
    CurrencyMismatch,

    #[error("{0}")]
    BadRequest(&'static str),

    #[error("Insufficient funds")]
    InsufficientFunds,

    #[error("Password must be 1..16 bytes")]
    PasswordFormat,
}

impl BankError {
    pub fn status(&self) -> Status {
        match self {
            BankError::NotFound => Status::NotFound,
            BankError::AuthFailed => Status::Auth,
            BankError::CurrencyMismatch => Status::Currency,
            BankError::BadRequest(_) => Status::BadRequest,
            BankError::InsufficientFunds => Status::InsufficientFunds,
            BankError::PasswordFormat => Status::PasswordFormat,
        }
    }
}

/// A bank account. `closed` is monotonic: once set it never clears, and a
/// closed account is treated as not-found by every operation.
#[derive(Debug, Clone, PartialEq)]
pub struct Account {
    pub account_no: i32,
    pub name: String,
    pub password: String,
    pub currency: Currency,
    pub balance: f64,
    pub closed: bool,
}

/// The account store. State lives only in memory and vanishes with the
/// server process.
#[derive(Debug)]
pub struct Bank {
    accounts: HashMap<i32, Account>,
    next_account_no: i32,
}

impl Bank {
    pub fn new() -> Self {
        Bank {
            accounts: HashMap::new(),
            next_account_no: FIRST_ACCOUNT_NO,
        }
    }

    /// Open a new account, returning its number and starting balance.
    pub fn open(
        &mut self,
        name: &str,
        password: &str,
        currency: Currency,
        initial: f64,
    ) -> Result<(i32, f64), BankError> {
        if password.is_empty() || password.len() > 16 {
            return Err(BankError::PasswordFormat);
        }
        if initial < 0.0 {
            return Err(BankError::BadRequest("initial balance cannot be negative"));
        }

        let account_no = self.next_account_no;
        self.next_account_no += 1;
        self.accounts.insert(
            account_no,
            Account {
                account_no,
                name: name.to_owned(),
                password: password.to_owned(),
                currency,
                balance: initial,
                closed: false,
            },
        );
        Ok((account_no, initial))
    }

    /// Close an account, returning its currency and final balance.
    ///
    /// The balance is read back after the account is marked closed; close
    /// does not alter it.
    pub fn close(
        &mut self,
        name: &str,
        account_no: i32,
        password: &str,
    ) -> Result<(Currency, f64), BankError> {
        let account = self
            .accounts
            .get_mut(&account_no)
            .filter(|a| !a.closed)
            .ok_or(BankError::NotFound)?;
        if !(account.name == name && account.password == password) {
            return Err(BankError::AuthFailed);
        }

        account.closed = true;
        Ok((account.currency, account.balance))
    }

    /// Deposit a positive amount, returning the new balance.
    pub fn deposit(
        &mut self,
        name: &str,
        account_no: i32,
        password: &str,
        currency: Currency,
        amount: f64,
    ) -> Result<f64, BankError> {
        let account = Self::authenticated_mut(&mut self.accounts, name, account_no, password)?;
        if account.currency != currency {
            return Err(BankError::CurrencyMismatch);
        }
        if amount <= 0.0 {
            return Err(BankError::BadRequest("amount must be positive"));
        }

        account.balance += amount;
        Ok(account.balance)
    }

    /// Withdraw a positive amount no greater than the balance, returning
    /// the new balance.
    pub fn withdraw(
        &mut self,
        name: &str,
        account_no: i32,
        password: &str,
        currency: Currency,
        amount: f64,
    ) -> Result<f64, BankError> {
        let account = Self::authenticated_mut(&mut self.accounts, name, account_no, password)?;
        if account.currency != currency {
            return Err(BankError::CurrencyMismatch);
        }
        if amount <= 0.0 {
            return Err(BankError::BadRequest("amount must be positive"));
        }
        if account.balance < amount {
            return Err(BankError::InsufficientFunds);
        }

        account.balance -= amount;
        Ok(account.balance)
    }

    /// Read an account's currency and balance.
    pub fn query_balance(
        &self,
        name: &str,
        account_no: i32,
        password: &str,
    ) -> Result<(Currency, f64), BankError> {
        let account = self
            .accounts
            .get(&account_no)
            .filter(|a| !a.closed)
            .ok_or(BankError::NotFound)?;
        if !(account.name == name && account.password == password) {
            return Err(BankError::AuthFailed);
        }
        Ok((account.currency, account.balance))
    }

    /// Move an amount between two accounts, returning both new balances
    /// (source first). Either both balances change or neither does: all
    /// checks complete before the first mutation.
    pub fn transfer(
        &mut self,
        name: &str,
        from_account: i32,
        password: &str,
        to_account: i32,
        currency: Currency,
        amount: f64,
    ) -> Result<(f64, f64), BankError> {
        let from = self
            .accounts
            .get(&from_account)
            .filter(|a| !a.closed)
            .ok_or(BankError::NotFound)?;
        let to = self
            .accounts
            .get(&to_account)
            .filter(|a| !a.closed)
            .ok_or(BankError::NotFound)?;
        if !(from.name == name && from.password == password) {
            return Err(BankError::AuthFailed);
        }
        if from.currency != currency || to.currency != currency {
            return Err(BankError::CurrencyMismatch);
        }
        if from_account == to_account {
            return Err(BankError::BadRequest("cannot transfer to the same account"));
        }
        if amount <= 0.0 {
            return Err(BankError::BadRequest("amount must be positive"));
        }
        if from.balance < amount {
            return Err(BankError::InsufficientFunds);
        }

        let from_balance = from.balance - amount;
        let to_balance = to.balance + amount;
        if let Some(a) = self.accounts.get_mut(&from_account) {
            a.balance = from_balance;
        }
        if let Some(a) = self.accounts.get_mut(&to_account) {
            a.balance = to_balance;
        }
        Ok((from_balance, to_balance))
    }

    fn authenticated_mut<'a>(
        accounts: &'a mut HashMap<i32, Account>,
        name: &str,
        account_no: i32,
        password: &str,
    ) -> Result<&'a mut Account, BankError> {
        let account = accounts
            .get_mut(&account_no)
            .filter(|a| !a.closed)
            .ok_or(BankError::NotFound)?;
        if !(account.name == name && account.password == password) {
            return Err(BankError::AuthFailed);
        }
        Ok(account)
    }
}

impl Default for Bank {
    fn default() -> Self {
        Self::new()
    }
}
