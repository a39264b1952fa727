//! Sample aggregate used across the test suites: a minimal bank account.

use eventide_core::aggregate::{AggregateRoot, EventSourcingState, unhandled_event};
use eventide_core::clock::Clock;
use eventide_core::error::DomainError;
use eventide_core::event::{DomainEvent, EventKind};
use eventide_core::registry::AggregateRegistry;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Event type identifier for [`AccountEventKind::AccountOpened`].
pub const ACCOUNT_OPENED_EVENT_TYPE: &str = "account.opened";

/// Event type identifier for [`AccountEventKind::FundsDeposited`].
pub const FUNDS_DEPOSITED_EVENT_TYPE: &str = "account.funds_deposited";

/// Event type identifier for [`AccountEventKind::FundsWithdrawn`].
pub const FUNDS_WITHDRAWN_EVENT_TYPE: &str = "account.funds_withdrawn";

/// Event type identifier for [`AccountEventKind::InterestAccrued`].
pub const INTEREST_ACCRUED_EVENT_TYPE: &str = "account.interest_accrued";

/// Event payload variants for [`BankAccount`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountEventKind {
    /// The account was opened.
    AccountOpened {
        /// Account holder.
        owner: String,
    },
    /// Money was paid in.
    FundsDeposited {
        /// Amount in cents.
        amount: i64,
    },
    /// Money was paid out.
    FundsWithdrawn {
        /// Amount in cents.
        amount: i64,
    },
    /// Retired event type that `BankAccount` no longer handles.
    InterestAccrued {
        /// Amount in cents.
        amount: i64,
    },
}

impl EventKind for AccountEventKind {
    fn event_type(&self) -> &'static str {
        match self {
            Self::AccountOpened { .. } => ACCOUNT_OPENED_EVENT_TYPE,
            Self::FundsDeposited { .. } => FUNDS_DEPOSITED_EVENT_TYPE,
            Self::FundsWithdrawn { .. } => FUNDS_WITHDRAWN_EVENT_TYPE,
            Self::InterestAccrued { .. } => INTEREST_ACCRUED_EVENT_TYPE,
        }
    }
}

/// The aggregate root for a bank account.
#[derive(Debug, Clone)]
pub struct BankAccount {
    sourcing: EventSourcingState<AccountEventKind>,
    /// Account holder, set once opened.
    pub owner: Option<String>,
    /// Balance in cents.
    pub balance: i64,
}

impl BankAccount {
    /// Creates an empty account with no history.
    #[must_use]
    pub fn new(id: Uuid) -> Self {
        Self {
            sourcing: EventSourcingState::new(id),
            owner: None,
            balance: 0,
        }
    }

    /// Opens a new account, producing an `AccountOpened` event.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if `owner` is blank.
    pub fn open(id: Uuid, owner: &str, clock: &dyn Clock) -> Result<Self, DomainError> {
        if owner.trim().is_empty() {
            return Err(DomainError::Validation("owner must not be blank".into()));
        }
        let mut account = Self::new(id);
        account.record(
            AccountEventKind::AccountOpened {
                owner: owner.to_owned(),
            },
            clock,
        )?;
        Ok(account)
    }

    /// Deposits money, producing a `FundsDeposited` event.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` for non-positive amounts or an
    /// account that was never opened.
    pub fn deposit(&mut self, amount: i64, clock: &dyn Clock) -> Result<(), DomainError> {
        self.ensure_open()?;
        if amount <= 0 {
            return Err(DomainError::Validation("deposit must be positive".into()));
        }
        self.record(AccountEventKind::FundsDeposited { amount }, clock)
    }

    /// Withdraws money, producing a `FundsWithdrawn` event.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` for non-positive amounts, an
    /// account that was never opened, or insufficient funds.
    pub fn withdraw(&mut self, amount: i64, clock: &dyn Clock) -> Result<(), DomainError> {
        self.ensure_open()?;
        if amount <= 0 {
            return Err(DomainError::Validation("withdrawal must be positive".into()));
        }
        if amount > self.balance {
            return Err(DomainError::Validation(format!(
                "insufficient funds: balance {}, requested {amount}",
                self.balance
            )));
        }
        self.record(AccountEventKind::FundsWithdrawn { amount }, clock)
    }

    /// Applies a new event of the given kind.
    ///
    /// # Errors
    ///
    /// Propagates errors from [`AggregateRoot::apply`].
    pub fn record(&mut self, kind: AccountEventKind, clock: &dyn Clock) -> Result<(), DomainError> {
        self.apply(DomainEvent::new(kind, clock.now()), true)
    }

    fn ensure_open(&self) -> Result<(), DomainError> {
        if self.owner.is_none() {
            return Err(DomainError::Validation("account is not open".into()));
        }
        Ok(())
    }
}

impl AggregateRoot for BankAccount {
    type Kind = AccountEventKind;
    const AGGREGATE_TYPE: &'static str = "BankAccount";

    fn sourcing(&self) -> &EventSourcingState<AccountEventKind> {
        &self.sourcing
    }

    fn sourcing_mut(&mut self) -> &mut EventSourcingState<AccountEventKind> {
        &mut self.sourcing
    }

    fn when(&mut self, event: &DomainEvent<AccountEventKind>) -> Result<(), DomainError> {
        match &event.kind {
            AccountEventKind::AccountOpened { owner } => {
                self.owner = Some(owner.clone());
            }
            AccountEventKind::FundsDeposited { amount } => {
                self.balance += amount;
            }
            AccountEventKind::FundsWithdrawn { amount } => {
                self.balance -= amount;
            }
            AccountEventKind::InterestAccrued { .. } => {
                return Err(unhandled_event::<Self>(event));
            }
        }
        Ok(())
    }
}

/// Registry with [`BankAccount`] registered.
#[must_use]
pub fn account_registry() -> AggregateRegistry {
    AggregateRegistry::new().with(BankAccount::new)
}
