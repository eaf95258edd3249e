//! Outbound value transfer seam
//!
//! The ledger holds escrowed balances but never moves value itself; refunds
//! and withdrawals leave through this trait. The host environment provides
//! the production implementation (an external collaborator); the gateways
//! below cover embedding without payouts and testing.

use crate::error::{Error, Result};
use crate::types::{AccountId, Amount};
use parking_lot::Mutex;

/// External value transfer primitive
///
/// A transfer must be all-or-nothing; a returned error means no value moved
/// and the calling operation aborts with no observable state change.
pub trait TransferGateway: Send + Sync {
    /// Transfer `amount` to `to`
    fn transfer(&self, to: &AccountId, amount: Amount) -> Result<()>;
}

/// Gateway that accepts every transfer without side effects
#[derive(Debug, Default)]
pub struct NullGateway;

impl TransferGateway for NullGateway {
    fn transfer(&self, _to: &AccountId, _amount: Amount) -> Result<()> {
        Ok(())
    }
}

/// Gateway that records transfers for inspection
#[derive(Debug, Default)]
pub struct RecordingGateway {
    transfers: Mutex<Vec<(AccountId, Amount)>>,
}

impl RecordingGateway {
    /// Create an empty recording gateway
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all transfers performed so far
    pub fn transfers(&self) -> Vec<(AccountId, Amount)> {
        self.transfers.lock().clone()
    }

    /// Total amount transferred to `account`
    pub fn total_for(&self, account: &AccountId) -> Amount {
        self.transfers
            .lock()
            .iter()
            .filter(|(to, _)| to == account)
            .map(|(_, amount)| amount)
            .sum()
    }
}

impl TransferGateway for RecordingGateway {
    fn transfer(&self, to: &AccountId, amount: Amount) -> Result<()> {
        self.transfers.lock().push((to.clone(), amount));
        Ok(())
    }
}

/// Gateway that rejects every transfer
#[derive(Debug, Default)]
pub struct FailingGateway;

impl TransferGateway for FailingGateway {
    fn transfer(&self, to: &AccountId, amount: Amount) -> Result<()> {
        Err(Error::Transfer(format!(
            "gateway rejected transfer of {} to {}",
            amount, to
        )))
    }
}
