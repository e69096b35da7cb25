use failure::Fail;

pub type Result<T> = std::result::Result<T, failure::Error>;

/// Domain failures raised by the ledger.
///
/// Everything except the conditions listed in [`LedgerError::is_recoverable`] is an
/// invariant violation: the caller handed over inconsistent data or the index is corrupt.
#[derive(Debug, Fail, PartialEq, Eq)]
pub enum LedgerError {
    #[fail(display = "not enough funds: requested {}, available {}", requested, available)]
    InsufficientFunds { requested: i32, available: i64 },

    #[fail(display = "invalid address: {}", _0)]
    InvalidAddress(String),

    #[fail(display = "invalid amount: {}", _0)]
    InvalidAmount(i32),

    #[fail(display = "referenced transaction {} not found", _0)]
    MissingTransaction(String),

    #[fail(display = "transaction {} has no unspent output {}", txid, vout)]
    MissingOutput { txid: String, vout: i32 },

    #[fail(display = "no utxo entry for transaction {}", _0)]
    MissingUtxoEntry(String),

    #[fail(display = "malformed signature: expected {} bytes, got {}", expected, actual)]
    MalformedSignature { expected: usize, actual: usize },

    #[fail(display = "malformed key: expected {} bytes, got {}", expected, actual)]
    MalformedKey { expected: usize, actual: usize },

    #[fail(display = "transaction {} is already signed", _0)]
    AlreadySigned(String),

    #[fail(display = "transaction {} failed verification", _0)]
    InvalidTransaction(String),

    #[fail(display = "blockchain already exists")]
    ChainExists,

    #[fail(display = "no blockchain found, create one first")]
    ChainNotFound,

    #[fail(display = "no wallet for address {}", _0)]
    WalletNotFound(String),
}

impl LedgerError {
    /// Conditions a caller can report and move past without touching the chain.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            LedgerError::InsufficientFunds { .. }
                | LedgerError::InvalidAddress(_)
                | LedgerError::InvalidAmount(_)
                | LedgerError::WalletNotFound(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_split() {
        let funds = LedgerError::InsufficientFunds {
            requested: 10,
            available: 3,
        };
        assert!(funds.is_recoverable());
        assert!(!LedgerError::MissingTransaction("ab".to_string()).is_recoverable());
        assert!(!LedgerError::MissingUtxoEntry("ab".to_string()).is_recoverable());
    }

    #[test]
    fn test_downcast_through_failure_error() {
        let err: failure::Error = LedgerError::InvalidAmount(-1).into();
        assert_eq!(
            err.downcast_ref::<LedgerError>(),
            Some(&LedgerError::InvalidAmount(-1))
        );
        assert_eq!(err.to_string(), "invalid amount: -1");
    }
}
