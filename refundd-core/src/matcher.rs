//! Amount/pattern matching for observed transactions.
//!
//! Pure predicates over transaction inputs/outputs. All amounts are raw
//! integer lovelace; there is no floating point anywhere on this path.
//!
//! Two deposit-proof variants exist in the wild and both are kept:
//! - deposit-to-script: an exact-amount output to the watched address,
//!   used by the refund loop;
//! - wallet-ownership: a round-trip self-payment, used only by the
//!   synchronous account-linking verification path.

use crate::indexer::TxUtxos;
use std::time::Duration;

/// A confirmed deposit-to-script match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepositMatch {
    /// The depositor: first input address that is not the watched address.
    pub sender: String,
    /// The matched deposit amount in lovelace.
    pub amount: u64,
}

/// Deposit-to-script pattern.
///
/// Matches when the transaction has at least one input from an address
/// other than the watched address, and at least one output paying the
/// watched address EXACTLY `required_amount`. "At least" amounts never
/// match; refunds are only issued for the fixed deposit.
pub fn matches_deposit_to_script(
    utxos: &TxUtxos,
    watched_address: &str,
    required_amount: u64,
) -> Option<DepositMatch> {
    let sender = utxos
        .inputs
        .iter()
        .find(|input| input.address != watched_address)?
        .address
        .clone();

    let paid_exactly = utxos
        .outputs
        .iter()
        .any(|output| output.address == watched_address && output.lovelace() == required_amount);

    paid_exactly.then_some(DepositMatch {
        sender,
        amount: required_amount,
    })
}

/// Wallet-ownership pattern.
///
/// A round-trip self-payment used as a proof-of-control signal: an input
/// from the wallet carrying at least `required_amount`, and an output back
/// to the same wallet of exactly `required_amount`.
pub fn matches_wallet_ownership(utxos: &TxUtxos, wallet_address: &str, required_amount: u64) -> bool {
    let funded = utxos
        .inputs
        .iter()
        .any(|input| input.address == wallet_address && input.lovelace() >= required_amount);

    let returned = utxos
        .outputs
        .iter()
        .any(|output| output.address == wallet_address && output.lovelace() == required_amount);

    funded && returned
}

/// Recency filter: a transaction older than `max_age` is ignored even when
/// it otherwise matches, bounding the indexer query window.
pub fn within_max_age(block_time: i64, now: i64, max_age: Duration) -> bool {
    now.saturating_sub(block_time) <= max_age.as_secs() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexer::{AssetAmount, TxIo};

    const SCRIPT: &str = "addr1_watched_script";
    const WALLET: &str = "addr1_depositor_wallet";
    const REQUIRED: u64 = 2_000_000;

    fn io(address: &str, lovelace: u64) -> TxIo {
        TxIo {
            address: address.to_string(),
            amount: vec![AssetAmount {
                unit: "lovelace".to_string(),
                quantity: lovelace.to_string(),
            }],
        }
    }

    fn utxos(inputs: Vec<TxIo>, outputs: Vec<TxIo>) -> TxUtxos {
        TxUtxos {
            hash: "tx0".to_string(),
            inputs,
            outputs,
        }
    }

    #[test]
    fn exact_amount_to_script_matches() {
        let tx = utxos(
            vec![io(WALLET, 2_200_000)],
            vec![io(SCRIPT, REQUIRED), io(WALLET, 150_000)],
        );
        let m = matches_deposit_to_script(&tx, SCRIPT, REQUIRED);
        assert_eq!(
            m,
            Some(DepositMatch {
                sender: WALLET.to_string(),
                amount: REQUIRED,
            })
        );
    }

    #[test]
    fn one_lovelace_under_never_matches() {
        let tx = utxos(vec![io(WALLET, 2_200_000)], vec![io(SCRIPT, REQUIRED - 1)]);
        assert!(matches_deposit_to_script(&tx, SCRIPT, REQUIRED).is_none());
    }

    #[test]
    fn one_lovelace_over_never_matches() {
        let tx = utxos(vec![io(WALLET, 2_200_000)], vec![io(SCRIPT, REQUIRED + 1)]);
        assert!(matches_deposit_to_script(&tx, SCRIPT, REQUIRED).is_none());
    }

    #[test]
    fn no_foreign_input_never_matches() {
        // Script paying itself is not a deposit.
        let tx = utxos(vec![io(SCRIPT, 3_000_000)], vec![io(SCRIPT, REQUIRED)]);
        assert!(matches_deposit_to_script(&tx, SCRIPT, REQUIRED).is_none());
    }

    #[test]
    fn output_to_other_address_never_matches() {
        let tx = utxos(vec![io(WALLET, 2_200_000)], vec![io(WALLET, REQUIRED)]);
        assert!(matches_deposit_to_script(&tx, SCRIPT, REQUIRED).is_none());
    }

    #[test]
    fn ownership_round_trip_matches() {
        let tx = utxos(
            vec![io(WALLET, 2_500_000)],
            vec![io(WALLET, REQUIRED), io(WALLET, 320_000)],
        );
        assert!(matches_wallet_ownership(&tx, WALLET, REQUIRED));
    }

    #[test]
    fn ownership_requires_sufficient_input() {
        let tx = utxos(vec![io(WALLET, REQUIRED - 1)], vec![io(WALLET, REQUIRED)]);
        assert!(!matches_wallet_ownership(&tx, WALLET, REQUIRED));
    }

    #[test]
    fn ownership_requires_exact_return_output() {
        let tx = utxos(vec![io(WALLET, 3_000_000)], vec![io(WALLET, REQUIRED + 1)]);
        assert!(!matches_wallet_ownership(&tx, WALLET, REQUIRED));
    }

    #[test]
    fn recency_filter_rejects_old_transactions() {
        let max_age = Duration::from_secs(3600);
        let now = 1_700_000_000;
        assert!(within_max_age(now - 3599, now, max_age));
        assert!(within_max_age(now - 3600, now, max_age));
        assert!(!within_max_age(now - 3601, now, max_age));
    }

    #[test]
    fn recency_filter_accepts_future_block_times() {
        // Clock skew between the indexer and us must not drop fresh deposits.
        let max_age = Duration::from_secs(3600);
        assert!(within_max_age(1_700_000_100, 1_700_000_000, max_age));
    }
}
