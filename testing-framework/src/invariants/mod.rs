//! Post-condition checks closing every scenario phase
//!
//! All checks are pure: they look at chain views and block summaries the
//! caller already captured and either pass or return
//! [`HarnessError::InvariantViolation`] carrying the views involved, so a
//! failure can be diagnosed without rerunning.
//!
//! - Mempool membership / non-membership of a transaction
//! - Block membership, and "mined exactly once" for identity transactions
//! - Tip equality / inequality and height relations between participants
//! - No-op reconnect (a view did not change) and convergence to a view
//! - Funding records anchored in mempool or chain

use crate::error::{HarnessError, HarnessResult, Violation};
use crate::funding::FundingRecord;
use crate::node::{BlockInfo, ChainView};
use minerid_common::crypto::Hash;

fn fail(check: &str, detail: String, views: &[&ChainView]) -> HarnessError {
    HarnessError::violation(
        Violation::new(check, detail).with_views(views.iter().map(|v| (*v).clone()).collect()),
    )
}

fn fail_tx(check: &str, detail: String, txid: &Hash, views: &[&ChainView]) -> HarnessError {
    HarnessError::violation(
        Violation::new(check, detail)
            .with_txid(*txid)
            .with_views(views.iter().map(|v| (*v).clone()).collect()),
    )
}

pub struct InvariantChecker;

impl InvariantChecker {
    pub fn tx_in_mempool(view: &ChainView, txid: &Hash) -> HarnessResult<()> {
        if view.mempool.contains(txid) {
            return Ok(());
        }
        Err(fail_tx(
            "tx_in_mempool",
            format!("transaction missing from the mempool of {}", view.label),
            txid,
            &[view],
        ))
    }

    pub fn tx_not_in_mempool(view: &ChainView, txid: &Hash) -> HarnessResult<()> {
        if !view.mempool.contains(txid) {
            return Ok(());
        }
        Err(fail_tx(
            "tx_not_in_mempool",
            format!("transaction still in the mempool of {}", view.label),
            txid,
            &[view],
        ))
    }

    pub fn tx_in_block(view: &ChainView, block: &BlockInfo, txid: &Hash) -> HarnessResult<()> {
        if block.txids.contains(txid) {
            return Ok(());
        }
        Err(fail_tx(
            "tx_in_block",
            format!(
                "block {} at height {} does not contain the transaction",
                block.hash, block.height
            ),
            txid,
            &[view],
        ))
    }

    /// The identity transaction left the mempool and sits in `block`
    /// exactly once. Present in both places, or in neither, is a bug in the
    /// node under test.
    pub fn mined_exactly_once(
        view: &ChainView,
        block: &BlockInfo,
        txid: &Hash,
    ) -> HarnessResult<()> {
        let in_block = block.txids.iter().filter(|id| *id == txid).count();
        let in_mempool = view.mempool.contains(txid);
        if in_block == 1 && !in_mempool {
            return Ok(());
        }
        Err(fail_tx(
            "mined_exactly_once",
            format!(
                "found {} time(s) in block {} at height {} and {} the mempool of {}",
                in_block,
                block.hash,
                block.height,
                if in_mempool { "also in" } else { "not in" },
                view.label
            ),
            txid,
            &[view],
        ))
    }

    pub fn tip_is(view: &ChainView, hash: &Hash) -> HarnessResult<()> {
        if view.tip_hash == *hash {
            return Ok(());
        }
        Err(fail(
            "tip_is",
            format!("{} expected tip {}", view.label, hash),
            &[view],
        ))
    }

    pub fn tips_equal(a: &ChainView, b: &ChainView) -> HarnessResult<()> {
        if a.same_tip(b) {
            return Ok(());
        }
        Err(fail(
            "tips_equal",
            format!("{} and {} report different tips", a.label, b.label),
            &[a, b],
        ))
    }

    pub fn tips_differ(a: &ChainView, b: &ChainView) -> HarnessResult<()> {
        if a.tip_hash != b.tip_hash {
            return Ok(());
        }
        Err(fail(
            "tips_differ",
            format!("{} and {} share tip {}", a.label, b.label, a.tip_hash),
            &[a, b],
        ))
    }

    pub fn heights_differ(a: &ChainView, b: &ChainView) -> HarnessResult<()> {
        if a.tip_height != b.tip_height {
            return Ok(());
        }
        Err(fail(
            "heights_differ",
            format!(
                "{} and {} are both at height {}",
                a.label, b.label, a.tip_height
            ),
            &[a, b],
        ))
    }

    pub fn height_eq(view: &ChainView, expected: u64) -> HarnessResult<()> {
        if view.tip_height == expected {
            return Ok(());
        }
        Err(fail(
            "height_eq",
            format!(
                "{} is at height {}, expected {}",
                view.label, view.tip_height, expected
            ),
            &[view],
        ))
    }

    pub fn height_at_most(view: &ChainView, max: u64) -> HarnessResult<()> {
        if view.tip_height <= max {
            return Ok(());
        }
        Err(fail(
            "height_at_most",
            format!(
                "{} is at height {}, expected at most {}",
                view.label, view.tip_height, max
            ),
            &[view],
        ))
    }

    /// No-op reconnect: the best chain holder kept its tip
    pub fn unchanged(before: &ChainView, after: &ChainView) -> HarnessResult<()> {
        if before.same_tip(after) {
            return Ok(());
        }
        Err(fail(
            "unchanged",
            format!(
                "{} moved from {}@{} to {}@{}",
                after.label, before.tip_hash, before.tip_height, after.tip_hash, after.tip_height
            ),
            &[before, after],
        ))
    }

    /// Every view holds the tip of `expected`
    pub fn converged_to(views: &[ChainView], expected: &ChainView) -> HarnessResult<()> {
        let strays: Vec<&ChainView> = views.iter().filter(|v| !v.same_tip(expected)).collect();
        if strays.is_empty() {
            return Ok(());
        }
        let labels: Vec<&str> = strays.iter().map(|v| v.label.as_str()).collect();
        let mut involved = vec![expected];
        involved.extend(strays);
        Err(fail(
            "converged_to",
            format!(
                "[{}] did not converge to {}@{} held by {}",
                labels.join(", "),
                expected.tip_hash,
                expected.tip_height,
                expected.label
            ),
            &involved,
        ))
    }

    /// A funding record exists and its split transaction is either pending
    /// in `view`'s mempool or `confirmed` on that participant's chain
    pub fn funding_anchored(
        view: &ChainView,
        record: Option<&FundingRecord>,
        confirmed: bool,
    ) -> HarnessResult<()> {
        let Some(record) = record else {
            return Err(fail(
                "funding_anchored",
                format!("{} has no funding record", view.label),
                &[view],
            ));
        };
        let txid = record.first_outpoint.txid;
        if confirmed || view.mempool.contains(&txid) {
            return Ok(());
        }
        Err(fail_tx(
            "funding_anchored",
            format!(
                "funding outpoint {} of {} is neither pending nor confirmed",
                record.first_outpoint, view.label
            ),
            &txid,
            &[view],
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use minerid_common::crypto::{hash256, KeyPair};
    use minerid_common::transaction::OutPoint;
    use std::collections::BTreeSet;

    fn view(label: &str, tip: u8, height: u64, mempool: &[Hash]) -> ChainView {
        ChainView {
            label: label.to_string(),
            tip_hash: hash256(&[tip]),
            tip_height: height,
            mempool: mempool.iter().copied().collect::<BTreeSet<_>>(),
        }
    }

    fn block(txids: Vec<Hash>) -> BlockInfo {
        BlockInfo {
            hash: hash256(b"block"),
            height: 106,
            time: 0,
            prev_hash: None,
            txids,
        }
    }

    fn violation(err: HarnessError) -> Violation {
        assert_eq!(err.kind(), ErrorKind::InvariantViolation);
        match err {
            HarnessError::InvariantViolation(v) => *v,
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn test_mined_exactly_once() {
        let tx = hash256(b"tx");
        let cb = hash256(b"coinbase");
        let mined = view("node0", 1, 106, &[]);
        InvariantChecker::mined_exactly_once(&mined, &block(vec![cb, tx]), &tx).unwrap();

        // in block and mempool at once
        let both = view("node0", 1, 106, &[tx]);
        let v = violation(
            InvariantChecker::mined_exactly_once(&both, &block(vec![cb, tx]), &tx).unwrap_err(),
        );
        assert_eq!(v.check, "mined_exactly_once");
        assert_eq!(v.txid, Some(tx));
        assert_eq!(v.views, vec![both]);

        // in neither
        assert!(InvariantChecker::mined_exactly_once(&mined, &block(vec![cb]), &tx).is_err());
    }

    #[test]
    fn test_mempool_membership() {
        let tx = hash256(b"tx");
        let pending = view("node1", 1, 5, &[tx]);
        let empty = view("node1", 1, 5, &[]);
        InvariantChecker::tx_in_mempool(&pending, &tx).unwrap();
        InvariantChecker::tx_not_in_mempool(&empty, &tx).unwrap();
        assert!(InvariantChecker::tx_in_mempool(&empty, &tx).is_err());
        assert!(InvariantChecker::tx_not_in_mempool(&pending, &tx).is_err());
        assert!(InvariantChecker::tx_in_block(&empty, &block(vec![]), &tx).is_err());
    }

    #[test]
    fn test_tip_relations_report_both_views() {
        let a = view("node0", 1, 107, &[]);
        let b = view("node1", 2, 111, &[]);
        InvariantChecker::tips_differ(&a, &b).unwrap();
        InvariantChecker::heights_differ(&a, &b).unwrap();

        let v = violation(InvariantChecker::tips_equal(&a, &b).unwrap_err());
        assert_eq!(v.views.len(), 2);
        assert!(v.to_string().contains("node0"));
        assert!(v.to_string().contains("node1"));

        assert!(InvariantChecker::tips_differ(&a, &a).is_err());
        assert!(InvariantChecker::heights_differ(&a, &view("node1", 3, 107, &[])).is_err());
    }

    #[test]
    fn test_heights() {
        let a = view("node0", 1, 107, &[]);
        InvariantChecker::height_eq(&a, 107).unwrap();
        InvariantChecker::height_at_most(&a, 107).unwrap();
        InvariantChecker::height_at_most(&a, 200).unwrap();
        assert!(InvariantChecker::height_eq(&a, 106).is_err());
        assert!(InvariantChecker::height_at_most(&a, 106).is_err());
    }

    #[test]
    fn test_convergence_and_noop_reconnect() {
        let winner = view("node1", 2, 111, &[]);
        let loser = view("node0", 1, 107, &[]);
        InvariantChecker::unchanged(&winner, &winner.clone()).unwrap();
        assert!(InvariantChecker::unchanged(&loser, &winner).is_err());

        let converged = vec![view("node0", 2, 111, &[]), view("node1", 2, 111, &[])];
        InvariantChecker::converged_to(&converged, &winner).unwrap();

        let v = violation(
            InvariantChecker::converged_to(&[loser.clone(), winner.clone()], &winner).unwrap_err(),
        );
        assert!(v.detail.contains("[node0]"));
        assert_eq!(v.views, vec![winner, loser]);
    }

    #[test]
    fn test_funding_anchored() {
        let key = KeyPair::from_seed(&[7]).unwrap();
        let split = hash256(b"split");
        let record = FundingRecord {
            destination: "mfake".to_string(),
            first_outpoint: OutPoint::new(split, 0),
            private_key: key,
        };
        let pending = view("node0", 1, 105, &[split]);
        let empty = view("node0", 1, 106, &[]);

        InvariantChecker::funding_anchored(&pending, Some(&record), false).unwrap();
        InvariantChecker::funding_anchored(&empty, Some(&record), true).unwrap();
        assert!(InvariantChecker::funding_anchored(&empty, Some(&record), false).is_err());
        assert!(InvariantChecker::funding_anchored(&pending, None, true).is_err());
    }
}
