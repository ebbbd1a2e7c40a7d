//! Delivery-record comparison tests: two engines fed the same traffic must
//! produce records that compare equal, and every mismatch kind must be
//! detected.

use lattice_consensus::test_utils::{App, AppError};
use lattice_types::H256;

const SECOND: i64 = 1_000_000_000;

fn hashes(tag: &str, n: usize) -> Vec<H256> {
    (0..n)
        .map(|i| H256::keccak256(format!("{tag}-{i}").as_bytes()))
        .collect()
}

/// Acks, records and delivers one total-ordering batch, timing each block
/// by its position in the deliver sequence.
fn feed_batch(app: &App, batch: &[H256], early: bool) {
    for hash in batch {
        app.ack(*hash);
    }
    app.total_order(batch.to_vec(), early);
    for hash in batch {
        let time = app.delivered_len() as i64 * SECOND;
        app.deliver(*hash, time);
    }
}

#[test]
fn test_compare() {
    let t1 = hashes("t1", 2);
    let t2 = hashes("t2", 3);
    let t3 = hashes("t3", 1);

    let app1 = App::new();
    feed_batch(&app1, &t1, false);
    feed_batch(&app1, &t2, false);
    feed_batch(&app1, &t3, false);
    assert!(app1.compare(&app1).is_ok());

    // A record with a different hash in the third batch.
    let app2 = App::new();
    feed_batch(&app2, &t1, false);
    feed_batch(&app2, &t2, false);
    feed_batch(&app2, &hashes("other", 1), false);
    assert_eq!(
        app1.compare(&app2),
        Err(AppError::MismatchBlockHashSequence)
    );

    // Identical hashes, but the last block delivered one second late.
    let app3 = App::new();
    feed_batch(&app3, &t1, false);
    feed_batch(&app3, &t2, false);
    for hash in &t3 {
        app3.ack(*hash);
    }
    app3.total_order(t3.clone(), false);
    let wrong_time = (app3.delivered_len() as i64 + 1) * SECOND;
    app3.deliver(t3[0], wrong_time);
    assert_eq!(app1.compare(&app3), Err(AppError::MismatchConsensusTime));
    assert_eq!(app3.compare(&app1), Err(AppError::MismatchConsensusTime));

    // An empty record compares to nothing.
    let app4 = App::new();
    assert_eq!(app4.compare(&app1), Err(AppError::EmptyDeliverSequence));
    assert_eq!(app1.compare(&app4), Err(AppError::EmptyDeliverSequence));
}

#[test]
fn test_verify() {
    let t1 = hashes("t1", 2);
    let t2 = hashes("t2", 3);

    let app1 = App::new();
    feed_batch(&app1, &t1, false);
    feed_batch(&app1, &t2, false);
    assert!(app1.verify().is_ok());

    // Delivering a block that was never strongly acked.
    app1.deliver(H256::keccak256(b"not-acked"), 10 * SECOND);
    assert_eq!(app1.verify(), Err(AppError::DeliveredBlockNotAcked));

    // Consensus time going backwards.
    let app2 = App::new();
    feed_batch(&app2, &t1, false);
    for hash in &t2 {
        app2.ack(*hash);
    }
    app2.total_order(t2.clone(), false);
    app2.deliver(t2[0], 0);
    assert_eq!(app2.verify(), Err(AppError::ConsensusTimestampOutOfOrder));

    // A delivered block missing from every total-ordering batch.
    let app3 = App::new();
    feed_batch(&app3, &t1, false);
    let stray = H256::keccak256(b"stray");
    app3.ack(stray);
    app3.deliver(stray, app3.delivered_len() as i64 * SECOND);
    assert_eq!(
        app3.verify(),
        Err(AppError::MismatchTotalOrderingAndDelivered)
    );
}
