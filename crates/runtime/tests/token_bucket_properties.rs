//! Property-based coverage of `AsyncTokenBucket` for spec §8 invariants 1–2:
//! reserved load never exceeds capacity, and refunds never drive load below
//! zero or credit past the reservation's remaining weight.

use std::time::Duration;

use factcheck_runtime::token_bucket::AsyncTokenBucket;
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Op {
    Acquire(u64),
    CreditFraction(usize, f32),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (1u64..=30).prop_map(Op::Acquire),
        (0usize..16, 0.0f32..=1.5).prop_map(|(idx, frac)| Op::CreditFraction(idx, frac)),
    ]
}

proptest! {
    /// For any schedule of acquires/refunds against a fixed-capacity bucket,
    /// `current_load` never exceeds `capacity` at any observed point.
    #[test]
    fn load_never_exceeds_capacity(ops in prop::collection::vec(op_strategy(), 1..40)) {
        let rt = tokio::runtime::Builder::new_current_thread().enable_time().build().unwrap();
        rt.block_on(async {
            let bucket = AsyncTokenBucket::new(100, Duration::from_secs(3600));
            let mut ids: Vec<u64> = Vec::new();

            for op in ops {
                match op {
                    Op::Acquire(weight) => {
                        // Skip reservations that could never fit; acquiring
                        // past capacity would suspend forever with no
                        // producer freeing space in this synchronous test.
                        if bucket.current_load().await + weight > bucket.capacity() {
                            continue;
                        }
                        let id = bucket.acquire(weight).await;
                        ids.push(id);
                    }
                    Op::CreditFraction(idx, frac) => {
                        if ids.is_empty() {
                            continue;
                        }
                        let id = ids[idx % ids.len()];
                        let refund = (frac * 10.0) as u64;
                        bucket.credit_by_id(id, refund).await;
                    }
                }
                prop_assert!(bucket.current_load().await <= bucket.capacity());
            }
        });
    }

    /// Refunding an event never drives the bucket's total load negative,
    /// regardless of how many times or how large the refund requested is.
    #[test]
    fn refund_never_goes_negative(weight in 1u64..=50, refund in 0u64..=200) {
        let rt = tokio::runtime::Builder::new_current_thread().enable_time().build().unwrap();
        rt.block_on(async {
            let bucket = AsyncTokenBucket::new(100, Duration::from_secs(3600));
            let id = bucket.acquire(weight).await;
            bucket.credit_by_id(id, refund).await;
            // in-window total is a u64; if it ever underflowed past zero the
            // saturating arithmetic in `purge_old`/`credit_by_id` would still
            // clamp to zero, so this also guards against silent wraparound.
            prop_assert!(bucket.current_load().await <= weight);
        });
    }
}

#[tokio::test]
async fn window_never_admits_more_than_capacity_within_one_window() {
    let bucket = AsyncTokenBucket::new(20, Duration::from_millis(500));
    let a = bucket.acquire(12).await;
    let b = bucket.acquire(8).await;
    assert_eq!(bucket.current_load().await, 20);

    bucket.credit_by_id(a, 12).await;
    bucket.credit_by_id(b, 8).await;
    assert_eq!(bucket.current_load().await, 0);

    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(bucket.current_load().await, 0);
}
