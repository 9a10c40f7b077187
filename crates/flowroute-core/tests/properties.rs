//! Property tests over random operation sequences.

mod common;

use std::collections::HashMap;

use common::{addr, Harness};
use flowroute_core::{Address, ErrorKind, FlowId, FlowRate};
use proptest::prelude::*;

// ---------------------------------------------------------------------------
// Strategies
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum Op {
    Create,
    SetRate { flow: usize, rate: i128, to: usize },
    Redirect { flow: usize, to: usize },
    Stop { flow: usize },
}

const RECIPIENTS: usize = 4;

fn recipient(i: usize) -> Address {
    addr(&format!("recipient-{}", i % RECIPIENTS))
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        Just(Op::Create),
        (0usize..8, -5i128..500, 0usize..RECIPIENTS)
            .prop_map(|(flow, rate, to)| Op::SetRate { flow, rate, to }),
        (0usize..8, 0usize..RECIPIENTS).prop_map(|(flow, to)| Op::Redirect { flow, to }),
        (0usize..8).prop_map(|flow| Op::Stop { flow }),
    ]
}

/// balance_of(addr) equals the number of active flows whose recipient is addr.
fn assert_balances(h: &Harness) -> Result<(), TestCaseError> {
    let mut expected: HashMap<Address, u64> = HashMap::new();
    for flow in h.registry.flows() {
        if let Some(r) = flow.active_recipient() {
            *expected.entry(r).or_default() += 1;
        }
    }
    for i in 0..RECIPIENTS {
        let who = recipient(i);
        prop_assert_eq!(
            h.registry.balance_of(&who),
            expected.get(&who).copied().unwrap_or(0)
        );
    }
    for flow in h.registry.flows() {
        match flow.active_recipient() {
            Some(r) => prop_assert_eq!(h.registry.owner_of(flow.id).ok(), Some(r)),
            None => prop_assert_eq!(
                h.registry.owner_of(flow.id).map_err(|e| e.kind()).err(),
                Some(ErrorKind::NotFound)
            ),
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Ids are 1, 2, 3, ... and every new flow starts inactive.
    #[test]
    fn ids_strictly_increase(count in 1usize..20) {
        let mut h = Harness::new();
        for n in 1..=count {
            let id = h.create_flow();
            prop_assert_eq!(id, FlowId(n as u64));
            let flow = h.registry.get_flow(id).unwrap();
            prop_assert!(!flow.active);
            prop_assert_eq!(flow.current_recipient, None);
        }
    }

    /// Ownership mirrors the flow table after every call, successful or not.
    #[test]
    fn ownership_matches_active_flows(ops in prop::collection::vec(arb_op(), 1..60)) {
        let mut h = Harness::new();
        let mut ids: Vec<FlowId> = Vec::new();
        let pick = |ids: &[FlowId], i: usize| if ids.is_empty() { FlowId(1) } else { ids[i % ids.len()] };

        for op in ops {
            match op {
                Op::Create => ids.push(h.create_flow()),
                Op::SetRate { flow, rate, to } => {
                    let id = pick(&ids, flow);
                    let _ = h.registry.set_rate(&h.rater, id, FlowRate(rate), &recipient(to));
                }
                Op::Redirect { flow, to } => {
                    let id = pick(&ids, flow);
                    let _ = h.registry.redirect(&h.redirector, id, &recipient(to));
                }
                Op::Stop { flow } => {
                    let id = pick(&ids, flow);
                    let _ = h.registry.stop(&h.admin, id);
                }
            }
            assert_balances(&h)?;
            prop_assert_eq!(h.ledger.flow_count(), h.registry.ownership().total_active());
        }
    }

    /// Non-positive rates never start a flow.
    #[test]
    fn non_positive_rate_cannot_start(rate in -1_000i128..=0) {
        let mut h = Harness::new();
        let id = h.create_flow();
        let err = h.registry.set_rate(&h.rater, id, FlowRate(rate), &recipient(0)).unwrap_err();
        prop_assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        prop_assert!(!h.registry.is_active(id));
    }
}
