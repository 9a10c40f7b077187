//! Flow lifecycle through the registry: create, start, re-rate, redirect, stop.

mod common;

use common::{addr, Harness};
use flowroute_core::{ErrorKind, FlowError, FlowEvent, FlowId, FlowLedger, FlowRate, LedgerCall};

#[test]
fn end_to_end_create_start_redirect_stop() {
    let mut h = Harness::new();
    let (x, y) = (addr("X"), addr("Y"));

    let id = h.create_flow();
    assert_eq!(id, FlowId(1));
    assert!(!h.registry.is_active(id));

    h.registry.set_rate(&h.rater, id, FlowRate(100), &x).unwrap();
    assert_eq!(h.registry.owner_of(id).unwrap(), x);
    assert_eq!(h.registry.balance_of(&x), 1);
    assert_eq!(h.registry.get_current_recipient(id).unwrap(), Some(x));
    assert_eq!(h.registry.get_current_rate(id).unwrap(), FlowRate(100));

    let effective = h.registry.redirect(&h.redirector, id, &y).unwrap();
    assert_eq!(effective, y);
    assert_eq!(h.registry.owner_of(id).unwrap(), y);
    assert_eq!(h.registry.balance_of(&x), 0);
    assert_eq!(h.registry.balance_of(&y), 1);
    assert_eq!(
        h.ledger.get_rate(&h.asset, &h.treasury, &y).unwrap(),
        FlowRate(100)
    );

    h.registry.stop(&h.admin, id).unwrap();
    assert_eq!(h.registry.owner_of(id).unwrap_err().kind(), ErrorKind::NotFound);
    assert_eq!(h.registry.balance_of(&y), 0);
    assert_eq!(h.ledger.flow_count(), 0);
    assert_eq!(h.registry.get_current_rate(id).unwrap(), FlowRate::ZERO);

    let kinds: Vec<&str> = h
        .registry
        .events()
        .iter()
        .map(|e| match e.event {
            FlowEvent::FlowCreated { .. } => "created",
            FlowEvent::FlowActivated { .. } => "activated",
            FlowEvent::FlowRedirected { .. } => "redirected",
            FlowEvent::FlowStopped { .. } => "stopped",
            FlowEvent::Transfer { .. } => "transfer",
            _ => "other",
        })
        .collect();
    assert_eq!(
        kinds,
        vec![
            "created",
            "transfer",
            "activated",
            "transfer",
            "redirected",
            "transfer",
            "stopped"
        ]
    );
}

#[test]
fn ids_increase_from_one() {
    let mut h = Harness::new();
    let ids: Vec<FlowId> = (0..5).map(|_| h.create_flow()).collect();
    assert_eq!(ids, (1..=5).map(FlowId).collect::<Vec<_>>());
    assert_eq!(h.registry.flow_count(), 5);
}

#[test]
fn starting_requires_positive_rate() {
    let mut h = Harness::new();
    let id = h.create_flow();
    for rate in [0, -5] {
        let err = h
            .registry
            .set_rate(&h.rater, id, FlowRate(rate), &addr("X"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }
    let err = h
        .registry
        .set_rate(&h.rater, id, FlowRate(10), &flowroute_core::Address::ZERO)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    assert!(h.ledger.calls().is_empty());
}

#[test]
fn zero_rate_behaves_like_stop() {
    let mut by_stop = Harness::new();
    let mut by_rate = Harness::new();
    let x = addr("X");

    let a = by_stop.active_flow(&x, 100);
    let b = by_rate.active_flow(&x, 100);
    by_stop.registry.stop(&by_stop.admin, a).unwrap();
    by_rate
        .registry
        .set_rate(&by_rate.admin, b, FlowRate::ZERO, &x)
        .unwrap();

    assert_eq!(
        by_stop.registry.get_flow(a).unwrap(),
        by_rate.registry.get_flow(b).unwrap()
    );
    assert_eq!(by_stop.ledger.calls(), by_rate.ledger.calls());
    assert_eq!(by_stop.registry.balance_of(&x), by_rate.registry.balance_of(&x));

    let last = |h: &Harness| h.registry.events().last().map(|e| e.event.clone());
    assert!(matches!(last(&by_rate), Some(FlowEvent::FlowStopped { .. })));
    assert!(matches!(last(&by_stop), Some(FlowEvent::FlowStopped { .. })));
}

#[test]
fn stopped_flow_can_restart_to_a_new_recipient() {
    let mut h = Harness::new();
    let (x, z) = (addr("X"), addr("Z"));
    let id = h.active_flow(&x, 100);
    h.registry.stop(&h.admin, id).unwrap();

    h.registry.set_rate(&h.admin, id, FlowRate(40), &z).unwrap();
    assert_eq!(h.registry.owner_of(id).unwrap(), z);
    assert_eq!(h.registry.get_current_rate(id).unwrap(), FlowRate(40));
}

#[test]
fn rate_change_on_active_flow_ignores_recipient_argument() {
    let mut h = Harness::new();
    let x = addr("X");
    let id = h.active_flow(&x, 100);
    h.ledger.clear_calls();

    h.registry
        .set_rate(&h.rater, id, FlowRate(300), &addr("ignored"))
        .unwrap();
    assert_eq!(h.registry.owner_of(id).unwrap(), x);
    assert_eq!(
        h.ledger.calls(),
        vec![LedgerCall::Update {
            asset: h.asset,
            from: h.treasury,
            to: x,
            rate: FlowRate(300)
        }]
    );
}

#[test]
fn role_checks() {
    let mut h = Harness::new();
    let stranger = addr("stranger");
    let id = h.create_flow();

    assert!(matches!(
        h.registry.set_rate(&stranger, id, FlowRate(1), &addr("X")),
        Err(FlowError::PermissionDenied { .. })
    ));
    // Redirect agent cannot set rates.
    assert!(matches!(
        h.registry.set_rate(&h.redirector, id, FlowRate(1), &addr("X")),
        Err(FlowError::PermissionDenied { .. })
    ));

    h.registry.set_rate(&h.rater, id, FlowRate(1), &addr("X")).unwrap();
    assert!(matches!(
        h.registry.redirect(&stranger, id, &addr("Y")),
        Err(FlowError::PermissionDenied { .. })
    ));
    // Rate agent cannot redirect.
    assert!(matches!(
        h.registry.redirect(&h.rater, id, &addr("Y")),
        Err(FlowError::PermissionDenied { .. })
    ));
    // Only the admin stops.
    assert!(matches!(
        h.registry.stop(&h.redirector, id),
        Err(FlowError::PermissionDenied { .. })
    ));
    // Admin holds every role.
    h.registry.redirect(&h.admin, id, &addr("Y")).unwrap();
    h.registry.set_rate(&h.admin, id, FlowRate(2), &addr("Y")).unwrap();
}

#[test]
fn inactive_and_unknown_flows() {
    let mut h = Harness::new();
    let id = h.create_flow();

    let err = h.registry.redirect(&h.admin, id, &addr("Y")).unwrap_err();
    assert!(matches!(err, FlowError::FlowInactive(_)));
    assert_eq!(err.kind(), ErrorKind::NotFound);

    assert_eq!(
        h.registry.stop(&h.admin, id).unwrap_err().kind(),
        ErrorKind::NotFound
    );
    assert!(matches!(
        h.registry.redirect(&h.admin, FlowId(42), &addr("Y")),
        Err(FlowError::FlowNotFound(FlowId(42)))
    ));
    assert!(matches!(
        h.registry.get_admin(FlowId(42)),
        Err(FlowError::FlowNotFound(_))
    ));
    assert_eq!(h.registry.get_current_recipient(id).unwrap(), None);
}

#[test]
fn redirect_to_null_is_invalid() {
    let mut h = Harness::new();
    let id = h.active_flow(&addr("X"), 5);
    let err = h
        .registry
        .redirect(&h.redirector, id, &flowroute_core::Address::ZERO)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
}

#[test]
fn treasury_without_permission_fails_at_ledger() {
    let mut h = Harness::new();
    let unfunded = addr("unauthorized-treasury");
    let id = h
        .registry
        .create_flow(&unfunded, &h.admin, &h.redirector, &h.rater, &h.asset, None)
        .unwrap();
    let err = h
        .registry
        .set_rate(&h.rater, id, FlowRate(10), &addr("X"))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ExternalCollaboratorFailure);
    assert!(!h.registry.is_active(id));
    assert_eq!(h.registry.balance_of(&addr("X")), 0);
}

#[test]
fn flows_from_different_treasuries_to_one_recipient_count_separately() {
    let mut h = Harness::new();
    let x = addr("X");
    let second = addr("treasury-2");
    h.ledger
        .grant_max_permission(&h.asset, &second, &h.registry.address())
        .unwrap();

    let a = h.active_flow(&x, 10);
    let b = h
        .registry
        .create_flow(&second, &h.admin, &h.redirector, &h.rater, &h.asset, None)
        .unwrap();
    h.registry.set_rate(&h.rater, b, FlowRate(20), &x).unwrap();
    assert_eq!(h.registry.balance_of(&x), 2);

    h.registry.redirect(&h.redirector, a, &addr("Y")).unwrap();
    assert_eq!(h.registry.balance_of(&x), 1);
    assert_eq!(h.registry.owner_of(b).unwrap(), x);
    assert_eq!(h.registry.ownership().total_active(), 2);
}

#[test]
fn duplicate_ledger_flow_is_rejected_without_side_effects() {
    let mut h = Harness::new();
    let x = addr("X");
    h.active_flow(&x, 10);
    let second = h.create_flow();
    let err = h
        .registry
        .set_rate(&h.rater, second, FlowRate(20), &x)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ExternalCollaboratorFailure);
    assert!(!h.registry.is_active(second));
    assert_eq!(h.registry.balance_of(&x), 1);
}
