//! End to end position lifecycles on the in-memory chain.
//!
//! Every transaction here is built by the engine or the builder and then
//! pushed through consensus validation, the same path a node would take.

mod common;

use common::*;
use prices_core::builder;
use prices_core::codec::CONTRACT_TAG;
use prices_core::*;
use rust_decimal_macros::dec;

// ============================================================================
// Open, fund, cash out
// ============================================================================

#[test]
fn open_add_funding_and_cashout() {
    let mut sim = world(100);
    let alice = key(0xA1);
    let bob = key(0xB0);
    sim.prices_mut().fill(BTC, Height(100), Height(200), 20_000 * SCALE);
    sim.prices_mut().fill(BTC, Height(150), Height(200), 22_000 * SCALE);

    let id = open_btc(&mut sim, alice, 100 * SCALE, 2);
    assert_eq!(sim.list_positions(ListFilter::Open, None), vec![id]);

    let bob_coin = faucet(&mut sim, bob, 60 * SCALE);
    let add = sim.add_funding_tx(&id, bob, &[bob_coin], Amount(50 * SCALE)).unwrap();
    let result = sim.submit(add, next(&sim)).unwrap();
    assert_eq!(
        result.action,
        Some(ValidatedAction::AddFunding { position_id: id, amount: Amount(50 * SCALE) })
    );

    let pool = house(&mut sim, 1_000 * SCALE);
    sim.ledger_mut().advance_to(Height(160)).unwrap();

    let report = sim.position_report(&id).unwrap();
    assert_eq!(report.bets.len(), 2);
    assert_eq!(report.total_position_size, dec!(149.5));
    // +10% at 2x on 99.5 and 50
    assert_eq!(report.total_profits, dec!(29.9));
    assert_eq!(report.equity, dec!(179.4));
    assert_eq!(report.cost_basis, dec!(20000));
    assert_eq!(report.last_price, dec!(22000));
    assert!(!report.rekt);

    let cashout = sim.cashout_tx(&id, &[pool]).unwrap();
    assert_eq!(cashout.outputs[0].script, Script::PayToKey(alice));
    let result = sim.submit(cashout, next(&sim)).unwrap();
    assert_eq!(
        result.action,
        Some(ValidatedAction::Close {
            position_id: id,
            kind: CloseKind::Cashout,
            payout: Amount(17_940_000_000),
            scanned_to: Height(160),
        })
    );

    let position = sim.load_position(&id).unwrap();
    assert_eq!(position.state, LifecycleState::Closed(CloseKind::Cashout));
    assert_eq!(position.closed_at, Some(Height(160)));
    assert!(sim.list_positions(ListFilter::Open, None).is_empty());
    assert_eq!(sim.list_positions(ListFilter::Closed, None), vec![id]);
    assert!(matches!(
        sim.add_funding_tx(&id, bob, &[], Amount(SCALE)),
        Err(EngineError::PositionClosed(closed)) if closed == id
    ));
}

#[test]
fn closed_report_stops_at_close_height() {
    let mut sim = world(100);
    let alice = key(0xA1);
    sim.prices_mut().fill(BTC, Height(100), Height(200), 20_000 * SCALE);

    let id = open_btc(&mut sim, alice, 10 * SCALE, 1);
    let pool = house(&mut sim, 100 * SCALE);
    sim.ledger_mut().advance_to(Height(120)).unwrap();
    let cashout = sim.cashout_tx(&id, &[pool]).unwrap();
    sim.submit(cashout, next(&sim)).unwrap();

    sim.ledger_mut().advance_to(Height(180)).unwrap();
    let report = sim.position_report(&id).unwrap();
    assert!(!report.is_open);
    assert_eq!(report.last_height, Height(120));
}

// ============================================================================
// Rekt
// ============================================================================

fn crashed_position() -> (Sim, PositionId) {
    let mut sim = world(300);
    sim.prices_mut().fill(BTC, Height(300), Height(320), 30_000 * SCALE);
    sim.prices_mut().fill(BTC, Height(321), Height(340), 20_000 * SCALE);
    let id = open_btc(&mut sim, key(0xC0), 10 * SCALE, 5);
    sim.ledger_mut().advance_to(Height(330)).unwrap();
    (sim, id)
}

#[test]
fn rekt_close_pays_the_fee_and_blocks_a_second_close() {
    let (mut sim, id) = crashed_position();
    let keeper = key(0xEE);

    let report = sim.position_report(&id).unwrap();
    assert!(report.rekt);
    assert_eq!(report.rekt_height, Some(Height(321)));
    // 9.95 / 500
    assert_eq!(report.rekt_fee, Some(dec!(0.0199)));

    assert!(matches!(
        sim.cashout_tx(&id, &[]),
        Err(EngineError::Validation(ValidationError::AlreadyRekt))
    ));

    let rekt = sim.rekt_tx(&id, keeper).unwrap();
    let again = rekt.clone();
    let result = sim.submit(rekt, next(&sim)).unwrap();
    assert_eq!(
        result.action,
        Some(ValidatedAction::Close {
            position_id: id,
            kind: CloseKind::Rekt,
            payout: Amount(1_990_000),
            scanned_to: Height(321),
        })
    );

    assert_eq!(
        sim.validate(&again),
        Err(ValidationError::AlreadyClosed { spender: result.txid })
    );
    assert_eq!(sim.load_position(&id).unwrap().state, LifecycleState::Closed(CloseKind::Rekt));
    assert!(matches!(sim.rekt_tx(&id, keeper), Err(EngineError::PositionClosed(_))));
}

#[test]
fn solvent_position_cannot_be_closed_as_rekt() {
    let mut sim = world(100);
    sim.prices_mut().fill(BTC, Height(100), Height(140), 20_000 * SCALE);
    let id = open_btc(&mut sim, key(0xA1), 10 * SCALE, 3);
    sim.ledger_mut().advance_to(Height(130)).unwrap();

    assert!(matches!(
        sim.rekt_tx(&id, key(0xEE)),
        Err(EngineError::Validation(ValidationError::StillSolvent))
    ));
}

#[test]
fn claiming_solvency_after_rekt_is_rejected() {
    let (sim, id) = crashed_position();
    let owner = key(0xC0);
    let (mut record, _) = honest_record(&sim, &id, owner);
    record.total_profit = Amount::zero();
    let (marker, pool) = close_inputs(&sim, &id);

    let tx = builder::close_position(&sim.config().protocol, record, marker, &pool, Amount(SCALE), Some(owner))
        .unwrap();
    assert_eq!(sim.validate(&tx), Err(ValidationError::AlreadyRekt));
}

// ============================================================================
// Forged closes
// ============================================================================

fn solvent_position() -> (Sim, PositionId, Coin) {
    let mut sim = world(100);
    sim.prices_mut().fill(BTC, Height(100), Height(200), 20_000 * SCALE);
    sim.prices_mut().fill(BTC, Height(140), Height(200), 21_000 * SCALE);
    let id = open_btc(&mut sim, key(0xA1), 10 * SCALE, 4);
    let pool = house(&mut sim, 100 * SCALE);
    sim.ledger_mut().advance_to(Height(150)).unwrap();
    (sim, id, pool)
}

#[test]
fn cashout_must_be_signed_by_the_owner() {
    let (sim, id, house_coin) = solvent_position();
    let owner = key(0xA1);
    let mallory = key(0x66);
    let params = sim.config().protocol.clone();

    let (record, outcome) = honest_record(&sim, &id, owner);
    let (marker, mut pool) = close_inputs(&sim, &id);
    pool.push(house_coin);

    let unsigned = builder::close_position(&params, record.clone(), marker, &pool, outcome.equity, Some(mallory))
        .unwrap();
    assert!(matches!(sim.validate(&unsigned), Err(ValidationError::Unauthorized(_))));

    let mut redirected = record;
    redirected.recipient = mallory;
    let stolen = builder::close_position(&params, redirected, marker, &pool, outcome.equity, Some(mallory)).unwrap();
    assert!(matches!(sim.validate(&stolen), Err(ValidationError::Unauthorized(_))));

    let (record, _) = honest_record(&sim, &id, owner);
    let honest = builder::close_position(&params, record, marker, &pool, outcome.equity, Some(owner)).unwrap();
    assert!(sim.validate(&honest).is_ok());
}

#[test]
fn inflated_profit_claim_is_rejected() {
    let (sim, id, house_coin) = solvent_position();
    let owner = key(0xA1);
    let (mut record, outcome) = honest_record(&sim, &id, owner);
    record.total_profit = Amount(record.total_profit.value() + SCALE);
    let (marker, mut pool) = close_inputs(&sim, &id);
    pool.push(house_coin);

    let payout = Amount(outcome.equity.value() + SCALE);
    let tx = builder::close_position(&sim.config().protocol, record, marker, &pool, payout, Some(owner)).unwrap();
    assert!(matches!(sim.validate(&tx), Err(ValidationError::ShapeMismatch(_))));
}

#[test]
fn payout_above_equity_is_rejected() {
    let (sim, id, house_coin) = solvent_position();
    let owner = key(0xA1);
    let (record, outcome) = honest_record(&sim, &id, owner);
    let (marker, mut pool) = close_inputs(&sim, &id);
    pool.push(house_coin);

    let payout = Amount(outcome.equity.value() + 1);
    let tx = builder::close_position(&sim.config().protocol, record, marker, &pool, payout, Some(owner)).unwrap();
    assert!(matches!(sim.validate(&tx), Err(ValidationError::ShapeMismatch(_))));
}

#[test]
fn rekt_claim_on_a_solvent_position_is_rejected() {
    let (sim, id, _) = solvent_position();
    let keeper = key(0xEE);
    let (mut record, outcome) = honest_record(&sim, &id, keeper);
    record.total_profit = Amount(-(outcome.total_bets.value() + 1));
    let (marker, pool) = close_inputs(&sim, &id);

    let fee = Amount(sim.config().protocol.rekt_fee(outcome.total_bets.value()));
    let tx = builder::close_position(&sim.config().protocol, record, marker, &pool, fee, Some(keeper)).unwrap();
    assert_eq!(sim.validate(&tx), Err(ValidationError::StillSolvent));
}

#[test]
fn close_beyond_the_tip_is_not_eligible() {
    let (sim, id, house_coin) = solvent_position();
    let owner = key(0xA1);
    let (mut record, outcome) = honest_record(&sim, &id, owner);
    record.close_height = sim.tip().offset(5);
    let (marker, mut pool) = close_inputs(&sim, &id);
    pool.push(house_coin);

    let tx =
        builder::close_position(&sim.config().protocol, record, marker, &pool, outcome.equity, Some(owner)).unwrap();
    assert_eq!(
        sim.validate(&tx),
        Err(ValidationError::NotYetEligible { height: Height(155), tip: Height(150) })
    );
}

// ============================================================================
// Open and add funding shape
// ============================================================================

#[test]
fn open_paying_the_wrong_fee_destination_is_rejected() {
    let mut sim = world(100);
    let alice = key(0xA1);
    sim.prices_mut().fill(BTC, Height(100), Height(110), 20_000 * SCALE);
    let coin = faucet(&mut sim, alice, 20 * SCALE);

    let request = OpenRequest {
        owner: alice,
        coins: vec![coin],
        amount: Amount(10 * SCALE),
        leverage: 2,
        expression: compile(&["BTC_USD", "1"], &sim.config().catalog, &sim.config().protocol).unwrap(),
        first_price: ScaledPrice(20_000 * SCALE),
        open_height: sim.tip(),
    };
    let tx = builder::open_position(&sim.config().protocol, &Script::Raw(b"elsewhere".to_vec()), request).unwrap();
    assert!(matches!(sim.validate(&tx), Err(ValidationError::ShapeMismatch(_))));
}

#[test]
fn open_funded_by_someone_else_is_unauthorized() {
    let mut sim = world(100);
    let alice = key(0xA1);
    sim.prices_mut().fill(BTC, Height(100), Height(110), 20_000 * SCALE);
    let coin = faucet(&mut sim, alice, 20 * SCALE);

    let mut tx = sim.open_tx(alice, vec![coin], Amount(10 * SCALE), 2, &["BTC_USD", "1"]).unwrap();
    tx.inputs[0].signer = Some(key(0x66));
    assert!(matches!(sim.validate(&tx), Err(ValidationError::Unauthorized(_))));
}

#[test]
fn open_rejects_bad_leverage_and_missing_prices() {
    let mut sim = world(100);
    let alice = key(0xA1);
    let coin = faucet(&mut sim, alice, 20 * SCALE);

    assert!(matches!(
        sim.open_tx(alice, vec![coin], Amount(10 * SCALE), 2, &["BTC_USD", "1"]),
        Err(EngineError::Price(EvalError::FeedUnavailable { .. }))
    ));

    sim.prices_mut().fill(BTC, Height(100), Height(110), 20_000 * SCALE);
    assert!(matches!(
        sim.open_tx(alice, vec![coin], Amount(10 * SCALE), 0, &["BTC_USD", "1"]),
        Err(EngineError::Build(BuildError::InvalidLeverage(0)))
    ));
    assert!(matches!(
        sim.open_tx(alice, vec![coin], Amount(10 * SCALE), 2, &["DOGE_USD", "1"]),
        Err(EngineError::Compile(_))
    ));
}

#[test]
fn add_funding_must_escrow_the_recorded_amount() {
    let mut sim = world(100);
    sim.prices_mut().fill(BTC, Height(100), Height(120), 20_000 * SCALE);
    let id = open_btc(&mut sim, key(0xA1), 10 * SCALE, 2);
    let bob = key(0xB0);
    let coin = faucet(&mut sim, bob, 10 * SCALE);

    let mut tx = sim.add_funding_tx(&id, bob, &[coin], Amount(5 * SCALE)).unwrap();
    tx.outputs[1].value = Amount(SCALE);
    assert!(matches!(sim.validate(&tx), Err(ValidationError::ShapeMismatch(_))));
}

#[test]
fn add_funding_after_close_is_rejected() {
    let (mut sim, id, house_coin) = solvent_position();
    let bob = key(0xB0);
    let coin = faucet(&mut sim, bob, 10 * SCALE);
    let baton = sim.load_position(&id).unwrap().baton;

    let cashout = sim.cashout_tx(&id, &[house_coin]).unwrap();
    let closed = sim.submit(cashout, next(&sim)).unwrap();
    assert!(matches!(closed.action, Some(ValidatedAction::Close { kind: CloseKind::Cashout, .. })));

    let late = builder::add_funding(&sim.config().protocol, id, baton, bob, &[coin], Amount(5 * SCALE)).unwrap();
    assert_eq!(sim.validate(&late), Err(ValidationError::AlreadyClosed { spender: closed.txid }));
}

#[test]
fn retired_action_tag_is_unsupported() {
    let sim = world(100);
    let tx = Transaction::new(vec![], vec![TxOut::data(vec![CONTRACT_TAG, b'C', 0, 0])]);
    assert_eq!(
        sim.validate(&tx),
        Err(ValidationError::Decode(DecodeError::UnsupportedAction(b'C')))
    );
}

// ============================================================================
// Price gaps and listing
// ============================================================================

#[test]
fn price_gap_stops_the_scan_and_blocks_cashout() {
    let mut sim = world(100);
    sim.prices_mut().fill(BTC, Height(100), Height(120), 20_000 * SCALE);
    let id = open_btc(&mut sim, key(0xA1), 10 * SCALE, 2);
    sim.ledger_mut().advance_to(Height(130)).unwrap();

    let report = sim.position_report(&id).unwrap();
    assert_eq!(report.last_height, Height(120));
    assert!(matches!(
        sim.cashout_tx(&id, &[]),
        Err(EngineError::Validation(ValidationError::FeedUnavailable(_)))
    ));
}

#[test]
fn list_positions_filters_by_owner() {
    let mut sim = world(100);
    sim.prices_mut().fill(BTC, Height(100), Height(120), 20_000 * SCALE);
    let alice = key(0xA1);
    let bob = key(0xB0);
    let a = open_btc(&mut sim, alice, 10 * SCALE, 2);
    let b = open_btc(&mut sim, bob, 10 * SCALE, -2);
    house(&mut sim, 10 * SCALE);

    assert_eq!(sim.list_positions(ListFilter::All, None), vec![a, b]);
    assert_eq!(sim.list_positions(ListFilter::Open, Some(&bob)), vec![b]);
    assert!(sim.list_positions(ListFilter::Closed, Some(&alice)).is_empty());
    assert!(matches!(
        sim.position_report(&TxId([9; 32])),
        Err(EngineError::PositionNotFound(_))
    ));
}

// ============================================================================
// Close height and contract inputs
// ============================================================================

#[test]
fn cashout_at_a_height_before_rekt_is_rejected() {
    let (sim, id) = crashed_position();
    let owner = key(0xC0);
    let (record, outcome) = record_at(&sim, &id, owner, Some(Height(320)));
    assert!(!outcome.rekt);
    assert_eq!(record.close_height, Height(320));
    let (marker, pool) = close_inputs(&sim, &id);

    let tx =
        builder::close_position(&sim.config().protocol, record, marker, &pool, outcome.equity, Some(owner)).unwrap();
    assert_eq!(sim.validate(&tx), Err(ValidationError::AlreadyRekt));
}

#[test]
fn cashout_must_close_at_the_tip() {
    let (sim, id, house_coin) = solvent_position();
    let owner = key(0xA1);
    // before the price moved, with totals that match that height
    let (record, outcome) = record_at(&sim, &id, owner, Some(Height(130)));
    let (marker, mut pool) = close_inputs(&sim, &id);
    pool.push(house_coin);

    let tx =
        builder::close_position(&sim.config().protocol, record, marker, &pool, outcome.equity, Some(owner)).unwrap();
    assert!(matches!(
        sim.validate(&tx),
        Err(ValidationError::ShapeMismatch(msg)) if msg.contains("scan ends at 150")
    ));
}

#[test]
fn plain_spend_of_contract_outputs_is_rejected() {
    let (mut sim, id, _) = solvent_position();
    let mallory = key(0x66);
    let (marker, pool) = close_inputs(&sim, &id);

    let theft = Transaction::new(
        vec![TxIn::new(marker.outpoint, Some(mallory)), TxIn::new(pool[0].outpoint, Some(mallory))],
        vec![TxOut::new(Amount(pool[0].value.value()), Script::PayToKey(mallory))],
    );
    assert!(matches!(
        sim.submit(theft, next(&sim)),
        Err(EngineError::Validation(ValidationError::NotContract))
    ));

    assert_eq!(sim.load_position(&id).unwrap().state, LifecycleState::Open);
    assert!(sim.ledger().spend_locator(&marker.outpoint).is_none());
    assert!(sim.position_report(&id).unwrap().is_open);
}

#[test]
fn close_cannot_spend_another_positions_outputs() {
    let mut sim = world(100);
    sim.prices_mut().fill(BTC, Height(100), Height(200), 20_000 * SCALE);
    sim.prices_mut().fill(BTC, Height(140), Height(200), 21_000 * SCALE);
    let alice = key(0xA1);
    let mallory = key(0x66);
    let victim = open_btc(&mut sim, alice, 10 * SCALE, 2);
    let own = open_btc(&mut sim, mallory, 10 * SCALE, 2);
    let house_coin = house(&mut sim, 100 * SCALE);
    sim.ledger_mut().advance_to(Height(150)).unwrap();

    let params = sim.config().protocol.clone();
    let (record, outcome) = honest_record(&sim, &own, mallory);
    let (marker, escrow) = close_inputs(&sim, &own);
    let victim_marker = Coin::new(OutPoint::new(victim, 1), Amount(params.tx_fee));
    let victim_baton = Coin::new(OutPoint::new(victim, 0), Amount(params.tx_fee));

    for extra in [victim_marker, victim_baton, escrow[0]] {
        let pool = [extra, escrow[0], house_coin];
        let tx = builder::close_position(&params, record.clone(), marker, &pool, outcome.equity, Some(mallory))
            .unwrap();
        assert!(matches!(sim.validate(&tx), Err(ValidationError::ShapeMismatch(_))));
    }

    let pool = [escrow[0], house_coin];
    let honest = builder::close_position(&params, record, marker, &pool, outcome.equity, Some(mallory)).unwrap();
    sim.submit(honest, next(&sim)).unwrap();
    assert_eq!(sim.list_positions(ListFilter::Open, None), vec![victim]);
    assert_eq!(sim.load_position(&victim).unwrap().state, LifecycleState::Open);
}

#[test]
fn open_cannot_spend_contract_outputs() {
    let (mut sim, id, _) = solvent_position();
    let owner = key(0xA1);
    let coin = faucet(&mut sim, owner, 20 * SCALE);
    let escrow = close_inputs(&sim, &id).1[0];

    let tx = sim.open_tx(owner, vec![coin, escrow], Amount(10 * SCALE), 2, &["BTC_USD", "1"]).unwrap();
    assert!(matches!(sim.validate(&tx), Err(ValidationError::ShapeMismatch(_))));
}

// ============================================================================
// Funding chains
// ============================================================================

#[test]
fn funding_chain_with_several_increments() {
    let mut sim = world(100);
    sim.prices_mut().fill(BTC, Height(100), Height(200), 20_000 * SCALE);
    sim.prices_mut().fill(BTC, Height(140), Height(200), 21_000 * SCALE);
    let alice = key(0xA1);
    let bob = key(0xB0);
    let carol = key(0xCA);
    let dave = key(0xDA);

    let id = open_btc(&mut sim, alice, 10 * SCALE, 2);
    for contributor in [bob, carol] {
        let coin = faucet(&mut sim, contributor, 6 * SCALE);
        let add = sim.add_funding_tx(&id, contributor, &[coin], Amount(5 * SCALE)).unwrap();
        let result = sim.submit(add, next(&sim)).unwrap();
        assert_eq!(
            result.action,
            Some(ValidatedAction::AddFunding { position_id: id, amount: Amount(5 * SCALE) })
        );
    }
    let position = sim.load_position(&id).unwrap();
    assert_eq!(position.increments.len(), 3);
    assert_ne!(position.baton.txid, id);

    // an add for another position may not chain onto this baton
    let other = open_btc(&mut sim, dave, 10 * SCALE, 2);
    let coin = faucet(&mut sim, dave, 6 * SCALE);
    let params = sim.config().protocol.clone();
    let hijack = builder::add_funding(&params, other, position.baton, dave, &[coin], Amount(5 * SCALE)).unwrap();
    assert!(matches!(
        sim.validate(&hijack),
        Err(ValidationError::ShapeMismatch(msg)) if msg.contains("another position")
    ));

    // nor onto a contract output left by a close record
    let (close, _) = honest_record(&sim, &id, alice);
    let stray = Transaction::new(
        vec![],
        vec![
            TxOut::new(Amount(params.tx_fee), Script::ContractToKey(dave)),
            TxOut::data(ContractRecord::Close(close).encode()),
        ],
    );
    let height = next(&sim);
    let stray_id = sim.ledger_mut().confirm(stray, height).unwrap();
    let coin = faucet(&mut sim, dave, 6 * SCALE);
    let after_close =
        builder::add_funding(&params, id, OutPoint::new(stray_id, 0), dave, &[coin], Amount(5 * SCALE)).unwrap();
    assert!(matches!(
        sim.validate(&after_close),
        Err(ValidationError::ShapeMismatch(msg)) if msg.contains("follow a close")
    ));

    let pool = house(&mut sim, 100 * SCALE);
    sim.ledger_mut().advance_to(Height(150)).unwrap();
    let report = sim.position_report(&id).unwrap();
    assert_eq!(report.bets.len(), 3);
    assert_eq!(report.total_position_size, dec!(19.95));
    // +5% at 2x
    assert_eq!(report.equity, dec!(21.945));

    let cashout = sim.cashout_tx(&id, &[pool]).unwrap();
    let result = sim.submit(cashout, next(&sim)).unwrap();
    assert!(matches!(
        result.action,
        Some(ValidatedAction::Close { kind: CloseKind::Cashout, payout, .. }) if payout == Amount(2_194_500_000)
    ));
}
