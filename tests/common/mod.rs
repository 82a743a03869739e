//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use prices_core::*;

pub type Sim = Engine<InMemoryLedger, PriceHistory>;

pub const BTC: FeedIndex = FeedIndex(0);
pub const ETH_USD: FeedIndex = FeedIndex(9);

pub fn key(byte: u8) -> PubKey {
    let mut bytes = [byte; 33];
    bytes[0] = 0x03;
    PubKey(bytes)
}

pub fn fee_script() -> Script {
    Script::Raw(b"fees".to_vec())
}

/// Test network engine with an empty chain whose tip is `tip`.
pub fn world(tip: u32) -> Sim {
    let mut ledger = InMemoryLedger::new();
    ledger.advance_to(Height(tip)).unwrap();
    Engine::new(EngineConfig::testnet(), ledger, PriceHistory::new(), fee_script())
}

pub fn next(sim: &Sim) -> Height {
    sim.tip().next()
}

/// Plain coin for `owner`, confirmed in the next block.
pub fn faucet(sim: &mut Sim, owner: PubKey, value: i64) -> Coin {
    let height = next(sim);
    let mut nonce = b"coin".to_vec();
    nonce.extend_from_slice(&height.0.to_le_bytes());
    nonce.extend_from_slice(&owner.as_bytes()[..4]);
    let tx = Transaction::new(
        vec![],
        vec![TxOut::new(Amount(value), Script::PayToKey(owner)), TxOut::data(nonce)],
    );
    let txid = sim.submit(tx, height).unwrap().txid;
    Coin::new(OutPoint::new(txid, 0), Amount(value))
}

/// Contract liquidity that closes can draw payouts from.
pub fn house(sim: &mut Sim, value: i64) -> Coin {
    let height = next(sim);
    let mut nonce = b"house".to_vec();
    nonce.extend_from_slice(&height.0.to_le_bytes());
    let tx = Transaction::new(
        vec![],
        vec![TxOut::new(Amount(value), Script::ContractGlobal), TxOut::data(nonce)],
    );
    let txid = sim.submit(tx, height).unwrap().txid;
    Coin::new(OutPoint::new(txid, 0), Amount(value))
}

/// Funds `owner` and opens a BTC_USD position; returns its id.
pub fn open_btc(sim: &mut Sim, owner: PubKey, amount: i64, leverage: i16) -> PositionId {
    let coin = faucet(sim, owner, amount + SCALE);
    let tx = sim.open_tx(owner, vec![coin], Amount(amount), leverage, &["BTC_USD", "1"]).unwrap();
    let height = next(sim);
    sim.submit(tx, height).unwrap().txid
}

/// Close record that matches a fresh scan to the tip.
pub fn honest_record(sim: &Sim, id: &PositionId, recipient: PubKey) -> (CloseRecord, ScanOutcome) {
    record_at(sim, id, recipient, None)
}

/// Close record matching a scan that stops at `height`, or the tip.
pub fn record_at(sim: &Sim, id: &PositionId, recipient: PubKey, height: Option<Height>) -> (CloseRecord, ScanOutcome) {
    let position = sim.load_position(id).unwrap();
    let outcome = sim.scan_position(&position, height).unwrap();
    let record = CloseRecord {
        position_id: *id,
        total_profit: outcome.total_profits,
        close_height: outcome.last_height,
        recipient,
        first_price: position.first_price,
        cost_basis: ScaledPrice::unset(),
        total_bets: outcome.total_bets,
        reserved: Amount::zero(),
        leverage: position.leverage,
    };
    (record, outcome)
}

/// Marker plus escrow of a position, ready to be spent by a close.
pub fn close_inputs(sim: &Sim, id: &PositionId) -> (Coin, Vec<Coin>) {
    let marker_point = OutPoint::new(*id, 1);
    let marker = Coin::new(marker_point, sim.ledger().load_output(&marker_point).unwrap().value);
    let escrow_point = OutPoint::new(*id, 2);
    let escrow = Coin::new(escrow_point, sim.ledger().load_output(&escrow_point).unwrap().value);
    (marker, vec![escrow])
}
