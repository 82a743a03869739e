//! Synthetic price positions simulation.
//!
//! Walks positions through their whole life on an in-memory chain: pricing
//! expressions, window cost basis, add funding, cashout and rekt closes.

use prices_core::*;
use std::error::Error;
use std::sync::Mutex;

type Sim = Engine<InMemoryLedger, PriceHistory>;
type SimResult = Result<(), Box<dyn Error>>;

const BTC: FeedIndex = FeedIndex(0);
const ETH_BTC: FeedIndex = FeedIndex(2);

static CHAIN_LOCK: Mutex<()> = Mutex::new(());

fn main() -> SimResult {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into()),
        )
        .init();

    println!("Synthetic Price Positions Simulation");
    println!("Test network window, in-memory chain\n");

    scenario_1_pricing()?;
    scenario_2_window_cost_basis()?;
    scenario_3_fund_and_cashout()?;
    scenario_4_rekt_and_double_close()?;

    println!("\nAll simulations completed successfully.");
    Ok(())
}

fn key(byte: u8) -> PubKey {
    let mut bytes = [byte; 33];
    bytes[0] = 0x02;
    PubKey(bytes)
}

/// Fresh chain with a fee bootstrap at height 1 and the tip at `tip`.
fn world(tip: u32) -> Result<Sim, Box<dyn Error>> {
    let config = EngineConfig::testnet();
    let mut ledger = InMemoryLedger::new();
    let bootstrap = ledger.confirm(
        Transaction::new(vec![], vec![TxOut::new(Amount(1), Script::Raw(b"fee-destination".to_vec()))]),
        Height(1),
    )?;
    let fee_destination = {
        let guard = CHAIN_LOCK.lock().map_err(|_| "chain lock poisoned")?;
        FEE_DESTINATION.get_or_bootstrap(&guard, &ledger, &bootstrap)?.clone()
    };
    ledger.advance_to(Height(tip))?;
    Ok(Engine::new(config, ledger, PriceHistory::new(), fee_destination))
}

/// Mints a plain coin for `owner` in a new block.
fn faucet(sim: &mut Sim, owner: PubKey, value: i64) -> Result<Coin, Box<dyn Error>> {
    let height = sim.tip().next();
    let mut nonce = b"faucet".to_vec();
    nonce.extend_from_slice(&height.0.to_le_bytes());
    let tx = Transaction::new(
        vec![],
        vec![TxOut::new(Amount(value), Script::PayToKey(owner)), TxOut::data(nonce)],
    );
    let txid = sim.submit(tx, height)?.txid;
    Ok(Coin::new(OutPoint::new(txid, 0), Amount(value)))
}

/// Two feeds, one ratio.
fn scenario_1_pricing() -> SimResult {
    println!("Scenario 1: Synthetic Prices\n");

    let catalog = FeedCatalog::standard();
    let params = ProtocolParams::testnet();
    let mut prices = PriceHistory::new();
    prices.set_flat(BTC, Height(10), 150 * SCALE);
    prices.set_flat(FeedIndex(9), Height(10), 100 * SCALE);
    prices.set_flat(ETH_BTC, Height(10), 5_000_000);

    let evaluator = Evaluator::new(&prices, params.feed_selection);
    for text in ["BTC_USD, ETH_USD, /, 1", "ETH_BTC, !, 1", "BTC_USD, 3, ETH_USD, 1"] {
        let expr = compile(&split_tokens(text), &catalog, &params)?;
        let price = evaluator.price_at(&expr, Height(10), false, Leverage::from_raw(1))?;
        println!("  {:<28} -> {}", expr.describe(&catalog), price);
    }
    println!();
    Ok(())
}

/// Long position while the price climbs through the window.
fn scenario_2_window_cost_basis() -> SimResult {
    println!("Scenario 2: Window Cost Basis\n");

    let mut sim = world(100)?;
    let alice = key(0xA1);
    sim.prices_mut().fill_with(BTC, Height(100), Height(120), |h| (100 + (h.0 as i64 - 100)) * SCALE);

    let coin = faucet(&mut sim, alice, 50 * SCALE)?;
    let open = sim.open_tx(alice, vec![coin], Amount(20 * SCALE), 3, &["BTC_USD", "1"])?;
    let id = sim.submit(open, sim.tip().next())?.txid;
    sim.ledger_mut().advance_to(Height(115))?;

    let report = sim.position_report(&id)?;
    println!("  Alice opens 3x long BTC_USD with 20 coins at height 101");
    println!("  Cost basis after the window: {}", report.cost_basis);
    println!("  Last price {} at height {}", report.last_price, report.last_height);
    println!("  Equity {} (profit {})\n", report.equity, report.total_profits);
    Ok(())
}

/// Open, add funding from a second key, owner cashout.
fn scenario_3_fund_and_cashout() -> SimResult {
    println!("Scenario 3: Add Funding and Cashout\n");

    let mut sim = world(200)?;
    let alice = key(0xA1);
    let bob = key(0xB0);
    sim.prices_mut().fill(BTC, Height(200), Height(260), 20_000 * SCALE);
    sim.prices_mut().fill(BTC, Height(230), Height(260), 22_000 * SCALE);

    let coin = faucet(&mut sim, alice, 200 * SCALE)?;
    let open = sim.open_tx(alice, vec![coin], Amount(100 * SCALE), 2, &["BTC_USD", "1"])?;
    let id = sim.submit(open, sim.tip().next())?.txid;

    let bob_coin = faucet(&mut sim, bob, 60 * SCALE)?;
    let add = sim.add_funding_tx(&id, bob, &[bob_coin], Amount(50 * SCALE))?;
    sim.submit(add, sim.tip().next())?;
    println!("  Alice opens 2x long with 100 coins, Bob adds 50");

    // house liquidity the contract pays profits from
    let house = sim.submit(
        Transaction::new(vec![], vec![TxOut::new(Amount(1_000 * SCALE), Script::ContractGlobal)]),
        sim.tip().next(),
    )?;
    sim.ledger_mut().advance_to(Height(240))?;

    let report = sim.position_report(&id)?;
    println!("  At height {}: price {}, equity {}", report.last_height, report.last_price, report.equity);

    let pool = [Coin::new(OutPoint::new(house.txid, 0), Amount(1_000 * SCALE))];
    let cashout = sim.cashout_tx(&id, &pool)?;
    let result = sim.submit(cashout, sim.tip().next())?;
    println!("  Cashout accepted: {:?}", result.action);
    println!("  Open positions left: {}\n", sim.list_positions(ListFilter::Open, None).len());
    Ok(())
}

/// Crash to rekt, third party close, second close refused.
fn scenario_4_rekt_and_double_close() -> SimResult {
    println!("Scenario 4: Rekt Close\n");

    let mut sim = world(300)?;
    let carol = key(0xC0);
    let keeper = key(0xEE);
    sim.prices_mut().fill(BTC, Height(300), Height(320), 30_000 * SCALE);
    sim.prices_mut().fill(BTC, Height(321), Height(340), 20_000 * SCALE);

    let coin = faucet(&mut sim, carol, 20 * SCALE)?;
    let open = sim.open_tx(carol, vec![coin], Amount(10 * SCALE), 5, &["BTC_USD", "1"])?;
    let id = sim.submit(open, sim.tip().next())?.txid;
    sim.ledger_mut().advance_to(Height(330))?;

    let report = sim.position_report(&id)?;
    println!("  Carol 5x long, BTC drops 30000 -> 20000");
    println!("  Rekt: {} at height {:?}, fee {:?}", report.rekt, report.rekt_height, report.rekt_fee);

    let rekt = sim.rekt_tx(&id, keeper)?;
    let again = rekt.clone();
    sim.submit(rekt, sim.tip().next())?;
    println!("  Keeper closes the position and collects the fee");

    match sim.validate(&again) {
        Err(err) => println!("  Second close rejected: {}", err),
        Ok(action) => println!("  Second close unexpectedly accepted: {:?}", action),
    }
    Ok(())
}
