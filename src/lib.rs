// prices-core: leveraged positions on synthetic prices, settled on chain.
// a position bets on a postfix formula over oracle feeds; its cost basis is
// fixed by a window after opening and its profit is re-derived block by block.
// everything consensus touches is deterministic integer math with no I/O.
//
// file map (search X.0 for structs, X.1+ for logic):
//   1.x  types.rs: primitives: Height, Amount, ScaledPrice, Leverage, TxId, PubKey
//   2.x  expression.rs: opcodes, compiler, wire form, canonical rendering
//   3.x  evaluator.rs: synthetic price stack machine
//   4.x  position.rs: funding increments, lifecycle, position report
//   5.x  profit.rs: window cost basis and profit per increment
//   6.x  scanner.rs: block by block scan, rekt detection
//   7.x  config.rs: protocol constants, presets, env overrides
//   8.x  feeds.rs: price source trait, feed catalog, in-memory history
//   10.x ledger.rs: transaction model, ledger lookups, in-memory chain
//   11.x codec.rs: contract record encoding
//   12.x fee_destination.rs: write-once fee destination
//   13.x validation/: consensus checks for open, add funding, close
//   14.x engine/: position book: load, report, list, build, submit
//   15.x builder.rs: transaction construction helpers

// core modules
pub mod evaluator;
pub mod expression;
pub mod position;
pub mod profit;
pub mod scanner;
pub mod types;

// chain modules
pub mod codec;
pub mod fee_destination;
pub mod ledger;
pub mod validation;

// integration modules
pub mod builder;
pub mod config;
pub mod engine;
pub mod feeds;

// re exports for convenience
pub use engine::*;
pub use position::*;
pub use types::*;
pub use builder::{BuildError, Coin, OpenRequest};
pub use codec::{AddFundingRecord, CloseRecord, ContractRecord, DecodeError, OpenRecord};
pub use config::{ConfigError, FeedSelection, ProtocolParams};
pub use evaluator::{EvalError, Evaluator};
pub use expression::{compile, split_tokens, CompileError, Opcode, SyntheticExpression};
pub use fee_destination::{FeeDestinationCell, FeeDestinationError, FEE_DESTINATION};
pub use feeds::{FeedCatalog, PriceHistory, PriceSample, PriceSource};
pub use ledger::{InMemoryLedger, Ledger, LedgerError, Script, SpendInfo, Transaction, TxIn, TxOut};
pub use profit::{ProfitEngine, ProfitError};
pub use scanner::{ScanError, ScanOutcome, Scanner, StopReason};
pub use validation::{ValidatedAction, ValidationError, Validator};
