//! Durable ledger: table registry, rounds, temp and finalized bet orders,
//! user wallets, wallet transactions and per-user statistics.

pub mod error;
pub mod storage;
pub mod types;

pub use error::StorageError;
pub use storage::{InMemoryLedgerStorage, LedgerStorage, LedgerTxn, SeaOrmLedgerStorage};
pub use types::{
    BetOrder, DealerRef, NewRound, NewTable, NewTempOrder, NewUser, NewWalletTransaction,
    OrderId, OrderStatus, OutboxEntry, RoundId, RoundRecord, RoundStatus, SettlementKind,
    TableId, TableRecord, TempOrder, UserId, UserRecord, UserStats, UserType, WalletMode,
    WalletTransaction,
};
