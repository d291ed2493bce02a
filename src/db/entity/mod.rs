pub mod bet_orders;
pub mod live_tables;
pub mod rounds;
pub mod settlement_outbox;
pub mod temp_bet_orders;
pub mod user_stats;
pub mod users;
pub mod wallet_transactions;
