pub mod dlq;
pub mod keys;
pub mod ledger;
pub mod round_trip;
