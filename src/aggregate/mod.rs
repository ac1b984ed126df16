pub mod stake;
pub mod withdrawals;
