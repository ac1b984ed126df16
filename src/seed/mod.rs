pub mod exchange_wallets;
