pub mod admin;
pub mod balance;
pub mod cashback;
pub mod health;
pub mod provider;
pub mod ws;
