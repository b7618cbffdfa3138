pub mod audit;
pub mod cache;
pub mod describe;
pub mod history;
pub mod permissions;
pub mod query;
pub mod system;
