pub mod collect;
pub mod funnels;
pub mod health;
pub mod query;
pub mod salt;
pub mod stats;
