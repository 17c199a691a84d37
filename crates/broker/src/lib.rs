//! Brokerage connectivity: the HTTP bridge gateway implementation of the
//! core `Broker` trait, plus an in-memory mock for tests.

pub mod client;
pub mod gateway;
pub mod mock;

pub use client::GatewayClient;
pub use gateway::GatewayBroker;
pub use mock::MockBroker;
