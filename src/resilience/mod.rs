pub mod circuit_breaker;
pub mod outbox;
pub mod retry;
