pub mod breaker;
pub mod executor;
pub mod orchestrator;
pub mod planner;
pub mod resolve;
