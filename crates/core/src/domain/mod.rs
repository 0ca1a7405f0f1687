pub mod call;
pub mod outcome;
pub mod plan;
