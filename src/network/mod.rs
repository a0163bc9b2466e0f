mod policy;
mod proxy;

pub use policy::{EgressRule, NetworkRules};
pub use proxy::{EgressViolation, NetworkProxy};
