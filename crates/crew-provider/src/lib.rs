pub mod error;
pub mod mock;
pub mod model;
pub mod trait_def;

pub use error::ProviderError;
pub use mock::MockDecisionProvider;
pub use model::*;
pub use trait_def::DecisionProvider;
