pub mod error;
pub mod subprocess;
pub mod template;
pub mod trait_def;

pub use error::AdapterError;
pub use subprocess::SubprocessAdapter;
pub use template::TemplateAdapter;
pub use trait_def::{ProgressCallback, TeammateAdapter};
