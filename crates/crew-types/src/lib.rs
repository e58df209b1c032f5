pub mod event;
pub mod message;
pub mod persona;
pub mod task;

pub use event::*;
pub use message::*;
pub use persona::*;
pub use task::*;
