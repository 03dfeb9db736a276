pub mod event;
pub mod request;
pub mod state;
pub mod token;

pub use event::*;
pub use request::*;
pub use state::*;
pub use token::*;
