pub mod contact;
pub mod enums;
pub mod message;

pub use contact::*;
pub use enums::*;
pub use message::*;
