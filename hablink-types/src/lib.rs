pub mod error;
pub mod packet;
pub mod pdu;
pub mod sample;
pub mod tag;

pub use error::*;
pub use packet::*;
pub use pdu::*;
pub use sample::*;
pub use tag::*;
