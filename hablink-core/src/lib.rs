//! Канальный уровень наземной станции hablink.
//!
//! Передача: посылки переменной длины, отмеченные аннотацией длины,
//! превращаются в непрерывный поток выборок для SDR
//! ([`FixedBurstPadder`] или [`ContinuityMultiplexer`] + [`PostBurstPadder`]).
//!
//! Приём: биты от декодера FEC, у которого могли потеряться последние биты,
//! выравниваются по байтам и проверяются по CRC-32 ([`CrcRecoveryDecoder`]).
//!
//! # Быстрый старт
//!
//! ```
//! use hablink_core::{frame_bits, CrcRecoveryDecoder, RecoveryConfig};
//! use hablink_types::Message;
//!
//! let mut bits = frame_bits(b"telemetry");
//! bits.truncate(bits.len() - 2);
//!
//! let mut decoder = CrcRecoveryDecoder::new(RecoveryConfig::default())?;
//! let payload = decoder.decode_payload(Message::bits(bits))?;
//! assert_eq!(payload, b"telemetry");
//! # Ok::<(), hablink_types::LinkError>(())
//! ```

pub mod bits;
pub mod block;
pub mod continuity_mux;
pub mod crc;
pub mod diagnostics;
pub mod filler;
pub mod fixed_padder;
pub mod framing;
pub mod post_padder;
pub mod recovery;
pub mod stream;
pub mod verify;

pub use bits::*;
pub use block::*;
pub use continuity_mux::*;
pub use crc::*;
pub use diagnostics::*;
pub use filler::*;
pub use fixed_padder::*;
pub use framing::*;
pub use post_padder::*;
pub use recovery::*;
pub use stream::*;
pub use verify::*;

/// Версия библиотеки.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_exports() {
        assert_eq!(MAX_SEARCH_BITS, 16);
        assert_eq!(DEFAULT_HEALTH_INTERVAL, 100_000);
        assert!(!VERSION.is_empty());
    }
}
