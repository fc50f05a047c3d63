//! CRC-32 хвост пакета.
//!
//! Формат пакета на канале: `payload || crc32(payload)`, где CRC-32
//! (IEEE 802.3) записан в порядке little-endian.

use crc32fast::Hasher;

use hablink_types::CRC_FIELD_BYTES;

/// Результат сверки CRC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrcCheck {
    /// CRC, посчитанный по полезной нагрузке
    pub computed: u32,
    /// CRC из хвоста пакета
    pub received: u32,
}

impl CrcCheck {
    pub fn is_match(&self) -> bool {
        self.computed == self.received
    }
}

/// CRC32 (IEEE 802.3 / crc32fast)
pub fn crc32_checksum(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// Дописывает CRC-32 (little-endian) к полезной нагрузке.
pub fn append_crc(payload: &[u8]) -> Vec<u8> {
    let mut framed = Vec::with_capacity(payload.len() + CRC_FIELD_BYTES);
    framed.extend_from_slice(payload);
    framed.extend_from_slice(&crc32_checksum(payload).to_le_bytes());
    framed
}

/// Сверяет CRC в хвосте пакета. `None`, если пакет короче поля CRC.
pub fn check_crc(packet: &[u8]) -> Option<CrcCheck> {
    let split = packet.len().checked_sub(CRC_FIELD_BYTES)?;
    let (payload, tail) = packet.split_at(split);
    let received = u32::from_le_bytes([tail[0], tail[1], tail[2], tail[3]]);

    Some(CrcCheck {
        computed: crc32_checksum(payload),
        received,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc32_reference_value() {
        // Контрольное значение CRC-32 для ASCII "123456789"
        assert_eq!(crc32_checksum(b"123456789"), 0xCBF4_3926);
    }

    #[test]
    fn test_append_crc_little_endian() {
        let framed = append_crc(b"123456789");
        assert_eq!(framed.len(), 13);
        assert_eq!(&framed[9..], &[0x26, 0x39, 0xF4, 0xCB]);
        assert!(check_crc(&framed).unwrap().is_match());
    }

    #[test]
    fn test_check_crc_detects_corruption() {
        let mut framed = append_crc(&[1, 2, 3, 4, 5]);
        framed[0] ^= 0x10;
        assert!(!check_crc(&framed).unwrap().is_match());
    }

    #[test]
    fn test_check_crc_short_packet() {
        assert!(check_crc(&[1, 2, 3]).is_none());
        // Пустая нагрузка: CRC(пусто) = 0
        assert!(check_crc(&[0, 0, 0, 0]).unwrap().is_match());
    }
}
