//! Упаковка и распаковка битов.
//!
//! Декодер FEC выдаёт биты в распакованном виде: один бит на байт, значение
//! 0 или 1. Упаковка идёт по 8 бит в байт, старший бит первым (MSB first).

use log::warn;

use hablink_types::{LinkError, LinkResult};

/// Больше стольких бит дополнения обычно не теряется при усечении
/// терминирующих бит свёрточного кода.
pub const TYPICAL_MAX_PAD_BITS: u8 = 2;

/// Упаковщик битов (MSB first).
#[derive(Debug, Clone, Copy, Default)]
pub struct BitPacker {
    /// Любое ненулевое значение считается единицей
    lenient: bool,
}

impl BitPacker {
    /// Строгий упаковщик: допускаются только значения 0 и 1.
    pub fn new() -> Self {
        Self { lenient: false }
    }

    /// Нестрогий упаковщик: любое ненулевое значение считается 1.
    pub fn lenient() -> Self {
        Self { lenient: true }
    }

    /// Упаковывает биты в байты.
    ///
    /// Длина обязана быть кратна 8: дополнение до границы байта делается
    /// отдельным шагом ([`pad_to_byte`] или перебор в декодере CRC).
    pub fn pack(
        &self,
        bits: &[u8],
    ) -> LinkResult<Vec<u8>> {
        if bits.len() % 8 != 0 {
            return Err(LinkError::InvalidLength { len: bits.len() });
        }

        self.check_units(bits)?;

        Ok(bits.chunks_exact(8).map(pack_byte).collect())
    }

    /// Проверяет, что каждый элемент является битом.
    pub fn check_units(
        &self,
        bits: &[u8],
    ) -> LinkResult<()> {
        if self.lenient {
            return Ok(());
        }

        match bits.iter().position(|&b| b > 1) {
            Some(index) => Err(LinkError::InvalidUnit {
                index,
                value: bits[index],
            }),
            None => Ok(()),
        }
    }

    /// Дополняет нулями до границы байта и упаковывает.
    ///
    /// Возвращает байты и число дописанных бит. Если дописано больше
    /// [`TYPICAL_MAX_PAD_BITS`], пишется предупреждение: потеря такого числа
    /// бит на практике означает сбой декодера, а не усечение терминации.
    pub fn pad_and_pack(
        &self,
        bits: &[u8],
    ) -> LinkResult<(Vec<u8>, u8)> {
        let mut padded = bits.to_vec();
        let pad = pad_to_byte(&mut padded);

        if pad > TYPICAL_MAX_PAD_BITS {
            warn!("Packing {pad} padding bits, more than {TYPICAL_MAX_PAD_BITS}");
        }

        Ok((self.pack(&padded)?, pad))
    }
}

/// Распаковывает байты в биты (один бит на байт, MSB first).
pub fn unpack(bytes: &[u8]) -> Vec<u8> {
    let mut bits = Vec::with_capacity(bytes.len() * 8);

    for &byte in bytes {
        for shift in (0..8).rev() {
            bits.push((byte >> shift) & 0x01);
        }
    }

    bits
}

/// Сколько бит не хватает до границы байта: `(8 - n mod 8) mod 8`.
pub fn missing_to_byte(n_bits: usize) -> u8 {
    ((8 - n_bits % 8) % 8) as u8
}

/// Дописывает нулевые биты до границы байта. Возвращает их число.
pub fn pad_to_byte(bits: &mut Vec<u8>) -> u8 {
    let pad = missing_to_byte(bits.len());
    bits.resize(bits.len() + pad as usize, 0);
    pad
}

/// Дописывает `width` младших бит `pattern`, старший первым.
///
/// Младший бит шаблона оказывается последним, так что значение шаблона
/// совпадает со значением недостающего хвоста.
pub fn append_pattern(
    bits: &mut Vec<u8>,
    pattern: u32,
    width: u8,
) {
    for shift in (0..width).rev() {
        bits.push(((pattern >> shift) & 0x01) as u8);
    }
}

fn pack_byte(chunk: &[u8]) -> u8 {
    chunk
        .iter()
        .fold(0u8, |acc, &bit| (acc << 1) | u8::from(bit != 0))
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_reference_byte() {
        let packed = BitPacker::new().pack(&[1, 0, 1, 0, 0, 0, 0, 0]).unwrap();
        assert_eq!(packed, vec![0xA0]);
    }

    #[test]
    fn test_pack_is_msb_first() {
        let bits = [0, 0, 0, 0, 0, 0, 0, 1, 1, 0, 0, 0, 0, 0, 0, 0];
        let packed = BitPacker::new().pack(&bits).unwrap();
        assert_eq!(packed, vec![0x01, 0x80]);
    }

    #[test]
    fn test_pack_rejects_unaligned_length() {
        let err = BitPacker::new().pack(&[1, 0, 1]).unwrap_err();
        assert!(matches!(err, LinkError::InvalidLength { len: 3 }));
    }

    #[test]
    fn test_pack_rejects_non_bit_units() {
        let bits = [1, 0, 2, 0, 0, 0, 0, 0];
        let err = BitPacker::new().pack(&bits).unwrap_err();
        assert!(matches!(err, LinkError::InvalidUnit { index: 2, value: 2 }));

        // В нестрогом режиме 2 считается единицей
        let packed = BitPacker::lenient().pack(&bits).unwrap();
        assert_eq!(packed, vec![0xA0]);
    }

    #[test]
    fn test_unpack_then_pack_is_identity() {
        let bytes = vec![0x00, 0xFF, 0x5A, 0xC3];
        let bits = unpack(&bytes);

        assert_eq!(bits.len(), 32);
        assert_eq!(&bits[16..24], &[0, 1, 0, 1, 1, 0, 1, 0]);
        assert_eq!(BitPacker::new().pack(&bits).unwrap(), bytes);
    }

    #[test]
    fn test_missing_to_byte() {
        assert_eq!(missing_to_byte(0), 0);
        assert_eq!(missing_to_byte(190), 2);
        assert_eq!(missing_to_byte(189), 3);
        assert_eq!(missing_to_byte(192), 0);
        assert_eq!(missing_to_byte(1), 7);
    }

    #[test]
    fn test_append_pattern_lsb_last() {
        let mut bits = vec![];
        append_pattern(&mut bits, 0b01, 2);
        assert_eq!(bits, vec![0, 1]);

        let mut bits = vec![];
        append_pattern(&mut bits, 0b110, 3);
        assert_eq!(bits, vec![1, 1, 0]);
    }

    #[test]
    fn test_pad_and_pack() {
        let (packed, pad) = BitPacker::new()
            .pad_and_pack(&[1, 1, 1, 1, 1, 1])
            .unwrap();
        assert_eq!(pad, 2);
        assert_eq!(packed, vec![0xFC]);
    }
}
