//! Формирование посылок на передающей стороне.
//!
//! Полезная нагрузка получает хвост CRC-32 и распаковывается в биты перед
//! кодером. Для симуляции без модулятора биты отображаются в символы BPSK.

use hablink_types::{Sample, Unit};

use crate::{bits::unpack, crc::append_crc, stream::AnnotatedStream};

/// Пакет с CRC в виде битов (MSB first), как его ждёт кодер.
pub fn frame_bits(payload: &[u8]) -> Vec<u8> {
    unpack(&append_crc(payload))
}

/// Имитирует усечение терминирующих бит декодером.
pub fn drop_trailing_bits(
    mut bits: Vec<u8>,
    dropped: usize,
) -> Vec<u8> {
    let keep = bits.len().saturating_sub(dropped);
    bits.truncate(keep);
    bits
}

/// Отображение бит в BPSK: 0 → -1, 1 → +1, по `samples_per_symbol` выборок.
pub fn bpsk_map(
    bits: &[u8],
    samples_per_symbol: usize,
) -> Vec<Sample> {
    let sps = samples_per_symbol.max(1);
    let mut out = Vec::with_capacity(bits.len() * sps);

    for &bit in bits {
        let level = if bit != 0 { 1.0 } else { -1.0 };
        out.extend(std::iter::repeat(Sample::new(level, 0.0)).take(sps));
    }

    out
}

/// Жёсткое решение по BPSK-символам (среднее по символу).
pub fn bpsk_slice(
    samples: &[Sample],
    samples_per_symbol: usize,
) -> Vec<u8> {
    let sps = samples_per_symbol.max(1);

    samples
        .chunks_exact(sps)
        .map(|sym| u8::from(sym.iter().map(|s| s.re).sum::<f32>() > 0.0))
        .collect()
}

/// Пишет посылки в поток, отмечая начало каждой аннотацией длины.
#[derive(Debug, Clone)]
pub struct BurstFramer {
    len_tag_key: String,
    bursts: u64,
    units: u64,
}

impl BurstFramer {
    pub fn new<K: Into<String>>(len_tag_key: K) -> Self {
        Self {
            len_tag_key: len_tag_key.into(),
            bursts: 0,
            units: 0,
        }
    }

    pub fn len_tag_key(&self) -> &str {
        &self.len_tag_key
    }

    /// Дописывает посылку; возвращает смещение её начала.
    pub fn push_burst<T: Unit>(
        &mut self,
        stream: &mut AnnotatedStream<T>,
        burst: &[T],
    ) -> u64 {
        let offset = stream.write_offset();
        stream.annotate(self.len_tag_key.clone(), burst.len() as i64);
        stream.extend_from_slice(burst);

        self.bursts += 1;
        self.units += burst.len() as u64;
        offset
    }

    pub fn bursts(&self) -> u64 {
        self.bursts
    }

    pub fn units(&self) -> u64 {
        self.units
    }
}

#[cfg(test)]
mod tests {
    use hablink_types::{TagValue, PACKET_LEN_KEY};

    use super::*;
    use crate::crc::check_crc;

    #[test]
    fn test_frame_bits_length() {
        let bits = frame_bits(&[0u8; 23]);
        assert_eq!(bits.len(), 184 + 32);
    }

    #[test]
    fn test_drop_trailing_bits() {
        let bits = drop_trailing_bits(vec![1, 0, 1, 1], 2);
        assert_eq!(bits, vec![1, 0]);
        assert!(drop_trailing_bits(vec![1], 5).is_empty());
    }

    #[test]
    fn test_bpsk_map_and_slice() {
        let bits = vec![1, 0, 0, 1, 1];
        let samples = bpsk_map(&bits, 4);

        assert_eq!(samples.len(), 20);
        assert_eq!(samples[0], Sample::new(1.0, 0.0));
        assert_eq!(samples[4], Sample::new(-1.0, 0.0));
        assert_eq!(bpsk_slice(&samples, 4), bits);
    }

    #[test]
    fn test_burst_framer_annotates_start() {
        let mut stream = AnnotatedStream::<u8>::new();
        stream.extend_from_slice(&[0; 3]);
        let mut framer = BurstFramer::new(PACKET_LEN_KEY);

        let payload = frame_bits(b"abc");
        let offset = framer.push_burst(&mut stream, &payload);

        assert_eq!(offset, 3);
        assert_eq!(stream.tags()[0].offset, 3);
        assert_eq!(stream.tags()[0].value, TagValue::Int(payload.len() as i64));
        assert_eq!(framer.bursts(), 1);

        let packed = crate::bits::BitPacker::new().pack(&stream.items()[3..]).unwrap();
        assert!(check_crc(&packed).unwrap().is_match());
    }
}
