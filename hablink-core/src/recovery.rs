//! Восстановление выравнивания по байтам с проверкой CRC.
//!
//! Декодер свёрточного кода с усечением может потерять несколько последних
//! бит пакета. Пакет на канале: `payload || crc32(payload)` (LE), так что
//! недостающие биты находятся перебором: для каждого из `2^m` вариантов
//! хвоста пакет упаковывается и сверяется CRC. Побеждает наименьший
//! подошедший вариант.

use crc32fast::Hasher;
use log::{debug, warn};

use hablink_types::{
    CrcOutcome, LinkError, LinkResult, Message, Metadata, RecoveredPacket, CRC_FIELD_BYTES,
};

use crate::{
    bits::{append_pattern, missing_to_byte, pad_to_byte, BitPacker},
    crc::crc32_checksum,
    diagnostics::{null_diagnostics, DiagnosticEvent, Diagnostics},
};

/// Верхняя граница ширины перебора (2^16 вариантов).
pub const MAX_SEARCH_BITS: u8 = 16;

/// Ширина перебора по умолчанию: сколько бит может не хватать до байта.
pub const DEFAULT_MAX_MISSING_BITS: u8 = 7;

const CRC_FIELD_BITS: usize = CRC_FIELD_BYTES * 8;

/// Параметры декодера.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryConfig {
    /// Ожидаемая полная длина пакета в битах (данные + CRC)
    pub expected_bits: Option<usize>,
    /// Максимальное число недостающих бит для перебора
    pub max_missing_bits: u8,
    /// Любое ненулевое значение на входе считается единицей
    pub lenient_units: bool,
    /// Продолжать перебор после первого совпадения
    pub detect_ambiguity: bool,
    /// `false`: только нулевое дополнение и проверка, без перебора
    pub search_patterns: bool,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            expected_bits: None,
            max_missing_bits: DEFAULT_MAX_MISSING_BITS,
            lenient_units: false,
            detect_ambiguity: true,
            search_patterns: true,
        }
    }
}

impl RecoveryConfig {
    /// Конфигурация для пакетов с известной длиной полезной нагрузки.
    pub fn for_payload_bytes(payload_bytes: usize) -> Self {
        Self {
            expected_bits: Some(payload_bytes * 8 + CRC_FIELD_BITS),
            ..Self::default()
        }
    }

    /// Режим без перебора: дополнение нулями и проверка CRC.
    pub fn zero_pad_only() -> Self {
        Self {
            search_patterns: false,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> LinkResult<()> {
        if self.max_missing_bits > MAX_SEARCH_BITS {
            return Err(LinkError::config(format!(
                "max_missing_bits {} exceeds {MAX_SEARCH_BITS}",
                self.max_missing_bits
            )));
        }

        if let Some(bits) = self.expected_bits {
            if bits % 8 != 0 || bits < CRC_FIELD_BITS {
                return Err(LinkError::config(format!(
                    "expected_bits {bits} must be a multiple of 8 and at least {CRC_FIELD_BITS}"
                )));
            }
        }

        Ok(())
    }
}

/// Накопительная статистика декодера.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryStats {
    pub messages: u64,
    pub validated_zero_pad: u64,
    pub validated_pattern: u64,
    pub failed: u64,
    pub ambiguous: u64,
    pub rejected: u64,
}

impl RecoveryStats {
    pub fn recovered(&self) -> u64 {
        self.validated_zero_pad + self.validated_pattern
    }
}

/// Декодер: биты от FEC → выровненный пакет с итогом проверки CRC.
pub struct CrcRecoveryDecoder {
    config: RecoveryConfig,
    packer: BitPacker,
    diagnostics: Diagnostics,
    sequence: u64,
    stats: RecoveryStats,
}

/// Результат перебора.
struct Search {
    matches: Vec<u32>,
    tried: u32,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl CrcRecoveryDecoder {
    pub fn new(config: RecoveryConfig) -> LinkResult<Self> {
        config.validate()?;

        let packer = if config.lenient_units {
            BitPacker::lenient()
        } else {
            BitPacker::new()
        };

        Ok(Self {
            config,
            packer,
            diagnostics: null_diagnostics(),
            sequence: 0,
            stats: RecoveryStats::default(),
        })
    }

    pub fn with_diagnostics(
        mut self,
        diagnostics: Diagnostics,
    ) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    pub fn config(&self) -> &RecoveryConfig {
        &self.config
    }

    pub fn stats(&self) -> RecoveryStats {
        self.stats
    }

    /// Восстанавливает один пакет.
    ///
    /// Ошибка возвращается только для некорректного сообщения; несовпадение
    /// CRC даёт пакет с итогом [`CrcOutcome::Failed`].
    pub fn decode(
        &mut self,
        msg: Message,
    ) -> LinkResult<RecoveredPacket> {
        self.sequence += 1;
        self.stats.messages += 1;
        let sequence = self.sequence;

        let (meta, bits) = match msg.into_vector() {
            Ok(v) => v,
            Err(e) => return Err(self.reject(sequence, e)),
        };

        // Сырой буфер уходит в диагностику до любых проверок содержимого
        let n = bits.len();
        self.emit_raw(sequence, &bits);

        if let Err(e) = self.packer.check_units(&bits) {
            return Err(self.reject(sequence, e));
        }

        let m = self.missing_bits(n);
        if n + (m as usize) < CRC_FIELD_BITS {
            let e = LinkError::format(format!(
                "Packet of {n} bits is shorter than the CRC field"
            ));
            return Err(self.reject(sequence, e));
        }

        if self.config.search_patterns && m <= self.config.max_missing_bits {
            self.search(sequence, meta, &bits, m)
        } else {
            self.zero_pad(sequence, meta, &bits, m)
        }
    }

    /// Восстанавливает пакет и возвращает полезную нагрузку без CRC.
    pub fn decode_payload(
        &mut self,
        msg: Message,
    ) -> LinkResult<Vec<u8>> {
        self.decode(msg)?.into_payload()
    }

    /// Сколько бит не хватает: по ожидаемой длине, если она согласуется с
    /// полученной, иначе по выравниванию до байта.
    fn missing_bits(
        &self,
        n: usize,
    ) -> u8 {
        let aligned = missing_to_byte(n);

        match self.config.expected_bits {
            Some(expected) if expected >= n => {
                let m = expected - n;
                if m <= self.config.max_missing_bits as usize {
                    m as u8
                } else {
                    debug!("Received {n} of {expected} bits; using byte alignment");
                    aligned
                }
            }
            Some(expected) => {
                debug!("Received {n} bits, more than expected {expected}");
                aligned
            }
            None => aligned,
        }
    }

    fn reject(
        &mut self,
        sequence: u64,
        err: LinkError,
    ) -> LinkError {
        self.stats.rejected += 1;
        self.diagnostics.emit(DiagnosticEvent::FormatRejected {
            sequence,
            reason: err.to_string(),
        });
        err
    }

    fn emit_raw(
        &self,
        sequence: u64,
        bits: &[u8],
    ) {
        let mut raw = bits.to_vec();
        pad_to_byte(&mut raw);

        // Нестрогая упаковка: в сыром буфере допустимы и не-биты
        self.diagnostics.emit(DiagnosticEvent::RawBuffer {
            sequence,
            bits_received: bits.len(),
            bytes: BitPacker::lenient().pack(&raw).unwrap_or_default(),
        });
    }

    /// Пакет с хвостом `pattern` шириной `m` бит.
    fn candidate(
        &self,
        bits: &[u8],
        pattern: u32,
        m: u8,
    ) -> LinkResult<Vec<u8>> {
        let mut full = Vec::with_capacity(bits.len() + m as usize);
        full.extend_from_slice(bits);
        append_pattern(&mut full, pattern, m);
        self.packer.pack(&full)
    }

    /// Перебор `2^m` хвостов по возрастанию.
    fn run_search(
        &self,
        bits: &[u8],
        m: u8,
    ) -> LinkResult<Search> {
        let n = bits.len();
        let aligned = n - n % 8;
        let total_bytes = (n + m as usize) / 8;
        let payload_len = total_bytes - CRC_FIELD_BYTES;

        // Выровненная часть одинакова для всех вариантов
        let mut packet = self.packer.pack(&bits[..aligned])?;
        let prefix_len = packet.len();
        let hashed = payload_len.min(prefix_len);
        let mut base = Hasher::new();
        base.update(&packet[..hashed]);

        let mut tail = Vec::with_capacity(n - aligned + m as usize);
        let mut search = Search {
            matches: Vec::new(),
            tried: 0,
        };

        for pattern in 0..(1u32 << m) {
            search.tried += 1;

            tail.clear();
            tail.extend_from_slice(&bits[aligned..]);
            append_pattern(&mut tail, pattern, m);

            packet.truncate(prefix_len);
            packet.extend(self.packer.pack(&tail)?);

            let mut hasher = base.clone();
            hasher.update(&packet[hashed..payload_len]);

            if hasher.finalize() == received_crc(&packet, payload_len) {
                search.matches.push(pattern);
                if !self.config.detect_ambiguity {
                    break;
                }
            }
        }

        Ok(search)
    }

    fn search(
        &mut self,
        sequence: u64,
        meta: Metadata,
        bits: &[u8],
        m: u8,
    ) -> LinkResult<RecoveredPacket> {
        let search = self.run_search(bits, m)?;

        let Some(&chosen) = search.matches.first() else {
            let bytes = self.candidate(bits, 0, m)?;
            return Ok(self.failed(sequence, meta, bits.len(), bytes, m, search.tried));
        };

        let ambiguous = search.matches.len() > 1;
        if ambiguous {
            self.stats.ambiguous += 1;
            self.diagnostics.emit(DiagnosticEvent::AmbiguousPattern {
                sequence,
                chosen,
                matches: search.matches.clone(),
            });
        }

        let outcome = if chosen == 0 {
            CrcOutcome::ValidatedZeroPad { ambiguous }
        } else {
            CrcOutcome::ValidatedPattern {
                pattern: chosen,
                ambiguous,
            }
        };

        let bytes = self.candidate(bits, chosen, m)?;
        Ok(self.validated(sequence, meta, bits.len(), bytes, m, outcome))
    }

    /// Дополнение нулями без перебора.
    fn zero_pad(
        &mut self,
        sequence: u64,
        meta: Metadata,
        bits: &[u8],
        m: u8,
    ) -> LinkResult<RecoveredPacket> {
        let bytes = if m == missing_to_byte(bits.len()) {
            self.packer.pad_and_pack(bits)?.0
        } else {
            self.candidate(bits, 0, m)?
        };

        let payload_len = bytes.len() - CRC_FIELD_BYTES;
        let computed = crc32_checksum(&bytes[..payload_len]);

        if computed == received_crc(&bytes, payload_len) {
            let outcome = CrcOutcome::ValidatedZeroPad { ambiguous: false };
            Ok(self.validated(sequence, meta, bits.len(), bytes, m, outcome))
        } else {
            Ok(self.failed(sequence, meta, bits.len(), bytes, m, 1))
        }
    }

    fn validated(
        &mut self,
        sequence: u64,
        meta: Metadata,
        bits_received: usize,
        bytes: Vec<u8>,
        pad_bits: u8,
        outcome: CrcOutcome,
    ) -> RecoveredPacket {
        match outcome {
            CrcOutcome::ValidatedPattern { .. } => self.stats.validated_pattern += 1,
            _ => self.stats.validated_zero_pad += 1,
        }

        let payload_len = bytes.len() - CRC_FIELD_BYTES;
        let crc = received_crc(&bytes, payload_len);

        self.diagnostics.emit(DiagnosticEvent::PacketRecovered {
            sequence,
            bits_received,
            pad_bits,
            payload_bytes: payload_len,
            outcome,
        });

        RecoveredPacket {
            sequence,
            meta,
            bytes,
            bits_received,
            pad_bits,
            received_crc: crc,
            computed_crc: crc,
            outcome,
        }
    }

    fn failed(
        &mut self,
        sequence: u64,
        meta: Metadata,
        bits_received: usize,
        bytes: Vec<u8>,
        pad_bits: u8,
        patterns_tried: u32,
    ) -> RecoveredPacket {
        self.stats.failed += 1;

        let payload_len = bytes.len() - CRC_FIELD_BYTES;
        let computed = crc32_checksum(&bytes[..payload_len]);
        let received = received_crc(&bytes, payload_len);

        warn!(
            "Packet #{sequence}: CRC failed for {patterns_tried} pattern(s), \
             {bits_received} bits, {pad_bits} missing"
        );
        self.diagnostics.emit(DiagnosticEvent::CrcFailed {
            sequence,
            bits_received,
            pad_bits,
            patterns_tried,
            computed,
            received,
        });

        RecoveredPacket {
            sequence,
            meta,
            bytes,
            bits_received,
            pad_bits,
            received_crc: received,
            computed_crc: computed,
            outcome: CrcOutcome::Failed { patterns_tried },
        }
    }
}

fn received_crc(
    packet: &[u8],
    payload_len: usize,
) -> u32 {
    let f = &packet[payload_len..payload_len + CRC_FIELD_BYTES];
    u32::from_le_bytes([f[0], f[1], f[2], f[3]])
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use hablink_types::{Pdu, TagValue};

    use super::*;
    use crate::{bits::unpack, crc::append_crc, diagnostics::ChannelSink};

    fn framed_bits(payload: &[u8]) -> Vec<u8> {
        unpack(&append_crc(payload))
    }

    fn decoder() -> CrcRecoveryDecoder {
        CrcRecoveryDecoder::new(RecoveryConfig::default()).unwrap()
    }

    #[test]
    fn test_aligned_packet_validates() {
        let payload = b"hello balloon".to_vec();
        let packet = decoder().decode(Message::bits(framed_bits(&payload))).unwrap();

        assert_eq!(packet.outcome, CrcOutcome::ValidatedZeroPad { ambiguous: false });
        assert_eq!(packet.pad_bits, 0);
        assert_eq!(packet.into_payload().unwrap(), payload);
    }

    #[test]
    fn test_missing_bits_are_recovered() {
        let payload: Vec<u8> = (0u8..23).collect();

        for dropped in 1..=3 {
            let mut bits = framed_bits(&payload);
            bits.truncate(bits.len() - dropped);

            let packet = decoder().decode(Message::bits(bits)).unwrap();
            assert!(packet.is_valid(), "потеряно {dropped} бит");
            assert_eq!(packet.pad_bits as usize, dropped);
            assert_eq!(packet.payload(), payload.as_slice());
        }
    }

    #[test]
    fn test_lowest_pattern_wins_and_matches_tail() {
        // Последний байт CRC известен; проверяем, что найденный шаблон равен
        // потерянному хвосту
        let payload = vec![0x42; 10];
        let full = framed_bits(&payload);
        let mut bits = full.clone();
        bits.truncate(full.len() - 3);
        let tail = (full[full.len() - 3] << 2) | (full[full.len() - 2] << 1) | full[full.len() - 1];

        let packet = decoder().decode(Message::bits(bits)).unwrap();
        match packet.outcome {
            CrcOutcome::ValidatedZeroPad { .. } => assert_eq!(tail, 0),
            CrcOutcome::ValidatedPattern { pattern, .. } => assert_eq!(pattern, tail as u32),
            CrcOutcome::Failed { .. } => panic!("CRC должен совпасть"),
        }
    }

    #[test]
    fn test_corruption_is_reported_not_dropped() {
        let (sink, rx) = ChannelSink::new(16);
        let mut dec = decoder().with_diagnostics(Arc::new(sink));
        let mut bits = framed_bits(&[1, 2, 3, 4, 5, 6, 7, 8]);
        bits[5] ^= 1;
        bits.truncate(bits.len() - 2);

        let packet = dec.decode(Message::bits(bits)).unwrap();

        assert_eq!(packet.outcome, CrcOutcome::Failed { patterns_tried: 4 });
        assert_eq!(packet.bytes.len(), 12, "дополнено нулями до байта");
        assert_eq!(dec.stats().failed, 1);

        let kinds: Vec<&str> = rx.try_iter().map(|e| e.kind()).collect();
        assert_eq!(kinds, vec!["raw_buffer", "crc_failed"]);
    }

    #[test]
    fn test_expected_length_drives_search_width() {
        let payload = vec![0xA5; 4];
        let mut bits = framed_bits(&payload);
        // 9 бит потеряно: по выравниванию вышло бы 7
        bits.truncate(bits.len() - 9);

        let config = RecoveryConfig {
            max_missing_bits: 9,
            ..RecoveryConfig::for_payload_bytes(4)
        };
        let packet = CrcRecoveryDecoder::new(config)
            .unwrap()
            .decode(Message::bits(bits))
            .unwrap();

        assert_eq!(packet.pad_bits, 9);
        assert!(packet.is_valid());
        assert_eq!(packet.payload(), payload.as_slice());
    }

    #[test]
    fn test_format_errors_are_rejected() {
        let (sink, rx) = ChannelSink::new(16);
        let mut dec = decoder().with_diagnostics(Arc::new(sink));

        let not_pair = Message::Value(TagValue::Int(1));
        assert!(matches!(dec.decode(not_pair), Err(LinkError::Format(_))));

        let not_vector = Message::Pdu(Pdu {
            meta: Metadata::new(),
            data: TagValue::from("bits"),
        });
        assert!(dec.decode(not_vector).is_err());

        let too_short = Message::bits(vec![1; 20]);
        assert!(matches!(dec.decode(too_short), Err(LinkError::Format(_))));

        let not_bits = Message::bits(vec![2; 40]);
        assert!(matches!(
            dec.decode(not_bits),
            Err(LinkError::InvalidUnit { index: 0, value: 2 })
        ));

        assert_eq!(dec.stats().rejected, 4);
        let rejected = rx
            .try_iter()
            .filter(|e| e.kind() == "format_rejected")
            .count();
        assert_eq!(rejected, 4);
    }

    #[test]
    fn test_raw_buffer_emitted_for_rejected_bits() {
        let (sink, rx) = ChannelSink::new(16);
        let mut dec = decoder().with_diagnostics(Arc::new(sink));

        let mut bits = vec![0u8; 40];
        bits[3] = 7;
        assert!(dec.decode(Message::bits(bits)).is_err());
        assert!(dec.decode(Message::bits(vec![1; 20])).is_err());

        let events: Vec<_> = rx.try_iter().collect();
        let kinds: Vec<&str> = events.iter().map(|e| e.kind()).collect();
        assert_eq!(
            kinds,
            vec!["raw_buffer", "format_rejected", "raw_buffer", "format_rejected"]
        );
        assert!(matches!(
            &events[0],
            DiagnosticEvent::RawBuffer { bits_received: 40, bytes, .. }
                if bytes == &[0x10, 0, 0, 0, 0]
        ));
    }

    #[test]
    fn test_zero_pad_only_mode() {
        let payload = vec![0x00, 0xFF, 0x10];
        let mut dec = CrcRecoveryDecoder::new(RecoveryConfig::zero_pad_only()).unwrap();

        let aligned = dec.decode(Message::bits(framed_bits(&payload))).unwrap();
        assert!(aligned.is_valid());

        let mut bits = framed_bits(&payload);
        bits.truncate(bits.len() - 1);
        let packet = dec.decode(Message::bits(bits)).unwrap();

        // Без перебора восстанавливается только нулевой хвост
        let last_bit = framed_bits(&payload).last().copied().unwrap();
        assert_eq!(packet.is_valid(), last_bit == 0);
    }

    #[test]
    fn test_sequence_and_metadata_carried() {
        let mut dec = decoder();
        let mut meta = Metadata::new();
        meta.insert("snr".into(), TagValue::Float(9.5));

        dec.decode(Message::bits(framed_bits(&[1]))).unwrap();
        let packet = dec
            .decode(Message::Pdu(Pdu::new(meta.clone(), framed_bits(&[2]))))
            .unwrap();

        assert_eq!(packet.sequence, 2);
        assert_eq!(packet.meta, meta);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let too_wide = RecoveryConfig {
            max_missing_bits: 17,
            ..RecoveryConfig::default()
        };
        assert!(CrcRecoveryDecoder::new(too_wide).is_err());

        let unaligned = RecoveryConfig {
            expected_bits: Some(33),
            ..RecoveryConfig::default()
        };
        assert!(CrcRecoveryDecoder::new(unaligned).is_err());
    }
}
