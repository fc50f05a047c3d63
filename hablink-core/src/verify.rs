//! Сверка принятых пакетов с переданными (петлевой тест).
//!
//! Пакеты сопоставляются по первым 4 байтам полезной нагрузки.

use std::collections::{HashMap, VecDeque};

use log::{info, warn};

/// Сколько байт начала пакета служат ключом сопоставления.
pub const MATCH_KEY_BYTES: usize = 4;

/// Итог сверки одного принятого пакета.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Совпадает с переданным байт в байт
    Identical,
    /// Длины различаются
    LengthMismatch { expected: usize, got: usize },
    /// Первый различающийся байт
    Mismatch {
        index: usize,
        expected: u8,
        got: u8,
    },
    /// Переданный пакет с таким ключом не найден
    Unmatched,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VerifyStats {
    pub sent: u64,
    pub identical: u64,
    pub mismatched: u64,
    pub unmatched: u64,
}

/// Хранит последние переданные пакеты и сверяет с ними принятые.
#[derive(Debug)]
pub struct LoopbackVerifier {
    capacity: usize,
    sent: HashMap<Vec<u8>, Vec<u8>>,
    order: VecDeque<Vec<u8>>,
    stats: VerifyStats,
}

fn match_key(data: &[u8]) -> Vec<u8> {
    data[..data.len().min(MATCH_KEY_BYTES)].to_vec()
}

impl LoopbackVerifier {
    /// `capacity`: сколько последних переданных пакетов помнить.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            sent: HashMap::new(),
            order: VecDeque::new(),
            stats: VerifyStats::default(),
        }
    }

    pub fn stats(&self) -> VerifyStats {
        self.stats
    }

    pub fn pending(&self) -> usize {
        self.sent.len()
    }

    /// Запоминает переданный пакет.
    pub fn record_sent(
        &mut self,
        payload: &[u8],
    ) {
        let key = match_key(payload);
        self.stats.sent += 1;

        if self.sent.insert(key.clone(), payload.to_vec()).is_none() {
            self.order.push_back(key);
        }

        while self.order.len() > self.capacity {
            if let Some(old) = self.order.pop_front() {
                self.sent.remove(&old);
            }
        }
    }

    /// Сверяет принятый пакет.
    pub fn check_received(
        &mut self,
        payload: &[u8],
    ) -> Verdict {
        let key = match_key(payload);

        let Some(expected) = self.sent.get(&key) else {
            self.stats.unmatched += 1;
            warn!("Received packet has no matching input ({} bytes)", payload.len());
            return Verdict::Unmatched;
        };

        let verdict = if expected.len() != payload.len() {
            Verdict::LengthMismatch {
                expected: expected.len(),
                got: payload.len(),
            }
        } else if let Some(index) = expected.iter().zip(payload).position(|(a, b)| a != b) {
            Verdict::Mismatch {
                index,
                expected: expected[index],
                got: payload[index],
            }
        } else {
            Verdict::Identical
        };

        match &verdict {
            Verdict::Identical => {
                self.stats.identical += 1;
                info!("Packet identical ({} bytes)", payload.len());
            }
            other => {
                self.stats.mismatched += 1;
                warn!("Packet mismatch: {other:?}");
            }
        }

        verdict
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_and_mismatch() {
        let mut v = LoopbackVerifier::new(8);
        v.record_sent(&[1, 2, 3, 4, 5, 6]);

        assert_eq!(v.check_received(&[1, 2, 3, 4, 5, 6]), Verdict::Identical);
        assert_eq!(
            v.check_received(&[1, 2, 3, 4, 9, 6]),
            Verdict::Mismatch {
                index: 4,
                expected: 5,
                got: 9,
            }
        );
        assert_eq!(
            v.check_received(&[1, 2, 3, 4]),
            Verdict::LengthMismatch {
                expected: 6,
                got: 4,
            }
        );
        assert_eq!(v.check_received(&[9, 9, 9, 9]), Verdict::Unmatched);

        let s = v.stats();
        assert_eq!((s.identical, s.mismatched, s.unmatched), (1, 2, 1));
    }

    #[test]
    fn test_short_packets_use_whole_payload_as_key() {
        let mut v = LoopbackVerifier::new(8);
        v.record_sent(&[7, 7]);
        assert_eq!(v.check_received(&[7, 7]), Verdict::Identical);
    }

    #[test]
    fn test_history_is_bounded() {
        let mut v = LoopbackVerifier::new(2);
        v.record_sent(&[1, 0, 0, 0]);
        v.record_sent(&[2, 0, 0, 0]);
        v.record_sent(&[3, 0, 0, 0]);

        assert_eq!(v.pending(), 2);
        assert_eq!(v.check_received(&[1, 0, 0, 0]), Verdict::Unmatched);
        assert_eq!(v.check_received(&[3, 0, 0, 0]), Verdict::Identical);
    }
}
