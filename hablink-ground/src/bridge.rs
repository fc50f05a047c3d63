//! Мост между приёмным пайплайном и GUI.
//!
//! Один производитель, один потребитель, ограниченная очередь. Если GUI не
//! успевает, новые отчёты отбрасываются: приём не должен ждать интерфейс.

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use hablink_core::Verdict;
use hablink_types::{CrcOutcome, RecoveredPacket};
use serde::Serialize;

use crate::{GroundError, GroundResult};

/// Итог приёма одного пакета для отображения.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PacketReport {
    pub sequence: u64,
    pub bits_received: usize,
    pub pad_bits: u8,
    pub payload_bytes: usize,
    pub outcome: CrcOutcome,
    /// Результат сверки с переданным пакетом (только в петле)
    pub verdict: Option<String>,
}

impl PacketReport {
    pub fn new(
        packet: &RecoveredPacket,
        verdict: Option<&Verdict>,
    ) -> Self {
        Self {
            sequence: packet.sequence,
            bits_received: packet.bits_received,
            pad_bits: packet.pad_bits,
            payload_bytes: packet.payload().len(),
            outcome: packet.outcome,
            verdict: verdict.map(|v| format!("{v:?}")),
        }
    }
}

/// Производящая сторона моста.
pub struct GuiBridge {
    tx: Sender<PacketReport>,
    dropped: Arc<AtomicU64>,
}

impl GuiBridge {
    pub fn new(capacity: usize) -> (Self, Receiver<PacketReport>) {
        let (tx, rx) = crossbeam_channel::bounded(capacity.max(1));
        let bridge = Self {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        };

        (bridge, rx)
    }

    /// Кладёт отчёт в очередь без ожидания.
    pub fn publish(
        &self,
        report: PacketReport,
    ) -> GroundResult<()> {
        match self.tx.try_send(report) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                Err(GroundError::QueueOverflow { dropped })
            }
            Err(TrySendError::Disconnected(_)) => {
                Err(GroundError::Pipeline("GUI bridge receiver closed".to_string()))
            }
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Поток моста: забирает отчёты и передаёт их обработчику GUI.
///
/// Завершается, когда производитель закрыт и очередь пуста. Возвращает
/// число обработанных отчётов.
pub fn spawn_bridge<F>(
    rx: Receiver<PacketReport>,
    mut handler: F,
) -> JoinHandle<u64>
where
    F: FnMut(PacketReport) + Send + 'static,
{
    thread::spawn(move || {
        let mut handled = 0;

        loop {
            match rx.recv_timeout(Duration::from_millis(100)) {
                Ok(report) => {
                    handler(report);
                    handled += 1;
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        handled
    })
}
