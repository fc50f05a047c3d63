//! Источники данных станции.
//!
//! Передача: случайные пакеты телеметрии 20-200 байт.
//! Приём: демодулятор и декодер FEC внешние, поэтому здесь их заменяют
//! источники бит. Симулятор сам формирует пакеты, петля берёт посылки у
//! передатчика. Оба теряют последние биты пакета, как усечённый декодер.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use hablink_core::{bpsk_map, bpsk_slice, drop_trailing_bits, frame_bits};
use hablink_types::{Message, Metadata, Pdu, Sample, TagValue};
use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::{GroundError, GroundResult, LinkMetrics};

/// Ключ метаданных с номером пакета у передатчика.
pub const SEQUENCE_KEY: &str = "sequence";

/// Генератор случайной полезной нагрузки.
///
/// Первые 4 байта: номер пакета (big-endian), остальное случайно. Номер
/// делает ключи сверки уникальными.
pub struct RandomBurstSource {
    rng: StdRng,
    min_bytes: usize,
    max_bytes: usize,
    sequence: u32,
}

/// Посылка, переданная в эфир, вместе с исходной нагрузкой (для петли).
#[derive(Debug, Clone)]
pub struct LoopbackFrame {
    pub payload: Vec<u8>,
    pub samples: Vec<Sample>,
}

/// Сообщение от источника бит и, если известна, переданная нагрузка.
#[derive(Debug, Clone)]
pub struct RxFrame {
    pub message: Message,
    pub reference: Option<Vec<u8>>,
}

/// Источник принятых бит (демодулятор + декодер FEC).
pub trait BitSource: Send {
    fn name(&self) -> &str;

    /// Отдаёт сообщения в `tx`. Блокируется до `stop_flag` или конца данных.
    fn run(
        &mut self,
        tx: Sender<RxFrame>,
        metrics: Arc<LinkMetrics>,
        stop_flag: Arc<AtomicBool>,
    ) -> GroundResult<()>;
}

////////////////////////////////////////////////////////////////////////////////
// RandomBurstSource
////////////////////////////////////////////////////////////////////////////////

impl RandomBurstSource {
    pub fn new(
        min_bytes: usize,
        max_bytes: usize,
    ) -> GroundResult<Self> {
        Self::with_rng(min_bytes, max_bytes, StdRng::from_entropy())
    }

    /// Воспроизводимая последовательность для тестов.
    pub fn seeded(
        min_bytes: usize,
        max_bytes: usize,
        seed: u64,
    ) -> GroundResult<Self> {
        Self::with_rng(min_bytes, max_bytes, StdRng::seed_from_u64(seed))
    }

    fn with_rng(
        min_bytes: usize,
        max_bytes: usize,
        rng: StdRng,
    ) -> GroundResult<Self> {
        if min_bytes < 4 || min_bytes > max_bytes {
            return Err(GroundError::config(format!(
                "Invalid payload range {min_bytes}..={max_bytes}"
            )));
        }

        Ok(Self {
            rng,
            min_bytes,
            max_bytes,
            sequence: 0,
        })
    }

    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    pub fn next_payload(&mut self) -> Vec<u8> {
        self.sequence = self.sequence.wrapping_add(1);

        let len = self.rng.gen_range(self.min_bytes..=self.max_bytes);
        let mut payload = Vec::with_capacity(len);
        payload.extend_from_slice(&self.sequence.to_be_bytes());
        payload.extend((4..len).map(|_| self.rng.gen::<u8>()));
        payload
    }
}

/// Сообщение с битами пакета и номером в метаданных.
fn bits_message(
    sequence: u64,
    bits: Vec<u8>,
) -> Message {
    let mut meta = Metadata::new();
    meta.insert(SEQUENCE_KEY.to_string(), TagValue::Int(sequence as i64));
    Message::Pdu(Pdu::new(meta, bits))
}

/// Отправка без блокировки: при полной очереди новое сообщение теряется.
/// Возвращает `false`, если получатель закрыт.
fn offer(
    tx: &Sender<RxFrame>,
    frame: RxFrame,
    metrics: &LinkMetrics,
) -> bool {
    match tx.try_send(frame) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            LinkMetrics::inc(&metrics.frames_dropped);
            true
        }
        Err(TrySendError::Disconnected(_)) => false,
    }
}

////////////////////////////////////////////////////////////////////////////////
// SimulatedBitSource
////////////////////////////////////////////////////////////////////////////////

/// Симулятор приёмного тракта: случайные пакеты с CRC, прошедшие BPSK и
/// усечённые на `dropped_bits` бит.
pub struct SimulatedBitSource {
    payloads: RandomBurstSource,
    dropped_bits: usize,
    interval: Duration,
    max_frames: Option<u64>,
}

impl SimulatedBitSource {
    pub fn new(
        payloads: RandomBurstSource,
        dropped_bits: usize,
        interval: Duration,
    ) -> Self {
        Self {
            payloads,
            dropped_bits,
            interval,
            max_frames: None,
        }
    }

    /// Завершиться после `n` сообщений.
    pub fn limit(
        mut self,
        n: u64,
    ) -> Self {
        self.max_frames = Some(n);
        self
    }
}

impl BitSource for SimulatedBitSource {
    fn name(&self) -> &str {
        "simulated"
    }

    fn run(
        &mut self,
        tx: Sender<RxFrame>,
        metrics: Arc<LinkMetrics>,
        stop_flag: Arc<AtomicBool>,
    ) -> GroundResult<()> {
        let mut sent: u64 = 0;

        while !stop_flag.load(Ordering::Relaxed) {
            if self.max_frames.is_some_and(|max| sent >= max) {
                break;
            }

            let payload = self.payloads.next_payload();
            let symbols = bpsk_map(&frame_bits(&payload), 1);
            let bits = drop_trailing_bits(bpsk_slice(&symbols, 1), self.dropped_bits);

            let frame = RxFrame {
                message: bits_message(self.payloads.sequence() as u64, bits),
                reference: Some(payload),
            };
            if !offer(&tx, frame, &metrics) {
                break;
            }
            sent += 1;

            if !self.interval.is_zero() {
                thread::sleep(self.interval);
            }
        }

        Ok(())
    }
}

////////////////////////////////////////////////////////////////////////////////
// LoopbackBitSource
////////////////////////////////////////////////////////////////////////////////

/// Принимает посылки передатчика (символы BPSK) и превращает их в биты.
pub struct LoopbackBitSource {
    rx: Receiver<LoopbackFrame>,
    samples_per_symbol: usize,
    dropped_bits: usize,
    sequence: u64,
}

impl LoopbackBitSource {
    pub fn new(
        rx: Receiver<LoopbackFrame>,
        samples_per_symbol: usize,
        dropped_bits: usize,
    ) -> Self {
        Self {
            rx,
            samples_per_symbol,
            dropped_bits,
            sequence: 0,
        }
    }
}

impl BitSource for LoopbackBitSource {
    fn name(&self) -> &str {
        "loopback"
    }

    fn run(
        &mut self,
        tx: Sender<RxFrame>,
        metrics: Arc<LinkMetrics>,
        stop_flag: Arc<AtomicBool>,
    ) -> GroundResult<()> {
        let recv_timeout = Duration::from_millis(100);

        while !stop_flag.load(Ordering::Relaxed) {
            let frame = match self.rx.recv_timeout(recv_timeout) {
                Ok(f) => f,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            };

            self.sequence += 1;
            let bits = drop_trailing_bits(
                bpsk_slice(&frame.samples, self.samples_per_symbol),
                self.dropped_bits,
            );

            let rx_frame = RxFrame {
                message: bits_message(self.sequence, bits),
                reference: Some(frame.payload),
            };
            if !offer(&tx, rx_frame, &metrics) {
                break;
            }
        }

        Ok(())
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
