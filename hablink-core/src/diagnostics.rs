//! Диагностический канал.
//!
//! Каждое решение блоков (восстановление пакета, дополнение посылки,
//! пропуск аннотации) публикуется как структурированное событие
//! [`DiagnosticEvent`]. Куда события попадают, решает приёмник
//! [`DiagnosticSink`]: в лог с ограничением частоты, в ограниченную очередь,
//! в файл JSON Lines или никуда.

use std::{
    collections::HashMap,
    io::Write,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
    time::{Duration, Instant},
};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use log::{debug, info, warn};
use serde::Serialize;

use hablink_types::{CrcOutcome, LinkResult};

/// Диагностическое событие.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DiagnosticEvent {
    /// Упакованный буфер до восстановления (недостающие биты нулевые)
    RawBuffer {
        sequence: u64,
        bits_received: usize,
        bytes: Vec<u8>,
    },
    /// Пакет прошёл проверку CRC
    PacketRecovered {
        sequence: u64,
        bits_received: usize,
        pad_bits: u8,
        payload_bytes: usize,
        outcome: CrcOutcome,
    },
    /// Ни один шаблон дополнения не подошёл
    CrcFailed {
        sequence: u64,
        bits_received: usize,
        pad_bits: u8,
        patterns_tried: u32,
        computed: u32,
        received: u32,
    },
    /// CRC совпал более чем с одним шаблоном
    AmbiguousPattern {
        sequence: u64,
        chosen: u32,
        matches: Vec<u32>,
    },
    /// Некорректная аннотация длины пропущена
    AnnotationSkipped {
        sequence: u64,
        block: String,
        offset: u64,
        key: String,
        reason: String,
    },
    /// Посылка не поместилась в буфер и усечена
    BurstTruncated {
        sequence: u64,
        declared: u64,
        realized: u64,
        capacity: usize,
    },
    /// Посылка дополнена до фиксированного размера
    BurstPadded {
        sequence: u64,
        declared: u64,
        realized: u64,
        filler: u64,
    },
    /// Посылка продлена хвостовым дополнением
    BurstExtended {
        sequence: u64,
        offset: u64,
        declared: u64,
        padding: u64,
    },
    /// Периодический отчёт мультиплексора
    MuxHealth {
        sequence: u64,
        filler_units: u64,
        burst_units: u64,
    },
    /// Сообщение отклонено как некорректное
    FormatRejected { sequence: u64, reason: String },
}

impl DiagnosticEvent {
    /// Имя вида события (совпадает с полем `kind` в JSON).
    pub fn kind(&self) -> &'static str {
        match self {
            DiagnosticEvent::RawBuffer { .. } => "raw_buffer",
            DiagnosticEvent::PacketRecovered { .. } => "packet_recovered",
            DiagnosticEvent::CrcFailed { .. } => "crc_failed",
            DiagnosticEvent::AmbiguousPattern { .. } => "ambiguous_pattern",
            DiagnosticEvent::AnnotationSkipped { .. } => "annotation_skipped",
            DiagnosticEvent::BurstTruncated { .. } => "burst_truncated",
            DiagnosticEvent::BurstPadded { .. } => "burst_padded",
            DiagnosticEvent::BurstExtended { .. } => "burst_extended",
            DiagnosticEvent::MuxHealth { .. } => "mux_health",
            DiagnosticEvent::FormatRejected { .. } => "format_rejected",
        }
    }

    pub fn sequence(&self) -> u64 {
        match self {
            DiagnosticEvent::RawBuffer { sequence, .. }
            | DiagnosticEvent::PacketRecovered { sequence, .. }
            | DiagnosticEvent::CrcFailed { sequence, .. }
            | DiagnosticEvent::AmbiguousPattern { sequence, .. }
            | DiagnosticEvent::AnnotationSkipped { sequence, .. }
            | DiagnosticEvent::BurstTruncated { sequence, .. }
            | DiagnosticEvent::BurstPadded { sequence, .. }
            | DiagnosticEvent::BurstExtended { sequence, .. }
            | DiagnosticEvent::MuxHealth { sequence, .. }
            | DiagnosticEvent::FormatRejected { sequence, .. } => *sequence,
        }
    }

    /// События, означающие потерю или порчу данных.
    pub fn is_warning(&self) -> bool {
        matches!(
            self,
            DiagnosticEvent::CrcFailed { .. }
                | DiagnosticEvent::AmbiguousPattern { .. }
                | DiagnosticEvent::AnnotationSkipped { .. }
                | DiagnosticEvent::BurstTruncated { .. }
                | DiagnosticEvent::FormatRejected { .. }
        )
    }
}

/// Приёмник диагностических событий.
///
/// Вызывается из рабочего цикла блока, поэтому не должен блокироваться.
pub trait DiagnosticSink: Send + Sync {
    fn emit(
        &self,
        event: DiagnosticEvent,
    );
}

/// Разделяемый приёмник, который получают блоки.
pub type Diagnostics = Arc<dyn DiagnosticSink>;

/// Приёмник по умолчанию: события отбрасываются.
pub fn null_diagnostics() -> Diagnostics {
    Arc::new(NullSink)
}

////////////////////////////////////////////////////////////////////////////////
// NullSink
////////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl DiagnosticSink for NullSink {
    fn emit(
        &self,
        _event: DiagnosticEvent,
    ) {
    }
}

////////////////////////////////////////////////////////////////////////////////
// LogSink
////////////////////////////////////////////////////////////////////////////////

/// Окно ограничителя частоты для одного вида событий.
#[derive(Debug)]
struct RateWindow {
    started: Instant,
    passed: u32,
    suppressed: u64,
}

/// Пишет события в `log` с ограничением частоты по каждому виду события.
///
/// Не более `max_events_per_sec` событий одного вида за секунду; число
/// подавленных событий сообщается при смене окна.
pub struct LogSink {
    max_events_per_sec: u32,
    window: Duration,
    windows: Mutex<HashMap<&'static str, RateWindow>>,
}

impl LogSink {
    pub fn new(max_events_per_sec: u32) -> Self {
        Self::with_window(max_events_per_sec, Duration::from_secs(1))
    }

    pub fn with_window(
        max_events_per_sec: u32,
        window: Duration,
    ) -> Self {
        Self {
            max_events_per_sec,
            window,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Решает, пропускать ли событие. Возвращает (пропустить, подавлено в
    /// закрытом окне).
    fn admit(
        &self,
        kind: &'static str,
    ) -> (bool, u64) {
        let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();

        let w = windows.entry(kind).or_insert(RateWindow {
            started: now,
            passed: 0,
            suppressed: 0,
        });

        let mut reported = 0;
        if now.duration_since(w.started) >= self.window {
            reported = w.suppressed;
            w.started = now;
            w.passed = 0;
            w.suppressed = 0;
        }

        if w.passed < self.max_events_per_sec {
            w.passed += 1;
            (true, reported)
        } else {
            w.suppressed += 1;
            (false, reported)
        }
    }
}

impl DiagnosticSink for LogSink {
    fn emit(
        &self,
        event: DiagnosticEvent,
    ) {
        let kind = event.kind();
        let (admitted, suppressed) = self.admit(kind);

        if suppressed > 0 {
            warn!("Suppressed {suppressed} '{kind}' diagnostic event(s)");
        }

        if !admitted {
            return;
        }

        match &event {
            DiagnosticEvent::RawBuffer {
                sequence,
                bits_received,
                bytes,
            } => debug!("#{sequence} raw buffer: {bits_received} bits, {} bytes", bytes.len()),
            DiagnosticEvent::PacketRecovered {
                sequence,
                pad_bits,
                payload_bytes,
                outcome,
                ..
            } => info!("#{sequence} packet OK: {payload_bytes} bytes, {pad_bits} pad bit(s), {outcome:?}"),
            DiagnosticEvent::MuxHealth {
                filler_units,
                burst_units,
                ..
            } => debug!("Mux health: filler={filler_units} burst={burst_units}"),
            DiagnosticEvent::BurstPadded {
                sequence,
                declared,
                filler,
                ..
            } => debug!("#{sequence} burst padded: {declared} + {filler} filler"),
            DiagnosticEvent::BurstExtended {
                sequence,
                offset,
                declared,
                padding,
            } => debug!("#{sequence} burst at {offset} extended: {declared} + {padding}"),
            other if other.is_warning() => match serde_json::to_string(other) {
                Ok(json) => warn!("{json}"),
                Err(_) => warn!("{other:?}"),
            },
            other => debug!("{other:?}"),
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// ChannelSink
////////////////////////////////////////////////////////////////////////////////

/// Отправляет события в ограниченную очередь.
///
/// При переполнении новое событие отбрасывается и учитывается в `dropped`.
pub struct ChannelSink {
    tx: Sender<DiagnosticEvent>,
    dropped: AtomicU64,
}

impl ChannelSink {
    pub fn new(capacity: usize) -> (Self, Receiver<DiagnosticEvent>) {
        let (tx, rx) = bounded(capacity);

        (
            Self {
                tx,
                dropped: AtomicU64::new(0),
            },
            rx,
        )
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl DiagnosticSink for ChannelSink {
    fn emit(
        &self,
        event: DiagnosticEvent,
    ) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// JsonLinesSink
////////////////////////////////////////////////////////////////////////////////

/// Пишет одно JSON-событие на строку.
pub struct JsonLinesSink<W: Write + Send> {
    writer: Mutex<W>,
    write_errors: AtomicU64,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
            write_errors: AtomicU64::new(0),
        }
    }

    pub fn write_errors(&self) -> u64 {
        self.write_errors.load(Ordering::Relaxed)
    }

    fn write_event(
        &self,
        event: &DiagnosticEvent,
    ) -> LinkResult<()> {
        let mut writer = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        serde_json::to_writer(&mut *writer, event)?;
        writer.write_all(b"\n")?;
        Ok(())
    }

    pub fn flush(&self) -> LinkResult<()> {
        let mut writer = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        writer.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner().unwrap_or_else(|e| e.into_inner())
    }
}

impl<W: Write + Send> DiagnosticSink for JsonLinesSink<W> {
    fn emit(
        &self,
        event: DiagnosticEvent,
    ) {
        if let Err(e) = self.write_event(&event) {
            // Логируем только первую ошибку, чтобы не засорять вывод
            if self.write_errors.fetch_add(1, Ordering::Relaxed) == 0 {
                warn!("Diagnostic write failed: {e}");
            }
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// FanoutSink
////////////////////////////////////////////////////////////////////////////////

/// Рассылает каждое событие всем вложенным приёмникам.
#[derive(Default)]
pub struct FanoutSink {
    sinks: Vec<Diagnostics>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(
        mut self,
        sink: Diagnostics,
    ) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl DiagnosticSink for FanoutSink {
    fn emit(
        &self,
        event: DiagnosticEvent,
    ) {
        if let Some((last, rest)) = self.sinks.split_last() {
            for sink in rest {
                sink.emit(event.clone());
            }
            last.emit(event);
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    fn skipped(sequence: u64) -> DiagnosticEvent {
        DiagnosticEvent::AnnotationSkipped {
            sequence,
            block: "fixed_burst_padder".into(),
            offset: 7,
            key: "packet_len".into(),
            reason: "negative length -1".into(),
        }
    }

    #[test]
    fn test_event_kind_matches_json_tag() {
        let event = skipped(3);
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["kind"], event.kind());
        assert_eq!(json["sequence"], 3);
        assert_eq!(event.sequence(), 3);
        assert!(event.is_warning());
    }

    #[test]
    fn test_outcome_is_nested_in_json() {
        let event = DiagnosticEvent::PacketRecovered {
            sequence: 1,
            bits_received: 214,
            pad_bits: 2,
            payload_bytes: 23,
            outcome: CrcOutcome::ValidatedPattern {
                pattern: 1,
                ambiguous: false,
            },
        };
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["outcome"]["status"], "validated_pattern");
        assert_eq!(json["outcome"]["pattern"], 1);
    }

    #[test]
    fn test_channel_sink_drops_newest_when_full() {
        let (sink, rx) = ChannelSink::new(2);

        for seq in 0..5 {
            sink.emit(skipped(seq));
        }

        assert_eq!(sink.dropped(), 3);
        let received: Vec<u64> = rx.try_iter().map(|e| e.sequence()).collect();
        assert_eq!(received, vec![0, 1], "в очереди остаются самые старые");
    }

    #[test]
    fn test_json_lines_sink_one_object_per_line() {
        let sink = JsonLinesSink::new(Vec::new());
        sink.emit(skipped(1));
        sink.emit(DiagnosticEvent::FormatRejected {
            sequence: 2,
            reason: "Not a PDU pair".into(),
        });

        let text = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines.len(), 2);
        for line in lines {
            let v: serde_json::Value = serde_json::from_str(line).unwrap();
            assert!(v["kind"].is_string());
        }
    }

    #[test]
    fn test_log_sink_rate_limit() {
        let sink = LogSink::with_window(2, Duration::from_secs(3600));

        assert_eq!(sink.admit("crc_failed"), (true, 0));
        assert_eq!(sink.admit("crc_failed"), (true, 0));
        assert_eq!(sink.admit("crc_failed"), (false, 0));
        // Другой вид событий имеет собственное окно
        assert_eq!(sink.admit("burst_padded"), (true, 0));
    }

    #[test]
    fn test_log_sink_reports_suppressed_on_rollover() {
        let sink = LogSink::with_window(1, Duration::from_millis(20));

        assert_eq!(sink.admit("crc_failed"), (true, 0));
        assert_eq!(sink.admit("crc_failed"), (false, 0));
        assert_eq!(sink.admit("crc_failed"), (false, 0));

        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(sink.admit("crc_failed"), (true, 2));
    }

    #[test]
    fn test_fanout_reaches_every_sink() {
        let (a, rx_a) = ChannelSink::new(4);
        let (b, rx_b) = ChannelSink::new(4);
        let fanout = FanoutSink::new().with(Arc::new(a)).with(Arc::new(b));

        fanout.emit(skipped(9));

        assert_eq!(fanout.len(), 2);
        assert_eq!(rx_a.try_recv().unwrap().sequence(), 9);
        assert_eq!(rx_b.try_recv().unwrap().sequence(), 9);
    }
}
