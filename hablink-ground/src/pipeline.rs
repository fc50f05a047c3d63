use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use hablink_core::{
    bpsk_map, frame_bits, null_diagnostics, run_block, run_until_idle, sample_filler,
    AnnotatedStream, Budget, BurstFramer, ContinuityMultiplexer, CrcRecoveryDecoder, Diagnostics,
    Filler, FillerSource, FixedBurstPadder, LoopbackVerifier, NoiseFiller, PadderState,
    PostBurstPadder, PostPadState, RecoveryStats, Verdict, VerifyStats, ZeroFiller,
};
use hablink_types::{RecoveredPacket, Sample};
use log::{debug, info, warn};

use crate::{
    configure_device, BitSource, GroundResult, GuiBridge, LinkConfig, LinkMetrics, LoopbackFrame,
    PacketReport, RandomBurstSource, RxFrame, SdrDevice, TxConfig, TxMode,
};

/// Сколько раз подряд вызывать блок, чтобы переработать вход целиком.
const MAX_BLOCK_CALLS: usize = 1_024;

/// Пауза передатчика, когда отдавать устройству нечего.
const IDLE_SLEEP: Duration = Duration::from_millis(1);

////////////////////////////////////////////////////////////////////////////////
// Передача
////////////////////////////////////////////////////////////////////////////////

/// Цепочка блоков от посылок до непрерывного потока выборок.
enum TxChain {
    Fixed(FixedBurstPadder<Sample>),
    Continuous {
        post: PostBurstPadder<Sample>,
        mux: ContinuityMultiplexer<Sample>,
        filler: FillerSource<Sample>,
        padded: AnnotatedStream<Sample>,
        filler_stream: AnnotatedStream<Sample>,
    },
}

impl TxChain {
    fn build(
        tx: &TxConfig,
        diagnostics: Diagnostics,
    ) -> GroundResult<Self> {
        let chain = match tx.mode {
            TxMode::Fixed => {
                let padder = FixedBurstPadder::new(
                    tx.buffer_size,
                    tx.len_tag_key.clone(),
                    sample_filler(tx.noise_std)?,
                )?
                .with_diagnostics(diagnostics);
                TxChain::Fixed(padder)
            }
            TxMode::Continuous => {
                let filler: Box<dyn Filler<Sample>> = if tx.filler_amplitude > 0.0 {
                    Box::new(NoiseFiller::with_amplitude(tx.filler_amplitude)?)
                } else {
                    Box::new(ZeroFiller)
                };

                TxChain::Continuous {
                    post: PostBurstPadder::new(tx.post_padding, tx.len_tag_key.clone())
                        .with_diagnostics(diagnostics.clone()),
                    mux: ContinuityMultiplexer::new().with_diagnostics(diagnostics),
                    filler: FillerSource::new(filler),
                    padded: AnnotatedStream::new(),
                    filler_stream: AnnotatedStream::new(),
                }
            }
        };

        Ok(chain)
    }

    /// Один шаг: не более `chunk` выборок в `line`.
    fn step(
        &mut self,
        bursts: &mut AnnotatedStream<Sample>,
        line: &mut AnnotatedStream<Sample>,
        chunk: usize,
    ) -> GroundResult<()> {
        match self {
            TxChain::Fixed(padder) => {
                run_block(padder, &mut [bursts], line, Budget::uniform(chunk))?;
            }
            TxChain::Continuous {
                post,
                mux,
                filler,
                padded,
                filler_stream,
            } => {
                // Посылка уходит в мультиплексор только целиком, с хвостом
                run_until_idle(post, &mut [bursts], padded, Budget::default(), MAX_BLOCK_CALLS)?;

                let have = filler_stream.available();
                if have < chunk {
                    run_block(filler, &mut [], filler_stream, Budget::new(0, chunk - have))?;
                }

                run_block(mux, &mut [filler_stream, padded], line, Budget::uniform(chunk))?;
            }
        }
        Ok(())
    }

    /// Все принятые посылки полностью отданы на выход.
    fn is_drained(&self) -> bool {
        match self {
            TxChain::Fixed(padder) => padder.state() == PadderState::AwaitingAnnotation,
            TxChain::Continuous { post, padded, .. } => {
                post.state() == PostPadState::Idle && post.pending().is_none() && padded.is_empty()
            }
        }
    }
}

/// Оркестрирует сессию передачи.
pub struct TxPipeline {
    config: LinkConfig,
    metrics: Arc<LinkMetrics>,
    stop_flag: Arc<AtomicBool>,
    diagnostics: Diagnostics,
    loopback: Option<Sender<LoopbackFrame>>,
    payloads: Option<RandomBurstSource>,
}

impl TxPipeline {
    /// Создаёт пайплайн. Возвращает также shared-ссылку на метрики.
    pub fn new(config: LinkConfig) -> (Self, Arc<LinkMetrics>) {
        let metrics = LinkMetrics::new();
        let p = Self::with_shared(config, metrics.clone(), Arc::new(AtomicBool::new(false)));

        (p, metrics)
    }

    /// Пайплайн с общими метриками и флагом остановки (режим петли).
    pub fn with_shared(
        config: LinkConfig,
        metrics: Arc<LinkMetrics>,
        stop_flag: Arc<AtomicBool>,
    ) -> Self {
        Self {
            config,
            metrics,
            stop_flag,
            diagnostics: null_diagnostics(),
            loopback: None,
            payloads: None,
        }
    }

    /// Флаг остановки. Устанавливает в `true` для graceful shutdown.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        self.stop_flag.clone()
    }

    pub fn with_diagnostics(
        mut self,
        diagnostics: Diagnostics,
    ) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    /// Копии посылок уходят ещё и в приёмник петли.
    pub fn with_loopback(
        mut self,
        tx: Sender<LoopbackFrame>,
    ) -> Self {
        self.loopback = Some(tx);
        self
    }

    /// Свой генератор нагрузки (по умолчанию случайный из конфигурации).
    pub fn with_payloads(
        mut self,
        payloads: RandomBurstSource,
    ) -> Self {
        self.payloads = Some(payloads);
        self
    }

    /// Запускает передачу. Блокируется до завершения.
    pub fn run(
        mut self,
        mut device: Box<dyn SdrDevice>,
    ) -> GroundResult<()> {
        configure_device(device.as_mut(), &self.config)?;

        let tx_cfg = self.config.tx.clone();
        let mut chain = TxChain::build(&tx_cfg, self.diagnostics.clone())?;
        let mut payloads = match self.payloads.take() {
            Some(p) => p,
            None => RandomBurstSource::new(tx_cfg.min_payload_bytes, tx_cfg.max_payload_bytes)?,
        };

        info!(
            "Starting TX: mode={}, buffer={}, post_padding={}, payload {}..={} bytes every {:?}",
            tx_cfg.mode,
            tx_cfg.buffer_size,
            tx_cfg.post_padding,
            tx_cfg.min_payload_bytes,
            tx_cfg.max_payload_bytes,
            tx_cfg.burst_interval
        );

        let mut framer = BurstFramer::new(tx_cfg.len_tag_key.clone());
        let mut bursts = AnnotatedStream::new();
        let mut line = AnnotatedStream::new();
        let chunk = self.config.chunk_size;
        let stats_interval = Duration::from_secs(self.config.stats_interval_secs);

        let session_start = Instant::now();
        let mut last_stats = Instant::now();
        let mut last_burst: Option<Instant> = None;

        loop {
            if let Some(dur) = self.config.duration_secs {
                if session_start.elapsed().as_secs() >= dur {
                    info!("Duration limit reached ({dur}s). Finishing...");
                    break;
                }
            }

            if self.stop_flag.load(Ordering::Relaxed) {
                info!("Stop signal received. Finishing...");
                break;
            }

            let limit_reached = tx_cfg.max_bursts.is_some_and(|max| framer.bursts() >= max);
            let due = last_burst.map_or(true, |t| t.elapsed() >= tx_cfg.burst_interval);

            if due && !limit_reached {
                let payload = payloads.next_payload();
                let samples = bpsk_map(&frame_bits(&payload), tx_cfg.samples_per_symbol);
                let offset = framer.push_burst(&mut bursts, &samples);

                debug!(
                    "Burst #{} queued at {offset}: {} bytes, {} samples",
                    framer.bursts(),
                    payload.len(),
                    samples.len()
                );
                LinkMetrics::inc(&self.metrics.bursts_sent);
                last_burst = Some(Instant::now());
                self.send_loopback(payload, samples);
            }

            chain.step(&mut bursts, &mut line, chunk)?;
            let (samples, _) = line.drain_all();

            if !samples.is_empty() {
                self.write(device.as_mut(), &samples);
            }

            if limit_reached && bursts.is_empty() && chain.is_drained() {
                info!("All {} burst(s) sent", framer.bursts());
                break;
            }

            if samples.is_empty() {
                thread::sleep(IDLE_SLEEP);
            }

            if last_stats.elapsed() >= stats_interval {
                log_progress(&self.metrics, &session_start);
                last_stats = Instant::now();
            }
        }

        Ok(())
    }

    fn write(
        &self,
        device: &mut dyn SdrDevice,
        samples: &[Sample],
    ) {
        match device.write_samples(samples) {
            Ok(n) => LinkMetrics::add(&self.metrics.samples_written, n as u64),
            Err(e) => {
                LinkMetrics::inc(&self.metrics.device_errors);
                // Не прерываем: следующая порция может пройти
                warn!("Device write error: {e}");
            }
        }
    }

    fn send_loopback(
        &mut self,
        payload: Vec<u8>,
        samples: Vec<Sample>,
    ) {
        let Some(tx) = &self.loopback else { return };

        match tx.try_send(LoopbackFrame { payload, samples }) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => LinkMetrics::inc(&self.metrics.frames_dropped),
            Err(TrySendError::Disconnected(_)) => {
                warn!("Loopback receiver closed");
                self.loopback = None;
            }
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Приём
////////////////////////////////////////////////////////////////////////////////

/// Итог сессии приёма.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RxSummary {
    pub recovery: RecoveryStats,
    pub verify: VerifyStats,
}

/// Оркестрирует сессию приёма: поток источника бит, ограниченная очередь и
/// цикл восстановления пакетов в текущем потоке.
pub struct RxPipeline {
    config: LinkConfig,
    metrics: Arc<LinkMetrics>,
    stop_flag: Arc<AtomicBool>,
    diagnostics: Diagnostics,
    gui: Option<GuiBridge>,
}

impl RxPipeline {
    /// Создаёт пайплайн. Возвращает также shared-ссылку на метрики.
    pub fn new(config: LinkConfig) -> (Self, Arc<LinkMetrics>) {
        let metrics = LinkMetrics::new();
        let p = Self::with_shared(config, metrics.clone(), Arc::new(AtomicBool::new(false)));

        (p, metrics)
    }

    pub fn with_shared(
        config: LinkConfig,
        metrics: Arc<LinkMetrics>,
        stop_flag: Arc<AtomicBool>,
    ) -> Self {
        Self {
            config,
            metrics,
            stop_flag,
            diagnostics: null_diagnostics(),
            gui: None,
        }
    }

    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        self.stop_flag.clone()
    }

    pub fn with_diagnostics(
        mut self,
        diagnostics: Diagnostics,
    ) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    pub fn with_gui(
        mut self,
        bridge: GuiBridge,
    ) -> Self {
        self.gui = Some(bridge);
        self
    }

    /// Запускает приём. Блокируется до конца данных или остановки.
    pub fn run(
        self,
        mut source: Box<dyn BitSource>,
    ) -> GroundResult<RxSummary> {
        info!(
            "Starting RX: source={}, max_missing_bits={}, expected payload={:?}",
            source.name(),
            self.config.rx.max_missing_bits,
            self.config.rx.expected_payload_bytes
        );

        let (tx, rx) = crossbeam_channel::bounded::<RxFrame>(self.config.rx.queue_capacity);
        let stop_flag = self.stop_flag.clone();
        let stop_flag_source = stop_flag.clone();
        let metrics_source = self.metrics.clone();

        // Поток источника бит
        let source_handle = thread::spawn(move || {
            let result = source.run(tx, metrics_source, stop_flag_source);

            if let Err(ref e) = result {
                warn!("Bit source thread error: {e}");
            }

            result
        });

        let decode_result = self.decode_loop(rx);

        stop_flag.store(true, Ordering::Relaxed);

        match source_handle.join() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Bit source finished with error: {e}"),
            Err(_) => warn!("Bit source thread panicked"),
        }

        decode_result
    }

    fn decode_loop(
        &self,
        rx: Receiver<RxFrame>,
    ) -> GroundResult<RxSummary> {
        let mut decoder = CrcRecoveryDecoder::new(self.config.recovery_config())?
            .with_diagnostics(self.diagnostics.clone());
        let mut verifier = LoopbackVerifier::new(self.config.rx.verify_history);

        let recv_timeout = Duration::from_millis(100);
        let stats_interval = Duration::from_secs(self.config.stats_interval_secs);
        let session_start = Instant::now();
        let mut last_stats = Instant::now();

        loop {
            if let Some(dur) = self.config.duration_secs {
                if session_start.elapsed().as_secs() >= dur {
                    info!("Duration limit reached ({dur}s). Finishing...");
                    break;
                }
            }

            if self.stop_flag.load(Ordering::Relaxed) {
                info!("Stop signal received. Finishing...");
                break;
            }

            let frame = match rx.recv_timeout(recv_timeout) {
                Ok(f) => f,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    info!("Bit source closed");
                    break;
                }
            };

            LinkMetrics::inc(&self.metrics.frames_received);

            let has_reference = frame.reference.is_some();
            if let Some(reference) = &frame.reference {
                verifier.record_sent(reference);
            }

            match decoder.decode(frame.message) {
                Ok(packet) => self.handle_packet(&packet, &mut verifier, has_reference),
                Err(e) => {
                    // Сообщение отклонено, поток продолжается
                    LinkMetrics::inc(&self.metrics.packets_rejected);
                    debug!("Message rejected: {e}");
                }
            }

            if last_stats.elapsed() >= stats_interval {
                log_progress(&self.metrics, &session_start);
                last_stats = Instant::now();
            }
        }

        Ok(RxSummary {
            recovery: decoder.stats(),
            verify: verifier.stats(),
        })
    }

    fn handle_packet(
        &self,
        packet: &RecoveredPacket,
        verifier: &mut LoopbackVerifier,
        has_reference: bool,
    ) {
        let m = &self.metrics;

        let verdict = if packet.is_valid() {
            LinkMetrics::inc(&m.packets_ok);
            has_reference.then(|| verifier.check_received(packet.payload()))
        } else {
            LinkMetrics::inc(&m.packets_failed);
            None
        };

        match &verdict {
            Some(Verdict::Identical) => LinkMetrics::inc(&m.loopback_identical),
            Some(_) => LinkMetrics::inc(&m.loopback_mismatched),
            None => {}
        }

        if let Some(gui) = &self.gui {
            if let Err(e) = gui.publish(PacketReport::new(packet, verdict.as_ref())) {
                LinkMetrics::inc(&m.gui_dropped);
                debug!("GUI bridge: {e}");
            }
        }
    }
}

fn log_progress(
    metrics: &LinkMetrics,
    start: &Instant,
) {
    let m = metrics;

    info!(
        "[ {:.0}s ] bursts={} samples={} packets_ok={} failed={} rejected={} dropped={}",
        start.elapsed().as_secs_f64(),
        m.bursts_sent.load(Ordering::Relaxed),
        m.samples_written.load(Ordering::Relaxed),
        m.packets_ok.load(Ordering::Relaxed),
        m.packets_failed.load(Ordering::Relaxed),
        m.packets_rejected.load(Ordering::Relaxed),
        m.frames_dropped.load(Ordering::Relaxed),
    );
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{spawn_bridge, LoopbackBitSource, SimulatedBitSource, SimulatedDevice};

    fn test_config(mode: TxMode) -> LinkConfig {
        let mut cfg = LinkConfig::default();
        cfg.tx.mode = mode;
        cfg.tx.buffer_size = 2_000;
        cfg.tx.post_padding = 500;
        cfg.tx.min_payload_bytes = 20;
        cfg.tx.max_payload_bytes = 40;
        cfg.tx.burst_interval = Duration::ZERO;
        cfg.tx.max_bursts = Some(3);
        cfg.chunk_size = 1_024;
        cfg.duration_secs = Some(10); // страховка от зависания
        cfg.stats_interval_secs = 60; // не выводим stats в тестах
        cfg
    }

    fn device() -> Box<dyn SdrDevice> {
        Box::new(SimulatedDevice::new(2_000_000, 434_000_000).unpaced())
    }

    #[test]
    fn test_tx_fixed_mode_writes_whole_buffers() {
        let (pipeline, metrics) = TxPipeline::new(test_config(TxMode::Fixed));
        pipeline.run(device()).unwrap();

        assert_eq!(metrics.bursts_sent.load(Ordering::Relaxed), 3);
        assert_eq!(
            metrics.samples_written.load(Ordering::Relaxed),
            3 * 2_000,
            "каждая посылка ровно buffer_size выборок"
        );
        assert_eq!(metrics.device_errors.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_tx_continuous_mode_never_starves() {
        let cfg = test_config(TxMode::Continuous);
        let chunk = cfg.chunk_size as u64;
        let (pipeline, metrics) = TxPipeline::new(cfg);
        pipeline.run(device()).unwrap();

        let written = metrics.samples_written.load(Ordering::Relaxed);
        // Каждый шаг отдаёт полный chunk: посылки, хвосты и шум между ними
        assert_eq!(written % chunk, 0);
        // 3 посылки по (20..=40 + 4) * 8 бит и по 500 выборок хвоста
        assert!(written >= 3 * (24 * 8 + 500));
    }

    #[test]
    fn test_tx_stop_flag_works() {
        let mut cfg = test_config(TxMode::Continuous);
        cfg.tx.max_bursts = None;
        cfg.duration_secs = None;

        let (pipeline, _metrics) = TxPipeline::new(cfg);
        let stop = pipeline.stop_flag();

        thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            stop.store(true, Ordering::Relaxed);
        });

        let paced = Box::new(SimulatedDevice::new(2_000_000, 434_000_000));
        assert!(pipeline.run(paced).is_ok(), "graceful stop не должен быть ошибкой");
    }

    #[test]
    fn test_rx_simulated_source_recovers_all() {
        let mut cfg = test_config(TxMode::Fixed);
        cfg.rx.dropped_bits = 3;

        let (pipeline, metrics) = RxPipeline::new(cfg);
        let source = SimulatedBitSource::new(
            RandomBurstSource::seeded(20, 60, 11).unwrap(),
            3,
            Duration::from_millis(1),
        )
        .limit(20);

        let summary = pipeline.run(Box::new(source)).unwrap();

        assert_eq!(summary.recovery.messages, 20);
        assert_eq!(summary.recovery.recovered(), 20);
        assert_eq!(summary.verify.identical, 20);
        assert_eq!(metrics.packets_ok.load(Ordering::Relaxed), 20);
        assert_eq!(metrics.packets_failed.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_loopback_both_modes() {
        for mode in [TxMode::Fixed, TxMode::Continuous] {
            let mut cfg = test_config(mode);
            cfg.tx.max_bursts = Some(8);
            cfg.tx.samples_per_symbol = 2;
            cfg.rx.dropped_bits = 2;

            let metrics = LinkMetrics::new();
            let stop = Arc::new(AtomicBool::new(false));
            let (frame_tx, frame_rx) = crossbeam_channel::bounded(64);

            let tx = TxPipeline::with_shared(cfg.clone(), metrics.clone(), stop.clone())
                .with_payloads(RandomBurstSource::seeded(20, 40, 3).unwrap())
                .with_loopback(frame_tx);
            let tx_handle = thread::spawn(move || tx.run(device()));

            let rx = RxPipeline::with_shared(cfg, metrics.clone(), stop);
            let source = LoopbackBitSource::new(frame_rx, 2, 2);
            let summary = rx.run(Box::new(source)).unwrap();
            tx_handle.join().unwrap().unwrap();

            assert_eq!(summary.verify.sent, 8, "mode={mode}");
            assert_eq!(summary.verify.identical, 8, "mode={mode}");
            assert_eq!(metrics.loopback_mismatched.load(Ordering::Relaxed), 0);
        }
    }

    #[test]
    fn test_rx_publishes_to_gui() {
        let cfg = test_config(TxMode::Fixed);
        let (bridge, reports) = GuiBridge::new(64);
        let (seen_tx, seen_rx) = crossbeam_channel::unbounded();
        let handle = spawn_bridge(reports, move |r| {
            let _ = seen_tx.send(r);
        });

        let (pipeline, _metrics) = RxPipeline::new(cfg);
        let source = SimulatedBitSource::new(
            RandomBurstSource::seeded(20, 20, 9).unwrap(),
            1,
            Duration::ZERO,
        )
        .limit(5);
        pipeline.with_gui(bridge).run(Box::new(source)).unwrap();

        assert_eq!(handle.join().unwrap(), 5);
        let reports: Vec<PacketReport> = seen_rx.try_iter().collect();
        assert!(reports.iter().all(|r| r.outcome.is_valid()));
        assert!(reports
            .iter()
            .all(|r| r.verdict.as_deref() == Some("Identical")));
    }
}
