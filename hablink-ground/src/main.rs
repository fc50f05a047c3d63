use std::{
    fs::File,
    io::BufWriter,
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

use clap::Parser;
use hablink_core::{Diagnostics, FanoutSink, JsonLinesSink, LogSink};
use hablink_ground::{
    create_device, parse_freq_hz, spawn_bridge, DeviceKind, GroundResult, GuiBridge, LinkConfig,
    LinkMetrics, LoopbackBitSource, RandomBurstSource, Role, RxPipeline, SimulatedBitSource,
    TxMode, TxPipeline,
};
use log::{error, info, warn};

#[derive(Parser, Debug)]
#[command(
    name = "hablink-ground",
    version = env!("CARGO_PKG_VERSION"),
    about = "Ground-station link layer for balloon/rocket payloads",
    long_about = None,
)]
struct Cli {
    /// Роль: tx, rx, loopback
    #[arg(long, default_value = "loopback")]
    role: String,
    /// SDR устройство: sim, hackrf
    #[arg(short, long, default_value = "sim")]
    device: String,
    /// Несущая частота (434MHz, 0.915GHz, 915e6)
    #[arg(short = 'f', long, default_value = "434MHz")]
    freq: String,
    /// Частота дискретизации (2MHz, 2e6)
    #[arg(short = 'r', long, default_value = "2MHz")]
    rate: String,
    /// Включить усилитель передатчика (AMP)
    #[arg(long)]
    amp: bool,
    /// Усиление VGA передатчика, 0-47 дБ
    #[arg(long, default_value = "20")]
    vga: f32,
    /// Режим передачи: fixed, continuous
    #[arg(short, long, default_value = "fixed")]
    mode: String,
    /// Размер буфера в режиме fixed (выборок)
    #[arg(long, default_value = "10000")]
    buffer_size: usize,
    /// СКО шума заполнителя в режиме fixed (0 = нули)
    #[arg(long, default_value = "0.01")]
    noise_std: f32,
    /// Хвост после посылки в режиме continuous (выборок)
    #[arg(long, default_value = "10000")]
    post_padding: u64,
    /// Амплитуда шума между посылками в режиме continuous
    #[arg(long, default_value = "0.01")]
    filler_amp: f32,
    /// Ключ аннотации длины посылки
    #[arg(long, default_value = "packet_len")]
    len_tag_key: String,
    /// Минимальная длина полезной нагрузки (байт)
    #[arg(long, default_value = "20")]
    min_payload: usize,
    /// Максимальная длина полезной нагрузки (байт)
    #[arg(long, default_value = "200")]
    max_payload: usize,
    /// Пауза между посылками (мс)
    #[arg(long, default_value = "100")]
    interval_ms: u64,
    /// Число посылок. По умолчанию: до Ctrl+C
    #[arg(short = 'n', long)]
    count: Option<u64>,
    /// Известная длина полезной нагрузки на приёме (байт)
    #[arg(long)]
    expected_bytes: Option<usize>,
    /// Максимум недостающих бит для перебора на приёме
    #[arg(long, default_value = "7")]
    max_missing: u8,
    /// Сколько бит теряет симулированный декодер
    #[arg(long, default_value = "2")]
    dropped_bits: usize,
    /// Ёмкость очереди приёма (сообщений)
    #[arg(long, default_value = "64")]
    queue_capacity: usize,
    /// Ограничение сессии (секунды). По умолчанию: до Ctrl+C
    #[arg(long)]
    duration: Option<u64>,
    /// Интервал вывода статистики (секунды)
    #[arg(long, default_value = "5")]
    stats_interval: u64,
    /// Писать диагностические события в файл (JSON Lines)
    #[arg(long)]
    diag_json: Option<PathBuf>,
    /// Не более стольких диагностических событий одного вида в секунду в лог
    #[arg(long, default_value = "20")]
    diag_rate: u32,
    /// Показывать каждый принятый пакет
    #[arg(long)]
    show_packets: bool,
    /// Тихий режим (только ошибки)
    #[arg(short, long)]
    quiet: bool,
    /// Подробный лог (debug)
    #[arg(short, long)]
    verbose: bool,
}

fn fail(msg: String) -> ! {
    error!("{msg}");
    std::process::exit(1);
}

fn build_config(cli: &Cli) -> LinkConfig {
    let role: Role = cli.role.parse().unwrap_or_else(|e: String| fail(e));
    let device: DeviceKind = cli.device.parse().unwrap_or_else(|e: String| fail(e));
    let mode: TxMode = cli.mode.parse().unwrap_or_else(|e: String| fail(e));

    let center_freq_hz =
        parse_freq_hz(&cli.freq).unwrap_or_else(|e| fail(format!("--freq: {e}")));
    let sample_rate_hz = match parse_freq_hz(&cli.rate) {
        Ok(r) if r <= u32::MAX as u64 => r as u32,
        Ok(r) => fail(format!("--rate {r} Hz exceeds u32::MAX")),
        Err(e) => fail(format!("--rate: {e}")),
    };

    let mut config = LinkConfig {
        role,
        device,
        center_freq_hz,
        sample_rate_hz,
        amp_enabled: cli.amp,
        duration_secs: cli.duration,
        stats_interval_secs: cli.stats_interval,
        ..LinkConfig::default()
    };
    config.set_vga_gain(cli.vga);

    let tx = &mut config.tx;
    tx.mode = mode;
    tx.buffer_size = cli.buffer_size;
    tx.noise_std = cli.noise_std;
    tx.post_padding = cli.post_padding;
    tx.filler_amplitude = cli.filler_amp;
    tx.len_tag_key = cli.len_tag_key.clone();
    tx.min_payload_bytes = cli.min_payload;
    tx.max_payload_bytes = cli.max_payload;
    tx.burst_interval = Duration::from_millis(cli.interval_ms);
    tx.max_bursts = cli.count;

    let rx = &mut config.rx;
    rx.expected_payload_bytes = cli.expected_bytes;
    rx.max_missing_bits = cli.max_missing;
    rx.dropped_bits = cli.dropped_bits;
    rx.queue_capacity = cli.queue_capacity;

    if let Err(e) = config.validate() {
        fail(e.to_string());
    }

    config
}

type JsonFileSink = JsonLinesSink<BufWriter<File>>;

/// Лог с ограничением частоты и, если задан файл, JSON Lines.
fn build_diagnostics(cli: &Cli) -> GroundResult<(Diagnostics, Option<Arc<JsonFileSink>>)> {
    let mut fanout = FanoutSink::new().with(Arc::new(LogSink::new(cli.diag_rate)));
    let mut json = None;

    if let Some(path) = &cli.diag_json {
        let sink = Arc::new(JsonLinesSink::new(BufWriter::new(File::create(path)?)));
        fanout = fanout.with(sink.clone());
        json = Some(sink);
        info!("Diagnostics: {path:?}");
    }

    Ok((Arc::new(fanout), json))
}

fn run_session(
    cli: &Cli,
    config: LinkConfig,
    metrics: Arc<LinkMetrics>,
    stop_flag: Arc<AtomicBool>,
    diagnostics: Diagnostics,
) -> GroundResult<()> {
    let (bridge, reports) = GuiBridge::new(config.rx.gui_queue_capacity);
    let show_packets = cli.show_packets;
    let bridge_handle = spawn_bridge(reports, move |r| {
        if show_packets {
            info!(
                "RX #{}: {} bytes, {} pad bit(s), {:?} {}",
                r.sequence,
                r.payload_bytes,
                r.pad_bits,
                r.outcome,
                r.verdict.as_deref().unwrap_or("")
            );
        }
    });

    let result = match config.role {
        Role::Tx => {
            let device = create_device(&config)?;
            drop(bridge);
            TxPipeline::with_shared(config, metrics, stop_flag)
                .with_diagnostics(diagnostics)
                .run(device)
        }
        Role::Rx => {
            // Демодулятор и декодер FEC внешние: приём работает от симулятора бит
            let source = SimulatedBitSource::new(
                RandomBurstSource::new(config.tx.min_payload_bytes, config.tx.max_payload_bytes)?,
                config.rx.dropped_bits,
                config.tx.burst_interval,
            );
            let source = match config.tx.max_bursts {
                Some(n) => source.limit(n),
                None => source,
            };

            RxPipeline::with_shared(config, metrics, stop_flag)
                .with_diagnostics(diagnostics)
                .with_gui(bridge)
                .run(Box::new(source))
                .map(|_| ())
        }
        Role::Loopback => {
            let device = create_device(&config)?;
            let (frame_tx, frame_rx) = crossbeam_channel::bounded(config.rx.queue_capacity);
            let source = LoopbackBitSource::new(
                frame_rx,
                config.tx.samples_per_symbol,
                config.rx.dropped_bits,
            );

            let tx = TxPipeline::with_shared(config.clone(), metrics.clone(), stop_flag.clone())
                .with_diagnostics(diagnostics.clone())
                .with_loopback(frame_tx);
            let tx_handle = thread::spawn(move || tx.run(device));

            let rx_result = RxPipeline::with_shared(config, metrics, stop_flag)
                .with_diagnostics(diagnostics)
                .with_gui(bridge)
                .run(Box::new(source));

            match tx_handle.join() {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("TX finished with error: {e}"),
                Err(_) => warn!("TX thread panicked"),
            }

            rx_result.map(|summary| {
                info!(
                    "Loopback: {} sent, {} identical, {} mismatched, {} unmatched",
                    summary.verify.sent,
                    summary.verify.identical,
                    summary.verify.mismatched,
                    summary.verify.unmatched
                )
            })
        }
    };

    if bridge_handle.join().is_err() {
        warn!("GUI bridge thread panicked");
    }

    result
}

fn main() {
    let cli = Cli::parse();
    let level = if cli.quiet {
        log::LevelFilter::Error
    } else if cli.verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };

    env_logger::Builder::new()
        .filter_level(level)
        .format_target(false)
        .format_timestamp_secs()
        .init();

    let config = build_config(&cli);

    let (diagnostics, json_sink) = match build_diagnostics(&cli) {
        Ok(d) => d,
        Err(e) => fail(format!("--diag-json: {e}")),
    };

    let metrics = LinkMetrics::new();
    let stop_flag = Arc::new(AtomicBool::new(false));
    let stop_ctrlc = stop_flag.clone();

    if let Err(e) = ctrlc::set_handler(move || {
        if stop_ctrlc.swap(true, Ordering::SeqCst) {
            // Второй Ctrl+C: принудительный выход
            warn!("Force exit");
            std::process::exit(130);
        }
        warn!("Ctrl+C received, finishing current burst...");
    }) {
        warn!("Failed to set Ctrl+C handler: {e}");
    }

    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!("  Role          : {}", config.role);
    info!("  Device        : {}", config.device);
    info!("  Center freq   : {:.3} MHz", config.center_freq_hz as f64 / 1e6);
    info!("  Sample rate   : {:.3} Msps", config.sample_rate_hz as f64 / 1e6);
    info!(
        "  Gain          : AMP {}, VGA {} dB",
        if config.amp_enabled { "on" } else { "off" },
        config.vga_gain_db
    );
    info!("  TX mode       : {}", config.tx.mode);
    info!("  Length tag    : {}", config.tx.len_tag_key);
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let session_start = Instant::now();

    let result = run_session(&cli, config, metrics.clone(), stop_flag, diagnostics);

    if let Some(sink) = &json_sink {
        if let Err(e) = sink.flush() {
            warn!("Failed to flush diagnostics: {e}");
        }
    }

    if let Err(e) = result {
        error!("Session failed: {e}");
        std::process::exit(1);
    }

    // --- Итоговая статистика ---
    let summary = metrics.summary(&session_start);
    info!("\n{summary}");

    if summary.frames_dropped > 0 {
        warn!(
            "⚠ {} frame(s) dropped. Consider: larger --queue-capacity or longer --interval-ms",
            summary.frames_dropped
        );
    }

    if summary.packets_failed > 0 {
        warn!("⚠ {} packet(s) failed CRC validation", summary.packets_failed);
    }

    if summary.device_errors > 0 {
        warn!("⚠ {} device write error(s) occurred", summary.device_errors);
        std::process::exit(1);
    }

    info!("✓ Session complete");
}
