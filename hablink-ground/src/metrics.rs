use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Instant,
};

/// Метрики станции, обновляемые lock-free из нескольких потоков.
#[derive(Debug, Default)]
pub struct LinkMetrics {
    // Передача
    pub bursts_sent: AtomicU64,
    pub samples_written: AtomicU64,
    pub device_errors: AtomicU64,

    // Приём
    pub frames_received: AtomicU64,
    pub frames_dropped: AtomicU64,
    pub packets_ok: AtomicU64,
    pub packets_failed: AtomicU64,
    pub packets_rejected: AtomicU64,
    pub gui_dropped: AtomicU64,

    // Сверка
    pub loopback_identical: AtomicU64,
    pub loopback_mismatched: AtomicU64,
}

/// Snapshot метрик для отображения и тестирования.
#[derive(Debug, Clone)]
pub struct MetricsSummary {
    pub duration_secs: f64,
    pub bursts_sent: u64,
    pub samples_written: u64,
    pub device_errors: u64,
    pub frames_received: u64,
    pub frames_dropped: u64,
    pub packets_ok: u64,
    pub packets_failed: u64,
    pub packets_rejected: u64,
    pub gui_dropped: u64,
    pub loopback_identical: u64,
    pub loopback_mismatched: u64,
    pub throughput_msps: f64,
    pub success_rate_pct: f64,
}

impl LinkMetrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add(
        counter: &AtomicU64,
        n: u64,
    ) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn inc(counter: &AtomicU64) {
        Self::add(counter, 1);
    }

    /// Скорость отдачи выборок устройству, Msps.
    pub fn throughput_msps(
        &self,
        elapsed: &Instant,
    ) -> f64 {
        let secs = elapsed.elapsed().as_secs_f64();

        if secs < 1e-9 {
            return 0.0;
        }

        self.samples_written.load(Ordering::Relaxed) as f64 / secs / 1_000_000.0
    }

    /// Доля пакетов с подтверждённым CRC среди декодированных (0.0-100.0).
    pub fn success_rate_pct(&self) -> f64 {
        let ok = self.packets_ok.load(Ordering::Relaxed);
        let failed = self.packets_failed.load(Ordering::Relaxed);
        let total = ok + failed;

        if total == 0 {
            0.0
        } else {
            ok as f64 / total as f64 * 100.0
        }
    }

    /// Итоговая сводка для вывода в конце сессии.
    pub fn summary(
        &self,
        elapsed: &Instant,
    ) -> MetricsSummary {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);

        MetricsSummary {
            duration_secs: elapsed.elapsed().as_secs_f64(),
            bursts_sent: load(&self.bursts_sent),
            samples_written: load(&self.samples_written),
            device_errors: load(&self.device_errors),
            frames_received: load(&self.frames_received),
            frames_dropped: load(&self.frames_dropped),
            packets_ok: load(&self.packets_ok),
            packets_failed: load(&self.packets_failed),
            packets_rejected: load(&self.packets_rejected),
            gui_dropped: load(&self.gui_dropped),
            loopback_identical: load(&self.loopback_identical),
            loopback_mismatched: load(&self.loopback_mismatched),
            throughput_msps: self.throughput_msps(elapsed),
            success_rate_pct: self.success_rate_pct(),
        }
    }
}

impl std::fmt::Display for MetricsSummary {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        writeln!(f, "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━")?;
        writeln!(f, "  Duration      : {:.1}s", self.duration_secs)?;
        writeln!(f, "  Bursts sent   : {}", self.bursts_sent)?;
        writeln!(f, "  Samples out   : {}", self.samples_written)?;
        writeln!(f, "  Device errors : {}", self.device_errors)?;
        writeln!(
            f,
            "  Frames in     : {} (dropped {})",
            self.frames_received, self.frames_dropped
        )?;
        writeln!(
            f,
            "  Packets OK    : {} ({:.2}%)",
            self.packets_ok, self.success_rate_pct
        )?;
        writeln!(f, "  CRC failed    : {}", self.packets_failed)?;
        writeln!(f, "  Rejected      : {}", self.packets_rejected)?;
        writeln!(
            f,
            "  Loopback      : {} identical, {} mismatched",
            self.loopback_identical, self.loopback_mismatched
        )?;
        writeln!(f, "  GUI dropped   : {}", self.gui_dropped)?;
        writeln!(f, "  Throughput    : {:.3} Msps", self.throughput_msps)?;
        write!(f, "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━")
    }
}
