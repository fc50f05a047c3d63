use std::time::Duration;

use hablink_core::{RecoveryConfig, DEFAULT_MAX_MISSING_BITS, MATCH_KEY_BYTES};
use hablink_types::PACKET_LEN_KEY;
use log::warn;

use crate::{GroundError, GroundResult};

/// Верхняя граница усиления VGA передатчика HackRF (дБ).
pub const HACKRF_VGA_MAX_DB: f32 = 47.0;

/// Тип SDR устройства (выбор при старте).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    /// Встроенный симулятор (не требует железа).
    Simulated,
    /// HackRF One.
    HackRf,
}

/// Роль станции в сессии.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Только передача посылок
    Tx,
    /// Только приём и восстановление пакетов
    Rx,
    /// Передача и приём собственных посылок со сверкой
    Loopback,
}

/// Как посылки превращаются в непрерывный поток выборок.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxMode {
    /// Каждая посылка дополняется до буфера фиксированного размера
    Fixed,
    /// Посылка + хвост, промежутки заполняются шумом
    Continuous,
}

/// Параметры передающей стороны.
#[derive(Debug, Clone)]
pub struct TxConfig {
    pub mode: TxMode,
    /// Размер буфера в режиме `Fixed` (выборок)
    pub buffer_size: usize,
    /// СКО шума заполнителя в режиме `Fixed` (0 = нули)
    pub noise_std: f32,
    /// Длина хвоста после посылки в режиме `Continuous` (выборок)
    pub post_padding: u64,
    /// Амплитуда шума между посылками в режиме `Continuous` (0 = нули)
    pub filler_amplitude: f32,
    /// Ключ аннотации длины посылки
    pub len_tag_key: String,
    /// Диапазон длины случайной полезной нагрузки (байт, включительно)
    pub min_payload_bytes: usize,
    pub max_payload_bytes: usize,
    /// Пауза между посылками
    pub burst_interval: Duration,
    /// Выборок на символ BPSK
    pub samples_per_symbol: usize,
    /// Остановиться после стольких посылок (None = до Ctrl+C)
    pub max_bursts: Option<u64>,
}

/// Параметры приёмной стороны.
#[derive(Debug, Clone)]
pub struct RxConfig {
    /// Известная длина полезной нагрузки (для точного числа недостающих бит)
    pub expected_payload_bytes: Option<usize>,
    /// Максимум недостающих бит, которые декодер перебирает
    pub max_missing_bits: u8,
    /// Ёмкость очереди сообщений от источника бит
    pub queue_capacity: usize,
    /// Ёмкость очереди к GUI
    pub gui_queue_capacity: usize,
    /// Сколько бит теряет симулированный декодер FEC в конце пакета
    pub dropped_bits: usize,
    /// Сколько переданных пакетов помнить для сверки
    pub verify_history: usize,
}

/// Полная конфигурация сессии станции.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    pub role: Role,
    /// Тип SDR устройства
    pub device: DeviceKind,
    /// Несущая частота (Гц)
    pub center_freq_hz: u64,
    /// Частота дискретизации (Гц)
    pub sample_rate_hz: u32,
    /// Усилитель передатчика HackRF (AMP)
    pub amp_enabled: bool,
    /// Усиление VGA передатчика (0-47 дБ)
    pub vga_gain_db: f32,
    pub tx: TxConfig,
    pub rx: RxConfig,
    /// Ограничение по времени (None = до Ctrl+C)
    pub duration_secs: Option<u64>,
    /// Интервал вывода статистики (секунды)
    pub stats_interval_secs: u64,
    /// Выборок, отдаваемых устройству за один раз
    pub chunk_size: usize,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl LinkConfig {
    /// Устанавливает усиление VGA, ограничивая его диапазоном 0-47 дБ.
    pub fn set_vga_gain(
        &mut self,
        gain_db: f32,
    ) {
        self.vga_gain_db = clamp_vga_gain(gain_db);
    }

    /// Проверяет согласованность параметров.
    pub fn validate(&self) -> GroundResult<()> {
        if self.sample_rate_hz == 0 {
            return Err(GroundError::config("Sample rate must be positive"));
        }
        if self.chunk_size == 0 {
            return Err(GroundError::config("Chunk size must be positive"));
        }

        let tx = &self.tx;
        if tx.buffer_size == 0 {
            return Err(GroundError::config("Buffer size must be positive"));
        }
        let negative = |v: f32| v.is_nan() || v < 0.0;
        if negative(tx.noise_std) || negative(tx.filler_amplitude) {
            return Err(GroundError::config(format!(
                "Noise levels must be non-negative (noise_std={}, filler_amplitude={})",
                tx.noise_std, tx.filler_amplitude
            )));
        }
        if tx.min_payload_bytes < MATCH_KEY_BYTES || tx.min_payload_bytes > tx.max_payload_bytes {
            return Err(GroundError::config(format!(
                "Invalid payload range {}..={} (minimum {MATCH_KEY_BYTES} bytes)",
                tx.min_payload_bytes, tx.max_payload_bytes
            )));
        }
        if tx.len_tag_key.is_empty() {
            return Err(GroundError::config("Length tag key must not be empty"));
        }

        let rx = &self.rx;
        if rx.queue_capacity == 0 || rx.gui_queue_capacity == 0 {
            return Err(GroundError::config("Queue capacities must be positive"));
        }
        self.recovery_config().validate()?;

        if rx.dropped_bits > rx.max_missing_bits as usize {
            warn!(
                "Simulated decoder drops {} bit(s), more than the {} the receiver searches",
                rx.dropped_bits, rx.max_missing_bits
            );
        }

        Ok(())
    }

    /// Конфигурация декодера для приёмной стороны.
    pub fn recovery_config(&self) -> RecoveryConfig {
        let base = match self.rx.expected_payload_bytes {
            Some(bytes) => RecoveryConfig::for_payload_bytes(bytes),
            None => RecoveryConfig::default(),
        };

        RecoveryConfig {
            max_missing_bits: self.rx.max_missing_bits,
            ..base
        }
    }
}

/// Ограничивает усиление VGA диапазоном HackRF.
pub fn clamp_vga_gain(gain_db: f32) -> f32 {
    if gain_db.is_nan() {
        warn!("VGA gain is NaN, using 0 dB");
        return 0.0;
    }

    let clamped = gain_db.clamp(0.0, HACKRF_VGA_MAX_DB);
    if clamped != gain_db {
        warn!("VGA gain {gain_db} dB out of range, clamped to {clamped} dB");
    }
    clamped
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов для DeviceKind, Role, TxMode, LinkConfig
////////////////////////////////////////////////////////////////////////////////

impl std::fmt::Display for DeviceKind {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        match self {
            DeviceKind::Simulated => write!(f, "sim"),
            DeviceKind::HackRf => write!(f, "hackrf"),
        }
    }
}

impl std::str::FromStr for DeviceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sim" | "simulated" => Ok(DeviceKind::Simulated),
            "hackrf" | "hackrf_one" => Ok(DeviceKind::HackRf),
            _ => Err(format!("Unknown device type: '{s}'. Use: sim, hackrf")),
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        match self {
            Role::Tx => write!(f, "tx"),
            Role::Rx => write!(f, "rx"),
            Role::Loopback => write!(f, "loopback"),
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "tx" | "transmit" => Ok(Role::Tx),
            "rx" | "receive" => Ok(Role::Rx),
            "loopback" | "loop" => Ok(Role::Loopback),
            _ => Err(format!("Unknown role: '{s}'. Use: tx, rx, loopback")),
        }
    }
}

impl std::fmt::Display for TxMode {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        match self {
            TxMode::Fixed => write!(f, "fixed"),
            TxMode::Continuous => write!(f, "continuous"),
        }
    }
}

impl std::str::FromStr for TxMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "fixed" => Ok(TxMode::Fixed),
            "continuous" | "cont" => Ok(TxMode::Continuous),
            _ => Err(format!("Unknown TX mode: '{s}'. Use: fixed, continuous")),
        }
    }
}

impl Default for TxConfig {
    fn default() -> Self {
        Self {
            mode: TxMode::Fixed,
            buffer_size: 10_000,
            noise_std: 0.01,
            post_padding: 10_000,
            filler_amplitude: 0.01,
            len_tag_key: PACKET_LEN_KEY.to_string(),
            min_payload_bytes: 20,
            max_payload_bytes: 200,
            burst_interval: Duration::from_millis(100),
            samples_per_symbol: 1,
            max_bursts: None,
        }
    }
}

impl Default for RxConfig {
    fn default() -> Self {
        Self {
            expected_payload_bytes: None,
            max_missing_bits: DEFAULT_MAX_MISSING_BITS,
            queue_capacity: 64,
            gui_queue_capacity: 32,
            dropped_bits: 2,
            verify_history: 256,
        }
    }
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            role: Role::Loopback,
            device: DeviceKind::Simulated,
            center_freq_hz: 434_000_000,
            sample_rate_hz: 2_000_000,
            amp_enabled: false,
            vga_gain_db: 20.0,
            tx: TxConfig::default(),
            rx: RxConfig::default(),
            duration_secs: None,
            stats_interval_secs: 5,
            chunk_size: 4_096,
        }
    }
}

/// Парсит строку частоты в герцы.
///
/// Поддерживает суффиксы `GHz`, `MHz`, `kHz`, `Hz` (регистронезависимо) и
/// инженерную запись.
///
/// # Примеры
/// ```
/// use hablink_ground::config::parse_freq_hz;
/// assert_eq!(parse_freq_hz("434MHz").unwrap(), 434_000_000);
/// assert_eq!(parse_freq_hz("915e6").unwrap(), 915_000_000);
/// assert_eq!(parse_freq_hz("2000000").unwrap(), 2_000_000);
/// ```
pub fn parse_freq_hz(s: &str) -> Result<u64, String> {
    let s = s.trim();
    let lower = s.to_lowercase();

    let (num_str, mult) = if let Some(v) = lower.strip_suffix("ghz") {
        (v.trim(), 1_000_000_000_f64)
    } else if let Some(v) = lower.strip_suffix("mhz") {
        (v.trim(), 1_000_000_f64)
    } else if let Some(v) = lower.strip_suffix("khz") {
        (v.trim(), 1_000_f64)
    } else if let Some(v) = lower.strip_suffix("hz") {
        (v.trim(), 1_f64)
    } else if let Ok(hz) = s.parse::<u64>() {
        return Ok(hz);
    } else {
        // 915e6, 2.4e9
        (lower.as_str(), 1_f64)
    };

    let n: f64 = num_str
        .parse()
        .map_err(|e| format!("Invalid frequency value '{num_str}': {e}"))?;

    if !n.is_finite() || n < 0.0 {
        return Err(format!("Invalid frequency '{s}'"));
    }

    Ok((n * mult).round() as u64)
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
