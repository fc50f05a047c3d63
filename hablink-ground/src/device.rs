//! SDR передатчика.
//!
//! Симулятор принимает выборки так же, как настоящий SDR: с учётом частоты
//! дискретизации, и пайплайн передачи видит тот же темп, что и с железом.

use std::{
    thread,
    time::{Duration, Instant},
};

use hablink_types::Sample;
use log::{debug, info};

use crate::{clamp_vga_gain, DeviceKind, GroundError, GroundResult, LinkConfig};

/// Управление SDR: частота, дискретизация и усиление.
pub trait DeviceControl: Send {
    /// Информация об устройстве
    fn info(&self) -> DeviceInfo;

    fn set_frequency(
        &mut self,
        hz: u64,
    ) -> GroundResult<()>;

    fn set_sample_rate(
        &mut self,
        hz: u32,
    ) -> GroundResult<()>;

    /// Усиление по имени ступени передатчика (`AMP`, `VGA`).
    fn set_gain(
        &mut self,
        name: &str,
        value: f32,
    ) -> GroundResult<()>;
}

/// Приёмник непрерывного потока выборок передатчика.
pub trait SampleSink: Send {
    /// Отдаёт выборки устройству. Возвращает, сколько принято.
    fn write_samples(
        &mut self,
        samples: &[Sample],
    ) -> GroundResult<usize>;
}

/// Полноценное SDR устройство передатчика.
pub trait SdrDevice: DeviceControl + SampleSink {}

impl<T: DeviceControl + SampleSink> SdrDevice for T {}

/// Информация об устройстве (для логирования).
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceInfo {
    pub name: String,
    pub serial: Option<String>,
    pub sample_rate_hz: u32,
    pub center_freq_hz: u64,
    pub amp_enabled: bool,
    pub vga_gain_db: f32,
}

/// Симулятор передатчика: принимает выборки и выдерживает темп
/// дискретизации.
pub struct SimulatedDevice {
    pub sample_rate_hz: u32,
    pub center_freq_hz: u64,
    pub amp_enabled: bool,
    pub vga_gain_db: f32,
    /// Выдерживать реальное время (false в тестах)
    pub realtime: bool,

    samples_written: u64,
    peak_magnitude: f32,
    started: Option<Instant>,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl SimulatedDevice {
    pub fn new(
        sample_rate_hz: u32,
        center_freq_hz: u64,
    ) -> Self {
        Self {
            sample_rate_hz,
            center_freq_hz,
            amp_enabled: false,
            vga_gain_db: 0.0,
            realtime: true,
            samples_written: 0,
            peak_magnitude: 0.0,
            started: None,
        }
    }

    /// Без задержек: выборки принимаются мгновенно.
    pub fn unpaced(mut self) -> Self {
        self.realtime = false;
        self
    }

    pub fn samples_written(&self) -> u64 {
        self.samples_written
    }

    /// Максимальная амплитуда среди принятых выборок.
    pub fn peak_magnitude(&self) -> f32 {
        self.peak_magnitude
    }

    fn pace(&mut self) {
        if !self.realtime || self.sample_rate_hz == 0 {
            return;
        }

        let started = *self.started.get_or_insert_with(Instant::now);
        let expected =
            Duration::from_secs_f64(self.samples_written as f64 / self.sample_rate_hz as f64);
        let elapsed = started.elapsed();

        if expected > elapsed {
            thread::sleep(expected - elapsed);
        }
    }
}

impl DeviceControl for SimulatedDevice {
    fn info(&self) -> DeviceInfo {
        DeviceInfo {
            name: "Simulated SDR".to_string(),
            serial: Some("SIM-0001".to_string()),
            sample_rate_hz: self.sample_rate_hz,
            center_freq_hz: self.center_freq_hz,
            amp_enabled: self.amp_enabled,
            vga_gain_db: self.vga_gain_db,
        }
    }

    fn set_frequency(
        &mut self,
        hz: u64,
    ) -> GroundResult<()> {
        if hz == 0 {
            return Err(GroundError::DeviceError("Frequency must be positive".to_string()));
        }
        debug!("Simulated SDR: frequency {hz} Hz");
        self.center_freq_hz = hz;
        Ok(())
    }

    fn set_sample_rate(
        &mut self,
        hz: u32,
    ) -> GroundResult<()> {
        if hz == 0 {
            return Err(GroundError::DeviceError("Sample rate must be positive".to_string()));
        }
        debug!("Simulated SDR: sample rate {hz} Hz");
        self.sample_rate_hz = hz;
        self.started = None;
        self.samples_written = 0;
        Ok(())
    }

    fn set_gain(
        &mut self,
        name: &str,
        value: f32,
    ) -> GroundResult<()> {
        match name.to_uppercase().as_str() {
            "AMP" => self.amp_enabled = value != 0.0,
            "VGA" => self.vga_gain_db = clamp_vga_gain(value),
            other => {
                return Err(GroundError::DeviceError(format!(
                    "Unknown TX gain stage '{other}'. Use: AMP, VGA"
                )))
            }
        }
        Ok(())
    }
}

impl SampleSink for SimulatedDevice {
    fn write_samples(
        &mut self,
        samples: &[Sample],
    ) -> GroundResult<usize> {
        for s in samples {
            self.peak_magnitude = self.peak_magnitude.max(s.norm());
        }
        self.samples_written += samples.len() as u64;
        self.pace();

        Ok(samples.len())
    }
}

/// Создаёт нужное устройство по конфигурации.
pub fn create_device(config: &LinkConfig) -> GroundResult<Box<dyn SdrDevice>> {
    match config.device {
        DeviceKind::Simulated => Ok(Box::new(SimulatedDevice::new(
            config.sample_rate_hz,
            config.center_freq_hz,
        ))),
        DeviceKind::HackRf => Err(GroundError::DeviceNotFound(
            "HackRF driver is not linked into this build; use --device sim".to_string(),
        )),
    }
}

/// Применяет частоту, дискретизацию и усиление из конфигурации.
pub fn configure_device(
    device: &mut dyn SdrDevice,
    config: &LinkConfig,
) -> GroundResult<()> {
    device.set_frequency(config.center_freq_hz)?;
    device.set_sample_rate(config.sample_rate_hz)?;
    device.set_gain("AMP", if config.amp_enabled { 1.0 } else { 0.0 })?;
    device.set_gain("VGA", config.vga_gain_db)?;

    let info = device.info();
    info!(
        "Device ready: {} @ {} Hz, center={} Hz, AMP={}, VGA={} dB",
        info.name,
        info.sample_rate_hz,
        info.center_freq_hz,
        if info.amp_enabled { "on" } else { "off" },
        info.vga_gain_db
    );
    Ok(())
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simulated_device_info() {
        let dev = SimulatedDevice::new(2_000_000, 434_000_000);
        let info = dev.info();

        assert_eq!(info.sample_rate_hz, 2_000_000);
        assert_eq!(info.center_freq_hz, 434_000_000);
        assert!(!info.amp_enabled);
        assert!(info.serial.is_some());
    }

    #[test]
    fn test_gain_stages() {
        let mut dev = SimulatedDevice::new(2_000_000, 434_000_000);

        dev.set_gain("amp", 1.0).unwrap();
        dev.set_gain("VGA", 99.0).unwrap();

        assert!(dev.amp_enabled);
        assert_eq!(dev.vga_gain_db, 47.0);

        // Приёмная ступень у передатчика отсутствует
        assert!(matches!(
            dev.set_gain("LNA", 16.0),
            Err(GroundError::DeviceError(_))
        ));
        assert!(matches!(
            dev.set_gain("IF", 3.0),
            Err(GroundError::DeviceError(_))
        ));
    }

    #[test]
    fn test_write_samples_counts() {
        let mut dev = SimulatedDevice::new(2_000_000, 434_000_000).unpaced();

        let n = dev
            .write_samples(&[Sample::new(0.0, 0.5), Sample::new(1.0, 0.0)])
            .unwrap();

        assert_eq!(n, 2);
        assert_eq!(dev.samples_written(), 2);
        assert!((dev.peak_magnitude() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_realtime_pacing() {
        // 10 kHz: 500 выборок = 50 мс
        let mut dev = SimulatedDevice::new(10_000, 434_000_000);
        let start = Instant::now();

        dev.write_samples(&[Sample::new(0.0, 0.0); 250]).unwrap();
        dev.write_samples(&[Sample::new(0.0, 0.0); 250]).unwrap();

        assert!(start.elapsed() >= Duration::from_millis(45));
    }

    #[test]
    fn test_configure_and_create() {
        let mut cfg = LinkConfig::default();
        cfg.amp_enabled = true;
        cfg.vga_gain_db = 30.0;

        let mut dev = create_device(&cfg).unwrap();
        configure_device(dev.as_mut(), &cfg).unwrap();

        let info = dev.info();
        assert!(info.amp_enabled);
        assert_eq!(info.vga_gain_db, 30.0);

        cfg.device = DeviceKind::HackRf;
        assert!(matches!(
            create_device(&cfg),
            Err(GroundError::DeviceNotFound(_))
        ));
    }
}
