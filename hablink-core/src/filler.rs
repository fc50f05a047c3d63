//! Заполнители пауз между посылками.

use std::f32::consts::SQRT_2;

use rand::{rngs::StdRng, SeedableRng};
use rand_distr::{Distribution, Normal};

use hablink_types::{LinkError, LinkResult, Sample, Unit};

use crate::{
    block::{StreamBlock, WorkReport},
    stream::{InputWindow, OutputWindow},
};

/// Источник синтетических элементов.
pub trait Filler<T>: Send {
    fn fill(
        &mut self,
        out: &mut [T],
    );
}

/// Нулевой заполнитель.
#[derive(Debug, Default, Clone, Copy)]
pub struct ZeroFiller;

impl<T: Unit> Filler<T> for ZeroFiller {
    fn fill(
        &mut self,
        out: &mut [T],
    ) {
        out.fill(T::default());
    }
}

/// Комплексный гауссов шум: действительная и мнимая части независимы,
/// у каждой СКО `std`.
#[derive(Debug, Clone)]
pub struct NoiseFiller {
    dist: Normal<f32>,
    rng: StdRng,
}

impl NoiseFiller {
    pub fn new(std: f32) -> LinkResult<Self> {
        Self::with_rng(std, StdRng::from_entropy())
    }

    /// Воспроизводимый шум для тестов и симуляции.
    pub fn seeded(
        std: f32,
        seed: u64,
    ) -> LinkResult<Self> {
        Self::with_rng(std, StdRng::seed_from_u64(seed))
    }

    /// Шум с заданной полной амплитудой (СКО модуля), как у генератора
    /// гауссова шума GNU Radio: на каждую квадратуру приходится `amp / √2`.
    pub fn with_amplitude(amplitude: f32) -> LinkResult<Self> {
        Self::new(amplitude / SQRT_2)
    }

    fn with_rng(
        std: f32,
        rng: StdRng,
    ) -> LinkResult<Self> {
        if !std.is_finite() || std <= 0.0 {
            return Err(LinkError::config(format!(
                "Noise std must be positive and finite, got {std}"
            )));
        }

        let dist = Normal::new(0.0, std)
            .map_err(|e| LinkError::config(format!("Noise distribution: {e}")))?;

        Ok(Self { dist, rng })
    }

    pub fn std(&self) -> f32 {
        self.dist.std_dev()
    }
}

impl Filler<Sample> for NoiseFiller {
    fn fill(
        &mut self,
        out: &mut [Sample],
    ) {
        for s in out.iter_mut() {
            *s = Sample::new(
                self.dist.sample(&mut self.rng),
                self.dist.sample(&mut self.rng),
            );
        }
    }
}

/// Заполнитель выборок: шум при `noise_std > 0`, иначе нули.
pub fn sample_filler(noise_std: f32) -> LinkResult<Box<dyn Filler<Sample>>> {
    if noise_std > 0.0 {
        Ok(Box::new(NoiseFiller::new(noise_std)?))
    } else if noise_std == 0.0 {
        Ok(Box::new(ZeroFiller))
    } else {
        Err(LinkError::config(format!(
            "Noise std must not be negative, got {noise_std}"
        )))
    }
}

/// Источник непрерывного заполнителя (блок без входов).
pub struct FillerSource<T> {
    filler: Box<dyn Filler<T>>,
    produced: u64,
}

impl<T: Unit> FillerSource<T> {
    pub fn new(filler: Box<dyn Filler<T>>) -> Self {
        Self {
            filler,
            produced: 0,
        }
    }

    pub fn produced(&self) -> u64 {
        self.produced
    }
}

impl<T: Unit> StreamBlock for FillerSource<T> {
    type In = T;
    type Out = T;

    fn name(&self) -> &str {
        "filler_source"
    }

    fn num_inputs(&self) -> usize {
        0
    }

    fn work(
        &mut self,
        _inputs: &[InputWindow<'_, T>],
        output: &mut OutputWindow<'_, T>,
    ) -> LinkResult<WorkReport> {
        let n = output.capacity();
        self.filler.fill(output.items_mut());
        self.produced += n as u64;

        Ok(WorkReport::new(Vec::new(), n))
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        block::{run_block, Budget},
        stream::AnnotatedStream,
    };

    use super::*;

    #[test]
    fn test_zero_filler() {
        let mut buf = [Sample::new(1.0, 1.0); 4];
        Filler::<Sample>::fill(&mut ZeroFiller, &mut buf[..]);
        assert!(buf.iter().all(|s| *s == Sample::new(0.0, 0.0)));
    }

    #[test]
    fn test_noise_filler_statistics() {
        let mut filler = NoiseFiller::seeded(0.5, 42).unwrap();
        let mut buf = vec![Sample::default(); 20_000];
        filler.fill(&mut buf);

        let n = buf.len() as f32;
        let mean_re = buf.iter().map(|s| s.re).sum::<f32>() / n;
        let var_re = buf.iter().map(|s| (s.re - mean_re).powi(2)).sum::<f32>() / n;

        assert!(mean_re.abs() < 0.02, "mean = {mean_re}");
        assert!((var_re.sqrt() - 0.5).abs() < 0.02, "std = {}", var_re.sqrt());
    }

    #[test]
    fn test_noise_filler_rejects_bad_std() {
        assert!(NoiseFiller::new(0.0).is_err());
        assert!(NoiseFiller::new(-1.0).is_err());
        assert!(NoiseFiller::new(f32::NAN).is_err());
        assert!(sample_filler(-0.1).is_err());
        assert!(sample_filler(0.0).is_ok());
    }

    #[test]
    fn test_seeded_noise_is_reproducible() {
        let mut a = NoiseFiller::seeded(0.01, 7).unwrap();
        let mut b = NoiseFiller::seeded(0.01, 7).unwrap();
        let mut x = [Sample::default(); 16];
        let mut y = [Sample::default(); 16];
        a.fill(&mut x);
        b.fill(&mut y);
        assert_eq!(x, y);
    }

    #[test]
    fn test_filler_source_fills_whole_window() {
        let mut source = FillerSource::<u8>::new(Box::new(ZeroFiller));
        let mut out = AnnotatedStream::new();

        let report = run_block(&mut source, &mut [], &mut out, Budget::uniform(128)).unwrap();

        assert_eq!(report.produced, 128);
        assert_eq!(out.available(), 128);
        assert_eq!(source.produced(), 128);
    }
}
