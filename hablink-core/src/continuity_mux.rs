//! Мультиплексор непрерывности.
//!
//! Выход никогда не простаивает: если на входе посылок есть данные, они
//! идут первыми вместе со своими аннотациями (смещения пересчитываются в
//! координаты выхода), остаток окна заполняется со входа заполнителя.

use log::debug;

use hablink_types::{LinkError, LinkResult, Unit};

use crate::{
    block::{StreamBlock, WorkReport},
    diagnostics::{null_diagnostics, DiagnosticEvent, Diagnostics},
    stream::{InputWindow, OutputWindow},
};

/// Вход непрерывного заполнителя
pub const FILLER_INPUT: usize = 0;

/// Вход разреженного потока посылок
pub const BURST_INPUT: usize = 1;

/// Период отчёта о состоянии по умолчанию (элементов выхода).
pub const DEFAULT_HEALTH_INTERVAL: u64 = 100_000;

pub struct ContinuityMultiplexer<T> {
    health_interval: u64,
    diagnostics: Diagnostics,

    filler_units: u64,
    burst_units: u64,
    output_position: u64,
    last_health: u64,
    reports: u64,
    _unit: std::marker::PhantomData<fn() -> T>,
}

impl<T: Unit> ContinuityMultiplexer<T> {
    pub fn new() -> Self {
        Self {
            health_interval: DEFAULT_HEALTH_INTERVAL,
            diagnostics: null_diagnostics(),
            filler_units: 0,
            burst_units: 0,
            output_position: 0,
            last_health: 0,
            reports: 0,
            _unit: std::marker::PhantomData,
        }
    }

    pub fn with_diagnostics(
        mut self,
        diagnostics: Diagnostics,
    ) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    pub fn with_health_interval(
        mut self,
        interval: u64,
    ) -> LinkResult<Self> {
        if interval == 0 {
            return Err(LinkError::config("Health interval must be positive"));
        }
        self.health_interval = interval;
        Ok(self)
    }

    /// Всего элементов заполнителя на выходе
    pub fn filler_units(&self) -> u64 {
        self.filler_units
    }

    /// Всего элементов посылок на выходе
    pub fn burst_units(&self) -> u64 {
        self.burst_units
    }

    fn report_health(&mut self) {
        if self.output_position - self.last_health < self.health_interval {
            return;
        }

        self.last_health = self.output_position;
        self.reports += 1;
        debug!(
            "Mux: filler={} burst={} position={}",
            self.filler_units, self.burst_units, self.output_position
        );
        self.diagnostics.emit(DiagnosticEvent::MuxHealth {
            sequence: self.reports,
            filler_units: self.filler_units,
            burst_units: self.burst_units,
        });
    }
}

impl<T: Unit> Default for ContinuityMultiplexer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Unit> StreamBlock for ContinuityMultiplexer<T> {
    type In = T;
    type Out = T;

    fn name(&self) -> &str {
        "continuity_mux"
    }

    fn num_inputs(&self) -> usize {
        2
    }

    fn work(
        &mut self,
        inputs: &[InputWindow<'_, T>],
        output: &mut OutputWindow<'_, T>,
    ) -> LinkResult<WorkReport> {
        let filler = &inputs[FILLER_INPUT];
        let burst = &inputs[BURST_INPUT];
        let out_start = output.start();
        let capacity = output.capacity();

        let n_burst = burst.len().min(capacity);
        let n_filler = filler.len().min(capacity - n_burst);

        {
            let out = output.items_mut();
            out[..n_burst].copy_from_slice(&burst.items()[..n_burst]);
            out[n_burst..n_burst + n_filler].copy_from_slice(&filler.items()[..n_filler]);
        }

        for tag in burst.tags_between(0, n_burst) {
            let rel = burst.relative(tag) as u64;
            output.add_tag(tag.moved_to(out_start + rel));
        }

        self.burst_units += n_burst as u64;
        self.filler_units += n_filler as u64;
        self.output_position += (n_burst + n_filler) as u64;
        self.report_health();

        let mut consumed = vec![0; 2];
        consumed[FILLER_INPUT] = n_filler;
        consumed[BURST_INPUT] = n_burst;

        Ok(WorkReport::new(consumed, n_burst + n_filler))
    }
}
