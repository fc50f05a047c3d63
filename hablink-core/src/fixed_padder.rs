//! Дополнение посылок до буфера фиксированного размера.
//!
//! Каждая посылка, начало которой отмечено аннотацией длины, превращается
//! ровно в `buffer_size` выходных элементов: сначала данные посылки, затем
//! заполнитель. Посылка длиннее буфера усекается с диагностикой. Элементы
//! вне посылок отбрасываются.

use log::warn;

use hablink_types::{LinkError, LinkResult, Tag, Unit};

use crate::{
    block::{StreamBlock, WorkReport},
    diagnostics::{null_diagnostics, DiagnosticEvent, Diagnostics},
    filler::Filler,
    stream::{InputWindow, OutputWindow, TagCursor},
};

/// Состояние дополнителя.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PadderState {
    /// Ждём аннотацию длины; элементы отбрасываются
    AwaitingAnnotation,
    /// Копируем посылку и дополняем её
    CopyingBurst,
}

/// Счётчики текущей посылки (сохраняются между вызовами `work`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BurstCounters {
    /// Заявленная длина посылки
    pub bits_declared: u64,
    /// Прочитано элементов посылки
    pub bits_consumed: u64,
    /// Записано элементов в буфер (данные + заполнитель)
    pub bits_produced: u64,
}

/// Накопительная статистика.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PadderStats {
    pub bursts: u64,
    pub truncated: u64,
    pub malformed: u64,
    pub units_discarded: u64,
}

pub struct FixedBurstPadder<T> {
    buffer_size: usize,
    /// Размер, заказанный во время посылки
    pending_buffer_size: Option<usize>,
    len_tag_key: String,
    filler: Box<dyn Filler<T>>,
    diagnostics: Diagnostics,

    state: PadderState,
    counters: BurstCounters,
    cursor: TagCursor,
    sequence: u64,
    stats: PadderStats,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl<T: Unit> FixedBurstPadder<T> {
    pub fn new<K: Into<String>>(
        buffer_size: usize,
        len_tag_key: K,
        filler: Box<dyn Filler<T>>,
    ) -> LinkResult<Self> {
        check_buffer_size(buffer_size)?;

        Ok(Self {
            buffer_size,
            pending_buffer_size: None,
            len_tag_key: len_tag_key.into(),
            filler,
            diagnostics: null_diagnostics(),
            state: PadderState::AwaitingAnnotation,
            counters: BurstCounters::default(),
            cursor: TagCursor::default(),
            sequence: 0,
            stats: PadderStats::default(),
        })
    }

    pub fn with_diagnostics(
        mut self,
        diagnostics: Diagnostics,
    ) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    /// Размер буфера текущей посылки.
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Новый размер буфера действует со следующей посылки.
    pub fn set_buffer_size(
        &mut self,
        buffer_size: usize,
    ) -> LinkResult<()> {
        check_buffer_size(buffer_size)?;
        self.pending_buffer_size = Some(buffer_size);
        Ok(())
    }

    pub fn state(&self) -> PadderState {
        self.state
    }

    pub fn counters(&self) -> BurstCounters {
        self.counters
    }

    pub fn stats(&self) -> PadderStats {
        self.stats
    }

    fn start_burst(
        &mut self,
        declared: u64,
    ) {
        if let Some(size) = self.pending_buffer_size.take() {
            self.buffer_size = size;
        }

        self.sequence += 1;
        self.stats.bursts += 1;
        self.state = PadderState::CopyingBurst;
        self.counters = BurstCounters {
            bits_declared: declared,
            bits_consumed: 0,
            bits_produced: 0,
        };

        if declared > self.buffer_size as u64 {
            let err = LinkError::BufferOverrun {
                declared,
                capacity: self.buffer_size,
            };
            warn!("Burst #{}: {err}; truncating", self.sequence);
        }
    }

    fn skip_annotation(
        &mut self,
        tag: &Tag,
        err: LinkError,
    ) {
        self.stats.malformed += 1;
        self.diagnostics.emit(DiagnosticEvent::AnnotationSkipped {
            sequence: self.sequence,
            block: self.name().to_string(),
            offset: tag.offset,
            key: tag.key.clone(),
            reason: err.to_string(),
        });
    }

    fn finish_burst(&mut self) {
        let c = self.counters;
        let capacity = self.buffer_size as u64;

        if c.bits_declared > capacity {
            self.stats.truncated += 1;
            self.diagnostics.emit(DiagnosticEvent::BurstTruncated {
                sequence: self.sequence,
                declared: c.bits_declared,
                realized: c.bits_consumed,
                capacity: self.buffer_size,
            });
        } else {
            self.diagnostics.emit(DiagnosticEvent::BurstPadded {
                sequence: self.sequence,
                declared: c.bits_declared,
                realized: c.bits_consumed,
                filler: c.bits_produced - c.bits_consumed,
            });
        }

        self.state = PadderState::AwaitingAnnotation;
    }
}

fn check_buffer_size(buffer_size: usize) -> LinkResult<()> {
    if buffer_size == 0 {
        return Err(LinkError::config("Buffer size must be positive"));
    }
    Ok(())
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов
////////////////////////////////////////////////////////////////////////////////

impl<T: Unit> StreamBlock for FixedBurstPadder<T> {
    type In = T;
    type Out = T;

    fn name(&self) -> &str {
        "fixed_burst_padder"
    }

    fn work(
        &mut self,
        inputs: &[InputWindow<'_, T>],
        output: &mut OutputWindow<'_, T>,
    ) -> LinkResult<WorkReport> {
        let input = &inputs[0];
        let items = input.items();
        let capacity = output.capacity();
        let out = output.items_mut();

        let mut consumed = 0usize;
        let mut produced = 0usize;

        loop {
            match self.state {
                PadderState::AwaitingAnnotation => {
                    if consumed >= items.len() {
                        break;
                    }

                    let next =
                        self.cursor
                            .next_unseen(input, &self.len_tag_key, consumed, items.len());

                    let Some(tag) = next else {
                        self.stats.units_discarded += (items.len() - consumed) as u64;
                        consumed = items.len();
                        break;
                    };

                    let rel = input.relative(tag);
                    self.stats.units_discarded += (rel - consumed) as u64;
                    self.cursor.mark(tag);

                    match tag.burst_length() {
                        Ok(declared) => {
                            consumed = rel;
                            self.start_burst(declared);
                        }
                        Err(err) => {
                            self.skip_annotation(tag, err);
                            self.stats.units_discarded += 1;
                            consumed = rel + 1;
                        }
                    }
                }

                PadderState::CopyingBurst => {
                    let c = self.counters;
                    let remaining = (c.bits_declared - c.bits_consumed) as usize;
                    let room = self.buffer_size.saturating_sub(c.bits_produced as usize);
                    let n = remaining
                        .min(items.len() - consumed)
                        .min(room)
                        .min(capacity - produced);

                    if n > 0 {
                        out[produced..produced + n]
                            .copy_from_slice(&items[consumed..consumed + n]);
                        consumed += n;
                        produced += n;
                        self.counters.bits_consumed += n as u64;
                        self.counters.bits_produced += n as u64;
                    }

                    if self.counters.bits_produced as usize >= self.buffer_size {
                        self.finish_burst();
                        continue;
                    }

                    // Дополняем только полностью прочитанную посылку
                    if self.counters.bits_consumed < self.counters.bits_declared {
                        break;
                    }

                    let pad = (self.buffer_size - self.counters.bits_produced as usize)
                        .min(capacity - produced);
                    if pad == 0 {
                        break;
                    }

                    self.filler.fill(&mut out[produced..produced + pad]);
                    produced += pad;
                    self.counters.bits_produced += pad as u64;
                }
            }
        }

        Ok(WorkReport::single(consumed, produced))
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
