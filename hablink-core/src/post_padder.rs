//! Хвостовое дополнение посылок.
//!
//! После каждой посылки дописывается `padding` нулевых элементов, а
//! аннотация длины посылки заменяется одной аннотацией `L + N` с тем же
//! ключом на смещении начала посылки в выходном потоке. Аннотация
//! выдаётся вместе с первым выходным элементом посылки, никогда раньше.

use hablink_types::{LinkError, LinkResult, Tag, Unit};

use crate::{
    block::{StreamBlock, WorkReport},
    diagnostics::{null_diagnostics, DiagnosticEvent, Diagnostics},
    stream::{InputWindow, OutputWindow, TagCursor},
};

/// Состояние хвостового дополнителя.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostPadState {
    /// Вне посылки: элементы проходят без изменений
    Idle,
    /// Копируем посылку; осталось `remaining` элементов
    InBurst { remaining: u64 },
    /// Пишем хвостовое дополнение; осталось `remaining` элементов
    InPadding { remaining: u64 },
}

/// Накопительная статистика.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PostPadStats {
    pub bursts: u64,
    pub padding_units: u64,
    pub passthrough_units: u64,
    pub malformed: u64,
    pub skipped_annotations: u64,
}

pub struct PostBurstPadder<T> {
    padding: u64,
    len_tag_key: String,
    diagnostics: Diagnostics,

    state: PostPadState,
    /// Аннотация `L + N`, ждущая первого выходного элемента посылки
    pending: Option<Tag>,
    /// Уже обработанные аннотации длины на входе
    cursor: TagCursor,
    sequence: u64,
    stats: PostPadStats,
    _unit: std::marker::PhantomData<fn() -> T>,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl<T: Unit> PostBurstPadder<T> {
    pub fn new<K: Into<String>>(
        padding: u64,
        len_tag_key: K,
    ) -> Self {
        Self {
            padding,
            len_tag_key: len_tag_key.into(),
            diagnostics: null_diagnostics(),
            state: PostPadState::Idle,
            pending: None,
            cursor: TagCursor::default(),
            sequence: 0,
            stats: PostPadStats::default(),
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

    pub fn padding(&self) -> u64 {
        self.padding
    }

    pub fn state(&self) -> PostPadState {
        self.state
    }

    pub fn stats(&self) -> PostPadStats {
        self.stats
    }

    /// Аннотация, ещё не выданная в выход.
    pub fn pending(&self) -> Option<&Tag> {
        self.pending.as_ref()
    }

    fn skip(
        &mut self,
        tag: &Tag,
        err: LinkError,
    ) {
        self.stats.skipped_annotations += 1;
        self.diagnostics.emit(DiagnosticEvent::AnnotationSkipped {
            sequence: self.sequence,
            block: self.name().to_string(),
            offset: tag.offset,
            key: tag.key.clone(),
            reason: err.to_string(),
        });
    }

    /// Выдаёт отложенную аннотацию на смещение `at`.
    fn flush_pending(
        &mut self,
        output: &mut OutputWindow<'_, T>,
        at: u64,
    ) {
        if let Some(tag) = self.pending.take() {
            output.add_tag(tag.moved_to(at));
        }
    }

    /// Копирует `n` элементов со входа, перенося аннотации.
    ///
    /// Аннотации длины внутри посылки отбрасываются с диагностикой,
    /// остальные переносятся в координаты выхода.
    fn copy_units(
        &mut self,
        input: &InputWindow<'_, T>,
        output: &mut OutputWindow<'_, T>,
        consumed: usize,
        produced: usize,
        n: usize,
        in_burst: bool,
    ) {
        output.items_mut()[produced..produced + n]
            .copy_from_slice(&input.items()[consumed..consumed + n]);

        let out_base = output.start() + produced as u64;
        for tag in input.tags_between(consumed, consumed + n) {
            if tag.is_key(&self.len_tag_key) {
                if self.cursor.is_processed(tag) {
                    continue;
                }
                if in_burst {
                    self.skip(
                        tag,
                        LinkError::malformed(
                            tag.offset,
                            tag.key.as_str(),
                            "length annotation inside a burst",
                        ),
                    );
                    continue;
                }
            }

            let rel = (input.relative(tag) - consumed) as u64;
            output.add_tag(tag.moved_to(out_base + rel));
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов
////////////////////////////////////////////////////////////////////////////////

impl<T: Unit> StreamBlock for PostBurstPadder<T> {
    type In = T;
    type Out = T;

    fn name(&self) -> &str {
        "post_burst_padder"
    }

    fn work(
        &mut self,
        inputs: &[InputWindow<'_, T>],
        output: &mut OutputWindow<'_, T>,
    ) -> LinkResult<WorkReport> {
        let input = &inputs[0];
        let available = input.len();
        let capacity = output.capacity();

        let mut consumed = 0usize;
        let mut produced = 0usize;

        loop {
            match self.state {
                PostPadState::Idle => {
                    let next =
                        self.cursor
                            .next_unseen(input, &self.len_tag_key, consumed, available);
                    let run_end = next.map_or(available, |t| input.relative(t));

                    // Элементы до начала посылки проходят без изменений
                    let n = (run_end - consumed).min(capacity - produced);
                    if n > 0 {
                        self.copy_units(input, output, consumed, produced, n, false);
                        consumed += n;
                        produced += n;
                        self.stats.passthrough_units += n as u64;
                    }

                    let Some(tag) = next else { break };
                    if consumed < run_end {
                        break;
                    }

                    self.cursor.mark(tag);

                    match tag.burst_length() {
                        Ok(declared) => {
                            self.sequence += 1;
                            self.stats.bursts += 1;
                            self.pending = Some(Tag::length(
                                tag.offset,
                                tag.key.clone(),
                                declared + self.padding,
                            ));
                            self.state = PostPadState::InBurst {
                                remaining: declared,
                            };
                            self.diagnostics.emit(DiagnosticEvent::BurstExtended {
                                sequence: self.sequence,
                                offset: tag.offset,
                                declared,
                                padding: self.padding,
                            });
                        }
                        Err(err) => {
                            // Элемент под аннотацией уйдёт дальше как обычный
                            self.stats.malformed += 1;
                            self.skip(tag, err);
                        }
                    }
                }

                PostPadState::InBurst { remaining } => {
                    if remaining == 0 {
                        self.state = PostPadState::InPadding {
                            remaining: self.padding,
                        };
                        continue;
                    }

                    let n = (remaining as usize)
                        .min(available - consumed)
                        .min(capacity - produced);
                    if n == 0 {
                        break;
                    }

                    let at = output.start() + produced as u64;
                    self.flush_pending(output, at);
                    self.copy_units(input, output, consumed, produced, n, true);
                    consumed += n;
                    produced += n;
                    self.state = PostPadState::InBurst {
                        remaining: remaining - n as u64,
                    };
                }

                PostPadState::InPadding { remaining } => {
                    if remaining == 0 {
                        // Пустая посылка без дополнения: аннотация 0 без данных
                        let at = output.start() + produced as u64;
                        self.flush_pending(output, at);
                        self.state = PostPadState::Idle;
                        continue;
                    }

                    let n = (remaining as usize).min(capacity - produced);
                    if n == 0 {
                        break;
                    }

                    let at = output.start() + produced as u64;
                    self.flush_pending(output, at);
                    output.items_mut()[produced..produced + n].fill(T::default());
                    produced += n;
                    self.stats.padding_units += n as u64;
                    self.state = PostPadState::InPadding {
                        remaining: remaining - n as u64,
                    };
                }
            }
        }

        Ok(WorkReport::single(consumed, produced))
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
