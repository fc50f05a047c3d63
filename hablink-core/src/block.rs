//! Единый интерфейс потокового блока.
//!
//! Блок вызывается внешним драйвером многократно, каждый раз с ограниченным
//! окном входов и выхода, и сообщает, сколько элементов он прочитал с
//! каждого входа и сколько записал. Блоки не создают потоков и не делят
//! изменяемое состояние друг с другом.

use hablink_types::{LinkError, LinkResult, Unit};

use crate::stream::{AnnotatedStream, InputWindow, OutputWindow};

/// Итог одного вызова `work`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WorkReport {
    /// Прочитано элементов по каждому входу
    pub consumed: Vec<usize>,
    /// Записано элементов в выход
    pub produced: usize,
}

/// Ограничения одного вызова блока.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Budget {
    /// Максимум элементов в окне каждого входа
    pub max_input: usize,
    /// Ёмкость окна выхода
    pub max_output: usize,
}

/// Потоковый блок: источник (0 входов) или преобразователь (1..N входов),
/// всегда с одним выходом.
pub trait StreamBlock: Send {
    type In: Unit;
    type Out: Unit;

    /// Имя блока для логов и диагностики
    fn name(&self) -> &str;

    /// Число входов, которое ожидает блок
    fn num_inputs(&self) -> usize {
        1
    }

    /// Обрабатывает окна входов, пишет в окно выхода.
    ///
    /// Аннотации выхода добавляются через [`OutputWindow::add_tag`] с
    /// абсолютными смещениями в диапазоне `[out.start, out.start + produced]`.
    fn work(
        &mut self,
        inputs: &[InputWindow<'_, Self::In>],
        output: &mut OutputWindow<'_, Self::Out>,
    ) -> LinkResult<WorkReport>;
}

impl WorkReport {
    pub fn new(
        consumed: Vec<usize>,
        produced: usize,
    ) -> Self {
        Self { consumed, produced }
    }

    /// Отчёт блока с одним входом.
    pub fn single(
        consumed: usize,
        produced: usize,
    ) -> Self {
        Self::new(vec![consumed], produced)
    }

    /// Ничего не прочитано и не записано.
    pub fn is_idle(&self) -> bool {
        self.produced == 0 && self.consumed.iter().all(|&n| n == 0)
    }
}

impl Budget {
    pub fn new(
        max_input: usize,
        max_output: usize,
    ) -> Self {
        Self {
            max_input,
            max_output,
        }
    }

    /// Одинаковые ограничения для входа и выхода.
    pub fn uniform(n: usize) -> Self {
        Self::new(n, n)
    }
}

impl Default for Budget {
    fn default() -> Self {
        Self::uniform(4096)
    }
}

/// Один вызов блока над потоками.
///
/// Проверяет число входов и корректность отчёта, дописывает результат в
/// `output` и отмечает прочитанное во входах.
pub fn run_block<B: StreamBlock>(
    block: &mut B,
    inputs: &mut [&mut AnnotatedStream<B::In>],
    output: &mut AnnotatedStream<B::Out>,
    budget: Budget,
) -> LinkResult<WorkReport> {
    if inputs.len() != block.num_inputs() {
        return Err(LinkError::wiring(format!(
            "Block '{}' expects {} input(s), got {}",
            block.name(),
            block.num_inputs(),
            inputs.len()
        )));
    }

    let mut scratch = vec![B::Out::default(); budget.max_output];

    let (report, tags, window_lens) = {
        let windows: Vec<InputWindow<'_, B::In>> =
            inputs.iter().map(|s| s.window(budget.max_input)).collect();
        let window_lens: Vec<usize> = windows.iter().map(|w| w.len()).collect();

        let mut out = OutputWindow::new(&mut scratch, output.write_offset());
        let report = block.work(&windows, &mut out)?;

        (report, out.into_tags(), window_lens)
    };

    if report.consumed.len() != inputs.len() {
        return Err(LinkError::wiring(format!(
            "Block '{}' reported {} consumed count(s) for {} input(s)",
            block.name(),
            report.consumed.len(),
            inputs.len()
        )));
    }

    for (i, (&n, &len)) in report.consumed.iter().zip(&window_lens).enumerate() {
        if n > len {
            return Err(LinkError::wiring(format!(
                "Block '{}' consumed {n} from input {i} with only {len} available",
                block.name()
            )));
        }
    }

    if report.produced > budget.max_output {
        return Err(LinkError::wiring(format!(
            "Block '{}' produced {} into a window of {}",
            block.name(),
            report.produced,
            budget.max_output
        )));
    }

    output.commit(&scratch[..report.produced], tags)?;

    for (stream, &n) in inputs.iter_mut().zip(&report.consumed) {
        stream.consume(n);
    }

    Ok(report)
}

/// Вызывает блок, пока он делает хоть что-то, но не больше `max_calls` раз.
pub fn run_until_idle<B: StreamBlock>(
    block: &mut B,
    inputs: &mut [&mut AnnotatedStream<B::In>],
    output: &mut AnnotatedStream<B::Out>,
    budget: Budget,
    max_calls: usize,
) -> LinkResult<usize> {
    let mut calls = 0;

    while calls < max_calls {
        let report = run_block(block, inputs, output, budget)?;
        calls += 1;

        if report.is_idle() {
            break;
        }
    }

    Ok(calls)
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use hablink_types::Tag;

    use super::*;

    /// Копирует вход в выход, удваивая значения.
    struct Doubler;

    impl StreamBlock for Doubler {
        type In = u8;
        type Out = u8;

        fn name(&self) -> &str {
            "doubler"
        }

        fn work(
            &mut self,
            inputs: &[InputWindow<'_, u8>],
            output: &mut OutputWindow<'_, u8>,
        ) -> LinkResult<WorkReport> {
            let input = &inputs[0];
            let n = input.len().min(output.capacity());

            for (o, i) in output.items_mut()[..n].iter_mut().zip(input.items()) {
                *o = i * 2;
            }
            for tag in input.tags_between(0, n) {
                let rel = input.relative(tag) as u64;
                output.add_tag(tag.moved_to(output.start() + rel));
            }

            Ok(WorkReport::single(n, n))
        }
    }

    /// Сообщает о чтении больше, чем ему дали.
    struct Greedy;

    impl StreamBlock for Greedy {
        type In = u8;
        type Out = u8;

        fn name(&self) -> &str {
            "greedy"
        }

        fn work(
            &mut self,
            inputs: &[InputWindow<'_, u8>],
            _output: &mut OutputWindow<'_, u8>,
        ) -> LinkResult<WorkReport> {
            Ok(WorkReport::single(inputs[0].len() + 1, 0))
        }
    }

    #[test]
    fn test_run_block_moves_items_and_tags() {
        let mut input = AnnotatedStream::new();
        input.extend_from_slice(&[1, 2, 3]);
        input.add_tag(Tag::length(1, "k", 2)).unwrap();
        let mut output = AnnotatedStream::new();

        let report = run_block(&mut Doubler, &mut [&mut input], &mut output, Budget::uniform(2))
            .unwrap();

        assert_eq!(report, WorkReport::single(2, 2));
        assert_eq!(output.items(), &[2, 4]);
        assert_eq!(output.tags()[0].offset, 1);
        assert_eq!(input.items(), &[3]);
        assert!(input.tags().is_empty());
    }

    #[test]
    fn test_run_block_checks_inputs() {
        let mut output = AnnotatedStream::new();
        let err = run_block(&mut Doubler, &mut [], &mut output, Budget::default()).unwrap_err();
        assert!(matches!(err, LinkError::Wiring(_)));
    }

    #[test]
    fn test_run_block_rejects_overconsumption() {
        let mut input = AnnotatedStream::new();
        input.extend_from_slice(&[1, 2]);
        let mut output = AnnotatedStream::<u8>::new();

        let err = run_block(&mut Greedy, &mut [&mut input], &mut output, Budget::default())
            .unwrap_err();
        assert!(matches!(err, LinkError::Wiring(_)));
        assert_eq!(input.available(), 2, "вход не тронут");
    }

    #[test]
    fn test_run_until_idle_stops() {
        let mut input = AnnotatedStream::new();
        input.extend_from_slice(&[1; 10]);
        let mut output = AnnotatedStream::new();

        let calls = run_until_idle(
            &mut Doubler,
            &mut [&mut input],
            &mut output,
            Budget::uniform(4),
            100,
        )
        .unwrap();

        // 4 + 4 + 2, затем пустой вызов
        assert_eq!(calls, 4);
        assert_eq!(output.available(), 10);
    }
}
