//! Аннотированный поток.
//!
//! Поток хранит ещё не прочитанные элементы и аннотации к ним. Смещения
//! абсолютные: элемент с индексом `i` в буфере имеет смещение
//! `read_offset + i`. Аннотации упорядочены по смещению и никогда не
//! переставляются относительно элементов, которые они описывают.

use hablink_types::{LinkError, LinkResult, Tag, TagValue, Unit};

/// Окно чтения одного входа блока.
#[derive(Debug, Clone, Copy)]
pub struct InputWindow<'a, T> {
    items: &'a [T],
    tags: &'a [Tag],
    start: u64,
}

/// Окно записи выхода блока.
///
/// Блок пишет элементы в `items_mut()` с начала окна и добавляет аннотации
/// с абсолютными смещениями выходного потока.
#[derive(Debug)]
pub struct OutputWindow<'a, T> {
    items: &'a mut [T],
    start: u64,
    tags: Vec<Tag>,
}

/// Аннотированный поток элементов.
#[derive(Debug, Clone)]
pub struct AnnotatedStream<T> {
    items: Vec<T>,
    tags: Vec<Tag>,
    read_offset: u64,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl<'a, T> InputWindow<'a, T> {
    pub fn new(
        items: &'a [T],
        tags: &'a [Tag],
        start: u64,
    ) -> Self {
        Self { items, tags, start }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn items(&self) -> &'a [T] {
        self.items
    }

    /// Аннотации, попадающие в окно (по возрастанию смещения).
    pub fn tags(&self) -> &'a [Tag] {
        self.tags
    }

    /// Абсолютное смещение первого элемента окна.
    pub fn start(&self) -> u64 {
        self.start
    }

    /// Аннотации с ключом `key` в относительном диапазоне `[from, to)`.
    pub fn tags_in(
        &self,
        key: &str,
        from: usize,
        to: usize,
    ) -> Vec<&'a Tag> {
        let tags: &'a [Tag] = self.tags;
        let lo = self.start + from as u64;
        let hi = self.start + to as u64;

        tags.iter()
            .filter(|t| t.offset >= lo && t.offset < hi && t.is_key(key))
            .collect()
    }

    /// Все аннотации в относительном диапазоне `[from, to)`.
    pub fn tags_between(
        &self,
        from: usize,
        to: usize,
    ) -> &'a [Tag] {
        let tags: &'a [Tag] = self.tags;
        let lo = self.start + from as u64;
        let hi = self.start + to as u64;
        let a = tags.partition_point(|t| t.offset < lo);
        let b = tags.partition_point(|t| t.offset < hi);

        &tags[a..b.max(a)]
    }

    /// Относительная позиция аннотации в окне.
    pub fn relative(
        &self,
        tag: &Tag,
    ) -> usize {
        (tag.offset - self.start) as usize
    }
}

impl<'a, T> OutputWindow<'a, T> {
    pub fn new(
        items: &'a mut [T],
        start: u64,
    ) -> Self {
        Self {
            items,
            start,
            tags: Vec::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.items.len()
    }

    pub fn start(&self) -> u64 {
        self.start
    }

    pub fn items_mut(&mut self) -> &mut [T] {
        self.items
    }

    /// Добавляет аннотацию с абсолютным смещением выходного потока.
    pub fn add_tag(
        &mut self,
        tag: Tag,
    ) {
        self.tags.push(tag);
    }

    pub fn tags(&self) -> &[Tag] {
        &self.tags
    }

    pub fn into_tags(self) -> Vec<Tag> {
        self.tags
    }
}

impl<T: Unit> AnnotatedStream<T> {
    pub fn new() -> Self {
        Self {
            items: Vec::new(),
            tags: Vec::new(),
            read_offset: 0,
        }
    }

    /// Смещение первого непрочитанного элемента.
    pub fn read_offset(&self) -> u64 {
        self.read_offset
    }

    /// Смещение, которое получит следующий записанный элемент.
    pub fn write_offset(&self) -> u64 {
        self.read_offset + self.items.len() as u64
    }

    /// Число непрочитанных элементов.
    pub fn available(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn items(&self) -> &[T] {
        &self.items
    }

    pub fn tags(&self) -> &[Tag] {
        &self.tags
    }

    pub fn push(
        &mut self,
        item: T,
    ) {
        self.items.push(item);
    }

    pub fn extend_from_slice(
        &mut self,
        items: &[T],
    ) {
        self.items.extend_from_slice(items);
    }

    /// Аннотирует элемент, который будет записан следующим.
    pub fn annotate<K: Into<String>, V: Into<TagValue>>(
        &mut self,
        key: K,
        value: V,
    ) {
        let tag = Tag::new(self.write_offset(), key, value.into());
        self.insert_tag(tag);
    }

    /// Добавляет аннотацию с абсолютным смещением.
    ///
    /// Аннотация уже прочитанного элемента отклоняется. Аннотации с
    /// одинаковым смещением сохраняют порядок добавления.
    pub fn add_tag(
        &mut self,
        tag: Tag,
    ) -> LinkResult<()> {
        if tag.offset < self.read_offset {
            return Err(LinkError::wiring(format!(
                "Tag '{}' at offset {} is behind read offset {}",
                tag.key, tag.offset, self.read_offset
            )));
        }

        self.insert_tag(tag);
        Ok(())
    }

    fn insert_tag(
        &mut self,
        tag: Tag,
    ) {
        let pos = self.tags.partition_point(|t| t.offset <= tag.offset);
        self.tags.insert(pos, tag);
    }

    /// Окно чтения не длиннее `max` элементов.
    pub fn window(
        &self,
        max: usize,
    ) -> InputWindow<'_, T> {
        let n = self.items.len().min(max);
        let end = self.read_offset + n as u64;
        let tags_end = self.tags.partition_point(|t| t.offset < end);

        InputWindow::new(&self.items[..n], &self.tags[..tags_end], self.read_offset)
    }

    /// Отмечает `n` элементов прочитанными вместе с их аннотациями.
    pub fn consume(
        &mut self,
        n: usize,
    ) {
        let n = n.min(self.items.len());
        self.items.drain(..n);
        self.read_offset += n as u64;

        let keep_from = self.tags.partition_point(|t| t.offset < self.read_offset);
        self.tags.drain(..keep_from);
    }

    /// Дописывает результат работы блока.
    pub fn commit(
        &mut self,
        items: &[T],
        tags: Vec<Tag>,
    ) -> LinkResult<()> {
        let start = self.write_offset();
        let end = start + items.len() as u64;

        if let Some(bad) = tags.iter().find(|t| t.offset < start || t.offset > end) {
            return Err(LinkError::wiring(format!(
                "Tag '{}' at offset {} is outside produced range [{start}, {end}]",
                bad.key, bad.offset
            )));
        }

        self.items.extend_from_slice(items);
        for tag in tags {
            self.insert_tag(tag);
        }

        Ok(())
    }

    /// Забирает все непрочитанные элементы и аннотации.
    pub fn drain_all(&mut self) -> (Vec<T>, Vec<Tag>) {
        let items = std::mem::take(&mut self.items);
        let tags = std::mem::take(&mut self.tags);
        self.read_offset += items.len() as u64;
        (items, tags)
    }
}

/// Помнит уже обработанные аннотации длины.
///
/// Посылка нулевой длины не сдвигает позицию чтения, поэтому без курсора
/// её аннотация находилась бы повторно. Считаются аннотации на одном
/// смещении: несколько посылок нулевой длины подряд имеют одно смещение.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TagCursor {
    offset: u64,
    seen: usize,
}

impl TagCursor {
    /// Первая необработанная аннотация `key` в относительном диапазоне
    /// `[from, to)`.
    pub fn next_unseen<'a, T>(
        &self,
        input: &InputWindow<'a, T>,
        key: &str,
        from: usize,
        to: usize,
    ) -> Option<&'a Tag> {
        let mut skip = self.seen;

        for tag in input.tags_in(key, from, to) {
            if skip > 0 && tag.offset == self.offset {
                skip -= 1;
                continue;
            }
            return Some(tag);
        }

        None
    }

    pub fn mark(
        &mut self,
        tag: &Tag,
    ) {
        if self.seen > 0 && self.offset == tag.offset {
            self.seen += 1;
        } else {
            self.offset = tag.offset;
            self.seen = 1;
        }
    }

    /// Аннотация на смещении, где уже что-то обработано.
    pub fn is_processed(
        &self,
        tag: &Tag,
    ) -> bool {
        self.seen > 0 && self.offset == tag.offset
    }
}

impl<T: Unit> Default for AnnotatedStream<T> {
    fn default() -> Self {
        Self::new()
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use hablink_types::PACKET_LEN_KEY;

    use super::*;

    #[test]
    fn test_offsets_advance_with_consume() {
        let mut s = AnnotatedStream::<u8>::new();
        s.extend_from_slice(&[1, 2, 3, 4, 5]);

        assert_eq!(s.read_offset(), 0);
        assert_eq!(s.write_offset(), 5);

        s.consume(3);
        assert_eq!(s.read_offset(), 3);
        assert_eq!(s.write_offset(), 5);
        assert_eq!(s.items(), &[4, 5]);
    }

    #[test]
    fn test_annotate_marks_next_item() {
        let mut s = AnnotatedStream::<u8>::new();
        s.extend_from_slice(&[0; 4]);
        s.annotate(PACKET_LEN_KEY, 3i64);
        s.extend_from_slice(&[1, 1, 1]);

        assert_eq!(s.tags().len(), 1);
        assert_eq!(s.tags()[0].offset, 4);
    }

    #[test]
    fn test_window_limits_tags() {
        let mut s = AnnotatedStream::<u8>::new();
        s.extend_from_slice(&[0; 10]);
        s.add_tag(Tag::length(2, PACKET_LEN_KEY, 1)).unwrap();
        s.add_tag(Tag::length(8, PACKET_LEN_KEY, 1)).unwrap();

        let w = s.window(5);
        assert_eq!(w.len(), 5);
        assert_eq!(w.tags().len(), 1);
        assert_eq!(w.relative(&w.tags()[0]), 2);
        assert!(w.tags_in(PACKET_LEN_KEY, 3, 5).is_empty());
        assert_eq!(w.tags_in(PACKET_LEN_KEY, 0, 5).len(), 1);
        assert_eq!(w.tags_between(2, 3).len(), 1);
        assert!(w.tags_between(0, 2).is_empty());
    }

    #[test]
    fn test_consume_drops_read_tags() {
        let mut s = AnnotatedStream::<u8>::new();
        s.extend_from_slice(&[0; 10]);
        s.add_tag(Tag::length(2, PACKET_LEN_KEY, 1)).unwrap();
        s.add_tag(Tag::length(8, PACKET_LEN_KEY, 1)).unwrap();

        s.consume(5);
        assert_eq!(s.tags().len(), 1);
        assert_eq!(s.tags()[0].offset, 8);

        let err = s.add_tag(Tag::length(4, PACKET_LEN_KEY, 1)).unwrap_err();
        assert!(matches!(err, LinkError::Wiring(_)));
    }

    #[test]
    fn test_same_offset_tags_keep_insertion_order() {
        let mut s = AnnotatedStream::<u8>::new();
        s.push(0);
        s.add_tag(Tag::new(0, "a", TagValue::Int(1))).unwrap();
        s.add_tag(Tag::new(0, "b", TagValue::Int(2))).unwrap();

        let keys: Vec<&str> = s.tags().iter().map(|t| t.key.as_str()).collect();
        assert_eq!(keys, vec!["a", "b"]);
    }

    #[test]
    fn test_commit_rejects_out_of_range_tags() {
        let mut s = AnnotatedStream::<u8>::new();
        s.extend_from_slice(&[0; 3]);

        // Смещение 3..=5 допустимо для двух новых элементов
        let ok = s.commit(&[1, 1], vec![Tag::length(5, PACKET_LEN_KEY, 0)]);
        assert!(ok.is_ok());

        let bad = s.commit(&[1], vec![Tag::length(9, PACKET_LEN_KEY, 0)]);
        assert!(bad.is_err());
        assert_eq!(s.write_offset(), 5, "ошибочный commit ничего не пишет");
    }

    #[test]
    fn test_tag_cursor_skips_processed() {
        let mut s = AnnotatedStream::<u8>::new();
        s.annotate(PACKET_LEN_KEY, 0i64);
        s.annotate(PACKET_LEN_KEY, 1i64);
        s.push(1);

        let w = s.window(8);
        let mut cursor = TagCursor::default();

        let first = cursor.next_unseen(&w, PACKET_LEN_KEY, 0, 1).unwrap();
        assert_eq!(first.value, TagValue::Int(0));
        cursor.mark(first);

        let second = cursor.next_unseen(&w, PACKET_LEN_KEY, 0, 1).unwrap();
        assert_eq!(second.value, TagValue::Int(1));
        cursor.mark(second);

        assert!(cursor.next_unseen(&w, PACKET_LEN_KEY, 0, 1).is_none());
        assert!(cursor.is_processed(second));
    }

    #[test]
    fn test_drain_all() {
        let mut s = AnnotatedStream::<u8>::new();
        s.extend_from_slice(&[7, 8]);
        s.annotate("k", 1i64);

        let (items, tags) = s.drain_all();
        assert_eq!(items, vec![7, 8]);
        assert_eq!(tags.len(), 1);
        assert_eq!(s.read_offset(), 2);
        assert!(s.is_empty());
    }
}
