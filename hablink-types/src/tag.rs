use std::fmt;

use serde::Serialize;

use crate::{LinkError, LinkResult};

/// Ключ аннотации длины посылки на выходе передающей цепочки.
pub const PACKET_LEN_KEY: &str = "packet_len";

/// Значение аннотации.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TagValue {
    /// Логический флаг
    Bool(bool),
    /// Целое число (длина посылки, счётчик и т.д.)
    Int(i64),
    /// Число с плавающей точкой (частота, SNR и т.д.)
    Float(f64),
    /// Строка
    String(String),
    /// Байтовый вектор (u8vector)
    Bytes(Vec<u8>),
}

/// Аннотация, привязанная к абсолютному смещению в потоке.
///
/// Аннотация со смещением `offset` описывает элемент, который начинается на
/// этом смещении.
#[derive(Debug, Clone, PartialEq)]
pub struct Tag {
    /// Абсолютное смещение элемента
    pub offset: u64,
    /// Ключ (например, `packet_len`)
    pub key: String,
    /// Значение
    pub value: TagValue,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl TagValue {
    /// Интерпретирует значение как длину посылки.
    ///
    /// Допускается только неотрицательное целое; в остальных случаях
    /// возвращается причина отказа для диагностики.
    pub fn as_length(&self) -> Result<u64, String> {
        match self {
            TagValue::Int(v) if *v >= 0 => Ok(*v as u64),
            TagValue::Int(v) => Err(format!("negative length {v}")),
            other => Err(format!("not an integer: {other}")),
        }
    }
}

impl Tag {
    pub fn new<K: Into<String>>(
        offset: u64,
        key: K,
        value: TagValue,
    ) -> Self {
        Self {
            offset,
            key: key.into(),
            value,
        }
    }

    /// Аннотация длины посылки.
    pub fn length<K: Into<String>>(
        offset: u64,
        key: K,
        len: u64,
    ) -> Self {
        Self::new(offset, key, TagValue::Int(len as i64))
    }

    /// Длина посылки из аннотации; некорректное значение даёт
    /// [`LinkError::MalformedAnnotation`].
    pub fn burst_length(&self) -> LinkResult<u64> {
        self.value
            .as_length()
            .map_err(|reason| LinkError::malformed(self.offset, self.key.as_str(), reason))
    }

    /// Копия аннотации, перенесённая на другое смещение.
    pub fn moved_to(
        &self,
        offset: u64,
    ) -> Self {
        Self {
            offset,
            key: self.key.clone(),
            value: self.value.clone(),
        }
    }

    pub fn is_key(
        &self,
        key: &str,
    ) -> bool {
        self.key == key
    }
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов
////////////////////////////////////////////////////////////////////////////////

impl fmt::Display for TagValue {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            TagValue::Bool(v) => write!(f, "{v}"),
            TagValue::Int(v) => write!(f, "{v}"),
            TagValue::Float(v) => write!(f, "{v:.6}"),
            TagValue::String(v) => write!(f, "\"{v}\""),
            TagValue::Bytes(v) => write!(f, "[{}B]", v.len()),
        }
    }
}

impl From<i64> for TagValue {
    fn from(v: i64) -> Self {
        TagValue::Int(v)
    }
}

impl From<Vec<u8>> for TagValue {
    fn from(v: Vec<u8>) -> Self {
        TagValue::Bytes(v)
    }
}

impl From<&str> for TagValue {
    fn from(v: &str) -> Self {
        TagValue::String(v.to_string())
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_as_length() {
        assert_eq!(TagValue::Int(184).as_length(), Ok(184));
        assert_eq!(TagValue::Int(0).as_length(), Ok(0));
        assert!(TagValue::Int(-1).as_length().is_err());
        assert!(TagValue::Float(3.0).as_length().is_err());
        assert!(TagValue::from("10").as_length().is_err());
    }

    #[test]
    fn test_burst_length_reports_malformed_annotation() {
        assert_eq!(Tag::length(3, PACKET_LEN_KEY, 40).burst_length().unwrap(), 40);

        let bad = Tag::new(17, PACKET_LEN_KEY, TagValue::Int(-5));
        match bad.burst_length() {
            Err(LinkError::MalformedAnnotation {
                offset,
                key,
                reason,
            }) => {
                assert_eq!(offset, 17);
                assert_eq!(key, PACKET_LEN_KEY);
                assert!(reason.contains("negative"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_moved_to_keeps_key_and_value() {
        let tag = Tag::length(10, PACKET_LEN_KEY, 96);
        let moved = tag.moved_to(1_010);

        assert_eq!(moved.offset, 1_010);
        assert_eq!(moved.key, PACKET_LEN_KEY);
        assert_eq!(moved.value, TagValue::Int(96));
        assert_eq!(tag.offset, 10, "исходная аннотация не меняется");
    }
}
