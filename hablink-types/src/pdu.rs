use std::collections::BTreeMap;

use crate::{LinkError, LinkResult, TagValue};

/// Метаданные сообщения (словарь ключ → значение).
pub type Metadata = BTreeMap<String, TagValue>;

/// Сообщение-пакет: пара (метаданные, вектор).
#[derive(Debug, Clone, PartialEq)]
pub struct Pdu {
    pub meta: Metadata,
    pub data: TagValue,
}

/// Сообщение на границе с декодером FEC.
///
/// Декодер обязан присылать [`Message::Pdu`] с байтовым вектором; всё
/// остальное отклоняется как ошибка формата.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Пара (метаданные, вектор)
    Pdu(Pdu),
    /// Одиночное значение без метаданных
    Value(TagValue),
}

impl Pdu {
    pub fn new(
        meta: Metadata,
        data: Vec<u8>,
    ) -> Self {
        Self {
            meta,
            data: TagValue::Bytes(data),
        }
    }
}

impl Message {
    /// Сообщение с распакованными битами (один бит на байт) и пустыми
    /// метаданными.
    pub fn bits(bits: Vec<u8>) -> Self {
        Message::Pdu(Pdu::new(Metadata::new(), bits))
    }

    /// Разбирает сообщение на метаданные и вектор.
    pub fn into_vector(self) -> LinkResult<(Metadata, Vec<u8>)> {
        match self {
            Message::Pdu(Pdu {
                meta,
                data: TagValue::Bytes(v),
            }) => Ok((meta, v)),
            Message::Pdu(Pdu { data, .. }) => {
                Err(LinkError::format(format!("Not a u8vector: {data}")))
            }
            Message::Value(v) => Err(LinkError::format(format!("Not a PDU pair: {v}"))),
        }
    }
}
