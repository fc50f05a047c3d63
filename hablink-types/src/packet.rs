use serde::Serialize;

use crate::{LinkError, LinkResult, Metadata};

/// Размер поля CRC-32 в конце пакета (байт, little-endian).
pub const CRC_FIELD_BYTES: usize = 4;

/// Итог проверки CRC восстановленного пакета.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CrcOutcome {
    /// CRC совпал без дополнения или с нулевым дополнением
    ValidatedZeroPad { ambiguous: bool },
    /// CRC совпал с ненулевым шаблоном дополнения
    ValidatedPattern { pattern: u32, ambiguous: bool },
    /// Ни один шаблон не подошёл; данные дополнены нулями
    Failed { patterns_tried: u32 },
}

/// Выровненный по байтам пакет после восстановления.
#[derive(Debug, Clone)]
pub struct RecoveredPacket {
    /// Порядковый номер пакета в сессии
    pub sequence: u64,
    /// Метаданные входного сообщения
    pub meta: Metadata,
    /// Упакованные байты вместе с полем CRC
    pub bytes: Vec<u8>,
    /// Сколько бит пришло от декодера
    pub bits_received: usize,
    /// Сколько бит дописано для выравнивания
    pub pad_bits: u8,
    /// CRC из хвоста пакета
    pub received_crc: u32,
    /// CRC, вычисленный по полезной нагрузке
    pub computed_crc: u32,
    pub outcome: CrcOutcome,
}

impl CrcOutcome {
    pub fn is_valid(&self) -> bool {
        !matches!(self, CrcOutcome::Failed { .. })
    }

    pub fn is_ambiguous(&self) -> bool {
        match self {
            CrcOutcome::ValidatedZeroPad { ambiguous }
            | CrcOutcome::ValidatedPattern { ambiguous, .. } => *ambiguous,
            CrcOutcome::Failed { .. } => false,
        }
    }
}

impl RecoveredPacket {
    pub fn is_valid(&self) -> bool {
        self.outcome.is_valid()
    }

    /// Полезная нагрузка без поля CRC (независимо от итога проверки).
    pub fn payload(&self) -> &[u8] {
        let end = self.bytes.len().saturating_sub(CRC_FIELD_BYTES);
        &self.bytes[..end]
    }

    /// Полезная нагрузка без CRC, только если проверка прошла.
    pub fn into_payload(mut self) -> LinkResult<Vec<u8>> {
        if let CrcOutcome::Failed { patterns_tried } = self.outcome {
            return Err(LinkError::CrcValidationFailed {
                patterns_tried,
                computed: self.computed_crc,
                received: self.received_crc,
            });
        }

        let end = self.bytes.len().saturating_sub(CRC_FIELD_BYTES);
        self.bytes.truncate(end);
        Ok(self.bytes)
    }
}
