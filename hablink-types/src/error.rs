use thiserror::Error;

/// Результат для операций канального уровня.
pub type LinkResult<T> = std::result::Result<T, LinkError>;

/// Ошибки канального уровня.
///
/// Все ошибки локальны для одного пакета или одной посылки: блоки сообщают о
/// них через диагностический канал и продолжают обработку потока.
#[derive(Debug, Error)]
pub enum LinkError {
    /// Некорректная аннотация длины (не целое число или отрицательное)
    #[error("Malformed annotation '{key}' at offset {offset}: {reason}")]
    MalformedAnnotation {
        offset: u64,
        key: String,
        reason: String,
    },

    /// Посылка не помещается в буфер фиксированного размера
    #[error("Buffer overrun: burst of {declared} units exceeds capacity {capacity}")]
    BufferOverrun { declared: u64, capacity: usize },

    /// Ни один вариант дополнения не дал совпадения CRC
    #[error(
        "CRC validation failed after {patterns_tried} pattern(s): \
         computed {computed:08x}, received {received:08x}"
    )]
    CrcValidationFailed {
        patterns_tried: u32,
        computed: u32,
        received: u32,
    },

    /// Сообщение не соответствует контракту (пара метаданные + вектор)
    #[error("Format error: {0}")]
    Format(String),

    /// Значение элемента не является битом
    #[error("Invalid unit value {value} at index {index}")]
    InvalidUnit { index: usize, value: u8 },

    /// Длина битовой последовательности не кратна 8
    #[error("Invalid length: {len} bits is not a multiple of 8")]
    InvalidLength { len: usize },

    /// Недопустимые параметры блока (размер буфера, СКО шума и т.д.)
    #[error("Config error: {0}")]
    Config(String),

    /// Блок вызван с неверным числом входов
    #[error("Wiring error: {0}")]
    Wiring(String),

    /// Ошибки ввода/вывода (автоконвертируются из std::io::Error)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Ошибка сериализации диагностических событий
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl LinkError {
    /// Удобные конструкторы
    pub fn format<S: Into<String>>(s: S) -> Self {
        Self::Format(s.into())
    }

    pub fn config<S: Into<String>>(s: S) -> Self {
        Self::Config(s.into())
    }

    pub fn wiring<S: Into<String>>(s: S) -> Self {
        Self::Wiring(s.into())
    }

    pub fn malformed<K: Into<String>, R: Into<String>>(
        offset: u64,
        key: K,
        reason: R,
    ) -> Self {
        Self::MalformedAnnotation {
            offset,
            key: key.into(),
            reason: reason.into(),
        }
    }
}
