use hablink_types::LinkError;
use thiserror::Error;

pub type GroundResult<T> = std::result::Result<T, GroundError>;

#[derive(Debug, Error)]
pub enum GroundError {
    /// SDR устройство не найдено
    #[error("SDR device not found: {0}")]
    DeviceNotFound(String),

    /// Ошибка SDR устройства (частота, усиление, запись выборок)
    #[error("SDR device error: {0}")]
    DeviceError(String),

    /// Очередь к потребителю переполнена, новый элемент отброшен
    #[error("Queue overflow: {dropped} item(s) dropped so far")]
    QueueOverflow { dropped: u64 },

    /// Недопустимая конфигурация станции
    #[error("Config error: {0}")]
    Config(String),

    /// Ошибка пайплайна (inter-thread)
    #[error("Pipeline error: {0}")]
    Pipeline(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Ошибка канального уровня
    #[error("Link error: {0}")]
    Link(#[from] LinkError),
}

impl GroundError {
    pub fn config<S: Into<String>>(s: S) -> Self {
        Self::Config(s.into())
    }
}
