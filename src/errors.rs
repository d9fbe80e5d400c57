use thiserror::Error;

/// Ошибки пула и очередей. Ошибки самих задач сюда не попадают:
/// они уходят в канал ошибок очереди как есть.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum PoolError {
    #[error("worker pool needs at least one worker")]
    NoWorkers,
    #[error("queue capacity must be greater than zero")]
    ZeroCapacity,
    #[error("queue is closed for new jobs")]
    QueueClosed,
    #[error("queue was cancelled")]
    Cancelled,
}

pub type PoolResult<T> = Result<T, PoolError>;
