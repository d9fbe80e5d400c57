//! Ограниченный пул воркеров для независимых задач, которые могут завершиться ошибкой
//!
//! # Features
//! - Фиксированное число долгоживущих воркеров поверх tokio
//! - Очереди с ограниченным буфером и backpressure на отправке
//! - Каналы результатов и ошибок на каждую очередь
//! - Атомарные счетчики прогресса, доступные из любого потока
//! - Иерархическая отмена: очередь отдельно, пул целиком
//! - Сигнал завершения без опроса в цикле
//!
//! ```no_run
//! use bounded_pool::{WorkerPool, PoolError};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> Result<(), PoolError> {
//! let pool = WorkerPool::new(8, CancellationToken::new())?;
//! let queue = pool.new_queue::<u64, String>(100, None)?;
//! let mut results = queue.result_channel().unwrap();
//!
//! for i in 0..10u64 {
//!     queue.add_job(move || async move { Ok(i * i) }).await?;
//! }
//! queue.close();
//!
//! tokio::spawn(async move { while results.recv().await.is_some() {} });
//! queue.wait_finished().await?;
//! pool.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod errors;
mod handoff;
pub mod job;
pub mod model;
pub mod pool;
pub mod queue;
mod worker;

pub use errors::{PoolError, PoolResult};
pub use job::{Blocking, Task};
pub use model::{PoolMetrics, QueueMetrics};
pub use pool::{Config, Pool, WorkerPool};
pub use queue::{JobQueue, Queue};
