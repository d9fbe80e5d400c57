use super::{
    errors::{PoolError, PoolResult},
    handoff::Handoff,
    model::PoolMetrics,
    queue::{JobQueue, Queue},
    worker::Worker,
};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex, PoisonError,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;


/// Конфигурация пула воркеров
#[derive(Debug, Clone)]
pub struct Config {
    pub num_workers: usize,
    /// Емкость очереди по умолчанию для `new_default_queue`
    pub queue_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        let num_cpus = num_cpus::get();
        Self {
            num_workers: num_cpus * 2,
            queue_capacity: num_cpus * 200,
        }
    }
}

impl Config {
    pub fn cpu_bound() -> Self {
        let num_cpus = num_cpus::get();
        Self {
            num_workers: num_cpus,
            queue_capacity: num_cpus * 10,
        }
    }

    /// Сетевые задачи большую часть времени ждут, поэтому воркеров много
    pub fn io_bound() -> Self {
        let num_cpus = num_cpus::get();
        Self {
            num_workers: num_cpus * 25,
            queue_capacity: num_cpus * 2_500,
        }
    }

    /// Значения по умолчанию, переопределенные через `POOL_WORKERS`
    /// и `POOL_QUEUE_CAPACITY`. Нечисловые значения игнорируются.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            num_workers: env_usize("POOL_WORKERS").unwrap_or(defaults.num_workers),
            queue_capacity: env_usize("POOL_QUEUE_CAPACITY").unwrap_or(defaults.queue_capacity),
        }
    }
}

fn env_usize(key: &str) -> Option<usize> {
    std::env::var(key).ok()?.trim().parse().ok()
}


pub type Pool = Arc<WorkerPool>;

/// Пул с фиксированным числом воркеров и общим каналом передачи задач.
///
/// Один пул обслуживает любое количество очередей, последовательных или
/// одновременных. Создавать нужно внутри runtime tokio: воркеры запускаются
/// сразу в конструкторе.
pub struct WorkerPool {
    handoff: Arc<Handoff>,
    active_workers: Arc<AtomicUsize>,
    num_workers: usize,
    cancellation_token: CancellationToken,
    workers: Mutex<Vec<JoinHandle<()>>>,
    config: Config,
}

impl WorkerPool {
    pub fn new(num_workers: usize, lifecycle: CancellationToken) -> PoolResult<Pool> {
        let config = Config {
            num_workers,
            ..Default::default()
        };
        Self::with_config(config, lifecycle)
    }

    pub fn with_config(config: Config, lifecycle: CancellationToken) -> PoolResult<Pool> {
        if config.num_workers == 0 {
            return Err(PoolError::NoWorkers);
        }

        // Собственный дочерний токен: отмена или drop пула не трогает
        // токен вызывающего
        let lifecycle = lifecycle.child_token();
        let handoff = Arc::new(Handoff::new(config.num_workers));
        let active_workers = Arc::new(AtomicUsize::new(0));

        let workers: Vec<_> = (0..config.num_workers)
            .map(|id| {
                Worker::new(id, handoff.clone(), active_workers.clone(), lifecycle.clone()).spawn()
            })
            .collect();

        // После отмены пула ни одна очередь не должна ждать свободного воркера
        let watcher_token = lifecycle.clone();
        let watcher_handoff = handoff.clone();
        tokio::spawn(async move {
            watcher_token.cancelled().await;
            watcher_handoff.close();
        });

        tracing::debug!(workers = config.num_workers, "worker pool started");

        Ok(Arc::new(WorkerPool {
            handoff,
            active_workers,
            num_workers: config.num_workers,
            cancellation_token: lifecycle,
            workers: Mutex::new(workers),
            config,
        }))
    }

    /// Новая очередь поверх пула. Без собственного токена очередь получает
    /// дочерний токен пула и останавливается вместе с ним.
    pub fn new_queue<T, E>(
        self: &Arc<Self>,
        capacity: usize,
        lifecycle: Option<CancellationToken>,
    ) -> PoolResult<Queue<T, E>>
    where
        T: Send + 'static,
        E: Send + 'static,
    {
        let lifecycle = lifecycle.unwrap_or_else(|| self.cancellation_token.child_token());
        JobQueue::new(self.clone(), capacity, lifecycle)
    }

    pub fn new_default_queue<T, E>(
        self: &Arc<Self>,
        lifecycle: Option<CancellationToken>,
    ) -> PoolResult<Queue<T, E>>
    where
        T: Send + 'static,
        E: Send + 'static,
    {
        self.new_queue(self.config.queue_capacity, lifecycle)
    }

    pub(crate) fn handoff(&self) -> Arc<Handoff> {
        self.handoff.clone()
    }

    #[inline]
    pub fn total_workers(&self) -> usize {
        self.num_workers
    }

    #[inline]
    pub fn active_workers(&self) -> usize {
        self.active_workers.load(Ordering::Acquire)
    }

    #[inline]
    pub fn idle_workers(&self) -> usize {
        self.num_workers.saturating_sub(self.active_workers())
    }

    #[inline]
    pub fn metrics(&self) -> PoolMetrics {
        PoolMetrics {
            total_workers: self.num_workers,
            active_workers: self.active_workers(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    /// Останавливает всех воркеров. Задачи в работе дорабатываются,
    /// очереди с дочерними токенами отменяются вместе с пулом.
    pub fn cancel(&self) {
        self.cancellation_token.cancel();
        self.handoff.close();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }

    /// Отмена и ожидание завершения всех воркеров
    pub async fn shutdown(&self) {
        self.cancel();

        let workers = {
            let mut guard = self.workers.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut *guard)
        };
        for worker in workers {
            if let Err(err) = worker.await {
                tracing::error!(error = %err, "worker task failed");
            }
        }

        tracing::debug!(workers = self.num_workers, "worker pool stopped");
    }
}

impl Drop for WorkerPool {
    /// Без пула до воркеров уже никто не достучится
    fn drop(&mut self) {
        self.cancellation_token.cancel();
    }
}
