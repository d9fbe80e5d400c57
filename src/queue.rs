use super::{
    errors::{PoolError, PoolResult},
    handoff::Handoff,
    job::{Blocking, Job, Task},
    model::QueueMetrics,
    pool::Pool,
};
use std::{
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex, PoisonError,
    },
    time::Duration,
};
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::{CancellationToken, DropGuard};


pub type Queue<T, E> = Arc<JobQueue<T, E>>;

/// Очередь одного прогона поверх общего пула.
///
/// Задачи буферизуются в ограниченном канале емкостью `capacity`;
/// фоновый цикл пересылки передает их в пул по одной, когда освобождается
/// воркер. Результаты и ошибки приходят в отдельные каналы той же емкости.
///
/// Вызывающий обязан вычитывать оба канала: при заполненном канале воркер
/// ждет доставки, а `add_job` ждет места в буфере. Ожидание доставки
/// снимается отменой очереди или пула.
///
/// Паника внутри задачи учитывается в `error_count()`, но в канал ошибок
/// ничего не отправляет. Число полученных сообщений может быть меньше
/// `finished_count()`, поэтому конец прогона нужно определять через
/// `wait_finished()`, а не подсчетом сообщений.
///
/// При `cancel()` задачи, еще лежащие в буфере, выбрасываются без выполнения.
/// Чтобы сначала доработать все отправленное, используйте `shutdown()`.
/// Очередь с собственным токеном тоже отменяется, когда отменяют пул.
pub struct JobQueue<T, E> {
    pool: Pool,
    sender: mpsc::Sender<Job<T, E>>,
    result_sink: mpsc::Sender<T>,
    error_sink: mpsc::Sender<E>,
    results: Mutex<Option<mpsc::Receiver<T>>>,
    errors: Mutex<Option<mpsc::Receiver<E>>>,
    submitted: Arc<AtomicUsize>,
    assigned: Arc<AtomicUsize>,
    successes: Arc<AtomicUsize>,
    failures: Arc<AtomicUsize>,
    finished: Arc<Notify>,
    closed: AtomicBool,
    capacity: usize,
    cancellation_token: CancellationToken,
    _unlink: DropGuard,
}

impl<T, E> JobQueue<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    pub(crate) fn new(pool: Pool, capacity: usize, lifecycle: CancellationToken) -> PoolResult<Queue<T, E>> {
        if capacity == 0 {
            return Err(PoolError::ZeroCapacity);
        }

        let (sender, jobs) = mpsc::channel(capacity);
        let (result_sink, results) = mpsc::channel(capacity);
        let (error_sink, errors) = mpsc::channel(capacity);
        let assigned = Arc::new(AtomicUsize::new(0));

        // Токен очереди отменяется и своим родителем, и пулом
        let lifecycle = lifecycle.child_token();
        let unlink = CancellationToken::new();
        tokio::spawn(link_to_pool(pool.cancellation_token(), lifecycle.clone(), unlink.clone()));

        tokio::spawn(forward(jobs, pool.handoff(), assigned.clone(), lifecycle.clone()));

        Ok(Arc::new(JobQueue {
            pool,
            sender,
            result_sink,
            error_sink,
            results: Mutex::new(Some(results)),
            errors: Mutex::new(Some(errors)),
            submitted: Arc::new(AtomicUsize::new(0)),
            assigned,
            successes: Arc::new(AtomicUsize::new(0)),
            failures: Arc::new(AtomicUsize::new(0)),
            finished: Arc::new(Notify::new()),
            closed: AtomicBool::new(false),
            capacity,
            cancellation_token: lifecycle,
            _unlink: unlink.drop_guard(),
        }))
    }

    fn job(&self, task: Box<dyn Task<T, E>>) -> Job<T, E> {
        Job {
            task,
            result_sink: self.result_sink.clone(),
            error_sink: self.error_sink.clone(),
            successes: self.successes.clone(),
            failures: self.failures.clone(),
            finished: self.finished.clone(),
            lifecycle: self.cancellation_token.clone(),
        }
    }

    fn check_open(&self) -> PoolResult<()> {
        if self.is_cancelled() {
            return Err(PoolError::Cancelled);
        }
        if self.closed.load(Ordering::Acquire) {
            return Err(PoolError::QueueClosed);
        }
        Ok(())
    }

    /// Ставит задачу в очередь. Ждет, пока в буфере не появится место.
    pub async fn add_job<W>(&self, task: W) -> PoolResult<()>
    where
        W: Task<T, E>,
    {
        self.check_open()?;
        let permit = self.sender.reserve().await.map_err(|_| PoolError::Cancelled)?;

        // Счетчик растет до того, как задачу увидит цикл пересылки
        self.submitted.fetch_add(1, Ordering::AcqRel);
        permit.send(self.job(Box::new(task)));
        Ok(())
    }

    /// Синхронное замыкание, выполняемое в blocking-пуле tokio
    pub async fn add_blocking_task<F>(&self, f: F) -> PoolResult<()>
    where
        F: FnOnce() -> Result<T, E> + Send + 'static,
    {
        self.add_job(Blocking(f)).await
    }

    /// Вариант `add_job` для обычных потоков ОС: блокирует поток, пока
    /// в буфере нет места. Нельзя вызывать из async-контекста.
    pub fn blocking_add_job<W>(&self, task: W) -> PoolResult<()>
    where
        W: Task<T, E>,
    {
        self.check_open()?;
        let permit = futures::executor::block_on(self.sender.reserve()).map_err(|_| PoolError::Cancelled)?;

        self.submitted.fetch_add(1, Ordering::AcqRel);
        permit.send(self.job(Box::new(task)));
        Ok(())
    }

    /// Приемник результатов. Отдается один раз, дальше `None`.
    pub fn result_channel(&self) -> Option<mpsc::Receiver<T>> {
        self.results.lock().unwrap_or_else(PoisonError::into_inner).take()
    }

    /// Приемник ошибок задач. Отдается один раз, дальше `None`.
    pub fn error_channel(&self) -> Option<mpsc::Receiver<E>> {
        self.errors.lock().unwrap_or_else(PoisonError::into_inner).take()
    }

    /// Больше задач не будет. После этого `wait_finished` может завершиться.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.finished.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn is_drained(&self) -> bool {
        self.is_closed() && self.finished_count() >= self.submitted_count()
    }

    /// Ждет, пока очередь закрыта и каждая отправленная задача завершилась.
    /// Возвращает `Cancelled`, если очередь или пул отменили раньше.
    pub async fn wait_finished(&self) -> PoolResult<()> {
        loop {
            let notified = self.finished.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.is_drained() {
                return Ok(());
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = self.cancellation_token.cancelled() => {
                    return if self.is_drained() { Ok(()) } else { Err(PoolError::Cancelled) };
                }
            }
        }
    }

    pub async fn wait_finished_timeout(&self, timeout: Duration) -> PoolResult<bool> {
        match tokio::time::timeout(timeout, self.wait_finished()).await {
            Ok(res) => res.map(|_| true),
            Err(_) => Ok(false),
        }
    }

    /// Закрывает очередь, дорабатывает все отправленное и только потом
    /// останавливает цикл пересылки. Потерь задач нет.
    pub async fn shutdown(&self) -> PoolResult<()> {
        self.close();
        let res = self.wait_finished().await;
        self.cancel();
        res
    }

    /// Немедленная остановка пересылки. Задачи из буфера теряются,
    /// воркеры пула продолжают работать. Переданный при создании токен
    /// не отменяется.
    pub fn cancel(&self) {
        self.cancellation_token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation_token.is_cancelled() || self.pool.is_cancelled()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn submitted_count(&self) -> usize {
        self.submitted.load(Ordering::Acquire)
    }

    #[inline]
    pub fn assigned_count(&self) -> usize {
        self.assigned.load(Ordering::Acquire)
    }

    /// Задачи в буфере, еще не переданные воркерам
    #[inline]
    pub fn queued_count(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }

    #[inline]
    pub fn success_count(&self) -> usize {
        self.successes.load(Ordering::Acquire)
    }

    #[inline]
    pub fn error_count(&self) -> usize {
        self.failures.load(Ordering::Acquire)
    }

    /// Сумма двух отдельных чтений, не атомарный снимок
    #[inline]
    pub fn finished_count(&self) -> usize {
        self.success_count() + self.error_count()
    }

    pub fn metrics(&self) -> QueueMetrics {
        QueueMetrics {
            pool: self.pool.metrics(),
            submitted: self.submitted_count(),
            assigned: self.assigned_count(),
            queued: self.queued_count(),
            succeeded: self.success_count(),
            failed: self.error_count(),
        }
    }

    /// Мониторинг метрик с callback. Останавливается отменой возвращенного
    /// токена или вместе с очередью.
    pub fn start_monitoring<F>(self: &Arc<Self>, interval: Duration, callback: F) -> CancellationToken
    where
        F: Fn(QueueMetrics) + Send + 'static,
    {
        let queue = Arc::downgrade(self);
        let token = self.cancellation_token.child_token();
        let token_clone = token.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match queue.upgrade() {
                            Some(queue) => callback(queue.metrics()),
                            None => break,
                        }
                    }
                    _ = token_clone.cancelled() => break,
                }
            }
        });

        token
    }
}


/// Отменяет токен очереди вместе с пулом. Завершается, когда очередь
/// отменена или уничтожена.
async fn link_to_pool(pool: CancellationToken, queue: CancellationToken, unlink: CancellationToken) {
    tokio::select! {
        _ = pool.cancelled() => queue.cancel(),
        _ = queue.cancelled() => {}
        _ = unlink.cancelled() => {}
    }
}


/// Цикл пересылки: берет задачи из буфера очереди и по одной передает в пул.
/// Живет ровно столько, сколько очередь: выходит по отмене токена или когда
/// очередь уничтожена.
async fn forward<T, E>(
    mut jobs: mpsc::Receiver<Job<T, E>>,
    handoff: Arc<Handoff>,
    assigned: Arc<AtomicUsize>,
    lifecycle: CancellationToken,
) where
    T: Send + 'static,
    E: Send + 'static,
{
    let mut abandoned = 0usize;
    loop {
        let job = tokio::select! {
            biased;
            _ = lifecycle.cancelled() => break,
            job = jobs.recv() => match job {
                Some(job) => job,
                None => break,
            },
        };

        let slot = tokio::select! {
            biased;
            _ = lifecycle.cancelled() => None,
            slot = handoff.reserve() => slot,
        };
        let Some(slot) = slot else {
            // Пул закрыт: очередь больше ничего не выполнит
            lifecycle.cancel();
            abandoned += 1;
            break;
        };
        assigned.fetch_add(1, Ordering::AcqRel);
        slot.send(job.into_dispatch());
    }

    jobs.close();
    while jobs.try_recv().is_ok() {
        abandoned += 1;
    }
    if abandoned > 0 {
        tracing::warn!(abandoned, "queue stopped with buffered jobs, dropping them");
    }
    tracing::debug!(assigned = assigned.load(Ordering::Acquire), "queue forwarding stopped");
}
