/// Снимок состояния пула воркеров
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolMetrics {
    pub total_workers: usize,
    pub active_workers: usize,
}

impl PoolMetrics {
    pub fn idle_workers(&self) -> usize {
        self.total_workers.saturating_sub(self.active_workers)
    }

    pub fn utilization(&self) -> f64 {
        if self.total_workers == 0 {
            return 0.0;
        }
        self.active_workers as f64 / self.total_workers as f64
    }
}


/// Снимок счетчиков очереди вместе с состоянием пула.
///
/// Счетчики читаются по одному, поэтому снимок не атомарен:
/// `succeeded + failed` может на мгновение отставать от реального числа
/// завершенных задач.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMetrics {
    pub pool: PoolMetrics,
    pub submitted: usize,
    pub assigned: usize,
    pub queued: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl QueueMetrics {
    pub fn finished(&self) -> usize {
        self.succeeded + self.failed
    }

    /// Задачи, отданные воркерам, но еще не завершенные
    pub fn in_flight(&self) -> usize {
        self.assigned.saturating_sub(self.finished())
    }

    pub fn success_rate(&self) -> f64 {
        let finished = self.finished();
        if finished == 0 {
            return 1.0;
        }
        self.succeeded as f64 / finished as f64
    }

    pub fn queue_pressure(&self, capacity: usize) -> f64 {
        if capacity == 0 {
            return 0.0;
        }
        self.queued as f64 / capacity as f64
    }
}
