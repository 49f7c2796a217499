use std::sync::atomic::{AtomicUsize, Ordering};

use autograder_domain::{GradingError, GradingResult, Job};
use tokio::sync::{mpsc, Mutex, Notify};
use tracing::{debug, warn};

/// 有界评分任务队列
///
/// 基于 Tokio 有界 channel 实现：队列满时 `enqueue` 阻塞调用方，这是唯一的背压手段；
/// 队列空时 `dequeue` 阻塞。接收端用互斥锁包装，支持多个Worker共同消费。
/// `unfinished` 计数配合 `task_done` / `join` 让关闭流程可以等待已入队任务全部处理完毕。
#[derive(Debug)]
pub struct JobQueue {
    sender: mpsc::Sender<Job>,
    receiver: Mutex<mpsc::Receiver<Job>>,
    capacity: usize,
    /// 已入队但尚未标记完成的任务数
    unfinished: AtomicUsize,
    all_done: Notify,
}

impl JobQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, receiver) = mpsc::channel(capacity);
        Self {
            sender,
            receiver: Mutex::new(receiver),
            capacity,
            unfinished: AtomicUsize::new(0),
            all_done: Notify::new(),
        }
    }

    /// 入队，队列满时等待空位
    pub async fn enqueue(&self, job: Job) -> GradingResult<()> {
        // 先占位再计数，等待期间被取消不会影响计数
        let permit = self
            .sender
            .reserve()
            .await
            .map_err(|_| GradingError::QueueClosed)?;
        self.unfinished.fetch_add(1, Ordering::SeqCst);
        let job_id = job.id.clone();
        permit.send(job);
        debug!("任务已入队: {}, 队列长度: {}", job_id, self.len());
        Ok(())
    }

    /// 出队，队列空时等待
    pub async fn dequeue(&self) -> GradingResult<Job> {
        let job = {
            let mut receiver = self.receiver.lock().await;
            receiver.recv().await.ok_or(GradingError::QueueClosed)?
        };
        debug!("任务已出队: {}, 队列长度: {}", job.id, self.len());
        Ok(job)
    }

    /// 标记一个已出队的任务处理完毕（无论成功与否）
    pub fn task_done(&self) {
        let previous = self
            .unfinished
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        match previous {
            Ok(1) => {
                debug!("所有已入队任务均已处理完毕");
                self.all_done.notify_waiters();
            }
            Ok(_) => {}
            Err(_) => warn!("task_done 调用次数超过入队任务数"),
        }
    }

    /// 等待所有已入队任务被标记完成
    pub async fn join(&self) {
        loop {
            let notified = self.all_done.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.unfinished() == 0 {
                return;
            }
            notified.await;
        }
    }

    /// 当前排队（尚未出队）的任务数
    pub fn len(&self) -> usize {
        self.capacity - self.sender.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn unfinished(&self) -> usize {
        self.unfinished.load(Ordering::SeqCst)
    }
}
