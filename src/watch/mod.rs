//! 多分片订阅句柄
//!
//! `CellWatch` 持有一组分片订阅和聚合结果的接收端，
//! `ExpandingWatch` 在此之上实现先单格、延时后扩到 9 格的搜索。

mod fanout;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use serde::de::DeserializeOwned;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::geocell::{compute_all_cell_ids, compute_canonical, compute_cell_id};
use crate::store::DocumentStore;

pub use self::fanout::{Publisher, QueryFactory, ShardFanout, ShardSnapshots, WatchError};

/// 按位置选择分片的方式：单格或自身 + 8 邻格
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellSpan {
    pub step_seconds: u32,
    pub include_neighbors: bool,
}

impl CellSpan {
    pub fn single(step_seconds: u32) -> Self {
        Self {
            step_seconds,
            include_neighbors: false,
        }
    }

    pub fn neighborhood(step_seconds: u32) -> Self {
        Self {
            step_seconds,
            include_neighbors: true,
        }
    }

    pub fn cell_ids(&self, lat: f64, lng: f64) -> Vec<String> {
        if self.include_neighbors {
            compute_all_cell_ids(lat, lng, self.step_seconds)
        } else {
            vec![compute_cell_id(&compute_canonical(
                lat,
                lng,
                self.step_seconds,
            ))]
        }
    }
}

struct WatchCore<T> {
    fanout: ShardFanout<T>,
    span: Option<CellSpan>,
    position: Option<(f64, f64)>,
}

impl<T> WatchCore<T>
where
    T: DeserializeOwned + Send + 'static,
{
    fn retarget_span(&mut self, span: CellSpan) -> bool {
        self.span = Some(span);
        match self.position {
            Some((lat, lng)) => self.fanout.retarget(span.cell_ids(lat, lng)),
            None => false,
        }
    }
}

fn lock_core<T>(core: &Mutex<WatchCore<T>>) -> MutexGuard<'_, WatchCore<T>> {
    core.lock().unwrap_or_else(PoisonError::into_inner)
}

/// 分片订阅句柄：聚合结果通过 `tokio::sync::watch` 发布，
/// 各分片的订阅错误通过独立通道上报。drop 或 `dispose` 时取消全部订阅。
pub struct CellWatch<T, A> {
    core: Arc<Mutex<WatchCore<T>>>,
    receiver: watch::Receiver<A>,
    errors: mpsc::UnboundedReceiver<WatchError>,
}

impl<T, A> CellWatch<T, A>
where
    T: DeserializeOwned + Send + 'static,
    A: Send + Sync + 'static,
{
    /// 订阅给定的分片键集合
    pub fn start<F>(
        store: Arc<dyn DocumentStore>,
        keys: Vec<String>,
        make_query: QueryFactory,
        initial: A,
        aggregate: F,
    ) -> Self
    where
        F: Fn(&ShardSnapshots<T>) -> A + Send + 'static,
    {
        let (sender, receiver) = watch::channel(initial);
        let (error_tx, errors) = mpsc::unbounded_channel();

        let publish: Publisher<T> = Box::new(move |snapshots: &ShardSnapshots<T>| {
            sender.send_replace(aggregate(snapshots));
        });
        let fanout = ShardFanout::start(store, keys, make_query, publish, error_tx);

        Self {
            core: Arc::new(Mutex::new(WatchCore {
                fanout,
                span: None,
                position: None,
            })),
            receiver,
            errors,
        }
    }

    /// 以位置为中心订阅，之后可通过 `update_position` 跟随移动
    pub fn around<F>(
        store: Arc<dyn DocumentStore>,
        span: CellSpan,
        lat: f64,
        lng: f64,
        make_query: QueryFactory,
        initial: A,
        aggregate: F,
    ) -> Self
    where
        F: Fn(&ShardSnapshots<T>) -> A + Send + 'static,
    {
        let watch = Self::start(
            store,
            span.cell_ids(lat, lng),
            make_query,
            initial,
            aggregate,
        );
        {
            let mut core = lock_core(&watch.core);
            core.span = Some(span);
            core.position = Some((lat, lng));
        }
        watch
    }

    /// 位置更新；只有分片集合变化时才重建订阅，返回是否重建
    pub fn update_position(&self, lat: f64, lng: f64) -> bool {
        let mut core = lock_core(&self.core);
        let Some(span) = core.span else {
            return false;
        };
        core.position = Some((lat, lng));
        core.fanout.retarget(span.cell_ids(lat, lng))
    }

    /// 直接切换分片键集合
    pub fn retarget(&self, keys: Vec<String>) -> bool {
        lock_core(&self.core).fanout.retarget(keys)
    }

    /// 扩大到 9 格；已经是 9 格时返回 false
    pub fn widen(&self) -> bool {
        let mut core = lock_core(&self.core);
        let span = core.span;
        match span {
            Some(span) if !span.include_neighbors => {
                core.retarget_span(CellSpan::neighborhood(span.step_seconds))
            }
            _ => false,
        }
    }

    pub fn is_widened(&self) -> bool {
        lock_core(&self.core)
            .span
            .is_some_and(|span| span.include_neighbors)
    }

    pub fn shard_keys(&self) -> Vec<String> {
        lock_core(&self.core).fanout.keys().to_vec()
    }

    pub fn is_active(&self) -> bool {
        lock_core(&self.core).fanout.is_active()
    }

    /// 另一个聚合结果接收端，例如交给 SSE 流
    pub fn receiver(&self) -> watch::Receiver<A> {
        self.receiver.clone()
    }

    /// 等待下一次聚合更新
    pub async fn changed(&mut self) -> Option<A>
    where
        A: Clone,
    {
        self.receiver.changed().await.ok()?;
        Some(self.receiver.borrow_and_update().clone())
    }

    /// 等待聚合结果满足条件
    pub async fn wait_for(&mut self, predicate: impl FnMut(&A) -> bool) -> Option<A>
    where
        A: Clone,
    {
        self.receiver
            .wait_for(predicate)
            .await
            .ok()
            .map(|value| value.clone())
    }

    pub fn current(&self) -> A
    where
        A: Clone,
    {
        self.receiver.borrow().clone()
    }

    pub async fn next_error(&mut self) -> Option<WatchError> {
        self.errors.recv().await
    }

    pub fn try_next_error(&mut self) -> Option<WatchError> {
        self.errors.try_recv().ok()
    }

    /// 同步取消全部分片订阅，可重复调用
    pub fn dispose(&self) {
        lock_core(&self.core).fanout.dispose();
    }

    fn downgrade(&self) -> Weak<Mutex<WatchCore<T>>> {
        Arc::downgrade(&self.core)
    }
}

/// 扩展式搜索：立即订阅所在单格，`expand_delay` 后若尚未扩展则换成 9 格。
/// 扩展时保留原单格的订阅和状态，只新增 8 个邻格。
pub struct ExpandingWatch<T, A> {
    watch: CellWatch<T, A>,
    timer: Option<JoinHandle<()>>,
}

impl<T, A> ExpandingWatch<T, A>
where
    T: DeserializeOwned + Send + 'static,
    A: Send + Sync + 'static,
{
    #[allow(clippy::too_many_arguments)]
    pub fn start<F>(
        store: Arc<dyn DocumentStore>,
        step_seconds: u32,
        lat: f64,
        lng: f64,
        expand_delay: Duration,
        make_query: QueryFactory,
        initial: A,
        aggregate: F,
    ) -> Self
    where
        F: Fn(&ShardSnapshots<T>) -> A + Send + 'static,
    {
        let watch = CellWatch::around(
            store,
            CellSpan::single(step_seconds),
            lat,
            lng,
            make_query,
            initial,
            aggregate,
        );

        let core = watch.downgrade();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(expand_delay).await;
            let Some(core) = core.upgrade() else {
                return;
            };
            let mut core = lock_core(&core);
            if core.span.is_some_and(|span| span.include_neighbors) {
                return;
            }
            if core.retarget_span(CellSpan::neighborhood(step_seconds)) {
                tracing::debug!("Expanded open request search to neighbor cells");
            }
        });

        Self {
            watch,
            timer: Some(timer),
        }
    }

    /// 调用方主动扩展；之后定时器到期不再有任何动作
    pub fn expand_now(&mut self) -> bool {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        self.watch.widen()
    }

    pub fn is_expanded(&self) -> bool {
        self.watch.is_widened()
    }

    pub fn watch(&self) -> &CellWatch<T, A> {
        &self.watch
    }

    pub fn watch_mut(&mut self) -> &mut CellWatch<T, A> {
        &mut self.watch
    }

    pub fn current(&self) -> A
    where
        A: Clone,
    {
        self.watch.current()
    }

    pub async fn changed(&mut self) -> Option<A>
    where
        A: Clone,
    {
        self.watch.changed().await
    }

    pub async fn wait_for(&mut self, predicate: impl FnMut(&A) -> bool) -> Option<A>
    where
        A: Clone,
    {
        self.watch.wait_for(predicate).await
    }

    /// 取消扩展定时器和全部分片订阅
    pub fn dispose(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        self.watch.dispose();
    }
}

impl<T, A> Drop for ExpandingWatch<T, A> {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

#[cfg(test)]
mod tests;
