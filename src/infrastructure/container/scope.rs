//! 生命周期作用域与释放跟踪
//!
//! 作用域构成一棵树：父作用域显式登记子作用域（强引用），子作用域只持有
//! 父作用域和根作用域的弱句柄。每个作用域拥有：
//! - 单例/作用域实例存储（每个导出至多创建一次）
//! - 一个按后进先出顺序释放的 [`DisposalScope`]

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use super::context::InjectionContext;
use super::services::ActivationServices;
use super::strategy::ExportId;
use super::types::{downcast_instance, Instance, TypeDescriptor};
use super::wrappers::Wrapper;
use crate::errors::{ActivationError, DisposalError, DisposalFailure};

/// 需要确定性清理的对象
pub trait Disposable: Send + Sync {
    fn dispose(&self) -> anyhow::Result<()>;
}

struct TrackedDisposable {
    type_name: &'static str,
    item: Arc<dyn Disposable>,
}

/// 可释放对象列表，释放顺序为后进先出
///
/// 释放之后登记的对象会被立即释放。
pub struct DisposalScope {
    name: String,
    items: Mutex<Vec<TrackedDisposable>>,
    closed: AtomicBool,
}

impl DisposalScope {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            items: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn track(&self, type_name: &'static str, item: Arc<dyn Disposable>) {
        let tracked = TrackedDisposable { type_name, item };
        {
            let mut items = self.items.lock();
            if !self.is_closed() {
                items.push(tracked);
                return;
            }
        }

        tracing::debug!(
            scope = %self.name,
            type_name,
            "Disposal scope already closed, disposing immediately"
        );
        dispose_items(vec![tracked]);
    }

    pub fn track_disposable<T: Disposable + 'static>(&self, item: Arc<T>) {
        self.track(std::any::type_name::<T>(), item);
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    /// 释放全部已登记对象
    ///
    /// 单个对象失败不会中断后续释放，失败统一汇总返回。
    pub fn dispose(&self) -> Result<(), DisposalError> {
        let items = {
            let mut items = self.items.lock();
            self.closed.store(true, Ordering::Release);
            std::mem::take(&mut *items)
        };
        let failures = dispose_items(items);
        if failures.is_empty() {
            Ok(())
        } else {
            Err(DisposalError::new(self.name.clone(), failures))
        }
    }
}

fn dispose_items(items: Vec<TrackedDisposable>) -> Vec<DisposalFailure> {
    let mut failures = Vec::new();
    for tracked in items.into_iter().rev() {
        if let Err(e) = tracked.item.dispose() {
            tracing::warn!(
                type_name = tracked.type_name,
                error = %e,
                "Disposable failed during cleanup"
            );
            failures.push(DisposalFailure {
                type_name: tracked.type_name.to_string(),
                message: e.to_string(),
            });
        }
    }
    failures
}

impl fmt::Debug for DisposalScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DisposalScope")
            .field("name", &self.name)
            .field("tracked", &self.len())
            .finish()
    }
}

/// 作用域状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeState {
    Active,
    Disposed,
}

/// 作用域信息快照
#[derive(Debug, Clone)]
pub struct ScopeInfo {
    pub id: uuid::Uuid,
    pub name: String,
    pub state: ScopeState,
    pub parent_id: Option<uuid::Uuid>,
    pub child_count: usize,
    pub cached_instances: usize,
    pub tracked_disposables: usize,
    pub created_at: DateTime<Utc>,
}

impl ScopeInfo {
    pub fn is_valid(&self) -> bool {
        matches!(self.state, ScopeState::Active)
    }
}

type InstanceSlot = Arc<Mutex<Option<Instance>>>;

struct ScopeInner {
    id: uuid::Uuid,
    name: String,
    created_at: DateTime<Utc>,
    parent: Option<Weak<ScopeInner>>,
    root: Option<Weak<ScopeInner>>,
    children: Mutex<Vec<LifetimeScope>>,
    instances: DashMap<ExportId, InstanceSlot>,
    disposal: Arc<DisposalScope>,
    disposed: AtomicBool,
    services: Arc<ActivationServices>,
}

/// 生命周期作用域句柄
#[derive(Clone)]
pub struct LifetimeScope {
    inner: Arc<ScopeInner>,
}

/// 不延长作用域生命周期的弱句柄
#[derive(Clone)]
pub struct WeakScope {
    inner: Weak<ScopeInner>,
}

impl WeakScope {
    pub fn upgrade(&self) -> Option<LifetimeScope> {
        self.inner.upgrade().map(|inner| LifetimeScope { inner })
    }
}

impl LifetimeScope {
    pub(crate) fn new_root(name: impl Into<String>, services: Arc<ActivationServices>) -> Self {
        let name = name.into();
        tracing::info!(scope = %name, "Root scope created");
        Self {
            inner: Arc::new(ScopeInner {
                id: uuid::Uuid::new_v4(),
                disposal: Arc::new(DisposalScope::new(name.clone())),
                name,
                created_at: Utc::now(),
                parent: None,
                root: None,
                children: Mutex::new(Vec::new()),
                instances: DashMap::new(),
                disposed: AtomicBool::new(false),
                services,
            }),
        }
    }

    pub fn id(&self) -> uuid::Uuid {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn is_root(&self) -> bool {
        self.inner.root.is_none()
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }

    pub fn disposal(&self) -> &Arc<DisposalScope> {
        &self.inner.disposal
    }

    pub fn services(&self) -> &Arc<ActivationServices> {
        &self.inner.services
    }

    pub fn downgrade(&self) -> WeakScope {
        WeakScope {
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub fn parent(&self) -> Option<LifetimeScope> {
        self.inner
            .parent
            .as_ref()
            .and_then(Weak::upgrade)
            .map(|inner| LifetimeScope { inner })
    }

    /// 根作用域；根已不存在时视为作用域已关闭
    pub fn root(&self) -> Result<LifetimeScope, ActivationError> {
        match &self.inner.root {
            None => Ok(self.clone()),
            Some(root) => root
                .upgrade()
                .map(|inner| LifetimeScope { inner })
                .ok_or_else(|| ActivationError::ScopeClosed {
                    scope: format!("root of '{}'", self.name()),
                }),
        }
    }

    pub fn ensure_open(&self) -> Result<(), ActivationError> {
        if self.is_disposed() {
            Err(ActivationError::ScopeClosed {
                scope: self.name().to_string(),
            })
        } else {
            Ok(())
        }
    }

    pub fn create_child_scope(&self, name: impl Into<String>) -> Result<LifetimeScope, ActivationError> {
        let name = name.into();
        let mut children = self.inner.children.lock();
        self.ensure_open()?;

        let root = match &self.inner.root {
            Some(root) => root.clone(),
            None => Arc::downgrade(&self.inner),
        };
        let child = LifetimeScope {
            inner: Arc::new(ScopeInner {
                id: uuid::Uuid::new_v4(),
                disposal: Arc::new(DisposalScope::new(name.clone())),
                name,
                created_at: Utc::now(),
                parent: Some(Arc::downgrade(&self.inner)),
                root: Some(root),
                children: Mutex::new(Vec::new()),
                instances: DashMap::new(),
                disposed: AtomicBool::new(false),
                services: self.inner.services.clone(),
            }),
        };
        children.push(child.clone());

        tracing::debug!(parent = %self.name(), scope = %child.name(), "Child scope created");
        Ok(child)
    }

    pub fn children(&self) -> Vec<LifetimeScope> {
        self.inner.children.lock().clone()
    }

    /// 获取或创建本作用域内某个导出的唯一实例
    ///
    /// 同一 (作用域, 导出) 在并发首次访问下只会调用一次 `create`。
    pub fn get_or_create<F>(&self, export: ExportId, create: F) -> Result<Instance, ActivationError>
    where
        F: FnOnce() -> Result<Instance, ActivationError>,
    {
        self.ensure_open()?;
        let slot = self
            .inner
            .instances
            .entry(export)
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .value()
            .clone();

        let mut guard = slot.lock();
        if let Some(existing) = guard.as_ref() {
            return Ok(existing.clone());
        }
        let created = create()?;
        *guard = Some(created.clone());
        Ok(created)
    }

    pub fn locate<T: Send + Sync + 'static>(&self) -> Result<Arc<T>, ActivationError> {
        let instance = self.locate_descriptor(&TypeDescriptor::of::<T>(), None)?;
        downcast_instance::<T>(instance, "locate")
    }

    pub fn locate_with<T: Send + Sync + 'static>(
        &self,
        context: InjectionContext,
    ) -> Result<Arc<T>, ActivationError> {
        let instance = self.locate_descriptor(&TypeDescriptor::of::<T>(), Some(context))?;
        downcast_instance::<T>(instance, "locate")
    }

    pub fn locate_wrapper<W: Wrapper>(&self) -> Result<Arc<W>, ActivationError> {
        let instance = self.locate_descriptor(&W::descriptor(), None)?;
        downcast_instance::<W>(instance, "locate wrapper")
    }

    /// 顶层解析入口：取得（或编译）执行例程并在本作用域上运行
    pub fn locate_descriptor(
        &self,
        descriptor: &TypeDescriptor,
        context: Option<InjectionContext>,
    ) -> Result<Instance, ActivationError> {
        self.ensure_open()?;
        let services = &self.inner.services;
        let routine = services.routine_for(descriptor)?;

        let mut context =
            context.unwrap_or_else(|| services.context_creator().create_context(Some(self)));
        if context.scope().is_none() {
            context.set_scope(self);
        }
        routine.invoke(self, self.disposal(), Some(&context))
    }

    /// 释放作用域
    ///
    /// 先按后进先出释放本作用域登记的对象，再递归释放仍存活的子作用域。
    /// 重复调用为空操作。
    pub fn dispose(&self) -> Result<(), DisposalError> {
        if self.inner.disposed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        tracing::info!(scope = %self.name(), "Disposing scope");

        let mut failures = Vec::new();
        if let Err(e) = self.inner.disposal.dispose() {
            failures.extend(e.failures);
        }

        let children = std::mem::take(&mut *self.inner.children.lock());
        for child in children.into_iter().rev() {
            if let Err(e) = child.dispose() {
                failures.extend(e.failures);
            }
        }

        self.inner.instances.clear();

        if let Some(parent) = self.parent() {
            parent
                .inner
                .children
                .lock()
                .retain(|child| child.id() != self.id());
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(DisposalError::new(self.name(), failures))
        }
    }

    pub fn info(&self) -> ScopeInfo {
        ScopeInfo {
            id: self.id(),
            name: self.name().to_string(),
            state: if self.is_disposed() {
                ScopeState::Disposed
            } else {
                ScopeState::Active
            },
            parent_id: self.parent().map(|p| p.id()),
            child_count: self.inner.children.lock().len(),
            cached_instances: self.inner.instances.len(),
            tracked_disposables: self.inner.disposal.len(),
            created_at: self.inner.created_at,
        }
    }
}

impl fmt::Debug for LifetimeScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifetimeScope")
            .field("id", &self.id())
            .field("name", &self.name())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ContainerConfig;
    use std::sync::atomic::AtomicUsize;

    struct Recorder {
        id: usize,
        log: Arc<Mutex<Vec<usize>>>,
        fail: bool,
    }

    impl Disposable for Recorder {
        fn dispose(&self) -> anyhow::Result<()> {
            self.log.lock().push(self.id);
            if self.fail {
                anyhow::bail!("recorder {} refused to close", self.id);
            }
            Ok(())
        }
    }

    fn root() -> LifetimeScope {
        LifetimeScope::new_root("root", Arc::new(ActivationServices::new(ContainerConfig::default())))
    }

    #[test]
    fn test_disposal_is_lifo_and_idempotent() {
        let scope = root();
        let log = Arc::new(Mutex::new(Vec::new()));
        for id in 0..3 {
            scope.disposal().track_disposable(Arc::new(Recorder {
                id,
                log: log.clone(),
                fail: false,
            }));
        }

        scope.dispose().unwrap();
        assert_eq!(*log.lock(), vec![2, 1, 0]);

        scope.dispose().unwrap();
        assert_eq!(log.lock().len(), 3);
        assert!(scope.is_disposed());
    }

    #[test]
    fn test_disposal_continues_after_failure() {
        let scope = root();
        let log = Arc::new(Mutex::new(Vec::new()));
        for id in 0..3 {
            scope.disposal().track_disposable(Arc::new(Recorder {
                id,
                log: log.clone(),
                fail: id == 1,
            }));
        }

        let err = scope.dispose().unwrap_err();
        assert_eq!(*log.lock(), vec![2, 1, 0]);
        assert_eq!(err.len(), 1);
        assert!(err.failures[0].message.contains("recorder 1"));
    }

    #[test]
    fn test_late_tracking_disposes_immediately() {
        let scope = root();
        let log = Arc::new(Mutex::new(Vec::new()));
        scope.disposal().track_disposable(Arc::new(Recorder {
            id: 0,
            log: log.clone(),
            fail: false,
        }));
        scope.dispose().unwrap();
        assert!(scope.disposal().is_closed());

        scope.disposal().track_disposable(Arc::new(Recorder {
            id: 1,
            log: log.clone(),
            fail: true,
        }));
        assert_eq!(*log.lock(), vec![0, 1]);
        assert!(scope.disposal().is_empty());

        scope.dispose().unwrap();
        assert_eq!(log.lock().len(), 2);
    }

    #[test]
    fn test_parent_disposal_reaches_children() {
        let scope = root();
        let child = scope.create_child_scope("child").unwrap();
        let grandchild = child.create_child_scope("grandchild").unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));
        grandchild.disposal().track_disposable(Arc::new(Recorder {
            id: 9,
            log: log.clone(),
            fail: false,
        }));

        scope.dispose().unwrap();
        assert!(child.is_disposed());
        assert!(grandchild.is_disposed());
        assert_eq!(*log.lock(), vec![9]);
    }

    #[test]
    fn test_disposed_child_detaches_from_parent() {
        let scope = root();
        let child = scope.create_child_scope("unit-of-work").unwrap();
        assert_eq!(scope.info().child_count, 1);
        assert_eq!(child.info().parent_id, Some(scope.id()));

        child.dispose().unwrap();
        assert_eq!(scope.info().child_count, 0);
        assert!(!scope.is_disposed());
    }

    #[test]
    fn test_closed_scope_rejects_work() {
        let scope = root();
        scope.dispose().unwrap();

        assert!(scope.create_child_scope("late").unwrap_err().is_scope_closed());
        let result = scope.get_or_create(ExportId::next(), || Ok(Arc::new(1_u8) as Instance));
        assert!(result.unwrap_err().is_scope_closed());
        assert_eq!(scope.info().state, ScopeState::Disposed);
    }

    #[test]
    fn test_get_or_create_runs_once() {
        let scope = root();
        let export = ExportId::next();
        let calls = AtomicUsize::new(0);

        for _ in 0..5 {
            let value = scope
                .get_or_create(export, || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(Arc::new(String::from("shared")) as Instance)
                })
                .unwrap();
            assert_eq!(*value.downcast::<String>().unwrap(), "shared");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_child_root_points_at_root() {
        let scope = root();
        let child = scope.create_child_scope("a").unwrap();
        let grandchild = child.create_child_scope("b").unwrap();
        assert_eq!(grandchild.root().unwrap().id(), scope.id());
        assert!(scope.is_root());
        assert!(!grandchild.is_root());
    }
}
