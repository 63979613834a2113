//! 片段编译器与执行例程缓存
//!
//! 片段树只编译一次，产生不可变、可并发调用的 [`CompiledRoutine`]。
//! 缓存发布采用“先到先得”：并发编译同一键时只保留第一个发布的例程，
//! 其余结果被丢弃，调用方统一拿到已发布的那个。
//! 构建期间若缓存被清空（注册发生变化），构建结果只返回给调用方，不发布。

use dashmap::DashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::context::InjectionContext;
use super::fragment::Fragment;
use super::request::DisposalTarget;
use super::scope::{DisposalScope, LifetimeScope};
use super::strategy::ExportStrategy;
use super::types::{Instance, TypeKey};
use super::ServiceLifetime;
use crate::errors::ActivationError;
use crate::logging::OperationTimer;

/// 例程调用时的执行环境
pub struct Frame<'a> {
    pub scope: &'a LifetimeScope,
    pub disposal: &'a Arc<DisposalScope>,
    pub context: Option<&'a InjectionContext>,
}

type RoutineFn = dyn Fn(&Frame<'_>) -> Result<Instance, ActivationError> + Send + Sync;

/// 缓存键：请求类型加上可选的区分标签
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CompileKey {
    requested: TypeKey,
    label: Option<String>,
}

impl CompileKey {
    pub fn for_type(requested: TypeKey) -> Self {
        Self {
            requested,
            label: None,
        }
    }

    pub fn labelled(requested: TypeKey, label: impl Into<String>) -> Self {
        Self {
            requested,
            label: Some(label.into()),
        }
    }

    pub fn requested(&self) -> TypeKey {
        self.requested
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }
}

impl fmt::Display for CompileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.label {
            Some(label) => write!(f, "{}#{}", self.requested, label),
            None => write!(f, "{}", self.requested),
        }
    }
}

/// 编译完成的执行例程
#[derive(Clone)]
pub struct CompiledRoutine {
    key: CompileKey,
    routine: Arc<RoutineFn>,
}

impl CompiledRoutine {
    pub fn key(&self) -> &CompileKey {
        &self.key
    }

    /// 在给定作用域、释放作用域和上下文上运行例程
    pub fn invoke(
        &self,
        scope: &LifetimeScope,
        disposal: &Arc<DisposalScope>,
        context: Option<&InjectionContext>,
    ) -> Result<Instance, ActivationError> {
        scope.ensure_open()?;
        let frame = Frame {
            scope,
            disposal,
            context,
        };
        (self.routine)(&frame)
    }

    pub(crate) fn run(&self, frame: &Frame<'_>) -> Result<Instance, ActivationError> {
        (self.routine)(frame)
    }

    /// 两个句柄是否指向同一个已发布例程
    pub fn ptr_eq(&self, other: &CompiledRoutine) -> bool {
        Arc::ptr_eq(&self.routine, &other.routine)
    }
}

impl fmt::Debug for CompiledRoutine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledRoutine")
            .field("key", &self.key)
            .finish()
    }
}

/// 编译统计
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompileStats {
    pub compiles: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub invalidations: u64,
    pub cached_routines: usize,
}

impl CompileStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.cache_hits + self.cache_misses;
        if total == 0 {
            0.0
        } else {
            self.cache_hits as f64 / total as f64
        }
    }
}

#[derive(Default)]
struct InnerStats {
    compiles: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    invalidations: AtomicU64,
}

pub struct ActivationCompiler {
    routines: DashMap<CompileKey, CompiledRoutine>,
    generation: AtomicU64,
    enabled: bool,
    track_transients: bool,
    stats: InnerStats,
}

impl ActivationCompiler {
    pub fn new(enabled: bool, track_transients: bool) -> Self {
        Self {
            routines: DashMap::new(),
            generation: AtomicU64::new(0),
            enabled,
            track_transients,
            stats: InnerStats::default(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// 编译片段并发布到缓存（缓存关闭时只编译）
    pub fn compile(&self, fragment: &Fragment, key: CompileKey) -> CompiledRoutine {
        let routine = self.build(fragment, key);
        self.publish(routine)
    }

    /// 编译片段但不进入缓存，供包装器的内部例程使用
    pub fn compile_delegate(&self, fragment: &Fragment, key: CompileKey) -> CompiledRoutine {
        self.build(fragment, key)
    }

    /// 命中缓存直接返回，否则调用 `build` 产生片段并编译发布
    pub fn get_or_compile<F>(&self, key: CompileKey, build: F) -> Result<CompiledRoutine, ActivationError>
    where
        F: FnOnce() -> Result<Fragment, ActivationError>,
    {
        if let Some(cached) = self.cached(&key) {
            self.stats.cache_hits.fetch_add(1, Ordering::Relaxed);
            return Ok(cached);
        }
        self.stats.cache_misses.fetch_add(1, Ordering::Relaxed);

        let generation = self.generation();
        let fragment = build()?;
        let routine = self.build(&fragment, key);
        if self.generation() != generation {
            tracing::debug!(key = %routine.key, "Registrations changed during build, routine not cached");
            return Ok(routine);
        }
        Ok(self.publish(routine))
    }

    /// 缓存代数，每次清空缓存加一
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub fn cached(&self, key: &CompileKey) -> Option<CompiledRoutine> {
        if !self.enabled {
            return None;
        }
        self.routines.get(key).map(|entry| entry.value().clone())
    }

    /// 注册变化后清空缓存
    pub fn invalidate(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        if self.routines.is_empty() {
            return;
        }
        let dropped = self.routines.len();
        self.routines.clear();
        self.stats.invalidations.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(dropped, "Compiled routine cache invalidated");
    }

    pub fn len(&self) -> usize {
        self.routines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routines.is_empty()
    }

    pub fn stats(&self) -> CompileStats {
        CompileStats {
            compiles: self.stats.compiles.load(Ordering::Relaxed),
            cache_hits: self.stats.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.stats.cache_misses.load(Ordering::Relaxed),
            invalidations: self.stats.invalidations.load(Ordering::Relaxed),
            cached_routines: self.routines.len(),
        }
    }

    fn publish(&self, routine: CompiledRoutine) -> CompiledRoutine {
        if !self.enabled {
            return routine;
        }
        self.routines
            .entry(routine.key.clone())
            .or_insert(routine)
            .value()
            .clone()
    }

    fn build(&self, fragment: &Fragment, key: CompileKey) -> CompiledRoutine {
        let timer = OperationTimer::new("compile_routine")
            .with_metadata("key", &key.to_string())
            .with_metadata("nodes", &fragment.node_count().to_string());
        let routine = self.emit(fragment);
        self.stats.compiles.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(
            key = %key,
            elapsed_us = timer.elapsed().as_micros() as u64,
            "Routine compiled"
        );
        CompiledRoutine { key, routine }
    }

    fn emit(&self, fragment: &Fragment) -> Arc<RoutineFn> {
        match fragment {
            Fragment::Constant { value, .. } => {
                let value = value.clone();
                Arc::new(move |_frame: &Frame<'_>| Ok(value.clone()))
            }
            Fragment::ContextValue { slot, key } => {
                let (slot, key) = (*slot, *key);
                Arc::new(move |frame: &Frame<'_>| {
                    frame
                        .context
                        .and_then(|context| context.slot(slot))
                        .cloned()
                        .ok_or_else(|| ActivationError::MissingArgument {
                            type_name: key.name().to_string(),
                            slot: slot.value(),
                        })
                })
            }
            Fragment::Construct {
                export,
                dependencies,
            } => {
                let export = export.clone();
                let dependencies: Vec<Arc<RoutineFn>> =
                    dependencies.iter().map(|d| self.emit(d)).collect();
                Arc::new(move |frame: &Frame<'_>| {
                    let values = dependencies
                        .iter()
                        .map(|dependency| dependency(frame))
                        .collect::<Result<Vec<_>, _>>()?;
                    export.create(&values, frame.context)
                })
            }
            Fragment::Lifetime {
                lifetime,
                export,
                disposal,
                inner,
            } => self.emit_lifetime(*lifetime, export.clone(), *disposal, self.emit(inner)),
            Fragment::Deferred(factory) => {
                let factory = factory.clone();
                Arc::new(move |frame: &Frame<'_>| factory.activate(frame))
            }
        }
    }

    fn emit_lifetime(
        &self,
        lifetime: ServiceLifetime,
        export: ExportStrategy,
        target: DisposalTarget,
        inner: Arc<RoutineFn>,
    ) -> Arc<RoutineFn> {
        match lifetime {
            ServiceLifetime::Transient => {
                let track = self.track_transients;
                Arc::new(move |frame: &Frame<'_>| {
                    let value = inner(frame)?;
                    if track {
                        if let Some(disposable) = export.as_disposable(&value) {
                            match target {
                                DisposalTarget::Ambient => {
                                    frame.disposal.track(export.key().name(), disposable)
                                }
                                DisposalTarget::Root => frame
                                    .scope
                                    .root()?
                                    .disposal()
                                    .track(export.key().name(), disposable),
                            }
                        }
                    }
                    Ok(value)
                })
            }
            ServiceLifetime::Singleton => Arc::new(move |frame: &Frame<'_>| {
                let root = frame.scope.root()?;
                root.get_or_create(export.id(), || {
                    let root_frame = Frame {
                        scope: &root,
                        disposal: root.disposal(),
                        context: frame.context,
                    };
                    let value = inner(&root_frame)?;
                    if let Some(disposable) = export.as_disposable(&value) {
                        root.disposal().track(export.key().name(), disposable);
                    }
                    Ok(value)
                })
            }),
            ServiceLifetime::Scoped => Arc::new(move |frame: &Frame<'_>| {
                let scope = frame.scope;
                scope.get_or_create(export.id(), || {
                    let scoped_frame = Frame {
                        scope,
                        disposal: scope.disposal(),
                        context: frame.context,
                    };
                    let value = inner(&scoped_frame)?;
                    if let Some(disposable) = export.as_disposable(&value) {
                        scope.disposal().track(export.key().name(), disposable);
                    }
                    Ok(value)
                })
            }),
        }
    }
}

impl fmt::Debug for ActivationCompiler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActivationCompiler")
            .field("enabled", &self.enabled)
            .field("cached", &self.routines.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ContainerConfig;
    use crate::infrastructure::container::context::SlotId;
    use crate::infrastructure::container::services::ActivationServices;
    use crate::infrastructure::container::ServiceContainer;
    use std::sync::atomic::AtomicUsize;

    fn constant(value: i32) -> Fragment {
        Fragment::Constant {
            key: TypeKey::of::<i32>(),
            value: Arc::new(value),
        }
    }

    fn root_scope() -> LifetimeScope {
        LifetimeScope::new_root(
            "compiler-test",
            Arc::new(ActivationServices::new(ContainerConfig::default())),
        )
    }

    #[test]
    fn test_get_or_compile_builds_once() {
        let compiler = ActivationCompiler::new(true, true);
        let key = CompileKey::for_type(TypeKey::of::<i32>());
        let builds = AtomicUsize::new(0);

        let first = compiler
            .get_or_compile(key.clone(), || {
                builds.fetch_add(1, Ordering::SeqCst);
                Ok(constant(7))
            })
            .unwrap();
        let second = compiler
            .get_or_compile(key, || {
                builds.fetch_add(1, Ordering::SeqCst);
                Ok(constant(8))
            })
            .unwrap();

        assert!(first.ptr_eq(&second));
        assert_eq!(builds.load(Ordering::SeqCst), 1);
        let stats = compiler.stats();
        assert_eq!(stats.cache_hits, 1);
        assert_eq!(stats.cache_misses, 1);
        assert_eq!(stats.cached_routines, 1);
    }

    #[test]
    fn test_first_publication_wins() {
        let compiler = ActivationCompiler::new(true, true);
        let key = CompileKey::for_type(TypeKey::of::<i32>());
        let first = compiler.compile(&constant(1), key.clone());
        let second = compiler.compile(&constant(2), key);

        assert!(first.ptr_eq(&second));
        let scope = root_scope();
        let value = second.invoke(&scope, scope.disposal(), None).unwrap();
        assert_eq!(*value.downcast::<i32>().unwrap(), 1);
    }

    #[test]
    fn test_disabled_cache_never_publishes() {
        let compiler = ActivationCompiler::new(false, true);
        let key = CompileKey::for_type(TypeKey::of::<i32>());
        compiler.compile(&constant(1), key.clone());
        assert!(compiler.cached(&key).is_none());
        assert!(compiler.is_empty());
    }

    #[test]
    fn test_delegate_is_not_cached() {
        let compiler = ActivationCompiler::new(true, true);
        let key = CompileKey::labelled(TypeKey::of::<i32>(), "delegate");
        compiler.compile_delegate(&constant(3), key.clone());
        assert!(compiler.cached(&key).is_none());
        assert_eq!(compiler.stats().compiles, 1);
    }

    #[test]
    fn test_missing_slot_reports_argument() {
        let compiler = ActivationCompiler::new(true, true);
        let slot = SlotId::next();
        let routine = compiler.compile_delegate(
            &Fragment::ContextValue {
                slot,
                key: TypeKey::of::<String>(),
            },
            CompileKey::for_type(TypeKey::of::<String>()),
        );
        let scope = root_scope();

        let err = routine.invoke(&scope, scope.disposal(), None).unwrap_err();
        assert!(matches!(err, ActivationError::MissingArgument { slot: s, .. } if s == slot.value()));

        let mut context = InjectionContext::new();
        context.set_slot(slot, Arc::new("bound".to_string()));
        let value = routine.invoke(&scope, scope.disposal(), Some(&context)).unwrap();
        assert_eq!(*value.downcast::<String>().unwrap(), "bound");
    }

    #[test]
    fn test_invalidate_clears_cache() {
        let compiler = ActivationCompiler::new(true, true);
        compiler.compile(&constant(1), CompileKey::for_type(TypeKey::of::<i32>()));
        compiler.invalidate();
        assert!(compiler.is_empty());
        assert_eq!(compiler.stats().invalidations, 1);
    }

    #[test]
    fn test_invalidation_during_build_is_not_published() {
        let compiler = ActivationCompiler::new(true, true);
        let key = CompileKey::for_type(TypeKey::of::<i32>());

        let stale = compiler
            .get_or_compile(key.clone(), || {
                compiler.invalidate();
                Ok(constant(1))
            })
            .unwrap();
        assert!(compiler.cached(&key).is_none());
        assert_eq!(compiler.generation(), 1);

        let fresh = compiler.get_or_compile(key.clone(), || Ok(constant(2))).unwrap();
        assert!(!stale.ptr_eq(&fresh));
        assert!(compiler.cached(&key).unwrap().ptr_eq(&fresh));
    }

    #[test]
    fn test_invoke_on_closed_scope() {
        let container = ServiceContainer::new();
        let compiler = ActivationCompiler::new(true, true);
        let routine = compiler.compile(&constant(1), CompileKey::for_type(TypeKey::of::<i32>()));
        let scope = container.create_child_scope("closed").unwrap();
        scope.dispose().unwrap();
        let err = routine.invoke(&scope, scope.disposal(), None).unwrap_err();
        assert!(err.is_scope_closed());
    }
}
