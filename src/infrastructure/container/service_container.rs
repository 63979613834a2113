//! 服务容器
//!
//! 激活管线的对外门面：注册导出、解析服务、创建子作用域以及释放。
//! 容器本身是轻量句柄，克隆后共享同一个根作用域。

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::compiler::CompileStats;
use super::context::{ContextCreator, InjectionContext};
use super::scope::{LifetimeScope, ScopeInfo};
use super::services::ActivationServices;
use super::strategy::{ExportBuilder, ExportStrategy, MissingExportProvider, WrapperStrategy};
use super::types::TypeKey;
use super::wrappers::Wrapper;
use crate::config::{ConfigLoader, ContainerConfig};
use crate::errors::{ActivationError, ConfigError, DisposalError};
use crate::logging;

#[derive(Clone)]
pub struct ServiceContainer {
    services: Arc<ActivationServices>,
    root: LifetimeScope,
    stats: Arc<InnerStats>,
}

/// 内部统计（原子计数器）
#[derive(Default)]
struct InnerStats {
    total_resolutions: AtomicUsize,
    failed_resolutions: AtomicUsize,
}

impl ServiceContainer {
    pub fn new() -> Self {
        Self::with_config(ContainerConfig::default())
    }

    pub fn with_config(config: ContainerConfig) -> Self {
        Self::from_services(ActivationServices::new(config))
    }

    /// 从用户配置文件和环境变量创建容器
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_loader(&ConfigLoader::new())
    }

    /// 按加载器读取配置；配置含 `[logging]` 段时同时安装日志订阅者
    pub fn from_loader(loader: &ConfigLoader) -> Result<Self, ConfigError> {
        let config = loader.load_config()?;
        if let Err(e) = logging::init_from_config(&config) {
            tracing::debug!(error = %e, "Global subscriber already installed, keeping it");
        }
        Ok(Self::with_config(config))
    }

    /// 使用自定义上下文创建者
    pub fn with_context_creator(config: ContainerConfig, creator: Arc<dyn ContextCreator>) -> Self {
        Self::from_services(ActivationServices::new(config).with_context_creator(creator))
    }

    fn from_services(services: ActivationServices) -> Self {
        let services = Arc::new(services);
        let root = LifetimeScope::new_root(services.config().root_scope_name.clone(), services.clone());
        Self {
            services,
            root,
            stats: Arc::new(InnerStats::default()),
        }
    }

    /// 注册导出策略；会使已编译的例程失效
    pub fn register(&self, export: ExportStrategy) {
        self.services.register(export);
    }

    /// 以构建器形式注册
    pub fn register_with<T, F>(&self, configure: F)
    where
        T: Send + Sync + 'static,
        F: FnOnce(ExportBuilder<T>) -> ExportStrategy,
    {
        self.register(configure(ExportStrategy::builder::<T>()));
    }

    /// 注册已有实例
    pub fn register_instance<T: Send + Sync + 'static>(&self, value: T) {
        self.register(ExportStrategy::instance(value));
    }

    /// 注册瞬态服务 - 便捷方法
    pub fn register_transient<T, F>(&self, factory: F)
    where
        F: Fn() -> T + Send + Sync + 'static,
        T: Send + Sync + 'static,
    {
        self.register(
            ExportStrategy::builder::<T>()
                .transient()
                .factory(move |_| Ok(factory())),
        );
    }

    /// 注册单例服务 - 便捷方法
    pub fn register_singleton<T, F>(&self, factory: F)
    where
        F: Fn() -> T + Send + Sync + 'static,
        T: Send + Sync + 'static,
    {
        self.register(
            ExportStrategy::builder::<T>()
                .singleton()
                .factory(move |_| Ok(factory())),
        );
    }

    pub fn add_wrapper_strategy(&self, wrapper: Arc<dyn WrapperStrategy>) {
        self.services.add_wrapper_strategy(wrapper);
    }

    pub fn add_missing_export_provider(&self, provider: Arc<dyn MissingExportProvider>) {
        self.services.add_missing_export_provider(provider);
    }

    pub fn is_registered<T: 'static>(&self) -> bool {
        self.services.registry().is_registered(TypeKey::of::<T>())
    }

    /// 在根作用域解析服务
    pub fn locate<T: Send + Sync + 'static>(&self) -> Result<Arc<T>, ActivationError> {
        self.record(self.root.locate::<T>())
    }

    /// 以调用方提供的上下文解析
    pub fn locate_with<T: Send + Sync + 'static>(
        &self,
        context: InjectionContext,
    ) -> Result<Arc<T>, ActivationError> {
        self.record(self.root.locate_with::<T>(context))
    }

    /// 解析包装器类型（`Func1<A, R>`、`Lazy<R>` 等）
    pub fn locate_wrapper<W: Wrapper>(&self) -> Result<Arc<W>, ActivationError> {
        self.record(self.root.locate_wrapper::<W>())
    }

    pub fn root_scope(&self) -> &LifetimeScope {
        &self.root
    }

    pub fn create_child_scope(&self, name: impl Into<String>) -> Result<LifetimeScope, ActivationError> {
        self.root.create_child_scope(name)
    }

    /// 在临时子作用域中执行 `work`，结束后释放该作用域
    ///
    /// `work` 的错误优先返回；其次是释放失败。
    pub fn in_scope<R, F>(&self, name: impl Into<String>, work: F) -> Result<R, ActivationError>
    where
        F: FnOnce(&LifetimeScope) -> Result<R, ActivationError>,
    {
        let scope = self.create_child_scope(name)?;
        let result = work(&scope);
        let disposed = scope.dispose();
        let value = result?;
        disposed?;
        Ok(value)
    }

    pub fn scope_info(&self) -> ScopeInfo {
        self.root.info()
    }

    /// 释放根作用域（连同所有子作用域）
    pub fn dispose(&self) -> Result<(), DisposalError> {
        self.root.dispose()
    }

    pub fn is_disposed(&self) -> bool {
        self.root.is_disposed()
    }

    pub fn services(&self) -> &Arc<ActivationServices> {
        &self.services
    }

    pub fn compile_stats(&self) -> CompileStats {
        self.services.compiler().stats()
    }

    /// 获取容器统计信息
    pub fn get_stats(&self) -> ContainerStats {
        ContainerStats {
            total_resolutions: self.stats.total_resolutions.load(Ordering::Relaxed),
            failed_resolutions: self.stats.failed_resolutions.load(Ordering::Relaxed),
            registered_exports: self.services.registry().export_count(),
            compile: self.compile_stats(),
        }
    }

    fn record<T>(&self, result: Result<T, ActivationError>) -> Result<T, ActivationError> {
        self.stats.total_resolutions.fetch_add(1, Ordering::Relaxed);
        if let Err(e) = &result {
            self.stats.failed_resolutions.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(error = %e, "Resolution failed");
        }
        result
    }
}

impl Default for ServiceContainer {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ServiceContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceContainer")
            .field("root", &self.root)
            .field("services", &self.services)
            .finish()
    }
}

/// 容器统计信息
#[derive(Debug, Clone)]
pub struct ContainerStats {
    pub total_resolutions: usize,
    pub failed_resolutions: usize,
    pub registered_exports: usize,
    pub compile: CompileStats,
}

impl ContainerStats {
    /// 编译缓存命中率
    pub fn hit_rate(&self) -> f64 {
        self.compile.hit_rate()
    }
}
