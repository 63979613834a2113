//! 激活策略与策略注册表
//!
//! 分派优先级：精确类型导出 → 包装器策略 → 缺失导出提供者。
//! 包装器只在没有直接导出匹配时参与；包装器对无法识别的形状返回 `None`，
//! 这是路由信号而不是错误。

use dashmap::DashMap;
use parking_lot::RwLock;
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::context::InjectionContext;
use super::fragment::Fragment;
use super::request::{ActivationRequest, RequestKind};
use super::scope::Disposable;
use super::services::ActivationServices;
use super::types::{downcast_instance, GenericDefinition, Instance, TypeDescriptor, TypeKey};
use super::wrappers::Wrapper;
use super::ServiceLifetime;
use crate::errors::ActivationError;

static NEXT_EXPORT: AtomicU64 = AtomicU64::new(1);

/// 导出标识，作用域实例存储以此为键
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExportId(u64);

impl ExportId {
    pub fn next() -> Self {
        ExportId(NEXT_EXPORT.fetch_add(1, Ordering::Relaxed))
    }
}

/// 工厂可见的已解析依赖
pub struct Dependencies<'a> {
    values: &'a [Instance],
    descriptors: &'a [TypeDescriptor],
    context: Option<&'a InjectionContext>,
}

impl<'a> Dependencies<'a> {
    pub(crate) fn new(
        values: &'a [Instance],
        descriptors: &'a [TypeDescriptor],
        context: Option<&'a InjectionContext>,
    ) -> Self {
        Self {
            values,
            descriptors,
            context,
        }
    }

    /// 按声明顺序取第 `index` 个依赖
    pub fn get<T: Send + Sync + 'static>(&self, index: usize) -> Result<Arc<T>, ActivationError> {
        let instance = self
            .values
            .get(index)
            .cloned()
            .ok_or_else(|| ActivationError::TypeMismatch {
                expected: std::any::type_name::<T>().to_string(),
                context: format!("dependency #{} (only {} declared)", index, self.values.len()),
            })?;
        downcast_instance::<T>(instance, &format!("dependency #{}", index))
    }

    pub fn descriptor(&self, index: usize) -> Option<&TypeDescriptor> {
        self.descriptors.get(index)
    }

    /// 调用上下文（可读取按名称存放的附加数据）
    pub fn context(&self) -> Option<&InjectionContext> {
        self.context
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

type ExportFactory = dyn Fn(&Dependencies<'_>) -> anyhow::Result<Instance> + Send + Sync;
type DisposableCast = fn(&Instance) -> Option<Arc<dyn Disposable>>;

struct ExportDefinition {
    id: ExportId,
    descriptor: TypeDescriptor,
    dependencies: Vec<TypeDescriptor>,
    lifetime: ServiceLifetime,
    factory: Option<Arc<ExportFactory>>,
    constant: Option<Instance>,
    disposable: Option<DisposableCast>,
}

/// 普通导出策略
#[derive(Clone)]
pub struct ExportStrategy {
    definition: Arc<ExportDefinition>,
}

impl ExportStrategy {
    pub fn builder<T: Send + Sync + 'static>() -> ExportBuilder<T> {
        ExportBuilder::new()
    }

    /// 导出已有实例（外部拥有，不登记释放）
    pub fn instance<T: Send + Sync + 'static>(value: T) -> Self {
        Self {
            definition: Arc::new(ExportDefinition {
                id: ExportId::next(),
                descriptor: TypeDescriptor::of::<T>(),
                dependencies: Vec::new(),
                lifetime: ServiceLifetime::Singleton,
                factory: None,
                constant: Some(Arc::new(value)),
                disposable: None,
            }),
        }
    }

    pub fn id(&self) -> ExportId {
        self.definition.id
    }

    pub fn key(&self) -> TypeKey {
        self.definition.descriptor.key()
    }

    pub fn descriptor(&self) -> &TypeDescriptor {
        &self.definition.descriptor
    }

    pub fn dependencies(&self) -> &[TypeDescriptor] {
        &self.definition.dependencies
    }

    pub fn lifetime(&self) -> ServiceLifetime {
        self.definition.lifetime
    }

    pub(crate) fn create(
        &self,
        values: &[Instance],
        context: Option<&InjectionContext>,
    ) -> Result<Instance, ActivationError> {
        let factory = match &self.definition.factory {
            Some(factory) => factory,
            None => {
                return self
                    .definition
                    .constant
                    .clone()
                    .ok_or_else(|| ActivationError::CreationFailed {
                        service: self.key().name().to_string(),
                        source: "export has neither factory nor instance".into(),
                    })
            }
        };
        let dependencies = Dependencies::new(values, &self.definition.dependencies, context);
        factory(&dependencies).map_err(|e| ActivationError::CreationFailed {
            service: self.key().name().to_string(),
            source: e.into(),
        })
    }

    pub(crate) fn as_disposable(&self, instance: &Instance) -> Option<Arc<dyn Disposable>> {
        self.definition.disposable.and_then(|cast| cast(instance))
    }
}

impl fmt::Debug for ExportStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExportStrategy")
            .field("type", &self.key())
            .field("lifetime", &self.lifetime())
            .field("dependencies", &self.definition.dependencies)
            .finish()
    }
}

impl ActivationStrategy for ExportStrategy {
    fn name(&self) -> &str {
        self.key().name()
    }

    fn activation(
        &self,
        services: &ActivationServices,
        request: &ActivationRequest,
    ) -> Result<Fragment, ActivationError> {
        if let Some(value) = &self.definition.constant {
            return Ok(Fragment::Constant {
                key: self.key(),
                value: value.clone(),
            });
        }

        let mut dependencies = Vec::with_capacity(self.definition.dependencies.len());
        for (index, descriptor) in self.definition.dependencies.iter().enumerate() {
            let child = request.new_request(
                descriptor.clone(),
                self.name(),
                Some(self.key()),
                RequestKind::Dependency,
                Some(format!("dependency #{}", index)),
                false,
            );
            dependencies.push(services.builder().activation(services, &child)?);
        }

        Ok(Fragment::Lifetime {
            lifetime: self.lifetime(),
            export: self.clone(),
            disposal: request.disposal_target(),
            inner: Box::new(Fragment::Construct {
                export: self.clone(),
                dependencies,
            }),
        })
    }
}

fn cast_disposable<T: Disposable + Send + Sync + 'static>(
    instance: &Instance,
) -> Option<Arc<dyn Disposable>> {
    instance
        .clone()
        .downcast::<T>()
        .ok()
        .map(|typed| typed as Arc<dyn Disposable>)
}

/// 导出构建器
pub struct ExportBuilder<T> {
    dependencies: Vec<TypeDescriptor>,
    lifetime: ServiceLifetime,
    disposable: Option<DisposableCast>,
    _phantom: PhantomData<fn() -> T>,
}

impl<T: Send + Sync + 'static> ExportBuilder<T> {
    pub fn new() -> Self {
        Self {
            dependencies: Vec::new(),
            lifetime: ServiceLifetime::Transient,
            disposable: None,
            _phantom: PhantomData,
        }
    }

    pub fn depends_on<D: Send + Sync + 'static>(mut self) -> Self {
        self.dependencies.push(TypeDescriptor::of::<D>());
        self
    }

    /// 依赖一个包装器类型（如 `Func2<A, B, R>`、`Lazy<R>`）
    pub fn depends_on_wrapper<W: Wrapper>(mut self) -> Self {
        self.dependencies.push(W::descriptor());
        self
    }

    pub fn lifetime(mut self, lifetime: ServiceLifetime) -> Self {
        self.lifetime = lifetime;
        self
    }

    pub fn singleton(self) -> Self {
        self.lifetime(ServiceLifetime::Singleton)
    }

    pub fn scoped(self) -> Self {
        self.lifetime(ServiceLifetime::Scoped)
    }

    pub fn transient(self) -> Self {
        self.lifetime(ServiceLifetime::Transient)
    }

    /// 构造出的实例需要登记释放
    pub fn disposable(mut self) -> Self
    where
        T: Disposable,
    {
        self.disposable = Some(cast_disposable::<T>);
        self
    }

    pub fn factory<F>(self, factory: F) -> ExportStrategy
    where
        F: Fn(&Dependencies<'_>) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        let erased = move |dependencies: &Dependencies<'_>| -> anyhow::Result<Instance> {
            let value = factory(dependencies)?;
            Ok(Arc::new(value) as Instance)
        };
        ExportStrategy {
            definition: Arc::new(ExportDefinition {
                id: ExportId::next(),
                descriptor: TypeDescriptor::of::<T>(),
                dependencies: self.dependencies,
                lifetime: self.lifetime,
                factory: Some(Arc::new(erased)),
                constant: None,
                disposable: self.disposable,
            }),
        }
    }
}

impl<T: Send + Sync + 'static> Default for ExportBuilder<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// 激活策略：把请求转换为执行片段
pub trait ActivationStrategy: Send + Sync {
    fn name(&self) -> &str;

    fn activation(
        &self,
        services: &ActivationServices,
        request: &ActivationRequest,
    ) -> Result<Fragment, ActivationError>;
}

/// 识别泛型消费形状并委托给被包装类型的策略
pub trait WrapperStrategy: ActivationStrategy {
    fn definition(&self) -> GenericDefinition;

    /// 被包装类型；形状不匹配时返回 `None`
    fn wrapped_type(&self, requested: &TypeDescriptor) -> Option<TypeDescriptor>;
}

/// 没有任何导出或包装器匹配时的兜底提供者
pub trait MissingExportProvider: Send + Sync {
    fn provide(&self, request: &ActivationRequest) -> Option<ExportStrategy>;
}

/// 注册表分派的候选策略
pub enum Candidate {
    Export(ExportStrategy),
    Wrapper(Arc<dyn WrapperStrategy>),
}

impl Candidate {
    pub fn name(&self) -> &str {
        match self {
            Candidate::Export(export) => export.name(),
            Candidate::Wrapper(wrapper) => wrapper.name(),
        }
    }

    pub fn activation(
        &self,
        services: &ActivationServices,
        request: &ActivationRequest,
    ) -> Result<Fragment, ActivationError> {
        match self {
            Candidate::Export(export) => export.activation(services, request),
            Candidate::Wrapper(wrapper) => wrapper.activation(services, request),
        }
    }
}

#[derive(Default)]
pub struct StrategyRegistry {
    exports: DashMap<TypeKey, Vec<ExportStrategy>>,
    wrappers: RwLock<Vec<Arc<dyn WrapperStrategy>>>,
    missing: RwLock<Vec<Arc<dyn MissingExportProvider>>>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, export: ExportStrategy) {
        tracing::debug!(
            export = export.key().name(),
            lifetime = ?export.lifetime(),
            "Export registered"
        );
        self.exports.entry(export.key()).or_default().push(export);
    }

    pub fn register_wrapper(&self, wrapper: Arc<dyn WrapperStrategy>) {
        tracing::debug!(wrapper = wrapper.name(), "Wrapper strategy registered");
        self.wrappers.write().push(wrapper);
    }

    pub fn add_missing_export_provider(&self, provider: Arc<dyn MissingExportProvider>) {
        self.missing.write().push(provider);
    }

    /// 最后注册的导出优先
    pub fn export_for(&self, key: TypeKey) -> Option<ExportStrategy> {
        self.exports
            .get(&key)
            .and_then(|exports| exports.last().cloned())
    }

    pub fn exports_for(&self, key: TypeKey) -> Vec<ExportStrategy> {
        self.exports
            .get(&key)
            .map(|exports| exports.value().clone())
            .unwrap_or_default()
    }

    pub fn is_registered(&self, key: TypeKey) -> bool {
        self.exports.contains_key(&key)
    }

    pub fn registered_types(&self) -> Vec<TypeKey> {
        self.exports.iter().map(|entry| *entry.key()).collect()
    }

    pub fn export_count(&self) -> usize {
        self.exports.iter().map(|entry| entry.value().len()).sum()
    }

    /// 按优先级为请求挑选策略
    pub fn find(&self, request: &ActivationRequest) -> Option<Candidate> {
        let key = request.key();
        if let Some(export) = self.export_for(key) {
            return Some(Candidate::Export(export));
        }

        let descriptor = request.descriptor();
        if descriptor.is_generic() {
            let wrappers = self.wrappers.read();
            if let Some(wrapper) = wrappers
                .iter()
                .find(|wrapper| wrapper.wrapped_type(descriptor).is_some())
            {
                return Some(Candidate::Wrapper(wrapper.clone()));
            }
        }

        let providers = self.missing.read().clone();
        for provider in providers {
            if let Some(export) = provider.provide(request) {
                tracing::debug!(export = export.key().name(), "Missing export provided");
                if export.key() != key {
                    tracing::warn!(
                        requested = key.name(),
                        provided = export.key().name(),
                        "Missing export provider returned a different type, ignoring"
                    );
                    continue;
                }
                self.register(export.clone());
                return Some(Candidate::Export(export));
            }
        }

        None
    }
}

impl fmt::Debug for StrategyRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StrategyRegistry")
            .field("exports", &self.export_count())
            .field("wrappers", &self.wrappers.read().len())
            .field("missing_providers", &self.missing.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::container::wrappers::Func1;

    struct Greeter {
        greeting: String,
    }

    struct Echo;

    impl MissingExportProvider for Echo {
        fn provide(&self, request: &ActivationRequest) -> Option<ExportStrategy> {
            if request.key() == TypeKey::of::<Greeter>() {
                Some(ExportStrategy::builder::<Greeter>().factory(|_| {
                    Ok(Greeter {
                        greeting: "provided".to_string(),
                    })
                }))
            } else {
                None
            }
        }
    }

    fn greeter(text: &'static str) -> ExportStrategy {
        ExportStrategy::builder::<Greeter>().factory(move |_| {
            Ok(Greeter {
                greeting: text.to_string(),
            })
        })
    }

    #[test]
    fn test_last_registered_export_wins() {
        let registry = StrategyRegistry::new();
        registry.register(greeter("first"));
        registry.register(greeter("second"));

        let export = registry.export_for(TypeKey::of::<Greeter>()).unwrap();
        let value = export.create(&[], None).unwrap();
        assert_eq!(value.downcast::<Greeter>().unwrap().greeting, "second");
        assert_eq!(registry.exports_for(TypeKey::of::<Greeter>()).len(), 2);
        assert_eq!(registry.export_count(), 2);
    }

    #[test]
    fn test_missing_provider_is_last_resort() {
        let registry = StrategyRegistry::new();
        registry.add_missing_export_provider(Arc::new(Echo));

        let request = ActivationRequest::root(TypeDescriptor::of::<Greeter>());
        let candidate = registry.find(&request).unwrap();
        assert!(matches!(candidate, Candidate::Export(_)));
        assert!(registry.is_registered(TypeKey::of::<Greeter>()));

        let unknown = ActivationRequest::root(TypeDescriptor::of::<u64>());
        assert!(registry.find(&unknown).is_none());
    }

    #[test]
    fn test_exact_export_beats_wrapper() {
        let services = ActivationServices::new(crate::config::ContainerConfig::default());
        let descriptor = <Func1<i32, Greeter> as Wrapper>::descriptor();
        let request = ActivationRequest::root(descriptor.clone());

        assert!(matches!(
            services.registry().find(&request),
            Some(Candidate::Wrapper(_))
        ));

        services
            .registry()
            .register(ExportStrategy::instance::<u32>(3));
        let plain = ActivationRequest::root(TypeDescriptor::of::<u32>());
        assert!(matches!(
            services.registry().find(&plain),
            Some(Candidate::Export(_))
        ));
    }

    #[test]
    fn test_factory_error_becomes_creation_failed() {
        let export = ExportStrategy::builder::<Greeter>().factory(|_| anyhow::bail!("no greeting"));
        let err = export.create(&[], None).unwrap_err();
        assert!(matches!(err, ActivationError::CreationFailed { .. }));
        assert!(err.to_string().contains("no greeting"));
    }

    #[test]
    fn test_dependencies_index_out_of_range() {
        let values: Vec<Instance> = vec![Arc::new(1_i32)];
        let descriptors = vec![TypeDescriptor::of::<i32>()];
        let deps = Dependencies::new(&values, &descriptors, None);
        assert_eq!(*deps.get::<i32>(0).unwrap(), 1);
        assert!(deps.get::<i32>(1).is_err());
        assert!(deps.get::<String>(0).is_err());
        assert_eq!(deps.len(), 1);
    }
}
