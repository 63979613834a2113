//! 激活服务集合
//!
//! 注册表、表达式构建器、编译器和上下文创建者的聚合，由根作用域及其所有
//! 子作用域共享。

use std::fmt;
use std::sync::Arc;

use super::builder::ExpressionBuilder;
use super::compiler::{ActivationCompiler, CompileKey, CompiledRoutine};
use super::context::{ContextCreator, DefaultContextCreator};
use super::request::ActivationRequest;
use super::strategy::{ExportStrategy, MissingExportProvider, StrategyRegistry, WrapperStrategy};
use super::types::TypeDescriptor;
use super::wrappers::{FuncWrapperStrategy, LazyWrapperStrategy};
use crate::config::ContainerConfig;
use crate::errors::ActivationError;

/// 默认注册的回调元数
const DEFAULT_FUNC_ARITIES: [usize; 4] = [0, 1, 2, 3];

pub struct ActivationServices {
    config: ContainerConfig,
    registry: StrategyRegistry,
    builder: ExpressionBuilder,
    compiler: ActivationCompiler,
    context_creator: Arc<dyn ContextCreator>,
}

impl ActivationServices {
    pub fn new(config: ContainerConfig) -> Self {
        let registry = StrategyRegistry::new();
        for arity in DEFAULT_FUNC_ARITIES {
            registry.register_wrapper(Arc::new(FuncWrapperStrategy::new(arity)));
        }
        registry.register_wrapper(Arc::new(LazyWrapperStrategy));

        Self {
            builder: ExpressionBuilder::new(config.max_resolution_depth),
            compiler: ActivationCompiler::new(
                config.compile_cache_enabled,
                config.track_disposable_transients,
            ),
            registry,
            config,
            context_creator: Arc::new(DefaultContextCreator),
        }
    }

    /// 替换上下文创建者
    pub fn with_context_creator(mut self, creator: Arc<dyn ContextCreator>) -> Self {
        self.context_creator = creator;
        self
    }

    pub fn config(&self) -> &ContainerConfig {
        &self.config
    }

    pub fn registry(&self) -> &StrategyRegistry {
        &self.registry
    }

    pub fn builder(&self) -> &ExpressionBuilder {
        &self.builder
    }

    pub fn compiler(&self) -> &ActivationCompiler {
        &self.compiler
    }

    pub fn context_creator(&self) -> &Arc<dyn ContextCreator> {
        &self.context_creator
    }

    pub fn register(&self, export: ExportStrategy) {
        self.registry.register(export);
        self.compiler.invalidate();
    }

    pub fn add_wrapper_strategy(&self, wrapper: Arc<dyn WrapperStrategy>) {
        self.registry.register_wrapper(wrapper);
        self.compiler.invalidate();
    }

    pub fn add_missing_export_provider(&self, provider: Arc<dyn MissingExportProvider>) {
        self.registry.add_missing_export_provider(provider);
        self.compiler.invalidate();
    }

    /// 顶层请求的执行例程，命中缓存时不重新构建
    pub fn routine_for(&self, descriptor: &TypeDescriptor) -> Result<CompiledRoutine, ActivationError> {
        self.compiler
            .get_or_compile(CompileKey::for_type(descriptor.key()), || {
                let request = ActivationRequest::root(descriptor.clone());
                self.builder.activation(self, &request)
            })
    }
}

impl fmt::Debug for ActivationServices {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActivationServices")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .field("compiler", &self.compiler)
            .finish()
    }
}
