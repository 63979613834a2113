//! Activation container
//!
//! Requests are turned into execution fragments by strategies, fragments are
//! compiled once into routines, and routines run against lifetime scopes.

pub mod builder;
pub mod compiler;
pub mod context;
pub mod fragment;
pub mod request;
pub mod scope;
pub mod service_container;
pub mod services;
pub mod strategy;
pub mod types;
pub mod wrappers;

pub use builder::ExpressionBuilder;
pub use compiler::{ActivationCompiler, CompileKey, CompileStats, CompiledRoutine};
pub use context::{ContextCreator, DefaultContextCreator, ExtraDataKey, InjectionContext, SlotId};
pub use fragment::Fragment;
pub use request::{ActivationRequest, DisposalTarget, KnownValue, RequestKind};
pub use scope::{Disposable, DisposalScope, LifetimeScope, ScopeInfo, ScopeState};
pub use service_container::{ContainerStats, ServiceContainer};
pub use services::ActivationServices;
pub use strategy::{
    ActivationStrategy, Dependencies, ExportBuilder, ExportId, ExportStrategy,
    MissingExportProvider, StrategyRegistry, WrapperStrategy,
};
pub use types::{GenericDefinition, Instance, TypeDescriptor, TypeKey};
pub use wrappers::{
    DeferredActivation, Func0, Func1, Func2, Func3, FuncWrapperStrategy, Lazy,
    LazyWrapperStrategy, Wrapper,
};

// Lifecycle enum kept at container module level so every stage can reference it via `super::ServiceLifetime`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ServiceLifetime {
    /// Single instance for the entire root scope
    Singleton,
    /// New instance per resolve
    #[default]
    Transient,
    /// One instance per lifetime scope
    Scoped,
}
