//! 包装器策略
//!
//! 包装器类型（[`Func0`]..[`Func3`]、[`Lazy`]）不直接注册，而是由包装器策略
//! 根据请求描述符的结构化形状识别。策略在构建期为被包装类型创建内部请求，
//! 把调用参数登记为已知值（从调用上下文的参数槽读取），编译内部例程，
//! 最终产生 [`Fragment::Deferred`]。

mod func;
mod lazy;

pub use func::{Func0, Func1, Func2, Func3, FuncWrapperStrategy};
pub use lazy::{Lazy, LazyWrapperStrategy};

use std::fmt;
use std::sync::Arc;

use super::compiler::{CompileKey, CompiledRoutine, Frame};
use super::context::{ContextCreator, InjectionContext, SlotId};
use super::fragment::Fragment;
use super::request::{ActivationRequest, DisposalTarget, KnownValue, RequestKind};
use super::scope::{LifetimeScope, WeakScope};
use super::services::ActivationServices;
use super::types::{Instance, ShapeAdapter, TypeDescriptor, TypeKey};
use crate::errors::ActivationError;

/// 可由包装器策略产生的消费类型
pub trait Wrapper: Send + Sync + Sized + 'static {
    /// 带结构化形状的描述符
    fn descriptor() -> TypeDescriptor;

    /// 由延迟激活构造包装器实例
    fn from_activation(activation: DeferredActivation) -> Self;
}

/// 形状适配函数：按闭合包装器类型单态化
pub fn adapt<W: Wrapper>(activation: DeferredActivation) -> Instance {
    Arc::new(W::from_activation(activation))
}

/// 运行期的延迟激活
///
/// 持有内部例程、参数槽、发起作用域和根作用域的弱句柄以及包装时的上下文快照。
/// 每次调用都在上下文克隆上写入参数，互不干扰。发起作用域结束后，
/// 调用改在根作用域上运行。
#[derive(Clone)]
pub struct DeferredActivation {
    routine: CompiledRoutine,
    slots: Arc<[SlotId]>,
    scope: WeakScope,
    root: WeakScope,
    context: Option<InjectionContext>,
    creator: Arc<dyn ContextCreator>,
}

impl DeferredActivation {
    pub fn arity(&self) -> usize {
        self.slots.len()
    }

    /// 以给定参数调用内部例程
    pub fn invoke(&self, arguments: Vec<Instance>) -> Result<Instance, ActivationError> {
        if arguments.len() != self.slots.len() {
            return Err(ActivationError::TypeMismatch {
                expected: format!("{} argument(s)", self.slots.len()),
                context: format!(
                    "deferred call of '{}' with {} argument(s)",
                    self.routine.key(),
                    arguments.len()
                ),
            });
        }

        let scope = self.target_scope()?;

        let mut context = match &self.context {
            Some(captured) => captured.clone(),
            None => self.creator.create_context(Some(&scope)),
        };
        for (slot, argument) in self.slots.iter().zip(arguments) {
            context.set_slot(*slot, argument);
        }

        let frame = Frame {
            scope: &scope,
            disposal: scope.disposal(),
            context: Some(&context),
        };
        self.routine.run(&frame)
    }

    /// 发起作用域仍然打开时在其上运行，否则退回根作用域
    fn target_scope(&self) -> Result<LifetimeScope, ActivationError> {
        if let Some(scope) = self.scope.upgrade().filter(|scope| !scope.is_disposed()) {
            return Ok(scope);
        }
        let root = self
            .root
            .upgrade()
            .ok_or_else(|| ActivationError::ScopeClosed {
                scope: format!("root captured by deferred '{}'", self.routine.key()),
            })?;
        root.ensure_open()?;
        tracing::trace!(
            routine = %self.routine.key(),
            root = %root.name(),
            "Originating scope ended, deferred call runs on root"
        );
        Ok(root)
    }
}

impl fmt::Debug for DeferredActivation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredActivation")
            .field("routine", self.routine.key())
            .field("arity", &self.slots.len())
            .field("has_context", &self.context.is_some())
            .finish()
    }
}

/// 构建期产物：编译好的内部例程加上参数槽，激活时生成 [`DeferredActivation`]
pub struct DeferredFactory {
    requested: TypeKey,
    wrapped: TypeKey,
    slots: Arc<[SlotId]>,
    routine: CompiledRoutine,
    adapter: ShapeAdapter,
    creator: Arc<dyn ContextCreator>,
}

impl DeferredFactory {
    pub fn requested(&self) -> TypeKey {
        self.requested
    }

    pub fn wrapped(&self) -> TypeKey {
        self.wrapped
    }

    pub fn arity(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn activate(&self, frame: &Frame<'_>) -> Result<Instance, ActivationError> {
        let activation = DeferredActivation {
            routine: self.routine.clone(),
            slots: self.slots.clone(),
            scope: frame.scope.downgrade(),
            root: frame
                .scope
                .root()
                .map(|root| root.downgrade())
                .unwrap_or_else(|_| frame.scope.downgrade()),
            context: frame.context.cloned(),
            creator: self.creator.clone(),
        };
        Ok((self.adapter)(activation))
    }
}

/// 包装器策略共用的构建流程
///
/// 内部请求的释放目标固定为根作用域：延迟产生的对象可能比发起解析的
/// 作用域活得更久。
pub(crate) fn build_deferred(
    services: &ActivationServices,
    request: &ActivationRequest,
    strategy: &str,
    kind: RequestKind,
    arguments: &[TypeDescriptor],
    wrapped: &TypeDescriptor,
) -> Result<Fragment, ActivationError> {
    let descriptor = request.descriptor();
    let shape = descriptor
        .shape()
        .ok_or_else(|| ActivationError::TypeMismatch {
            expected: "generic wrapper shape".to_string(),
            context: format!("wrapper strategy '{}' for '{}'", strategy, descriptor.name()),
        })?;

    let inner = request.new_request(
        wrapped.clone(),
        strategy,
        Some(request.key()),
        kind,
        Some(format!("wrapped by {}", descriptor.name())),
        true,
    );
    inner.set_disposal_target(DisposalTarget::Root);

    let slots: Arc<[SlotId]> = arguments
        .iter()
        .map(|argument| {
            let slot = SlotId::next();
            inner.add_known_value(KnownValue::new(
                argument.key(),
                Fragment::ContextValue {
                    slot,
                    key: argument.key(),
                },
            ));
            slot
        })
        .collect();

    let fragment = services.builder().activation(services, &inner)?;
    let routine = services
        .compiler()
        .compile_delegate(&fragment, CompileKey::labelled(wrapped.key(), descriptor.name()));

    tracing::debug!(
        requested = descriptor.name(),
        wrapped = wrapped.name(),
        arity = slots.len(),
        "Deferred activation built"
    );

    Ok(Fragment::Deferred(Arc::new(DeferredFactory {
        requested: request.key(),
        wrapped: wrapped.key(),
        slots,
        routine,
        adapter: shape.adapter(),
        creator: services.context_creator().clone(),
    })))
}
