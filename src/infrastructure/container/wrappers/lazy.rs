use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

use super::{adapt, build_deferred, DeferredActivation, Wrapper};
use crate::errors::ActivationError;
use crate::infrastructure::container::fragment::Fragment;
use crate::infrastructure::container::request::{ActivationRequest, RequestKind};
use crate::infrastructure::container::services::ActivationServices;
use crate::infrastructure::container::strategy::{ActivationStrategy, WrapperStrategy};
use crate::infrastructure::container::types::{downcast_instance, GenericDefinition, TypeDescriptor};

/// 首次访问时才构造的值
///
/// 构造成功后结果被缓存，之后的 `get` 返回同一实例；构造失败不缓存，
/// 下次访问会重试。
pub struct Lazy<R> {
    activation: DeferredActivation,
    value: Mutex<Option<Arc<R>>>,
}

impl<R: Send + Sync + 'static> Lazy<R> {
    pub fn get(&self) -> Result<Arc<R>, ActivationError> {
        let mut value = self.value.lock();
        if let Some(existing) = value.as_ref() {
            return Ok(existing.clone());
        }
        let instance = self.activation.invoke(Vec::new())?;
        let created = downcast_instance::<R>(instance, "Lazy")?;
        *value = Some(created.clone());
        Ok(created)
    }

    pub fn is_created(&self) -> bool {
        self.value.lock().is_some()
    }
}

impl<R> fmt::Debug for Lazy<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lazy")
            .field("activation", &self.activation)
            .field("created", &self.value.lock().is_some())
            .finish()
    }
}

impl<R: Send + Sync + 'static> Wrapper for Lazy<R> {
    fn descriptor() -> TypeDescriptor {
        TypeDescriptor::shaped::<Self>(
            GenericDefinition::Lazy,
            vec![TypeDescriptor::of::<R>()],
            adapt::<Self>,
        )
    }

    fn from_activation(activation: DeferredActivation) -> Self {
        Self {
            activation,
            value: Mutex::new(None),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LazyWrapperStrategy;

impl ActivationStrategy for LazyWrapperStrategy {
    fn name(&self) -> &str {
        "Lazy"
    }

    fn activation(
        &self,
        services: &ActivationServices,
        request: &ActivationRequest,
    ) -> Result<Fragment, ActivationError> {
        let wrapped = self
            .wrapped_type(request.descriptor())
            .ok_or_else(|| ActivationError::TypeMismatch {
                expected: "Lazy shape".to_string(),
                context: request.descriptor().name().to_string(),
            })?;
        build_deferred(
            services,
            request,
            self.name(),
            RequestKind::Other,
            &[],
            &wrapped,
        )
    }
}

impl WrapperStrategy for LazyWrapperStrategy {
    fn definition(&self) -> GenericDefinition {
        GenericDefinition::Lazy
    }

    fn wrapped_type(&self, requested: &TypeDescriptor) -> Option<TypeDescriptor> {
        let shape = requested.shape()?;
        match (shape.definition(), shape.arguments()) {
            (GenericDefinition::Lazy, [wrapped]) => Some(wrapped.clone()),
            _ => None,
        }
    }
}
