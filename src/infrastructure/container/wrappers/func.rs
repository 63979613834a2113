use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use super::{adapt, build_deferred, DeferredActivation, Wrapper};
use crate::errors::ActivationError;
use crate::infrastructure::container::fragment::Fragment;
use crate::infrastructure::container::request::{ActivationRequest, RequestKind};
use crate::infrastructure::container::services::ActivationServices;
use crate::infrastructure::container::strategy::{ActivationStrategy, WrapperStrategy};
use crate::infrastructure::container::types::{
    downcast_instance, GenericDefinition, Instance, TypeDescriptor,
};

macro_rules! define_func {
    ($(#[$doc:meta])* $name:ident, $arity:expr, ($($arg:ident: $ty:ident),*)) => {
        $(#[$doc])*
        pub struct $name<$($ty,)* R> {
            activation: DeferredActivation,
            _marker: PhantomData<fn($($ty),*) -> R>,
        }

        impl<$($ty,)* R> $name<$($ty,)* R>
        where
            $($ty: Send + Sync + 'static,)*
            R: Send + Sync + 'static,
        {
            /// 以给定参数构造一个新的 `R`
            pub fn call(&self, $($arg: $ty),*) -> Result<Arc<R>, ActivationError> {
                let arguments: Vec<Instance> = vec![$(Arc::new($arg) as Instance),*];
                let instance = self.activation.invoke(arguments)?;
                downcast_instance::<R>(instance, stringify!($name))
            }
        }

        impl<$($ty,)* R> Clone for $name<$($ty,)* R> {
            fn clone(&self) -> Self {
                Self {
                    activation: self.activation.clone(),
                    _marker: PhantomData,
                }
            }
        }

        impl<$($ty,)* R> fmt::Debug for $name<$($ty,)* R> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_struct(stringify!($name))
                    .field("activation", &self.activation)
                    .finish()
            }
        }

        impl<$($ty,)* R> Wrapper for $name<$($ty,)* R>
        where
            $($ty: Send + Sync + 'static,)*
            R: Send + Sync + 'static,
        {
            fn descriptor() -> TypeDescriptor {
                TypeDescriptor::shaped::<Self>(
                    GenericDefinition::Func { arity: $arity },
                    vec![$(TypeDescriptor::of::<$ty>(),)* TypeDescriptor::of::<R>()],
                    adapt::<Self>,
                )
            }

            fn from_activation(activation: DeferredActivation) -> Self {
                Self {
                    activation,
                    _marker: PhantomData,
                }
            }
        }
    };
}

define_func!(
    /// 无参数的延迟构造回调
    Func0, 0, ()
);
define_func!(
    /// 接受一个调用参数的延迟构造回调
    Func1, 1, (a: A)
);
define_func!(
    /// 接受两个调用参数的延迟构造回调
    Func2, 2, (a: A, b: B)
);
define_func!(
    /// 接受三个调用参数的延迟构造回调
    ///
    /// 每次 `call` 都会把三个参数写入上下文克隆的参数槽，内部例程
    /// 通过已知值读取它们，其余依赖照常从容器解析。
    Func3, 3, (a: A, b: B, c: C)
);

/// 多参数回调包装器策略，每个元数一个实例
#[derive(Debug, Clone)]
pub struct FuncWrapperStrategy {
    arity: usize,
    name: String,
}

impl FuncWrapperStrategy {
    pub fn new(arity: usize) -> Self {
        Self {
            arity,
            name: format!("Func{}", arity),
        }
    }

    pub fn arity(&self) -> usize {
        self.arity
    }
}

impl ActivationStrategy for FuncWrapperStrategy {
    fn name(&self) -> &str {
        &self.name
    }

    fn activation(
        &self,
        services: &ActivationServices,
        request: &ActivationRequest,
    ) -> Result<Fragment, ActivationError> {
        let descriptor = request.descriptor();
        let wrapped = self
            .wrapped_type(descriptor)
            .ok_or_else(|| ActivationError::TypeMismatch {
                expected: format!("Func shape with {} argument(s)", self.arity),
                context: descriptor.name().to_string(),
            })?;
        let arguments = match descriptor.shape() {
            Some(shape) => &shape.arguments()[..self.arity],
            None => &[],
        };

        build_deferred(
            services,
            request,
            &self.name,
            RequestKind::Other,
            arguments,
            &wrapped,
        )
    }
}

impl WrapperStrategy for FuncWrapperStrategy {
    fn definition(&self) -> GenericDefinition {
        GenericDefinition::Func { arity: self.arity }
    }

    fn wrapped_type(&self, requested: &TypeDescriptor) -> Option<TypeDescriptor> {
        let shape = requested.shape()?;
        if shape.definition() != self.definition() || shape.arguments().len() != self.arity + 1 {
            return None;
        }
        shape.arguments().last().cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::container::types::TypeKey;

    struct Report;

    #[test]
    fn test_wrapped_type_matches_own_arity_only() {
        let strategy = FuncWrapperStrategy::new(2);
        let two = <Func2<i32, String, Report> as Wrapper>::descriptor();
        let one = <Func1<i32, Report> as Wrapper>::descriptor();

        let wrapped = strategy.wrapped_type(&two).unwrap();
        assert_eq!(wrapped.key(), TypeKey::of::<Report>());
        assert!(strategy.wrapped_type(&one).is_none());
        assert!(strategy
            .wrapped_type(&TypeDescriptor::of::<Report>())
            .is_none());
    }

    #[test]
    fn test_descriptor_shape() {
        let descriptor = <Func3<u8, u16, u32, Report> as Wrapper>::descriptor();
        let shape = descriptor.shape().unwrap();
        assert_eq!(shape.definition(), GenericDefinition::Func { arity: 3 });
        assert_eq!(shape.arguments().len(), 4);
        assert_eq!(shape.arguments()[1].key(), TypeKey::of::<u16>());
        assert_eq!(FuncWrapperStrategy::new(3).name(), "Func3");
    }
}
