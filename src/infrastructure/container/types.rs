//! 类型描述
//!
//! 请求、导出和包装器策略都通过 [`TypeDescriptor`] 标识被解析的类型。
//! 泛型包装器（如多参数回调）在描述符上附带结构化形状 [`GenericShape`]，
//! 策略据此识别请求而不依赖运行时构造泛型类型。

use std::any::{Any, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use super::wrappers::DeferredActivation;
use crate::errors::ActivationError;

/// 类型擦除后的实例
pub type Instance = Arc<dyn Any + Send + Sync>;

/// 把延迟激活转换为具体包装器实例的适配函数（按闭合类型单态化）
pub type ShapeAdapter = fn(DeferredActivation) -> Instance;

/// 类型标识：`TypeId` 加上用于诊断的类型名
#[derive(Clone, Copy)]
pub struct TypeKey {
    id: TypeId,
    name: &'static str,
}

impl TypeKey {
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    pub fn id(&self) -> TypeId {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for TypeKey {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeKey {}

impl Hash for TypeKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

impl fmt::Display for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// 泛型定义的结构化能力描述
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GenericDefinition {
    /// 接受 `arity` 个调用参数并返回结果的回调
    Func { arity: usize },
    /// 首次访问时才构造的值
    Lazy,
}

/// 闭合泛型实例的形状：定义、类型参数和适配函数
#[derive(Clone)]
pub struct GenericShape {
    definition: GenericDefinition,
    arguments: Vec<TypeDescriptor>,
    adapter: ShapeAdapter,
}

impl GenericShape {
    pub fn definition(&self) -> GenericDefinition {
        self.definition
    }

    pub fn arguments(&self) -> &[TypeDescriptor] {
        &self.arguments
    }

    pub fn adapter(&self) -> ShapeAdapter {
        self.adapter
    }
}

impl fmt::Debug for GenericShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GenericShape")
            .field("definition", &self.definition)
            .field("arguments", &self.arguments)
            .finish()
    }
}

/// 被请求类型的完整描述
#[derive(Clone, Debug)]
pub struct TypeDescriptor {
    key: TypeKey,
    shape: Option<Arc<GenericShape>>,
}

impl TypeDescriptor {
    /// 普通类型（无泛型形状）
    pub fn of<T: Send + Sync + 'static>() -> Self {
        Self {
            key: TypeKey::of::<T>(),
            shape: None,
        }
    }

    /// 带结构化形状的闭合泛型类型
    pub fn shaped<T: Send + Sync + 'static>(
        definition: GenericDefinition,
        arguments: Vec<TypeDescriptor>,
        adapter: ShapeAdapter,
    ) -> Self {
        Self {
            key: TypeKey::of::<T>(),
            shape: Some(Arc::new(GenericShape {
                definition,
                arguments,
                adapter,
            })),
        }
    }

    pub fn key(&self) -> TypeKey {
        self.key
    }

    pub fn name(&self) -> &'static str {
        self.key.name()
    }

    pub fn shape(&self) -> Option<&GenericShape> {
        self.shape.as_deref()
    }

    pub fn is_generic(&self) -> bool {
        self.shape.is_some()
    }
}

impl PartialEq for TypeDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for TypeDescriptor {}

/// 将类型擦除实例安全地转换回具体类型
pub fn downcast_instance<T: Send + Sync + 'static>(
    instance: Instance,
    context: &str,
) -> Result<Arc<T>, ActivationError> {
    instance
        .downcast::<T>()
        .map_err(|_| ActivationError::TypeMismatch {
            expected: std::any::type_name::<T>().to_string(),
            context: context.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_key_equality_ignores_name() {
        let a = TypeKey::of::<String>();
        let b = TypeKey::of::<String>();
        assert_eq!(a, b);
        assert_ne!(a, TypeKey::of::<i32>());
        assert!(a.name().contains("String"));
    }

    #[test]
    fn test_plain_descriptor_has_no_shape() {
        let descriptor = TypeDescriptor::of::<u8>();
        assert!(!descriptor.is_generic());
        assert!(descriptor.shape().is_none());
    }

    #[test]
    fn test_downcast_instance_mismatch() {
        let instance: Instance = Arc::new(5_i32);
        let err = downcast_instance::<String>(instance, "unit test").unwrap_err();
        assert!(matches!(err, ActivationError::TypeMismatch { .. }));

        let instance: Instance = Arc::new(5_i32);
        assert_eq!(*downcast_instance::<i32>(instance, "unit test").unwrap(), 5);
    }
}
