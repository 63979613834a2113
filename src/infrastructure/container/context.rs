//! 注入上下文
//!
//! 每次端到端解析（或每次延迟回调调用）持有一个 [`InjectionContext`]，
//! 其中保存按名称或按参数槽存放的附加数据，以及发起解析的作用域句柄。
//! 上下文通过克隆隔离：克隆体与源对象不共享任何可变存储。

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::scope::{LifetimeScope, WeakScope};
use super::types::Instance;

static NEXT_SLOT: AtomicU64 = AtomicU64::new(1);

/// 延迟回调参数槽标识，进程内唯一
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotId(u64);

impl SlotId {
    pub fn next() -> Self {
        SlotId(NEXT_SLOT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ExtraDataKey {
    Named(String),
    Slot(SlotId),
}

/// 单次解析调用的附加数据包
#[derive(Clone, Default)]
pub struct InjectionContext {
    extra_data: HashMap<ExtraDataKey, Instance>,
    scope: Option<WeakScope>,
}

impl InjectionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_scope(scope: &LifetimeScope) -> Self {
        Self {
            extra_data: HashMap::new(),
            scope: Some(scope.downgrade()),
        }
    }

    /// 发起解析的作用域；作用域已被释放时返回 `None`
    pub fn scope(&self) -> Option<LifetimeScope> {
        self.scope.as_ref().and_then(WeakScope::upgrade)
    }

    pub fn set_scope(&mut self, scope: &LifetimeScope) {
        self.scope = Some(scope.downgrade());
    }

    pub fn set_extra_data<T: Send + Sync + 'static>(&mut self, name: impl Into<String>, value: T) {
        self.extra_data
            .insert(ExtraDataKey::Named(name.into()), Arc::new(value));
    }

    pub fn get_extra_data<T: Send + Sync + 'static>(&self, name: &str) -> Option<Arc<T>> {
        self.extra_data
            .get(&ExtraDataKey::Named(name.to_string()))
            .and_then(|value| value.clone().downcast::<T>().ok())
    }

    pub fn remove_extra_data(&mut self, name: &str) -> Option<Instance> {
        self.extra_data.remove(&ExtraDataKey::Named(name.to_string()))
    }

    pub fn set_slot(&mut self, slot: SlotId, value: Instance) {
        self.extra_data.insert(ExtraDataKey::Slot(slot), value);
    }

    pub fn slot(&self, slot: SlotId) -> Option<&Instance> {
        self.extra_data.get(&ExtraDataKey::Slot(slot))
    }

    pub fn contains(&self, key: &ExtraDataKey) -> bool {
        self.extra_data.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &ExtraDataKey> {
        self.extra_data.keys()
    }

    pub fn len(&self) -> usize {
        self.extra_data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.extra_data.is_empty()
    }
}

impl fmt::Debug for InjectionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InjectionContext")
            .field("keys", &self.extra_data.keys().collect::<Vec<_>>())
            .field("scope", &self.scope().map(|s| s.name().to_string()))
            .finish()
    }
}

/// 上下文创建协作者
pub trait ContextCreator: Send + Sync {
    fn create_context(&self, scope: Option<&LifetimeScope>) -> InjectionContext;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultContextCreator;

impl ContextCreator for DefaultContextCreator {
    fn create_context(&self, scope: Option<&LifetimeScope>) -> InjectionContext {
        match scope {
            Some(scope) => InjectionContext::with_scope(scope),
            None => InjectionContext::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clone_is_isolated_from_source() {
        let mut source = InjectionContext::new();
        source.set_extra_data("tenant", "alpha".to_string());

        let mut clone = source.clone();
        clone.set_extra_data("tenant", "beta".to_string());
        clone.set_extra_data("user", 7_u32);

        assert_eq!(
            source.get_extra_data::<String>("tenant").as_deref(),
            Some(&"alpha".to_string())
        );
        assert!(source.get_extra_data::<u32>("user").is_none());
        assert_eq!(source.len(), 1);
        assert_eq!(clone.len(), 2);
    }

    #[test]
    fn test_slots_are_distinct_from_names() {
        let slot = SlotId::next();
        let mut context = InjectionContext::new();
        context.set_slot(slot, Arc::new(42_i32));

        assert!(context.contains(&ExtraDataKey::Slot(slot)));
        assert!(context.get_extra_data::<i32>("42").is_none());
        let value = context.slot(slot).unwrap().clone().downcast::<i32>().unwrap();
        assert_eq!(*value, 42);
    }

    #[test]
    fn test_slot_ids_are_unique() {
        let a = SlotId::next();
        let b = SlotId::next();
        assert_ne!(a, b);
        assert!(b.value() > a.value());
    }

    #[test]
    fn test_wrong_type_lookup_returns_none() {
        let mut context = InjectionContext::new();
        context.set_extra_data("port", 8080_u16);
        assert!(context.get_extra_data::<String>("port").is_none());
        assert_eq!(context.get_extra_data::<u16>("port").as_deref(), Some(&8080));
        assert!(context.remove_extra_data("port").is_some());
        assert!(context.is_empty());
    }
}
