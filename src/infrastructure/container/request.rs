//! 激活请求
//!
//! 请求描述“正在解析什么、处于什么上下文、已有哪些已知值”。
//! 解析递归进入依赖时，请求形成一棵树：子请求持有父请求的引用，
//! 父请求从不引用子请求。

use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;

use super::fragment::Fragment;
use super::types::{TypeDescriptor, TypeKey};

/// 请求种类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// 顶层解析
    Root,
    /// 导出声明的依赖
    Dependency,
    /// 包装器内部的被包装类型
    WrapperInner,
    Other,
}

/// 片段产生的可释放对象应登记到哪个释放作用域
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisposalTarget {
    /// 调用时传入的释放作用域
    Ambient,
    /// 根作用域
    Root,
}

/// 无需再次分派策略即可获得的值
#[derive(Debug, Clone)]
pub struct KnownValue {
    key: TypeKey,
    fragment: Fragment,
}

impl KnownValue {
    pub fn new(key: TypeKey, fragment: Fragment) -> Self {
        Self { key, fragment }
    }

    pub fn key(&self) -> TypeKey {
        self.key
    }

    pub fn fragment(&self) -> &Fragment {
        &self.fragment
    }
}

struct RequestNode {
    descriptor: TypeDescriptor,
    parent: Option<Arc<RequestNode>>,
    kind: RequestKind,
    owning_strategy: Option<String>,
    consumer: Option<TypeKey>,
    info: Option<String>,
    wraps_previous: bool,
    depth: usize,
    disposal: RwLock<DisposalTarget>,
    known_values: RwLock<Vec<KnownValue>>,
}

#[derive(Clone)]
pub struct ActivationRequest {
    node: Arc<RequestNode>,
}

impl ActivationRequest {
    pub fn root(descriptor: TypeDescriptor) -> Self {
        Self {
            node: Arc::new(RequestNode {
                descriptor,
                parent: None,
                kind: RequestKind::Root,
                owning_strategy: None,
                consumer: None,
                info: None,
                wraps_previous: false,
                depth: 0,
                disposal: RwLock::new(DisposalTarget::Ambient),
                known_values: RwLock::new(Vec::new()),
            }),
        }
    }

    /// 创建子请求
    ///
    /// 子请求继承当前的释放目标，已知值列表为空。
    pub fn new_request(
        &self,
        target: TypeDescriptor,
        owning_strategy: &str,
        consumer: Option<TypeKey>,
        kind: RequestKind,
        info: Option<String>,
        wraps_previous: bool,
    ) -> Self {
        Self {
            node: Arc::new(RequestNode {
                descriptor: target,
                parent: Some(self.node.clone()),
                kind,
                owning_strategy: Some(owning_strategy.to_string()),
                consumer,
                info,
                wraps_previous,
                depth: self.node.depth + 1,
                disposal: RwLock::new(self.disposal_target()),
                known_values: RwLock::new(Vec::new()),
            }),
        }
    }

    pub fn descriptor(&self) -> &TypeDescriptor {
        &self.node.descriptor
    }

    pub fn key(&self) -> TypeKey {
        self.node.descriptor.key()
    }

    pub fn kind(&self) -> RequestKind {
        self.node.kind
    }

    pub fn depth(&self) -> usize {
        self.node.depth
    }

    pub fn owning_strategy(&self) -> Option<&str> {
        self.node.owning_strategy.as_deref()
    }

    pub fn consumer(&self) -> Option<TypeKey> {
        self.node.consumer
    }

    pub fn info(&self) -> Option<&str> {
        self.node.info.as_deref()
    }

    pub fn wraps_previous(&self) -> bool {
        self.node.wraps_previous
    }

    pub fn parent(&self) -> Option<ActivationRequest> {
        self.node
            .parent
            .as_ref()
            .map(|node| ActivationRequest { node: node.clone() })
    }

    pub fn disposal_target(&self) -> DisposalTarget {
        *self.node.disposal.read()
    }

    pub fn set_disposal_target(&self, target: DisposalTarget) {
        *self.node.disposal.write() = target;
    }

    pub fn add_known_value(&self, value: KnownValue) {
        self.node.known_values.write().push(value);
    }

    /// 从自身向祖先查找已知值，最近的登记优先
    pub fn find_known_value(&self, key: TypeKey) -> Option<Fragment> {
        let mut current = Some(&self.node);
        while let Some(node) = current {
            if let Some(found) = node
                .known_values
                .read()
                .iter()
                .find(|value| value.key == key)
            {
                return Some(found.fragment.clone());
            }
            current = node.parent.as_ref();
        }
        None
    }

    /// 祖先链上是否已有相同类型正在解析
    pub fn is_in_progress(&self, key: TypeKey) -> bool {
        let mut current = self.node.parent.as_ref();
        while let Some(node) = current {
            if node.descriptor.key() == key {
                return true;
            }
            current = node.parent.as_ref();
        }
        false
    }

    /// 从根到当前请求的类型名链，用于诊断
    pub fn chain(&self) -> Vec<String> {
        let mut names = Vec::with_capacity(self.node.depth + 1);
        let mut current = Some(&self.node);
        while let Some(node) = current {
            names.push(node.descriptor.name().to_string());
            current = node.parent.as_ref();
        }
        names.reverse();
        names
    }
}

impl fmt::Debug for ActivationRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActivationRequest")
            .field("type", &self.key())
            .field("kind", &self.kind())
            .field("depth", &self.depth())
            .field("disposal", &self.disposal_target())
            .field("known_values", &self.node.known_values.read().len())
            .finish()
    }
}
