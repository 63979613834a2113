//! 执行片段
//!
//! 片段是构造计划的节点，类似一棵小型表达式树。片段通过嵌套组合：
//! 一个片段可以把另一个片段作为子表达式。编译器把整棵片段树转换为
//! 可重复调用的 [`CompiledRoutine`](super::compiler::CompiledRoutine)。

use std::fmt;
use std::sync::Arc;

use super::context::SlotId;
use super::request::DisposalTarget;
use super::strategy::ExportStrategy;
use super::types::{Instance, TypeKey};
use super::wrappers::DeferredFactory;
use super::ServiceLifetime;

#[derive(Clone)]
pub enum Fragment {
    /// 预先存在的实例
    Constant { key: TypeKey, value: Instance },
    /// 从调用上下文的参数槽读取值
    ContextValue { slot: SlotId, key: TypeKey },
    /// 以依赖片段的结果调用导出的工厂
    Construct {
        export: ExportStrategy,
        dependencies: Vec<Fragment>,
    },
    /// 生命周期管理与可释放对象登记
    Lifetime {
        lifetime: ServiceLifetime,
        export: ExportStrategy,
        disposal: DisposalTarget,
        inner: Box<Fragment>,
    },
    /// 包装器策略产生的延迟激活
    Deferred(Arc<DeferredFactory>),
}

impl Fragment {
    /// 片段产生的类型
    pub fn key(&self) -> TypeKey {
        match self {
            Fragment::Constant { key, .. } | Fragment::ContextValue { key, .. } => *key,
            Fragment::Construct { export, .. } | Fragment::Lifetime { export, .. } => export.key(),
            Fragment::Deferred(factory) => factory.requested(),
        }
    }

    /// 树中节点总数
    pub fn node_count(&self) -> usize {
        match self {
            Fragment::Constant { .. } | Fragment::ContextValue { .. } | Fragment::Deferred(_) => 1,
            Fragment::Construct { dependencies, .. } => {
                1 + dependencies.iter().map(Fragment::node_count).sum::<usize>()
            }
            Fragment::Lifetime { inner, .. } => 1 + inner.node_count(),
        }
    }

    /// 以缩进文本渲染构造计划
    pub fn describe(&self) -> String {
        let mut out = String::new();
        self.describe_into(&mut out, 0);
        out
    }

    fn describe_into(&self, out: &mut String, indent: usize) {
        let pad = "  ".repeat(indent);
        match self {
            Fragment::Constant { key, .. } => {
                out.push_str(&format!("{}constant {}\n", pad, key));
            }
            Fragment::ContextValue { slot, key } => {
                out.push_str(&format!("{}argument #{} {}\n", pad, slot.value(), key));
            }
            Fragment::Construct {
                export,
                dependencies,
            } => {
                out.push_str(&format!("{}construct {}\n", pad, export.key()));
                for dependency in dependencies {
                    dependency.describe_into(out, indent + 1);
                }
            }
            Fragment::Lifetime {
                lifetime, inner, ..
            } => {
                out.push_str(&format!("{}{:?}\n", pad, lifetime));
                inner.describe_into(out, indent + 1);
            }
            Fragment::Deferred(factory) => {
                out.push_str(&format!(
                    "{}deferred {} -> {} ({} argument(s))\n",
                    pad,
                    factory.requested(),
                    factory.wrapped(),
                    factory.arity()
                ));
            }
        }
    }
}

impl fmt::Debug for Fragment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fragment::Constant { key, .. } => f.debug_tuple("Constant").field(key).finish(),
            Fragment::ContextValue { slot, key } => f
                .debug_struct("ContextValue")
                .field("slot", &slot.value())
                .field("key", key)
                .finish(),
            Fragment::Construct {
                export,
                dependencies,
            } => f
                .debug_struct("Construct")
                .field("export", &export.key())
                .field("dependencies", dependencies)
                .finish(),
            Fragment::Lifetime {
                lifetime,
                export,
                disposal,
                inner,
            } => f
                .debug_struct("Lifetime")
                .field("lifetime", lifetime)
                .field("export", &export.key())
                .field("disposal", disposal)
                .field("inner", inner)
                .finish(),
            Fragment::Deferred(factory) => f
                .debug_struct("Deferred")
                .field("requested", &factory.requested())
                .field("wrapped", &factory.wrapped())
                .finish(),
        }
    }
}
