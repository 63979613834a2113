//! 表达式构建器
//!
//! 为请求产生执行片段。顺序固定：已知值 → 循环检测 → 深度保护 → 策略分派。

use super::fragment::Fragment;
use super::request::ActivationRequest;
use super::services::ActivationServices;
use crate::errors::ActivationError;

#[derive(Debug, Clone)]
pub struct ExpressionBuilder {
    max_depth: usize,
}

impl ExpressionBuilder {
    pub fn new(max_depth: usize) -> Self {
        Self { max_depth }
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// 为请求产生片段，无法满足时返回 `UnresolvedDependency`
    pub fn activation(
        &self,
        services: &ActivationServices,
        request: &ActivationRequest,
    ) -> Result<Fragment, ActivationError> {
        match self.resolve(services, request)? {
            Some(fragment) => Ok(fragment),
            None => {
                let chain = request.chain();
                tracing::debug!(
                    requested = request.key().name(),
                    chain = %chain.join(" -> "),
                    "No strategy satisfies request"
                );
                Err(ActivationError::UnresolvedDependency {
                    requested: request.key().name().to_string(),
                    chain,
                })
            }
        }
    }

    /// 尝试产生片段；没有任何策略匹配时返回 `Ok(None)`
    pub fn resolve(
        &self,
        services: &ActivationServices,
        request: &ActivationRequest,
    ) -> Result<Option<Fragment>, ActivationError> {
        let key = request.key();

        if let Some(known) = request.find_known_value(key) {
            tracing::trace!(requested = key.name(), "Satisfied by known value");
            return Ok(Some(known));
        }

        if request.is_in_progress(key) {
            return Err(ActivationError::CircularDependency {
                requested: key.name().to_string(),
                chain: request.chain(),
            });
        }

        if request.depth() > self.max_depth {
            return Err(ActivationError::DepthExceeded {
                requested: key.name().to_string(),
                depth: request.depth(),
                limit: self.max_depth,
            });
        }

        let candidate = match services.registry().find(request) {
            Some(candidate) => candidate,
            None => return Ok(None),
        };

        tracing::debug!(
            requested = key.name(),
            strategy = candidate.name(),
            depth = request.depth(),
            "Dispatching request"
        );
        candidate.activation(services, request).map(Some)
    }
}

impl Default for ExpressionBuilder {
    fn default() -> Self {
        Self::new(64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ContainerConfig;
    use crate::infrastructure::container::context::SlotId;
    use crate::infrastructure::container::request::{KnownValue, RequestKind};
    use crate::infrastructure::container::strategy::ExportStrategy;
    use crate::infrastructure::container::types::{TypeDescriptor, TypeKey};

    struct Left;
    struct Right;
    struct Chain<const N: usize>;

    fn services() -> ActivationServices {
        ActivationServices::new(ContainerConfig::default())
    }

    #[test]
    fn test_unregistered_type_resolves_to_none() {
        let services = services();
        let request = ActivationRequest::root(TypeDescriptor::of::<Left>());
        assert!(services.builder().resolve(&services, &request).unwrap().is_none());

        let err = services.builder().activation(&services, &request).unwrap_err();
        match err {
            ActivationError::UnresolvedDependency { requested, chain } => {
                assert!(requested.ends_with("Left"));
                assert_eq!(chain.len(), 1);
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_known_value_short_circuits_dispatch() {
        let services = services();
        let request = ActivationRequest::root(TypeDescriptor::of::<i32>());
        let slot = SlotId::next();
        request.add_known_value(KnownValue::new(
            TypeKey::of::<i32>(),
            Fragment::ContextValue {
                slot,
                key: TypeKey::of::<i32>(),
            },
        ));

        let fragment = services.builder().activation(&services, &request).unwrap();
        assert!(matches!(fragment, Fragment::ContextValue { slot: s, .. } if s == slot));
    }

    #[test]
    fn test_cycle_reports_chain() {
        let services = services();
        services.registry().register(
            ExportStrategy::builder::<Left>()
                .depends_on::<Right>()
                .factory(|_| Ok(Left)),
        );
        services.registry().register(
            ExportStrategy::builder::<Right>()
                .depends_on::<Left>()
                .factory(|_| Ok(Right)),
        );

        let request = ActivationRequest::root(TypeDescriptor::of::<Left>());
        let err = services.builder().activation(&services, &request).unwrap_err();
        match err {
            ActivationError::CircularDependency { chain, .. } => {
                assert_eq!(chain.len(), 3);
                assert!(chain[0].ends_with("Left"));
                assert!(chain[1].ends_with("Right"));
                assert!(chain[2].ends_with("Left"));
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_depth_guard() {
        let services = ActivationServices::new(ContainerConfig {
            max_resolution_depth: 1,
            ..ContainerConfig::default()
        });
        services.registry().register(
            ExportStrategy::builder::<Chain<0>>()
                .depends_on::<Chain<1>>()
                .factory(|_| Ok(Chain::<0>)),
        );
        services.registry().register(
            ExportStrategy::builder::<Chain<1>>()
                .depends_on::<Chain<2>>()
                .factory(|_| Ok(Chain::<1>)),
        );
        services
            .registry()
            .register(ExportStrategy::builder::<Chain<2>>().factory(|_| Ok(Chain::<2>)));

        let request = ActivationRequest::root(TypeDescriptor::of::<Chain<0>>());
        let err = services.builder().activation(&services, &request).unwrap_err();
        assert!(matches!(err, ActivationError::DepthExceeded { depth: 2, limit: 1, .. }));

        let inner = request.new_request(
            TypeDescriptor::of::<Chain<2>>(),
            "test",
            None,
            RequestKind::Dependency,
            None,
            false,
        );
        assert!(services.builder().activation(&services, &inner).is_ok());
    }
}
