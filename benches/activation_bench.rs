//! 激活管线的性能基准测试：缓存例程与每次重建的对比

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use graft::infrastructure::container::{ExportStrategy, Func2, ServiceContainer};
use graft::ContainerConfig;
use std::sync::Arc;

struct Config {
    retries: u32,
}

struct Repository {
    config: Arc<Config>,
}

struct Handler {
    repository: Arc<Repository>,
    user: u64,
    action: String,
}

fn build_container(cache: bool) -> ServiceContainer {
    let container = ServiceContainer::with_config(ContainerConfig {
        compile_cache_enabled: cache,
        ..ContainerConfig::default()
    });
    container.register(
        ExportStrategy::builder::<Config>()
            .singleton()
            .factory(|_| Ok(Config { retries: 3 })),
    );
    container.register(
        ExportStrategy::builder::<Repository>()
            .depends_on::<Config>()
            .factory(|deps| {
                Ok(Repository {
                    config: deps.get::<Config>(0)?,
                })
            }),
    );
    container.register(
        ExportStrategy::builder::<Handler>()
            .depends_on::<Repository>()
            .depends_on::<u64>()
            .depends_on::<String>()
            .factory(|deps| {
                Ok(Handler {
                    repository: deps.get::<Repository>(0)?,
                    user: *deps.get::<u64>(1)?,
                    action: deps.get::<String>(2)?.as_ref().clone(),
                })
            }),
    );
    container
}

fn bench_locate(c: &mut Criterion) {
    let mut group = c.benchmark_group("locate_repository");
    for cache in [true, false] {
        let container = build_container(cache);
        group.bench_with_input(
            BenchmarkId::from_parameter(if cache { "cached" } else { "rebuild" }),
            &container,
            |b, container| {
                b.iter(|| {
                    let repository = container.locate::<Repository>().unwrap();
                    black_box(repository.config.retries)
                })
            },
        );
    }
    group.finish();
}

fn bench_func_call(c: &mut Criterion) {
    let container = build_container(true);
    let factory = container
        .locate_wrapper::<Func2<u64, String, Handler>>()
        .unwrap();

    c.bench_function("func2_call", |b| {
        b.iter(|| {
            let handler = factory.call(black_box(7), "read".to_string()).unwrap();
            black_box((handler.user, handler.action.len(), handler.repository.config.retries))
        })
    });
}

criterion_group!(benches, bench_locate, bench_func_call);
criterion_main!(benches);
