use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use ridecell::{
    AppState,
    config::{Config, StoreBackend},
    profile::{HttpProfileLookup, ProfileLookup, StaticProfiles},
    router,
    store::{DocumentStore, MemoryStore, RedisStore},
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    // 初始化日志
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 加载配置
    let config = Config::from_env().expect("Failed to load configuration");

    #[cfg(debug_assertions)]
    tracing::info!("Running in debug mode with CORS enabled");

    #[cfg(not(debug_assertions))]
    tracing::info!("Running in production mode with CORS disabled");

    // 文档存储
    let store: Arc<dyn DocumentStore> = match config.store_backend {
        StoreBackend::Redis => Arc::new(
            RedisStore::open(&config.redis_url).expect("Failed to create Redis client"),
        ),
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory document store, data is not shared");
            Arc::new(MemoryStore::new())
        }
    };

    // 显示名查询
    let profiles: Arc<dyn ProfileLookup> = match &config.profile_service_url {
        Some(url) => Arc::new(
            HttpProfileLookup::new(url.clone()).expect("Failed to create profile client"),
        ),
        None => Arc::new(StaticProfiles::new()),
    };

    let state = AppState::new(store, profiles, config);
    let app = router::build_router(state.clone());

    // 启动服务器
    let addr = SocketAddr::new(
        state.config.server_host.parse().unwrap_or_else(|_| {
            tracing::warn!("Invalid server_host, falling back to dual-stack default");
            IpAddr::V6(std::net::Ipv6Addr::UNSPECIFIED)
        }),
        state.config.server_port,
    );
    tracing::info!("Server listening on {}", addr);
    axum::serve(
        tokio::net::TcpListener::bind(&addr)
            .await
            .expect("Failed to bind"),
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .expect("Failed to start server");
}
