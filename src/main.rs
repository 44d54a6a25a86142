use civiceye_core::{api, config::Config, ArbitrationEngine, CivicService, DetectorRegistry, Store};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "civiceye_core=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // ----------------------------------------------------------------
    // 0. 加载配置
    // ----------------------------------------------------------------
    let config = Config::from_env()?;
    info!(
        "配置加载完成: Host={}:{}, DB={}, Models={}, Detectors={:?}, Threshold={}",
        config.host,
        config.port,
        config.db_path,
        config.model_dir.display(),
        config.detectors,
        config.confidence_threshold
    );

    // ----------------------------------------------------------------
    // 1. 存储 & 检测器注册表
    // ----------------------------------------------------------------
    let store = Store::open(&config.db_path)?;

    let registry = Arc::new(DetectorRegistry::with_defaults(config.model_dir.clone()));
    let engine = ArbitrationEngine::new(registry.clone(), config.detectors.clone());
    for name in engine.detectors() {
        if !registry.contains(name) {
            tracing::warn!("配置中的检测器 {} 没有对应的构造器", name);
        }
    }

    // ----------------------------------------------------------------
    // 2. 状态共享容器
    // ----------------------------------------------------------------
    let service = CivicService::new(store.clone(), engine, config.confidence_threshold);
    let shared_state = Arc::new(api::AppState {
        service: Arc::new(service),
    });

    // ----------------------------------------------------------------
    // 3. 启动 HTTP 服务
    // ----------------------------------------------------------------
    let app = api::app(shared_state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr).await?;

    info!("API 服务已运行在: http://{}", addr);
    info!("   - POST /complaints/{{id}}/analyze         : 对投诉图片运行仲裁");
    info!("   - POST /admin/complaint/{{id}}/decision   : 管理员审核");

    axum::serve(listener, app).await?;

    store.flush()?;
    Ok(())
}
