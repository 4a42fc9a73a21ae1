use crate::auth::Authenticator;
use crate::config::GatewayConfig;
use crate::health::HealthProber;
use crate::metrics::MetricsSink;
use crate::pool::PoolRegistry;
use crate::reload::ReloadWatcher;
use crate::selector::Selector;
use crate::sticky::StickyMap;
use crate::tunnel::TunnelApp;
use anyhow::{Context, Result};
use pingora::server::Server;
use pingora::server::configuration::ServerConf;
use pingora::services::listening::Service as ListeningService;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Builder;
use tokio::sync::watch;

/// Everything a running gateway shares across its control-plane background
/// tasks and its data-plane tunnel sessions. Assembled once at startup from
/// [`GatewayConfig`] and handed out as clones of the `Arc`s it holds —
/// mirrors the teacher's single `RuntimeState`/`TrafficManager` pair, minus
/// the multi-service indirection this gateway's single pool doesn't need.
pub struct GatewayRuntime {
    pub pool: Arc<PoolRegistry>,
    pub selector: Arc<Selector>,
    pub sticky: Arc<StickyMap>,
    pub authenticator: Arc<Authenticator>,
    pub metrics: Arc<MetricsSink>,
    pub reload: Arc<ReloadWatcher>,
    pub health: Arc<HealthProber>,
}

impl GatewayRuntime {
    pub fn new(config: &GatewayConfig) -> Self {
        let breaker_params = crate::breaker::BreakerParams {
            failure_threshold: config.breaker_failure_threshold,
            open_duration: config.breaker_open_duration,
        };

        Self {
            pool: Arc::new(PoolRegistry::new(breaker_params)),
            selector: Arc::new(Selector::new()),
            sticky: Arc::new(StickyMap::new(config.sticky_ttl)),
            authenticator: Arc::new(Authenticator::new(
                config.secret.clone(),
                config.enable_auth,
                config.clock_skew,
            )),
            metrics: Arc::new(MetricsSink::new()),
            reload: Arc::new(ReloadWatcher::new(config.proxy_file.clone())),
            health: Arc::new(HealthProber::new(
                config.health_canary.clone(),
                config.health_probe_interval,
                config.health_probe_timeout,
                config.health_probe_concurrency,
            )),
        }
    }

    fn tunnel_app(&self, config: &GatewayConfig) -> TunnelApp {
        TunnelApp {
            pool: self.pool.clone(),
            selector: self.selector.clone(),
            sticky: self.sticky.clone(),
            authenticator: self.authenticator.clone(),
            metrics: self.metrics.clone(),
            relay_idle_timeout: config.relay_idle_timeout,
            dial_timeout: config.dial_timeout,
            shutdown_drain: config.shutdown_drain,
        }
    }
}

const STICKY_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Boots the gateway: builds the runtime, wires its background tasks onto a
/// dedicated control-plane Tokio runtime (reload watcher, health prober,
/// sticky sweep — none of them sit on pingora's own worker threads, same
/// separation the teacher draws between its control-plane `control_rt` and
/// the server's request-serving runtime), registers the tunnel engine as a
/// listening service, and blocks forever in `run_forever()`.
pub fn run(config: GatewayConfig) -> Result<()> {
    let runtime = Arc::new(GatewayRuntime::new(&config));

    let control_rt = Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .context("failed to build control-plane Tokio runtime")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    control_rt.block_on(runtime.reload.initial_load(&runtime.pool, &runtime.metrics));

    control_rt.spawn({
        let runtime = runtime.clone();
        let shutdown_rx = shutdown_rx.clone();
        async move {
            runtime.reload.run(&runtime.pool, &runtime.metrics, shutdown_rx).await;
        }
    });

    control_rt.spawn({
        let runtime = runtime.clone();
        let shutdown_rx = shutdown_rx.clone();
        async move {
            runtime.health.run(runtime.pool.clone(), runtime.metrics.clone(), shutdown_rx).await;
        }
    });

    control_rt.spawn({
        let sticky = runtime.sticky.clone();
        let mut shutdown_rx = shutdown_rx.clone();
        async move {
            let mut ticker = tokio::time::interval(STICKY_SWEEP_INTERVAL);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        sticky.sweep(std::time::Instant::now());
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            return;
                        }
                    }
                }
            }
        }
    });

    ctrlc::set_handler(move || {
        tracing::info!("shutdown requested");
        let _ = shutdown_tx.send(true);
    })
    .context("failed to install signal handler")?;

    let server = build_pingora_server(&config, &runtime)?;

    // `control_rt` must stay in scope for its background tasks to keep
    // running; `run_forever` blocks this thread for the life of the process.
    server.run_forever();
}

fn build_pingora_server(config: &GatewayConfig, runtime: &Arc<GatewayRuntime>) -> Result<Server> {
    let pingora_conf = ServerConf::new().context("could not construct pingora server configuration")?;
    let mut server = Server::new_with_opt_and_conf(None, pingora_conf);
    server.bootstrap();

    let tunnel_app = Arc::new(runtime.tunnel_app(config));
    let mut tunnel_service = ListeningService::new("proxyguard-tunnel".to_string(), tunnel_app);
    tunnel_service.add_tcp(&format!("0.0.0.0:{}", config.proxy_port));
    server.add_service(tunnel_service);

    Ok(server)
}
