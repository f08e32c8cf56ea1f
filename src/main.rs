use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::{error, info, warn, Level};

use trunkline::application::{
    AuthorizeWorker, Manager, RealmConfig, Registry, Server, ServiceNotifier, SignalOutcome,
    ThreadSpec,
};
use trunkline::config::{CliOverrides, Config};
use trunkline::domain::authorize::AuthorizeRepository;
use trunkline::domain::endpoint::EndpointRepository;
use trunkline::domain::extension::ExtensionRepository;
use trunkline::domain::outbox::OutboxRepository;
use trunkline::infrastructure::persistence::{
    database::{process_uuid, DatabaseConfig, DatabaseEngine},
    SqliteAuthorizeRepository, SqliteEndpointRepository, SqliteExtensionRepository,
    SqliteOutboxRepository,
};
use trunkline::infrastructure::protocols::sip::context::{Allow, Context, ContextSignal};
use trunkline::infrastructure::protocols::sip::transport::{TransportProtocol, UdpTransport};

/// Fatal startup failure exit codes, per the original's CONFIG-FATAL range.
const EXIT_CONFIG: i32 = 90;
const EXIT_STARTUP: i32 = 91;

#[tokio::main]
async fn main() {
    let overrides = CliOverrides::parse(std::env::args().skip(1));
    let mut config = match Config::load(overrides.config_path.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration load failed: {e}");
            std::process::exit(EXIT_CONFIG);
        }
    };
    overrides.apply(&mut config);

    tracing_subscriber::fmt()
        .with_max_level(if config.server.debug { Level::DEBUG } else { Level::INFO })
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "starting trunkline");

    let bind_addr: SocketAddr = match format!("{}:{}", config.sip.address, config.sip.port).parse() {
        Ok(addr) => addr,
        Err(e) => {
            error!(error = %e, "invalid SIP bind address");
            std::process::exit(EXIT_CONFIG);
        }
    };

    let db = DatabaseEngine::spawn(DatabaseConfig {
        path: config.database.path.clone(),
        idle_timeout: config.database.idle_timeout(),
    });

    let uuid = process_uuid();
    let realm = RealmConfig::resolve_realm(&config.sip.network, &uuid);
    info!(%realm, %uuid, "resolved realm");

    let extensions: Arc<dyn ExtensionRepository> = Arc::new(SqliteExtensionRepository::new(db.clone()));
    let authorize: Arc<dyn AuthorizeRepository> = Arc::new(SqliteAuthorizeRepository::new(db.clone()));
    let endpoints: Arc<dyn EndpointRepository> = Arc::new(SqliteEndpointRepository::new(db.clone()));
    let outbox: Arc<dyn OutboxRepository> = Arc::new(SqliteOutboxRepository::new(db.clone()));

    let registry = Registry::new(config.registration.range());
    let authorize_worker = AuthorizeWorker::new(
        extensions.clone(),
        authorize.clone(),
        endpoints.clone(),
        config.registration.range(),
        config.registration.ceilings(),
    );
    let realm_state = Arc::new(RwLock::new(RealmConfig {
        realm,
        banner: format!("trunkline/{}", env!("CARGO_PKG_VERSION")),
        aliases: Vec::new(),
    }));

    let (manager_tx, manager_rx) = mpsc::channel::<ContextSignal>(256);
    let manager = Manager::new(
        registry,
        authorize_worker,
        extensions.clone(),
        outbox.clone(),
        realm_state.clone(),
        config.registration.ceilings(),
        manager_rx,
    );

    let local_hosts = vec![config.sip.host.clone(), bind_addr.ip().to_string()];
    let udp_transport = Box::new(UdpTransport::new(bind_addr));
    let context = Context::new(
        "context:udp",
        udp_transport,
        TransportProtocol::Udp,
        Allow::REGISTRY | Allow::REMOTE,
        local_hosts,
        manager_tx,
    );

    let mut server = Server::new();
    let (started_tx, started_rx) = oneshot::channel();
    server.spawn(ThreadSpec::new("context:udp", 0, context.run(Some(started_tx))).with_started(started_rx));
    server.spawn(ThreadSpec::new("manager", 1, manager.run()));

    if let Err(e) = server.start(std::time::Duration::from_secs(5)).await {
        error!(error = %e, "startup failed");
        std::process::exit(EXIT_STARTUP);
    }
    info!("trunkline started");

    #[cfg(unix)]
    let notifier = ServiceNotifier::from_env();
    #[cfg(unix)]
    notifier.ready();

    loop {
        #[cfg(unix)]
        let outcome = trunkline::application::server::wait_for_signal().await;
        #[cfg(not(unix))]
        let outcome = {
            let _ = tokio::signal::ctrl_c().await;
            SignalOutcome::Shutdown(0)
        };

        match outcome {
            SignalOutcome::Reload => {
                info!("reloading configuration");
                match Config::load(overrides.config_path.as_deref()) {
                    Ok(mut reloaded) => {
                        overrides.apply(&mut reloaded);
                        let mut realm_guard = realm_state.write().await;
                        realm_guard.realm = RealmConfig::resolve_realm(&reloaded.sip.network, &uuid);
                        drop(realm_guard);
                        server.notify_config_changed();
                        config = reloaded;
                    }
                    Err(e) => warn!(error = %e, "config reload failed, keeping previous configuration"),
                }
            }
            SignalOutcome::Shutdown(code) => {
                info!(code, "shutting down");
                #[cfg(unix)]
                notifier.stopping();
                server.shutdown(std::time::Duration::from_secs(5)).await;
                std::process::exit(code);
            }
        }
    }
}
