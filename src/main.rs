use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};

use dispomail::db::log_opened;
use dispomail::intake::MailIntake;
use dispomail::push::{spawn_sweeper, PushDispatcher, PushHub};
use dispomail::{Config, Database, EventBus, PushAuth, PushServer, SmtpServer};

#[tokio::main]
async fn main() {
    // Load configuration
    let config = match Config::load_with_env("config.toml") {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config.toml: {e}");
            eprintln!("Using default configuration.");
            let mut config = Config::default();
            config.apply_env_overrides();
            config
        }
    };

    // Initialize logging
    if let Err(e) = dispomail::logging::init(&config.logging) {
        eprintln!("Failed to initialize logging: {e}");
        // Fall back to console-only logging
        dispomail::logging::init_console_only(&config.logging.level);
    }

    if let Err(e) = config.validate() {
        error!("Invalid configuration: {}", e);
        std::process::exit(1);
    }

    info!("dispomail - disposable email");

    if let Err(e) = run(config).await {
        error!("Fatal error: {}", e);
        std::process::exit(1);
    }
}

async fn run(config: Config) -> dispomail::Result<()> {
    let db = Database::open(&config.database).await?;
    log_opened(&db);

    let store = db.store();
    let events = EventBus::new();

    if config.push.enabled {
        let auth = PushAuth::from_config(&config.auth);
        let hub = Arc::new(PushHub::with_queue_capacity(config.push.queue_capacity));

        events.subscribe(Arc::new(PushDispatcher::new(
            Arc::clone(&hub),
            Arc::clone(&store),
            auth.is_enabled(),
        )));
        spawn_sweeper(
            Arc::clone(&hub),
            Duration::from_secs(config.push.sweep_interval_secs.max(1)),
        );

        let server = PushServer::new(&config.push, hub, auth)?;
        tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!("Push server stopped: {}", e);
            }
        });
    } else {
        info!("Push notifications disabled");
    }

    let intake = MailIntake::new(store, events);
    let smtp = SmtpServer::bind(&config.smtp).await?;
    smtp.run(intake).await
}
