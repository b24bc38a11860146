//! Main entry point for the ParkPass detection server.
//! Receives camera detections over HTTP and runs the notification and guest expiry workers.

use std::sync::Arc;

use actix_web::{App, HttpServer, middleware::Logger, web};
use detection_engine::{
    DetectionProcessor, EngineConfig, NotificationOutbox, ParkingStores, RegistrationNotifier,
};
use notification_services::{NotificationService, create_verification_store};
use postgres::PgParkingStore;
use postgres::database::*;
use web_handlers::configure_routes;

mod background;

use background::BackgroundTasks;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize logger
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    log::info!("🚀 Starting ParkPass detection server...");

    let config = match EngineConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            log::error!("❌ Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    // Create database connection pool
    let pool = match create_connection_pool().await {
        Ok(pool) => {
            log::info!("🗃️ Database pool created successfully");

            if let Err(e) = test_connection(&pool).await {
                log::error!("❌ Database connection test failed: {}", e);
            }
            pool
        }
        Err(e) => {
            log::error!("❌ Failed to create database pool: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = run_migrations(&pool).await {
        log::error!("❌ Failed to apply database migrations: {}", e);
        std::process::exit(1);
    }

    // Create notification service
    let notification_service =
        match NotificationService::new(config.registration_token_lifetime.num_hours()).await {
            Ok(service) => {
                log::info!("📧 Notification service initialized successfully");
                Arc::new(service)
            }
            Err(e) => {
                log::error!("❌ Failed to initialize notification service: {}", e);
                log::warn!("🔧 Check FROM_EMAIL, REGISTRATION_BASE_URL and the SES setup");
                std::process::exit(1);
            }
        };

    let notifier: Arc<dyn RegistrationNotifier> = notification_service.clone();
    let (outbox, dispatcher) = NotificationOutbox::channel(notifier, config.notifier_timeout);

    let store = Arc::new(PgParkingStore::new(pool));
    let sweep_interval = config.guest_sweep_interval;
    let processor = Arc::new(DetectionProcessor::new(
        ParkingStores::shared(store),
        outbox,
        config,
    ));

    let mut background = BackgroundTasks::start(processor.clone(), dispatcher, sweep_interval);

    // Create verification store
    let verification_store = create_verification_store();

    let bind_address = std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
    log::info!("🌐 Server will be available at: http://{}", bind_address);

    let processor_data = web::Data::from(processor);
    let notification_data = web::Data::from(notification_service);
    let verification_data = web::Data::new(verification_store);

    HttpServer::new(move || {
        App::new()
            .app_data(processor_data.clone())
            .app_data(notification_data.clone())
            .app_data(verification_data.clone())
            .wrap(Logger::default())
            .configure(configure_routes)
    })
    .bind(bind_address)?
    .run()
    .await?;

    background.stop().await;
    Ok(())
}
