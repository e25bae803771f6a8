use color_eyre::{eyre::eyre, Result};
use esp32_mqtt_client::config::AppConfig;
use esp32_mqtt_client::controller::command::HELP;
use esp32_mqtt_client::controller::device_controller::DeviceController;
use esp32_mqtt_client::controller::interpreter::{spawn_stdin_reader, CommandInterpreter, LoopExit};
use esp32_mqtt_client::mqtt::mqtt_handler::{ConnectionState, MqttSession, MqttTransport};
use std::sync::Arc;
use tracing::{debug, error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    setup()?;

    let config = AppConfig::load()
        .await
        .map_err(|e| eyre!("Failed to load configuration: {}", e))?;
    setup_logging(config.log_level()?);
    info!("Using broker {}", config.mqtt.broker_address());

    println!("ESP32 MQTT Test Client");
    println!("{}", "=".repeat(40));

    let mut session = MqttSession::new(&config.mqtt);
    let controller = Arc::new(DeviceController::new(
        config.mqtt.clone(),
        session.transport(),
    ));

    println!(
        "Connecting to MQTT broker {}...",
        config.mqtt.broker_address()
    );
    session.start(controller.clone())?;

    match controller
        .state()
        .wait_settled(config.mqtt.connect_timeout())
        .await
    {
        Some(ConnectionState::Connected) => {}
        settled => {
            debug!("Startup ended in state {:?}", settled);
            println!("Failed to connect. Please check:");
            println!("   - Internet connection");
            println!("   - MQTT broker availability");
            println!("   - Firewall settings");
            session.shutdown().await;
            return Err(eyre!(
                "Could not connect to {}",
                config.mqtt.broker_address()
            ));
        }
    }

    println!("{}", HELP);

    let mut input = spawn_stdin_reader();
    let mut stdout = tokio::io::stdout();
    let exit = CommandInterpreter::new(controller.clone())
        .run(&mut input, &mut stdout, interrupted())
        .await;

    match exit {
        Ok(LoopExit::Interrupted) => println!("\nInterrupted by user"),
        Ok(LoopExit::EndOfInput) => println!(),
        Ok(LoopExit::Quit) => {}
        Err(e) => error!("Console I/O failed: {}", e),
    }

    disconnect(session, &controller).await;
    println!("Goodbye!");
    Ok(())
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    Ok(())
}

// stdout belongs to the console, logs go to stderr
fn setup_logging(level: Level) {
    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_writer(std::io::stderr)
        .init();
}

async fn interrupted() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Unable to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}

async fn disconnect(session: MqttSession, controller: &DeviceController<MqttTransport>) {
    println!("Disconnecting...");
    session.shutdown().await;
    // The event loop is stopped, so the clean close is reported from here.
    controller.report_shutdown();
}
