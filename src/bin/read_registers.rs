/// Read holding registers from a Modbus-TCP server
///
/// Usage: read_registers [ADDR] [SLAVE] [START] [COUNT]
///
/// Settings come from the JSON file named by `MODBUS_CONFIG` (if set), then
/// `MODBUS_ADDR`, then the first positional argument. Set `RUST_LOG=debug`
/// for frame-level logs.

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;

use mbap_master::utils::format;
use mbap_master::{ClientConfig, ModbusClient, ModbusRequest, ModbusTcpClient};

fn parse_arg<T: std::str::FromStr>(args: &[String], index: usize, name: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match args.get(index) {
        Some(value) => value.parse().with_context(|| format!("invalid {}: {}", name, value)),
        None => Ok(default),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();

    let mut config = match std::env::var("MODBUS_CONFIG") {
        Ok(path) => ClientConfig::from_json_file(&path).with_context(|| format!("loading {}", path))?,
        Err(_) => ClientConfig::default(),
    };
    if let Ok(address) = std::env::var("MODBUS_ADDR") {
        config.address = address;
    }
    if let Some(address) = args.first() {
        config.address = address.clone();
    }

    let slave_id: u8 = parse_arg(&args, 1, "slave id", 1)?;
    let start: u16 = parse_arg(&args, 2, "start address", 0)?;
    let count: u16 = parse_arg(&args, 3, "register count", 2)?;

    info!("{}", mbap_master::info());
    let mut client = ModbusTcpClient::connect_with(&config, || {
        info!("Connected to {}", config.address);
    })
    .await
    .with_context(|| format!("connecting to {}", config.address))?;

    client
        .on_error(|error| tracing::error!("Channel error: {}", error))
        .on_close(|| info!("Channel closed"));

    let request = ModbusRequest::read_holding_registers(slave_id, start, count);
    request.validate()?;

    let response = client
        .send_with(&request, || info!("Request sent"))
        .await
        .context("reading holding registers")?;

    if response.is_sentinel() {
        println!("No data received");
    } else {
        println!(
            "Transaction {}: function 0x{:02X}, {} register(s): {}",
            response.transaction_id,
            response.function_code,
            response.no_of_registers,
            format::registers_to_hex(&response.register_values)
        );
        println!("{}", serde_json::to_string_pretty(&response)?);
    }

    println!("{}", format::format_metrics(client.metrics()));
    client.close().await?;
    Ok(())
}
