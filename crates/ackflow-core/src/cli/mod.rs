/*
 *    Licensed under the Apache License, Version 2.0 (the "License");
 *    you may not use this file except in compliance with the License.
 *    You may obtain a copy of the License at
 *
 *        http://www.apache.org/licenses/LICENSE-2.0
 *
 *    Unless required by applicable law or agreed to in writing, software
 *    distributed under the License is distributed on an "AS IS" BASIS,
 *    WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *    See the License for the specific language governing permissions and
 *    limitations under the License.
 */

use crate::config::{FlowControlConfig, LogFormat, LoggingConfig};
use crate::Error;
use clap::{Arg, Command};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, Level};
use tracing_subscriber::fmt;
use tracing_subscriber::fmt::writer::BoxMakeWriter;

mod simulation;

pub use simulation::{CountingAckSender, Simulation, SimulationReport};

#[derive(Default)]
pub struct Cli {
    pub config: Option<FlowControlConfig>,
}

impl Cli {
    /// Returns false when only validation was requested.
    pub fn parse(&mut self) -> Result<bool, Box<dyn std::error::Error>> {
        let matches = Command::new("ackflow")
            .version(env!("CARGO_PKG_VERSION"))
            .about("Soak test for consumer memory limits and acknowledgment grouping.")
            .arg(
                Arg::new("config")
                    .short('c')
                    .long("config")
                    .value_name("FILE")
                    .help("Specify the profile path.")
                    .required(true),
            )
            .arg(
                Arg::new("validate")
                    .short('v')
                    .long("validate")
                    .help("Only the profile is verified, the simulation is not started.")
                    .action(clap::ArgAction::SetTrue),
            )
            .get_matches();

        let Some(config_path) = matches.get_one::<String>("config") else {
            return Err(Box::new(Error::Config("missing --config".to_string())));
        };
        let config = FlowControlConfig::from_file(config_path)?;

        if matches.get_flag("validate") {
            info!("The config is validated.");
            return Ok(false);
        }

        self.config = Some(config);
        Ok(true)
    }

    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error>> {
        let Some(config) = self.config.clone() else {
            return Err(Box::new(Error::Config(
                "configuration not loaded".to_string(),
            )));
        };
        init_logging(&config.logging)?;

        let cancel = CancellationToken::new();
        let ctrl_c_cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupted, cancelling pending reservations");
                ctrl_c_cancel.cancel();
            }
        });

        let simulation = Simulation::new(&config, cancel);
        match simulation.run().await {
            Ok(report) => {
                let report = serde_json::to_string(&report).map_err(Error::Serialization)?;
                info!("Simulation finished: {}", report);
                Ok(())
            }
            Err(e) => {
                error!("Simulation failed: {}", e);
                Err(Box::new(e))
            }
        }
    }
}

pub fn init_logging(config: &LoggingConfig) -> Result<(), Error> {
    let log_level = match config.level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut writer = BoxMakeWriter::new(std::io::stderr);
    // Check if we need to output logs to a file
    if let Some(file_path) = &config.file_path {
        if let Some(parent) = std::path::Path::new(file_path).parent() {
            std::fs::create_dir_all(parent).ok();
        }
        match std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(file_path)
        {
            Ok(file) => writer = BoxMakeWriter::new(std::sync::Mutex::new(file)),
            Err(e) => {
                // Fall back to console logging
                eprintln!("Failed to open log file {}: {}", file_path, e);
            }
        }
    }

    let subscriber_builder = fmt::Subscriber::builder()
        .with_max_level(log_level)
        .with_writer(writer);

    let result = match config.format {
        LogFormat::JSON => {
            tracing::subscriber::set_global_default(subscriber_builder.json().finish())
        }
        LogFormat::PLAIN => tracing::subscriber::set_global_default(subscriber_builder.finish()),
    };
    result.map_err(|e| Error::Unknown(format!("Failed to install log subscriber: {}", e)))
}
