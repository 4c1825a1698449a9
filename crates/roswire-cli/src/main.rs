//! `roswire` – ad-hoc rosbridge inspection from the command line.
//!
//! Thin wrapper over the blocking client for quick graph queries:
//!
//! ```text
//! roswire topic list
//! roswire topic type /chatter
//! roswire msg info std_msgs/Header
//! roswire param set /max_vel_x 2.5
//! ```
//!
//! Exits 0 on success, 1 on any failure.

mod typedefs;

use clap::{Parser, Subcommand};
use roswire_client::blocking::Ros;
use roswire_client::ConnectionOptions;
use roswire_types::RosError;
use tracing::debug;

#[derive(Debug, Parser)]
#[command(name = "roswire", version, about = "rosbridge command-line utility")]
struct Cli {
    /// rosbridge host name or IP address.
    #[arg(long, global = true, default_value = "localhost")]
    host: String,

    /// rosbridge port.
    #[arg(long, global = true, default_value_t = 9090)]
    port: u16,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// ROS topics.
    #[command(subcommand)]
    Topic(TopicCommand),
    /// ROS services.
    #[command(subcommand)]
    Service(ServiceCommand),
    /// Message type information.
    #[command(subcommand)]
    Msg(MsgCommand),
    /// Service type information.
    #[command(subcommand)]
    Srv(SrvCommand),
    /// Parameter server access.
    #[command(subcommand)]
    Param(ParamCommand),
}

#[derive(Debug, Subcommand)]
enum TopicCommand {
    /// List available topics.
    List,
    /// Show the message type of a topic.
    Type { topic: String },
    /// Find topics by message type.
    Find { r#type: String },
}

#[derive(Debug, Subcommand)]
enum ServiceCommand {
    /// List available services.
    List,
    /// Show the type of a service.
    Type { service: String },
    /// Find services by type.
    Find { r#type: String },
    /// Show a service's type and message definition.
    Info { service: String },
}

#[derive(Debug, Subcommand)]
enum MsgCommand {
    /// Show the field layout of a message type.
    Info { r#type: String },
}

#[derive(Debug, Subcommand)]
enum SrvCommand {
    /// Show the request/response layout of a service type.
    Info { r#type: String },
}

#[derive(Debug, Subcommand)]
enum ParamCommand {
    /// List parameter names.
    List,
    /// Get a parameter value.
    Get { param: String },
    /// Set a parameter value (JSON literal).
    Set { param: String, value: String },
    /// Delete a parameter.
    Delete { param: String },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(true)
        .compact()
        .init();

    let cli = Cli::parse();
    if let Err(e) = execute(&cli) {
        eprintln!("roswire: {e}");
        std::process::exit(1);
    }
}

fn execute(cli: &Cli) -> Result<(), RosError> {
    let opts = ConnectionOptions::new(cli.host.clone())
        .with_port(cli.port)
        // One attempt only: a CLI query should fail fast, not retry.
        .with_max_retries(1);
    let ros = Ros::new(opts)?;
    ros.run()?;
    debug!(host = %cli.host, port = cli.port, "connected");

    let outcome = run_command(&ros, &cli.command);
    ros.terminate();
    outcome
}

fn run_command(ros: &Ros, command: &Command) -> Result<(), RosError> {
    match command {
        Command::Topic(TopicCommand::List) => {
            for topic in ros.topics()? {
                println!("{topic}");
            }
        }
        Command::Topic(TopicCommand::Type { topic }) => {
            println!("{}", ros.topic_type(topic)?);
        }
        Command::Topic(TopicCommand::Find { r#type }) => {
            for topic in ros.topics_for_type(r#type)? {
                println!("{topic}");
            }
        }
        Command::Service(ServiceCommand::List) => {
            for service in ros.services()? {
                println!("{service}");
            }
        }
        Command::Service(ServiceCommand::Type { service }) => {
            println!("{}", ros.service_type(service)?);
        }
        Command::Service(ServiceCommand::Find { r#type }) => {
            for service in ros.services_for_type(r#type)? {
                println!("{service}");
            }
        }
        Command::Service(ServiceCommand::Info { service }) => {
            let type_name = ros.service_type(service)?;
            println!("Type: {type_name}\n");
            println!("Message definition");
            println!("------------------");
            print_srv_info(ros, &type_name)?;
        }
        Command::Msg(MsgCommand::Info { r#type }) => {
            let details = ros.message_details(r#type)?;
            print!("{}", typedefs::render(&details));
        }
        Command::Srv(SrvCommand::Info { r#type }) => {
            print_srv_info(ros, r#type)?;
        }
        Command::Param(ParamCommand::List) => {
            for param in ros.params()? {
                println!("{param}");
            }
        }
        Command::Param(ParamCommand::Get { param }) => {
            println!("{}", ros.get_param(param)?);
        }
        Command::Param(ParamCommand::Set { param, value }) => {
            let value: serde_json::Value = serde_json::from_str(value)
                .map_err(|e| RosError::InvalidFrame(format!("value is not JSON: {e}")))?;
            ros.set_param(param, &value)?;
        }
        Command::Param(ParamCommand::Delete { param }) => {
            ros.delete_param(param)?;
        }
    }
    Ok(())
}

fn print_srv_info(ros: &Ros, service_type: &str) -> Result<(), RosError> {
    let request = ros.service_request_details(service_type)?;
    print!("{}", typedefs::render(&request));
    println!("---");
    let response = ros.service_response_details(service_type)?;
    print!("{}", typedefs::render(&response));
    Ok(())
}
