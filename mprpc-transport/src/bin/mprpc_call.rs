//! Call a MessagePack-RPC method from the command line.
//!
//! ```text
//! mprpc-call 127.0.0.1:18800 intFunc2 1 2
//! mprpc-call 127.0.0.1:18800 mapFunc1 '{"a": [1, 2.5, null]}'
//! ```
//!
//! Each argument is parsed as JSON and falls back to a plain string. The
//! result is printed as JSON on stdout. `--notify` sends a notification and
//! exits once it has been written; `--udp` talks to a datagram server.

use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use mprpc_transport::{Client, ClientConfig, RpcError, Socket, SocketConfig, Value};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "mprpc-call", version, about = "Call a MessagePack-RPC method")]
struct Args {
    /// Server address (host:port)
    address: String,

    /// Method name
    method: String,

    /// Call arguments, as JSON or plain strings
    args: Vec<String>,

    /// Fail if no reply arrives within this many milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Connection attempt timeout in milliseconds
    #[arg(long, default_value_t = 5000)]
    connect_timeout_ms: u64,

    /// Send as a notification and exit without waiting for a reply
    #[arg(long)]
    notify: bool,

    /// Use UDP instead of TCP
    #[arg(long)]
    udp: bool,
}

/// Time allowed for a notification to be written once connected.
const FLUSH_GRACE: Duration = Duration::from_secs(2);

fn parse_arg(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::from(raw))
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let args = Args::parse();

    let mut config = ClientConfig::default().with_socket(
        SocketConfig::default().with_connect_timeout(Duration::from_millis(args.connect_timeout_ms)),
    );
    if let Some(timeout_ms) = args.timeout_ms {
        config = config.with_call_timeout(Duration::from_millis(timeout_ms));
    }

    let outcome = if args.udp {
        Client::udp_with_config(args.address.clone(), config).map(|client| run(&client, &args))
    } else {
        Client::with_config(args.address.clone(), config).map(|client| run(&client, &args))
    };
    match outcome {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: failed to start client: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run<S: Socket>(client: &Client<S>, args: &Args) -> ExitCode {
    let params: Vec<Value> = args.args.iter().map(|raw| parse_arg(raw)).collect();
    tracing::debug!(address = %args.address, method = %args.method, params = params.len(), "calling");

    if args.notify {
        // Waits out the connection attempt as well as the write.
        let deadline = Duration::from_millis(args.connect_timeout_ms) + FLUSH_GRACE;
        let sent = client
            .notify(&args.method, params)
            .and_then(|()| client.flush(deadline));
        return match sent {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("error: {}", e);
                ExitCode::FAILURE
            }
        };
    }

    match client.call(&args.method, params) {
        Ok(result) => match serde_json::to_string_pretty(&result) {
            Ok(json) => {
                println!("{}", json);
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("error: result is not representable as JSON: {}", e);
                ExitCode::FAILURE
            }
        },
        Err(RpcError::RemoteError(error)) => {
            eprintln!("remote error: {}", error);
            ExitCode::FAILURE
        }
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_arg_json() {
        assert_eq!(parse_arg("42"), Value::from(42));
        assert_eq!(parse_arg("true"), Value::from(true));
        assert_eq!(parse_arg("null"), Value::Nil);
        assert_eq!(
            parse_arg("[1, \"a\"]"),
            Value::from(vec![Value::from(1), Value::from("a")])
        );
    }

    #[test]
    fn test_parse_arg_falls_back_to_string() {
        assert_eq!(parse_arg("hello"), Value::from("hello"));
        assert_eq!(parse_arg("{broken"), Value::from("{broken"));
    }

    #[test]
    fn test_args_parse() {
        let args = Args::try_parse_from([
            "mprpc-call",
            "127.0.0.1:1",
            "intFunc2",
            "1",
            "2",
            "--timeout-ms",
            "250",
        ])
        .expect("valid arguments");
        assert_eq!(args.method, "intFunc2");
        assert_eq!(args.args, vec!["1", "2"]);
        assert_eq!(args.timeout_ms, Some(250));
        assert!(!args.notify);
        assert!(!args.udp);
    }

    #[test]
    fn test_notify_over_udp_flags() {
        let args = Args::try_parse_from(["mprpc-call", "127.0.0.1:1", "tick", "--notify", "--udp"])
            .expect("valid arguments");
        assert!(args.notify);
        assert!(args.udp);
        assert!(args.args.is_empty());
    }
}
