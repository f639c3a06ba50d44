use std::time::Duration;

use clap::Parser;
use resp_bridge::config::{DEFAULT_HOST, DEFAULT_PORT};
use resp_bridge::encoding::{Encoding, EncodingErrors};
use resp_bridge::{Connection, ConnectionConfig, Error, Frame};
use tracing::{debug, Level};

/// Runs a single command against a Redis server and prints the reply.
#[derive(Parser, Debug)]
struct Args {
    /// Server hostname
    #[arg(short = 'H', long, default_value = DEFAULT_HOST, env = "REDIS_HOST")]
    host: String,

    /// Server port
    #[arg(short, long, default_value_t = DEFAULT_PORT, env = "REDIS_PORT")]
    port: u16,

    /// Database number
    #[arg(short = 'n', long, default_value_t = 0)]
    db: u32,

    /// Password used to AUTH right after connecting
    #[arg(short = 'a', long, env = "REDIS_PASSWORD")]
    password: Option<String>,

    /// Timeout for connecting, reading and writing, in milliseconds
    #[arg(short, long)]
    timeout_ms: Option<u64>,

    /// Text encoding: utf-8, latin-1 or ascii
    #[arg(long, default_value_t = Encoding::Utf8)]
    encoding: Encoding,

    /// How to handle text the encoding can't represent: strict, replace or ignore
    #[arg(long, default_value_t = EncodingErrors::Strict)]
    encoding_errors: EncodingErrors,

    /// Print bulk replies as raw bytes instead of decoding them
    #[arg(long)]
    raw: bool,

    /// Log connection activity to stderr
    #[arg(short, long)]
    verbose: bool,

    /// The command and its arguments, e.g. `SET key value`
    #[arg(required = true, num_args = 1..)]
    command: Vec<String>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Error> {
    let args = Args::parse();

    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(if args.verbose {
            Level::DEBUG
        } else {
            Level::WARN
        })
        .try_init()
        .map_err(|e| debug!("Failed to initialize global tracing: {}", e));

    let config = ConnectionConfig {
        host: args.host,
        port: args.port,
        db: args.db,
        password: args.password,
        socket_timeout: args.timeout_ms.map(Duration::from_millis),
        encoding: args.encoding,
        encoding_errors: args.encoding_errors,
        decode_responses: !args.raw,
    };
    let mut conn = Connection::new(config);

    match conn.execute(&args.command).await {
        Ok(frame) => {
            let mut out = String::new();
            render(&frame, &mut out, 0);
            println!("{}", out);
        }
        // Server errors are answers too.
        Err(Error::Response(message)) => println!("(error) {}", message),
        Err(err) => return Err(err),
    }

    conn.disconnect();
    Ok(())
}

/// Formats a reply the way redis-cli does.
fn render(frame: &Frame, out: &mut String, indent: usize) {
    match frame {
        Frame::Simple(s) => out.push_str(s),
        Frame::Error(s) => out.push_str(&format!("(error) {}", s)),
        Frame::Integer(i) => out.push_str(&format!("(integer) {}", i)),
        Frame::Bulk(bytes) => out.push_str(&format!("{:?}", String::from_utf8_lossy(bytes))),
        Frame::Text(s) => out.push_str(&format!("{:?}", s)),
        Frame::Null => out.push_str("(nil)"),
        Frame::Array(items) if items.is_empty() => out.push_str("(empty array)"),
        Frame::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push('\n');
                    out.push_str(&" ".repeat(indent));
                }
                let prefix = format!("{}) ", i + 1);
                out.push_str(&prefix);
                render(item, out, indent + prefix.len());
            }
        }
    }
}
